/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tonic::async_trait;

use crate::client::name_resolution::ResolvedAddress;
use crate::client::transport::ConnectArgs;
use crate::client::transport::ConnectedTransport;
use crate::client::transport::Connector;
use crate::client::transport::DisconnectNotifier;
use crate::status::Status;

/// A connection attempt waiting for the test to decide its outcome.
pub(crate) struct PendingConnect {
    pub args: ConnectArgs,
    result: oneshot::Sender<Result<ConnectedTransport, Status>>,
}

impl PendingConnect {
    /// Completes the attempt successfully.  The returned notifier drops the
    /// connection when fired or dropped.
    pub fn succeed(self) -> DisconnectNotifier {
        let (transport, notifier) = ConnectedTransport::new();
        let _ = self.result.send(Ok(transport));
        notifier
    }

    pub fn fail(self, status: Status) {
        let _ = self.result.send(Err(status));
    }
}

/// A [`Connector`] whose attempts are resolved by the test.
pub(crate) struct ManualConnector {
    tx: mpsc::UnboundedSender<PendingConnect>,
    unsupported: BTreeSet<ResolvedAddress>,
}

impl ManualConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConnect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ManualConnector {
                tx,
                unsupported: BTreeSet::new(),
            },
            rx,
        )
    }

    pub fn reject_address(mut self, address: ResolvedAddress) -> Self {
        self.unsupported.insert(address);
        self
    }
}

#[async_trait]
impl Connector for ManualConnector {
    async fn connect(&self, args: ConnectArgs) -> Result<ConnectedTransport, Status> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(PendingConnect { args, result: tx })
            .map_err(|_| Status::unavailable("test connector closed"))?;
        rx.await
            .unwrap_or_else(|_| Err(Status::unavailable("connection attempt abandoned")))
    }

    fn supports(&self, address: &ResolvedAddress) -> bool {
        !self.unsupported.contains(address)
    }
}

/// Waits for the next connection attempt, failing the test if none shows up
/// within a few seconds.
pub(crate) async fn next_connect(rx: &mut mpsc::UnboundedReceiver<PendingConnect>) -> PendingConnect {
    tokio::select! {
        attempt = rx.recv() => attempt.expect("connector dropped"),
        _ = tokio::time::sleep(Duration::from_secs(5)) => panic!("timed out waiting for a connection attempt"),
    }
}
