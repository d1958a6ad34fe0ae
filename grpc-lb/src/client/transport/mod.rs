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

//! The seam between subchannels and the wire.
//!
//! Subchannels do not know how connections are made.  They hand a
//! [`Connector`] the address and a deadline, and get back a
//! [`ConnectedTransport`] that reports exactly once when the connection is
//! lost.

use tokio::sync::oneshot;
use tokio::time::Instant;
use tonic::async_trait;

use crate::client::channel_args::ChannelArgs;
use crate::client::name_resolution::ResolvedAddress;
use crate::status::Status;

#[cfg(test)]
pub(crate) mod test_utils;

/// Everything a [`Connector`] needs to establish one connection.
#[derive(Debug, Clone)]
pub struct ConnectArgs {
    pub address: ResolvedAddress,

    /// The attempt is abandoned if it has not completed by this time.
    pub deadline: Instant,

    /// The subchannel's args, with connection-irrelevant keys removed.
    pub args: ChannelArgs,
}

/// Establishes connections on behalf of subchannels.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, args: ConnectArgs) -> Result<ConnectedTransport, Status>;

    /// Whether this connector can reach `address` at all.  Subchannels are
    /// not created for unsupported addresses.
    fn supports(&self, _address: &ResolvedAddress) -> bool {
        true
    }
}

/// A live connection.  The only thing a subchannel needs from it is to learn
/// when it goes away.
pub struct ConnectedTransport {
    disconnected: oneshot::Receiver<Status>,
}

impl ConnectedTransport {
    /// Creates a transport along with the notifier its owner fires when the
    /// connection closes.
    pub fn new() -> (Self, DisconnectNotifier) {
        let (tx, rx) = oneshot::channel();
        (
            ConnectedTransport { disconnected: rx },
            DisconnectNotifier { tx },
        )
    }

    /// Resolves once the connection is lost.  A notifier dropped without
    /// firing counts as a disconnect.
    pub async fn disconnected(self) -> Status {
        self.disconnected
            .await
            .unwrap_or_else(|_| Status::unavailable("transport closed"))
    }
}

/// Reports the loss of a [`ConnectedTransport`].  Fires at most once, which
/// the type enforces by consuming itself.
pub struct DisconnectNotifier {
    tx: oneshot::Sender<Status>,
}

impl DisconnectNotifier {
    pub fn notify(self, status: Status) {
        // The subchannel may already be gone, in which case nobody cares.
        let _ = self.tx.send(status);
    }
}
