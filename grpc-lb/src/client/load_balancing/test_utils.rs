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

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::channel_args::ChannelArgs;
use crate::client::load_balancing::ChannelController;
use crate::client::load_balancing::DataWatcher;
use crate::client::load_balancing::LbState;
use crate::client::load_balancing::MetricsRecorder;
use crate::client::load_balancing::Subchannel;
use crate::client::load_balancing::WorkScheduler;
use crate::client::name_resolution::ResolvedAddress;
use crate::rt::GrpcRuntime;
use crate::rt::tokio::default_runtime;

// A test subchannel that forwards connect calls to a channel.
// This allows tests to verify when a subchannel is asked to connect.
pub(crate) struct TestSubchannel {
    address: ResolvedAddress,
    tx_events: mpsc::UnboundedSender<TestEvent>,
    data_watchers: Mutex<Vec<Arc<dyn DataWatcher>>>,
}

impl TestSubchannel {
    pub fn new(address: ResolvedAddress, tx_events: mpsc::UnboundedSender<TestEvent>) -> Self {
        Self {
            address,
            tx_events,
            data_watchers: Mutex::default(),
        }
    }
}

impl Subchannel for TestSubchannel {
    fn address(&self) -> ResolvedAddress {
        self.address.clone()
    }

    fn connect(&self) {
        debug!("connect called for subchannel {}", self.address);
        let _ = self.tx_events.send(TestEvent::Connect(self.address.clone()));
    }

    fn reset_backoff(&self) {
        let _ = self
            .tx_events
            .send(TestEvent::ResetBackoff(self.address.clone()));
    }

    fn add_data_watcher(&self, watcher: Arc<dyn DataWatcher>) {
        self.data_watchers.lock().push(watcher);
    }

    fn cancel_data_watcher(&self, watcher: &Arc<dyn DataWatcher>) {
        self.data_watchers.lock().retain(|w| !Arc::ptr_eq(w, watcher));
    }
}

impl Display for TestSubchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "test subchannel for {}", self.address)
    }
}

pub(crate) enum TestEvent {
    NewSubchannel(Arc<dyn Subchannel>),
    UpdatePicker(LbState),
    RequestResolution,
    Connect(ResolvedAddress),
    ResetBackoff(ResolvedAddress),
    ScheduleWork,
}

impl Debug for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSubchannel(sc) => write!(f, "NewSubchannel({})", sc.address()),
            Self::UpdatePicker(state) => write!(
                f,
                "UpdatePicker({}, {})",
                state.connectivity_state, state.status
            ),
            Self::RequestResolution => write!(f, "RequestResolution"),
            Self::Connect(addr) => write!(f, "Connect({addr})"),
            Self::ResetBackoff(addr) => write!(f, "ResetBackoff({addr})"),
            Self::ScheduleWork => write!(f, "ScheduleWork"),
        }
    }
}

/// Counts everything recorded through it.
#[derive(Default)]
pub(crate) struct TestMetricsRecorder {
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl TestMetricsRecorder {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

impl MetricsRecorder for TestMetricsRecorder {
    fn add_counter(&self, name: &'static str, value: u64) {
        *self.counters.lock().entry(name).or_default() += value;
    }
}

/// A test channel controller that forwards calls to a channel.  This allows
/// tests to verify when a channel controller is asked to create subchannels or
/// update the picker.
pub(crate) struct TestChannelController {
    pub(crate) tx_events: mpsc::UnboundedSender<TestEvent>,
    pub(crate) runtime: GrpcRuntime,
    pub(crate) metrics: Arc<TestMetricsRecorder>,
    /// Addresses for which new_subchannel returns None.
    pub(crate) unusable: HashSet<ResolvedAddress>,
}

impl TestChannelController {
    pub fn new(tx_events: mpsc::UnboundedSender<TestEvent>) -> Self {
        Self {
            tx_events,
            runtime: default_runtime(),
            metrics: Arc::default(),
            unusable: HashSet::new(),
        }
    }
}

impl ChannelController for TestChannelController {
    fn new_subchannel(
        &mut self,
        address: &ResolvedAddress,
        _per_address_args: &ChannelArgs,
        _args: &ChannelArgs,
    ) -> Option<Arc<dyn Subchannel>> {
        debug!("new_subchannel called for address {}", address);
        if self.unusable.contains(address) {
            return None;
        }
        let subchannel: Arc<dyn Subchannel> =
            Arc::new(TestSubchannel::new(address.clone(), self.tx_events.clone()));
        let _ = self
            .tx_events
            .send(TestEvent::NewSubchannel(subchannel.clone()));
        Some(subchannel)
    }

    fn update_picker(&mut self, update: LbState) {
        debug!("picker_update called with {}", update.connectivity_state);
        let _ = self.tx_events.send(TestEvent::UpdatePicker(update));
    }

    fn request_resolution(&mut self) {
        let _ = self.tx_events.send(TestEvent::RequestResolution);
    }

    fn runtime(&self) -> GrpcRuntime {
        self.runtime.clone()
    }

    fn metrics(&self) -> &dyn MetricsRecorder {
        self.metrics.as_ref()
    }
}

pub(crate) struct TestWorkScheduler {
    pub(crate) tx_events: mpsc::UnboundedSender<TestEvent>,
}

impl WorkScheduler for TestWorkScheduler {
    fn schedule_work(&self) {
        let _ = self.tx_events.send(TestEvent::ScheduleWork);
    }
}
