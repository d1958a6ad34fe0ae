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

use std::sync::Arc;

use tracing::debug;

use crate::client::ConnectivityState;
use crate::client::work_serializer::WorkSerializer;
use crate::status::Status;

/// Receives connectivity state changes from a [`ConnectivityStateTracker`].
///
/// Notifications are delivered synchronously while the tracker's owner holds
/// whatever lock guards the tracker.  Implementations must not call back into
/// the owner; wrap the watcher in an [`AsyncConnectivityStateWatcher`] to get
/// the notification delivered on a [`WorkSerializer`] instead.
pub trait ConnectivityStateWatcher: Send + Sync {
    fn on_connectivity_state_change(&self, state: ConnectivityState, status: &Status);
}

/// Holds the connectivity state of a single entity and the set of watchers
/// interested in it.
///
/// The tracker is not synchronized; its owner serializes access to it.
/// SHUTDOWN is terminal.  Once it has been reported every watcher is
/// released, and nothing further is ever reported.
pub struct ConnectivityStateTracker {
    name: String,
    state: ConnectivityState,
    status: Status,
    watchers: Vec<Arc<dyn ConnectivityStateWatcher>>,
}

impl ConnectivityStateTracker {
    pub fn new(name: impl Into<String>, state: ConnectivityState) -> Self {
        ConnectivityStateTracker {
            name: name.into(),
            state,
            status: Status::ok(),
            watchers: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Starts watching the tracker.
    ///
    /// `initial_state` is the state the caller already believes the entity to
    /// be in.  If the current state differs, the watcher is notified of it
    /// immediately.  A tracker that is already SHUTDOWN never registers the
    /// watcher.
    pub fn add_watcher(
        &mut self,
        initial_state: ConnectivityState,
        watcher: Arc<dyn ConnectivityStateWatcher>,
    ) {
        debug!(
            tracker = %self.name,
            current = %self.state,
            initial = %initial_state,
            "adding connectivity state watcher"
        );
        if initial_state != self.state {
            watcher.on_connectivity_state_change(self.state, &self.status);
        }
        if self.state != ConnectivityState::Shutdown {
            self.watchers.push(watcher);
        }
    }

    /// Stops delivering notifications to `watcher`.  Returns whether it was
    /// registered.
    pub fn remove_watcher(&mut self, watcher: &Arc<dyn ConnectivityStateWatcher>) -> bool {
        let before = self.watchers.len();
        self.watchers.retain(|w| !Arc::ptr_eq(w, watcher));
        before != self.watchers.len()
    }

    /// Moves to `state` and notifies every watcher.  Has no effect if the
    /// state is unchanged or the tracker is already SHUTDOWN.
    pub fn set_state(&mut self, state: ConnectivityState, status: Status, reason: &str) {
        if self.state == ConnectivityState::Shutdown {
            debug!(tracker = %self.name, to = %state, reason, "ignoring state change after shutdown");
            return;
        }
        if self.state == state {
            return;
        }
        debug!(
            tracker = %self.name,
            from = %self.state,
            to = %state,
            %status,
            reason,
            "connectivity state change"
        );
        self.state = state;
        self.status = status;
        for w in &self.watchers {
            w.on_connectivity_state_change(state, &self.status);
        }
        if state == ConnectivityState::Shutdown {
            self.watchers.clear();
        }
    }
}

impl Drop for ConnectivityStateTracker {
    fn drop(&mut self) {
        if self.state == ConnectivityState::Shutdown {
            return;
        }
        debug!(tracker = %self.name, from = %self.state, "tracker destroyed, reporting shutdown");
        let status = Status::ok();
        for w in self.watchers.drain(..) {
            w.on_connectivity_state_change(ConnectivityState::Shutdown, &status);
        }
    }
}

/// Forwards notifications to another watcher by way of a [`WorkSerializer`].
pub struct AsyncConnectivityStateWatcher {
    inner: Arc<dyn ConnectivityStateWatcher>,
    serializer: WorkSerializer,
}

impl AsyncConnectivityStateWatcher {
    pub fn new(inner: Arc<dyn ConnectivityStateWatcher>, serializer: WorkSerializer) -> Self {
        AsyncConnectivityStateWatcher { inner, serializer }
    }
}

impl ConnectivityStateWatcher for AsyncConnectivityStateWatcher {
    fn on_connectivity_state_change(&self, state: ConnectivityState, status: &Status) {
        let inner = self.inner.clone();
        let status = status.clone();
        self.serializer
            .run(move || inner.on_connectivity_state_change(state, &status));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::rt::tokio::default_runtime;

    #[derive(Default)]
    struct RecordingWatcher {
        events: Mutex<Vec<(ConnectivityState, Status)>>,
    }

    impl RecordingWatcher {
        fn events(&self) -> Vec<(ConnectivityState, Status)> {
            self.events.lock().clone()
        }
    }

    impl ConnectivityStateWatcher for RecordingWatcher {
        fn on_connectivity_state_change(&self, state: ConnectivityState, status: &Status) {
            self.events.lock().push((state, status.clone()));
        }
    }

    fn watcher() -> (Arc<RecordingWatcher>, Arc<dyn ConnectivityStateWatcher>) {
        let w = Arc::new(RecordingWatcher::default());
        let dyn_w: Arc<dyn ConnectivityStateWatcher> = w.clone();
        (w, dyn_w)
    }

    #[test]
    fn notifies_on_change() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Idle);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w);
        assert!(w.events().is_empty());

        let status = Status::unavailable("connect failed");
        tracker.set_state(ConnectivityState::Connecting, Status::ok(), "connecting");
        tracker.set_state(ConnectivityState::TransientFailure, status.clone(), "failed");
        assert_eq!(
            w.events(),
            vec![
                (ConnectivityState::Connecting, Status::ok()),
                (ConnectivityState::TransientFailure, status.clone()),
            ]
        );
        assert_eq!(tracker.state(), ConnectivityState::TransientFailure);
        assert_eq!(tracker.status(), &status);
    }

    #[test]
    fn unchanged_state_is_not_reported() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Idle);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w);
        tracker.set_state(ConnectivityState::Idle, Status::ok(), "still idle");
        assert!(w.events().is_empty());
    }

    #[test]
    fn initial_notification_when_floor_differs() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Ready);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w);
        assert_eq!(w.events(), vec![(ConnectivityState::Ready, Status::ok())]);
        assert_eq!(tracker.watcher_count(), 1);
    }

    #[test]
    fn subscribe_then_unsubscribe() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Idle);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w.clone());
        assert!(tracker.remove_watcher(&dyn_w));
        assert!(!tracker.remove_watcher(&dyn_w));
        tracker.set_state(ConnectivityState::Connecting, Status::ok(), "connecting");
        drop(tracker);
        assert!(w.events().is_empty());
    }

    #[test]
    fn shutdown_is_terminal() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Idle);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w);
        tracker.set_state(ConnectivityState::Shutdown, Status::ok(), "shutdown");
        assert_eq!(tracker.watcher_count(), 0);
        tracker.set_state(ConnectivityState::Ready, Status::ok(), "too late");
        assert_eq!(tracker.state(), ConnectivityState::Shutdown);
        drop(tracker);
        assert_eq!(w.events(), vec![(ConnectivityState::Shutdown, Status::ok())]);
    }

    #[test]
    fn notify_shutdown_at_destruction() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Idle);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w);
        drop(tracker);
        assert_eq!(w.events(), vec![(ConnectivityState::Shutdown, Status::ok())]);
    }

    #[test]
    fn add_watcher_after_shutdown() {
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Shutdown);
        let (w1, dyn_w1) = watcher();
        tracker.add_watcher(ConnectivityState::Idle, dyn_w1);
        assert_eq!(w1.events(), vec![(ConnectivityState::Shutdown, Status::ok())]);

        let (w2, dyn_w2) = watcher();
        tracker.add_watcher(ConnectivityState::Shutdown, dyn_w2);
        assert!(w2.events().is_empty());
        assert_eq!(tracker.watcher_count(), 0);
        drop(tracker);
        assert_eq!(w1.events().len(), 1);
        assert!(w2.events().is_empty());
    }

    #[tokio::test]
    async fn async_watcher_delivers_on_serializer() {
        let serializer = WorkSerializer::new(&default_runtime());
        let mut tracker = ConnectivityStateTracker::new("test", ConnectivityState::Idle);
        let (w, dyn_w) = watcher();
        tracker.add_watcher(
            ConnectivityState::Idle,
            Arc::new(AsyncConnectivityStateWatcher::new(dyn_w, serializer.clone())),
        );
        tracker.set_state(ConnectivityState::Connecting, Status::ok(), "connecting");
        tracker.set_state(ConnectivityState::Ready, Status::ok(), "ready");
        serializer.drain().await;
        assert_eq!(
            w.events(),
            vec![
                (ConnectivityState::Connecting, Status::ok()),
                (ConnectivityState::Ready, Status::ok()),
            ]
        );
    }
}
