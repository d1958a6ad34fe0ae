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

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::client::ConnectivityState;
use crate::client::backoff::ExponentialBackoff;
use crate::client::backoff::SubchannelBackoffConfig;
use crate::client::channel_args::ChannelArgs;
use crate::client::connectivity_state::ConnectivityStateTracker;
use crate::client::connectivity_state::ConnectivityStateWatcher;
use crate::client::name_resolution::ResolvedAddress;
use crate::client::transport::ConnectArgs;
use crate::client::transport::ConnectedTransport;
use crate::client::transport::Connector;
use crate::rt::BoxedTaskHandle;
use crate::rt::GrpcRuntime;
use crate::rt::TimerHandle;
use crate::status::Status;
use crate::status::StatusCode;

/// Returns whether a subchannel may move from `from` to `to`.
///
/// Connection attempts only start from IDLE, and both a lost connection and
/// an expired backoff return the subchannel to IDLE so the LB policy decides
/// when to reconnect.  Any state other than SHUTDOWN may move to SHUTDOWN.
pub fn is_valid_transition(from: ConnectivityState, to: ConnectivityState) -> bool {
    use ConnectivityState::*;
    match (from, to) {
        (Shutdown, _) => false,
        (_, Shutdown) => true,
        (Idle, Connecting)
        | (Connecting, Ready)
        | (Connecting, TransientFailure)
        | (Ready, Idle)
        | (TransientFailure, Idle) => true,
        _ => false,
    }
}

/// Identifies a subchannel in the pool: the address plus the args that
/// affect how the connection is made.
///
/// Keys order by address bytes first, then by the sorted args.  Callers must
/// strip connection-irrelevant args before building a key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubchannelKey {
    address: ResolvedAddress,
    args: ChannelArgs,
}

impl SubchannelKey {
    pub fn new(address: ResolvedAddress, args: ChannelArgs) -> Self {
        Self { address, args }
    }

    pub fn address(&self) -> &ResolvedAddress {
        &self.address
    }

    pub fn args(&self) -> &ChannelArgs {
        &self.args
    }
}

impl Display for SubchannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args)?;
        }
        Ok(())
    }
}

impl Debug for SubchannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Tags a [`DataWatcher`] with the kind of data it consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataWatcherKind(pub &'static str);

impl DataWatcherKind {
    pub const HEALTH: DataWatcherKind = DataWatcherKind("health");
}

/// An extension point for collaborators layered on top of a subchannel's
/// raw connectivity, e.g. health checking.
///
/// Data watchers see every state change the subchannel makes, starting with
/// its current state when added.  They are called with the subchannel locked
/// and must not call back into it.
pub trait DataWatcher: Send + Sync {
    fn kind(&self) -> DataWatcherKind;

    fn on_connectivity_state_change(&self, state: ConnectivityState, status: &Status);
}

enum InternalSubchannelState {
    Idle,
    Connecting {
        connect_task: Option<BoxedTaskHandle>,
    },
    Ready {
        disconnect_task: Option<BoxedTaskHandle>,
    },
    TransientFailure {
        retry_timer: Option<TimerHandle>,
    },
    Shutdown,
}

impl InternalSubchannelState {
    fn connectivity_state(&self) -> ConnectivityState {
        match self {
            Self::Idle => ConnectivityState::Idle,
            Self::Connecting { .. } => ConnectivityState::Connecting,
            Self::Ready { .. } => ConnectivityState::Ready,
            Self::TransientFailure { .. } => ConnectivityState::TransientFailure,
            Self::Shutdown => ConnectivityState::Shutdown,
        }
    }

    #[cfg(test)]
    fn without_tasks(state: ConnectivityState) -> Self {
        match state {
            ConnectivityState::Idle => Self::Idle,
            ConnectivityState::Connecting => Self::Connecting { connect_task: None },
            ConnectivityState::Ready => Self::Ready {
                disconnect_task: None,
            },
            ConnectivityState::TransientFailure => Self::TransientFailure { retry_timer: None },
            ConnectivityState::Shutdown => Self::Shutdown,
        }
    }
}

impl Drop for InternalSubchannelState {
    fn drop(&mut self) {
        match self {
            Self::Connecting {
                connect_task: Some(task),
            } => task.abort(),
            Self::Ready {
                disconnect_task: Some(task),
            } => task.abort(),
            // TimerHandle cancels itself on drop.
            _ => {}
        }
    }
}

enum SubchannelEvent {
    ConnectionRequested,
    ConnectionSucceeded {
        attempt: u64,
        transport: ConnectedTransport,
    },
    ConnectionFailed {
        attempt: u64,
        status: Status,
    },
    ConnectionTimedOut {
        attempt: u64,
    },
    Disconnected {
        attempt: u64,
        status: Status,
    },
    RetryTimerFired {
        attempt: u64,
    },
}

impl Debug for SubchannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRequested => write!(f, "ConnectionRequested"),
            Self::ConnectionSucceeded { attempt, .. } => {
                write!(f, "ConnectionSucceeded({attempt})")
            }
            Self::ConnectionFailed { attempt, status } => {
                write!(f, "ConnectionFailed({attempt}, {status})")
            }
            Self::ConnectionTimedOut { attempt } => write!(f, "ConnectionTimedOut({attempt})"),
            Self::Disconnected { attempt, status } => {
                write!(f, "Disconnected({attempt}, {status})")
            }
            Self::RetryTimerFired { attempt } => write!(f, "RetryTimerFired({attempt})"),
        }
    }
}

/// One logical connection, shared by every LB policy that asked for the
/// same [`SubchannelKey`].
///
/// The subchannel lives as long as someone holds an `Arc` to it.  Dropping
/// the last reference aborts any in-flight attempt, cancels the retry timer,
/// removes the pool entry and reports SHUTDOWN to the remaining watchers.
pub struct InternalSubchannel {
    key: SubchannelKey,
    connector: Arc<dyn Connector>,
    backoff_config: SubchannelBackoffConfig,
    runtime: GrpcRuntime,
    pool: Weak<SubchannelPool>,
    events: mpsc::UnboundedSender<SubchannelEvent>,
    event_loop: Option<BoxedTaskHandle>,
    inner: Mutex<InnerSubchannel>,
}

struct InnerSubchannel {
    state: InternalSubchannelState,
    tracker: ConnectivityStateTracker,
    backoff: ExponentialBackoff,
    next_attempt: Instant,
    // Incremented per connection attempt so results from abandoned attempts
    // are recognized and dropped.
    attempt: u64,
    data_watchers: Vec<Arc<dyn DataWatcher>>,
}

impl InternalSubchannel {
    pub fn new(
        key: SubchannelKey,
        connector: Arc<dyn Connector>,
        backoff_config: SubchannelBackoffConfig,
        runtime: GrpcRuntime,
        pool: Weak<SubchannelPool>,
    ) -> Arc<InternalSubchannel> {
        debug!(subchannel = %key, "creating subchannel");
        let (tx, mut rx) = mpsc::unbounded_channel::<SubchannelEvent>();
        let backoff = backoff_config.new_backoff();
        let tracker = ConnectivityStateTracker::new(key.to_string(), ConnectivityState::Idle);

        Arc::new_cyclic(|weak: &Weak<InternalSubchannel>| {
            // This long running task implements the subchannel state machine.
            // It holds only a weak reference, so it never keeps the
            // subchannel alive, and exits once the subchannel is gone.
            let weak = weak.clone();
            let loop_key = key.clone();
            let event_loop = runtime.spawn(Box::pin(async move {
                while let Some(event) = rx.recv().await {
                    let Some(sc) = weak.upgrade() else {
                        break;
                    };
                    debug!(subchannel = %loop_key, ?event, "subchannel event");
                    sc.handle_event(event);
                }
                debug!(subchannel = %loop_key, "exiting subchannel state machine");
            }));

            InternalSubchannel {
                key,
                connector,
                backoff_config,
                runtime,
                pool,
                events: tx,
                event_loop: Some(event_loop),
                inner: Mutex::new(InnerSubchannel {
                    state: InternalSubchannelState::Idle,
                    tracker,
                    backoff,
                    next_attempt: Instant::now(),
                    attempt: 0,
                    data_watchers: Vec::new(),
                }),
            }
        })
    }

    pub fn key(&self) -> &SubchannelKey {
        &self.key
    }

    pub fn address(&self) -> &ResolvedAddress {
        self.key.address()
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.lock().tracker.state()
    }

    /// Starts a connection attempt if the subchannel is IDLE.  Otherwise does
    /// nothing; in particular a pending backoff is not skipped.
    pub fn request_connection(&self) {
        if self.state() == ConnectivityState::Idle {
            let _ = self.events.send(SubchannelEvent::ConnectionRequested);
        }
    }

    /// Resets the backoff.  A subchannel waiting out a backoff in
    /// TRANSIENT_FAILURE moves to IDLE right away.
    pub fn reset_backoff(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.backoff.reset();
        let cancelled = match &inner.state {
            InternalSubchannelState::TransientFailure {
                retry_timer: Some(timer),
            } => timer.cancel(),
            InternalSubchannelState::Connecting { .. } => {
                inner.next_attempt = Instant::now();
                false
            }
            _ => false,
        };
        if cancelled {
            self.transition(
                inner,
                InternalSubchannelState::Idle,
                Status::ok(),
                "backoff reset",
            );
        }
    }

    pub fn add_connectivity_state_watcher(
        &self,
        initial_state: ConnectivityState,
        watcher: Arc<dyn ConnectivityStateWatcher>,
    ) {
        self.inner.lock().tracker.add_watcher(initial_state, watcher);
    }

    pub fn remove_connectivity_state_watcher(&self, watcher: &Arc<dyn ConnectivityStateWatcher>) {
        self.inner.lock().tracker.remove_watcher(watcher);
    }

    pub fn add_data_watcher(&self, watcher: Arc<dyn DataWatcher>) {
        let mut inner = self.inner.lock();
        debug!(subchannel = %self.key, kind = watcher.kind().0, "adding data watcher");
        watcher.on_connectivity_state_change(inner.tracker.state(), inner.tracker.status());
        inner.data_watchers.push(watcher);
    }

    /// Returns whether `watcher` was registered.
    pub fn cancel_data_watcher(&self, watcher: &Arc<dyn DataWatcher>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.data_watchers.len();
        inner.data_watchers.retain(|w| !Arc::ptr_eq(w, watcher));
        before != inner.data_watchers.len()
    }

    pub fn data_watcher_count(&self, kind: DataWatcherKind) -> usize {
        self.inner
            .lock()
            .data_watchers
            .iter()
            .filter(|w| w.kind() == kind)
            .count()
    }

    /// Applies a state change requested from outside the connection state
    /// machine.  Invalid transitions are rejected and leave no trace.
    #[cfg(test)]
    pub(crate) fn try_transition(&self, to: ConnectivityState, status: Status) -> bool {
        let mut inner = self.inner.lock();
        self.transition(
            &mut inner,
            InternalSubchannelState::without_tasks(to),
            status,
            "requested",
        )
    }

    fn handle_event(&self, event: SubchannelEvent) {
        let mut inner = self.inner.lock();
        let current = inner.attempt;
        match event {
            SubchannelEvent::ConnectionRequested => self.start_connecting(&mut inner),
            SubchannelEvent::ConnectionSucceeded { attempt, transport } if attempt == current => {
                self.move_to_ready(&mut inner, transport)
            }
            SubchannelEvent::ConnectionFailed { attempt, status } if attempt == current => {
                self.move_to_transient_failure(&mut inner, status)
            }
            SubchannelEvent::ConnectionTimedOut { attempt } if attempt == current => self
                .move_to_transient_failure(
                    &mut inner,
                    Status::new(StatusCode::DeadlineExceeded, "connection attempt timed out"),
                ),
            SubchannelEvent::Disconnected { attempt, status } if attempt == current => {
                self.transition(
                    &mut inner,
                    InternalSubchannelState::Idle,
                    status,
                    "connection lost",
                );
            }
            SubchannelEvent::RetryTimerFired { attempt } if attempt == current => {
                self.transition(
                    &mut inner,
                    InternalSubchannelState::Idle,
                    Status::ok(),
                    "backoff expired",
                );
            }
            stale => debug!(subchannel = %self.key, event = ?stale, "ignoring stale event"),
        }
    }

    fn start_connecting(&self, inner: &mut InnerSubchannel) {
        if inner.tracker.state() != ConnectivityState::Idle {
            return;
        }
        let now = Instant::now();
        inner.next_attempt = now + inner.backoff.backoff_duration();
        let deadline = inner
            .next_attempt
            .max(now + self.backoff_config.min_connect_timeout);
        inner.attempt += 1;
        let attempt = inner.attempt;

        let connector = self.connector.clone();
        let args = ConnectArgs {
            address: self.key.address().clone(),
            deadline,
            args: self.key.args().clone(),
        };
        let tx = self.events.clone();
        let sleep = self.runtime.sleep(deadline.saturating_duration_since(now));
        let connect_task = self.runtime.spawn(Box::pin(async move {
            let event = tokio::select! {
                _ = sleep => SubchannelEvent::ConnectionTimedOut { attempt },
                result = connector.connect(args) => match result {
                    Ok(transport) => SubchannelEvent::ConnectionSucceeded { attempt, transport },
                    Err(status) => SubchannelEvent::ConnectionFailed { attempt, status },
                },
            };
            let _ = tx.send(event);
        }));

        self.transition(
            inner,
            InternalSubchannelState::Connecting {
                connect_task: Some(connect_task),
            },
            Status::ok(),
            "connection requested",
        );
    }

    fn move_to_ready(&self, inner: &mut InnerSubchannel, transport: ConnectedTransport) {
        let attempt = inner.attempt;
        let tx = self.events.clone();
        let disconnect_task = self.runtime.spawn(Box::pin(async move {
            let status = transport.disconnected().await;
            let _ = tx.send(SubchannelEvent::Disconnected { attempt, status });
        }));
        if self.transition(
            inner,
            InternalSubchannelState::Ready {
                disconnect_task: Some(disconnect_task),
            },
            Status::ok(),
            "connected",
        ) {
            inner.backoff.reset();
        }
    }

    fn move_to_transient_failure(&self, inner: &mut InnerSubchannel, status: Status) {
        let status = status.with_message_prefix(&format!("{}: ", self.key.address()));
        let attempt = inner.attempt;
        let tx = self.events.clone();
        let delay = inner.next_attempt.saturating_duration_since(Instant::now());
        debug!(subchannel = %self.key, ?delay, "scheduling reconnect");
        let retry_timer = self.runtime.run_after(delay, move || {
            let _ = tx.send(SubchannelEvent::RetryTimerFired { attempt });
        });
        self.transition(
            inner,
            InternalSubchannelState::TransientFailure {
                retry_timer: Some(retry_timer),
            },
            status,
            "connection attempt failed",
        );
    }

    fn transition(
        &self,
        inner: &mut InnerSubchannel,
        state: InternalSubchannelState,
        status: Status,
        reason: &str,
    ) -> bool {
        let from = inner.tracker.state();
        let to = state.connectivity_state();
        if !is_valid_transition(from, to) {
            warn!(
                subchannel = %self.key,
                %from,
                %to,
                reason,
                "rejecting invalid connectivity state transition"
            );
            return false;
        }
        inner.state = state;
        inner.tracker.set_state(to, status.clone(), reason);
        for w in &inner.data_watchers {
            w.on_connectivity_state_change(to, &status);
        }
        true
    }
}

impl Display for InternalSubchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl Drop for InternalSubchannel {
    fn drop(&mut self) {
        debug!(subchannel = %self.key, "destroying subchannel");
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.abort();
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.unregister_subchannel(&self.key, self);
        }
    }
}

/// Deduplicates subchannels by [`SubchannelKey`].
///
/// The pool only holds weak references.  An entry disappears when its
/// subchannel is dropped, so the pool never keeps a connection alive on its
/// own.  Pools are constructed explicitly and shared by handing the same
/// `Arc` to every channel that should share connections.
#[derive(Default)]
pub struct SubchannelPool {
    subchannels: RwLock<BTreeMap<SubchannelKey, Weak<InternalSubchannel>>>,
}

impl SubchannelPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live subchannel registered for `key`, if any.
    pub fn find_subchannel(&self, key: &SubchannelKey) -> Option<Arc<InternalSubchannel>> {
        self.subchannels.read().get(key).and_then(Weak::upgrade)
    }

    /// Registers `candidate` under `key`, unless a live subchannel is already
    /// registered, in which case that one is returned and `candidate` is
    /// discarded.  Concurrent callers with the same key all get the same
    /// subchannel.
    pub fn register_subchannel(
        &self,
        key: SubchannelKey,
        candidate: Arc<InternalSubchannel>,
    ) -> Arc<InternalSubchannel> {
        let mut subchannels = self.subchannels.write();
        if let Some(existing) = subchannels.get(&key).and_then(Weak::upgrade) {
            // Dropping the candidate runs its destructor, which takes this
            // lock.
            drop(subchannels);
            debug!(subchannel = %key, "reusing existing subchannel");
            drop(candidate);
            return existing;
        }
        debug!(subchannel = %key, "registering subchannel");
        subchannels.insert(key, Arc::downgrade(&candidate));
        candidate
    }

    /// Removes the entry for `key` only if it refers to `subchannel`.
    pub fn unregister_subchannel(&self, key: &SubchannelKey, subchannel: &InternalSubchannel) {
        let mut subchannels = self.subchannels.write();
        let matches = subchannels
            .get(key)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), subchannel));
        if matches {
            debug!(subchannel = %key, "removing subchannel from pool");
            subchannels.remove(key);
        }
    }

    /// The number of live subchannels in the pool.
    pub fn len(&self) -> usize {
        self.subchannels
            .read()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every entry.  Live subchannels are unaffected, but are no
    /// longer found by lookups.
    pub fn reset(&self) {
        self.subchannels.write().clear();
    }
}
