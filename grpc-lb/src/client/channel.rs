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

//! The channel layer that hosts an LB policy.
//!
//! A [`Channel`] owns one LB policy and the [`WorkSerializer`] every call into
//! that policy runs on.  It creates subchannels on the policy's behalf,
//! sharing connections through a [`SubchannelPool`], and publishes the
//! policy's pickers so RPCs can pick without taking any lock.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use url::Url;

use crate::client::ConnectivityState;
use crate::client::backoff::SubchannelBackoffConfig;
use crate::client::channel_args::ChannelArgs;
use crate::client::channel_args::NO_SUBCHANNEL_PREFIX;
use crate::client::connectivity_state::AsyncConnectivityStateWatcher;
use crate::client::connectivity_state::ConnectivityStateTracker;
use crate::client::connectivity_state::ConnectivityStateWatcher;
use crate::client::load_balancing::ChannelController;
use crate::client::load_balancing::ConfigError;
use crate::client::load_balancing::DataWatcher;
use crate::client::load_balancing::LbPolicy;
use crate::client::load_balancing::LbPolicyOptions;
use crate::client::load_balancing::LbState;
use crate::client::load_balancing::MetricsRecorder;
use crate::client::load_balancing::NoopMetricsRecorder;
use crate::client::load_balancing::PickArgs;
use crate::client::load_balancing::PickResult;
use crate::client::load_balancing::QueuingPicker;
use crate::client::load_balancing::Subchannel;
use crate::client::load_balancing::SubchannelState;
use crate::client::load_balancing::UpdateArgs;
use crate::client::load_balancing::WorkScheduler;
use crate::client::load_balancing::pick_first;
use crate::client::load_balancing::registry::LbPolicyRegistry;
use crate::client::load_balancing::registry::default_registry;
use crate::client::name_resolution::ResolvedAddress;
use crate::client::subchannel::InternalSubchannel;
use crate::client::subchannel::SubchannelKey;
use crate::client::subchannel::SubchannelPool;
use crate::client::transport::Connector;
use crate::client::work_serializer::WorkSerializer;
use crate::rt::GrpcRuntime;
use crate::rt::tokio::default_runtime;
use crate::status::Status;

/// Errors from [`Channel::new`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Optional configuration for a [`Channel`].
pub struct ChannelOptions {
    /// Args applied to every subchannel, and read by the LB policy.
    pub args: ChannelArgs,

    /// The name of the LB policy to build from `registry`.
    pub lb_policy: String,

    pub registry: LbPolicyRegistry,

    /// Channels handed the same pool share connections to the same
    /// addresses.  By default every channel gets its own pool.
    pub pool: Arc<SubchannelPool>,

    pub metrics: Arc<dyn MetricsRecorder>,

    /// Runs subchannel state machines, timers and the work serializer.
    /// Defaults to the ambient tokio runtime.
    pub runtime: Option<GrpcRuntime>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            args: ChannelArgs::new(),
            lb_policy: pick_first::POLICY_NAME.to_string(),
            registry: default_registry(),
            pool: Arc::new(SubchannelPool::new()),
            metrics: Arc::new(NoopMetricsRecorder),
            runtime: None,
        }
    }
}

/// A virtual connection to a service, load balanced across the addresses it
/// is given.
///
/// Cloning a `Channel` produces another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Constructs a new channel.  Channels start IDLE and do nothing until
    /// the first call to [`Channel::update`].
    pub fn new(
        target: &str,
        connector: Arc<dyn Connector>,
        options: ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let target = Url::parse(target)?;
        let Some(builder) = options.registry.get_policy(&options.lb_policy) else {
            return Err(ConfigError::UnknownPolicy(options.lb_policy).into());
        };
        let runtime = options.runtime.unwrap_or_else(default_runtime);
        let serializer = WorkSerializer::new(&runtime);
        debug!(%target, policy = builder.name(), "creating channel");

        let inner = Arc::new_cyclic(|weak: &Weak<ChannelInner>| {
            let policy = builder.build(LbPolicyOptions {
                work_scheduler: Arc::new(ChannelWorkScheduler {
                    channel: weak.clone(),
                }),
                args: options.args.clone(),
            });
            ChannelInner {
                tracker: Mutex::new(ConnectivityStateTracker::new(
                    target.to_string(),
                    ConnectivityState::Idle,
                )),
                target,
                args: options.args,
                connector,
                pool: options.pool,
                metrics: options.metrics,
                runtime,
                serializer,
                policy: Mutex::new(policy),
                current: ArcSwap::from_pointee(LbState {
                    connectivity_state: ConnectivityState::Idle,
                    status: Status::ok(),
                    picker: Arc::new(QueuingPicker {}),
                }),
                received_update: AtomicBool::new(false),
                work_pending: AtomicBool::new(false),
                resolution_requests: AtomicUsize::new(0),
            }
        });
        Ok(Channel { inner })
    }

    pub fn target(&self) -> &Url {
        &self.inner.target
    }

    /// Delivers a resolver result to the LB policy.  Returns the policy's
    /// verdict on the update.
    pub async fn update(&self, update: UpdateArgs) -> Result<(), Status> {
        let (tx, rx) = oneshot::channel();
        self.inner.run_with_policy(move |policy, controller| {
            // The channel leaves IDLE as soon as it has something to connect
            // to.
            if !controller.channel.received_update.swap(true, Ordering::AcqRel) {
                controller.update_picker(LbState::initial());
            }
            let _ = tx.send(policy.resolver_update(update, controller));
        });
        rx.await
            .unwrap_or_else(|_| Err(Status::unavailable("channel is shutting down")))
    }

    /// Picks a subchannel for an RPC using the LB policy's latest picker.
    pub fn pick(&self, args: &PickArgs<'_>) -> PickResult {
        self.inner.current.load().picker.pick(args)
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.tracker.lock().state()
    }

    /// Registers `watcher` for the channel's connectivity state changes.  If
    /// the state already differs from `initial_state` the watcher hears about
    /// it right away.  Watchers are called with the channel's state locked
    /// and must not call back into the channel.
    pub fn watch_state(
        &self,
        initial_state: ConnectivityState,
        watcher: Arc<dyn ConnectivityStateWatcher>,
    ) {
        self.inner
            .tracker
            .lock()
            .add_watcher(initial_state, watcher);
    }

    pub fn unwatch_state(&self, watcher: &Arc<dyn ConnectivityStateWatcher>) {
        self.inner.tracker.lock().remove_watcher(watcher);
    }

    /// Asks an IDLE LB policy to start connecting.
    pub fn exit_idle(&self) {
        self.inner
            .run_with_policy(|policy, controller| policy.exit_idle(controller));
    }

    /// Skips the reconnect backoff of every subchannel the LB policy owns.
    pub fn reset_backoff(&self) {
        self.inner
            .run_with_policy(|policy, controller| policy.reset_backoff(controller));
    }

    /// The number of times the LB policy asked for re-resolution.
    pub fn resolution_requests(&self) -> usize {
        self.inner.resolution_requests.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &Arc<SubchannelPool> {
        &self.inner.pool
    }

    /// Waits until all work queued for the LB policy has run.
    pub async fn drain(&self) {
        self.inner.serializer.drain().await
    }
}

struct ChannelInner {
    target: Url,
    args: ChannelArgs,
    connector: Arc<dyn Connector>,
    pool: Arc<SubchannelPool>,
    metrics: Arc<dyn MetricsRecorder>,
    runtime: GrpcRuntime,
    serializer: WorkSerializer,
    // Only locked from the serializer, so never contended.
    policy: Mutex<Box<dyn LbPolicy>>,
    // The policy's latest state and picker.
    current: ArcSwap<LbState>,
    tracker: Mutex<ConnectivityStateTracker>,
    received_update: AtomicBool,
    work_pending: AtomicBool,
    resolution_requests: AtomicUsize,
}

impl ChannelInner {
    // Queues `f` to run against the policy on the serializer.
    fn run_with_policy(
        self: &Arc<Self>,
        f: impl FnOnce(&mut dyn LbPolicy, &mut InternalChannelController) + Send + 'static,
    ) {
        let channel = Arc::downgrade(self);
        self.serializer.run(move || {
            if let Some(channel) = channel.upgrade() {
                channel.with_policy(f);
            }
        });
    }

    // Must only be called from the serializer.
    fn with_policy(
        self: &Arc<Self>,
        f: impl FnOnce(&mut dyn LbPolicy, &mut InternalChannelController),
    ) {
        let mut controller = InternalChannelController {
            channel: self.clone(),
        };
        let mut policy = self.policy.lock();
        f(policy.as_mut(), &mut controller);
    }

    fn new_subchannel(
        self: &Arc<Self>,
        address: &ResolvedAddress,
        per_address_args: &ChannelArgs,
        args: &ChannelArgs,
    ) -> Option<Arc<dyn Subchannel>> {
        if !self.connector.supports(address) {
            debug!(channel = %self.target, %address, "connector does not support address");
            return None;
        }
        // Channel args win over per-address args, which win over the
        // resolver's.
        let args = self
            .args
            .union_with(per_address_args)
            .union_with(args)
            .remove_all_keys_with_prefix(NO_SUBCHANNEL_PREFIX);
        let key = SubchannelKey::new(address.clone(), args);
        let isc = match self.pool.find_subchannel(&key) {
            Some(isc) => isc,
            None => {
                let candidate = InternalSubchannel::new(
                    key.clone(),
                    self.connector.clone(),
                    SubchannelBackoffConfig::from_channel_args(key.args()),
                    self.runtime.clone(),
                    Arc::downgrade(&self.pool),
                );
                self.pool.register_subchannel(key, candidate)
            }
        };

        let subchannel = Arc::new_cyclic(|weak: &Weak<ExternalSubchannel>| {
            let forwarder = Arc::new(SubchannelStateWatcher {
                subchannel: weak.clone(),
                channel: Arc::downgrade(self),
            });
            ExternalSubchannel {
                isc: isc.clone(),
                watcher: Arc::new(AsyncConnectivityStateWatcher::new(
                    forwarder,
                    self.serializer.clone(),
                )),
                data_watchers: Mutex::default(),
            }
        });
        // A floor of SHUTDOWN guarantees the policy hears the current state
        // first.
        isc.add_connectivity_state_watcher(ConnectivityState::Shutdown, subchannel.watcher.clone());
        Some(subchannel)
    }

    fn update_picker(&self, update: LbState) {
        debug!(
            channel = %self.target,
            state = %update.connectivity_state,
            status = %update.status,
            "LB policy produced a new picker"
        );
        let (state, status) = (update.connectivity_state, update.status.clone());
        self.current.store(Arc::new(update));
        self.tracker.lock().set_state(state, status, "LB policy update");
    }
}

/// The [`ChannelController`] handed to the LB policy.
struct InternalChannelController {
    channel: Arc<ChannelInner>,
}

impl ChannelController for InternalChannelController {
    fn new_subchannel(
        &mut self,
        address: &ResolvedAddress,
        per_address_args: &ChannelArgs,
        args: &ChannelArgs,
    ) -> Option<Arc<dyn Subchannel>> {
        self.channel.new_subchannel(address, per_address_args, args)
    }

    fn update_picker(&mut self, update: LbState) {
        self.channel.update_picker(update);
    }

    fn request_resolution(&mut self) {
        debug!(channel = %self.channel.target, "LB policy requested re-resolution");
        self.channel
            .resolution_requests
            .fetch_add(1, Ordering::AcqRel);
    }

    fn runtime(&self) -> GrpcRuntime {
        self.channel.runtime.clone()
    }

    fn metrics(&self) -> &dyn MetricsRecorder {
        self.channel.metrics.as_ref()
    }
}

struct ChannelWorkScheduler {
    channel: Weak<ChannelInner>,
}

impl WorkScheduler for ChannelWorkScheduler {
    fn schedule_work(&self) {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        // At most one call to work() is pending at a time.
        if channel.work_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        channel.run_with_policy(|policy, controller| {
            controller
                .channel
                .work_pending
                .store(false, Ordering::Release);
            policy.work(controller);
        });
    }
}

/// The policy's handle to a pooled [`InternalSubchannel`].
///
/// Every call to `new_subchannel` produces a distinct handle, even when the
/// underlying subchannel is shared.
struct ExternalSubchannel {
    isc: Arc<InternalSubchannel>,
    watcher: Arc<dyn ConnectivityStateWatcher>,
    data_watchers: Mutex<Vec<Arc<dyn DataWatcher>>>,
}

impl Subchannel for ExternalSubchannel {
    fn address(&self) -> ResolvedAddress {
        self.isc.address().clone()
    }

    fn connect(&self) {
        self.isc.request_connection();
    }

    fn reset_backoff(&self) {
        self.isc.reset_backoff();
    }

    fn add_data_watcher(&self, watcher: Arc<dyn DataWatcher>) {
        self.data_watchers.lock().push(watcher.clone());
        self.isc.add_data_watcher(watcher);
    }

    fn cancel_data_watcher(&self, watcher: &Arc<dyn DataWatcher>) {
        self.data_watchers
            .lock()
            .retain(|w| !Arc::ptr_eq(w, watcher));
        self.isc.cancel_data_watcher(watcher);
    }
}

impl Display for ExternalSubchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subchannel {}", self.isc)
    }
}

impl Drop for ExternalSubchannel {
    fn drop(&mut self) {
        self.isc.remove_connectivity_state_watcher(&self.watcher);
        for watcher in self.data_watchers.get_mut().drain(..) {
            self.isc.cancel_data_watcher(&watcher);
        }
    }
}

// Delivers state changes of an InternalSubchannel to the LB policy as updates
// for one ExternalSubchannel.  Runs on the channel's serializer.
struct SubchannelStateWatcher {
    subchannel: Weak<ExternalSubchannel>,
    channel: Weak<ChannelInner>,
}

impl ConnectivityStateWatcher for SubchannelStateWatcher {
    fn on_connectivity_state_change(&self, state: ConnectivityState, status: &Status) {
        // The handle may have been dropped while this notification was
        // queued; nobody is interested in it any more.
        let (Some(subchannel), Some(channel)) = (self.subchannel.upgrade(), self.channel.upgrade())
        else {
            return;
        };
        let update = SubchannelState {
            connectivity_state: state,
            status: status.clone(),
        };
        channel.with_policy(|policy, controller| {
            policy.subchannel_update(subchannel, &update, controller)
        });
    }
}
