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

//! The pick_first LB policy.
//!
//! pick_first flattens the resolver's endpoints into one ordered list of
//! addresses and tries them in turn until one connects, then routes every RPC
//! to that connection.  Attempts are staggered rather than strictly serial: if
//! an attempt has not resolved within the connection attempt delay, the next
//! address is tried in parallel.  Once every address has failed at least once
//! the policy reports TRANSIENT_FAILURE and keeps reconnecting to every
//! address as its backoff expires.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Deserialize;
use tonic::metadata::MetadataMap;
use tracing::debug;
use tracing::warn;

use crate::client::ConnectivityState;
use crate::client::channel_args::ChannelArgs;
use crate::client::channel_args::HAPPY_EYEBALLS_CONNECTION_ATTEMPT_DELAY_MS;
use crate::client::channel_args::PICK_FIRST_OMIT_STATUS_MESSAGE_PREFIX;
use crate::client::load_balancing::ChannelController;
use crate::client::load_balancing::ConfigError;
use crate::client::load_balancing::FailingPicker;
use crate::client::load_balancing::LbConfig;
use crate::client::load_balancing::LbPolicy;
use crate::client::load_balancing::LbPolicyBuilder;
use crate::client::load_balancing::LbPolicyOptions;
use crate::client::load_balancing::LbState;
use crate::client::load_balancing::ParsedJsonLbConfig;
use crate::client::load_balancing::Pick;
use crate::client::load_balancing::PickArgs;
use crate::client::load_balancing::PickResult;
use crate::client::load_balancing::Picker;
use crate::client::load_balancing::QueuingPicker;
use crate::client::load_balancing::Subchannel;
use crate::client::load_balancing::SubchannelState;
use crate::client::load_balancing::UpdateArgs;
use crate::client::load_balancing::WorkScheduler;
use crate::client::name_resolution::EndpointAddresses;
use crate::rt::GrpcRuntime;
use crate::rt::TimerHandle;
use crate::status::Status;

pub static POLICY_NAME: &str = "pick_first";

/// Counts connections to the selected subchannel that were lost.
pub const METRIC_DISCONNECTIONS: &str = "grpc.lb.pick_first.disconnections";
/// Counts connection attempts that ended with the subchannel being selected.
pub const METRIC_CONNECTION_ATTEMPTS_SUCCEEDED: &str =
    "grpc.lb.pick_first.connection_attempts_succeeded";
/// Counts connection attempts that ended in TRANSIENT_FAILURE.
pub const METRIC_CONNECTION_ATTEMPTS_FAILED: &str = "grpc.lb.pick_first.connection_attempts_failed";

const DEFAULT_CONNECTION_ATTEMPT_DELAY_MS: i64 = 250;
const MIN_CONNECTION_ATTEMPT_DELAY_MS: i64 = 100;
const MAX_CONNECTION_ATTEMPT_DELAY_MS: i64 = 2000;

// A function type that takes a mutable slice of endpoints and shuffles them.
pub(crate) type EndpointShuffler = dyn Fn(&mut [EndpointAddresses]) + Send + Sync + 'static;

fn thread_rng_shuffler(endpoints: &mut [EndpointAddresses]) {
    endpoints.shuffle(&mut rand::rng());
}

/// Builds pick_first policies.
#[derive(Clone)]
pub struct Builder {
    shuffler: Arc<EndpointShuffler>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            shuffler: Arc::new(thread_rng_shuffler),
        }
    }
}

impl Builder {
    /// Replaces the random shuffle applied when `shuffleAddressList` is set.
    #[cfg(test)]
    pub(crate) fn with_shuffler(shuffler: Arc<EndpointShuffler>) -> Self {
        Builder { shuffler }
    }
}

impl LbPolicyBuilder for Builder {
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy> {
        Box::new(PickFirstPolicy::new(options, self.shuffler.clone()))
    }

    fn name(&self) -> &'static str {
        POLICY_NAME
    }

    fn parse_config(&self, config: &ParsedJsonLbConfig) -> Result<Option<LbConfig>, ConfigError> {
        let cfg: PickFirstConfig = config.convert_to().map_err(|source| ConfigError::Invalid {
            policy: POLICY_NAME,
            source,
        })?;
        Ok(Some(LbConfig::new(cfg)))
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PickFirstConfig {
    #[serde(default)]
    shuffle_address_list: bool,
}

// The most recent update from the resolver, with endpoints already flattened
// to one address each.
struct LatestUpdate {
    addresses: Result<Vec<EndpointAddresses>, Status>,
    args: ChannelArgs,
    resolution_note: Option<String>,
}

impl LatestUpdate {
    fn has_addresses(&self) -> bool {
        self.addresses.as_ref().is_ok_and(|a| !a.is_empty())
    }
}

pub(crate) struct PickFirstPolicy {
    work_scheduler: Arc<dyn WorkScheduler>,
    shuffler: Arc<EndpointShuffler>,
    connection_attempt_delay: Duration,
    omit_status_message_prefix: bool,
    latest_update: Option<LatestUpdate>,
    // Subchannels we are currently trying to connect to.
    subchannel_list: Option<SubchannelList>,
    // The subchannel RPCs are routed to, once one has connected.
    selected: Option<Arc<dyn Subchannel>>,
    // The last state reported to the channel.
    state: ConnectivityState,
    // Whether the last report was CONNECTING, so that repeats are squelched.
    sent_connecting_state: bool,
}

impl PickFirstPolicy {
    fn new(options: LbPolicyOptions, shuffler: Arc<EndpointShuffler>) -> Self {
        let delay_ms = options
            .args
            .get_int(HAPPY_EYEBALLS_CONNECTION_ATTEMPT_DELAY_MS)
            .unwrap_or(DEFAULT_CONNECTION_ATTEMPT_DELAY_MS)
            .clamp(MIN_CONNECTION_ATTEMPT_DELAY_MS, MAX_CONNECTION_ATTEMPT_DELAY_MS);
        PickFirstPolicy {
            work_scheduler: options.work_scheduler,
            shuffler,
            connection_attempt_delay: Duration::from_millis(delay_ms as u64),
            omit_status_message_prefix: options
                .args
                .get_bool(PICK_FIRST_OMIT_STATUS_MESSAGE_PREFIX)
                .unwrap_or(false),
            latest_update: None,
            subchannel_list: None,
            selected: None,
            state: ConnectivityState::Connecting,
            sent_connecting_state: false,
        }
    }
}

impl LbPolicy for PickFirstPolicy {
    /// A resolver error is returned to the caller but only reported as
    /// TRANSIENT_FAILURE when there is no usable address list yet, or the
    /// policy is already failing.  While a good list is in use the current
    /// picker keeps serving RPCs, so a READY channel stays READY.
    fn resolver_update(
        &mut self,
        update: UpdateArgs,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Status> {
        let UpdateArgs {
            addresses,
            config,
            args,
            resolution_note,
        } = update;

        let shuffle = match config.as_ref().map(|c| c.convert_to::<PickFirstConfig>()) {
            Some(Some(cfg)) => cfg.shuffle_address_list,
            Some(None) => {
                warn!("pick_first received a config of the wrong type; ignoring it");
                false
            }
            None => false,
        };

        let (addresses, result) = match addresses {
            Ok(iterator) => {
                let mut endpoints = Vec::new();
                iterator.for_each(&mut |endpoint| endpoints.push(endpoint.clone()));
                debug!(
                    endpoints = endpoints.len(),
                    "pick_first received update from resolver"
                );
                if endpoints.is_empty() {
                    (
                        Ok(Vec::new()),
                        Err(Status::unavailable("address list must not be empty")),
                    )
                } else {
                    // Shuffling reorders whole endpoints; the addresses within
                    // an endpoint keep their order.
                    if shuffle {
                        (self.shuffler)(&mut endpoints);
                    }
                    (Ok(flatten_endpoints(&endpoints)), Ok(()))
                }
            }
            Err(error) => {
                let status = error.into_status();
                debug!(%status, "pick_first received resolver error");
                (Err(status.clone()), Err(status))
            }
        };

        // A resolver error does not displace a usable address list.
        if let Err(status) = &addresses {
            if self.latest_update.as_ref().is_some_and(LatestUpdate::has_addresses) {
                if self.state == ConnectivityState::TransientFailure {
                    let status = with_resolution_note(status.clone(), resolution_note.as_deref());
                    self.fail(status, channel_controller);
                    channel_controller.request_resolution();
                }
                return result;
            }
        }

        self.latest_update = Some(LatestUpdate {
            addresses,
            args: args.remove(PICK_FIRST_OMIT_STATUS_MESSAGE_PREFIX),
            resolution_note,
        });
        // While IDLE the attempt is deferred until exit_idle.
        if !self.is_idle() {
            self.attempt_to_connect_using_latest_update(channel_controller);
        }
        result
    }

    fn subchannel_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        debug!("pick_first received update for {}: {}", subchannel, state);

        if let Some(index) = self
            .subchannel_list
            .as_ref()
            .and_then(|list| list.index_of(&subchannel))
        {
            if state.connectivity_state == ConnectivityState::Ready {
                self.select(index, channel_controller);
            } else {
                self.update_tracked_subchannel(index, state, channel_controller);
            }
            return;
        }

        // Any state change for the selected subchannel means the connection
        // it had is gone.
        if self
            .selected
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, &subchannel))
        {
            debug!("selected subchannel {} moved to {}", subchannel, state);
            channel_controller
                .metrics()
                .add_counter(METRIC_DISCONNECTIONS, 1);
            self.go_idle(channel_controller);
            return;
        }

        // Updates may still be queued for subchannels that were just dropped.
        debug!("ignoring update for unknown subchannel {}", subchannel);
    }

    fn exit_idle(&mut self, channel_controller: &mut dyn ChannelController) {
        if self.is_idle() {
            debug!("pick_first exiting idle");
            self.attempt_to_connect_using_latest_update(channel_controller);
        }
    }

    fn reset_backoff(&mut self, _channel_controller: &mut dyn ChannelController) {
        if let Some(list) = &self.subchannel_list {
            for data in &list.subchannels {
                data.subchannel.reset_backoff();
            }
        }
    }

    fn work(&mut self, channel_controller: &mut dyn ChannelController) {
        let timer_fired = self
            .subchannel_list
            .as_mut()
            .is_some_and(SubchannelList::take_fired_timer);
        if timer_fired && self.selected.is_none() {
            if let Some(list) = self.subchannel_list.as_mut() {
                debug!(
                    index = list.attempting_index,
                    "connection attempt delay timer fired"
                );
                list.attempting_index += 1;
            }
            self.start_connecting_next_subchannel(channel_controller);
        }

        // Work is also how an IDLE picker asks us to reconnect.
        if self.is_idle() {
            self.exit_idle(channel_controller);
        }
    }
}

impl PickFirstPolicy {
    fn is_idle(&self) -> bool {
        self.state == ConnectivityState::Idle && self.subchannel_list.is_none()
    }

    // Replaces the subchannel list with one built from the latest update.
    fn attempt_to_connect_using_latest_update(
        &mut self,
        channel_controller: &mut dyn ChannelController,
    ) {
        let Some(latest) = self.latest_update.as_ref() else {
            return;
        };
        let list = SubchannelList::new(latest, channel_controller);
        let empty_status = list.is_empty().then(|| match &latest.addresses {
            Ok(_) => Status::unavailable("empty address list"),
            Err(status) => status.clone(),
        });
        // The old list is dropped only now, after the new list holds its own
        // references to any subchannels the two have in common.
        self.subchannel_list = Some(list);

        if let Some(status) = empty_status {
            self.selected = None;
            self.report_transient_failure(status, channel_controller);
            channel_controller.request_resolution();
        }
    }

    // Handles a non-READY update for the subchannel at `index` in the list.
    fn update_tracked_subchannel(
        &mut self,
        index: usize,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        let new_state = state.connectivity_state;
        if new_state == ConnectivityState::Shutdown {
            return;
        }
        let Some(list) = self.subchannel_list.as_mut() else {
            return;
        };
        let old_state = list.subchannels[index].state.replace(new_state);
        if new_state == ConnectivityState::TransientFailure {
            list.last_failure = state.status.clone();
        }
        if old_state.is_none() {
            list.num_initial_notifications_seen += 1;
        }
        if !list.all_subchannels_seen_initial_state() {
            return;
        }

        // The last subchannel to report its initial state decides how to
        // proceed with the list.
        if old_state.is_none() {
            if self.selected.is_some() {
                // No subchannel in the new list is READY, so the connected
                // address is not part of the update.
                debug!("new address list does not contain the selected subchannel");
                self.go_idle(channel_controller);
            } else {
                self.start_connecting_next_subchannel(channel_controller);
            }
            return;
        }

        match new_state {
            ConnectivityState::TransientFailure => {
                channel_controller
                    .metrics()
                    .add_counter(METRIC_CONNECTION_ATTEMPTS_FAILED, 1);
                let prev_seen_transient_failure =
                    std::mem::replace(&mut list.subchannels[index].seen_transient_failure, true);
                if !prev_seen_transient_failure {
                    // Still in the first pass.  A failure before the timer
                    // fires moves on to the next address right away.
                    if index == list.attempting_index {
                        list.cancel_timer();
                        list.attempting_index += 1;
                        self.start_connecting_next_subchannel(channel_controller);
                    } else {
                        self.maybe_finish_happy_eyeballs_pass(channel_controller);
                    }
                } else if list.is_happy_eyeballs_pass_complete() {
                    // Re-report once per list length worth of failures so the
                    // channel sees a recent error.
                    list.num_failures += 1;
                    if list.num_failures % list.len() == 0 {
                        let status =
                            all_addresses_failed(self.omit_status_message_prefix, &state.status);
                        self.report_transient_failure(status, channel_controller);
                        channel_controller.request_resolution();
                    }
                }
            }
            ConnectivityState::Idle => {
                if list.is_happy_eyeballs_pass_complete() {
                    list.subchannels[index].subchannel.connect();
                }
            }
            ConnectivityState::Connecting => self.move_to_connecting(channel_controller),
            ConnectivityState::Ready | ConnectivityState::Shutdown => {}
        }
    }

    // Requests a connection on the first subchannel at or after the attempting
    // index that is not in TRANSIENT_FAILURE.
    fn start_connecting_next_subchannel(&mut self, channel_controller: &mut dyn ChannelController) {
        let Some(list) = self.subchannel_list.as_mut() else {
            return;
        };
        while list.attempting_index < list.len() {
            let index = list.attempting_index;
            let data = &mut list.subchannels[index];
            if data.state != Some(ConnectivityState::TransientFailure) {
                list.request_connection_with_timer(
                    index,
                    self.connection_attempt_delay,
                    &channel_controller.runtime(),
                    &self.work_scheduler,
                );
                return;
            }
            data.seen_transient_failure = true;
            list.attempting_index += 1;
        }
        self.maybe_finish_happy_eyeballs_pass(channel_controller);
    }

    fn maybe_finish_happy_eyeballs_pass(&mut self, channel_controller: &mut dyn ChannelController) {
        let Some(list) = self.subchannel_list.as_ref() else {
            return;
        };
        if !list.is_happy_eyeballs_pass_complete() {
            return;
        }
        debug!(
            subchannels = list.len(),
            "pick_first failed to connect to all addresses"
        );
        let status = all_addresses_failed(self.omit_status_message_prefix, &list.last_failure);
        self.report_transient_failure(status, channel_controller);
        channel_controller.request_resolution();
        self.selected = None;

        // From now on every subchannel reconnects as soon as it is IDLE.
        if let Some(list) = &self.subchannel_list {
            for data in &list.subchannels {
                if data.state == Some(ConnectivityState::Idle) {
                    data.subchannel.connect();
                }
            }
        }
    }

    fn select(&mut self, index: usize, channel_controller: &mut dyn ChannelController) {
        let Some(list) = self.subchannel_list.take() else {
            return;
        };
        let data = &list.subchannels[index];
        debug!("pick_first selected subchannel {}", data.subchannel);
        // Finding a subchannel already READY in a new list is not a
        // connection attempt.
        if data.state == Some(ConnectivityState::Connecting) {
            channel_controller
                .metrics()
                .add_counter(METRIC_CONNECTION_ATTEMPTS_SUCCEEDED, 1);
        }
        let subchannel = data.subchannel.clone();
        self.selected = Some(subchannel.clone());
        self.update_state(
            ConnectivityState::Ready,
            Status::ok(),
            Arc::new(OneSubchannelPicker { subchannel }),
            channel_controller,
        );
    }

    fn go_idle(&mut self, channel_controller: &mut dyn ChannelController) {
        self.selected = None;
        self.subchannel_list = None;
        self.update_state(
            ConnectivityState::Idle,
            Status::ok(),
            Arc::new(IdlePicker {
                work_scheduler: self.work_scheduler.clone(),
            }),
            channel_controller,
        );
        channel_controller.request_resolution();
    }

    fn move_to_connecting(&mut self, channel_controller: &mut dyn ChannelController) {
        // TRANSIENT_FAILURE is sticky until a subchannel becomes READY.
        if self.state == ConnectivityState::TransientFailure
            || (self.state == ConnectivityState::Connecting && self.sent_connecting_state)
        {
            return;
        }
        self.update_state(
            ConnectivityState::Connecting,
            Status::ok(),
            Arc::new(QueuingPicker {}),
            channel_controller,
        );
    }

    // Reports TRANSIENT_FAILURE, decorated with the current list's resolution
    // note.
    fn report_transient_failure(
        &mut self,
        status: Status,
        channel_controller: &mut dyn ChannelController,
    ) {
        let note = self
            .subchannel_list
            .as_ref()
            .and_then(|list| list.resolution_note.as_deref());
        let status = with_resolution_note(status, note);
        self.fail(status, channel_controller);
    }

    fn fail(&mut self, status: Status, channel_controller: &mut dyn ChannelController) {
        self.update_state(
            ConnectivityState::TransientFailure,
            status.clone(),
            Arc::new(FailingPicker { status }),
            channel_controller,
        );
    }

    fn update_state(
        &mut self,
        state: ConnectivityState,
        status: Status,
        picker: Arc<dyn Picker>,
        channel_controller: &mut dyn ChannelController,
    ) {
        self.state = state;
        self.sent_connecting_state = state == ConnectivityState::Connecting;
        channel_controller.update_picker(LbState {
            connectivity_state: state,
            status,
            picker,
        });
    }
}

// Produces one entry per address, each carrying its endpoint's args.
fn flatten_endpoints(endpoints: &[EndpointAddresses]) -> Vec<EndpointAddresses> {
    endpoints
        .iter()
        .flat_map(|endpoint| {
            endpoint.addresses().iter().map(move |address| {
                EndpointAddresses::from_address(address.clone(), endpoint.args().clone())
            })
        })
        .collect()
}

fn all_addresses_failed(omit_prefix: bool, last_failure: &Status) -> Status {
    if omit_prefix {
        Status::unavailable(last_failure.to_string())
    } else {
        Status::unavailable(format!(
            "failed to connect to all addresses; last error: {last_failure}"
        ))
    }
}

fn with_resolution_note(status: Status, note: Option<&str>) -> Status {
    match note {
        Some(note) if !note.is_empty() => status.with_message_suffix(&format!(" ({note})")),
        _ => status,
    }
}

// A picker that always returns the same subchannel.
struct OneSubchannelPicker {
    subchannel: Arc<dyn Subchannel>,
}

impl Picker for OneSubchannelPicker {
    fn pick(&self, _args: &PickArgs<'_>) -> PickResult {
        PickResult::Complete(Pick {
            subchannel: self.subchannel.clone(),
            metadata: MetadataMap::new(),
        })
    }
}

// A picker that always queues picks and schedules work. This triggers the LB
// policy to start connecting from the first address.
struct IdlePicker {
    work_scheduler: Arc<dyn WorkScheduler>,
}

impl Picker for IdlePicker {
    fn pick(&self, _args: &PickArgs<'_>) -> PickResult {
        self.work_scheduler.schedule_work();
        PickResult::Queue
    }
}

// Data tracked for each subchannel in the subchannel list.
struct SubchannelData {
    subchannel: Arc<dyn Subchannel>,
    // None until the subchannel's initial state has been delivered.
    state: Option<ConnectivityState>,
    seen_transient_failure: bool,
}

// A list of subchannels created from the most recent address list from the
// resolver, in connection order.
struct SubchannelList {
    subchannels: Vec<SubchannelData>,
    attempting_index: usize,
    num_initial_notifications_seen: usize,
    // Failures seen after the first pass completed.
    num_failures: usize,
    last_failure: Status,
    resolution_note: Option<String>,
    // The connection attempt delay timer.  It sets `timer_fired` and
    // schedules work; the policy advances from work().
    timer: Option<TimerHandle>,
    timer_fired: Arc<AtomicBool>,
}

impl SubchannelList {
    fn new(update: &LatestUpdate, channel_controller: &mut dyn ChannelController) -> Self {
        let mut subchannels = Vec::new();
        if let Ok(addresses) = &update.addresses {
            for endpoint in addresses {
                let address = endpoint.address();
                match channel_controller.new_subchannel(address, endpoint.args(), &update.args) {
                    Some(subchannel) => subchannels.push(SubchannelData {
                        subchannel,
                        state: None,
                        seen_transient_failure: false,
                    }),
                    None => debug!("could not create subchannel for {}; skipping it", address),
                }
            }
        }
        debug!(
            subchannels = subchannels.len(),
            "pick_first created subchannel list"
        );
        SubchannelList {
            subchannels,
            attempting_index: 0,
            num_initial_notifications_seen: 0,
            num_failures: 0,
            last_failure: Status::ok(),
            resolution_note: update.resolution_note.clone(),
            timer: None,
            timer_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    fn len(&self) -> usize {
        self.subchannels.len()
    }

    fn is_empty(&self) -> bool {
        self.subchannels.is_empty()
    }

    fn index_of(&self, subchannel: &Arc<dyn Subchannel>) -> Option<usize> {
        self.subchannels
            .iter()
            .position(|data| Arc::ptr_eq(&data.subchannel, subchannel))
    }

    fn all_subchannels_seen_initial_state(&self) -> bool {
        self.num_initial_notifications_seen == self.subchannels.len()
    }

    fn is_happy_eyeballs_pass_complete(&self) -> bool {
        self.attempting_index >= self.subchannels.len()
            && self.subchannels.iter().all(|d| d.seen_transient_failure)
    }

    fn request_connection_with_timer(
        &mut self,
        index: usize,
        delay: Duration,
        runtime: &GrpcRuntime,
        work_scheduler: &Arc<dyn WorkScheduler>,
    ) {
        let data = &self.subchannels[index];
        if data.state == Some(ConnectivityState::Idle) {
            data.subchannel.connect();
        }
        if index + 1 < self.subchannels.len() {
            debug!(index, ?delay, "starting connection attempt delay timer");
            self.timer_fired.store(false, Ordering::Release);
            let fired = self.timer_fired.clone();
            let work_scheduler = work_scheduler.clone();
            self.timer = Some(runtime.run_after(delay, move || {
                fired.store(true, Ordering::Release);
                work_scheduler.schedule_work();
            }));
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        // The timer may have fired with its work still queued.
        self.timer_fired.store(false, Ordering::Release);
    }

    // Returns true once per firing of the timer.
    fn take_fired_timer(&mut self) -> bool {
        if self.timer_fired.swap(false, Ordering::AcqRel) {
            self.timer = None;
            true
        } else {
            false
        }
    }
}
