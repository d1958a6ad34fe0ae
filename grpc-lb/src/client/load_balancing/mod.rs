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

//! The interface between a channel and its load balancing policy.
//!
//! A channel owns exactly one [`LbPolicy`].  It feeds the policy resolver
//! results and subchannel state changes, and the policy answers through the
//! [`ChannelController`] by creating subchannels and publishing [`LbState`]
//! snapshots whose [`Picker`] routes each RPC.
//!
//! Every method on an [`LbPolicy`] is invoked from the channel's work
//! serializer, so a policy never sees two calls at once.

use std::any::Any;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tonic::metadata::MetadataMap;

use crate::client::ConnectivityState;
use crate::client::channel_args::ChannelArgs;
use crate::client::name_resolution::EndpointAddressesIterator;
use crate::client::name_resolution::EndpointAddressesList;
use crate::client::name_resolution::EndpointListError;
use crate::client::name_resolution::ResolvedAddress;
use crate::rt::GrpcRuntime;
use crate::status::Status;

pub use crate::client::subchannel::DataWatcher;
pub use crate::client::subchannel::DataWatcherKind;

pub mod pick_first;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_utils;

/// A collection of data configured on the channel that is constructing this
/// LbPolicy.
pub struct LbPolicyOptions {
    /// A hook into the channel's work scheduler that allows the LbPolicy to
    /// request the ability to perform operations on the ChannelController.
    pub work_scheduler: Arc<dyn WorkScheduler>,

    /// The channel's args at the time the policy was built.  Policies read
    /// their tuning knobs from here.
    pub args: ChannelArgs,
}

/// Used to asynchronously request a call into the LbPolicy's work method if
/// the LbPolicy needs to provide an update without waiting for an update
/// from the channel first.
pub trait WorkScheduler: Send + Sync {
    // Schedules a call into the LbPolicy's work method.  If there is already a
    // pending work call that has not yet started, this may not schedule another
    // call.
    fn schedule_work(&self);
}

/// An LB policy factory that produces LbPolicy instances used by the channel
/// to manage connections and pick connections for RPCs.
pub trait LbPolicyBuilder: Send + Sync {
    /// Builds and returns a new LB policy instance.
    ///
    /// Note that build must not fail.  Any optional configuration is delivered
    /// via the LbPolicy's resolver_update method.
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy>;

    /// Reports the name of the LB Policy.
    fn name(&self) -> &'static str;

    /// Parses the JSON LB policy configuration into an internal representation.
    ///
    /// LB policies do not need to accept a configuration, in which case the
    /// default implementation returns Ok(None).
    fn parse_config(&self, _config: &ParsedJsonLbConfig) -> Result<Option<LbConfig>, ConfigError> {
        Ok(None)
    }
}

/// An LB policy instance.
///
/// LB policies are responsible for creating connections (modeled as
/// Subchannels) and producing Picker instances for picking connections for
/// RPCs.
pub trait LbPolicy: Send {
    /// Called by the channel when the name resolver produces a new set of
    /// resolved addresses, a resolution error, or a new config.
    ///
    /// The returned status tells the resolver whether the update was usable.
    /// It does not affect what the policy reports to the channel.
    fn resolver_update(
        &mut self,
        update: UpdateArgs,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Status>;

    /// Called by the channel when any subchannel created by the LB policy
    /// changes state.  The first call for every subchannel carries its state
    /// at the time it was created.
    fn subchannel_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    );

    /// Called by the channel when the policy is IDLE and an RPC or the
    /// application wants connections to be established.
    fn exit_idle(&mut self, channel_controller: &mut dyn ChannelController);

    /// Asks every subchannel owned by the policy to skip any pending backoff.
    fn reset_backoff(&mut self, channel_controller: &mut dyn ChannelController);

    /// Called by the channel in response to a call from the LB policy to the
    /// WorkScheduler's schedule_work method.
    fn work(&mut self, channel_controller: &mut dyn ChannelController);
}

/// Controls channel behaviors.
pub trait ChannelController: Send {
    /// Creates a new subchannel for `address`.  The subchannel starts in
    /// whatever state the underlying connection is in, which the policy learns
    /// from the first subchannel_update for it.
    ///
    /// Returns None if the address cannot be used at all, in which case the
    /// policy should skip it.
    fn new_subchannel(
        &mut self,
        address: &ResolvedAddress,
        per_address_args: &ChannelArgs,
        args: &ChannelArgs,
    ) -> Option<Arc<dyn Subchannel>>;

    /// Provides a new snapshot of the LB policy's state to the channel.
    fn update_picker(&mut self, update: LbState);

    /// Signals the name resolver to attempt to re-resolve addresses.  Typically
    /// used when connections fail, indicating a possible change in the overall
    /// network configuration.
    fn request_resolution(&mut self);

    /// The runtime policies use for their own timers.
    fn runtime(&self) -> GrpcRuntime;

    /// Where policies record their metrics.
    fn metrics(&self) -> &dyn MetricsRecorder;
}

/// The input to [`LbPolicy::resolver_update`].
pub struct UpdateArgs {
    /// The resolved endpoints, or the reason resolution failed.
    pub addresses: Result<Arc<dyn EndpointAddressesIterator>, EndpointListError>,

    /// The policy's parsed config, if the service config supplied one.
    pub config: Option<LbConfig>,

    /// Args that apply to every subchannel created from this update.
    pub args: ChannelArgs,

    /// Extra context from the resolver, appended to failure messages.
    pub resolution_note: Option<String>,
}

impl Default for UpdateArgs {
    fn default() -> Self {
        UpdateArgs {
            addresses: Ok(Arc::new(EndpointAddressesList::default())),
            config: None,
            args: ChannelArgs::default(),
            resolution_note: None,
        }
    }
}

impl Debug for UpdateArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("UpdateArgs");
        match &self.addresses {
            Ok(addresses) => {
                let mut endpoints = Vec::new();
                addresses.for_each(&mut |e| endpoints.push(e.to_string()));
                s.field("addresses", &endpoints)
            }
            Err(e) => s.field("addresses", e),
        };
        s.field("config", &self.config.is_some())
            .field("args", &self.args)
            .field("resolution_note", &self.resolution_note)
            .finish()
    }
}

/// Represents the current state of a Subchannel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubchannelState {
    /// The connectivity state of the subchannel.  See [`Subchannel`] for a
    /// description of the various states and their valid transitions.
    pub connectivity_state: ConnectivityState,

    /// Describes the most recent connection error when connectivity_state is
    /// TransientFailure, or why the connection was lost when it is Idle.  OK
    /// otherwise.
    pub status: Status,
}

impl Display for SubchannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.status.is_ok() {
            write!(f, "{}", self.connectivity_state)
        } else {
            write!(f, "{} ({})", self.connectivity_state, self.status)
        }
    }
}

/// Errors produced while turning JSON into an LB policy config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("errors validating {policy} LB policy config: {source}")]
    Invalid {
        policy: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no LB policy registered with name {0:?}")]
    UnknownPolicy(String),
}

/// A policy's config as it appears in the service config, before the policy
/// has validated it.
#[derive(Debug, Clone)]
pub struct ParsedJsonLbConfig {
    value: serde_json::Value,
}

impl ParsedJsonLbConfig {
    pub fn new(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json)
            .map(Self::from_value)
            .map_err(ConfigError::InvalidJson)
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        ParsedJsonLbConfig { value }
    }

    /// Deserializes the JSON into the policy's config type.
    pub fn convert_to<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}

/// A convenience wrapper for an LB policy's configuration object.
#[derive(Clone)]
pub struct LbConfig {
    config: Arc<dyn Any + Send + Sync>,
}

impl LbConfig {
    /// Create a new LbConfig wrapper containing the provided config.
    pub fn new(config: impl Any + Send + Sync) -> Self {
        LbConfig {
            config: Arc::new(config),
        }
    }

    /// Convenience method to extract the LB policy's configuration object.
    pub fn convert_to<T: 'static + Send + Sync>(&self) -> Option<Arc<T>> {
        self.config.clone().downcast::<T>().ok()
    }
}

impl Debug for LbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LbConfig")
    }
}

/// A sink for the counters LB policies record.
pub trait MetricsRecorder: Send + Sync {
    fn add_counter(&self, name: &'static str, value: u64);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn add_counter(&self, _name: &'static str, _value: u64) {}
}

/// A Picker is responsible for deciding what Subchannel to use for any given
/// request.  A Picker is only used once for any RPC.  If pick() returns Queue,
/// the channel will queue the RPC until a new Picker is produced by the
/// LbPolicy, and will call pick() on the new Picker for the request.
///
/// Pickers are always paired with a ConnectivityState which the channel will
/// expose to applications so they can predict what might happens when
/// performing RPCs:
///
/// If the ConnectivityState is Idle, the Picker should ensure connections are
/// initiated by the LbPolicy that produced the Picker, and return a Queue
/// result so the request is attempted the next time a Picker is produced.
///
/// If the ConnectivityState is Connecting, the Picker should return a Queue
/// result and continue to wait for pending connections.
///
/// If the ConnectivityState is Ready, the Picker should return a Ready
/// Subchannel.
///
/// If the ConnectivityState is TransientFailure, the Picker should return a
/// Fail result with a status that describes why connections are failing.
pub trait Picker: Send + Sync {
    /// Picks a connection to use for the request.
    ///
    /// This function should not block.  If the Picker needs to do blocking or
    /// time-consuming work to service this request, it should return Queue, and
    /// the Pick call will be repeated by the channel when a new Picker is
    /// produced by the LbPolicy.
    fn pick(&self, args: &PickArgs<'_>) -> PickResult;
}

/// What a picker gets to look at for one RPC.
#[derive(Debug, Clone, Copy)]
pub struct PickArgs<'a> {
    /// The full method path, e.g. `/package.Service/Method`.
    pub path: &'a str,
    pub metadata: &'a MetadataMap,
}

pub enum PickResult {
    /// Indicates the Subchannel in the Pick should be used for the request.
    Complete(Pick),
    /// Indicates the LbPolicy is attempting to connect to a server to use for
    /// the request.
    Queue,
    /// Indicates that the request should fail with the included error status
    /// (with the code converted to UNAVAILABLE).  If the RPC is wait-for-ready,
    /// then it will not be terminated, but instead attempted on a new picker if
    /// one is produced before it is cancelled.
    Fail(Status),
    /// Indicates that the request should fail with the included status
    /// immediately, even if the RPC is wait-for-ready.  The channel will
    /// convert the status code to INTERNAL if it is not a valid code for the
    /// gRPC library to produce, per [gRFC A54].
    ///
    /// [gRFC A54]:
    ///     https://github.com/grpc/proposal/blob/master/A54-restrict-control-plane-status-codes.md
    Drop(Status),
}

impl Debug for PickResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(pick) => write!(f, "Complete({})", pick.subchannel),
            Self::Queue => write!(f, "Queue"),
            Self::Fail(status) => write!(f, "Fail({status})"),
            Self::Drop(status) => write!(f, "Drop({status})"),
        }
    }
}

/// Data provided by the LB policy.
#[derive(Clone)]
pub struct LbState {
    pub connectivity_state: ConnectivityState,
    /// Why the policy is failing.  OK unless connectivity_state is
    /// TransientFailure.
    pub status: Status,
    pub picker: Arc<dyn Picker>,
}

impl LbState {
    /// Returns a generic initial LbState which is Connecting and a picker which
    /// queues all picks.
    pub fn initial() -> Self {
        Self {
            connectivity_state: ConnectivityState::Connecting,
            status: Status::ok(),
            picker: Arc::new(QueuingPicker {}),
        }
    }
}

impl Debug for LbState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LbState")
            .field("connectivity_state", &self.connectivity_state)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// A collection of data used by the channel for routing a request.
pub struct Pick {
    /// The Subchannel for the request.
    pub subchannel: Arc<dyn Subchannel>,
    // Metadata to be added to existing outgoing metadata.
    pub metadata: MetadataMap,
}

/// A Subchannel represents a method of communicating with a server which may be
/// connected or disconnected many times across its lifetime.
///
/// - Subchannels start IDLE.
///
/// - IDLE transitions to CONNECTING when connect() is called.
///
/// - CONNECTING transitions to READY on success or TRANSIENT_FAILURE on error.
///
/// - READY transitions to IDLE when the connection is lost.
///
/// - TRANSIENT_FAILURE transitions to IDLE when the reconnect backoff timer
///   has expired.  This timer scales exponentially and is reset when the
///   subchannel becomes READY.
///
/// When a Subchannel is dropped, no subsequent state updates will be provided
/// for it to the LB policy.  Two handles for the same address may share one
/// underlying connection; they still compare unequal.
pub trait Subchannel: Display + Send + Sync {
    /// The address this subchannel connects to.
    fn address(&self) -> ResolvedAddress;

    /// Starts connecting if the subchannel is IDLE.  Does nothing otherwise.
    fn connect(&self);

    /// Skips any pending reconnect backoff.
    fn reset_backoff(&self);

    /// Attaches a watcher that observes the subchannel alongside its raw
    /// connectivity state, such as a health checker.
    fn add_data_watcher(&self, watcher: Arc<dyn DataWatcher>);

    fn cancel_data_watcher(&self, watcher: &Arc<dyn DataWatcher>);
}

impl PartialEq for dyn Subchannel {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(self, other)
    }
}

impl Eq for dyn Subchannel {}

impl Hash for dyn Subchannel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self as *const dyn Subchannel).cast::<()>().hash(state);
    }
}

impl Debug for dyn Subchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subchannel({self})")
    }
}

/// QueuingPicker always returns Queue.  LB policies that are not actively
/// Connecting should not use this picker.
pub struct QueuingPicker {}

impl Picker for QueuingPicker {
    fn pick(&self, _args: &PickArgs<'_>) -> PickResult {
        PickResult::Queue
    }
}

/// Fails every pick with the same status.  Used while TransientFailure.
pub struct FailingPicker {
    pub status: Status,
}

impl Picker for FailingPicker {
    fn pick(&self, _args: &PickArgs<'_>) -> PickResult {
        PickResult::Fail(self.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::status::StatusCode;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct TestConfig {
        child_count: u32,
    }

    #[test]
    fn parsed_json_config_converts() {
        let config = ParsedJsonLbConfig::new(r#"{"childCount": 3}"#).unwrap();
        assert_eq!(
            config.convert_to::<TestConfig>().unwrap(),
            TestConfig { child_count: 3 }
        );
        assert!(config.convert_to::<Vec<u32>>().is_err());
    }

    #[test]
    fn parsed_json_config_rejects_bad_json() {
        assert!(matches!(
            ParsedJsonLbConfig::new("{"),
            Err(ConfigError::InvalidJson(_))
        ));
    }

    #[test]
    fn lb_config_downcasts() {
        let config = LbConfig::new(TestConfig { child_count: 1 });
        assert_eq!(config.convert_to::<TestConfig>().unwrap().child_count, 1);
        assert!(config.convert_to::<String>().is_none());
    }

    #[test]
    fn fixed_pickers() {
        let metadata = MetadataMap::new();
        let args = PickArgs {
            path: "/test.Service/Method",
            metadata: &metadata,
        };
        assert!(matches!(QueuingPicker {}.pick(&args), PickResult::Queue));
        let failing = FailingPicker {
            status: Status::unavailable("down"),
        };
        match failing.pick(&args) {
            PickResult::Fail(status) => assert_eq!(status.code(), StatusCode::Unavailable),
            other => panic!("unexpected pick result {other:?}"),
        }
    }

    #[test]
    fn subchannel_state_display() {
        let state = SubchannelState {
            connectivity_state: ConnectivityState::TransientFailure,
            status: Status::unavailable("refused"),
        };
        assert_eq!(state.to_string(), "TransientFailure (UNAVAILABLE: refused)");
        assert_eq!(SubchannelState::default().to_string(), "Idle");
    }
}
