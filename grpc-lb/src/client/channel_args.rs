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

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Initial delay before retrying a failed connection attempt.
pub const INITIAL_RECONNECT_BACKOFF_MS: &str = "grpc.initial_reconnect_backoff_ms";
/// Minimum time a connection attempt is given before it is abandoned.
pub const MIN_RECONNECT_BACKOFF_MS: &str = "grpc.min_reconnect_backoff_ms";
/// Upper bound on the delay between connection attempts.
pub const MAX_RECONNECT_BACKOFF_MS: &str = "grpc.max_reconnect_backoff_ms";
/// Replaces exponential backoff with a fixed delay.  Intended for tests.
pub const FIXED_RECONNECT_BACKOFF_MS: &str = "grpc.testing.fixed_reconnect_backoff_ms";
/// Delay before pick_first starts a parallel attempt on the next address.
pub const HAPPY_EYEBALLS_CONNECTION_ATTEMPT_DELAY_MS: &str =
    "grpc.happy_eyeballs_connection_attempt_delay_ms";
/// When set, pick_first reports connection errors without its usual prefix.
pub const PICK_FIRST_OMIT_STATUS_MESSAGE_PREFIX: &str =
    "grpc.internal.pick_first_omit_status_message_prefix";
/// Args under this prefix never take part in subchannel identity.
pub const NO_SUBCHANNEL_PREFIX: &str = "grpc.internal.no_subchannel.";

/// An opaque value stored in [`ChannelArgs`].  Pointers compare by identity.
#[derive(Clone)]
pub struct ArgPointer(Arc<dyn Any + Send + Sync>);

impl ArgPointer {
    pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        ArgPointer(value)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ArgPointer {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ArgPointer {}

impl PartialOrd for ArgPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArgPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl Debug for ArgPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// A typed channel arg value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArgValue {
    Int(i64),
    String(String),
    Pointer(ArgPointer),
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v.into())
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Int(v.into())
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}

impl From<ArgPointer> for ArgValue {
    fn from(v: ArgPointer) -> Self {
        ArgValue::Pointer(v)
    }
}

impl Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::String(v) => write!(f, "{v:?}"),
            ArgValue::Pointer(p) => write!(f, "{p:?}"),
        }
    }
}

/// An immutable, ordered collection of channel configuration.
///
/// Every mutator returns a new `ChannelArgs` and leaves the receiver
/// untouched, so values can be shared freely between the channel, LB
/// policies and subchannels.  Equality and ordering are structural: keys are
/// compared in sorted order, then values.  This gives a canonical form that
/// is stable for the lifetime of the process, which is what subchannel keys
/// rely on.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelArgs {
    args: Arc<BTreeMap<String, ArgValue>>,
}

impl ChannelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new `ChannelArgs` with `key` set to `value`, replacing any
    /// previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        let mut args = (*self.args).clone();
        args.insert(key.into(), value.into());
        ChannelArgs {
            args: Arc::new(args),
        }
    }

    /// Returns a new `ChannelArgs` without `key`.
    pub fn remove(&self, key: &str) -> Self {
        if !self.args.contains_key(key) {
            return self.clone();
        }
        let mut args = (*self.args).clone();
        args.remove(key);
        ChannelArgs {
            args: Arc::new(args),
        }
    }

    /// Returns a new `ChannelArgs` without any key starting with `prefix`.
    pub fn remove_all_keys_with_prefix(&self, prefix: &str) -> Self {
        if !self.args.keys().any(|k| k.starts_with(prefix)) {
            return self.clone();
        }
        let args = self
            .args
            .iter()
            .filter(|(k, _)| !k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ChannelArgs {
            args: Arc::new(args),
        }
    }

    /// Merges `other` into these args.  Values already present in `self`
    /// take precedence over values from `other`.
    pub fn union_with(&self, other: &ChannelArgs) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut args = (*other.args).clone();
        for (k, v) in self.args.iter() {
            args.insert(k.clone(), v.clone());
        }
        ChannelArgs {
            args: Arc::new(args),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.args.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.args.contains_key(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.args.get(key)? {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.args.get(key)? {
            ArgValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Integers are interpreted as booleans: zero is false, anything else is
    /// true.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_int(key).map(|v| v != 0)
    }

    /// Reads an integer arg holding milliseconds.  Negative values clamp to
    /// zero.
    pub fn get_duration_from_int_millis(&self, key: &str) -> Option<Duration> {
        self.get_int(key)
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
    }

    pub fn get_pointer<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.args.get(key)? {
            ArgValue::Pointer(p) => p.0.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Display for ChannelArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

impl Debug for ChannelArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
