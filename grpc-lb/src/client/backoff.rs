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

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::client::channel_args;
use crate::client::channel_args::ChannelArgs;

#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// The amount of time to backoff after the first failure.
    pub base_delay: Duration,

    /// The factor with which to multiply backoffs after a
    /// failed retry. Should ideally be greater than 1.
    pub multiplier: f64,

    /// The factor with which backoffs are randomized.
    pub jitter: f64,

    /// The upper bound of backoff delay.
    pub max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("base_delay must not exceed max_delay")]
    BaseExceedsMax,
    #[error("multiplier must be at least 1.0")]
    MultiplierTooSmall,
    #[error("jitter must be within [0, 1]")]
    JitterOutOfRange,
}

/// Backoff configuration with the default values specified at
/// https://github.com/grpc/grpc/blob/master/doc/connection-backoff.md.
pub const DEFAULT_EXPONENTIAL_CONFIG: BackoffConfig = BackoffConfig {
    base_delay: Duration::from_secs(1),
    multiplier: 1.6,
    jitter: 0.2,
    max_delay: Duration::from_secs(120),
};

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), BackoffError> {
        if self.base_delay > self.max_delay {
            return Err(BackoffError::BaseExceedsMax);
        }
        if self.multiplier < 1.0 {
            return Err(BackoffError::MultiplierTooSmall);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(BackoffError::JitterOutOfRange);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,

    /// The delay for the next retry, without the random jitter. Store as f64
    /// to avoid rounding errors.
    next_delay_secs: f64,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Result<Self, BackoffError> {
        config.validate()?;
        let next_delay_secs = config.base_delay.as_secs_f64();
        Ok(ExponentialBackoff {
            config,
            next_delay_secs,
        })
    }

    pub fn reset(&mut self) {
        self.next_delay_secs = self.config.base_delay.as_secs_f64();
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// backoff.
    pub fn backoff_duration(&mut self) -> Duration {
        let next_delay = self.next_delay_secs;
        let cur_delay = if self.config.jitter == 0.0 {
            next_delay
        } else {
            next_delay * (1.0 + self.config.jitter * rand::rng().random_range(-1.0..1.0))
        };
        self.next_delay_secs = self
            .config
            .max_delay
            .as_secs_f64()
            .min(next_delay * self.config.multiplier);
        Duration::from_secs_f64(cur_delay)
    }
}

/// The smallest value accepted for any of the reconnect backoff args.
const MIN_BACKOFF_ARG: Duration = Duration::from_millis(100);
const DEFAULT_MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection backoff settings for a subchannel, derived from channel args.
#[derive(Clone, Debug, PartialEq)]
pub struct SubchannelBackoffConfig {
    pub backoff: BackoffConfig,

    /// Every connection attempt is given at least this long to complete,
    /// even when the backoff delay is shorter.
    pub min_connect_timeout: Duration,
}

impl Default for SubchannelBackoffConfig {
    fn default() -> Self {
        SubchannelBackoffConfig {
            backoff: DEFAULT_EXPONENTIAL_CONFIG,
            min_connect_timeout: DEFAULT_MIN_CONNECT_TIMEOUT,
        }
    }
}

impl SubchannelBackoffConfig {
    /// Reads the reconnect backoff args.  Values below 100ms are raised to
    /// 100ms.  A combination that does not validate falls back to the
    /// defaults.
    pub fn from_channel_args(args: &ChannelArgs) -> Self {
        let arg = |key: &str| {
            args.get_duration_from_int_millis(key)
                .map(|d| d.max(MIN_BACKOFF_ARG))
        };
        let default = Self::default();

        if let Some(fixed) = arg(channel_args::FIXED_RECONNECT_BACKOFF_MS) {
            return SubchannelBackoffConfig {
                backoff: BackoffConfig {
                    base_delay: fixed,
                    multiplier: 1.0,
                    jitter: 0.0,
                    max_delay: fixed,
                },
                min_connect_timeout: fixed,
            };
        }

        let config = SubchannelBackoffConfig {
            backoff: BackoffConfig {
                base_delay: arg(channel_args::INITIAL_RECONNECT_BACKOFF_MS)
                    .unwrap_or(default.backoff.base_delay),
                max_delay: arg(channel_args::MAX_RECONNECT_BACKOFF_MS)
                    .unwrap_or(default.backoff.max_delay),
                ..default.backoff.clone()
            },
            min_connect_timeout: arg(channel_args::MIN_RECONNECT_BACKOFF_MS)
                .unwrap_or(default.min_connect_timeout),
        };
        if let Err(err) = config.backoff.validate() {
            warn!("invalid reconnect backoff args ({err}), using defaults");
            return default;
        }
        config
    }

    /// Builds the backoff state machine for this configuration.
    pub fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff.clone()).unwrap_or_else(|err| {
            warn!("invalid backoff config ({err}), using defaults");
            ExponentialBackoff {
                next_delay_secs: DEFAULT_EXPONENTIAL_CONFIG.base_delay.as_secs_f64(),
                config: DEFAULT_EXPONENTIAL_CONFIG,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Epsilon for floating point comparisons.
    const EPSILON: f64 = 1e-9;

    fn config(base: u64, multiplier: f64, jitter: f64, max: u64) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_secs(base),
            multiplier,
            jitter,
            max_delay: Duration::from_secs(max),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ExponentialBackoff::new(DEFAULT_EXPONENTIAL_CONFIG).is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let test_cases = vec![
            (config(100, 123.0, 0.0, 10), BackoffError::BaseExceedsMax),
            (config(10, -123.0, 0.0, 100), BackoffError::MultiplierTooSmall),
            (config(10, 0.5, 0.0, 100), BackoffError::MultiplierTooSmall),
            (config(10, 1.0, -10.0, 100), BackoffError::JitterOutOfRange),
            (config(10, 1.0, 2.0, 100), BackoffError::JitterOutOfRange),
        ];
        for (cfg, want) in test_cases {
            assert_eq!(ExponentialBackoff::new(cfg.clone()).unwrap_err(), want, "{cfg:?}");
        }
    }

    #[test]
    fn backoff_grows_until_capped_and_resets() {
        let mut backoff = ExponentialBackoff::new(config(1, 2.0, 0.0, 15)).unwrap();
        for _ in 0..2 {
            let delays: Vec<u64> = (0..6).map(|_| backoff.backoff_duration().as_secs()).collect();
            assert_eq!(delays, vec![1, 2, 4, 8, 15, 15]);
            backoff.reset();
        }
    }

    #[test]
    fn backoff_with_jitter() {
        let mut backoff = ExponentialBackoff::new(config(1, 2.0, 0.2, 15)).unwrap();
        for (low, high) in [(0.8, 1.2), (1.6, 2.4), (3.2, 4.8)] {
            let d = backoff.backoff_duration();
            assert!(d > Duration::from_secs_f64(low - EPSILON), "{d:?}");
            assert!(d < Duration::from_secs_f64(high + EPSILON), "{d:?}");
        }
    }

    #[test]
    fn subchannel_config_defaults() {
        let config = SubchannelBackoffConfig::from_channel_args(&ChannelArgs::new());
        assert_eq!(config, SubchannelBackoffConfig::default());
        assert_eq!(config.min_connect_timeout, Duration::from_secs(20));
    }

    #[test]
    fn subchannel_config_from_args() {
        let args = ChannelArgs::new()
            .set(channel_args::INITIAL_RECONNECT_BACKOFF_MS, 10)
            .set(channel_args::MIN_RECONNECT_BACKOFF_MS, 5000)
            .set(channel_args::MAX_RECONNECT_BACKOFF_MS, 30_000);
        let config = SubchannelBackoffConfig::from_channel_args(&args);
        // Raised to the 100ms floor.
        assert_eq!(config.backoff.base_delay, Duration::from_millis(100));
        assert_eq!(config.backoff.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff.multiplier, 1.6);
        assert_eq!(config.min_connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn subchannel_config_fixed_backoff() {
        let args = ChannelArgs::new()
            .set(channel_args::FIXED_RECONNECT_BACKOFF_MS, 500)
            .set(channel_args::INITIAL_RECONNECT_BACKOFF_MS, 10_000);
        let config = SubchannelBackoffConfig::from_channel_args(&args);
        let mut backoff = config.new_backoff();
        for _ in 0..3 {
            assert_eq!(backoff.backoff_duration(), Duration::from_millis(500));
        }
        assert_eq!(config.min_connect_timeout, Duration::from_millis(500));
    }

    #[test]
    fn subchannel_config_invalid_falls_back() {
        let args = ChannelArgs::new()
            .set(channel_args::INITIAL_RECONNECT_BACKOFF_MS, 60_000)
            .set(channel_args::MAX_RECONNECT_BACKOFF_MS, 1_000);
        assert_eq!(
            SubchannelBackoffConfig::from_channel_args(&args),
            SubchannelBackoffConfig::default()
        );
    }
}
