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
use std::sync::Arc;

use parking_lot::Mutex;

use super::ConfigError;
use super::LbConfig;
use super::LbPolicyBuilder;
use super::ParsedJsonLbConfig;
use super::pick_first;

/// A registry to store and retrieve LB policies.  LB policies are indexed by
/// their names.
///
/// There is no process-wide registry.  The application assembles one (usually
/// via [`default_registry`]) and hands it to each channel it creates.  Clones
/// share the same set of builders.
#[derive(Clone, Default)]
pub struct LbPolicyRegistry {
    m: Arc<Mutex<HashMap<String, Arc<dyn LbPolicyBuilder>>>>,
}

impl LbPolicyRegistry {
    /// Construct an empty LB policy registry.
    pub fn new() -> Self {
        Self { m: Arc::default() }
    }

    /// Add a LB policy into the registry, replacing any policy with the same
    /// name.
    pub fn add_builder(&self, builder: impl LbPolicyBuilder + 'static) {
        self.m
            .lock()
            .insert(builder.name().to_string(), Arc::new(builder));
    }

    /// Retrieve a LB policy from the registry, or None if not found.
    pub fn get_policy(&self, name: &str) -> Option<Arc<dyn LbPolicyBuilder>> {
        self.m.lock().get(name).cloned()
    }

    /// Validates `config` with the builder registered under `name`.
    pub fn parse_config(
        &self,
        name: &str,
        config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, ConfigError> {
        let builder = self
            .get_policy(name)
            .ok_or_else(|| ConfigError::UnknownPolicy(name.to_string()))?;
        builder.parse_config(config)
    }

    /// Removes every builder.
    pub fn reset(&self) {
        self.m.lock().clear();
    }
}

/// Returns a registry holding the policies this crate provides.
pub fn default_registry() -> LbPolicyRegistry {
    let registry = LbPolicyRegistry::new();
    registry.add_builder(pick_first::Builder::default());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_pick_first() {
        let registry = default_registry();
        let builder = registry.get_policy(pick_first::POLICY_NAME).unwrap();
        assert_eq!(builder.name(), "pick_first");
        assert!(registry.get_policy("round_robin").is_none());
    }

    #[test]
    fn parse_config_by_name() {
        let registry = default_registry();
        let json = ParsedJsonLbConfig::new(r#"{"shuffleAddressList": true}"#).unwrap();
        let config = registry.parse_config("pick_first", &json).unwrap();
        assert!(config.is_some());
        assert!(matches!(
            registry.parse_config("grpclb", &json),
            Err(ConfigError::UnknownPolicy(name)) if name == "grpclb"
        ));
    }

    #[test]
    fn clones_share_builders() {
        let registry = LbPolicyRegistry::new();
        let clone = registry.clone();
        clone.add_builder(pick_first::Builder::default());
        assert!(registry.get_policy("pick_first").is_some());
        registry.reset();
        assert!(clone.get_policy("pick_first").is_none());
    }
}
