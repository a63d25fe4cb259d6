//! Per-service configuration model.
//!
//! A session config is an ordered list of [`ServiceConfig`] entries, one per
//! service name. All operations are pure: they return a new [`RtviConfig`]
//! and never modify the receiver. Entries untouched by an update are shared
//! with the source config (`Arc` clones), so a merge only allocates for the
//! services it actually changes.
//!
//! ```rust
//! use rtvi_client::core::service_config::{ConfigOption, RtviConfig};
//! use serde_json::json;
//!
//! let config = RtviConfig::default()
//!     .with_option("llm", [ConfigOption::new("model", json!("llama-3.1-8b"))]);
//! assert_eq!(config.get_value("llm", "model"), Some(&json!("llama-3.1-8b")));
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single named option for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    pub name: String,
    pub value: Value,
}

impl ConfigOption {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Options for one service on the remote agent (e.g. `"tts"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service: String,
    #[serde(default)]
    pub options: Vec<ConfigOption>,
}

impl ServiceConfig {
    pub fn new(service: impl Into<String>, options: Vec<ConfigOption>) -> Self {
        Self {
            service: service.into(),
            options,
        }
    }

    /// Look up an option by name.
    pub fn option(&self, name: &str) -> Option<&ConfigOption> {
        self.options.iter().find(|o| o.name == name)
    }
}

/// Ordered session configuration with unique service names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ServiceConfig>", into = "Vec<ServiceConfig>")]
pub struct RtviConfig {
    entries: Vec<Arc<ServiceConfig>>,
}

impl RtviConfig {
    /// Build a config from service entries.
    ///
    /// Duplicate service names are collapsed: the last entry wins and takes
    /// the position of the first occurrence.
    pub fn new(entries: Vec<ServiceConfig>) -> Self {
        let mut collapsed: Vec<Arc<ServiceConfig>> = Vec::with_capacity(entries.len());
        for entry in entries {
            match collapsed.iter_mut().find(|e| e.service == entry.service) {
                Some(existing) => *existing = Arc::new(entry),
                None => collapsed.push(Arc::new(entry)),
            }
        }
        Self { entries: collapsed }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over service entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.entries.iter().map(|e| e.as_ref())
    }

    /// Shared handle to a service entry. Two configs that share an entry
    /// return pointer-equal handles.
    pub fn entry(&self, service: &str) -> Option<&Arc<ServiceConfig>> {
        self.entries.iter().find(|e| e.service == service)
    }

    /// Options for the given service key.
    pub fn get(&self, service: &str) -> Option<&ServiceConfig> {
        self.entry(service).map(|e| e.as_ref())
    }

    /// Value of a single option for the given service key.
    pub fn get_value(&self, service: &str, option: &str) -> Option<&Value> {
        self.get(service)
            .and_then(|s| s.option(option))
            .map(|o| &o.value)
    }

    /// Return a new config with `options` set on `service`.
    ///
    /// Each option replaces an existing option of the same name or is
    /// appended; the service entry is appended if absent. Every other entry
    /// is shared unchanged.
    pub fn with_option(
        &self,
        service: &str,
        options: impl IntoIterator<Item = ConfigOption>,
    ) -> RtviConfig {
        let options: Vec<ConfigOption> = options.into_iter().collect();
        let mut entries = self.entries.clone();

        let index = entries.iter().position(|e| e.service == service);
        let mut updated = match index {
            Some(index) => entries[index].as_ref().clone(),
            None => ServiceConfig::new(service, Vec::with_capacity(options.len())),
        };
        for option in options {
            match updated.options.iter_mut().find(|o| o.name == option.name) {
                Some(existing) => existing.value = option.value,
                None => updated.options.push(option),
            }
        }

        match index {
            Some(index) => entries[index] = Arc::new(updated),
            None => entries.push(Arc::new(updated)),
        }

        RtviConfig { entries }
    }

    /// Apply [`with_option`](Self::with_option) for every option of every
    /// given service config, left to right. Later entries win on conflicting
    /// `(service, option)` pairs.
    pub fn with_options(&self, service_configs: &[ServiceConfig]) -> RtviConfig {
        service_configs.iter().fold(self.clone(), |config, sc| {
            config.with_option(&sc.service, sc.options.iter().cloned())
        })
    }

    /// Owned copy of the entries.
    pub fn to_vec(&self) -> Vec<ServiceConfig> {
        self.iter().cloned().collect()
    }
}

impl From<Vec<ServiceConfig>> for RtviConfig {
    fn from(entries: Vec<ServiceConfig>) -> Self {
        RtviConfig::new(entries)
    }
}

impl From<RtviConfig> for Vec<ServiceConfig> {
    fn from(config: RtviConfig) -> Self {
        config.to_vec()
    }
}

impl FromIterator<ServiceConfig> for RtviConfig {
    fn from_iter<I: IntoIterator<Item = ServiceConfig>>(iter: I) -> Self {
        RtviConfig::new(iter.into_iter().collect())
    }
}
