//! `externalFlags` — state driven by boolean flags served over the network.
//!
//! The hub polls every watched URL and pushes the results in through
//! [`update`](ExternalFlagsFilter::update). Each flag carries a version that
//! bumps whenever its value changes; every consumer (one filter on one
//! device) remembers the last version it acted on, so a change is applied
//! exactly once per consumer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use lumenhub_domain::command::CommandObject;
use lumenhub_domain::filter::FilterDefinition;
use lumenhub_domain::id::{Channel, FilterId};

use super::{FilterContext, FilterPlugins, LightFilter};

#[derive(Debug, Clone, Copy)]
struct FlagEntry {
    value: bool,
    version: u64,
}

#[derive(Debug, Default)]
struct FlagState {
    watched: BTreeSet<String>,
    /// Keyed by `(url, flag)`.
    flags: HashMap<(String, String), FlagEntry>,
    /// Keyed by `(channel, filter id)`; holds the last consumed version.
    consumed: HashMap<(Channel, FilterId), u64>,
}

#[derive(Debug, Default)]
pub struct ExternalFlagsFilter {
    state: Mutex<FlagState>,
}

impl ExternalFlagsFilter {
    fn lock(&self) -> std::sync::MutexGuard<'_, FlagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `url` to the set of polled endpoints.
    pub fn watch(&self, url: impl Into<String>) {
        self.lock().watched.insert(url.into());
    }

    /// Endpoints the flag poller should fetch.
    #[must_use]
    pub fn watched_urls(&self) -> Vec<String> {
        self.lock().watched.iter().cloned().collect()
    }

    /// Record freshly fetched flag values for `url`. Returns how many flags
    /// changed (first sightings included).
    pub fn update(&self, url: &str, values: BTreeMap<String, bool>) -> usize {
        let mut state = self.lock();
        let mut changed = 0;
        for (flag, value) in values {
            let entry = state
                .flags
                .entry((url.to_string(), flag))
                .or_insert(FlagEntry {
                    value: !value,
                    version: 0,
                });
            if entry.value != value || entry.version == 0 {
                entry.value = value;
                entry.version += 1;
                changed += 1;
            }
        }
        changed
    }

    /// Last known value of `flag` at `url`, if it was ever fetched.
    #[must_use]
    pub fn check_flag_state_on_url(&self, url: &str, flag: &str) -> Option<bool> {
        self.lock()
            .flags
            .get(&(url.to_string(), flag.to_string()))
            .map(|entry| entry.value)
    }

    /// The flag value if it changed since `consumer` last looked, marking
    /// the change consumed.
    fn take_change(&self, consumer: (Channel, FilterId), url: &str, flag: &str) -> Option<bool> {
        let mut state = self.lock();
        let entry = *state.flags.get(&(url.to_string(), flag.to_string()))?;
        let seen = state.consumed.entry(consumer).or_insert(0);
        if *seen >= entry.version {
            return None;
        }
        *seen = entry.version;
        Some(entry.value)
    }
}

impl LightFilter for ExternalFlagsFilter {
    fn execute(
        &self,
        filter: &FilterDefinition,
        mut cmd: CommandObject,
        ctx: &FilterContext<'_>,
        _plugins: &FilterPlugins,
    ) -> CommandObject {
        let (Some(url), Some(flag)) = (
            filter.settings.url.as_deref(),
            filter.settings.flag.as_deref(),
        ) else {
            tracing::warn!(filter_id = %filter.id, "externalFlags filter without url or flag");
            return cmd;
        };
        let Some(value) = self.take_change((ctx.channel, filter.id.clone()), url, flag) else {
            return cmd;
        };
        tracing::debug!(channel = %ctx.channel, filter_id = %filter.id, flag, value, "applying flag change");
        for (param, state) in &filter.state_data {
            let target = if value { Some(state.value) } else { state.alt_value };
            if let Some(target) = target {
                cmd.set(*param, target);
            }
        }
        cmd
    }
}
