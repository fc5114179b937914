//! Device controller — live state and command handling for one device.
//!
//! ```text
//! Mapped-Undiscovered ──discovery──▶ Online ◀──discovery── Offline
//!                                      │                      ▲
//!                                      └── N failed polls ────┘
//! ```
//!
//! Commands for a device without a live handle, or one that is offline, go
//! to the [`CommandCache`] and are replayed on the next transition to online.

use std::collections::HashMap;

use tokio::task::JoinHandle;

use lumenhub_domain::change::{ChangeInfo, CommandOrigin, StateChange, analyze_state_change};
use lumenhub_domain::command::{Command, CommandObject};
use lumenhub_domain::device::DeviceRecord;
use lumenhub_domain::document::Defaults;
use lumenhub_domain::error::ProtocolError;
use lumenhub_domain::event::DeviceSnapshot;
use lumenhub_domain::filter::FilterDefinition;
use lumenhub_domain::id::{Channel, FilterId, GroupId};
use lumenhub_domain::location::Location;
use lumenhub_domain::raw_state::RawState;
use lumenhub_domain::time::Timestamp;

use crate::command_cache::{CachedCommand, CommandCache};
use crate::filters::{FilterContext, FilterPlugins};
use crate::ports::DeviceHandle;
use crate::resolver::ResolvedDependencies;

/// Power actuation attempts for relays before giving up.
pub const RELAY_ATTEMPTS: u32 = 3;

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Known from the device map, never seen on the network.
    Undiscovered,
    Online,
    Offline,
}

/// What happened to a command handed to a setter.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Empty command from a caller that must send something.
    Rejected,
    /// Device unavailable; the command waits in the cache.
    Cached,
    /// Nothing to send after filtering, or already in effect.
    Dropped,
    /// Sent; carries the state the device answered with, if any.
    Issued(Option<RawState>),
    /// Transport failed; the filtered command waits in the cache.
    Failed,
}

/// Shared collaborators a setter needs.
#[derive(Debug, Clone, Copy)]
pub struct CommandEnv<'a> {
    pub plugins: &'a FilterPlugins,
    pub defaults: &'a Defaults,
    pub now: Timestamp,
}

pub struct DeviceController<H> {
    record: DeviceRecord,
    handle: Option<H>,
    state: Option<RawState>,
    power_state: Option<bool>,
    is_online: bool,
    last_seen_at: Option<Timestamp>,
    failed_polls: u32,
    filters: Vec<FilterDefinition>,
    groups: Vec<GroupId>,
    classes: Vec<String>,
    location: Location,
    cache: CommandCache,
    periodic_suspended: bool,
    periodic_runs: HashMap<FilterId, Timestamp>,
    suppress_cascade: bool,
    stale_generation: u64,
    poll_task: Option<JoinHandle<()>>,
}

impl<H> DeviceController<H> {
    #[must_use]
    pub fn new(record: DeviceRecord, resolved: ResolvedDependencies) -> Self {
        Self {
            record,
            handle: None,
            state: None,
            power_state: None,
            is_online: false,
            last_seen_at: None,
            failed_polls: 0,
            filters: resolved.filters,
            groups: resolved.groups,
            classes: resolved.classes,
            location: resolved.location,
            cache: CommandCache::default(),
            periodic_suspended: false,
            periodic_runs: HashMap::new(),
            suppress_cascade: false,
            stale_generation: 0,
            poll_task: None,
        }
    }

    #[must_use]
    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.record.channel
    }

    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        match (&self.handle, self.is_online) {
            (None, _) => DeviceStatus::Undiscovered,
            (Some(_), true) => DeviceStatus::Online,
            (Some(_), false) => DeviceStatus::Offline,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.is_online
    }

    #[must_use]
    pub fn power_state(&self) -> Option<bool> {
        self.power_state
    }

    #[must_use]
    pub fn state(&self) -> Option<&RawState> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn last_seen_at(&self) -> Option<Timestamp> {
        self.last_seen_at
    }

    #[must_use]
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterDefinition] {
        &self.filters
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    #[must_use]
    pub fn cache(&self) -> &CommandCache {
        &self.cache
    }

    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            channel: self.record.channel,
            is_online: self.is_online,
            power_state: self.power_state,
            state: self.state.clone(),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Take a live handle and go online. Invalidates any pending
    /// stale-power timer.
    pub fn attach(&mut self, handle: H) {
        self.handle = Some(handle);
        self.is_online = true;
        self.failed_polls = 0;
        self.stale_generation += 1;
    }

    /// Count a failed poll. Returns `true` when this one crossed the
    /// offline tolerance.
    pub fn record_poll_failure(&mut self, tolerance: u32) -> bool {
        self.failed_polls += 1;
        self.is_online && self.failed_polls >= tolerance.max(1)
    }

    /// Go offline. Returns the generation a stale-power timer must carry.
    pub fn mark_offline(&mut self) -> u64 {
        self.is_online = false;
        self.stale_generation += 1;
        self.stale_generation
    }

    /// Drop the remembered power state if the device stayed offline since
    /// the timer of `generation` was armed.
    pub fn discard_stale_power_state(&mut self, generation: u64) -> Option<ChangeInfo> {
        if generation != self.stale_generation || self.is_online {
            return None;
        }
        let previous = self.power_state.take()?;
        Some(ChangeInfo::power_discarded(Some(previous)))
    }

    pub fn set_poll_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.poll_task.replace(task) {
            previous.abort();
        }
    }

    /// Returns whether a poll loop was running.
    pub fn stop_polling(&mut self) -> bool {
        self.poll_task.take().map(|task| task.abort()).is_some()
    }

    // ── Reported state ──────────────────────────────────────────────

    /// Classify `raw` against the stored state without storing it.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when `raw` has mistyped fields.
    pub fn analyze_state_change(&self, raw: &RawState) -> Result<StateChange, ProtocolError> {
        analyze_state_change(self.record.kind, self.state.as_ref(), raw)
    }

    /// Store a reported state and return its classification.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when `raw` has mistyped fields; the
    /// stored state is left untouched.
    pub fn apply_report(&mut self, raw: RawState, now: Timestamp) -> Result<StateChange, ProtocolError> {
        let change = self.analyze_state_change(&raw)?;
        if let Some(on) = raw.power_state(self.record.kind)? {
            self.power_state = Some(on);
        }
        self.state = Some(raw);
        self.last_seen_at = Some(now);
        self.failed_polls = 0;
        Ok(change)
    }

    /// Whether sending `command` would change nothing the device reports.
    #[must_use]
    pub fn command_matches_current_state(&self, command: &Command) -> bool {
        match command {
            Command::Power(on) => self.power_state == Some(*on),
            Command::Light(cmd) => self
                .state
                .as_ref()
                .and_then(|raw| raw.to_command(self.record.kind).ok())
                .is_some_and(|current| cmd.is_satisfied_by(&current)),
        }
    }

    // ── Cache & flags ───────────────────────────────────────────────

    pub fn cache_command(&mut self, command: Command, trigger_switch_position: Option<bool>, ts: Timestamp) {
        self.cache.cache(command, trigger_switch_position, ts);
    }

    pub fn take_cached_commands(&mut self) -> Vec<CachedCommand> {
        self.cache.take()
    }

    /// Keep the next reported power change from cascading to linked and
    /// grouped devices.
    pub fn suppress_next_cascade(&mut self) {
        self.suppress_cascade = true;
    }

    pub fn clear_cascade_suppression(&mut self) {
        self.suppress_cascade = false;
    }

    /// Consume the suppression flag.
    pub fn take_cascade_suppression(&mut self) -> bool {
        std::mem::take(&mut self.suppress_cascade)
    }

    pub fn suspend_periodic_filters(&mut self) {
        self.periodic_suspended = true;
    }

    pub fn resume_periodic_filters(&mut self) {
        self.periodic_suspended = false;
    }

    #[must_use]
    pub fn periodic_filters_suspended(&self) -> bool {
        self.periodic_suspended
    }

    #[must_use]
    pub fn last_periodic_runs(&self) -> &HashMap<FilterId, Timestamp> {
        &self.periodic_runs
    }

    pub fn mark_periodic_run(&mut self, filters: &[FilterDefinition], now: Timestamp) {
        for filter in filters {
            self.periodic_runs.insert(filter.id.clone(), now);
        }
    }
}

impl<H: DeviceHandle> DeviceController<H> {
    /// Switch the device on or off.
    #[tracing::instrument(skip(self, filters, env), fields(channel = %self.record.channel))]
    pub async fn set_power_state(
        &mut self,
        on: bool,
        trigger_switch_position: Option<bool>,
        origin: CommandOrigin,
        filters: Option<&[FilterDefinition]>,
        skip_filters: bool,
        env: &CommandEnv<'_>,
    ) -> CommandOutcome {
        self.send(Command::Power(on), trigger_switch_position, origin, filters, skip_filters, env)
            .await
    }

    /// Apply light parameters.
    #[tracing::instrument(skip(self, cmd, filters, env), fields(channel = %self.record.channel))]
    pub async fn set_light_state(
        &mut self,
        cmd: CommandObject,
        trigger_switch_position: Option<bool>,
        origin: CommandOrigin,
        filters: Option<&[FilterDefinition]>,
        skip_filters: bool,
        env: &CommandEnv<'_>,
    ) -> CommandOutcome {
        self.send(Command::Light(cmd), trigger_switch_position, origin, filters, skip_filters, env)
            .await
    }

    /// Replay cached commands through the setters, emptying the cache.
    pub async fn flush_command_cache(&mut self, env: &CommandEnv<'_>) -> Vec<CommandOutcome> {
        let cached = self.cache.take();
        if !cached.is_empty() {
            tracing::info!(channel = %self.record.channel, count = cached.len(), "replaying cached commands");
        }
        let mut outcomes = Vec::with_capacity(cached.len());
        for entry in cached {
            let outcome = self
                .send(
                    entry.command,
                    entry.trigger_switch_position,
                    CommandOrigin::CacheReplay,
                    None,
                    false,
                    env,
                )
                .await;
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Shared body of both setters. `filters` replaces the device's own
    /// filter list when given.
    pub async fn send(
        &mut self,
        command: Command,
        trigger_switch_position: Option<bool>,
        origin: CommandOrigin,
        filters: Option<&[FilterDefinition]>,
        skip_filters: bool,
        env: &CommandEnv<'_>,
    ) -> CommandOutcome {
        let channel = self.record.channel;
        let periodic = origin == CommandOrigin::PeriodicFilter;
        let base = match &command {
            Command::Power(on) => CommandObject::power(*on),
            Command::Light(cmd) => cmd.clone(),
        };
        if base.is_empty() && !periodic {
            tracing::warn!(%channel, ?origin, "rejecting empty command");
            return CommandOutcome::Rejected;
        }

        let handle = match (&self.handle, self.is_online) {
            (Some(handle), true) => handle,
            _ => {
                if base.is_empty() {
                    return CommandOutcome::Dropped;
                }
                tracing::info!(%channel, ?origin, "device unavailable, caching command");
                self.cache.cache(command, trigger_switch_position, env.now);
                return CommandOutcome::Cached;
            }
        };

        let filtered = if skip_filters {
            base
        } else {
            let ctx = FilterContext {
                now: env.now,
                channel,
                sub_type: self.record.sub_type,
                location: &self.location,
                defaults: env.defaults,
            };
            let chain = filters.unwrap_or(&self.filters);
            env.plugins
                .apply_chain(chain, base, &ctx, trigger_switch_position, periodic)
        };

        let Some(command) = Command::from_state_data(&filtered) else {
            tracing::debug!(%channel, ?origin, "nothing left to send after filters");
            return CommandOutcome::Dropped;
        };
        if self.command_matches_current_state(&command) {
            tracing::debug!(%channel, ?origin, "command matches current state, dropped");
            return CommandOutcome::Dropped;
        }

        let attempts = match command {
            Command::Power(_) if self.record.sub_type.is_relay() => RELAY_ATTEMPTS,
            _ => 1,
        };
        for attempt in 1..=attempts {
            let result = match &command {
                Command::Power(on) => handle.set_power(*on).await,
                Command::Light(cmd) => handle.set_light(cmd).await,
            };
            match result {
                Ok(reply) => {
                    tracing::debug!(%channel, ?origin, ?command, "command issued");
                    return CommandOutcome::Issued(reply);
                }
                Err(error) => {
                    tracing::warn!(%channel, attempt, attempts, %error, "command failed");
                }
            }
        }
        self.cache.cache(command, trigger_switch_position, env.now);
        CommandOutcome::Failed
    }
}
