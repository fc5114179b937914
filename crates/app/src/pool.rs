//! Device pool — every controller, plus the cascade between them.
//!
//! A state report is processed in three steps:
//!
//! 1. it is applied to its controller and broadcast;
//! 2. a power change of non-hub origin is synced to the device's group
//!    mates, and linked devices are flipped;
//! 3. the device's targets for the new power position are commanded.
//!
//! Replies produced by steps 2 and 3 are queued and processed the same way,
//! in arrival order, so a cascade never recurses. A device flipped by the
//! hub as part of a cascade has its own cascade suppressed once, which keeps
//! mutually linked devices from bouncing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use lumenhub_domain::change::{ChangeInfo, ChangeOrigin, CommandOrigin, StateChange};
use lumenhub_domain::command::{Command, CommandObject};
use lumenhub_domain::device::{DeviceRecord, LinkedDevice};
use lumenhub_domain::document::{Defaults, HubDocument};
use lumenhub_domain::error::{HubError, NotFoundError, ValidationError};
use lumenhub_domain::event::DeviceSnapshot;
use lumenhub_domain::filter::{FilterDefinition, FilterSpec};
use lumenhub_domain::id::{Channel, GroupId, PresetId};
use lumenhub_domain::raw_state::RawState;
use lumenhub_domain::time::now;

use crate::controller::{CommandEnv, CommandOutcome, DeviceController, DeviceStatus};
use crate::filters::{ExternalFlagsFilter, FilterPlugins};
use crate::hub::HubEvent;
use crate::ports::{BroadcastSink, DeviceHandle};
use crate::resolver;
use crate::scheduler::{self, PeriodicReport};

type ReportQueue = VecDeque<(Channel, RawState)>;

fn device_not_found(channel: Channel) -> HubError {
    NotFoundError {
        entity: "device",
        id: channel.to_string(),
    }
    .into()
}

fn watch_spec(flags: &ExternalFlagsFilter, spec: &FilterSpec) {
    if let Some(url) = &spec.settings.url {
        flags.watch(url.clone());
    }
    if let Some(restriction) = &spec.settings.restriction {
        flags.watch(restriction.url.clone());
    }
}

fn watch_record(flags: &ExternalFlagsFilter, record: &DeviceRecord) {
    let target_specs = record
        .targets
        .on
        .iter()
        .chain(&record.targets.off)
        .flat_map(|target| &target.filters);
    for spec in record.filters.iter().chain(target_specs) {
        watch_spec(flags, spec);
    }
}

pub struct DevicePool<H, S> {
    controllers: BTreeMap<Channel, DeviceController<H>>,
    document: HubDocument,
    plugins: FilterPlugins,
    sink: S,
    events: mpsc::UnboundedSender<HubEvent<H>>,
}

impl<H, S> DevicePool<H, S>
where
    H: DeviceHandle + Clone + 'static,
    S: BroadcastSink,
{
    /// Build one controller per record. A record whose channel is already
    /// taken is logged and dropped.
    #[must_use]
    pub fn new(
        records: Vec<DeviceRecord>,
        document: HubDocument,
        sink: S,
        events: mpsc::UnboundedSender<HubEvent<H>>,
    ) -> Self {
        for name in document.class_tree.repeated_names() {
            warn!(class = %name, "class repeated on a class tree path, dropping that path");
        }
        let plugins = FilterPlugins::new();
        for spec in &document.filters {
            watch_spec(&plugins.external_flags, spec);
        }

        let mut controllers = BTreeMap::new();
        for record in records {
            if controllers.contains_key(&record.channel) {
                warn!(
                    device_id = %record.id,
                    error = %ValidationError::DuplicateChannel(record.channel),
                    "dropping device record"
                );
                continue;
            }
            watch_record(&plugins.external_flags, &record);
            let resolved = resolver::resolve(&record, &document);
            controllers.insert(record.channel, DeviceController::new(record, resolved));
        }
        info!(devices = controllers.len(), "device pool ready");

        Self {
            controllers,
            document,
            plugins,
            sink,
            events,
        }
    }

    #[must_use]
    pub fn document(&self) -> &HubDocument {
        &self.document
    }

    #[must_use]
    pub fn defaults(&self) -> &Defaults {
        &self.document.defaults
    }

    #[must_use]
    pub fn plugins(&self) -> &FilterPlugins {
        &self.plugins
    }

    #[must_use]
    pub fn controller(&self, channel: Channel) -> Option<&DeviceController<H>> {
        self.controllers.get(&channel)
    }

    #[must_use]
    pub fn snapshot(&self, channel: Channel) -> Option<DeviceSnapshot> {
        self.controllers.get(&channel).map(DeviceController::snapshot)
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.controllers.values().map(DeviceController::snapshot).collect()
    }

    /// Channels of every device in `group`.
    #[must_use]
    pub fn devices_in_group(&self, group: &GroupId) -> Vec<Channel> {
        self.controllers
            .values()
            .filter(|controller| controller.groups().contains(group))
            .map(DeviceController::channel)
            .collect()
    }

    /// Channels of every device whose resolved classes include `class`.
    #[must_use]
    pub fn devices_in_class(&self, class: &str) -> Vec<Channel> {
        self.controllers
            .values()
            .filter(|controller| controller.classes().iter().any(|name| name == class))
            .map(DeviceController::channel)
            .collect()
    }

    /// Flag sources the poller should fetch.
    #[must_use]
    pub fn watched_flag_urls(&self) -> Vec<String> {
        self.plugins.external_flags.watched_urls()
    }

    // ── Discovery & polling ─────────────────────────────────────────

    /// Add a device that was not in the device map and bring it online.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateChannel`] when another device
    /// already owns the record's channel.
    pub async fn inject_device(&mut self, record: DeviceRecord, handle: H) -> Result<(), HubError> {
        let channel = record.channel;
        match self.controllers.get(&channel) {
            Some(existing) if existing.record().id != record.id => {
                return Err(ValidationError::DuplicateChannel(channel).into());
            }
            Some(_) => {}
            None => {
                watch_record(&self.plugins.external_flags, &record);
                let resolved = resolver::resolve(&record, &self.document);
                info!(%channel, device_id = %record.id, "device injected");
                self.controllers
                    .insert(channel, DeviceController::new(record, resolved));
            }
        }
        self.handle_discovered(channel, handle).await
    }

    /// A transport found the device on `channel`: attach the handle, take a
    /// first reading, start polling and replay cached commands.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when no device is mapped to `channel`.
    pub async fn handle_discovered(&mut self, channel: Channel, handle: H) -> Result<(), HubError> {
        let controller = self
            .controllers
            .get_mut(&channel)
            .ok_or_else(|| device_not_found(channel))?;
        let previous = controller.status();
        controller.attach(handle.clone());
        info!(%channel, ?previous, "device online");
        let snapshot = controller.snapshot();
        self.emit_update(snapshot).await;

        let first = handle.poll().await;
        self.handle_poll_result(channel, first).await;
        self.start_polling(channel);

        let outcomes = match self.parts(channel) {
            Some((controller, env)) => controller.flush_command_cache(&env).await,
            None => Vec::new(),
        };
        let queue = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                CommandOutcome::Issued(Some(raw)) => Some((channel, raw)),
                _ => None,
            })
            .collect();
        self.process_reports(queue).await;
        Ok(())
    }

    /// Spawn the poll loop of `channel`. Returns `false` when the device has
    /// no handle yet.
    pub fn start_polling(&mut self, channel: Channel) -> bool {
        let period = Duration::from_millis(self.document.defaults.poll_interval_ms.max(1));
        let Some(controller) = self.controllers.get_mut(&channel) else {
            return false;
        };
        let Some(handle) = controller.handle().cloned() else {
            return false;
        };
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let result = handle.poll().await;
                if events.send(HubEvent::Polled { channel, result }).is_err() {
                    break;
                }
            }
        });
        controller.set_poll_task(task);
        debug!(%channel, ?period, "polling started");
        true
    }

    /// Returns whether a poll loop was running.
    pub fn stop_polling(&mut self, channel: Channel) -> bool {
        self.controllers
            .get_mut(&channel)
            .is_some_and(DeviceController::stop_polling)
    }

    pub async fn handle_poll_result(&mut self, channel: Channel, result: Result<RawState, HubError>) {
        let tolerance = self.document.defaults.offline_tolerance;
        let Some(controller) = self.controllers.get_mut(&channel) else {
            return;
        };
        if !controller.is_online() {
            debug!(%channel, "ignoring poll result of offline device");
            return;
        }
        match result {
            Ok(raw) => self.process_reports(VecDeque::from([(channel, raw)])).await,
            Err(error) => {
                warn!(%channel, %error, "poll failed");
                if controller.record_poll_failure(tolerance) {
                    self.go_offline(channel).await;
                }
            }
        }
    }

    /// Take the device offline: stop polling, broadcast, and arm the timer
    /// that discards the remembered power state.
    pub async fn go_offline(&mut self, channel: Channel) {
        let discard_after = Duration::from_millis(self.document.defaults.stale_state_discard_ms);
        let Some(controller) = self.controllers.get_mut(&channel) else {
            return;
        };
        if !controller.is_online() {
            return;
        }
        controller.stop_polling();
        let generation = controller.mark_offline();
        let snapshot = controller.snapshot();
        warn!(%channel, "device offline");
        self.emit_update(snapshot).await;

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(discard_after).await;
            let _ = events.send(HubEvent::StaleTimer { channel, generation });
        });
    }

    pub async fn handle_stale_timer(&mut self, channel: Channel, generation: u64) {
        let Some(controller) = self.controllers.get_mut(&channel) else {
            return;
        };
        let Some(change) = controller.discard_stale_power_state(generation) else {
            return;
        };
        info!(%channel, "discarding stale power state");
        let snapshot = controller.snapshot();
        self.emit_state_update(snapshot, change).await;
    }

    // ── Commands ────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a not-found error for an unmapped channel.
    pub async fn set_power_state(
        &mut self,
        channel: Channel,
        on: bool,
        origin: CommandOrigin,
    ) -> Result<CommandOutcome, HubError> {
        let outcome = self
            .dispatch(channel, Command::Power(on), Some(on), origin, None)
            .await?;
        self.follow_up(channel, &outcome).await;
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unmapped channel.
    pub async fn set_light_state(
        &mut self,
        channel: Channel,
        cmd: CommandObject,
        origin: CommandOrigin,
    ) -> Result<CommandOutcome, HubError> {
        let trigger = cmd.power_state();
        let outcome = self
            .dispatch(channel, Command::Light(cmd), trigger, origin, None)
            .await?;
        self.follow_up(channel, &outcome).await;
        Ok(outcome)
    }

    /// Invert the known power state; an unknown state counts as off.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unmapped channel.
    pub async fn toggle_power_state(&mut self, channel: Channel) -> Result<CommandOutcome, HubError> {
        let current = self
            .controllers
            .get(&channel)
            .ok_or_else(|| device_not_found(channel))?
            .power_state()
            .unwrap_or(false);
        self.set_power_state(channel, !current, CommandOrigin::User)
            .await
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unknown preset or channel.
    pub async fn apply_preset(
        &mut self,
        channel: Channel,
        preset: &PresetId,
    ) -> Result<CommandOutcome, HubError> {
        let state = self
            .document
            .preset(preset)
            .ok_or_else(|| NotFoundError {
                entity: "preset",
                id: preset.to_string(),
            })?
            .state_data
            .clone();
        let trigger = state.power_state();
        let outcome = self
            .dispatch(channel, Command::Light(state), trigger, CommandOrigin::Preset, None)
            .await?;
        self.follow_up(channel, &outcome).await;
        Ok(outcome)
    }

    /// Run a command a target entry deferred.
    pub async fn handle_deferred_command(
        &mut self,
        channel: Channel,
        command: Command,
        trigger_switch_position: Option<bool>,
        filters: Vec<FilterDefinition>,
    ) {
        match self
            .dispatch(channel, command, trigger_switch_position, CommandOrigin::Target, Some(&filters))
            .await
        {
            Ok(outcome) => self.follow_up(channel, &outcome).await,
            Err(error) => warn!(%channel, %error, "deferred command dropped"),
        }
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unmapped channel.
    pub fn suspend_periodic_filters(&mut self, channel: Channel) -> Result<(), HubError> {
        self.controllers
            .get_mut(&channel)
            .ok_or_else(|| device_not_found(channel))?
            .suspend_periodic_filters();
        info!(%channel, "periodic filters suspended");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unmapped channel.
    pub fn resume_periodic_filters(&mut self, channel: Channel) -> Result<(), HubError> {
        self.controllers
            .get_mut(&channel)
            .ok_or_else(|| device_not_found(channel))?
            .resume_periodic_filters();
        info!(%channel, "periodic filters resumed");
        Ok(())
    }

    /// One tick of the periodic scheduler: run every online, unsuspended
    /// device through its eligible periodic filters with an empty command.
    pub async fn run_periodic_filters(&mut self) -> PeriodicReport {
        let at = now();
        let mut report = PeriodicReport::default();
        let channels: Vec<Channel> = self.controllers.keys().copied().collect();
        let mut queue = ReportQueue::new();

        for channel in channels {
            let Some((controller, env)) = self.parts(channel) else {
                continue;
            };
            if controller.periodic_filters_suspended() {
                report.devices_suspended += 1;
                continue;
            }
            if !controller.is_online() {
                continue;
            }
            let eligible = scheduler::eligible_filters(
                controller.filters(),
                controller.last_periodic_runs(),
                at,
                controller.location(),
                env.defaults,
            );
            if eligible.is_empty() {
                continue;
            }
            controller.mark_periodic_run(&eligible, at);
            report.devices_run += 1;
            let env = CommandEnv { now: at, ..env };
            let outcome = controller
                .set_light_state(
                    CommandObject::new(),
                    None,
                    CommandOrigin::PeriodicFilter,
                    Some(&eligible),
                    false,
                    &env,
                )
                .await;
            if let CommandOutcome::Issued(Some(raw)) = outcome {
                queue.push_back((channel, raw));
            }
        }

        self.process_reports(queue).await;
        debug!(
            devices_run = report.devices_run,
            devices_suspended = report.devices_suspended,
            "periodic filters ran"
        );
        report
    }

    /// Store fetched flag values for `url`.
    pub fn update_flags(&self, url: &str, flags: BTreeMap<String, bool>) {
        let changed = self.plugins.external_flags.update(url, flags);
        if changed > 0 {
            info!(url, changed, "external flags changed");
        }
    }

    /// Stop every poll loop.
    pub fn shutdown(&mut self) {
        let mut stopped = 0_usize;
        for controller in self.controllers.values_mut() {
            if controller.stop_polling() {
                stopped += 1;
            }
        }
        info!(stopped, "device pool shut down");
    }

    // ── Cascade ─────────────────────────────────────────────────────

    /// Apply state reports, and every report they cause, in arrival order.
    pub async fn process_reports(&mut self, mut queue: ReportQueue) {
        while let Some((channel, raw)) = queue.pop_front() {
            let Some(change) = self.apply_report(channel, raw).await else {
                continue;
            };
            if !change.on_off_changed {
                continue;
            }
            let Some(on) = change.power_state else {
                continue;
            };
            let suppressed = self
                .controllers
                .get_mut(&channel)
                .is_some_and(DeviceController::take_cascade_suppression);
            if suppressed {
                debug!(%channel, "cascade suppressed");
            } else {
                self.process_linked_devices(channel, &change, &mut queue).await;
            }
            self.execute_commands(channel, on, &mut queue).await;
        }
    }

    async fn apply_report(&mut self, channel: Channel, raw: RawState) -> Option<ChangeInfo> {
        let Some(controller) = self.controllers.get_mut(&channel) else {
            warn!(%channel, "state report for unmapped device");
            return None;
        };
        let previous_power_state = controller.power_state();
        match controller.apply_report(raw, now()) {
            Err(error) => {
                error!(%channel, %error, "discarding malformed state report");
                None
            }
            Ok(StateChange::NoBaseline) => {
                let snapshot = controller.snapshot();
                self.emit_update(snapshot).await;
                None
            }
            // Same payload, but a discarded power state is known again.
            Ok(StateChange::Unchanged) if controller.power_state() != previous_power_state => {
                let snapshot = controller.snapshot();
                self.emit_update(snapshot).await;
                None
            }
            Ok(StateChange::Unchanged) => None,
            Ok(StateChange::Changed(change)) => {
                let snapshot = controller.snapshot();
                self.emit_state_update(snapshot, change).await;
                Some(change)
            }
        }
    }

    /// Sync group mates and flip linked devices after a power change.
    async fn process_linked_devices(&mut self, channel: Channel, change: &ChangeInfo, queue: &mut ReportQueue) {
        let Some(on) = change.power_state else {
            return;
        };
        let Some(source) = self.controllers.get(&channel) else {
            return;
        };
        let groups = source.groups().to_vec();
        let links = self.linked_devices_of(channel);

        if change.origin != ChangeOrigin::Hub {
            let mates: BTreeSet<Channel> = self
                .document
                .groups
                .iter()
                .filter(|group| groups.contains(&group.id))
                .flat_map(|group| group.channels.iter().copied())
                .filter(|mate| *mate != channel)
                .collect();
            for mate in mates {
                self.flip(mate, on, CommandOrigin::GroupSync, queue).await;
            }
        }

        for link in links {
            if !link.reacts_to(on) {
                continue;
            }
            let Some(target) = self.controllers.get(&link.channel) else {
                warn!(%channel, linked = %link.channel, "linked device is not mapped");
                continue;
            };
            if target.status() != DeviceStatus::Online {
                debug!(%channel, linked = %link.channel, "linked device unavailable");
                continue;
            }
            if let Some(next) = link.next_state(on, target.power_state()) {
                self.flip(link.channel, next, CommandOrigin::LinkedDevice, queue)
                    .await;
            }
        }
    }

    /// Link list of the first group that declares one, else the device's own.
    fn linked_devices_of(&self, channel: Channel) -> Vec<LinkedDevice> {
        let group_links = resolver::resolve_groups(channel, &self.document.groups)
            .into_iter()
            .find_map(|group| group.linked_devices.clone());
        match group_links {
            Some(links) => links,
            None => self
                .controllers
                .get(&channel)
                .map(|controller| controller.record().linked_devices.clone())
                .unwrap_or_default(),
        }
    }

    /// Power a device on behalf of another one's cascade.
    async fn flip(&mut self, channel: Channel, on: bool, origin: CommandOrigin, queue: &mut ReportQueue) {
        let Some(controller) = self.controllers.get_mut(&channel) else {
            return;
        };
        if !controller.is_online() {
            return;
        }
        controller.suppress_next_cascade();
        match self
            .dispatch(channel, Command::Power(on), Some(on), origin, None)
            .await
        {
            Ok(CommandOutcome::Issued(reply)) => {
                if let Some(raw) = reply {
                    queue.push_back((channel, raw));
                }
            }
            Ok(_) | Err(_) => {
                if let Some(controller) = self.controllers.get_mut(&channel) {
                    controller.clear_cascade_suppression();
                }
            }
        }
    }

    /// Command the targets of `channel` for its new power position.
    async fn execute_commands(&mut self, channel: Channel, on: bool, queue: &mut ReportQueue) {
        let Some(source) = self.controllers.get(&channel) else {
            return;
        };
        let targets = source.record().targets.for_position(on).to_vec();

        for target in targets {
            let Some(command) = Command::from_state_data(&target.state_data) else {
                debug!(%channel, target = %target.channel, "target without state data");
                continue;
            };
            let Some(target_controller) = self.controllers.get(&target.channel) else {
                warn!(%channel, target = %target.channel, "target device is not mapped");
                continue;
            };
            let mut filters = target_controller.filters().to_vec();
            filters.extend(resolver::resolve_filters(
                &target.filters,
                &self.document,
                &format!("{channel}-target-{}", target.channel),
            ));

            match target.delay.filter(|delay| *delay > 0) {
                Some(delay) => {
                    let events = self.events.clone();
                    let target_channel = target.channel;
                    debug!(%channel, target = %target_channel, delay, "target deferred");
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        let _ = events.send(HubEvent::DeferredCommand {
                            channel: target_channel,
                            command,
                            trigger_switch_position: Some(on),
                            filters,
                        });
                    });
                }
                None => match self
                    .dispatch(target.channel, command, Some(on), CommandOrigin::Target, Some(&filters))
                    .await
                {
                    Ok(CommandOutcome::Issued(Some(raw))) => queue.push_back((target.channel, raw)),
                    Ok(_) => {}
                    Err(error) => warn!(%channel, target = %target.channel, %error, "target command failed"),
                },
            }
        }
    }

    // ── Plumbing ────────────────────────────────────────────────────

    fn parts(&mut self, channel: Channel) -> Option<(&mut DeviceController<H>, CommandEnv<'_>)> {
        let controller = self.controllers.get_mut(&channel)?;
        let env = CommandEnv {
            plugins: &self.plugins,
            defaults: &self.document.defaults,
            now: now(),
        };
        Some((controller, env))
    }

    async fn dispatch(
        &mut self,
        channel: Channel,
        command: Command,
        trigger_switch_position: Option<bool>,
        origin: CommandOrigin,
        filters: Option<&[FilterDefinition]>,
    ) -> Result<CommandOutcome, HubError> {
        let (controller, env) = self
            .parts(channel)
            .ok_or_else(|| device_not_found(channel))?;
        Ok(controller
            .send(command, trigger_switch_position, origin, filters, false, &env)
            .await)
    }

    async fn follow_up(&mut self, channel: Channel, outcome: &CommandOutcome) {
        if let CommandOutcome::Issued(Some(raw)) = outcome {
            self.process_reports(VecDeque::from([(channel, raw.clone())]))
                .await;
        }
    }

    async fn emit_update(&self, snapshot: DeviceSnapshot) {
        let channel = snapshot.channel;
        if let Err(error) = self.sink.emit_device_update(snapshot).await {
            warn!(%channel, %error, "failed to broadcast device update");
        }
    }

    async fn emit_state_update(&self, snapshot: DeviceSnapshot, change: ChangeInfo) {
        let channel = snapshot.channel;
        if let Err(error) = self.sink.emit_device_state_update(snapshot, change).await {
            warn!(%channel, %error, "failed to broadcast state change");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{SpyHandle, SpySink};
    use lumenhub_domain::class_tree::{ClassRef, ClassTree};
    use lumenhub_domain::command::LightParam;
    use lumenhub_domain::device::{DeviceKind, Target};
    use lumenhub_domain::document::Preset;
    use lumenhub_domain::group::Group;
    use serde_json::json;

    type TestPool = DevicePool<SpyHandle, Arc<SpySink>>;

    fn ch(value: u32) -> Channel {
        Channel::new(value)
    }

    fn record(value: u32) -> DeviceRecord {
        DeviceRecord::new(format!("dev-{value}"), ch(value), DeviceKind::Virtual)
    }

    fn group(id: &str, members: &[u32], linked_devices: Option<Vec<LinkedDevice>>) -> Group {
        Group {
            id: id.into(),
            label: String::new(),
            channels: members.iter().copied().map(ch).collect(),
            linked_devices,
            class: ClassRef::default(),
        }
    }

    fn toggle_link(value: u32) -> LinkedDevice {
        LinkedDevice {
            channel: ch(value),
            ..LinkedDevice::default()
        }
    }

    fn pool(
        records: Vec<DeviceRecord>,
        document: HubDocument,
    ) -> (TestPool, Arc<SpySink>, mpsc::UnboundedReceiver<HubEvent<SpyHandle>>) {
        let sink = Arc::new(SpySink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (DevicePool::new(records, document, Arc::clone(&sink), tx), sink, rx)
    }

    async fn discover(pool: &mut TestPool, value: u32, on: bool) -> SpyHandle {
        let handle = SpyHandle::new(on);
        pool.handle_discovered(ch(value), handle.clone())
            .await
            .unwrap();
        handle
    }

    #[tokio::test]
    async fn should_drop_records_with_duplicate_channel() {
        let mut duplicate = record(1);
        duplicate.id = "other".into();
        let (pool, _, _rx) = pool(vec![record(1), duplicate], HubDocument::default());

        assert_eq!(pool.snapshots().len(), 1);
        assert_eq!(pool.controller(ch(1)).unwrap().record().id.as_str(), "dev-1");
    }

    #[tokio::test]
    async fn should_take_baseline_on_discovery() {
        let (mut pool, sink, _rx) = pool(vec![record(1)], HubDocument::default());
        let handle = discover(&mut pool, 1, true).await;

        let controller = pool.controller(ch(1)).unwrap();
        assert_eq!(controller.status(), DeviceStatus::Online);
        assert_eq!(controller.power_state(), Some(true));
        assert_eq!(handle.polls(), 1);
        assert!(sink.state_changes().is_empty());
    }

    #[tokio::test]
    async fn should_reject_discovery_of_unmapped_channel() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        let result = pool.handle_discovered(ch(9), SpyHandle::new(false)).await;
        assert!(matches!(result, Err(HubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_inject_unmapped_device() {
        let (mut pool, _, _rx) = pool(Vec::new(), HubDocument::default());
        pool.inject_device(record(4), SpyHandle::new(false))
            .await
            .unwrap();
        assert_eq!(pool.controller(ch(4)).unwrap().status(), DeviceStatus::Online);
    }

    #[tokio::test]
    async fn should_refuse_injection_on_taken_channel() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        let mut intruder = record(1);
        intruder.id = "intruder".into();

        let result = pool.inject_device(intruder, SpyHandle::new(false)).await;
        assert!(matches!(
            result,
            Err(HubError::Validation(ValidationError::DuplicateChannel(c))) if c == ch(1)
        ));
    }

    #[tokio::test]
    async fn should_cache_while_offline_and_replay_once_on_rediscovery() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        let handle = discover(&mut pool, 1, false).await;
        for _ in 0..3 {
            pool.handle_poll_result(ch(1), Err(HubError::Transport("timeout".into())))
                .await;
        }
        assert_eq!(pool.controller(ch(1)).unwrap().status(), DeviceStatus::Offline);

        let outcome = pool
            .set_power_state(ch(1), true, CommandOrigin::User)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Cached);
        assert!(handle.calls().is_empty());

        pool.handle_discovered(ch(1), handle.clone()).await.unwrap();
        assert_eq!(handle.calls(), vec![Command::Power(true)]);
        let controller = pool.controller(ch(1)).unwrap();
        assert!(controller.cache().is_empty());
        assert_eq!(controller.power_state(), Some(true));
    }

    #[tokio::test]
    async fn should_stay_online_below_offline_tolerance() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        discover(&mut pool, 1, false).await;
        for _ in 0..2 {
            pool.handle_poll_result(ch(1), Err(HubError::Transport("timeout".into())))
                .await;
        }
        assert!(pool.controller(ch(1)).unwrap().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn should_discard_power_state_after_staying_offline() {
        let (mut pool, sink, mut rx) = pool(vec![record(1)], HubDocument::default());
        discover(&mut pool, 1, true).await;
        pool.go_offline(ch(1)).await;

        let Some(HubEvent::StaleTimer { channel, generation }) = rx.recv().await else {
            panic!("expected stale timer");
        };
        pool.handle_stale_timer(channel, generation).await;

        assert_eq!(pool.controller(ch(1)).unwrap().power_state(), None);
        let change = sink.state_changes().pop().unwrap();
        assert_eq!(change.previous_power_state, Some(true));
        assert_eq!(change.power_state, None);
    }

    #[tokio::test(start_paused = true)]
    async fn should_broadcast_power_state_restored_after_discard() {
        let (mut pool, sink, mut rx) = pool(vec![record(1)], HubDocument::default());
        let handle = discover(&mut pool, 1, true).await;
        pool.go_offline(ch(1)).await;
        let Some(HubEvent::StaleTimer { channel, generation }) = rx.recv().await else {
            panic!("expected stale timer");
        };
        pool.handle_stale_timer(channel, generation).await;
        let seen = sink.updates().len();

        pool.handle_discovered(ch(1), handle).await.unwrap();

        let after: Vec<_> = sink.updates().into_iter().skip(seen).collect();
        let (last, change) = after.last().unwrap();
        assert!(change.is_none());
        assert!(last.is_online);
        assert_eq!(last.power_state, Some(true));
        assert_eq!(pool.controller(ch(1)).unwrap().power_state(), Some(true));
    }

    #[tokio::test]
    async fn should_flip_mutually_linked_devices_once() {
        let mut x = record(1);
        x.linked_devices = vec![toggle_link(2)];
        let mut y = record(2);
        y.linked_devices = vec![toggle_link(1)];
        let (mut pool, _, _rx) = pool(vec![x, y], HubDocument::default());
        let x = discover(&mut pool, 1, false).await;
        let y = discover(&mut pool, 2, false).await;

        let report = x.switch_externally(true);
        pool.handle_poll_result(ch(1), Ok(report)).await;

        assert_eq!(y.calls(), vec![Command::Power(true)]);
        assert!(x.calls().is_empty());
        assert_eq!(pool.controller(ch(2)).unwrap().power_state(), Some(true));
    }

    #[tokio::test]
    async fn should_follow_source_direction_in_sync_mode() {
        let mut source = record(1);
        source.linked_devices = vec![LinkedDevice {
            channel: ch(2),
            sync: true,
            inverse: true,
            ..LinkedDevice::default()
        }];
        let (mut pool, _, _rx) = pool(vec![source, record(2)], HubDocument::default());
        let source = discover(&mut pool, 1, false).await;
        let mirror = discover(&mut pool, 2, true).await;

        pool.handle_poll_result(ch(1), Ok(source.switch_externally(true)))
            .await;
        assert_eq!(mirror.calls(), vec![Command::Power(false)]);

        pool.handle_poll_result(ch(1), Ok(source.switch_externally(false)))
            .await;
        assert_eq!(mirror.calls(), vec![Command::Power(false), Command::Power(true)]);
    }

    #[tokio::test]
    async fn should_sync_group_on_external_change_only() {
        let document = HubDocument {
            groups: vec![group("living", &[1, 2, 3], None)],
            ..HubDocument::default()
        };
        let (mut pool, _, _rx) = pool(vec![record(1), record(2), record(3)], document);
        let wall = discover(&mut pool, 1, false).await;
        let second = discover(&mut pool, 2, false).await;
        let third = discover(&mut pool, 3, false).await;

        pool.handle_poll_result(ch(1), Ok(wall.switch_externally(true)))
            .await;
        assert_eq!(second.calls(), vec![Command::Power(true)]);
        assert_eq!(third.calls(), vec![Command::Power(true)]);
        assert!(wall.calls().is_empty());

        pool.set_power_state(ch(1), false, CommandOrigin::User)
            .await
            .unwrap();
        assert_eq!(second.calls().len(), 1);
        assert_eq!(third.calls().len(), 1);
    }

    #[tokio::test]
    async fn should_prefer_group_link_list_over_device_links() {
        let mut source = record(1);
        source.linked_devices = vec![toggle_link(2)];
        let document = HubDocument {
            groups: vec![group("hall", &[1], Some(vec![toggle_link(3)]))],
            ..HubDocument::default()
        };
        let (mut pool, _, _rx) = pool(vec![source, record(2), record(3)], document);
        let source = discover(&mut pool, 1, false).await;
        let own = discover(&mut pool, 2, false).await;
        let grouped = discover(&mut pool, 3, false).await;

        pool.handle_poll_result(ch(1), Ok(source.switch_externally(true)))
            .await;
        assert!(own.calls().is_empty());
        assert_eq!(grouped.calls(), vec![Command::Power(true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_command_targets_immediately_and_after_delay() {
        let mut source = record(1);
        source.targets.on = vec![
            Target {
                channel: ch(2),
                state_data: CommandObject::power(true).with(LightParam::Brightness, 30.0),
                delay: None,
                filters: Vec::new(),
            },
            Target {
                channel: ch(3),
                state_data: CommandObject::power(true),
                delay: Some(500),
                filters: Vec::new(),
            },
        ];
        let (mut pool, _, mut rx) = pool(vec![source, record(2), record(3)], HubDocument::default());
        let source = discover(&mut pool, 1, false).await;
        let immediate = discover(&mut pool, 2, false).await;
        let delayed = discover(&mut pool, 3, false).await;

        pool.handle_poll_result(ch(1), Ok(source.switch_externally(true)))
            .await;
        assert_eq!(
            immediate.calls(),
            vec![Command::Light(
                CommandObject::power(true).with(LightParam::Brightness, 30.0)
            )]
        );
        assert!(delayed.calls().is_empty());

        let Some(HubEvent::DeferredCommand {
            channel,
            command,
            trigger_switch_position,
            filters,
        }) = rx.recv().await
        else {
            panic!("expected deferred command");
        };
        assert_eq!(channel, ch(3));
        pool.handle_deferred_command(channel, command, trigger_switch_position, filters)
            .await;
        assert_eq!(delayed.calls(), vec![Command::Power(true)]);
    }

    #[tokio::test]
    async fn should_apply_target_entry_filters() {
        let mut source = record(1);
        source.targets.on = vec![Target {
            channel: ch(2),
            state_data: CommandObject::power(true),
            delay: None,
            filters: vec![
                serde_json::from_value(json!({
                    "pluginName": "schedule",
                    "settings": {"schedule": [{"hours": 0, "minutes": 0, "stateData": {"brightness": 5}}]}
                }))
                .unwrap(),
            ],
        }];
        let (mut pool, _, _rx) = pool(vec![source, record(2)], HubDocument::default());
        let source = discover(&mut pool, 1, false).await;
        let target = discover(&mut pool, 2, false).await;

        pool.handle_poll_result(ch(1), Ok(source.switch_externally(true)))
            .await;
        assert_eq!(
            target.calls(),
            vec![Command::Light(
                CommandObject::power(true).with(LightParam::Brightness, 5.0)
            )]
        );
    }

    #[tokio::test]
    async fn should_not_resend_state_already_in_effect() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        let handle = discover(&mut pool, 1, true).await;

        let outcome = pool
            .set_power_state(ch(1), true, CommandOrigin::User)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Dropped);
        assert!(handle.calls().is_empty());
    }

    #[tokio::test]
    async fn should_toggle_power_state() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        let handle = discover(&mut pool, 1, false).await;

        pool.toggle_power_state(ch(1)).await.unwrap();
        pool.toggle_power_state(ch(1)).await.unwrap();
        assert_eq!(handle.calls(), vec![Command::Power(true), Command::Power(false)]);
    }

    #[tokio::test]
    async fn should_apply_preset_state() {
        let document = HubDocument {
            presets: vec![Preset {
                id: "movie".into(),
                label: "Movie".into(),
                state_data: CommandObject::new().with(LightParam::Brightness, 10.0),
            }],
            ..HubDocument::default()
        };
        let (mut pool, _, _rx) = pool(vec![record(1)], document);
        let handle = discover(&mut pool, 1, true).await;

        pool.apply_preset(ch(1), &"movie".into()).await.unwrap();
        assert_eq!(
            handle.calls(),
            vec![Command::Light(CommandObject::new().with(LightParam::Brightness, 10.0))]
        );

        let missing = pool.apply_preset(ch(1), &"party".into()).await;
        assert!(matches!(missing, Err(HubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_report_unknown_channel_on_command() {
        let (mut pool, _, _rx) = pool(vec![record(1)], HubDocument::default());
        let result = pool.set_power_state(ch(7), true, CommandOrigin::User).await;
        assert!(matches!(result, Err(HubError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_run_periodic_filters_on_unsuspended_devices() {
        let schedule: FilterSpec = serde_json::from_value(json!({
            "pluginName": "schedule",
            "periodicallyActive": true,
            "settings": {"schedule": [{"hours": 0, "minutes": 0, "stateData": {"brightness": 40}}]}
        }))
        .unwrap();
        let mut first = record(1);
        first.filters = vec![schedule.clone()];
        let mut second = record(2);
        second.filters = vec![schedule];
        let (mut pool, _, _rx) = pool(vec![first, second], HubDocument::default());
        let active = discover(&mut pool, 1, true).await;
        let paused = discover(&mut pool, 2, true).await;
        pool.suspend_periodic_filters(ch(2)).unwrap();

        let report = pool.run_periodic_filters().await;
        assert_eq!(
            report,
            PeriodicReport {
                devices_run: 1,
                devices_suspended: 1
            }
        );
        assert_eq!(
            active.calls(),
            vec![Command::Light(CommandObject::new().with(LightParam::Brightness, 40.0))]
        );
        assert!(paused.calls().is_empty());

        pool.resume_periodic_filters(ch(2)).unwrap();
        let report = pool.run_periodic_filters().await;
        assert_eq!(report.devices_suspended, 0);
        assert_eq!(paused.calls().len(), 1);
    }

    #[tokio::test]
    async fn should_query_devices_by_group_and_class() {
        let mut lamp = record(1);
        lamp.class = ClassRef::One("lamp".into());
        let document = HubDocument {
            groups: vec![group("kitchen", &[2], None)],
            class_tree: ClassTree::new().with("light", ClassTree::new().with("lamp", ClassTree::new())),
            ..HubDocument::default()
        };
        let (pool, _, _rx) = pool(vec![lamp, record(2)], document);

        assert_eq!(pool.devices_in_group(&"kitchen".into()), vec![ch(2)]);
        assert_eq!(pool.devices_in_class("light"), vec![ch(1)]);
        assert_eq!(pool.devices_in_class("lamp"), vec![ch(1)]);
        assert!(pool.devices_in_class("fan").is_empty());
    }

    #[tokio::test]
    async fn should_watch_flag_urls_of_documents_and_devices() {
        let mut device = record(1);
        device.filters = vec![
            serde_json::from_value(json!({
                "pluginName": "externalFlags",
                "settings": {"url": "http://flags.local/a", "flag": "away"}
            }))
            .unwrap(),
        ];
        let document = HubDocument {
            filters: vec![
                serde_json::from_value(json!({
                    "id": "veto",
                    "pluginName": "naturalLight",
                    "settings": {"restriction": {"url": "http://flags.local/b", "flag": "party"}}
                }))
                .unwrap(),
            ],
            ..HubDocument::default()
        };
        let (pool, _, _rx) = pool(vec![device], document);

        let mut urls = pool.watched_flag_urls();
        urls.sort();
        assert_eq!(urls, vec!["http://flags.local/a", "http://flags.local/b"]);
    }
}
