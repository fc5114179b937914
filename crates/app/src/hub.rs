//! Hub runtime — the single task that owns the [`DevicePool`].
//!
//! Poll loops, timers, the periodic ticker, the flag poller and API callers
//! never touch controllers directly. They post [`HubEvent`]s to the hub's
//! mailbox and the hub applies them one at a time, so all state mutation is
//! serialized without locks.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use lumenhub_domain::change::CommandOrigin;
use lumenhub_domain::command::{Command, CommandObject};
use lumenhub_domain::device::DeviceRecord;
use lumenhub_domain::document::HubDocument;
use lumenhub_domain::error::HubError;
use lumenhub_domain::event::DeviceSnapshot;
use lumenhub_domain::filter::FilterDefinition;
use lumenhub_domain::id::{Channel, PresetId};
use lumenhub_domain::raw_state::RawState;

use crate::controller::CommandOutcome;
use crate::pool::DevicePool;
use crate::ports::{BroadcastSink, DeviceHandle, FlagSource};

/// A command submitted through [`HubHandle`].
#[derive(Debug, Clone)]
pub enum CommandRequest {
    SetPower { channel: Channel, on: bool },
    SetLight { channel: Channel, cmd: CommandObject },
    Toggle { channel: Channel },
    ApplyPreset { channel: Channel, preset: PresetId },
}

/// Everything the hub task reacts to.
pub enum HubEvent<H> {
    /// A transport found a mapped device.
    Discovered { channel: Channel, handle: H },
    /// A device not in the device map, supplied with its record.
    Injected {
        record: Box<DeviceRecord>,
        handle: H,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Polled {
        channel: Channel,
        result: Result<RawState, HubError>,
    },
    /// A transport reports the device gone.
    Offline { channel: Channel },
    StaleTimer { channel: Channel, generation: u64 },
    PeriodicTick,
    /// Time to fetch every flag source currently watched.
    FlagPollTick,
    FlagsFetched {
        url: String,
        flags: BTreeMap<String, bool>,
    },
    /// A target entry whose delay elapsed.
    DeferredCommand {
        channel: Channel,
        command: Command,
        trigger_switch_position: Option<bool>,
        filters: Vec<FilterDefinition>,
    },
    Command {
        request: CommandRequest,
        reply: oneshot::Sender<Result<CommandOutcome, HubError>>,
    },
    SetPeriodicSuspended {
        channel: Channel,
        suspended: bool,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Snapshots {
        reply: oneshot::Sender<Vec<DeviceSnapshot>>,
    },
    Shutdown,
}

/// Cloneable client of a running hub.
pub struct HubHandle<H> {
    events: mpsc::UnboundedSender<HubEvent<H>>,
}

impl<H> Clone for HubHandle<H> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<H> HubHandle<H> {
    fn post(&self, event: HubEvent<H>) -> Result<(), HubError> {
        self.events.send(event).map_err(|_| HubError::Stopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubEvent<H>,
    ) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.post(build(reply))?;
        response.await.map_err(|_| HubError::Stopped)
    }

    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] when the hub is gone.
    pub fn discovered(&self, channel: Channel, handle: H) -> Result<(), HubError> {
        self.post(HubEvent::Discovered { channel, handle })
    }

    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] when the hub is gone.
    pub fn offline(&self, channel: Channel) -> Result<(), HubError> {
        self.post(HubEvent::Offline { channel })
    }

    /// # Errors
    ///
    /// Fails when the channel is taken by another device or the hub is gone.
    pub async fn inject_device(&self, record: DeviceRecord, handle: H) -> Result<(), HubError> {
        self.request(|reply| HubEvent::Injected {
            record: Box::new(record),
            handle,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// Fails for an unmapped channel or when the hub is gone.
    pub async fn command(&self, request: CommandRequest) -> Result<CommandOutcome, HubError> {
        self.request(|reply| HubEvent::Command { request, reply })
            .await?
    }

    /// # Errors
    ///
    /// Fails for an unmapped channel or when the hub is gone.
    pub async fn set_power_state(&self, channel: Channel, on: bool) -> Result<CommandOutcome, HubError> {
        self.command(CommandRequest::SetPower { channel, on }).await
    }

    /// # Errors
    ///
    /// Fails for an unmapped channel or when the hub is gone.
    pub async fn set_light_state(
        &self,
        channel: Channel,
        cmd: CommandObject,
    ) -> Result<CommandOutcome, HubError> {
        self.command(CommandRequest::SetLight { channel, cmd }).await
    }

    /// # Errors
    ///
    /// Fails for an unmapped channel or when the hub is gone.
    pub async fn toggle_power_state(&self, channel: Channel) -> Result<CommandOutcome, HubError> {
        self.command(CommandRequest::Toggle { channel }).await
    }

    /// # Errors
    ///
    /// Fails for an unknown preset, an unmapped channel, or when the hub is
    /// gone.
    pub async fn apply_preset(&self, channel: Channel, preset: PresetId) -> Result<CommandOutcome, HubError> {
        self.command(CommandRequest::ApplyPreset { channel, preset })
            .await
    }

    /// # Errors
    ///
    /// Fails for an unmapped channel or when the hub is gone.
    pub async fn suspend_periodic_filters(&self, channel: Channel) -> Result<(), HubError> {
        self.request(|reply| HubEvent::SetPeriodicSuspended {
            channel,
            suspended: true,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// Fails for an unmapped channel or when the hub is gone.
    pub async fn resume_periodic_filters(&self, channel: Channel) -> Result<(), HubError> {
        self.request(|reply| HubEvent::SetPeriodicSuspended {
            channel,
            suspended: false,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] when the hub is gone.
    pub async fn snapshots(&self) -> Result<Vec<DeviceSnapshot>, HubError> {
        self.request(|reply| HubEvent::Snapshots { reply }).await
    }

    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] when the hub is already gone.
    pub fn shutdown(&self) -> Result<(), HubError> {
        self.post(HubEvent::Shutdown)
    }
}

pub struct Hub<H, S, F> {
    pool: DevicePool<H, S>,
    flags: F,
    events: mpsc::UnboundedSender<HubEvent<H>>,
    mailbox: mpsc::UnboundedReceiver<HubEvent<H>>,
}

impl<H, S, F> Hub<H, S, F>
where
    H: DeviceHandle + Clone + 'static,
    S: BroadcastSink,
    F: FlagSource + Clone + 'static,
{
    #[must_use]
    pub fn new(records: Vec<DeviceRecord>, document: HubDocument, sink: S, flags: F) -> Self {
        let (events, mailbox) = mpsc::unbounded_channel();
        let pool = DevicePool::new(records, document, sink, events.clone());
        Self {
            pool,
            flags,
            events,
            mailbox,
        }
    }

    #[must_use]
    pub fn handle(&self) -> HubHandle<H> {
        HubHandle {
            events: self.events.clone(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &DevicePool<H, S> {
        &self.pool
    }

    /// Process events until [`HubEvent::Shutdown`].
    pub async fn run(mut self) {
        let background = self.spawn_background_tasks();
        info!("hub running");
        while let Some(event) = self.mailbox.recv().await {
            if matches!(event, HubEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
        }
        for task in background {
            task.abort();
        }
        self.pool.shutdown();
        info!("hub stopped");
    }

    fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let defaults = self.pool.defaults();
        let mut tasks = Vec::new();

        let period = Duration::from_secs(defaults.periodic_filter_interval_secs.max(1));
        let events = self.events.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if events.send(HubEvent::PeriodicTick).is_err() {
                    break;
                }
            }
        }));

        let period = Duration::from_secs(defaults.flag_poll_interval_secs.max(1));
        let events = self.events.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if events.send(HubEvent::FlagPollTick).is_err() {
                    break;
                }
            }
        }));
        tasks
    }

    /// Apply one event to the pool.
    pub async fn handle_event(&mut self, event: HubEvent<H>) {
        match event {
            HubEvent::Discovered { channel, handle } => {
                if let Err(error) = self.pool.handle_discovered(channel, handle).await {
                    warn!(%channel, %error, "ignoring discovered device");
                }
            }
            HubEvent::Injected { record, handle, reply } => {
                let result = self.pool.inject_device(*record, handle).await;
                let _ = reply.send(result);
            }
            HubEvent::Polled { channel, result } => {
                self.pool.handle_poll_result(channel, result).await;
            }
            HubEvent::Offline { channel } => self.pool.go_offline(channel).await,
            HubEvent::StaleTimer { channel, generation } => {
                self.pool.handle_stale_timer(channel, generation).await;
            }
            HubEvent::PeriodicTick => {
                self.pool.run_periodic_filters().await;
            }
            HubEvent::FlagPollTick => self.poll_flags(),
            HubEvent::FlagsFetched { url, flags } => self.pool.update_flags(&url, flags),
            HubEvent::DeferredCommand {
                channel,
                command,
                trigger_switch_position,
                filters,
            } => {
                self.pool
                    .handle_deferred_command(channel, command, trigger_switch_position, filters)
                    .await;
            }
            HubEvent::Command { request, reply } => {
                let result = self.execute(request).await;
                let _ = reply.send(result);
            }
            HubEvent::SetPeriodicSuspended {
                channel,
                suspended,
                reply,
            } => {
                let result = if suspended {
                    self.pool.suspend_periodic_filters(channel)
                } else {
                    self.pool.resume_periodic_filters(channel)
                };
                let _ = reply.send(result);
            }
            HubEvent::Snapshots { reply } => {
                let _ = reply.send(self.pool.snapshots());
            }
            HubEvent::Shutdown => self.pool.shutdown(),
        }
    }

    /// Fetch the watched flag sources off the hub task. The set is read on
    /// every tick so sources of injected devices are picked up.
    fn poll_flags(&self) {
        let urls = self.pool.watched_flag_urls();
        if urls.is_empty() {
            debug!("no external flag sources to poll");
            return;
        }
        let events = self.events.clone();
        let flags = self.flags.clone();
        tokio::spawn(async move {
            for url in urls {
                match flags.fetch_flags(&url).await {
                    Ok(values) => {
                        if events.send(HubEvent::FlagsFetched { url, flags: values }).is_err() {
                            return;
                        }
                    }
                    Err(error) => warn!(%url, %error, "failed to fetch external flags"),
                }
            }
        });
    }

    async fn execute(&mut self, request: CommandRequest) -> Result<CommandOutcome, HubError> {
        match request {
            CommandRequest::SetPower { channel, on } => {
                self.pool
                    .set_power_state(channel, on, CommandOrigin::User)
                    .await
            }
            CommandRequest::SetLight { channel, cmd } => {
                self.pool
                    .set_light_state(channel, cmd, CommandOrigin::User)
                    .await
            }
            CommandRequest::Toggle { channel } => self.pool.toggle_power_state(channel).await,
            CommandRequest::ApplyPreset { channel, preset } => {
                self.pool.apply_preset(channel, &preset).await
            }
        }
    }
}
