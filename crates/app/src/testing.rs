//! Hand-written test doubles shared by the unit tests of this crate.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeZone, Utc};
use lumenhub_domain::change::ChangeInfo;
use lumenhub_domain::command::{Command, CommandObject};
use lumenhub_domain::device::DeviceKind;
use lumenhub_domain::error::HubError;
use lumenhub_domain::event::DeviceSnapshot;
use lumenhub_domain::raw_state::RawState;
use lumenhub_domain::time::Timestamp;

use crate::ports::{BroadcastSink, DeviceHandle};

/// Instant on 2024-06-21 (UTC) at the given wall-clock time.
pub fn midsummer(hour: u32, minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 21, hour, minute, 0).unwrap()
}

// ── Recording device handle ─────────────────────────────────────────

struct SpyDevice {
    state: RawState,
    calls: Vec<Command>,
    failures_left: u32,
    polls: u32,
}

/// Virtual-kind device recording every actuation attempt.
#[derive(Clone)]
pub struct SpyHandle {
    inner: Arc<Mutex<SpyDevice>>,
}

impl SpyHandle {
    pub fn new(on: bool) -> Self {
        let mut state = RawState::default();
        state.apply_command(DeviceKind::Virtual, &CommandObject::power(on));
        state.insert("source", serde_json::json!("external"));
        Self {
            inner: Arc::new(Mutex::new(SpyDevice {
                state,
                calls: Vec::new(),
                failures_left: 0,
                polls: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpyDevice> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Actuation attempts so far, failed ones included.
    pub fn calls(&self) -> Vec<Command> {
        self.lock().calls.clone()
    }

    pub fn polls(&self) -> u32 {
        self.lock().polls
    }

    pub fn fail_next(&self, count: u32) {
        self.lock().failures_left = count;
    }

    /// Flip the device outside the hub, as a wall switch would.
    pub fn switch_externally(&self, on: bool) -> RawState {
        let mut device = self.lock();
        device
            .state
            .apply_command(DeviceKind::Virtual, &CommandObject::power(on));
        device.state.insert("source", serde_json::json!("external"));
        device.state.clone()
    }

    pub fn state(&self) -> RawState {
        self.lock().state.clone()
    }

    fn actuate(&self, command: Command) -> Result<Option<RawState>, HubError> {
        let mut device = self.lock();
        device.calls.push(command.clone());
        if device.failures_left > 0 {
            device.failures_left -= 1;
            return Err(HubError::Transport("device unreachable".into()));
        }
        let cmd = match command {
            Command::Power(on) => CommandObject::power(on),
            Command::Light(cmd) => cmd,
        };
        device.state.apply_command(DeviceKind::Virtual, &cmd);
        device.state.insert("source", serde_json::json!("hub"));
        Ok(Some(device.state.clone()))
    }
}

impl DeviceHandle for SpyHandle {
    fn set_power(
        &self,
        on: bool,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send {
        let result = self.actuate(Command::Power(on));
        async move { result }
    }

    fn set_light(
        &self,
        cmd: &CommandObject,
    ) -> impl Future<Output = Result<Option<RawState>, HubError>> + Send {
        let result = self.actuate(Command::Light(cmd.clone()));
        async move { result }
    }

    fn poll(&self) -> impl Future<Output = Result<RawState, HubError>> + Send {
        let mut device = self.lock();
        device.polls += 1;
        let result = if device.failures_left > 0 {
            device.failures_left -= 1;
            Err(HubError::Transport("device unreachable".into()))
        } else {
            Ok(device.state.clone())
        };
        drop(device);
        async move { result }
    }
}

// ── Recording broadcast sink ────────────────────────────────────────

#[derive(Default)]
pub struct SpySink {
    updates: Mutex<Vec<(DeviceSnapshot, Option<ChangeInfo>)>>,
}

impl SpySink {
    pub fn updates(&self) -> Vec<(DeviceSnapshot, Option<ChangeInfo>)> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state_changes(&self) -> Vec<ChangeInfo> {
        self.updates()
            .into_iter()
            .filter_map(|(_, change)| change)
            .collect()
    }

    fn push(&self, snapshot: DeviceSnapshot, change: Option<ChangeInfo>) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((snapshot, change));
    }
}

impl BroadcastSink for SpySink {
    fn emit_device_state_update(
        &self,
        snapshot: DeviceSnapshot,
        change: ChangeInfo,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        self.push(snapshot, Some(change));
        async { Ok(()) }
    }

    fn emit_device_update(
        &self,
        snapshot: DeviceSnapshot,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        self.push(snapshot, None);
        async { Ok(()) }
    }
}
