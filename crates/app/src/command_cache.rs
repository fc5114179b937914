//! Command cache — the latest unapplied commands of one device.
//!
//! Power and light commands occupy separate slots. A power command replaces
//! the cached one only when it is newer; light commands merge, with the more
//! recent of the two dominant on overlapping parameters.

use lumenhub_domain::command::{Command, CommandObject};
use lumenhub_domain::time::Timestamp;

#[derive(Debug, Clone, PartialEq)]
struct Slot<T> {
    value: T,
    trigger_switch_position: Option<bool>,
    cached_at: Timestamp,
}

/// A command taken out of the cache for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCommand {
    pub command: Command,
    pub trigger_switch_position: Option<bool>,
    pub cached_at: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandCache {
    power: Option<Slot<bool>>,
    light: Option<Slot<CommandObject>>,
}

impl CommandCache {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.power.is_none() && self.light.is_none()
    }

    pub fn cache(&mut self, command: Command, trigger_switch_position: Option<bool>, ts: Timestamp) {
        match command {
            Command::Power(on) => {
                if self.power.as_ref().is_some_and(|slot| slot.cached_at >= ts) {
                    return;
                }
                self.power = Some(Slot {
                    value: on,
                    trigger_switch_position,
                    cached_at: ts,
                });
            }
            Command::Light(cmd) => {
                let slot = match self.light.take() {
                    Some(cached) if cached.cached_at > ts => Slot {
                        value: cmd.merged(&cached.value),
                        ..cached
                    },
                    Some(cached) => Slot {
                        value: cached.value.merged(&cmd),
                        trigger_switch_position,
                        cached_at: ts,
                    },
                    None => Slot {
                        value: cmd,
                        trigger_switch_position,
                        cached_at: ts,
                    },
                };
                self.light = Some(slot);
            }
        }
    }

    /// Cached power position, if any.
    #[must_use]
    pub fn power(&self) -> Option<bool> {
        self.power.as_ref().map(|slot| slot.value)
    }

    #[must_use]
    pub fn light(&self) -> Option<&CommandObject> {
        self.light.as_ref().map(|slot| &slot.value)
    }

    /// Empty the cache, returning the non-empty entries power first.
    pub fn take(&mut self) -> Vec<CachedCommand> {
        let power = self.power.take().map(|slot| CachedCommand {
            command: Command::Power(slot.value),
            trigger_switch_position: slot.trigger_switch_position,
            cached_at: slot.cached_at,
        });
        let light = self
            .light
            .take()
            .filter(|slot| !slot.value.is_empty())
            .map(|slot| CachedCommand {
                command: Command::Light(slot.value),
                trigger_switch_position: slot.trigger_switch_position,
                cached_at: slot.cached_at,
            });
        power.into_iter().chain(light).collect()
    }
}
