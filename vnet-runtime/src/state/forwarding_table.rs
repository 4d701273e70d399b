use crate::device::Interface;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use vnet_packets::MacAddr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardingEntry {
    pub interface: Interface,
    pub last_seen: Instant,
}

/// MAC to interface bindings learned by a switch.
#[derive(Default)]
pub struct ForwardingTable {
    table: RwLock<HashMap<MacAddr, ForwardingEntry>>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        ForwardingTable {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// The interface `mac` was last seen on, regardless of age.
    pub fn lookup(&self, mac: MacAddr) -> Option<Interface> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(&mac).map(|entry| entry.interface.clone())
    }

    pub fn entry(&self, mac: MacAddr) -> Option<ForwardingEntry> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(&mac).cloned()
    }

    /// Records a sighting of `mac` on `interface`, replacing any older binding.
    pub fn learn(&self, mac: MacAddr, interface: &Interface, now: Instant) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        match table.get_mut(&mac) {
            Some(entry) => {
                if entry.interface != *interface {
                    entry.interface = interface.clone();
                }
                if now > entry.last_seen {
                    entry.last_seen = now;
                }
            }
            None => {
                table.insert(
                    mac,
                    ForwardingEntry {
                        interface: interface.clone(),
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Drops every entry older than `max_age` at `now`, returning how many were removed.
    /// An entry refreshed after `now` was taken has a zero age and survives.
    pub fn evict_older_than(&self, now: Instant, max_age: Duration) -> usize {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let before = table.len();
        table.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= max_age);
        before - table.len()
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
