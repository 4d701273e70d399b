//! The layer 2 learning switch.
use crate::device::{Device, FrameSender, Interface, Interfaces};
use crate::state::ForwardingTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};
use vnet_packets::EthernetFrame;

/// How often the aging task sweeps the forwarding table.
pub const AGING_INTERVAL: Duration = Duration::from_secs(1);
/// Entries not refreshed for longer than this are evicted.
pub const ENTRY_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Switch {
    interfaces: Interfaces,
    table: ForwardingTable,
    sender: Arc<dyn FrameSender>,
}

impl Switch {
    pub fn new(interfaces: Interfaces, sender: Arc<dyn FrameSender>) -> Self {
        Switch {
            interfaces,
            table: ForwardingTable::new(),
            sender,
        }
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    pub fn forwarding_table(&self) -> &ForwardingTable {
        &self.table
    }

    /// Evicts entries older than `ENTRY_TIMEOUT` at `now`. Returns how many were evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let evicted = self.table.evict_older_than(now, ENTRY_TIMEOUT);
        if evicted > 0 {
            info!(evicted, remaining = self.table.len(), "aged out forwarding entries");
        }
        evicted
    }

    /// Spawns the aging task on the current tokio runtime. It runs until aborted through the
    /// returned handle or until the runtime shuts down.
    pub fn start_aging(self: &Arc<Self>) -> JoinHandle<()> {
        let switch = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(AGING_INTERVAL);
            loop {
                interval.tick().await;
                switch.sweep(Instant::now());
            }
        })
    }
}

impl Device for Switch {
    fn handle_frame(&self, frame: EthernetFrame, in_iface: &Interface) {
        let src_mac = frame.src_mac();
        let dest_mac = frame.dest_mac();
        trace!(device = "switch", iface = %in_iface.name, %src_mac, %dest_mac, "received frame");

        match self.table.lookup(dest_mac) {
            Some(out_iface) => self.sender.send_frame(frame, &out_iface),
            None => {
                debug!(%dest_mac, iface = %in_iface.name, "unknown destination, flooding");
                for out_iface in self.interfaces.iter().filter(|iface| iface.name != in_iface.name) {
                    self.sender.send_frame(frame.clone(), out_iface);
                }
            }
        }

        self.table.learn(src_mac, in_iface, Instant::now());
    }
}
