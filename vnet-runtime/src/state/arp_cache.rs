use crate::config::{config_lines, parse_ipv4, InitError};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::info;
use vnet_packets::MacAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// IPv4 to MAC bindings. Entries come from the static file or from accepted ARP replies,
/// and stay until the router is dropped.
#[derive(Default)]
pub struct ArpCache {
    table: RwLock<HashMap<Ipv4Addr, ArpEntry>>,
}

impl ArpCache {
    pub fn new() -> Self {
        ArpCache {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Loads `ip mac` lines, the MAC written as six colon separated hex octets.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InitError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| InitError::io(path, e))?;

        let cache = ArpCache::new();
        for (line, fields) in config_lines(&contents) {
            if fields.len() != 2 {
                return Err(InitError::parse(
                    path,
                    line,
                    format!("expected 2 fields, found {}", fields.len()),
                ));
            }
            let ip = parse_ipv4(path, line, fields[0])?;
            let mac = fields[1].parse::<MacAddr>().map_err(|reason| {
                InitError::parse(path, line, format!("{} {:?}", reason, fields[1]))
            })?;
            cache.insert(mac, ip);
        }

        info!(path = %path.display(), entries = cache.len(), "loaded ARP cache\n{}", cache);
        Ok(cache)
    }

    /// Returns a copy of the entry so no lock outlives the call.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<ArpEntry> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(&ip).copied()
    }

    /// Binds `ip` to `mac`, replacing any previous binding. Returns true if `ip` was new.
    pub fn insert(&self, mac: MacAddr, ip: Ipv4Addr) -> bool {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.insert(ip, ArpEntry { ip, mac }).is_none()
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

impl fmt::Display for ArpCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<&ArpEntry> = table.values().collect();
        entries.sort_by_key(|entry| entry.ip);
        writeln!(f, "IP\t\tMAC")?;
        for entry in entries {
            writeln!(f, "{}\t{}", entry.ip, entry.mac)?;
        }
        Ok(())
    }
}
