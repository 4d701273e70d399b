use crate::config::{config_lines, parse_ipv4, InitError};
use crate::device::{Interface, Interfaces};
use ipnet::Ipv4Net;
use prefix_trie::PrefixMap;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::info;

/// A single static route. A gateway of 0.0.0.0 marks a directly connected network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub interface: Interface,
}

impl RouteEntry {
    /// The address frames for `dest` should be delivered to at layer 2.
    pub fn next_hop(&self, dest: Ipv4Addr) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            dest
        } else {
            self.gateway
        }
    }
}

/// Longest prefix match table, immutable once built.
pub struct RouteTable {
    routes: PrefixMap<Ipv4Net, RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable {
            routes: PrefixMap::new(),
        }
    }

    /// Loads `destination gateway mask interface` lines. Every interface named must exist
    /// in `interfaces`.
    pub fn load<P: AsRef<Path>>(path: P, interfaces: &Interfaces) -> Result<Self, InitError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| InitError::io(path, e))?;

        let mut table = RouteTable::new();
        for (line, fields) in config_lines(&contents) {
            if fields.len() != 4 {
                return Err(InitError::parse(
                    path,
                    line,
                    format!("expected 4 fields, found {}", fields.len()),
                ));
            }
            let destination = parse_ipv4(path, line, fields[0])?;
            let gateway = parse_ipv4(path, line, fields[1])?;
            let mask = parse_ipv4(path, line, fields[2])?;
            let interface = interfaces
                .get(fields[3])
                .ok_or_else(|| InitError::UnknownInterface {
                    path: path.to_path_buf(),
                    line,
                    name: String::from(fields[3]),
                })?;
            let prefix_len = prefix_len(mask).ok_or_else(|| InitError::NonContiguousMask {
                path: path.to_path_buf(),
                line,
                mask,
            })?;

            table.insert(
                prefix_len,
                RouteEntry {
                    destination,
                    gateway,
                    mask,
                    interface: interface.clone(),
                },
            );
        }

        info!(path = %path.display(), routes = table.len(), "loaded route table\n{}", table);
        Ok(table)
    }

    /// One directly connected route per interface, covering the interface's own subnet.
    pub fn from_interfaces(interfaces: &Interfaces) -> Result<Self, InitError> {
        let mut table = RouteTable::new();
        for interface in interfaces.iter() {
            let mask = interface.subnet_mask;
            let prefix_len = prefix_len(mask).ok_or_else(|| InitError::InterfaceMask {
                name: interface.name.clone(),
                mask,
            })?;
            table.insert(
                prefix_len,
                RouteEntry {
                    destination: Ipv4Addr::from(u32::from(interface.ip) & u32::from(mask)),
                    gateway: Ipv4Addr::UNSPECIFIED,
                    mask,
                    interface: interface.clone(),
                },
            );
        }
        info!(routes = table.len(), "built connected routes\n{}", table);
        Ok(table)
    }

    /// The most specific route covering `dest`.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&RouteEntry> {
        self.routes
            .get_lpm(&Ipv4Net::from(dest))
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.routes.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, prefix_len: u8, entry: RouteEntry) {
        // A /0..=/32 length is always valid, trunc() clears host bits left in the file.
        if let Ok(net) = Ipv4Net::new(entry.destination, prefix_len) {
            self.routes.insert(net.trunc(), entry);
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        RouteTable::new()
    }
}

/// The prefix length of a netmask, or None when its one bits are not contiguous.
fn prefix_len(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let len = bits.leading_ones();
    if bits.checked_shl(len).unwrap_or(0) != 0 {
        return None;
    }
    Some(len as u8)
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Destination\tGateway\t\tMask\t\tIface")?;
        for (_, entry) in self.routes.iter() {
            writeln!(
                f,
                "{}\t{}\t\t{}\t{}",
                entry.destination, entry.gateway, entry.mask, entry.interface.name
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|(_, entry)| entry))
            .finish()
    }
}
