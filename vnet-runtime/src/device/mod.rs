//! The edge between a device and whatever moves its frames: the interfaces a device owns,
//! the `FrameSender` it transmits through, and the `Device` ingress trait.
use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::warn;
use vnet_packets::{EthernetFrame, MacAddr};

/// Interface:
///
/// The read-only identity of one port on a device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interface {
    pub name: String,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
}

impl Interface {
    pub fn new(name: &str, mac: MacAddr, ip: Ipv4Addr, subnet_mask: Ipv4Addr) -> Self {
        Interface {
            name: String::from(name),
            mac,
            ip,
            subnet_mask,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} HW:{} IP:{} mask:{}",
            self.name, self.mac, self.ip, self.subnet_mask
        )
    }
}

/// The full set of interfaces on a device, in the order they were configured.
#[derive(Clone, Debug, Default)]
pub struct Interfaces {
    interfaces: Vec<Interface>,
}

impl Interfaces {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Interfaces { interfaces }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }

    /// The interface configured with `ip`, if the address belongs to this device.
    pub fn with_ip(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.ip == ip)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

/// Transmits fully formed frames out of an interface. Implementations must tolerate calls
/// from the frame handling path and from background resolution tasks at the same time.
pub trait FrameSender: Send + Sync {
    fn send_frame(&self, frame: EthernetFrame, iface: &Interface);
}

/// Every device receives frames through this single entry point.
pub trait Device {
    fn handle_frame(&self, frame: EthernetFrame, in_iface: &Interface);
}

/// A frame that left a device, tagged with the interface it left through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub iface: String,
    pub frame: EthernetFrame,
}

/// FrameSender that pushes every transmitted frame into a crossbeam channel. Whoever holds
/// the receiver decides where the frames go next: another device, a socket, a test.
#[derive(Clone)]
pub struct ChannelSender {
    sender: Sender<SentFrame>,
}

impl ChannelSender {
    pub fn new() -> (ChannelSender, Receiver<SentFrame>) {
        let (sender, receiver) = channel::unbounded();
        (ChannelSender { sender }, receiver)
    }
}

impl FrameSender for ChannelSender {
    fn send_frame(&self, frame: EthernetFrame, iface: &Interface) {
        let sent = SentFrame {
            iface: iface.name.clone(),
            frame,
        };
        if self.sender.send(sent).is_err() {
            warn!(iface = %iface.name, "frame receiver hung up, dropping frame");
        }
    }
}
