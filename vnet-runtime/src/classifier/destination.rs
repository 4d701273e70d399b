use crate::classifier::Classifier;
use crate::device::Interfaces;
use std::net::Ipv4Addr;
use vnet_packets::{IcmpType, IpProtocol, Ipv4Packet};

/// What a packet addressed to the router itself is carrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalKind {
    /// TCP or UDP, nothing listens on the router so the port is unreachable.
    Transport,
    EchoRequest,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Addressed to one of the router's interface addresses, carried here.
    Local(Ipv4Addr, LocalKind),
    Remote(Ipv4Addr),
}

/// Splits IPv4 traffic into what the router must answer and what it must forward.
pub struct ByDestination {
    interfaces: Interfaces,
}

impl ByDestination {
    pub fn new(interfaces: Interfaces) -> Self {
        ByDestination { interfaces }
    }
}

impl Classifier for ByDestination {
    type Packet = Ipv4Packet;
    type Class = Destination;

    fn classify(&self, packet: &Self::Packet) -> Self::Class {
        let dest = packet.dest_addr();
        if self.interfaces.with_ip(dest).is_none() {
            return Destination::Remote(dest);
        }

        let kind = match packet.protocol() {
            IpProtocol::TCP | IpProtocol::UDP => LocalKind::Transport,
            IpProtocol::ICMP if packet.payload().first() == Some(&(IcmpType::EchoRequest as u8)) => {
                LocalKind::EchoRequest
            }
            _ => LocalKind::Other,
        };
        Destination::Local(dest, kind)
    }
}
