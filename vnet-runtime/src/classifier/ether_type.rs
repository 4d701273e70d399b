use crate::classifier::Classifier;
use vnet_packets::{EthernetFrame, ARP_ETHER_TYPE, IPV4_ETHER_TYPE};

/// The payloads a router knows how to handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Arp,
    Ipv4,
    Other(u16),
}

#[derive(Default)]
pub struct ByEtherType {}

impl ByEtherType {
    pub fn new() -> Self {
        ByEtherType {}
    }
}

impl Classifier for ByEtherType {
    type Packet = EthernetFrame;
    type Class = FrameKind;

    fn classify(&self, frame: &Self::Packet) -> Self::Class {
        match frame.ether_type() {
            ARP_ETHER_TYPE => FrameKind::Arp,
            IPV4_ETHER_TYPE => FrameKind::Ipv4,
            other => FrameKind::Other(other),
        }
    }
}
