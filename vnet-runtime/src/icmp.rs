use crate::device::Interface;
use std::cmp;
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use vnet_packets::{
    EthernetFrame, IcmpPacket, IcmpType, Ipv4Packet, MacAddr, UnreachableCode,
};

/// How much of the offending datagram's payload is quoted in an error message.
const QUOTED_PAYLOAD_LEN: usize = 8;

const ICMP_TTL: u8 = 64;

/// Helper to generate ICMPv4 messages back to the sender of a packet
///
/// Every message leaves through the interface the offending packet arrived on, sourced from
/// that interface's addresses and addressed to the packet's original source MAC and IP.
pub struct IcmpGenerator<'a> {
    iface: &'a Interface,
    dest_mac: MacAddr,
}

impl<'a> IcmpGenerator<'a> {
    /// # Arguments
    ///
    /// * `iface` - The interface the offending packet was received on
    /// * `dest_mac` - The source MAC the offending packet carried when it arrived
    pub fn new(iface: &'a Interface, dest_mac: MacAddr) -> Self {
        IcmpGenerator { iface, dest_mac }
    }

    /// Time exceeded in transit (11/0)
    pub fn time_exceeded(&self, packet: &Ipv4Packet) -> EthernetFrame {
        self.error(IcmpType::TimeExceeded, 0, packet)
    }

    /// Destination unreachable (3/code)
    pub fn unreachable(&self, code: UnreachableCode, packet: &Ipv4Packet) -> EthernetFrame {
        self.error(IcmpType::DestinationUnreachable, code as u8, packet)
    }

    /// Answers an echo request addressed to `local_ip`, echoing its identifier, sequence
    /// number and data. Returns `None` if `request` does not carry an ICMP message.
    pub fn echo_reply(&self, local_ip: Ipv4Addr, request: &Ipv4Packet) -> Option<EthernetFrame> {
        let request = IcmpPacket::try_from(request.clone()).ok()?;
        let reply = IcmpPacket::new(IcmpType::EchoReply as u8, 0, request.body());
        Some(self.encapsulate(reply, local_ip, request.ipv4().src_addr()))
    }

    // Error body: 4 unused bytes, the offending IP header, then the first 8 bytes of its
    // payload, or fewer if the payload is shorter
    fn error(&self, icmp_type: IcmpType, code: u8, packet: &Ipv4Packet) -> EthernetFrame {
        let payload = packet.payload();
        let quoted = &payload[..cmp::min(QUOTED_PAYLOAD_LEN, payload.len())];

        let mut body = Vec::with_capacity(4 + packet.header().len() + quoted.len());
        body.extend_from_slice(&[0; 4]);
        body.extend_from_slice(packet.header());
        body.extend_from_slice(quoted);

        let message = IcmpPacket::new(icmp_type as u8, code, &body);
        self.encapsulate(message, self.iface.ip, packet.src_addr())
    }

    fn encapsulate(&self, message: IcmpPacket, src: Ipv4Addr, dest: Ipv4Addr) -> EthernetFrame {
        let mut packet = message.packet();
        packet.set_ttl(ICMP_TTL);
        packet.set_src_addr(src);
        packet.set_dest_addr(dest);
        packet.set_checksum();

        let mut frame = EthernetFrame::encap_ipv4(packet);
        frame.set_src_mac(self.iface.mac);
        frame.set_dest_mac(self.dest_mac);
        frame
    }
}
