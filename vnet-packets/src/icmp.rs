use crate::{IpProtocol, Ipv4Packet};
use std::convert::TryFrom;

/// ICMPv4 message types used by the router.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

/// Codes for `IcmpType::DestinationUnreachable`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnreachableCode {
    Net = 0,
    Host = 1,
    Protocol = 2,
    Port = 3,
}

// type(1) code(1) checksum(2)
const ICMP_HDR_LEN: usize = 4;

///
/// Ipv4Packet wrapper with getters/setters for the ICMP message it carries, RFC 792
/// https://tools.ietf.org/html/rfc792
///
/// The "body" is everything after the checksum: for echo messages the identifier,
/// sequence number and data, for error messages the unused word and the quoted datagram.
///
#[derive(Clone, Debug)]
pub struct IcmpPacket {
    packet: Ipv4Packet,
}

impl IcmpPacket {
    /// Builds a standalone ICMP message in a fresh IPv4 header. Addresses and TTL are left
    /// for the caller; the ICMP checksum is filled in.
    pub fn new(icmp_type: u8, code: u8, body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(ICMP_HDR_LEN + body.len());
        payload.extend_from_slice(&[icmp_type, code, 0, 0]);
        payload.extend_from_slice(body);

        let mut packet = Ipv4Packet::empty();
        packet.set_protocol(IpProtocol::ICMP);
        packet.set_payload(&payload);

        let mut icmp = IcmpPacket { packet };
        icmp.set_checksum();
        icmp
    }

    pub fn icmp_type(&self) -> u8 {
        self.packet.data[self.packet.payload_offset]
    }

    pub fn code(&self) -> u8 {
        self.packet.data[self.packet.payload_offset + 1]
    }

    pub fn checksum(&self) -> u16 {
        let start = self.packet.payload_offset + 2;
        u16::from_be_bytes([self.packet.data[start], self.packet.data[start + 1]])
    }

    pub fn body(&self) -> &[u8] {
        &self.packet.data[self.packet.payload_offset + ICMP_HDR_LEN..]
    }

    pub fn set_icmp_type(&mut self, icmp_type: u8) {
        let start = self.packet.payload_offset;
        self.packet.data[start] = icmp_type;
    }

    pub fn set_code(&mut self, code: u8) {
        let start = self.packet.payload_offset + 1;
        self.packet.data[start] = code;
    }

    /// The checksum over the ICMP header and body, with the checksum field taken as zero.
    pub fn calculate_checksum(&self) -> u16 {
        let message = &self.packet.data[self.packet.payload_offset..];
        let mut sum = message
            .chunks(2)
            .enumerate()
            .filter(|x| x.0 != 1)
            .fold(0, |acc: u32, x| {
                let word = match x.1 {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    [hi] => u16::from_be_bytes([*hi, 0]),
                    _ => 0,
                };
                acc + u32::from(word)
            });
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }

    pub fn validate_checksum(&self) -> bool {
        self.checksum() == self.calculate_checksum()
    }

    pub fn set_checksum(&mut self) {
        let checksum = self.calculate_checksum();
        let start = self.packet.payload_offset + 2;
        self.packet.data[start..start + 2].copy_from_slice(&checksum.to_be_bytes());
    }

    pub fn ipv4(&self) -> &Ipv4Packet {
        &self.packet
    }

    /// Mutable access to the enclosing IPv4 header. Changing the ICMP bytes through this
    /// handle leaves the ICMP checksum stale.
    pub fn ipv4_mut(&mut self) -> &mut Ipv4Packet {
        &mut self.packet
    }

    // Move ownership of the packet back to the caller
    pub fn packet(self) -> Ipv4Packet {
        self.packet
    }
}

impl TryFrom<Ipv4Packet> for IcmpPacket {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        if packet.protocol() != IpProtocol::ICMP {
            return Err("Packet does not carry ICMP");
        }
        if packet.payload().len() < ICMP_HDR_LEN {
            return Err("ICMP message is shorter than its header");
        }
        Ok(IcmpPacket { packet })
    }
}
