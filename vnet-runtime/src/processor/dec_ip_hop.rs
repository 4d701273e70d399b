use crate::processor::Processor;
use vnet_packets::Ipv4Packet;

/// Decrements the TTL of an IPv4 packet that is about to be forwarded and refreshes its
/// header checksum. A packet that would leave with a TTL of 0 is consumed.
#[derive(Default)]
pub struct DecIpv4HopLimit {}

impl DecIpv4HopLimit {
    pub fn new() -> DecIpv4HopLimit {
        DecIpv4HopLimit {}
    }
}

impl Processor for DecIpv4HopLimit {
    type Input = Ipv4Packet;
    type Output = Ipv4Packet;

    fn process(&mut self, mut packet: Self::Input) -> Option<Self::Output> {
        match packet.ttl() {
            0 | 1 => None,
            ttl => {
                packet.set_ttl(ttl - 1);
                packet.set_checksum();
                Some(packet)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use vnet_packets::EthernetFrame;

    fn packet_with_ttl(ttl: u8) -> Ipv4Packet {
        let mac_data: Vec<u8> = vec![0xde, 0xad, 0xbe, 0xef, 0xff, 0xff, 1, 2, 3, 4, 5, 6, 8, 0];
        let ip_data: Vec<u8> = vec![
            0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];

        let mut frame = EthernetFrame::from_buffer(mac_data, 0).unwrap();
        frame.set_payload(&ip_data);

        let mut packet = Ipv4Packet::try_from(frame).unwrap();
        packet.set_ttl(ttl);
        packet.set_checksum();
        packet
    }

    #[test]
    fn test_dec_ipv4_hop_limit() {
        let mut elem = DecIpv4HopLimit::new();

        let packet = elem.process(packet_with_ttl(64)).unwrap();

        assert_eq!(packet.ttl(), 63);
        assert_eq!(packet.checksum(), packet.calculate_checksum());
    }

    #[test]
    fn test_dec_ipv4_hop_limit_boundary() {
        let mut elem = DecIpv4HopLimit::new();

        let packet = elem.process(packet_with_ttl(2)).unwrap();
        assert_eq!(packet.ttl(), 1);
        assert!(packet.validate_checksum());

        assert!(elem.process(packet_with_ttl(1)).is_none());
        assert!(elem.process(packet_with_ttl(0)).is_none());
    }
}
