use crate::*;
use std::borrow::Cow;
use std::convert::TryFrom;
use std::net::Ipv4Addr;

const MIN_HEADER_LEN: usize = 20;

#[derive(Clone, Debug)]
pub struct Ipv4Packet {
    pub data: PacketData,
    pub layer2_offset: Option<usize>,
    pub layer3_offset: usize,
    pub payload_offset: usize,
}

impl Packet for Ipv4Packet {}

impl Ipv4Packet {
    /// Wraps a buffer whose IPv4 header starts at `layer3_offset`.
    ///
    /// Link layers pad short packets, so bytes past the total length field are
    /// trimmed off rather than rejected.
    pub fn from_buffer(
        mut data: PacketData,
        layer2_offset: Option<usize>,
        layer3_offset: usize,
    ) -> Result<Ipv4Packet, &'static str> {
        // Header of Ethernet Frame: 14 bytes
        // Header of IPv4 Frame: 20 bytes
        if data.len() < layer3_offset + MIN_HEADER_LEN {
            return Err("Data is too short to be an IPv4 Packet");
        }

        // Check version number
        let version: u8 = (data[layer3_offset] & 0xF0) >> 4;
        if version != 4 {
            return Err("Packet has incorrect version, is not Ipv4Packet");
        }

        // This is the header length in 32bit words
        let ihl = (data[layer3_offset] & 0x0F) as usize;
        if ihl * 4 < MIN_HEADER_LEN {
            return Err("Packet has invalid header length field");
        }

        // TotalLen is the 3rd and 4th byte of the IP Header
        let total_len =
            u16::from_be_bytes([data[layer3_offset + 2], data[layer3_offset + 3]]) as usize;
        if total_len < ihl * 4 || data.len() < total_len + layer3_offset {
            return Err("Packet has invalid total length field");
        }
        data.truncate(total_len + layer3_offset);

        Ok(Ipv4Packet {
            data,
            layer2_offset,
            layer3_offset,
            payload_offset: layer3_offset + (ihl * 4),
        })
    }

    /// A bare 20 byte header with version and IHL filled in, total length 20,
    /// and every other field zeroed.
    pub fn empty() -> Ipv4Packet {
        let mut data = vec![0; MIN_HEADER_LEN];
        data[0] = 0x45;
        data[3] = MIN_HEADER_LEN as u8;
        Ipv4Packet {
            data,
            layer2_offset: None,
            layer3_offset: 0,
            payload_offset: MIN_HEADER_LEN,
        }
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        self.addr_at(self.layer3_offset + 12)
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.data[self.layer3_offset + 12..self.layer3_offset + 16].copy_from_slice(&addr.octets());
    }

    pub fn dest_addr(&self) -> Ipv4Addr {
        self.addr_at(self.layer3_offset + 16)
    }

    pub fn set_dest_addr(&mut self, addr: Ipv4Addr) {
        self.data[self.layer3_offset + 16..self.layer3_offset + 20].copy_from_slice(&addr.octets());
    }

    pub fn ihl(&self) -> u8 {
        self.data[self.layer3_offset] & 0x0F
    }

    /// The raw header bytes, options included.
    pub fn header(&self) -> &[u8] {
        &self.data[self.layer3_offset..self.payload_offset]
    }

    /// The header and payload, without any link layer bytes in front.
    pub fn layer3_bytes(&self) -> &[u8] {
        &self.data[self.layer3_offset..]
    }

    pub fn payload(&self) -> Cow<[u8]> {
        Cow::from(&self.data[self.payload_offset..])
    }

    pub fn set_payload(&mut self, payload: &[u8]) {
        let payload_len = payload.len();

        self.data.truncate(self.payload_offset);

        let total_len = (payload_len as u16 + u16::from(self.ihl() * 4)).to_be_bytes();
        self.data[self.layer3_offset + 2..=self.layer3_offset + 3].copy_from_slice(&total_len);

        self.data.reserve_exact(payload_len);
        self.data.extend(payload);
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.data[self.layer3_offset + 9])
    }

    pub fn set_protocol(&mut self, protocol: IpProtocol) {
        self.data[self.layer3_offset + 9] = u8::from(protocol);
    }

    pub fn total_len(&self) -> u16 {
        self.u16_at(self.layer3_offset + 2)
    }

    pub fn ttl(&self) -> u8 {
        self.data[self.layer3_offset + 8]
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.data[self.layer3_offset + 8] = ttl;
    }

    pub fn checksum(&self) -> u16 {
        self.u16_at(self.layer3_offset + 10)
    }

    pub fn dscp(&self) -> u8 {
        self.data[self.layer3_offset + 1] >> 2
    }

    pub fn identification(&self) -> u16 {
        self.u16_at(self.layer3_offset + 4)
    }

    /// Returns tuple of (Don't Fragment, More Fragments)
    pub fn flags(&self) -> (bool, bool) {
        let df = (self.data[self.layer3_offset + 6] & 0x40) != 0;
        let mf = (self.data[self.layer3_offset + 6] & 0x20) != 0;
        (df, mf)
    }

    /// Verifies the IP header checksum with a fully folded one's complement sum.
    pub fn validate_checksum(&self) -> bool {
        let full_sum = self
            .header()
            .chunks_exact(2)
            .fold(0, |acc: u32, x| acc + u32::from(u16::from_be_bytes([x[0], x[1]])));
        let (carry, mut sum) = (((full_sum & 0xFFFF_0000) >> 16), (full_sum & 0x0000_FFFF));
        sum += carry;
        sum += sum >> 16;
        0 == (!sum & 0xFFFF)
    }

    /// Calculates what the checksum should be set to given the current header.
    ///
    /// The carry out of the 16-bit sum is folded back in once. A second carry,
    /// produced only when that fold itself overflows, is dropped.
    pub fn calculate_checksum(&self) -> u16 {
        let full_sum = self
            .header()
            .chunks_exact(2)
            .enumerate()
            .filter(|x| x.0 != 5)
            .fold(0, |acc: u32, x| {
                acc + u32::from(u16::from_be_bytes([x.1[0], x.1[1]]))
            });
        let sum = ((full_sum & 0xFFFF_0000) >> 16) + (full_sum & 0x0000_FFFF);
        !(sum as u16)
    }

    /// Sets checksum field to valid value
    pub fn set_checksum(&mut self) {
        let new_checksum = self.calculate_checksum();
        self.data[self.layer3_offset + 10..=self.layer3_offset + 11]
            .copy_from_slice(&new_checksum.to_be_bytes());
    }

    fn u16_at(&self, start: usize) -> u16 {
        u16::from_be_bytes([self.data[start], self.data[start + 1]])
    }

    fn addr_at(&self, start: usize) -> Ipv4Addr {
        Ipv4Addr::new(
            self.data[start],
            self.data[start + 1],
            self.data[start + 2],
            self.data[start + 3],
        )
    }
}

/// Ipv4Packets are considered the same if they have the same data from the layer 3
/// header and onward. This function does not consider the data before the start of
/// the IPv4 header.
impl PartialEq for Ipv4Packet {
    fn eq(&self, other: &Self) -> bool {
        self.data[self.layer3_offset..] == other.data[other.layer3_offset..]
    }
}

impl Eq for Ipv4Packet {}

impl TryFrom<EthernetFrame> for Ipv4Packet {
    type Error = &'static str;

    fn try_from(frame: EthernetFrame) -> Result<Self, Self::Error> {
        Ipv4Packet::from_buffer(frame.data, Some(frame.layer2_offset), frame.payload_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use std::vec::Vec;

    fn frame_with(ip_data: &[u8]) -> EthernetFrame {
        let mac_data: Vec<u8> = vec![0xde, 0xad, 0xbe, 0xef, 0xff, 0xff, 1, 2, 3, 4, 5, 6, 8, 0];
        let mut frame = EthernetFrame::from_buffer(mac_data, 0).unwrap();
        frame.set_payload(ip_data);
        frame
    }

    #[test]
    fn ipv4_packet() {
        let ip_data: Vec<u8> = vec![
            0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];

        let packet = Ipv4Packet::try_from(frame_with(&ip_data)).unwrap();

        assert_eq!(packet.src_addr(), Ipv4Addr::new(192, 178, 128, 0));
        assert_eq!(packet.dest_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(packet.ihl(), 5);
        assert_eq!(packet.payload().len(), 0);
        assert_eq!(packet.protocol(), IpProtocol::UDP);
        assert_eq!(packet.total_len(), 20);
        assert_eq!(packet.ttl(), 64);
        assert_eq!(packet.checksum(), 0);
        assert_eq!(packet.dscp(), 0);
        assert_eq!(packet.identification(), 0);
        assert_eq!(packet.flags(), (false, false));
        assert_eq!(packet.layer2_offset, Some(0));
        assert_eq!(packet.layer3_offset, 14);
    }

    #[test]
    fn rejects_bad_headers() {
        let wrong_version: Vec<u8> = vec![
            0x65, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];
        assert!(Ipv4Packet::try_from(frame_with(&wrong_version)).is_err());

        let bad_total_len: Vec<u8> = vec![
            0x45, 0, 0, 40, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];
        assert!(Ipv4Packet::try_from(frame_with(&bad_total_len)).is_err());

        let short_ihl: Vec<u8> = vec![
            0x44, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];
        assert!(Ipv4Packet::try_from(frame_with(&short_ihl)).is_err());

        assert!(Ipv4Packet::try_from(frame_with(&[0x45, 0, 0])).is_err());
    }

    #[test]
    fn link_layer_padding_is_trimmed() {
        let mut ip_data: Vec<u8> = vec![
            0x45, 0, 0, 22, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1, 0xaa, 0xbb,
        ];
        ip_data.resize(46, 0);
        let packet = Ipv4Packet::try_from(frame_with(&ip_data)).unwrap();
        assert_eq!(packet.payload().as_ref(), &[0xaa, 0xbb]);
        assert_eq!(packet.data.len(), 14 + 22);
    }

    #[test]
    fn validate_checksum() {
        let invalid_checksum_data: Vec<u8> = vec![
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let packet = Ipv4Packet::try_from(frame_with(&invalid_checksum_data)).unwrap();
        assert!(!packet.validate_checksum());

        let valid_checksum_data: Vec<u8> = vec![
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0xc0, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let mut frame: EthernetFrame = packet.try_into().unwrap();
        frame.set_payload(&valid_checksum_data);
        let packet = Ipv4Packet::try_from(frame).unwrap();
        assert!(packet.validate_checksum());
        assert_eq!(packet.calculate_checksum(), 0xb8c0);
    }

    #[test]
    fn set_checksum() {
        let ip_data: Vec<u8> = vec![
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let mut packet = Ipv4Packet::try_from(frame_with(&ip_data)).unwrap();
        assert!(!packet.validate_checksum());
        packet.set_checksum();
        assert!(packet.validate_checksum());
        assert_eq!(packet.checksum(), 0xb8c0);
    }

    #[test]
    fn single_fold_drops_second_carry() {
        // Words sum to 0x1FFFF. Folding once gives 0x10000 and that carry is dropped,
        // where a full fold would have produced 0x0001.
        let mut packet = Ipv4Packet::empty();
        packet.data = vec![
            0xff, 0xff, 0xff, 0xff, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(packet.calculate_checksum(), 0xffff);
    }

    #[test]
    fn empty_packet_payload() {
        let mut packet = Ipv4Packet::empty();
        assert_eq!(packet.ihl(), 5);
        assert_eq!(packet.total_len(), 20);
        packet.set_payload(&[1, 2, 3, 4]);
        packet.set_protocol(IpProtocol::ICMP);
        assert_eq!(packet.total_len(), 24);
        assert_eq!(packet.protocol(), IpProtocol::ICMP);
        assert_eq!(packet.header().len(), 20);
        assert_eq!(packet.layer3_bytes().len(), 24);
    }
}
