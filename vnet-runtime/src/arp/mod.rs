//! Address resolution for the router, RFC 826.
//!
//! The router answers requests for its own interface addresses and resolves next hops it
//! has no binding for. A resolution broadcasts a request, retries on a fixed interval, and
//! holds the frames waiting on that next hop until a reply arrives or the retries run out.
mod resolver;
pub use self::resolver::*;

use crate::device::Interface;
use std::net::{IpAddr, Ipv4Addr};
use vnet_packets::{ArpFrame, ArpHardwareType, ArpOp, EthernetFrame, MacAddr, IPV4_ETHER_TYPE};

/// A broadcast request for `target`, sent from `iface`.
pub fn arp_request(iface: &Interface, target: Ipv4Addr) -> EthernetFrame {
    let mut request = ArpFrame::default();
    request.set_hardware_type(ArpHardwareType::Ethernet as u16);
    request.set_protocol_type(IPV4_ETHER_TYPE);
    request.set_opcode(ArpOp::Request as u16);
    request.set_sender_hardware_addr(iface.mac);
    request.set_sender_protocol_addr(IpAddr::V4(iface.ip));
    request.set_target_hardware_addr(MacAddr::ZERO);
    request.set_target_protocol_addr(IpAddr::V4(target));

    let frame = request.ethernet_mut();
    frame.set_dest_mac(MacAddr::BROADCAST);
    frame.set_src_mac(iface.mac);
    request.frame()
}

/// The reply `iface` owes the sender of `request`. Returns `None` if the request does not
/// carry Ethernet and IPv4 sender addresses.
pub fn arp_reply(request: &ArpFrame, iface: &Interface) -> Option<EthernetFrame> {
    let requester_mac = request.sender_mac_addr()?;
    let requester_ip = request.sender_ipv4_addr()?;

    let mut reply = ArpFrame::default();
    reply.set_hardware_type(ArpHardwareType::Ethernet as u16);
    reply.set_protocol_type(IPV4_ETHER_TYPE);
    reply.set_opcode(ArpOp::Reply as u16);
    reply.set_sender_hardware_addr(iface.mac);
    reply.set_sender_protocol_addr(IpAddr::V4(iface.ip));
    reply.set_target_hardware_addr(requester_mac);
    reply.set_target_protocol_addr(IpAddr::V4(requester_ip));

    let frame = reply.ethernet_mut();
    frame.set_dest_mac(requester_mac);
    frame.set_src_mac(iface.mac);
    Some(reply.frame())
}
