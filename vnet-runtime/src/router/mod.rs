//! The layer 3 router.
//!
//! Frames arrive through `Device::handle_frame` and leave through the router's
//! `FrameSender`. Every frame ends in exactly one of: a send, a place in a resolution queue,
//! or a drop. Next hops without an ARP binding are resolved by tokio tasks spawned on the
//! runtime the router was built in.
use crate::arp::{arp_reply, ReplyOutcome, ResolverConfig, Submitted, TaskRegistry, PendingFrame};
use crate::classifier::{ByDestination, ByEtherType, Classifier, Destination, FrameKind, LocalKind};
use crate::config::{InitError, RouterConfig};
use crate::device::{Device, FrameSender, Interface, Interfaces};
use crate::icmp::IcmpGenerator;
use crate::processor::{DecIpv4HopLimit, Processor};
use crate::state::{ArpCache, RouteEntry, RouteTable};
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace};
use vnet_packets::{ArpFrame, ArpOp, EthernetFrame, Ipv4Packet, MacAddr, UnreachableCode};

pub struct Router {
    interfaces: Interfaces,
    route_table: RouteTable,
    arp_cache: ArpCache,
    registry: Arc<TaskRegistry>,
    sender: Arc<dyn FrameSender>,
    resolver: ResolverConfig,
    runtime: Handle,
    by_ether_type: ByEtherType,
    by_destination: ByDestination,
}

impl Router {
    /// Builds a router that resolves next hops on the tokio runtime this is called from.
    pub fn new(
        interfaces: Interfaces,
        route_table: RouteTable,
        arp_cache: ArpCache,
        sender: Arc<dyn FrameSender>,
        resolver: ResolverConfig,
    ) -> Result<Self, InitError> {
        let runtime = Handle::try_current()?;
        Ok(Router {
            by_destination: ByDestination::new(interfaces.clone()),
            by_ether_type: ByEtherType::new(),
            interfaces,
            route_table,
            arp_cache,
            registry: Arc::new(TaskRegistry::new()),
            sender,
            resolver,
            runtime,
        })
    }

    /// Loads the route table and ARP cache named by `config`. Without a route table file the
    /// router gets one connected route per interface.
    pub fn from_config(
        interfaces: Interfaces,
        sender: Arc<dyn FrameSender>,
        config: &RouterConfig,
    ) -> Result<Self, InitError> {
        let route_table = match &config.route_table {
            Some(path) => RouteTable::load(path, &interfaces)?,
            None => RouteTable::from_interfaces(&interfaces)?,
        };
        let arp_cache = match &config.arp_cache {
            Some(path) => ArpCache::load(path)?,
            None => ArpCache::new(),
        };
        Router::new(interfaces, route_table, arp_cache, sender, config.resolver)
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.route_table
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp_cache
    }

    /// Next hops currently being resolved.
    pub fn resolutions(&self) -> &TaskRegistry {
        &self.registry
    }

    fn handle_arp(&self, frame: EthernetFrame, in_iface: &Interface) {
        let arp = match ArpFrame::try_from(frame) {
            Ok(arp) => arp,
            Err(reason) => {
                debug!(iface = %in_iface.name, reason, "dropping malformed ARP frame");
                return;
            }
        };
        if arp.target_ipv4_addr() != Some(in_iface.ip) {
            trace!(iface = %in_iface.name, "dropping ARP frame for another host");
            return;
        }

        match arp.opcode() {
            op if op == ArpOp::Request as u16 => match arp_reply(&arp, in_iface) {
                Some(reply) => {
                    debug!(iface = %in_iface.name, requester = ?arp.sender_ipv4_addr(), "answering ARP request");
                    self.sender.send_frame(reply, in_iface);
                }
                None => debug!(iface = %in_iface.name, "dropping ARP request without IPv4 sender"),
            },
            op if op == ArpOp::Reply as u16 => self.handle_arp_reply(&arp, in_iface),
            op => debug!(iface = %in_iface.name, op, "dropping ARP frame with unknown opcode"),
        }
    }

    fn handle_arp_reply(&self, arp: &ArpFrame, in_iface: &Interface) {
        let (ip, mac) = match (arp.sender_ipv4_addr(), arp.sender_mac_addr()) {
            (Some(ip), Some(mac)) => (ip, mac),
            _ => {
                debug!(iface = %in_iface.name, "dropping ARP reply without Ethernet/IPv4 sender");
                return;
            }
        };
        if self.arp_cache.lookup(ip).is_some() {
            trace!(%ip, "ignoring ARP reply for a known binding");
            return;
        }
        match self.registry.complete(ip, mac, in_iface, &self.arp_cache) {
            ReplyOutcome::Resolved => debug!(%ip, %mac, iface = %in_iface.name, "learned ARP binding"),
            ReplyOutcome::AlreadyResolved => trace!(%ip, "ignoring duplicate ARP reply"),
            ReplyOutcome::Unsolicited => debug!(%ip, "dropping unsolicited ARP reply"),
        }
    }

    fn handle_ipv4(&self, frame: EthernetFrame, in_iface: &Interface, src_mac: MacAddr) {
        let packet = match Ipv4Packet::try_from(frame) {
            Ok(packet) => packet,
            Err(reason) => {
                debug!(iface = %in_iface.name, reason, "dropping malformed IPv4 packet");
                return;
            }
        };
        let icmp = IcmpGenerator::new(in_iface, src_mac);

        if packet.ttl() <= 1 {
            debug!(src = %packet.src_addr(), dest = %packet.dest_addr(), "TTL expired, sending ICMP time exceeded");
            self.sender.send_frame(icmp.time_exceeded(&packet), in_iface);
            return;
        }
        if packet.checksum() != packet.calculate_checksum() {
            debug!(src = %packet.src_addr(), "dropping IPv4 packet with bad checksum");
            return;
        }

        match self.by_destination.classify(&packet) {
            Destination::Local(_, LocalKind::Transport) => {
                debug!(src = %packet.src_addr(), "sending ICMP port unreachable");
                let error = icmp.unreachable(UnreachableCode::Port, &packet);
                self.sender.send_frame(error, in_iface);
            }
            Destination::Local(local_ip, LocalKind::EchoRequest) => {
                if let Some(reply) = icmp.echo_reply(local_ip, &packet) {
                    debug!(src = %packet.src_addr(), %local_ip, "answering echo request");
                    self.sender.send_frame(reply, in_iface);
                }
            }
            Destination::Local(local_ip, LocalKind::Other) => {
                debug!(%local_ip, protocol = ?packet.protocol(), "dropping local packet");
            }
            Destination::Remote(dest) => match self.route_table.lookup(dest) {
                Some(route) => self.forward(packet, route, in_iface, src_mac),
                None => {
                    debug!(%dest, "no route, sending ICMP net unreachable");
                    let error = icmp.unreachable(UnreachableCode::Net, &packet);
                    self.sender.send_frame(error, in_iface);
                }
            },
        }
    }

    fn forward(&self, packet: Ipv4Packet, route: &RouteEntry, in_iface: &Interface, src_mac: MacAddr) {
        let next_hop = route.next_hop(packet.dest_addr());
        let out_iface = &route.interface;

        let packet = match DecIpv4HopLimit::new().process(packet) {
            Some(packet) => packet,
            None => return,
        };
        let mut frame = match EthernetFrame::try_from(packet) {
            Ok(frame) => frame,
            Err(reason) => {
                debug!(reason, "dropping packet without link layer");
                return;
            }
        };
        frame.set_src_mac(out_iface.mac);

        if let Some(entry) = self.arp_cache.lookup(next_hop) {
            frame.set_dest_mac(entry.mac);
            self.sender.send_frame(frame, out_iface);
            return;
        }

        let pending = PendingFrame {
            frame,
            in_iface: in_iface.clone(),
            src_mac,
        };
        match self
            .registry
            .submit(next_hop, pending, &self.arp_cache, out_iface)
        {
            Submitted::Resolved(pending, entry) => {
                let mut frame = pending.frame;
                frame.set_dest_mac(entry.mac);
                self.sender.send_frame(frame, out_iface);
            }
            Submitted::Queued => {}
            Submitted::Started(task) => {
                self.runtime.spawn(task.run(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.sender),
                    self.resolver,
                ));
            }
        }
    }
}

impl Device for Router {
    fn handle_frame(&self, frame: EthernetFrame, in_iface: &Interface) {
        let src_mac = frame.src_mac();
        trace!(device = "router", iface = %in_iface.name, ether_type = frame.ether_type(), "received frame");

        match self.by_ether_type.classify(&frame) {
            FrameKind::Arp => self.handle_arp(frame, in_iface),
            FrameKind::Ipv4 => self.handle_ipv4(frame, in_iface, src_mac),
            FrameKind::Other(ether_type) => {
                debug!(iface = %in_iface.name, ether_type, "dropping frame that is neither ARP nor IPv4")
            }
        }
    }
}
