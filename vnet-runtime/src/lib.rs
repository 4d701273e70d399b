/// Devices hand frames to the outside world through a `FrameSender` and take them in through
/// `Device::handle_frame`. This module holds those two seams and the interface model both
/// devices are built from. `ChannelSender` is a ready made sender that pushes frames into a
/// crossbeam channel, for wiring devices together in-process and for tests.
pub mod device;

/// The layer 3 router: ARP handling, IPv4 validation, local delivery, longest prefix match
/// forwarding and ICMP errors. Next hops missing from the ARP cache are resolved in the
/// background while their frames wait in a per next hop queue.
pub mod router;

/// The layer 2 learning switch. It learns source MACs per port, floods unknown destinations,
/// and ages out bindings that have gone quiet.
pub mod switch;

/// ARP frame construction and the per next hop resolution tasks.
pub mod arp;

/// Classifiers look at a packet without touching it and decide which path it takes.
pub mod classifier;

/// Processors transform a packet on its way through a device.
pub mod processor;

/// The tables devices share between frame handling and background tasks.
pub mod state;

/// ICMP messages the router sends back to the source of a packet.
pub mod icmp;

/// Static configuration and the errors loading it can produce.
pub mod config;
