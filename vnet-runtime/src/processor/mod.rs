mod dec_ip_hop;
pub use self::dec_ip_hop::*;

/// A single packet transformation. Returning None consumes the packet.
pub trait Processor {
    type Input: Send + Clone;
    type Output: Send + Clone;

    fn process(&mut self, packet: Self::Input) -> Option<Self::Output>;
}
