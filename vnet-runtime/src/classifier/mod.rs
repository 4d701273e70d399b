//! Classifiers sort packets into the paths a device takes for them. They take each packet
//! by reference and never modify it. The returned class is usually an enum the caller
//! matches on exhaustively.
mod ether_type;
pub use self::ether_type::*;

mod destination;
pub use self::destination::*;

/// Decides which class a packet belongs to.
pub trait Classifier {
    type Packet: Send + Clone;
    type Class: Sized;

    fn classify(&self, packet: &Self::Packet) -> Self::Class;
}
