//! Shared tables. Each sits behind its own lock and exposes only the operations the
//! devices need, so no table is ever locked while another one is held, apart from the
//! ARP cache read the router makes under the resolution registry lock.
mod route_table;
pub use self::route_table::*;

mod arp_cache;
pub use self::arp_cache::*;

mod forwarding_table;
pub use self::forwarding_table::*;
