pub mod address;
pub mod checksum;
pub mod header;
pub mod ingress;
pub mod interface;

pub use address::{IpEndpoint, Ipv4Addr};
pub use ingress::{ProtocolHandler, ProtocolTable};
pub use interface::{Interface, InterfaceTable};

use crate::error::Result;

/// Downward contract to the IP transmit path (§6): "caller supplies only the
/// L4 payload", IP computes and installs its own header.
pub trait IpOutput: Send + Sync {
    fn send(
        &self,
        protocol: u8,
        payload: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<usize>;
}

/// Downward routing contract (§6): which interface would carry traffic to
/// `dst`, exposing its MTU.
pub trait Router: Send + Sync {
    fn route(&self, dst: Ipv4Addr) -> Option<Interface>;
}

impl Router for InterfaceTable {
    fn route(&self, dst: Ipv4Addr) -> Option<Interface> {
        InterfaceTable::route(self, dst).copied()
    }
}
