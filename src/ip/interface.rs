use tracing::info;

use crate::error::{Result, TcpError};
use crate::ip::address::Ipv4Addr;

/// A configured IP interface: unicast address, netmask, and the derived
/// directed broadcast, plus whatever MTU the owning device advertises.
///
/// Interfaces are registered once before the stack starts and never mutated
/// afterwards (§5), so `InterfaceTable` needs no internal locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub unicast: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub mtu: u16,
}

impl Interface {
    pub fn new(unicast: Ipv4Addr, netmask: Ipv4Addr, mtu: u16) -> Self {
        Interface {
            unicast,
            netmask,
            broadcast: unicast.broadcast_for(netmask),
            mtu,
        }
    }

    /// Whether `dst` is an address this interface should accept: its own
    /// unicast, the limited broadcast, or its own directed broadcast.
    ///
    /// The source this crate is ported from compares against
    /// `unicast | 0xff000000` here instead of the interface's stored
    /// broadcast field — flagged as a bug in `SPEC_FULL.md` §4.5 and fixed
    /// below.
    pub fn accepts(&self, dst: Ipv4Addr) -> bool {
        dst == self.unicast || dst == Ipv4Addr::BROADCAST || dst == self.broadcast
    }
}

const DEFAULT_CAPACITY: usize = 8;

/// Fixed-capacity, write-once-then-read-many set of configured interfaces.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    ifaces: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        InterfaceTable {
            ifaces: Vec::with_capacity(DEFAULT_CAPACITY),
        }
    }

    pub fn register(&mut self, iface: Interface) -> Result<()> {
        if self.ifaces.len() >= DEFAULT_CAPACITY {
            return Err(TcpError::Exhausted("interface table full"));
        }
        info!(
            unicast = %iface.unicast,
            netmask = %iface.netmask,
            broadcast = %iface.broadcast,
            "registered interface"
        );
        self.ifaces.push(iface);
        Ok(())
    }

    pub fn select_by_address(&self, addr: Ipv4Addr) -> Option<&Interface> {
        self.ifaces.iter().find(|i| i.unicast == addr)
    }

    /// Finds the interface that should receive a datagram addressed to
    /// `dst` — unicast, limited broadcast, or directed broadcast.
    pub fn select_by_destination(&self, dst: Ipv4Addr) -> Option<&Interface> {
        self.ifaces.iter().find(|i| i.accepts(dst))
    }

    /// Trivial routing: the single configured interface that could plausibly
    /// reach `dst`. Real longest-prefix-match routing is out of scope; a
    /// production caller supplying a real `Router` would replace this.
    pub fn route(&self, _dst: Ipv4Addr) -> Option<&Interface> {
        self.ifaces.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface() -> Interface {
        Interface::new(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(255, 255, 255, 0),
            1500,
        )
    }

    #[test]
    fn accepts_unicast_limited_and_directed_broadcast() {
        let iface = iface();
        assert!(iface.accepts(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(iface.accepts(Ipv4Addr::BROADCAST));
        assert!(iface.accepts(Ipv4Addr::new(10, 0, 0, 255)));
        assert!(!iface.accepts(Ipv4Addr::new(10, 0, 0, 3)));
        assert!(!iface.accepts(Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn select_by_address_is_exact() {
        let mut table = InterfaceTable::new();
        table.register(iface()).unwrap();
        assert!(table
            .select_by_address(Ipv4Addr::new(10, 0, 0, 2))
            .is_some());
        assert!(table
            .select_by_address(Ipv4Addr::new(10, 0, 0, 3))
            .is_none());
    }

    #[test]
    fn registration_respects_capacity() {
        let mut table = InterfaceTable::new();
        for i in 0..DEFAULT_CAPACITY {
            let unicast = Ipv4Addr::new(10, 0, i as u8, 2);
            table
                .register(Interface::new(unicast, Ipv4Addr::new(255, 255, 255, 0), 1500))
                .unwrap();
        }
        let one_too_many = Interface::new(
            Ipv4Addr::new(10, 0, 99, 2),
            Ipv4Addr::new(255, 255, 255, 0),
            1500,
        );
        assert!(matches!(
            table.register(one_too_many),
            Err(TcpError::Exhausted(_))
        ));
    }
}
