//! IP ingress (§4.2): validates an arriving IPv4 datagram, confirms it is
//! addressed to one of the configured interfaces, and dispatches the
//! de-headered payload to the upper-layer handler registered for the
//! datagram's protocol number (§9 "Polymorphism across IP protocols" —
//! modeled as a map from protocol number to a capability, not a chain of
//! `if`s naming each protocol).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Result, TcpError};
use crate::ip::address::Ipv4Addr;
use crate::ip::header;
use crate::ip::interface::{Interface, InterfaceTable};

/// Upward protocol-handler contract (§6): `(payload, length, src, dst,
/// interface)`. TCP registers itself under [`header::PROTOCOL_TCP`]; UDP or
/// ICMP would be peer registrations under their own numbers.
pub trait ProtocolHandler: Send + Sync {
    fn handle_segment(
        &self,
        payload: &[u8],
        length: usize,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        iface: &Interface,
    ) -> Result<()>;
}

/// Map from IP protocol number to the handler registered for it.
#[derive(Default, Clone)]
pub struct ProtocolTable {
    handlers: HashMap<u8, Arc<dyn ProtocolHandler>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        ProtocolTable {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, protocol: u8, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.insert(protocol, handler);
    }
}

/// Validates and dispatches one arriving IPv4 datagram per §4.2:
/// - rejects anything [`header::parse`] rejects (too short, non-IPv4,
///   truncated, bad checksum, fragmented);
/// - rejects datagrams addressed to neither an interface's unicast, the
///   limited broadcast, nor that interface's directed broadcast;
/// - dispatches the payload to the handler registered for the datagram's
///   protocol number, silently dropping (after logging) if none is
///   registered.
pub fn ingress(datagram: &[u8], interfaces: &InterfaceTable, protocols: &ProtocolTable) -> Result<()> {
    let view = header::parse(datagram)?;

    let iface = interfaces
        .select_by_destination(view.dst)
        .ok_or(TcpError::Malformed("datagram addressed to no configured interface"))?;

    let payload = &datagram[view.header_len..view.total_len];

    match protocols.handlers.get(&view.protocol) {
        Some(handler) => {
            trace!(protocol = view.protocol, src = %view.src, dst = %view.dst, "dispatching IP payload");
            handler.handle_segment(payload, payload.len(), view.src, view.dst, iface)
        }
        None => {
            debug!(protocol = view.protocol, "no handler registered for protocol, dropping");
            Ok(())
        }
    }
}
