pub mod api;
pub mod header;
pub mod ingress;
pub mod output;
pub mod pcb;
pub mod seq;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, TcpError};
use crate::ip::address::{IpEndpoint, Ipv4Addr};
use crate::ip::{Interface, IpOutput, ProtocolHandler, Router};
use crate::tcp::ingress::ArrivingSegment;
use crate::tcp::pcb::{ConnectionHandle, PcbTable};

pub const DEFAULT_PCB_CAPACITY: usize = 16;
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// Stack-wide tunables (§4.8). Interfaces are configured separately through
/// an [`crate::ip::InterfaceTable`] handed to the `Router` implementation.
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    pub pcb_capacity: usize,
    pub recv_buffer_size: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            pcb_capacity: DEFAULT_PCB_CAPACITY,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

/// The whole engine: a fixed PCB arena behind a single mutex, plus its two
/// downward collaborators (§6). Mirrors the "one coarse-grained mutex
/// guarding the entire subsystem" design note (§9) — there is exactly one
/// `Mutex` in this type, never one per PCB.
pub struct TcpEngine {
    table: Mutex<PcbTable>,
    ip: Arc<dyn IpOutput>,
    router: Arc<dyn Router>,
}

impl TcpEngine {
    pub fn new(config: StackConfig, ip: Arc<dyn IpOutput>, router: Arc<dyn Router>) -> Self {
        TcpEngine {
            table: Mutex::new(PcbTable::new(config.pcb_capacity, config.recv_buffer_size)),
            ip,
            router,
        }
    }

    /// Entry point for a TCP segment that has already been demultiplexed out
    /// of an arriving IP datagram (§4.5) — the upward protocol-handler
    /// contract of §6, called directly or via [`ProtocolHandler::handle_segment`].
    pub fn on_ip_segment(&self, payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Result<()> {
        if src == Ipv4Addr::BROADCAST || dst == Ipv4Addr::BROADCAST {
            return Err(TcpError::Malformed("TCP segment to/from the limited broadcast address"));
        }

        let tcp_view = header::parse(payload, src, dst)?;
        let seg = ArrivingSegment::from_view(&tcp_view, dst, src);
        let mut table = self.table.lock().unwrap();
        ingress::segment_arrives(&mut table, &seg, self.ip.as_ref())
    }

    /// Posted on any "external event" (§4.3, §7): interrupts every live PCB's
    /// blocking call with [`crate::sched::WakeReason::Interrupted`].
    pub fn on_external_event(&self) {
        let table = self.table.lock().unwrap();
        for handle in 0..table.capacity() {
            if let Some(pcb) = table.get(handle) {
                pcb.ctx.interrupt();
            }
        }
    }

    pub fn open_passive(&self, local: IpEndpoint, foreign: Option<IpEndpoint>) -> Result<ConnectionHandle> {
        api::open_passive(&self.table, local, foreign)
    }

    pub fn send(&self, handle: ConnectionHandle, data: &[u8]) -> Result<usize> {
        let mtu = self.mtu_for(handle)?;
        api::send(&self.table, handle, data, mtu, self.ip.as_ref())
    }

    pub fn receive(&self, handle: ConnectionHandle, buf: &mut [u8]) -> Result<usize> {
        api::receive(&self.table, handle, buf)
    }

    pub fn receive_timeout(&self, handle: ConnectionHandle, buf: &mut [u8], deadline: Duration) -> Result<usize> {
        api::receive_timeout(&self.table, handle, buf, deadline)
    }

    pub fn close(&self, handle: ConnectionHandle) -> Result<()> {
        api::close(&self.table, handle, self.ip.as_ref())
    }

    /// Resolves the MTU of the interface routing would use to reach the
    /// PCB's foreign endpoint (§4.7, §6 "Downward (routing)"). No route is
    /// an `EXHAUSTED` failure per §7's error table, not a silent fallback.
    fn mtu_for(&self, handle: ConnectionHandle) -> Result<u16> {
        let foreign = {
            let table = self.table.lock().unwrap();
            table.get(handle).ok_or(TcpError::NotFound)?.foreign.addr
        };
        match self.router.route(foreign) {
            Some(iface) => Ok(iface.mtu),
            None => {
                warn!(foreign = %foreign, "no route for connection");
                Err(TcpError::NoRoute(foreign))
            }
        }
    }
}

/// Registers the engine as protocol 6 in an [`crate::ip::ProtocolTable`]
/// (§9 "Polymorphism across IP protocols"): `iface` is accepted but unused,
/// since this subset has no per-interface TCP state beyond what `Router`
/// already supplies for MSS computation.
impl ProtocolHandler for TcpEngine {
    fn handle_segment(
        &self,
        payload: &[u8],
        _length: usize,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        _iface: &Interface,
    ) -> Result<()> {
        self.on_ip_segment(payload, src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{header as ip_header_mod, Interface, InterfaceTable, ProtocolTable};
    use crate::tcp::header::{self as tcp_header, BuildParams, Flags};
    use std::sync::Mutex as StdMutex;

    struct RecordingIp {
        sent: StdMutex<Vec<(Ipv4Addr, Ipv4Addr, Vec<u8>)>>,
    }
    impl RecordingIp {
        fn new() -> Self {
            RecordingIp { sent: StdMutex::new(Vec::new()) }
        }
    }
    impl IpOutput for RecordingIp {
        fn send(&self, _protocol: u8, payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Result<usize> {
            self.sent.lock().unwrap().push((src, dst, payload.to_vec()));
            Ok(payload.len())
        }
    }

    fn engine_with_interface() -> (Arc<TcpEngine>, Arc<RecordingIp>, Ipv4Addr) {
        let server_addr = Ipv4Addr::new(10, 0, 0, 2);
        let mut ifaces = InterfaceTable::new();
        ifaces
            .register(Interface::new(server_addr, Ipv4Addr::new(255, 255, 255, 0), 1500))
            .unwrap();
        let ip = Arc::new(RecordingIp::new());
        let engine = Arc::new(TcpEngine::new(StackConfig::default(), ip.clone(), Arc::new(ifaces)));
        (engine, ip, server_addr)
    }

    #[test]
    fn send_with_no_route_fails_as_exhausted() {
        let ip = Arc::new(RecordingIp::new());
        let router = Arc::new(InterfaceTable::new()); // empty: nothing routes anywhere
        let engine = TcpEngine::new(StackConfig::default(), ip, router);

        let handle = {
            let mut table = engine.table.lock().unwrap();
            let h = table.alloc().unwrap();
            let pcb = table.get_mut(h).unwrap();
            pcb.state = crate::tcp::pcb::State::Established;
            pcb.foreign = IpEndpoint::new(Ipv4Addr::new(10, 0, 0, 9), 5555);
            h
        };

        assert!(matches!(engine.send(handle, b"x"), Err(TcpError::NoRoute(_))));
    }

    #[test]
    fn segment_from_limited_broadcast_source_is_rejected() {
        let (engine, _ip, server_addr) = engine_with_interface();
        let peer_addr = Ipv4Addr::BROADCAST;

        let syn = tcp_header::build(
            BuildParams {
                src_port: 1234,
                dst_port: 80,
                seq: 1,
                ack: 0,
                flags: Flags::SYN,
                window: 4096,
                payload: Vec::new(),
            },
            peer_addr,
            server_addr,
        );

        assert!(matches!(
            engine.on_ip_segment(&syn, peer_addr, server_addr),
            Err(TcpError::Malformed(_))
        ));
    }

    #[test]
    fn engine_registered_as_tcp_protocol_handler_drives_full_handshake() {
        let (engine, ip, server_addr) = engine_with_interface();
        let peer_addr = Ipv4Addr::new(10, 0, 0, 9);

        let mut protocols = ProtocolTable::new();
        protocols.register(ip_header_mod::PROTOCOL_TCP, engine.clone());

        let mut ifaces = InterfaceTable::new();
        ifaces
            .register(Interface::new(server_addr, Ipv4Addr::new(255, 255, 255, 0), 1500))
            .unwrap();

        let server = engine.clone();
        let handle_thread = std::thread::spawn(move || {
            server.open_passive(IpEndpoint::new(server_addr, 80), None)
        });

        std::thread::sleep(Duration::from_millis(10));

        let syn = tcp_header::build(
            BuildParams {
                src_port: 5555,
                dst_port: 80,
                seq: 1000,
                ack: 0,
                flags: Flags::SYN,
                window: 4096,
                payload: Vec::new(),
            },
            peer_addr,
            server_addr,
        );
        let datagram = ip_header_mod::build(ip_header_mod::PROTOCOL_TCP, peer_addr, server_addr, &syn);
        crate::ip::ingress::ingress(&datagram, &ifaces, &protocols).unwrap();

        let (_, _, synack) = ip.sent.lock().unwrap().pop().unwrap();
        let parsed = tcp_header::parse(&synack, server_addr, peer_addr).unwrap();
        assert!(parsed.flags.contains(Flags::SYN) && parsed.flags.contains(Flags::ACK));

        let ack = tcp_header::build(
            BuildParams {
                src_port: 5555,
                dst_port: 80,
                seq: 1001,
                ack: parsed.seq.wrapping_add(1),
                flags: Flags::ACK,
                window: 4096,
                payload: Vec::new(),
            },
            peer_addr,
            server_addr,
        );
        let datagram = ip_header_mod::build(ip_header_mod::PROTOCOL_TCP, peer_addr, server_addr, &ack);
        crate::ip::ingress::ingress(&datagram, &ifaces, &protocols).unwrap();

        let handle = handle_thread.join().unwrap().expect("passive open resolved");
        assert_eq!(engine.send(handle, b"ok").is_ok(), true);
    }

    #[test]
    fn external_event_interrupts_a_blocking_receive() {
        let (engine, _ip, _server_addr) = engine_with_interface();
        let handle = {
            let mut table = engine.table.lock().unwrap();
            let h = table.alloc().unwrap();
            table.get_mut(h).unwrap().state = crate::tcp::pcb::State::Established;
            h
        };

        let engine2 = engine.clone();
        let interruptor = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            engine2.on_external_event();
        });

        let mut buf = [0u8; 8];
        let result = engine.receive(handle, &mut buf);
        assert!(matches!(result, Err(TcpError::Interrupted)));
        interruptor.join().unwrap();
    }
}
