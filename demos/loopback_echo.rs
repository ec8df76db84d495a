//! A self-contained demo: one `TcpEngine` acting as a passive-open echo
//! server, driven by a hand-crafted "remote peer" that builds and parses
//! segments directly. There is no real network device here — active open is
//! out of scope for the engine itself (§1), so the peer side is simulated
//! by the demo rather than by a second engine.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tcpstack::ip::address::{IpEndpoint, Ipv4Addr};
use tcpstack::ip::header as ip_header;
use tcpstack::ip::{Interface, InterfaceTable, ProtocolTable};
use tcpstack::tcp::header::{self as tcp_header, BuildParams, Flags};
use tcpstack::{IpOutput, Result, StackConfig, TcpEngine};

/// Captures segments the engine emits instead of handing them to a device.
struct Loopback {
    tx: mpsc::Sender<(Ipv4Addr, Ipv4Addr, Vec<u8>)>,
}

impl IpOutput for Loopback {
    fn send(&self, _protocol: u8, payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Result<usize> {
        let _ = self.tx.send((src, dst, payload.to_vec()));
        Ok(payload.len())
    }
}

/// Wraps a TCP segment in a real IPv4 datagram and drives it through the
/// full IP ingress pipeline (§4.2 validation, then §9 protocol dispatch),
/// rather than handing the engine a hand-built header view.
fn deliver(interfaces: &InterfaceTable, protocols: &ProtocolTable, src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) {
    let datagram = ip_header::build(ip_header::PROTOCOL_TCP, src, dst, segment);
    tcpstack::ip::ingress::ingress(&datagram, interfaces, protocols).expect("IP ingress accepted the datagram");
}

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let server_addr = Ipv4Addr::new(10, 0, 0, 1);
    let peer_addr = Ipv4Addr::new(10, 0, 0, 9);
    let server_port = 7u16; // echo
    let peer_port = 5555u16;

    let mut ifaces = InterfaceTable::new();
    ifaces
        .register(Interface::new(server_addr, Ipv4Addr::new(255, 255, 255, 0), 1500))
        .expect("interface registration");
    let ifaces = Arc::new(ifaces);

    let (tx, rx) = mpsc::channel();
    let engine = Arc::new(TcpEngine::new(StackConfig::default(), Arc::new(Loopback { tx }), ifaces.clone()));

    let mut protocols = ProtocolTable::new();
    protocols.register(ip_header::PROTOCOL_TCP, engine.clone());

    let server = engine.clone();
    let server_thread = thread::spawn(move || {
        let local = IpEndpoint::new(server_addr, server_port);
        let handle = server.open_passive(local, None).expect("passive open");
        tracing::info!("server: connection established");

        let mut buf = [0u8; 256];
        let n = server.receive(handle, &mut buf).expect("receive");
        tracing::info!(bytes = n, "server: received data, echoing back");
        server.send(handle, &buf[..n]).expect("send echo");

        thread::sleep(Duration::from_millis(20));
        server.close(handle).expect("close");
    });

    // Give the server time to reach LISTEN before the "peer" starts sending.
    thread::sleep(Duration::from_millis(20));

    let peer_iss = 9000u32;

    // 1. SYN
    let syn = tcp_header::build(
        BuildParams {
            src_port: peer_port,
            dst_port: server_port,
            seq: peer_iss,
            ack: 0,
            flags: Flags::SYN,
            window: 4096,
            payload: Vec::new(),
        },
        peer_addr,
        server_addr,
    );
    deliver(&ifaces, &protocols, peer_addr, server_addr, &syn);

    let (src, dst, synack) = rx.recv().expect("SYN-ACK");
    let parsed = tcp_header::parse(&synack, src, dst).expect("parse SYN-ACK");
    assert!(parsed.flags.contains(Flags::SYN) && parsed.flags.contains(Flags::ACK));
    let server_iss = parsed.seq;

    // 2. ACK completing the handshake
    let ack = tcp_header::build(
        BuildParams {
            src_port: peer_port,
            dst_port: server_port,
            seq: peer_iss.wrapping_add(1),
            ack: server_iss.wrapping_add(1),
            flags: Flags::ACK,
            window: 4096,
            payload: Vec::new(),
        },
        peer_addr,
        server_addr,
    );
    deliver(&ifaces, &protocols, peer_addr, server_addr, &ack);

    // 3. Data
    let message = b"hello from the peer".to_vec();
    let data_segment = tcp_header::build(
        BuildParams {
            src_port: peer_port,
            dst_port: server_port,
            seq: peer_iss.wrapping_add(1),
            ack: server_iss.wrapping_add(1),
            flags: Flags::ACK | Flags::PSH,
            window: 4096,
            payload: message.clone(),
        },
        peer_addr,
        server_addr,
    );
    deliver(&ifaces, &protocols, peer_addr, server_addr, &data_segment);

    // Drain the data ACK, then receive the echoed payload.
    let (_, _, data_ack) = rx.recv().expect("data ACK");
    let parsed_ack = tcp_header::parse(&data_ack, server_addr, peer_addr).expect("parse data ACK");
    assert!(parsed_ack.flags.contains(Flags::ACK));

    let (src, dst, echoed) = rx.recv().expect("echoed segment");
    let parsed_echo = tcp_header::parse(&echoed, src, dst).expect("parse echo");
    assert_eq!(parsed_echo.payload, message.as_slice());
    tracing::info!(echo = ?String::from_utf8_lossy(parsed_echo.payload), "peer: received echo");

    let (_, _, reset) = rx.recv().expect("final RST");
    let parsed_reset = tcp_header::parse(&reset, server_addr, peer_addr).expect("parse RST");
    assert!(parsed_reset.flags.contains(Flags::RST));

    server_thread.join().expect("server thread panicked");
    tracing::info!("demo complete");
}
