//! Segment emission (§4.4): builds a wire segment from a PCB's current
//! send/receive state and hands it to the configured [`IpOutput`].

use crate::error::Result;
use crate::ip::address::Ipv4Addr;
use crate::ip::IpOutput;
use crate::ip::header::PROTOCOL_TCP;
use crate::tcp::header::{self, BuildParams, Flags};
use crate::tcp::pcb::Pcb;

/// Emits one segment for `pcb` carrying `flags` and `payload`. The sequence
/// number is `snd.nxt` normally, or `iss` when `SYN` is set and no data has
/// yet been sent (§4.4: "seq is `snd.nxt`, except a segment carrying SYN
/// uses `iss`"). Ack is always `rcv.nxt`, window is always `rcv.wnd`.
pub fn send_segment(
    pcb: &Pcb,
    flags: Flags,
    payload: Vec<u8>,
    ip: &dyn IpOutput,
) -> Result<usize> {
    let seq = if flags.contains(Flags::SYN) {
        pcb.iss
    } else {
        pcb.snd.nxt
    };

    let params = BuildParams {
        src_port: pcb.local.port,
        dst_port: pcb.foreign.port,
        seq,
        ack: pcb.rcv.nxt,
        flags,
        window: pcb.rcv.wnd,
        payload,
    };

    let segment = header::build(params, pcb.local.addr, pcb.foreign.addr);
    ip.send(PROTOCOL_TCP, &segment, pcb.local.addr, pcb.foreign.addr)
}

/// Emits a bare RST (no associated PCB, e.g. responding to a segment with no
/// matching listener, §4.5) directly from wire-level fields rather than a
/// PCB, since none exists yet.
pub fn send_reset(
    local_addr: Ipv4Addr,
    local_port: u16,
    foreign_addr: Ipv4Addr,
    foreign_port: u16,
    seq: u32,
    ack: u32,
    flags: Flags,
    ip: &dyn IpOutput,
) -> Result<usize> {
    let params = BuildParams {
        src_port: local_port,
        dst_port: foreign_port,
        seq,
        ack,
        flags,
        window: 0,
        payload: Vec::new(),
    };
    let segment = header::build(params, local_addr, foreign_addr);
    ip.send(PROTOCOL_TCP, &segment, local_addr, foreign_addr)
}
