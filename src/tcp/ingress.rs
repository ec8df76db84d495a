//! The segment-arrival state machine (§4.5, §4.6) — RFC 793 §3.9 "SEGMENT
//! ARRIVES", restricted to the passive-open/LISTEN/SYN_RECEIVED/ESTABLISHED
//! subset this engine implements (§1 Non-goals).

use tracing::{debug, info, trace};

use crate::error::Result;
use crate::ip::address::{IpEndpoint, Ipv4Addr};
use crate::ip::IpOutput;
use crate::tcp::header::{Flags, TcpHeaderView};
use crate::tcp::output;
use crate::tcp::pcb::{ConnectionHandle, PcbTable, State};
use crate::tcp::seq::segment_acceptable;

/// Everything about an arriving segment the state machine needs, already
/// decoupled from the borrowed `TcpHeaderView` so the caller's IP-layer
/// buffer can be dropped before we take the PCB table lock.
pub struct ArrivingSegment {
    pub local: IpEndpoint,
    pub foreign: IpEndpoint,
    pub seq: u32,
    pub ack: u32,
    pub len: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: Vec<u8>,
}

impl ArrivingSegment {
    pub fn from_view(view: &TcpHeaderView, local_addr: Ipv4Addr, foreign_addr: Ipv4Addr) -> Self {
        ArrivingSegment {
            local: IpEndpoint::new(local_addr, view.dst_port),
            foreign: IpEndpoint::new(foreign_addr, view.src_port),
            seq: view.seq,
            ack: view.ack,
            // §3: the logical length used in sequence-space arithmetic counts
            // SYN and FIN as one octet each, on top of the payload bytes.
            len: view.payload.len() as u32
                + view.flags.contains(Flags::SYN) as u32
                + view.flags.contains(Flags::FIN) as u32,
            flags: view.flags,
            window: view.window,
            payload: view.payload.to_vec(),
        }
    }
}

/// Dispatches one arriving segment against the PCB table, per §4.5/§4.6.
/// Holds the table lock for the duration (§5: the engine is governed by a
/// single coarse-grained mutex).
pub fn segment_arrives(table: &mut PcbTable, seg: &ArrivingSegment, ip: &dyn IpOutput) -> Result<()> {
    let handle = table.select(seg.local, Some(seg.foreign));

    let Some(handle) = handle.filter(|h| table.get(*h).map(|p| p.state != State::Closed).unwrap_or(false)) else {
        return handle_no_pcb(seg, ip);
    };

    match table.get(handle).unwrap().state {
        State::Listen => handle_listen(table, handle, seg, ip),
        _ => handle_synchronized(table, handle, seg, ip),
    }
}

/// §4.6 "no matching PCB": reset unless the segment is itself a RST.
fn handle_no_pcb(seg: &ArrivingSegment, ip: &dyn IpOutput) -> Result<()> {
    if seg.flags.contains(Flags::RST) {
        return Ok(());
    }

    if !seg.flags.contains(Flags::ACK) {
        output::send_reset(
            seg.local.addr,
            seg.local.port,
            seg.foreign.addr,
            seg.foreign.port,
            0,
            seg.seq.wrapping_add(seg.len),
            Flags::RST | Flags::ACK,
            ip,
        )?;
    } else {
        output::send_reset(
            seg.local.addr,
            seg.local.port,
            seg.foreign.addr,
            seg.foreign.port,
            seg.ack,
            0,
            Flags::RST,
            ip,
        )?;
    }
    Ok(())
}

fn handle_listen(table: &mut PcbTable, handle: ConnectionHandle, seg: &ArrivingSegment, ip: &dyn IpOutput) -> Result<()> {
    if seg.flags.contains(Flags::RST) {
        return Ok(());
    }

    if seg.flags.contains(Flags::ACK) {
        output::send_reset(seg.local.addr, seg.local.port, seg.foreign.addr, seg.foreign.port, seg.ack, 0, Flags::RST, ip)?;
        return Ok(());
    }

    if seg.flags.contains(Flags::SYN) {
        info!(local = %seg.local.addr, foreign = %seg.foreign.addr, "received SYN, allocating connection");

        let iss = rand::random::<u32>();
        {
            let pcb = table.get_mut(handle).unwrap();
            pcb.local = seg.local;
            pcb.foreign = seg.foreign;
            pcb.rcv.wnd = pcb.recv_buf_capacity as u16;
            pcb.rcv.nxt = seg.seq.wrapping_add(1);
            pcb.irs = seg.seq;
            pcb.iss = iss;
            pcb.snd.nxt = iss.wrapping_add(1);
            pcb.snd.una = iss;
            pcb.state = State::SynReceived;
        }
        output::send_segment(table.get(handle).unwrap(), Flags::SYN | Flags::ACK, Vec::new(), ip)?;
        return Ok(());
    }

    trace!("dropping non-SYN, non-RST, non-ACK segment in LISTEN");
    Ok(())
}

fn handle_synchronized(table: &mut PcbTable, handle: ConnectionHandle, seg: &ArrivingSegment, ip: &dyn IpOutput) -> Result<()> {
    let (rcv_nxt, rcv_wnd) = {
        let pcb = table.get(handle).unwrap();
        (pcb.rcv.nxt, pcb.rcv.wnd)
    };

    if !segment_acceptable(seg.seq, seg.len, rcv_nxt, rcv_wnd) {
        if !seg.flags.contains(Flags::RST) {
            output::send_segment(table.get(handle).unwrap(), Flags::ACK, Vec::new(), ip)?;
        }
        return Ok(());
    }

    if seg.flags.contains(Flags::RST) {
        table.get_mut(handle).unwrap().state = State::Closed;
        table.get(handle).unwrap().ctx.wake();
        table.release(handle);
        return Ok(());
    }

    if !seg.flags.contains(Flags::ACK) {
        return Ok(());
    }

    let state = table.get(handle).unwrap().state;
    if state == State::SynReceived {
        let (una, nxt) = {
            let pcb = table.get(handle).unwrap();
            (pcb.snd.una, pcb.snd.nxt)
        };
        if !is_between_inclusive(una, seg.ack, nxt) {
            output::send_reset(seg.local.addr, seg.local.port, seg.foreign.addr, seg.foreign.port, seg.ack, 0, Flags::RST, ip)?;
            return Ok(());
        }
        let pcb = table.get_mut(handle).unwrap();
        pcb.state = State::Established;
        debug!(local = %pcb.local.addr, foreign = %pcb.foreign.addr, "connection established");
        pcb.ctx.wake();
    }

    if table.get(handle).unwrap().state == State::Established {
        let snd_nxt = table.get(handle).unwrap().snd.nxt;
        if crate::tcp::seq::wrapping_gt(seg.ack, snd_nxt) {
            // Peer ACKed data we never sent (§4.6): reply with a bare ACK
            // reflecting our current state and drop, without touching
            // snd.una/snd.wnd.
            output::send_segment(table.get(handle).unwrap(), Flags::ACK, Vec::new(), ip)?;
            return Ok(());
        }
        update_send_window(table, handle, seg);
    }

    if seg.len > 0 && table.get(handle).unwrap().state == State::Established {
        let rcv_nxt = table.get(handle).unwrap().rcv.nxt;
        if seg.seq == rcv_nxt {
            deliver_payload(table, handle, seg, ip)?;
        } else {
            // Acceptable per the window test but not the next expected byte
            // (§4.6 Open Questions: out-of-order reassembly is unsupported
            // here). Reply with a bare ACK reflecting the current rcv.nxt
            // rather than writing at a seg.seq-independent buffer offset.
            trace!(seq = seg.seq, rcv_nxt, "dropping out-of-order payload");
            output::send_segment(table.get(handle).unwrap(), Flags::ACK, Vec::new(), ip)?;
        }
    }

    Ok(())
}

fn is_between_inclusive(lo: u32, x: u32, hi: u32) -> bool {
    use crate::tcp::seq::wrapping_le;
    wrapping_le(lo, x) && wrapping_le(x, hi)
}

/// §4.6 ESTABLISHED ACK processing: advances `snd.una` and, if this ACK is
/// newer than the last window update, refreshes `snd.wnd`/`wl1`/`wl2`.
fn update_send_window(table: &mut PcbTable, handle: ConnectionHandle, seg: &ArrivingSegment) {
    use crate::tcp::seq::{wrapping_le, wrapping_lt};

    let pcb = table.get_mut(handle).unwrap();
    if wrapping_lt(pcb.snd.una, seg.ack) && wrapping_le(seg.ack, pcb.snd.nxt) {
        pcb.snd.una = seg.ack;
        if wrapping_lt(pcb.snd.wl1, seg.seq) || (pcb.snd.wl1 == seg.seq && wrapping_le(pcb.snd.wl2, seg.ack)) {
            pcb.snd.wnd = seg.window;
            pcb.snd.wl1 = seg.seq;
            pcb.snd.wl2 = seg.ack;
        }
    }
}

/// §4.6 payload delivery: appends to the receive buffer, advances
/// `rcv.nxt`/shrinks `rcv.wnd`, and replies with a bare ACK.
fn deliver_payload(table: &mut PcbTable, handle: ConnectionHandle, seg: &ArrivingSegment, ip: &dyn IpOutput) -> Result<()> {
    {
        let pcb = table.get_mut(handle).unwrap();
        pcb.recv_buf.extend(seg.payload.iter().copied());
        pcb.rcv.nxt = seg.seq.wrapping_add(seg.len);
        pcb.rcv.wnd = pcb.rcv.wnd.saturating_sub(seg.len as u16);
    }
    output::send_segment(table.get(handle).unwrap(), Flags::ACK, Vec::new(), ip)?;
    table.get(handle).unwrap().ctx.wake();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::pcb::State;
    use std::sync::Mutex;

    struct RecordingIp {
        sent: Mutex<Vec<Vec<u8>>>,
    }
    impl RecordingIp {
        fn new() -> Self {
            RecordingIp { sent: Mutex::new(Vec::new()) }
        }
    }
    impl IpOutput for RecordingIp {
        fn send(&self, _protocol: u8, payload: &[u8], _src: Ipv4Addr, _dst: Ipv4Addr) -> Result<usize> {
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(payload.len())
        }
    }

    fn endpoint(a: u8, b: u8, c: u8, d: u8, port: u16) -> IpEndpoint {
        IpEndpoint::new(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn syn_to_listener_allocates_syn_received_and_replies_synack() {
        let mut table = PcbTable::new(4, 4096);
        let listener = table.alloc().unwrap();
        {
            let pcb = table.get_mut(listener).unwrap();
            pcb.state = State::Listen;
            pcb.local = endpoint(10, 0, 0, 2, 80);
        }

        let seg = ArrivingSegment {
            local: endpoint(10, 0, 0, 2, 80),
            foreign: endpoint(10, 0, 0, 9, 5555),
            seq: 1000,
            ack: 0,
            len: 0,
            flags: Flags::SYN,
            window: 4096,
            payload: Vec::new(),
        };

        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();

        let pcb = table.get(listener).unwrap();
        assert_eq!(pcb.state, State::SynReceived);
        assert_eq!(pcb.irs, 1000);
        assert_eq!(pcb.rcv.nxt, 1001);
        assert_eq!(ip.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn ack_completes_the_handshake_to_established() {
        let mut table = PcbTable::new(4, 4096);
        let handle = table.alloc().unwrap();
        {
            let pcb = table.get_mut(handle).unwrap();
            pcb.state = State::SynReceived;
            pcb.local = endpoint(10, 0, 0, 2, 80);
            pcb.foreign = endpoint(10, 0, 0, 9, 5555);
            pcb.iss = 5000;
            pcb.irs = 1000;
            pcb.snd.una = 5000;
            pcb.snd.nxt = 5001;
            pcb.rcv.nxt = 1001;
            pcb.rcv.wnd = 4096;
        }

        let seg = ArrivingSegment {
            local: endpoint(10, 0, 0, 2, 80),
            foreign: endpoint(10, 0, 0, 9, 5555),
            seq: 1001,
            ack: 5001,
            len: 0,
            flags: Flags::ACK,
            window: 4096,
            payload: Vec::new(),
        };

        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();
        assert_eq!(table.get(handle).unwrap().state, State::Established);
    }

    #[test]
    fn data_segment_is_buffered_and_acked() {
        let mut table = PcbTable::new(4, 4096);
        let handle = table.alloc().unwrap();
        {
            let pcb = table.get_mut(handle).unwrap();
            pcb.state = State::Established;
            pcb.local = endpoint(10, 0, 0, 2, 80);
            pcb.foreign = endpoint(10, 0, 0, 9, 5555);
            pcb.snd.una = 5001;
            pcb.snd.nxt = 5001;
            pcb.rcv.nxt = 1001;
            pcb.rcv.wnd = 4096;
        }

        let seg = ArrivingSegment {
            local: endpoint(10, 0, 0, 2, 80),
            foreign: endpoint(10, 0, 0, 9, 5555),
            seq: 1001,
            ack: 5001,
            len: 4,
            flags: Flags::ACK | Flags::PSH,
            window: 4096,
            payload: vec![1, 2, 3, 4],
        };

        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();

        let pcb = table.get(handle).unwrap();
        assert_eq!(pcb.recv_buf.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(pcb.rcv.nxt, 1005);
        assert_eq!(ip.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn unacceptable_segment_gets_a_bare_ack_and_is_dropped() {
        let mut table = PcbTable::new(4, 4096);
        let handle = table.alloc().unwrap();
        {
            let pcb = table.get_mut(handle).unwrap();
            pcb.state = State::Established;
            pcb.local = endpoint(10, 0, 0, 2, 80);
            pcb.foreign = endpoint(10, 0, 0, 9, 5555);
            pcb.rcv.nxt = 1001;
            pcb.rcv.wnd = 4096;
        }

        let seg = ArrivingSegment {
            local: endpoint(10, 0, 0, 2, 80),
            foreign: endpoint(10, 0, 0, 9, 5555),
            seq: 50000, // far outside the receive window
            ack: 0,
            len: 4,
            flags: Flags::ACK,
            window: 4096,
            payload: vec![9, 9, 9, 9],
        };

        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();

        let pcb = table.get(handle).unwrap();
        assert!(pcb.recv_buf.is_empty());
        assert_eq!(ip.sent.lock().unwrap().len(), 1); // the bare ACK
    }

    #[test]
    fn out_of_order_but_acceptable_payload_is_acked_without_buffering() {
        let mut table = PcbTable::new(4, 4096);
        let handle = table.alloc().unwrap();
        {
            let pcb = table.get_mut(handle).unwrap();
            pcb.state = State::Established;
            pcb.local = endpoint(10, 0, 0, 2, 80);
            pcb.foreign = endpoint(10, 0, 0, 9, 5555);
            pcb.snd.una = 5001;
            pcb.snd.nxt = 5001;
            pcb.rcv.nxt = 1001;
            pcb.rcv.wnd = 4096;
        }

        // Arrives one byte ahead of rcv.nxt but still within the window.
        let seg = ArrivingSegment {
            local: endpoint(10, 0, 0, 2, 80),
            foreign: endpoint(10, 0, 0, 9, 5555),
            seq: 1002,
            ack: 5001,
            len: 4,
            flags: Flags::ACK | Flags::PSH,
            window: 4096,
            payload: vec![1, 2, 3, 4],
        };

        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();

        let pcb = table.get(handle).unwrap();
        assert!(pcb.recv_buf.is_empty());
        assert_eq!(pcb.rcv.nxt, 1001); // unchanged
        let sent = ip.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let parsed = crate::tcp::header::parse(&sent[0], endpoint(10, 0, 0, 2, 80).addr, endpoint(10, 0, 0, 9, 5555).addr).unwrap();
        assert_eq!(parsed.ack, 1001);
    }

    #[test]
    fn segment_to_no_matching_pcb_gets_reset() {
        let mut table = PcbTable::new(4, 4096);

        let seg = ArrivingSegment {
            local: endpoint(10, 0, 0, 2, 80),
            foreign: endpoint(10, 0, 0, 9, 5555),
            seq: 1,
            ack: 0,
            len: 0,
            flags: Flags::SYN,
            window: 4096,
            payload: Vec::new(),
        };

        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();
        assert_eq!(ip.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn bare_syn_to_no_pcb_gets_rst_ack_with_logical_length_accounted() {
        // spec.md §8 scenario 5: a bare SYN seq=9 to an empty PCB table must
        // draw RST|ACK seq=0 ack=10 — the acknowledged sequence must count
        // the SYN itself as one octet of logical length (§3, §4.5 step 6),
        // built here through the real `from_view` conversion rather than a
        // hand-set `len` so the logical-length computation is what's tested.
        let local = Ipv4Addr::new(10, 0, 0, 2);
        let foreign = Ipv4Addr::new(10, 0, 0, 9);
        let wire = crate::tcp::header::build(
            crate::tcp::header::BuildParams {
                src_port: 5555,
                dst_port: 80,
                seq: 9,
                ack: 0,
                flags: Flags::SYN,
                window: 4096,
                payload: Vec::new(),
            },
            foreign,
            local,
        );
        let view = crate::tcp::header::parse(&wire, foreign, local).unwrap();
        let seg = ArrivingSegment::from_view(&view, local, foreign);
        assert_eq!(seg.len, 1); // payload 0 + SYN 1

        let mut table = PcbTable::new(4, 4096);
        let ip = RecordingIp::new();
        segment_arrives(&mut table, &seg, &ip).unwrap();

        let sent = ip.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let parsed = crate::tcp::header::parse(&sent[0], local, foreign).unwrap();
        assert!(parsed.flags.contains(Flags::RST) && parsed.flags.contains(Flags::ACK));
        assert_eq!(parsed.seq, 0);
        assert_eq!(parsed.ack, 10);
    }
}
