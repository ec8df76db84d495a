//! The user-facing blocking API (§4.7): `open_passive`, `send`, `receive`,
//! `close`. Each blocking call releases the engine's mutex while parked and
//! reacquires it before re-checking its condition (§5).

use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TcpError};
use crate::ip::address::IpEndpoint;
use crate::ip::IpOutput;
use crate::sched::WakeReason;
use crate::tcp::header::Flags;
use crate::tcp::output;
use crate::tcp::pcb::{ConnectionHandle, PcbTable, State};

/// Registers a PCB in `LISTEN` on `local` (optionally bound to a specific
/// `foreign`, per RFC 793's allowance for a targeted passive open) and
/// blocks until a connection completes the handshake or the call is
/// interrupted. Active open is a non-goal (§1) and is not exposed here.
pub fn open_passive(
    mutex: &Mutex<PcbTable>,
    local: IpEndpoint,
    foreign: Option<IpEndpoint>,
) -> Result<ConnectionHandle> {
    let mut table = mutex.lock().unwrap();
    let handle = table.alloc().ok_or(TcpError::Exhausted("PCB table full"))?;

    {
        let pcb = table.get_mut(handle).unwrap();
        pcb.local = local;
        if let Some(foreign) = foreign {
            pcb.foreign = foreign;
        }
        pcb.state = State::Listen;
    }
    debug!(local = %local.addr, port = local.port, "passive open: waiting for connection");

    loop {
        let state = table.get(handle).map(|p| p.state);
        match state {
            Some(State::Established) => {
                let pcb = table.get(handle).unwrap();
                debug!(local = %pcb.local.addr, foreign = %pcb.foreign.addr, "connection established");
                return Ok(handle);
            }
            Some(State::Listen) | Some(State::SynReceived) => {
                let ctx = table.get(handle).unwrap().ctx.clone();
                let (guard, reason) = ctx.sleep(table, None);
                table = guard;
                table.finish_deferred_release(handle);

                if reason == WakeReason::Interrupted {
                    if let Some(pcb) = table.get_mut(handle) {
                        pcb.state = State::Closed;
                    }
                    table.release(handle);
                    return Err(TcpError::Interrupted);
                }
            }
            Some(_) | None => {
                table.release(handle);
                return Err(TcpError::Reset);
            }
        }
    }
}

/// Sends `data`, splitting it into MSS-sized, peer-window-bounded segments,
/// blocking whenever the peer's advertised window is currently exhausted.
/// `mtu` is the outgoing interface's MTU, used to derive the MSS (§4.7).
pub fn send(mutex: &Mutex<PcbTable>, handle: ConnectionHandle, data: &[u8], mtu: u16, ip: &dyn IpOutput) -> Result<usize> {
    let mut table = mutex.lock().unwrap();
    let mss = mtu
        .saturating_sub((crate::ip::header::MIN_HEADER_LEN + crate::tcp::header::HEADER_LEN) as u16)
        .max(1) as usize;
    let mut sent = 0usize;

    loop {
        let state = table.get(handle).map(|p| p.state).ok_or(TcpError::NotFound)?;
        if state != State::Established {
            return Err(TcpError::Reset);
        }

        let (una, nxt, wnd) = {
            let pcb = table.get(handle).unwrap();
            (pcb.snd.una, pcb.snd.nxt, pcb.snd.wnd)
        };
        let outstanding = nxt.wrapping_sub(una) as usize;
        let cap = (wnd as usize).saturating_sub(outstanding);

        if cap == 0 {
            let ctx = table.get(handle).unwrap().ctx.clone();
            let (guard, reason) = ctx.sleep(table, None);
            table = guard;
            table.finish_deferred_release(handle);
            if reason == WakeReason::Interrupted {
                // Only an interrupted sleep short-circuits with whatever was
                // sent so far (§4.7); a plain window-exhaustion wait always
                // falls through to retry, even with partial progress already
                // made (§8 scenario 3: sleep, then resume once the peer
                // advertises more window).
                return if sent > 0 {
                    Ok(sent)
                } else {
                    Err(TcpError::Interrupted)
                };
            }
            continue;
        }

        if sent >= data.len() {
            return Ok(sent);
        }

        let slen = mss.min(data.len() - sent).min(cap);
        let chunk = data[sent..sent + slen].to_vec();

        if output::send_segment(table.get(handle).unwrap(), Flags::ACK | Flags::PSH, chunk, ip).is_err() {
            if let Some(pcb) = table.get_mut(handle) {
                pcb.state = State::Closed;
            }
            table.release(handle);
            return Err(TcpError::FatalTx("segment transmission failed"));
        }

        let new_nxt = table.get(handle).unwrap().snd.nxt.wrapping_add(slen as u32);
        table.get_mut(handle).unwrap().snd.nxt = new_nxt;
        sent += slen;
    }
}

/// Reads up to `buf.len()` bytes received so far, blocking if none are
/// available yet.
pub fn receive(mutex: &Mutex<PcbTable>, handle: ConnectionHandle, buf: &mut [u8]) -> Result<usize> {
    receive_with_deadline(mutex, handle, buf, None)
}

/// Like [`receive`] but gives up and returns `Ok(0)` if `deadline` elapses
/// before any data arrives — the scheduling primitive supports timed waits
/// (§5) even though the core spec only requires the unbounded form.
pub fn receive_timeout(mutex: &Mutex<PcbTable>, handle: ConnectionHandle, buf: &mut [u8], deadline: Duration) -> Result<usize> {
    receive_with_deadline(mutex, handle, buf, Some(deadline))
}

fn receive_with_deadline(mutex: &Mutex<PcbTable>, handle: ConnectionHandle, buf: &mut [u8], deadline: Option<Duration>) -> Result<usize> {
    let mut table = mutex.lock().unwrap();
    loop {
        let state = table.get(handle).map(|p| p.state).ok_or(TcpError::NotFound)?;
        if state != State::Established {
            return Err(TcpError::Reset);
        }

        let available = table.get(handle).unwrap().recv_buf.len();
        if available == 0 {
            let ctx = table.get(handle).unwrap().ctx.clone();
            let (guard, reason) = ctx.sleep(table, deadline);
            table = guard;
            table.finish_deferred_release(handle);
            match reason {
                WakeReason::Interrupted => return Err(TcpError::Interrupted),
                WakeReason::TimedOut => return Ok(0),
                WakeReason::Woken => continue,
            }
        }

        let pcb = table.get_mut(handle).unwrap();
        let n = buf.len().min(pcb.recv_buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = pcb.recv_buf.pop_front().unwrap();
        }
        pcb.rcv.wnd = (pcb.rcv.wnd as usize + n).min(pcb.recv_buf_capacity) as u16;
        return Ok(n);
    }
}

/// Resets the connection and releases its PCB. Never blocks (§4.7).
pub fn close(mutex: &Mutex<PcbTable>, handle: ConnectionHandle, ip: &dyn IpOutput) -> Result<()> {
    let mut table = mutex.lock().unwrap();
    let pcb = table.get(handle).ok_or(TcpError::NotFound)?;
    let _ = output::send_segment(pcb, Flags::RST, Vec::new(), ip);
    table.release(handle);
    Ok(())
}
