//! The PCB table (§3, §4.3): a fixed-capacity arena of connection control
//! blocks identified by stable integer handles. No PCB is ever allocated or
//! freed from the heap once the table is constructed.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::ip::address::IpEndpoint;
use crate::sched::SchedCtx;

/// Index into the PCB arena. Stable for the lifetime of a connection; reused
/// only after the slot has been fully released.
pub type ConnectionHandle = usize;

/// The full RFC 793 state set. Only the transitions described in §4.6 are
/// implemented; the rest of the enum exists because the state variable is
/// part of the PCB's observable shape (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Free,
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

/// Send-sequence-space variables, named after the RFC 793 diagram.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendSpace {
    pub una: u32,
    pub nxt: u32,
    pub wnd: u16,
    pub up: bool,
    pub wl1: u32,
    pub wl2: u32,
}

/// Receive-sequence-space variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvSpace {
    pub nxt: u32,
    pub wnd: u16,
    pub up: bool,
}

/// One connection control block.
#[derive(Debug)]
pub struct Pcb {
    pub state: State,
    pub local: IpEndpoint,
    pub foreign: IpEndpoint,
    pub snd: SendSpace,
    pub rcv: RecvSpace,
    pub iss: u32,
    pub irs: u32,
    pub mtu: u16,
    pub mss: u16,
    /// Bytes delivered to the receiver but not yet consumed by `receive`.
    pub recv_buf: VecDeque<u8>,
    pub recv_buf_capacity: usize,
    /// Set by `release` when a sleeper still holds a reference to `ctx`;
    /// the last sleeper to wake finishes the release itself (§4.3, §7).
    pub pending_release: bool,
    pub ctx: Arc<SchedCtx>,
}

impl Pcb {
    fn free(recv_buffer_size: usize) -> Self {
        Pcb {
            state: State::Free,
            local: IpEndpoint::WILDCARD,
            foreign: IpEndpoint::WILDCARD,
            snd: SendSpace::default(),
            rcv: RecvSpace::default(),
            iss: 0,
            irs: 0,
            mtu: 0,
            mss: 0,
            recv_buf: VecDeque::with_capacity(recv_buffer_size),
            recv_buf_capacity: recv_buffer_size,
            pending_release: false,
            ctx: Arc::new(SchedCtx::new()),
        }
    }
}

/// The fixed-size arena itself (§3: "a fixed table of a bounded number of
/// slots, not a dynamically growable collection").
#[derive(Debug)]
pub struct PcbTable {
    pcbs: Vec<Pcb>,
    recv_buffer_size: usize,
}

impl PcbTable {
    pub fn new(capacity: usize, recv_buffer_size: usize) -> Self {
        let pcbs = (0..capacity).map(|_| Pcb::free(recv_buffer_size)).collect();
        PcbTable {
            pcbs,
            recv_buffer_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pcbs.len()
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&Pcb> {
        self.pcbs.get(handle).filter(|p| p.state != State::Free)
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut Pcb> {
        self.pcbs.get_mut(handle).filter(|p| p.state != State::Free)
    }

    /// Scans for the first `Free` slot, marks it `Closed`, and hands back its
    /// handle. Returns `None` if the table is exhausted.
    pub fn alloc(&mut self) -> Option<ConnectionHandle> {
        let idx = self.pcbs.iter().position(|p| p.state == State::Free)?;
        self.pcbs[idx] = Pcb::free(self.recv_buffer_size);
        self.pcbs[idx].state = State::Closed;
        Some(idx)
    }

    /// Releases a PCB. If another thread is still blocked on this PCB's
    /// scheduling context, the slot is left intact and marked
    /// `pending_release`; callers must wake waiters and the last one to
    /// observe the wakeup completes the release via
    /// [`PcbTable::finish_deferred_release`].
    pub fn release(&mut self, handle: ConnectionHandle) {
        let Some(pcb) = self.pcbs.get_mut(handle) else {
            return;
        };
        if Arc::strong_count(&pcb.ctx) > 1 {
            pcb.pending_release = true;
            pcb.ctx.wake();
        } else {
            self.pcbs[handle] = Pcb::free(self.recv_buffer_size);
        }
    }

    /// Called by a waiter immediately after reacquiring the table lock
    /// following a sleep on `handle`. If the PCB was marked for deferred
    /// release and this waiter was the last one holding a reference to its
    /// context, finishes zeroing the slot.
    pub fn finish_deferred_release(&mut self, handle: ConnectionHandle) {
        let Some(pcb) = self.pcbs.get(handle) else {
            return;
        };
        if pcb.pending_release && Arc::strong_count(&pcb.ctx) <= 1 {
            self.pcbs[handle] = Pcb::free(self.recv_buffer_size);
        }
    }

    /// Selects a PCB by local endpoint and, optionally, foreign endpoint.
    ///
    /// `foreign = None` matches on the local endpoint alone and returns the
    /// first hit (used when registering or looking up a listener by its own
    /// address). `foreign = Some(_)` first looks for an exact 4-tuple match,
    /// then falls back to a `Listen`-state PCB with a wildcard foreign
    /// endpoint — the classic "more specific beats LISTEN" dispatch rule.
    pub fn select(&self, local: IpEndpoint, foreign: Option<IpEndpoint>) -> Option<ConnectionHandle> {
        let mut listen_fallback = None;

        for (idx, pcb) in self.pcbs.iter().enumerate() {
            if pcb.state == State::Free {
                continue;
            }
            let local_matches = (pcb.local.is_wildcard_addr() || pcb.local.addr == local.addr)
                && pcb.local.port == local.port;
            if !local_matches {
                continue;
            }

            let Some(foreign) = foreign else {
                return Some(idx);
            };

            if pcb.foreign == foreign {
                return Some(idx);
            }

            if pcb.state == State::Listen && pcb.foreign == IpEndpoint::WILDCARD {
                listen_fallback = Some(idx);
            }
        }

        listen_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::address::Ipv4Addr;

    fn endpoint(a: u8, b: u8, c: u8, d: u8, port: u16) -> IpEndpoint {
        IpEndpoint::new(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn alloc_hands_out_distinct_handles_until_exhausted() {
        let mut table = PcbTable::new(2, 4096);
        let a = table.alloc().unwrap();
        let b = table.alloc().unwrap();
        assert_ne!(a, b);
        assert!(table.alloc().is_none());
    }

    #[test]
    fn release_frees_a_quiescent_slot_for_reuse() {
        let mut table = PcbTable::new(1, 4096);
        let handle = table.alloc().unwrap();
        table.release(handle);
        assert!(table.alloc().is_some());
    }

    #[test]
    fn release_with_outstanding_waiter_defers_and_last_waiter_finishes() {
        let mut table = PcbTable::new(1, 4096);
        let handle = table.alloc().unwrap();
        let waiter_ref = table.get(handle).unwrap().ctx.clone();

        table.release(handle);
        // Waiter's Arc clone is still alive, so the slot must not be freed.
        assert!(table.alloc().is_none());

        drop(waiter_ref);
        table.finish_deferred_release(handle);
        assert!(table.alloc().is_some());
    }

    #[test]
    fn select_prefers_exact_foreign_match_over_listen_fallback() {
        let mut table = PcbTable::new(4, 4096);

        let listener = table.alloc().unwrap();
        table.get_mut(listener).unwrap().state = State::Listen;
        table.get_mut(listener).unwrap().local = endpoint(0, 0, 0, 0, 80);
        table.get_mut(listener).unwrap().foreign = IpEndpoint::WILDCARD;

        let established = table.alloc().unwrap();
        table.get_mut(established).unwrap().state = State::Established;
        table.get_mut(established).unwrap().local = endpoint(10, 0, 0, 2, 80);
        table.get_mut(established).unwrap().foreign = endpoint(10, 0, 0, 9, 5555);

        let local = endpoint(10, 0, 0, 2, 80);
        let foreign = endpoint(10, 0, 0, 9, 5555);
        assert_eq!(table.select(local, Some(foreign)), Some(established));

        let other_foreign = endpoint(10, 0, 0, 77, 1234);
        assert_eq!(table.select(local, Some(other_foreign)), Some(listener));
    }

    #[test]
    fn select_with_no_foreign_matches_on_local_alone() {
        let mut table = PcbTable::new(2, 4096);
        let handle = table.alloc().unwrap();
        table.get_mut(handle).unwrap().local = endpoint(0, 0, 0, 0, 443);

        assert_eq!(table.select(endpoint(0, 0, 0, 0, 443), None), Some(handle));
        assert_eq!(table.select(endpoint(0, 0, 0, 0, 9999), None), None);
    }
}
