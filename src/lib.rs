//! A user-space engine implementing the RFC 793 §3.9 segment-arrival
//! subset: passive open, a fixed PCB arena, and the blocking
//! open/send/receive/close surface built on top of it. Active open,
//! retransmission, congestion control, and IP fragmentation are out of
//! scope (see `SPEC_FULL.md`).

pub mod error;
pub mod ip;
pub mod sched;
pub mod tcp;

pub use error::{Result, TcpError};
pub use ip::{IpEndpoint, Interface, InterfaceTable, IpOutput, Ipv4Addr, ProtocolHandler, ProtocolTable, Router};
pub use sched::{SchedCtx, WakeReason};
pub use tcp::pcb::ConnectionHandle;
pub use tcp::{StackConfig, TcpEngine};
