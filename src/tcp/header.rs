//! The TCP wire header (§3, §4.1): fixed 20 bytes, no options (§1 Non-goal).

use bitflags::bitflags;

use crate::error::{Result, TcpError};
use crate::ip::address::Ipv4Addr;
use crate::ip::checksum::{self, Checksum};

pub const HEADER_LEN: usize = 20;
const DATA_OFFSET_WORDS: u8 = 5; // 5 * 4 = 20, no options ever emitted

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

/// A parsed TCP segment: header fields plus a borrowed view of the payload.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeaderView<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: &'a [u8],
}

/// Parses and checksum-verifies a TCP segment. `src`/`dst` are the IP
/// addresses the pseudo-header checksum was computed over.
pub fn parse<'a>(bytes: &'a [u8], src: Ipv4Addr, dst: Ipv4Addr) -> Result<TcpHeaderView<'a>> {
    if bytes.len() < HEADER_LEN {
        return Err(TcpError::Malformed("TCP segment shorter than minimum header"));
    }

    let data_offset = ((bytes[12] >> 4) as usize) << 2;
    if data_offset < HEADER_LEN {
        return Err(TcpError::Malformed("TCP data offset shorter than minimum header"));
    }
    if bytes.len() < data_offset {
        return Err(TcpError::Malformed("TCP segment shorter than its data offset"));
    }
    if data_offset != HEADER_LEN {
        return Err(TcpError::Unsupported("TCP options are not supported"));
    }

    let pseudo = checksum::pseudo_header_sum(src.octets(), dst.octets(), crate::ip::header::PROTOCOL_TCP, bytes.len() as u16);
    let mut sum = Checksum::with_initial(pseudo);
    sum.push(bytes);
    if sum.finish() != 0 {
        return Err(TcpError::Malformed("TCP checksum mismatch"));
    }

    let flags = Flags::from_bits_truncate(bytes[13]);

    Ok(TcpHeaderView {
        src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
        dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
        seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        flags,
        window: u16::from_be_bytes([bytes[14], bytes[15]]),
        payload: &bytes[HEADER_LEN..],
    })
}

/// Parameters for building an outgoing segment; named fields rather than a
/// positional argument list because §4.4 enumerates exactly these.
pub struct BuildParams {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: Vec<u8>,
}

/// Builds a complete TCP segment (header + payload) with pseudo-header
/// checksum computed over `src`/`dst`.
pub fn build(params: BuildParams, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let total_len = HEADER_LEN + params.payload.len();
    let mut out = Vec::with_capacity(total_len);

    out.extend_from_slice(&params.src_port.to_be_bytes());
    out.extend_from_slice(&params.dst_port.to_be_bytes());
    out.extend_from_slice(&params.seq.to_be_bytes());
    out.extend_from_slice(&params.ack.to_be_bytes());
    out.push(DATA_OFFSET_WORDS << 4);
    out.push(params.flags.bits());
    out.extend_from_slice(&params.window.to_be_bytes());
    out.extend_from_slice(&[0, 0]); // checksum placeholder
    out.extend_from_slice(&[0, 0]); // urgent pointer, always zero (§1 Non-goal)
    out.extend_from_slice(&params.payload);

    let pseudo = checksum::pseudo_header_sum(src.octets(), dst.octets(), crate::ip::header::PROTOCOL_TCP, total_len as u16);
    let sum = checksum::checksum(&out, pseudo);
    out[16..18].copy_from_slice(&sum.to_be_bytes());

    out
}
