//! Minimal IPv4 header parsing, validation, and construction — just enough
//! to frame TCP (§1: "the IPv4 layer is included only to the degree
//! necessary to frame TCP").

use crate::error::{Result, TcpError};
use crate::ip::address::Ipv4Addr;
use crate::ip::checksum;

pub const MIN_HEADER_LEN: usize = 20;
const VERSION_IPV4: u8 = 4;
pub const PROTOCOL_TCP: u8 = 6;

/// A parsed IPv4 header, referencing a borrowed input buffer.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4HeaderView {
    pub header_len: usize,
    pub total_len: usize,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Parses and validates an IPv4 datagram per §4.2: rejects inputs shorter
/// than the minimum header, non-IPv4, inputs shorter than the declared
/// header or total length, checksum failures, and fragmented traffic.
pub fn parse(bytes: &[u8]) -> Result<Ipv4HeaderView> {
    if bytes.len() < MIN_HEADER_LEN {
        return Err(TcpError::Malformed("IP datagram shorter than minimum header"));
    }

    let vhl = bytes[0];
    let version = vhl >> 4;
    if version != VERSION_IPV4 {
        return Err(TcpError::Malformed("not IPv4"));
    }

    // The source this crate is ported from computes this as
    // `ntoh16(vhl) & 0x0f * 4`, which due to operator precedence multiplies
    // only the low nibble's bit 2 by 4 rather than shifting the whole
    // nibble — flagged in SPEC_FULL.md §4.5. The correct computation reads
    // the header-length nibble from the single byte and scales by 4.
    let header_len = ((vhl & 0x0f) as usize) << 2;

    let total_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

    if bytes.len() < header_len {
        return Err(TcpError::Malformed("shorter than declared header length"));
    }
    if bytes.len() < total_len {
        return Err(TcpError::Malformed("shorter than declared total length"));
    }

    let offset_field = u16::from_be_bytes([bytes[6], bytes[7]]);
    let more_fragments = offset_field & 0x2000 != 0;
    let fragment_offset = offset_field & 0x1fff;
    if more_fragments || fragment_offset != 0 {
        return Err(TcpError::Unsupported("fragmented IP datagrams are not supported"));
    }

    let sum = checksum::checksum(&bytes[..header_len], 0);
    if sum != 0 {
        return Err(TcpError::Malformed("IP header checksum mismatch"));
    }

    let protocol = bytes[9];
    let src = Ipv4Addr::from_octets([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let dst = Ipv4Addr::from_octets([bytes[16], bytes[17], bytes[18], bytes[19]]);

    Ok(Ipv4HeaderView {
        header_len,
        total_len,
        protocol,
        src,
        dst,
    })
}

/// Builds a minimal (no-options) 20-byte IPv4 header with a correct
/// checksum, wrapping `payload`.
pub fn build(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let total_len = MIN_HEADER_LEN + payload.len();
    let mut out = Vec::with_capacity(total_len);

    out.push(0x45); // version 4, IHL 5 (20 bytes, no options)
    out.push(0); // type of service
    out.extend_from_slice(&(total_len as u16).to_be_bytes());
    out.extend_from_slice(&[0, 0]); // identification
    out.extend_from_slice(&[0, 0]); // flags + fragment offset
    out.push(64); // TTL
    out.push(protocol);
    out.extend_from_slice(&[0, 0]); // checksum placeholder
    out.extend_from_slice(&src.octets());
    out.extend_from_slice(&dst.octets());

    let sum = checksum::checksum(&out, 0);
    out[10..12].copy_from_slice(&sum.to_be_bytes());

    out.extend_from_slice(payload);
    out
}
