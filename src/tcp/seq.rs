//! Sequence-space arithmetic. All comparisons on `seq`/`ack` are modulo
//! 2^32; never compare the raw `u32` values with native `<` (§9 design
//! note).

/// `lhs < rhs` in 32-bit wrapping sequence space (RFC 1323).
pub fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

pub fn wrapping_le(lhs: u32, rhs: u32) -> bool {
    lhs == rhs || wrapping_lt(lhs, rhs)
}

pub fn wrapping_gt(lhs: u32, rhs: u32) -> bool {
    wrapping_lt(rhs, lhs)
}

pub fn wrapping_ge(lhs: u32, rhs: u32) -> bool {
    wrapping_le(rhs, lhs)
}

/// Whether `start < x < end` in wrapping sequence space.
pub fn is_between_wrapped(start: u32, x: u32, end: u32) -> bool {
    wrapping_lt(start, x) && wrapping_lt(x, end)
}

/// The acceptability test of §4.6: is a segment with sequence `seg_seq` and
/// logical length `seg_len` acceptable given `rcv_nxt`/`rcv_wnd`?
pub fn segment_acceptable(seg_seq: u32, seg_len: u32, rcv_nxt: u32, rcv_wnd: u16) -> bool {
    let rcv_wnd = rcv_wnd as u32;

    match (seg_len, rcv_wnd) {
        (0, 0) => seg_seq == rcv_nxt,
        (0, _) => is_between_wrapped(rcv_nxt.wrapping_sub(1), seg_seq, rcv_nxt.wrapping_add(rcv_wnd)),
        (_, 0) => false,
        (len, wnd) => {
            is_between_wrapped(rcv_nxt.wrapping_sub(1), seg_seq, rcv_nxt.wrapping_add(wnd))
                || is_between_wrapped(
                    rcv_nxt.wrapping_sub(1),
                    seg_seq.wrapping_add(len).wrapping_sub(1),
                    rcv_nxt.wrapping_add(wnd),
                )
        }
    }
}
