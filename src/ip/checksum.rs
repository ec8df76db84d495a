//! One's-complement Internet checksum (RFC 1071), with support for folding
//! in a pseudo-header without materializing a contiguous buffer.

/// Checksum accumulator. Feed it the pseudo-header (if any) followed by the
/// header and payload, then call [`Checksum::finish`].
#[derive(Clone, Copy, Default)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the accumulator with a partial sum already computed elsewhere
    /// (e.g. a pseudo-header folded in word-by-word).
    pub fn with_initial(initial: u16) -> Self {
        Self {
            sum: initial as u32,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(2);
        for word in &mut chunks {
            self.sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        }
        if let [last] = chunks.remainder() {
            self.sum += u16::from_be_bytes([*last, 0]) as u32;
        }
    }

    pub fn finish(mut self) -> u16 {
        while self.sum >> 16 != 0 {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
        !(self.sum as u16)
    }
}

/// Computes the checksum of `bytes` given an optional pre-folded initial sum
/// (e.g. from a pseudo-header), in one call.
pub fn checksum(bytes: &[u8], initial: u16) -> u16 {
    let mut c = Checksum::with_initial(initial);
    c.push(bytes);
    c.finish()
}

/// Folds a pseudo-header's fields into a partial checksum, word by word, so
/// that callers never need to materialize pseudo-header + header + payload
/// as one contiguous buffer.
pub fn pseudo_header_sum(src: [u8; 4], dst: [u8; 4], protocol: u8, length: u16) -> u16 {
    let mut c = Checksum::new();
    c.push(&src);
    c.push(&dst);
    c.push(&[0, protocol]);
    c.push(&length.to_be_bytes());
    c.finish_partial()
}

impl Checksum {
    /// Like [`Checksum::finish`] but without inverting the bits — used when
    /// the caller wants to keep folding more data in afterwards (as with
    /// `pseudo_header_sum` feeding into a further `Checksum::with_initial`).
    fn finish_partial(mut self) -> u16 {
        while self.sum >> 16 != 0 {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
        self.sum as u16
    }
}
