//! Sequence-number ring arithmetic.
//!
//! Every discipline draws sequence numbers from `[0, modulus)` and compares
//! them modulo the ring size. Go-Back-N and Selective Repeat size the ring as
//! twice the window, Alternating-Bit uses a ring of two.

/// A bounded sequence-number ring `[0, modulus)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    modulus: u32,
}

impl SeqSpace {
    pub fn new(modulus: u32) -> Self {
        assert!(modulus >= 2, "sequence space needs at least two numbers");
        Self { modulus }
    }

    /// Ring sized for a sliding window: `2 * window_size`.
    pub fn for_window(window_size: usize) -> Self {
        Self::new(2 * window_size as u32)
    }

    pub fn modulus(self) -> u32 {
        self.modulus
    }

    /// The sequence number following `seq`.
    #[inline]
    pub fn next(self, seq: u32) -> u32 {
        (seq + 1) % self.modulus
    }

    /// Forward distance from `from` to `to` around the ring.
    #[inline]
    pub fn distance(self, from: u32, to: u32) -> u32 {
        (to + self.modulus - from % self.modulus) % self.modulus
    }

    /// `true` when `seq` lies in `[base, base + size)` modulo the ring.
    #[inline]
    pub fn in_window(self, base: u32, size: u32, seq: u32) -> bool {
        seq < self.modulus && self.distance(base, seq) < size
    }

    /// Sequence numbers `[base, base + len)` in ring order.
    pub fn walk(self, base: u32, len: u32) -> impl Iterator<Item = u32> {
        let modulus = self.modulus;
        (0..len).map(move |i| (base + i) % modulus)
    }
}
