/// RTP sequence number arithmetic
///
/// Sequence numbers are 16 bits and wrap. Every comparison goes through these
/// helpers so the wrap at 0xFFFF -> 0x0000 is never mistaken for a jump.

/// Half the sequence space. Distances at or beyond this are read as "behind".
pub const HALF_RANGE: u16 = 0x8000;

/// Forward distance from `from` to `to`, modulo 2^16
#[inline]
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// Check if seq_a is before seq_b (handles wraparound)
#[inline]
pub fn is_before(seq_a: u16, seq_b: u16) -> bool {
    let diff = seq_b.wrapping_sub(seq_a);
    diff > 0 && diff < HALF_RANGE
}

/// Number of sequence numbers `seq` lies behind `reference`, or None if it is
/// at or ahead of it
#[inline]
pub fn behind_by(seq: u16, reference: u16) -> Option<u16> {
    if is_before(seq, reference) {
        Some(reference.wrapping_sub(seq))
    } else {
        None
    }
}



#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn distance_never_panics() {
        let a: u16 = kani::any();
        let b: u16 = kani::any();
        let d = distance(a, b);
        assert!(a.wrapping_add(d) == b);
    }

    #[kani::proof]
    fn behind_by_is_bounded() {
        let seq: u16 = kani::any();
        let reference: u16 = kani::any();
        if let Some(n) = behind_by(seq, reference) {
            assert!(n > 0 && n < HALF_RANGE);
        }
    }
}
