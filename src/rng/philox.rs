//! Philox4x32-10 counter-based generator.
//!
//! The output block is a pure function of (key, counter), so every lane can
//! derive its own stream from (seed, lane, offset) without shared state.

const PHILOX_M0: u32 = 0xD251_1F53;
const PHILOX_M1: u32 = 0xCD9E_8D57;
const PHILOX_W0: u32 = 0x9E37_79B9;
const PHILOX_W1: u32 = 0xBB67_AE85;
const ROUNDS: usize = 10;

const TWO_POW_MINUS_24: f32 = 1.0 / (1u32 << 24) as f32;
const TWO_POW_MINUS_53: f64 = 1.0 / (1u64 << 53) as f64;

#[inline]
fn mulhilo(a: u32, b: u32) -> (u32, u32) {
    let product = (a as u64) * (b as u64);
    (product as u32, (product >> 32) as u32)
}

#[inline]
fn round(ctr: [u32; 4], key: [u32; 2]) -> [u32; 4] {
    let (lo0, hi0) = mulhilo(PHILOX_M0, ctr[0]);
    let (lo1, hi1) = mulhilo(PHILOX_M1, ctr[2]);
    [hi1 ^ ctr[1] ^ key[0], lo1, hi0 ^ ctr[3] ^ key[1], lo0]
}

/// Raw Philox block function.
pub fn philox4x32_10(counter: [u32; 4], key: [u32; 2]) -> [u32; 4] {
    let mut ctr = counter;
    let mut key = key;
    for r in 0..ROUNDS {
        if r > 0 {
            key[0] = key[0].wrapping_add(PHILOX_W0);
            key[1] = key[1].wrapping_add(PHILOX_W1);
        }
        ctr = round(ctr, key);
    }
    ctr
}

/// Per-lane Philox stream.
///
/// The counter's low 64 bits walk through blocks starting at `offset / 4`;
/// the high 64 bits hold the subsequence (lane index), so streams of
/// different lanes never meet.
#[derive(Debug, Clone)]
pub struct Philox4x32 {
    key: [u32; 2],
    block: u64,
    subsequence: u64,
}

impl Philox4x32 {
    /// `offset` counts 32-bit outputs and is expected to be a multiple of 4.
    pub fn new(seed: u64, subsequence: u64, offset: u64) -> Self {
        Self {
            key: [seed as u32, (seed >> 32) as u32],
            block: offset / 4,
            subsequence,
        }
    }

    /// Next four 32-bit outputs.
    pub fn next4(&mut self) -> [u32; 4] {
        let counter = [
            self.block as u32,
            (self.block >> 32) as u32,
            self.subsequence as u32,
            (self.subsequence >> 32) as u32,
        ];
        self.block = self.block.wrapping_add(1);
        philox4x32_10(counter, self.key)
    }

    /// Four f32 uniforms in [0, 1).
    pub fn uniform4(&mut self) -> [f32; 4] {
        self.next4().map(|x| (x >> 8) as f32 * TWO_POW_MINUS_24)
    }

    /// Two f64 uniforms in [0, 1), 53 random bits each.
    pub fn uniform2_double(&mut self) -> [f64; 2] {
        let x = self.next4();
        let a = ((x[0] as u64) << 32) | x[1] as u64;
        let b = ((x[2] as u64) << 32) | x[3] as u64;
        [(a >> 11) as f64 * TWO_POW_MINUS_53, (b >> 11) as f64 * TWO_POW_MINUS_53]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer() {
        // Random123 kat_vectors, philox4x32_10
        assert_eq!(
            philox4x32_10([0, 0, 0, 0], [0, 0]),
            [0x6627_e8d5, 0xe169_c58d, 0xbc57_ac4c, 0x9b00_dbd8]
        );
        assert_eq!(
            philox4x32_10([0xffff_ffff; 4], [0xffff_ffff; 2]),
            [0x408f_276d, 0x41c8_3b0e, 0xa20b_c7c6, 0x6d54_51fd]
        );
    }

    #[test]
    fn test_streams_are_reproducible() {
        let mut a = Philox4x32::new(42, 7, 8);
        let mut b = Philox4x32::new(42, 7, 8);
        for _ in 0..16 {
            assert_eq!(a.next4(), b.next4());
        }
    }

    #[test]
    fn test_offset_skips_whole_blocks() {
        let mut from_zero = Philox4x32::new(5, 3, 0);
        from_zero.next4();
        let second = from_zero.next4();
        let mut from_eight = Philox4x32::new(5, 3, 8);
        assert_eq!(from_eight.next4(), second);
    }

    #[test]
    fn test_lanes_differ() {
        let mut a = Philox4x32::new(1, 0, 0);
        let mut b = Philox4x32::new(1, 1, 0);
        assert_ne!(a.next4(), b.next4());
    }

    #[test]
    fn test_uniforms_in_unit_interval() {
        let mut g = Philox4x32::new(123, 0, 0);
        for _ in 0..1000 {
            for u in g.uniform4() {
                assert!((0.0..1.0).contains(&u));
            }
            for u in g.uniform2_double() {
                assert!((0.0..1.0).contains(&u));
            }
        }
    }
}
