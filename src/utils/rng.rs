//! Simple random number generator for reproducibility.
//!
//! A lightweight xorshift PRNG. Two models built from the same seed get
//! identical initial weights and identical dropout masks.

/// Xorshift64 generator.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a generator from a seed. A zero seed is replaced with a fixed
    /// non-zero constant since xorshift never leaves the all-zero state.
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform sample in `[0, 1]`.
    pub fn next_f32(&mut self) -> f32 {
        self.next_u32() as f32 / u32::MAX as f32
    }

    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Derive an independent generator, advancing this one.
    ///
    /// Each dropout layer owns a forked stream so masks differ between layers.
    pub fn fork(&mut self) -> SimpleRng {
        SimpleRng::new(self.next_u64())
    }
}
