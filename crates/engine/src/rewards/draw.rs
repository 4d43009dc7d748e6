//! Randomness used for tier draws and name picks

use rand::rngs::OsRng;
use rand::Rng;

/// Source of the uniform draws behind a box opening.
///
/// Production uses the operating system's generator; tests inject a fixed
/// sequence.
pub trait DrawSource: Send + Sync {
    /// Uniform value in `[0, 1)`
    fn draw(&self) -> f64;

    /// Uniform index in `0..len`; `len` is never zero
    fn pick(&self, len: usize) -> usize;
}

/// Cryptographically strong draws from `OsRng`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsDrawSource;

impl DrawSource for OsDrawSource {
    fn draw(&self) -> f64 {
        let mut rng = OsRng;
        rng.gen::<f64>()
    }

    fn pick(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        let mut rng = OsRng;
        rng.gen_range(0..len)
    }
}

/// Replays a fixed sequence of draws; index picks always return `pick_index`
#[cfg(test)]
pub(crate) struct FixedDraws {
    draws: std::sync::Mutex<std::collections::VecDeque<f64>>,
    pick_index: usize,
}

#[cfg(test)]
impl FixedDraws {
    pub(crate) fn new(draws: &[f64], pick_index: usize) -> Self {
        Self {
            draws: std::sync::Mutex::new(draws.iter().copied().collect()),
            pick_index,
        }
    }
}

#[cfg(test)]
impl DrawSource for FixedDraws {
    fn draw(&self) -> f64 {
        self.draws.lock().unwrap().pop_front().unwrap_or(0.99)
    }

    fn pick(&self, len: usize) -> usize {
        self.pick_index.min(len - 1)
    }
}
