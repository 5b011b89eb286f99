//! Synthetic spot availability traces
//!
//! Models each region as alternating up/down runs whose lengths are drawn
//! from exponential distributions (rounded up to whole epochs):
//! - Mean up-run length controls how long spot survives once granted
//! - Mean down-run length controls how long outages last
//! - Regions are independent; a seed makes every trace reproducible

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

/// Alternating up/down availability generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvailabilityGenerator {
    mean_up_epochs: f64,
    mean_down_epochs: f64,
}

impl AvailabilityGenerator {
    /// Create a generator
    ///
    /// # Arguments
    /// * `mean_up_epochs` - Mean length of an available run (at least 1)
    /// * `mean_down_epochs` - Mean length of an outage (at least 1)
    pub fn new(mean_up_epochs: f64, mean_down_epochs: f64) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.max(1.0) } else { 1.0 };
        Self {
            mean_up_epochs: clamp(mean_up_epochs),
            mean_down_epochs: clamp(mean_down_epochs),
        }
    }

    /// Long-run fraction of available epochs
    pub fn expected_availability(&self) -> f64 {
        self.mean_up_epochs / (self.mean_up_epochs + self.mean_down_epochs)
    }

    fn run_length<R: Rng>(rng: &mut R, mean: f64) -> usize {
        let drawn = match Exp::new(1.0 / mean) {
            Ok(exp) => exp.sample(rng),
            Err(_) => mean,
        };
        drawn.ceil().max(1.0) as usize
    }

    /// Generate one region's availability for `epochs` epochs
    pub fn generate<R: Rng>(&self, rng: &mut R, epochs: usize) -> Vec<bool> {
        let mut trace = Vec::with_capacity(epochs);
        let mut up = rng.gen_bool(self.expected_availability());

        while trace.len() < epochs {
            let mean = if up {
                self.mean_up_epochs
            } else {
                self.mean_down_epochs
            };
            let run = Self::run_length(rng, mean).min(epochs - trace.len());
            trace.extend(std::iter::repeat_n(up, run));
            up = !up;
        }
        trace
    }

    /// Generate independent traces for `regions` regions from one seed
    pub fn generate_regions(&self, seed: u64, regions: usize, epochs: usize) -> Vec<Vec<bool>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..regions)
            .map(|_| self.generate(&mut rng, epochs))
            .collect()
    }

    /// Always available
    pub fn always(epochs: usize) -> Vec<bool> {
        vec![true; epochs]
    }

    /// Never available
    pub fn never(epochs: usize) -> Vec<bool> {
        vec![false; epochs]
    }

    /// Available except for `len` epochs starting at `start`
    pub fn outage(epochs: usize, start: usize, len: usize) -> Vec<bool> {
        (0..epochs)
            .map(|t| t < start || t >= start.saturating_add(len))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_generation() {
        assert_eq!(AvailabilityGenerator::always(3), vec![true; 3]);
        assert_eq!(AvailabilityGenerator::never(2), vec![false; 2]);
        assert_eq!(
            AvailabilityGenerator::outage(6, 1, 3),
            vec![true, false, false, false, true, true]
        );
    }

    #[test]
    fn test_generation_is_seeded() {
        let generator = AvailabilityGenerator::new(10.0, 5.0);
        let a = generator.generate_regions(7, 3, 500);
        let b = generator.generate_regions(7, 3, 500);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|r| r.len() == 500));
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn test_availability_fraction_is_plausible() {
        let generator = AvailabilityGenerator::new(20.0, 20.0);
        let traces = generator.generate_regions(42, 4, 5000);
        let up = traces.iter().flatten().filter(|a| **a).count() as f64;
        let fraction = up / 20_000.0;
        assert!((0.35..0.65).contains(&fraction), "fraction {fraction}");
    }

    #[test]
    fn test_invalid_means_are_clamped() {
        let generator = AvailabilityGenerator::new(0.0, f64::NAN);
        assert_eq!(generator.expected_availability(), 0.5);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(generator.generate(&mut rng, 10).len(), 10);
    }
}
