//! Inter-arrival interval generators

use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Generates inter-arrival intervals for rate mode.
pub enum IntervalGenerator {
    /// `1 / rate` between every pair of requests.
    Constant { period: Duration },
    /// Exponential inter-arrivals `-ln(U) / rate`, U uniform in (0, 1],
    /// giving a Poisson arrival process.
    Poisson { rate: f64, rng: StdRng },
}

impl IntervalGenerator {
    pub fn constant(rate: f64) -> Self {
        Self::Constant {
            period: Duration::from_secs_f64(1.0 / rate),
        }
    }

    pub fn poisson(rate: f64, rng: StdRng) -> Self {
        Self::Poisson { rate, rng }
    }

    pub fn next_interval(&mut self) -> Duration {
        match self {
            Self::Constant { period } => *period,
            Self::Poisson { rate, rng } => {
                // random() is uniform in [0, 1); 1 - u lands in (0, 1].
                let u = 1.0 - rng.random::<f64>();
                Duration::from_secs_f64(-u.ln() / *rate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velobench_core::context::derive_rng;

    #[test]
    fn constant_is_exactly_one_over_rate() {
        let mut generator = IntervalGenerator::constant(50.0);
        assert_eq!(generator.next_interval(), Duration::from_millis(20));
        assert_eq!(generator.next_interval(), Duration::from_millis(20));
    }

    #[test]
    fn poisson_mean_converges_to_one_over_rate() {
        let rate = 50.0;
        let mut generator =
            IntervalGenerator::poisson(rate, derive_rng(42, "timing.request.interval"));
        let n = 20_000;
        let total: f64 = (0..n)
            .map(|_| generator.next_interval().as_secs_f64())
            .sum();
        let mean = total / n as f64;
        let expected = 1.0 / rate;
        assert!(
            (mean - expected).abs() < 0.05 * expected,
            "mean {mean} vs expected {expected}"
        );
    }

    #[test]
    fn poisson_is_deterministic_under_seed() {
        let mut a = IntervalGenerator::poisson(10.0, derive_rng(7, "timing.request.interval"));
        let mut b = IntervalGenerator::poisson(10.0, derive_rng(7, "timing.request.interval"));
        for _ in 0..100 {
            assert_eq!(a.next_interval(), b.next_interval());
        }
    }

    #[test]
    fn poisson_intervals_are_always_positive_and_finite() {
        let mut generator =
            IntervalGenerator::poisson(100.0, derive_rng(1, "timing.request.interval"));
        for _ in 0..10_000 {
            let interval = generator.next_interval().as_secs_f64();
            assert!(interval.is_finite());
            assert!(interval >= 0.0);
        }
    }
}
