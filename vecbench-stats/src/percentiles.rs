//! Percentile Computation
//!
//! Tail latency percentiles for run reports. Computed over every retained
//! sample; outliers are the tail signal and are never removed.

use serde::{Deserialize, Serialize};

/// Standard latency percentiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: f64,
    /// 90th percentile
    pub p90: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
}

/// Compute a single percentile from samples
///
/// Uses linear interpolation between nearest ranks.
///
/// # Examples
///
/// ```
/// # use vecbench_stats::compute_percentile;
/// let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
/// assert_eq!(compute_percentile(&samples, 50.0), 3.0);
/// ```
pub fn compute_percentile(samples: &[f64], percentile: f64) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_of_sorted(&sorted, percentile)
}

fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (percentile / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower_idx = rank.floor() as usize;
            let upper_idx = (lower_idx + 1).min(n - 1);
            let fraction = rank - lower_idx as f64;

            sorted[lower_idx] + fraction * (sorted[upper_idx] - sorted[lower_idx])
        }
    }
}

/// Compute all standard percentiles, or `None` for an empty sample set
pub fn compute_percentiles(samples: &[f64]) -> Option<Percentiles> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    Some(Percentiles {
        p50: percentile_of_sorted(&sorted, 50.0),
        p90: percentile_of_sorted(&sorted, 90.0),
        p99: percentile_of_sorted(&sorted, 99.0),
        p999: percentile_of_sorted(&sorted, 99.9),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        let samples = vec![5.0, 1.0, 3.0, 2.0, 4.0];
        let p50 = compute_percentile(&samples, 50.0);
        assert!((p50 - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_extreme_percentiles() {
        let samples: Vec<f64> = (1..=1000).map(|x| x as f64).collect();
        let p = compute_percentiles(&samples).unwrap();

        assert!(p.p99 > 985.0 && p.p99 < 995.0);
        assert!(p.p999 > 998.0 && p.p999 <= 1000.0);
        assert!(p.p90 > 899.0 && p.p90 < 901.0);
    }

    #[test]
    fn test_single_sample() {
        let samples = vec![42.0];
        assert!((compute_percentile(&samples, 99.0) - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_samples() {
        assert!(compute_percentiles(&[]).is_none());
        assert_eq!(compute_percentile(&[], 50.0), 0.0);
    }
}
