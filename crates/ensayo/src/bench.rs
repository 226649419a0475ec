//! Micro-benchmarks for use inside test bodies.
//!
//! ```rust
//! use ensayo::bench::{bench, BenchOptions};
//!
//! let report = bench("sum", BenchOptions::new(10).with_warmup(2), || {
//!     (0..100).sum::<u64>();
//! })
//! .unwrap();
//! assert_eq!(report.iterations, 10);
//! ```

use crate::result::{EnsayoError, EnsayoResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;

/// Iteration counts for one benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchOptions {
    /// Measured iterations
    pub n: usize,
    /// Unmeasured iterations run first
    pub warmup: usize,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self { n: 100, warmup: 5 }
    }
}

impl BenchOptions {
    /// `n` measured iterations with no warmup
    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self { n, warmup: 0 }
    }

    /// Set warmup iterations
    #[must_use]
    pub const fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    fn validate(&self, name: &str) -> EnsayoResult<()> {
        if self.n == 0 {
            return Err(EnsayoError::config(format!(
                "bench(\"{name}\") needs at least one measured iteration"
            )));
        }
        Ok(())
    }
}

/// Timing statistics in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchStats {
    /// Number of samples
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// 95th percentile
    pub p95: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl BenchStats {
    /// Calculate statistics from samples
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                median: 0.0,
                p95: 0.0,
                std_dev: 0.0,
            };
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            median: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            std_dev: variance.sqrt(),
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower].mul_add(1.0 - weight, sorted[upper] * weight)
    }
}

/// Result of one benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchReport {
    pub name: String,
    /// Measured iterations
    pub iterations: usize,
    pub stats: BenchStats,
}

/// Run `f` `warmup` times unmeasured, then `n` times measured
pub fn bench<F: FnMut()>(name: &str, options: BenchOptions, mut f: F) -> EnsayoResult<BenchReport> {
    options.validate(name)?;
    for _ in 0..options.warmup {
        f();
    }
    let samples: Vec<f64> = (0..options.n)
        .map(|_| {
            let start = Instant::now();
            f();
            start.elapsed().as_secs_f64() * 1000.0
        })
        .collect();
    Ok(finish(name, &samples))
}

/// Async counterpart of [`bench`]
pub async fn bench_async<F, Fut>(name: &str, options: BenchOptions, mut f: F) -> EnsayoResult<BenchReport>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    options.validate(name)?;
    for _ in 0..options.warmup {
        f().await;
    }
    let mut samples = Vec::with_capacity(options.n);
    for _ in 0..options.n {
        let start = Instant::now();
        f().await;
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(finish(name, &samples))
}

fn finish(name: &str, samples: &[f64]) -> BenchReport {
    let stats = BenchStats::from_samples(samples);
    tracing::debug!(
        bench = name,
        iterations = samples.len(),
        mean_ms = stats.mean,
        p95_ms = stats.p95,
        "benchmark finished"
    );
    BenchReport {
        name: name.to_string(),
        iterations: samples.len(),
        stats,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runs_warmup_plus_measured() {
        let mut calls = 0;
        let report = bench("count", BenchOptions::new(10).with_warmup(2), || calls += 1).unwrap();
        assert!(calls >= 12);
        assert_eq!(report.iterations, 10);
        assert_eq!(report.stats.count, 10);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = bench("none", BenchOptions::new(0), || {}).unwrap_err();
        assert!(matches!(err, EnsayoError::Config { .. }));
    }

    #[test]
    fn test_stats_from_samples() {
        let stats = BenchStats::from_samples(&[4.0, 1.0, 3.0, 2.0, 5.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.mean, 3.0);
        assert_eq!(stats.median, 3.0);
        assert!((stats.p95 - 4.8).abs() < 1e-9);
        assert!((stats.std_dev - 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats() {
        assert_eq!(BenchStats::from_samples(&[]).count, 0);
    }

    #[tokio::test]
    async fn test_bench_async_counts_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let report = bench_async("tick", BenchOptions::new(3).with_warmup(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.iterations, 3);
    }
}
