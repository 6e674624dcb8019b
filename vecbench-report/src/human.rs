//! Human-readable Output
//!
//! Terminal summary of a run: verification verdict first, then latency
//! statistics per metric and where their artifacts went.

use crate::report::RunReport;

fn millis(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3} ms", v),
        None => "-".to_string(),
    }
}

/// Format a report for terminal display
pub fn format_human_output(report: &RunReport) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("VecBench Results\n");
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    let config = &report.meta.config;
    output.push_str(&format!(
        "  bridge: {}  max length: {}  sampling: {} ns\n",
        config.bridge, config.max_vector_length, config.sampling_rate_ns
    ));
    output.push_str(&format!(
        "  stopped: {}  elapsed: {:.1} ms  throughput: {:.1} items/s\n\n",
        report.summary.stop_reason,
        report.summary.elapsed_ms,
        report.summary.throughput_items_per_sec
    ));

    let v = &report.verification;
    let icon = if report.summary.passed { "✓" } else { "✗" };
    output.push_str("Verification\n");
    output.push_str(&"-".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "  {} {} processed, {} correct\n",
        icon, v.processed, v.correct
    ));
    if v.failures() > 0 {
        output.push_str(&format!(
            "      value mismatches: {}  shape mismatches: {}  (bridge failures: {})\n",
            v.value_mismatches, v.shape_mismatches, v.bridge_failures
        ));
    }
    output.push_str(&format!(
        "      latency samples kept: {}  dropped by sampler: {}\n\n",
        report.sampler.accepted, report.sampler.dropped
    ));

    for snapshot in &report.metrics {
        output.push_str(&format!("Metric: {}\n", snapshot.name));
        output.push_str(&"-".repeat(60));
        output.push('\n');
        output.push_str(&format!(
            "      samples: {}  total: {}\n",
            snapshot.samples, snapshot.total
        ));
        output.push_str(&format!(
            "      mean: {}  mean(last window): {}\n",
            millis(snapshot.mean),
            millis(snapshot.mean_last_window)
        ));
        output.push_str(&format!(
            "      min: {}  max: {}\n",
            millis(snapshot.min),
            millis(snapshot.max)
        ));

        if let Some(artifact) = report.artifacts.iter().find(|a| a.metric == snapshot.name) {
            match (&artifact.path, &artifact.error) {
                (Some(path), _) => output.push_str(&format!("      artifact: {}\n", path)),
                (None, Some(error)) => {
                    output.push_str(&format!("      artifact: NOT WRITTEN ({})\n", error))
                }
                (None, None) => {}
            }
        }
        output.push('\n');
    }

    if let Some(p) = &report.latency_percentiles {
        output.push_str(&format!(
            "  latency p50: {:.3} ms  p90: {:.3} ms  p99: {:.3} ms  p99.9: {:.3} ms\n",
            p.p50, p.p90, p.p99, p.p999
        ));
    }

    output
}
