use crate::{BenchResult, compute_stats};
use flint_perf_recorder::{PerfRecorder, PerfStage};

/// Turns every non-empty recorder stage into a [`BenchResult`].
pub fn stage_results(recorder: &PerfRecorder, unit: &str) -> Vec<BenchResult> {
    PerfStage::ALL
        .iter()
        .filter_map(|&stage| {
            let mut samples = recorder.samples(stage).to_vec();
            if samples.is_empty() {
                return None;
            }
            Some(BenchResult {
                name: stage.name().to_string(),
                unit: unit.to_string(),
                stats: compute_stats(&mut samples),
            })
        })
        .collect()
}

/// Per-stage table; `total_stage` is the 100% line the others are compared to.
pub fn print_stage_table(recorder: &PerfRecorder, stages: &[PerfStage], total_stage: PerfStage) {
    println!(
        "  {:<14} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {:>6}",
        "Stage", "p50", "p90", "p99", "p99.9", "max", "count", "% tot"
    );
    println!("  {}", "\u{2500}".repeat(82));

    let total_p50 = {
        let mut v = recorder.samples(total_stage).to_vec();
        if v.is_empty() { 0 } else { compute_stats(&mut v).p50 }
    };

    for &stage in stages {
        let samples = recorder.samples(stage);
        if samples.is_empty() {
            continue;
        }
        let mut v = samples.to_vec();
        let stats = compute_stats(&mut v);
        let pct = if stage == total_stage {
            "100%".to_string()
        } else if total_p50 > 0 {
            format!("{:.0}%", stats.p50 as f64 / total_p50 as f64 * 100.0)
        } else {
            "-".to_string()
        };
        println!(
            "  {:<14} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {:>6}",
            stage.name(),
            stats.p50,
            stats.p90,
            stats.p99,
            stats.p999,
            stats.max,
            stats.count,
            pct
        );
    }
}
