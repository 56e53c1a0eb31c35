use crate::{BenchResult, compute_stats};
use tandem_perf_recorder::{PerfRecorder, PerfStage};

/// Stages a sender goes through, in order.
pub const SEND_STAGES: [PerfStage; 5] = [
    PerfStage::Lock,
    PerfStage::Rebind,
    PerfStage::Grow,
    PerfStage::Write,
    PerfStage::Post,
];

/// Stages a receiver goes through, in order.
pub const RECEIVE_STAGES: [PerfStage; 4] = [
    PerfStage::Wait,
    PerfStage::Lock,
    PerfStage::Rebind,
    PerfStage::Read,
];

/// Convert recorder samples into BenchResults, skipping empty stages.
pub fn stage_results(label: &str, recorder: &PerfRecorder) -> Vec<BenchResult> {
    PerfStage::ALL
        .iter()
        .filter_map(|&stage| {
            let mut samples = recorder.samples(stage).to_vec();
            if samples.is_empty() {
                return None;
            }
            Some(BenchResult {
                name: format!("{label}/{}", stage.name()),
                unit: "ns".to_string(),
                stats: compute_stats(&mut samples),
            })
        })
        .collect()
}

pub fn print_stage_table(title: &str, recorder: &PerfRecorder, stages: &[PerfStage]) {
    println!("\n  {title}:\n");
    println!(
        "  {:<10} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8}",
        "Stage", "p50", "p90", "p99", "p99.9", "max", "count"
    );
    println!("  {}", "\u{2500}".repeat(68));

    for &stage in stages {
        let samples = recorder.samples(stage);
        if samples.is_empty() {
            continue;
        }
        let mut v = samples.to_vec();
        let stats = compute_stats(&mut v);
        println!(
            "  {:<10} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8}",
            stage.name(),
            stats.p50,
            stats.p90,
            stats.p99,
            stats.p999,
            stats.max,
            stats.count
        );
    }
}
