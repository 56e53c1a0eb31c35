pub mod report;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tandem_ipc::{IpcChannel, Role};

// ─── Statistics ─────────────────────────────────────────────────────────────

/// Latency distribution of one measurement, in the unit of its `BenchResult`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub count: usize,
    pub min: u64,
    pub mean: f64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub max: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchResult {
    pub name: String,
    pub unit: String,
    pub stats: Stats,
}

/// Sorts `samples` in place and summarizes them. Panics on an empty slice.
pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "no samples to summarize");
    samples.sort_unstable();
    let sorted: &[u64] = samples;

    // Nearest-rank percentile.
    let at = |pct: f64| {
        let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    };
    let total: u128 = sorted.iter().map(|&x| x as u128).sum();

    Stats {
        count: sorted.len(),
        min: sorted[0],
        mean: total as f64 / sorted.len() as f64,
        p50: at(50.0),
        p75: at(75.0),
        p90: at(90.0),
        p99: at(99.0),
        p999: at(99.9),
        max: sorted[sorted.len() - 1],
    }
}

// ─── Measurement Harness ────────────────────────────────────────────────────

/// Runs `op` in `batches` timed batches of `batch_size`, after `warmup`
/// untimed batches, and reports the mean time per op of each batch.
pub fn measure_batched<F: FnMut()>(
    name: &str,
    batches: usize,
    batch_size: usize,
    warmup: usize,
    mut op: F,
) -> BenchResult {
    (0..warmup * batch_size).for_each(|_| op());

    let mut per_op: Vec<u64> = (0..batches)
        .map(|_| {
            let start = Instant::now();
            (0..batch_size).for_each(|_| op());
            (start.elapsed().as_nanos() / batch_size.max(1) as u128).max(1) as u64
        })
        .collect();

    BenchResult {
        name: name.to_string(),
        unit: "ns/op".to_string(),
        stats: compute_stats(&mut per_op),
    }
}

// ─── Resource Usage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceSnapshot {
    pub max_rss_bytes: i64,
    pub minor_faults: i64,
    pub vol_ctx_switches: i64,
    pub invol_ctx_switches: i64,
    pub user_time_us: i64,
    pub sys_time_us: i64,
}

fn timeval_us(tv: libc::timeval) -> i64 {
    tv.tv_sec as i64 * 1_000_000 + tv.tv_usec as i64
}

pub fn capture_rusage() -> ResourceSnapshot {
    // SAFETY: rusage is plain old data and getrusage fills it in.
    let usage = unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
        usage
    };
    // Linux reports ru_maxrss in KiB, macOS in bytes.
    let rss_scale = if cfg!(target_os = "linux") { 1024 } else { 1 };
    ResourceSnapshot {
        max_rss_bytes: usage.ru_maxrss as i64 * rss_scale,
        minor_faults: usage.ru_minflt as i64,
        vol_ctx_switches: usage.ru_nvcsw as i64,
        invol_ctx_switches: usage.ru_nivcsw as i64,
        user_time_us: timeval_us(usage.ru_utime),
        sys_time_us: timeval_us(usage.ru_stime),
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Channel base name unique to this process and call, short enough for the
/// strictest platform name limit.
pub fn temp_channel_name(label: &str) -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("b{}{label}{n}", std::process::id())
}

/// A connected master/slave pair living in this process.
pub fn channel_pair(label: &str) -> (IpcChannel, IpcChannel) {
    let name = temp_channel_name(label);
    let master = IpcChannel::new(&name, 0, Role::Master).expect("failed to open master");
    let slave = IpcChannel::new(&name, 0, Role::Slave).expect("failed to open slave");
    (master, slave)
}

/// Deterministic, non-constant payload of `len` bytes.
pub fn make_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Payload sizes swept by the benches and the report.
pub const PAYLOAD_SIZES: [usize; 6] = [16, 256, 4 * 1024, 64 * 1024, 1024 * 1024, 10 * 1024 * 1024];

// ─── Formatting ─────────────────────────────────────────────────────────────

/// Scales `value` by the largest unit it reaches, falling back to `base`.
fn scaled(value: f64, units: &[(f64, &str)], base: &str, base_precision: usize) -> String {
    match units.iter().find(|(size, _)| value.abs() >= *size) {
        Some((size, unit)) => format!("{:.1} {unit}", value / size),
        None => format!("{value:.base_precision$} {base}"),
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(f64, &str); 3] = [
        (1024.0 * 1024.0 * 1024.0, "GB"),
        (1024.0 * 1024.0, "MB"),
        (1024.0, "KB"),
    ];
    scaled(bytes as f64, &UNITS, "B", 0)
}

pub fn format_ns(ns: f64) -> String {
    scaled(ns, &[(1e6, "ms"), (1e3, "us")], "ns", 0)
}

pub fn format_count(n: u64) -> String {
    match n {
        0..1_000 => n.to_string(),
        1_000..1_000_000 => format!("{:.1}K", n as f64 / 1e3),
        _ => format!("{:.2}M", n as f64 / 1e6),
    }
}

const ROW_HEADINGS: [&str; 7] = ["min", "p50", "p75", "p90", "p99", "p99.9", "max"];

pub fn print_table_header() {
    let cols: String = ROW_HEADINGS.iter().map(|h| format!(" {h:>8}")).collect();
    println!("  {:<30}{cols}  unit", "Benchmark");
    println!("  {}", "\u{2500}".repeat(100));
}

pub fn print_result_row(r: &BenchResult) {
    let s = &r.stats;
    let cols: String = [s.min, s.p50, s.p75, s.p90, s.p99, s.p999, s.max]
        .iter()
        .map(|v| format!(" {v:>8}"))
        .collect();
    println!("  {:<30}{cols}  {}", r.name, r.unit);
}

pub fn section_header(title: &str) {
    let rule = "\u{2500}".repeat(90);
    println!("\n{rule}\n  {title}\n{rule}\n");
}
