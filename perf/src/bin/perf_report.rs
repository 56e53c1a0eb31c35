use std::thread;
use std::time::{Duration, Instant};

use tandem_ipc::{IpcChannel, Role};
use tandem_perf::report::{RECEIVE_STAGES, SEND_STAGES, print_stage_table, stage_results};
use tandem_perf::*;

const RECEIVE_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

/// Round trips measured per payload size in the cross-thread section.
const ECHO_ROUND_TRIPS: usize = 20_000;

fn main() {
    let rusage_start = capture_rusage();
    let mut results: Vec<BenchResult> = Vec::new();

    print_banner();

    // ═══════════════════════════════════════════════════════════════════════
    // 1. Same-thread round trip: send, receive, reply, receive
    // ═══════════════════════════════════════════════════════════════════════
    section_round_trip(&mut results);

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Cross-thread echo, with per-stage breakdown
    // ═══════════════════════════════════════════════════════════════════════
    let echo_stats = section_cross_thread(&mut results);

    // ═══════════════════════════════════════════════════════════════════════
    // 3. Growth from the default capacity
    // ═══════════════════════════════════════════════════════════════════════
    let growth = section_growth(&mut results);

    // ═══════════════════════════════════════════════════════════════════════
    // 4. Resource usage
    // ═══════════════════════════════════════════════════════════════════════
    let rusage_end = capture_rusage();
    section_resources(&rusage_start, &rusage_end);

    save_results(&results, &echo_stats, &growth, &rusage_start, &rusage_end);
}

fn print_banner() {
    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  TANDEM CHANNEL PERFORMANCE REPORT");
    println!("  round trip + cross-thread echo + growth");
    println!("{bar}\n");
    println!(
        "  cpus: {}",
        thread::available_parallelism().map(|n| n.get()).unwrap_or(0)
    );
}

/// Batch shape that keeps large payloads from dominating the run time.
fn batches_for(size: usize) -> (usize, usize) {
    match size {
        s if s >= 1024 * 1024 => (20, 5),
        s if s >= 64 * 1024 => (200, 10),
        _ => (2_000, 50),
    }
}

fn section_round_trip(results: &mut Vec<BenchResult>) {
    section_header("SAME-THREAD ROUND TRIP (master -> slave -> master)");
    print_table_header();

    for size in PAYLOAD_SIZES {
        let (mut master, mut slave) = channel_pair("rt");
        let payload = make_payload(size);
        let mut buf = Vec::with_capacity(size);
        let (batches, batch_size) = batches_for(size);

        let result = measure_batched(
            &format!("round_trip/{}", format_bytes(size as u64)),
            batches,
            batch_size,
            2,
            || {
                master.send(&payload).expect("send");
                slave.receive_into(&mut buf, RECEIVE_TIMEOUT).expect("receive");
                slave.send(&buf).expect("reply");
                master.receive_into(&mut buf, RECEIVE_TIMEOUT).expect("receive reply");
            },
        );
        print_result_row(&result);
        results.push(result);
    }
}

fn section_cross_thread(results: &mut Vec<BenchResult>) -> Option<Stats> {
    section_header("CROSS-THREAD ECHO (256 B)");

    let name = temp_channel_name("echo");
    let mut master = IpcChannel::new(&name, 0, Role::Master).expect("failed to open master");
    let slave = IpcChannel::new(&name, 0, Role::Slave).expect("failed to open slave");

    let echo = thread::spawn(move || {
        let mut slave = slave;
        let mut buf = Vec::new();
        // An empty message ends the run.
        loop {
            if !slave.receive_into(&mut buf, RECEIVE_TIMEOUT).expect("echo receive") {
                break;
            }
            let stop = buf.is_empty();
            slave.send(&buf).expect("echo send");
            if stop {
                break;
            }
        }
        slave
    });

    let payload = make_payload(256);
    let mut reply = Vec::new();
    let mut samples = Vec::with_capacity(ECHO_ROUND_TRIPS);
    for _ in 0..ECHO_ROUND_TRIPS {
        let start = Instant::now();
        master.send(&payload).expect("send");
        let got = master
            .receive_into(&mut reply, RECEIVE_TIMEOUT)
            .expect("receive");
        samples.push(start.elapsed().as_nanos() as u64);
        assert!(got, "echo thread stopped replying");
    }
    master.send(b"").expect("stop");
    let _ = master.receive_into(&mut reply, RECEIVE_TIMEOUT);
    let slave = echo.join().expect("echo thread panicked");

    let stats = compute_stats(&mut samples);
    let result = BenchResult {
        name: "echo/256 B".to_string(),
        unit: "ns/rtt".to_string(),
        stats: stats.clone(),
    };
    print_table_header();
    print_result_row(&result);
    results.push(result);

    print_stage_table("Master send stages", master.recorder(), &SEND_STAGES);
    print_stage_table("Master receive stages", master.recorder(), &RECEIVE_STAGES);
    print_stage_table("Slave send stages", slave.recorder(), &SEND_STAGES);
    print_stage_table("Slave receive stages", slave.recorder(), &RECEIVE_STAGES);

    results.extend(stage_results("master", master.recorder()));
    results.extend(stage_results("slave", slave.recorder()));
    Some(stats)
}

#[derive(Debug, Clone, serde::Serialize)]
struct GrowthStep {
    payload_bytes: usize,
    capacity_before: u64,
    capacity_after: u64,
    send_ns: u64,
    receive_ns: u64,
}

fn section_growth(results: &mut Vec<BenchResult>) -> Vec<GrowthStep> {
    section_header("GROWTH FROM 4 KB");
    println!(
        "  {:>10} {:>12} {:>12} {:>12} {:>12}",
        "payload", "cap before", "cap after", "send", "receive"
    );
    println!("  {}", "\u{2500}".repeat(64));

    let (mut master, mut slave) = channel_pair("grow");
    let mut buf = Vec::new();
    let mut steps = Vec::new();

    for size in PAYLOAD_SIZES {
        let payload = make_payload(size);
        let capacity_before = master.outbound_capacity();

        let start = Instant::now();
        master.send(&payload).expect("send");
        let send_ns = start.elapsed().as_nanos() as u64;

        let start = Instant::now();
        slave.receive_into(&mut buf, RECEIVE_TIMEOUT).expect("receive");
        let receive_ns = start.elapsed().as_nanos() as u64;
        assert_eq!(buf.len(), size);

        let step = GrowthStep {
            payload_bytes: size,
            capacity_before,
            capacity_after: master.outbound_capacity(),
            send_ns,
            receive_ns,
        };
        println!(
            "  {:>10} {:>12} {:>12} {:>12} {:>12}",
            format_bytes(size as u64),
            format_bytes(step.capacity_before),
            format_bytes(step.capacity_after),
            format_ns(send_ns as f64),
            format_ns(receive_ns as f64),
        );
        steps.push(step);
    }

    results.extend(stage_results("grow/master", master.recorder()));
    results.extend(stage_results("grow/slave", slave.recorder()));
    steps
}

fn section_resources(start: &ResourceSnapshot, end: &ResourceSnapshot) {
    section_header("RESOURCE USAGE");

    println!(
        "  Peak RSS:                    {}",
        format_bytes(end.max_rss_bytes as u64)
    );
    println!(
        "  Minor page faults:           {}",
        format_count(end.minor_faults.saturating_sub(start.minor_faults) as u64)
    );
    println!(
        "  Voluntary ctx switches:      {}",
        format_count(end.vol_ctx_switches.saturating_sub(start.vol_ctx_switches) as u64)
    );
    println!(
        "  Involuntary ctx switches:    {}",
        format_count(end.invol_ctx_switches.saturating_sub(start.invol_ctx_switches) as u64)
    );
    println!(
        "  User CPU time:               {:.3}s",
        end.user_time_us.saturating_sub(start.user_time_us) as f64 / 1e6
    );
    println!(
        "  System CPU time:             {:.3}s",
        end.sys_time_us.saturating_sub(start.sys_time_us) as f64 / 1e6
    );
}

fn save_results(
    results: &[BenchResult],
    echo_stats: &Option<Stats>,
    growth: &[GrowthStep],
    rusage_start: &ResourceSnapshot,
    rusage_end: &ResourceSnapshot,
) {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let results_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let _ = std::fs::create_dir_all(results_dir);
    let json_path = format!("{results_dir}/{timestamp}_report.json");

    let output = serde_json::json!({
        "report_type": "channel",
        "timestamp": timestamp,
        "benchmarks": results,
        "echo": echo_stats,
        "growth": growth,
        "resources": {
            "start": rusage_start,
            "end": rusage_end,
        },
    });

    let bar = "\u{2550}".repeat(90);
    let written = serde_json::to_string_pretty(&output)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(&json_path, json));
    match written {
        Ok(()) => {
            println!("\n{bar}");
            println!("  Results saved to: {json_path}");
            println!("{bar}\n");
        }
        Err(e) => eprintln!("\n  [failed to save results: {e}]\n"),
    }
}
