use std::collections::BTreeMap;
use std::hint::black_box;
use std::mem::{align_of, size_of};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use flint_events::{Beacon, Sample};
use flint_icc::{BroadcastRing, CachePadded, RingBuffer, Worker};
use flint_perf::report::{print_stage_table, stage_results};
use flint_perf::*;
use flint_perf_recorder::{PerfRecorder, PerfStage, now_ns, now_ticks, tick_overhead};

const CROSS_THREAD_MESSAGES: usize = 200_000;

/// Cores for the cross-thread sections, when the machine has enough of them.
fn core_pair() -> CorePair {
    match flint_affinity::available_cores() {
        Some(n) if n >= 3 => Some((1, 2)),
        _ => None,
    }
}

fn main() {
    let rusage_start = capture_rusage();
    let mut results: Vec<BenchResult> = Vec::new();

    print_banner();
    section_memory_layout();
    section_clock(&mut results);

    let estimates = read_criterion_estimates(&criterion_target_dir());
    section_criterion(&estimates);

    let stages = section_stages(&mut results);
    let deque = section_deque_stages();
    section_cross_thread(&mut results);

    let rusage_end = capture_rusage();
    section_resources(&rusage_start, &rusage_end);

    save_results(&results, &stages, &deque, &estimates, &rusage_start, &rusage_end);
}

fn criterion_target_dir() -> PathBuf {
    // CARGO_MANIFEST_DIR = perf/, criterion output is in <workspace>/target/criterion
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest
        .parent()
        .unwrap_or(&manifest)
        .join("target")
        .join("criterion")
}

fn print_banner() {
    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  FLINT QUEUE PERFORMANCE REPORT");
    println!("  criterion micro + recorder stages + cross-thread latency");
    println!("{bar}\n");
    let cores = flint_affinity::available_cores().unwrap_or(0);
    println!("  cores available: {cores}");
}

fn section_memory_layout() {
    section_header("MEMORY LAYOUT");
    let rows: [(&str, usize, usize); 6] = [
        ("CachePadded<u64>", size_of::<CachePadded<u64>>(), align_of::<CachePadded<u64>>()),
        ("Sample", size_of::<Sample>(), align_of::<Sample>()),
        ("Beacon", size_of::<Beacon>(), align_of::<Beacon>()),
        (
            "RingBuffer<Sample, 4096>",
            size_of::<RingBuffer<Sample, 4096>>(),
            align_of::<RingBuffer<Sample, 4096>>(),
        ),
        (
            "BroadcastRing<Beacon, 4096>",
            size_of::<BroadcastRing<Beacon, 4096>>(),
            align_of::<BroadcastRing<Beacon, 4096>>(),
        ),
        ("Worker<usize>", size_of::<Worker<usize>>(), align_of::<Worker<usize>>()),
    ];
    println!("  {:<32} {:>12} {:>8}", "Type", "size", "align");
    println!("  {}", "\u{2500}".repeat(56));
    for (name, size, align) in rows {
        println!("  {name:<32} {size:>12} {align:>8}");
    }
}

fn section_clock(results: &mut Vec<BenchResult>) {
    section_header("CLOCK CALIBRATION");
    print_table_header();

    let r_ticks = measure_batched("now_ticks()", 1000, 10_000, 100, || {
        black_box(now_ticks());
    });
    print_result_row(&r_ticks);

    let r_ns = measure_batched("now_ns()", 1000, 10_000, 100, || {
        black_box(now_ns());
    });
    print_result_row(&r_ns);

    let r_instant = measure_batched("Instant::now()", 1000, 10_000, 100, || {
        black_box(Instant::now());
    });
    print_result_row(&r_instant);

    let t0 = now_ticks();
    let n0 = now_ns();
    std::thread::sleep(Duration::from_millis(20));
    let ticks_per_ns = now_ticks().saturating_sub(t0) as f64 / now_ns().saturating_sub(n0).max(1) as f64;

    println!("\n  * now_ticks() self-overhead: ~{} ticks", tick_overhead());
    println!("  * tick rate: ~{ticks_per_ns:.2} ticks/ns");
    results.extend([r_ticks, r_ns, r_instant]);
}

fn section_criterion(estimates: &BTreeMap<String, CriterionEstimate>) {
    section_header("CRITERION (run `cargo bench -p flint-perf` first)");
    if estimates.is_empty() {
        println!("  no criterion results found");
        return;
    }
    println!("  {:<44} {:>10} {:>10} {:>10}", "Bench", "median", "mean", "stddev");
    println!("  {}", "\u{2500}".repeat(78));
    for est in estimates.values() {
        println!(
            "  {:<44} {:>10} {:>10} {:>10}",
            est.name,
            format_ns(est.median_ns),
            format_ns(est.mean_ns),
            format_ns(est.stddev_ns),
        );
    }
}

/// Single-thread SPSC push/pop with every stage timed by the recorder.
fn section_stages(results: &mut Vec<BenchResult>) -> Vec<BenchResult> {
    section_header("SPSC STAGES (single thread, ticks)");

    let mut ring = RingBuffer::<Sample, 4096>::new_boxed();
    let (mut tx, mut rx) = ring.split();
    let mut perf = PerfRecorder::new();
    let mut counter = 0;

    for _ in 0..100_000 {
        perf.begin(PerfStage::EndToEnd);

        perf.begin(PerfStage::Alloc);
        let slot = tx.alloc();
        perf.end(PerfStage::Alloc);
        let Some(slot) = slot else { continue };
        slot.write(Sample::consecutive(0, 1, &mut counter));

        perf.begin(PerfStage::Push);
        // SAFETY: the slot was just initialised.
        unsafe { tx.push() };
        perf.end(PerfStage::Push);

        perf.begin(PerfStage::Front);
        black_box(rx.front());
        perf.end(PerfStage::Front);

        perf.begin(PerfStage::Pop);
        black_box(rx.pop());
        perf.end(PerfStage::Pop);

        perf.end(PerfStage::EndToEnd);
    }

    print_stage_table(
        &perf,
        &[PerfStage::Alloc, PerfStage::Push, PerfStage::Front, PerfStage::Pop, PerfStage::EndToEnd],
        PerfStage::EndToEnd,
    );
    let stages = stage_results(&perf, "ticks");
    results.extend(stages.iter().cloned());
    stages
}

fn section_deque_stages() -> Vec<BenchResult> {
    section_header("DEQUE STAGES (single thread, ticks)");
    let perf = deque_stages(100_000);
    print_stage_table(
        &perf,
        &[PerfStage::Push, PerfStage::Steal, PerfStage::Pop, PerfStage::EndToEnd],
        PerfStage::EndToEnd,
    );
    stage_results(&perf, "ticks")
}

fn section_cross_thread(results: &mut Vec<BenchResult>) {
    let cores = core_pair();
    section_header(&format!("CROSS-THREAD (cores {cores:?})"));
    print_table_header();

    let mut rtt = spsc_round_trip(CROSS_THREAD_MESSAGES, cores);
    if !rtt.is_empty() {
        let r = result("spsc round trip", "ns", &mut rtt);
        print_result_row(&r);
        results.push(r);
    }

    let (mut one_way, overruns) =
        broadcast_one_way(CROSS_THREAD_MESSAGES, Duration::from_nanos(500), cores);
    if !one_way.is_empty() {
        let r = result("broadcast one way", "ns", &mut one_way);
        print_result_row(&r);
        results.push(r);
    }
    println!(
        "\n  * broadcast reader: {} read, {overruns} overrun",
        format_count(one_way.len() as u64)
    );

    for thieves in [1, 3] {
        let items = 1_000_000;
        let took = deque_drain(items, thieves);
        let rate = items as f64 / took.as_secs_f64();
        println!(
            "  * deque drain, {thieves} thieves: {} items in {took:?} ({}/s)",
            format_count(items as u64),
            format_count(rate as u64)
        );
    }
}

fn section_resources(start: &ResourceSnapshot, end: &ResourceSnapshot) {
    section_header("RESOURCE USAGE");
    println!("  max rss:              {} KB", end.max_rss_bytes / 1024);
    println!("  minor faults:         {}", end.minor_faults - start.minor_faults);
    println!("  major faults:         {}", end.major_faults - start.major_faults);
    println!("  voluntary switches:   {}", end.vol_ctx_switches - start.vol_ctx_switches);
    println!("  involuntary switches: {}", end.invol_ctx_switches - start.invol_ctx_switches);
}

fn save_results(
    results: &[BenchResult],
    stages: &[BenchResult],
    deque: &[BenchResult],
    estimates: &BTreeMap<String, CriterionEstimate>,
    rusage_start: &ResourceSnapshot,
    rusage_end: &ResourceSnapshot,
) {
    let unix_secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let results_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let _ = std::fs::create_dir_all(results_dir);
    let json_path = format!("{results_dir}/{unix_secs}_report.json");

    let crit_json: Vec<&CriterionEstimate> = estimates.values().collect();
    let output = serde_json::json!({
        "timestamp": unix_secs,
        "benchmarks": results,
        "spsc_stages": stages,
        "deque_stages": deque,
        "criterion_benchmarks": crit_json,
        "resources": {
            "start": rusage_start,
            "end": rusage_end,
        },
    });

    let written = serde_json::to_string_pretty(&output)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(&json_path, json));
    match written {
        Ok(()) => println!("\n  Results saved to: {json_path}\n"),
        Err(e) => eprintln!("\n  [failed to save results: {e}]\n"),
    }
}
