use flint_events::{Beacon, Sample};
use flint_icc::{BroadcastRing, RingBuffer, Steal, Worker};
use flint_perf_recorder::{PerfRecorder, PerfStage, now_ns};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub mod report;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchResult {
    pub name: String,
    pub unit: String,
    pub stats: Stats,
}

pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "cannot compute stats on empty samples");
    samples.sort_unstable();

    let count = samples.len();
    let sum: u64 = samples.iter().sum();
    let mean = sum as f64 / count as f64;
    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / count as f64;

    Stats {
        min: samples[0],
        max: samples[count - 1],
        mean,
        stddev: variance.sqrt(),
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    }
}

fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let len = sorted.len();
    if len == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0 * len as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(len - 1);
    sorted[idx]
}

pub fn result(name: &str, unit: &str, samples: &mut [u64]) -> BenchResult {
    BenchResult {
        name: name.to_string(),
        unit: unit.to_string(),
        stats: compute_stats(samples),
    }
}

// ─── Measurement Harness ────────────────────────────────────────────────────

pub fn measure_batched<F: FnMut()>(
    name: &str,
    batches: usize,
    batch_size: usize,
    warmup: usize,
    mut f: F,
) -> BenchResult {
    for _ in 0..warmup * batch_size {
        f();
    }

    let mut samples = Vec::with_capacity(batches);
    for _ in 0..batches {
        let start = Instant::now();
        for _ in 0..batch_size {
            f();
        }
        let total = start.elapsed().as_nanos();
        let per_op = ((total + (batch_size as u128 / 2)) / batch_size as u128) as u64;
        samples.push(per_op.max(1));
    }

    result(name, "ns/op", &mut samples)
}

/// Core pair for the cross-thread measurements; `None` leaves scheduling to the OS.
pub type CorePair = Option<(usize, usize)>;

fn pin_quietly(core: Option<usize>) {
    if let Some(core) = core {
        let _ = flint_affinity::pin(core);
    }
}

/// Round-trip nanoseconds through a pair of SPSC rings: one thread pushes a
/// timestamp, the other echoes it back on the second ring.
pub fn spsc_round_trip(count: usize, cores: CorePair) -> Vec<u64> {
    let mut ping = RingBuffer::<u64, 1024>::new_boxed();
    let mut pong = RingBuffer::<u64, 1024>::new_boxed();
    let (mut ping_tx, mut ping_rx) = ping.split();
    let (mut pong_tx, mut pong_rx) = pong.split();

    thread::scope(|s| {
        s.spawn(move || {
            pin_quietly(cores.map(|c| c.1));
            for _ in 0..count {
                let v = loop {
                    if let Some(v) = ping_rx.try_pop() {
                        break v;
                    }
                    std::hint::spin_loop();
                };
                pong_tx.block_push(v);
            }
        });

        let driver = s.spawn(move || {
            pin_quietly(cores.map(|c| c.0));
            let mut samples = Vec::with_capacity(count);
            for _ in 0..count {
                let start = now_ns();
                ping_tx.block_push(start);
                let back = loop {
                    if let Some(v) = pong_rx.try_pop() {
                        break v;
                    }
                    std::hint::spin_loop();
                };
                samples.push(now_ns().saturating_sub(back).max(1));
            }
            samples
        });
        driver.join().unwrap_or_default()
    })
}

/// One-way nanoseconds from a broadcast writer to a single reader, plus the
/// reader's overrun count. The writer spaces publishes by `gap`.
pub fn broadcast_one_way(count: usize, gap: Duration, cores: CorePair) -> (Vec<u64>, u64) {
    let ring = BroadcastRing::<Beacon, 4096>::new_boxed();
    let mut reader = ring.reader();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            pin_quietly(cores.map(|c| c.0));
            let Some(mut w) = ring.writer() else { return };
            for i in 0..count as u64 {
                w.write(|| Beacon::new(now_ns(), i));
                let until = Instant::now() + gap;
                while Instant::now() < until {
                    std::hint::spin_loop();
                }
            }
            done.store(true, Ordering::Release);
        });

        let measure = s.spawn(|| {
            pin_quietly(cores.map(|c| c.1));
            let mut samples = Vec::with_capacity(count);
            loop {
                match reader.read() {
                    Some(b) => {
                        samples.push(now_ns().saturating_sub(b.ts_ticks).max(1));
                        if b.idx + 1 == count as u64 {
                            break;
                        }
                    }
                    None if done.load(Ordering::Acquire) => {
                        // Drain whatever landed after the last empty read.
                        while let Some(b) = reader.read() {
                            samples.push(now_ns().saturating_sub(b.ts_ticks).max(1));
                        }
                        break;
                    }
                    None => std::hint::spin_loop(),
                }
            }
            (samples, reader.overruns())
        });
        measure.join().unwrap_or_default()
    })
}

/// Time for one owner plus `thieves` stealers to drain `items` pushes.
pub fn deque_drain(items: usize, thieves: usize) -> Duration {
    let worker = Worker::<usize>::new(1024);
    let taken = AtomicU64::new(0);
    let start = Instant::now();

    thread::scope(|s| {
        for _ in 0..thieves {
            let stealer = worker.stealer();
            let taken = &taken;
            s.spawn(move || {
                while taken.load(Ordering::Relaxed) < items as u64 {
                    if let Steal::Success(v) = stealer.steal() {
                        std::hint::black_box(v);
                        taken.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        for i in 0..items {
            worker.push(i);
            if i % 4 == 0 {
                if let Some(v) = worker.pop() {
                    std::hint::black_box(v);
                    taken.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        while let Some(v) = worker.pop() {
            std::hint::black_box(v);
            taken.fetch_add(1, Ordering::Relaxed);
        }
    });

    start.elapsed()
}

/// Single-thread deque push, steal and pop, each timed by the recorder.
///
/// Every round pushes two items; a stealer takes the oldest and the owner
/// pops the newest, so the deque is empty again before the next round.
pub fn deque_stages(rounds: usize) -> PerfRecorder {
    let worker = Worker::<usize>::new(64);
    let stealer = worker.stealer();
    let mut perf = PerfRecorder::new();

    for i in 0..rounds {
        perf.begin(PerfStage::EndToEnd);

        perf.begin(PerfStage::Push);
        worker.push(2 * i);
        worker.push(2 * i + 1);
        perf.end(PerfStage::Push);

        perf.begin(PerfStage::Steal);
        let stolen = stealer.steal();
        perf.end(PerfStage::Steal);
        std::hint::black_box(stolen);

        perf.begin(PerfStage::Pop);
        std::hint::black_box(worker.pop());
        perf.end(PerfStage::Pop);

        perf.end(PerfStage::EndToEnd);
    }
    perf
}

// ─── Resource Usage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceSnapshot {
    pub max_rss_bytes: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub vol_ctx_switches: i64,
    pub invol_ctx_switches: i64,
}

pub fn capture_rusage() -> ResourceSnapshot {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    #[cfg(target_os = "linux")]
    let max_rss_bytes = usage.ru_maxrss * 1024;
    #[cfg(not(target_os = "linux"))]
    let max_rss_bytes = usage.ru_maxrss;
    ResourceSnapshot {
        max_rss_bytes,
        minor_faults: usage.ru_minflt,
        major_faults: usage.ru_majflt,
        vol_ctx_switches: usage.ru_nvcsw,
        invol_ctx_switches: usage.ru_nivcsw,
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Segment name unique to this process, for benches that go through `shm::attach`.
pub fn temp_shm_name(label: &str) -> String {
    let pid = std::process::id();
    format!("flint_bench_{label}_{pid}")
}

pub fn make_test_sample() -> Sample {
    let mut counter = 0;
    Sample::consecutive(now_ns(), Sample::MAX_VALS, &mut counter)
}

pub fn make_test_beacon() -> Beacon {
    Beacon::new(now_ns(), 1)
}

pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}

pub fn format_ns(ns: f64) -> String {
    let abs = ns.abs();
    if abs >= 1_000_000.0 {
        format!("{:.1} ms", ns / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.1} us", ns / 1_000.0)
    } else {
        format!("{:.0} ns", ns)
    }
}

pub fn print_result_row(r: &BenchResult) {
    println!(
        "  {:<32} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
        r.name, r.stats.min, r.stats.p50, r.stats.p90, r.stats.p99, r.stats.p999, r.stats.max, r.unit,
    );
}

pub fn print_table_header() {
    println!(
        "  {:<32} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  unit",
        "Benchmark", "min", "p50", "p90", "p99", "p99.9", "max",
    );
    println!("  {}", "─".repeat(96));
}

pub fn section_header(title: &str) {
    println!("\n{}", "─".repeat(90));
    println!("  {title}");
    println!("{}\n", "─".repeat(90));
}

// ─── Criterion JSON Reader ─────────────────────────────────────────────────

/// Criterion groups produced by the benches in this crate.
pub const CRITERION_GROUPS: [&str; 3] = ["spsc", "broadcast", "deque"];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CriterionEstimate {
    pub name: String,
    pub median_ns: f64,
    pub mean_ns: f64,
    pub stddev_ns: f64,
}

/// Reads `estimates.json` for every bench under [`CRITERION_GROUPS`], keyed
/// by "group/bench_name".
pub fn read_criterion_estimates(criterion_dir: &Path) -> BTreeMap<String, CriterionEstimate> {
    let mut out = BTreeMap::new();
    for group in CRITERION_GROUPS {
        let group_dir = criterion_dir.join(group);
        if group_dir.is_dir() {
            walk_criterion_dir(&group_dir, &mut out);
        }
    }
    out
}

fn walk_criterion_dir(dir: &Path, out: &mut BTreeMap<String, CriterionEstimate>) {
    let estimates = dir.join("new").join("estimates.json");
    if estimates.is_file() {
        if let Some(est) = parse_criterion_estimates(&estimates, dir) {
            out.insert(est.name.clone(), est);
        }
    }
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.file_name().is_none_or(|n| n != "report") {
                walk_criterion_dir(&path, out);
            }
        }
    }
}

fn parse_criterion_estimates(json_path: &Path, bench_dir: &Path) -> Option<CriterionEstimate> {
    let data = std::fs::read_to_string(json_path).ok()?;
    let v: serde_json::Value = serde_json::from_str(&data).ok()?;

    Some(CriterionEstimate {
        name: criterion_bench_name(bench_dir)?,
        median_ns: v.get("median")?.get("point_estimate")?.as_f64()?,
        mean_ns: v.get("mean")?.get("point_estimate")?.as_f64()?,
        stddev_ns: v.get("std_dev")?.get("point_estimate")?.as_f64()?,
    })
}

/// `.../criterion/spsc/push_pop` becomes `spsc/push_pop`.
fn criterion_bench_name(bench_dir: &Path) -> Option<String> {
    let mut parts = Vec::new();
    let mut cur = bench_dir;
    loop {
        let name = cur.file_name()?.to_str()?;
        if name == "criterion" {
            break;
        }
        parts.push(name.to_string());
        cur = cur.parent()?;
    }
    parts.reverse();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_on_known_samples() {
        let mut s: Vec<u64> = (1..=100).rev().collect();
        let st = compute_stats(&mut s);
        assert_eq!(st.min, 1);
        assert_eq!(st.max, 100);
        assert_eq!(st.p50, 50);
        assert_eq!(st.p90, 90);
        assert_eq!(st.p99, 99);
        assert_eq!(st.count, 100);
        assert!((st.mean - 50.5).abs() < 1e-9);
    }

    #[test]
    fn single_sample_stats() {
        let st = compute_stats(&mut [7]);
        assert_eq!((st.min, st.p50, st.p999, st.max), (7, 7, 7, 7));
    }

    #[test]
    fn spsc_round_trip_returns_one_sample_per_message() {
        let samples = spsc_round_trip(1_000, None);
        assert_eq!(samples.len(), 1_000);
        assert!(samples.iter().all(|&ns| ns > 0));
    }

    #[test]
    fn broadcast_one_way_accounts_for_every_beacon() {
        let (samples, overruns) = broadcast_one_way(2_000, Duration::ZERO, None);
        assert!(!samples.is_empty());
        assert!(samples.len() as u64 + overruns <= 2_000);
    }

    #[test]
    fn deque_drain_finishes() {
        assert!(deque_drain(10_000, 2) > Duration::ZERO);
    }

    #[test]
    fn deque_stages_times_every_steal() {
        let perf = deque_stages(1_000);
        assert_eq!(perf.count(PerfStage::Steal), 1_000);
        assert_eq!(perf.count(PerfStage::Push), 1_000);
        assert_eq!(perf.count(PerfStage::Pop), 1_000);
    }

    #[test]
    fn bench_names_from_criterion_layout() {
        let p = Path::new("/w/target/criterion/spsc/push_pop");
        assert_eq!(criterion_bench_name(p).as_deref(), Some("spsc/push_pop"));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_count(1_500), "1.5K");
        assert_eq!(format_ns(2_500.0), "2.5 us");
    }
}
