use anyhow::{Context, Result, bail};
use flint_config::{DemoConfig, Mode};
use flint_events::{Beacon, Sample};
use flint_icc::{BroadcastRing, RingBuffer, shm};
use flint_perf_recorder::{PerfRecorder, PerfStage, now_ticks};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// Must match flint-send; a mismatch is caught as a segment size error.
const CAPACITY: usize = 1 << 12;

/// Empty polls between two looks at the clock.
const IDLE_CHECK_SPINS: u32 = 1 << 16;

fn usage() -> ! {
    eprintln!("usage: flint-recv <spsc|spmc> [config.toml]");
    std::process::exit(2);
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mode: Mode = args.next().unwrap_or_else(|| usage()).parse()?;
    let config_path = args.next();
    let cfg = DemoConfig::load_or_default(config_path.as_deref())
        .context("loading demo config")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    flint_affinity::pin(cfg.consumer_core)
        .with_context(|| format!("pinning receiver to core {}", cfg.consumer_core))?;

    match mode {
        Mode::Spsc => run_spsc(&cfg),
        Mode::Spmc => run_spmc(&cfg),
    }
}

/// Tracks how long a poll loop has gone without data, reading the clock
/// only every [`IDLE_CHECK_SPINS`] empty polls.
struct IdleTimer {
    timeout: Duration,
    since: Instant,
    spins: u32,
}

impl IdleTimer {
    fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            since: Instant::now(),
            spins: 0,
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.since = Instant::now();
    }

    /// Records one empty poll; true once the timeout has passed.
    fn expired(&mut self) -> bool {
        self.spins += 1;
        if self.spins < IDLE_CHECK_SPINS {
            std::hint::spin_loop();
            return false;
        }
        self.spins = 0;
        self.since.elapsed() >= self.timeout
    }
}

fn run_spsc(cfg: &DemoConfig) -> Result<()> {
    let ring: &RingBuffer<Sample, CAPACITY> = shm::attach(&cfg.spsc_shm_name)
        .with_context(|| format!("attaching spsc segment {}", cfg.spsc_shm_name))?;
    // SAFETY: this process is the only consumer on the segment.
    let mut rx = unsafe { ring.consumer() };
    let mut perf = PerfRecorder::new();
    let mut idle = IdleTimer::new(cfg.idle_timeout_ms);

    tracing::info!(name = %cfg.spsc_shm_name, messages = cfg.messages, "receiving over spsc");
    let mut received = 0u64;
    let mut expected = 1u64;
    let mut latency_sum = 0u64;
    while received < cfg.messages {
        perf.begin(PerfStage::Front);
        let Some(sample) = rx.front() else {
            if idle.expired() {
                tracing::warn!(received, "sender went quiet, stopping early");
                break;
            }
            continue;
        };
        let latency = now_ticks().wrapping_sub(sample.ts_ticks);
        perf.end(PerfStage::Front);

        for &v in sample.values() {
            if v != expected {
                bail!("out of order after {received} samples: got {v}, expected {expected}");
            }
            expected += 1;
        }

        perf.begin(PerfStage::Pop);
        rx.pop();
        perf.end(PerfStage::Pop);

        perf.record(PerfStage::EndToEnd, latency);
        latency_sum += latency;
        received += 1;
        idle.reset();
    }

    let avg = if received == 0 { 0 } else { latency_sum / received };
    tracing::info!(samples = received, values = expected - 1, avg_latency_ticks = avg, "spsc receiver done");
    report(&perf, &[PerfStage::Front, PerfStage::Pop, PerfStage::EndToEnd]);
    Ok(())
}

fn run_spmc(cfg: &DemoConfig) -> Result<()> {
    let ring: &BroadcastRing<Beacon, CAPACITY> = shm::attach(&cfg.spmc_shm_name)
        .with_context(|| format!("attaching spmc segment {}", cfg.spmc_shm_name))?;
    let mut reader = ring.reader();
    let mut perf = PerfRecorder::new();
    let mut idle = IdleTimer::new(cfg.idle_timeout_ms);

    tracing::info!(
        name = %cfg.spmc_shm_name,
        from_cursor = reader.next_cursor(),
        "receiving over spmc"
    );
    let mut received = 0u64;
    let mut latency_sum = 0u64;
    let mut last_idx = None;
    while received + reader.overruns() < cfg.messages {
        perf.begin(PerfStage::Read);
        let Some(beacon) = reader.read() else {
            if idle.expired() {
                tracing::warn!(received, "sender went quiet, stopping early");
                break;
            }
            continue;
        };
        let latency = now_ticks().wrapping_sub(beacon.ts_ticks);
        perf.end(PerfStage::Read);

        if !beacon.is_consistent() {
            bail!("torn beacon at index {}", beacon.idx);
        }
        if let Some(prev) = last_idx {
            if beacon.idx <= prev {
                bail!("beacon index went backwards: {} after {prev}", beacon.idx);
            }
        }
        last_idx = Some(beacon.idx);

        perf.record(PerfStage::EndToEnd, latency);
        latency_sum += latency;
        received += 1;
        idle.reset();
    }

    let avg = if received == 0 { 0 } else { latency_sum / received };
    tracing::info!(
        beacons = received,
        dropped = reader.overruns(),
        avg_latency_ticks = avg,
        "spmc receiver done"
    );
    report(&perf, &[PerfStage::Read, PerfStage::EndToEnd]);
    Ok(())
}

fn report(perf: &PerfRecorder, stages: &[PerfStage]) {
    for &stage in stages {
        if perf.count(stage) > 0 {
            tracing::info!(stage = stage.name(), samples = perf.count(stage), mean_ticks = perf.mean(stage), "perf");
        }
    }
}
