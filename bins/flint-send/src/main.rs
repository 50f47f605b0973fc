use anyhow::{Context, Result};
use flint_config::{DemoConfig, Mode};
use flint_events::{Beacon, Sample};
use flint_icc::{BroadcastRing, RingBuffer, shm};
use flint_perf_recorder::{PerfRecorder, PerfStage, now_ticks};
use tracing_subscriber::EnvFilter;

// Must match flint-recv; a mismatch is caught as a segment size error.
const CAPACITY: usize = 1 << 12;

fn usage() -> ! {
    eprintln!("usage: flint-send <spsc|spmc> [config.toml]");
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

    flint_affinity::pin(cfg.producer_core)
        .with_context(|| format!("pinning sender to core {}", cfg.producer_core))?;

    match mode {
        Mode::Spsc => run_spsc(&cfg),
        Mode::Spmc => run_spmc(&cfg),
    }
}

/// Spins until `pace_ticks` have passed since `since`.
#[inline(always)]
fn pace(since: u64, pace_ticks: u64) {
    while now_ticks().wrapping_sub(since) < pace_ticks {
        std::hint::spin_loop();
    }
}

fn run_spsc(cfg: &DemoConfig) -> Result<()> {
    let ring: &RingBuffer<Sample, CAPACITY> = shm::attach(&cfg.spsc_shm_name)
        .with_context(|| format!("attaching spsc segment {}", cfg.spsc_shm_name))?;
    // SAFETY: this process is the only producer on the segment.
    let mut tx = unsafe { ring.producer() };
    let mut perf = PerfRecorder::new();

    tracing::info!(name = %cfg.spsc_shm_name, messages = cfg.messages, "sending over spsc");
    let mut counter = 0;
    for i in 0..cfg.messages {
        let start = now_ticks();
        let len = (i as usize % Sample::MAX_VALS) + 1;

        perf.begin(PerfStage::Alloc);
        let slot = loop {
            if let Some(slot) = tx.alloc() {
                break slot;
            }
            std::hint::spin_loop();
        };
        perf.end(PerfStage::Alloc);

        slot.write(Sample::consecutive(now_ticks(), len, &mut counter));
        perf.begin(PerfStage::Push);
        // SAFETY: the slot returned by `alloc` was just initialised.
        unsafe { tx.push() };
        perf.end(PerfStage::Push);

        pace(start, cfg.pace_ticks);
    }

    tracing::info!(samples = cfg.messages, values = counter, "spsc sender done");
    report(&perf, &[PerfStage::Alloc, PerfStage::Push]);
    Ok(())
}

fn run_spmc(cfg: &DemoConfig) -> Result<()> {
    let ring: &BroadcastRing<Beacon, CAPACITY> = shm::attach(&cfg.spmc_shm_name)
        .with_context(|| format!("attaching spmc segment {}", cfg.spmc_shm_name))?;
    let mut writer = ring
        .writer()
        .with_context(|| format!("segment {} already has a writer", cfg.spmc_shm_name))?;
    let mut perf = PerfRecorder::new();

    tracing::info!(
        name = %cfg.spmc_shm_name,
        messages = cfg.messages,
        cursor = writer.cursor(),
        "broadcasting over spmc"
    );
    // Indices continue from the ring's cursor so a restarted sender does not
    // look like it went backwards to readers that stayed attached.
    let base = writer.cursor();
    for i in 0..cfg.messages {
        let start = now_ticks();
        perf.begin(PerfStage::Write);
        writer.write(|| Beacon::new(now_ticks(), base + i));
        perf.end(PerfStage::Write);
        pace(start, cfg.pace_ticks);
    }

    tracing::info!(beacons = cfg.messages, cursor = writer.cursor(), "spmc sender done");
    report(&perf, &[PerfStage::Write]);
    Ok(())
}

fn report(perf: &PerfRecorder, stages: &[PerfStage]) {
    for &stage in stages {
        if perf.count(stage) > 0 {
            tracing::info!(stage = stage.name(), samples = perf.count(stage), mean_ticks = perf.mean(stage), "perf");
        }
    }
}
