use super::*;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Observation windows in minutes; the final stage is unbounded. At the
/// default 15 shares/min a worker that clears every stage has its rate
/// pinned within ±5%.
const WINDOWS: [f64; 7] = [1.0, 3.0, 10.0, 30.0, 60.0, 240.0, 0.0];
const TOLERANCES: [f64; 7] = [1.0, 0.5, 0.25, 0.15, 0.1, 0.05, 0.05];

const FINAL_STAGE: usize = WINDOWS.len() - 1;

/// Difficulty never adjusts below this floor.
pub const MIN_DIFF_FLOOR: f64 = 1e-5;

/// Per-worker difficulty tracker. A zeroed `window_start` disables the
/// tracker until the next job dispatch restarts it, which is also when the
/// new difficulty reaches the miner as a `set_difficulty`.
#[derive(Debug)]
pub struct VardiffTracker {
    window_index: usize,
    window_start: Option<Instant>,
    window_shares: u64,
    min_diff: f64,
}

impl VardiffTracker {
    pub fn new(initial_diff: f64) -> Self {
        Self {
            window_index: 0,
            window_start: None,
            window_shares: 0,
            min_diff: initial_diff.max(MIN_DIFF_FLOOR),
        }
    }

    pub fn min_diff(&self) -> f64 {
        self.min_diff
    }

    pub fn window_index(&self) -> usize {
        self.window_index
    }

    pub fn window_shares(&self) -> u64 {
        self.window_shares
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.window_start.map(|start| now.duration_since(start))
    }

    /// (Re)start the tracker. No-op while it is already running.
    pub fn start(&mut self) {
        if self.window_start.is_none() {
            self.window_shares = 0;
            self.window_start = Some(Instant::now());
        }
    }

    pub fn record_share(&mut self) {
        self.window_shares += 1;
    }

    /// Adopt a new difficulty and disable the tracker until the next
    /// dispatch restarts it.
    pub fn apply(&mut self, new_diff: f64) {
        self.min_diff = new_diff.max(MIN_DIFF_FLOOR);
        self.window_index = 0;
        self.window_start = None;
    }

    /// One sweep step: returns the adjusted difficulty if the observed share
    /// rate breached the current stage schedule, advancing to the next stage
    /// when a full window passes in tolerance.
    pub fn evaluate(&mut self, target_per_min: f64, now: Instant) -> Option<f64> {
        let start = self.window_start?;

        let elapsed_min = now.duration_since(start).as_secs_f64() / 60.0;
        if elapsed_min <= 0.0 {
            return None;
        }

        let shares = self.window_shares as f64;
        let rate = shares / elapsed_min;
        let ratio = rate / target_per_min;

        let window = WINDOWS[self.window_index];
        let tolerance = TOLERANCES[self.window_index];

        // Most workers spend their life in the final stage.
        if self.window_index == FINAL_STAGE {
            if (1.0 - ratio).abs() >= tolerance {
                return Some(self.min_diff * ratio);
            }
            return None;
        }

        // A rate that breaches a previously cleared stage's tighter band
        // means the worker's hashrate moved; readjust immediately.
        for stage in 1..self.window_index {
            if (1.0 - ratio).abs() >= TOLERANCES[stage] {
                return Some(self.min_diff * ratio);
            }
        }

        // Upper breach doesn't wait for the window to elapse.
        if shares >= window * target_per_min * (1.0 + tolerance) {
            return Some(self.min_diff * ratio);
        }

        if elapsed_min >= window {
            if shares <= window * target_per_min * (1.0 - tolerance) {
                return Some(self.min_diff * ratio.max(0.1));
            }

            self.window_index += 1;
        }

        None
    }
}

/// Periodic sweep over all workers. Adjusted difficulties take effect on
/// each worker's next job dispatch.
pub(crate) fn start_sweep(
    registry: Arc<StatsRegistry>,
    target_per_min: u64,
    log_stats: bool,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let target = target_per_min as f64;
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let mut lines = Vec::new();

            for stats in registry.snapshot() {
                let (line, adjusted) = stats.with_vardiff(|tracker| {
                    let line = tracker.elapsed(now).map(|elapsed| {
                        let minutes = elapsed.as_secs_f64() / 60.0;
                        format!(
                            " {:<14}| {:>11.2} | {:>8} | {:>10.2} | {:>11} | {:>9.2}",
                            stats.worker_name(),
                            tracker.min_diff(),
                            WINDOWS[tracker.window_index()] as u64,
                            minutes,
                            tracker.window_shares(),
                            tracker.window_shares() as f64 / minutes.max(f64::MIN_POSITIVE),
                        )
                    });

                    let adjusted = tracker.evaluate(target, now).map(|new_diff| {
                        let previous = tracker.min_diff();
                        tracker.apply(new_diff);
                        (previous, tracker.min_diff())
                    });

                    (line, adjusted)
                });

                if let Some((previous, new_diff)) = adjusted {
                    info!(
                        "vardiff: {} {previous:.2} -> {new_diff:.2}",
                        stats.worker_name()
                    );
                }

                lines.extend(line);
            }

            if log_stats && !lines.is_empty() {
                lines.sort();
                info!(
                    "\n=== vardiff ===================================================================\n\
                     \n  worker name  |    diff     |  window  |  elapsed   |    shares   |   rate    \n\
                     -------------------------------------------------------------------------------\n\
                     {}",
                    lines.join("\n")
                );
            }
        }
    })
}
