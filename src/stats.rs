use {super::*, crate::vardiff::VardiffTracker};

pub const STATS_PRINT_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed-point scale for the share-difficulty sum, so it can live in an
/// atomic next to the counters. Good to a millionth of a difficulty unit.
const DIFF_SUM_SCALE: f64 = 1_000_000.0;

/// Per-worker counters and the vardiff substate.
pub struct WorkStats {
    worker_name: Mutex<String>,
    start_time: Instant,
    last_share: Mutex<Instant>,
    blocks_found: AtomicU64,
    shares_found: AtomicU64,
    stale_shares: AtomicU64,
    invalid_shares: AtomicU64,
    shares_diff_scaled: AtomicU64,
    vardiff: Mutex<VardiffTracker>,
}

impl WorkStats {
    fn new(worker_name: String, initial_diff: f64) -> Self {
        Self {
            worker_name: Mutex::new(worker_name),
            start_time: Instant::now(),
            last_share: Mutex::new(Instant::now()),
            blocks_found: AtomicU64::new(0),
            shares_found: AtomicU64::new(0),
            stale_shares: AtomicU64::new(0),
            invalid_shares: AtomicU64::new(0),
            shares_diff_scaled: AtomicU64::new(0),
            vardiff: Mutex::new(VardiffTracker::new(initial_diff)),
        }
    }

    /// Credit a share at the given difficulty. Blocks are shares too.
    pub fn add_share(&self, difficulty: f64) {
        self.shares_found.fetch_add(1, Ordering::Relaxed);
        self.shares_diff_scaled
            .fetch_add((difficulty * DIFF_SUM_SCALE) as u64, Ordering::Relaxed);
        *self.last_share.lock().unwrap() = Instant::now();
        self.with_vardiff(|tracker| tracker.record_share());
    }

    pub fn add_block(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stale(&self) {
        self.stale_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_invalid(&self) {
        self.invalid_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub fn shares(&self) -> u64 {
        self.shares_found.load(Ordering::Relaxed)
    }

    pub fn stales(&self) -> u64 {
        self.stale_shares.load(Ordering::Relaxed)
    }

    pub fn invalids(&self) -> u64 {
        self.invalid_shares.load(Ordering::Relaxed)
    }

    pub fn shares_diff(&self) -> f64 {
        self.shares_diff_scaled.load(Ordering::Relaxed) as f64 / DIFF_SUM_SCALE
    }

    pub fn worker_name(&self) -> String {
        self.worker_name.lock().unwrap().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn average_hash_rate(&self) -> HashRate {
        HashRate::estimate(self.shares_diff(), self.uptime())
    }

    pub fn with_vardiff<R>(&self, f: impl FnOnce(&mut VardiffTracker) -> R) -> R {
        f(&mut self.vardiff.lock().unwrap())
    }

    pub fn min_diff(&self) -> f64 {
        self.with_vardiff(|tracker| tracker.min_diff())
    }
}

/// Worker-keyed stats map. Entries are keyed by worker name once known,
/// remote address until then; a remote-address entry is re-keyed in place
/// when the connection later learns its worker name.
pub struct StatsRegistry {
    workers: Mutex<HashMap<String, Arc<WorkStats>>>,
    initial_diff: f64,
    started: Instant,
}

impl StatsRegistry {
    pub fn new(initial_diff: f64) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            initial_diff,
            started: Instant::now(),
        }
    }

    pub fn get_or_create(&self, worker_name: Option<&str>, remote_addr: &str) -> Arc<WorkStats> {
        let mut workers = self.workers.lock().unwrap();

        if let Some(name) = worker_name {
            if let Some(stats) = workers.get(name) {
                return stats.clone();
            }

            if let Some(stats) = workers.remove(remote_addr) {
                *stats.worker_name.lock().unwrap() = name.to_string();
                workers.insert(name.to_string(), stats.clone());
                return stats;
            }
        } else if let Some(stats) = workers.get(remote_addr) {
            return stats.clone();
        }

        let key = worker_name.unwrap_or(remote_addr).to_string();
        let stats = Arc::new(WorkStats::new(key.clone(), self.initial_diff));
        workers.insert(key, stats.clone());
        stats
    }

    pub fn snapshot(&self) -> Vec<Arc<WorkStats>> {
        self.workers.lock().unwrap().values().cloned().collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// The 10-second console table.
    pub fn render_table(&self, network_difficulty: f64) -> String {
        let mut lines = Vec::new();
        let mut total_rate = HashRate::ZERO;
        let mut totals = (0u64, 0u64, 0u64, 0u64);

        for stats in self.snapshot() {
            let rate = stats.average_hash_rate();
            total_rate = total_rate + rate;
            totals.0 += stats.shares();
            totals.1 += stats.stales();
            totals.2 += stats.invalids();
            totals.3 += stats.blocks();

            lines.push(format!(
                " {:<15}| {:>14} | {:>14} | {:>12} | {:>10}s",
                stats.worker_name(),
                rate.to_string(),
                format!("{}/{}/{}", stats.shares(), stats.stales(), stats.invalids()),
                stats.blocks(),
                stats.uptime().as_secs(),
            ));
        }

        lines.sort();

        let network_rate =
            HashRate::from_difficulty_rate(network_difficulty, BLOCKS_PER_SECOND as f64);

        format!(
            "\n===============================================================================\n\
             \x20 worker name   |  avg hashrate  |   acc/stl/inv  |    blocks    |    uptime   \n\
             -------------------------------------------------------------------------------\n\
             {}\n\
             -------------------------------------------------------------------------------\n\
             \x20               | {:>14} | {:>14} | {:>12} | {:>10}s\n\
             -------------------------------------------------------------------------------\n\
             \x20Est. Network Hashrate: {}\n\
             \x20Mining difficulty:     {:.2}\n\
             ========================================================== {} ===\n",
            lines.join("\n"),
            total_rate.to_string(),
            format!("{}/{}/{}", totals.0, totals.1, totals.2),
            totals.3,
            self.uptime().as_secs(),
            network_rate,
            network_difficulty,
            USER_AGENT,
        )
    }

    /// Prometheus text exposition of the worker counters.
    pub fn render_metrics(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, fn(&WorkStats) -> u64); 4] = [
            ("htnbridge_shares_found_total", WorkStats::shares),
            ("htnbridge_stale_shares_total", WorkStats::stales),
            ("htnbridge_invalid_shares_total", WorkStats::invalids),
            ("htnbridge_blocks_found_total", WorkStats::blocks),
        ];

        let snapshot = self.snapshot();

        for (name, getter) in counters {
            out.push_str(&format!("# TYPE {name} counter\n"));
            for stats in &snapshot {
                out.push_str(&format!(
                    "{name}{{worker=\"{}\"}} {}\n",
                    stats.worker_name(),
                    getter(stats)
                ));
            }
        }

        out.push_str("# TYPE htnbridge_share_diff_sum gauge\n");
        for stats in &snapshot {
            out.push_str(&format!(
                "htnbridge_share_diff_sum{{worker=\"{}\"}} {}\n",
                stats.worker_name(),
                stats.shares_diff()
            ));
        }

        out.push_str("# TYPE htnbridge_worker_hash_rate gauge\n");
        for stats in &snapshot {
            out.push_str(&format!(
                "htnbridge_worker_hash_rate{{worker=\"{}\"}} {}\n",
                stats.worker_name(),
                stats.average_hash_rate().as_f64()
            ));
        }

        out
    }
}

/// Periodic console stats, in the shape the original bridge printed.
pub(crate) fn start_print_loop(
    registry: Arc<StatsRegistry>,
    validator: Arc<ShareValidator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(STATS_PRINT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            info!("{}", registry.render_table(validator.network_difficulty()));
        }
    })
}
