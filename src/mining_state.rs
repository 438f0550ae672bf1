use super::*;

/// A distributed job: the template it was cut from plus the submissions seen
/// against it, for replay suppression.
#[derive(Debug)]
pub struct Job {
    pub template: Arc<RpcBlock>,
    pub created_at: Instant,
    seen: HashSet<(u64, Hash256)>,
}

impl Job {
    fn new(template: Arc<RpcBlock>) -> Self {
        Self {
            template,
            created_at: Instant::now(),
            seen: HashSet::new(),
        }
    }

    pub fn blue_score(&self) -> u64 {
        self.template.header.blue_score
    }

    /// False when this exact submission was already seen for this job.
    pub fn record_submission(&mut self, nonce: u64, pow_hash: Hash256) -> bool {
        self.seen.insert((nonce, pow_hash))
    }
}

/// Mutable per-connection mining state. Owned by the connection task and
/// never shared.
pub struct MiningState {
    jobs: HashMap<JobId, Job>,
    order: VecDeque<JobId>,
    next_job_id: JobId,
    pub extranonce: Option<Extranonce>,
    /// Hook for a future wide-nonce job format; selected from the miner's
    /// declared application on subscribe. Both formats carry 64-bit nonces
    /// today.
    pub big_job: bool,
    pub stratum_target: StratumTarget,
}

impl MiningState {
    pub fn new(initial_difficulty: f64, extranonce: Option<Extranonce>) -> Self {
        Self {
            jobs: HashMap::new(),
            order: VecDeque::new(),
            next_job_id: JobId::new(1),
            extranonce,
            big_job: false,
            stratum_target: StratumTarget::from_difficulty(initial_difficulty),
        }
    }

    /// Inserts a job and returns its id. Evicts the oldest job once the
    /// cache holds [`JOB_CACHE_MAX`] entries.
    pub fn add_job(&mut self, template: Arc<RpcBlock>) -> JobId {
        while self.jobs.len() >= JOB_CACHE_MAX {
            if let Some(oldest) = self.order.pop_front() {
                self.jobs.remove(&oldest);
            } else {
                break;
            }
        }

        let job_id = self.next_job_id;
        self.next_job_id = job_id.next();

        self.jobs.insert(job_id, Job::new(template));
        self.order.push_back(job_id);

        job_id
    }

    pub fn get_job_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&job_id)
    }

    pub fn remove_job(&mut self, job_id: JobId) {
        if self.jobs.remove(&job_id).is_some() {
            self.order.retain(|id| *id != job_id);
        }
    }

    /// Drops jobs that have fallen more than [`WORK_WINDOW`] blue scores
    /// behind the tip.
    pub fn clear_older_than(&mut self, tip_blue_score: u64) {
        let jobs = &mut self.jobs;
        self.order.retain(|id| {
            let stale = jobs
                .get(id)
                .is_some_and(|job| tip_blue_score.saturating_sub(job.blue_score()) > WORK_WINDOW);
            if stale {
                jobs.remove(id);
            }
            !stale
        });
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
