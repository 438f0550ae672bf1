use {super::*, crate::pow::PowState, crate::stratum_target::MAX_TARGET};

/// Offenses beyond this refuse the wallet new job dispatch.
const BAN_THRESHOLD: u32 = 10;

/// Classification of one `mining.submit`.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareOutcome {
    /// Met the network target and the node took the block.
    AcceptedBlock { hash: Hash256 },
    /// Met the stratum target only.
    AcceptedShare,
    /// Met neither target; the miner is misconfigured.
    Weak,
    /// Unknown, aged-out, or node-duplicate job.
    Stale,
    /// Same (nonce, hash) seen before for this job.
    Duplicate,
    /// Unparseable submission or node-side rejection.
    BadData,
    /// Claimed PoW hash does not match the recomputed one.
    WrongPow {
        submitted: Hash256,
        recalculated: Hash256,
    },
}

impl ShareOutcome {
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            ShareOutcome::AcceptedBlock { .. } | ShareOutcome::AcceptedShare
        )
    }

    /// Encode the outcome as the wire reply, errors coded per the protocol.
    pub fn into_reply(self, id: Id) -> Message {
        let error = match self {
            ShareOutcome::AcceptedBlock { .. } | ShareOutcome::AcceptedShare => {
                return Message::Response {
                    id,
                    result: Some(json!(true)),
                    error: None,
                };
            }
            ShareOutcome::Stale => StratumError::Stale.into_response(None),
            ShareOutcome::Duplicate => StratumError::Duplicate.into_response(None),
            ShareOutcome::Weak => StratumError::LowDifficulty.into_response(None),
            ShareOutcome::BadData => StratumError::BadData.into_response(None),
            ShareOutcome::WrongPow {
                submitted,
                recalculated,
            } => StratumError::IncorrectPow.into_response(Some(json!({
                "submitted": submitted.to_string(),
                "recalculated": recalculated.to_string(),
            }))),
        };

        Message::Response {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Re-derives proof-of-work for submissions, classifies them, and forwards
/// winners to the node. Also owns the tip observation and the soft-ban list.
pub struct ShareValidator {
    node: Arc<dyn NodeClient>,
    solo_mining: bool,
    tip_blue_score: AtomicU64,
    /// Bits of the latest observed network difficulty, for stats display.
    network_difficulty_bits: AtomicU64,
    bans: Mutex<HashMap<String, u32>>,
}

impl ShareValidator {
    pub fn new(node: Arc<dyn NodeClient>, solo_mining: bool) -> Self {
        Self {
            node,
            solo_mining,
            tip_blue_score: AtomicU64::new(0),
            network_difficulty_bits: AtomicU64::new(0f64.to_bits()),
            bans: Mutex::new(HashMap::new()),
        }
    }

    pub fn solo_mining(&self) -> bool {
        self.solo_mining
    }

    /// Track the highest blue score seen across templates and submissions;
    /// returns the current tip.
    pub fn observe_template(&self, template: &RpcBlock) -> u64 {
        let difficulty = *MAX_TARGET / pow::target_from_bits(template.header.bits).max(U256::one());
        self.network_difficulty_bits.store(
            stratum_target::u256_to_f64(difficulty).to_bits(),
            Ordering::Relaxed,
        );

        self.observe_blue_score(template.header.blue_score)
    }

    fn observe_blue_score(&self, blue_score: u64) -> u64 {
        self.tip_blue_score
            .fetch_max(blue_score, Ordering::Relaxed)
            .max(blue_score)
    }

    pub fn network_difficulty(&self) -> f64 {
        f64::from_bits(self.network_difficulty_bits.load(Ordering::Relaxed))
    }

    pub fn record_offense(&self, wallet: &str) {
        *self
            .bans
            .lock()
            .unwrap()
            .entry(wallet.to_string())
            .or_insert(0) += 1;
    }

    pub fn banned(&self, wallet: &str) -> bool {
        self.bans
            .lock()
            .unwrap()
            .get(wallet)
            .is_some_and(|offenses| *offenses > BAN_THRESHOLD)
    }

    /// The full submission pipeline. Counter updates land on `stats`; the
    /// caller encodes the returned outcome onto the wire.
    pub async fn handle_submit(
        &self,
        submit: &Submit,
        state: &mut MiningState,
        stats: &WorkStats,
        wallet: &str,
    ) -> ShareOutcome {
        let padded = match &state.extranonce {
            Some(extranonce) => extranonce.pad_nonce(&submit.nonce),
            None => submit.nonce.clone(),
        };

        // big_job reserves a wide-nonce parse branch; both job formats carry
        // 64-bit nonces today so the parse is shared.
        let Ok(nonce) = u64::from_str_radix(&padded, 16) else {
            debug!("unparseable nonce `{padded}` from {wallet}");
            stats.add_invalid();
            self.record_offense(wallet);
            return ShareOutcome::BadData;
        };

        let Some(job) = state.get_job_mut(submit.job_id) else {
            debug!("job {} not found, stale?", submit.job_id);
            stats.add_stale();
            return ShareOutcome::Stale;
        };

        let job_blue_score = job.blue_score();
        let tip = self.observe_blue_score(job_blue_score);
        if tip.saturating_sub(job_blue_score) > WORK_WINDOW {
            debug!("stale share: blue score {job_blue_score} vs tip {tip}");
            state.remove_job(submit.job_id);
            stats.add_stale();
            return ShareOutcome::Stale;
        }

        if !job.record_submission(nonce, submit.pow_hash) {
            stats.add_invalid();
            return ShareOutcome::Duplicate;
        }

        let template = job.template.clone();
        let pow_state = PowState::new(&template.header);
        let (recalculated_num, recalculated_hash) = pow_state.pow_value(nonce);
        let submitted_num = pow::pow_hash_to_num(&submit.pow_hash);

        if submitted_num != recalculated_num {
            stats.add_invalid();
            self.record_offense(wallet);
            return ShareOutcome::WrongPow {
                submitted: submit.pow_hash,
                recalculated: recalculated_hash,
            };
        }

        if pow_state.meets_network_target(&recalculated_num) {
            let outcome = self
                .submit_block(&template, nonce, &submit.pow_hash, stats)
                .await;

            // Win or lose, the job went into a block submission and must
            // not be reusable.
            state.remove_job(submit.job_id);

            match outcome {
                SubmitOutcome::Accepted => {
                    stats.add_block();
                    self.credit_share(state, stats);
                    return ShareOutcome::AcceptedBlock {
                        hash: recalculated_hash,
                    };
                }
                SubmitOutcome::DuplicateBlock => {
                    warn!("block rejected, stale");
                    stats.add_stale();
                    return ShareOutcome::Stale;
                }
                SubmitOutcome::InvalidPow | SubmitOutcome::Other(_) => {
                    stats.add_invalid();
                    return ShareOutcome::BadData;
                }
            }
        }

        if state.stratum_target.met_by(&recalculated_num) {
            self.credit_share(state, stats);
            return ShareOutcome::AcceptedShare;
        }

        if self.solo_mining {
            warn!("weak block from {wallet}");
        } else {
            warn!("weak share from {wallet}");
        }
        stats.add_invalid();
        ShareOutcome::Weak
    }

    async fn submit_block(
        &self,
        template: &RpcBlock,
        nonce: u64,
        pow_hash: &Hash256,
        stats: &WorkStats,
    ) -> SubmitOutcome {
        let mut block = template.clone();
        block.header.nonce = nonce;

        let submitted = timeout(
            node::SUBMIT_TIMEOUT,
            self.node.submit_block(block, &pow_hash.to_string()),
        )
        .await;

        match submitted {
            Ok(Ok(SubmitOutcome::Accepted)) => {
                info!(
                    "block accepted, blue score {} worker {}",
                    template.header.blue_score,
                    stats.worker_name(),
                );
                SubmitOutcome::Accepted
            }
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                error!("block submission failed: {err}");
                SubmitOutcome::Other(err.to_string())
            }
            Err(_) => {
                error!("block submission timed out");
                SubmitOutcome::Other("submission timed out".into())
            }
        }
    }

    fn credit_share(&self, state: &MiningState, stats: &WorkStats) {
        stats.add_share(state.stratum_target.difficulty());
    }
}
