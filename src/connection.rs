use {super::*, regex::Regex};

/// Miner applications that get the wide-job notify variant.
static BIG_JOB_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("BzMiner|IceRiverMiner").unwrap());

/// How long the writer gets to drain its queue at shutdown.
const FLUSH_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    Connected,
    Subscribed,
    Authorized,
}

/// Bounded outbound queue owned by the per-connection writer task.
///
/// When full, the oldest coalescible notification (`mining.notify` or
/// `mining.set_difficulty`) is dropped first; a dropped notify is recovered
/// by the next template within `block_wait_time`. Responses are never
/// dropped; failing to queue one closes the connection as a slow consumer.
struct Outbound {
    queue: Mutex<VecDeque<Message>>,
    signal: tokio::sync::Notify,
}

impl Outbound {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            signal: tokio::sync::Notify::new(),
        })
    }

    fn push(&self, message: Message) -> Result {
        {
            let mut queue = self.queue.lock().unwrap();

            if queue.len() >= OUTBOUND_QUEUE_CAPACITY {
                if let Some(index) = queue.iter().position(coalescible) {
                    debug!("outbound queue full, coalescing a queued notification");
                    queue.remove(index);
                } else if coalescible(&message) {
                    debug!("outbound queue full, dropping fresh notification");
                    return Ok(());
                } else {
                    bail!("slow consumer: outbound queue full");
                }
            }

            queue.push_back(message);
        }

        self.signal.notify_one();
        Ok(())
    }

    fn pop_now(&self) -> Option<Message> {
        self.queue.lock().unwrap().pop_front()
    }

    async fn pop(&self) -> Message {
        loop {
            let notified = self.signal.notified();
            if let Some(message) = self.pop_now() {
                return message;
            }
            notified.await;
        }
    }
}

fn coalescible(message: &Message) -> bool {
    matches!(
        message.method(),
        Some("mining.notify" | "mining.set_difficulty")
    )
}

async fn write_loop<W>(
    mut writer: FramedWrite<W, LinesCodec>,
    outbound: Arc<Outbound>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            message = outbound.pop() => {
                let frame = match serde_json::to_string(&message) {
                    Ok(frame) => frame,
                    Err(err) => {
                        error!("failed to serialize outbound message: {err}");
                        continue;
                    }
                };

                if let Err(err) = writer.send(frame).await {
                    debug!("socket write failed: {err}");
                    return;
                }
            }

            _ = cancel.cancelled() => {
                let deadline = Instant::now() + FLUSH_DEADLINE;

                while let Some(message) = outbound.pop_now() {
                    let Ok(frame) = serde_json::to_string(&message) else {
                        continue;
                    };

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match timeout(remaining, writer.send(frame)).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }

                return;
            }
        }
    }
}

/// One miner session: framed reader, request dispatch, and job delivery.
pub struct Connection<R, W> {
    config: Arc<BridgeConfig>,
    node: Arc<dyn NodeClient>,
    validator: Arc<ShareValidator>,
    stats: Arc<StatsRegistry>,
    socket_addr: SocketAddr,
    reader: FramedRead<R, LinesCodec>,
    writer: Option<FramedWrite<W, LinesCodec>>,
    outbound: Arc<Outbound>,
    template_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
    state: State,
    mining_state: MiningState,
    wallet: Option<String>,
    worker_name: Option<String>,
    remote_app: Option<String>,
    worker_stats: Option<Arc<WorkStats>>,
    last_template: Option<Arc<RpcBlock>>,
    consecutive_parse_failures: u32,
    shutdown: bool,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<BridgeConfig>,
        node: Arc<dyn NodeClient>,
        validator: Arc<ShareValidator>,
        stats: Arc<StatsRegistry>,
        socket_addr: SocketAddr,
        reader: R,
        writer: W,
        extranonce: Option<Extranonce>,
        template_rx: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Self {
        let mining_state = MiningState::new(config.min_share_diff, extranonce);

        Self {
            config,
            node,
            validator,
            stats,
            socket_addr,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE)),
            writer: Some(FramedWrite::new(writer, LinesCodec::new())),
            outbound: Outbound::new(),
            template_rx,
            cancel,
            state: State::Connected,
            mining_state,
            wallet: None,
            worker_name: None,
            remote_app: None,
            worker_stats: None,
            last_template: None,
            consecutive_parse_failures: 0,
            shutdown: false,
        }
    }

    pub async fn serve(mut self) -> Result {
        let writer_cancel = self.cancel.child_token();
        let writer_handle = tokio::spawn(write_loop(
            self.writer.take().expect("writer present until serve"),
            self.outbound.clone(),
            writer_cancel.clone(),
        ));

        let mut template_rx = self.template_rx.clone();
        template_rx.mark_unchanged();

        let cancel = self.cancel.clone();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Disconnecting from {}", self.socket_addr);
                    break Ok(());
                }

                frame = self.reader.next() => {
                    match frame {
                        Some(Ok(line)) => {
                            if let Err(err) = self.handle_frame(&line).await {
                                break Err(err);
                            }
                        }
                        Some(Err(err)) => {
                            break Err(anyhow!("read error from {}: {err}", self.socket_addr));
                        }
                        None => {
                            info!("Connection {} disconnected", self.socket_addr);
                            break Ok(());
                        }
                    }

                    if self.shutdown {
                        break Ok(());
                    }
                }

                changed = template_rx.changed() => {
                    if changed.is_err() {
                        warn!("Template dispatcher gone, closing {}", self.socket_addr);
                        break Ok(());
                    }

                    if self.state == State::Authorized {
                        if let Err(err) = self.dispatch_job(false).await {
                            break Err(err);
                        }
                    }
                }
            }
        };

        writer_cancel.cancel();
        let _ = writer_handle.await;

        result
    }

    async fn handle_frame(&mut self, line: &str) -> Result {
        let message = match serde_json::from_str::<Message>(line) {
            Ok(message) => message,
            Err(err) => {
                self.consecutive_parse_failures += 1;
                warn!(
                    "malformed frame from {} ({err}); strike {}",
                    self.socket_addr, self.consecutive_parse_failures
                );

                self.send_error(Id::Null, StratumError::BadData, None)?;

                if self.consecutive_parse_failures >= 2 {
                    warn!("two malformed frames in a row, dropping {}", self.socket_addr);
                    self.shutdown = true;
                }

                return Ok(());
            }
        };

        self.consecutive_parse_failures = 0;

        let Message::Request { id, method, params } = message else {
            warn!("ignoring non-request message from {}", self.socket_addr);
            return Ok(());
        };

        // A panicking handler must not take the process down; the miner gets
        // a generic error and the session carries on.
        let handled = std::panic::AssertUnwindSafe(self.handle_request(id.clone(), &method, params))
            .catch_unwind()
            .await;

        match handled {
            Ok(result) => result,
            Err(_panic) => {
                error!("handler for {method} panicked, replying with a generic error");
                self.send_error(id, StratumError::Unknown, None)
            }
        }
    }

    async fn handle_request(&mut self, id: Id, method: &str, params: Value) -> Result {
        match method {
            "mining.subscribe" => self.handle_subscribe(id, params),
            "mining.authorize" => self.handle_authorize(id, params).await,
            "mining.submit" => self.handle_submit(id, params).await,
            method => {
                warn!("unknown method {method} from {}", self.socket_addr);
                Ok(())
            }
        }
    }

    fn handle_subscribe(&mut self, id: Id, params: Value) -> Result {
        debug!("SUBSCRIBE from {} with {params}", self.socket_addr);

        if self.state != State::Connected {
            return self.send_error(
                id,
                StratumError::Unknown,
                Some(json!({ "message": "already subscribed" })),
            );
        }

        let subscribe: Subscribe = serde_json::from_value(params).unwrap_or_default();

        if let Some(app) = &subscribe.user_agent {
            self.mining_state.big_job = BIG_JOB_REGEX.is_match(app);
            self.remote_app = Some(app.clone());
        }

        self.send_result(id, json!(SubscribeResult::default()))?;
        self.state = State::Subscribed;

        info!(
            "client subscribed from {} ({})",
            self.socket_addr,
            self.remote_app.as_deref().unwrap_or("unknown app"),
        );

        Ok(())
    }

    async fn handle_authorize(&mut self, id: Id, params: Value) -> Result {
        debug!("AUTHORIZE from {} with {params}", self.socket_addr);

        if self.state == State::Connected {
            return self.send_error(
                id,
                StratumError::Unauthorized,
                Some(json!({ "message": "subscribe first" })),
            );
        }

        let authorize: Authorize = match serde_json::from_value(params) {
            Ok(authorize) => authorize,
            Err(err) => {
                return self.send_error(
                    id,
                    StratumError::BadData,
                    Some(json!({ "message": err.to_string() })),
                );
            }
        };

        let wallet = match wallet::clean_wallet(authorize.wallet()) {
            Ok(wallet) => wallet,
            Err(err) => {
                self.send_error(
                    id,
                    StratumError::Unauthorized,
                    Some(json!({
                        "message": err.to_string(),
                        "address": authorize.wallet(),
                    })),
                )?;
                self.shutdown = true;
                return Ok(());
            }
        };

        self.wallet = Some(wallet.clone());
        self.worker_name = authorize.worker_name().map(str::to_string);

        let stats = self.stats.get_or_create(
            self.worker_name.as_deref(),
            &self.socket_addr.to_string(),
        );
        self.worker_stats = Some(stats);

        self.send_result(id, json!(true))?;

        if let Some(extranonce) = &self.mining_state.extranonce {
            self.outbound.push(Message::notification(
                "mining.set_extranonce",
                json!([extranonce.to_hex()]),
            ))?;
        }

        let first_authorize = self.state != State::Authorized;
        self.state = State::Authorized;

        info!("client authorized, address: {wallet}");

        if first_authorize {
            self.dispatch_job(true).await?;
        }

        Ok(())
    }

    async fn handle_submit(&mut self, id: Id, params: Value) -> Result {
        debug!("SUBMIT from {} with {params}", self.socket_addr);

        if self.state != State::Authorized {
            return self.send_error(id, StratumError::Unauthorized, None);
        }

        let wallet = self.wallet.clone().expect("authorized implies wallet");

        let submit: Submit = match serde_json::from_value(params) {
            Ok(submit) => submit,
            Err(err) => {
                // Parse failures count against the worker like any other
                // invalid submission.
                if let Some(stats) = &self.worker_stats {
                    stats.add_invalid();
                }
                self.validator.record_offense(&wallet);

                return self.send_error(
                    id,
                    StratumError::BadData,
                    Some(json!({ "message": err.to_string() })),
                );
            }
        };

        let stats = self
            .worker_stats
            .clone()
            .expect("authorized implies stats");

        let outcome = self
            .validator
            .handle_submit(&submit, &mut self.mining_state, &stats, &wallet)
            .await;

        debug!(
            "submit from {} job {} -> {outcome:?}",
            self.socket_addr, submit.job_id
        );

        self.outbound.push(outcome.into_reply(id))
    }

    /// Fetch a template addressed to this miner and push the next job.
    ///
    /// `initial` forces a difficulty announcement and defeats the identity
    /// debounce, for the first job right after authorization.
    async fn dispatch_job(&mut self, initial: bool) -> Result {
        let Some(wallet) = self.wallet.clone() else {
            return Ok(());
        };

        if self.validator.banned(&wallet) {
            debug!("wallet {wallet} is banned, withholding work");
            return Ok(());
        }

        let worker = self
            .worker_name
            .clone()
            .unwrap_or_else(|| self.socket_addr.to_string());
        let extra_data = format!("{USER_AGENT} by worker {worker}");

        let template = match self.node.get_block_template(&wallet, &extra_data).await {
            Ok(response) => {
                if !response.is_synced && !self.config.mine_when_not_synced {
                    warn!("node is not synced, holding work from {}", self.socket_addr);
                    return Ok(());
                }
                Arc::new(response.block)
            }
            Err(RpcError::Transient(message)) => {
                warn!("template fetch failed: {message}");
                return Ok(());
            }
            Err(RpcError::Node(message)) => {
                bail!("node rejected template request for {wallet}: {message}");
            }
            Err(RpcError::Fatal(message)) => {
                bail!("fatal node error: {message}");
            }
        };

        if !initial
            && self
                .last_template
                .as_ref()
                .is_some_and(|last| last.same_work(&template))
        {
            return Ok(());
        }

        let tip = self.validator.observe_template(&template);
        self.mining_state.clear_older_than(tip);

        let clean_jobs = self
            .last_template
            .as_ref()
            .is_none_or(|last| last.header.prev_hash != template.header.prev_hash);

        self.update_difficulty(&template, initial)?;

        let job_id = self.mining_state.add_job(template.clone());

        let notify = Notify {
            job_id,
            prev_hash: template.header.prev_hash,
            pre_pow_hash: pow::pre_pow_hash(&template.header),
            timestamp: template.header.timestamp,
            clean_jobs,
        };

        self.outbound
            .push(Message::notification("mining.notify", json!(notify)))?;

        self.last_template = Some(template);

        Ok(())
    }

    /// Announce a difficulty change ahead of the job it applies to.
    fn update_difficulty(&mut self, template: &RpcBlock, force: bool) -> Result {
        if self.config.solo_mining {
            let target =
                StratumTarget::from_network_target(pow::target_from_bits(template.header.bits));

            if force || target != self.mining_state.stratum_target {
                self.mining_state.stratum_target = target;
                return self.send_current_difficulty();
            }

            return Ok(());
        }

        let Some(stats) = &self.worker_stats else {
            return Ok(());
        };

        let min_diff = stats.min_diff();
        let changed = min_diff != self.mining_state.stratum_target.difficulty();

        if force || changed {
            self.mining_state.stratum_target = StratumTarget::from_difficulty(min_diff);
            self.send_current_difficulty()?;
        }

        // Restarts the vardiff observation window if an adjustment disabled
        // it; no-op otherwise.
        stats.with_vardiff(|tracker| tracker.start());

        Ok(())
    }

    fn send_current_difficulty(&self) -> Result {
        debug!(
            "sending difficulty {} to {}",
            self.mining_state.stratum_target.difficulty(),
            self.socket_addr
        );

        self.outbound.push(Message::notification(
            "mining.set_difficulty",
            json!(SetDifficulty(self.mining_state.stratum_target.difficulty())),
        ))
    }

    fn send_result(&self, id: Id, result: Value) -> Result {
        self.outbound.push(Message::Response {
            id,
            result: Some(result),
            error: None,
        })
    }

    fn send_error(&self, id: Id, error: StratumError, data: Option<Value>) -> Result {
        self.outbound.push(Message::Response {
            id,
            result: None,
            error: Some(error.into_response(data)),
        })
    }
}
