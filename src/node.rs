use super::*;

/// In-flight RPCs are abandoned with `Transient` when the node connection
/// drops; the transport reconnects with this backoff schedule.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_JITTER_MS: u64 = 250;

/// Block submissions that outlive this deadline are reported as lost.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted,
    /// The node already knew the block. Callers treat this as stale.
    DuplicateBlock,
    InvalidPow,
    Other(String),
}

#[derive(Debug, Clone)]
pub enum RpcError {
    /// Connection blip; retry after backoff.
    Transient(String),
    /// The node processed the call and rejected it.
    Node(String),
    /// Unrecoverable; surfaced to the supervisor.
    Fatal(String),
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Transient(message) => write!(f, "transient node error: {message}"),
            RpcError::Node(message) => write!(f, "node error: {message}"),
            RpcError::Fatal(message) => write!(f, "fatal node error: {message}"),
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateResponse {
    pub block: RpcBlock,
    pub is_synced: bool,
}

/// Facade over the node RPC. The bridge core only touches this surface, so
/// the transport behind it is swappable and tests run against mocks.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_block_template(
        &self,
        payout_address: &str,
        extra_data: &str,
    ) -> Result<TemplateResponse, RpcError>;

    async fn submit_block(&self, block: RpcBlock, pow_hash: &str)
    -> Result<SubmitOutcome, RpcError>;

    async fn get_dag_info(&self) -> Result<DagInfo, RpcError>;

    async fn get_block(
        &self,
        hash: &str,
        include_transactions: bool,
    ) -> Result<RpcBlock, RpcError>;

    /// New-block push notifications. Missed notifications are tolerated;
    /// the dispatcher polls on `block_wait_time` as a fallback.
    fn block_added(&self) -> broadcast::Receiver<()>;
}

/// Line-delimited JSON-RPC transport to the node endpoint.
pub struct RpcNodeClient {
    commands: mpsc::Sender<Command>,
    block_added: broadcast::Sender<()>,
}

struct Command {
    method: &'static str,
    params: Value,
    reply: oneshot::Sender<Result<Value, RpcError>>,
}

impl RpcNodeClient {
    pub fn spawn(endpoint: String, cancel: CancellationToken) -> Arc<Self> {
        let (commands, command_rx) = mpsc::channel(64);
        let (block_added, _) = broadcast::channel(16);

        tokio::spawn(io_task(endpoint, command_rx, block_added.clone(), cancel));

        Arc::new(Self {
            commands,
            block_added,
        })
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        let (reply, response) = oneshot::channel();

        self.commands
            .send(Command {
                method,
                params,
                reply,
            })
            .await
            .map_err(|_| RpcError::Fatal("node client is shut down".into()))?;

        response
            .await
            .map_err(|_| RpcError::Transient("node connection dropped".into()))?
    }
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn get_block_template(
        &self,
        payout_address: &str,
        extra_data: &str,
    ) -> Result<TemplateResponse, RpcError> {
        let result = self
            .call(
                "getBlockTemplate",
                json!({ "payAddress": payout_address, "extraData": extra_data }),
            )
            .await?;

        serde_json::from_value(result)
            .map_err(|err| RpcError::Node(format!("malformed template response: {err}")))
    }

    async fn submit_block(
        &self,
        block: RpcBlock,
        pow_hash: &str,
    ) -> Result<SubmitOutcome, RpcError> {
        let result = self
            .call(
                "submitBlock",
                json!({ "block": block, "powHash": pow_hash }),
            )
            .await;

        match result {
            Ok(_) => Ok(SubmitOutcome::Accepted),
            Err(RpcError::Node(message)) if message.contains("ErrDuplicateBlock") => {
                Ok(SubmitOutcome::DuplicateBlock)
            }
            Err(RpcError::Node(message)) if message.contains("ErrInvalidPoW") => {
                Ok(SubmitOutcome::InvalidPow)
            }
            Err(RpcError::Node(message)) => Ok(SubmitOutcome::Other(message)),
            Err(err) => Err(err),
        }
    }

    async fn get_dag_info(&self) -> Result<DagInfo, RpcError> {
        let result = self.call("getBlockDagInfo", json!({})).await?;
        serde_json::from_value(result)
            .map_err(|err| RpcError::Node(format!("malformed dag info: {err}")))
    }

    async fn get_block(
        &self,
        hash: &str,
        include_transactions: bool,
    ) -> Result<RpcBlock, RpcError> {
        let result = self
            .call(
                "getBlock",
                json!({ "hash": hash, "includeTransactions": include_transactions }),
            )
            .await?;

        serde_json::from_value(result)
            .map_err(|err| RpcError::Node(format!("malformed block response: {err}")))
    }

    fn block_added(&self) -> broadcast::Receiver<()> {
        self.block_added.subscribe()
    }
}

async fn io_task(
    endpoint: String,
    mut commands: mpsc::Receiver<Command>,
    block_added: broadcast::Sender<()>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            stream = tokio::net::TcpStream::connect(&endpoint) => stream,
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                let delay = backoff_delay(attempt);
                warn!("node connect to {endpoint} failed: {err}; retrying in {delay:?}");
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(delay) => continue,
                }
            }
        };

        info!("Connected to node at {endpoint}");
        attempt = 0;

        let (reader, writer) = stream.into_split();
        let mut reader = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));
        let mut writer = FramedWrite::new(writer, LinesCodec::new());

        let mut pending: HashMap<u64, oneshot::Sender<Result<Value, RpcError>>> = HashMap::new();
        let mut next_id = 0u64;

        let disconnect_reason = 'session: loop {
            tokio::select! {
                _ = cancel.cancelled() => return,

                command = commands.recv() => {
                    let Some(command) = command else { return };

                    next_id += 1;
                    let frame = serde_json::to_string(&json!({
                        "id": next_id,
                        "method": command.method,
                        "params": command.params,
                    }))
                    .expect("rpc request is serializable");

                    if let Err(err) = writer.send(frame).await {
                        let _ = command
                            .reply
                            .send(Err(RpcError::Transient(format!("node write failed: {err}"))));
                        break 'session format!("write failed: {err}");
                    }

                    pending.insert(next_id, command.reply);
                }

                frame = reader.next() => {
                    match frame {
                        Some(Ok(line)) => {
                            if let Err(err) = route_frame(&line, &mut pending, &block_added) {
                                warn!("ignoring node frame: {err}");
                            }
                        }
                        Some(Err(err)) => break 'session format!("read failed: {err}"),
                        None => break 'session "node closed the connection".into(),
                    }
                }
            }
        };

        warn!("node connection lost: {disconnect_reason}");

        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(RpcError::Transient(disconnect_reason.clone())));
        }
    }
}

fn route_frame(
    line: &str,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>,
    block_added: &broadcast::Sender<()>,
) -> Result {
    let message = serde_json::from_str::<Message>(line)?;

    match message {
        Message::Response { id, result, error } => {
            let Id::Number(id) = id else {
                bail!("response with non-numeric id {id}");
            };

            let Some(reply) = pending.remove(&id) else {
                bail!("response for unknown request {id}");
            };

            let outcome = match error {
                Some(error) => Err(RpcError::Node(error.to_string())),
                None => Ok(result.unwrap_or(Value::Null)),
            };

            let _ = reply.send(outcome);
            Ok(())
        }
        Message::Notification { method, .. } if method == "blockAdded" => {
            let _ = block_added.send(());
            Ok(())
        }
        Message::Notification { method, .. } => bail!("unknown notification {method}"),
        Message::Request { method, .. } => bail!("unexpected request {method} from node"),
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE
        .saturating_mul(1u32 << attempt.min(6))
        .min(BACKOFF_CAP);
    let jitter = Duration::from_millis(rand::random_range(0..BACKOFF_JITTER_MS));
    exponential + jitter
}
