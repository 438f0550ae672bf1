use {
    async_trait::async_trait,
    htnbridge::{
        config::BridgeConfig,
        connection::Connection,
        node::{NodeClient, RpcError, SubmitOutcome, TemplateResponse},
        pow::PowState,
        share::ShareValidator,
        stats::StatsRegistry,
        stratum::Extranonce,
        template::{DagInfo, Hash256, RpcBlock, RpcHeader},
    },
    serde_json::{Value, json},
    std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf},
        sync::{broadcast, watch},
        task::JoinHandle,
        time::timeout,
    },
    tokio_util::sync::CancellationToken,
};

/// Network target of one; no nonce ever wins a block.
const HARD_BITS: u32 = 0x0300_0001;
/// Network target just under 2^255; roughly every other nonce wins.
const EASY_BITS: u32 = 0x207f_ffff;

const WALLET: &str =
    "hoosat:qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq";

fn template(blue_score: u64, bits: u32, tag: u8) -> TemplateResponse {
    TemplateResponse {
        block: RpcBlock {
            header: RpcHeader {
                version: 1,
                prev_hash: Hash256([tag; 32]),
                merkle_root: Hash256([0x22; 32]),
                timestamp: 1_700_000_000_000 + tag as u64,
                bits,
                nonce: 0,
                blue_score,
            },
            transactions: Vec::new(),
            verbose_data: None,
        },
        is_synced: true,
    }
}

struct MockNode {
    template: Mutex<TemplateResponse>,
    submit_outcome: Mutex<Result<SubmitOutcome, RpcError>>,
    submissions: Mutex<Vec<RpcBlock>>,
    block_added: broadcast::Sender<()>,
}

impl MockNode {
    fn new(initial: TemplateResponse) -> Arc<Self> {
        Arc::new(Self {
            template: Mutex::new(initial),
            submit_outcome: Mutex::new(Ok(SubmitOutcome::Accepted)),
            submissions: Mutex::new(Vec::new()),
            block_added: broadcast::channel(4).0,
        })
    }

    fn set_template(&self, template: TemplateResponse) {
        *self.template.lock().unwrap() = template;
    }

    fn submissions(&self) -> Vec<RpcBlock> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_block_template(
        &self,
        _payout_address: &str,
        _extra_data: &str,
    ) -> Result<TemplateResponse, RpcError> {
        Ok(self.template.lock().unwrap().clone())
    }

    async fn submit_block(
        &self,
        block: RpcBlock,
        _pow_hash: &str,
    ) -> Result<SubmitOutcome, RpcError> {
        self.submissions.lock().unwrap().push(block);
        self.submit_outcome.lock().unwrap().clone()
    }

    async fn get_dag_info(&self) -> Result<DagInfo, RpcError> {
        Ok(DagInfo::default())
    }

    async fn get_block(
        &self,
        _hash: &str,
        _include_transactions: bool,
    ) -> Result<RpcBlock, RpcError> {
        Err(RpcError::Node("not found".into()))
    }

    fn block_added(&self) -> broadcast::Receiver<()> {
        self.block_added.subscribe()
    }
}

struct Harness {
    node: Arc<MockNode>,
    stats: Arc<StatsRegistry>,
    template_tx: watch::Sender<u64>,
    cancel: CancellationToken,
    reader: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    serve_handle: JoinHandle<()>,
    epoch: u64,
}

impl Harness {
    fn start(config: BridgeConfig, initial: TemplateResponse, extranonce: Option<Extranonce>) -> Self {
        let config = Arc::new(config);
        let node = MockNode::new(initial);
        let stats = Arc::new(StatsRegistry::new(config.min_share_diff));
        let validator = Arc::new(ShareValidator::new(node.clone(), config.solo_mining));
        let (template_tx, template_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let socket_addr: SocketAddr = "127.0.0.1:45678".parse().unwrap();

        let connection = Connection::new(
            config,
            node.clone(),
            validator,
            stats.clone(),
            socket_addr,
            server_read,
            server_write,
            extranonce,
            template_rx,
            cancel.clone(),
        );

        let serve_handle = tokio::spawn(async move {
            let _ = connection.serve().await;
        });

        Self {
            node,
            stats,
            template_tx,
            cancel,
            reader: BufReader::new(client_read).lines(),
            writer: client_write,
            serve_handle,
            epoch: 0,
        }
    }

    async fn send(&mut self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = timeout(Duration::from_secs(2), self.reader.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
            .expect("connection closed");
        serde_json::from_str(&line).expect("server sent invalid json")
    }

    async fn try_recv(&mut self, wait: Duration) -> Option<Value> {
        match timeout(wait, self.reader.next_line()).await {
            Ok(Ok(Some(line))) => Some(serde_json::from_str(&line).unwrap()),
            _ => None,
        }
    }

    /// Read frames until a notification with the given method arrives.
    async fn recv_notification(&mut self, method: &str) -> Value {
        for _ in 0..16 {
            let frame = self.recv().await;
            if frame["method"] == method {
                return frame;
            }
        }
        panic!("no {method} notification arrived");
    }

    fn signal_template(&mut self) {
        self.epoch += 1;
        self.template_tx.send_replace(self.epoch);
    }

    async fn subscribe(&mut self) {
        self.send(json!({"id": 1, "method": "mining.subscribe", "params": ["test-miner/1.0"]}))
            .await;

        let reply = self.recv().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"], json!([true, "EthereumStratum/1.0.0"]));
    }

    /// Authorize and collect the initial difficulty and job. Returns
    /// (job_id_hex, set_difficulty value).
    async fn authorize(&mut self) -> (String, f64) {
        self.send(json!({
            "id": 2,
            "method": "mining.authorize",
            "params": [format!("{WALLET}.worker1"), "x"],
        }))
        .await;

        let reply = self.recv().await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"], json!(true));

        let difficulty = self.recv_notification("mining.set_difficulty").await;
        let notify = self.recv_notification("mining.notify").await;

        (
            notify["params"][0].as_str().unwrap().to_string(),
            difficulty["params"][0].as_f64().unwrap(),
        )
    }

    async fn submit(&mut self, id: u64, job_id: &str, nonce: &str, pow_hash: &str) -> Value {
        self.send(json!({
            "id": id,
            "method": "mining.submit",
            "params": ["worker1", job_id, nonce, pow_hash],
        }))
        .await;

        loop {
            let frame = self.recv().await;
            if frame["id"] == id {
                return frame;
            }
        }
    }

    fn worker_stats(&self) -> Arc<htnbridge::stats::WorkStats> {
        self.stats.get_or_create(Some("worker1"), "127.0.0.1:45678")
    }
}

fn config() -> BridgeConfig {
    BridgeConfig {
        min_share_diff: 1.0,
        ..Default::default()
    }
}

/// A nonce whose PoW meets the stratum difficulty-1 target but not the
/// network target, plus its hash.
fn share_nonce(template: &TemplateResponse) -> (u64, Hash256) {
    let pow_state = PowState::new(&template.block.header);
    let stratum_target = htnbridge::stratum_target::StratumTarget::from_difficulty(1.0);

    for nonce in 0..100_000u64 {
        let (value, hash) = pow_state.pow_value(nonce);
        if stratum_target.met_by(&value) && !pow_state.meets_network_target(&value) {
            return (nonce, hash);
        }
    }
    panic!("no share nonce found");
}

/// A nonce whose PoW meets the network target.
fn block_nonce(template: &TemplateResponse) -> (u64, Hash256) {
    let pow_state = PowState::new(&template.block.header);

    for nonce in 0..100_000u64 {
        let (value, hash) = pow_state.pow_value(nonce);
        if pow_state.meets_network_target(&value) {
            return (nonce, hash);
        }
    }
    panic!("no block nonce found");
}

#[tokio::test]
async fn normal_share_is_accepted_and_counted() {
    let template = template(100, HARD_BITS, 1);
    let (nonce, hash) = share_nonce(&template);

    let mut harness = Harness::start(config(), template, None);
    harness.subscribe().await;
    let (job_id, difficulty) = harness.authorize().await;

    assert_eq!(job_id, "1");
    assert_eq!(difficulty, 1.0);

    let reply = harness
        .submit(3, &job_id, &format!("{nonce:016x}"), &hash.to_string())
        .await;
    assert_eq!(reply["result"], json!(true));
    assert!(reply["error"].is_null());

    let stats = harness.worker_stats();
    assert_eq!(stats.shares(), 1);
    assert_eq!(stats.blocks(), 0);
    assert!(harness.node.submissions().is_empty());
}

#[tokio::test]
async fn block_win_is_submitted_to_the_node() {
    let template = template(100, EASY_BITS, 1);
    let (nonce, hash) = block_nonce(&template);

    let mut harness = Harness::start(config(), template, None);
    harness.subscribe().await;
    let (job_id, _) = harness.authorize().await;

    let reply = harness
        .submit(3, &job_id, &format!("{nonce:016x}"), &hash.to_string())
        .await;
    assert_eq!(reply["result"], json!(true));

    let submissions = harness.node.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].header.nonce, nonce, "nonce planted in header");

    let stats = harness.worker_stats();
    assert_eq!(stats.blocks(), 1);
    assert_eq!(stats.shares(), 1, "a block counts as a share too");
}

#[tokio::test]
async fn share_for_an_aged_out_job_is_stale() {
    let first = template(100, HARD_BITS, 1);
    let (nonce, hash) = share_nonce(&first);

    let mut harness = Harness::start(config(), first, None);
    harness.subscribe().await;
    let (job_id, _) = harness.authorize().await;

    // The tip moves ten blue scores ahead; the old job ages out.
    harness.node.set_template(template(110, HARD_BITS, 2));
    harness.signal_template();
    harness.recv_notification("mining.notify").await;

    let reply = harness
        .submit(4, &job_id, &format!("{nonce:016x}"), &hash.to_string())
        .await;

    assert!(reply["result"].is_null());
    assert_eq!(reply["error"][0], 21);

    let stats = harness.worker_stats();
    assert_eq!(stats.stales(), 1);
    assert_eq!(stats.shares(), 0);
}

#[tokio::test]
async fn duplicate_share_is_rejected_with_code_22() {
    let template = template(100, HARD_BITS, 1);
    let (nonce, hash) = share_nonce(&template);

    let mut harness = Harness::start(config(), template, None);
    harness.subscribe().await;
    let (job_id, _) = harness.authorize().await;

    let nonce_hex = format!("{nonce:016x}");

    let first = harness.submit(3, &job_id, &nonce_hex, &hash.to_string()).await;
    assert_eq!(first["result"], json!(true));

    let second = harness.submit(4, &job_id, &nonce_hex, &hash.to_string()).await;
    assert_eq!(second["error"][0], 22);

    let stats = harness.worker_stats();
    assert_eq!(stats.shares(), 1);
    assert_eq!(stats.invalids(), 1);
}

#[tokio::test]
async fn wrong_pow_reports_both_hashes_with_code_26() {
    let template = template(100, HARD_BITS, 1);
    let (nonce, _) = share_nonce(&template);

    let mut harness = Harness::start(config(), template.clone(), None);
    harness.subscribe().await;
    let (job_id, _) = harness.authorize().await;

    let bogus = "aa".repeat(32);
    let reply = harness
        .submit(3, &job_id, &format!("{nonce:016x}"), &bogus)
        .await;

    assert_eq!(reply["error"][0], 26);
    let data = &reply["error"][2];
    assert_eq!(data["submitted"], bogus);

    let expected = PowState::new(&template.block.header).pow_value(nonce).1;
    assert_eq!(data["recalculated"], expected.to_string());

    let stats = harness.worker_stats();
    assert_eq!(stats.invalids(), 1);
}

#[tokio::test]
async fn extranonce_is_announced_and_padded_into_the_nonce() {
    let template = template(100, HARD_BITS, 1);

    // Saturated stratum target: any honest submission is a share, so the
    // test pins the padding rule rather than the draw of the hash.
    let config = BridgeConfig {
        min_share_diff: 1e-5,
        extranonce_size: 1,
        ..Default::default()
    };

    let extranonce = Extranonce::from_hex("ab").unwrap();
    let mut harness = Harness::start(config, template.clone(), Some(extranonce));
    harness.subscribe().await;

    harness
        .send(json!({
            "id": 2,
            "method": "mining.authorize",
            "params": [format!("{WALLET}.worker1")],
        }))
        .await;

    let reply = harness.recv().await;
    assert_eq!(reply["result"], json!(true));

    let set_extranonce = harness.recv_notification("mining.set_extranonce").await;
    assert_eq!(set_extranonce["params"][0], "ab");

    let notify = harness.recv_notification("mining.notify").await;
    let job_id = notify["params"][0].as_str().unwrap().to_string();

    // The server must reconstruct exactly ab00000000001234.
    let full_nonce = u64::from_str_radix("ab00000000001234", 16).unwrap();
    let (_, hash) = PowState::new(&template.block.header).pow_value(full_nonce);

    let reply = harness.submit(3, &job_id, "1234", &hash.to_string()).await;
    assert_eq!(reply["result"], json!(true));
}

#[tokio::test]
async fn job_ids_increase_across_templates() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;
    let (first_job, _) = harness.authorize().await;
    assert_eq!(first_job, "1");

    harness.node.set_template(template(101, HARD_BITS, 2));
    harness.signal_template();
    let notify = harness.recv_notification("mining.notify").await;
    assert_eq!(notify["params"][0], "2");
    assert_eq!(notify["params"][4], true, "new parent forces clean jobs");

    harness.node.set_template(template(102, HARD_BITS, 3));
    harness.signal_template();
    let notify = harness.recv_notification("mining.notify").await;
    assert_eq!(notify["params"][0], "3");
}

#[tokio::test]
async fn unchanged_template_is_debounced() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;
    harness.authorize().await;

    // Same template, fresh trigger: no duplicate notify.
    harness.signal_template();
    assert_eq!(
        harness.try_recv(Duration::from_millis(300)).await,
        None,
        "identical template must not be re-dispatched"
    );
}

#[tokio::test]
async fn submit_before_authorize_is_unauthorized() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;

    harness
        .send(json!({
            "id": 9,
            "method": "mining.submit",
            "params": ["w", "1", "00", "aa"],
        }))
        .await;

    let reply = harness.recv().await;
    assert_eq!(reply["error"][0], 24);
}

#[tokio::test]
async fn invalid_wallet_is_rejected_and_disconnected() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;

    harness
        .send(json!({
            "id": 2,
            "method": "mining.authorize",
            "params": ["UPPERCASE-junk"],
        }))
        .await;

    let reply = harness.recv().await;
    assert_eq!(reply["error"][0], 24);

    // The server closes after rejecting the wallet.
    assert_eq!(harness.try_recv(Duration::from_secs(2)).await, None);
}

#[tokio::test]
async fn two_malformed_frames_in_a_row_disconnect() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;

    harness.writer.write_all(b"not json\n").await.unwrap();
    let first = harness.recv().await;
    assert_eq!(first["error"][0], 25);

    harness.writer.write_all(b"still not json\n").await.unwrap();
    let second = harness.recv().await;
    assert_eq!(second["error"][0], 25);

    assert_eq!(
        harness.try_recv(Duration::from_secs(2)).await,
        None,
        "connection closed after second strike"
    );
}

#[tokio::test]
async fn one_malformed_frame_is_forgiven() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;

    harness.writer.write_all(b"not json\n").await.unwrap();
    let error = harness.recv().await;
    assert_eq!(error["error"][0], 25);

    // A valid frame resets the strike counter and still works.
    harness.authorize().await;
}

#[tokio::test]
async fn cancellation_closes_the_socket_promptly() {
    let mut harness = Harness::start(config(), template(100, HARD_BITS, 1), None);
    harness.subscribe().await;
    harness.authorize().await;

    harness.cancel.cancel();

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match harness.reader.next_line().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "socket still open 2s after cancellation");

    timeout(Duration::from_secs(2), harness.serve_handle)
        .await
        .expect("serve task did not finish")
        .unwrap();
}
