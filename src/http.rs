use {
    super::*,
    axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
    },
    regex::Regex,
};

const DEFAULT_REWARDS_LIMIT: usize = 400;
const MAX_REWARDS_LIMIT: usize = 2000;

/// Worker tag planted in the coinbase payload via the template extra data.
static WORKER_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:as|by)\s+worker\s+([A-Za-z0-9._-]{1,32})").unwrap()
});

pub(crate) fn health_router(node: Arc<dyn NodeClient>) -> Router {
    Router::new()
        .route("/readyz", get(|| async { StatusCode::OK }))
        .route("/miner/rewards", get(miner_rewards))
        .with_state(node)
}

pub(crate) fn metrics_router(stats: Arc<StatsRegistry>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(|State(stats): State<Arc<StatsRegistry>>| async move { stats.render_metrics() }),
        )
        .with_state(stats)
}

pub(crate) async fn serve(router: Router, addr: String, cancel: CancellationToken) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind http listener on {addr}: {err}");
            return;
        }
    };

    if let Err(err) = axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        error!("http server on {addr} failed: {err}");
    }
}

/// One mined-and-paid record: a mergeset blue we mined, attributed from a
/// chain block whose coinbase paid the queried address.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsRow {
    pub mined_blue_hash: String,
    pub worker: String,
    pub reward_atoms: u64,
    pub paid_by_block_hash: String,
    pub paid_blue_score: u64,
    #[serde(rename = "paidAt")]
    pub paid_at_ms: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RewardsQuery {
    address: String,
    limit: Option<usize>,
    #[serde(rename = "startHash")]
    start_hash: Option<String>,
    worker: Option<String>,
}

async fn miner_rewards(
    State(node): State<Arc<dyn NodeClient>>,
    Query(query): Query<RewardsQuery>,
) -> Response {
    // A panic in here must become a 500, never a dead bridge.
    let result = std::panic::AssertUnwindSafe(rewards(node, query))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(rows)) => Json(rows).into_response(),
        Ok(Err(err)) => {
            error!("rewards query failed: {err}");
            (StatusCode::BAD_GATEWAY, "failed to fetch chain blocks").into_response()
        }
        Err(_panic) => {
            error!("panic in /miner/rewards");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

async fn rewards(node: Arc<dyn NodeClient>, query: RewardsQuery) -> Result<Vec<RewardsRow>> {
    let address = query.address.trim();
    ensure!(!address.is_empty(), "missing required query parameter: address");

    let limit = query
        .limit
        .unwrap_or(DEFAULT_REWARDS_LIMIT)
        .clamp(1, MAX_REWARDS_LIMIT);

    let start_hash = query.start_hash.as_deref().unwrap_or("").trim();
    let worker_filter = query.worker.as_deref().unwrap_or("").trim();

    let blocks = fetch_chain_blocks(&node, start_hash, limit).await?;

    let mut rows = Vec::new();
    for block in &blocks {
        match process_paying_block(&node, block, address, worker_filter).await {
            Ok(mut block_rows) => rows.append(&mut block_rows),
            Err(err) => {
                // One bad block must not kill the whole response.
                warn!("skipping paying block: {err}");
            }
        }
    }

    Ok(rows)
}

/// Walk the selected-parent chain newest-first from the DAG tip, stopping at
/// `start_hash` (the caller's cursor) or after `limit` blocks.
async fn fetch_chain_blocks(
    node: &Arc<dyn NodeClient>,
    start_hash: &str,
    limit: usize,
) -> Result<Vec<RpcBlock>> {
    let dag = node.get_dag_info().await?;
    let Some(tip) = dag.tip_hashes.first() else {
        bail!("no tip hashes");
    };

    let mut current = tip.clone();
    let mut blocks = Vec::new();

    while blocks.len() < limit {
        let Ok(block) = node.get_block(&current, true).await else {
            break;
        };

        let Some(verbose) = block.verbose_data.clone() else {
            break;
        };

        if !start_hash.is_empty() && verbose.hash == start_hash {
            break;
        }

        let parent = verbose.selected_parent_hash.clone();
        blocks.push(block);

        if parent.len() != 64 {
            break;
        }
        current = parent;
    }

    Ok(blocks)
}

async fn process_paying_block(
    node: &Arc<dyn NodeClient>,
    block: &RpcBlock,
    address: &str,
    worker_filter: &str,
) -> Result<Vec<RewardsRow>> {
    let Some(verbose) = &block.verbose_data else {
        return Ok(Vec::new());
    };

    if !verbose.is_chain_block {
        return Ok(Vec::new());
    }

    let amount = coinbase_sum_to_address(block, address);
    if amount == 0 {
        return Ok(Vec::new());
    }

    let mined = find_mined_blues(node, &verbose.merge_set_blues_hashes).await;
    if mined.is_empty() {
        // No mergeset blue carries our worker tag; attribution would be a
        // guess, so skip silently.
        return Ok(Vec::new());
    }

    Ok(split_rewards(
        amount,
        &mined,
        worker_filter,
        &verbose.hash,
        verbose.blue_score,
        block.header.timestamp,
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinedBlue {
    pub hash: String,
    pub worker: String,
}

/// Fetch each mergeset blue and keep those with a worker tag in the
/// coinbase payload.
async fn find_mined_blues(node: &Arc<dyn NodeClient>, hashes: &[String]) -> Vec<MinedBlue> {
    let mut mined = Vec::new();

    for hash in hashes {
        if hash.len() != 64 {
            continue;
        }

        let Ok(block) = node.get_block(hash, true).await else {
            continue;
        };

        let Some(worker) = block.coinbase().and_then(|cb| extract_worker_tag(&cb.payload))
        else {
            continue;
        };

        mined.push(MinedBlue {
            hash: hash.clone(),
            worker,
        });
    }

    mined
}

/// Split a paying block's reward evenly across our mined blues. The
/// remainder goes to the first row that survives the worker filter, keeping
/// totals exact.
pub fn split_rewards(
    amount: u64,
    mined: &[MinedBlue],
    worker_filter: &str,
    paying_hash: &str,
    paid_blue_score: u64,
    paid_at_ms: u64,
) -> Vec<RewardsRow> {
    if mined.is_empty() {
        return Vec::new();
    }

    let portion = amount / mined.len() as u64;
    let remainder = amount % mined.len() as u64;

    let filter = sanitize_worker_id(worker_filter);
    let mut remainder_assigned = false;
    let mut rows = Vec::new();

    for blue in mined {
        if !filter.is_empty() && sanitize_worker_id(&blue.worker) != filter {
            continue;
        }

        let mut atoms = portion;
        if !remainder_assigned {
            atoms += remainder;
            remainder_assigned = true;
        }

        rows.push(RewardsRow {
            mined_blue_hash: blue.hash.clone(),
            worker: blue.worker.clone(),
            reward_atoms: atoms,
            paid_by_block_hash: paying_hash.to_string(),
            paid_blue_score,
            paid_at_ms,
        });
    }

    rows
}

/// Sum the coinbase outputs paying `address`, prefix-insensitively.
fn coinbase_sum_to_address(block: &RpcBlock, address: &str) -> u64 {
    let Some(coinbase) = block.coinbase() else {
        return 0;
    };

    let wanted = strip_address_prefix(address).to_lowercase();

    coinbase
        .outputs
        .iter()
        .filter(|output| {
            strip_address_prefix(&output.script_public_key_address).to_lowercase() == wanted
        })
        .map(|output| output.amount)
        .sum()
}

fn strip_address_prefix(address: &str) -> &str {
    address
        .strip_prefix("hoosat:")
        .or_else(|| address.strip_prefix("hoosattest:"))
        .unwrap_or(address)
}

/// Pull the worker name out of a coinbase payload, which may be hex-encoded
/// or raw bytes.
pub fn extract_worker_tag(payload: &str) -> Option<String> {
    if payload.is_empty() {
        return None;
    }

    let raw = if payload.len() % 2 == 0 && payload.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(payload).unwrap_or_else(|_| payload.as_bytes().to_vec())
    } else {
        payload.as_bytes().to_vec()
    };

    let text: String = String::from_utf8_lossy(&raw)
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c if (c as u32) < 32 => '.',
            c => c,
        })
        .collect();

    WORKER_TAG_REGEX
        .captures(&text)
        .map(|captures| captures[1].to_string())
}

/// Normalize worker names for comparison: keep `[A-Za-z0-9._-]`, spaces
/// become underscores, lowercase, 32 chars max.
fn sanitize_worker_id(worker: &str) -> String {
    worker
        .trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(32)
        .collect::<String>()
        .to_lowercase()
}
