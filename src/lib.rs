use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    async_trait::async_trait,
    clap::Parser,
    config::BridgeConfig,
    connection::Connection,
    dispatcher::Dispatcher,
    futures::{FutureExt, sink::SinkExt, stream::StreamExt},
    hash_rate::HashRate,
    mining_state::MiningState,
    node::{NodeClient, RpcError, RpcNodeClient, SubmitOutcome, TemplateResponse},
    options::Options,
    primitive_types::{U256, U512},
    serde::{
        Deserialize, Serialize,
        de::{self, Deserializer},
        ser::Serializer,
    },
    serde_json::{Value, json},
    share::ShareValidator,
    stats::{StatsRegistry, WorkStats},
    std::{
        collections::{HashMap, HashSet, VecDeque},
        fmt::{self, Display, Formatter},
        fs,
        net::SocketAddr,
        path::PathBuf,
        process,
        str::FromStr,
        sync::{
            Arc, LazyLock, Mutex,
            atomic::{AtomicU32, AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    },
    stratum::{
        Authorize, Extranonce, Id, JobId, Message, Notify, SetDifficulty, StratumError, Submit,
        Subscribe, SubscribeResult,
    },
    stratum_target::StratumTarget,
    template::{DagInfo, Hash256, RpcBlock, RpcHeader},
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::TcpListener,
        runtime::Runtime,
        sync::{broadcast, mpsc, oneshot, watch},
        task::{JoinHandle, JoinSet},
        time::{MissedTickBehavior, interval, sleep, timeout},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::EnvFilter,
};

pub mod config;
pub mod connection;
mod dispatcher;
pub mod hash_rate;
mod http;
pub mod mining_state;
pub mod node;
mod options;
pub mod pow;
mod server;
pub mod share;
mod signal;
pub mod stats;
pub mod stratum;
pub mod stratum_target;
pub mod template;
pub mod vardiff;
pub mod wallet;

pub const USER_AGENT: &str = concat!("htnbridge/", env!("CARGO_PKG_VERSION"));
pub const PROTOCOL_VERSION: &str = "EthereumStratum/1.0.0";

pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;
/// Outbound messages queued per connection before coalescing kicks in.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
/// Jobs retained per connection; oldest evicted first.
pub const JOB_CACHE_MAX: usize = 64;
/// Max distance between the tip blue score and a job's blue score before the
/// job is considered stale.
pub const WORK_WINDOW: u64 = 8;
/// Hoosat target block rate, used for the network hashrate estimate.
pub const BLOCKS_PER_SECOND: u64 = 5;
/// Full miner nonces are 64 bits, sixteen hex characters on the wire.
pub const NONCE_HEX_WIDTH: usize = 16;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
    let options = Options::parse();

    let config = match BridgeConfig::load(&options) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("error loading configuration: {err}");
            process::exit(1);
        }
    };

    let _guard = init_tracing(&config);

    info!("----------------------------------");
    info!("initializing bridge {USER_AGENT}");
    for line in config.summary() {
        info!("{line}");
    }
    info!("----------------------------------");

    Runtime::new()
        .expect("failed to create tokio runtime")
        .block_on(async {
            let cancel_token = signal::setup_signal_handler();

            match server::Server::new(config).run(cancel_token).await {
                Err(err) => {
                    error!("error: {err}");
                    process::exit(2);
                }
                Ok(_) => {
                    process::exit(0);
                }
            }
        });
}

fn init_tracing(config: &BridgeConfig) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    let mut guards = Vec::new();

    let (stderr_writer, guard) = non_blocking(std::io::stderr());
    guards.push(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_to_file {
        let appender = tracing_appender::rolling::never(".", "bridge.log");
        let (file_writer, guard) = non_blocking(appender);
        guards.push(guard);

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(move || {
                struct Tee<A, B>(A, B);

                impl<A: std::io::Write, B: std::io::Write> std::io::Write for Tee<A, B> {
                    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                        self.1.write_all(buf).ok();
                        self.0.write(buf)
                    }

                    fn flush(&mut self) -> std::io::Result<()> {
                        self.1.flush().ok();
                        self.0.flush()
                    }
                }

                Tee(stderr_writer.clone(), file_writer.clone())
            })
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(stderr_writer)
            .init();
    }

    guards
}
