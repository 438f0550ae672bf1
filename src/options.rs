use {super::*, clap::ArgAction};

#[derive(Clone, Default, Debug, Parser)]
#[command(version, about = "Stratum bridge between Hoosat miners and a Hoosat node")]
pub(crate) struct Options {
    #[arg(long, help = "Load configuration from <CONFIG> instead of ./config.yaml.")]
    pub config: Option<PathBuf>,

    #[arg(long = "stratum", help = "Listen for miners on <STRATUM_PORT>.")]
    pub stratum_port: Option<String>,

    #[arg(long = "hoosat-address", help = "Connect to the node RPC at <HOOSAT_ADDRESS>.")]
    pub hoosat_address: Option<String>,

    #[arg(
        long = "blockwait",
        help = "Wait <BLOCKWAIT> milliseconds before re-requesting a template."
    )]
    pub block_wait_time: Option<u64>,

    #[arg(long = "mindiff", help = "Give new miners <MINDIFF> share difficulty.")]
    pub min_share_diff: Option<f64>,

    #[arg(
        long = "vardiff",
        action = ArgAction::SetTrue,
        help = "Auto-adjust per-miner difficulty toward the target share rate."
    )]
    pub var_diff: Option<bool>,

    #[arg(
        long = "sharespermin",
        help = "Target <SHARESPERMIN> shares per minute per worker."
    )]
    pub shares_per_min: Option<u64>,

    #[arg(
        long = "vardiffstats",
        action = ArgAction::SetTrue,
        help = "Log the vardiff table on every sweep."
    )]
    pub var_diff_stats: Option<bool>,

    #[arg(
        long = "solo",
        action = ArgAction::SetTrue,
        help = "Use the network difficulty instead of per-miner stratum difficulty."
    )]
    pub solo_mining: Option<bool>,

    #[arg(long = "extranonce", help = "Assign <EXTRANONCE> bytes of extranonce (0-3).")]
    pub extranonce_size: Option<u8>,

    #[arg(
        long = "minewhennotsynced",
        action = ArgAction::SetTrue,
        help = "Dispatch templates even while the node reports unsynced."
    )]
    pub mine_when_not_synced: Option<bool>,

    #[arg(
        long = "stats",
        action = ArgAction::SetTrue,
        help = "Print the periodic worker stats table."
    )]
    pub print_stats: Option<bool>,

    #[arg(long = "prom", help = "Serve Prometheus metrics on <PROM>.")]
    pub prom_port: Option<String>,

    #[arg(
        long = "hcp",
        help = "Serve the health check and rewards endpoints on <HCP>."
    )]
    pub health_check_port: Option<String>,

    #[arg(
        long = "log",
        action = ArgAction::SetTrue,
        help = "Tee log output to bridge.log."
    )]
    pub log_to_file: Option<bool>,
}
