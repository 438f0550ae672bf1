use super::*;

pub const MIN_BLOCK_WAIT_TIME: Duration = Duration::from_millis(200);
pub const DEFAULT_MIN_SHARE_DIFF: f64 = 4.0;
pub const DEFAULT_SHARES_PER_MIN: u64 = 15;
pub const MAX_EXTRANONCE_SIZE: u8 = 3;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub stratum_port: String,
    pub hoosat_address: String,
    /// Template re-poll period in milliseconds. Clamped to [`MIN_BLOCK_WAIT_TIME`].
    pub block_wait_time: u64,
    pub min_share_diff: f64,
    pub var_diff: bool,
    pub shares_per_min: u64,
    pub var_diff_stats: bool,
    pub solo_mining: bool,
    pub extranonce_size: u8,
    pub mine_when_not_synced: bool,
    pub print_stats: bool,
    pub prom_port: String,
    pub health_check_port: String,
    pub log_to_file: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stratum_port: ":5555".into(),
            hoosat_address: "localhost:42420".into(),
            block_wait_time: 200,
            min_share_diff: DEFAULT_MIN_SHARE_DIFF,
            var_diff: false,
            shares_per_min: DEFAULT_SHARES_PER_MIN,
            var_diff_stats: false,
            solo_mining: false,
            extranonce_size: 0,
            mine_when_not_synced: false,
            print_stats: false,
            prom_port: String::new(),
            health_check_port: String::new(),
            log_to_file: false,
        }
    }
}

impl BridgeConfig {
    pub(crate) fn load(options: &Options) -> Result<Self> {
        let path = options
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.yaml"));

        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .with_context(|| format!("failed parsing config file `{}`", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && options.config.is_none() => {
                Self::default()
            }
            Err(err) => {
                bail!("failed reading config file `{}`: {err}", path.display());
            }
        };

        config.apply(options);
        config.normalize();
        Ok(config)
    }

    /// Command-line flags override the file, absent flags keep it.
    fn apply(&mut self, options: &Options) {
        let options = options.clone();

        if let Some(value) = options.stratum_port {
            self.stratum_port = value;
        }
        if let Some(value) = options.hoosat_address {
            self.hoosat_address = value;
        }
        if let Some(value) = options.block_wait_time {
            self.block_wait_time = value;
        }
        if let Some(value) = options.min_share_diff {
            self.min_share_diff = value;
        }
        if let Some(value) = options.var_diff {
            self.var_diff = value;
        }
        if let Some(value) = options.shares_per_min {
            self.shares_per_min = value;
        }
        if let Some(value) = options.var_diff_stats {
            self.var_diff_stats = value;
        }
        if let Some(value) = options.solo_mining {
            self.solo_mining = value;
        }
        if let Some(value) = options.extranonce_size {
            self.extranonce_size = value;
        }
        if let Some(value) = options.mine_when_not_synced {
            self.mine_when_not_synced = value;
        }
        if let Some(value) = options.print_stats {
            self.print_stats = value;
        }
        if let Some(value) = options.prom_port {
            self.prom_port = value;
        }
        if let Some(value) = options.health_check_port {
            self.health_check_port = value;
        }
        if let Some(value) = options.log_to_file {
            self.log_to_file = value;
        }
    }

    fn normalize(&mut self) {
        if self.min_share_diff <= 0.0 || !self.min_share_diff.is_finite() {
            self.min_share_diff = DEFAULT_MIN_SHARE_DIFF;
        }

        if self.shares_per_min == 0 {
            self.shares_per_min = DEFAULT_SHARES_PER_MIN;
        }

        self.extranonce_size = self.extranonce_size.min(MAX_EXTRANONCE_SIZE);

        if self.block_wait_time < MIN_BLOCK_WAIT_TIME.as_millis() as u64 {
            self.block_wait_time = MIN_BLOCK_WAIT_TIME.as_millis() as u64;
        }
    }

    pub fn block_wait_time(&self) -> Duration {
        Duration::from_millis(self.block_wait_time)
    }

    /// `:5555` means all interfaces, anything with a host is used verbatim.
    pub fn stratum_listen_addr(&self) -> String {
        listen_addr(&self.stratum_port)
    }

    pub fn prom_listen_addr(&self) -> Option<String> {
        (!self.prom_port.is_empty()).then(|| listen_addr(&self.prom_port))
    }

    pub fn health_check_listen_addr(&self) -> Option<String> {
        (!self.health_check_port.is_empty()).then(|| listen_addr(&self.health_check_port))
    }

    pub(crate) fn summary(&self) -> Vec<String> {
        vec![
            format!("hoosat:              {}", self.hoosat_address),
            format!("stratum:             {}", self.stratum_port),
            format!("prom:                {}", self.prom_port),
            format!("stats:               {}", self.print_stats),
            format!("log:                 {}", self.log_to_file),
            format!("min diff:            {:.10}", self.min_share_diff),
            format!("var diff:            {}", self.var_diff),
            format!("shares per min:      {}", self.shares_per_min),
            format!("var diff stats:      {}", self.var_diff_stats),
            format!("solo mining:         {}", self.solo_mining),
            format!("block wait:          {:?}", self.block_wait_time()),
            format!("extranonce size:     {}", self.extranonce_size),
            format!("health check:        {}", self.health_check_port),
            format!("mine when not synced: {}", self.mine_when_not_synced),
        ]
    }
}

fn listen_addr(port: &str) -> String {
    if let Some(stripped) = port.strip_prefix(':') {
        format!("0.0.0.0:{stripped}")
    } else {
        port.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BridgeConfig::default();
        assert_eq!(config.stratum_port, ":5555");
        assert_eq!(config.min_share_diff, 4.0);
        assert_eq!(config.shares_per_min, 15);
        assert_eq!(config.block_wait_time(), Duration::from_millis(200));
        assert!(!config.var_diff);
        assert!(!config.solo_mining);
    }

    #[test]
    fn yaml_roundtrip() {
        let config: BridgeConfig = serde_yaml::from_str(
            r#"
stratum_port: ":6969"
hoosat_address: "node.example:42420"
block_wait_time: 500
min_share_diff: 8
var_diff: true
shares_per_min: 20
extranonce_size: 2
"#,
        )
        .unwrap();

        assert_eq!(config.stratum_port, ":6969");
        assert_eq!(config.hoosat_address, "node.example:42420");
        assert_eq!(config.block_wait_time, 500);
        assert_eq!(config.min_share_diff, 8.0);
        assert!(config.var_diff);
        assert_eq!(config.shares_per_min, 20);
        assert_eq!(config.extranonce_size, 2);
    }

    #[test]
    fn normalize_clamps() {
        let mut config = BridgeConfig {
            block_wait_time: 10,
            min_share_diff: 0.0,
            extranonce_size: 9,
            shares_per_min: 0,
            ..Default::default()
        };
        config.normalize();

        assert_eq!(config.block_wait_time(), MIN_BLOCK_WAIT_TIME);
        assert_eq!(config.min_share_diff, DEFAULT_MIN_SHARE_DIFF);
        assert_eq!(config.extranonce_size, MAX_EXTRANONCE_SIZE);
        assert_eq!(config.shares_per_min, DEFAULT_SHARES_PER_MIN);
    }

    #[test]
    fn flags_override_yaml() {
        let mut config = BridgeConfig::default();
        let options = Options {
            stratum_port: Some(":7777".into()),
            var_diff: Some(true),
            min_share_diff: Some(16.0),
            ..Default::default()
        };

        config.apply(&options);
        config.normalize();

        assert_eq!(config.stratum_port, ":7777");
        assert!(config.var_diff);
        assert_eq!(config.min_share_diff, 16.0);
    }

    #[test]
    fn listen_addr_expansion() {
        assert_eq!(listen_addr(":5555"), "0.0.0.0:5555");
        assert_eq!(listen_addr("127.0.0.1:5555"), "127.0.0.1:5555");
    }
}
