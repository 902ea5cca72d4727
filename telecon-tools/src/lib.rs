use clap::Parser;
use std::path::PathBuf;
use telecon::config::ConfigError;
use telecon::ConsoleConfig;

#[derive(Parser, Debug, Clone)]
pub struct ConsoleOpts {
    /// YAML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Instrument host (default: first configured host)
    #[arg(short = 'H', long = "host")]
    pub host: Option<String>,

    /// Instrument TCP port (default: first configured port)
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Connection attempt timeout in milliseconds
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl ConsoleOpts {
    /// Configuration file (or defaults), then `TELECON_*` environment
    /// variables, then command line options.
    pub fn load_config(&self) -> Result<ConsoleConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ConsoleConfig::load(path)?,
            None => ConsoleConfig::default(),
        };
        config.apply_env();
        if let Some(host) = &self.host {
            config.set_default_host(host);
        }
        if let Some(port) = self.port {
            config.set_default_port(port);
        }
        if let Some(ms) = self.timeout_ms {
            config.connect_timeout_ms = ms;
        }
        Ok(config)
    }
}

/// Sets up `env_logger` with an `info` default, overridable by `RUST_LOG`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
