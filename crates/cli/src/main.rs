use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "corvid", about = "Robot-facing gateway of a cloud robotics engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Port robots connect to (overrides config value).
    #[arg(long, global = true)]
    ext_port: Option<u16>,

    /// Port the master-facing RPC channel listens on (overrides config value).
    #[arg(long, global = true)]
    comm_port: Option<u16>,

    /// Custom config file path (overrides discovery).
    #[arg(long, global = true, env = "GATEWAY_CONFIG_FILE")]
    config_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Validate configuration without starting the server.
    CheckConfig,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true)).init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<corvid_config::GatewayConfig> {
    let mut config = match &cli.config_file {
        Some(path) => corvid_config::load_config(path)?,
        None => corvid_config::discover_and_load(),
    };
    if let Some(ext_port) = cli.ext_port {
        config.ext_port = ext_port;
    }
    if let Some(comm_port) = cli.comm_port {
        config.comm_port = comm_port;
    }
    corvid_config::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn cli_port_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "extPort = 9000\ncommPort = 9001\nmasterHost = \"master\"\nmasterPort = 10000").expect("write");

        let cli = Cli::parse_from([
            "corvid",
            "--config-file",
            file.path().to_str().expect("utf8 path"),
            "--ext-port",
            "9500",
        ]);
        let config = load_config(&cli).expect("valid config");
        assert_eq!(config.ext_port, 9500);
        assert_eq!(config.comm_port, 9001);
    }

    #[test]
    fn rejects_equal_ports() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "extPort = 9000\ncommPort = 9000\nmasterHost = \"master\"\nmasterPort = 10000").expect("write");

        let cli = Cli::parse_from(["corvid", "--config-file", file.path().to_str().expect("utf8 path")]);
        assert!(load_config(&cli).is_err());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "corvid gateway starting");

    match cli.command {
        None | Some(Commands::Gateway) => {
            let config = load_config(&cli)?;
            corvid_gateway::server::run(config).await
        },
        Some(Commands::CheckConfig) => {
            let config = load_config(&cli)?;
            println!("configuration is valid: {config:#?}");
            Ok(())
        },
    }
}
