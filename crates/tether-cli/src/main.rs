mod metrics;

use std::{fs, path::PathBuf, sync::Arc, sync::OnceLock};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use serde_json::Value;
use tether_core::{Config, HostConfig, Operation, PluginClient, PluginServer};
use tether_sdk::{validate, validate_document};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tether", author, version, about = "Remote plugin lifecycle toolkit")]
struct Cli {
    /// Sets the log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the bundled metrics plugin using the supplied configuration file.
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "demos/metrics.tether.toml")]
        config: PathBuf,
    },
    /// Interact with configuration files (validate, sample output).
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Validate a plugin's metadata document, fetched or read from disk.
    Inspect {
        #[arg(long, value_name = "URL", required_unless_present = "file", conflicts_with = "file")]
        url: Option<String>,
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Drive a running plugin the way the host does.
    Lifecycle {
        #[arg(long, value_name = "URL")]
        url: String,
        /// Configuration file whose [host] timeouts apply.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(value_enum)]
        action: Action,
    },
    /// Dump the resolved configuration as JSON.
    Diag {
        #[arg(short, long, value_name = "FILE", default_value = "demos/metrics.tether.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validates the provided configuration file and the identity it declares.
    Validate {
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },
    /// Prints the bundled metrics plugin configuration.
    Example,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Action {
    Metadata,
    Health,
    Load,
    Start,
    Stop,
    Unload,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    match cli.command {
        Commands::Serve { config } => handle_serve(config).await,
        Commands::Config { command } => handle_config(command),
        Commands::Inspect { url, file } => handle_inspect(url, file).await,
        Commands::Lifecycle {
            url,
            config,
            action,
        } => handle_lifecycle(url, config, action).await,
        Commands::Diag { config } => handle_diag(config),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().ok();
    Ok(())
}

async fn handle_serve(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    config.validate()?;
    let runtime = Arc::new(metrics::runtime(&config)?);
    for problem in runtime.validate() {
        tracing::warn!(problem = %problem, "plugin metadata problem");
    }

    let server = PluginServer::bind(Arc::clone(&runtime), config.server.parse_bind_addr()?).await?;
    let served = server.run().await;
    runtime.shutdown().await;
    served
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { config } => {
            let cfg = load_config(&config)?;
            cfg.validate()?;
            let problems = validate(&cfg.identity(), &[]);
            report_problems(&problems)?;
            println!("configuration OK: {}", config.display());
        }
        ConfigCommands::Example => {
            println!("{}", include_str!("../../../demos/metrics.tether.toml"));
        }
    }
    Ok(())
}

async fn handle_inspect(url: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let document = match (url, file) {
        (Some(url), _) => {
            PluginClient::new(&url, &HostConfig::default())?
                .metadata_document()
                .await?
        }
        (None, Some(path)) => {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("failed to read metadata {}", path.display()))?;
            serde_json::from_str::<Value>(&data)
                .with_context(|| format!("failed to parse metadata {}", path.display()))?
        }
        (None, None) => bail!("either --url or --file is required"),
    };

    let problems = validate_document(&document);
    report_problems(&problems)?;
    let services = document
        .get("services")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    println!(
        "metadata OK: {} v{} ({services} services)",
        document["name"].as_str().unwrap_or_default(),
        document["version"].as_str().unwrap_or_default(),
    );
    Ok(())
}

async fn handle_lifecycle(url: String, config: Option<PathBuf>, action: Action) -> Result<()> {
    let host = match config {
        Some(path) => load_config(&path)?.host,
        None => HostConfig::default(),
    };
    let client = PluginClient::new(&url, &host)?;
    let op = match action {
        Action::Metadata => return print_json(&client.metadata_document().await?),
        Action::Health => return print_json(&client.health().await?),
        Action::Load => Operation::Load,
        Action::Start => Operation::Start,
        Action::Stop => Operation::Stop,
        Action::Unload => Operation::Unload,
    };

    let reply = client.lifecycle(op).await?;
    print_json(&reply)?;
    if !reply.is_ok() {
        bail!("{op} rejected by plugin: {}", reply.message);
    }
    Ok(())
}

fn handle_diag(path: PathBuf) -> Result<()> {
    let cfg = load_config(&path)?;
    print_json(&cfg)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_problems(problems: &[String]) -> Result<()> {
    if problems.is_empty() {
        return Ok(());
    }
    for problem in problems {
        println!("- {problem}");
    }
    bail!("{} validation problem(s) found", problems.len())
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let expanded = interpolate_env(&raw)?;
    Config::from_toml(&expanded).with_context(|| format!("failed to parse {}", path.display()))
}

fn interpolate_env(input: &str) -> Result<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let regex = RE.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)(?::([^}]+))?\}").unwrap());
    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let key = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(key).unwrap_or_else(|_| default.to_string())
    });
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_falls_back_to_default() {
        let raw = r#"bind = "${TETHER_TEST_UNSET_BIND:127.0.0.1:9100}""#;
        assert_eq!(interpolate_env(raw).unwrap(), r#"bind = "127.0.0.1:9100""#);
    }

    #[test]
    fn interpolation_reads_environment() {
        std::env::set_var("TETHER_TEST_PLUGIN_NAME", "remote_metrics");
        let raw = r#"name = "${TETHER_TEST_PLUGIN_NAME:fallback}""#;
        assert_eq!(interpolate_env(raw).unwrap(), r#"name = "remote_metrics""#);
    }

    #[test]
    fn bundled_example_is_valid() {
        let raw = include_str!("../../../demos/metrics.tether.toml");
        let cfg = Config::from_toml(&interpolate_env(raw).unwrap()).unwrap();
        cfg.validate().unwrap();
        assert!(validate(&cfg.identity(), &[]).is_empty());
        assert!(metrics::runtime(&cfg).is_ok());
    }
}
