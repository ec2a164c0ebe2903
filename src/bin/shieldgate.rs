//! ShieldGate CLI binary.
//!
//! # Commands
//!
//! - `serve` - Run the demo API behind the security gateway
//! - `scan` - Run the threat detector over one input
//! - `config` - Print the effective configuration

use std::io::{self, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shieldgate::{
    config::{LogFormat, LoggingConfig},
    server::Server,
    Config, Severity, ThreatDetector, VERSION,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shieldgate")]
#[command(version = VERSION)]
#[command(about = "ShieldGate - request validation and access-control gateway", long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/shieldgate/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server behind the gateway
    Serve {
        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Scan content for threats
    Scan {
        /// Content to scan (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Maximum length in chars (default: validation.max_field_length)
        #[arg(short, long)]
        max_length: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            verbose,
        } => cmd_serve(config, host, port, verbose),

        Commands::Scan {
            input,
            file,
            max_length,
            json,
        } => cmd_scan(&config, input, file, max_length, json),

        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

/// Install the global subscriber over a non-blocking stdout writer.
///
/// The returned guard flushes pending lines on drop and must outlive the
/// server.
fn init_logging(logging: &LoggingConfig, verbose: bool) -> WorkerGuard {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (writer, guard) = tracing_appender::non_blocking(io::stdout());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }

    guard
}

fn cmd_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    verbose: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    let _guard = init_logging(&config.logging, verbose);

    let server = Server::new(config);
    if server.gateway().config().auth.enabled {
        println!("Master API key (shown once): {}", server.master_key());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.run())?;
    Ok(())
}

fn cmd_scan(
    config: &Config,
    input: Option<String>,
    file: Option<PathBuf>,
    max_length: Option<usize>,
    json_output: bool,
) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let max_length = max_length.unwrap_or(config.validation.max_field_length);

    let detector = ThreatDetector::from_config(&config.validation);
    let result = detector.inspect(&content, "input", max_length);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.is_clean() {
        println!("✓ Clean ({} chars)", result.original_length());
        return Ok(());
    }

    let marker = if result.severity() >= Severity::High {
        "✗"
    } else {
        "!"
    };
    println!("{marker} Severity: {}", result.severity());
    println!("  Patterns matched: {}", result.pattern_matches());
    println!("  Heuristics fired: {}", result.heuristic_detections());
    println!("  Threats:");
    for threat in result.threats() {
        println!("    - {threat} ({})", threat.severity());
    }

    match detector.validate_strict(&content, "input", max_length) {
        Ok(_) => println!("  Strict validation: pass"),
        Err(e) => println!("  Strict validation: fail ({})", e.category()),
    }

    Ok(())
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path)?);
    }
    match input {
        Some(s) if s != "-" => Ok(s),
        _ => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        },
    }
}
