// ============================================================================
// COMMAND LINE INTERFACE
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use querytrace_engine::constants::*;
use querytrace_engine::error::{TraceError, TraceResult};
use querytrace_engine::logging::init_logging;
use querytrace_engine::replay::{load_events, replay};
use querytrace_engine::{normalize, EngineConfig, QueryTracer};

/// QueryTrace CLI
#[derive(Parser, Debug)]
#[command(
    name = "querytrace",
    version,
    about = "In-process query observability engine",
    long_about = "QueryTrace fingerprints query text and records per-query latency, \
                  errors and anomalies into fixed-size structures. The CLI inspects \
                  fingerprints and replays recorded executions through the engine."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "querytrace.toml", env = "QUERYTRACE_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "QUERYTRACE_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the normalized form and fingerprint of a query
    Fingerprint {
        /// Raw query text
        query: String,
    },

    /// Replay JSON-lines execution events and print the report
    Replay {
        /// Events file, one JSON object per line
        file: PathBuf,

        /// Worker threads (0 = one per CPU)
        #[arg(short, long, default_value_t = DEFAULT_REPLAY_WORKERS)]
        workers: usize,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show engine version and build info
    Version,
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

fn handle_fingerprint(query: &str) {
    let canonical = normalize(query);
    println!("normalized:  {}", canonical);
    println!("fingerprint: {}", querytrace_engine::fingerprint(query));
}

fn handle_replay(config: &EngineConfig, file: &Path, workers: usize) -> TraceResult<()> {
    let events = load_events(file)?;
    let tracer = QueryTracer::from_config(config);

    replay(&tracer, &events, workers)?;

    let report = tracer.report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_validate(config_path: &Path, verbose: bool) -> TraceResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    match EngineConfig::load(config_path) {
        Ok(config) => {
            println!("Configuration is valid");

            if verbose {
                println!();
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            println!();
            println!("Summary:");
            println!("  tracing enabled:     {}", config.tracing.enabled);
            println!("  slow query ms:       {}", config.tracing.slow_query_ms);
            println!("  audit enabled:       {}", config.tracing.audit_enabled);
            println!("  max queries:         {}", config.capacity.max_queries);
            println!("  slow query buffer:   {}", config.capacity.slow_query_buffer);
            println!("  error entries:       {}", config.capacity.error_entries);
            println!("  audit buffer:        {}", config.capacity.audit_buffer);
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed");
            println!("Error: {}", e);
            Err(TraceError::Config(e))
        }
    }
}

fn handle_generate_config(output: Option<&Path>) -> TraceResult<()> {
    let config_str = EngineConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("Default configuration written to: {}", path.display());
        }
        None => println!("{}", config_str),
    }
    Ok(())
}

fn handle_version() {
    println!("{} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!();
    println!("Build Information:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS: {}", std::env::consts::OS);
    println!();
    println!("Capacities:");
    println!("  Tracked queries: {}", DEFAULT_MAX_QUERIES);
    println!("  Slow query ring: {}", DEFAULT_SLOW_QUERY_BUFFER_SIZE);
    println!("  Error table:     {}", DEFAULT_ERROR_BUFFER_SIZE);
    println!("  Audit ring:      {}", DEFAULT_AUDIT_BUFFER_SIZE);
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need configuration or logging
    match &cli.command {
        Commands::Version => {
            handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Commands::Validate { verbose } => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        Commands::Fingerprint { query } => {
            handle_fingerprint(query);
            return Ok(());
        }
        Commands::Replay { .. } => {}
    }

    let config_missing = !cli.config.exists();
    let config = if config_missing {
        EngineConfig::default()
    } else {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    };

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    init_logging(&logging_config)?;

    if config_missing {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }
    info!("{} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);

    if let Commands::Replay { file, workers } = &cli.command {
        handle_replay(&config, file, *workers)
            .with_context(|| format!("Failed to replay {}", file.display()))?;
    }

    Ok(())
}
