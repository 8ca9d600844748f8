use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use clap::Parser;
use mongotrace::config::Config;
use mongotrace::driver::{ConnEvent, ConnectionDriver};

fn main() -> anyhow::Result<()> {
    // Load .env first so clap's env fallbacks see variables.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Attempt to load config before initializing logs to pick up log_level from file.
    let cfg_file_res = Config::load_from_file(cli.config.as_deref());
    let cfg_file = match &cfg_file_res {
        Ok(c) => c.clone(),
        Err(_) => Config::default(),
    };

    // Determine log filter precedence: CLI (--log-level / MONGOTRACE_LOG_LEVEL)
    // > RUST_LOG (env) > config.toml log_level > default("info").
    let filter_spec = if let Some(ref lvl) = cli.log_level {
        lvl.clone()
    } else if let Ok(env_spec) = std::env::var("RUST_LOG") {
        env_spec
    } else if let Some(ref lvl) = cfg_file.log_level {
        lvl.clone()
    } else {
        "info".to_string()
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_spec))
        .compact()
        .init();

    if let Err(e) = cfg_file_res.as_ref() {
        tracing::warn!(error = %format!("{e:?}"), "invalid config; using defaults");
    }

    let cfg = cfg_file.with_overrides(
        cli.tracing_enabled,
        cli.log_level.clone(),
        cli.max_pending_requests,
    );
    if let Err(e) = cfg.validate() {
        tracing::error!(error = %format!("{e:?}"), "invalid configuration");
        return Err(e.into());
    }

    if !cfg.mongodb_tracing_enabled {
        tracing::info!("mongodb tracing disabled; exiting without reading input");
        return Ok(());
    }

    tracing::info!(
        max_pending_requests = cfg.max_pending_requests,
        clock_offset_ns = cfg.clock_offset_ns,
        "starting mongotrace"
    );

    run_pipeline(&cfg, cli.input.as_deref())
}

/// Read newline-delimited JSON `ConnEvent`s from `input_path` (or stdin if
/// `None`), drive one `ConnectionDriver` per `conn_id`, and write each
/// resulting `OutputRow` to stdout as a JSON line.
fn run_pipeline(cfg: &Config, input_path: Option<&str>) -> anyhow::Result<()> {
    let reader: Box<dyn BufRead> = match input_path {
        Some(path) => Box::new(io::BufReader::new(std::fs::File::open(path)?)),
        None => Box::new(io::BufReader::new(io::stdin())),
    };

    let mut drivers: HashMap<u64, ConnectionDriver> = HashMap::new();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ConnEvent = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event line");
                continue;
            }
        };

        let driver = drivers.entry(event.conn_id).or_insert_with(|| {
            ConnectionDriver::new(
                event.conn_id,
                0,
                cfg.max_pending_requests,
                cfg.clock_offset_ns,
            )
        });
        driver.ingest(&event);

        for row in driver.run_cycle() {
            let json = serde_json::to_string(&row)?;
            writeln!(out, "{json}")?;
        }
    }

    Ok(())
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "mongotrace",
    version,
    about = "MongoDB wire-protocol tracing pipeline"
)]
struct Cli {
    /// Path to config TOML file.
    #[arg(short = 'c', long = "config", env = "MONGOTRACE_CONFIG")]
    config: Option<String>,

    /// Path to a newline-delimited JSON ConnEvent file; reads stdin if omitted.
    #[arg(long = "input", env = "MONGOTRACE_INPUT")]
    input: Option<String>,

    /// Log level or filter spec (e.g., info or info,mongotrace=debug).
    #[arg(long = "log-level", env = "MONGOTRACE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Master switch for the tracing pipeline.
    #[arg(long = "tracing-enabled", env = "MONGOTRACE_TRACING_ENABLED")]
    tracing_enabled: Option<bool>,

    /// Bounded-memory cap on pending requests per connection-direction.
    #[arg(long = "max-pending-requests", env = "MONGOTRACE_MAX_PENDING_REQUESTS")]
    max_pending_requests: Option<usize>,
}
