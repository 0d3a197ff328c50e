/*!
 * Tripwire CLI - Command Line Interface
 *
 * `check` validates a configuration file and prints the effective breaker
 * settings. `probe` drives requests through a named breaker and prints the
 * resulting health report.
 */

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tripwire::{
    config::{LogLevel, TripwireConfig},
    error::{Result, TripwireError, EXIT_DEGRADED, EXIT_SUCCESS},
    logging, ResilientClient,
};

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(version, about = "Circuit breaker and retry layer for unreliable dependencies", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and show the effective breaker settings
    Check,

    /// Send requests through a breaker and report its health
    Probe {
        /// Breaker name the requests are charged to
        #[arg(short = 'd', long, default_value = "default")]
        dependency: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value = "5")]
        count: u32,

        /// Pause between requests in milliseconds
        #[arg(long = "interval-ms", default_value = "500")]
        interval_ms: u64,

        /// Target URL
        url: String,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => TripwireConfig::from_file(path)?,
        None => TripwireConfig::default(),
    };
    if cli.verbose {
        config.logging.verbose = true;
    }

    match cli.command {
        Commands::Check => {
            if cli.config.is_none() {
                return Err(TripwireError::Config(
                    "check requires --config <FILE>".to_string(),
                ));
            }
            check(&config)
        }
        Commands::Probe {
            dependency,
            count,
            interval_ms,
            url,
        } => {
            logging::init_logging(&config.logging)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(probe(
                &config,
                &dependency,
                count,
                Duration::from_millis(interval_ms),
                &url,
            ))
        }
    }
}

fn check(config: &TripwireConfig) -> Result<i32> {
    let level = if config.logging.verbose {
        LogLevel::Debug
    } else {
        config.logging.level
    };
    println!("Configuration OK");
    println!("  log level:  {:?}", level);
    println!(
        "  retry:      {} attempts, {} ms{}, max {} ms",
        config.retry.retries,
        config.retry.delay_ms,
        if config.retry.exponential { " exponential" } else { " fixed" },
        config.retry.max_delay_ms
    );

    let mut names = vec!["default".to_string()];
    names.extend(config.breakers.keys().cloned());
    for name in names {
        let settings = config.breaker_settings(&name);
        println!(
            "  breaker {:<12} failures {} / {} ms, successes {}, reset after {} ms",
            name,
            settings.failure_threshold,
            settings.failure_window_ms,
            settings.success_threshold,
            settings.reset_timeout_ms
        );
    }
    Ok(EXIT_SUCCESS)
}

async fn probe(
    config: &TripwireConfig,
    dependency: &str,
    count: u32,
    interval: Duration,
    url: &str,
) -> Result<i32> {
    let client = ResilientClient::from_config(config)?;

    for n in 1..=count {
        match client.get(dependency, url).await {
            Ok(response) => {
                tracing::info!(request = n, status = response.status, "probe succeeded")
            }
            Err(err) if err.is_circuit_open() => {
                tracing::warn!(request = n, "probe short-circuited, breaker open")
            }
            Err(err) => tracing::warn!(request = n, error = %err, "probe failed"),
        }
        if n < count {
            tokio::time::sleep(interval).await;
        }
    }

    let health = client.health();
    let report = serde_json::to_string_pretty(&health)
        .map_err(|e| TripwireError::Other(format!("Failed to render health report: {}", e)))?;
    println!("{}", report);

    Ok(if health.healthy {
        EXIT_SUCCESS
    } else {
        EXIT_DEGRADED
    })
}
