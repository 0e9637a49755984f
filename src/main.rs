use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tradeguard::alerts::AlertManager;
use tradeguard::config::Config;
use tradeguard::rules::Condition;

/// Command-line arguments for the tradeguard toolkit
#[derive(Parser)]
#[command(
    name = "tradeguard",
    about = "Rate limiting and alerting toolkit for trading platform backends",
    long_about = "Validates tradeguard configuration files and replays metric samples \
                  through the configured alert rules and notification receivers."
)]
struct Cli {
    /// Enable verbose logging
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a configuration file and print what it defines
    CheckConfig {
        /// Configuration file (TOML format)
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },

    /// Read `metric value [k=v,...]` lines from stdin and evaluate them
    ///
    /// Notifications go to the configured receivers; the alerts still
    /// firing at end of input are printed as JSON.
    Replay {
        /// Configuration file; defaults are used when omitted or missing
        #[arg(value_name = "FILE")]
        config: Option<PathBuf>,

        /// How long to wait for pending notifications before exiting
        #[arg(long, default_value = "5s", value_parser = humantime_serde::re::humantime::parse_duration)]
        drain_timeout: Duration,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        let path = match &self.command {
            Command::CheckConfig { config } => Some(config.as_path()),
            Command::Replay { config, .. } => config.as_deref(),
        };

        if let Some(path) = path {
            // Missing files are reported (check-config) or replaced by defaults (replay)
            if path.exists() && !path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    path.display()
                ));
            }
            if path.extension().is_some_and(|ext| ext != "toml") {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    path.display()
                );
            }
        }

        Ok(())
    }
}

/// One metric sample parsed from a replay line
#[derive(Debug, PartialEq)]
struct Sample {
    metric: String,
    value: f64,
    labels: HashMap<String, String>,
}

/// Parse `metric value [k=v,k=v]`
///
/// # Returns
///
/// `Ok(None)` for blank lines and `#` comments
fn parse_sample(line: &str) -> Result<Option<Sample>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let metric = parts.next().ok_or("missing metric name")?;
    let raw_value = parts.next().ok_or("missing value")?;
    let value = raw_value
        .parse::<f64>()
        .map_err(|_| format!("invalid value '{}'", raw_value))?;

    let mut labels = HashMap::new();
    if let Some(raw_labels) = parts.next() {
        for pair in raw_labels.split(',').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, val)) if !key.is_empty() => {
                    labels.insert(key.to_string(), val.to_string());
                }
                _ => return Err(format!("invalid label '{}', expected key=value", pair)),
            }
        }
    }
    if parts.next().is_some() {
        return Err("unexpected trailing fields".to_string());
    }

    Ok(Some(Sample {
        metric: metric.to_string(),
        value,
        labels,
    }))
}

/// Feed every sample in `input` to the manager
///
/// Malformed lines are logged and skipped.
///
/// # Returns
///
/// Number of samples evaluated
fn replay_samples(manager: &AlertManager, input: impl BufRead) -> Result<usize> {
    let mut evaluated = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.context("Failed to read metric samples")?;
        match parse_sample(&line) {
            Ok(Some(sample)) => {
                debug!("Sample {}={} {:?}", sample.metric, sample.value, sample.labels);
                manager.check_threshold(&sample.metric, sample.value, &sample.labels);
                evaluated += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping line {}: {}", index + 1, e),
        }
    }
    Ok(evaluated)
}

fn describe_condition(condition: &Condition) -> String {
    match condition {
        Condition::Threshold {
            metric,
            operator,
            threshold,
        } => format!("{} {} {}", metric, operator.symbol(), threshold),
        other => format!("{} on {}", other.kind(), other.metric()),
    }
}

fn check_config(path: &Path, out: &mut impl Write) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("Invalid configuration: {}", path.display()))?;
    // Builds every receiver and registers every rule
    config.build_manager()?;
    config.build_rate_limits()?;

    let alerting = &config.alerting;
    writeln!(
        out,
        "service {} ({}), alerting {}",
        alerting.service,
        alerting.environment,
        if alerting.enabled { "enabled" } else { "disabled" }
    )?;

    let limits = &config.rate_limits;
    for (name, limit) in [
        ("api", &limits.api),
        ("auth", &limits.auth),
        ("high_value", &limits.high_value),
    ] {
        writeln!(
            out,
            "rate limit {}: {} tokens, one per {}",
            name,
            limit.max_tokens,
            humantime_serde::re::humantime::format_duration(limit.refill_interval)
        )?;
    }

    let rules = config.effective_rules();
    writeln!(
        out,
        "{} rules{}",
        rules.len(),
        if config.rules.is_empty() { " (built-in)" } else { "" }
    )?;
    for rule in &rules {
        writeln!(
            out,
            "  {} [{}] {} cooldown {}{}",
            rule.name,
            rule.severity,
            describe_condition(&rule.condition),
            humantime_serde::re::humantime::format_duration(rule.cooldown),
            if rule.enabled { "" } else { " (disabled)" }
        )?;
    }

    writeln!(out, "{} receivers", config.receivers.len())?;
    for receiver in &config.receivers {
        writeln!(
            out,
            "  {} ({}) -> {}",
            receiver.name(),
            receiver.kind(),
            receiver.url()
        )?;
    }
    Ok(())
}

async fn replay(path: Option<&Path>, drain_timeout: Duration) -> Result<()> {
    let config = Config::load(path)?;
    let manager = config.build_manager()?;

    let stdin = std::io::stdin();
    let evaluated = replay_samples(&manager, stdin.lock())?;
    info!("Evaluated {} samples", evaluated);

    // Let spawned deliveries finish before the runtime shuts down
    let deadline = tokio::time::Instant::now() + drain_timeout;
    while manager.notifications_in_flight() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "{} notifications still in flight after {:?}, exiting",
                manager.notifications_in_flight(),
                drain_timeout
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let totals = manager.delivery_stats().totals();
    info!(
        "Notifications: {} delivered, {} failed, {} dropped",
        totals.delivered, totals.failed, totals.dropped
    );

    let mut active = manager.get_active_alerts();
    active.sort_by_key(|alert| alert.dedup_key());
    println!("{}", serde_json::to_string_pretty(&active)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(2);
    }

    let result = match &cli.command {
        Command::CheckConfig { config } => {
            let mut stdout = std::io::stdout();
            check_config(config, &mut stdout)
        }
        Command::Replay {
            config,
            drain_timeout,
        } => replay(config.as_deref(), *drain_timeout).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    fn check_config_cli(path: PathBuf) -> Cli {
        Cli {
            verbose: false,
            command: Command::CheckConfig { config: path },
        }
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_config_cli(dir.path().to_path_buf()).validate().is_err());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = Cli {
            verbose: false,
            command: Command::Replay {
                config: Some(PathBuf::from("/nonexistent/config.toml")),
                drain_timeout: Duration::from_secs(1),
            },
        };
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["tradeguard", "-v", "replay", "--drain-timeout", "250ms"]);
        assert!(cli.verbose);
        match cli.command {
            Command::Replay {
                config,
                drain_timeout,
            } => {
                assert!(config.is_none());
                assert_eq!(drain_timeout, Duration::from_millis(250));
            }
            _ => panic!("Expected replay"),
        }
    }

    #[test]
    fn test_parse_sample() {
        let sample = parse_sample("http_error_rate 6.5 region=eu,instance=api-1")
            .unwrap()
            .unwrap();
        assert_eq!(sample.metric, "http_error_rate");
        assert_eq!(sample.value, 6.5);
        assert_eq!(sample.labels["region"], "eu");
        assert_eq!(sample.labels["instance"], "api-1");

        let bare = parse_sample("  db_pool_utilization 97  ").unwrap().unwrap();
        assert!(bare.labels.is_empty());
    }

    #[test]
    fn test_parse_sample_skips_blank_and_comments() {
        assert_eq!(parse_sample("").unwrap(), None);
        assert_eq!(parse_sample("# warmup").unwrap(), None);
    }

    #[test]
    fn test_parse_sample_errors() {
        assert!(parse_sample("http_error_rate").is_err());
        assert!(parse_sample("http_error_rate high").is_err());
        assert!(parse_sample("http_error_rate 1 region").is_err());
        assert!(parse_sample("http_error_rate 1 a=b extra").is_err());
    }

    #[test]
    fn test_replay_samples_fires_alerts() {
        let manager = Config::default().build_manager().unwrap();
        let input = Cursor::new(
            "http_error_rate 6.0\nnot-a-sample\nhttp_error_rate 1.0\ndb_pool_utilization 96 pool=main\n",
        );

        let evaluated = replay_samples(&manager, input).unwrap();

        assert_eq!(evaluated, 3);
        let mut names: Vec<_> = manager
            .get_active_alerts()
            .into_iter()
            .map(|a| a.dedup_key())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["DatabasePoolExhausted:pool=main", "HighErrorRate:none"]
        );
    }

    #[test]
    fn test_check_config_output() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[alerting]
service = "trading-api"
environment = "staging"

[[receivers]]
type = "webhook"
name = "ops"
url = "https://ops.example.com/alerts"
"#,
        )
        .unwrap();

        let mut out = Vec::new();
        check_config(file.path(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("service trading-api (staging), alerting enabled"));
        assert!(out.contains("rules (built-in)"));
        assert!(out.contains("HighErrorRate [warning] http_error_rate > 5 cooldown 15m"));
        assert!(out.contains("ops (webhook) -> https://ops.example.com/alerts"));
    }

    #[test]
    fn test_check_config_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        assert!(check_config(&dir.path().join("absent.toml"), &mut out).is_err());
    }
}
