mod client;
mod config;
mod crawl;
mod entity;
mod extract;
mod hierarchy;
mod output;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::client::ApiClient;
use crate::config::{ApiConfig, Config, RetryPolicy, Targets, DEFAULT_BASE_URL};
use crate::crawl::StartMode;
use crate::hierarchy::SectionKey;

#[derive(Parser)]
#[command(
    name = "eligendo_crawler",
    about = "Per-section regional election results from the Eligendo API, exported to CSV"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl all sections, resuming from existing output (default)
    Run,
    /// Ignore existing output and crawl everything again
    Fresh,
    /// Resume an interrupted crawl
    Resume,
    /// Fetch a single section and print the extracted values
    Test {
        #[arg(long, default_value = "087")]
        province: String,
        #[arg(long, default_value = "0420")]
        municipality: String,
        #[arg(long, default_value = "0001")]
        section: String,
    },
}

#[derive(Args)]
struct Settings {
    #[arg(long, global = true, env = "ELIGENDO_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Election date, YYYYMMDD
    #[arg(long, global = true, env = "ELIGENDO_ELECTION_DATE", default_value = "20251123")]
    election_date: String,
    /// Election type code (07 = regional)
    #[arg(long, global = true, env = "ELIGENDO_ELECTION_TYPE", default_value = "07")]
    election_type: String,
    #[arg(long, global = true, env = "ELIGENDO_REGION", default_value = "05")]
    region: String,

    /// Candidate whose linked list is counted
    #[arg(long, global = true, env = "ELIGENDO_CANDIDATE", default_value = "STEFANI")]
    candidate: String,
    /// Substring of the list description
    #[arg(long, global = true, env = "ELIGENDO_LIST", default_value = "LEGA")]
    list: String,
    #[arg(long, global = true, env = "ELIGENDO_PREF_SURNAME", default_value = "ZAIA")]
    pref_surname: String,
    #[arg(long, global = true, env = "ELIGENDO_PREF_NAME", default_value = "LUCA")]
    pref_name: String,

    #[arg(long, global = true, env = "ELIGENDO_OUTPUT_DIR", default_value = "output_veneto_2025")]
    output_dir: PathBuf,

    #[arg(long, global = true, env = "ELIGENDO_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
    /// Linear backoff step between attempts
    #[arg(long, global = true, env = "ELIGENDO_RETRY_DELAY_MS", default_value_t = 2000)]
    retry_delay_ms: u64,
    /// Pause after each section
    #[arg(long, global = true, env = "ELIGENDO_THROTTLE_MS", default_value_t = 100)]
    throttle_ms: u64,
    /// Log throughput every N written rows
    #[arg(long, global = true, env = "ELIGENDO_REPORT_EVERY", default_value_t = 100)]
    report_every: usize,
    #[arg(long, global = true, env = "ELIGENDO_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
    #[arg(long, global = true, env = "ELIGENDO_LIST_TIMEOUT_SECS", default_value_t = 60)]
    list_timeout_secs: u64,
}

impl From<Settings> for Config {
    fn from(s: Settings) -> Self {
        Config {
            api: ApiConfig {
                base_url: s.base_url,
                election_date: s.election_date,
                election_type: s.election_type,
                region: s.region,
                request_timeout: Duration::from_secs(s.timeout_secs),
                list_timeout: Duration::from_secs(s.list_timeout_secs),
            },
            retry: RetryPolicy {
                max_attempts: s.max_attempts,
                base_delay: Duration::from_millis(s.retry_delay_ms),
            },
            targets: Targets {
                candidate_surname: s.candidate,
                list_substring: s.list,
                preference_surname: s.pref_surname,
                preference_given_name: s.pref_name,
            },
            output_dir: s.output_dir,
            throttle: Duration::from_millis(s.throttle_ms),
            report_every: s.report_every,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::from(cli.settings);
    let client = ApiClient::new(config.api.clone(), config.retry)?;

    let mode = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run | Commands::Resume => StartMode::Resume,
        Commands::Fresh => StartMode::Fresh,
        Commands::Test {
            province,
            municipality,
            section,
        } => {
            std::fs::create_dir_all(&config.output_dir).with_context(|| {
                format!("Failed to create {}", config.output_dir.display())
            })?;
            let key = SectionKey {
                province,
                municipality,
                section,
            };
            crawl::smoke_test(&client, &config.targets, &key).await;
            return Ok(());
        }
    };

    println!("{}", "=".repeat(60));
    println!(
        "Election {} type {} region {}",
        config.api.election_date, config.api.election_type, config.api.region
    );
    println!(
        "List: {} / {}  Preferences: {} {}",
        config.targets.candidate_surname,
        config.targets.list_substring,
        config.targets.preference_surname,
        config.targets.preference_given_name
    );
    println!("{}", "=".repeat(60));

    let stats = crawl::run(&client, &config, mode).await?;
    println!(
        "Done: {} written, {} skipped, {} with missing values.",
        stats.written,
        stats.skipped,
        stats.incomplete()
    );

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_veneto_2025() {
        let cli = Cli::try_parse_from(["eligendo_crawler"]).unwrap();
        assert!(cli.command.is_none());
        let config = Config::from(cli.settings);
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.throttle, Duration::from_millis(100));
        assert_eq!(config.targets.list_substring, "LEGA");
    }

    #[test]
    fn settings_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "eligendo_crawler",
            "fresh",
            "--candidate",
            "manildo",
            "--output-dir",
            "/tmp/out",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Fresh)));
        let config = Config::from(cli.settings);
        assert_eq!(config.targets.candidate_surname, "manildo");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_mode_defaults_to_venezia_section_one() {
        let cli = Cli::try_parse_from(["eligendo_crawler", "test"]).unwrap();
        match cli.command {
            Some(Commands::Test {
                province,
                municipality,
                section,
            }) => {
                assert_eq!(
                    (province.as_str(), municipality.as_str(), section.as_str()),
                    ("087", "0420", "0001")
                );
            }
            _ => panic!("expected test command"),
        }
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
