use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://eleapi.interno.gov.it/siel/PX";

/// Election coordinates and transport settings for the upstream API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub election_date: String,
    pub election_type: String,
    pub region: String,
    pub request_timeout: Duration,
    pub list_timeout: Duration,
}

/// Linear backoff: the wait before retry `n` is `n * base_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// What to extract from each section. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct Targets {
    /// Surname of the candidate whose linked lists are searched in the tally.
    pub candidate_surname: String,
    /// Substring of the list description, within that candidate's lists.
    pub list_substring: String,
    pub preference_surname: String,
    pub preference_given_name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryPolicy,
    pub targets: Targets,
    pub output_dir: PathBuf,
    /// Pause after each completed section.
    pub throttle: Duration,
    /// Log throughput every this many written rows.
    pub report_every: usize,
}

impl Config {
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("results.csv")
    }

    pub fn entities_path(&self) -> PathBuf {
        self.output_dir.join("entities.json")
    }

    pub fn hierarchy_path(&self) -> PathBuf {
        self.output_dir.join("hierarchy.json")
    }

    pub fn failures_path(&self) -> PathBuf {
        self.output_dir.join("failures.txt")
    }
}

#[cfg(test)]
pub fn test_config(base_url: &str, output_dir: &std::path::Path) -> Config {
    Config {
        api: ApiConfig {
            base_url: base_url.to_string(),
            election_date: "20251123".into(),
            election_type: "07".into(),
            region: "05".into(),
            request_timeout: Duration::from_secs(5),
            list_timeout: Duration::from_secs(5),
        },
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        },
        targets: Targets {
            candidate_surname: "STEFANI".into(),
            list_substring: "LEGA".into(),
            preference_surname: "ZAIA".into(),
            preference_given_name: "LUCA".into(),
        },
        output_dir: output_dir.to_path_buf(),
        throttle: Duration::ZERO,
        report_every: 2,
    }
}
