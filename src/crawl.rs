use std::fs;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::client::{ApiClient, Document};
use crate::config::{Config, Targets};
use crate::entity::EntityList;
use crate::extract;
use crate::hierarchy::{self, Hierarchy, Municipality, Province, Section, SectionKey};
use crate::output::{self, ProgressRecord, ResultRow, ResultSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Keep existing rows and fetch only what is missing.
    Resume,
    /// Discard any previous output.
    Fresh,
}

/// Totals for one run.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub written: usize,
    pub skipped: usize,
    /// Keys of written rows with at least one missing count, in crawl order.
    pub failures: Vec<SectionKey>,
}

impl CrawlStats {
    pub fn incomplete(&self) -> usize {
        self.failures.len()
    }
}

/// Full run: load progress, fetch and snapshot the hierarchy, crawl, write failures.
pub async fn run(client: &ApiClient, config: &Config, mode: StartMode) -> Result<CrawlStats> {
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;
    let results_path = config.results_path();

    let progress = match mode {
        StartMode::Resume if results_path.exists() => {
            info!("Resume mode: reading {}", results_path.display());
            ProgressRecord::load(&results_path)?
        }
        _ => ProgressRecord::default(),
    };

    info!("Fetching entity list: {}", client.entities_url());
    let raw = client.fetch_entities().await?;
    output::write_json(&config.entities_path(), &raw)?;
    let list: EntityList =
        serde_json::from_value(raw).context("Entity list has an unexpected shape")?;
    info!("Found {} entities", list.entities.len());

    let hierarchy = hierarchy::build(&list.entities);
    info!(
        "Provinces: {}, municipalities: {}, sections: {}",
        hierarchy.provinces.len(),
        hierarchy.municipality_count(),
        hierarchy.section_count()
    );
    output::write_hierarchy(&config.hierarchy_path(), &config.api, &hierarchy)?;

    let mut sink = if progress.is_empty() {
        ResultSink::create(&results_path)?
    } else {
        ResultSink::append(&results_path)?
    };

    let t0 = Instant::now();
    let stats = crawl(client, config, &hierarchy, &progress, &mut sink).await?;

    output::write_failures(&config.failures_path(), &stats.failures)?;

    info!(
        "Completed: {} written, {} skipped (already done), {} with missing values, in {:.1} min",
        stats.written,
        stats.skipped,
        stats.incomplete(),
        t0.elapsed().as_secs_f64() / 60.0
    );
    info!("Output: {}", results_path.display());
    if !stats.failures.is_empty() {
        info!(
            "Sections with missing values listed in {}",
            config.failures_path().display()
        );
    }
    Ok(stats)
}

#[derive(Default)]
struct MunicipalityTotals {
    sections: usize,
    list_votes: u64,
    preference_votes: u64,
    failures: usize,
}

/// Walk the hierarchy in order, fetching and persisting every section not in `progress`.
pub async fn crawl(
    client: &ApiClient,
    config: &Config,
    hierarchy: &Hierarchy,
    progress: &ProgressRecord,
    sink: &mut ResultSink,
) -> Result<CrawlStats> {
    let pending = hierarchy
        .provinces
        .iter()
        .flat_map(|p| &p.municipalities)
        .flat_map(|m| m.sections.iter().map(move |s| m.section_key(s)))
        .filter(|k| !progress.contains(k))
        .count();
    if !progress.is_empty() {
        info!("Already done: {}, to do: {}", progress.len(), pending);
    }

    let pb = ProgressBar::new(pending as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let started = Instant::now();
    let mut stats = CrawlStats::default();

    for province in &hierarchy.provinces {
        pb.suspend(|| info!("Province: {} (code {})", province.name, province.code));

        for municipality in &province.municipalities {
            let mut totals = MunicipalityTotals::default();

            for section in &municipality.sections {
                let key = municipality.section_key(section);
                if progress.contains(&key) {
                    stats.skipped += 1;
                    continue;
                }

                let (list_votes, preference_votes) =
                    fetch_counts(client, &config.targets, &key).await;
                let row = result_row(province, municipality, section, list_votes, preference_votes);
                sink.write(&row)?;

                totals.sections += 1;
                totals.list_votes += list_votes.unwrap_or(0);
                totals.preference_votes += preference_votes.unwrap_or(0);
                if !row.is_complete() {
                    totals.failures += 1;
                    stats.failures.push(key);
                }
                stats.written += 1;
                pb.inc(1);

                if config.report_every > 0 && stats.written % config.report_every == 0 {
                    let (rate, eta) = estimate(stats.written, pending, started.elapsed());
                    pb.suspend(|| {
                        info!(
                            "Progress: {}/{} ({:.1}/s, ~{:.0} min left)",
                            stats.written,
                            pending,
                            rate,
                            eta.map_or(0.0, |d| d.as_secs_f64() / 60.0)
                        )
                    });
                }

                tokio::time::sleep(config.throttle).await;
            }

            if totals.sections > 0 {
                pb.suspend(|| {
                    info!(
                        "  {} ({}/{} sections): list {} pref {} failures {}",
                        municipality.name,
                        totals.sections,
                        municipality.sections.len(),
                        totals.list_votes,
                        totals.preference_votes,
                        totals.failures
                    )
                });
            }
        }
    }

    pb.finish_and_clear();
    Ok(stats)
}

/// Fetch both documents for one section and extract the target counts.
pub async fn fetch_counts(
    client: &ApiClient,
    targets: &Targets,
    key: &SectionKey,
) -> (Option<u64>, Option<u64>) {
    let list_votes = client
        .fetch_section(Document::Tally, key)
        .await
        .and_then(|doc| extract::list_votes(&doc, targets));
    let preference_votes = client
        .fetch_section(Document::Preferences, key)
        .await
        .and_then(|doc| extract::preference_votes(&doc, targets));
    (list_votes, preference_votes)
}

fn result_row(
    province: &Province,
    municipality: &Municipality,
    section: &Section,
    list_votes: Option<u64>,
    preference_votes: Option<u64>,
) -> ResultRow {
    ResultRow {
        province: province.name.clone(),
        province_code: municipality.province_code.clone(),
        municipality: municipality.name.clone(),
        municipality_code: municipality.code.clone(),
        section: section.number().to_string(),
        section_code: section.code.clone(),
        list_votes,
        preference_votes,
    }
}

/// Rows per second so far, and the time left for the remaining rows at that rate.
fn estimate(done: usize, total: usize, elapsed: Duration) -> (f64, Option<Duration>) {
    let secs = elapsed.as_secs_f64();
    if done == 0 || secs <= 0.0 {
        return (0.0, None);
    }
    let rate = done as f64 / secs;
    let remaining = total.saturating_sub(done) as f64 / rate;
    (rate, Some(Duration::from_secs_f64(remaining)))
}

/// Fetch a single section and print what would be written for it.
pub async fn smoke_test(
    client: &ApiClient,
    targets: &Targets,
    key: &SectionKey,
) -> (Option<u64>, Option<u64>) {
    println!("Section {}", key);
    println!("{}", "-".repeat(40));
    println!("Tally URL:       {}", client.section_url(Document::Tally, key));
    println!("Preferences URL: {}", client.section_url(Document::Preferences, key));

    let (list_votes, preference_votes) = fetch_counts(client, targets, key).await;
    let show = |v: Option<u64>| v.map_or_else(|| "ERROR (no value)".to_string(), |n| n.to_string());
    println!(
        "List votes ({} / {}): {}",
        targets.candidate_surname,
        targets.list_substring,
        show(list_votes)
    );
    println!(
        "Preferences ({} {}): {}",
        targets.preference_surname,
        targets.preference_given_name,
        show(preference_votes)
    );
    (list_votes, preference_votes)
}
