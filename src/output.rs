use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::hierarchy::{Hierarchy, SectionKey};

pub const HEADER: [&str; 8] = [
    "province",
    "province_code",
    "municipality",
    "municipality_code",
    "section",
    "section_code",
    "list_votes",
    "preference_votes",
];

/// One output line per section. Missing counts are written as empty fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub province: String,
    pub province_code: String,
    pub municipality: String,
    pub municipality_code: String,
    pub section: String,
    pub section_code: String,
    pub list_votes: Option<u64>,
    pub preference_votes: Option<u64>,
}

impl ResultRow {
    pub fn key(&self) -> SectionKey {
        SectionKey {
            province: self.province_code.clone(),
            municipality: self.municipality_code.clone(),
            section: self.section_code.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.list_votes.is_some() && self.preference_votes.is_some()
    }
}

// ── Progress record ──

/// Sections already present in a previous output file.
#[derive(Debug, Default)]
pub struct ProgressRecord {
    done: HashSet<SectionKey>,
}

impl ProgressRecord {
    /// Read the keys of every complete row in `path`. A missing file is empty progress.
    ///
    /// A trailing line without a newline is an interrupted write and is ignored.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let complete = &bytes[..complete_len(&bytes)];
        if complete.is_empty() {
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(complete);
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let (Some(p), Some(m), Some(s)) = (
            column("province_code"),
            column("municipality_code"),
            column("section_code"),
        ) else {
            bail!("{} has no section key columns", path.display());
        };

        let mut done = HashSet::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to parse {}", path.display()))?;
            if record.len() != headers.len() {
                warn!("Skipping malformed row {} in {}", i + 2, path.display());
                continue;
            }
            let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
            done.insert(SectionKey {
                province: field(p),
                municipality: field(m),
                section: field(s),
            });
        }

        info!("Found {} sections already processed", done.len());
        Ok(Self { done })
    }

    pub fn contains(&self, key: &SectionKey) -> bool {
        self.done.contains(key)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

/// Length of `bytes` up to and including the last newline.
fn complete_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1)
}

// ── Result sink ──

/// Append-only CSV writer that makes every row durable before returning.
pub struct ResultSink {
    writer: csv::Writer<File>,
}

impl ResultSink {
    /// Truncate `path` and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut sink = Self::from_file(file);
        sink.writer.write_record(HEADER)?;
        sink.sync()?;
        Ok(sink)
    }

    /// Continue an existing output, dropping a partially written last row.
    pub fn append(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let keep = complete_len(&bytes);
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        if keep < bytes.len() {
            warn!(
                "Dropping {} bytes of unterminated row at end of {}",
                bytes.len() - keep,
                path.display()
            );
            file.set_len(keep as u64)?;
        }
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Self { writer }
    }

    pub fn write(&mut self, row: &ResultRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.sync()
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

// ── Side files ──

#[derive(Serialize)]
struct HierarchySnapshot<'a> {
    generated_at: DateTime<Utc>,
    election_date: &'a str,
    election_type: &'a str,
    region: &'a str,
    #[serde(flatten)]
    hierarchy: &'a Hierarchy,
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

pub fn write_hierarchy(path: &Path, api: &ApiConfig, hierarchy: &Hierarchy) -> Result<()> {
    let snapshot = HierarchySnapshot {
        generated_at: Utc::now(),
        election_date: &api.election_date,
        election_type: &api.election_type,
        region: &api.region,
        hierarchy,
    };
    write_json(path, &snapshot)
}

/// One `province/municipality/section` key per line.
pub fn write_failures(path: &Path, keys: &[SectionKey]) -> Result<()> {
    let mut text = String::new();
    for key in keys {
        text.push_str(&key.to_string());
        text.push('\n');
    }
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}
