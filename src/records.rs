/*!
 * Record store: the immutable, position-indexed view of the input table.
 *
 * Each row becomes a `Record` with a reproducible identity built from two
 * natural-key columns. Missing cells are read as the empty string so the
 * same logical row always yields the same identity across runs.
 */

use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::app_config::RecordConfig;
use crate::errors::RecordError;
use crate::prompts::render_outcome_text;

/// Reproducible identity of a record, derived from its natural-key fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    /// Build an identity from the two key field values
    pub fn from_parts(first: &str, second: &str) -> Self {
        Self(format!("{}-{}", first.trim(), second.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One classifiable row of the input
#[derive(Debug, Clone)]
pub struct Record {
    /// Zero-based row position in the input
    pub position: usize,
    /// Identity used by the ledger and checkpoints
    pub key: RecordKey,
    /// First text field (title)
    pub title: String,
    /// Second text field (details)
    pub details: String,
    /// All original cells, aligned with the store headers
    pub fields: Vec<String>,
    /// Already classified by a previous run
    completed: bool,
}

impl Record {
    /// Text sent to the classifier, or `None` if both text fields are blank
    pub fn outcome_text(&self) -> Option<String> {
        render_outcome_text(&self.title, &self.details)
    }

    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() || !self.details.trim().is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Needs a classification in this run
    pub fn is_pending(&self) -> bool {
        self.is_valid() && !self.completed
    }
}

/// The full input table, loaded once and never mutated after annotation
#[derive(Debug, Clone)]
pub struct RecordStore {
    headers: Vec<String>,
    records: Vec<Record>,
}

impl RecordStore {
    /// Load records from a CSV file
    pub fn load<P: AsRef<Path>>(path: P, config: &RecordConfig) -> Result<Self, RecordError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| RecordError::Unreadable(format!("{:?}: {}", path, e)))?;
        Self::from_reader(file, config)
    }

    /// Load records from any CSV source with a header row
    pub fn from_reader<R: Read>(reader: R, config: &RecordConfig) -> Result<Self, RecordError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| RecordError::Unreadable(e.to_string()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            let row = result?;
            rows.push(row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
        }

        Self::from_rows(headers, rows, config)
    }

    /// Build a store from already-split rows
    pub fn from_rows(
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        config: &RecordConfig,
    ) -> Result<Self, RecordError> {
        let column = |name: &str| headers.iter().position(|h| h == name);

        let text_indices: Vec<Option<usize>> =
            config.text_columns.iter().map(|c| column(c)).collect();
        if text_indices.iter().all(|i| i.is_none()) {
            return Err(RecordError::MissingColumns(config.text_columns.join(", ")));
        }

        let key_indices: Vec<Option<usize>> =
            config.key_columns.iter().map(|c| column(c)).collect();
        for (name, index) in config.key_columns.iter().zip(&key_indices) {
            if index.is_none() {
                warn!("Key column '{}' not found, identities will use an empty value", name);
            }
        }

        let clean_indices: HashSet<usize> =
            config.clean_columns.iter().filter_map(|c| column(c)).collect();

        let cell = |fields: &[String], index: Option<usize>| -> String {
            index
                .and_then(|i| fields.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut records = Vec::with_capacity(rows.len());
        for (position, mut fields) in rows.into_iter().enumerate() {
            fields.resize(headers.len(), String::new());
            for index in &clean_indices {
                let trimmed = fields[*index].trim().to_string();
                fields[*index] = trimmed;
            }

            let first_key = cell(&fields, key_indices.first().copied().flatten());
            let second_key = cell(&fields, key_indices.get(1).copied().flatten());
            let title = cell(&fields, text_indices.first().copied().flatten());
            let details = cell(&fields, text_indices.get(1).copied().flatten());

            records.push(Record {
                position,
                key: RecordKey::from_parts(&first_key, &second_key),
                title,
                details,
                fields,
                completed: false,
            });
        }

        let store = Self { headers, records };
        store.warn_on_duplicate_keys();
        Ok(store)
    }

    fn warn_on_duplicate_keys(&self) {
        let mut counts: HashMap<&RecordKey, usize> = HashMap::new();
        for record in &self.records {
            *counts.entry(&record.key).or_insert(0) += 1;
        }
        let duplicates = counts.values().filter(|c| **c > 1).count();
        if duplicates > 0 {
            warn!(
                "{} record identities occur more than once; duplicate rows share one result",
                duplicates
            );
        }
    }

    /// Mark records whose identity already has a classification
    ///
    /// Returns how many records were marked.
    pub fn annotate_completed(&mut self, completed: &HashSet<RecordKey>) -> usize {
        let mut marked = 0;
        for record in &mut self.records {
            if completed.contains(&record.key) {
                record.completed = true;
                marked += 1;
            }
        }
        debug!("Marked {} records as already classified", marked);
        marked
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with both text fields blank
    pub fn invalid_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_valid()).count()
    }

    /// Records skipped because a previous run classified them
    pub fn completed_count(&self) -> usize {
        self.records.iter().filter(|r| r.completed).count()
    }

    /// Records still needing classification
    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_pending()).count()
    }
}
