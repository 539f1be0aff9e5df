/*!
 * Checkpoint materialization and resume.
 *
 * A checkpoint is the input table with one score column per category and a
 * selected-category column, filled from the ledger. It is written to a
 * temporary file next to the target and renamed into place, so a reader
 * never sees a partially written checkpoint.
 */

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::app_config::{RecordConfig, TaxonomyConfig};
use crate::file_utils::FileManager;
use crate::ledger::{Ledger, ResultEntry};
use crate::records::{RecordKey, RecordStore};

/// Column layout of a materialized table
#[derive(Debug, Clone)]
struct Layout {
    headers: Vec<String>,
    /// (category, column index) in canonical order
    score_columns: Vec<(String, usize)>,
    selected_column: usize,
}

impl Layout {
    /// Reuse classification columns already present in the input, append the rest
    fn for_headers(input: &[String], taxonomy: &TaxonomyConfig) -> Self {
        let mut headers = input.to_vec();
        let mut column = |name: String| -> usize {
            match headers.iter().position(|h| *h == name) {
                Some(index) => index,
                None => {
                    headers.push(name);
                    headers.len() - 1
                }
            }
        };

        let score_columns = taxonomy
            .categories
            .iter()
            .map(|c| (c.clone(), column(taxonomy.score_column(c))))
            .collect();
        let selected_column = column(taxonomy.selected_column.clone());

        Self {
            headers,
            score_columns,
            selected_column,
        }
    }
}

/// Writes the ledger joined onto the record store
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    path: PathBuf,
    taxonomy: TaxonomyConfig,
}

impl CheckpointWriter {
    pub fn new(path: impl Into<PathBuf>, taxonomy: TaxonomyConfig) -> Self {
        Self {
            path: path.into(),
            taxonomy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Materialize to the checkpoint path
    pub fn write(&self, store: &RecordStore, ledger: &Ledger) -> Result<()> {
        self.write_to(&self.path, store, ledger)
    }

    /// Materialize to an arbitrary path, atomically replacing it
    pub fn write_to(&self, path: &Path, store: &RecordStore, ledger: &Ledger) -> Result<()> {
        let layout = Layout::for_headers(store.headers(), &self.taxonomy);

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        FileManager::ensure_dir(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(&layout.headers)?;

            for record in store.records() {
                let mut row = record.fields.clone();
                row.resize(layout.headers.len(), String::new());

                let entry = ledger.get(&record.key);
                for (category, index) in &layout.score_columns {
                    row[*index] = entry
                        .and_then(|e| e.score(category))
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                }
                row[layout.selected_column] = entry
                    .map(|e| e.top_category().to_string())
                    .unwrap_or_default();

                writer.write_record(&row)?;
            }
            writer.flush()?;
        }

        tmp.persist(path)
            .with_context(|| format!("Failed to move checkpoint into place at {:?}", path))?;
        debug!("Wrote {} rows to {:?}", store.len(), path);
        Ok(())
    }
}

/// Read classified rows of a previously written table back into a ledger
///
/// Rows with an empty selected category are not considered classified and
/// are left out.
pub fn load_checkpoint<P: AsRef<Path>>(
    path: P,
    records: &RecordConfig,
    taxonomy: &TaxonomyConfig,
) -> Result<Ledger> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open checkpoint {:?}", path))?;
    read_checkpoint(file, records, taxonomy)
        .with_context(|| format!("Failed to read checkpoint {:?}", path))
}

/// Read a checkpoint from any CSV source
pub fn read_checkpoint<R: Read>(
    reader: R,
    records: &RecordConfig,
    taxonomy: &TaxonomyConfig,
) -> Result<Ledger> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let mut ledger = Ledger::new();
    let Some(selected) = column(&taxonomy.selected_column) else {
        warn!(
            "Checkpoint has no '{}' column; nothing to resume",
            taxonomy.selected_column
        );
        return Ok(ledger);
    };

    let first_key = records.key_columns.first().and_then(|c| column(c));
    let second_key = records.key_columns.get(1).and_then(|c| column(c));
    let score_columns: Vec<(String, usize)> = taxonomy
        .categories
        .iter()
        .filter_map(|c| column(&taxonomy.score_column(c)).map(|i| (c.clone(), i)))
        .collect();

    for result in csv_reader.records() {
        let row = result?;
        let cell = |index: Option<usize>| index.and_then(|i| row.get(i)).map(str::trim).unwrap_or("");

        let top = cell(Some(selected));
        if top.is_empty() {
            continue;
        }

        let scores: BTreeMap<String, f64> = score_columns
            .iter()
            .filter_map(|(category, index)| {
                cell(Some(*index))
                    .parse::<f64>()
                    .ok()
                    .map(|score| (category.clone(), score))
            })
            .collect();

        let key = RecordKey::from_parts(cell(first_key), cell(second_key));
        ledger.upsert(key, ResultEntry::with_top_category(scores, top));
    }

    info!("Loaded {} classified records from checkpoint", ledger.len());
    Ok(ledger)
}
