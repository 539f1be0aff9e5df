/*!
 * Result parsing and merging.
 *
 * Output lines are decoded tolerantly: the classification payload may be a
 * JSON string inside the chat message, an already-decoded object, or the
 * response body itself. Lines that cannot be attributed to a record of the
 * job, or that carry no taxonomy score, are counted as malformed and skipped.
 *
 * The ledger and the checkpoint writer sit behind one lock, so a checkpoint
 * always reflects a state the ledger actually passed through.
 */

use anyhow::Result;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::checkpoint::CheckpointWriter;
use crate::ledger::{Ledger, ResultEntry, UpsertOutcome};
use crate::records::RecordStore;

use super::builder::RequestId;

/// Decoded results of one output file
#[derive(Debug, Default, Clone)]
pub struct ParsedOutput {
    /// (record position, entry) pairs in output order
    pub results: Vec<(usize, ResultEntry)>,
    pub malformed: usize,
}

/// Decode the JSONL output of a job that covered `range`
pub fn parse_output(text: &str, range: &Range<usize>, categories: &[String]) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line, categories) {
            Ok((position, entry)) if range.contains(&position) => parsed.results.push((position, entry)),
            Ok((position, _)) => {
                warn!(
                    "Result line {}: position {} is outside rows {}-{}, skipping",
                    line_no + 1,
                    position,
                    range.start,
                    range.end
                );
                parsed.malformed += 1;
            }
            Err(reason) => {
                warn!("Skipping malformed result line {}: {}", line_no + 1, reason);
                parsed.malformed += 1;
            }
        }
    }

    parsed
}

fn parse_line(line: &str, categories: &[String]) -> Result<(usize, ResultEntry), String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;

    let custom_id = value
        .get("custom_id")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing custom_id".to_string())?;
    let id = RequestId::decode(custom_id)
        .ok_or_else(|| format!("unrecognised request id '{}'", custom_id))?;

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        return Err(format!("{} returned an error: {}", custom_id, err));
    }

    let response = value
        .get("response")
        .ok_or_else(|| format!("{} has no response", custom_id))?;
    if let Some(code) = response.get("status_code").and_then(Value::as_u64) {
        if code != 200 {
            return Err(format!("{} returned status {}", custom_id, code));
        }
    }
    let body = response
        .get("body")
        .ok_or_else(|| format!("{} has no response body", custom_id))?;

    let payload = extract_payload(body)
        .ok_or_else(|| format!("{} has no decodable classification", custom_id))?;
    let scores = extract_scores(&payload, categories);
    if scores.is_empty() {
        return Err(format!("{} has no scores for known categories", custom_id));
    }

    Ok((id.position(), ResultEntry::from_scores(scores, categories)))
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Locate the classification object inside a response body
fn extract_payload(body: &Value) -> Option<Value> {
    let content = body
        .pointer("/choices/0/message/content")
        .or_else(|| body.get("content"));

    match content {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(strip_code_fence(raw))
            .ok()
            .filter(Value::is_object),
        Some(object @ Value::Object(_)) => Some(object.clone()),
        _ if body.is_object() => Some(body.clone()),
        _ => None,
    }
}

fn score_value(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    score.filter(|s| s.is_finite())
}

/// Scores for taxonomy categories; keys are matched after trimming
fn extract_scores(payload: &Value, categories: &[String]) -> BTreeMap<String, f64> {
    let Some(object) = payload.as_object() else {
        return BTreeMap::new();
    };

    object
        .iter()
        .filter_map(|(key, value)| {
            let key = key.trim();
            categories
                .iter()
                .find(|c| c.as_str() == key)
                .and_then(|c| score_value(value).map(|s| (c.clone(), s)))
        })
        .collect()
}

/// Run blocking file I/O without stalling other tasks on a worker thread
///
/// `block_in_place` is only available on the multi-threaded runtime; on a
/// current-thread runtime the call runs inline.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Counts from merging one job's results
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub kept_existing: usize,
    /// Results whose position has no record in the store
    pub unknown_positions: usize,
}

impl MergeReport {
    /// Results accepted into the ledger, including no-op re-merges
    pub fn merged(&self) -> usize {
        self.inserted + self.replaced + self.unchanged + self.kept_existing
    }
}

/// Serialises ledger updates and checkpoint writes
#[derive(Debug)]
pub struct ResultMerger {
    store: Arc<RecordStore>,
    ledger: Mutex<Ledger>,
    checkpoint: CheckpointWriter,
}

impl ResultMerger {
    /// Create a merger seeded with `ledger` (empty or resumed)
    pub fn new(store: Arc<RecordStore>, ledger: Ledger, checkpoint: CheckpointWriter) -> Self {
        Self {
            store,
            ledger: Mutex::new(ledger),
            checkpoint,
        }
    }

    /// Upsert `results` and rewrite the checkpoint
    ///
    /// A checkpoint write failure is logged; the merged results stay in the
    /// ledger and are written with the next merge or the final output.
    pub fn merge(&self, label: &str, results: &[(usize, ResultEntry)]) -> MergeReport {
        let mut report = MergeReport::default();
        let mut ledger = self.ledger.lock();

        for (position, entry) in results {
            let Some(record) = self.store.get(*position) else {
                report.unknown_positions += 1;
                continue;
            };
            match ledger.upsert(record.key.clone(), entry.clone()) {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Replaced => report.replaced += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
                UpsertOutcome::KeptExisting => report.kept_existing += 1,
            }
        }
        debug!("{} merge: {:?}", label, report);

        match off_runtime(|| self.checkpoint.write(&self.store, &ledger)) {
            Ok(()) => info!("{}: checkpoint saved to {:?}", label, self.checkpoint.path()),
            Err(e) => error!("{}: failed to write checkpoint: {:#}", label, e),
        }

        let classified = Self::classified_records(&self.store, &ledger);
        let total = self.store.len();
        let pct = if total == 0 {
            0.0
        } else {
            classified as f64 / total as f64 * 100.0
        };
        info!("Progress: {}/{} outcomes classified ({:.1}%)", classified, total, pct);

        report
    }

    fn classified_records(store: &RecordStore, ledger: &Ledger) -> usize {
        store
            .records()
            .iter()
            .filter(|r| ledger.get(&r.key).is_some_and(|e| e.is_classified()))
            .count()
    }

    /// Records of the store that have a selected category
    pub fn classified_count(&self) -> usize {
        Self::classified_records(&self.store, &self.ledger.lock())
    }

    /// Copy of the current ledger
    pub fn snapshot(&self) -> Ledger {
        self.ledger.lock().clone()
    }

    /// Materialize the ledger to `path`
    pub fn write_output(&self, path: &Path) -> Result<()> {
        let ledger = self.ledger.lock();
        off_runtime(|| self.checkpoint.write_to(path, &self.store, &ledger))
    }

    pub fn checkpoint_path(&self) -> &Path {
        self.checkpoint.path()
    }
}
