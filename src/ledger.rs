/*!
 * The ledger: identity-keyed classification results for a run.
 *
 * The ledger is the only shared mutable state between batch workers. It is
 * owned by the result merger, which serialises access to it; callers only
 * ever mutate it through `upsert`.
 */

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::records::RecordKey;

/// Classification result for one record
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    /// Confidence score per taxonomy category
    scores: BTreeMap<String, f64>,
    /// Highest-scoring category, empty when no category has a score
    top_category: String,
}

impl ResultEntry {
    /// Build an entry, selecting the top category from `categories`
    ///
    /// Only categories of the taxonomy are eligible; on equal scores the one
    /// listed first in `categories` wins.
    pub fn from_scores(scores: BTreeMap<String, f64>, categories: &[String]) -> Self {
        let mut best: Option<(&String, f64)> = None;
        for category in categories {
            if let Some(score) = scores.get(category).copied().filter(|s| !s.is_nan()) {
                match best {
                    Some((_, best_score)) if score <= best_score => {}
                    _ => best = Some((category, score)),
                }
            }
        }

        let top_category = best.map(|(c, _)| c.clone()).unwrap_or_default();
        Self {
            scores,
            top_category,
        }
    }

    /// Rebuild an entry whose top category was stored alongside its scores
    pub fn with_top_category(scores: BTreeMap<String, f64>, top_category: impl Into<String>) -> Self {
        Self {
            scores,
            top_category: top_category.into(),
        }
    }

    pub fn scores(&self) -> &BTreeMap<String, f64> {
        &self.scores
    }

    pub fn score(&self, category: &str) -> Option<f64> {
        self.scores.get(category).copied()
    }

    pub fn top_category(&self) -> &str {
        &self.top_category
    }

    /// Has a selected category
    pub fn is_classified(&self) -> bool {
        !self.top_category.is_empty()
    }
}

/// What an upsert did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New identity
    Inserted,
    /// Existing entry replaced by a different one
    Replaced,
    /// Identical entry already present
    Unchanged,
    /// Existing classified entry kept over an unclassified one
    KeptExisting,
}

/// Identity-keyed mapping of classification results
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: HashMap<RecordKey, ResultEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `key`
    ///
    /// Merging the same entry twice is a no-op, and a classified entry is
    /// never replaced by one without a selected category.
    pub fn upsert(&mut self, key: RecordKey, entry: ResultEntry) -> UpsertOutcome {
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(key, entry);
                UpsertOutcome::Inserted
            }
            Some(existing) if *existing == entry => UpsertOutcome::Unchanged,
            Some(existing) if existing.is_classified() && !entry.is_classified() => {
                UpsertOutcome::KeptExisting
            }
            Some(existing) => {
                *existing = entry;
                UpsertOutcome::Replaced
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<&ResultEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with a selected category
    pub fn classified_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_classified()).count()
    }

    /// Identities with a selected category
    pub fn classified_keys(&self) -> HashSet<RecordKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_classified())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &ResultEntry)> {
        self.entries.iter()
    }
}
