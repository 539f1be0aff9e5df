/*!
 * Batch building: partitioning the record store and rendering manifests.
 *
 * A batch is a contiguous slice `[start, end)` of record positions. Only
 * records that still need a classification and have non-blank content
 * become requests; each request carries an identifier that encodes the
 * originating record position.
 */

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::app_config::{ProviderConfig, TaxonomyConfig};
use crate::prompts::PromptTemplate;
use crate::records::RecordStore;

/// Prefix of every request identifier
pub const REQUEST_ID_PREFIX: &str = "outcome-";

static REQUEST_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^outcome-(\d+)$").expect("valid request id pattern"));

/// Reversible identifier of a request, encoding the record position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(usize);

impl RequestId {
    pub fn for_position(position: usize) -> Self {
        Self(position)
    }

    pub fn position(&self) -> usize {
        self.0
    }

    pub fn encode(&self) -> String {
        format!("{}{}", REQUEST_ID_PREFIX, self.0)
    }

    /// Recover the identifier from its encoded form
    pub fn decode(raw: &str) -> Option<Self> {
        REQUEST_ID_PATTERN
            .captures(raw.trim())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .map(Self)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", REQUEST_ID_PREFIX, self.0)
    }
}

/// Split `total` positions into contiguous ranges of at most `batch_size`
pub fn partition(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

/// Settings rendered into every request line
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub model: String,
    pub url: String,
    pub temperature: f32,
}

impl From<&ProviderConfig> for RequestOptions {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            model: config.model.clone(),
            url: config.request_endpoint.clone(),
            temperature: config.temperature,
        }
    }
}

/// One request of a manifest
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub request_id: RequestId,
    pub user_prompt: String,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct WireBody<'a> {
    model: &'a str,
    response_format: ResponseFormat,
    temperature: f32,
    messages: [WireMessage<'a>; 2],
}

#[derive(Serialize)]
struct WireRequest<'a> {
    custom_id: String,
    method: &'static str,
    url: &'a str,
    body: WireBody<'a>,
}

/// Requests built from one batch range
#[derive(Debug, Clone)]
pub struct BatchManifest {
    /// Positions this manifest was built from
    pub range: Range<usize>,
    /// System prompt shared by all entries
    pub system_prompt: Arc<str>,
    pub entries: Vec<ManifestEntry>,
    /// Records dropped for blank content
    pub skipped_invalid: usize,
    /// Records dropped because a previous run classified them
    pub skipped_completed: usize,
}

impl BatchManifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No valid requests; must not be submitted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn wire_request<'a>(&'a self, entry: &'a ManifestEntry, options: &'a RequestOptions) -> WireRequest<'a> {
        WireRequest {
            custom_id: entry.request_id.encode(),
            method: "POST",
            url: &options.url,
            body: WireBody {
                model: &options.model,
                response_format: ResponseFormat {
                    format_type: "json_object",
                },
                temperature: options.temperature,
                messages: [
                    WireMessage {
                        role: "system",
                        content: &self.system_prompt,
                    },
                    WireMessage {
                        role: "user",
                        content: &entry.user_prompt,
                    },
                ],
            },
        }
    }

    /// Render the manifest as JSONL, one request per line
    pub fn to_jsonl(&self, options: &RequestOptions) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(&self.wire_request(entry, options))?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Pretty-printed first request, for debugging
    pub fn sample_request(&self, options: &RequestOptions) -> Option<String> {
        self.entries
            .first()
            .and_then(|entry| serde_json::to_string_pretty(&self.wire_request(entry, options)).ok())
    }
}

/// Builds manifests from ranges of the record store
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    store: Arc<RecordStore>,
    system_prompt: Arc<str>,
    user_template: PromptTemplate,
}

impl BatchBuilder {
    pub fn new(store: Arc<RecordStore>, taxonomy: &TaxonomyConfig) -> Self {
        Self {
            store,
            system_prompt: Arc::from(taxonomy.system_prompt.as_str()),
            user_template: PromptTemplate::new(&taxonomy.user_prompt),
        }
    }

    /// Ranges covering the whole store, in order
    pub fn partition(&self, batch_size: usize) -> Vec<Range<usize>> {
        partition(self.store.len(), batch_size)
    }

    /// Records in `range` that would become requests
    pub fn pending_in(&self, range: &Range<usize>) -> usize {
        self.records_in(range).filter(|r| r.is_pending()).count()
    }

    fn records_in(&self, range: &Range<usize>) -> impl Iterator<Item = &crate::records::Record> {
        let end = range.end.min(self.store.len());
        let start = range.start.min(end);
        self.store.records()[start..end].iter()
    }

    /// Build the manifest for `range`
    pub fn build(&self, range: Range<usize>) -> BatchManifest {
        let mut entries = Vec::new();
        let mut skipped_invalid = 0;
        let mut skipped_completed = 0;

        for record in self.records_in(&range) {
            if record.is_completed() {
                skipped_completed += 1;
                continue;
            }
            match record.outcome_text() {
                Some(text) => entries.push(ManifestEntry {
                    request_id: RequestId::for_position(record.position),
                    user_prompt: self.user_template.render(&text),
                }),
                None => {
                    debug!("Skipping row {}: Both title and details are empty.", record.position);
                    skipped_invalid += 1;
                }
            }
        }

        if skipped_invalid > 0 || skipped_completed > 0 {
            info!(
                "Rows {}-{}: {} requests, {} empty rows skipped, {} already classified",
                range.start,
                range.end,
                entries.len(),
                skipped_invalid,
                skipped_completed
            );
        }

        BatchManifest {
            range,
            system_prompt: self.system_prompt.clone(),
            entries,
            skipped_invalid,
            skipped_completed,
        }
    }
}
