use serde_json::Value;

use super::record::{looks_like_feature, FeatureRecord, RawFeature};
use super::scanner::{locate_results, repair_candidate, split_at_object_seams, split_objects};

/// Which tier produced a page's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    /// The whole body parsed as one JSON document
    Strict,
    /// The body was malformed; objects were recovered one by one
    Recovery,
}

/// Outcome of parsing one response body.
///
/// `raw` and `records` are parallel: `records[i]` is the normalized form of
/// `raw[i]`. `skipped` counts array elements (strict tier) or candidate
/// objects (recovery tier) that were dropped.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub records: Vec<FeatureRecord>,
    pub raw: Vec<RawFeature>,
    pub more_records: bool,
    pub tier: ParseTier,
    pub skipped: usize,
    /// The `totalrecords` value the payload declared, when readable
    pub declared_total: Option<u64>,
}

impl ParsedPage {
    fn from_objects(
        raw: Vec<RawFeature>,
        tier: ParseTier,
        more_records: bool,
        skipped: usize,
        declared_total: Option<u64>,
    ) -> Self {
        let records = raw.iter().map(FeatureRecord::from_raw).collect();
        Self {
            records,
            raw,
            more_records,
            tier,
            skipped,
            declared_total,
        }
    }
}

/// Result of the strict tier's whole-document attempt
enum Strict {
    Document(Value),
    /// Body was a JSON string whose contents did not parse; recovery runs
    /// on the decoded inner text
    Inner(String),
    Failed,
}

/// Parses one response body into feature records.
///
/// Never fails: a body that yields nothing simply returns an empty page.
/// Whether an empty or short page is acceptable is the caller's decision
/// (see the plausibility floor in the fetcher).
pub fn parse_page(body: &str) -> ParsedPage {
    let body = body.trim_start_matches('\u{feff}').trim();

    match parse_strict(body) {
        Strict::Document(doc) => from_document(&doc),
        Strict::Inner(inner) => recover(&inner),
        Strict::Failed => recover(body),
    }
}

fn parse_strict(body: &str) -> Strict {
    match serde_json::from_str::<Value>(body) {
        // Double-encoded: the document is a string containing the payload
        Ok(Value::String(inner)) => match serde_json::from_str::<Value>(inner.trim()) {
            Ok(doc) => Strict::Document(doc),
            Err(_) => Strict::Inner(inner),
        },
        Ok(doc) => Strict::Document(doc),
        Err(e) => {
            tracing::debug!(
                line = e.line(),
                column = e.column(),
                error = %e,
                "Strict JSON parse failed, falling back to recovery scanner"
            );
            Strict::Failed
        }
    }
}

fn from_document(doc: &Value) -> ParsedPage {
    let declared_total = doc.get("totalrecords").and_then(read_count);
    let more_records = doc.get("morerecords").is_some_and(read_flag);

    let Some(results) = doc.get("results").and_then(Value::as_array) else {
        tracing::warn!("Feed document has no results array");
        return ParsedPage::from_objects(
            Vec::new(),
            ParseTier::Strict,
            false,
            0,
            declared_total,
        );
    };

    let mut skipped = 0;
    let raw: Vec<RawFeature> = results
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) if looks_like_feature(map) => Some(map.clone()),
            _ => {
                skipped += 1;
                None
            }
        })
        .collect();

    ParsedPage::from_objects(raw, ParseTier::Strict, more_records, skipped, declared_total)
}

fn recover(text: &str) -> ParsedPage {
    let Some(array) = locate_results(text) else {
        tracing::warn!("Recovery scanner found no results array");
        return ParsedPage::from_objects(Vec::new(), ParseTier::Recovery, false, 0, None);
    };

    let mut raw = Vec::new();
    let mut skipped = 0;
    for candidate in split_objects(array) {
        match parse_candidate(candidate) {
            Ok(Some(map)) => raw.push(map),
            Ok(None) => skipped += 1,
            Err(e) => {
                let pieces = split_at_object_seams(candidate);
                if pieces.len() == 1 {
                    tracing::trace!(error = %e, len = candidate.len(), "Dropping unparseable candidate");
                    skipped += 1;
                    continue;
                }
                // A stray quote merged neighbours; salvage each one on its own
                for piece in pieces {
                    match parse_candidate(piece) {
                        Ok(Some(map)) => raw.push(map),
                        Ok(None) => skipped += 1,
                        Err(e) => {
                            tracing::trace!(error = %e, len = piece.len(), "Dropping unparseable candidate");
                            skipped += 1;
                        }
                    }
                }
            }
        }
    }

    tracing::warn!(
        recovered = raw.len(),
        skipped = skipped,
        "Recovered records from malformed feed payload"
    );

    // No reliable continuation signal in a malformed payload
    ParsedPage::from_objects(raw, ParseTier::Recovery, false, skipped, None)
}

/// Repairs and parses one candidate. `Ok(None)` is valid JSON that is not
/// a feature object.
fn parse_candidate(candidate: &str) -> Result<Option<RawFeature>, serde_json::Error> {
    let repaired = repair_candidate(candidate);
    match serde_json::from_str::<Value>(&repaired)? {
        Value::Object(map) if looks_like_feature(&map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

fn read_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn read_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
