//! Character scanner behind the recovery tier.
//!
//! The upstream feed has shipped bodies cut off mid-array and bodies with
//! raw `"` characters inside free-text HTML. Both break a strict JSON parse
//! of the whole document. This scanner walks the text byte by byte, tracking
//! brace depth and string state, so the `results` array can be isolated and
//! split into independent object candidates.
//!
//! Every structural character is ASCII, so byte offsets found here are always
//! valid `char` boundaries for slicing.

use std::borrow::Cow;

/// Wrapper key that marks a release-plan payload
const RECORD_COUNT_MARKER: &str = "\"totalrecords\"";
/// Key holding the array of feature objects
const RESULTS_KEY: &str = "\"results\"";

/// Returns the index of the next non-whitespace byte at or after `from`.
fn skip_ws(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Decides whether a `"` seen inside a string really terminates it.
///
/// A legitimate closing quote is followed by a structural character (or by
/// the end of input). A quote followed by anything else is a stray
/// unescaped character inside free text and leaves the string open.
fn closes_string(bytes: &[u8], quote_idx: usize) -> bool {
    let next = skip_ws(bytes, quote_idx + 1);
    match bytes.get(next) {
        None => true,
        Some(b) => matches!(b, b':' | b',' | b'}' | b']'),
    }
}

/// String/escape state shared by the scanning passes.
#[derive(Default)]
struct StringState {
    in_string: bool,
    escaped: bool,
}

impl StringState {
    /// Feeds one byte; returns true when the byte is outside any string
    /// and should be treated as structure.
    fn advance(&mut self, bytes: &[u8], i: usize) -> bool {
        let b = bytes[i];
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' && closes_string(bytes, i) {
                self.in_string = false;
            }
            return false;
        }
        if b == b'"' {
            self.in_string = true;
            return false;
        }
        true
    }
}

/// Finds the body of the `results` array in a release-plan payload.
///
/// Requires the `"totalrecords"` marker somewhere in the text, then returns
/// everything between the `[` following a `"results":` key and its matching
/// `]`. A truncated body returns everything up to the end of input.
pub(crate) fn locate_results(text: &str) -> Option<&str> {
    if !text.contains(RECORD_COUNT_MARKER) {
        return None;
    }

    let bytes = text.as_bytes();
    let start = text.match_indices(RESULTS_KEY).find_map(|(idx, key)| {
        let colon = skip_ws(bytes, idx + key.len());
        if bytes.get(colon) != Some(&b':') {
            return None;
        }
        let open = skip_ws(bytes, colon + 1);
        (bytes.get(open) == Some(&b'[')).then_some(open + 1)
    })?;

    let mut state = StringState::default();
    let mut depth = 0usize;
    for i in start..bytes.len() {
        if !state.advance(bytes, i) {
            continue;
        }
        match bytes[i] {
            b'{' | b'[' => depth += 1,
            b'}' | b']' if depth > 0 => depth -= 1,
            b']' => return Some(&text[start..i]),
            _ => {}
        }
    }

    Some(&text[start..])
}

/// Splits an array body into candidate object strings.
///
/// Candidates are cut at depth-0 brace boundaries. A final object that never
/// closes (truncated input) is still returned so the caller can count it as
/// damaged.
pub(crate) fn split_objects(array: &str) -> Vec<&str> {
    let bytes = array.as_bytes();
    let mut candidates = Vec::new();
    let mut state = StringState::default();
    let mut depth = 0usize;
    let mut start = None;

    for i in 0..bytes.len() {
        if !state.advance(bytes, i) {
            continue;
        }
        match bytes[i] {
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        candidates.push(&array[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        candidates.push(array[s..].trim_end());
    }

    candidates
}

/// Cuts a damaged candidate at every `}` `,` `{` seam, ignoring string state.
///
/// A stray quote can leave [`split_objects`] inside a string across an
/// object boundary, merging two neighbours into one candidate. Re-cutting
/// at the textual seams separates them again so the intact one survives.
/// Returns the whole candidate as the only piece when there is no seam.
pub(crate) fn split_at_object_seams(candidate: &str) -> Vec<&str> {
    let bytes = candidate.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;

    for i in 0..bytes.len() {
        if bytes[i] != b'}' {
            continue;
        }
        let comma = skip_ws(bytes, i + 1);
        if bytes.get(comma) != Some(&b',') {
            continue;
        }
        let open = skip_ws(bytes, comma + 1);
        if bytes.get(open) == Some(&b'{') {
            pieces.push(&candidate[start..=i]);
            start = open;
        }
    }
    pieces.push(&candidate[start..]);

    pieces
}

/// Applies the cheap repairs that rescue most damaged candidates.
///
/// - An odd number of unescaped quotes gets a closing quote appended
/// - A comma directly before `}` or `]` (outside strings) is dropped
pub(crate) fn repair_candidate(candidate: &str) -> Cow<'_, str> {
    let bytes = candidate.as_bytes();

    let mut quotes = 0usize;
    let mut escaped = false;
    for &b in bytes {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            quotes += 1;
        }
    }

    let mut trailing_commas = Vec::new();
    let mut state = StringState::default();
    for i in 0..bytes.len() {
        if state.advance(bytes, i) && bytes[i] == b',' {
            let next = skip_ws(bytes, i + 1);
            if matches!(bytes.get(next), Some(b'}' | b']')) {
                trailing_commas.push(i);
            }
        }
    }

    if quotes % 2 == 0 && trailing_commas.is_empty() {
        return Cow::Borrowed(candidate);
    }

    let mut repaired = String::with_capacity(candidate.len() + 1);
    let mut last = 0;
    for idx in trailing_commas {
        repaired.push_str(&candidate[last..idx]);
        last = idx + 1;
    }
    repaired.push_str(&candidate[last..]);
    if quotes % 2 != 0 {
        repaired.push('"');
    }
    Cow::Owned(repaired)
}
