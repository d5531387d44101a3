//! Best-effort recovery of a JSON object from free-form agent text.
//!
//! The fallback takes the span from the first `{` to the last `}` without
//! balancing braces, so text holding several independent objects (or stray
//! braces inside strings) will not parse and comes back as `RawText`.

use eagleeye_types::ExtractionResult;
use serde_json::{Map, Value};

pub fn extract(text: &str) -> ExtractionResult {
    if let Some(map) = parse_object(text) {
        return ExtractionResult::Structured(map);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Some(map) = text.get(start..=end).and_then(parse_object) {
                return ExtractionResult::Structured(map);
            }
        }
    }
    ExtractionResult::RawText(text.to_string())
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
