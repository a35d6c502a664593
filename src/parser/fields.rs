//! Field-extraction helpers shared by the vendor parsers.
//!
//! Vendor configs are a mix of JSON documents whose values may be plain
//! strings or one-per-extruder arrays, XML-ish metadata blocks, and
//! `key = value` ini text. Every helper here degrades to `None` on missing
//! or malformed input; a field the helpers cannot read is a field the
//! profile simply does not have.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

fn re(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

/// `1d 2h 3m 4s` and any subset, as Prusa writes estimated print times.
static DURATION_RE: Lazy<Option<Regex>> =
    Lazy::new(|| re(r"(?:(\d+)d)?\s*(?:(\d+)h)?\s*(?:(\d+)m)?\s*(?:(\d+)s)?"));

/// First string value for `key`, accepting both `"key": "v"` and
/// `"key": ["v", ...]` encodings.
pub(super) fn json_string(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) => non_empty(s),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .find_map(non_empty),
        _ => None,
    }
}

/// All string values for `key`, flattening the array encoding.
pub(super) fn json_strings(doc: &Value, key: &str) -> Vec<String> {
    match doc.get(key) {
        Some(Value::String(s)) => non_empty(s).into_iter().collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(non_empty)
            .collect(),
        _ => Vec::new(),
    }
}

/// Numeric value for `key`: a JSON number, a numeric string, or the first
/// element of an array of either.
pub(super) fn json_f64(doc: &Value, key: &str) -> Option<f64> {
    value_f64(doc.get(key)?)
}

/// First present numeric value across several candidate keys.
pub(super) fn json_f64_any(doc: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| json_f64(doc, key))
}

/// Unsigned integer for `key`, same encodings as [`json_f64`].
pub(super) fn json_u64(doc: &Value, key: &str) -> Option<u64> {
    let value = doc.get(key)?;
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let float = value_f64(value)?;
    if float.is_finite() && float >= 0.0 {
        Some(float.round() as u64)
    } else {
        None
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_f64(s),
        Value::Array(items) => items.iter().find_map(value_f64),
        _ => None,
    }
}

/// Parse a numeric field the way slicer configs write them: surrounding
/// whitespace and a trailing `%` are tolerated, anything else is `None`.
pub(super) fn parse_f64(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('%').trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// First capture group of `re` against `text`, trimmed and non-empty.
pub(super) fn capture_string(re: &Option<Regex>, text: &str) -> Option<String> {
    let captures = re.as_ref()?.captures(text)?;
    non_empty(captures.get(1)?.as_str())
}

/// First capture group of `re` against `text`, parsed as a number.
pub(super) fn capture_f64(re: &Option<Regex>, text: &str) -> Option<f64> {
    parse_f64(&capture_string(re, text)?)
}

/// First capture group of `re` against `text`, parsed as an unsigned integer.
pub(super) fn capture_u64(re: &Option<Regex>, text: &str) -> Option<u64> {
    capture_string(re, text)?.parse::<u64>().ok()
}

/// Value of `key = value` in ini-style config text. Comment lines starting
/// with `;` or `#` are skipped; the key match is exact after trimming, so
/// keys with embedded spaces like `estimated printing time (normal mode)`
/// work.
pub(super) fn ini_value(text: &str, key: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let Some((lhs, rhs)) = line.split_once('=') else {
            continue;
        };
        if lhs.trim() == key {
            return non_empty(rhs);
        }
    }
    None
}

/// Semicolon-separated per-extruder list, e.g. `PLA;PETG`.
pub(super) fn split_list(text: &str) -> Vec<String> {
    text.split(';').filter_map(non_empty).collect()
}

/// Parse `1d 2h 3m 4s` style durations to seconds. At least one component
/// must be present.
pub(super) fn parse_duration_secs(text: &str) -> Option<u64> {
    let captures = DURATION_RE.as_ref()?.captures(text.trim())?;
    let component = |idx: usize| -> Option<u64> {
        captures
            .get(idx)
            .and_then(|m| m.as_str().parse::<u64>().ok())
    };

    let days = component(1);
    let hours = component(2);
    let minutes = component(3);
    let seconds = component(4);
    if days.is_none() && hours.is_none() && minutes.is_none() && seconds.is_none() {
        return None;
    }

    Some(
        days.unwrap_or(0) * 86_400
            + hours.unwrap_or(0) * 3_600
            + minutes.unwrap_or(0) * 60
            + seconds.unwrap_or(0),
    )
}

pub(super) fn non_empty<S: AsRef<str>>(s: S) -> Option<String> {
    let trimmed = s.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Count non-overlapping occurrences of `needle` in `haystack`.
pub(super) fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shared_patterns_compile() {
        assert!(DURATION_RE.is_some());
    }

    #[test]
    fn json_string_accepts_plain_and_array_encodings() {
        let doc = json!({
            "plain": "Bambu Lab X1 Carbon",
            "per_extruder": ["", "PLA"],
            "numeric": 7,
        });
        assert_eq!(
            json_string(&doc, "plain").as_deref(),
            Some("Bambu Lab X1 Carbon")
        );
        assert_eq!(json_string(&doc, "per_extruder").as_deref(), Some("PLA"));
        assert_eq!(json_string(&doc, "numeric"), None);
        assert_eq!(json_string(&doc, "absent"), None);
    }

    #[test]
    fn json_strings_flattens_arrays() {
        let doc = json!({ "filament_type": ["PLA", "PETG", ""] });
        assert_eq!(json_strings(&doc, "filament_type"), vec!["PLA", "PETG"]);
        assert_eq!(json_strings(&doc, "absent"), Vec::<String>::new());
    }

    #[test]
    fn json_numbers_accept_strings_and_arrays() {
        let doc = json!({
            "as_number": 0.2,
            "as_string": "0.4",
            "as_array": ["220"],
            "as_percent": "15%",
            "junk": "abc",
        });
        assert_eq!(json_f64(&doc, "as_number"), Some(0.2));
        assert_eq!(json_f64(&doc, "as_string"), Some(0.4));
        assert_eq!(json_f64(&doc, "as_array"), Some(220.0));
        assert_eq!(json_f64(&doc, "as_percent"), Some(15.0));
        assert_eq!(json_f64(&doc, "junk"), None);
        assert_eq!(
            json_f64_any(&doc, &["missing", "as_string"]),
            Some(0.4)
        );
    }

    #[test]
    fn json_u64_rounds_numeric_strings() {
        let doc = json!({ "prediction": 3600, "stringy": "120", "negative": -5 });
        assert_eq!(json_u64(&doc, "prediction"), Some(3600));
        assert_eq!(json_u64(&doc, "stringy"), Some(120));
        assert_eq!(json_u64(&doc, "negative"), None);
    }

    #[test]
    fn malformed_numbers_stay_none_not_zero() {
        assert_eq!(parse_f64("abc"), None);
        assert_eq!(parse_f64(""), None);
        assert_eq!(parse_f64(" 15% "), Some(15.0));
        assert_eq!(parse_f64("0.2"), Some(0.2));
    }

    #[test]
    fn ini_value_handles_spacey_keys_and_comments() {
        let text = "; generated by PrusaSlicer\n\
                    layer_height = 0.2\n\
                    estimated printing time (normal mode) = 2h 30m 10s\n\
                    # trailing comment\n\
                    empty_key =\n";
        assert_eq!(ini_value(text, "layer_height").as_deref(), Some("0.2"));
        assert_eq!(
            ini_value(text, "estimated printing time (normal mode)").as_deref(),
            Some("2h 30m 10s")
        );
        assert_eq!(ini_value(text, "empty_key"), None);
        assert_eq!(ini_value(text, "absent"), None);
    }

    #[test]
    fn duration_parsing_accepts_subsets() {
        assert_eq!(parse_duration_secs("2h 30m 10s"), Some(9010));
        assert_eq!(parse_duration_secs("1d 1s"), Some(86_401));
        assert_eq!(parse_duration_secs("45m"), Some(2_700));
        assert_eq!(parse_duration_secs("90s"), Some(90));
        assert_eq!(parse_duration_secs("soon"), None);
        assert_eq!(parse_duration_secs(""), None);
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list("PLA;PETG"), vec!["PLA", "PETG"]);
        assert_eq!(split_list("PLA;;"), vec!["PLA"]);
        assert_eq!(split_list(""), Vec::<String>::new());
    }

    #[test]
    fn count_occurrences_counts_tags() {
        let xml = "<plate><model_instance/><model_instance/></plate><plate/>";
        assert_eq!(count_occurrences(xml, "<plate"), 2);
        assert_eq!(count_occurrences(xml, "<model_instance"), 2);
        assert_eq!(count_occurrences(xml, ""), 0);
    }
}
