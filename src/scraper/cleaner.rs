use crate::models::placeholder;
use serde_json::Value;

// ── Cell values ───────────────────────────────────────────────────────────────

/// Normalise a scraped indicator value.
/// "−12.5" → "-12.5" | "∅" → "" | "  1.2K " → "1.2K"
pub fn clean_value(s: &str) -> String {
    s.replace('\u{2212}', "-")
        .replace('\u{2205}', "")
        .replace('\u{202f}', " ")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

/// Cleaned values with empties and oversized fragments dropped.
pub fn clean_values<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|s| clean_value(s.as_ref()))
        .filter(|v| !v.is_empty() && v.chars().count() < 50)
        .collect()
}

/// Exactly `width` cells: extra values dropped, missing ones filled with N/A.
pub fn pad_values(mut values: Vec<String>, width: usize) -> Vec<String> {
    values.truncate(width);
    while values.len() < width {
        values.push(placeholder::NOT_AVAILABLE.to_string());
    }
    values
}

/// Sheet text for a JSON scalar. null → N/A, 2500.0 → "2500", 0.125 → "0.125"
pub fn format_json_value(v: &Value) -> String {
    match v {
        Value::Null => placeholder::NOT_AVAILABLE.to_string(),
        Value::String(s) => {
            let s = clean_value(s);
            if s.is_empty() { placeholder::NOT_AVAILABLE.to_string() } else { s }
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            Some(f) => format!("{}", f),
            None => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

// ── Sector text ───────────────────────────────────────────────────────────────

/// Text following `label` in `text`, separators stripped.
/// "Sector : IT - Software" → "IT - Software"
pub fn extract_after_label(text: &str, label: &str) -> Option<String> {
    let (_, rest) = text.rsplit_once(label)?;
    let value = rest.replace(':', "");
    let value = collapse_whitespace(&value);
    if value.is_empty() { None } else { Some(value) }
}

/// First `label` followed by a capitalised phrase of 2-50 letters, spaces and
/// `-&/`, e.g. "Sector: Banking & Finance" → "Banking & Finance".
pub fn scan_labelled_phrase(text: &str, label: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let needle = label.to_lowercase();
    let mut from = 0;

    while let Some(pos) = lower[from..].find(&needle) {
        let after = from + pos + needle.len();
        from = after;
        let Some(rest) = text.get(after..) else { break };

        let rest = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        let mut chars = rest.chars();
        let Some(first) = chars.next() else { continue };
        if !first.is_ascii_uppercase() {
            continue;
        }

        let phrase: String = std::iter::once(first)
            .chain(chars.take_while(|c| {
                c.is_ascii_alphabetic() || *c == ' ' || *c == '-' || *c == '&' || *c == '/'
            }))
            .take(51)
            .collect();
        let phrase = collapse_whitespace(&phrase);

        if phrase.chars().count() >= 3 {
            return Some(phrase);
        }
    }
    None
}

/// Keywords that mark an anchor as a sector link.
pub const SECTOR_KEYWORDS: &[&str] = &["sector", "industry", "it", "bank", "finance", "auto", "pharma"];

pub fn looks_like_sector(text: &str) -> bool {
    let lower = text.to_lowercase();
    text.chars().count() > 2 && SECTOR_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_value() {
        assert_eq!(clean_value("\u{2212}12.50"), "-12.50");
        assert_eq!(clean_value("\u{2205}"), "");
        assert_eq!(clean_value("  1.2K\u{a0}"), "1.2K");
    }

    #[test]
    fn test_clean_values_drops_noise() {
        let long = "x".repeat(60);
        let values = clean_values(["54.1", "", "\u{2205}", long.as_str(), "\u{2212}3"]);
        assert_eq!(values, vec!["54.1", "-3"]);
    }

    #[test]
    fn test_pad_values() {
        assert_eq!(pad_values(vec!["1".into()], 3), vec!["1", "N/A", "N/A"]);
        assert_eq!(pad_values(vec!["1".into(), "2".into(), "3".into()], 2), vec!["1", "2"]);
        assert!(pad_values(vec![], 0).is_empty());
    }

    #[test]
    fn test_format_json_value() {
        assert_eq!(format_json_value(&json!(null)), "N/A");
        assert_eq!(format_json_value(&json!(2500.0)), "2500");
        assert_eq!(format_json_value(&json!(61.25)), "61.25");
        assert_eq!(format_json_value(&json!(-3)), "-3");
        assert_eq!(format_json_value(&json!("  ")), "N/A");
        assert_eq!(format_json_value(&json!("Buy")), "Buy");
    }

    #[test]
    fn test_extract_after_label() {
        assert_eq!(
            extract_after_label("Sector : IT - Software", "Sector").as_deref(),
            Some("IT - Software")
        );
        assert_eq!(extract_after_label("Sector", "Sector"), None);
        assert_eq!(extract_after_label("Industry: Auto", "Sector"), None);
    }

    #[test]
    fn test_scan_labelled_phrase() {
        let page = "Overview Market Cap 12,000 Cr Sector: Banking & Finance 52W High";
        assert_eq!(
            scan_labelled_phrase(page, "Sector").as_deref(),
            Some("Banking & Finance")
        );
        // lowercase phrase after the first hit is skipped, later hit used
        let page = "sector wise returns ... Industry Pharmaceuticals";
        assert_eq!(scan_labelled_phrase(page, "Sector"), None);
        assert_eq!(
            scan_labelled_phrase(page, "industry").as_deref(),
            Some("Pharmaceuticals")
        );
    }

    #[test]
    fn test_looks_like_sector() {
        assert!(looks_like_sector("IT - Software"));
        assert!(looks_like_sector("Private Banks"));
        assert!(!looks_like_sector("Home"));
        assert!(!looks_like_sector("it"));
    }
}
