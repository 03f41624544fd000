use anyhow::{bail, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use std::time::Instant;
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Render `date` with a strftime pattern, rejecting bad patterns up front
/// (chrono would otherwise fail inside `Display`).
pub fn format_date(date: NaiveDate, pattern: &str) -> Result<String> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        bail!("Invalid date format {:?}", pattern);
    }
    Ok(date.format(pattern).to_string())
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
    }

    #[test]
    fn test_format_date() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(format_date(d, "%m/%d/%Y").unwrap(), "03/07/2026");
        assert_eq!(format_date(d, "%Y-%m-%d").unwrap(), "2026-03-07");
        assert!(format_date(d, "%Q").is_err());
    }
}