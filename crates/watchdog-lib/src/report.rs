//! Memory report parsing
//!
//! Two input shapes are understood:
//! - the tabular report printed by `kubectl top pods`, where the third
//!   column is a memory figure suffixed with `Mi`
//! - Kubernetes resource quantities (`128974848`, `129e6`, `123Mi`, `1.5Gi`)
//!   as returned by the metrics API

/// Bytes in one Mi
pub const BYTES_PER_MI: u64 = 1024 * 1024;

/// Column of `kubectl top pods` that holds memory usage
const MEMORY_COLUMN: usize = 2;

/// Outcome of parsing one tabular memory report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Sum of every parseable memory figure, in Mi
    pub total_mi: u64,
    /// Body rows that had a memory column
    pub rows: usize,
    /// Body rows whose memory column parsed
    pub parsed_rows: usize,
}

impl ReportSummary {
    /// True when rows were present but none could be read
    pub fn is_wholly_malformed(&self) -> bool {
        self.rows > 0 && self.parsed_rows == 0
    }
}

/// Sum the memory column of a `kubectl top pods` style report, in Mi.
///
/// The first line is a header and is always skipped. Rows with fewer than
/// three fields, or whose memory field is not an integer with an optional
/// `Mi` suffix, contribute nothing.
pub fn parse_total_memory(report: &str) -> u64 {
    summarize_report(report).total_mi
}

/// Same as [`parse_total_memory`] but also reports how many rows were read
pub fn summarize_report(report: &str) -> ReportSummary {
    let mut summary = ReportSummary::default();

    for line in report.lines().skip(1) {
        let Some(field) = line.split_whitespace().nth(MEMORY_COLUMN) else {
            continue;
        };
        summary.rows += 1;

        let digits = field.strip_suffix("Mi").unwrap_or(field);
        if let Ok(memory) = digits.parse::<u64>() {
            summary.total_mi = summary.total_mi.saturating_add(memory);
            summary.parsed_rows += 1;
        }
    }

    summary
}

/// Parse a Kubernetes resource quantity into bytes, rounding up.
///
/// Returns `None` for negative or unparseable quantities.
pub fn parse_quantity_bytes(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        other => {
            let exponent: i32 = other.strip_prefix(['e', 'E'])?.parse().ok()?;
            10f64.powi(exponent)
        }
    };

    Some((value * multiplier).ceil() as u64)
}

/// Convert a byte count to whole Mi, rounding down like `kubectl top`
pub fn bytes_to_mi(bytes: u64) -> u64 {
    bytes / BYTES_PER_MI
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "NAME                     CPU(cores)   MEMORY(bytes)";

    #[test]
    fn test_parse_total_memory() {
        let cases = [
            (
                "valid input",
                format!(
                    "{HEADER}\npod-1                    100m         1000Mi\npod-2                    200m         2000Mi"
                ),
                3000,
            ),
            ("empty input", HEADER.to_string(), 0),
            (
                "invalid memory format",
                format!("{HEADER}\npod-1                    100m         invalid"),
                0,
            ),
            (
                "short rows are skipped",
                format!("{HEADER}\npod-1 100m\n\npod-2 200m 512Mi"),
                512,
            ),
            (
                "malformed row does not stop summing",
                format!("{HEADER}\npod-1 100m 1Gi\npod-2 200m 300Mi\npod-3 1m 200Mi"),
                500,
            ),
            ("no input at all", String::new(), 0),
        ];

        for (name, input, expected) in cases {
            assert_eq!(parse_total_memory(&input), expected, "case: {name}");
        }
    }

    #[test]
    fn test_header_is_always_skipped() {
        // A header that looks like data must still be ignored
        assert_eq!(parse_total_memory("pod-0 1m 999Mi\npod-1 1m 1Mi"), 1);
    }

    #[test]
    fn test_summarize_flags_wholly_malformed_reports() {
        let summary = summarize_report(&format!("{HEADER}\npod-1 100m invalid\npod-2 1m ?Mi"));
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.parsed_rows, 0);
        assert!(summary.is_wholly_malformed());

        let empty = summarize_report(HEADER);
        assert!(!empty.is_wholly_malformed());
    }

    #[test]
    fn test_parse_quantity_bytes() {
        assert_eq!(parse_quantity_bytes("128974848"), Some(128_974_848));
        assert_eq!(parse_quantity_bytes("129e6"), Some(129_000_000));
        assert_eq!(parse_quantity_bytes("123Mi"), Some(123 * BYTES_PER_MI));
        assert_eq!(parse_quantity_bytes("1.5Gi"), Some(1536 * BYTES_PER_MI));
        assert_eq!(parse_quantity_bytes("2048Ki"), Some(2 * BYTES_PER_MI));
        assert_eq!(parse_quantity_bytes("1k"), Some(1000));
        assert_eq!(parse_quantity_bytes("1500m"), Some(2));
        assert_eq!(parse_quantity_bytes("-1Mi"), None);
        assert_eq!(parse_quantity_bytes("lots"), None);
        assert_eq!(parse_quantity_bytes("12Qi"), None);
    }

    #[test]
    fn test_bytes_to_mi_rounds_down() {
        assert_eq!(bytes_to_mi(BYTES_PER_MI - 1), 0);
        assert_eq!(bytes_to_mi(3 * BYTES_PER_MI + 10), 3);
    }
}
