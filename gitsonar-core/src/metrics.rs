//! Percentage helpers and analysis measure parsing.

use serde::Deserialize;

use crate::domain::{SeverityCounts, Tally};
use crate::error::{GitSonarError, Result};

/// Key holding the denominator in [`percentage_of_values`].
pub const TOTAL_KEY: &str = "total";

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole` as a percentage rounded to two decimals, or 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Percentage of every entry relative to the `total` entry.
///
/// The `total` entry itself is left out. Returns an empty tally when the total
/// is missing or zero.
pub fn percentage_of_values(values: &Tally<u64>) -> Tally<f64> {
    let total = values.get(TOTAL_KEY).copied().unwrap_or(0);
    let mut percentages = Tally::new();
    if total == 0 {
        return percentages;
    }
    for (key, value) in values.iter() {
        if key != TOTAL_KEY {
            percentages.insert(key, percentage(*value, total));
        }
    }
    percentages
}

/// Percentage of every entry relative to the sum of all entries.
pub fn share_of_sum(values: &Tally<u64>) -> Tally<f64> {
    let sum = values.sum();
    let mut percentages = Tally::new();
    for (key, value) in values.iter() {
        percentages.insert(key, percentage(*value, sum));
    }
    percentages
}

#[derive(Debug, Deserialize)]
struct SeverityMeasure {
    #[serde(rename = "LOW", default)]
    low: u64,
    #[serde(rename = "MEDIUM", default)]
    medium: u64,
    #[serde(rename = "HIGH", default)]
    high: u64,
    #[serde(default)]
    total: u64,
}

/// Parse an `*_issues` measure value such as `{"LOW":1,"MEDIUM":0,"HIGH":2,"total":3}`.
///
/// A missing measure counts as zero in every bucket.
pub fn parse_severity_measure(value: Option<&str>) -> Result<SeverityCounts> {
    let Some(raw) = value else {
        return Ok(SeverityCounts::default());
    };
    let measure: SeverityMeasure = serde_json::from_str(raw).map_err(|err| {
        GitSonarError::MalformedResponse(format!("severity measure {raw:?}: {err}"))
    })?;
    Ok(SeverityCounts {
        low: measure.low,
        medium: measure.medium,
        high: measure.high,
        total: measure.total,
    })
}

/// Parse an integer measure value; a missing measure is zero.
pub fn parse_count_measure(value: Option<&str>) -> Result<u64> {
    let Some(raw) = value else {
        return Ok(0);
    };
    raw.trim()
        .parse::<u64>()
        .map_err(|err| GitSonarError::MalformedResponse(format!("count measure {raw:?}: {err}")))
}

/// Parse a decimal measure value; a missing measure is zero.
pub fn parse_decimal_measure(value: Option<&str>) -> Result<f64> {
    let Some(raw) = value else {
        return Ok(0.0);
    };
    raw.trim().parse::<f64>().map_err(|err| {
        GitSonarError::MalformedResponse(format!("decimal measure {raw:?}: {err}"))
    })
}

/// Sum the maintainability, reliability and security buckets.
pub fn combine_severities(categories: &[SeverityCounts]) -> SeverityCounts {
    categories
        .iter()
        .fold(SeverityCounts::default(), |acc, counts| acc.combine(*counts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_of_values_skips_zero_total() {
        let mut values = Tally::new();
        values.insert("total", 0);
        values.insert("low", 0);
        assert!(percentage_of_values(&values).is_empty());
    }

    #[test]
    fn percentage_of_values_excludes_total_key() {
        let counts = SeverityCounts {
            low: 1,
            medium: 1,
            high: 1,
            total: 3,
        };
        let percentages = percentage_of_values(&counts.to_tally());
        assert_eq!(percentages.len(), 3);
        assert_eq!(percentages.get("total_low"), Some(&33.33));
        assert!(percentages.get("total").is_none());
    }

    #[test]
    fn bucket_percentages_sum_to_hundred_within_rounding() {
        for (low, medium, high) in [(1, 1, 1), (2, 5, 0), (7, 3, 13), (1, 0, 0), (99, 1, 2)] {
            let counts = SeverityCounts {
                low,
                medium,
                high,
                total: low + medium + high,
            };
            let percentages = percentage_of_values(&counts.to_tally());
            let sum: f64 = percentages.iter().map(|(_, value)| *value).sum();
            assert!((sum - 100.0).abs() <= 0.015, "sum {sum} for {counts:?}");
        }
    }

    #[test]
    fn share_of_sum_uses_observed_total() {
        let mut counts = Tally::new();
        counts.insert("feat", 1);
        counts.insert("fix", 2);
        let shares = share_of_sum(&counts);
        assert_eq!(shares.get("feat"), Some(&33.33));
        assert_eq!(shares.get("fix"), Some(&66.67));
    }

    #[test]
    fn parses_severity_measure_json() {
        let counts = parse_severity_measure(Some(
            r#"{"LOW":3,"MEDIUM":1,"HIGH":0,"INFO":2,"BLOCKER":0,"total":4}"#,
        ))
        .expect("severity");
        assert_eq!(
            counts,
            SeverityCounts {
                low: 3,
                medium: 1,
                high: 0,
                total: 4,
            }
        );
    }

    #[test]
    fn missing_measures_are_zero() {
        assert_eq!(
            parse_severity_measure(None).expect("severity"),
            SeverityCounts::default()
        );
        assert_eq!(parse_count_measure(None).expect("count"), 0);
        assert_eq!(parse_decimal_measure(None).expect("decimal"), 0.0);
    }

    #[test]
    fn malformed_measures_are_reported() {
        let err = parse_count_measure(Some("many")).unwrap_err();
        assert!(matches!(err, GitSonarError::MalformedResponse(_)));
        let err = parse_severity_measure(Some("12")).unwrap_err();
        assert!(err.to_string().contains("severity measure"));
    }

    #[test]
    fn combine_severities_sums_all_categories() {
        let one = SeverityCounts {
            low: 1,
            medium: 0,
            high: 0,
            total: 1,
        };
        let combined = combine_severities(&[one, one, one]);
        assert_eq!(combined.low, 3);
        assert_eq!(combined.total, 3);
    }
}
