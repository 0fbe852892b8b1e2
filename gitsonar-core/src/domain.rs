//! Domain entities for gitsonar.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Insertion-ordered mapping from a label to a value.
///
/// Column and commit-type breakdowns keep the order in which labels were first
/// seen, so rendered cells stay stable between runs over the same data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally<T> {
    entries: Vec<(String, T)>,
}

impl<T> Tally<T> {
    /// Create an empty tally.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Look up the value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(label, _)| label == key)
            .map(|(_, value)| value)
    }

    /// Insert or replace the value for `key`, keeping its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.entries.iter_mut().find(|(label, _)| *label == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries
            .iter()
            .map(|(label, value)| (label.as_str(), value))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tally has no labels.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Tally<u64> {
    /// Build a tally with every label present and set to zero.
    pub fn zeroed<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tally = Self::new();
        for label in labels {
            tally.insert(label, 0);
        }
        tally
    }

    /// Add one to `key`, creating it if needed.
    pub fn increment(&mut self, key: &str) {
        match self.entries.iter_mut().find(|(label, _)| label == key) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((key.to_string(), 1)),
        }
    }

    /// Sum of all values.
    pub fn sum(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }
}

impl<T: Serialize> Serialize for Tally<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, value) in &self.entries {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

/// Languages left out of reports because they rarely reflect project code.
pub const IGNORED_LANGUAGES: [&str; 3] = ["HTML", "CSS", "Roff"];

/// Drop [`IGNORED_LANGUAGES`] while keeping the API order.
pub fn reportable_languages<I, S>(languages: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    languages
        .into_iter()
        .map(Into::into)
        .filter(|language| !IGNORED_LANGUAGES.contains(&language.as_str()))
        .collect()
}

/// Issue counts per severity bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    /// Low-severity issues.
    pub low: u64,
    /// Medium-severity issues.
    pub medium: u64,
    /// High-severity issues.
    pub high: u64,
    /// Total issues as reported by the server.
    pub total: u64,
}

impl SeverityCounts {
    /// Add another category's counts to this one.
    pub fn combine(self, other: SeverityCounts) -> SeverityCounts {
        SeverityCounts {
            low: self.low + other.low,
            medium: self.medium + other.medium,
            high: self.high + other.high,
            total: self.total + other.total,
        }
    }

    /// Express the counts as a tally keyed like the output columns.
    pub fn to_tally(&self) -> Tally<u64> {
        let mut tally = Tally::new();
        tally.insert("total_low", self.low);
        tally.insert("total_medium", self.medium);
        tally.insert("total_high", self.high);
        tally.insert("total", self.total);
        tally
    }
}

/// Metrics pulled from the static analysis server for one project.
///
/// Each measure is `None` when it could not be fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisSummary {
    /// Combined severity counts across maintainability, reliability and security.
    pub issues_per_severity: Option<SeverityCounts>,
    /// Percentage of the total per severity bucket (empty when the total is 0).
    pub issues_per_severity_percentage: Option<Tally<f64>>,
    /// Code smell count.
    pub code_smells: Option<u64>,
    /// Bug count.
    pub bugs: Option<u64>,
    /// Vulnerability count.
    pub vulnerabilities: Option<u64>,
    /// Duplicated lines density, in percent.
    pub duplication_percentage: Option<f64>,
    /// Security hotspot count.
    pub security_hotspots: Option<u64>,
}

impl AnalysisSummary {
    /// Total issue count, if the severity breakdown is available.
    pub fn total_issues(&self) -> Option<u64> {
        self.issues_per_severity.map(|counts| counts.total)
    }
}

/// One evaluated repository, ready to be written as a CSV row.
///
/// Fields are `None` when the corresponding data could not be fetched; the
/// writer renders those as `unavailable` rather than as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationRecord {
    /// Repository name.
    pub name: String,
    /// Languages reported for the repository, in API order.
    pub languages: Option<Vec<String>>,
    /// Number of pull requests.
    pub pull_requests: Option<u64>,
    /// Whether the branches follow git-flow.
    pub git_flow: Option<bool>,
    /// Number of commits.
    pub commits: Option<u64>,
    /// Percentage of commits following the conventional-commit pattern.
    pub commit_pattern_percentage: Option<f64>,
    /// Percentage of classified commits per type.
    pub commit_type_percentages: Option<Tally<f64>>,
    /// Card counts per board column (only collected when boards are enabled).
    pub cards: Option<Tally<u64>>,
    /// Static analysis metrics.
    pub analysis: Option<AnalysisSummary>,
    /// Errors hit while evaluating, in order of occurrence.
    pub errors: Vec<String>,
}

impl EvaluationRecord {
    /// Create an empty record for a repository.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
