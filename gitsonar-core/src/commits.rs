//! Conventional-commit classification.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::Tally;
use crate::metrics::{percentage, share_of_sum};

static CONVENTIONAL_COMMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(docs|doc|fix|style|feat|refactor|perf|test|build|ci|chore|revert)(\(.*\))?:\s{0,4}\S(.|\n)*$",
    )
    .expect("conventional commit pattern is valid")
});

/// How commits are counted when computing the pattern percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitCounting {
    /// Seed the matching counter at 1 and skip the last (oldest) commit.
    ///
    /// Reproduces the figures of earlier reports so they stay comparable.
    #[default]
    Legacy,
    /// Count every commit exactly once, starting from zero.
    Exact,
}

/// Outcome of classifying a commit history.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitStats {
    /// Commits counted as following the pattern.
    pub with_pattern: u64,
    /// Commits counted as not following the pattern.
    pub without_pattern: u64,
    /// Matching commits per type, in order of first appearance.
    pub per_type: Tally<u64>,
    /// `with_pattern` as a percentage of all counted commits.
    pub pattern_percentage: f64,
    /// Share of each type among matching commits.
    pub per_type_percentage: Tally<f64>,
}

/// Whether `message` follows the conventional-commit grammar.
pub fn is_conventional(message: &str) -> bool {
    CONVENTIONAL_COMMIT.is_match(message)
}

/// Leading alphabetic run of a message, e.g. `feat` for `feat(api): x`.
pub fn commit_type(message: &str) -> Option<&str> {
    let end = message
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(index, _)| index)
        .unwrap_or(message.len());
    if end == 0 { None } else { Some(&message[..end]) }
}

/// Classify commit messages, newest first as returned by the API.
pub fn classify_commits<S: AsRef<str>>(messages: &[S], counting: CommitCounting) -> CommitStats {
    let (mut with_pattern, evaluated) = match counting {
        CommitCounting::Legacy => (1, &messages[..messages.len().saturating_sub(1)]),
        CommitCounting::Exact => (0, messages),
    };
    let mut without_pattern = 0;
    let mut per_type = Tally::new();

    for message in evaluated {
        let message = message.as_ref();
        if is_conventional(message) {
            if let Some(kind) = commit_type(message) {
                per_type.increment(kind);
            }
            with_pattern += 1;
        } else {
            without_pattern += 1;
        }
    }

    let pattern_percentage = percentage(with_pattern, with_pattern + without_pattern);
    let per_type_percentage = share_of_sum(&per_type);

    CommitStats {
        with_pattern,
        without_pattern,
        per_type,
        pattern_percentage,
        per_type_percentage,
    }
}
