#![deny(missing_docs)]
//! gitsonar core library.
//!
//! Domain types, classification heuristics and report writing used by the
//! gitsonar command-line tool. Nothing in this crate performs network I/O.

pub mod boards;
pub mod branches;
pub mod commits;
pub mod domain;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod properties;
pub mod report;

pub use boards::{
    ProjectBoard, ProjectItem, STARTER_COLUMNS, cards_or_default, count_cards,
    expected_board_title, normalize_column,
};
pub use branches::{branch_keywords, follows_git_flow};
pub use commits::{CommitCounting, CommitStats, classify_commits, commit_type, is_conventional};
pub use domain::{
    AnalysisSummary, EvaluationRecord, IGNORED_LANGUAGES, SeverityCounts, Tally,
    reportable_languages,
};
pub use error::{GitSonarError, Result};
pub use fs::{FileSystem, StdFileSystem};
pub use metrics::{
    combine_severities, parse_count_measure, parse_decimal_measure, parse_severity_measure,
    percentage, percentage_of_values, round2, share_of_sum,
};
pub use properties::ScannerProperties;
pub use report::{CsvReport, ReportLayout, UNAVAILABLE, format_decimal, header, render_row};
