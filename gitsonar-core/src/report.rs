//! CSV report writing.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{AnalysisSummary, EvaluationRecord};
use crate::error::{GitSonarError, Result};
use crate::fs::FileSystem;

/// Cell written for a field that could not be fetched.
pub const UNAVAILABLE: &str = "unavailable";

const BOM: &str = "\u{feff}";

const LEADING_COLUMNS: [&str; 7] = [
    "repositório",
    "linguagens",
    "quantidade_de_pull_requests",
    "git_flow",
    "quantidade_de_commits",
    "porcentagem_de_commits_no_padrão",
    "porcentagem_de_commits_por_tipo",
];

const CARDS_COLUMN: &str = "cards_por_coluna";

const ANALYSIS_COLUMNS: [&str; 8] = [
    "total_de_issues",
    "quantidade_de_issues_por_severidade",
    "porcentagem_de_issues_por_severidade",
    "quantidade_de_code_smells",
    "quantidade_de_bugs",
    "quantidade_de_vulnerabilidades",
    "porcentagem_de_duplicação_de_código",
    "quantidade_de_pontos_de_acesso_de_segurança",
];

/// Column layout of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportLayout {
    /// Whether the per-column card counts are included.
    pub include_cards: bool,
}

/// Header row for a layout.
pub fn header(layout: ReportLayout) -> Vec<&'static str> {
    let mut columns = LEADING_COLUMNS.to_vec();
    if layout.include_cards {
        columns.push(CARDS_COLUMN);
    }
    columns.extend(ANALYSIS_COLUMNS);
    columns
}

/// Render the cells of one record in header order.
pub fn render_row(record: &EvaluationRecord, layout: ReportLayout) -> Result<Vec<String>> {
    let analysis = record.analysis.as_ref();
    let field = |select: fn(&AnalysisSummary) -> Option<String>| -> String {
        analysis.and_then(select).unwrap_or_else(unavailable)
    };

    let mut cells = vec![
        record.name.clone(),
        json_cell(record.languages.as_ref())?,
        number_cell(record.pull_requests),
        record
            .git_flow
            .map(|flag| flag.to_string())
            .unwrap_or_else(unavailable),
        number_cell(record.commits),
        decimal_cell(record.commit_pattern_percentage),
        json_cell(record.commit_type_percentages.as_ref())?,
    ];
    if layout.include_cards {
        cells.push(json_cell(record.cards.as_ref())?);
    }
    let severity_percentages = json_cell(
        analysis.and_then(|summary| summary.issues_per_severity_percentage.as_ref()),
    )?;
    let severity_counts = json_cell(
        analysis
            .and_then(|summary| summary.issues_per_severity)
            .map(|counts| counts.to_tally())
            .as_ref(),
    )?;
    cells.extend([
        field(|summary| summary.total_issues().map(|total| total.to_string())),
        severity_counts,
        severity_percentages,
        field(|summary| summary.code_smells.map(|count| count.to_string())),
        field(|summary| summary.bugs.map(|count| count.to_string())),
        field(|summary| summary.vulnerabilities.map(|count| count.to_string())),
        field(|summary| summary.duplication_percentage.map(format_decimal)),
        field(|summary| summary.security_hotspots.map(|count| count.to_string())),
    ]);
    Ok(cells)
}

/// Format a decimal so that it re-parses to the same value (`100.0`, `66.67`).
pub fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn unavailable() -> String {
    UNAVAILABLE.to_string()
}

fn number_cell(value: Option<u64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_else(unavailable)
}

fn decimal_cell(value: Option<f64>) -> String {
    value.map(format_decimal).unwrap_or_else(unavailable)
}

fn json_cell<T: Serialize>(value: Option<&T>) -> Result<String> {
    match value {
        Some(value) => serde_json::to_string(value).map_err(|err| {
            GitSonarError::MalformedResponse(format!("cannot encode report cell: {err}"))
        }),
        None => Ok(unavailable()),
    }
}

fn encode_line<I, S>(cells: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(cells)?;
    writer
        .into_inner()
        .map_err(|err| GitSonarError::Io(err.into_error()))
}

/// Append-only CSV report with a UTF-8 byte-order mark.
pub struct CsvReport<F: FileSystem> {
    fs: F,
    path: PathBuf,
    layout: ReportLayout,
}

impl<F: FileSystem> CsvReport<F> {
    /// Create (or truncate) the report file and write its header.
    pub fn create(fs: F, path: impl Into<PathBuf>, layout: ReportLayout) -> Result<Self> {
        let path = path.into();
        let mut contents = BOM.as_bytes().to_vec();
        contents.extend(encode_line(header(layout))?);
        fs.write(&path, &contents)?;
        log::info!("created report {}", path.display());
        Ok(Self { fs, path, layout })
    }

    /// Append one row for `record`.
    pub fn append(&self, record: &EvaluationRecord) -> Result<()> {
        let line = encode_line(render_row(record, self.layout)?)?;
        self.fs.append(&self.path, &line)?;
        log::debug!("wrote row for {}", record.name);
        Ok(())
    }

    /// Path of the report file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SeverityCounts, Tally};
    use crate::fs::MockFileSystem;
    use crate::metrics::percentage_of_values;
    use mockall::predicate::always;
    use std::sync::{Arc, Mutex};

    fn full_record() -> EvaluationRecord {
        let mut type_percentages = Tally::new();
        type_percentages.insert("feat", 66.67);
        type_percentages.insert("fix", 33.33);
        let mut cards = Tally::zeroed(["New", "Done"]);
        cards.insert("Done", 3);
        let counts = SeverityCounts {
            low: 2,
            medium: 1,
            high: 0,
            total: 3,
        };
        EvaluationRecord {
            name: "todo-api".to_string(),
            languages: Some(vec!["Rust".to_string(), "Shell".to_string()]),
            pull_requests: Some(4),
            git_flow: Some(true),
            commits: Some(12),
            commit_pattern_percentage: Some(91.67),
            commit_type_percentages: Some(type_percentages),
            cards: Some(cards),
            analysis: Some(AnalysisSummary {
                issues_per_severity: Some(counts),
                issues_per_severity_percentage: Some(percentage_of_values(&counts.to_tally())),
                code_smells: Some(2),
                bugs: Some(1),
                vulnerabilities: Some(0),
                duplication_percentage: Some(3.5),
                security_hotspots: Some(0),
            }),
            errors: Vec::new(),
        }
    }

    #[test]
    fn header_includes_cards_only_when_enabled() {
        let without = header(ReportLayout::default());
        let with = header(ReportLayout {
            include_cards: true,
        });
        assert_eq!(without.len(), 15);
        assert_eq!(with.len(), 16);
        assert!(!without.contains(&"cards_por_coluna"));
        assert_eq!(with[7], "cards_por_coluna");
    }

    #[test]
    fn row_matches_header_width() {
        let record = full_record();
        for layout in [
            ReportLayout::default(),
            ReportLayout {
                include_cards: true,
            },
        ] {
            let row = render_row(&record, layout).expect("row");
            assert_eq!(row.len(), header(layout).len());
        }
    }

    #[test]
    fn row_renders_nested_values_as_json() {
        let row = render_row(
            &full_record(),
            ReportLayout {
                include_cards: true,
            },
        )
        .expect("row");
        assert_eq!(row[1], r#"["Rust","Shell"]"#);
        assert_eq!(row[3], "true");
        assert_eq!(row[6], r#"{"feat":66.67,"fix":33.33}"#);
        assert_eq!(row[7], r#"{"New":0,"Done":3}"#);
        assert_eq!(row[8], "3");
        assert_eq!(
            row[9],
            r#"{"total_low":2,"total_medium":1,"total_high":0,"total":3}"#
        );
        assert_eq!(
            row[10],
            r#"{"total_low":66.67,"total_medium":33.33,"total_high":0.0}"#
        );
        assert_eq!(row[14], "3.5");
    }

    #[test]
    fn missing_fields_render_as_unavailable() {
        let record = EvaluationRecord::new("broken");
        let row = render_row(&record, ReportLayout::default()).expect("row");
        assert_eq!(row[0], "broken");
        assert!(row[1..].iter().all(|cell| cell == UNAVAILABLE));
    }

    #[test]
    fn percentages_round_trip_through_cells() {
        let record = full_record();
        let row = render_row(&record, ReportLayout::default()).expect("row");
        let parsed: f64 = row[5].parse().expect("pattern percentage");
        assert_eq!(Some(parsed), record.commit_pattern_percentage);
        let per_type: serde_json::Value = serde_json::from_str(&row[6]).expect("per type");
        assert_eq!(per_type["feat"].as_f64(), Some(66.67));
        assert_eq!(per_type["fix"].as_f64(), Some(33.33));
    }

    #[test]
    fn format_decimal_keeps_fraction_marker() {
        assert_eq!(format_decimal(100.0), "100.0");
        assert_eq!(format_decimal(0.0), "0.0");
        assert_eq!(format_decimal(66.67), "66.67");
    }

    #[test]
    fn create_writes_bom_and_header() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let mut fs = MockFileSystem::new();
        fs.expect_write()
            .with(always(), always())
            .times(1)
            .returning(move |_, contents| {
                sink.lock().expect("sink").extend_from_slice(contents);
                Ok(())
            });

        let report =
            CsvReport::create(fs, "out.csv", ReportLayout::default()).expect("create report");
        assert_eq!(report.path(), Path::new("out.csv"));

        let bytes = written.lock().expect("written").clone();
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.starts_with('\u{feff}'));
        assert!(text.trim_start_matches('\u{feff}').starts_with("repositório,linguagens,"));
        assert!(text.ends_with("quantidade_de_pontos_de_acesso_de_segurança\r\n"));
    }

    #[test]
    fn append_writes_single_quoted_row() {
        let appended = Arc::new(Mutex::new(Vec::new()));
        let sink = appended.clone();
        let mut fs = MockFileSystem::new();
        fs.expect_write().returning(|_, _| Ok(()));
        fs.expect_append()
            .times(1)
            .returning(move |_, contents| {
                sink.lock().expect("sink").extend_from_slice(contents);
                Ok(())
            });

        let report = CsvReport::create(fs, "out.csv", ReportLayout::default()).expect("create");
        report.append(&full_record()).expect("append");

        let text = String::from_utf8(appended.lock().expect("appended").clone()).expect("utf8");
        assert_eq!(text.lines().count(), 1);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(text.as_bytes());
        let row = reader
            .records()
            .next()
            .expect("one record")
            .expect("valid record");
        assert_eq!(row.len(), 15);
        assert_eq!(&row[0], "todo-api");
        assert_eq!(&row[6], r#"{"feat":66.67,"fix":33.33}"#);
    }
}
