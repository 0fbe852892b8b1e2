//! Project board card aggregation.

use crate::domain::Tally;
use crate::error::{GitSonarError, Result};

/// Columns every card breakdown starts with, in output order.
pub const STARTER_COLUMNS: [&str; 7] = [
    "New", "Backlog", "Ready", "progress", "Blocked", "review", "Done",
];

const TITLE_PREFIX: &str = "Backlog -";

/// An organization project board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBoard {
    /// Board title.
    pub title: String,
    /// Cards on the board.
    pub items: Vec<ProjectItem>,
}

/// A card on a project board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectItem {
    /// Raw status column name, possibly emoji-decorated.
    pub status: Option<String>,
}

/// Board title expected for a repository, e.g. `Backlog - Todo Api` for `TodoApi`.
pub fn expected_board_title(repository: &str) -> String {
    let mut title = String::from(TITLE_PREFIX);
    for letter in repository.chars() {
        if letter.is_uppercase() {
            title.push(' ');
        }
        title.push(letter);
    }
    title
}

/// Plain column label for a status such as `🏗 In progress` (→ `progress`).
///
/// Returns `None` when nothing but decoration is left.
pub fn normalize_column(status: &str) -> Option<String> {
    let plain: String = status
        .chars()
        .map(|c| if is_decoration(c) { ' ' } else { c })
        .collect();
    plain.split_whitespace().last().map(str::to_string)
}

fn is_decoration(c: char) -> bool {
    !(c.is_alphanumeric() || c.is_whitespace() || c.is_ascii_punctuation())
}

/// Count cards per column on the board matching `repository`.
///
/// Fails with [`GitSonarError::BoardNotFound`] when no board title matches.
pub fn count_cards(repository: &str, boards: &[ProjectBoard]) -> Result<Tally<u64>> {
    let title = expected_board_title(repository);
    let mut columns = Tally::zeroed(STARTER_COLUMNS);
    let mut matched = false;

    for board in boards.iter().filter(|board| board.title == title) {
        matched = true;
        for item in &board.items {
            match item.status.as_deref().and_then(normalize_column) {
                Some(column) => columns.increment(&column),
                None => log::debug!("skipping card without status on {title}"),
            }
        }
    }

    if matched {
        Ok(columns)
    } else {
        Err(GitSonarError::BoardNotFound(title))
    }
}

/// Card counts for `repository`, falling back to all-zero starter columns.
pub fn cards_or_default(repository: &str, boards: &[ProjectBoard]) -> Tally<u64> {
    match count_cards(repository, boards) {
        Ok(columns) => columns,
        Err(err) => {
            log::info!("{err}; using empty column counts");
            Tally::zeroed(STARTER_COLUMNS)
        }
    }
}
