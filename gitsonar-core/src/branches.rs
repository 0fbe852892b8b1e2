//! Git-flow detection from branch names.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static BRANCH_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(feature|develop|master|main)").expect("branch keyword pattern is valid")
});

const REQUIRED: [&str; 2] = ["feature", "develop"];
const PRINCIPAL: [&str; 2] = ["main", "master"];

/// Keywords found across branch names, compared case-insensitively.
///
/// Only the first keyword occurring in each name is taken.
pub fn branch_keywords<S: AsRef<str>>(branches: &[S]) -> BTreeSet<String> {
    branches
        .iter()
        .filter_map(|name| {
            let lowered = name.as_ref().to_lowercase();
            BRANCH_KEYWORD
                .find(&lowered)
                .map(|found| found.as_str().to_string())
        })
        .collect()
}

/// Whether the branches include feature and develop branches plus main or master.
pub fn follows_git_flow<S: AsRef<str>>(branches: &[S]) -> bool {
    let found = branch_keywords(branches);
    REQUIRED.iter().all(|keyword| found.contains(*keyword))
        && PRINCIPAL.iter().any(|keyword| found.contains(*keyword))
}
