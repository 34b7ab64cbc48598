//! Release notes built from commit history.

use crate::git::CommitSummary;

pub const NO_CHANGES: &str = "- No changes since the previous release.";

/// A markdown bullet per commit, in the order given, merge commits left out.
pub fn render(commits: &[CommitSummary]) -> String {
    let lines: Vec<String> = commits
        .iter()
        .filter(|c| !c.is_merge && !c.summary.trim().is_empty())
        .map(|c| format!("- {} ({})", c.summary.trim(), c.id))
        .collect();

    if lines.is_empty() {
        NO_CHANGES.to_string()
    } else {
        lines.join("\n")
    }
}
