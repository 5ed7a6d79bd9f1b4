//! Divergent-version resolution for notes.
//!
//! `ThreeWayMerge` keeps whichever side has the longer content when both
//! sides edited the body. That is a heuristic, not a diff: concurrent edits
//! to different parts of a note lose the shorter side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::SyncError;
use crate::models::Note;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LocalWins,
    RemoteWins,
    NewerWins,
    #[default]
    ThreeWayMerge,
}

impl ConflictStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::NewerWins => "newer_wins",
            Self::ThreeWayMerge => "three_way_merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "local_wins" => Ok(Self::LocalWins),
            "remote_wins" => Ok(Self::RemoteWins),
            "newer_wins" => Ok(Self::NewerWins),
            "three_way_merge" => Ok(Self::ThreeWayMerge),
            other => Err(SyncError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub const fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Pick or synthesize the version both sides should converge on.
    #[must_use]
    pub fn resolve(&self, local: &Note, remote: &Note, base: Option<&Note>) -> Note {
        match self.strategy {
            ConflictStrategy::LocalWins => local.clone(),
            ConflictStrategy::RemoteWins => remote.clone(),
            ConflictStrategy::NewerWins => newer(local, remote).clone(),
            ConflictStrategy::ThreeWayMerge => match base {
                Some(base) => three_way_merge(local, remote, base),
                None => newer(local, remote).clone(),
            },
        }
    }
}

/// Whether both sides diverged from `base` into different text. With no base,
/// any difference in text counts.
#[must_use]
pub fn detect_conflict(local: &Note, remote: &Note, base: Option<&Note>) -> bool {
    let Some(base) = base else {
        return !local.same_text(remote);
    };
    !local.same_text(base) && !remote.same_text(base) && !local.same_text(remote)
}

/// Ties go to local.
fn newer<'a>(local: &'a Note, remote: &'a Note) -> &'a Note {
    if remote.updated_at > local.updated_at {
        remote
    } else {
        local
    }
}

fn three_way_merge(local: &Note, remote: &Note, base: &Note) -> Note {
    let local_changed = !local.same_text(base);
    let remote_changed = !remote.same_text(base);

    if remote_changed && !local_changed {
        return remote.clone();
    }
    if local_changed && !remote_changed {
        return local.clone();
    }
    if local.same_text(remote) {
        return local.clone();
    }

    let title = if local.title != base.title && !local.title.is_empty() {
        local.title.clone()
    } else {
        remote.title.clone()
    };
    // Byte length; ties keep local.
    let (content, updated_at) = if local.content.len() >= remote.content.len() {
        (local.content.clone(), local.updated_at)
    } else {
        (remote.content.clone(), remote.updated_at)
    };

    Note {
        id: local.id,
        workspace_id: local.workspace_id.clone(),
        title,
        content,
        parent_id: local.parent_id,
        is_favorite: local.is_favorite || remote.is_favorite,
        is_deleted: local.is_deleted || remote.is_deleted,
        created_at: local.created_at,
        updated_at,
        deleted_at: local.deleted_at.or(remote.deleted_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(title: &str, content: &str, updated_at: i64) -> Note {
        let mut note = Note::new("ws", title, content);
        note.updated_at = updated_at;
        note
    }

    fn versions(base: (&str, &str), local: (&str, &str), remote: (&str, &str)) -> (Note, Note, Note) {
        let base = note(base.0, base.1, 100);
        let mut local_note = base.clone();
        local_note.title = local.0.to_string();
        local_note.content = local.1.to_string();
        local_note.updated_at = 200;
        let mut remote_note = base.clone();
        remote_note.title = remote.0.to_string();
        remote_note.content = remote.1.to_string();
        remote_note.updated_at = 300;
        (base, local_note, remote_note)
    }

    const MERGE: ConflictResolver = ConflictResolver::new(ConflictStrategy::ThreeWayMerge);

    #[test]
    fn only_remote_changed_returns_remote_unchanged() {
        let (base, local, remote) = versions(("A", "x"), ("A", "x"), ("A", "y"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)), remote);
        assert!(!detect_conflict(&local, &remote, Some(&base)));
    }

    #[test]
    fn only_local_changed_returns_local_unchanged() {
        let (base, local, remote) = versions(("A", "x"), ("B", "x"), ("A", "x"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)), local);
    }

    #[test]
    fn converged_edits_return_local() {
        let (base, local, remote) = versions(("A", "x"), ("A", "same"), ("A", "same"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)), local);
        assert!(!detect_conflict(&local, &remote, Some(&base)));
    }

    #[test]
    fn both_changed_keeps_longer_content() {
        let (base, local, remote) =
            versions(("A", "short"), ("A", "short plus more"), ("A", "short+"));
        let merged = MERGE.resolve(&local, &remote, Some(&base));
        assert_eq!(merged.content, "short plus more");
        assert_eq!(merged.updated_at, local.updated_at);
        assert!(detect_conflict(&local, &remote, Some(&base)));
    }

    #[test]
    fn both_changed_remote_longer_carries_remote_timestamp() {
        let (base, local, remote) = versions(("A", "s"), ("A", "s1"), ("A", "s-remote"));
        let merged = MERGE.resolve(&local, &remote, Some(&base));
        assert_eq!(merged.content, "s-remote");
        assert_eq!(merged.updated_at, remote.updated_at);
        assert_eq!(merged.id, local.id);
        assert_eq!(merged.created_at, local.created_at);
    }

    #[test]
    fn equal_length_content_prefers_local() {
        let (base, local, remote) = versions(("A", "base"), ("A", "left"), ("A", "rite"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)).content, "left");
    }

    #[test]
    fn merged_title_prefers_local_edit() {
        let (base, local, remote) = versions(("A", "x"), ("Local", "xx"), ("Remote", "y"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)).title, "Local");

        let (base, local, remote) = versions(("A", "x"), ("A", "xx"), ("Remote", "y"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)).title, "Remote");

        let (base, local, remote) = versions(("A", "x"), ("", "xx"), ("Remote", "y"));
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)).title, "Remote");
    }

    #[test]
    fn merged_flags_are_sticky() {
        let (base, mut local, mut remote) = versions(("A", "x"), ("A", "local"), ("A", "remote"));
        local.is_favorite = true;
        remote.is_deleted = true;
        remote.deleted_at = Some(999);

        let merged = MERGE.resolve(&local, &remote, Some(&base));
        assert!(merged.is_favorite);
        assert!(merged.is_deleted);
        assert_eq!(merged.deleted_at, Some(999));

        local.deleted_at = Some(5);
        assert_eq!(MERGE.resolve(&local, &remote, Some(&base)).deleted_at, Some(5));
    }

    #[test]
    fn merge_without_base_degrades_to_newer_wins() {
        let local = note("A", "x", 10);
        let mut remote = local.clone();
        remote.content = "y".to_string();
        remote.updated_at = 20;
        assert_eq!(MERGE.resolve(&local, &remote, None), remote);
    }

    #[test]
    fn newer_wins_by_timestamp_with_local_tiebreak() {
        let resolver = ConflictResolver::new(ConflictStrategy::NewerWins);
        let local = note("A", "local", 10);
        let mut remote = local.clone();
        remote.content = "remote".to_string();
        remote.updated_at = 20;
        assert_eq!(resolver.resolve(&local, &remote, None), remote);

        remote.updated_at = 10;
        assert_eq!(resolver.resolve(&local, &remote, None), local);
    }

    #[test]
    fn fixed_strategies() {
        let (base, local, remote) = versions(("A", "x"), ("A", "l"), ("A", "r"));
        assert_eq!(
            ConflictResolver::new(ConflictStrategy::LocalWins).resolve(&local, &remote, Some(&base)),
            local
        );
        assert_eq!(
            ConflictResolver::new(ConflictStrategy::RemoteWins).resolve(&local, &remote, Some(&base)),
            remote
        );
    }

    #[test]
    fn detect_conflict_without_base_compares_text() {
        let local = note("A", "x", 1);
        let mut remote = local.clone();
        remote.updated_at = 2;
        assert!(!detect_conflict(&local, &remote, None));
        remote.title = "B".to_string();
        assert!(detect_conflict(&local, &remote, None));
    }

    #[test]
    fn detect_conflict_false_when_sides_agree_despite_base() {
        let (base, local, remote) = versions(("A", "x"), ("B", "y"), ("B", "y"));
        assert!(!detect_conflict(&local, &remote, Some(&base)));
    }

    #[test]
    fn strategy_names_parse() {
        for strategy in [
            ConflictStrategy::LocalWins,
            ConflictStrategy::RemoteWins,
            ConflictStrategy::NewerWins,
            ConflictStrategy::ThreeWayMerge,
        ] {
            assert_eq!(strategy.as_str().parse::<ConflictStrategy>().unwrap(), strategy);
        }
        assert!(matches!(
            "last_writer_wins".parse::<ConflictStrategy>(),
            Err(SyncError::UnknownStrategy(name)) if name == "last_writer_wins"
        ));
    }
}
