//! Comment reporting: scope classification and contradiction detection.
//!
//! Scope is decided by path. A line comment on a file the PR changes is in
//! scope; one on any other file is out of scope (usually a reviewer
//! commenting on context lines or a stale diff); a comment with no path is
//! general.
//!
//! Contradictions are detected per thread by tone. If a thread's latest
//! comment read as approving on the previous poll and now asks for changes
//! (or the reverse), the reviewers have changed their minds and a human
//! should look.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::types::{ReviewComment, ThreadId};

/// Where a comment points relative to the PR diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentScope {
    InScope,
    OutOfScope,
    General,
}

/// Classifies one comment.
///
/// When the changed-file list is unavailable every line comment counts as in
/// scope, so nothing is hidden from the report.
pub fn classify(comment: &ReviewComment, changed_files: Option<&BTreeSet<String>>) -> CommentScope {
    match (comment.path.as_deref(), changed_files) {
        (None, _) => CommentScope::General,
        (Some(_), None) => CommentScope::InScope,
        (Some(path), Some(files)) if files.contains(path) => CommentScope::InScope,
        (Some(_), Some(_)) => CommentScope::OutOfScope,
    }
}

/// Comment counts by scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommentReport {
    pub in_scope: usize,
    pub out_of_scope: usize,
    pub general: usize,
}

impl CommentReport {
    pub fn build<'a>(
        comments: impl IntoIterator<Item = &'a ReviewComment>,
        changed_files: Option<&BTreeSet<String>>,
    ) -> Self {
        let mut report = CommentReport::default();
        for comment in comments {
            match classify(comment, changed_files) {
                CommentScope::InScope => report.in_scope += 1,
                CommentScope::OutOfScope => report.out_of_scope += 1,
                CommentScope::General => report.general += 1,
            }
        }
        report
    }

    pub fn total(&self) -> usize {
        self.in_scope + self.out_of_scope + self.general
    }
}

/// Coarse reading of a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    Approving,
    RequestingChanges,
    Neutral,
}

const APPROVING_PHRASES: &[&str] = &[
    "lgtm",
    "looks good",
    "approved",
    "no issues",
    "no further changes",
    "nothing to change",
    "this is fine",
];

const REQUESTING_PHRASES: &[&str] = &[
    "must ",
    "should be changed",
    "please change",
    "please fix",
    "needs to",
    "change this",
    "incorrect",
    "this is wrong",
];

/// Matched as whole words so that "debug" does not read as "bug".
const REQUESTING_WORDS: &[&str] = &["bug", "bugs", "buggy"];

/// Reads the tone of a comment body. Approval wins when both appear.
pub fn tone(body: &str) -> Tone {
    let lower = body.to_lowercase();
    if APPROVING_PHRASES.iter().any(|p| lower.contains(p)) {
        Tone::Approving
    } else if REQUESTING_PHRASES.iter().any(|p| lower.contains(p))
        || lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| REQUESTING_WORDS.contains(&w))
    {
        Tone::RequestingChanges
    } else {
        Tone::Neutral
    }
}

/// Per-thread tone history across polls.
#[derive(Debug, Clone, Default)]
pub struct ToneTracker {
    previous: BTreeMap<ThreadId, Tone>,
    contradictions: usize,
}

impl ToneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records this poll's comments and returns the threads whose tone
    /// flipped since the previous poll.
    ///
    /// The latest comment in each thread sets the thread's tone; neutral
    /// comments keep the previous reading.
    pub fn observe(&mut self, comments: &[ReviewComment]) -> Vec<ThreadId> {
        let mut latest: BTreeMap<&ThreadId, Tone> = BTreeMap::new();
        for comment in comments {
            let t = tone(&comment.body);
            if t != Tone::Neutral {
                latest.insert(&comment.thread_id, t);
            }
        }

        let mut flipped = vec![];
        for (thread, now) in latest {
            let before = self.previous.insert(thread.clone(), now);
            if matches!(
                (before, now),
                (Some(Tone::Approving), Tone::RequestingChanges)
                    | (Some(Tone::RequestingChanges), Tone::Approving)
            ) {
                flipped.push(thread.clone());
            }
        }
        self.contradictions += flipped.len();
        flipped
    }

    /// Flips seen over the whole run.
    pub fn contradictions(&self) -> usize {
        self.contradictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_comment, comment, thread};
    use proptest::prelude::*;

    fn files(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn in_thread(id: &str, body: &str) -> ReviewComment {
        thread(id, comment("copilot", Some("a.rs"), body)).comments.remove(0)
    }

    #[test]
    fn scope_by_path() {
        let changed = files(&["src/a.rs"]);
        assert_eq!(
            classify(&comment("x", Some("src/a.rs"), "hm"), Some(&changed)),
            CommentScope::InScope
        );
        assert_eq!(
            classify(&comment("x", Some("src/b.rs"), "hm"), Some(&changed)),
            CommentScope::OutOfScope
        );
        assert_eq!(
            classify(&comment("x", None, "hm"), Some(&changed)),
            CommentScope::General
        );
    }

    #[test]
    fn unknown_diff_counts_line_comments_in_scope() {
        assert_eq!(
            classify(&comment("x", Some("src/b.rs"), "hm"), None),
            CommentScope::InScope
        );
    }

    #[test]
    fn report_counts() {
        let changed = files(&["a.rs"]);
        let comments = vec![
            comment("x", Some("a.rs"), "1"),
            comment("x", Some("b.rs"), "2"),
            comment("x", None, "3"),
            comment("x", Some("a.rs"), "4"),
        ];
        let report = CommentReport::build(&comments, Some(&changed));
        assert_eq!(
            report,
            CommentReport {
                in_scope: 2,
                out_of_scope: 1,
                general: 1
            }
        );
    }

    #[test]
    fn tone_reading() {
        assert_eq!(tone("LGTM, thanks"), Tone::Approving);
        assert_eq!(tone("This must be wrapped in a Result"), Tone::RequestingChanges);
        assert_eq!(tone("Why is this here?"), Tone::Neutral);
        assert_eq!(tone("No issues found, but needs to be rebased"), Tone::Approving);
    }

    #[test]
    fn bug_matches_whole_words_only() {
        assert_eq!(tone("Off-by-one bug in the loop bound"), Tone::RequestingChanges);
        assert_eq!(tone("Bugs: the index can overflow."), Tone::RequestingChanges);
        assert_eq!(tone("Added a debug log here"), Tone::Neutral);
        assert_eq!(tone("Useful while debugging"), Tone::Neutral);
    }

    #[test]
    fn debug_follow_up_is_not_a_flip() {
        let mut tracker = ToneTracker::new();
        tracker.observe(&[in_thread("T1", "Looks good to me")]);
        assert!(tracker.observe(&[in_thread("T1", "Left a debug print for now")]).is_empty());
        assert_eq!(tracker.contradictions(), 0);
    }

    #[test]
    fn flip_is_a_contradiction() {
        let mut tracker = ToneTracker::new();
        assert!(tracker.observe(&[in_thread("T1", "Looks good to me")]).is_empty());

        let flipped = tracker.observe(&[in_thread("T1", "Please fix the off-by-one")]);
        assert_eq!(flipped, vec![ThreadId::new("T1")]);
        assert_eq!(tracker.contradictions(), 1);
    }

    #[test]
    fn neutral_follow_up_keeps_tone() {
        let mut tracker = ToneTracker::new();
        tracker.observe(&[in_thread("T1", "lgtm")]);
        assert!(tracker.observe(&[in_thread("T1", "ok")]).is_empty());
        assert!(tracker.observe(&[in_thread("T1", "lgtm")]).is_empty());
        assert_eq!(tracker.contradictions(), 0);
    }

    #[test]
    fn separate_threads_do_not_interfere() {
        let mut tracker = ToneTracker::new();
        tracker.observe(&[in_thread("T1", "lgtm")]);
        assert!(tracker.observe(&[in_thread("T2", "please fix")]).is_empty());
    }

    proptest! {
        #[test]
        fn report_partitions_comments(comments in prop::collection::vec(arb_comment(), 0..20)) {
            let changed = files(&["a.rs", "b.rs"]);
            let report = CommentReport::build(&comments, Some(&changed));
            prop_assert_eq!(report.total(), comments.len());
        }

        #[test]
        fn repeating_a_poll_never_contradicts(comments in prop::collection::vec(arb_comment(), 0..10)) {
            let mut tracker = ToneTracker::new();
            tracker.observe(&comments);
            prop_assert!(tracker.observe(&comments).is_empty());
        }
    }
}
