use serde::{Deserialize, Serialize};
use similar::{DiffOp, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Remove,
    Replace,
}

/// A single textual edit. `position` is a character offset (Unicode scalar
/// values) into the text as it stands after all prior patches in the sequence
/// have been applied, which makes it an offset into the new text. Both
/// `compute_diff` and `apply_diff` hold to this convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub kind: PatchKind,
    pub position: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub old_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_text: String,
}

/// Ordered patch sequence plus aggregate change counts. Patches must be
/// replayed in stored order; reordering them invalidates the offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub patches: Vec<Patch>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

#[derive(Debug)]
pub enum PatchError {
    OutOfBounds { patch: usize, position: usize },
    Mismatch { patch: usize, position: usize },
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds { patch, position } => {
                write!(f, "patch {patch} at offset {position} is out of bounds")
            }
            Self::Mismatch { patch, position } => {
                write!(
                    f,
                    "patch {patch} at offset {position} does not match the base text"
                )
            }
        }
    }
}

impl std::error::Error for PatchError {}

/// Character-level Myers diff folded into ordered add/remove/replace patches.
pub fn compute_diff(old: &str, new: &str) -> Diff {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let text_diff = TextDiff::from_chars(old, new);

    let mut diff = Diff::default();
    for op in text_diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => {
                diff.removed += old_len;
                diff.patches.push(Patch {
                    kind: PatchKind::Remove,
                    position: new_index,
                    old_text: old_chars[old_index..old_index + old_len].iter().collect(),
                    new_text: String::new(),
                });
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                diff.added += new_len;
                diff.patches.push(Patch {
                    kind: PatchKind::Add,
                    position: new_index,
                    old_text: String::new(),
                    new_text: new_chars[new_index..new_index + new_len].iter().collect(),
                });
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                diff.added += new_len;
                diff.removed += old_len;
                diff.modified += 1;
                diff.patches.push(Patch {
                    kind: PatchKind::Replace,
                    position: new_index,
                    old_text: old_chars[old_index..old_index + old_len].iter().collect(),
                    new_text: new_chars[new_index..new_index + new_len].iter().collect(),
                });
            }
        }
    }
    diff
}

/// Replays `diff` against `base`. Each patch verifies the fragment it removes
/// before touching the text, so a stale diff fails instead of corrupting
/// content.
pub fn apply_diff(base: &str, diff: &Diff) -> Result<String, PatchError> {
    let mut text: Vec<char> = base.chars().collect();
    for (idx, patch) in diff.patches.iter().enumerate() {
        let at = patch.position;
        let old_len = patch.old_text.chars().count();
        if at > text.len() || at + old_len > text.len() {
            return Err(PatchError::OutOfBounds {
                patch: idx,
                position: at,
            });
        }
        let existing: String = text[at..at + old_len].iter().collect();
        if existing != patch.old_text {
            return Err(PatchError::Mismatch {
                patch: idx,
                position: at,
            });
        }
        text.splice(at..at + old_len, patch.new_text.chars());
    }
    Ok(text.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::{PatchError, PatchKind, apply_diff, compute_diff};

    fn round_trip(old: &str, new: &str) {
        let diff = compute_diff(old, new);
        let rebuilt = apply_diff(old, &diff).expect("replay");
        assert_eq!(rebuilt, new, "round trip failed for {old:?} -> {new:?}");
    }

    #[test]
    fn round_trips_plain_edits() {
        round_trip("", "");
        round_trip("", "a fresh chapter");
        round_trip("everything must go", "");
        round_trip("the quick brown fox", "the slow brown fox");
        round_trip("line one\nline two\n", "line one\nline 2\nline three\n");
        round_trip("identical", "identical");
    }

    #[test]
    fn round_trips_multibyte_text() {
        round_trip("南柯一梦", "南柯一梦，醒来仍是长安");
        round_trip("第一章：雪夜", "第一章：血夜");
        round_trip("café", "cafés ☕");
    }

    #[test]
    fn identical_texts_produce_empty_diff() {
        let diff = compute_diff("same", "same");
        assert!(diff.is_empty());
        assert_eq!((diff.added, diff.removed, diff.modified), (0, 0, 0));
    }

    #[test]
    fn pure_append_is_a_single_add_patch() {
        let diff = compute_diff("A", "AB");
        assert_eq!(diff.patches.len(), 1);
        assert_eq!(diff.patches[0].kind, PatchKind::Add);
        assert_eq!(diff.patches[0].position, 1);
        assert_eq!(diff.patches[0].new_text, "B");
        assert_eq!((diff.added, diff.removed, diff.modified), (1, 0, 0));
    }

    #[test]
    fn counts_track_patch_contents() {
        let diff = compute_diff("abcdef", "abXYef");
        let added: usize = diff
            .patches
            .iter()
            .map(|p| p.new_text.chars().count())
            .sum();
        let removed: usize = diff
            .patches
            .iter()
            .map(|p| p.old_text.chars().count())
            .sum();
        let replaces = diff
            .patches
            .iter()
            .filter(|p| p.kind == PatchKind::Replace)
            .count();
        assert_eq!(diff.added, added);
        assert_eq!(diff.removed, removed);
        assert_eq!(diff.modified, replaces);
        assert!(diff.modified >= 1);
    }

    #[test]
    fn patches_replay_against_the_evolving_text() {
        // Two disjoint edits: the second patch offset is only valid once the
        // first has been applied.
        let old = "aaa mmm zzz";
        let new = "aaaa mmm zz";
        let diff = compute_diff(old, new);
        assert!(diff.patches.len() >= 2);
        assert_eq!(apply_diff(old, &diff).expect("replay"), new);
    }

    #[test]
    fn stale_diff_is_rejected() {
        let diff = compute_diff("original text", "revised text");
        let err = apply_diff("divergent base", &diff).expect_err("must not apply");
        assert!(matches!(
            err,
            PatchError::Mismatch { .. } | PatchError::OutOfBounds { .. }
        ));
    }

    #[test]
    fn truncated_base_is_out_of_bounds() {
        let diff = compute_diff("a longer base text", "a longer base text!");
        let err = apply_diff("short", &diff).expect_err("must not apply");
        assert!(matches!(err, PatchError::OutOfBounds { .. }));
    }

    #[test]
    fn diff_survives_json_round_trip() {
        let diff = compute_diff("first draft", "second draft");
        let json = serde_json::to_string(&diff).expect("encode");
        let back: super::Diff = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, diff);
    }
}
