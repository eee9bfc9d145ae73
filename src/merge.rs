//! Line-level three-way merge.
//!
//! Conservative by design: any pair of edits whose base regions touch is
//! treated as a conflict and the merge returns `None`, leaving the path for
//! per-file resolution. Identical edits on both sides collapse to one.

use similar::{DiffOp, TextDiff};

/// One side's edit against the base, in base line coordinates.
///
/// `old_start == old_end` is a pure insertion before line `old_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    old_start: usize,
    old_end: usize,
    new_lines: Vec<String>,
}

/// Merge `local` and `remote` against their common `base`.
///
/// Returns the merged text, or `None` when edits overlap and a manual
/// decision is required.
pub fn three_way(base: &str, local: &str, remote: &str) -> Option<String> {
    if local == remote {
        return Some(local.to_string());
    }
    if base == local {
        return Some(remote.to_string());
    }
    if base == remote {
        return Some(local.to_string());
    }

    let base_lines: Vec<&str> = split_lines(base);
    let local_edits = side_edits(base, local);
    let remote_edits = side_edits(base, remote);

    // Tag and order all edits by base position.
    let mut all: Vec<(Side, Edit)> = Vec::new();
    all.extend(local_edits.into_iter().map(|e| (Side::Local, e)));
    all.extend(remote_edits.into_iter().map(|e| (Side::Remote, e)));
    all.sort_by_key(|(_, e)| (e.old_start, e.old_end));

    // Group touching edits; a group containing both sides must be identical
    // to merge cleanly.
    let mut merged_edits: Vec<Edit> = Vec::new();
    let mut i = 0;
    while i < all.len() {
        let mut group = vec![all[i].clone()];
        let mut group_end = all[i].1.old_end;
        let mut j = i + 1;
        while j < all.len() && touches(group_end, &all[j].1) {
            group_end = group_end.max(all[j].1.old_end);
            group.push(all[j].clone());
            j += 1;
        }

        let has_local = group.iter().any(|(s, _)| *s == Side::Local);
        let has_remote = group.iter().any(|(s, _)| *s == Side::Remote);
        if has_local && has_remote {
            let locals: Vec<&Edit> = group
                .iter()
                .filter(|(s, _)| *s == Side::Local)
                .map(|(_, e)| e)
                .collect();
            let remotes: Vec<&Edit> = group
                .iter()
                .filter(|(s, _)| *s == Side::Remote)
                .map(|(_, e)| e)
                .collect();
            if locals.len() == remotes.len()
                && locals.iter().zip(remotes.iter()).all(|(a, b)| a == b)
            {
                merged_edits.extend(locals.into_iter().cloned());
            } else {
                return None; // overlapping, conflicting edits
            }
        } else {
            merged_edits.extend(group.into_iter().map(|(_, e)| e));
        }
        i = j;
    }

    // Apply merged edits over the base.
    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize;
    for edit in &merged_edits {
        out.extend(
            base_lines[cursor..edit.old_start]
                .iter()
                .map(|s| s.to_string()),
        );
        out.extend(edit.new_lines.iter().cloned());
        cursor = edit.old_end;
    }
    out.extend(base_lines[cursor..].iter().map(|s| s.to_string()));

    Some(out.concat())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Whether `next` touches a group ending at base line `group_end`.
///
/// Adjacency counts as touching: an insertion at the boundary of another
/// side's change is ambiguous, so it conflicts.
fn touches(group_end: usize, next: &Edit) -> bool {
    next.old_start <= group_end
}

fn split_lines(text: &str) -> Vec<&str> {
    // Keep line terminators so merging preserves the file byte-for-byte.
    let mut out = Vec::new();
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            out.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn side_edits(base: &str, side: &str) -> Vec<Edit> {
    let diff = TextDiff::from_lines(base, side);
    let side_lines: Vec<&str> = split_lines(side);
    let mut edits = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => edits.push(Edit {
                old_start: old_index,
                old_end: old_index + old_len,
                new_lines: Vec::new(),
            }),
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => edits.push(Edit {
                old_start: old_index,
                old_end: old_index,
                new_lines: side_lines[new_index..new_index + new_len]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => edits.push(Edit {
                old_start: old_index,
                old_end: old_index + old_len,
                new_lines: side_lines[new_index..new_index + new_len]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        }
    }
    edits
}
