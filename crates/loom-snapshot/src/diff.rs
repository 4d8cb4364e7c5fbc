use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// One node of a structural diff. Paths use dotted notation for object
/// keys and bracketed indices for arrays, e.g. `a.b[2].c`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diff {
    #[serde(rename = "type")]
    pub kind: DiffKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl Diff {
    fn unchanged(path: String, value: &Value) -> Self {
        Self {
            kind: DiffKind::Unchanged,
            path,
            old_value: Some(value.clone()),
            new_value: Some(value.clone()),
        }
    }

    fn added(path: String, new_value: &Value) -> Self {
        Self {
            kind: DiffKind::Added,
            path,
            old_value: None,
            new_value: Some(new_value.clone()),
        }
    }

    fn removed(path: String, old_value: &Value) -> Self {
        Self {
            kind: DiffKind::Removed,
            path,
            old_value: Some(old_value.clone()),
            new_value: None,
        }
    }

    fn modified(path: String, old_value: &Value, new_value: &Value) -> Self {
        Self {
            kind: DiffKind::Modified,
            path,
            old_value: Some(old_value.clone()),
            new_value: Some(new_value.clone()),
        }
    }
}

/// Recursive structural diff of two JSON values.
///
/// Equal subtrees collapse to a single `unchanged` entry. A `null` on
/// exactly one side reads as added/removed, a type mismatch as modified.
/// Arrays are compared index-wise up to the longer length; objects over
/// the union of their keys (sorted, for deterministic output).
pub fn deep_compare(a: &Value, b: &Value) -> Vec<Diff> {
    let mut out = Vec::new();
    walk(a, b, String::new(), &mut out);
    out
}

fn walk(a: &Value, b: &Value, path: String, out: &mut Vec<Diff>) {
    if a == b {
        out.push(Diff::unchanged(path, a));
        return;
    }
    match (a, b) {
        (Value::Null, _) => out.push(Diff::added(path, b)),
        (_, Value::Null) => out.push(Diff::removed(path, a)),
        (Value::Array(left), Value::Array(right)) => {
            for i in 0..left.len().max(right.len()) {
                let child = format!("{path}[{i}]");
                match (left.get(i), right.get(i)) {
                    (Some(l), Some(r)) => walk(l, r, child, out),
                    (Some(l), None) => out.push(Diff::removed(child, l)),
                    (None, Some(r)) => out.push(Diff::added(child, r)),
                    (None, None) => unreachable!(),
                }
            }
        }
        (Value::Object(left), Value::Object(right)) => {
            let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match (left.get(key), right.get(key)) {
                    (Some(l), Some(r)) => walk(l, r, child, out),
                    (Some(l), None) => out.push(Diff::removed(child, l)),
                    (None, Some(r)) => out.push(Diff::added(child, r)),
                    (None, None) => unreachable!(),
                }
            }
        }
        // Same-type scalars with different values, or a type mismatch.
        _ => out.push(Diff::modified(path, a, b)),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// A diff report with the noise (`unchanged` entries) stripped out.
#[derive(Clone, Debug, Serialize)]
pub struct Comparison {
    pub has_changes: bool,
    pub total_changes: usize,
    pub diffs: Vec<Diff>,
    pub summary: DiffSummary,
}

pub fn create_comparison(old: &Value, new: &Value) -> Comparison {
    let diffs: Vec<Diff> = deep_compare(old, new)
        .into_iter()
        .filter(|d| d.kind != DiffKind::Unchanged)
        .collect();
    let mut summary = DiffSummary::default();
    for diff in &diffs {
        match diff.kind {
            DiffKind::Added => summary.added += 1,
            DiffKind::Removed => summary.removed += 1,
            DiffKind::Modified => summary.modified += 1,
            DiffKind::Unchanged => {}
        }
    }
    Comparison {
        has_changes: !diffs.is_empty(),
        total_changes: diffs.len(),
        diffs,
        summary,
    }
}
