//! Constrained placeholder substitution: `${identifier.path}` resolved
//! against a JSON data model. No code evaluation, ever — templates are
//! data, and an unresolved placeholder is reported rather than silently
//! dropped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    // `${ident}`, `${ident.field}`, `${ident[0].field}` and so on.
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+|\[\d+\])*)\}")
        .unwrap_or_else(|e| panic!("placeholder regex must compile: {e}"))
});

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    pub rendered: String,
    /// Placeholder paths that did not resolve against the data model.
    pub unresolved: Vec<String>,
}

impl RenderOutcome {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Substitute every placeholder in `template` with its value from `data`.
/// Scalars render bare; arrays and objects render as compact JSON.
pub fn render_template(template: &str, data: &Value) -> RenderOutcome {
    let mut unresolved = Vec::new();
    let rendered = PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match resolve_path(data, path) {
                Some(value) => render_value(value),
                None => {
                    unresolved.push(path.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();
    RenderOutcome {
        rendered,
        unresolved,
    }
}

/// Root identifiers referenced by a template, for data-set projection and
/// unused-key flagging.
pub fn variable_names(template: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| {
            let path = &caps[1];
            let end = path
                .find(['.', '['])
                .unwrap_or(path.len());
            path[..end].to_string()
        })
        .collect()
}

fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in segments(path) {
        current = match segment {
            Segment::Key(key) => current.get(key)?,
            Segment::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn segments(path: &str) -> impl Iterator<Item = Segment<'_>> {
    // The regex guarantees the shape, so this split stays simple:
    // dots separate keys, brackets carry numeric indices.
    path.split('.').flat_map(|part| {
        let mut out = Vec::new();
        match part.split_once('[') {
            None => out.push(Segment::Key(part)),
            Some((head, rest)) => {
                if !head.is_empty() {
                    out.push(Segment::Key(head));
                }
                for idx in rest.split('[') {
                    if let Some(num) = idx.strip_suffix(']')
                        && let Ok(index) = num.parse()
                    {
                        out.push(Segment::Index(index));
                    }
                }
            }
        }
        out
    })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_scalars_and_paths() {
        let data = json!({"city": "Lisbon", "trip": {"days": 3, "stops": ["a", "b"]}});
        let outcome = render_template(
            "Visit ${city} for ${trip.days} days, first stop ${trip.stops[0]}.",
            &data,
        );
        assert!(outcome.is_complete());
        assert_eq!(outcome.rendered, "Visit Lisbon for 3 days, first stop a.");
    }

    #[test]
    fn unresolved_placeholders_are_reported_and_left_in_place() {
        let outcome = render_template("Hello ${name}, from ${city}", &json!({"city": "Oslo"}));
        assert_eq!(outcome.unresolved, vec!["name"]);
        assert_eq!(outcome.rendered, "Hello ${name}, from Oslo");
    }

    #[test]
    fn non_string_values_render_as_compact_json() {
        let outcome = render_template("${config}", &json!({"config": {"a": 1}}));
        assert_eq!(outcome.rendered, r#"{"a":1}"#);
    }

    #[test]
    fn variable_names_extracts_root_identifiers() {
        let names = variable_names("${a.b} and ${c[0]} and ${a} but not $plain or ${9bad}");
        let expected: BTreeSet<String> = ["a".to_string(), "c".to_string()].into();
        assert_eq!(names, expected);
    }
}
