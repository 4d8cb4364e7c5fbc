use loom_store::mint_id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// One row of substitution data, shared across every prompt that
/// references the same variable set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableRow {
    pub id: String,
    pub position: usize,
    pub values: BTreeMap<String, String>,
    pub visible: bool,
}

impl VariableRow {
    pub fn new(position: usize, values: BTreeMap<String, String>) -> Self {
        Self {
            id: mint_id("row"),
            position,
            values,
            visible: true,
        }
    }

    /// Variable names required by linked prompts but absent from this row.
    pub fn missing_keys(&self, required: &BTreeSet<String>) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.values.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Keys no linked prompt declares. Flagged for the caller, never
    /// deleted.
    pub fn unused_keys(&self, required: &BTreeSet<String>) -> Vec<String> {
        self.values
            .keys()
            .filter(|key| !required.contains(*key))
            .cloned()
            .collect()
    }

    /// The row as a JSON object, ready for template resolution.
    pub fn as_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.values {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Value::Object(map)
    }
}

/// A projection over the global row collection: rows whose value keys
/// match this exact variable-name set. Not independently persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSet {
    pub id: String,
    pub variable_names: BTreeSet<String>,
}

impl DataSet {
    pub fn new(variable_names: BTreeSet<String>) -> Self {
        Self {
            id: mint_id("dataset"),
            variable_names,
        }
    }

    /// Select the rows belonging to this set, ordered by `position`.
    pub fn rows<'a>(&self, all_rows: &'a [VariableRow]) -> Vec<&'a VariableRow> {
        let mut rows: Vec<&VariableRow> = all_rows
            .iter()
            .filter(|row| {
                let keys: BTreeSet<String> = row.values.keys().cloned().collect();
                keys == self.variable_names
            })
            .collect();
        rows.sort_by_key(|row| row.position);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(position: usize, pairs: &[(&str, &str)]) -> VariableRow {
        VariableRow::new(
            position,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn missing_and_unused_keys_are_flagged_not_fixed() {
        let row = row(0, &[("city", "Lisbon"), ("stale", "x")]);
        let required: BTreeSet<String> = ["city".to_string(), "tone".to_string()].into();
        assert_eq!(row.missing_keys(&required), vec!["tone"]);
        assert_eq!(row.unused_keys(&required), vec!["stale"]);
        // The unused key is still there.
        assert!(row.values.contains_key("stale"));
    }

    #[test]
    fn datasets_project_rows_with_an_exact_key_match() {
        let rows = vec![
            row(1, &[("city", "Lisbon")]),
            row(0, &[("city", "Oslo")]),
            row(2, &[("city", "Lima"), ("tone", "dry")]),
        ];
        let set = DataSet::new(["city".to_string()].into());
        let selected: Vec<&str> = set
            .rows(&rows)
            .iter()
            .map(|r| r.values["city"].as_str())
            .collect();
        // Exact key match only, ordered by position.
        assert_eq!(selected, vec!["Oslo", "Lisbon"]);
    }
}
