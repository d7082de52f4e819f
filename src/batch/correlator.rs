//! Result correlation.
//!
//! Joins a result file back onto a manifest by `custom_id`. A manifest id
//! with no result surfaces as [`RecordError::MissingCorrelation`]; a result
//! with no `choices[0].message.content` as a schema violation.

use crate::artifact::{read_jsonl, read_jsonl_lenient};
use crate::models::{CompletionResult, ManifestEntry, RecordError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Results of one batch, addressable by correlation id.
#[derive(Debug, Default)]
pub struct ResultSet {
    results: HashMap<String, CompletionResult>,
    malformed: usize,
}

impl ResultSet {
    pub fn from_results(results: impl IntoIterator<Item = CompletionResult>) -> Self {
        let mut map = HashMap::new();
        let mut duplicates = 0;
        for result in results {
            if let Some(previous) = map.insert(result.custom_id.clone(), result) {
                warn!(custom_id = %previous.custom_id, "Duplicate result id, keeping the later one");
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            warn!(duplicates, "Result file repeats correlation ids");
        }
        Self {
            results: map,
            malformed: 0,
        }
    }

    /// Load a result file; undecodable lines are counted, not fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let (results, malformed) = read_jsonl_lenient(path)?;
        let mut set = Self::from_results(results);
        set.malformed = malformed;
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Lines in the source file that did not decode.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn get(&self, custom_id: &str) -> std::result::Result<&CompletionResult, RecordError> {
        self.results
            .get(custom_id)
            .ok_or_else(|| RecordError::MissingCorrelation {
                custom_id: custom_id.to_string(),
            })
    }

    /// Completion text for `custom_id`.
    pub fn text(&self, custom_id: &str) -> std::result::Result<&str, RecordError> {
        self.get(custom_id)?
            .text()
            .ok_or_else(|| RecordError::schema(format!("result {custom_id} has no message content")))
    }

    /// Texts in manifest order.
    pub fn ordered<'a>(
        &'a self,
        manifest: &'a [ManifestEntry],
    ) -> impl Iterator<Item = std::result::Result<&'a str, RecordError>> + 'a {
        manifest.iter().map(|entry| self.text(&entry.custom_id))
    }
}

/// A manifest grouped by source record, in manifest order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    groups: Vec<(usize, Vec<ManifestEntry>)>,
    len: usize,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        let len = entries.len();
        let mut groups: Vec<(usize, Vec<ManifestEntry>)> = Vec::new();
        let mut positions: HashMap<usize, usize> = HashMap::new();

        for entry in entries {
            match positions.get(&entry.record) {
                Some(&pos) => groups[pos].1.push(entry),
                None => {
                    positions.insert(entry.record, groups.len());
                    groups.push((entry.record, vec![entry]));
                }
            }
        }

        Self { groups, len }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_jsonl(path)?))
    }

    /// (record index, entries) pairs in first-appearance order.
    pub fn groups(&self) -> &[(usize, Vec<ManifestEntry>)] {
        &self.groups
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.groups.iter().flat_map(|(_, entries)| entries)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: usize, record: usize, replica: usize) -> ManifestEntry {
        ManifestEntry {
            custom_id: format!("request-{id}"),
            record,
            replica,
        }
    }

    #[test]
    fn test_lookup_and_missing() {
        let set = ResultSet::from_results([
            CompletionResult::success("request-1", "one"),
            CompletionResult::success("request-3", "three"),
        ]);

        assert_eq!(set.text("request-1"), Ok("one"));
        assert_eq!(
            set.text("request-2"),
            Err(RecordError::MissingCorrelation {
                custom_id: "request-2".into()
            })
        );
    }

    #[test]
    fn test_result_without_content_is_schema_violation() {
        let mut empty = CompletionResult::success("request-1", "x");
        empty.response = None;
        let set = ResultSet::from_results([empty]);
        assert!(matches!(
            set.text("request-1"),
            Err(RecordError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_reordered_results_follow_manifest() {
        let set = ResultSet::from_results([
            CompletionResult::success("request-2", "b"),
            CompletionResult::success("request-1", "a"),
        ]);
        let manifest = vec![entry(1, 0, 0), entry(2, 0, 1)];
        let texts: Vec<_> = set.ordered(&manifest).collect();
        assert_eq!(texts, vec![Ok("a"), Ok("b")]);
    }

    #[test]
    fn test_manifest_groups_by_record() {
        let manifest = Manifest::new(vec![
            entry(1, 4, 0),
            entry(2, 4, 1),
            entry(3, 9, 0),
            entry(4, 4, 2),
        ]);
        assert_eq!(manifest.len(), 4);
        let groups = manifest.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, 4);
        assert_eq!(groups[0].1.len(), 3);
        assert_eq!(groups[1].0, 9);
    }

    #[test]
    fn test_load_counts_malformed_lines() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("out.jsonl");
        let good = serde_json::to_string(&CompletionResult::success("request-1", "ok")).unwrap();
        std::fs::write(&path, format!("{good}\n{{\"oops\": 1}}\n")).unwrap();

        let set = ResultSet::load(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.malformed(), 1);
    }
}
