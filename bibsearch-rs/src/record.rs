//! Read-only view of a bibliography record, as consumed by the search core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Name of the field holding the keyword list.
pub const KEYWORDS_FIELD: &str = "keywords";

/// Name of the field holding the citation key.
pub const CITATION_KEY_FIELD: &str = "citationkey";

/// Read-only accessor over a bibliography record.
///
/// The record model lives outside the search core; search only ever reads
/// through this trait. Field names are compared lower-cased.
pub trait Record {
    /// Stable identifier used to map index hits and SQL rows back to the record.
    fn id(&self) -> &str;

    /// Value of a single field, if present.
    fn field(&self, name: &str) -> Option<&str>;

    /// All `(name, value)` pairs of the record.
    fn all_fields(&self) -> Vec<(&str, &str)>;

    /// The keyword list, one element per keyword.
    fn keywords(&self) -> Vec<String>;

    /// Paths of documents attached to the record.
    fn attached_files(&self) -> Vec<PathBuf>;
}

/// A simple in-memory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibRecord {
    id: String,
    fields: BTreeMap<String, String>,
    files: Vec<PathBuf>,
    keyword_separator: char,
}

impl BibRecord {
    /// Create an empty record with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
            files: Vec::new(),
            keyword_separator: ',',
        }
    }

    /// Builder-style field setter. Field names are stored lower-cased.
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Builder-style attachment setter.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Use a different separator when splitting the keywords field.
    pub fn with_keyword_separator(mut self, separator: char) -> Self {
        self.keyword_separator = separator;
        self
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_lowercase(), value.into());
    }

    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(&name.to_lowercase())
    }
}

impl Record for BibRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_lowercase()).map(String::as_str)
    }

    fn all_fields(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    fn keywords(&self) -> Vec<String> {
        self.field(KEYWORDS_FIELD)
            .map(|raw| {
                raw.split(self.keyword_separator)
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn attached_files(&self) -> Vec<PathBuf> {
        self.files.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_case_insensitive() {
        let record = BibRecord::new("a1").with_field("Title", "Quantum Computing");
        assert_eq!(record.field("title"), Some("Quantum Computing"));
        assert_eq!(record.field("TITLE"), Some("Quantum Computing"));
        assert_eq!(record.field("author"), None);
    }

    #[test]
    fn test_keywords_split_and_trimmed() {
        let record =
            BibRecord::new("a1").with_field("keywords", "banana, pineapple ,orange,,");
        assert_eq!(record.keywords(), vec!["banana", "pineapple", "orange"]);
    }

    #[test]
    fn test_keywords_custom_separator() {
        let record = BibRecord::new("a1")
            .with_keyword_separator(';')
            .with_field("keywords", "machine learning; graphs");
        assert_eq!(record.keywords(), vec!["machine learning", "graphs"]);
    }

    #[test]
    fn test_no_keywords() {
        let record = BibRecord::new("a1");
        assert!(record.keywords().is_empty());
    }

    #[test]
    fn test_all_fields_sorted() {
        let record = BibRecord::new("a1")
            .with_field("year", "2020")
            .with_field("author", "Smith");
        assert_eq!(
            record.all_fields(),
            vec![("author", "Smith"), ("year", "2020")]
        );
    }

    #[test]
    fn test_remove_field() {
        let mut record = BibRecord::new("a1").with_field("note", "draft");
        assert_eq!(record.remove_field("NOTE"), Some("draft".to_string()));
        assert_eq!(record.field("note"), None);
    }
}
