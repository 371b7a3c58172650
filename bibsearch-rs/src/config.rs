//! Search configuration: SQL naming, full-text analyzer, history bound.

use crate::error::{Result, SearchError};
use crate::record::BibRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default heap size for the full-text index writer (50MB).
pub const DEFAULT_WRITER_HEAP_SIZE: usize = 50_000_000;

/// Default number of remembered searches.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Top-level configuration for the search core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub sql: SqlConfig,
    pub fulltext: FullTextConfig,
    pub history: HistoryConfig,
    /// Separator used to split the `keywords` field into a keyword list.
    pub keyword_separator: char,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sql: SqlConfig::default(),
            fulltext: FullTextConfig::default(),
            history: HistoryConfig::default(),
            keyword_separator: ',',
        }
    }
}

impl SearchConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SearchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// An empty record that splits its keywords with the configured separator.
    pub fn record(&self, id: impl Into<String>) -> BibRecord {
        BibRecord::new(id).with_keyword_separator(self.keyword_separator)
    }

    fn validate(&self) -> Result<()> {
        if self.history.capacity == 0 {
            return Err(SearchError::Config(
                "history.capacity must be at least 1".to_string(),
            ));
        }
        let columns = &self.sql;
        for name in [&columns.entry_id, &columns.field_name, &columns.field_value] {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(SearchError::Config(format!(
                    "Invalid SQL column name: '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Column naming of the normalized `(entry_id, field_name, field_value)` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub entry_id: String,
    pub field_name: String,
    pub field_value: String,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            entry_id: "entry_id".to_string(),
            field_name: "field_name".to_string(),
            field_value: "field_value".to_string(),
        }
    }
}

/// Text analyzer used for the case-folded full-text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analyzer {
    /// Lower-casing plus English stemming.
    #[default]
    EnglishStem,
    /// Lower-casing only.
    Lowercase,
}

/// Where the full-text index for a bibliography is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexLocation {
    /// Under the user cache directory, keyed by a hash of the bibliography path.
    #[default]
    Global,
    /// Next to the bibliography file.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullTextConfig {
    pub analyzer: Analyzer,
    pub location: IndexLocation,
    pub writer_heap_size: usize,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            analyzer: Analyzer::default(),
            location: IndexLocation::default(),
            writer_heap_size: DEFAULT_WRITER_HEAP_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.sql.entry_id, "entry_id");
        assert_eq!(config.sql.field_name, "field_name");
        assert_eq!(config.sql.field_value, "field_value");
        assert_eq!(config.fulltext.analyzer, Analyzer::EnglishStem);
        assert_eq!(config.history.capacity, 10);
        assert_eq!(config.keyword_separator, ',');
    }

    #[test]
    fn test_partial_toml() {
        let config = SearchConfig::from_toml_str(
            r#"
            keyword_separator = ";"

            [fulltext]
            analyzer = "lowercase"
            location = "local"

            [history]
            capacity = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.fulltext.analyzer, Analyzer::Lowercase);
        assert_eq!(config.fulltext.location, IndexLocation::Local);
        assert_eq!(config.fulltext.writer_heap_size, DEFAULT_WRITER_HEAP_SIZE);
        assert_eq!(config.history.capacity, 3);
        assert_eq!(config.keyword_separator, ';');
        assert_eq!(config.sql, SqlConfig::default());
    }

    #[test]
    fn test_keyword_separator_reaches_records_and_sql() {
        use crate::record::Record;
        use crate::search::SearchQuery;

        let config = SearchConfig::from_toml_str("keyword_separator = \";\"\n").unwrap();
        let record = config
            .record("r1")
            .with_field("keywords", "machine learning; graphs");
        assert_eq!(record.keywords(), vec!["machine learning", "graphs"]);

        let query = SearchQuery::plain("anykeyword==graphs");
        assert!(query.is_match(&record));
        assert!(query.to_sql_with("bib", &config).contains(r"(^|;)\s*graphs\s*(;|$)"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = SearchConfig::from_toml_str("[history]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_column_name() {
        let err =
            SearchConfig::from_toml_str("[sql]\nfield_value = \"x; DROP TABLE\"\n").unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchConfig::load(&temp_dir.path().join("search.toml")).unwrap();
        assert_eq!(config, SearchConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("search.toml");
        fs::write(&path, "[sql]\nentry_id = \"id\"\n").unwrap();

        let config = SearchConfig::load(&path).unwrap();
        assert_eq!(config.sql.entry_id, "id");
        assert_eq!(config.sql.field_name, "field_name");
    }
}
