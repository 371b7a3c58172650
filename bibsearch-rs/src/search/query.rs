//! The immutable search query value handed around by callers.

use crate::config::SearchConfig;
use crate::error::{MalformedQuery, SearchError};
use crate::record::Record;
use crate::search::matcher;
use crate::search::parser::{detect_mode, parse_query};
use crate::search::sql;
use crate::search::types::QueryExpr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single search option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchFlag {
    CaseSensitive,
    RegularExpression,
    Fulltext,
}

impl SearchFlag {
    fn bit(self) -> u8 {
        match self {
            SearchFlag::CaseSensitive => 1,
            SearchFlag::RegularExpression => 1 << 1,
            SearchFlag::Fulltext => 1 << 2,
        }
    }
}

/// Set of [`SearchFlag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SearchFlags {
    bits: u8,
}

impl SearchFlags {
    pub const NONE: SearchFlags = SearchFlags { bits: 0 };

    pub fn of(flags: &[SearchFlag]) -> Self {
        flags.iter().copied().collect()
    }

    pub fn with(mut self, flag: SearchFlag) -> Self {
        self.bits |= flag.bit();
        self
    }

    pub fn without(mut self, flag: SearchFlag) -> Self {
        self.bits &= !flag.bit();
        self
    }

    pub fn contains(&self, flag: SearchFlag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.contains(SearchFlag::CaseSensitive)
    }

    pub fn is_regular_expression(&self) -> bool {
        self.contains(SearchFlag::RegularExpression)
    }

    pub fn is_fulltext(&self) -> bool {
        self.contains(SearchFlag::Fulltext)
    }
}

impl FromIterator<SearchFlag> for SearchFlags {
    fn from_iter<I: IntoIterator<Item = SearchFlag>>(iter: I) -> Self {
        iter.into_iter().fold(SearchFlags::NONE, SearchFlags::with)
    }
}

/// How the raw string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// The whole string is one substring (or regex) search over all fields.
    Contains,
    /// `field=value` expressions combined with boolean operators.
    Grammar,
}

/// A parsed search request.
///
/// Parse failures are kept inside the value: an invalid query is still a
/// `SearchQuery`, it just matches nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    raw: String,
    flags: SearchFlags,
    mode: QueryMode,
    parsed: Result<QueryExpr, MalformedQuery>,
}

impl SearchQuery {
    pub fn new(raw: impl Into<String>, flags: SearchFlags) -> Self {
        let raw = raw.into();
        let mode = detect_mode(&raw);
        let parsed = match parse_query(&raw, flags) {
            Ok(expr) => Ok(expr),
            Err(SearchError::MalformedQuery(err)) => Err(err),
            Err(other) => Err(MalformedQuery::new(raw.clone(), other.to_string())),
        };
        if let Err(err) = &parsed {
            tracing::debug!(query = %raw, reason = %err.reason, "query rejected");
        }
        Self {
            raw,
            flags,
            mode,
            parsed,
        }
    }

    /// Plain query with no flags set.
    pub fn plain(raw: impl Into<String>) -> Self {
        Self::new(raw, SearchFlags::NONE)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn flags(&self) -> SearchFlags {
        self.flags
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn is_valid(&self) -> bool {
        self.parsed.is_ok()
    }

    /// The AST, or `None` for an invalid query.
    pub fn expression(&self) -> Option<&QueryExpr> {
        self.parsed.as_ref().ok()
    }

    pub fn error(&self) -> Option<&MalformedQuery> {
        self.parsed.as_ref().err()
    }

    /// Evaluate against one record. Invalid queries match nothing.
    pub fn is_match<R: Record + ?Sized>(&self, record: &R) -> bool {
        self.expression()
            .is_some_and(|expr| matcher::is_match(expr, record))
    }

    /// Filter a collection, keeping its order. Invalid queries match nothing.
    pub fn get_matches<'a, R: Record + Sync>(&self, records: &'a [R]) -> Vec<&'a R> {
        match self.expression() {
            Some(expr) => matcher::get_matches(expr, records),
            None => Vec::new(),
        }
    }

    /// SQL against the default `(entry_id, field_name, field_value)` columns.
    pub fn to_sql(&self, table_name: &str) -> String {
        self.to_sql_with(table_name, &SearchConfig::default())
    }

    /// SQL using configured column names and keyword separator.
    pub fn to_sql_with(&self, table_name: &str, config: &SearchConfig) -> String {
        match self.expression() {
            Some(expr) => sql::to_sql_with(expr, table_name, config),
            None => sql::match_nothing(table_name, &config.sql),
        }
    }

    /// Unfielded positive terms the full-text index can answer. Empty for
    /// invalid and purely fielded queries.
    pub fn fulltext_terms(&self) -> Vec<&str> {
        self.expression()
            .map(QueryExpr::positive_terms)
            .unwrap_or_default()
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BibRecord;

    #[test]
    fn test_flags() {
        let flags = SearchFlags::of(&[SearchFlag::CaseSensitive, SearchFlag::Fulltext]);
        assert!(flags.is_case_sensitive());
        assert!(flags.is_fulltext());
        assert!(!flags.is_regular_expression());

        let flags = flags.without(SearchFlag::CaseSensitive);
        assert!(!flags.is_case_sensitive());
        assert_eq!(SearchFlags::default(), SearchFlags::NONE);
    }

    #[test]
    fn test_mode_classification() {
        assert_eq!(SearchQuery::plain("quantum").mode(), QueryMode::Contains);
        assert_eq!(SearchQuery::plain("title=quantum").mode(), QueryMode::Grammar);
        assert_eq!(
            SearchQuery::plain("\"title=quantum\"").mode(),
            QueryMode::Contains
        );
    }

    #[test]
    fn test_invalid_query_matches_nothing() {
        let query = SearchQuery::plain("(title=quantum");
        assert!(!query.is_valid());
        assert!(query.error().is_some());

        let record = BibRecord::new("r1").with_field("title", "quantum");
        assert!(!query.is_match(&record));
        assert!(query.get_matches(&[record]).is_empty());
        assert_eq!(
            query.to_sql("bib"),
            "SELECT entry_id FROM bib WHERE FALSE"
        );
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let query = SearchQuery::plain("   ");
        assert!(!query.is_valid());
        let record = BibRecord::new("r1").with_field("title", "anything");
        assert!(!query.is_match(&record));
    }

    #[test]
    fn test_fulltext_terms() {
        let query = SearchQuery::plain("neural networks");
        assert_eq!(query.fulltext_terms(), vec!["neural networks"]);

        let query = SearchQuery::plain("deep AND NOT survey AND author=smith");
        assert_eq!(query.fulltext_terms(), vec!["deep"]);

        let query = SearchQuery::plain("homology OR graph");
        assert_eq!(query.fulltext_terms(), vec!["homology", "graph"]);

        assert!(SearchQuery::plain("author=smith").fulltext_terms().is_empty());
        assert!(SearchQuery::plain("(graph").fulltext_terms().is_empty());
    }

    #[test]
    fn test_display_is_raw() {
        let query = SearchQuery::plain("author == smith");
        assert_eq!(query.to_string(), "author == smith");
    }
}
