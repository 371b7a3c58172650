//! Search over a whole record collection, combining field matching with the
//! attachment index and recording the query in the history.

use crate::error::Result;
use crate::fulltext::FullTextIndex;
use crate::record::Record;
use crate::search::{SearchHistory, SearchQuery};
use std::collections::HashSet;

/// Search entry point for one open bibliography.
///
/// Borrows everything it uses; build one per search or keep it around as
/// long as the records slice lives.
pub struct LibrarySearch<'a, R> {
    records: &'a [R],
    fulltext: Option<&'a FullTextIndex>,
    history: Option<&'a SearchHistory>,
}

impl<'a, R: Record + Sync> LibrarySearch<'a, R> {
    pub fn new(records: &'a [R]) -> Self {
        Self {
            records,
            fulltext: None,
            history: None,
        }
    }

    /// Consult `index` for queries with the full-text flag set.
    pub fn with_fulltext(mut self, index: &'a FullTextIndex) -> Self {
        self.fulltext = Some(index);
        self
    }

    /// Remember every valid query in `history`.
    pub fn with_history(mut self, history: &'a SearchHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Records matching `query`, in collection order.
    ///
    /// With the full-text flag, records whose attachments satisfy the
    /// query's unfielded terms (with their AND/OR structure) are added to
    /// the field matches. Invalid
    /// queries match nothing. Errors come only from the full-text index;
    /// callers can fall back to [`LibrarySearch::search_fields_only`].
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<&'a R>> {
        if !query.is_valid() {
            return Ok(Vec::new());
        }
        if let Some(history) = self.history {
            history.add_search(query.raw());
        }

        let matches = query.get_matches(self.records);

        let (Some(index), true) = (self.fulltext, query.flags().is_fulltext()) else {
            return Ok(matches);
        };
        let Some(expr) = query.expression() else {
            return Ok(matches);
        };
        if query.fulltext_terms().is_empty() {
            return Ok(matches);
        }

        index.ensure_fresh(self.records)?;
        let hits = index.search_expr(expr, query.flags().is_case_sensitive())?;
        tracing::debug!(
            query = %query,
            field_matches = matches.len(),
            fulltext_hits = hits.len(),
            "Library search"
        );
        if hits.is_empty() {
            return Ok(matches);
        }

        let field_ids: HashSet<&str> = matches.iter().map(|r| r.id()).collect();
        Ok(self
            .records
            .iter()
            .filter(|r| field_ids.contains(r.id()) || hits.contains(r.id()))
            .collect())
    }

    /// Field matching only; never touches the index.
    pub fn search_fields_only(&self, query: &SearchQuery) -> Vec<&'a R> {
        query.get_matches(self.records)
    }
}
