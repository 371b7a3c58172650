//! Bibsearch - query parsing and search backends for bibliography databases.
//!
//! # Overview
//!
//! A search string is parsed once into a [`QueryExpr`] and then evaluated by
//! any of the backends:
//! - in-memory matching against [`Record`]s (parallel over collections)
//! - SQL generation for a normalized `(entry_id, field_name, field_value)` table
//! - full-text search over attached documents, backed by tantivy
//!
//! Two query styles are accepted. A plain string such as `quantum computing`
//! is a substring search over every field. Anything with a comparator or an
//! upper-case boolean keyword is a grammar query:
//!
//! ```text
//! author = smith AND (title == graph OR year =~ "^20")
//! NOT keywords != draft
//! anykeyword == pineapple
//! ```
//!
//! Queries that fail to parse never raise; they are kept as invalid
//! [`SearchQuery`] values that match nothing.
//!
//! # Example
//!
//! ```
//! use bibsearch::{BibRecord, SearchQuery};
//!
//! let records = vec![
//!     BibRecord::new("knuth1984")
//!         .with_field("title", "Literate Programming")
//!         .with_field("author", "Donald E. Knuth"),
//!     BibRecord::new("dijkstra1968")
//!         .with_field("title", "Go To Statement Considered Harmful")
//!         .with_field("author", "Edsger W. Dijkstra"),
//! ];
//!
//! let query = SearchQuery::plain("author=knuth");
//! let found = query.get_matches(&records);
//! assert_eq!(found.len(), 1);
//!
//! assert_eq!(
//!     query.to_sql("bib"),
//!     "SELECT entry_id FROM bib WHERE (field_name = 'author' AND field_value ~* 'knuth')"
//! );
//! ```

pub mod config;
pub mod error;
pub mod fulltext;
pub mod library;
pub mod record;
pub mod search;

// Re-export main types at crate root
pub use config::SearchConfig;
pub use error::{MalformedQuery, Result, SearchError};
pub use fulltext::{CancellationToken, FullTextIndex, RebuildReport};
pub use library::LibrarySearch;
pub use record::{BibRecord, Record};
pub use search::{
    FieldTarget, Leaf, MatchKind, QueryExpr, QueryMode, SearchFlag, SearchFlags, SearchHistory,
    SearchHistoryEntry, SearchQuery,
};
