//! Query parsing and the field-level search backends.

pub mod history;
pub mod matcher;
pub mod parser;
pub mod query;
pub mod sql;
pub mod types;

pub use history::{SearchHistory, SearchHistoryEntry};
pub use matcher::{get_matches, is_match, CompiledQuery};
pub use parser::{detect_mode, parse_query};
pub use query::{QueryMode, SearchFlag, SearchFlags, SearchQuery};
pub use sql::{to_sql, to_sql_with, where_predicate};
pub use types::*;
