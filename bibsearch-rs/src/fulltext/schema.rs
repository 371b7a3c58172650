//! Tantivy schema and analyzers for the attachment index.
//!
//! # Fields
//!
//! | Field           | Options                | Purpose                              |
//! |-----------------|------------------------|--------------------------------------|
//! | `entry_id`      | STRING, STORED         | owning record, maps hits back        |
//! | `doc_key`       | STRING, STORED         | `entry_id` + path, one per document  |
//! | `path`          | STRING, STORED         | attached file                        |
//! | `modified`      | u64, STORED            | file mtime (ms) at index time        |
//! | `content`       | `bib_text` analyzer    | case-folded search                   |
//! | `content_exact` | `bib_cased` analyzer   | case-sensitive search                |

use crate::config::Analyzer;
use crate::error::Result;
use std::path::Path;
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer,
};
use tantivy::Index;

/// Bump when the field layout or analyzers change; older indexes are rebuilt.
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) const TEXT_TOKENIZER: &str = "bib_text";
pub(crate) const CASED_TOKENIZER: &str = "bib_cased";

const MAX_TOKEN_LEN: usize = 40;

/// Separates the record id from the path in `doc_key`.
const KEY_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexFields {
    pub entry_id: Field,
    pub doc_key: Field,
    pub path: Field,
    pub modified: Field,
    pub content: Field,
    pub content_exact: Field,
}

impl IndexFields {
    pub fn build_schema() -> Schema {
        let mut builder = Schema::builder();

        builder.add_text_field("entry_id", STRING | STORED);
        builder.add_text_field("doc_key", STRING | STORED);
        builder.add_text_field("path", STRING | STORED);
        builder.add_u64_field("modified", STORED);
        builder.add_text_field("content", text_options(TEXT_TOKENIZER));
        builder.add_text_field("content_exact", text_options(CASED_TOKENIZER));

        builder.build()
    }

    /// Resolve field handles from an opened index's schema.
    pub fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            entry_id: schema.get_field("entry_id")?,
            doc_key: schema.get_field("doc_key")?,
            path: schema.get_field("path")?,
            modified: schema.get_field("modified")?,
            content: schema.get_field("content")?,
            content_exact: schema.get_field("content_exact")?,
        })
    }
}

fn text_options(tokenizer: &str) -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(tokenizer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

/// Register both analyzers with an index.
///
/// Must be called after every create/open; tantivy does not persist
/// custom tokenizers.
pub(crate) fn register_tokenizers(index: &Index, analyzer: Analyzer) {
    let text = match analyzer {
        Analyzer::EnglishStem => TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build(),
        Analyzer::Lowercase => TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .build(),
    };
    let cased = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .build();

    index.tokenizers().register(TEXT_TOKENIZER, text);
    index.tokenizers().register(CASED_TOKENIZER, cased);
}

pub(crate) fn doc_key(entry_id: &str, path: &Path) -> String {
    format!("{}{}{}", entry_id, KEY_SEPARATOR, path.display())
}
