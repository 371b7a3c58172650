//! The tantivy-backed attachment index for one bibliography.

use super::extract::{DocumentReader, PlainTextReader};
use super::schema::{doc_key, register_tokenizers, IndexFields};
use super::{clear_index, CancellationToken, IndexMeta, RebuildReport};
use crate::config::FullTextConfig;
use crate::error::{Result, SearchError};
use crate::record::Record;
use crate::search::{FieldTarget, MatchKind, QueryExpr};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

/// Mutable half of the index, guarded by one reader/writer lock.
///
/// Writes (rebuild, update, add, remove, close) hold the write lock for
/// their whole duration and reload the reader before releasing it, so a
/// search sees either the state before a write or after it.
struct IndexState {
    writer: Option<IndexWriter>,
    closed: bool,
}

/// An attached file as it currently exists on disk.
struct CurrentFile {
    entry_id: String,
    path: PathBuf,
    modified: u64,
}

/// Full-text index over the attached documents of one bibliography.
pub struct FullTextIndex {
    index: Index,
    reader: IndexReader,
    fields: IndexFields,
    state: RwLock<IndexState>,
    document_reader: Box<dyn DocumentReader>,
    /// `None` for in-memory indexes.
    index_dir: Option<PathBuf>,
    config: FullTextConfig,
    freshness_checked: AtomicBool,
}

impl FullTextIndex {
    /// Open the index in `index_dir`, creating it if needed.
    ///
    /// An index written with another schema version or analyzer is discarded
    /// and starts out empty.
    pub fn open(index_dir: &Path, config: &FullTextConfig) -> Result<Self> {
        if let Some(meta) = IndexMeta::load(index_dir) {
            if !meta.is_compatible(config) {
                tracing::info!(dir = %index_dir.display(), "Index format changed, discarding old index");
                clear_index(index_dir)?;
            }
        }

        fs::create_dir_all(index_dir).map_err(|e| {
            SearchError::IndexUnavailable(format!("Failed to create index directory: {}", e))
        })?;
        let directory = MmapDirectory::open(index_dir)
            .map_err(|e| SearchError::IndexUnavailable(format!("Failed to open index: {}", e)))?;
        let index = Index::open_or_create(directory, IndexFields::build_schema())
            .map_err(|e| SearchError::IndexUnavailable(format!("Failed to open index: {}", e)))?;

        tracing::debug!(dir = %index_dir.display(), "Opened full-text index");
        Self::from_index(index, Some(index_dir.to_path_buf()), config)
    }

    /// A throwaway index held in RAM.
    pub fn in_memory(config: &FullTextConfig) -> Result<Self> {
        let index = Index::create_in_ram(IndexFields::build_schema());
        Self::from_index(index, None, config)
    }

    fn from_index(index: Index, index_dir: Option<PathBuf>, config: &FullTextConfig) -> Result<Self> {
        register_tokenizers(&index, config.analyzer);
        let fields = IndexFields::from_schema(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::IndexUnavailable(format!("Failed to open reader: {}", e)))?;

        Ok(Self {
            index,
            reader,
            fields,
            state: RwLock::new(IndexState {
                writer: None,
                closed: false,
            }),
            document_reader: Box::new(PlainTextReader),
            index_dir,
            config: config.clone(),
            freshness_checked: AtomicBool::new(false),
        })
    }

    /// Use a different text extractor for attached files.
    pub fn with_document_reader(mut self, reader: impl DocumentReader + 'static) -> Self {
        self.document_reader = Box::new(reader);
        self
    }

    pub fn index_dir(&self) -> Option<&Path> {
        self.index_dir.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Number of indexed documents (one per attached file).
    pub fn num_documents(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Drop everything and index the attachments of `records` from scratch.
    ///
    /// Missing or unreadable files are logged and skipped. Cancelling stops
    /// before the next file; documents added so far stay in the index.
    pub fn rebuild_index<R: Record>(
        &self,
        records: &[R],
        cancel: &CancellationToken,
    ) -> Result<RebuildReport> {
        tracing::info!(records = records.len(), "Rebuilding full-text index");

        let report = self.write(|writer| {
            writer.delete_all_documents()?;

            let mut report = RebuildReport::default();
            'records: for record in records {
                for path in record.attached_files() {
                    if cancel.is_cancelled() {
                        report.cancelled = true;
                        break 'records;
                    }
                    match self.build_document(record.id(), &path) {
                        Some(doc) => {
                            writer.add_document(doc)?;
                            report.indexed += 1;
                        }
                        None => report.skipped += 1,
                    }
                }
            }
            Ok(report)
        })?;

        self.record_meta(|meta| meta.last_rebuild = Some(now()));
        tracing::info!(
            indexed = report.indexed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Full-text index rebuilt"
        );
        Ok(report)
    }

    /// Bring the index in line with `records` without starting over.
    ///
    /// Documents whose file or record disappeared are removed; new files and
    /// files with a different modification time are (re)indexed.
    pub fn update_index<R: Record>(
        &self,
        records: &[R],
        cancel: &CancellationToken,
    ) -> Result<RebuildReport> {
        let current = current_files(records);

        let report = self.write(|writer| {
            let indexed = self.indexed_files()?;
            let mut report = RebuildReport::default();

            for key in indexed.keys() {
                if !current.contains_key(key) {
                    writer.delete_term(Term::from_field_text(self.fields.doc_key, key));
                    report.removed += 1;
                }
            }

            for (key, file) in &current {
                if indexed.get(key) == Some(&file.modified) {
                    continue;
                }
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                writer.delete_term(Term::from_field_text(self.fields.doc_key, key));
                match self.build_document(&file.entry_id, &file.path) {
                    Some(doc) => {
                        writer.add_document(doc)?;
                        report.indexed += 1;
                    }
                    None => report.skipped += 1,
                }
            }
            Ok(report)
        })?;

        self.record_meta(|meta| meta.last_update = Some(now()));
        tracing::info!(
            indexed = report.indexed,
            removed = report.removed,
            skipped = report.skipped,
            "Full-text index updated"
        );
        Ok(report)
    }

    /// Replace the documents of one record with its current attachments.
    pub fn index_record<R: Record + ?Sized>(&self, record: &R) -> Result<RebuildReport> {
        self.write(|writer| {
            writer.delete_term(Term::from_field_text(self.fields.entry_id, record.id()));

            let mut report = RebuildReport::default();
            for path in record.attached_files() {
                match self.build_document(record.id(), &path) {
                    Some(doc) => {
                        writer.add_document(doc)?;
                        report.indexed += 1;
                    }
                    None => report.skipped += 1,
                }
            }
            Ok(report)
        })
    }

    /// Remove every document owned by `entry_id`.
    pub fn remove_record(&self, entry_id: &str) -> Result<()> {
        self.write(|writer| {
            writer.delete_term(Term::from_field_text(self.fields.entry_id, entry_id));
            Ok(())
        })
    }

    /// Run `f` with the writer, then commit and reload the reader.
    fn write<T>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        if state.closed {
            return Err(closed());
        }

        let writer = match state.writer.take() {
            Some(writer) => writer,
            None => self.index.writer(self.config.writer_heap_size).map_err(|e| {
                SearchError::IndexUnavailable(format!("Failed to create index writer: {}", e))
            })?,
        };
        let writer = state.writer.insert(writer);

        let out = match f(writer) {
            Ok(out) => out,
            Err(e) => {
                // Drop staged changes so the next write starts clean.
                if let Err(rollback) = writer.rollback() {
                    tracing::warn!(error = %rollback, "Failed to roll back index writer");
                }
                return Err(e);
            }
        };
        writer.commit()?;
        self.reader.reload()?;
        Ok(out)
    }

    /// Read and wrap one attached file. `None` means the file was skipped.
    fn build_document(&self, entry_id: &str, path: &Path) -> Option<TantivyDocument> {
        let Some(modified) = file_mtime(path) else {
            tracing::warn!(entry = entry_id, path = %path.display(), "Attached file not found, skipping");
            return None;
        };
        let text = match self.document_reader.extract_text(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(entry = entry_id, error = %e, "Skipping document");
                return None;
            }
        };

        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.entry_id, entry_id);
        doc.add_text(self.fields.doc_key, doc_key(entry_id, path));
        doc.add_text(self.fields.path, path.to_string_lossy());
        doc.add_u64(self.fields.modified, modified);
        doc.add_text(self.fields.content, &text);
        doc.add_text(self.fields.content_exact, &text);
        Some(doc)
    }

    fn record_meta(&self, update: impl FnOnce(&mut IndexMeta)) {
        let Some(dir) = &self.index_dir else {
            return;
        };
        let mut meta = IndexMeta::load(dir).unwrap_or_default();
        meta.analyzer = self.config.analyzer;
        meta.indexed_documents = self.num_documents() as usize;
        update(&mut meta);
        if let Err(e) = meta.save(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to write index metadata");
        }
    }

    /// Commit pending work and release the writer.
    ///
    /// Every later operation fails with [`SearchError::IndexUnavailable`].
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        if let Some(mut writer) = state.writer.take() {
            writer.commit()?;
            writer.wait_merging_threads()?;
        }
        tracing::debug!(dir = ?self.index_dir, "Closed full-text index");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Ids of the records whose attachments contain every token of `term`.
    ///
    /// Case-insensitive searches go through the configured analyzer (so with
    /// the default one, "networks" also finds "network"); case-sensitive ones
    /// compare the original spelling of each token.
    pub fn search(&self, term: &str, case_sensitive: bool) -> Result<HashSet<String>> {
        let state = self.state.read();
        if state.closed {
            return Err(closed());
        }

        let field = self.content_field(case_sensitive);
        let Some(query) = self.term_query(field, term)? else {
            return Ok(HashSet::new());
        };
        let ids = self.matching_ids(query.as_ref())?;
        tracing::debug!(term, case_sensitive, hits = ids.len(), "Full-text search");
        Ok(ids)
    }

    /// Ids of the records whose attachments satisfy the unfielded terms of
    /// `expr`, keeping its AND/OR structure.
    ///
    /// Only positive any-field leaves reach the index; fielded, regex and
    /// negated leaves are left to the field matcher. NOT flips AND and OR
    /// below it, so `NOT (NOT a OR NOT b)` asks for both `a` and `b`.
    pub fn search_expr(&self, expr: &QueryExpr, case_sensitive: bool) -> Result<HashSet<String>> {
        let state = self.state.read();
        if state.closed {
            return Err(closed());
        }

        let field = self.content_field(case_sensitive);
        let Some(query) = self.expr_query(expr, field, false)? else {
            return Ok(HashSet::new());
        };
        let ids = self.matching_ids(query.as_ref())?;
        tracing::debug!(case_sensitive, hits = ids.len(), "Full-text expression search");
        Ok(ids)
    }

    fn content_field(&self, case_sensitive: bool) -> Field {
        if case_sensitive {
            self.fields.content_exact
        } else {
            self.fields.content
        }
    }

    fn expr_query(
        &self,
        expr: &QueryExpr,
        field: Field,
        inverted: bool,
    ) -> Result<Option<Box<dyn Query>>> {
        match expr {
            QueryExpr::Leaf(leaf) => {
                if leaf.field != FieldTarget::AnyField
                    || leaf.kind == MatchKind::Regex
                    || leaf.negated != inverted
                {
                    return Ok(None);
                }
                self.term_query(field, &leaf.value)
            }
            QueryExpr::And { children } | QueryExpr::Or { children } => {
                let conjunction = matches!(expr, QueryExpr::And { .. }) != inverted;
                let occur = if conjunction { Occur::Must } else { Occur::Should };
                let mut clauses = Vec::new();
                for child in children {
                    if let Some(query) = self.expr_query(child, field, inverted)? {
                        clauses.push((occur, query));
                    }
                }
                Ok(combine(clauses))
            }
            QueryExpr::Not { child } => self.expr_query(child, field, !inverted),
        }
    }

    /// Every analyzed token of `text` must occur.
    fn term_query(&self, field: Field, text: &str) -> Result<Option<Box<dyn Query>>> {
        let clauses = self
            .analyze(field, text)?
            .iter()
            .map(|token| {
                let query = TermQuery::new(
                    Term::from_field_text(field, token),
                    IndexRecordOption::Basic,
                );
                (Occur::Must, Box::new(query) as Box<dyn Query>)
            })
            .collect();
        Ok(combine(clauses))
    }

    fn matching_ids(&self, query: &dyn Query) -> Result<HashSet<String>> {
        let searcher = self.reader.searcher();
        let mut ids = HashSet::new();
        for address in searcher.search(query, &DocSetCollector)? {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.fields.entry_id).and_then(|v| v.as_str()) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }

    fn analyze(&self, field: Field, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// `doc_key` → indexed modification time for every document.
    fn indexed_files(&self) -> Result<HashMap<String, u64>> {
        let searcher = self.reader.searcher();
        let mut files = HashMap::new();
        for address in searcher.search(&AllQuery, &DocSetCollector)? {
            let doc: TantivyDocument = searcher.doc(address)?;
            let key = doc.get_first(self.fields.doc_key).and_then(|v| v.as_str());
            let modified = doc.get_first(self.fields.modified).and_then(|v| v.as_u64());
            if let (Some(key), Some(modified)) = (key, modified) {
                files.insert(key.to_string(), modified);
            }
        }
        Ok(files)
    }

    /// Paths of the indexed files, sorted.
    pub fn indexed_paths(&self) -> Result<Vec<PathBuf>> {
        if self.is_closed() {
            return Err(closed());
        }
        let searcher = self.reader.searcher();
        let mut paths = Vec::new();
        for address in searcher.search(&AllQuery, &DocSetCollector)? {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(path) = doc.get_first(self.fields.path).and_then(|v| v.as_str()) {
                paths.push(PathBuf::from(path));
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Whether the attachments of `records` differ from what is indexed
    /// (files added, removed, or modified since they were indexed).
    pub fn is_stale<R: Record>(&self, records: &[R]) -> Result<bool> {
        if self.is_closed() {
            return Err(closed());
        }
        let indexed = self.indexed_files()?;
        let current = current_files(records);

        Ok(indexed.len() != current.len()
            || current
                .iter()
                .any(|(key, file)| indexed.get(key) != Some(&file.modified)))
    }

    /// Bring a freshly opened index up to date, once per open.
    ///
    /// Called before the first full-text search. Once a check (and any
    /// update it triggers) has succeeded, later calls return immediately; a
    /// failed check is retried on the next call.
    pub fn ensure_fresh<R: Record>(&self, records: &[R]) -> Result<()> {
        if self.freshness_checked.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.is_stale(records)? {
            tracing::info!("Full-text index is stale, updating");
            self.update_index(records, &CancellationToken::new())?;
        }
        self.freshness_checked.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for FullTextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullTextIndex")
            .field("index_dir", &self.index_dir)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn closed() -> SearchError {
    SearchError::IndexUnavailable("index is closed".to_string())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Modification time in milliseconds since the epoch.
/// `None` for no clauses, the clause itself for one, a boolean query otherwise.
fn combine(mut clauses: Vec<(Occur, Box<dyn Query>)>) -> Option<Box<dyn Query>> {
    match clauses.len() {
        0 => None,
        1 => clauses.pop().map(|(_, query)| query),
        _ => Some(Box::new(BooleanQuery::new(clauses))),
    }
}

fn file_mtime(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as u64)
}

/// Attached files that exist on disk, keyed by `doc_key`.
fn current_files<R: Record>(records: &[R]) -> BTreeMap<String, CurrentFile> {
    let mut files = BTreeMap::new();
    for record in records {
        for path in record.attached_files() {
            if let Some(modified) = file_mtime(&path) {
                files.insert(
                    doc_key(record.id(), &path),
                    CurrentFile {
                        entry_id: record.id().to_string(),
                        path,
                        modified,
                    },
                );
            }
        }
    }
    files
}
