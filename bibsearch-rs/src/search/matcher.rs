//! Predicate evaluation against a [`Record`].

use crate::error::Result;
use crate::record::{Record, KEYWORDS_FIELD};
use crate::search::types::*;
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};

/// A query with every leaf pattern compiled, ready to run over many records.
///
/// Patterns live only as long as this value; nothing is cached across calls.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(CompiledLeaf),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

#[derive(Debug, Clone)]
struct CompiledLeaf {
    field: FieldTarget,
    negated: bool,
    pattern: Regex,
}

impl CompiledQuery {
    pub fn compile(expr: &QueryExpr) -> Result<Self> {
        Ok(Self {
            root: compile_node(expr)?,
        })
    }

    pub fn is_match<R: Record + ?Sized>(&self, record: &R) -> bool {
        evaluate(&self.root, record)
    }
}

fn compile_node(expr: &QueryExpr) -> Result<Node> {
    Ok(match expr {
        QueryExpr::Leaf(leaf) => Node::Leaf(CompiledLeaf {
            field: leaf.field.clone(),
            negated: leaf.negated,
            pattern: leaf_pattern(leaf)?,
        }),
        QueryExpr::And { children } => {
            Node::And(children.iter().map(compile_node).collect::<Result<_>>()?)
        }
        QueryExpr::Or { children } => {
            Node::Or(children.iter().map(compile_node).collect::<Result<_>>()?)
        }
        QueryExpr::Not { child } => Node::Not(Box::new(compile_node(child)?)),
    })
}

/// Build the regex a leaf is evaluated with.
///
/// Exact matches on the keyword pseudo-field compare whole keywords; on any
/// other target they compare whole words.
pub fn leaf_pattern(leaf: &Leaf) -> Result<Regex> {
    let pattern = match (leaf.kind, &leaf.field) {
        (MatchKind::Regex, _) => leaf.value.clone(),
        (MatchKind::Contains, _) => regex::escape(&leaf.value),
        (MatchKind::Exact, FieldTarget::AnyKeyword) => {
            format!("^{}$", regex::escape(&leaf.value))
        }
        (MatchKind::Exact, _) => whole_word(&leaf.value),
    };
    Ok(RegexBuilder::new(&pattern)
        .case_insensitive(!leaf.case_sensitive)
        .build()?)
}

/// `\b` only works next to a word character; a value such as `C++` is
/// bounded by a non-word character or the end of the text instead.
fn whole_word(value: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let start = match value.chars().next() {
        Some(c) if !is_word(c) => r"(?:^|\W)",
        _ => r"\b",
    };
    let end = match value.chars().last() {
        Some(c) if !is_word(c) => r"(?:$|\W)",
        _ => r"\b",
    };
    format!("{}{}{}", start, regex::escape(value), end)
}

fn evaluate<R: Record + ?Sized>(node: &Node, record: &R) -> bool {
    match node {
        Node::Leaf(leaf) => evaluate_leaf(leaf, record),
        Node::And(children) => children.iter().all(|child| evaluate(child, record)),
        Node::Or(children) => children.iter().any(|child| evaluate(child, record)),
        Node::Not(child) => !evaluate(child, record),
    }
}

fn evaluate_leaf<R: Record + ?Sized>(leaf: &CompiledLeaf, record: &R) -> bool {
    // A negated leaf holds when some candidate value fails the pattern.
    let test = |value: &str| leaf.pattern.is_match(value) != leaf.negated;

    match &leaf.field {
        FieldTarget::AnyField => record
            .all_fields()
            .into_iter()
            .any(|(_, value)| test(value)),
        // Negated: the record has a keyword list and no element matches.
        FieldTarget::AnyKeyword => {
            record.field(KEYWORDS_FIELD).is_some()
                && record
                    .keywords()
                    .iter()
                    .any(|keyword| leaf.pattern.is_match(keyword))
                    != leaf.negated
        }
        FieldTarget::Named(name) => record.field(name).is_some_and(test),
    }
}

/// Evaluate a query against a single record.
///
/// A leaf whose pattern does not compile makes the whole query match nothing.
pub fn is_match<R: Record + ?Sized>(expr: &QueryExpr, record: &R) -> bool {
    match CompiledQuery::compile(expr) {
        Ok(compiled) => compiled.is_match(record),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping query with uncompilable pattern");
            false
        }
    }
}

/// Filter `records` down to those matching `expr`, preserving order.
///
/// Patterns are compiled once and shared by the worker threads.
pub fn get_matches<'a, R: Record + Sync>(expr: &QueryExpr, records: &'a [R]) -> Vec<&'a R> {
    let compiled = match CompiledQuery::compile(expr) {
        Ok(compiled) => compiled,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping query with uncompilable pattern");
            return Vec::new();
        }
    };

    records
        .par_iter()
        .filter(|record| compiled.is_match(*record))
        .collect()
}
