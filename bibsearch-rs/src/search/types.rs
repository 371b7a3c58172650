//! Query AST for bibliography search.

use serde::{Deserialize, Serialize};

/// A search query AST node.
///
/// Built once by the parser and shared, unchanged, by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryExpr {
    /// A single field comparison.
    Leaf(Leaf),
    /// All children must match (logical AND). Always two or more children.
    And { children: Vec<QueryExpr> },
    /// At least one child must match (logical OR). Always two or more children.
    Or { children: Vec<QueryExpr> },
    /// The child must NOT match.
    Not { child: Box<QueryExpr> },
}

/// Which part of a record a leaf looks at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target", content = "name", rename_all = "snake_case")]
pub enum FieldTarget {
    /// Every field of the record.
    AnyField,
    /// Each element of the keyword list.
    AnyKeyword,
    /// One concrete field, lower-cased.
    Named(String),
}

/// How a leaf compares its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Substring match.
    Contains,
    /// Whole-word match (the value must sit on word boundaries).
    Exact,
    /// The value is a regular expression.
    Regex,
}

/// A leaf predicate: field target, comparator, value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leaf {
    pub field: FieldTarget,
    pub kind: MatchKind,
    pub negated: bool,
    pub case_sensitive: bool,
    pub value: String,
}

impl Leaf {
    pub fn new(field: FieldTarget, kind: MatchKind, value: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            negated: false,
            case_sensitive: false,
            value: value.into(),
        }
    }

    /// Case-insensitive substring leaf over all fields.
    pub fn any_field(value: impl Into<String>) -> Self {
        Self::new(FieldTarget::AnyField, MatchKind::Contains, value)
    }

    /// Case-insensitive substring leaf on a named field.
    pub fn field(name: &str, value: impl Into<String>) -> Self {
        Self::new(
            FieldTarget::Named(name.to_lowercase()),
            MatchKind::Contains,
            value,
        )
    }

    pub fn with_kind(mut self, kind: MatchKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }
}

impl From<Leaf> for QueryExpr {
    fn from(leaf: Leaf) -> Self {
        QueryExpr::Leaf(leaf)
    }
}

impl QueryExpr {
    /// Combine with AND; a single child is returned unchanged.
    pub fn and(mut children: Vec<QueryExpr>) -> QueryExpr {
        if children.len() == 1 {
            children.remove(0)
        } else {
            QueryExpr::And { children }
        }
    }

    /// Combine with OR; a single child is returned unchanged.
    pub fn or(mut children: Vec<QueryExpr>) -> QueryExpr {
        if children.len() == 1 {
            children.remove(0)
        } else {
            QueryExpr::Or { children }
        }
    }

    pub fn negate(child: QueryExpr) -> QueryExpr {
        QueryExpr::Not {
            child: Box::new(child),
        }
    }

    /// All leaves in left-to-right order.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            QueryExpr::Leaf(leaf) => out.push(leaf),
            QueryExpr::And { children } | QueryExpr::Or { children } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            QueryExpr::Not { child } => child.collect_leaves(out),
        }
    }

    /// Values of the unfielded leaves that must be present for a match.
    ///
    /// Leaves under an odd number of negations (or negated themselves) are
    /// skipped; these values are what gets sent to the full-text index.
    pub fn positive_terms(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_positive_terms(false, &mut out);
        out
    }

    fn collect_positive_terms<'a>(&'a self, inverted: bool, out: &mut Vec<&'a str>) {
        match self {
            QueryExpr::Leaf(leaf) => {
                if leaf.field == FieldTarget::AnyField
                    && leaf.kind != MatchKind::Regex
                    && leaf.negated == inverted
                    && !leaf.value.trim().is_empty()
                {
                    out.push(&leaf.value);
                }
            }
            QueryExpr::And { children } | QueryExpr::Or { children } => {
                for child in children {
                    child.collect_positive_terms(inverted, out);
                }
            }
            QueryExpr::Not { child } => child.collect_positive_terms(!inverted, out),
        }
    }
}
