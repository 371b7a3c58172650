//! Tokenizer and recursive descent parser for search query strings.
//!
//! A query without any comparator or upper-case boolean keyword outside
//! quotes is a *contains* query: the whole string is one substring (or
//! regex) search over all fields. Everything else goes through the grammar:
//!
//! ```text
//! query      = or_expr
//! or_expr    = and_expr ("OR" and_expr)*
//! and_expr   = unary_expr (["AND"] unary_expr)*
//! unary_expr = "NOT" unary_expr | atom
//! atom       = "(" or_expr ")" | comparison | term
//! comparison = NAME COMPARATOR value
//! value      = WORD | QUOTED
//! term       = WORD | QUOTED            (→ any-field leaf)
//! ```
//!
//! Comparators: `=` / `CONTAINS` (substring), `==` / `MATCHES` (whole word),
//! `=~` (regex). A leading `!` negates, a trailing `!` makes the comparison
//! case-sensitive, e.g. `!==!`.

use crate::error::{MalformedQuery, Result, SearchError};
use crate::record::CITATION_KEY_FIELD;
use crate::search::query::{QueryMode, SearchFlags};
use crate::search::types::*;
use regex::RegexBuilder;

// ============================================================================
// Mode detection
// ============================================================================

const GRAMMAR_KEYWORDS: &[&str] = &["AND", "OR", "NOT", "CONTAINS", "MATCHES"];

/// Decide whether a raw string is a plain contains search or a grammar query.
pub fn detect_mode(raw: &str) -> QueryMode {
    let mut in_quotes = false;
    let mut word = String::new();
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            // Escaped character: never an operator, but part of a word.
            word.push('\\');
            if let Some(next) = chars.next() {
                word.push(next);
            }
            continue;
        }
        if ch == '"' {
            in_quotes = !in_quotes;
            word.clear();
            continue;
        }
        if in_quotes {
            continue;
        }
        if ch == '=' {
            return QueryMode::Grammar;
        }
        if ch.is_whitespace() || ch == '(' || ch == ')' {
            if GRAMMAR_KEYWORDS.contains(&word.as_str()) {
                return QueryMode::Grammar;
            }
            word.clear();
        } else {
            word.push(ch);
        }
    }

    if !in_quotes && GRAMMAR_KEYWORDS.contains(&word.as_str()) {
        return QueryMode::Grammar;
    }
    QueryMode::Contains
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Comparator {
    kind: MatchKind,
    negated: bool,
    case_sensitive: bool,
}

impl Comparator {
    fn from_symbol(symbol: &str) -> Option<Self> {
        let (negated, rest) = match symbol.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, symbol),
        };
        let (case_sensitive, rest) = match rest.strip_suffix('!') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let kind = match rest {
            "=" => MatchKind::Contains,
            "==" => MatchKind::Exact,
            "=~" => MatchKind::Regex,
            _ => return None,
        };
        Some(Self {
            kind,
            negated,
            case_sensitive,
        })
    }

    fn from_keyword(word: &str) -> Option<Self> {
        let kind = match word.to_ascii_lowercase().as_str() {
            "contains" => MatchKind::Contains,
            "matches" => MatchKind::Exact,
            _ => return None,
        };
        Some(Self {
            kind,
            negated: false,
            case_sensitive: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// A bare word.
    Word(String),
    /// A double-quoted string literal (quotes removed).
    Quoted(String),
    Comparator(Comparator),
    OpenParen,
    CloseParen,
    And,
    Or,
    Not,
}

// ============================================================================
// Tokenizer
// ============================================================================

fn is_operator_char(ch: char) -> bool {
    ch == '=' || ch == '!' || ch == '~'
}

fn starts_operator(chars: &[char], i: usize) -> bool {
    chars[i] == '=' || (chars[i] == '!' && chars.get(i + 1) == Some(&'='))
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        let ch = chars[i];

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch == '(' {
            tokens.push(Token::OpenParen);
            i += 1;
            continue;
        }
        if ch == ')' {
            tokens.push(Token::CloseParen);
            i += 1;
            continue;
        }

        if ch == '"' {
            i += 1;
            let mut s = String::new();
            let mut closed = false;
            while i < len {
                if chars[i] == '\\' && i + 1 < len {
                    i += 1;
                    s.push(chars[i]);
                } else if chars[i] == '"' {
                    closed = true;
                    break;
                } else {
                    s.push(chars[i]);
                }
                i += 1;
            }
            if !closed {
                return Err(malformed(input, "Unterminated quoted string"));
            }
            i += 1; // skip closing "
            tokens.push(Token::Quoted(s));
            continue;
        }

        if starts_operator(&chars, i) {
            let start = i;
            while i < len && is_operator_char(chars[i]) {
                i += 1;
            }
            let symbol: String = chars[start..i].iter().collect();
            let comparator = Comparator::from_symbol(&symbol).ok_or_else(|| {
                malformed(input, format!("Unknown comparator '{}'", symbol))
            })?;
            tokens.push(Token::Comparator(comparator));
            continue;
        }

        // Bare word, up to whitespace, a paren, a quote or an operator.
        let mut word = String::new();
        let mut escaped = false;
        while i < len {
            let c = chars[i];
            if c == '\\' && i + 1 < len {
                escaped = true;
                word.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c.is_whitespace() || c == '(' || c == ')' || c == '"' || starts_operator(&chars, i)
            {
                break;
            }
            word.push(c);
            i += 1;
        }

        if !escaped {
            match word.to_ascii_lowercase().as_str() {
                "and" => {
                    tokens.push(Token::And);
                    continue;
                }
                "or" => {
                    tokens.push(Token::Or);
                    continue;
                }
                "not" => {
                    tokens.push(Token::Not);
                    continue;
                }
                _ => {}
            }
            if let Some(comparator) = Comparator::from_keyword(&word) {
                tokens.push(Token::Comparator(comparator));
                continue;
            }
        }

        tokens.push(Token::Word(word));
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    input: &'a str,
    flags: SearchFlags,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, flags: SearchFlags, tokens: Vec<Token>) -> Self {
        Self {
            input,
            flags,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, reason: impl Into<String>) -> SearchError {
        malformed(self.input, reason)
    }

    /// or_expr = and_expr ("OR" and_expr)*
    fn parse_or_expr(&mut self) -> Result<QueryExpr> {
        let mut children = vec![self.parse_and_expr()?];

        while self.peek() == Some(&Token::Or) {
            self.advance();
            children.push(self.parse_and_expr()?);
        }

        Ok(QueryExpr::or(children))
    }

    /// and_expr = unary_expr (["AND"] unary_expr)*
    fn parse_and_expr(&mut self) -> Result<QueryExpr> {
        let mut children = vec![self.parse_unary_expr()?];

        while let Some(tok) = self.peek() {
            match tok {
                Token::Or | Token::CloseParen => break,
                Token::And => {
                    self.advance();
                    children.push(self.parse_unary_expr()?);
                }
                _ => children.push(self.parse_unary_expr()?),
            }
        }

        Ok(QueryExpr::and(children))
    }

    /// unary_expr = "NOT" unary_expr | atom
    fn parse_unary_expr(&mut self) -> Result<QueryExpr> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let child = self.parse_unary_expr()?;
            Ok(QueryExpr::negate(child))
        } else {
            self.parse_atom()
        }
    }

    fn next_comparator(&self) -> Option<Comparator> {
        match self.peek() {
            Some(Token::Comparator(c)) => Some(*c),
            _ => None,
        }
    }

    /// atom = "(" or_expr ")" | comparison | term
    fn parse_atom(&mut self) -> Result<QueryExpr> {
        let Some(tok) = self.advance() else {
            return Err(self.error("Unexpected end of query"));
        };

        match tok {
            Token::OpenParen => {
                if self.peek() == Some(&Token::CloseParen) {
                    return Err(self.error("Empty parentheses"));
                }
                let expr = self.parse_or_expr()?;
                match self.advance() {
                    Some(Token::CloseParen) => Ok(expr),
                    _ => Err(self.error("Unbalanced parentheses: missing ')'")),
                }
            }
            Token::Word(word) => match self.next_comparator() {
                Some(comparator) => {
                    self.advance();
                    self.parse_comparison(word, comparator)
                }
                None => self.term_leaf(word),
            },
            Token::Quoted(text) => {
                if self.next_comparator().is_some() {
                    return Err(self.error("Field name must not be quoted"));
                }
                self.term_leaf(text)
            }
            Token::Comparator(_) => Err(self.error("Comparator without a field name")),
            Token::CloseParen => Err(self.error("Unbalanced parentheses: unexpected ')'")),
            Token::And | Token::Or => Err(self.error("Boolean operator is missing an operand")),
            Token::Not => {
                let child = self.parse_unary_expr()?;
                Ok(QueryExpr::negate(child))
            }
        }
    }

    /// comparison = NAME COMPARATOR value
    fn parse_comparison(&mut self, name: String, comparator: Comparator) -> Result<QueryExpr> {
        let value = match self.peek() {
            Some(Token::Word(_)) | Some(Token::Quoted(_)) => match self.advance() {
                Some(Token::Word(v)) | Some(Token::Quoted(v)) => v,
                _ => String::new(),
            },
            _ => {
                return Err(self.error(format!("Comparison on '{}' is missing its value", name)));
            }
        };

        let leaf = Leaf {
            field: field_target(&name),
            kind: comparator.kind,
            negated: comparator.negated,
            case_sensitive: comparator.case_sensitive,
            value,
        };
        self.checked(leaf)
    }

    /// Unfielded term: searches every field, inherits the query flags.
    fn term_leaf(&self, value: String) -> Result<QueryExpr> {
        let kind = if self.flags.is_regular_expression() {
            MatchKind::Regex
        } else {
            MatchKind::Contains
        };
        let leaf = Leaf {
            field: FieldTarget::AnyField,
            kind,
            negated: false,
            case_sensitive: self.flags.is_case_sensitive(),
            value,
        };
        self.checked(leaf)
    }

    fn checked(&self, leaf: Leaf) -> Result<QueryExpr> {
        if leaf.kind == MatchKind::Regex {
            RegexBuilder::new(&leaf.value)
                .case_insensitive(!leaf.case_sensitive)
                .build()
                .map_err(|e| self.error(format!("Invalid regular expression: {}", e)))?;
        }
        Ok(QueryExpr::Leaf(leaf))
    }
}

fn field_target(name: &str) -> FieldTarget {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "any" | "anyfield" => FieldTarget::AnyField,
        "anykeyword" => FieldTarget::AnyKeyword,
        "key" => FieldTarget::Named(CITATION_KEY_FIELD.to_string()),
        _ => FieldTarget::Named(lower),
    }
}

fn malformed(input: &str, reason: impl Into<String>) -> SearchError {
    SearchError::MalformedQuery(MalformedQuery::new(input, reason))
}

/// Strip one pair of quotes wrapping the whole string.
fn unquote_whole(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let inner = &s[1..s.len() - 1];
        if !inner.contains('"') {
            return inner;
        }
    }
    s
}

fn parse_contains(input: &str, flags: SearchFlags) -> Result<QueryExpr> {
    let value = unquote_whole(input.trim());
    if value.is_empty() {
        return Err(malformed(input, "Empty search query"));
    }

    let case_sensitive = flags.is_case_sensitive();
    let kind = if flags.is_regular_expression() {
        match RegexBuilder::new(value)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(_) => MatchKind::Regex,
            Err(e) => {
                // Plain search box: an unfinished pattern is searched literally.
                tracing::debug!(query = %input, error = %e, "regex did not compile, searching literally");
                MatchKind::Contains
            }
        }
    } else {
        MatchKind::Contains
    };

    Ok(QueryExpr::Leaf(Leaf {
        field: FieldTarget::AnyField,
        kind,
        negated: false,
        case_sensitive,
        value: value.to_string(),
    }))
}

/// Reject unbalanced or empty parentheses outside quotes, in either mode.
fn check_parentheses(input: &str) -> Result<()> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    // Whether only whitespace has been seen since the last unquoted '('.
    let mut just_opened = false;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
                just_opened = false;
            }
            '"' => {
                in_quotes = !in_quotes;
                just_opened = false;
            }
            _ if in_quotes => {}
            '(' => {
                depth += 1;
                just_opened = true;
            }
            ')' => {
                if just_opened {
                    return Err(malformed(input, "Empty parentheses"));
                }
                depth = depth.checked_sub(1).ok_or_else(|| {
                    malformed(input, "Unbalanced parentheses: unexpected ')'")
                })?;
            }
            c if c.is_whitespace() => {}
            _ => just_opened = false,
        }
    }

    if depth > 0 {
        return Err(malformed(input, "Unbalanced parentheses: missing ')'"));
    }
    Ok(())
}

// ============================================================================
// Public API
// ============================================================================

/// Parse a search query string into a [`QueryExpr`].
///
/// Returns [`SearchError::MalformedQuery`] for empty input, unbalanced
/// parentheses, comparators without a value and invalid regular expressions
/// in grammar queries.
pub fn parse_query(input: &str, flags: SearchFlags) -> Result<QueryExpr> {
    if input.trim().is_empty() {
        return Err(malformed(input, "Empty search query"));
    }
    check_parentheses(input)?;

    if detect_mode(input) == QueryMode::Contains {
        return parse_contains(input, flags);
    }

    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(malformed(input, "Empty search query"));
    }

    let mut parser = Parser::new(input, flags, tokens);
    let expr = parser.parse_or_expr()?;

    if let Some(tok) = parser.peek() {
        let reason = match tok {
            Token::CloseParen => "Unbalanced parentheses: unexpected ')'".to_string(),
            other => format!("Unexpected token {:?}", other),
        };
        return Err(parser.error(reason));
    }

    Ok(expr)
}

// ============================================================================
// Tests
// ============================================================================
