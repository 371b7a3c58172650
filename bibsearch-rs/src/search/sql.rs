//! Compile a query into a PostgreSQL `SELECT` over a normalized
//! `(entry_id, field_name, field_value)` table.
//!
//! Values are interpolated as string literals with `'` doubled; nothing is
//! parameterized.

use crate::config::{SearchConfig, SqlConfig};
use crate::record::KEYWORDS_FIELD;
use crate::search::types::*;

/// SQL against the default column names and keyword separator.
pub fn to_sql(expr: &QueryExpr, table_name: &str) -> String {
    to_sql_with(expr, table_name, &SearchConfig::default())
}

/// SQL using the configured column names and keyword separator.
pub fn to_sql_with(expr: &QueryExpr, table_name: &str, config: &SearchConfig) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        config.sql.entry_id,
        table_name,
        where_predicate(expr, config)
    )
}

/// The `WHERE` condition alone.
pub fn where_predicate(expr: &QueryExpr, config: &SearchConfig) -> String {
    predicate(expr, &Dialect::from(config))
}

/// What leaf rendering needs from the configuration.
struct Dialect<'a> {
    columns: &'a SqlConfig,
    keyword_separator: char,
}

impl<'a> From<&'a SearchConfig> for Dialect<'a> {
    fn from(config: &'a SearchConfig) -> Self {
        Self {
            columns: &config.sql,
            keyword_separator: config.keyword_separator,
        }
    }
}

/// The statement used for queries that failed to parse.
pub fn match_nothing(table_name: &str, columns: &SqlConfig) -> String {
    format!("SELECT {} FROM {} WHERE FALSE", columns.entry_id, table_name)
}

fn predicate(expr: &QueryExpr, dialect: &Dialect) -> String {
    match expr {
        QueryExpr::Leaf(leaf) => leaf_predicate(leaf, dialect),
        QueryExpr::And { children } => join(children, " AND ", dialect),
        QueryExpr::Or { children } => join(children, " OR ", dialect),
        QueryExpr::Not { child } => format!("NOT{}", operand(child, dialect)),
    }
}

fn join(children: &[QueryExpr], separator: &str, dialect: &Dialect) -> String {
    children
        .iter()
        .map(|child| operand(child, dialect))
        .collect::<Vec<_>>()
        .join(separator)
}

/// A predicate wrapped in exactly one pair of parentheses.
fn operand(expr: &QueryExpr, dialect: &Dialect) -> String {
    match expr {
        // Leaves render already parenthesized.
        QueryExpr::Leaf(leaf) => leaf_predicate(leaf, dialect),
        _ => format!("({})", predicate(expr, dialect)),
    }
}

fn leaf_predicate(leaf: &Leaf, dialect: &Dialect) -> String {
    let columns = dialect.columns;
    let op = operator(leaf);
    let value = quote(&pattern(leaf, dialect.keyword_separator));

    match &leaf.field {
        FieldTarget::AnyField => format!("({} {} '{}')", columns.field_value, op, value),
        FieldTarget::AnyKeyword => format!(
            "({} = '{}' AND {} {} '{}')",
            columns.field_name, KEYWORDS_FIELD, columns.field_value, op, value
        ),
        FieldTarget::Named(name) => format!(
            "({} = '{}' AND {} {} '{}')",
            columns.field_name,
            quote(name),
            columns.field_value,
            op,
            value
        ),
    }
}

/// `~` family: `!` for negation, `*` for case-insensitive.
fn operator(leaf: &Leaf) -> String {
    let mut op = String::with_capacity(3);
    if leaf.negated {
        op.push('!');
    }
    op.push('~');
    if !leaf.case_sensitive {
        op.push('*');
    }
    op
}

/// The POSIX regular expression matched against `field_value`.
pub(crate) fn pattern(leaf: &Leaf, keyword_separator: char) -> String {
    match (leaf.kind, &leaf.field) {
        (MatchKind::Regex, _) => leaf.value.clone(),
        (MatchKind::Contains, _) => escape_regex(&leaf.value),
        // One element of the stored keyword list.
        (MatchKind::Exact, FieldTarget::AnyKeyword) => {
            let sep = escape_regex(&keyword_separator.to_string());
            format!(
                r"(^|{sep})\s*{}\s*({sep}|$)",
                escape_regex(&leaf.value),
                sep = sep
            )
        }
        (MatchKind::Exact, _) => whole_word(&leaf.value),
    }
}

/// `\y` next to word characters, a non-word character or the text edge
/// next to symbols (`C++`).
fn whole_word(value: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let start = match value.chars().next() {
        Some(c) if !is_word(c) => r"(^|\W)",
        _ => r"\y",
    };
    let end = match value.chars().last() {
        Some(c) if !is_word(c) => r"($|\W)",
        _ => r"\y",
    };
    format!("{}{}{}", start, escape_regex(value), end)
}

/// Escape the metacharacters of PostgreSQL advanced regular expressions.
fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(
            ch,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::parser::parse_query;
    use crate::search::query::{SearchFlag, SearchFlags};
    use pretty_assertions::assert_eq;

    fn sql(query: &str) -> String {
        let expr = parse_query(query, SearchFlags::NONE).unwrap();
        to_sql(&expr, "tableName")
    }

    fn where_clause(query: &str) -> String {
        sql(query)
            .trim_start_matches("SELECT entry_id FROM tableName WHERE ")
            .to_string()
    }

    #[test]
    fn test_field_contains() {
        assert_eq!(
            sql("title=compute"),
            "SELECT entry_id FROM tableName WHERE (field_name = 'title' AND field_value ~* 'compute')"
        );
    }

    #[test]
    fn test_field_exact_case_sensitive() {
        assert_eq!(
            sql("title==!compute"),
            r"SELECT entry_id FROM tableName WHERE (field_name = 'title' AND field_value ~ '\ycompute\y')"
        );
    }

    #[test]
    fn test_unfielded_and() {
        assert_eq!(
            sql("computer AND science"),
            "SELECT entry_id FROM tableName WHERE (field_value ~* 'computer') AND (field_value ~* 'science')"
        );
    }

    #[test]
    fn test_operator_matrix() {
        let cases = [
            ("title=compute", "~*", "compute"),
            ("title=!compute", "~", "compute"),
            ("title==compute", "~*", r"\ycompute\y"),
            ("title==!compute", "~", r"\ycompute\y"),
            ("title!=compute", "!~*", "compute"),
            ("title!=!compute", "!~", "compute"),
            ("title!==compute", "!~*", r"\ycompute\y"),
            ("title!==!compute", "!~", r"\ycompute\y"),
        ];
        for (query, op, value) in cases {
            assert_eq!(
                where_clause(query),
                format!("(field_name = 'title' AND field_value {} '{}')", op, value),
                "query {}",
                query
            );
        }
    }

    #[test]
    fn test_or_and_grouping() {
        assert_eq!(
            where_clause("a=1 OR b=2 AND c=3"),
            "(field_name = 'a' AND field_value ~* '1') OR \
             ((field_name = 'b' AND field_value ~* '2') AND (field_name = 'c' AND field_value ~* '3'))"
        );
    }

    #[test]
    fn test_not() {
        assert_eq!(
            where_clause("NOT title=draft"),
            "NOT(field_name = 'title' AND field_value ~* 'draft')"
        );
        assert_eq!(
            where_clause("NOT (a=1 OR b=2)"),
            "NOT((field_name = 'a' AND field_value ~* '1') OR (field_name = 'b' AND field_value ~* '2'))"
        );
    }

    #[test]
    fn test_single_quotes_escaped() {
        assert_eq!(
            where_clause("author=\"O'Brien\""),
            "(field_name = 'author' AND field_value ~* 'O''Brien')"
        );
    }

    #[test]
    fn test_regex_metacharacters_escaped_for_contains() {
        assert_eq!(
            where_clause("title=\"C++ (intro)\""),
            r"(field_name = 'title' AND field_value ~* 'C\+\+ \(intro\)')"
        );
    }

    #[test]
    fn test_regex_passthrough() {
        assert_eq!(
            where_clause("year=~\"^19[0-9]{2}$\""),
            "(field_name = 'year' AND field_value ~* '^19[0-9]{2}$')"
        );
        let expr = parse_query("^quant", SearchFlags::of(&[SearchFlag::RegularExpression])).unwrap();
        assert_eq!(
            to_sql(&expr, "bib"),
            "SELECT entry_id FROM bib WHERE (field_value ~* '^quant')"
        );
    }

    #[test]
    fn test_anykeyword() {
        assert_eq!(
            where_clause("anykeyword==pineapple"),
            r"(field_name = 'keywords' AND field_value ~* '(^|,)\s*pineapple\s*(,|$)')"
        );
    }

    #[test]
    fn test_custom_columns() {
        let config = SearchConfig {
            sql: SqlConfig {
                entry_id: "id".to_string(),
                field_name: "name".to_string(),
                field_value: "value".to_string(),
            },
            ..Default::default()
        };
        let expr = parse_query("title=x", SearchFlags::NONE).unwrap();
        assert_eq!(
            to_sql_with(&expr, "fields", &config),
            "SELECT id FROM fields WHERE (name = 'title' AND value ~* 'x')"
        );
        assert_eq!(
            match_nothing("fields", &config.sql),
            "SELECT id FROM fields WHERE FALSE"
        );
    }

    #[test]
    fn test_keyword_separator() {
        let config = SearchConfig {
            keyword_separator: ';',
            ..Default::default()
        };
        let expr = parse_query("anykeyword==graphs", SearchFlags::NONE).unwrap();
        assert_eq!(
            where_predicate(&expr, &config),
            r"(field_name = 'keywords' AND field_value ~* '(^|;)\s*graphs\s*(;|$)')"
        );

        let config = SearchConfig {
            keyword_separator: '|',
            ..Default::default()
        };
        assert_eq!(
            where_predicate(&expr, &config),
            r"(field_name = 'keywords' AND field_value ~* '(^|\|)\s*graphs\s*(\||$)')"
        );
    }

    #[test]
    fn test_exact_value_with_symbols() {
        assert_eq!(
            where_clause("title==\"C++\""),
            r"(field_name = 'title' AND field_value ~* '\yC\+\+($|\W)')"
        );
        assert_eq!(
            where_clause("title==\".NET\""),
            r"(field_name = 'title' AND field_value ~* '(^|\W)\.NET\y')"
        );
    }

    mod agrees_with_matcher {
        use super::*;
        use crate::record::{BibRecord, Record};
        use crate::search::matcher;
        use regex::RegexBuilder;
        use std::collections::BTreeMap;
        use std::path::PathBuf;
        use pretty_assertions::assert_eq;

        fn fixture_library() -> Vec<BibRecord> {
            let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .parent()
                .unwrap()
                .join("fixtures/library/library.json");
            let json = std::fs::read_to_string(path).unwrap();
            let entries: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();

            let mut records: Vec<BibRecord> = entries
                .iter()
                .map(|entry| {
                    let fields: BTreeMap<String, String> =
                        serde_json::from_value(entry["fields"].clone()).unwrap();
                    let mut record = BibRecord::new(entry["id"].as_str().unwrap());
                    for (name, value) in &fields {
                        record.set_field(name, value.as_str());
                    }
                    record
                })
                .collect();
            records.push(
                BibRecord::new("stroustrup1985")
                    .with_field("title", "The C++ Programming Language")
                    .with_field("year", "1985"),
            );
            records
        }

        /// One leaf of the `WHERE` clause over the `(field_name, field_value)`
        /// rows of an entry, with PostgreSQL's `\y` read as `\b`.
        fn leaf_holds(leaf: &Leaf, rows: &[(&str, &str)], separator: char) -> bool {
            let op = operator(leaf);
            let posix = pattern(leaf, separator).replace(r"\y", r"\b");
            let regex = RegexBuilder::new(&posix)
                .case_insensitive(op.ends_with('*'))
                .build()
                .unwrap();
            rows.iter().any(|(name, value)| {
                let row_selected = match &leaf.field {
                    FieldTarget::AnyField => true,
                    FieldTarget::AnyKeyword => *name == KEYWORDS_FIELD,
                    FieldTarget::Named(field) => *name == field.as_str(),
                };
                row_selected && regex.is_match(value) != op.starts_with('!')
            })
        }

        /// The generated formula, each parenthesized leaf tested per entry.
        fn formula_holds(expr: &QueryExpr, rows: &[(&str, &str)], separator: char) -> bool {
            match expr {
                QueryExpr::Leaf(leaf) => leaf_holds(leaf, rows, separator),
                QueryExpr::And { children } => {
                    children.iter().all(|c| formula_holds(c, rows, separator))
                }
                QueryExpr::Or { children } => {
                    children.iter().any(|c| formula_holds(c, rows, separator))
                }
                QueryExpr::Not { child } => !formula_holds(child, rows, separator),
            }
        }

        fn selected_by_sql<'a>(expr: &QueryExpr, records: &'a [BibRecord]) -> Vec<&'a str> {
            records
                .iter()
                .filter(|record| formula_holds(expr, &record.all_fields(), ','))
                .map(|record| record.id())
                .collect()
        }

        fn selected_by_matcher<'a>(expr: &QueryExpr, records: &'a [BibRecord]) -> Vec<&'a str> {
            matcher::get_matches(expr, records)
                .into_iter()
                .map(|record| record.id())
                .collect()
        }

        #[test]
        fn test_same_entries_over_fixture_library() {
            let records = fixture_library();
            let queries = [
                "programming",
                "communications of the acm",
                "title=programming",
                "title=!Programming",
                "title==programming",
                "title==program",
                "title!=programming",
                "title!==programming",
                "title==\"C++\"",
                "author==\"O'Brien\"",
                "any!=knuth",
                "year=~\"^19[0-9]{2}$\"",
                "year!=~\"^19\"",
                "anykeyword=apple",
                "anykeyword==pineapple",
                "anykeyword==apple",
                "anykeyword!=apple",
                "anykeyword!==programming",
                "anykeyword=~\"pine\"",
                "NOT anykeyword==programming",
                "NOT title=programming",
                "journal=acm AND NOT author=dijkstra",
                "year=1968 OR year=1969 AND author=hoare",
                "(year=1984 OR year=2020) AND NOT anykeyword=banana",
                "NOT (title=fruit OR journal=computer)",
            ];

            for query in queries {
                let expr = parse_query(query, SearchFlags::NONE).unwrap();
                let sql_ids = selected_by_sql(&expr, &records);
                assert_eq!(sql_ids, selected_by_matcher(&expr, &records), "query {}", query);
            }
        }

        #[test]
        fn test_same_entries_with_custom_separator() {
            let records = vec![
                BibRecord::new("a")
                    .with_keyword_separator(';')
                    .with_field("keywords", "machine learning; graphs"),
                BibRecord::new("b")
                    .with_keyword_separator(';')
                    .with_field("keywords", "graphs of groups"),
            ];
            for query in ["anykeyword==graphs", "anykeyword!==graphs", "anykeyword=graph"] {
                let expr = parse_query(query, SearchFlags::NONE).unwrap();
                let sql_ids: Vec<&str> = records
                    .iter()
                    .filter(|record| formula_holds(&expr, &record.all_fields(), ';'))
                    .map(|record| record.id())
                    .collect();
                assert_eq!(sql_ids, selected_by_matcher(&expr, &records), "query {}", query);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let expr = parse_query("a=1 AND (b=2 OR NOT c==3)", SearchFlags::NONE).unwrap();
        assert_eq!(to_sql(&expr, "t"), to_sql(&expr.clone(), "t"));
    }
}
