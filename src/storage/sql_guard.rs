//! SQL Text Inspection
//!
//! A small lexer over SQLite query text, used to:
//! - reject mutating or multi-statement SQL before it reaches the database
//! - list the tables a query reads from (FROM/JOIN targets, minus CTE names)
//! - find which schema tables a query touches, for citation checks
//! - report column references the schema does not define
//!
//! String literals and comments are consumed by the lexer, so keywords or
//! semicolons inside them never trigger the guard.

use std::collections::{BTreeMap, BTreeSet};

use retail_copilot_core::{Schema, TableSchema};

/// Keywords that can only appear in a statement that writes or alters state.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "detach", "pragma",
    "vacuum", "reindex", "analyze", "savepoint", "release", "begin", "commit", "rollback",
];

/// Words that can follow a table reference without being its alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "group", "order", "limit", "join", "inner", "left", "right", "full", "cross",
    "natural", "on", "using", "union", "except", "intersect", "having", "window", "as",
];

/// Remaining SQLite words that never name a column.
const SQL_KEYWORDS: &[&str] = &[
    "select", "from", "with", "recursive", "materialized", "distinct", "all", "by", "outer",
    "offset", "and", "or", "not", "in", "is", "isnull", "notnull", "null", "like", "glob",
    "regexp", "match", "escape", "between", "case", "when", "then", "else", "end", "cast",
    "exists", "collate", "nocase", "rtrim", "binary", "asc", "desc", "nulls", "first", "last",
    "over", "partition", "filter", "rows", "range", "groups", "unbounded", "preceding",
    "following", "current", "row", "exclude", "ties", "others", "no", "values", "true",
    "false", "current_date", "current_time", "current_timestamp", "indexed",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Bare word: keyword, identifier or number.
    Word(String),
    /// Quoted identifier ("x", [x] or `x`), unquoted.
    Quoted(String),
    /// String literal (content dropped).
    Literal,
    Punct(char),
}

impl Token {
    fn is_word(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    fn identifier(&self) -> Option<&str> {
        match self {
            Token::Word(w) if !w.starts_with(|c: char| c.is_ascii_digit()) => Some(w),
            Token::Quoted(q) => Some(q),
            _ => None,
        }
    }
}

fn lex(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c == '\'' {
            i = skip_quoted(&chars, i, '\'').0;
            tokens.push(Token::Literal);
        } else if c == '"' || c == '`' {
            let (next, text) = skip_quoted(&chars, i, c);
            i = next;
            tokens.push(Token::Quoted(text));
        } else if c == '[' {
            let (next, text) = skip_quoted(&chars, i, ']');
            i = next;
            tokens.push(Token::Quoted(text));
        } else if c.is_alphanumeric() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$' || chars[i] == '.') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token::Word(word));
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }

    tokens
}

/// Consume a quoted run starting at `start` (the opening delimiter).
/// A doubled closing delimiter is an escaped delimiter.
fn skip_quoted(chars: &[char], start: usize, close: char) -> (usize, String) {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if close != ']' && chars.get(i + 1) == Some(&close) {
                text.push(close);
                i += 2;
                continue;
            }
            return (i + 1, text);
        }
        text.push(chars[i]);
        i += 1;
    }
    (i, text)
}

/// Why a query was refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardRejection {
    Empty,
    MultipleStatements,
    NotAQuery(String),
    ForbiddenKeyword(String),
}

impl std::fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardRejection::Empty => write!(f, "query is empty"),
            GuardRejection::MultipleStatements => write!(f, "multiple statements are not allowed"),
            GuardRejection::NotAQuery(first) => {
                write!(f, "only SELECT/WITH queries are allowed, got '{}'", first)
            }
            GuardRejection::ForbiddenKeyword(kw) => {
                write!(f, "mutating keyword '{}' is not allowed", kw.to_uppercase())
            }
        }
    }
}

/// Check that `sql` is a single read-only statement.
///
/// Returns the statement with trailing semicolons removed.
pub fn check_read_only(sql: &str) -> Result<String, GuardRejection> {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let tokens = lex(trimmed);

    let Some(first) = tokens.first() else {
        return Err(GuardRejection::Empty);
    };

    if tokens.iter().any(|t| matches!(t, Token::Punct(';'))) {
        return Err(GuardRejection::MultipleStatements);
    }

    if !(first.is_word("select") || first.is_word("with")) {
        let shown = match first {
            Token::Word(w) => w.clone(),
            Token::Quoted(q) => q.clone(),
            Token::Literal => "'...'".to_string(),
            Token::Punct(c) => c.to_string(),
        };
        return Err(GuardRejection::NotAQuery(shown));
    }

    for token in &tokens {
        if let Token::Word(w) = token {
            let lower = w.to_ascii_lowercase();
            if FORBIDDEN_KEYWORDS.contains(&lower.as_str()) {
                return Err(GuardRejection::ForbiddenKeyword(lower));
            }
        }
    }

    Ok(trimmed.to_string())
}

/// Names defined by `name AS (` (common table expressions).
fn cte_names(tokens: &[Token]) -> BTreeSet<String> {
    tokens
        .windows(3)
        .filter_map(|w| match (&w[0], &w[1], &w[2]) {
            (name, kw, Token::Punct('(')) if kw.is_word("as") => {
                name.identifier().map(|n| n.to_ascii_lowercase())
            }
            _ => None,
        })
        .collect()
}

fn strip_schema_prefix(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((prefix, rest)) if ["main", "temp"].contains(&prefix.to_ascii_lowercase().as_str()) => rest,
        _ => name,
    }
}

/// A FROM/JOIN target and its alias, if one was given.
struct TableRef {
    name: String,
    alias: Option<String>,
}

fn table_refs(tokens: &[Token]) -> Vec<TableRef> {
    let mut refs = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let is_from = tokens[i].is_word("from");
        if !(is_from || tokens[i].is_word("join")) {
            i += 1;
            continue;
        }
        i += 1;
        loop {
            let Some(name) = tokens.get(i).and_then(Token::identifier) else {
                break;
            };
            let name = strip_schema_prefix(name).to_string();
            i += 1;
            let mut alias = None;
            if tokens.get(i).is_some_and(|t| t.is_word("as")) {
                alias = tokens.get(i + 1).and_then(Token::identifier).map(str::to_string);
                i += 2;
            } else if let Some(Token::Word(w)) = tokens.get(i) {
                if !CLAUSE_KEYWORDS.contains(&w.to_ascii_lowercase().as_str()) {
                    alias = Some(w.clone());
                    i += 1;
                }
            }
            refs.push(TableRef { name, alias });
            // comma-joined FROM list
            if is_from && matches!(tokens.get(i), Some(Token::Punct(','))) {
                i += 1;
                continue;
            }
            break;
        }
    }
    refs
}

/// Tables named as FROM/JOIN targets (including comma-joined lists),
/// excluding CTE names. Order of first appearance, deduplicated.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let tokens = lex(sql);
    let ctes = cte_names(&tokens);
    let mut seen = BTreeSet::new();

    table_refs(&tokens)
        .into_iter()
        .map(|r| r.name)
        .filter(|name| {
            let key = name.to_ascii_lowercase();
            !ctes.contains(&key) && seen.insert(key)
        })
        .collect()
}

fn is_keyword(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    SQL_KEYWORDS.contains(&lower.as_str())
        || CLAUSE_KEYWORDS.contains(&lower.as_str())
        || FORBIDDEN_KEYWORDS.contains(&lower.as_str())
}

/// True when the identifier at `i` names an alias rather than using a
/// column: it follows `AS`, or directly follows a complete expression
/// (`SUM(x) total`, `Orders o`, `CASE ... END label`).
fn defines_alias(tokens: &[Token], i: usize) -> bool {
    let Some(prev) = i.checked_sub(1).and_then(|p| tokens.get(p)) else {
        return false;
    };
    match prev {
        Token::Word(w) if w.eq_ignore_ascii_case("as") || w.eq_ignore_ascii_case("end") => true,
        Token::Word(w) => !is_keyword(w),
        Token::Quoted(_) | Token::Literal | Token::Punct(')') => true,
        Token::Punct(_) => false,
    }
}

/// Check `qualifier.column` against the table the qualifier names.
/// Qualifiers that resolve to a CTE, a subquery or nothing are skipped.
fn unknown_qualified(
    qualifiers: &BTreeMap<String, Option<&TableSchema>>,
    qualifier: &str,
    column: &str,
) -> Option<String> {
    if column.is_empty() {
        return None;
    }
    let table = qualifiers
        .get(&strip_schema_prefix(qualifier).to_ascii_lowercase())
        .copied()
        .flatten()?;
    let known = table.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column));
    (!known).then(|| format!("{}.{}", qualifier, column))
}

/// Column references that no FROM/JOIN table in `schema` defines.
///
/// Qualified references (`o.OrderDate`, `"Order Details".Quantity`) are
/// checked against the qualifying table; bare names against every table
/// the query reads. Names the query defines itself (output aliases, table
/// aliases, CTE names) are not columns. Order of first appearance,
/// deduplicated.
pub fn unknown_columns(sql: &str, schema: &Schema) -> Vec<String> {
    let tokens = lex(sql);
    let ctes = cte_names(&tokens);
    let refs = table_refs(&tokens);

    let mut qualifiers: BTreeMap<String, Option<&TableSchema>> = BTreeMap::new();
    for r in &refs {
        let table = schema.find_table(&r.name);
        qualifiers.insert(r.name.to_ascii_lowercase(), table);
        if let Some(alias) = &r.alias {
            qualifiers.insert(alias.to_ascii_lowercase(), table);
        }
    }
    let in_scope: BTreeSet<String> = refs
        .iter()
        .filter_map(|r| schema.find_table(&r.name))
        .flat_map(|t| t.columns.iter().map(|c| c.name.to_ascii_lowercase()))
        .collect();
    let defined: BTreeSet<String> = (0..tokens.len())
        .filter(|&i| defines_alias(&tokens, i))
        .filter_map(|i| tokens[i].identifier())
        .map(str::to_ascii_lowercase)
        .collect();

    let mut seen = BTreeSet::new();
    let mut unknown = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let next = tokens.get(i + 1);
        let found = match &tokens[i] {
            // t.col or t."col"
            Token::Word(w) if w.contains('.') && tokens[i].identifier().is_some() => {
                let (qualifier, mut column) = w.rsplit_once('.').unwrap_or((w.as_str(), ""));
                if column.is_empty() {
                    if let Some(Token::Quoted(q)) = next {
                        column = q.as_str();
                        i += 1;
                    }
                }
                unknown_qualified(&qualifiers, qualifier, column)
            }
            // "t".col
            Token::Quoted(q) if matches!(next, Some(Token::Punct('.'))) => {
                let column = tokens.get(i + 2).and_then(Token::identifier);
                i += 2;
                column.and_then(|c| unknown_qualified(&qualifiers, q, c))
            }
            token => token
                .identifier()
                .filter(|name| {
                    let lower = name.to_ascii_lowercase();
                    !matches!(token, Token::Word(w) if is_keyword(w))
                        && !matches!(next, Some(Token::Punct('(')))
                        && !defines_alias(&tokens, i)
                        && !in_scope.contains(&lower)
                        && !qualifiers.contains_key(&lower)
                        && !ctes.contains(&lower)
                        && !defined.contains(&lower)
                })
                .map(str::to_string),
        };
        if let Some(name) = found {
            if seen.insert(name.to_ascii_lowercase()) {
                unknown.push(name);
            }
        }
        i += 1;
    }

    unknown
}

/// Schema tables whose names appear as identifiers anywhere in `sql`,
/// returned with their schema spelling.
pub fn tables_touched(sql: &str, schema: &Schema) -> Vec<String> {
    let identifiers: BTreeSet<String> = lex(sql)
        .iter()
        .filter_map(Token::identifier)
        .map(|n| strip_schema_prefix(n).to_ascii_lowercase())
        .collect();

    schema
        .table_names()
        .filter(|name| identifiers.contains(&name.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}
