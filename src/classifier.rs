//! SQL statement classification.
//!
//! Decides, from text alone, whether a statement must run on main
//! ([`Write`](StatementKind::Write), [`Lock`](StatementKind::Lock)) or is
//! eligible for a replica ([`Read`](StatementKind::Read)). Classification is
//! pure: no I/O, no state, total over arbitrary input.
//!
//! The classifier is intentionally not a SQL parser. It lexes just enough
//! to ignore comments, string literals and quoted identifiers, then applies
//! three checks in order:
//!
//! 1. **Write keywords**: `INSERT`, `UPDATE`, `DELETE`, DDL, etc. In the
//!    default mode only the first significant token counts; in
//!    compatibility mode any occurrence outside an allow-listed function
//!    call counts.
//! 2. **Function calls**: a statement invoking a function that is neither
//!    a standard read-only builtin nor in the configured allow-list is
//!    classified as a write, since the function may mutate state.
//! 3. **Locking clauses**: `SELECT ... FOR UPDATE` / `FOR SHARE` variants.
//!
//! An empty or blank statement classifies as a read; there is no reason to
//! burn a main connection on it.

use std::collections::HashSet;

/// What a statement does, as far as routing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Mutates data or schema; must run on main.
    Write,
    /// A read that takes row locks; must run on main.
    Lock,
    /// Eligible for a replica.
    Read,
}

/// Keywords that open a mutating statement.
const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "merge", "upsert", "replace", "create", "alter", "drop",
    "truncate", "grant", "revoke",
];

/// Standard SQL functions that never mutate state.
///
/// Invocations of these never force a statement to main; anything not here
/// must be declared through the configured allow-list.
const BUILTIN_READ_ONLY_FUNCTIONS: &[&str] = &[
    // aggregates and windows
    "count", "sum", "avg", "min", "max", "string_agg", "array_agg", "json_agg", "jsonb_agg",
    "row_number", "rank", "dense_rank", "lag", "lead", "first_value", "last_value", "nth_value",
    // scalar builtins
    "coalesce", "nullif", "greatest", "least", "cast", "abs", "ceil", "floor", "round", "mod",
    "power", "sqrt", "exp", "ln", "log", "random", "length", "char_length", "lower", "upper",
    "trim", "ltrim", "rtrim", "substring", "substr", "position", "concat", "left", "right",
    "replace", "format", "md5", "split_part",
    // date/time
    "now", "age", "extract", "date_trunc", "date_part", "to_char", "to_date", "to_timestamp",
    "to_number", "current_date", "current_time", "current_timestamp", "localtimestamp",
    // misc
    "exists", "unnest", "generate_series", "json_build_object", "jsonb_build_object", "in",
    "any", "all", "values", "row",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    OpenParen,
    CloseParen,
    Other,
}

/// Pure statement classifier over SQL text.
#[derive(Debug, Clone)]
pub struct SqlClassifier {
    read_only_functions: HashSet<String>,
    compatibility_mode: bool,
}

impl SqlClassifier {
    /// Create a classifier.
    ///
    /// `read_only_functions` lists user-declared functions that are known
    /// not to mutate state; names are matched case-insensitively.
    /// `compatibility_mode` widens write-keyword detection from
    /// statement-leading to anywhere in the text.
    pub fn new<I, T>(read_only_functions: I, compatibility_mode: bool) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            read_only_functions: read_only_functions
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
            compatibility_mode,
        }
    }

    /// Classify a statement.
    pub fn classify(&self, sql: &str) -> StatementKind {
        let tokens = lex(sql);
        let Some(first_word) = tokens.iter().find_map(|t| match t {
            Token::Word(w) => Some(*w),
            _ => None,
        }) else {
            return StatementKind::Read;
        };

        if self.has_write_keyword(first_word, &tokens) {
            return StatementKind::Write;
        }
        if self.calls_unknown_function(&tokens) {
            return StatementKind::Write;
        }
        if is_select_like(first_word) && has_locking_clause(&tokens) {
            return StatementKind::Lock;
        }
        StatementKind::Read
    }

    fn has_write_keyword(&self, first_word: &str, tokens: &[Token<'_>]) -> bool {
        if is_write_keyword(first_word) {
            return true;
        }
        if !self.compatibility_mode {
            return false;
        }

        // Compatibility mode scans the whole statement. Keywords inside the
        // argument list of an allow-listed function call do not count, and
        // an UPDATE/SHARE right after FOR/KEY/NO is a locking clause, not DML.
        let mut shielded_depth: Option<usize> = None;
        let mut depth = 0usize;
        let mut previous_word: Option<&str> = None;

        for (index, token) in tokens.iter().enumerate() {
            match token {
                Token::OpenParen => depth += 1,
                Token::CloseParen => {
                    depth = depth.saturating_sub(1);
                    if shielded_depth.is_some_and(|d| depth <= d) {
                        shielded_depth = None;
                    }
                }
                Token::Word(word) => {
                    let lowered = word.to_ascii_lowercase();
                    let is_call = matches!(tokens.get(index + 1), Some(Token::OpenParen));

                    if is_call && shielded_depth.is_none() && self.is_read_only_function(&lowered) {
                        shielded_depth = Some(depth);
                    } else if shielded_depth.is_none()
                        && !is_call
                        && is_write_keyword(&lowered)
                        && !is_locking_clause_word(&lowered, previous_word)
                    {
                        return true;
                    }
                    previous_word = Some(*word);
                }
                Token::Other => {}
            }
        }
        false
    }

    fn calls_unknown_function(&self, tokens: &[Token<'_>]) -> bool {
        for (index, token) in tokens.iter().enumerate() {
            let Token::Word(word) = token else { continue };
            if !matches!(tokens.get(index + 1), Some(Token::OpenParen)) {
                continue;
            }
            let lowered = word.to_ascii_lowercase();
            if is_plain_keyword(&lowered) {
                continue;
            }
            if !self.is_read_only_function(&lowered) {
                return true;
            }
        }
        false
    }

    fn is_read_only_function(&self, lowered: &str) -> bool {
        BUILTIN_READ_ONLY_FUNCTIONS.contains(&lowered) || self.read_only_functions.contains(lowered)
    }
}

fn is_write_keyword(word: &str) -> bool {
    let lowered = word.to_ascii_lowercase();
    WRITE_KEYWORDS.contains(&lowered.as_str())
}

fn is_select_like(first_word: &str) -> bool {
    first_word.eq_ignore_ascii_case("select") || first_word.eq_ignore_ascii_case("with")
}

/// `UPDATE` preceded by `FOR`/`NO`/`KEY`, or `SHARE` preceded by `FOR`/`KEY`,
/// belongs to a row-locking clause.
fn is_locking_clause_word(lowered: &str, previous_word: Option<&str>) -> bool {
    let Some(previous) = previous_word.map(str::to_ascii_lowercase) else {
        return false;
    };
    match lowered {
        "update" => matches!(previous.as_str(), "for" | "no" | "key"),
        "share" => matches!(previous.as_str(), "for" | "key"),
        _ => false,
    }
}

/// Keywords that look like calls when followed by `(` but are not functions
/// with side effects (`WHERE x IN (...)`, `VALUES (...)`, subquery openers).
fn is_plain_keyword(lowered: &str) -> bool {
    matches!(
        lowered,
        "select" | "where" | "and" | "or" | "not" | "on" | "using" | "from" | "join" | "as"
            | "by" | "group" | "order" | "having" | "limit" | "offset" | "union" | "intersect"
            | "except" | "distinct" | "between" | "like" | "ilike" | "is" | "case" | "when"
            | "then" | "else" | "end" | "over" | "partition" | "filter" | "within"
    )
}

fn has_locking_clause(tokens: &[Token<'_>]) -> bool {
    let words: Vec<String> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w.to_ascii_lowercase()),
            _ => None,
        })
        .collect();

    for (index, word) in words.iter().enumerate() {
        if word != "for" {
            continue;
        }
        match words.get(index + 1).map(String::as_str) {
            Some("update") | Some("share") => return true,
            Some("no") => {
                if words.get(index + 2).map(String::as_str) == Some("key")
                    && words.get(index + 3).map(String::as_str) == Some("update")
                {
                    return true;
                }
            }
            Some("key") => {
                if words.get(index + 2).map(String::as_str) == Some("share") {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Tokenize, skipping whitespace, comments, string literals and quoted
/// identifiers so their contents never look like keywords.
fn lex(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        // '' is an escaped quote inside the literal
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            b'"' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'"' {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            b'(' => {
                tokens.push(Token::OpenParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::CloseParen);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
                {
                    i += 1;
                }
                tokens.push(Token::Word(&sql[start..i]));
            }
            c if c.is_ascii_whitespace() => {
                i += 1;
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }
    tokens
}
