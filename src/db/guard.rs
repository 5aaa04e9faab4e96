//! Statement-type guard for model-generated SQL.
//!
//! Generated text is untrusted. Only statements whose leading keyword is on
//! [`READ_ONLY_KEYWORDS`] may reach the database, and only one statement at a
//! time. The executor additionally asks SQLite whether the prepared statement
//! is read-only, which catches forms like `WITH x AS (...) DELETE ...`.

use crate::error::PipelineError;

pub const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH"];

#[derive(Clone, Copy, PartialEq)]
enum Lex {
    Normal,
    Single,
    Double,
    Backtick,
    Bracket,
    LineComment,
    BlockComment,
}

/// Splits `sql` on top-level semicolons, ignoring those inside literals,
/// quoted identifiers and comments. Segments holding nothing but whitespace
/// or comments are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut state = Lex::Normal;
    let mut start = 0;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);
        state = match (state, c) {
            (Lex::Normal, '\'') => Lex::Single,
            (Lex::Normal, '"') => Lex::Double,
            (Lex::Normal, '`') => Lex::Backtick,
            (Lex::Normal, '[') => Lex::Bracket,
            (Lex::Normal, '-') if next == Some('-') => {
                chars.next();
                Lex::LineComment
            }
            (Lex::Normal, '/') if next == Some('*') => {
                chars.next();
                Lex::BlockComment
            }
            (Lex::Normal, ';') => {
                statements.push(&sql[start..i]);
                start = i + 1;
                Lex::Normal
            }
            // doubled quotes are escapes and fall straight back into the literal
            (Lex::Single, '\'') => Lex::Normal,
            (Lex::Double, '"') => Lex::Normal,
            (Lex::Backtick, '`') => Lex::Normal,
            (Lex::Bracket, ']') => Lex::Normal,
            (Lex::LineComment, '\n') => Lex::Normal,
            (Lex::BlockComment, '*') if next == Some('/') => {
                chars.next();
                Lex::Normal
            }
            (s, _) => s,
        };
    }
    statements.push(&sql[start..]);

    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !strip_leading_noise(s).is_empty())
        .collect()
}

/// Skips whitespace, comments and opening parentheses.
pub fn strip_leading_noise(mut sql: &str) -> &str {
    loop {
        let trimmed = sql.trim_start().trim_start_matches('(');
        if let Some(rest) = trimmed.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else if trimmed.len() == sql.len() {
            return sql;
        } else {
            sql = trimmed;
        }
    }
}

/// First keyword of the statement, uppercased.
pub fn leading_keyword(sql: &str) -> String {
    strip_leading_noise(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Rejects anything other than a single SELECT/WITH statement.
pub fn check_read_only(sql: &str) -> Result<(), PipelineError> {
    let statements = split_statements(sql);
    match statements.len() {
        0 => return Err(PipelineError::UnsafeStatement("statement is empty".to_string())),
        1 => {}
        n => {
            return Err(PipelineError::UnsafeStatement(format!(
                "expected a single statement, found {}",
                n
            )))
        }
    }

    let keyword = leading_keyword(statements[0]);
    if !READ_ONLY_KEYWORDS.contains(&keyword.as_str()) {
        let shown = if keyword.is_empty() { "unrecognized" } else { keyword.as_str() };
        return Err(PipelineError::UnsafeStatement(format!(
            "{} statements are not allowed, only {} queries may run",
            shown,
            READ_ONLY_KEYWORDS.join("/")
        )));
    }

    Ok(())
}
