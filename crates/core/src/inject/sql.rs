//! Predicate injection for SQL panel queries.
//!
//! Only the outermost query is touched. Its top-level `WHERE` clause is
//! located with a small lexer; an existing `column <op> literal` predicate
//! on the same column is replaced in place, otherwise the new predicate is
//! AND-ed onto the clause. Without a `WHERE`, one is inserted in front of
//! the first top-level `GROUP BY` / `HAVING` / `ORDER BY` / `LIMIT` /
//! `OFFSET`, or appended.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Word,
    QuotedIdent,
    Str,
    Number,
    Op,
    LParen,
    RParen,
    Semicolon,
    Other,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    start: usize,
    end: usize,
}

const CLAUSE_TERMINATORS: &[&str] = &[
    "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "EXCEPT", "INTERSECT", "QUALIFY",
    "WINDOW",
];

const COMPARISONS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">="];

/// Add or merge `column <operator> 'value'` into the outer `WHERE` clause.
pub fn inject_predicate(query: &str, column: &str, operator: &str, value: &str) -> String {
    let tokens = lex(query);
    let predicate = render_predicate(column, operator, value);

    let depths = depths(&tokens);
    let where_idx = tokens
        .iter()
        .enumerate()
        .position(|(i, t)| depths[i] == 0 && is_word(query, t, "WHERE"));

    match where_idx {
        Some(w) => {
            let clause_end = clause_end(query, &tokens, &depths, w + 1);
            let existing: Vec<(usize, usize)> = (w + 1..clause_end)
                .filter(|&i| depths[i] == 0)
                .filter_map(|i| predicate_span(query, &tokens, i, column))
                .collect();

            if !existing.is_empty() {
                let mut out = String::with_capacity(query.len() + predicate.len());
                let mut cursor = 0usize;
                for (start, end) in existing {
                    out.push_str(&query[cursor..start]);
                    out.push_str(&predicate);
                    cursor = end;
                }
                out.push_str(&query[cursor..]);
                return out;
            }

            let clause_start = tokens[w].end;
            let clause_stop = tokens
                .get(clause_end)
                .map_or(query.len(), |t| t.start);
            let body = query[clause_start..clause_stop].trim();
            let mut out = String::with_capacity(query.len() + predicate.len() + 8);
            out.push_str(&query[..clause_start]);
            if body.is_empty() {
                out.push_str(&format!(" {predicate}"));
            } else {
                out.push_str(&format!(" ({body}) AND {predicate}"));
            }
            if clause_end < tokens.len() {
                out.push(' ');
                out.push_str(&query[clause_stop..]);
            } else {
                out.push_str(query[clause_stop..].trim_start());
            }
            out
        }
        None => {
            let from_idx = tokens
                .iter()
                .enumerate()
                .position(|(i, t)| depths[i] == 0 && is_word(query, t, "FROM"))
                .unwrap_or(0);
            let insert_at = clause_end(query, &tokens, &depths, from_idx);
            match tokens.get(insert_at) {
                Some(t) => format!(
                    "{} WHERE {predicate} {}",
                    query[..t.start].trim_end(),
                    &query[t.start..]
                ),
                None => format!("{} WHERE {predicate}", query.trim_end()),
            }
        }
    }
}

fn render_predicate(column: &str, operator: &str, value: &str) -> String {
    let column = if is_plain_identifier(column) {
        column.to_string()
    } else {
        format!("\"{}\"", column.replace('"', "\"\""))
    };
    let op = match operator {
        "=~" => "LIKE",
        "!~" => "NOT LIKE",
        other => other,
    };
    format!("{column} {op} '{}'", value.replace('\'', "''"))
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ──────────────────────────────────────────────
// Clause analysis
// ──────────────────────────────────────────────

/// Paren depth at each token, relative to the start of the query.
fn depths(tokens: &[Token]) -> Vec<i32> {
    let mut depth = 0i32;
    tokens
        .iter()
        .map(|t| match t.kind {
            Kind::LParen => {
                let d = depth;
                depth += 1;
                d
            }
            Kind::RParen => {
                depth -= 1;
                depth
            }
            _ => depth,
        })
        .collect()
}

/// Index of the first token at or after `from` that ends the current
/// clause at depth 0, or `tokens.len()`.
fn clause_end(query: &str, tokens: &[Token], depths: &[i32], from: usize) -> usize {
    (from..tokens.len())
        .find(|&i| {
            let t = &tokens[i];
            depths[i] < 0
                || (depths[i] == 0
                    && (t.kind == Kind::Semicolon
                        || CLAUSE_TERMINATORS
                            .iter()
                            .any(|kw| is_word(query, t, kw))))
        })
        .unwrap_or(tokens.len())
}

/// Byte span of a `column <op> literal` predicate starting at token `i`.
fn predicate_span(query: &str, tokens: &[Token], i: usize, column: &str) -> Option<(usize, usize)> {
    let head = tokens.get(i)?;
    if !names_column(query, head, column) {
        return None;
    }
    // `t.col` is a different column reference; leave it alone.
    if i > 0 && &query[tokens[i - 1].start..tokens[i - 1].end] == "." {
        return None;
    }

    let op = tokens.get(i + 1)?;
    let is_comparison = op.kind == Kind::Op && COMPARISONS.contains(&&query[op.start..op.end]);
    let literal_at = if is_comparison || is_word(query, op, "LIKE") {
        i + 2
    } else if is_word(query, op, "NOT") && tokens.get(i + 2).is_some_and(|t| is_word(query, t, "LIKE")) {
        i + 3
    } else {
        return None;
    };

    let literal = tokens.get(literal_at)?;
    matches!(literal.kind, Kind::Str | Kind::Number).then_some((head.start, literal.end))
}

fn names_column(query: &str, token: &Token, column: &str) -> bool {
    let text = &query[token.start..token.end];
    match token.kind {
        Kind::Word => text.eq_ignore_ascii_case(column),
        // An unterminated identifier runs to the end of the query and never matches.
        Kind::QuotedIdent => text
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'))
            .is_some_and(|inner| inner.replace("\"\"", "\"") == column),
        _ => false,
    }
}

fn is_word(query: &str, token: &Token, keyword: &str) -> bool {
    token.kind == Kind::Word && query[token.start..token.end].eq_ignore_ascii_case(keyword)
}

// ──────────────────────────────────────────────
// Lexer
// ──────────────────────────────────────────────

fn lex(query: &str) -> Vec<Token> {
    let bytes = query.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        // Line comment
        if c == b'-' && bytes.get(pos + 1) == Some(&b'-') {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }

        let kind = match c {
            b'\'' | b'"' => {
                pos = skip_quoted(bytes, pos);
                if c == b'\'' {
                    Kind::Str
                } else {
                    Kind::QuotedIdent
                }
            }
            b'(' => {
                pos += 1;
                Kind::LParen
            }
            b')' => {
                pos += 1;
                Kind::RParen
            }
            b';' => {
                pos += 1;
                Kind::Semicolon
            }
            b'=' | b'!' | b'<' | b'>' | b'~' => {
                while pos < bytes.len() && matches!(bytes[pos], b'=' | b'!' | b'<' | b'>' | b'~') {
                    pos += 1;
                }
                Kind::Op
            }
            c if c.is_ascii_digit() => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'.') {
                    pos += 1;
                }
                Kind::Number
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 => {
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] >= 0x80)
                {
                    pos += 1;
                }
                Kind::Word
            }
            _ => {
                pos += query[pos..].chars().next().map_or(1, char::len_utf8);
                Kind::Other
            }
        };

        tokens.push(Token {
            kind,
            start,
            end: pos,
        });
    }

    tokens
}

/// Position just past the quoted run opening at `start`; a doubled quote
/// is an escaped quote.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut pos = start + 1;
    while pos < bytes.len() {
        if bytes[pos] == quote {
            if bytes.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return pos + 1;
        }
        pos += 1;
    }
    bytes.len()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
