//! Label-matcher injection for promql expressions.
//!
//! The scanner walks the expression once and finds every vector selector:
//! a metric name, a metric name followed by `{...}`, or a bare `{...}`.
//! For each selector the matcher is merged into its label block. A matcher
//! on the same label replaces the existing one; otherwise it is appended.
//!
//! Skipped while scanning: string literals, comments, range and subquery
//! brackets, numeric and duration literals, function calls, aggregation
//! operators, binary keywords and grouping label lists (`by (...)`,
//! `on (...)`, ...).

const GROUPING: &[&str] = &[
    "by",
    "without",
    "on",
    "ignoring",
    "group_left",
    "group_right",
];

const KEYWORDS: &[&str] = &[
    "and", "or", "unless", "bool", "offset", "atan2", "inf", "nan",
];

const AGGREGATORS: &[&str] = &[
    "sum",
    "min",
    "max",
    "avg",
    "group",
    "stddev",
    "stdvar",
    "count",
    "count_values",
    "bottomk",
    "topk",
    "quantile",
    "limitk",
    "limit_ratio",
];

/// Merge `name <operator> "value"` into every selector of `query`.
pub fn inject_label_matcher(query: &str, name: &str, operator: &str, value: &str) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len() + name.len() + value.len() + 8);
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];

        if c == '"' || c == '\'' || c == '`' {
            let end = skip_string(&chars, pos);
            out.extend(&chars[pos..end]);
            pos = end;
            continue;
        }

        if c == '#' {
            let end = chars[pos..]
                .iter()
                .position(|&ch| ch == '\n')
                .map_or(chars.len(), |n| pos + n);
            out.extend(&chars[pos..end]);
            pos = end;
            continue;
        }

        if c == '[' {
            let end = chars[pos..]
                .iter()
                .position(|&ch| ch == ']')
                .map_or(chars.len(), |n| pos + n + 1);
            out.extend(&chars[pos..end]);
            pos = end;
            continue;
        }

        if c == '{' {
            let end = skip_block(&chars, pos, '{', '}');
            let inner_end = if end > pos + 1 && chars[end - 1] == '}' {
                end - 1
            } else {
                end
            };
            let inner: String = chars[pos + 1..inner_end].iter().collect();
            out.push_str(&merge_block(&inner, name, operator, value));
            pos = end;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(char::is_ascii_digit)) {
            let end = scan_while(&chars, pos, |ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_');
            out.extend(&chars[pos..end]);
            pos = end;
            continue;
        }

        if is_ident_start(c) {
            let end = scan_while(&chars, pos, is_ident_char);
            let word: String = chars[pos..end].iter().collect();
            out.push_str(&word);
            pos = end;

            let lower = word.to_ascii_lowercase();
            let next = next_significant(&chars, pos);

            if GROUPING.contains(&lower.as_str()) {
                if let Some(open) = next.filter(|&i| chars[i] == '(') {
                    let close = skip_block(&chars, open, '(', ')');
                    out.extend(&chars[pos..close]);
                    pos = close;
                }
                continue;
            }
            if KEYWORDS.contains(&lower.as_str()) || AGGREGATORS.contains(&lower.as_str()) {
                continue;
            }
            match next.map(|i| chars[i]) {
                // function call, or a selector whose block is handled next
                Some('(') | Some('{') => {}
                _ => out.push_str(&render_block(&[Matcher::new(name, operator, value)])),
            }
            continue;
        }

        out.push(c);
        pos += 1;
    }

    out
}

// ──────────────────────────────────────────────
// Label blocks
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Parsed {
        label: String,
        op: String,
        literal: String,
    },
    /// Anything we do not understand is carried through verbatim.
    Raw(String),
}

impl Matcher {
    fn new(label: &str, op: &str, value: &str) -> Self {
        Matcher::Parsed {
            label: label.to_string(),
            op: op.to_string(),
            literal: quote(value),
        }
    }

    fn render(&self) -> String {
        match self {
            Matcher::Parsed { label, op, literal } => format!("{label}{op}{literal}"),
            Matcher::Raw(text) => text.clone(),
        }
    }
}

fn merge_block(inner: &str, name: &str, operator: &str, value: &str) -> String {
    let mut matchers: Vec<Matcher> = split_top_level(inner)
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .map(|part| parse_matcher(&part))
        .collect();

    let mut replaced = false;
    for m in matchers.iter_mut() {
        if let Matcher::Parsed { label, .. } = m {
            if label == name {
                *m = Matcher::new(name, operator, value);
                replaced = true;
            }
        }
    }
    if !replaced {
        matchers.push(Matcher::new(name, operator, value));
    }
    render_block(&matchers)
}

fn render_block(matchers: &[Matcher]) -> String {
    let parts: Vec<String> = matchers.iter().map(Matcher::render).collect();
    format!("{{{}}}", parts.join(","))
}

fn parse_matcher(part: &str) -> Matcher {
    let chars: Vec<char> = part.chars().collect();
    if chars.is_empty() || !is_ident_start(chars[0]) {
        return Matcher::Raw(part.to_string());
    }
    let label_end = scan_while(&chars, 0, |ch| ch.is_ascii_alphanumeric() || ch == '_');
    let label: String = chars[..label_end].iter().collect();

    let rest: String = chars[label_end..].iter().collect();
    let rest = rest.trim_start();
    let op = ["=~", "!~", "!=", "="]
        .into_iter()
        .find(|op| rest.starts_with(op));
    match op {
        Some(op) => Matcher::Parsed {
            label,
            op: op.to_string(),
            literal: rest[op.len()..].trim().to_string(),
        },
        None => Matcher::Raw(part.to_string()),
    }
}

/// Split on commas that are not inside a string literal.
fn split_top_level(inner: &str) -> Vec<String> {
    let chars: Vec<char> = inner.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut pos = 0usize;
    while pos < chars.len() {
        let c = chars[pos];
        if c == '"' || c == '\'' || c == '`' {
            let end = skip_string(&chars, pos);
            current.extend(&chars[pos..end]);
            pos = end;
            continue;
        }
        if c == ',' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        pos += 1;
    }
    parts.push(current);
    parts
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

// ──────────────────────────────────────────────
// Scanning helpers
// ──────────────────────────────────────────────

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn scan_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut pos = start;
    while pos < chars.len() && pred(chars[pos]) {
        pos += 1;
    }
    pos
}

fn next_significant(chars: &[char], start: usize) -> Option<usize> {
    (start..chars.len()).find(|&i| !chars[i].is_whitespace())
}

/// Position just past the string literal opening at `start`.
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut pos = start + 1;
    while pos < chars.len() {
        match chars[pos] {
            '\\' if quote != '`' => pos += 2,
            c if c == quote => return pos + 1,
            _ => pos += 1,
        }
    }
    chars.len()
}

/// Position just past the block closing the `open` at `start`.
fn skip_block(chars: &[char], start: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut pos = start;
    while pos < chars.len() {
        let c = chars[pos];
        if c == '"' || c == '\'' || c == '`' {
            pos = skip_string(chars, pos);
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return pos + 1;
            }
        }
        pos += 1;
    }
    chars.len()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn inject(q: &str) -> String {
        inject_label_matcher(q, "host", "=", "web-1")
    }

    #[test]
    fn bare_metric_gets_a_block() {
        assert_eq!(inject("up"), r#"up{host="web-1"}"#);
    }

    #[test]
    fn existing_block_is_extended() {
        assert_eq!(
            inject(r#"up{job="api"}"#),
            r#"up{job="api",host="web-1"}"#
        );
    }

    #[test]
    fn same_label_is_overridden_not_duplicated() {
        assert_eq!(
            inject_label_matcher(r#"up{host!="old", job="api"}"#, "host", "=~", "web-.*"),
            r#"up{host=~"web-.*",job="api"}"#
        );
    }

    #[test]
    fn every_selector_is_rewritten() {
        assert_eq!(
            inject("errors_total / requests_total"),
            r#"errors_total{host="web-1"} / requests_total{host="web-1"}"#
        );
    }

    #[test]
    fn functions_ranges_and_grouping_are_skipped() {
        assert_eq!(
            inject("sum by (job, instance) (rate(http_requests_total[5m]))"),
            r#"sum by (job, instance) (rate(http_requests_total{host="web-1"}[5m]))"#
        );
        assert_eq!(
            inject("sum(rate(x[1m:30s])) without (pod)"),
            r#"sum(rate(x{host="web-1"}[1m:30s])) without (pod)"#
        );
    }

    #[test]
    fn vector_matching_labels_are_skipped() {
        assert_eq!(
            inject("a * on(job) group_left(team) b"),
            r#"a{host="web-1"} * on(job) group_left(team) b{host="web-1"}"#
        );
    }

    #[test]
    fn literals_and_keywords_are_skipped() {
        assert_eq!(
            inject(r#"label_replace(up, "dst", "$1", "src", "(.*)") > bool 0.5"#),
            r#"label_replace(up{host="web-1"}, "dst", "$1", "src", "(.*)") > bool 0.5"#
        );
        assert_eq!(
            inject("up offset 5m"),
            r#"up{host="web-1"} offset 5m"#
        );
    }

    #[test]
    fn bare_block_selector_is_merged() {
        assert_eq!(
            inject(r#"{__name__="up"}"#),
            r#"{__name__="up",host="web-1"}"#
        );
    }

    #[test]
    fn empty_block_is_filled() {
        assert_eq!(inject("up{}"), r#"up{host="web-1"}"#);
    }

    #[test]
    fn value_is_escaped() {
        assert_eq!(
            inject_label_matcher("up", "path", "=", r#"C:\tmp "x""#),
            r#"up{path="C:\\tmp \"x\""}"#
        );
    }

    #[test]
    fn recording_rule_names_are_selectors() {
        assert_eq!(
            inject("job:http_requests:rate5m"),
            r#"job:http_requests:rate5m{host="web-1"}"#
        );
    }
}
