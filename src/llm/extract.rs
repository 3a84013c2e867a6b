use regex::Regex;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::sync::LazyLock;
use tracing::debug;

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[ \t]*(?:sqlite|sql)?[ \t]*\n?(.*?)```").unwrap());

// `WITH` alone, `WITH RECURSIVE`, or `WITH name [(cols)] AS`
static WITH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*WITH(?:\s*$|\s+RECURSIVE\b|\s+[\w"`\[\]]+\s*(?:\([^)]*\))?\s*AS\b)"#).unwrap()
});

const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "PRAGMA",
];

const NO_SQL_SENTINEL: &str = "-- no valid sql";

fn opens_statement(line: &str) -> bool {
    let upper = line.trim_start().to_uppercase();
    let Some(keyword) = SQL_KEYWORDS.iter().find(|kw| {
        upper.starts_with(*kw)
            && !upper[kw.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }) else {
        return false;
    };
    *keyword != "WITH" || WITH_REGEX.is_match(line)
}

/// Cuts `text` after the first `;` outside string literals and comments.
fn cut_at_terminator(text: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut in_comment = false;
    let mut prev = '\0';
    for (i, c) in text.char_indices() {
        match (quote, in_comment) {
            (Some(q), _) => {
                if c == q {
                    quote = None;
                }
            }
            (None, true) => {
                if c == '\n' {
                    in_comment = false;
                }
            }
            (None, false) => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '-' if prev == '-' => in_comment = true,
                ';' => return &text[..=i],
                _ => {}
            },
        }
        prev = c;
    }
    text
}

/// Candidate statements, one per line that opens a statement. Fenced blocks
/// run to the end of the block; prose stops at a blank line.
fn candidates(content: &str, fenced: bool) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| opens_statement(line))
        .filter_map(|(start, _)| {
            let rest = &lines[start..];
            let end = if fenced {
                rest.len()
            } else {
                rest.iter()
                    .position(|line| line.trim().is_empty() || line.trim_start().starts_with("```"))
                    .unwrap_or(rest.len())
            };
            let text = rest[..end].join("\n");
            let sql = cut_at_terminator(&text).trim().to_string();
            (!sql.is_empty()).then_some(sql)
        })
        .collect()
}

/// The first candidate that parses, or the first one at all so the validator
/// can report why it does not.
fn pick(candidates: Vec<String>) -> Option<String> {
    let parsed = candidates
        .iter()
        .position(|sql| Parser::parse_sql(&SQLiteDialect {}, sql).is_ok_and(|s| !s.is_empty()));
    match parsed {
        Some(i) => candidates.into_iter().nth(i),
        None => candidates.into_iter().next(),
    }
}

/// Pulls a single SQL statement out of a completion. `None` when the model
/// declined or produced no recognizable SQL.
pub fn extract_sql(content: &str) -> Option<String> {
    let content = content.trim();
    if content.is_empty() || content.to_lowercase().starts_with(NO_SQL_SENTINEL) {
        return None;
    }

    if let Some(captures) = FENCE_REGEX.captures(content) {
        let block = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if block.to_lowercase().starts_with(NO_SQL_SENTINEL) {
            return None;
        }
        if let Some(sql) = pick(candidates(block, true)) {
            debug!("Extracted SQL from fenced block");
            return Some(sql);
        }
    }

    // Unterminated fences, e.g. the answer to a prompt ending in ```sql
    let unfenced = content
        .trim_start_matches("```sqlite")
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```");

    let sql = pick(candidates(unfenced, false));
    if sql.is_some() {
        debug!("Extracted SQL using line scanning");
    }
    sql
}
