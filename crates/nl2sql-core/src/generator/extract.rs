//! Deterministic extraction of the SQL statement from free-form model output.
//!
//! Candidates, in order of preference:
//! 1. fenced code blocks whose body is SQL-shaped, last block first;
//! 2. per paragraph, last paragraph first: each line starting `SELECT`/`WITH` (an optional
//!    short `label:` prefix is allowed, but not `Step N:`), read up to the first line ending
//!    in `;` or the end of the paragraph.
//!
//! The first candidate that parses as SQL wins. When none parses, the first candidate is
//! returned so the validator can report the syntax error.

use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

lazy_static! {
    /// ```lang\n body ``` with an optional language tag.
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap();
    /// Start of a statement, optionally behind a short `SQL:`-style label.
    static ref STATEMENT_START: Regex =
        Regex::new(r"(?i)^\s*(?:([^:\n]{0,80}):\s*)?((?:SELECT|WITH)\b.*)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ExtractionFailure {
    pub reason: String,
}

fn strip_leading_comments(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            s = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else {
            return s;
        }
    }
}

/// True when the text (after leading comments) starts with `SELECT` or `WITH` followed by
/// more text.
pub fn looks_like_sql(s: &str) -> bool {
    let body = strip_leading_comments(s);
    ["SELECT", "WITH"].iter().any(|kw| {
        body.len() >= kw.len()
            && body.is_char_boundary(kw.len())
            && body[..kw.len()].eq_ignore_ascii_case(kw)
            && body[kw.len()..]
                .chars()
                .next()
                .is_some_and(|c| !(c.is_alphanumeric() || c == '_'))
    })
}

fn clean(sql: &str) -> String {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

/// Reasoning steps (`Step 2: select the shipped orders`) are prose, not labels.
fn is_step_label(label: &str) -> bool {
    let label = label.trim().to_ascii_lowercase();
    label.starts_with("step") || label.chars().any(|c| c.is_ascii_digit())
}

/// Statement text starting on this line, if the line opens one.
fn statement_start(line: &str) -> Option<&str> {
    let caps = STATEMENT_START.captures(line)?;
    if caps.get(1).is_some_and(|label| is_step_label(label.as_str())) {
        return None;
    }
    caps.get(2).map(|m| m.as_str())
}

fn parses(sql: &str) -> bool {
    Parser::parse_sql(&GenericDialect {}, sql).is_ok_and(|statements| !statements.is_empty())
}

fn fence_candidates(response: &str) -> Vec<String> {
    let mut bodies: Vec<String> = FENCED_BLOCK
        .captures_iter(response)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|body| looks_like_sql(body))
        .map(clean)
        .collect();
    bodies.reverse();
    bodies
}

fn paragraph_candidates(response: &str) -> Vec<String> {
    let lines: Vec<&str> = response.lines().map(|l| l.trim_matches('`')).collect();
    let paragraphs: Vec<&[&str]> = lines
        .split(|l| l.trim().is_empty())
        .filter(|p| !p.is_empty())
        .collect();

    let mut out = Vec::new();
    for paragraph in paragraphs.iter().rev() {
        for (start, line) in paragraph.iter().copied().enumerate() {
            let Some(first) = statement_start(line) else {
                continue;
            };
            let mut statement = vec![first];
            if !first.trim_end().ends_with(';') {
                for line in paragraph[start + 1..].iter().copied() {
                    statement.push(line);
                    if line.trim_end().ends_with(';') {
                        break;
                    }
                }
            }
            out.push(clean(&statement.join("\n")));
        }
    }
    out
}

pub fn extract_sql(response: &str) -> Result<String, ExtractionFailure> {
    if response.trim().is_empty() {
        return Err(ExtractionFailure {
            reason: "model returned an empty answer".into(),
        });
    }
    let candidates: Vec<String> = fence_candidates(response)
        .into_iter()
        .chain(paragraph_candidates(response))
        .filter(|sql| looks_like_sql(sql))
        .collect();

    candidates
        .iter()
        .find(|sql| parses(sql))
        .or_else(|| candidates.first())
        .cloned()
        .ok_or_else(|| ExtractionFailure {
            reason: "no statement starting with SELECT or WITH was found".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_statement_loses_trailing_semicolon() {
        assert_eq!(
            extract_sql("SELECT * FROM customers;\n").unwrap(),
            "SELECT * FROM customers"
        );
    }

    #[test]
    fn last_sql_fence_wins() {
        let text = "First try:\n```sql\nSELECT 1\n```\nBetter:\n```sql\nSELECT name FROM products;\n```\nDone.";
        assert_eq!(extract_sql(text).unwrap(), "SELECT name FROM products");
    }

    #[test]
    fn non_sql_fences_are_skipped() {
        let text = "```sql\nSELECT a FROM t\n```\n```python\nprint('hi')\n```";
        assert_eq!(extract_sql(text).unwrap(), "SELECT a FROM t");
    }

    #[test]
    fn chain_of_thought_answer() {
        let text = "Step 1. Tables: customers, orders\n\
                    Step 2. Join orders.customer_id = customers.customer_id\n\
                    Step 3. Group by customer\n\
                    Step 4.\n\
                    ```sql\n\
                    SELECT c.name, COUNT(o.order_id) AS orders\n\
                    FROM customers c JOIN orders o ON o.customer_id = c.customer_id\n\
                    GROUP BY c.name\n\
                    ```";
        let sql = extract_sql(text).unwrap();
        assert!(sql.starts_with("SELECT c.name"));
        assert!(sql.ends_with("GROUP BY c.name"));
    }

    #[test]
    fn labelled_statement_in_prose() {
        let text = "Here is the query.\n\nSQL: SELECT COUNT(*) FROM orders WHERE status = 'shipped';\n\nIt counts shipped orders.";
        assert_eq!(
            extract_sql(text).unwrap(),
            "SELECT COUNT(*) FROM orders WHERE status = 'shipped'"
        );
    }

    #[test]
    fn multi_line_cte_stops_at_semicolon() {
        let text = "WITH totals AS (\n  SELECT order_id, SUM(amount) AS paid FROM payments GROUP BY order_id\n)\nSELECT * FROM totals;\nThis returns totals.";
        assert_eq!(
            extract_sql(text).unwrap(),
            "WITH totals AS (\n  SELECT order_id, SUM(amount) AS paid FROM payments GROUP BY order_id\n)\nSELECT * FROM totals"
        );
    }

    #[test]
    fn leading_comment_is_still_sql() {
        assert!(looks_like_sql("-- top customers\nSELECT 1"));
        assert!(!looks_like_sql("SELECTED items"));
        assert!(!looks_like_sql("with"));
    }

    #[test]
    fn prose_without_sql_fails() {
        let err = extract_sql("I cannot answer that question with this schema.").unwrap_err();
        assert!(err.reason.contains("SELECT or WITH"));
        assert!(extract_sql("   ").is_err());
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "```sql\nSELECT 1\n```";
        assert_eq!(extract_sql(text), extract_sql(text));
    }

    #[test]
    fn reasoning_step_is_not_a_statement_label() {
        let text = "Step 1: Tables: orders\n\
                    Step 2: Select only shipped orders\n\
                    SELECT COUNT(*) FROM orders WHERE status = 'shipped';";
        assert_eq!(
            extract_sql(text).unwrap(),
            "SELECT COUNT(*) FROM orders WHERE status = 'shipped'"
        );
    }

    #[test]
    fn trailing_prose_starting_with_with_is_skipped() {
        let text = "SELECT COUNT(*) FROM orders;\n\nWith this query you get the number of orders.";
        assert_eq!(extract_sql(text).unwrap(), "SELECT COUNT(*) FROM orders");
    }

    #[test]
    fn unparseable_statement_is_still_handed_on() {
        // Nothing parses; the validator reports the syntax error.
        assert_eq!(
            extract_sql("SELECT name FROM customers WHERE;").unwrap(),
            "SELECT name FROM customers WHERE"
        );
    }
}
