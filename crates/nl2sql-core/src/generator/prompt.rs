use crate::model::{Example, Feedback, Strategy};
use std::fmt::Write as _;

const SCHEMA_FIRST_RULES: &str = "\
Rules:
1. Use only the tables and columns listed in the schema.
2. Follow the listed relationships when joining tables.
3. Write a single read-only SELECT statement (WITH ... SELECT is allowed).
4. Use explicit column names and table aliases for joins.
5. Do not modify data or schema in any way.";

const CHAIN_OF_THOUGHT_STEPS: &str = "\
Work through the question step by step:
Step 1. List the tables needed to answer it.
Step 2. List the columns and the joins between those tables, using the relationships above.
Step 3. List the filters, groupings and ordering the question asks for.
Step 4. Write the final query.

The final query must be a single read-only SELECT statement using only the schema above.
End your answer with the final query in a ```sql fenced block.";

/// Few-shot section: `Example i:` blocks, numbered from 1.
pub fn format_examples(examples: &[Example]) -> String {
    let mut out = String::new();
    for (i, ex) in examples.iter().enumerate() {
        let _ = writeln!(out, "Example {}:\nQ: {}\nSQL: {}\n", i + 1, ex.question, ex.sql);
    }
    out.trim_end().to_string()
}

/// Full prompt for one generation call.
pub fn build_prompt(
    strategy: Strategy,
    schema_summary: &str,
    examples: &[Example],
    question: &str,
    feedback: Option<&Feedback>,
) -> String {
    let mut out = String::from(
        "You translate business questions into SQLite queries over the database described below.\n\n",
    );
    let _ = writeln!(out, "## Schema\n{}\n", schema_summary.trim());

    if !examples.is_empty() {
        let _ = writeln!(out, "## Similar verified examples\n{}\n", format_examples(examples));
    }

    match strategy {
        Strategy::SchemaFirst => {
            let _ = writeln!(out, "{}\n", SCHEMA_FIRST_RULES);
        }
        Strategy::ChainOfThought => {
            let _ = writeln!(out, "{}\n", CHAIN_OF_THOUGHT_STEPS);
        }
    }

    if let Some(feedback) = feedback {
        let _ = writeln!(out, "{}", feedback.render());
    }

    let _ = writeln!(out, "## Question\n{}\n", question.trim());
    match strategy {
        Strategy::SchemaFirst => out.push_str("Return only the SQL query, without explanation.\nSQL:"),
        Strategy::ChainOfThought => out.push_str("Answer:"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ValidationReason, ValidationResult};

    fn examples() -> Vec<Example> {
        vec![
            Example {
                id: 1,
                question: "How many customers are there?".into(),
                sql: "SELECT COUNT(*) FROM customers".into(),
                embedding: vec![],
            },
            Example {
                id: 2,
                question: "List all products".into(),
                sql: "SELECT * FROM products".into(),
                embedding: vec![],
            },
        ]
    }

    #[test]
    fn examples_are_numbered_from_one() {
        let text = format_examples(&examples());
        assert!(text.starts_with("Example 1:\nQ: How many customers are there?\nSQL: SELECT COUNT(*) FROM customers"));
        assert!(text.contains("Example 2:\nQ: List all products"));
    }

    #[test]
    fn schema_first_prompt_asks_for_sql_only() {
        let prompt = build_prompt(
            Strategy::SchemaFirst,
            "Table: customers",
            &examples(),
            "Top 5 customers?",
            None,
        );
        assert!(prompt.contains("## Schema\nTable: customers"));
        assert!(prompt.contains("## Similar verified examples"));
        assert!(prompt.contains("Top 5 customers?"));
        assert!(prompt.ends_with("SQL:"));
        assert!(!prompt.contains("Previous attempt failed"));
    }

    #[test]
    fn chain_of_thought_prompt_requests_fenced_answer() {
        let prompt = build_prompt(Strategy::ChainOfThought, "Table: orders", &[], "q", None);
        assert!(prompt.contains("Step 1. List the tables"));
        assert!(prompt.contains("```sql fenced block"));
        assert!(!prompt.contains("Similar verified examples"));
    }

    #[test]
    fn feedback_is_included_verbatim() {
        let feedback = Feedback::Validation {
            sql: "SELECT x FROM orders".into(),
            result: ValidationResult::reject(ValidationReason::UnknownColumn, "unknown column 'x'"),
        };
        let prompt = build_prompt(Strategy::SchemaFirst, "s", &[], "q", Some(&feedback));
        assert!(prompt.contains(&feedback.render()));
    }
}
