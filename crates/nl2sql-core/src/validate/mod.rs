//! Static validation of generated SQL against the schema catalog.
//!
//! Checks run in order and stop at the first failure: parse, read-only statement,
//! table references, column references. No database access; the result depends only on
//! the SQL text and the catalog.

mod collect;

use crate::model::{ValidationReason, ValidationResult};
use crate::schema::SchemaCatalog;
use collect::{Collector, Source};
use sqlparser::ast::Visit;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::{BTreeMap, BTreeSet};

/// Statement keywords that are never allowed, even in SQL that does not parse.
const BLOCKED_KEYWORDS: [Keyword; 12] = [
    Keyword::DROP,
    Keyword::DELETE,
    Keyword::UPDATE,
    Keyword::INSERT,
    Keyword::CREATE,
    Keyword::ALTER,
    Keyword::TRUNCATE,
    Keyword::GRANT,
    Keyword::REVOKE,
    Keyword::PRAGMA,
    Keyword::ATTACH,
    Keyword::DETACH,
];

const BLOCKED_WORDS: [&str; 12] = [
    "DROP", "DELETE", "UPDATE", "INSERT", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "PRAGMA", "ATTACH", "DETACH",
];

/// First unquoted blocked keyword in the token stream.
///
/// Falls back to a plain word scan when the text cannot even be tokenized.
fn blocked_keyword(sql: &str) -> Option<String> {
    let dialect = GenericDialect {};
    match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens.iter().find_map(|t| match t {
            Token::Word(w) if w.quote_style.is_none() && BLOCKED_KEYWORDS.contains(&w.keyword) => {
                Some(w.value.to_uppercase())
            }
            _ => None,
        }),
        Err(_) => sql
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .map(str::to_uppercase)
            .find(|w| BLOCKED_WORDS.contains(&w.as_str())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    /// Declared catalog name.
    Table(String),
    Opaque,
}

pub fn validate(sql: &str, schema: &SchemaCatalog) -> ValidationResult {
    let dialect = GenericDialect {};
    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements,
        Err(e) => {
            if let Some(keyword) = blocked_keyword(sql) {
                return ValidationResult::reject(
                    ValidationReason::Unsafe,
                    format!("statement contains forbidden keyword {keyword}"),
                );
            }
            return ValidationResult::reject(ValidationReason::SyntaxError, e.to_string());
        }
    };

    let statement = match statements.as_slice() {
        [] => {
            return ValidationResult::reject(ValidationReason::SyntaxError, "empty statement");
        }
        [one] => one,
        _ => {
            return ValidationResult::reject(
                ValidationReason::Unsafe,
                format!(
                    "multiple statements are not allowed (found {})",
                    statements.len()
                ),
            );
        }
    };

    let mut refs = Collector::default();
    let _ = statement.visit(&mut refs);

    if let Some(keyword) = &refs.forbidden {
        return ValidationResult::reject(
            ValidationReason::Unsafe,
            format!("only read-only queries are allowed; found {keyword}"),
        );
    }

    for factor in &refs.factors {
        if let Source::Named(name) = &factor.source {
            if !refs.ctes.contains(&name.to_lowercase()) && !schema.has_table(name) {
                return ValidationResult::reject(
                    ValidationReason::UnknownTable,
                    format!("unknown table '{name}'"),
                );
            }
        }
    }

    // Bind every FROM entry under its alias, or its own name when unaliased.
    let mut bindings: BTreeMap<String, Vec<Binding>> = BTreeMap::new();
    let mut tables: BTreeSet<String> = BTreeSet::new();
    let mut opaque_in_scope = false;
    for factor in &refs.factors {
        let binding = match &factor.source {
            Source::Named(name) if !refs.ctes.contains(&name.to_lowercase()) => {
                match schema.table(name) {
                    Some(t) => Binding::Table(t.name.clone()),
                    None => Binding::Opaque,
                }
            }
            _ => Binding::Opaque,
        };
        if let Binding::Table(t) = &binding {
            tables.insert(t.clone());
        } else {
            opaque_in_scope = true;
        }
        let key = match (&factor.alias, &factor.source) {
            (Some(alias), _) => Some(alias.to_lowercase()),
            (None, Source::Named(name)) => Some(name.to_lowercase()),
            (None, Source::Opaque) => None,
        };
        if let Some(key) = key {
            bindings.entry(key).or_default().push(binding);
        }
    }

    let mut columns: BTreeSet<String> = BTreeSet::new();

    for (qualifier, column) in &refs.qualified {
        let bound: Vec<&Binding> = match bindings.get(&qualifier.to_lowercase()) {
            Some(b) => b.iter().collect(),
            // Unknown qualifier: cannot be resolved statically.
            None => continue,
        };
        if bound.iter().any(|b| **b == Binding::Opaque) {
            continue;
        }
        let owner = bound.iter().find_map(|b| match b {
            Binding::Table(t) if schema.has_column(t, column) => Some(t.clone()),
            _ => None,
        });
        match owner {
            Some(t) => {
                columns.insert(format!("{}.{}", t, canonical_column(schema, &t, column)));
            }
            None => {
                let table = bound
                    .iter()
                    .find_map(|b| match b {
                        Binding::Table(t) => Some(t.as_str()),
                        Binding::Opaque => None,
                    })
                    .unwrap_or(qualifier.as_str());
                return ValidationResult::reject(
                    ValidationReason::UnknownColumn,
                    format!("unknown column '{qualifier}.{column}': table '{table}' has no column '{column}'"),
                );
            }
        }
    }

    for column in &refs.unqualified {
        let owners: Vec<&String> = tables
            .iter()
            .filter(|t| schema.has_column(t, column))
            .collect();
        if !owners.is_empty() {
            for t in owners {
                columns.insert(format!("{}.{}", t, canonical_column(schema, t, column)));
            }
            continue;
        }
        if refs.aliases.contains(&column.to_lowercase()) || opaque_in_scope {
            continue;
        }
        let detail = if tables.is_empty() {
            format!("unknown column '{column}': the query references no tables")
        } else {
            format!(
                "unknown column '{column}': not found in {}",
                tables.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        };
        return ValidationResult::reject(ValidationReason::UnknownColumn, detail);
    }

    ValidationResult::ok(tables, columns)
}

fn canonical_column(schema: &SchemaCatalog, table: &str, column: &str) -> String {
    schema
        .table(table)
        .and_then(|t| t.find_column(column))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| column.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::shop_catalog;

    fn reason(sql: &str) -> ValidationReason {
        validate(sql, &shop_catalog()).reason
    }

    #[test]
    fn plain_select_is_ok() {
        let result = validate("SELECT * FROM customers;", &shop_catalog());
        assert!(result.valid);
        assert_eq!(result.reason, ValidationReason::Ok);
        assert_eq!(
            result.referenced_tables,
            BTreeSet::from(["customers".to_string()])
        );
    }

    #[test]
    fn identifier_containing_keyword_is_not_unsafe() {
        let result = validate("SELECT update_count FROM orders;", &shop_catalog());
        assert_eq!(result.reason, ValidationReason::UnknownColumn);
        assert!(result.detail.contains("update_count"));
    }

    #[test]
    fn every_write_keyword_is_unsafe() {
        for sql in [
            "DROP TABLE customers",
            "DELETE FROM orders WHERE order_id = 1",
            "UPDATE products SET price = 0",
            "INSERT INTO customers (name) VALUES ('x')",
            "CREATE TABLE t (id INTEGER)",
            "ALTER TABLE orders ADD COLUMN note TEXT",
            "TRUNCATE TABLE payments",
        ] {
            let result = validate(sql, &shop_catalog());
            assert_eq!(result.reason, ValidationReason::Unsafe, "{sql}");
            let keyword = sql.split_whitespace().next().unwrap();
            assert!(result.detail.contains(keyword), "{sql}: {}", result.detail);
        }
    }

    #[test]
    fn unparseable_text_with_write_keyword_is_unsafe() {
        let result = validate("DROP TABLE IF EXISTS customers CASCADE PLEASE NOW", &shop_catalog());
        assert_eq!(result.reason, ValidationReason::Unsafe);
        assert_eq!(
            reason("SELECT * FROM customers WHERE; drop table customers"),
            ValidationReason::Unsafe
        );
    }

    #[test]
    fn quoted_keyword_in_broken_sql_is_a_syntax_error() {
        assert_eq!(reason("SELECT 'drop' FROM"), ValidationReason::SyntaxError);
        assert_eq!(reason("SELEC name FROM customers"), ValidationReason::SyntaxError);
        assert_eq!(reason(""), ValidationReason::SyntaxError);
    }

    #[test]
    fn multiple_statements_are_unsafe() {
        let result = validate("SELECT 1; SELECT 2", &shop_catalog());
        assert_eq!(result.reason, ValidationReason::Unsafe);
        assert!(result.detail.contains("multiple statements"));
        assert_eq!(
            reason("SELECT * FROM customers; DROP TABLE customers"),
            ValidationReason::Unsafe
        );
    }

    #[test]
    fn unknown_table_is_named() {
        let result = validate(
            "SELECT s.name FROM suppliers s JOIN vendors v ON v.id = s.id",
            &shop_catalog(),
        );
        assert_eq!(result.reason, ValidationReason::UnknownTable);
        assert!(result.detail.contains("'suppliers'"));
    }

    #[test]
    fn unknown_table_inside_subquery() {
        assert_eq!(
            reason("SELECT name FROM customers WHERE customer_id IN (SELECT customer_id FROM ghosts)"),
            ValidationReason::UnknownTable
        );
    }

    #[test]
    fn qualified_columns_resolve_through_aliases() {
        let result = validate(
            "SELECT c.name, SUM(p.amount) AS total
             FROM customers c
             JOIN orders o ON o.customer_id = c.customer_id
             JOIN payments p ON p.order_id = o.order_id
             GROUP BY c.name
             ORDER BY total DESC
             LIMIT 5",
            &shop_catalog(),
        );
        assert!(result.valid, "{}", result.detail);
        assert!(result.referenced_columns.contains("payments.amount"));
        assert!(result.referenced_columns.contains("orders.customer_id"));
        assert_eq!(result.referenced_tables.len(), 3);
    }

    #[test]
    fn qualified_unknown_column_names_the_table() {
        let result = validate(
            "SELECT o.total FROM orders o",
            &shop_catalog(),
        );
        assert_eq!(result.reason, ValidationReason::UnknownColumn);
        assert!(result.detail.contains("table 'orders' has no column 'total'"));
    }

    #[test]
    fn unqualified_column_must_exist_in_some_bound_table() {
        assert!(validate(
            "SELECT name, status FROM customers JOIN orders USING (customer_id)",
            &shop_catalog()
        )
        .valid);
        assert_eq!(
            reason("SELECT price FROM customers JOIN orders ON orders.customer_id = customers.customer_id"),
            ValidationReason::UnknownColumn
        );
    }

    #[test]
    fn cte_and_derived_columns_are_not_rejected() {
        assert!(validate(
            "WITH spend AS (SELECT customer_id, SUM(amount) AS total FROM payments p JOIN orders o ON o.order_id = p.order_id GROUP BY customer_id)
             SELECT s.customer_id, s.total FROM spend s ORDER BY total DESC",
            &shop_catalog()
        )
        .valid);
        assert!(validate(
            "SELECT t.n FROM (SELECT COUNT(*) AS n FROM orders) t",
            &shop_catalog()
        )
        .valid);
    }

    #[test]
    fn cte_name_is_not_an_unknown_table() {
        let result = validate(
            "WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent",
            &shop_catalog(),
        );
        assert!(result.valid, "{}", result.detail);
        assert!(result.referenced_tables.contains("orders"));
    }

    #[test]
    fn names_compare_case_insensitively() {
        let result = validate("SELECT Name FROM CUSTOMERS", &shop_catalog());
        assert!(result.valid, "{}", result.detail);
        assert!(result.referenced_columns.contains("customers.name"));
    }

    #[test]
    fn column_without_any_table_is_unknown() {
        assert_eq!(reason("SELECT mystery"), ValidationReason::UnknownColumn);
        assert!(validate("SELECT 1", &shop_catalog()).valid);
    }

    #[test]
    fn validation_is_pure() {
        let catalog = shop_catalog();
        let sql = "SELECT o.status, COUNT(*) FROM orders o GROUP BY o.status";
        assert_eq!(validate(sql, &catalog), validate(sql, &catalog));
    }
}
