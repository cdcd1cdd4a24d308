use sqlparser::ast::{Expr, Query, Select, SelectItem, SetExpr, Statement, TableFactor, Visitor};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// What a FROM-clause entry provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Source {
    /// A named relation: a catalog table or a CTE.
    Named(String),
    /// Derived table, table function or anything else without a static column list.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Factor {
    pub source: Source,
    pub alias: Option<String>,
}

/// Everything the validator needs from one pass over the statement tree.
#[derive(Debug, Default)]
pub(super) struct Collector {
    /// Keyword of the first non-query statement (or `SELECT INTO`) found anywhere.
    pub forbidden: Option<String>,
    /// Lowercased CTE names.
    pub ctes: BTreeSet<String>,
    /// Lowercased select-list aliases.
    pub aliases: BTreeSet<String>,
    /// FROM entries in document order.
    pub factors: Vec<Factor>,
    /// `qualifier.column` references as written.
    pub qualified: Vec<(String, String)>,
    pub unqualified: Vec<String>,
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .map(str::to_uppercase)
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn selects<'a>(body: &'a SetExpr, out: &mut Vec<&'a Select>) {
    match body {
        SetExpr::Select(select) => out.push(select),
        SetExpr::Query(query) => selects(&query.body, out),
        SetExpr::SetOperation { left, right, .. } => {
            selects(left, out);
            selects(right, out);
        }
        _ => {}
    }
}

impl Collector {
    fn forbid(&mut self, keyword: String) {
        if self.forbidden.is_none() {
            self.forbidden = Some(keyword);
        }
    }

    fn opaque(&mut self, alias: Option<String>) {
        self.factors.push(Factor {
            source: Source::Opaque,
            alias,
        });
    }
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        if !matches!(statement, Statement::Query(_)) {
            self.forbid(statement_keyword(statement));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }

        let mut found = Vec::new();
        selects(&query.body, &mut found);
        for select in found {
            if select.into.is_some() {
                self.forbid("SELECT INTO".to_string());
            }
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    self.aliases.insert(alias.value.to_lowercase());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                let alias = alias.as_ref().map(|a| a.name.value.clone());
                match name.0.last() {
                    Some(ident) if args.is_none() => self.factors.push(Factor {
                        source: Source::Named(ident.value.clone()),
                        alias,
                    }),
                    _ => self.opaque(alias),
                }
            }
            TableFactor::Derived { alias, .. } => {
                self.opaque(alias.as_ref().map(|a| a.name.value.clone()));
            }
            // Inner factors are visited on their own.
            TableFactor::NestedJoin { .. } => {}
            _ => self.opaque(None),
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.unqualified.push(ident.value.clone()),
            Expr::CompoundIdentifier(idents) if idents.len() >= 2 => {
                let n = idents.len();
                self.qualified
                    .push((idents[n - 2].value.clone(), idents[n - 1].value.clone()));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}
