//! Schema catalog: tables, columns and foreign keys of the target database.
//!
//! Built once (explicitly or by introspection) and shared read-only. Names compare
//! case-insensitively; the declared spelling is kept for prompts and reports.

mod introspect;

use crate::errors::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            primary_key: false,
            nullable: true,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Directed edge `from_table.from_column -> to_table.to_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl ForeignKey {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    /// Keyed by lowercase table name.
    tables: BTreeMap<String, Table>,
    foreign_keys: Vec<ForeignKey>,
}

impl SchemaCatalog {
    /// Builds the catalog; every foreign key must resolve to existing tables and columns.
    pub fn new(tables: Vec<Table>, foreign_keys: Vec<ForeignKey>) -> PipelineResult<Self> {
        let mut map = BTreeMap::new();
        for table in tables {
            let key = table.name.to_lowercase();
            if map.insert(key, table.clone()).is_some() {
                return Err(PipelineError::Config {
                    message: format!("duplicate table in schema: {}", table.name),
                });
            }
        }
        let catalog = Self {
            tables: map,
            foreign_keys: Vec::new(),
        };
        for fk in &foreign_keys {
            catalog.check_foreign_key(fk)?;
        }
        Ok(Self {
            foreign_keys,
            ..catalog
        })
    }

    fn check_foreign_key(&self, fk: &ForeignKey) -> PipelineResult<()> {
        for (table, column) in [(&fk.from_table, &fk.from_column), (&fk.to_table, &fk.to_column)] {
            if !self.has_column(table, column) {
                return Err(PipelineError::Config {
                    message: format!(
                        "foreign key {}.{} -> {}.{} references missing column {}.{}",
                        fk.from_table, fk.from_column, fk.to_table, fk.to_column, table, column
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.tables.values().map(|t| t.name.clone()).collect()
    }

    pub fn columns(&self, table: &str) -> PipelineResult<BTreeSet<String>> {
        let table = self
            .table(table)
            .ok_or_else(|| PipelineError::UnknownTable {
                table: table.to_string(),
            })?;
        Ok(table.columns.iter().map(|c| c.name.clone()).collect())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .is_some_and(|t| t.find_column(column).is_some())
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Full schema summary for prompts.
    pub fn describe(&self) -> String {
        let all = self.tables.keys().cloned().collect();
        self.describe_subset(&all)
    }

    /// Tables the question names directly, matched on whole words.
    pub fn relevant_tables(&self, question: &str) -> BTreeSet<String> {
        let words: BTreeSet<String> = question
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(|w| singular(&w.to_lowercase()))
            .collect();

        self.tables
            .keys()
            .filter(|key| {
                words.contains(&singular(key))
                    || key
                        .split('_')
                        .all(|part| !part.is_empty() && words.contains(&singular(part)))
            })
            .cloned()
            .collect()
    }

    /// Summary of the subgraph connecting the tables the question mentions.
    ///
    /// Tables on a shortest foreign-key path between any two mentioned tables are included
    /// so join paths stay visible. Falls back to [`describe`](Self::describe) when nothing
    /// matches.
    pub fn describe_relevant(&self, question: &str) -> String {
        let relevant = self.relevant_tables(question);
        if relevant.is_empty() {
            return self.describe();
        }
        let mut selected = relevant.clone();
        let seeds: Vec<&String> = relevant.iter().collect();
        for (i, a) in seeds.iter().enumerate() {
            for b in &seeds[i + 1..] {
                if let Some(path) = self.shortest_path(a, b) {
                    selected.extend(path);
                }
            }
        }
        self.describe_subset(&selected)
    }

    fn adjacency(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut adj: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for fk in &self.foreign_keys {
            let from = fk.from_table.to_lowercase();
            let to = fk.to_table.to_lowercase();
            adj.entry(from.clone()).or_default().insert(to.clone());
            adj.entry(to).or_default().insert(from);
        }
        adj
    }

    fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let adj = self.adjacency();
        let mut prev: BTreeMap<String, String> = BTreeMap::new();
        let mut queue = VecDeque::from([from.to_string()]);
        let mut seen = BTreeSet::from([from.to_string()]);

        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![node.clone()];
                let mut cur = node;
                while let Some(p) = prev.get(&cur) {
                    path.push(p.clone());
                    cur = p.clone();
                }
                path.reverse();
                return Some(path);
            }
            for next in adj.get(&node).into_iter().flatten() {
                if seen.insert(next.clone()) {
                    prev.insert(next.clone(), node.clone());
                    queue.push_back(next.clone());
                }
            }
        }
        None
    }

    fn describe_subset(&self, keys: &BTreeSet<String>) -> String {
        let mut out = String::new();
        for table in keys.iter().filter_map(|k| self.tables.get(k)) {
            let _ = writeln!(out, "Table: {}", table.name);
            for col in &table.columns {
                let _ = write!(out, "  - {} {}", col.name, col.data_type);
                if col.primary_key {
                    out.push_str(" [PK]");
                } else if !col.nullable {
                    out.push_str(" NOT NULL");
                }
                out.push('\n');
            }
            out.push('\n');
        }

        let edges: Vec<&ForeignKey> = self
            .foreign_keys
            .iter()
            .filter(|fk| {
                keys.contains(&fk.from_table.to_lowercase())
                    && keys.contains(&fk.to_table.to_lowercase())
            })
            .collect();
        if !edges.is_empty() {
            out.push_str("Relationships:\n");
            for fk in edges {
                let _ = writeln!(
                    out,
                    "  - {}.{} -> {}.{}",
                    fk.from_table, fk.from_column, fk.to_table, fk.to_column
                );
            }
        }
        out.trim_end().to_string()
    }
}

fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}
