use super::{Column, ForeignKey, SchemaCatalog, Table};
use crate::errors::PipelineResult;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::{debug, warn};

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl SchemaCatalog {
    /// Reads tables, columns and foreign keys from a SQLite database.
    ///
    /// Internal `sqlite_*` tables are skipped. Foreign keys that point at tables or columns
    /// missing from the database are dropped with a warning.
    pub fn introspect(conn: &Connection) -> PipelineResult<Self> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        let mut foreign_keys = Vec::new();

        for name in &names {
            let mut cols = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
            let columns = cols
                .query_map([], |row| {
                    let col_name: String = row.get(1)?;
                    let data_type: String = row.get(2)?;
                    let not_null: i64 = row.get(3)?;
                    let pk: i64 = row.get(5)?;
                    Ok(Column {
                        name: col_name,
                        data_type: if data_type.is_empty() {
                            "ANY".to_string()
                        } else {
                            data_type
                        },
                        primary_key: pk > 0,
                        nullable: not_null == 0 && pk == 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let table = Table {
                name: name.clone(),
                columns,
            };

            let mut fks = conn.prepare(&format!(
                "PRAGMA foreign_key_list({})",
                quote_ident(name)
            ))?;
            let raw = fks
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (to_table, from_column, to_column) in raw {
                foreign_keys.push((name.clone(), from_column, to_table, to_column));
            }

            debug!(table = %name, columns = table.columns.len(), "introspected table");
            tables.push(table);
        }

        // Resolve implicit targets (REFERENCES t without a column) to the primary key.
        let lookup = Self::new(tables.clone(), Vec::new())?;
        let mut resolved = Vec::new();
        for (from_table, from_column, to_table, to_column) in foreign_keys {
            let to_column = match to_column {
                Some(c) => Some(c),
                None => lookup
                    .table(&to_table)
                    .and_then(|t| t.primary_key().first().map(|c| c.to_string())),
            };
            let Some(to_column) = to_column else {
                warn!(from = %from_table, to = %to_table, "foreign key target has no primary key; skipped");
                continue;
            };
            let fk = ForeignKey::new(from_table, from_column, to_table, to_column);
            if lookup.has_column(&fk.from_table, &fk.from_column)
                && lookup.has_column(&fk.to_table, &fk.to_column)
            {
                resolved.push(fk);
            } else {
                warn!(
                    from = %format!("{}.{}", fk.from_table, fk.from_column),
                    to = %format!("{}.{}", fk.to_table, fk.to_column),
                    "foreign key references missing column; skipped"
                );
            }
        }

        Self::new(tables, resolved)
    }

    /// Opens the database read-only and introspects it.
    pub fn introspect_path(path: &Path) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::introspect(&conn)
    }
}
