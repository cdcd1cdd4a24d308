//! Read-only execution with bounded rows and time.

use crate::errors::{PipelineError, PipelineResult};
use crate::model::ExecutionResult;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde_json::Value;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether the statement already carries a `LIMIT` outside any parentheses.
pub fn has_top_level_limit(sql: &str) -> bool {
    let dialect = GenericDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, sql).tokenize() else {
        return false;
    };
    let mut depth = 0i32;
    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            Token::Word(w) if depth == 0 && w.quote_style.is_none() && w.keyword == Keyword::LIMIT => {
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Returns the statement to run and whether a cap was appended.
///
/// The appended cap is `max_rows + 1` so that one extra row proves the result was cut.
pub fn apply_row_cap(sql: &str, max_rows: usize) -> (String, bool) {
    let trimmed = sql
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if has_top_level_limit(trimmed) {
        (trimmed.to_string(), false)
    } else {
        // New line so a trailing line comment cannot swallow the cap.
        (format!("{trimmed}\nLIMIT {}", max_rows.saturating_add(1)), true)
    }
}

/// Interrupts the running statement unless disarmed; covers timeouts and abandoned calls.
struct InterruptGuard {
    handle: InterruptHandle,
    armed: bool,
}

impl InterruptGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.interrupt();
        }
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("0x{}", hex::encode(b))),
    }
}

/// Column names made unique (`name`, `name_2`, ...) so no value is lost in the row maps.
fn unique_columns(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut n = 1;
        while out.contains(&candidate) {
            n += 1;
            candidate = format!("{name}_{n}");
        }
        out.push(candidate);
    }
    out
}

/// Reads at most `max_rows` rows; `truncated` means another row was available.
fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> rusqlite::Result<ExecutionResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns = unique_columns(stmt.column_names().into_iter().map(String::from).collect());
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let mut map = serde_json::Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(map);
    }

    Ok(ExecutionResult {
        success: true,
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
        duration_ms: 0,
        executed_sql: sql.to_string(),
        error: None,
    })
}

#[derive(Debug, Clone)]
pub struct Executor {
    database: PathBuf,
    timeout: Duration,
}

impl Executor {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.database,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }

    /// Runs a validated statement.
    ///
    /// Database errors come back as `success = false`; only the timeout is an `Err`.
    pub async fn execute(&self, sql: &str, max_rows: usize) -> PipelineResult<ExecutionResult> {
        let (statement, _) = apply_row_cap(sql, max_rows);
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let conn = match self.open() {
            Ok(conn) => conn,
            Err(e) => {
                warn!(database = %self.database.display(), error = %e, "failed to open database");
                return Ok(ExecutionResult::failed(statement, e.to_string(), elapsed_ms()));
            }
        };
        let mut guard = InterruptGuard {
            handle: conn.get_interrupt_handle(),
            armed: true,
        };

        let task_sql = statement.clone();
        // The connection lives and dies on the blocking thread.
        let task = tokio::task::spawn_blocking(move || run_query(&conn, &task_sql, max_rows));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => {
                guard.disarm();
                let result = match joined {
                    Ok(Ok(mut result)) => {
                        result.duration_ms = elapsed_ms();
                        result
                    }
                    Ok(Err(e)) => ExecutionResult::failed(statement, e.to_string(), elapsed_ms()),
                    Err(e) => ExecutionResult::failed(
                        statement,
                        format!("execution task failed: {e}"),
                        elapsed_ms(),
                    ),
                };
                debug!(
                    success = result.success,
                    rows = result.row_count,
                    truncated = result.truncated,
                    duration_ms = result.duration_ms,
                    "statement executed"
                );
                Ok(result)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "statement timed out; interrupting");
                Err(PipelineError::ExecutionTimeout {
                    timeout: self.timeout,
                })
            }
        }
    }
}
