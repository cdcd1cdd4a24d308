//! Append-only SQLite persistence for verified examples.

use super::ExampleIndex;
use crate::model::Example;
use crate::providers::embedder::Embedder;
use anyhow::Context;
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS examples (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    question    TEXT NOT NULL,
    sql         TEXT NOT NULL,
    embedding   TEXT NOT NULL,
    model       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
";

#[derive(Debug, Deserialize)]
struct SeedExample {
    question: String,
    sql: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedFile {
    List(Vec<SeedExample>),
    Wrapped { examples: Vec<SeedExample> },
}

impl SeedFile {
    fn into_examples(self) -> Vec<SeedExample> {
        match self {
            Self::List(v) | Self::Wrapped { examples: v } => v,
        }
    }
}

#[derive(Clone)]
pub struct ExampleStore {
    conn: Arc<Mutex<Connection>>,
}

impl ExampleStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open example store")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        // SQLite in-memory DB
        let conn = Connection::open_in_memory().context("failed to open in-memory example store")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        self.lock().execute_batch(DDL)?;
        Ok(())
    }

    /// Appends one example and returns its id. Existing rows are never updated.
    pub fn append(
        &self,
        question: &str,
        sql: &str,
        embedding: &[f32],
        model: &str,
    ) -> anyhow::Result<u64> {
        let encoded = serde_json::to_string(embedding)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO examples (question, sql, embedding, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![question, sql, encoded, model, chrono::Utc::now().to_rfc3339()],
        )
        .context("failed to append example")?;
        Ok(conn.last_insert_rowid() as u64)
    }

    pub fn count(&self) -> anyhow::Result<usize> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM examples", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All examples in insertion order.
    pub fn list(&self) -> anyhow::Result<Vec<Example>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, question, sql, embedding FROM examples ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, question, sql, embedding) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding)
                .with_context(|| format!("example {id} has a corrupt embedding"))?;
            out.push(Example {
                id: id as u64,
                question,
                sql,
                embedding,
            });
        }
        Ok(out)
    }

    pub fn load_index(&self) -> anyhow::Result<ExampleIndex> {
        let mut index = ExampleIndex::new();
        for example in self.list()? {
            index.insert(example)?;
        }
        Ok(index)
    }

    /// Embeds a question and appends the pair.
    pub async fn add(
        &self,
        embedder: &dyn Embedder,
        question: &str,
        sql: &str,
    ) -> anyhow::Result<u64> {
        let embedding = embedder
            .embed(question)
            .await
            .with_context(|| format!("failed to embed example: {question}"))?;
        self.append(question, sql, &embedding, &embedder.model_id())
    }

    /// Loads `[{question, sql}]` or `{"examples": [...]}` and appends every pair.
    pub async fn seed_from_json(&self, path: &Path, embedder: &dyn Embedder) -> anyhow::Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let seed: SeedFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse seed file {}", path.display()))?;

        let examples = seed.into_examples();
        for ex in &examples {
            self.add(embedder, &ex.question, &ex.sql).await?;
        }
        info!(count = examples.len(), path = %path.display(), "seeded examples");
        Ok(examples.len())
    }
}
