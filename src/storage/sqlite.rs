//! SQLite storage backend
//!
//! Uses rusqlite through a deadpool-sqlite pool capped at one connection, which
//! makes the pool the single logical writer for the entity graph. Every record
//! runs the recorder rules inside one SQLite transaction; a partial unique
//! index additionally rejects a second current result per subject.

use crate::error::{ApertureError, Result};
use crate::orchestration::recorder::{CurrentRef, RecordRequest, RecordTransaction, Recorder};
use crate::storage::EvaluationStore;
use crate::types::{
    CommerceMetadata, EvaluationResult, EvaluationStatus, Narrative, Placement, ResultId, Scores,
    Session, SessionId, Subject, SubjectId, UsageStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subjects (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    artifact_path TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    evaluation_count INTEGER NOT NULL DEFAULT 0,
    first_evaluated_at TEXT,
    last_evaluated_at TEXT,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    total_subjects INTEGER NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    total_cost_usd REAL NOT NULL DEFAULT 0,
    average_processing_time_ms REAL NOT NULL DEFAULT 0,
    providers TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS evaluation_results (
    id TEXT PRIMARY KEY NOT NULL,
    subject_id TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
    session_id TEXT REFERENCES sessions(id) ON DELETE SET NULL,
    evaluated_at TEXT NOT NULL,
    technical_quality REAL,
    composition REAL,
    commercial_potential REAL,
    artistic_merit REAL,
    overall_score REAL,
    placement TEXT,
    narrative TEXT NOT NULL DEFAULT '{}',
    commerce TEXT NOT NULL DEFAULT '{}',
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    processing_time_ms INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK(status IN ('completed', 'failed')),
    error_code TEXT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    parent_result_id TEXT REFERENCES evaluation_results(id) ON DELETE SET NULL,
    is_current INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_results_subject
    ON evaluation_results(subject_id, evaluated_at);
CREATE INDEX IF NOT EXISTS idx_results_session
    ON evaluation_results(session_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_results_one_current
    ON evaluation_results(subject_id) WHERE is_current = 1;

CREATE TABLE IF NOT EXISTS usage_stats (
    id INTEGER PRIMARY KEY CHECK(id = 1),
    total_input_tokens INTEGER NOT NULL DEFAULT 0,
    total_output_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost_usd REAL NOT NULL DEFAULT 0,
    images_evaluated INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT
);
INSERT OR IGNORE INTO usage_stats (id) VALUES (1);
"#;

const SUBJECT_COLUMNS: &str = "id, created_at, artifact_path, original_filename, \
    evaluation_count, first_evaluated_at, last_evaluated_at, is_favorite, notes";

const RESULT_COLUMNS: &str = "id, subject_id, session_id, evaluated_at, technical_quality, \
    composition, commercial_potential, artistic_merit, overall_score, placement, narrative, \
    commerce, provider, model, input_tokens, output_tokens, cost_usd, processing_time_ms, \
    status, error_code, error_message, retry_count, parent_result_id, is_current";

const SESSION_COLUMNS: &str = "id, started_at, ended_at, total_subjects, success_count, \
    failure_count, total_cost_usd, average_processing_time_ms, providers";

/// SQLite-backed evaluation store
pub struct SqliteStore {
    pool: Pool,
}

fn conversion_err<E>(err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn invalid_data(msg: String) -> rusqlite::Error {
    conversion_err(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

fn uuid_col(row: &Row<'_>, name: &str) -> rusqlite::Result<Uuid> {
    let s: String = row.get(name)?;
    Uuid::parse_str(&s).map_err(conversion_err)
}

fn opt_uuid_col(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(name)?;
    s.map(|s| Uuid::parse_str(&s).map_err(conversion_err))
        .transpose()
}

fn row_to_subject(row: &Row<'_>) -> rusqlite::Result<Subject> {
    let artifact_path: String = row.get("artifact_path")?;
    Ok(Subject {
        id: SubjectId(uuid_col(row, "id")?),
        created_at: row.get("created_at")?,
        artifact_path: PathBuf::from(artifact_path),
        original_filename: row.get("original_filename")?,
        evaluation_count: row.get::<_, i64>("evaluation_count")? as u32,
        first_evaluated_at: row.get("first_evaluated_at")?,
        last_evaluated_at: row.get("last_evaluated_at")?,
        is_favorite: row.get("is_favorite")?,
        notes: row.get("notes")?,
    })
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<EvaluationResult> {
    let status_str: String = row.get("status")?;
    let status = status_str.parse::<EvaluationStatus>().map_err(invalid_data)?;

    let overall: Option<f64> = row.get("overall_score")?;
    let scores = match overall {
        Some(overall) => Some(Scores {
            technical_quality: row.get::<_, Option<f64>>("technical_quality")?.unwrap_or_default(),
            composition: row.get::<_, Option<f64>>("composition")?.unwrap_or_default(),
            commercial_potential: row
                .get::<_, Option<f64>>("commercial_potential")?
                .unwrap_or_default(),
            artistic_merit: row.get::<_, Option<f64>>("artistic_merit")?.unwrap_or_default(),
            overall,
        }),
        None => None,
    };

    let placement: Option<String> = row.get("placement")?;
    let placement = placement
        .map(|p| p.parse::<Placement>().map_err(invalid_data))
        .transpose()?;

    let narrative_json: String = row.get("narrative")?;
    let narrative: Narrative = serde_json::from_str(&narrative_json).map_err(conversion_err)?;
    let commerce_json: String = row.get("commerce")?;
    let commerce: CommerceMetadata = serde_json::from_str(&commerce_json).map_err(conversion_err)?;

    Ok(EvaluationResult {
        id: ResultId(uuid_col(row, "id")?),
        subject_id: SubjectId(uuid_col(row, "subject_id")?),
        session_id: opt_uuid_col(row, "session_id")?.map(SessionId),
        evaluated_at: row.get("evaluated_at")?,
        scores,
        placement,
        narrative,
        commerce,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_tokens: row.get::<_, i64>("input_tokens")? as u64,
        output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        cost_usd: row.get("cost_usd")?,
        processing_time_ms: row.get::<_, i64>("processing_time_ms")? as u64,
        status,
        error_code: row.get("error_code")?,
        error_message: row.get("error_message")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        parent_result_id: opt_uuid_col(row, "parent_result_id")?.map(ResultId),
        is_current: row.get("is_current")?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let providers_json: String = row.get("providers")?;
    let providers: BTreeSet<String> =
        serde_json::from_str(&providers_json).map_err(conversion_err)?;

    Ok(Session {
        id: SessionId(uuid_col(row, "id")?),
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        total_subjects: row.get::<_, i64>("total_subjects")? as u32,
        success_count: row.get::<_, i64>("success_count")? as u32,
        failure_count: row.get::<_, i64>("failure_count")? as u32,
        total_cost_usd: row.get("total_cost_usd")?,
        average_processing_time_ms: row.get("average_processing_time_ms")?,
        providers,
        result_ids: Vec::new(),
    })
}

fn load_session(conn: &Connection, id: SessionId) -> Result<Session> {
    let mut session = conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            [id.to_string()],
            row_to_session,
        )
        .optional()?
        .ok_or_else(|| ApertureError::NotFound(format!("session {}", id)))?;

    let mut stmt = conn.prepare(
        "SELECT id FROM evaluation_results WHERE session_id = ?1 ORDER BY evaluated_at, rowid",
    )?;
    session.result_ids = stmt
        .query_map([id.to_string()], |row| uuid_col(row, "id").map(ResultId))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(session)
}

fn query_results(conn: &Connection, filter: &str, key: String) -> Result<Vec<EvaluationResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM evaluation_results WHERE {} = ?1 ORDER BY evaluated_at, rowid",
        RESULT_COLUMNS, filter
    ))?;
    let results = stmt
        .query_map([key], row_to_result)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

/// [`RecordTransaction`] over an open rusqlite transaction
struct SqliteRecordTx<'c> {
    conn: &'c Connection,
}

impl RecordTransaction for SqliteRecordTx<'_> {
    fn subject_exists(&mut self, subject_id: SubjectId) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM subjects WHERE id = ?1)",
            [subject_id.to_string()],
            |row| row.get(0),
        )?)
    }

    fn current_result(&mut self, subject_id: SubjectId) -> Result<Option<CurrentRef>> {
        let current = self
            .conn
            .query_row(
                "SELECT id, status FROM evaluation_results WHERE subject_id = ?1 AND is_current = 1",
                [subject_id.to_string()],
                |row| {
                    let id = uuid_col(row, "id")?;
                    let status: String = row.get("status")?;
                    let status = status.parse::<EvaluationStatus>().map_err(invalid_data)?;
                    Ok(CurrentRef {
                        id: ResultId(id),
                        status,
                    })
                },
            )
            .optional()?;
        Ok(current)
    }

    fn clear_current(&mut self, result_id: ResultId) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE evaluation_results SET is_current = 0 WHERE id = ?1",
            [result_id.to_string()],
        )?;
        if changed != 1 {
            return Err(ApertureError::Persistence(format!(
                "failed to clear current flag on result {}",
                result_id
            )));
        }
        Ok(())
    }

    fn insert_result(&mut self, r: &EvaluationResult) -> Result<()> {
        let narrative = serde_json::to_string(&r.narrative)?;
        let commerce = serde_json::to_string(&r.commerce)?;

        self.conn.execute(
            &format!(
                "INSERT INTO evaluation_results ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                  ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                RESULT_COLUMNS
            ),
            params![
                r.id.to_string(),
                r.subject_id.to_string(),
                r.session_id.map(|s| s.to_string()),
                r.evaluated_at,
                r.scores.map(|s| s.technical_quality),
                r.scores.map(|s| s.composition),
                r.scores.map(|s| s.commercial_potential),
                r.scores.map(|s| s.artistic_merit),
                r.scores.map(|s| s.overall),
                r.placement.map(|p| p.as_str()),
                narrative,
                commerce,
                r.provider,
                r.model,
                r.input_tokens as i64,
                r.output_tokens as i64,
                r.cost_usd,
                r.processing_time_ms as i64,
                r.status.as_str(),
                r.error_code,
                r.error_message,
                r.retry_count as i64,
                r.parent_result_id.map(|p| p.to_string()),
                r.is_current,
            ],
        )?;
        Ok(())
    }

    fn touch_subject(&mut self, subject_id: SubjectId, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE subjects SET evaluation_count = evaluation_count + 1, \
             last_evaluated_at = ?2, first_evaluated_at = COALESCE(first_evaluated_at, ?2) \
             WHERE id = ?1",
            params![subject_id.to_string(), at],
        )?;
        if changed != 1 {
            return Err(ApertureError::NotFound(format!("subject {}", subject_id)));
        }
        Ok(())
    }

    fn attach_to_session(&mut self, session_id: SessionId, result: &EvaluationResult) -> Result<()> {
        let providers_json: Option<String> = self
            .conn
            .query_row(
                "SELECT providers FROM sessions WHERE id = ?1 AND ended_at IS NULL",
                [session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let providers_json = providers_json.ok_or_else(|| {
            ApertureError::Persistence(format!("session {} is not active", session_id))
        })?;

        let mut providers: BTreeSet<String> = serde_json::from_str(&providers_json)?;
        if !result.provider.is_empty() {
            providers.insert(result.provider.clone());
        }

        let (successes, failures) = if result.is_success() { (1, 0) } else { (0, 1) };
        self.conn.execute(
            "UPDATE sessions SET success_count = success_count + ?2, \
             failure_count = failure_count + ?3, providers = ?4 WHERE id = ?1",
            params![
                session_id.to_string(),
                successes,
                failures,
                serde_json::to_string(&providers)?
            ],
        )?;
        Ok(())
    }

    fn add_usage(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE usage_stats SET total_input_tokens = total_input_tokens + ?1, \
             total_output_tokens = total_output_tokens + ?2, \
             total_cost_usd = total_cost_usd + ?3, \
             images_evaluated = images_evaluated + 1, last_updated = ?4 WHERE id = 1",
            params![input_tokens as i64, output_tokens as i64, cost_usd, at],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema
    ///
    /// # Example
    /// ```ignore
    /// let store = SqliteStore::open("aperture.db").await?;
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening evaluation store at {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut config = Config::new(path);
        config.pool = Some(PoolConfig::new(1));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            ApertureError::Persistence(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store
            .interact(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        debug!("Evaluation store schema ready");
        Ok(store)
    }

    /// Run `f` on the single pooled connection
    async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            ApertureError::Persistence(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(move |conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            f(conn)
        })
        .await
        .map_err(|e| ApertureError::Persistence(format!("Pool interaction failed: {}", e)))?
    }
}

#[async_trait]
impl EvaluationStore for SqliteStore {
    async fn insert_subject(&self, subject: &Subject) -> Result<()> {
        let s = subject.clone();
        self.interact(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO subjects ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    SUBJECT_COLUMNS
                ),
                params![
                    s.id.to_string(),
                    s.created_at,
                    s.artifact_path.to_string_lossy().to_string(),
                    s.original_filename,
                    s.evaluation_count as i64,
                    s.first_evaluated_at,
                    s.last_evaluated_at,
                    s.is_favorite,
                    s.notes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_subject(&self, id: SubjectId) -> Result<Subject> {
        self.interact(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM subjects WHERE id = ?1", SUBJECT_COLUMNS),
                [id.to_string()],
                row_to_subject,
            )
            .optional()?
            .ok_or_else(|| ApertureError::NotFound(format!("subject {}", id)))
        })
        .await
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.interact(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM subjects ORDER BY created_at, rowid",
                SUBJECT_COLUMNS
            ))?;
            let subjects = stmt
                .query_map([], row_to_subject)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(subjects)
        })
        .await
    }

    async fn update_subject_metadata(
        &self,
        id: SubjectId,
        is_favorite: bool,
        notes: Option<String>,
    ) -> Result<()> {
        self.interact(move |conn| {
            let changed = conn.execute(
                "UPDATE subjects SET is_favorite = ?2, notes = ?3 WHERE id = ?1",
                params![id.to_string(), is_favorite, notes],
            )?;
            if changed == 0 {
                return Err(ApertureError::NotFound(format!("subject {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn delete_subject(&self, id: SubjectId) -> Result<()> {
        self.interact(move |conn| {
            let changed = conn.execute("DELETE FROM subjects WHERE id = ?1", [id.to_string()])?;
            if changed == 0 {
                return Err(ApertureError::NotFound(format!("subject {}", id)));
            }
            info!("Deleted subject {} and its history", id);
            Ok(())
        })
        .await
    }

    async fn history(&self, id: SubjectId) -> Result<Vec<EvaluationResult>> {
        self.interact(move |conn| query_results(conn, "subject_id", id.to_string()))
            .await
    }

    async fn current_result(&self, id: SubjectId) -> Result<Option<EvaluationResult>> {
        self.interact(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM evaluation_results WHERE subject_id = ?1 AND is_current = 1",
                        RESULT_COLUMNS
                    ),
                    [id.to_string()],
                    row_to_result,
                )
                .optional()?)
        })
        .await
    }

    async fn get_result(&self, id: ResultId) -> Result<EvaluationResult> {
        self.interact(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM evaluation_results WHERE id = ?1", RESULT_COLUMNS),
                [id.to_string()],
                row_to_result,
            )
            .optional()?
            .ok_or_else(|| ApertureError::NotFound(format!("result {}", id)))
        })
        .await
    }

    async fn record(&self, request: RecordRequest) -> Result<EvaluationResult> {
        self.interact(move |conn| {
            let tx = conn.transaction()?;
            let result = {
                let mut record_tx = SqliteRecordTx { conn: &*tx };
                Recorder::apply(&mut record_tx, &request)?
            };
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| match e {
            ApertureError::Persistence(_) => e,
            other => ApertureError::Persistence(other.to_string()),
        })
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let s = session.clone();
        self.interact(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    SESSION_COLUMNS
                ),
                params![
                    s.id.to_string(),
                    s.started_at,
                    s.ended_at,
                    s.total_subjects as i64,
                    s.success_count as i64,
                    s.failure_count as i64,
                    s.total_cost_usd,
                    s.average_processing_time_ms,
                    serde_json::to_string(&s.providers)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: SessionId) -> Result<Session> {
        self.interact(move |conn| load_session(conn, id)).await
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.interact(move |conn| {
            let ids = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM sessions ORDER BY started_at DESC, rowid DESC LIMIT ?1",
                )?;
                let ids = stmt
                    .query_map([limit as i64], |row| uuid_col(row, "id").map(SessionId))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };
            ids.into_iter().map(|id| load_session(conn, id)).collect()
        })
        .await
    }

    async fn session_results(&self, id: SessionId) -> Result<Vec<EvaluationResult>> {
        self.interact(move |conn| query_results(conn, "session_id", id.to_string()))
            .await
    }

    async fn close_session(&self, id: SessionId, ended_at: DateTime<Utc>) -> Result<Session> {
        self.interact(move |conn| {
            let tx = conn.transaction()?;

            let existing = load_session(&tx, id)?;
            if existing.is_closed() {
                return Err(ApertureError::InvalidState(format!(
                    "session {} is already closed",
                    id
                )));
            }

            let (total_cost, avg_time): (f64, f64) = tx.query_row(
                "SELECT COALESCE(SUM(cost_usd), 0.0), COALESCE(AVG(processing_time_ms), 0.0) \
                 FROM evaluation_results WHERE session_id = ?1",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            tx.execute(
                "UPDATE sessions SET ended_at = ?2, total_cost_usd = ?3, \
                 average_processing_time_ms = ?4 WHERE id = ?1",
                params![id.to_string(), ended_at, total_cost, avg_time],
            )?;

            let closed = load_session(&tx, id)?;
            tx.commit()?;
            Ok(closed)
        })
        .await
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        self.interact(move |conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.to_string()])?;
            if changed == 0 {
                return Err(ApertureError::NotFound(format!("session {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn usage_stats(&self) -> Result<UsageStats> {
        self.interact(|conn| {
            Ok(conn.query_row(
                "SELECT total_input_tokens, total_output_tokens, total_cost_usd, \
                 images_evaluated, last_updated FROM usage_stats WHERE id = 1",
                [],
                |row| {
                    Ok(UsageStats {
                        total_input_tokens: row.get::<_, i64>(0)? as u64,
                        total_output_tokens: row.get::<_, i64>(1)? as u64,
                        total_cost_usd: row.get(2)?,
                        images_evaluated: row.get::<_, i64>(3)? as u64,
                        last_updated: row.get(4)?,
                    })
                },
            )?)
        })
        .await
    }
}
