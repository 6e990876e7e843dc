//! SQLite-backed mission store. One connection per operation, executed on
//! the blocking pool; per-mission async mutexes serialise mutations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use helm::agents::Plan;
use helm::{Mission, MissionOutcome, MissionStatus, TaskRecord, TaskStatus};
use mission_event::{CompletionPayload, EventType, StatusChangePayload, StoredEvent, TaskCompletedPayload};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;

use crate::error::StoreError;

/// One claimable outbox row, as handed to the worker.
#[derive(Clone, Debug)]
pub struct PendingOutboxRow {
    pub id: i64,
    pub event_type: String,
    pub payload: String,
    pub retry_count: i64,
}

/// Sole custodian of mission/task/event persistence.
pub struct MissionStore {
    db_path: PathBuf,
    /// Per-mission mutation locks; held across one transaction, never
    /// across an agent or network call.
    locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
    /// Missions with an active supervisor run (non re-entrant per mission).
    active_runs: DashMap<i64, ()>,
}

impl MissionStore {
    /// Opens (or creates) the database and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS missions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                objective TEXT NOT NULL,
                initiator_id INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                outcome TEXT,
                result_summary TEXT,
                context TEXT NOT NULL DEFAULT '{}',
                idempotency_key TEXT UNIQUE,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                mission_id INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                tool_hint TEXT,
                inputs TEXT,
                status TEXT NOT NULL,
                result TEXT,
                error TEXT,
                PRIMARY KEY (mission_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS mission_events (
                mission_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (mission_id, seq)
            );

            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                processed_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_drain ON outbox(status, created_at);
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self {
            db_path,
            locks: DashMap::new(),
            active_runs: DashMap::new(),
        })
    }

    /// The mutation lock for one mission.
    pub fn mission_lock(&self, mission_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(mission_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Claims the supervisor run slot for a mission. Returns false when a
    /// run is already active (the caller must not start a second one).
    pub fn try_begin_run(&self, mission_id: i64) -> bool {
        match self.active_runs.entry(mission_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(());
                true
            }
        }
    }

    pub fn end_run(&self, mission_id: i64) {
        self.active_runs.remove(&mission_id);
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            f(&mut conn)
        })
        .await?
    }

    /// Creates a mission and emits `mission_created` in one transaction.
    ///
    /// When `idempotency_key` matches an existing mission, that mission is
    /// returned and nothing new is written (the HTTP idempotency layer
    /// normally catches this earlier; this is the store-level backstop).
    pub async fn create_mission(
        &self,
        objective: &str,
        context: Value,
        initiator_id: i64,
        idempotency_key: Option<&str>,
    ) -> Result<Mission, StoreError> {
        let objective = objective.to_string();
        let context_text = serde_json::to_string(&context)?;
        let key = idempotency_key.map(str::to_string);

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if let Some(key) = &key {
                let existing = tx
                    .query_row(
                        "SELECT * FROM missions WHERE idempotency_key = ?1",
                        params![key],
                        row_to_mission,
                    )
                    .optional()?;
                if let Some(mission) = existing {
                    tx.commit()?;
                    return Ok(mission);
                }
            }

            let now = now_rfc3339();
            tx.execute(
                "INSERT INTO missions (objective, initiator_id, status, context, idempotency_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    objective,
                    initiator_id,
                    MissionStatus::Pending.as_str(),
                    context_text,
                    key,
                    now
                ],
            )?;
            let mission_id = tx.last_insert_rowid();

            append_event_tx(
                &tx,
                mission_id,
                &EventType::MissionCreated,
                &serde_json::json!({ "objective": objective, "status": "pending" }),
            )?;

            let mission = tx.query_row(
                "SELECT * FROM missions WHERE id = ?1",
                params![mission_id],
                row_to_mission,
            )?;
            tx.commit()?;
            tracing::info!(mission_id, "mission created");
            Ok(mission)
        })
        .await
    }

    pub async fn get_mission(&self, mission_id: i64) -> Result<Option<Mission>, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM missions WHERE id = ?1",
                    params![mission_id],
                    row_to_mission,
                )
                .optional()?)
        })
        .await
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Mission>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM missions WHERE idempotency_key = ?1",
                    params![key],
                    row_to_mission,
                )
                .optional()?)
        })
        .await
    }

    /// Validates the transition against the DAG and emits `status_change`.
    pub async fn update_status(
        &self,
        mission_id: i64,
        new_status: MissionStatus,
        note: Option<String>,
    ) -> Result<Mission, StoreError> {
        let lock = self.mission_lock(mission_id);
        let _guard = lock.lock().await;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mission = get_mission_tx(&tx, mission_id)?;
            if !mission.status.can_transition_to(new_status) {
                return Err(StoreError::InvalidTransition {
                    from: mission.status.as_str().to_string(),
                    to: new_status.as_str().to_string(),
                });
            }

            tx.execute(
                "UPDATE missions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_status.as_str(), now_rfc3339(), mission_id],
            )?;
            let payload = serde_json::to_value(StatusChangePayload {
                from: mission.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                note,
            })?;
            append_event_tx(&tx, mission_id, &EventType::StatusChange, &payload)?;

            let mission = get_mission_tx(&tx, mission_id)?;
            tx.commit()?;
            Ok(mission)
        })
        .await
    }

    /// Appends one brain event (and its outbox row) for a mission.
    pub async fn append_event(
        &self,
        mission_id: i64,
        event_type: EventType,
        payload: Value,
    ) -> Result<StoredEvent, StoreError> {
        let lock = self.mission_lock(mission_id);
        let _guard = lock.lock().await;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            // Ensure the mission exists so events never dangle.
            get_mission_tx(&tx, mission_id)?;
            let event = append_event_tx(&tx, mission_id, &event_type, &payload)?;
            tx.commit()?;
            Ok(event)
        })
        .await
    }

    /// Replaces the planned task rows for a mission from a fresh plan.
    pub async fn record_tasks(&self, mission_id: i64, plan: &Plan) -> Result<(), StoreError> {
        let lock = self.mission_lock(mission_id);
        let _guard = lock.lock().await;
        let steps: Vec<(String, String, Option<String>)> = plan
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.description.clone(), s.tool_hint.clone()))
            .collect();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            get_mission_tx(&tx, mission_id)?;
            tx.execute("DELETE FROM tasks WHERE mission_id = ?1", params![mission_id])?;
            for (ordinal, (name, description, tool_hint)) in steps.iter().enumerate() {
                tx.execute(
                    "INSERT INTO tasks (mission_id, ordinal, name, description, tool_hint, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        mission_id,
                        ordinal as i64,
                        name,
                        description,
                        tool_hint,
                        TaskStatus::Pending.as_str()
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Records one task's result and emits `task_completed`.
    pub async fn append_task_result(
        &self,
        mission_id: i64,
        ordinal: i64,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let lock = self.mission_lock(mission_id);
        let _guard = lock.lock().await;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            get_mission_tx(&tx, mission_id)?;
            let result_text = result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let updated = tx.execute(
                "UPDATE tasks SET status = ?1, result = ?2, error = ?3
                 WHERE mission_id = ?4 AND ordinal = ?5",
                params![status.as_str(), result_text, error, mission_id, ordinal],
            )?;
            if updated == 0 {
                // Result for a step the plan never recorded; keep it anyway.
                tx.execute(
                    "INSERT INTO tasks (mission_id, ordinal, name, description, status, result, error)
                     VALUES (?1, ?2, ?3, '', ?4, ?5, ?6)",
                    params![
                        mission_id,
                        ordinal,
                        format!("step-{ordinal}"),
                        status.as_str(),
                        result_text,
                        error
                    ],
                )?;
            }

            let name: String = tx.query_row(
                "SELECT name FROM tasks WHERE mission_id = ?1 AND ordinal = ?2",
                params![mission_id, ordinal],
                |row| row.get(0),
            )?;
            let payload = serde_json::to_value(TaskCompletedPayload {
                ordinal,
                name,
                status: status.as_str().to_string(),
                result,
                error,
            })?;
            append_event_tx(&tx, mission_id, &EventType::TaskCompleted, &payload)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Moves the mission to its terminal state and emits
    /// `mission_completed` or `mission_failed`.
    pub async fn complete_mission(
        &self,
        mission_id: i64,
        outcome: MissionOutcome,
        result_summary: Option<String>,
        reason: Option<String>,
    ) -> Result<Mission, StoreError> {
        let lock = self.mission_lock(mission_id);
        let _guard = lock.lock().await;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mission = get_mission_tx(&tx, mission_id)?;
            let terminal = outcome.terminal_status();
            if !mission.status.can_transition_to(terminal) {
                return Err(StoreError::InvalidTransition {
                    from: mission.status.as_str().to_string(),
                    to: terminal.as_str().to_string(),
                });
            }

            tx.execute(
                "UPDATE missions SET status = ?1, outcome = ?2, result_summary = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    terminal.as_str(),
                    outcome.as_str(),
                    result_summary,
                    now_rfc3339(),
                    mission_id
                ],
            )?;

            let event_type = if outcome == MissionOutcome::Failed {
                EventType::MissionFailed
            } else {
                EventType::MissionCompleted
            };
            let payload = serde_json::to_value(CompletionPayload {
                outcome: outcome.as_str().to_string(),
                result: result_summary
                    .as_ref()
                    .map(|s| serde_json::json!({ "summary": s })),
                reason,
            })?;
            append_event_tx(&tx, mission_id, &event_type, &payload)?;

            let mission = get_mission_tx(&tx, mission_id)?;
            tx.commit()?;
            tracing::info!(mission_id, outcome = outcome.as_str(), "mission completed");
            Ok(mission)
        })
        .await
    }

    /// Flags cancellation. Returns false when the mission is already
    /// terminal; the runner honours the flag at the next step boundary.
    pub async fn request_cancel(&self, mission_id: i64) -> Result<bool, StoreError> {
        let lock = self.mission_lock(mission_id);
        let _guard = lock.lock().await;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mission = get_mission_tx(&tx, mission_id)?;
            if mission.status.is_terminal() {
                return Ok(false);
            }
            tx.execute(
                "UPDATE missions SET cancel_requested = 1, updated_at = ?1 WHERE id = ?2",
                params![now_rfc3339(), mission_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    /// Ordered events for a mission with sequence greater than `since_seq`;
    /// the WS catch-up path.
    pub async fn get_mission_events(
        &self,
        mission_id: i64,
        since_seq: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT mission_id, seq, event_type, payload, created_at
                 FROM mission_events WHERE mission_id = ?1 AND seq > ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![mission_id, since_seq], row_to_event)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
    }

    pub async fn get_tasks(&self, mission_id: i64) -> Result<Vec<TaskRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT mission_id, ordinal, name, description, tool_hint, inputs, status, result, error
                 FROM tasks WHERE mission_id = ?1 ORDER BY ordinal",
            )?;
            let rows = stmt.query_map(params![mission_id], row_to_task)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row?);
            }
            Ok(tasks)
        })
        .await
    }

    /// Claims up to `batch_size` drainable outbox rows inside one immediate
    /// transaction (the SQLite stand-in for `FOR UPDATE SKIP LOCKED`):
    /// concurrent workers serialise on the claim and never double-deliver
    /// within one drain cycle.
    pub async fn claim_outbox_batch(
        &self,
        batch_size: usize,
        retry_cap: i64,
    ) -> Result<Vec<PendingOutboxRow>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let mut stmt = tx.prepare(
                "SELECT id, event_type, payload, retry_count FROM outbox
                 WHERE status = 'pending' OR (status = 'failed' AND retry_count < ?1)
                 ORDER BY created_at, id LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![retry_cap, batch_size as i64], |row| {
                Ok(PendingOutboxRow {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    payload: row.get(2)?,
                    retry_count: row.get(3)?,
                })
            })?;
            let mut batch = Vec::new();
            for row in rows {
                batch.push(row?);
            }
            drop(stmt);
            tx.commit()?;
            Ok(batch)
        })
        .await
    }

    pub async fn mark_outbox_processed(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE outbox SET status = 'processed', processed_at = ?1 WHERE id = ?2",
                params![now_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_outbox_failed(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE outbox SET status = 'failed', retry_count = retry_count + 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn outbox_pending_count(&self) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM outbox WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Maintenance: deletes processed rows older than the given RFC 3339
    /// timestamp. Scheduling is the operator's call.
    pub async fn purge_processed(&self, older_than: String) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM outbox WHERE status = 'processed' AND processed_at < ?1",
                params![older_than],
            )?;
            Ok(n)
        })
        .await
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Appends one mission event with the next contiguous sequence number and
/// its outbox row. Must run inside the caller's transaction.
fn append_event_tx(
    tx: &Transaction<'_>,
    mission_id: i64,
    event_type: &EventType,
    payload: &Value,
) -> Result<StoredEvent, StoreError> {
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM mission_events WHERE mission_id = ?1",
        params![mission_id],
        |row| row.get(0),
    )?;
    let created_at = now_rfc3339();
    let payload_text = serde_json::to_string(payload)?;
    tx.execute(
        "INSERT INTO mission_events (mission_id, seq, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![mission_id, seq, event_type.as_str(), payload_text, created_at],
    )?;

    let event = StoredEvent {
        mission_id,
        seq,
        event_type: event_type.clone(),
        payload: payload.clone(),
        created_at: created_at.clone(),
    };
    tx.execute(
        "INSERT INTO outbox (event_type, payload, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
        params![event_type.as_str(), serde_json::to_string(&event)?, created_at],
    )?;
    Ok(event)
}

fn get_mission_tx(tx: &Transaction<'_>, mission_id: i64) -> Result<Mission, StoreError> {
    tx.query_row(
        "SELECT * FROM missions WHERE id = ?1",
        params![mission_id],
        row_to_mission,
    )
    .optional()?
    .ok_or(StoreError::NotFound(mission_id))
}

fn row_to_mission(row: &Row<'_>) -> rusqlite::Result<Mission> {
    let status: String = row.get("status")?;
    let outcome: Option<String> = row.get("outcome")?;
    let context: String = row.get("context")?;
    Ok(Mission {
        id: row.get("id")?,
        objective: row.get("objective")?,
        initiator_id: row.get("initiator_id")?,
        status: MissionStatus::parse(&status).unwrap_or(MissionStatus::Failed),
        outcome: outcome.as_deref().and_then(parse_outcome),
        result_summary: row.get("result_summary")?,
        context: serde_json::from_str(&context).unwrap_or(Value::Null),
        idempotency_key: row.get("idempotency_key")?,
        cancel_requested: row.get::<_, i64>("cancel_requested")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_outcome(raw: &str) -> Option<MissionOutcome> {
    match raw {
        "success" => Some(MissionOutcome::Success),
        "partial_success" => Some(MissionOutcome::PartialSuccess),
        "failed" => Some(MissionOutcome::Failed),
        _ => None,
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let event_type: String = row.get(2)?;
    let payload: String = row.get(3)?;
    Ok(StoredEvent {
        mission_id: row.get(0)?,
        seq: row.get(1)?,
        event_type: EventType::from(event_type.as_str()),
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        created_at: row.get(4)?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get("status")?;
    let inputs: Option<String> = row.get("inputs")?;
    let result: Option<String> = row.get("result")?;
    Ok(TaskRecord {
        mission_id: row.get("mission_id")?,
        ordinal: row.get("ordinal")?,
        name: row.get("name")?,
        description: row.get("description")?,
        tool_hint: row.get("tool_hint")?,
        inputs: inputs.and_then(|s| serde_json::from_str(&s).ok()),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        result: result.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get("error")?,
    })
}
