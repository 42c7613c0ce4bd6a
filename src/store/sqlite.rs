//! SQLite persistence.
//!
//! The store is the single serialization point of the system: every
//! cross-process decision (lease claims, queue claims, owned progress
//! writes) is an atomic statement or a short transaction here. Owned
//! updates carry the `(lease_owner = ?, lease_expiry > now)` predicate and
//! silently affect zero rows on a lost lease; callers detect by re-reading.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::types::{
    Flow, FlowVersion, NodeRun, QueueItem, QueueStatus, RunStatus, Task, TaskStatus, WorkerInfo,
};
use crate::clock::now_secs;
use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS flows (
        id TEXT PRIMARY KEY, name TEXT NOT NULL, description TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS flow_versions (
        id TEXT PRIMARY KEY, flow_id TEXT NOT NULL, version INTEGER NOT NULL,
        definition_json TEXT NOT NULL, status TEXT NOT NULL, created_at INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY, flow_version_id TEXT NOT NULL, status TEXT NOT NULL,
        params_json TEXT NOT NULL, shared_json TEXT NOT NULL,
        current_node_key TEXT NOT NULL, last_action TEXT NOT NULL,
        step_count INTEGER NOT NULL, lease_owner TEXT NOT NULL,
        lease_expiry INTEGER NOT NULL, request_id TEXT NOT NULL,
        created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS node_runs (
        id TEXT PRIMARY KEY, task_id TEXT NOT NULL, node_key TEXT NOT NULL,
        attempt_no INTEGER NOT NULL, status TEXT NOT NULL,
        sub_status TEXT NOT NULL DEFAULT '', branch_id TEXT NOT NULL DEFAULT '',
        prep_json TEXT NOT NULL, exec_input_json TEXT NOT NULL,
        exec_output_json TEXT NOT NULL, error_text TEXT NOT NULL,
        action TEXT NOT NULL, started_at INTEGER NOT NULL,
        finished_at INTEGER NOT NULL, worker_id TEXT NOT NULL,
        worker_url TEXT NOT NULL, log_path TEXT NOT NULL DEFAULT '')",
    "CREATE INDEX IF NOT EXISTS idx_node_runs_task ON node_runs(task_id, started_at)",
    "CREATE TABLE IF NOT EXISTS workers (
        id TEXT PRIMARY KEY, url TEXT NOT NULL, services_json TEXT NOT NULL,
        load INTEGER NOT NULL, last_heartbeat INTEGER NOT NULL,
        status TEXT NOT NULL, type TEXT NOT NULL DEFAULT 'http')",
    "CREATE TABLE IF NOT EXISTS task_queue (
        id TEXT PRIMARY KEY, task_id TEXT NOT NULL, node_key TEXT NOT NULL,
        service TEXT NOT NULL, input_json TEXT NOT NULL, status TEXT NOT NULL,
        worker_id TEXT NOT NULL, created_at INTEGER NOT NULL,
        started_at INTEGER NOT NULL, timeout_at INTEGER NOT NULL)",
    "CREATE INDEX IF NOT EXISTS idx_queue_service_status ON task_queue(service, status)",
];

pub fn gen_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(sqlx::Error::from)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = SqliteStore { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flows & versions
    // ------------------------------------------------------------------

    pub async fn create_flow(&self, name: &str, description: &str) -> Result<String, StoreError> {
        let id = gen_id("flow");
        sqlx::query("INSERT INTO flows(id, name, description, created_at) VALUES(?, ?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(description)
            .bind(now_secs())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn list_flows(&self, limit: i64, offset: i64) -> Result<Vec<Flow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, created_at FROM flows
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(if limit > 0 { limit } else { i64::MAX })
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(flow_from_row).collect()
    }

    pub async fn create_flow_version(
        &self,
        flow_id: &str,
        version: i64,
        definition_json: &str,
        status: &str,
    ) -> Result<String, StoreError> {
        let id = gen_id("ver");
        sqlx::query(
            "INSERT INTO flow_versions(id, flow_id, version, definition_json, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(flow_id)
        .bind(version)
        .bind(definition_json)
        .bind(status)
        .bind(now_secs())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_flow_version(&self, id: &str) -> Result<FlowVersion, StoreError> {
        let row = sqlx::query(
            "SELECT id, flow_id, version, definition_json, status FROM flow_versions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("flow version {id}")))?;
        flow_version_from_row(&row)
    }

    pub async fn list_flow_versions(&self, flow_id: &str) -> Result<Vec<FlowVersion>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, flow_id, version, definition_json, status FROM flow_versions
             WHERE flow_id = ? ORDER BY version DESC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(flow_version_from_row).collect()
    }

    pub async fn latest_published_version(&self, flow_id: &str) -> Result<FlowVersion, StoreError> {
        let row = sqlx::query(
            "SELECT id, flow_id, version, definition_json, status FROM flow_versions
             WHERE flow_id = ? AND status = 'published' ORDER BY version DESC LIMIT 1",
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("published version of flow {flow_id}")))?;
        flow_version_from_row(&row)
    }

    // ------------------------------------------------------------------
    // Tasks & leases
    // ------------------------------------------------------------------

    pub async fn create_task(
        &self,
        flow_version_id: &str,
        params_json: &str,
        request_id: &str,
        start_node: &str,
    ) -> Result<String, StoreError> {
        let id = gen_id("task");
        let now = now_secs();
        sqlx::query(
            "INSERT INTO tasks(id, flow_version_id, status, params_json, shared_json,
                 current_node_key, last_action, step_count, lease_owner, lease_expiry,
                 request_id, created_at, updated_at)
             VALUES(?, ?, 'pending', ?, '{}', ?, '', 0, '', 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(flow_version_id)
        .bind(params_json)
        .bind(start_node)
        .bind(request_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        let row = sqlx::query(
            "SELECT id, flow_version_id, status, params_json, shared_json, current_node_key,
                    last_action, step_count, lease_owner, lease_expiry, request_id,
                    created_at, updated_at
             FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        task_from_row(&row)
    }

    /// Atomically claim the oldest runnable task: status pending/running
    /// with no live lease. Returns `Ok(None)` when nothing is runnable and
    /// `Err(LeaseConflict)` when the claim UPDATE lost a race.
    pub async fn lease_next_task(
        &self,
        owner: &str,
        ttl_secs: i64,
    ) -> Result<Option<Task>, StoreError> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT id FROM tasks
             WHERE status IN ('pending', 'running') AND (lease_expiry = 0 OR lease_expiry < ?)
             ORDER BY updated_at ASC LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let claimed = sqlx::query(
            "UPDATE tasks SET lease_owner = ?, lease_expiry = ?, status = 'running'
             WHERE id = ? AND (lease_expiry = 0 OR lease_expiry < ?)",
        )
        .bind(owner)
        .bind(now + ttl_secs)
        .bind(&id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(StoreError::LeaseConflict);
        }
        tx.commit().await?;
        Ok(Some(self.get_task(&id).await?))
    }

    pub async fn extend_lease(&self, id: &str, owner: &str, ttl_secs: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE tasks SET lease_expiry = ? WHERE id = ? AND lease_owner = ?")
            .bind(now_secs() + ttl_secs)
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_secs())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Status write conditional on live lease ownership. Silently a no-op
    /// on mismatch.
    pub async fn update_task_status_owned(
        &self,
        id: &str,
        owner: &str,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ?
             WHERE id = ? AND lease_owner = ? AND lease_expiry > ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .bind(owner)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_task_progress(
        &self,
        id: &str,
        current_node: &str,
        last_action: &str,
        shared_json: &str,
        step_count: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tasks SET current_node_key = ?, last_action = ?, shared_json = ?,
                 step_count = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(current_node)
        .bind(last_action)
        .bind(shared_json)
        .bind(step_count)
        .bind(now_secs())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Progress write conditional on live lease ownership. Silently a no-op
    /// on mismatch.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_task_progress_owned(
        &self,
        id: &str,
        owner: &str,
        current_node: &str,
        last_action: &str,
        shared_json: &str,
        step_count: i64,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        sqlx::query(
            "UPDATE tasks SET current_node_key = ?, last_action = ?, shared_json = ?,
                 step_count = ?, updated_at = ?
             WHERE id = ? AND lease_owner = ? AND lease_expiry > ?",
        )
        .bind(current_node)
        .bind(last_action)
        .bind(shared_json)
        .bind(step_count)
        .bind(now)
        .bind(id)
        .bind(owner)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        flow_version_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Task>, i64), StoreError> {
        let status_filter = status.map(|s| s.as_str().to_string()).unwrap_or_default();
        let version_filter = flow_version_id.unwrap_or_default().to_string();
        let count_row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks
             WHERE (? = '' OR status = ?) AND (? = '' OR flow_version_id = ?)",
        )
        .bind(&status_filter)
        .bind(&status_filter)
        .bind(&version_filter)
        .bind(&version_filter)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = count_row.try_get("n")?;
        let rows = sqlx::query(
            "SELECT id, flow_version_id, status, params_json, shared_json, current_node_key,
                    last_action, step_count, lease_owner, lease_expiry, request_id,
                    created_at, updated_at
             FROM tasks
             WHERE (? = '' OR status = ?) AND (? = '' OR flow_version_id = ?)
             ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(&status_filter)
        .bind(&status_filter)
        .bind(&version_filter)
        .bind(&version_filter)
        .bind(if limit > 0 { limit } else { i64::MAX })
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let tasks = rows.iter().map(task_from_row).collect::<Result<_, _>>()?;
        Ok((tasks, total))
    }

    // ------------------------------------------------------------------
    // Node runs
    // ------------------------------------------------------------------

    /// Append a node run. An empty `id` gets a fresh one assigned; callers
    /// that must address the run later (queue executions) pre-assign it.
    pub async fn save_node_run(&self, run: &NodeRun) -> Result<String, StoreError> {
        let id = if run.id.is_empty() {
            gen_id("run")
        } else {
            run.id.clone()
        };
        sqlx::query(
            "INSERT INTO node_runs(id, task_id, node_key, attempt_no, status, sub_status,
                 branch_id, prep_json, exec_input_json, exec_output_json, error_text, action,
                 started_at, finished_at, worker_id, worker_url, log_path)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&run.task_id)
        .bind(&run.node_key)
        .bind(run.attempt_no)
        .bind(run.status.as_str())
        .bind(&run.sub_status)
        .bind(&run.branch_id)
        .bind(&run.prep_json)
        .bind(&run.exec_input_json)
        .bind(&run.exec_output_json)
        .bind(&run.error_text)
        .bind(&run.action)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.worker_id)
        .bind(&run.worker_url)
        .bind(&run.log_path)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Finalize an outstanding (queued/running) node run in place. Used by
    /// the queue bridge when an async worker reports completion.
    pub async fn finish_node_run(
        &self,
        run_id: &str,
        status: RunStatus,
        exec_output_json: &str,
        error_text: &str,
        log_path: &str,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE node_runs SET status = ?, exec_output_json = ?, error_text = ?,
                 log_path = ?, worker_id = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(exec_output_json)
        .bind(error_text)
        .bind(log_path)
        .bind(worker_id)
        .bind(now_secs())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("node run {run_id}")));
        }
        Ok(())
    }

    /// All runs for a task in causal order.
    pub async fn list_node_runs(&self, task_id: &str) -> Result<Vec<NodeRun>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, task_id, node_key, attempt_no, status, sub_status, branch_id,
                    prep_json, exec_input_json, exec_output_json, error_text, action,
                    started_at, finished_at, worker_id, worker_url, log_path
             FROM node_runs WHERE task_id = ? ORDER BY started_at ASC, rowid ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_run_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    pub async fn register_worker(&self, w: &WorkerInfo) -> Result<(), StoreError> {
        let services = serde_json::to_string(&w.services)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let kind = if w.kind.is_empty() { "http" } else { &w.kind };
        sqlx::query(
            "INSERT INTO workers(id, url, services_json, load, last_heartbeat, status, type)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET url = excluded.url,
                 services_json = excluded.services_json, load = excluded.load,
                 last_heartbeat = excluded.last_heartbeat, status = excluded.status,
                 type = excluded.type",
        )
        .bind(&w.id)
        .bind(&w.url)
        .bind(&services)
        .bind(w.load)
        .bind(now_secs())
        .bind(if w.status.is_empty() { "online" } else { &w.status })
        .bind(kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn heartbeat_worker(&self, id: &str, url: &str, load: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workers SET last_heartbeat = ?, load = ?, status = 'online'
             WHERE id = ? OR url = ?",
        )
        .bind(now_secs())
        .bind(load)
        .bind(id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark workers whose heartbeat is older than `now - ttl` offline.
    /// Idempotent.
    pub async fn refresh_workers_status(&self, ttl_secs: i64) -> Result<(), StoreError> {
        if ttl_secs <= 0 {
            return Ok(());
        }
        sqlx::query(
            "UPDATE workers SET status = 'offline' WHERE last_heartbeat > 0 AND last_heartbeat < ?",
        )
        .bind(now_secs() - ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Workers advertising `service` with a heartbeat within `ttl`, in
    /// insertion order. `restrict_http` drops async/local pollers from
    /// direct-dispatch candidate lists.
    pub async fn list_workers(
        &self,
        service: &str,
        ttl_secs: i64,
        restrict_http: bool,
    ) -> Result<Vec<WorkerInfo>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, url, services_json, load, last_heartbeat, status, type
             FROM workers ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let now = now_secs();
        let mut out = Vec::new();
        for row in &rows {
            let hb: i64 = row.try_get("last_heartbeat")?;
            if ttl_secs > 0 && now - hb > ttl_secs {
                continue;
            }
            let kind: String = row.try_get("type")?;
            if restrict_http && !kind.is_empty() && kind != "http" {
                continue;
            }
            let services_json: String = row.try_get("services_json")?;
            let services: Vec<String> = serde_json::from_str(&services_json).unwrap_or_default();
            if !service.is_empty() && !services.iter().any(|s| s == service) {
                continue;
            }
            out.push(WorkerInfo {
                id: row.try_get("id")?,
                url: row.try_get("url")?,
                services,
                load: row.try_get("load")?,
                last_heartbeat: hb,
                status: row.try_get("status")?,
                kind,
            });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Task queue
    // ------------------------------------------------------------------

    pub async fn enqueue_work(
        &self,
        task_id: &str,
        node_key: &str,
        service: &str,
        input_json: &str,
    ) -> Result<String, StoreError> {
        let id = gen_id("q");
        sqlx::query(
            "INSERT INTO task_queue(id, task_id, node_key, service, input_json, status,
                 worker_id, created_at, started_at, timeout_at)
             VALUES(?, ?, ?, ?, ?, 'pending', '', ?, 0, 0)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(node_key)
        .bind(service)
        .bind(input_json)
        .bind(now_secs())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Atomically claim the oldest pending item whose service is among the
    /// worker's advertised set. Returns `None` when nothing matches or the
    /// claim raced.
    pub async fn poll_queue(
        &self,
        worker_id: &str,
        services: &[String],
        visibility_secs: i64,
    ) -> Result<Option<QueueItem>, StoreError> {
        if services.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; services.len()].join(",");
        let select = format!(
            "SELECT id, task_id, node_key, service, input_json FROM task_queue
             WHERE status = 'pending' AND service IN ({placeholders})
             ORDER BY created_at ASC LIMIT 1"
        );
        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&select);
        for s in services {
            query = query.bind(s);
        }
        let Some(row) = query.fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let now = now_secs();
        let timeout_at = now + visibility_secs;
        let claimed = sqlx::query(
            "UPDATE task_queue SET status = 'claimed', worker_id = ?, started_at = ?, timeout_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(now)
        .bind(timeout_at)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(QueueItem {
            id,
            task_id: row.try_get("task_id")?,
            node_key: row.try_get("node_key")?,
            service: row.try_get("service")?,
            input_json: row.try_get("input_json")?,
            status: QueueStatus::Claimed,
            worker_id: worker_id.to_string(),
            created_at: 0,
            started_at: now,
            timeout_at,
        }))
    }

    /// Mark a queue item terminal and return its task id.
    pub async fn settle_queue_item(
        &self,
        queue_id: &str,
        status: QueueStatus,
    ) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT task_id FROM task_queue WHERE id = ?")
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("queue item {queue_id}")))?;
        let task_id: String = row.try_get("task_id")?;
        sqlx::query("UPDATE task_queue SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        Ok(task_id)
    }

    pub async fn count_queue_items(&self, task_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM task_queue WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

fn flow_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Flow, StoreError> {
    Ok(Flow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn flow_version_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FlowVersion, StoreError> {
    Ok(FlowVersion {
        id: row.try_get("id")?,
        flow_id: row.try_get("flow_id")?,
        version: row.try_get("version")?,
        definition_json: row.try_get("definition_json")?,
        status: row.try_get("status")?,
    })
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Task {
        id: row.try_get("id")?,
        flow_version_id: row.try_get("flow_version_id")?,
        status: status.parse()?,
        params_json: row.try_get("params_json")?,
        shared_json: row.try_get("shared_json")?,
        current_node_key: row.try_get("current_node_key")?,
        last_action: row.try_get("last_action")?,
        step_count: row.try_get("step_count")?,
        lease_owner: row.try_get("lease_owner")?,
        lease_expiry: row.try_get("lease_expiry")?,
        request_id: row.try_get("request_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn node_run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<NodeRun, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(NodeRun {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        node_key: row.try_get("node_key")?,
        attempt_no: row.try_get("attempt_no")?,
        status: status.parse()?,
        sub_status: row.try_get("sub_status")?,
        branch_id: row.try_get("branch_id")?,
        prep_json: row.try_get("prep_json")?,
        exec_input_json: row.try_get("exec_input_json")?,
        exec_output_json: row.try_get("exec_output_json")?,
        error_text: row.try_get("error_text")?,
        action: row.try_get("action")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        worker_id: row.try_get("worker_id")?,
        worker_url: row.try_get("worker_url")?,
        log_path: row.try_get("log_path")?,
    })
}
