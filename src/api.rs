//! REST façade for the task console.
//!
//! Every JSON body is wrapped in the same envelope: `success`, an
//! optional `data` payload, and a human-readable `message`. Failures
//! never carry `data`. Batch endpoints report `affected_count` — the
//! rows really touched, not the rows asked for.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use uuid::Uuid;

use crate::persist::SaveFile;
use crate::query::{
    self, DateField, DateRange, FilterCriteria, PageRequest, SortField, SortOrder, SortSpec,
};
use crate::store::{
    Command, Priority, Store, StoreError, StoreEvent, Task, TaskDraft, TaskPatch, TaskStatus,
};

// ── Shared state ───────────────────────────────────────────────

pub struct AppState {
    pub store: RwLock<Store>,
    pub save_file: SaveFile,
}

pub type SharedState = Arc<AppState>;

// ── Response envelope ──────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
}

/// Flat batch result: no data payload, just the count.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub message: String,
    pub affected_count: usize,
}

#[derive(Debug, Serialize)]
pub struct TaskListData {
    pub tasks: Vec<Task>,
    pub total: usize,
}

type Failure = (StatusCode, Json<ApiResponse<()>>);

fn ok<T>(data: T, message: &str) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        message: message.to_string(),
    })
}

fn fail(status: StatusCode, message: &str) -> Failure {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            message: message.to_string(),
        }),
    )
}

fn store_failure(e: StoreError) -> Failure {
    match e {
        StoreError::TaskNotFound => fail(StatusCode::NOT_FOUND, "task not found"),
        StoreError::Invalid(msg) => fail(StatusCode::UNPROCESSABLE_ENTITY, msg),
    }
}

fn flush_or_500(save_file: &SaveFile, store: &Store, event: &StoreEvent) -> Result<(), Failure> {
    save_file.flush(store, event).map_err(|e| {
        tracing::error!("save file flush failed: {e}");
        fail(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist the change")
    })
}

// ── Request types ──────────────────────────────────────────────

/// Query-string form of a list request. Multi-value dimensions
/// (status, priority) arrive comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    page: Option<u32>,
    size: Option<u32>,
    keyword: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    assignee: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    date_field: Option<String>,
    sort: Option<String>,
    order: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<(FilterCriteria, SortSpec, PageRequest), String> {
        let status: Vec<TaskStatus> = parse_csv(self.status.as_deref())?;
        let priority: Vec<Priority> = parse_csv(self.priority.as_deref())?;

        let date_range = match (self.from, self.to) {
            (None, None) => None,
            (Some(start), Some(end)) => {
                let field = match self.date_field.as_deref() {
                    None | Some("created_at") => DateField::CreatedAt,
                    Some("due_date") => DateField::DueDate,
                    Some(other) => return Err(format!("unknown date_field '{other}'")),
                };
                Some(DateRange { field, start, end })
            }
            _ => return Err("from and to must be provided together".to_string()),
        };

        let field = match self.sort.as_deref() {
            Some(raw) => raw.parse::<SortField>().map_err(|e| e.to_string())?,
            None => SortField::default(),
        };
        let order = match self.order.as_deref() {
            Some(raw) => raw.parse::<SortOrder>().map_err(|e| e.to_string())?,
            None => SortOrder::default(),
        };

        let page = PageRequest {
            page: self.page.unwrap_or(1),
            page_size: self.size.unwrap_or(10),
        };

        Ok((
            FilterCriteria {
                keyword: self.keyword,
                status,
                priority,
                assignee: self.assignee,
                date_range,
            },
            SortSpec { field, order },
            page,
        ))
    }
}

fn parse_csv<T>(raw: Option<&str>) -> Result<Vec<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else { return Ok(Vec::new()) };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|e: T::Err| e.to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusRequest {
    pub ids: Vec<Uuid>,
    pub status: TaskStatus,
}

// ── Handlers ───────────────────────────────────────────────────

pub async fn health() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        data: None,
        message: "ok".to_string(),
    })
}

// GET /api/tasks
pub async fn list_tasks(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<TaskListData>>, Failure> {
    let (criteria, sort, page) = params
        .into_query()
        .map_err(|msg| fail(StatusCode::BAD_REQUEST, &msg))?;

    let store = state.store.read().unwrap();
    let result = query::query(store.tasks(), &criteria, &sort, &page)
        .map_err(|e| fail(StatusCode::BAD_REQUEST, &e.to_string()))?;

    Ok(ok(
        TaskListData { tasks: result.items, total: result.total },
        "ok",
    ))
}

// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, Failure> {
    let store = state.store.read().unwrap();
    let task = store
        .get(id)
        .cloned()
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "task not found"))?;
    Ok(ok(task, "ok"))
}

// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    Json(draft): Json<TaskDraft>,
) -> Result<(StatusCode, Json<ApiResponse<Task>>), Failure> {
    let mut store = state.store.write().unwrap();
    let event = store.apply(Command::Create { draft }).map_err(store_failure)?;
    flush_or_500(&state.save_file, &store, &event)?;

    let task = match event {
        StoreEvent::TaskCreated { task, .. } => task,
        _ => unreachable!(),
    };
    Ok((StatusCode::CREATED, ok(task, "task created")))
}

// PUT /api/tasks/:id
pub async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<ApiResponse<Task>>, Failure> {
    let mut store = state.store.write().unwrap();
    let event = store
        .apply(Command::Update { task_id: id, patch })
        .map_err(store_failure)?;
    flush_or_500(&state.save_file, &store, &event)?;

    let task = match event {
        StoreEvent::TaskUpdated { task, .. } => task,
        _ => unreachable!(),
    };
    Ok(ok(task, "task updated"))
}

// DELETE /api/tasks/:id — strict: a second delete of the same id is 404.
pub async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, Failure> {
    let mut store = state.store.write().unwrap();
    let event = store
        .apply(Command::Delete { task_id: id })
        .map_err(store_failure)?;
    flush_or_500(&state.save_file, &store, &event)?;

    Ok(Json(ApiResponse {
        success: true,
        data: None,
        message: "task deleted".to_string(),
    }))
}

// POST /api/tasks/batch-delete — best effort, unknown ids are skipped.
pub async fn batch_delete(
    State(state): State<SharedState>,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<BatchResponse>, Failure> {
    let mut store = state.store.write().unwrap();
    let event = store
        .apply(Command::BatchDelete { task_ids: req.ids })
        .map_err(store_failure)?;
    flush_or_500(&state.save_file, &store, &event)?;

    let affected = match &event {
        StoreEvent::TasksDeleted { task_ids, .. } => task_ids.len(),
        _ => unreachable!(),
    };
    Ok(Json(BatchResponse {
        success: true,
        message: format!("{affected} tasks deleted"),
        affected_count: affected,
    }))
}

// POST /api/tasks/batch-status
pub async fn batch_status(
    State(state): State<SharedState>,
    Json(req): Json<BatchStatusRequest>,
) -> Result<Json<BatchResponse>, Failure> {
    let mut store = state.store.write().unwrap();
    let event = store
        .apply(Command::BatchSetStatus { task_ids: req.ids, status: req.status })
        .map_err(store_failure)?;
    flush_or_500(&state.save_file, &store, &event)?;

    let affected = match &event {
        StoreEvent::TasksStatusChanged { task_ids, .. } => task_ids.len(),
        _ => unreachable!(),
    };
    Ok(Json(BatchResponse {
        success: true,
        message: format!("{affected} tasks updated"),
        affected_count: affected,
    }))
}

// ── Router ─────────────────────────────────────────────────────

pub fn router(state: SharedState, static_dir: &str) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/tasks/batch-delete", post(batch_delete))
        .route("/api/tasks/batch-status", post(batch_status))
        // Console assets
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ── Tests ──────────────────────────────────────────────────────
