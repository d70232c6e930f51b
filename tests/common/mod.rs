#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::oneshot;

use strategy_client::config::Config;
use strategy_client::gateway::{ApiGateway, MemoryTokenStore, StoredTokens};

pub const TIMESTAMP: &str = "2025-07-14T11:57:00Z";

type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Default)]
struct Inner {
    valid_token: String,
    token_serial: usize,
    refresh_ok: bool,
    refresh_delay: Duration,
    next_id: usize,
    strategies: Vec<Value>,
    templates: Vec<Value>,
    executions: Vec<Value>,
    tasks: HashMap<String, Value>,
    failures: HashMap<&'static str, (StatusCode, Value)>,
    update_echo: Option<Value>,
    hits: HashMap<&'static str, usize>,
}

#[derive(Clone, Default)]
struct MockState {
    inner: Arc<Mutex<Inner>>,
}

impl MockState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Counts the hit, enforces the bearer token and any injected failure
    fn enter(&self, route: &'static str, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
        let mut inner = self.lock();
        *inner.hits.entry(route).or_default() += 1;
        let expected = format!("Bearer {}", inner.valid_token);
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected);
        if !authorized {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "Could not validate credentials"})),
            ));
        }
        if let Some((status, body)) = inner.failures.remove(route) {
            return Err((status, Json(body)));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        format!("{prefix}{}", inner.next_id)
    }
}

/// In-process stand-in for the strategy backend, served under `/api/v1`.
pub struct MockBackend {
    port: u16,
    state: MockState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState::default();
        {
            let mut inner = state.lock();
            inner.valid_token = "access-0".to_string();
            inner.refresh_ok = true;
        }

        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/protected", get(protected))
            .route("/slow", get(slow))
            .route("/error-detail", get(error_detail))
            .route("/error-structured", get(error_structured))
            .route("/strategies/", get(list_strategies).post(create_strategy))
            .route("/strategies/templates", get(list_templates))
            .route("/strategies/executions", get(list_executions))
            .route("/strategies/project-strategies", get(project_strategies).post(assign_project))
            .route("/strategies/import/{kind}", post(import_items))
            .route("/strategies/validate-data-source", post(validate_data_source))
            .route("/strategies/default-configs", get(default_configs))
            .route("/strategies/profile-nurture/validate-config", post(validate_nurture_config))
            .route("/strategies/profile-nurture/search-engines", get(search_engines))
            .route("/strategies/{id}", put(update_strategy).delete(delete_strategy))
            .route("/strategies/{id}/data-sources", post(add_data_source))
            .route("/strategies/{id}/data-sources/upload-file", post(upload_file))
            .route("/strategies/{id}/test-query-source", post(test_query_source))
            .route("/strategies/{id}/execute", post(execute_strategy))
            .route("/strategies/{id}/nurture-progress", get(nurture_progress))
            .route("/tasks/status/{task_id}", get(task_status))
            .with_state(state.clone());
        let app = Router::new().nest("/api/v1", api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            port,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1", self.port)
    }

    pub fn config(&self) -> Config {
        Config::for_base_url(&self.base_url()).unwrap()
    }

    /// Gateway whose session holds `stale-token`, which the backend rejects.
    pub async fn gateway_with_stale_session(&self, store: Arc<MemoryTokenStore>) -> ApiGateway {
        let gateway = ApiGateway::new(&self.config(), store).unwrap();
        assert!(gateway.restore().await.unwrap());
        gateway
    }

    pub async fn signed_in_gateway(&self) -> ApiGateway {
        let gateway = ApiGateway::new(&self.config(), Arc::new(MemoryTokenStore::new())).unwrap();
        gateway.login("user@example.com", "secret").await.unwrap();
        gateway
    }

    pub fn hits(&self, route: &'static str) -> usize {
        self.state.lock().hits.get(route).copied().unwrap_or(0)
    }

    pub fn set_refresh(&self, ok: bool, delay: Duration) {
        let mut inner = self.state.lock();
        inner.refresh_ok = ok;
        inner.refresh_delay = delay;
    }

    /// The next request to `route` fails with `status` and `body`.
    pub fn fail_next(&self, route: &'static str, status: StatusCode, body: Value) {
        self.state.lock().failures.insert(route, (status, body));
    }

    /// Revokes the current access token; the next call must refresh.
    pub fn expire_access_token(&self) {
        self.state.lock().valid_token = "revoked".to_string();
    }

    /// Overrides fields of the next update response without storing them.
    pub fn echo_next_update(&self, fields: Value) {
        self.state.lock().update_echo = Some(fields);
    }

    pub fn add_template(&self, template: Value) {
        self.state.lock().templates.push(template);
    }

    pub fn stored_strategy(&self, id: &str) -> Option<Value> {
        self.state.lock().strategies.iter().find(|s| s["id"] == id).cloned()
    }

    /// Updates the execution log entry queued under `task_id`.
    pub fn set_execution_status(&self, task_id: &str, status: &str) {
        let mut inner = self.state.lock();
        if let Some(execution) = inner.executions.iter_mut().find(|e| e["task_id"] == task_id) {
            execution["status"] = json!(status);
            if status == "completed" {
                execution["started_at"] = json!(TIMESTAMP);
                execution["completed_at"] = json!(TIMESTAMP);
                execution["result"] = json!({"sites_visited": 7});
            }
        }
    }

    pub fn set_task_status(&self, task_id: &str, status: &str) {
        let terminal = status == "completed" || status == "failed";
        let snapshot = json!({
            "task_id": task_id,
            "status": status,
            "task_type": "strategy_execution",
            "created_at": TIMESTAMP,
            "started_at": if status == "pending" { Value::Null } else { json!(TIMESTAMP) },
            "completed_at": if terminal { json!(TIMESTAMP) } else { Value::Null },
            "result": if status == "completed" { json!({"sites_visited": 7}) } else { Value::Null },
            "error_message": if status == "failed" { json!("proxy unavailable") } else { Value::Null },
        });
        self.state.lock().tasks.insert(task_id.to_string(), snapshot);
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn stale_store() -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::with_tokens(StoredTokens {
        access_token: "stale-token".to_string(),
        refresh_token: Some("refresh-1".to_string()),
    }))
}

// --- Handlers ---

async fn login(State(state): State<MockState>, Json(body): Json<Value>) -> Reply {
    if body["password"] != "secret" {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"detail": "Incorrect email or password"}))));
    }
    let token = state.lock().valid_token.clone();
    Ok(Json(json!({
        "access_token": token,
        "refresh_token": "refresh-1",
        "token_type": "bearer"
    })))
}

async fn refresh(State(state): State<MockState>, Json(body): Json<Value>) -> Reply {
    let (delay, ok) = {
        let mut inner = state.lock();
        *inner.hits.entry("refresh").or_default() += 1;
        (inner.refresh_delay, inner.refresh_ok)
    };
    tokio::time::sleep(delay).await;
    if !ok || body["refresh_token"] != "refresh-1" {
        return Err((StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid refresh token"}))));
    }
    let mut inner = state.lock();
    inner.token_serial += 1;
    inner.valid_token = format!("access-{}", inner.token_serial);
    Ok(Json(json!({"access_token": inner.valid_token, "token_type": "bearer"})))
}

async fn protected(State(state): State<MockState>, headers: HeaderMap) -> Reply {
    state.enter("protected", &headers)?;
    Ok(Json(json!({"ok": true})))
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({"ok": true}))
}

async fn error_detail() -> Reply {
    Err((StatusCode::NOT_FOUND, Json(json!({"detail": "Strategy not found"}))))
}

async fn error_structured() -> Reply {
    Err((
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({"detail": [{"loc": ["body", "name"], "msg": "field required"}]})),
    ))
}

async fn list_strategies(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    state.enter("list_strategies", &headers)?;
    let inner = state.lock();
    let strategies: Vec<Value> = inner
        .strategies
        .iter()
        .filter(|s| params.get("strategy_type").is_none_or(|t| s["strategy_type"] == t.as_str()))
        .cloned()
        .collect();
    Ok(Json(Value::Array(strategies)))
}

async fn list_templates(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    state.enter("list_templates", &headers)?;
    let inner = state.lock();
    let templates: Vec<Value> = inner
        .templates
        .iter()
        .filter(|t| params.get("strategy_type").is_none_or(|ty| t["strategy_type"] == ty.as_str()))
        .cloned()
        .collect();
    Ok(Json(Value::Array(templates)))
}

async fn create_strategy(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    state.enter("create", &headers)?;
    let id = state.next_id("s");
    let strategy = json!({
        "id": id,
        "user_id": "u1",
        "template_id": body.get("template_id").cloned().unwrap_or(Value::Null),
        "name": body["name"],
        "strategy_type": body["strategy_type"],
        "config": body.get("config").cloned().unwrap_or_else(|| json!({})),
        "created_at": TIMESTAMP,
        "updated_at": TIMESTAMP,
        "is_active": true,
        "data_sources": [],
        "nurture_status": null
    });
    state.lock().strategies.push(strategy.clone());
    Ok(Json(strategy))
}

async fn update_strategy(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    state.enter("update", &headers)?;
    let mut inner = state.lock();
    let Some(strategy) = inner.strategies.iter_mut().find(|s| s["id"] == id.as_str()) else {
        return Err((StatusCode::NOT_FOUND, Json(json!({"detail": "Strategy not found"}))));
    };
    for key in ["name", "config", "is_active"] {
        if let Some(value) = body.get(key) {
            strategy[key] = value.clone();
        }
    }
    strategy["updated_at"] = json!("2025-07-15T08:00:00Z");
    let mut response = strategy.clone();
    if let Some(Value::Object(fields)) = inner.update_echo.take() {
        for (key, value) in fields {
            response[key.as_str()] = value;
        }
    }
    Ok(Json(response))
}

async fn delete_strategy(State(state): State<MockState>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    state.enter("delete", &headers)?;
    state.lock().strategies.retain(|s| s["id"] != id.as_str());
    Ok(Json(json!({"success": true})))
}

async fn add_data_source(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    state.enter("add_data_source", &headers)?;
    let source_id = state.next_id("d");
    let items_count = body["data_content"]
        .as_str()
        .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0);
    // Like the real backend, the payload itself is not echoed back
    let source = json!({
        "id": source_id,
        "strategy_id": id,
        "source_type": body["source_type"],
        "source_url": body.get("source_url").cloned().unwrap_or(Value::Null),
        "file_path": null,
        "items_count": items_count,
        "is_active": true,
        "created_at": TIMESTAMP
    });
    let mut inner = state.lock();
    let Some(strategy) = inner.strategies.iter_mut().find(|s| s["id"] == id.as_str()) else {
        return Err((StatusCode::NOT_FOUND, Json(json!({"detail": "Strategy not found"}))));
    };
    if let Some(sources) = strategy["data_sources"].as_array_mut() {
        sources.push(source.clone());
    }
    Ok(Json(source))
}

async fn execute_strategy(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    state.enter("execute", &headers)?;
    let task_id = state.next_id("t");
    let mut inner = state.lock();
    let execution_type = inner
        .strategies
        .iter()
        .find(|s| s["id"] == id.as_str())
        .map(|s| s["strategy_type"].clone())
        .unwrap_or_else(|| json!("warmup"));
    inner.executions.push(json!({
        "id": format!("exec-{task_id}"),
        "strategy_id": id,
        "task_id": task_id,
        "execution_type": execution_type,
        "profile_id": null,
        "parameters": body["execution_params"],
        "result": null,
        "status": "pending",
        "started_at": null,
        "completed_at": null,
        "error_message": null
    }));
    Ok(Json(json!({
        "success": true,
        "task_id": task_id,
        "message": "Strategy queued for execution"
    })))
}

async fn list_executions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    state.enter("list_executions", &headers)?;
    let inner = state.lock();
    let executions: Vec<Value> = inner
        .executions
        .iter()
        .filter(|e| params.get("strategy_id").is_none_or(|id| e["strategy_id"] == id.as_str()))
        .cloned()
        .collect();
    Ok(Json(Value::Array(executions)))
}

async fn task_status(State(state): State<MockState>, headers: HeaderMap, Path(task_id): Path<String>) -> Reply {
    state.enter("task_status", &headers)?;
    state
        .lock()
        .tasks
        .get(&task_id)
        .cloned()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, Json(json!({"detail": "Task not found"}))))
}

async fn import_items(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    state.enter("import", &headers)?;
    if body["url"].as_str().is_none_or(|u| u.is_empty()) {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"detail": "URL is required"}))));
    }
    let items = json!(["buy shoes", "", " rent flat "]);
    match kind.as_str() {
        "url" => Ok(Json(items)),
        "google-sheets" => Ok(Json(json!({"items": items}))),
        "google-docs" => Ok(Json(json!({"data": items}))),
        _ => Err((StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"})))),
    }
}

async fn assign_project(State(state): State<MockState>, headers: HeaderMap, Json(_body): Json<Value>) -> Reply {
    state.enter("assign_project", &headers)?;
    let id = state.next_id("a");
    Ok(Json(json!({"success": true, "assignment_id": id, "message": "Strategies assigned"})))
}

async fn project_strategies(State(state): State<MockState>, headers: HeaderMap) -> Reply {
    state.enter("project_strategies", &headers)?;
    Ok(Json(json!([])))
}

async fn nurture_progress(State(state): State<MockState>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    state.enter("nurture_progress", &headers)?;
    Ok(Json(json!({"strategy_id": id, "profiles_ready": 3, "target": 10})))
}

fn list_items(text: &str, csv: bool) -> Vec<String> {
    text.lines()
        .flat_map(|line| {
            if csv {
                line.split(',').map(str::to_string).collect::<Vec<_>>()
            } else {
                vec![line.to_string()]
            }
        })
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn check_report(body: &Value) -> Value {
    let items = list_items(body["data_content"].as_str().unwrap_or_default(), false);
    let reachable = body["source_url"].as_str().is_none_or(|u| !u.contains("unreachable"));
    json!({
        "valid": reachable,
        "items_count": items.len(),
        "sample": items.iter().take(3).collect::<Vec<_>>(),
        "errors": if reachable { json!([]) } else { json!(["URL is not reachable"]) },
        "source_type": body["source_type"],
    })
}

async fn upload_file(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Reply {
    // Drain the form first so a rejected request still reads its whole body
    let mut upload = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.unwrap_or_default();
            upload = Some((file_name, String::from_utf8_lossy(&bytes).into_owned()));
        }
    }
    state.enter("upload_file", &headers)?;
    let Some((file_name, text)) = upload else {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "file is required"}))));
    };
    if !file_name.ends_with(".txt") && !file_name.ends_with(".csv") {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"detail": "Only .txt and .csv files are supported"}))));
    }
    let items = list_items(&text, file_name.ends_with(".csv"));

    let source_id = state.next_id("d");
    let mut inner = state.lock();
    let Some(strategy) = inner.strategies.iter_mut().find(|s| s["id"] == id.as_str()) else {
        return Err((StatusCode::NOT_FOUND, Json(json!({"detail": "Strategy not found"}))));
    };
    if let Some(sources) = strategy["data_sources"].as_array_mut() {
        sources.push(json!({
            "id": source_id,
            "strategy_id": id,
            "source_type": "file_upload",
            "source_url": null,
            "file_path": format!("uploads/{file_name}"),
            "items_count": items.len(),
            "is_active": true,
            "created_at": TIMESTAMP
        }));
    }
    Ok(Json(json!({
        "success": true,
        "data_source_id": source_id,
        "items_count": items.len(),
        "message": format!("Loaded {} items", items.len())
    })))
}

async fn validate_data_source(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    state.enter("validate_source", &headers)?;
    Ok(Json(check_report(&body)))
}

async fn test_query_source(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    state.enter("test_query_source", &headers)?;
    if !state.lock().strategies.iter().any(|s| s["id"] == id.as_str()) {
        return Err((StatusCode::NOT_FOUND, Json(json!({"detail": "Strategy not found"}))));
    }
    Ok(Json(check_report(&body)))
}

async fn validate_nurture_config(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    state.enter("validate_nurture_config", &headers)?;
    let warnings = if body["max_profiles_limit"].as_i64().is_some_and(|n| n > 500) {
        json!(["large profile batches take hours to nurture"])
    } else {
        json!([])
    };
    Ok(Json(json!({"valid": true, "warnings": warnings, "nurture_type": body["nurture_type"]})))
}

async fn search_engines(State(state): State<MockState>, headers: HeaderMap) -> Reply {
    state.enter("search_engines", &headers)?;
    Ok(Json(json!(["yandex.ru", "ya.ru", "dzen.ru"])))
}

// Leaves profile_nurture out, as an older backend would
async fn default_configs(State(state): State<MockState>, headers: HeaderMap) -> Reply {
    state.enter("default_configs", &headers)?;
    Ok(Json(json!({
        "warmup": {"type": "direct", "min_sites": 4, "max_sites": 9},
        "position_check": {"check_frequency": "weekly", "max_pages": 5},
        "experimental": {"enabled": true}
    })))
}
