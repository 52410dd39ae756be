use crate::todo::{Todo, TodoChanges, TodoId, TodoRepository, TodoRepositoryError};
use crate::web::api::{ErrorResponse, SuccessResponse};
use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, put},
};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct TodoState {
    pub repository: Arc<dyn TodoRepository>,
}

impl TodoState {
    pub fn new(repository: Arc<dyn TodoRepository>) -> Self {
        Self { repository }
    }
}

/// Request body for POST /api/todos.
#[derive(Debug, ToSchema)]
pub struct CreateTodoRequest {
    /// Non-empty task description
    title: String,
}

impl CreateTodoRequest {
    fn from_json(body: &Value) -> Result<Self, TodoApiError> {
        match body.get("title").and_then(Value::as_str) {
            Some(title) if !title.trim().is_empty() => Ok(Self {
                title: title.to_string(),
            }),
            _ => Err(TodoApiError::Validation("title is required")),
        }
    }
}

/// Request body for PUT /api/todos/{id}. Both fields are required.
#[derive(Debug, ToSchema)]
pub struct ReplaceTodoRequest {
    title: String,
    done: bool,
}

impl ReplaceTodoRequest {
    fn from_json(body: &Value) -> Result<Self, TodoApiError> {
        let title = body
            .get("title")
            .and_then(Value::as_str)
            .filter(|title| !title.trim().is_empty());
        match (title, body.get("done").and_then(Value::as_bool)) {
            (Some(title), Some(done)) => Ok(Self {
                title: title.to_string(),
                done,
            }),
            _ => Err(TodoApiError::Validation(
                "title (string) and done (boolean) are required",
            )),
        }
    }
}

impl From<ReplaceTodoRequest> for TodoChanges {
    fn from(request: ReplaceTodoRequest) -> Self {
        TodoChanges {
            title: Some(request.title),
            done: Some(request.done),
        }
    }
}

/// Request body for PATCH /api/todos/{id}.
///
/// Fields with the wrong JSON type are ignored rather than rejected. A blank
/// string title is rejected.
#[derive(Debug, Default, ToSchema)]
pub struct PatchTodoRequest {
    title: Option<String>,
    done: Option<bool>,
}

impl PatchTodoRequest {
    fn from_json(body: &Value) -> Result<Self, TodoApiError> {
        let title = match body.get("title").and_then(Value::as_str) {
            Some(title) if title.trim().is_empty() => {
                return Err(TodoApiError::Validation("title cannot be empty"));
            }
            title => title.map(str::to_string),
        };
        Ok(Self {
            title,
            done: body.get("done").and_then(Value::as_bool),
        })
    }
}

impl From<PatchTodoRequest> for TodoChanges {
    fn from(request: PatchTodoRequest) -> Self {
        TodoChanges {
            title: request.title,
            done: request.done,
        }
    }
}

/// Error type for todo handlers. Every variant renders as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum TodoApiError {
    /// The request body is missing fields or has the wrong shape.
    #[error("{0}")]
    Validation(&'static str),
    /// The id names no existing todo.
    #[error("todo not found")]
    NotFound,
    /// The id is not valid for the configured backend.
    #[error("invalid todo id")]
    MalformedId,
    /// The repository failed. Only the fixed context is shown to clients.
    #[error("{context}")]
    Repository {
        context: &'static str,
        #[source]
        source: TodoRepositoryError,
    },
}

impl IntoResponse for TodoApiError {
    fn into_response(self) -> Response {
        let status_code = match self {
            TodoApiError::Validation(_) | TodoApiError::MalformedId => StatusCode::BAD_REQUEST,
            TodoApiError::NotFound => StatusCode::NOT_FOUND,
            TodoApiError::Repository { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status_code, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

fn repository_failure(context: &'static str) -> impl FnOnce(TodoRepositoryError) -> TodoApiError {
    move |source| match source {
        TodoRepositoryError::MalformedId(_) => TodoApiError::MalformedId,
        source => {
            tracing::error!("{}: {}", context, source);
            TodoApiError::Repository { context, source }
        }
    }
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, TodoApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        tracing::debug!("Rejected request body: {}", rejection);
        TodoApiError::Validation("invalid JSON body")
    })
}

async fn ensure_exists(
    state: &TodoState,
    id: &TodoId,
    context: &'static str,
) -> Result<(), TodoApiError> {
    state
        .repository
        .get(id)
        .await
        .map_err(repository_failure(context))?
        .map(|_| ())
        .ok_or(TodoApiError::NotFound)
}

/// Handler for GET /api/todos - Returns all todos, newest first.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/todos",
    responses(
        (status = 200, description = "Successfully retrieved todos", body = [Todo]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn list_todos_handler(
    State(state): State<TodoState>,
) -> Result<Json<Vec<Todo>>, TodoApiError> {
    let todos = state
        .repository
        .list()
        .await
        .map_err(repository_failure("failed to fetch todos"))?;
    Ok(Json(todos))
}

/// Handler for POST /api/todos - Creates a todo with `done = false`.
#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    post,
    path = "/api/todos",
    request_body = CreateTodoRequest,
    responses(
        (status = 201, description = "Todo created", body = Todo),
        (status = 400, description = "Title missing or empty", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn create_todo_handler(
    State(state): State<TodoState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Todo>), TodoApiError> {
    let request = CreateTodoRequest::from_json(&json_body(body)?)?;
    let todo = state
        .repository
        .create(request.title)
        .await
        .map_err(repository_failure("failed to create todo"))?;
    Ok((StatusCode::CREATED, Json(todo)))
}

/// Handler for PUT /api/todos/{id} - Replaces both title and done.
#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    put,
    path = "/api/todos/{id}",
    params(("id" = String, Path, description = "Todo identifier")),
    request_body = ReplaceTodoRequest,
    responses(
        (status = 200, description = "Todo updated", body = SuccessResponse),
        (status = 400, description = "Missing or mistyped fields", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn replace_todo_handler(
    State(state): State<TodoState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SuccessResponse>, TodoApiError> {
    const CONTEXT: &str = "failed to update todo";
    let request = ReplaceTodoRequest::from_json(&json_body(body)?)?;
    let id = TodoId::new(id);
    ensure_exists(&state, &id, CONTEXT).await?;
    state
        .repository
        .update(&id, request.into())
        .await
        .map_err(repository_failure(CONTEXT))?;
    Ok(Json(SuccessResponse::ok()))
}

/// Handler for PATCH /api/todos/{id} - Updates only the supplied fields.
#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    patch,
    path = "/api/todos/{id}",
    params(("id" = String, Path, description = "Todo identifier")),
    request_body = PatchTodoRequest,
    responses(
        (status = 200, description = "Todo updated", body = SuccessResponse),
        (status = 400, description = "No valid field supplied or blank title", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn patch_todo_handler(
    State(state): State<TodoState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SuccessResponse>, TodoApiError> {
    const CONTEXT: &str = "failed to patch todo";
    let changes = TodoChanges::from(PatchTodoRequest::from_json(&json_body(body)?)?);
    if changes.is_empty() {
        return Err(TodoApiError::Validation("nothing to update"));
    }
    let id = TodoId::new(id);
    ensure_exists(&state, &id, CONTEXT).await?;
    state
        .repository
        .update(&id, changes)
        .await
        .map_err(repository_failure(CONTEXT))?;
    Ok(Json(SuccessResponse::ok()))
}

/// Handler for DELETE /api/todos/{id}.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/api/todos/{id}",
    params(("id" = String, Path, description = "Todo identifier")),
    responses(
        (status = 200, description = "Todo deleted", body = SuccessResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn delete_todo_handler(
    State(state): State<TodoState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, TodoApiError> {
    const CONTEXT: &str = "failed to delete todo";
    let id = TodoId::new(id);
    ensure_exists(&state, &id, CONTEXT).await?;
    state
        .repository
        .delete(&id)
        .await
        .map_err(repository_failure(CONTEXT))?;
    Ok(Json(SuccessResponse::ok()))
}

/// Creates and returns the todos API router.
pub fn create_api_router(state: TodoState) -> Router {
    Router::new()
        .route(
            "/api/todos",
            get(list_todos_handler).post(create_todo_handler),
        )
        .route(
            "/api/todos/{id}",
            put(replace_todo_handler)
                .patch(patch_todo_handler)
                .delete(delete_todo_handler),
        )
        .with_state(state)
}
