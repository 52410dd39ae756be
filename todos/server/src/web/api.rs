use std::sync::Arc;

use crate::db::{ConnectionState, Database, DatabaseStatus};
use crate::todo::api::v1::{
    CreateTodoRequest, PatchTodoRequest, ReplaceTodoRequest, TodoState, create_api_router,
};
use crate::todo::{Todo, TodoId};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

/// JSON body for API errors.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: String) -> Self {
        Self { error }
    }
}

/// JSON body for successful mutations.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::todo::api::v1::list_todos_handler,
        crate::todo::api::v1::create_todo_handler,
        crate::todo::api::v1::replace_todo_handler,
        crate::todo::api::v1::patch_todo_handler,
        crate::todo::api::v1::delete_todo_handler,
        status_handler,
    ),
    components(schemas(
        Todo,
        TodoId,
        CreateTodoRequest,
        ReplaceTodoRequest,
        PatchTodoRequest,
        ErrorResponse,
        SuccessResponse,
        DatabaseStatus,
        ConnectionState,
    )),
    tags((name = "Todos"), (name = "Status"))
)]
pub struct ApiDoc;

/// Handler for GET /api/status - Reports backend connectivity.
#[tracing::instrument(skip(db))]
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Backend reachable", body = DatabaseStatus),
        (status = 500, description = "Backend unreachable or unconfigured", body = DatabaseStatus)
    ),
    tag = "Status"
)]
pub async fn status_handler(State(db): State<Arc<Database>>) -> (StatusCode, Json<DatabaseStatus>) {
    let status = db.status().await;
    let status_code = if status.is_connected() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status_code, Json(status))
}

/// Handler for GET /api/openapi.json.
pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Creates the API routes for JSON API endpoints.
pub fn create_json_api_router(todo_state: TodoState, db: Arc<Database>) -> Router {
    let status_routes = Router::new()
        .route("/api/status", get(status_handler))
        .with_state(db);
    create_api_router(todo_state)
        .merge(status_routes)
        .route("/api/openapi.json", get(openapi_handler))
}
