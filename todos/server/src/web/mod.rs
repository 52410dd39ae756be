pub mod api;
pub mod middleware;

use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::todo::api::v1::TodoState;
use crate::todo::{TodoRepository, repository_for};
use api::create_json_api_router;
use middleware::{AccessLogLayer, VisitTracker};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<dyn TodoRepository>,
    pub visits: Arc<VisitTracker>,
}

/// Builds the full application: JSON API, health probe and the shared layers.
pub fn create_app_router(state: AppState) -> Router {
    let todo_state = TodoState::new(state.repository);
    Router::new()
        .merge(create_json_api_router(todo_state, state.db))
        .route("/health", get(health_check_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(AccessLogLayer::new(state.visits)),
        )
}

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: Config) -> anyhow::Result<()> {
    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    let db = Arc::new(Database::new(config.database_config()));
    let repository = repository_for(db.clone())?;

    // The first request retries if the backend is not up yet.
    if let Err(err) = db.initialize().await {
        tracing::warn!(error = %err, "Database not reachable at startup");
    }

    let visits = Arc::new(VisitTracker::new(config.visit_window(), config.visit_max_ips));
    visits.start_sweeper();

    let app = create_app_router(AppState {
        db,
        repository,
        visits,
    });

    axum::serve(listener, app).await?;
    Ok(())
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConfig;
    use crate::todo::{MockTodoRepository, Todo, TodoId};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(repository: MockTodoRepository) -> (Router, Arc<VisitTracker>) {
        let visits = Arc::new(VisitTracker::new(Duration::from_secs(60), 100));
        let router = create_app_router(AppState {
            db: Arc::new(Database::new(DatabaseConfig::default())),
            repository: Arc::new(repository),
            visits: visits.clone(),
        });
        (router, visits)
    }

    #[tokio::test]
    async fn can_answer_health_check() {
        let (app, _) = app_with(MockTodoRepository::new());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn can_route_todo_requests_through_access_log() {
        let mut repository = MockTodoRepository::new();
        repository
            .expect_list()
            .times(1)
            .returning(|| Ok(vec![Todo::new(TodoId::new("1"), "a".to_string(), false)]));
        let (app, visits) = app_with(repository);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/todos")
                    .header("x-forwarded-for", "203.0.113.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits.record("203.0.113.9", "/api/todos").page, 2);
    }

    #[tokio::test]
    async fn can_allow_cross_origin_requests() {
        let (app, _) = app_with(MockTodoRepository::new());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }
}
