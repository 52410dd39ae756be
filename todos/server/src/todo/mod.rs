//! Todo domain type and the repository abstraction over the three backends.
//!
//! One [`TodoRepository`] implementation exists per backend kind. The web
//! layer receives a single `Arc<dyn TodoRepository>` chosen at startup by
//! [`repository_for`] and never inspects the backend kind itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::db::{Database, DatabaseError, DatabaseKind};

pub mod api;
pub mod document;
pub mod sql;

pub use document::MongoTodoRepository;
pub use sql::{MariaDbTodoRepository, PostgresTodoRepository};

/// Opaque todo identifier in its external string form.
///
/// SQL backends store it as an auto-increment integer, MongoDB as an
/// `ObjectId`; each repository converts to the native form itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TodoId(String);

impl TodoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for TodoId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// A titled task with a completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Todo {
    /// Server-assigned identifier
    pub id: TodoId,
    /// Task description
    pub title: String,
    /// Whether the task is completed
    pub done: bool,
}

impl Todo {
    pub fn new(id: TodoId, title: String, done: bool) -> Self {
        Self { id, title, done }
    }
}

/// Sparse set of fields to change on an existing todo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoChanges {
    pub title: Option<String>,
    pub done: Option<bool>,
}

impl TodoChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.done.is_none()
    }
}

/// Error type for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum TodoRepositoryError {
    /// The adapter failed (configuration, connection or query).
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// A SQL row could not be decoded.
    #[error("SQL error: {0}")]
    Sql(#[from] sea_orm::DbErr),
    /// A document command or decode failed.
    #[error("Document store error: {0}")]
    Document(#[from] mongodb::error::Error),
    /// The id is not a valid identifier for the backend.
    #[error("Malformed todo id '{0}'")]
    MalformedId(String),
    /// A stored record is missing expected data.
    #[error("Malformed todo record: {0}")]
    MalformedRecord(String),
}

/// CRUD operations on todos, implemented once per backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// Returns every todo, newest first.
    async fn list(&self) -> Result<Vec<Todo>, TodoRepositoryError>;

    /// Returns the todo with the given id, or `None` if it does not exist.
    async fn get(&self, id: &TodoId) -> Result<Option<Todo>, TodoRepositoryError>;

    /// Stores a new todo with `done = false`.
    async fn create(&self, title: String) -> Result<Todo, TodoRepositoryError>;

    /// Applies the supplied fields only. Empty changes do nothing.
    async fn update(&self, id: &TodoId, changes: TodoChanges) -> Result<(), TodoRepositoryError>;

    /// Removes the todo. Deleting a missing id is not an error.
    async fn delete(&self, id: &TodoId) -> Result<(), TodoRepositoryError>;
}

/// Picks the repository implementation for the configured backend.
pub fn repository_for(db: Arc<Database>) -> Result<Arc<dyn TodoRepository>, DatabaseError> {
    let repository: Arc<dyn TodoRepository> = match db.kind()? {
        DatabaseKind::MariaDb => Arc::new(MariaDbTodoRepository::new(db)),
        DatabaseKind::Postgres => Arc::new(PostgresTodoRepository::new(db)),
        DatabaseKind::Mongo => Arc::new(MongoTodoRepository::new(db)),
    };
    Ok(repository)
}
