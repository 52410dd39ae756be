use async_trait::async_trait;
use sea_orm::{QueryResult, Value};
use std::sync::Arc;

use super::{Todo, TodoChanges, TodoId, TodoRepository, TodoRepositoryError};
use crate::db::Database;

// Tables created by hand may use narrower or unsigned integer ids.
const MARIADB_COLUMNS: &str = "CAST(id AS SIGNED) AS id, title, done";
const POSTGRES_COLUMNS: &str = "CAST(id AS BIGINT) AS id, title, done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    MariaDb,
    Postgres,
}

impl Dialect {
    fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::MariaDb => "?".to_string(),
            Dialect::Postgres => format!("${position}"),
        }
    }
}

/// SQL ids are positive integers; anything else cannot match a row.
fn parse_sql_id(id: &TodoId) -> Option<i64> {
    id.as_str().parse::<i64>().ok().filter(|id| *id > 0)
}

fn todo_from_row(row: &QueryResult) -> Result<Todo, TodoRepositoryError> {
    let id: i64 = row.try_get("", "id")?;
    let title: String = row.try_get("", "title")?;
    let done: bool = row.try_get("", "done")?;
    Ok(Todo::new(TodoId::from(id), title, done))
}

/// Builds an `UPDATE` touching only the supplied fields. Returns `None` when
/// there is nothing to set.
fn update_statement(
    dialect: Dialect,
    id: i64,
    changes: TodoChanges,
) -> Option<(String, Vec<Value>)> {
    let mut assignments = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(title) = changes.title {
        values.push(title.into());
        assignments.push(format!("title = {}", dialect.placeholder(values.len())));
    }
    if let Some(done) = changes.done {
        values.push(done.into());
        assignments.push(format!("done = {}", dialect.placeholder(values.len())));
    }
    if assignments.is_empty() {
        return None;
    }

    values.push(id.into());
    let sql = format!(
        "UPDATE todos SET {} WHERE id = {}",
        assignments.join(", "),
        dialect.placeholder(values.len())
    );
    Some((sql, values))
}

async fn fetch_one(
    db: &Database,
    sql: &str,
    id: &TodoId,
) -> Result<Option<Todo>, TodoRepositoryError> {
    let Some(id) = parse_sql_id(id) else {
        return Ok(None);
    };
    let rows = db.execute(sql, vec![id.into()]).await?;
    rows.first().map(todo_from_row).transpose()
}

async fn fetch_all(db: &Database, sql: &str) -> Result<Vec<Todo>, TodoRepositoryError> {
    db.execute(sql, vec![])
        .await?
        .iter()
        .map(todo_from_row)
        .collect()
}

async fn apply_update(
    db: &Database,
    dialect: Dialect,
    id: &TodoId,
    changes: TodoChanges,
) -> Result<(), TodoRepositoryError> {
    let Some(id) = parse_sql_id(id) else {
        return Ok(());
    };
    if let Some((sql, values)) = update_statement(dialect, id, changes) {
        db.execute(&sql, values).await?;
    }
    Ok(())
}

async fn apply_delete(db: &Database, sql: &str, id: &TodoId) -> Result<(), TodoRepositoryError> {
    let Some(id) = parse_sql_id(id) else {
        return Ok(());
    };
    db.execute(sql, vec![id.into()]).await?;
    Ok(())
}

/// Todo repository for MariaDB (and MySQL-compatible servers).
pub struct MariaDbTodoRepository {
    db: Arc<Database>,
}

impl MariaDbTodoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TodoRepository for MariaDbTodoRepository {
    #[tracing::instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Todo>, TodoRepositoryError> {
        let sql = format!("SELECT {MARIADB_COLUMNS} FROM todos ORDER BY id DESC");
        fetch_all(&self.db, &sql).await
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: &TodoId) -> Result<Option<Todo>, TodoRepositoryError> {
        let sql = format!("SELECT {MARIADB_COLUMNS} FROM todos WHERE id = ?");
        fetch_one(&self.db, &sql, id).await
    }

    #[tracing::instrument(skip(self))]
    async fn create(&self, title: String) -> Result<Todo, TodoRepositoryError> {
        let id = self
            .db
            .execute_insert(
                "INSERT INTO todos (title, done) VALUES (?, ?)",
                vec![title.clone().into(), false.into()],
            )
            .await?;
        let id = i64::try_from(id)
            .map_err(|_| TodoRepositoryError::MalformedRecord(format!("insert id {id}")))?;
        Ok(Todo::new(TodoId::from(id), title, false))
    }

    #[tracing::instrument(skip(self))]
    async fn update(&self, id: &TodoId, changes: TodoChanges) -> Result<(), TodoRepositoryError> {
        apply_update(&self.db, Dialect::MariaDb, id, changes).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &TodoId) -> Result<(), TodoRepositoryError> {
        apply_delete(&self.db, "DELETE FROM todos WHERE id = ?", id).await
    }
}

/// Todo repository for PostgreSQL.
pub struct PostgresTodoRepository {
    db: Arc<Database>,
}

impl PostgresTodoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TodoRepository for PostgresTodoRepository {
    #[tracing::instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Todo>, TodoRepositoryError> {
        let sql = format!("SELECT {POSTGRES_COLUMNS} FROM todos ORDER BY id DESC");
        fetch_all(&self.db, &sql).await
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: &TodoId) -> Result<Option<Todo>, TodoRepositoryError> {
        let sql = format!("SELECT {POSTGRES_COLUMNS} FROM todos WHERE id = $1");
        fetch_one(&self.db, &sql, id).await
    }

    #[tracing::instrument(skip(self))]
    async fn create(&self, title: String) -> Result<Todo, TodoRepositoryError> {
        let sql = format!(
            "INSERT INTO todos (title, done) VALUES ($1, false) RETURNING {POSTGRES_COLUMNS}"
        );
        let rows = self.db.execute(&sql, vec![title.into()]).await?;
        let row = rows.first().ok_or_else(|| {
            TodoRepositoryError::MalformedRecord("INSERT returned no row".to_string())
        })?;
        todo_from_row(row)
    }

    #[tracing::instrument(skip(self))]
    async fn update(&self, id: &TodoId, changes: TodoChanges) -> Result<(), TodoRepositoryError> {
        apply_update(&self.db, Dialect::Postgres, id, changes).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &TodoId) -> Result<(), TodoRepositoryError> {
        apply_delete(&self.db, "DELETE FROM todos WHERE id = $1", id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_only_positive_integer_ids() {
        assert_eq!(parse_sql_id(&TodoId::new("42")), Some(42));
        assert_eq!(parse_sql_id(&TodoId::new("0")), None);
        assert_eq!(parse_sql_id(&TodoId::new("-3")), None);
        assert_eq!(parse_sql_id(&TodoId::new("65f1c0ffee")), None);
    }

    #[test]
    fn can_build_full_update_for_postgres() {
        let changes = TodoChanges {
            title: Some("walk dog".to_string()),
            done: Some(true),
        };

        let (sql, values) = update_statement(Dialect::Postgres, 7, changes).unwrap();

        assert_eq!(sql, "UPDATE todos SET title = $1, done = $2 WHERE id = $3");
        assert_eq!(
            values,
            vec![
                Value::from("walk dog".to_string()),
                Value::from(true),
                Value::from(7i64)
            ]
        );
    }

    #[test]
    fn can_build_partial_update_for_postgres() {
        let changes = TodoChanges {
            title: None,
            done: Some(false),
        };

        let (sql, values) = update_statement(Dialect::Postgres, 3, changes).unwrap();

        assert_eq!(sql, "UPDATE todos SET done = $1 WHERE id = $2");
        assert_eq!(values, vec![Value::from(false), Value::from(3i64)]);
    }

    #[test]
    fn can_build_partial_update_for_mariadb() {
        let changes = TodoChanges {
            title: Some("renamed".to_string()),
            done: None,
        };

        let (sql, values) = update_statement(Dialect::MariaDb, 9, changes).unwrap();

        assert_eq!(sql, "UPDATE todos SET title = ? WHERE id = ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn can_skip_update_without_changes() {
        assert!(update_statement(Dialect::MariaDb, 1, TodoChanges::default()).is_none());
    }
}
