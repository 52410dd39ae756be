use futures::future::join_all;
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;
use todos_server::db::{Database, DatabaseKind};
use todos_server::todo::{TodoChanges, TodoId, TodoRepositoryError, repository_for};

mod common;

/// An id that is valid for the backend but names no stored todo.
fn missing_id(db: &Database) -> TodoId {
    match db.kind() {
        Ok(DatabaseKind::Mongo) => TodoId::new(ObjectId::new().to_hex()),
        _ => TodoId::new("999999"),
    }
}

macro_rules! repository_tests {
    ($backend:ident, $setup:ident) => {
        mod $backend {
            use super::*;

            #[tokio::test]
            async fn can_create_todo_not_done() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;

                let todo = repository.create("buy milk".to_string()).await?;

                assert!(!todo.id.as_str().is_empty());
                assert_eq!(todo.title, "buy milk");
                assert!(!todo.done);
                Ok(())
            }

            #[tokio::test]
            async fn can_get_created_todo() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;
                let created = repository.create("walk dog".to_string()).await?;

                let fetched = repository.get(&created.id).await?;

                assert_eq!(fetched, Some(created));
                Ok(())
            }

            #[tokio::test]
            async fn can_mark_done_without_touching_title() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;
                let created = repository.create("water plants".to_string()).await?;

                repository
                    .update(
                        &created.id,
                        TodoChanges {
                            title: None,
                            done: Some(true),
                        },
                    )
                    .await?;

                let fetched = repository.get(&created.id).await?.unwrap();
                assert_eq!(fetched.title, "water plants");
                assert!(fetched.done);
                Ok(())
            }

            #[tokio::test]
            async fn can_replace_title_and_done() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;
                let created = repository.create("draft".to_string()).await?;

                repository
                    .update(
                        &created.id,
                        TodoChanges {
                            title: Some("final".to_string()),
                            done: Some(true),
                        },
                    )
                    .await?;

                let fetched = repository.get(&created.id).await?.unwrap();
                assert_eq!(fetched.title, "final");
                assert!(fetched.done);
                Ok(())
            }

            #[tokio::test]
            async fn can_list_newest_first() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;
                for title in ["first", "second", "third"] {
                    repository.create(title.to_string()).await?;
                }

                let titles: Vec<String> = repository
                    .list()
                    .await?
                    .into_iter()
                    .map(|todo| todo.title)
                    .collect();

                assert_eq!(titles, vec!["third", "second", "first"]);
                Ok(())
            }

            #[tokio::test]
            async fn can_delete_todo() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;
                let created = repository.create("temporary".to_string()).await?;

                repository.delete(&created.id).await?;

                assert_eq!(repository.get(&created.id).await?, None);
                assert!(repository.list().await?.is_empty());
                Ok(())
            }

            #[tokio::test]
            async fn can_ignore_missing_ids() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let repository = repository_for(test_db.db.clone())?;
                let id = missing_id(&test_db.db);

                assert_eq!(repository.get(&id).await?, None);
                repository.delete(&id).await?;
                repository
                    .update(
                        &id,
                        TodoChanges {
                            title: None,
                            done: Some(true),
                        },
                    )
                    .await?;
                Ok(())
            }

            #[tokio::test]
            async fn can_share_one_connect_between_concurrent_callers() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;
                let db = Arc::new(Database::new(test_db.db.config().clone()));

                let callers = (0..8).map(|_| {
                    let db = db.clone();
                    tokio::spawn(async move { db.initialize().await })
                });
                for result in join_all(callers).await {
                    result??;
                }

                assert_eq!(db.connect_attempts(), 1);
                assert!(db.status().await.is_connected());
                assert_eq!(db.connect_attempts(), 1);
                Ok(())
            }

            #[tokio::test]
            async fn can_report_connected_status() -> anyhow::Result<()> {
                let test_db = crate::common::$setup().await?;

                let status = test_db.db.status().await;

                assert!(status.is_connected());
                assert_eq!(status.database, test_db.db.kind()?.to_string());
                Ok(())
            }
        }
    };
}

repository_tests!(postgres, setup_postgres);
repository_tests!(mariadb, setup_mariadb);
repository_tests!(mongo, setup_mongo);

#[tokio::test]
async fn can_reject_malformed_mongo_id() -> anyhow::Result<()> {
    let test_db = common::setup_mongo().await?;
    let repository = repository_for(test_db.db.clone())?;

    let result = repository.get(&TodoId::new("not-an-object-id")).await;

    assert!(matches!(result, Err(TodoRepositoryError::MalformedId(_))));
    Ok(())
}

#[tokio::test]
async fn can_treat_non_numeric_sql_id_as_missing() -> anyhow::Result<()> {
    let test_db = common::setup_postgres().await?;
    let repository = repository_for(test_db.db.clone())?;

    assert_eq!(repository.get(&TodoId::new("abc")).await?, None);
    Ok(())
}

#[tokio::test]
async fn can_rerun_migrations_on_existing_schema() -> anyhow::Result<()> {
    let test_db = common::setup_postgres().await?;
    let repository = repository_for(test_db.db.clone())?;
    repository.create("survives".to_string()).await?;

    // A second adapter against the same server applies migrations again.
    let again = Database::new(test_db.db.config().clone());
    again.initialize().await?;

    let todos = repository_for(Arc::new(again))?.list().await?;
    assert_eq!(todos.len(), 1);
    Ok(())
}
