use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{DateTime, Document, doc};
use serde::Deserialize;
use std::sync::Arc;

use super::{Todo, TodoChanges, TodoId, TodoRepository, TodoRepositoryError};
use crate::db::Database;

const COLLECTION: &str = "todos";

/// Stored shape of a todo. `createdAt` is write-only and ignored here.
#[derive(Debug, Deserialize)]
struct TodoDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    title: String,
    done: bool,
}

impl From<TodoDocument> for Todo {
    fn from(document: TodoDocument) -> Self {
        Todo::new(TodoId::new(document.id.to_hex()), document.title, document.done)
    }
}

fn parse_object_id(id: &TodoId) -> Result<ObjectId, TodoRepositoryError> {
    ObjectId::parse_str(id.as_str())
        .map_err(|_| TodoRepositoryError::MalformedId(id.to_string()))
}

/// `$set` document for the supplied fields, or `None` if there are none.
fn set_document(changes: TodoChanges) -> Option<Document> {
    let mut set = Document::new();
    if let Some(title) = changes.title {
        set.insert("title", title);
    }
    if let Some(done) = changes.done {
        set.insert("done", done);
    }
    (!set.is_empty()).then_some(set)
}

/// Todo repository for MongoDB.
pub struct MongoTodoRepository {
    db: Arc<Database>,
}

impl MongoTodoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TodoRepository for MongoTodoRepository {
    #[tracing::instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Todo>, TodoRepositoryError> {
        let collection = self.db.collection::<TodoDocument>(COLLECTION).await?;
        // ObjectIds start with their creation time, so this is newest first.
        let documents: Vec<TodoDocument> = collection
            .find(doc! {})
            .sort(doc! { "_id": -1 })
            .await?
            .try_collect()
            .await?;
        Ok(documents.into_iter().map(Todo::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: &TodoId) -> Result<Option<Todo>, TodoRepositoryError> {
        let object_id = parse_object_id(id)?;
        let collection = self.db.collection::<TodoDocument>(COLLECTION).await?;
        let document = collection.find_one(doc! { "_id": object_id }).await?;
        Ok(document.map(Todo::from))
    }

    #[tracing::instrument(skip(self))]
    async fn create(&self, title: String) -> Result<Todo, TodoRepositoryError> {
        let collection = self.db.collection::<Document>(COLLECTION).await?;
        let result = collection
            .insert_one(doc! {
                "title": title.as_str(),
                "done": false,
                "createdAt": DateTime::now(),
            })
            .await?;
        let object_id = result.inserted_id.as_object_id().ok_or_else(|| {
            TodoRepositoryError::MalformedRecord(format!(
                "inserted id {} is not an ObjectId",
                result.inserted_id
            ))
        })?;
        Ok(Todo::new(TodoId::new(object_id.to_hex()), title, false))
    }

    #[tracing::instrument(skip(self))]
    async fn update(&self, id: &TodoId, changes: TodoChanges) -> Result<(), TodoRepositoryError> {
        let object_id = parse_object_id(id)?;
        let Some(set) = set_document(changes) else {
            return Ok(());
        };
        let collection = self.db.collection::<Document>(COLLECTION).await?;
        collection
            .update_one(doc! { "_id": object_id }, doc! { "$set": set })
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &TodoId) -> Result<(), TodoRepositoryError> {
        let object_id = parse_object_id(id)?;
        let collection = self.db.collection::<Document>(COLLECTION).await?;
        collection.delete_one(doc! { "_id": object_id }).await?;
        Ok(())
    }
}
