use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::config::CloudConfig;
use crate::error::AppError;
use crate::models::{NewTodo, QueryEmission, Todo};

/// Live query over the caller's records. Emits the full current set on
/// subscribe and again on every change; dropping the subscription releases it.
pub struct TodoSubscription {
    rx: mpsc::Receiver<QueryEmission>,
    task: Option<JoinHandle<()>>,
}

impl TodoSubscription {
    pub async fn next(&mut self) -> Option<QueryEmission> {
        self.rx.recv().await
    }
}

impl Drop for TodoSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, req: NewTodo) -> Result<Todo, AppError>;
    async fn delete(&self, id: &str) -> Result<(), AppError>;
    async fn list(&self) -> Result<Vec<Todo>, AppError>;
    fn observe_query(&self) -> TodoSubscription;
}

pub struct HttpRecordStore {
    client: Client,
    config: CloudConfig,
}

impl HttpRecordStore {
    pub fn new(config: CloudConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn fetch_todos(client: &Client, config: &CloudConfig) -> Result<Vec<Todo>, AppError> {
        let response = client
            .get(format!("{}/todos", config.api_base_url))
            .header("Authorization", format!("Bearer {}", config.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "Listing todos failed {}: {}",
                status, body
            )));
        }

        response
            .json::<Vec<Todo>>()
            .await
            .map_err(|e| AppError::Store(format!("Failed to parse todo list: {}", e)))
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn create(&self, req: NewTodo) -> Result<Todo, AppError> {
        let response = self
            .client
            .post(format!("{}/todos", self.config.api_base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .json(&req)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "Creating todo failed {}: {}",
                status, body
            )));
        }

        response
            .json::<Todo>()
            .await
            .map_err(|e| AppError::Store(format!("Failed to parse created todo: {}", e)))
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(format!("{}/todos/{}", self.config.api_base_url, id))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "Deleting todo {} failed {}: {}",
                id, status, body
            )));
        }

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Todo>, AppError> {
        Self::fetch_todos(&self.client, &self.config).await
    }

    /// The HTTP backend has no push channel, so the live query is a poll
    /// loop: fetch, emit when the set differs from the last emission, sleep.
    fn observe_query(&self) -> TodoSubscription {
        let (tx, rx) = mpsc::channel(16);
        let client = self.client.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(config.poll_interval_secs.max(1));
            let mut last: Option<Vec<Todo>> = None;

            loop {
                match Self::fetch_todos(&client, &config).await {
                    Ok(items) => {
                        if last.as_ref() != Some(&items) {
                            last = Some(items.clone());
                            if tx.send(QueryEmission { items }).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // Poll failures are transient; keep the loop alive.
                        warn!("live query poll failed: {}", e);
                    }
                }

                tokio::time::sleep(interval).await;
            }
        });

        TodoSubscription {
            rx,
            task: Some(task),
        }
    }
}

/// In-process store for tests and offline mode. Changes are fanned out to
/// every open subscription as full-set emissions.
pub struct MemoryRecordStore {
    todos: Arc<Mutex<Vec<Todo>>>,
    changes: broadcast::Sender<QueryEmission>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            todos: Arc::new(Mutex::new(Vec::new())),
            changes,
        }
    }

    async fn emit(&self) {
        let items = self.todos.lock().await.clone();
        // No subscribers is fine.
        let _ = self.changes.send(QueryEmission { items });
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, req: NewTodo) -> Result<Todo, AppError> {
        let todo = Todo {
            id: Uuid::new_v4().to_string(),
            content: req.content,
            image_key: req.image_key,
        };
        self.todos.lock().await.push(todo.clone());
        self.emit().await;
        Ok(todo)
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.todos.lock().await.retain(|t| t.id != id);
        self.emit().await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Todo>, AppError> {
        Ok(self.todos.lock().await.clone())
    }

    fn observe_query(&self) -> TodoSubscription {
        let (tx, rx) = mpsc::channel(16);
        let todos = self.todos.clone();
        let mut changes = self.changes.subscribe();

        let task = tokio::spawn(async move {
            let items = todos.lock().await.clone();
            if tx.send(QueryEmission { items }).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(emission) => {
                        if tx.send(emission).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        TodoSubscription {
            rx,
            task: Some(task),
        }
    }
}
