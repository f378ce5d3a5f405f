use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{Attachment, NewTodo, Todo, TodoWithImageUrl};
use crate::records::RecordStore;
use crate::storage::{self, BlobStore};

/// Keeps the list-sync task alive; dropping it releases the live query and
/// stops publication on every exit path.
pub struct ViewSubscription {
    task: Option<JoinHandle<()>>,
}

impl Drop for ViewSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// View-model over the three managed services. Holds the visible, resolved
/// todo list and sequences the multi-step user actions (upload-then-link on
/// create, blob-then-record on delete).
#[derive(Clone)]
pub struct TodoListView {
    inner: Arc<Inner>,
}

struct Inner {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    user_id: String,
    visible: watch::Sender<Vec<TodoWithImageUrl>>,
    emission_seq: AtomicU64,
    published_seq: Mutex<u64>,
}

impl TodoListView {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        user_id: impl Into<String>,
    ) -> Self {
        let (visible, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                records,
                blobs,
                user_id: user_id.into(),
                visible,
                emission_seq: AtomicU64::new(0),
                published_seq: Mutex::new(0),
            }),
        }
    }

    /// Current resolved list; the receiver updates as emissions settle.
    pub fn watch(&self) -> watch::Receiver<Vec<TodoWithImageUrl>> {
        self.inner.visible.subscribe()
    }

    /// Opens the live query and keeps the visible list in sync with it.
    ///
    /// Each emission is tagged with a monotonic sequence number and resolved
    /// off the subscription loop, so a slow resolution pass never delays the
    /// next emission. A pass that finishes after a newer one has published is
    /// discarded rather than overwriting fresher state.
    pub fn start(&self) -> ViewSubscription {
        let mut subscription = self.inner.records.observe_query();
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(emission) = subscription.next().await {
                let seq = inner.emission_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.resolve_and_publish(seq, emission.items).await;
                });
            }
        });

        ViewSubscription { task: Some(task) }
    }

    /// Create a todo, uploading the attachment first so the record never
    /// points at a missing blob. If the record create fails after the upload
    /// succeeded, the uploaded blob is removed again, best effort.
    pub async fn create_todo(
        &self,
        content: &str,
        file: Option<Attachment>,
    ) -> Result<Todo, AppError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation(
                "Todo content must not be empty".to_string(),
            ));
        }

        let inner = &self.inner;
        let image_key = match file {
            Some(attachment) => {
                let path = storage::protected_path(&inner.user_id, &attachment.file_name);
                let stored = inner.blobs.upload(&path, attachment.bytes).await?;
                Some(stored.path)
            }
            None => None,
        };

        let request = NewTodo {
            content: content.to_string(),
            image_key: image_key.clone(),
        };

        match inner.records.create(request).await {
            Ok(todo) => Ok(todo),
            Err(e) => {
                if let Some(key) = image_key {
                    if let Err(cleanup) = inner.blobs.remove(&key).await {
                        warn!("failed to clean up orphaned blob {}: {}", key, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete a todo, blob first. A blob delete failure is logged and the
    /// record delete still runs; a missing blob must never pin the record.
    pub async fn delete_todo(&self, todo: &Todo) -> Result<(), AppError> {
        if let Some(key) = &todo.image_key {
            if let Err(e) = self.inner.blobs.remove(key).await {
                warn!("failed to delete blob {} for todo {}: {}", key, todo.id, e);
            }
        }

        self.inner.records.delete(&todo.id).await
    }
}

impl Inner {
    async fn resolve_and_publish(&self, seq: u64, items: Vec<Todo>) {
        let resolved = join_all(items.into_iter().map(|t| self.resolve_item(t))).await;

        let mut published = self.published_seq.lock().await;
        if seq <= *published {
            debug!("discarding stale emission {} (newest {})", seq, *published);
            return;
        }
        *published = seq;
        self.visible.send_replace(resolved);
    }

    /// Per-record URL resolution is best-effort: a failure leaves the record
    /// visible with an empty image url, it never drops the record.
    async fn resolve_item(&self, todo: Todo) -> TodoWithImageUrl {
        let image_url = match &todo.image_key {
            Some(key) => match self.blobs.get_url(key).await {
                Ok(signed) => signed.url,
                Err(e) => {
                    warn!("failed to resolve image url for {}: {}", key, e);
                    String::new()
                }
            },
            None => String::new(),
        };
        TodoWithImageUrl { todo, image_url }
    }
}
