use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use phototodo::error::AppError;
use phototodo::models::{Attachment, NewTodo, Todo, TodoWithImageUrl};
use phototodo::records::{MemoryRecordStore, RecordStore, TodoSubscription};
use phototodo::storage::{BlobStore, MemoryBlobStore, SignedUrl, StoredObject};
use phototodo::view::TodoListView;

fn cat_png() -> Attachment {
    Attachment {
        file_name: "cat.png".to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
    }
}

/// Counts calls through to an inner memory store, for asserting that an
/// action performed no storage side effects.
struct CountingBlobStore {
    inner: MemoryBlobStore,
    uploads: AtomicUsize,
}

impl CountingBlobStore {
    fn new() -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            uploads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<StoredObject, AppError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(path, data).await
    }

    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError> {
        self.inner.get_url(path).await
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        self.inner.remove(path).await
    }
}

/// Rejects every upload, for the abort-on-upload-failure path.
struct RejectingBlobStore;

#[async_trait]
impl BlobStore for RejectingBlobStore {
    async fn upload(&self, _path: &str, _data: Vec<u8>) -> Result<StoredObject, AppError> {
        Err(AppError::Storage("upload rejected".to_string()))
    }

    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError> {
        Err(AppError::BlobNotFound(path.to_string()))
    }

    async fn remove(&self, _path: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Records which paths were asked to be removed and fails each removal.
struct FailingRemoveBlobStore {
    removed: Mutex<Vec<String>>,
}

impl FailingRemoveBlobStore {
    fn new() -> Self {
        Self {
            removed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BlobStore for FailingRemoveBlobStore {
    async fn upload(&self, path: &str, _data: Vec<u8>) -> Result<StoredObject, AppError> {
        Ok(StoredObject {
            path: path.to_string(),
        })
    }

    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError> {
        Err(AppError::BlobNotFound(path.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        self.removed.lock().await.push(path.to_string());
        Err(AppError::Storage("remove rejected".to_string()))
    }
}

/// Stalls the first url resolution so an older emission's pass finishes
/// after a newer emission has already published.
struct StallingBlobStore {
    inner: MemoryBlobStore,
    calls: AtomicUsize,
    first_call_started: Notify,
}

impl StallingBlobStore {
    fn new() -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            calls: AtomicUsize::new(0),
            first_call_started: Notify::new(),
        }
    }
}

#[async_trait]
impl BlobStore for StallingBlobStore {
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<StoredObject, AppError> {
        self.inner.upload(path, data).await
    }

    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first_call_started.notify_one();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.inner.get_url(path).await
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        self.inner.remove(path).await
    }
}

/// Fails every create; everything else delegates to a real memory store.
struct FailingCreateStore {
    inner: MemoryRecordStore,
}

#[async_trait]
impl RecordStore for FailingCreateStore {
    async fn create(&self, _req: NewTodo) -> Result<Todo, AppError> {
        Err(AppError::Store("create rejected".to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<Todo>, AppError> {
        self.inner.list().await
    }

    fn observe_query(&self) -> TodoSubscription {
        self.inner.observe_query()
    }
}

/// Waits until the visible list satisfies the predicate or times out.
async fn wait_for_list(
    rx: &mut tokio::sync::watch::Receiver<Vec<TodoWithImageUrl>>,
    predicate: impl Fn(&[TodoWithImageUrl]) -> bool,
) -> Vec<TodoWithImageUrl> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if predicate(&rx.borrow()) {
                return rx.borrow().clone();
            }
            rx.changed().await.expect("view stopped publishing");
        }
    })
    .await
    .expect("visible list did not reach expected state")
}

#[tokio::test]
async fn empty_content_performs_no_calls() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(CountingBlobStore::new());
    let view = TodoListView::new(records.clone(), blobs.clone(), "user-1");

    let err = view
        .create_todo("   ", Some(cat_png()))
        .await
        .expect_err("empty content must be rejected");
    assert!(matches!(err, AppError::Validation(_)));

    assert!(records.list().await.expect("list").is_empty());
    assert_eq!(blobs.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_without_file_has_no_image_key() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records.clone(), blobs, "user-1");

    let todo = view
        .create_todo("Buy milk", None)
        .await
        .expect("create should succeed");

    assert_eq!(todo.content, "Buy milk");
    assert!(todo.image_key.is_none());
    assert_eq!(records.list().await.expect("list").len(), 1);
}

#[tokio::test]
async fn create_with_file_links_uploaded_path() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records.clone(), blobs.clone(), "user-1");

    let todo = view
        .create_todo("Take photo", Some(cat_png()))
        .await
        .expect("create should succeed");

    let key = todo.image_key.expect("image key must be set");
    assert!(key.starts_with("protected/user-1/"), "key was {}", key);
    assert!(key.ends_with("-cat.png"), "key was {}", key);
    assert!(blobs.contains(&key).await, "blob must exist at {}", key);

    let stored = records.list().await.expect("list");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].image_key.as_deref(), Some(key.as_str()));
}

#[tokio::test]
async fn upload_failure_creates_no_record() {
    let records = Arc::new(MemoryRecordStore::new());
    let view = TodoListView::new(records.clone(), Arc::new(RejectingBlobStore), "user-1");

    let err = view
        .create_todo("Take photo", Some(cat_png()))
        .await
        .expect_err("upload failure must abort the action");
    assert!(matches!(err, AppError::Storage(_)));

    assert!(records.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn failed_record_create_removes_uploaded_blob() {
    let records = Arc::new(FailingCreateStore {
        inner: MemoryRecordStore::new(),
    });
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records, blobs.clone(), "user-1");

    let err = view
        .create_todo("Take photo", Some(cat_png()))
        .await
        .expect_err("record create failure must surface");
    assert!(matches!(err, AppError::Store(_)));

    assert!(
        blobs.paths().await.is_empty(),
        "compensating delete must reclaim the uploaded blob"
    );
}

#[tokio::test]
async fn delete_proceeds_past_blob_remove_failure() {
    let records = Arc::new(MemoryRecordStore::new());
    let todo = records
        .create(NewTodo {
            content: "Take photo".to_string(),
            image_key: Some("protected/user-1/1-cat.png".to_string()),
        })
        .await
        .expect("seed todo");

    let blobs = Arc::new(FailingRemoveBlobStore::new());
    let view = TodoListView::new(records.clone(), blobs.clone(), "user-1");

    view.delete_todo(&todo)
        .await
        .expect("record delete must still succeed");

    assert_eq!(
        blobs.removed.lock().await.as_slice(),
        ["protected/user-1/1-cat.png"]
    );
    assert!(records.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn visible_list_tracks_emissions() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records.clone(), blobs, "user-1");

    let mut rx = view.watch();
    let _subscription = view.start();

    view.create_todo("Buy milk", None).await.expect("create");
    let items = wait_for_list(&mut rx, |items| items.len() == 1).await;
    assert_eq!(items[0].todo.content, "Buy milk");
    assert!(items[0].image_url.is_empty());

    view.create_todo("Take photo", Some(cat_png()))
        .await
        .expect("create with image");
    let items = wait_for_list(&mut rx, |items| items.len() == 2).await;
    let with_image = items
        .iter()
        .find(|i| i.todo.image_key.is_some())
        .expect("image todo must be visible");
    assert!(
        with_image.image_url.starts_with("memory://"),
        "url was {:?}",
        with_image.image_url
    );
}

#[tokio::test]
async fn unresolvable_image_keeps_record_visible() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records.clone(), blobs, "user-1");

    let mut rx = view.watch();
    let _subscription = view.start();

    records
        .create(NewTodo {
            content: "Dangling image".to_string(),
            image_key: Some("protected/user-1/1-gone.png".to_string()),
        })
        .await
        .expect("seed todo");

    let items = wait_for_list(&mut rx, |items| items.len() == 1).await;
    assert_eq!(items[0].todo.content, "Dangling image");
    assert!(items[0].image_url.is_empty());
}

#[tokio::test]
async fn create_render_delete_scenario() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records, blobs.clone(), "user-1");

    let mut rx = view.watch();
    let _subscription = view.start();

    view.create_todo("Take photo", Some(cat_png()))
        .await
        .expect("create");
    let items = wait_for_list(&mut rx, |items| items.len() == 1).await;
    assert!(!items[0].image_url.is_empty(), "image must render");

    let todo = items[0].todo.clone();
    let key = todo.image_key.clone().expect("image key");

    view.delete_todo(&todo).await.expect("delete");
    wait_for_list(&mut rx, |items| items.is_empty()).await;

    let err = blobs
        .get_url(&key)
        .await
        .expect_err("deleted blob must not be retrievable");
    assert!(matches!(err, AppError::BlobNotFound(_)));
}

#[tokio::test]
async fn rapid_changes_settle_on_latest_state() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let view = TodoListView::new(records, blobs, "user-1");

    let mut rx = view.watch();
    let _subscription = view.start();

    let first = view.create_todo("one", None).await.expect("create");
    view.create_todo("two", None).await.expect("create");
    view.create_todo("three", None).await.expect("create");
    view.delete_todo(&first).await.expect("delete");

    let items = wait_for_list(&mut rx, |items| {
        items.len() == 2 && items.iter().all(|i| i.todo.content != "one")
    })
    .await;
    let mut contents: Vec<&str> = items.iter().map(|i| i.todo.content.as_str()).collect();
    contents.sort();
    assert_eq!(contents, ["three", "two"]);
}

#[tokio::test]
async fn slow_resolution_never_overwrites_newer_emission() {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(StallingBlobStore::new());
    blobs
        .inner
        .upload("protected/user-1/1-cat.png", vec![1])
        .await
        .expect("seed blob");
    records
        .create(NewTodo {
            content: "with image".to_string(),
            image_key: Some("protected/user-1/1-cat.png".to_string()),
        })
        .await
        .expect("seed todo");

    let view = TodoListView::new(records, blobs.clone(), "user-1");
    let mut rx = view.watch();
    let _subscription = view.start();

    // The initial emission's resolution pass is now parked inside get_url.
    tokio::time::timeout(Duration::from_secs(2), blobs.first_call_started.notified())
        .await
        .expect("first resolution pass never started");

    view.create_todo("added later", None).await.expect("create");

    let items = wait_for_list(&mut rx, |items| items.len() == 2).await;
    assert!(items.iter().any(|i| i.todo.content == "added later"));

    // Let the parked pass finish; it carries a stale sequence number and
    // must be discarded instead of shrinking the list back to one item.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let items = rx.borrow().clone();
    assert_eq!(items.len(), 2, "stale pass overwrote the newer emission");
    assert!(items.iter().any(|i| i.todo.content == "added later"));
    assert!(items.iter().any(|i| i.todo.content == "with image"));
}
