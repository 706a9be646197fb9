use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use accrete_core::assembler::{AddOptions, Assembler};
use accrete_core::handlers::{
    FinishedHandler, HandlerContext, HandlerRegistry, ItemHandler, Phase,
};
use accrete_core::models::RowId;
use accrete_core::persistence::RowStore;
use accrete_core::queue::{DeliveryRuntime, InMemoryItemQueue, ItemQueue};
use accrete_core::sqlite::SqliteRowStore;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn test_dir(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("accrete-{test_name}-{nanos}"))
}

/// Emits the CSV header on the first item, via returned text.
struct HeaderHandler;

impl ItemHandler for HeaderHandler {
    fn handle(
        &self,
        _item: &Value,
        _file: &mut File,
        _context: &HandlerContext,
    ) -> io::Result<Option<String>> {
        Ok(Some("id,name\n".to_string()))
    }
}

/// Appends one CSV record per item, via returned text.
struct RecordHandler;

impl ItemHandler for RecordHandler {
    fn handle(
        &self,
        item: &Value,
        _file: &mut File,
        _context: &HandlerContext,
    ) -> io::Result<Option<String>> {
        Ok(Some(format!(
            "{},{}\n",
            item["id"],
            item["name"].as_str().unwrap_or_default()
        )))
    }
}

/// Closes the file on the last item, writing directly through the handle.
struct FooterHandler;

impl ItemHandler for FooterHandler {
    fn handle(
        &self,
        _item: &Value,
        file: &mut File,
        _context: &HandlerContext,
    ) -> io::Result<Option<String>> {
        file.write_all(b"end\n")?;
        Ok(None)
    }
}

#[derive(Default)]
struct FinishRecorder {
    calls: Mutex<Vec<(u64, Option<String>)>>,
}

impl FinishedHandler for FinishRecorder {
    fn on_finished(&self, context: &HandlerContext) -> io::Result<()> {
        self.calls
            .lock()
            .expect("finish recorder mutex poisoned")
            .push((context.row_id.0, context.content.clone()));
        Ok(())
    }
}

struct Fixture {
    store: Arc<dyn RowStore>,
    queue: Arc<dyn ItemQueue>,
    handlers: Arc<HandlerRegistry>,
    recorder: Arc<FinishRecorder>,
    db_path: PathBuf,
}

fn csv_fixture(test_name: &str) -> Fixture {
    init_tracing();

    let db_path = test_dir(test_name).with_extension("sqlite3");
    let sqlite = SqliteRowStore::new(&db_path);
    sqlite.migrate_to_latest().expect("migrations must apply");

    let recorder = Arc::new(FinishRecorder::default());
    let mut registry = HandlerRegistry::new();
    registry.register("export", Phase::First, Arc::new(HeaderHandler));
    registry.register("export", Phase::Main, Arc::new(RecordHandler));
    registry.register("export", Phase::Last, Arc::new(FooterHandler));
    registry.register_finished("export", recorder.clone());

    Fixture {
        store: Arc::new(sqlite),
        queue: Arc::new(InMemoryItemQueue::new()),
        handlers: Arc::new(registry),
        recorder,
        db_path,
    }
}

#[tokio::test]
async fn queued_batch_builds_and_finalizes_a_csv_file() {
    let fixture = csv_fixture("flow-batch");
    let dir = test_dir("flow-batch-out");
    let target = dir.join("report.csv");

    let assembler = Arc::new(
        Assembler::new(
            "export",
            fixture.store.clone(),
            fixture.queue.clone(),
            fixture.handlers.clone(),
        )
        .unwrap(),
    );

    let row_id = assembler
        .add(
            &target,
            vec![
                json!({"id": 1, "name": "alpha"}),
                json!({"id": 2, "name": "beta"}),
                json!({"id": 3, "name": "gamma"}),
            ],
            AddOptions {
                read: false,
                ..AddOptions::default()
            },
        )
        .unwrap();
    assert_eq!(assembler.pending_items().unwrap(), 3);

    let runtime = DeliveryRuntime::new(fixture.queue.clone());
    let delivered = runtime.drain(assembler.clone()).await.unwrap();
    assert_eq!(delivered, 3);

    // Final file in place, working copy gone.
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "id,name\n1,alpha\n2,beta\n3,gamma\nend\n"
    );
    assert!(!dir.join("report.csv.tmp").exists());
    assert_eq!(assembler.pending_items().unwrap(), 0);

    let rows = assembler.files().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, row_id);
    assert!(rows[0].finished_at.is_some());

    let calls = fixture.recorder.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[(row_id.0, None)]);
    drop(calls);

    let _ = std::fs::remove_dir_all(dir);
    let _ = std::fs::remove_file(fixture.db_path);
}

#[tokio::test]
async fn single_item_batch_is_first_and_last_in_one_delivery() {
    let fixture = csv_fixture("flow-single");
    let dir = test_dir("flow-single-out");
    let target = dir.join("single.csv");

    let assembler = Arc::new(
        Assembler::new(
            "export",
            fixture.store.clone(),
            fixture.queue.clone(),
            fixture.handlers.clone(),
        )
        .unwrap(),
    );

    assembler
        .add(
            &target,
            vec![json!({"id": 7, "name": "only"})],
            AddOptions::default(),
        )
        .unwrap();

    let runtime = DeliveryRuntime::new(fixture.queue.clone());
    assert_eq!(runtime.drain(assembler.clone()).await.unwrap(), 1);

    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "id,name\n7,only\nend\n"
    );
    let rows = assembler.files().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].finished_at.is_some());

    // read was requested, so the finished phase saw the final content.
    let calls = fixture.recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1.as_deref(),
        Some("id,name\n7,only\nend\n"),
        "finished handler must see the promoted file's content"
    );
    drop(calls);

    let _ = std::fs::remove_dir_all(dir);
    let _ = std::fs::remove_file(fixture.db_path);
}

#[tokio::test]
async fn tasks_without_main_handlers_still_finalize() {
    init_tracing();

    let db_path = test_dir("flow-nohandlers").with_extension("sqlite3");
    let sqlite = SqliteRowStore::new(&db_path);
    sqlite.migrate_to_latest().unwrap();
    let store: Arc<dyn RowStore> = Arc::new(sqlite);
    let queue: Arc<dyn ItemQueue> = Arc::new(InMemoryItemQueue::new());
    let handlers = Arc::new(HandlerRegistry::new());

    let dir = test_dir("flow-nohandlers-out");
    let target = dir.join("empty.txt");

    let assembler = Arc::new(Assembler::new("export", store, queue.clone(), handlers).unwrap());
    let row_id = assembler
        .add(&target, vec![json!("only")], AddOptions::default())
        .unwrap();

    let runtime = DeliveryRuntime::new(queue);
    assert_eq!(runtime.drain(assembler.clone()).await.unwrap(), 1);

    // No handler ever opened the working file, so the rename had nothing to
    // promote; the row stays unfinished and retryable.
    assert!(!target.exists());
    let row = assembler.file(row_id).unwrap().expect("row must remain");
    assert!(row.finished_at.is_none());

    let _ = std::fs::remove_dir_all(dir);
    let _ = std::fs::remove_file(db_path);
}

#[test]
fn add_rejects_empty_paths_and_empty_queued_batches() {
    let fixture = csv_fixture("flow-invalid-add");

    let assembler = Assembler::new(
        "export",
        fixture.store.clone(),
        fixture.queue.clone(),
        fixture.handlers.clone(),
    )
    .unwrap();

    let error = assembler
        .add("", vec![json!(1)], AddOptions::default())
        .unwrap_err();
    assert_eq!(
        error.kind,
        accrete_core::models::EngineErrorKind::InvalidArgument
    );

    let error = assembler
        .add("/out/x.csv", Vec::new(), AddOptions::default())
        .unwrap_err();
    assert_eq!(
        error.kind,
        accrete_core::models::EngineErrorKind::InvalidArgument
    );

    assert!(assembler.files().unwrap().is_empty());

    let _ = std::fs::remove_file(fixture.db_path);
}

#[test]
fn empty_task_names_are_a_construction_error() {
    let fixture = csv_fixture("flow-empty-name");

    let error = Assembler::new(
        "",
        fixture.store.clone(),
        fixture.queue.clone(),
        fixture.handlers.clone(),
    )
    .map(|_| ())
    .unwrap_err();
    assert_eq!(
        error.kind,
        accrete_core::models::EngineErrorKind::InvalidArgument
    );

    let _ = std::fs::remove_file(fixture.db_path);
}

#[test]
fn delivering_for_an_unknown_row_is_an_invalid_invocation() {
    let fixture = csv_fixture("flow-unknown-row");

    let assembler = Assembler::new(
        "export",
        fixture.store.clone(),
        fixture.queue.clone(),
        fixture.handlers.clone(),
    )
    .unwrap();

    let error = assembler
        .deliver(&accrete_core::models::QueuedItem {
            row_id: RowId(424242),
            status: accrete_core::models::ItemStatus::normal(),
            append: true,
            read: false,
            payload: json!("x"),
        })
        .unwrap_err();
    assert_eq!(
        error.kind,
        accrete_core::models::EngineErrorKind::InvalidInvocation
    );

    let _ = std::fs::remove_file(fixture.db_path);
}
