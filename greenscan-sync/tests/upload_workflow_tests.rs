//! Upload Workflow Integration Tests
//!
//! Runs whole upload attempts against the in-process store and a scripted
//! analysis service.

use async_trait::async_trait;
use greenscan_common::events::{EventBus, SyncEvent, UploadState};
use greenscan_common::record::RecordStatus;
use greenscan_common::{Category, PlantRecord};
use greenscan_sync::analysis::{AnalysisError, AnalysisResult, AnalysisService};
use greenscan_sync::media::{FileMediaSource, MediaKind, SelectedImage};
use greenscan_sync::screen::{Route, UploadScreen};
use greenscan_sync::store::{MemoryStore, RemoteStore};
use greenscan_sync::upload::UploadSession;
use greenscan_sync::SyncError;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Analysis service answering from a script, recording every request
struct ScriptedAnalysis {
    reply: Result<&'static str, u16>,
    calls: AtomicUsize,
    last_request: Mutex<Option<(Category, String)>>,
}

impl ScriptedAnalysis {
    fn ok(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysis {
    async fn analyze(
        &self,
        category: Category,
        image_data: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some((category, image_data.to_string()));
        match self.reply {
            Ok(text) => Ok(AnalysisResult {
                analysis: text.to_string(),
                class: None,
            }),
            Err(status) => Err(AnalysisError::Api {
                status,
                reason: "Internal Server Error".to_string(),
                body: r#"{"error":"model not loaded"}"#.to_string(),
            }),
        }
    }
}

fn image_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    // JPEG SOI + APP0 marker
    file.write_all(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'])
        .unwrap();
    file
}

fn stored_record(store: &MemoryStore, key: &str) -> Option<PlantRecord> {
    store
        .get(key)
        .map(|value| serde_json::from_value(value).unwrap())
}

#[tokio::test]
async fn test_tomato_upload_writes_completed_record() {
    // Given: a selected tomato leaf image and a backend reporting blight
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::ok("Leaf blight detected");
    let image = image_file();
    let mut session = UploadSession::new(Category::Tomato, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));

    // When: the user submits
    let route = session.submit(&store, analysis.as_ref()).await;

    // Then: the record is written and the screen hands off to details
    assert_eq!(route, Some(Route::Details(Category::Tomato)));
    assert_eq!(session.state(), UploadState::Succeeded);
    assert_eq!(analysis.calls(), 1);

    let record = stored_record(&store, "plant_info/tomato").unwrap();
    assert_eq!(record.plant, Category::Tomato);
    assert_eq!(record.analysis, "Leaf blight detected");
    assert_eq!(record.status, RecordStatus::Completed);
    assert!(record.image.starts_with("data:image/jpeg;base64,"));

    let raw = store.get("plant_info/tomato").unwrap();
    assert!(raw["timestamp"].is_i64(), "server timestamp resolved on write");

    let (category, sent) = analysis.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(category, Category::Tomato);
    assert_eq!(sent, record.image);
}

#[tokio::test]
async fn test_submit_without_image_never_calls_service() {
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::ok("unused");
    let mut session = UploadSession::new(Category::Banana, "plant_info", EventBus::new(10));

    assert!(session.submit(&store, analysis.as_ref()).await.is_none());
    assert_eq!(analysis.calls(), 0);
    assert_eq!(store.write_count(), 0);
    assert_eq!(session.error(), Some(&SyncError::NoImageSelected));
}

#[tokio::test]
async fn test_service_failure_writes_nothing() {
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::failing(500);
    let image = image_file();
    let mut session = UploadSession::new(Category::Mango, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));

    assert!(session.submit(&store, analysis.as_ref()).await.is_none());
    assert_eq!(session.state(), UploadState::Failed);
    assert_eq!(store.write_count(), 0);
    assert_eq!(
        session.error_message().as_deref(),
        Some("Failed to analyze image: 500 Internal Server Error")
    );
    // image kept for a resubmit
    assert!(session.selected_image().is_some());
}

#[tokio::test]
async fn test_unreadable_image_fails_before_service() {
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::ok("unused");
    let mut session = UploadSession::new(Category::Mango, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new("/nonexistent/leaf.jpg"));

    assert!(session.submit(&store, analysis.as_ref()).await.is_none());
    assert_eq!(analysis.calls(), 0);
    assert!(matches!(session.error(), Some(SyncError::EncodingFailed(_))));
}

#[tokio::test]
async fn test_store_write_failure_reports_lost_analysis() {
    let store = MemoryStore::new();
    store.fail_writes(true);
    let analysis = ScriptedAnalysis::ok("Plant is healthy");
    let image = image_file();
    let mut session = UploadSession::new(Category::Banana, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));

    assert!(session.submit(&store, analysis.as_ref()).await.is_none());
    assert_eq!(analysis.calls(), 1);
    assert_eq!(session.state(), UploadState::Failed);
    assert!(session.error().unwrap().analysis_lost());
    assert!(stored_record(&store, "plant_info/banana").is_none());
}

#[tokio::test]
async fn test_failed_attempt_can_be_resubmitted() {
    let store = MemoryStore::new();
    store.fail_writes(true);
    let analysis = ScriptedAnalysis::ok("Plant is healthy");
    let image = image_file();
    let mut session = UploadSession::new(Category::Banana, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));
    assert!(session.submit(&store, analysis.as_ref()).await.is_none());

    store.fail_writes(false);
    let route = session.submit(&store, analysis.as_ref()).await;
    assert_eq!(route, Some(Route::Details(Category::Banana)));
    assert!(session.error().is_none());
    assert_eq!(analysis.calls(), 2);
}

#[tokio::test]
async fn test_double_submit_runs_one_attempt() {
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::ok("Plant is healthy");
    let image = image_file();
    let mut session = UploadSession::new(Category::Mango, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));

    let job = session.begin_submit().unwrap();
    assert!(session.begin_submit().is_none(), "second submit is a no-op");

    let outcome = job.run(&store, analysis.as_ref()).await;
    assert!(session.finish(outcome).is_some());
    assert_eq!(analysis.calls(), 1);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn test_detached_job_completes_after_screen_left() {
    // Given: an upload screen with an attempt in flight
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::ok("Mango plant is healthy");
    let image = image_file();
    let mut session = UploadSession::new(Category::Mango, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));
    let job = session.begin_submit().unwrap();
    let handle = job.spawn(Arc::new(store.clone()), analysis.clone());

    // When: the screen goes away
    drop(session);

    // Then: the attempt still writes its record
    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.key, "plant_info/mango");
    assert_eq!(
        stored_record(&store, "plant_info/mango").unwrap().analysis,
        "Mango plant is healthy"
    );
}

#[tokio::test]
async fn test_upload_screen_end_to_end() {
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::ok("Leaf blight detected");
    let image = image_file();
    let bus = EventBus::new(20);
    let mut events = bus.subscribe();

    let mut screen = UploadScreen::enter(
        Category::Tomato,
        "plant_info",
        Arc::new(FileMediaSource::new(image.path())),
        bus,
    );
    assert!(screen.pick_image(MediaKind::Camera).await);
    let route = screen
        .submit(Arc::new(store.clone()), analysis.clone())
        .await;
    assert_eq!(route, Some(Route::Details(Category::Tomato)));

    let mut transitions = Vec::new();
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::UploadStateChanged { new_state, .. } => transitions.push(new_state),
            SyncEvent::UploadCompleted { analysis, .. } => completed = Some(analysis),
            _ => {}
        }
    }
    assert_eq!(
        transitions,
        vec![
            UploadState::ImageSelected,
            UploadState::Uploading,
            UploadState::Succeeded
        ]
    );
    assert_eq!(completed.as_deref(), Some("Leaf blight detected"));
}

#[tokio::test]
async fn test_reselecting_after_failure_clears_error() {
    let store = MemoryStore::new();
    let analysis = ScriptedAnalysis::failing(503);
    let image = image_file();
    let mut screen = UploadScreen::enter(
        Category::Banana,
        "plant_info",
        Arc::new(FileMediaSource::new(image.path())),
        EventBus::new(10),
    );
    assert!(screen.pick_image(MediaKind::Gallery).await);
    assert!(screen
        .submit(Arc::new(store.clone()), analysis)
        .await
        .is_none());
    assert!(screen.session().error().is_some());

    assert!(screen.pick_image(MediaKind::Gallery).await);
    assert!(screen.session().error().is_none());
    assert_eq!(screen.session().state(), UploadState::ImageSelected);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_dismissed_failure_keeps_failed_state() {
    // Given: an attempt the backend rejected
    let store = MemoryStore::new();
    let image = image_file();
    let mut screen = UploadScreen::enter(
        Category::Mango,
        "plant_info",
        Arc::new(FileMediaSource::new(image.path())),
        EventBus::new(10),
    );
    assert!(screen.pick_image(MediaKind::Gallery).await);
    assert!(screen
        .submit(Arc::new(store.clone()), ScriptedAnalysis::failing(500))
        .await
        .is_none());
    assert!(screen.session().error().is_some());

    // When: the user closes the error
    screen.dismiss_error();

    // Then: only the message goes away
    assert!(screen.session().error().is_none());
    assert_eq!(screen.session().state(), UploadState::Failed);
    assert!(screen.session().selected_image().is_some());

    // and the kept image can still be submitted
    let route = screen
        .submit(Arc::new(store.clone()), ScriptedAnalysis::ok("Plant is healthy"))
        .await;
    assert_eq!(route, Some(Route::Details(Category::Mango)));
}

#[tokio::test]
async fn test_write_replaces_previous_record() {
    let store = MemoryStore::new();
    store
        .set(
            "plant_info/tomato",
            serde_json::json!({"analysis": "old", "extra": "dropped"}),
        )
        .await
        .unwrap();

    let analysis = ScriptedAnalysis::ok("Plant is healthy");
    let image = image_file();
    let mut session = UploadSession::new(Category::Tomato, "plant_info", EventBus::new(10));
    session.select_image(SelectedImage::new(image.path()));
    session.submit(&store, analysis.as_ref()).await.unwrap();

    let raw = store.get("plant_info/tomato").unwrap();
    assert_eq!(raw["analysis"], "Plant is healthy");
    assert!(raw.get("extra").is_none(), "last write wins without merge");
}
