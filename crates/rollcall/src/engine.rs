//! Capture sessions: a dedicated thread reads frames, runs recognition,
//! records attendance and publishes the latest annotated frame.

use image::RgbImage;
use rollcall_core::{
    Annotator, ArcFaceEncoder, EncoderError, FaceEncoder, FaceLocator, FrameProcessor, Gallery,
    LocatorError, RecognitionSettings, SamplerError, ScrfdLocator,
};
use rollcall_hw::{Camera, CameraError, FrameSource};
use rollcall_store::{AttendanceStore, RecordOutcome};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("invalid recognition settings: {0}")]
    Settings(#[from] SamplerError),
    #[error("failed to spawn session thread: {0}")]
    Spawn(std::io::Error),
    #[error("session thread panicked")]
    ThreadPanicked,
}

/// Which class meeting a session takes attendance for.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub class_code: String,
    pub class_name: String,
    pub meeting: u32,
}

/// Everything needed to start a camera session.
pub struct SessionResources {
    pub camera_device: String,
    pub capture_size: (u32, u32),
    pub read_timeout: Duration,
    pub warmup_frames: usize,
    pub scrfd_path: PathBuf,
    pub arcface_path: PathBuf,
    pub font_path: Option<PathBuf>,
    pub settings: RecognitionSettings,
}

/// Latest state published by the session loop.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Most recent frame, annotated when it was processed.
    pub frame: Option<Arc<RgbImage>>,
    pub status: String,
    pub frames_read: u64,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Stopped,
    CameraFailed(String),
    FrameRejected(String),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub faces_seen: u64,
    /// (identity id, display name) of every new record, in order.
    pub recorded: Vec<(String, String)>,
    pub already_recorded: usize,
    pub store_failures: usize,
    pub frame_errors: usize,
    pub end: SessionEnd,
}

impl SessionReport {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            frames_read: 0,
            frames_processed: 0,
            faces_seen: 0,
            recorded: Vec::new(),
            already_recorded: 0,
            store_failures: 0,
            frame_errors: 0,
            end: SessionEnd::Stopped,
        }
    }
}

/// Handle to a running capture session.
pub struct SessionHandle {
    stop: Arc<AtomicBool>,
    view: watch::Receiver<Snapshot>,
    thread: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Setting the flag stops the loop after the current frame.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.view.clone()
    }

    /// Wait for the session thread and return its report.
    pub fn join(self) -> Result<SessionReport, EngineError> {
        self.thread.join().map_err(|_| EngineError::ThreadPanicked)
    }
}

/// Read and drop `count` frames while the camera's auto exposure settles.
/// Returns the brightness of the last frame read, if any.
fn discard_warmup<S: FrameSource>(source: &mut S, count: usize) -> Option<f32> {
    if count == 0 {
        return None;
    }
    tracing::info!(count, "discarding warmup frames");
    let mut brightness = None;
    for i in 0..count {
        match source.read_frame() {
            Ok(frame) => {
                let level = frame.avg_brightness();
                tracing::debug!(frame = i, brightness = format!("{level:.1}"), "warmup frame");
                brightness = Some(level);
            }
            Err(e) => tracing::debug!(error = %e, "warmup frame failed"),
        }
    }
    brightness
}

/// Spawn a capture session on a dedicated OS thread.
///
/// Opens the camera, loads both ONNX models and discards warmup frames
/// before the thread starts, failing fast if any resource is unavailable.
/// The camera is owned by the thread and released when it exits.
pub fn spawn_session(
    resources: SessionResources,
    gallery: Arc<Gallery>,
    store: Arc<AttendanceStore>,
    params: SessionParams,
) -> Result<SessionHandle, EngineError> {
    let locator = ScrfdLocator::load(&resources.scrfd_path)?;
    tracing::info!(path = %resources.scrfd_path.display(), "SCRFD locator loaded");

    let encoder = ArcFaceEncoder::load(&resources.arcface_path)?;
    tracing::info!(path = %resources.arcface_path.display(), "ArcFace encoder loaded");

    if let Some(dim) = gallery.dimension() {
        if dim != encoder.dimension() {
            tracing::warn!(
                gallery = dim,
                encoder = encoder.dimension(),
                "gallery embedding size differs from the encoder; no face will match"
            );
        }
    }

    let processor = FrameProcessor::new(locator, encoder, gallery, resources.settings)?;
    let annotator = match &resources.font_path {
        Some(path) => Annotator::from_font_file(path),
        None => Annotator::new(),
    };

    let (width, height) = resources.capture_size;
    let camera = Camera::open(&resources.camera_device, width, height)?;
    tracing::info!(
        device = %resources.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    let mut source = camera.start(resources.read_timeout)?;

    discard_warmup(&mut source, resources.warmup_frames);

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = watch::channel(Snapshot::default());
    let session_id = Uuid::new_v4();

    let thread_stop = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            let span = tracing::info_span!(
                "session",
                id = %session_id,
                class = %params.class_code,
                meeting = params.meeting
            );
            let _guard = span.enter();
            tracing::info!(class_name = %params.class_name, "session thread started");

            let mut processor = processor;
            let report = run_session(
                session_id,
                &mut source,
                &mut processor,
                &annotator,
                &store,
                &params,
                &thread_stop,
                &tx,
            );
            drop(source);
            tracing::info!(end = ?report.end, recorded = report.recorded.len(), "session thread exiting");
            report
        })
        .map_err(EngineError::Spawn)?;

    Ok(SessionHandle {
        stop,
        view: rx,
        thread,
    })
}

/// Read → process → record → annotate → publish until stopped or the
/// source fails.
#[allow(clippy::too_many_arguments)]
pub fn run_session<S, L, E>(
    session_id: Uuid,
    source: &mut S,
    processor: &mut FrameProcessor<L, E>,
    annotator: &Annotator,
    store: &AttendanceStore,
    params: &SessionParams,
    stop: &AtomicBool,
    publish: &watch::Sender<Snapshot>,
) -> SessionReport
where
    S: FrameSource,
    L: FaceLocator,
    E: FaceEncoder,
{
    let mut report = SessionReport::new(session_id);
    let mut status = format!(
        "Ready: {} ({}) meeting {}",
        params.class_name, params.class_code, params.meeting
    );

    while !stop.load(Ordering::Relaxed) {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "camera read failed; ending session");
                report.end = SessionEnd::CameraFailed(e.to_string());
                break;
            }
        };
        report.frames_read += 1;

        let outcome = match processor.process(&frame.image, frame.timestamp) {
            Ok(outcome) => outcome,
            Err(e) if e.is_terminal() => {
                tracing::warn!(error = %e, "unreadable frame; ending session");
                report.end = SessionEnd::FrameRejected(e.to_string());
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "frame skipped");
                report.frame_errors += 1;
                continue;
            }
        };

        let mut image = frame.image;
        if outcome.sampled {
            report.frames_processed += 1;
            report.faces_seen += outcome.matches.len() as u64;

            for emission in &outcome.emissions {
                let result = store.record_attendance(
                    &params.class_code,
                    &emission.identity_id,
                    &emission.display_name,
                    params.meeting,
                );
                status = match &result {
                    RecordOutcome::Recorded { .. } => {
                        report
                            .recorded
                            .push((emission.identity_id.clone(), emission.display_name.clone()));
                        format!("Recorded: {} ({})", emission.display_name, emission.identity_id)
                    }
                    RecordOutcome::AlreadyRecorded { .. } => {
                        report.already_recorded += 1;
                        format!(
                            "{} ({}) already recorded",
                            emission.display_name, emission.identity_id
                        )
                    }
                    RecordOutcome::Failed { message } => {
                        report.store_failures += 1;
                        format!("Error: {message}")
                    }
                };
            }

            annotator.annotate(&mut image, &outcome.matches);
        }

        publish.send_replace(Snapshot {
            frame: Some(Arc::new(image)),
            status: status.clone(),
            frames_read: report.frames_read,
        });
    }

    let closing = match &report.end {
        SessionEnd::Stopped => "Session stopped".to_string(),
        SessionEnd::CameraFailed(e) => format!("Camera failed: {e}"),
        SessionEnd::FrameRejected(e) => format!("Frame rejected: {e}"),
    };
    publish.send_modify(|snapshot| snapshot.status = closing);
    report
}

/// Gallery for a new session, empty (with a warning) if the artifact is
/// missing or corrupt.
pub fn load_gallery(path: &Path) -> Arc<Gallery> {
    Arc::new(Gallery::load_or_empty(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Embedding, FaceRegion, GalleryEntry, LocatedFace};
    use rollcall_hw::Frame;
    use std::collections::VecDeque;

    /// Yields `count` blank frames, then times out.
    struct FakeCamera {
        remaining: usize,
        sequence: u32,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl FakeCamera {
        fn frames(count: usize) -> Self {
            Self {
                remaining: count,
                sequence: 0,
                stop_after: None,
            }
        }
    }

    impl FrameSource for FakeCamera {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::Timeout(Duration::from_millis(2000)));
            }
            self.remaining -= 1;
            self.sequence += 1;
            if let Some((n, flag)) = &self.stop_after {
                if self.sequence as usize >= *n {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            Ok(Frame::new(RgbImage::new(64, 48), self.sequence))
        }
    }

    /// Finds one face per frame, or replays scripted errors first.
    struct OneFace {
        errors: VecDeque<LocatorError>,
    }

    impl FaceLocator for OneFace {
        fn locate(&mut self, _frame: &RgbImage) -> Result<Vec<LocatedFace>, LocatorError> {
            if let Some(e) = self.errors.pop_front() {
                return Err(e);
            }
            Ok(vec![LocatedFace::new(FaceRegion::new(4, 20, 20, 4))])
        }
    }

    struct ConstEncoder(Vec<f32>);

    impl FaceEncoder for ConstEncoder {
        fn encode(&mut self, _frame: &RgbImage, _face: &LocatedFace) -> Result<Embedding, EncoderError> {
            Ok(Embedding::new(self.0.clone()))
        }
    }

    fn params() -> SessionParams {
        SessionParams {
            class_code: "C1".into(),
            class_name: "Algorithms".into(),
            meeting: 1,
        }
    }

    fn processor(embedding: Vec<f32>, errors: Vec<LocatorError>) -> FrameProcessor<OneFace, ConstEncoder> {
        let gallery = Gallery::from_entries(vec![GalleryEntry {
            identity_id: "S1".into(),
            display_name: "Ann".into(),
            embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
        }])
        .unwrap();
        let settings = RecognitionSettings {
            frame_skip: 1,
            ..RecognitionSettings::default()
        };
        FrameProcessor::new(
            OneFace {
                errors: errors.into(),
            },
            ConstEncoder(embedding),
            Arc::new(gallery),
            settings,
        )
        .unwrap()
    }

    fn run(
        camera: &mut FakeCamera,
        processor: &mut FrameProcessor<OneFace, ConstEncoder>,
        store: &AttendanceStore,
        stop: &AtomicBool,
    ) -> (SessionReport, watch::Receiver<Snapshot>) {
        let (tx, rx) = watch::channel(Snapshot::default());
        let report = run_session(
            Uuid::new_v4(),
            camera,
            processor,
            &Annotator::new(),
            store,
            &params(),
            stop,
            &tx,
        );
        (report, rx)
    }

    #[test]
    fn test_discard_warmup() {
        let mut camera = FakeCamera::frames(5);
        assert_eq!(discard_warmup(&mut camera, 3), Some(0.0));
        assert_eq!(camera.remaining, 2);

        assert_eq!(discard_warmup(&mut camera, 0), None);
        assert_eq!(camera.remaining, 2);

        // Read failures during warmup are not fatal.
        assert_eq!(discard_warmup(&mut camera, 4), Some(0.0));
        assert_eq!(camera.remaining, 0);
        assert_eq!(discard_warmup(&mut camera, 2), None);
    }

    #[test]
    fn test_known_face_recorded_once() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let mut camera = FakeCamera::frames(4);
        let mut processor = processor(vec![1.0, 0.0, 0.0], vec![]);

        let (report, rx) = run(&mut camera, &mut processor, &store, &AtomicBool::new(false));

        assert_eq!(report.frames_read, 4);
        assert_eq!(report.frames_processed, 4);
        assert_eq!(report.faces_seen, 4);
        assert_eq!(report.recorded, vec![("S1".to_string(), "Ann".to_string())]);
        assert!(matches!(report.end, SessionEnd::CameraFailed(_)));

        let records = store.records("C1", Some(1)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity_id, "S1");

        let snapshot = rx.borrow();
        assert!(snapshot.frame.is_some());
        assert_eq!(snapshot.frames_read, 4);
        assert!(snapshot.status.starts_with("Camera failed"));
    }

    #[test]
    fn test_second_session_reports_already_recorded() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.record_attendance("C1", "S1", "Ann", 1);

        let mut camera = FakeCamera::frames(2);
        let mut processor = processor(vec![1.0, 0.0, 0.0], vec![]);
        let (report, _rx) = run(&mut camera, &mut processor, &store, &AtomicBool::new(false));

        assert!(report.recorded.is_empty());
        assert_eq!(report.already_recorded, 1);
        assert_eq!(store.records("C1", None).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_face_never_recorded() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let mut camera = FakeCamera::frames(3);
        let mut processor = processor(vec![0.0, 0.0, 1.0], vec![]);
        let (report, _rx) = run(&mut camera, &mut processor, &store, &AtomicBool::new(false));

        assert_eq!(report.faces_seen, 3);
        assert!(report.recorded.is_empty());
        assert!(store.records("C1", None).unwrap().is_empty());
    }

    #[test]
    fn test_stop_flag_ends_session() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let mut camera = FakeCamera {
            remaining: 100,
            sequence: 0,
            stop_after: Some((3, Arc::clone(&stop))),
        };
        let mut processor = processor(vec![1.0, 0.0, 0.0], vec![]);
        let (report, rx) = run(&mut camera, &mut processor, &store, &stop);

        assert_eq!(report.frames_read, 3);
        assert_eq!(report.end, SessionEnd::Stopped);
        assert_eq!(rx.borrow().status, "Session stopped");
    }

    #[test]
    fn test_inference_error_skips_frame() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let mut camera = FakeCamera::frames(3);
        let mut processor = processor(
            vec![1.0, 0.0, 0.0],
            vec![LocatorError::InferenceFailed("transient".into())],
        );
        let (report, _rx) = run(&mut camera, &mut processor, &store, &AtomicBool::new(false));

        assert_eq!(report.frame_errors, 1);
        assert_eq!(report.frames_processed, 2);
        assert_eq!(report.recorded.len(), 1);
    }

    #[test]
    fn test_unreadable_frame_ends_session() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let mut camera = FakeCamera::frames(5);
        let mut processor = processor(
            vec![1.0, 0.0, 0.0],
            vec![LocatorError::UnreadableFrame("corrupt".into())],
        );
        let (report, _rx) = run(&mut camera, &mut processor, &store, &AtomicBool::new(false));

        assert_eq!(report.frames_read, 1);
        assert!(matches!(report.end, SessionEnd::FrameRejected(_)));
    }

    #[test]
    fn test_store_failure_does_not_stop_loop() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let mut camera = FakeCamera::frames(2);
        let mut processor = processor(vec![1.0, 0.0, 0.0], vec![]);
        let (tx, _rx) = watch::channel(Snapshot::default());
        let bad = SessionParams {
            class_code: "not valid".into(),
            ..params()
        };
        let report = run_session(
            Uuid::new_v4(),
            &mut camera,
            &mut processor,
            &Annotator::new(),
            &store,
            &bad,
            &AtomicBool::new(false),
            &tx,
        );

        assert_eq!(report.store_failures, 1);
        assert_eq!(report.frames_read, 2);
    }
}
