//! The sorter's frame loop.
//!
//! Each iteration segments the newest frame against the active colour
//! range and scans the mask for a qualifying region. When one is found
//! the actuator fires before anything else happens. The loop owns
//! teardown: whatever ends a run, the servo is parked and released
//! before the preview closes.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use detect_core::{ActiveRange, HsvRange, qualify, segment};
use servo_pwm::{Actuator, NoopActuator, PwmServo, SysfsPwm};
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureError, Frame, spawn_camera_reader};

use crate::sorter::{
    SorterConfig,
    preview::{NullPreview, PreviewEvent, PreviewSink, WindowPreview},
    remote::ConfigClient,
    sync::spawn_config_sync,
    telemetry,
};

// How long one wait for a frame may take before the stop flag is
// re-checked.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);
// Pause after each processed frame; keeps the belt camera loop from
// starving the config sync thread on single-core rigs.
const ITERATION_YIELD: Duration = Duration::from_millis(50);
const HEARTBEAT_FRAMES: u64 = 30;

/// Run the sorter until Ctrl+C, a preview close, or a fatal fault.
pub fn run(config: SorterConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::enter_runtime();
    let _ = telemetry::init_metrics_recorder();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let pipeline_span = tracing::info_span!(
        "sorter.pipeline",
        source = %config.camera_uri,
        width = config.width,
        height = config.height,
        fps = config.fps,
        color = config.startup_color.tag()
    );
    let _pipeline_span_guard = pipeline_span.enter();

    let active = Arc::new(ActiveRange::new(config.startup_color.hsv_range()));

    let _sync_handle = match &config.remote {
        Some(options) => {
            let client = ConfigClient::new(options)?;
            Some(
                spawn_config_sync(
                    client,
                    config.startup_color,
                    active.clone(),
                    shutdown.clone(),
                )
                .context("Failed to start config sync thread")?,
            )
        }
        None => {
            warn!(
                "No config store URL given; sorting {} until restart",
                config.startup_color.name()
            );
            None
        }
    };

    let receiver = spawn_camera_reader(
        &config.camera_uri,
        (config.width, config.height),
        config.fps,
    )
    .context("Failed to start capture")?;

    let mut actuator: Box<dyn Actuator> = if config.no_actuator {
        info!("Actuator disabled; detections will only be logged");
        Box::new(NoopActuator)
    } else {
        let pin = SysfsPwm::open(config.pwm_chip, config.pwm_channel)
            .context("Failed to open PWM channel")?;
        Box::new(PwmServo::new(pin).context("Failed to initialise servo")?)
    };

    let mut preview: Box<dyn PreviewSink> = if config.preview {
        Box::new(WindowPreview::open()?)
    } else {
        Box::new(NullPreview)
    };

    info!(
        "Sorting {} objects from {}; press Ctrl+C to stop",
        config.startup_color.name(),
        config.camera_uri
    );

    match execute(
        receiver,
        &active,
        &shutdown,
        actuator.as_mut(),
        preview.as_mut(),
    ) {
        LoopExit::Interrupted => {
            info!("Sorter stopped");
            Ok(())
        }
        LoopExit::SourceClosed => bail!("Frame source terminated unexpectedly"),
        LoopExit::ActuatorFault(err) => Err(err.context("Actuator fault; stopping")),
    }
}

/// Why the frame loop ended.
#[derive(Debug)]
enum LoopExit {
    /// Ctrl+C or a preview close request.
    Interrupted,
    /// The capture side shut down and no more frames can arrive.
    SourceClosed,
    /// The servo failed mid-motion and its position is unknown.
    ActuatorFault(anyhow::Error),
}

/// Runs the frame loop and then tears the rig down. Teardown is
/// unconditional so the arm never stays powered in an unknown position.
fn execute(
    receiver: Receiver<Result<Frame, CaptureError>>,
    active: &ActiveRange,
    shutdown: &AtomicBool,
    actuator: &mut dyn Actuator,
    preview: &mut dyn PreviewSink,
) -> LoopExit {
    let exit = run_loop(&receiver, active, shutdown, actuator, preview);
    shutdown.store(true, Ordering::SeqCst);
    teardown(actuator, preview);
    exit
}

fn run_loop(
    receiver: &Receiver<Result<Frame, CaptureError>>,
    active: &ActiveRange,
    shutdown: &AtomicBool,
    actuator: &mut dyn Actuator,
    preview: &mut dyn PreviewSink,
) -> LoopExit {
    let mut frame_number: u64 = 0;
    let mut smoothed_fps: f32 = 0.0;
    let mut last_instant = Instant::now();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return LoopExit::Interrupted;
        }

        let message = match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return LoopExit::SourceClosed,
        };

        let frame = match message {
            Ok(frame) => frame,
            Err(err) if err.is_transient() => {
                warn!("Capture error (skipping frame): {err}");
                metrics::counter!("sorter_capture_errors_total").increment(1);
                continue;
            }
            Err(err) => {
                error!("Capture failed: {err}");
                return LoopExit::SourceClosed;
            }
        };

        frame_number = frame_number.wrapping_add(1);
        metrics::counter!("sorter_frames_total").increment(1);

        let now = Instant::now();
        let elapsed = now.duration_since(last_instant).as_secs_f32();
        last_instant = now;
        if elapsed > 0.0 {
            let instant = 1.0 / elapsed;
            smoothed_fps = if smoothed_fps == 0.0 {
                instant
            } else {
                0.9 * smoothed_fps + 0.1 * instant
            };
        }
        metrics::gauge!("sorter_pipeline_fps").set(smoothed_fps as f64);

        if frame_number % HEARTBEAT_FRAMES == 0 {
            debug!(
                "Capture heartbeat: frame #{}, {:.1} fps, ts={}",
                frame_number, smoothed_fps, frame.timestamp_ms
            );
        }

        let frame_span = tracing::info_span!(
            "frame",
            frame = frame_number,
            width = frame.width,
            height = frame.height,
            timestamp = frame.timestamp_ms
        );
        let _frame_guard = frame_span.enter();

        // One snapshot per frame; the sync thread may republish at any time.
        let range = active.snapshot();

        match process_frame(&frame, range, actuator, preview) {
            Ok(PreviewEvent::Continue) => {}
            Ok(PreviewEvent::CloseRequested) => {
                info!("Preview window closed; stopping");
                return LoopExit::Interrupted;
            }
            Err(FrameError::Recoverable(err)) => {
                warn!("Frame #{frame_number} skipped: {err:?}");
                metrics::counter!("sorter_iteration_errors_total").increment(1);
            }
            Err(FrameError::Actuator(err)) => {
                return LoopExit::ActuatorFault(err);
            }
        }

        thread::sleep(ITERATION_YIELD);
    }
}

/// How a single frame can fail.
enum FrameError {
    /// The frame is dropped and the loop keeps running.
    Recoverable(anyhow::Error),
    /// Servo state is unknown; the run must stop.
    Actuator(anyhow::Error),
}

fn process_frame(
    frame: &Frame,
    range: HsvRange,
    actuator: &mut dyn Actuator,
    preview: &mut dyn PreviewSink,
) -> Result<PreviewEvent, FrameError> {
    let image = frame.bgr_mat().map_err(FrameError::Recoverable)?;

    let stage_start = Instant::now();
    let mask = segment(&image, range)
        .context("Segmentation failed")
        .map_err(FrameError::Recoverable)?;
    metrics::histogram!("sorter_stage_seconds", "stage" => "segment")
        .record(stage_start.elapsed().as_secs_f64());

    let stage_start = Instant::now();
    let region = qualify(&mask)
        .context("Contour scan failed")
        .map_err(FrameError::Recoverable)?;
    metrics::histogram!("sorter_stage_seconds", "stage" => "qualify")
        .record(stage_start.elapsed().as_secs_f64());

    if let Some(region) = region {
        info!(
            "Detected object at ({:.0}, {:.0}), r={:.1}px",
            region.center.0, region.center.1, region.radius
        );
        metrics::counter!("sorter_detections_total").increment(1);

        let stage_start = Instant::now();
        actuator
            .trigger()
            .context("Servo trigger failed")
            .map_err(FrameError::Actuator)?;
        metrics::histogram!("sorter_stage_seconds", "stage" => "actuate")
            .record(stage_start.elapsed().as_secs_f64());
        metrics::counter!("sorter_actuations_total").increment(1);
    }

    preview
        .present(&image, region.as_ref())
        .map_err(FrameError::Recoverable)
}

/// Teardown order matches the hardware: park the arm, stop driving the
/// PWM line, then close the preview.
fn teardown(actuator: &mut dyn Actuator, preview: &mut dyn PreviewSink) {
    if let Err(err) = actuator.rest() {
        warn!("Failed to park actuator: {err}");
    }
    if let Err(err) = actuator.release() {
        warn!("Failed to release actuator: {err}");
    }
    preview.close();
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crossbeam_channel::unbounded;
    use detect_core::{ColorClass, QualifyingRegion};
    use opencv::{
        core::{self, Mat},
        imgproc,
        prelude::*,
    };
    use servo_pwm::ServoError;
    use video_ingest::FrameFormat;

    use super::*;

    type EventLog = Arc<Mutex<Vec<&'static str>>>;

    fn new_log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    struct MockActuator {
        events: EventLog,
        fail_trigger: bool,
    }

    fn actuator(events: &EventLog) -> MockActuator {
        MockActuator {
            events: events.clone(),
            fail_trigger: false,
        }
    }

    impl Actuator for MockActuator {
        fn trigger(&mut self) -> Result<(), ServoError> {
            self.events.lock().unwrap().push("trigger");
            if self.fail_trigger {
                return Err(ServoError::Write {
                    path: "/sys/class/pwm/pwmchip0/pwm0/duty_cycle".into(),
                    value: "400000".into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(())
        }

        fn rest(&mut self) -> Result<(), ServoError> {
            self.events.lock().unwrap().push("rest");
            Ok(())
        }

        fn release(&mut self) -> Result<(), ServoError> {
            self.events.lock().unwrap().push("release");
            Ok(())
        }
    }

    struct MockPreview {
        events: EventLog,
        presented: Arc<Mutex<Vec<Option<QualifyingRegion>>>>,
        close_after: Option<usize>,
    }

    fn preview(events: &EventLog) -> MockPreview {
        MockPreview {
            events: events.clone(),
            presented: Arc::new(Mutex::new(Vec::new())),
            close_after: None,
        }
    }

    impl PreviewSink for MockPreview {
        fn present(
            &mut self,
            _frame: &Mat,
            region: Option<&QualifyingRegion>,
        ) -> Result<PreviewEvent> {
            self.events.lock().unwrap().push("present");
            let mut presented = self.presented.lock().unwrap();
            presented.push(region.copied());
            if let Some(limit) = self.close_after {
                if presented.len() >= limit {
                    return Ok(PreviewEvent::CloseRequested);
                }
            }
            Ok(PreviewEvent::Continue)
        }

        fn close(&mut self) {
            self.events.lock().unwrap().push("close");
        }
    }

    fn frame_from_bgr(bgr: &Mat) -> Frame {
        Frame {
            data: bgr.data_bytes().unwrap().to_vec(),
            width: bgr.cols(),
            height: bgr.rows(),
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    // 160x120 black frame with one red disc of the given radius at (80, 60).
    fn blob_frame(radius: i32) -> Frame {
        let mut hsv = Mat::new_rows_cols_with_default(
            120,
            160,
            core::CV_8UC3,
            core::Scalar::new(0.0, 0.0, 0.0, 0.0),
        )
        .unwrap();
        imgproc::circle(
            &mut hsv,
            core::Point::new(80, 60),
            radius,
            core::Scalar::new(130.0, 220.0, 200.0, 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        let mut bgr = Mat::default();
        imgproc::cvt_color(&hsv, &mut bgr, imgproc::COLOR_HSV2BGR, 0).unwrap();
        frame_from_bgr(&bgr)
    }

    fn red_range() -> ActiveRange {
        ActiveRange::new(ColorClass::Red.hsv_range())
    }

    #[test]
    fn qualifying_object_triggers_the_actuator() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Ok(blob_frame(30))).unwrap();
        drop(tx);

        let exit = execute(
            rx,
            &red_range(),
            &AtomicBool::new(false),
            &mut actuator(&events),
            &mut preview(&events),
        );

        assert!(matches!(exit, LoopExit::SourceClosed));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["trigger", "present", "rest", "release", "close"]
        );
    }

    #[test]
    fn undersized_objects_do_not_trigger() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Ok(blob_frame(4))).unwrap();
        drop(tx);

        let exit = execute(
            rx,
            &red_range(),
            &AtomicBool::new(false),
            &mut actuator(&events),
            &mut preview(&events),
        );

        assert!(matches!(exit, LoopExit::SourceClosed));
        assert!(!events.lock().unwrap().contains(&"trigger"));
    }

    #[test]
    fn objects_of_another_colour_do_not_trigger() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Ok(blob_frame(30))).unwrap();
        drop(tx);

        let mut sink = preview(&events);
        let exit = execute(
            rx,
            &ActiveRange::new(ColorClass::Blue.hsv_range()),
            &AtomicBool::new(false),
            &mut actuator(&events),
            &mut sink,
        );

        assert!(matches!(exit, LoopExit::SourceClosed));
        assert!(!events.lock().unwrap().contains(&"trigger"));
        assert_eq!(sink.presented.lock().unwrap().as_slice(), &[None]);
    }

    #[test]
    fn detection_region_reaches_the_preview() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Ok(blob_frame(30))).unwrap();
        drop(tx);

        let mut sink = preview(&events);
        execute(
            rx,
            &red_range(),
            &AtomicBool::new(false),
            &mut actuator(&events),
            &mut sink,
        );

        let presented = sink.presented.lock().unwrap();
        let region = presented[0].expect("qualifying region");
        assert!((region.center.0 - 80.0).abs() < 3.0);
        assert!((region.center.1 - 60.0).abs() < 3.0);
        assert!(region.radius > 24.0 && region.radius < 36.0);
    }

    #[test]
    fn transient_capture_errors_are_skipped() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Err(CaptureError::Read {
            reason: "device busy".into(),
        }))
        .unwrap();
        tx.send(Ok(blob_frame(30))).unwrap();
        drop(tx);

        let exit = execute(
            rx,
            &red_range(),
            &AtomicBool::new(false),
            &mut actuator(&events),
            &mut preview(&events),
        );

        assert!(matches!(exit, LoopExit::SourceClosed));
        let events = events.lock().unwrap();
        assert_eq!(
            events.iter().filter(|&&event| event == "trigger").count(),
            1
        );
    }

    #[test]
    fn shutdown_flag_stops_the_loop_before_capture() {
        let events = new_log();
        let (tx, rx) = unbounded();

        let exit = execute(
            rx,
            &red_range(),
            &AtomicBool::new(true),
            &mut actuator(&events),
            &mut preview(&events),
        );
        drop(tx);

        assert!(matches!(exit, LoopExit::Interrupted));
        assert_eq!(*events.lock().unwrap(), vec!["rest", "release", "close"]);
    }

    #[test]
    fn actuator_fault_ends_the_run_after_teardown() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Ok(blob_frame(30))).unwrap();

        let mut failing = actuator(&events);
        failing.fail_trigger = true;
        let exit = execute(
            rx,
            &red_range(),
            &AtomicBool::new(false),
            &mut failing,
            &mut preview(&events),
        );
        drop(tx);

        assert!(matches!(exit, LoopExit::ActuatorFault(_)));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["trigger", "rest", "release", "close"]
        );
    }

    #[test]
    fn preview_close_request_interrupts_the_run() {
        let events = new_log();
        let (tx, rx) = unbounded();
        tx.send(Ok(blob_frame(30))).unwrap();

        let mut sink = preview(&events);
        sink.close_after = Some(1);
        let exit = execute(
            rx,
            &red_range(),
            &AtomicBool::new(false),
            &mut actuator(&events),
            &mut sink,
        );
        drop(tx);

        assert!(matches!(exit, LoopExit::Interrupted));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["trigger", "present", "rest", "release", "close"]
        );
    }
}
