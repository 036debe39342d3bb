//! OpenCV-backed camera capture thread.

use std::thread;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};

use crate::types::{CaptureError, Frame, FrameFormat};

// Read failures in a row before the device is declared gone.
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;

/// Counts read failures in a row and decides when the device is gone
/// rather than hiccuping.
struct FailureStreak {
    consecutive: u32,
}

impl FailureStreak {
    fn new() -> Self {
        Self { consecutive: 0 }
    }

    /// Record one failed read. Returns true once the streak reaches
    /// [`MAX_CONSECUTIVE_READ_FAILURES`].
    fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= MAX_CONSECUTIVE_READ_FAILURES
    }

    /// A delivered frame ends the streak.
    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Spawns a background thread that continually captures frames from `uri`.
///
/// Frames are resized to `target_size` (width, height) when the device
/// ignores the requested geometry. The channel holds a single frame, so the
/// capture loop blocks until the consumer has taken the previous one:
/// at most one frame is in flight.
///
/// Transient read failures are forwarded as `Err` items and capture
/// continues; after [`MAX_CONSECUTIVE_READ_FAILURES`] in a row the thread
/// gives up and the channel closes.
pub fn spawn_camera_reader(
    uri: &str,
    target_size: (i32, i32),
    fps: f64,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(1);
    let uri = uri.to_string();

    thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            if let Err(err) = capture_loop(&uri, target_size, fps, tx.clone()) {
                let _ = tx.send(Err(err));
            }
        })
        .context("failed to spawn capture thread")?;

    Ok(rx)
}

/// Main capture loop executed on the background thread.
fn capture_loop(
    uri: &str,
    target_size: (i32, i32),
    fps: f64,
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let mut cap = open_video_capture(uri)?;

    configure_camera(&mut cap, target_size, fps);

    let mut frame = Mat::default();
    let mut scratch = Mat::default();
    let (target_w, target_h) = target_size;
    let mut read_failures = FailureStreak::new();

    loop {
        let grabbed = match cap.read(&mut frame) {
            Ok(grabbed) => grabbed,
            Err(err) => {
                if read_failures.record_failure() {
                    return Err(CaptureError::Other(anyhow!(
                        "video source {uri} failed {} consecutive reads: {err}",
                        read_failures.consecutive
                    )));
                }
                if tx
                    .send(Err(CaptureError::Read {
                        reason: err.to_string(),
                    }))
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        if !grabbed {
            if read_failures.record_failure() {
                return Err(CaptureError::Other(anyhow!(
                    "video source {uri} returned no frame {} times in a row",
                    read_failures.consecutive
                )));
            }
            if tx
                .send(Err(CaptureError::Read {
                    reason: "device returned no frame".into(),
                }))
                .is_err()
            {
                break;
            }
            continue;
        }

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 {
            // devices deliver empty frames while warming up
            continue;
        }
        read_failures.reset();

        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &frame,
                &mut scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &scratch
        } else {
            &frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        let timestamp_ms = Utc::now().timestamp_millis();

        if tx
            .send(Ok(Frame {
                data,
                width: target_w,
                height: target_h,
                timestamp_ms,
                format: FrameFormat::Bgr8,
            }))
            .is_err()
        {
            break;
        }
    }

    Ok(())
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    eprintln!(
                        "video-ingest: failed to open device #{index} with backend {backend}: {err}"
                    );
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                eprintln!("video-ingest: failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (resolution, fps, preferred pixel format).
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    if let Ok(fourcc) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, fourcc as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_indices_parse_from_bare_numbers_and_dev_paths() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("3"), Some(3));
        assert_eq!(parse_device_index("/dev/video0"), Some(0));
        assert_eq!(parse_device_index("/dev/video12"), Some(12));
    }

    #[test]
    fn non_device_uris_do_not_parse() {
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://host/stream"), None);
        assert_eq!(parse_device_index("capture.mkv"), None);
    }

    #[test]
    fn read_failures_give_up_only_at_the_threshold() {
        let mut streak = FailureStreak::new();
        for _ in 1..MAX_CONSECUTIVE_READ_FAILURES {
            assert!(!streak.record_failure());
        }
        assert!(streak.record_failure());
    }

    #[test]
    fn a_delivered_frame_resets_the_streak() {
        let mut streak = FailureStreak::new();
        for _ in 1..MAX_CONSECUTIVE_READ_FAILURES {
            streak.record_failure();
        }
        streak.reset();

        for _ in 1..MAX_CONSECUTIVE_READ_FAILURES {
            assert!(!streak.record_failure());
        }
        assert!(streak.record_failure());
    }
}
