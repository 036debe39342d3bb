//! Live preview window for operating and tuning the sorter.

use anyhow::{Context, Result};
use detect_core::QualifyingRegion;
use opencv::{core, highgui, imgproc, prelude::*};
use tracing::warn;

const WINDOW_NAME: &str = "brick-sorter";
const KEY_ESC: i32 = 27;
const KEY_Q: i32 = 113;

/// What the operator asked for via the preview window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PreviewEvent {
    Continue,
    CloseRequested,
}

/// Sink for annotated frames. The pipeline drives exactly one of these
/// per run and honours `CloseRequested` like a Ctrl+C.
pub(crate) trait PreviewSink {
    fn present(&mut self, frame: &Mat, region: Option<&QualifyingRegion>) -> Result<PreviewEvent>;
    fn close(&mut self);
}

/// OpenCV highgui window. Also pumps the GUI event loop, so `present`
/// must be called from the pipeline thread every iteration.
pub(crate) struct WindowPreview;

impl WindowPreview {
    pub(crate) fn open() -> Result<Self> {
        highgui::named_window(WINDOW_NAME, highgui::WINDOW_AUTOSIZE)
            .context("Failed to open preview window")?;
        Ok(Self)
    }
}

impl PreviewSink for WindowPreview {
    fn present(&mut self, frame: &Mat, region: Option<&QualifyingRegion>) -> Result<PreviewEvent> {
        let mut canvas = frame.try_clone()?;
        if let Some(region) = region {
            let green = core::Scalar::new(0.0, 255.0, 0.0, 0.0);
            let center = core::Point::new(
                region.center.0.round() as i32,
                region.center.1.round() as i32,
            );
            imgproc::circle(
                &mut canvas,
                center,
                region.radius.round() as i32,
                green,
                2,
                imgproc::LINE_8,
                0,
            )?;
            imgproc::put_text(
                &mut canvas,
                &format!("TARGET r={:.1}px", region.radius),
                core::Point::new(20, 30),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.8,
                green,
                2,
                imgproc::LINE_8,
                false,
            )?;
        }
        highgui::imshow(WINDOW_NAME, &canvas)?;

        // wait_key also services the window's event queue.
        let key = highgui::wait_key(5)? & 0xff;
        if key == KEY_ESC || key == KEY_Q {
            return Ok(PreviewEvent::CloseRequested);
        }
        Ok(PreviewEvent::Continue)
    }

    fn close(&mut self) {
        if let Err(err) = highgui::destroy_all_windows() {
            warn!("Failed to close preview window: {err}");
        }
    }
}

/// Headless runs go through the same seam without touching highgui.
pub(crate) struct NullPreview;

impl PreviewSink for NullPreview {
    fn present(&mut self, _frame: &Mat, _region: Option<&QualifyingRegion>) -> Result<PreviewEvent> {
        Ok(PreviewEvent::Continue)
    }

    fn close(&mut self) {}
}
