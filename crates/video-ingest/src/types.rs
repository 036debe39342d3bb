use anyhow::bail;
use opencv::{core::Mat, prelude::*};
use thiserror::Error;

/// Raw BGR frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl Frame {
    /// Rebuild the owning `Mat` for this frame's pixel data.
    pub fn bgr_mat(&self) -> anyhow::Result<Mat> {
        if self.format != FrameFormat::Bgr8 {
            bail!("unsupported frame format {:?}", self.format);
        }
        let expected = (self.width as usize) * (self.height as usize) * 3;
        if self.data.len() != expected {
            bail!(
                "frame buffer size mismatch: got {} bytes, expected {expected} for {}x{}",
                self.data.len(),
                self.width,
                self.height
            );
        }
        let flat = Mat::from_slice(&self.data)?;
        let shaped = flat.reshape(3, self.height)?;
        Ok(shaped.try_clone()?)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to read frame from video source: {reason}")]
    Read { reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    /// Whether the consumer can keep waiting for further frames.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Read { .. })
    }
}
