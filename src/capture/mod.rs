//! Campho camera pipeline.
//!
//! A frame source is sampled every [`TICK_PERIOD`], centre-cropped to a whole
//! multiple of the wire resolution, box-downscaled and converted to the wire
//! pixel format of the selected protocol version.

pub mod camera;
pub mod convert;
pub mod sampler;
pub mod source;
pub mod stream;

use clap::ValueEnum;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Width the live frame is scaled to before cropping.
pub const DEFAULT_CAPTURE_WIDTH: u32 = 360;
/// Fixed capture period (5 frames per second, regardless of network speed).
pub const TICK_PERIOD: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("failed to load image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("unknown frame source {0:?} (expected screen, pattern or image:PATH)")]
    UnknownSource(String),

    #[error("capture width {capture} is smaller than the {format} wire width {target}")]
    CaptureTooNarrow {
        capture: u32,
        target: u32,
        format: WireFormat,
    },

    #[error("frame has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("camera is not active")]
    NotActive,
}

/// Pixel layout the peer expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// 176x144, three bytes per pixel in B, G, R order
    Bgr24,
    /// 174x144, little-endian u16 per pixel: bit 15 clear, then B:5 G:5 R:5
    Bgr555,
}

impl WireFormat {
    pub fn width(self) -> u32 {
        match self {
            WireFormat::Bgr24 => 176,
            WireFormat::Bgr555 => 174,
        }
    }

    pub fn height(self) -> u32 {
        144
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            WireFormat::Bgr24 => 3,
            WireFormat::Bgr555 => 2,
        }
    }

    pub fn frame_len(self) -> usize {
        (self.width() * self.height()) as usize * self.bytes_per_pixel()
    }

    /// Identifies a received buffer by its fixed length.
    pub fn from_frame_len(len: usize) -> Option<Self> {
        [WireFormat::Bgr24, WireFormat::Bgr555]
            .into_iter()
            .find(|format| format.frame_len() == len)
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Bgr24 => f.write_str("24-bit BGR"),
            WireFormat::Bgr555 => f.write_str("15-bit BGR555"),
        }
    }
}

/// Camera protocol revision. Each one fixes both pixel format and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    /// 176x144 24-bit frames as HTTP POST bodies
    Http24,
    /// 174x144 15-bit frames as WebSocket binary messages
    Ws15,
}

impl Protocol {
    pub fn wire_format(self) -> WireFormat {
        match self {
            Protocol::Http24 => WireFormat::Bgr24,
            Protocol::Ws15 => WireFormat::Bgr555,
        }
    }
}

/// Capture size fixed once the first frame arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    /// Keeps the source aspect ratio at `capture_width`; 4:3 when the ratio is undefined.
    pub fn from_source(capture_width: u32, src_width: u32, src_height: u32) -> Self {
        let mut height = src_height as f64 / (src_width as f64 / capture_width as f64);
        if !height.is_finite() {
            height = capture_width as f64 / (4.0 / 3.0);
        }
        Self {
            width: capture_width,
            height: height.floor() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Rejects capture widths that would give a zero downscale factor.
pub fn check_capture_width(capture_width: u32, format: WireFormat) -> Result<(), CaptureError> {
    if capture_width < format.width() {
        return Err(CaptureError::CaptureTooNarrow {
            capture: capture_width,
            target: format.width(),
            format,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lengths() {
        assert_eq!(WireFormat::Bgr24.frame_len(), 176 * 144 * 3);
        assert_eq!(WireFormat::Bgr555.frame_len(), 174 * 144 * 2);
        assert_eq!(WireFormat::from_frame_len(76_032), Some(WireFormat::Bgr24));
        assert_eq!(WireFormat::from_frame_len(50_112), Some(WireFormat::Bgr555));
        assert_eq!(WireFormat::from_frame_len(4), None);
    }

    #[test]
    fn test_geometry_keeps_aspect_ratio() {
        assert_eq!(
            Geometry::from_source(360, 640, 480),
            Geometry { width: 360, height: 270 }
        );
        assert_eq!(
            Geometry::from_source(360, 1920, 1080),
            Geometry { width: 360, height: 202 }
        );
    }

    #[test]
    fn test_geometry_falls_back_to_four_by_three() {
        assert_eq!(
            Geometry::from_source(360, 0, 0),
            Geometry { width: 360, height: 270 }
        );
        // A zero height is kept; ticks skip it
        assert!(Geometry::from_source(360, 640, 0).is_empty());
    }

    #[test]
    fn test_capture_width_check() {
        assert!(check_capture_width(360, WireFormat::Bgr24).is_ok());
        assert!(check_capture_width(174, WireFormat::Bgr555).is_ok());
        assert!(check_capture_width(175, WireFormat::Bgr24).is_err());
    }
}
