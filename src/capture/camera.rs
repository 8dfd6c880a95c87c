use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::source::{self, FrameSource, SourceSpec};
use super::{CaptureError, Geometry};

const READY_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Requested,
    Active(Geometry),
    Streaming(Geometry),
    /// Terminal; the source is never retried
    Unavailable(String),
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraState::Idle | CameraState::Requested => f.write_str("Camera Status : Waiting"),
            CameraState::Active(_) => f.write_str("Camera Status : Online"),
            CameraState::Streaming(_) => f.write_str("Camera Status : Stream Started"),
            CameraState::Unavailable(_) => f.write_str("Camera Status : Offline"),
        }
    }
}

/// A frame source plus the capture geometry fixed from its first frame.
pub struct Camera {
    state: CameraState,
    capture_width: u32,
    source: Option<Arc<dyn FrameSource>>,
}

impl Camera {
    pub fn new(capture_width: u32) -> Self {
        Self {
            state: CameraState::Idle,
            capture_width,
            source: None,
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn source(&self) -> Option<&Arc<dyn FrameSource>> {
        self.source.as_ref()
    }

    pub fn geometry(&self) -> Option<Geometry> {
        match self.state {
            CameraState::Active(geometry) | CameraState::Streaming(geometry) => Some(geometry),
            _ => None,
        }
    }

    /// Opens the source described by `spec`. Failure is terminal.
    pub fn request(&mut self, spec: &SourceSpec) -> Result<(), CaptureError> {
        self.request_with(|| source::open(spec))
    }

    pub fn request_with<F>(&mut self, open: F) -> Result<(), CaptureError>
    where
        F: FnOnce() -> Result<Arc<dyn FrameSource>, CaptureError>,
    {
        if self.state != CameraState::Idle {
            return Ok(());
        }
        self.state = CameraState::Requested;
        match open() {
            Ok(source) => {
                info!(source = source.name(), "camera requested");
                self.source = Some(source);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "camera unavailable");
                self.state = CameraState::Unavailable(e.to_string());
                Err(e)
            }
        }
    }

    /// Waits for the first frame and fixes the capture geometry.
    pub async fn wait_ready(&mut self) -> Result<Geometry, CaptureError> {
        if let Some(geometry) = self.geometry() {
            return Ok(geometry);
        }
        let source = match (&self.state, &self.source) {
            (CameraState::Requested, Some(source)) => source.clone(),
            _ => return Err(CaptureError::NotActive),
        };

        let frame = loop {
            if let Some(frame) = source.latest() {
                break frame;
            }
            if source.is_closed() {
                let reason = format!("{} stopped before its first frame", source.name());
                warn!(source = source.name(), "camera unavailable");
                self.state = CameraState::Unavailable(reason.clone());
                return Err(CaptureError::Unavailable(reason));
            }
            tokio::time::sleep(READY_POLL).await;
        };

        let geometry = Geometry::from_source(self.capture_width, frame.width(), frame.height());
        info!(
            src_w = frame.width(),
            src_h = frame.height(),
            width = geometry.width,
            height = geometry.height,
            "camera active"
        );
        self.state = CameraState::Active(geometry);
        Ok(geometry)
    }

    pub(crate) fn set_streaming(&mut self, streaming: bool) {
        self.state = match (&self.state, streaming) {
            (CameraState::Active(g), true) => CameraState::Streaming(*g),
            (CameraState::Streaming(g), false) => CameraState::Active(*g),
            (state, _) => state.clone(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::StillSource;
    use image::RgbaImage;

    fn still(width: u32, height: u32) -> Arc<dyn FrameSource> {
        Arc::new(StillSource::new("still", RgbaImage::new(width, height)))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut camera = Camera::new(360);
        assert_eq!(camera.state(), &CameraState::Idle);

        camera
            .request_with(|| Ok(still(640, 480)))
            .unwrap();
        assert_eq!(camera.state(), &CameraState::Requested);

        let geometry = camera.wait_ready().await.unwrap();
        assert_eq!(geometry, Geometry { width: 360, height: 270 });
        assert_eq!(camera.state(), &CameraState::Active(geometry));

        camera.set_streaming(true);
        assert_eq!(camera.state(), &CameraState::Streaming(geometry));
        camera.set_streaming(false);
        assert_eq!(camera.state(), &CameraState::Active(geometry));
    }

    #[tokio::test]
    async fn test_open_failure_is_terminal() {
        let mut camera = Camera::new(360);
        let err = camera
            .request_with(|| Err(CaptureError::Unavailable("permission denied".into())))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
        assert!(matches!(camera.state(), CameraState::Unavailable(_)));
        assert_eq!(camera.state().to_string(), "Camera Status : Offline");

        // Never retried
        camera
            .request_with(|| Ok(still(8, 8)))
            .unwrap();
        assert!(matches!(camera.state(), CameraState::Unavailable(_)));
        assert!(matches!(camera.wait_ready().await, Err(CaptureError::NotActive)));
    }

    /// A producer that died without ever delivering a frame.
    struct DeadSource;

    impl FrameSource for DeadSource {
        fn latest(&self) -> Option<Arc<image::RgbaImage>> {
            None
        }

        fn name(&self) -> &str {
            "dead"
        }

        fn is_closed(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_dead_source_becomes_unavailable() {
        let mut camera = Camera::new(360);
        camera
            .request_with(|| Ok(Arc::new(DeadSource) as Arc<dyn FrameSource>))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), camera.wait_ready())
            .await
            .expect("wait_ready must not hang on a dead source");
        assert!(matches!(result, Err(CaptureError::Unavailable(_))));
        assert!(matches!(camera.state(), CameraState::Unavailable(_)));
        assert_eq!(camera.state().to_string(), "Camera Status : Offline");
    }

    #[test]
    fn test_streaming_requires_active() {
        let mut camera = Camera::new(360);
        camera.set_streaming(true);
        assert_eq!(camera.state(), &CameraState::Idle);
    }
}
