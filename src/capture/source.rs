//! Live frame sources standing in for a camera.
//!
//! A source behaves like a playing video element: at any moment it can hand
//! out its most recent frame, and the capture ticks sample it at their own pace.

use image::{Rgba, RgbaImage};
use scrap::{Capturer, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::CaptureError;

/// Screen frames wider than this are downscaled on the capture thread.
const SCREEN_MAX_WIDTH: u32 = 640;
const SCREEN_FPS: u64 = 10;

pub trait FrameSource: Send + Sync {
    /// Most recent frame, or `None` until the first one is available.
    fn latest(&self) -> Option<Arc<RgbaImage>>;

    fn name(&self) -> &str;

    /// True once the producer is gone and no frame will ever arrive.
    fn is_closed(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Screen,
    Pattern,
    Image(PathBuf),
}

impl FromStr for SourceSpec {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screen" => Ok(SourceSpec::Screen),
            "pattern" => Ok(SourceSpec::Pattern),
            _ => match s.strip_prefix("image:") {
                Some(path) if !path.is_empty() => Ok(SourceSpec::Image(PathBuf::from(path))),
                _ => Err(CaptureError::UnknownSource(s.to_string())),
            },
        }
    }
}

pub fn open(spec: &SourceSpec) -> Result<Arc<dyn FrameSource>, CaptureError> {
    let source: Arc<dyn FrameSource> = match spec {
        SourceSpec::Screen => Arc::new(ScreenSource::start()?),
        SourceSpec::Pattern => Arc::new(PatternSource::new(640, 480)),
        SourceSpec::Image(path) => Arc::new(StillSource::open(path)?),
    };
    Ok(source)
}

/// A single image served as every frame.
pub struct StillSource {
    name: String,
    frame: Arc<RgbaImage>,
}

impl StillSource {
    pub fn new(name: impl Into<String>, frame: RgbaImage) -> Self {
        Self {
            name: name.into(),
            frame: Arc::new(frame),
        }
    }

    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let img = image::open(path).map_err(|source| CaptureError::Image {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(path.display().to_string(), img.to_rgba8()))
    }
}

impl FrameSource for StillSource {
    fn latest(&self) -> Option<Arc<RgbaImage>> {
        Some(self.frame.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Colour bars that scroll one step per sampled frame.
pub struct PatternSource {
    width: u32,
    height: u32,
    step: AtomicU32,
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            step: AtomicU32::new(0),
        }
    }
}

impl FrameSource for PatternSource {
    fn latest(&self) -> Option<Arc<RgbaImage>> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let step = self.step.fetch_add(1, Ordering::Relaxed);
        let bar_w = (self.width / BARS.len() as u32).max(1);
        let frame = RgbaImage::from_fn(self.width, self.height, |x, _| {
            let bar = (x.wrapping_add(step.wrapping_mul(4)) / bar_w) as usize % BARS.len();
            let [r, g, b] = BARS[bar];
            Rgba([r, g, b, 255])
        });
        Some(Arc::new(frame))
    }

    fn name(&self) -> &str {
        "test pattern"
    }
}

/// Primary display captured on a dedicated thread.
pub struct ScreenSource {
    running: Arc<AtomicBool>,
    frame_rx: watch::Receiver<Option<Arc<RgbaImage>>>,
}

impl ScreenSource {
    pub fn start() -> Result<Self, CaptureError> {
        // Open the display before spawning so a missing display is reported synchronously
        let display = Display::primary()
            .map_err(|e| CaptureError::Unavailable(format!("no display found: {}", e)))?;
        drop(display); // Capturer is not Send on X11

        let running = Arc::new(AtomicBool::new(true));
        let (frame_tx, frame_rx) = watch::channel(None);

        let running_clone = running.clone();
        std::thread::spawn(move || {
            let display = match Display::primary() {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "screen capture: no display");
                    return;
                }
            };
            let w = display.width();
            let h = display.height();
            let capturer = match Capturer::new(display) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "screen capture: failed to start");
                    return;
                }
            };
            screen_loop(capturer, w, h, frame_tx, running_clone);
        });

        Ok(Self { running, frame_rx })
    }
}

impl FrameSource for ScreenSource {
    fn latest(&self) -> Option<Arc<RgbaImage>> {
        self.frame_rx.borrow().clone()
    }

    fn name(&self) -> &str {
        "primary display"
    }

    fn is_closed(&self) -> bool {
        self.frame_rx.has_changed().is_err()
    }
}

impl Drop for ScreenSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn screen_loop(
    mut capturer: Capturer,
    src_w: usize,
    src_h: usize,
    tx: watch::Sender<Option<Arc<RgbaImage>>>,
    running: Arc<AtomicBool>,
) {
    let frame_interval = Duration::from_millis(1000 / SCREEN_FPS);
    let (out_w, out_h) = if src_w as u32 > SCREEN_MAX_WIDTH {
        let scale = SCREEN_MAX_WIDTH as f64 / src_w as f64;
        (SCREEN_MAX_WIDTH, (src_h as f64 * scale) as u32)
    } else {
        (src_w as u32, src_h as u32)
    };
    debug!(src_w, src_h, out_w, out_h, "screen capture started");

    while running.load(Ordering::Relaxed) && !tx.is_closed() {
        let frame_start = Instant::now();

        match capturer.frame() {
            Ok(frame) => {
                // scrap hands out BGRA rows, possibly padded
                let stride = frame.len() / src_h.max(1);
                let rgba = bgra_to_rgba_scaled(&frame, src_w, src_h, stride, out_w, out_h);
                if let Some(image) = RgbaImage::from_raw(out_w, out_h, rgba) {
                    tx.send_replace(Some(Arc::new(image)));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(e) => {
                debug!(error = %e, "screen capture error, retrying");
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }
    debug!("screen capture stopped");
}

/// Nearest-neighbour BGRA → RGBA with optional downscale.
fn bgra_to_rgba_scaled(
    bgra: &[u8],
    src_w: usize,
    src_h: usize,
    stride: usize,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((dst_w * dst_h * 4) as usize);

    for y in 0..dst_h {
        let src_y = (y as usize * src_h) / dst_h as usize;
        for x in 0..dst_w {
            let src_x = (x as usize * src_w) / dst_w as usize;
            let offset = src_y * stride + src_x * 4;
            if offset + 2 < bgra.len() {
                rgba.extend_from_slice(&[bgra[offset + 2], bgra[offset + 1], bgra[offset], 255]);
            } else {
                rgba.extend_from_slice(&[0, 0, 0, 255]);
            }
        }
    }

    rgba
}
