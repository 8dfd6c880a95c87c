//! Crop and downscale a live frame to the wire resolution.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::{Geometry, WireFormat};

/// Produces a `format.width() x format.height()` RGBA frame, or `None` when
/// the geometry is empty or narrower than the wire width.
pub fn sample_frame(frame: &RgbaImage, geometry: Geometry, format: WireFormat) -> Option<RgbaImage> {
    if geometry.is_empty() || frame.width() == 0 || frame.height() == 0 {
        return None;
    }

    let factor = geometry.width / format.width();
    if factor == 0 {
        return None;
    }

    // The live frame is drawn at capture size, like a video element sized to the geometry
    let scaled;
    let video = if frame.dimensions() == (geometry.width, geometry.height) {
        frame
    } else {
        scaled = imageops::resize(frame, geometry.width, geometry.height, FilterType::Triangle);
        &scaled
    };

    let canvas_w = format.width() * factor;
    let canvas_h = format.height() * factor;
    let shift_x = -(geometry.width as i64 - canvas_w as i64) / 2;
    let shift_y = -(geometry.height as i64 - canvas_h as i64) / 2;

    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([0, 0, 0, 0]));
    imageops::replace(&mut canvas, video, shift_x, shift_y);

    Some(box_downscale(&canvas, factor))
}

/// Averages each `factor x factor` block into one pixel.
fn box_downscale(canvas: &RgbaImage, factor: u32) -> RgbaImage {
    if factor == 1 {
        return canvas.clone();
    }

    let out_w = canvas.width() / factor;
    let out_h = canvas.height() / factor;
    let area = factor * factor;

    RgbaImage::from_fn(out_w, out_h, |x, y| {
        let mut sum = [0u32; 4];
        for dy in 0..factor {
            for dx in 0..factor {
                let px = canvas.get_pixel(x * factor + dx, y * factor + dy);
                for (acc, channel) in sum.iter_mut().zip(px.0) {
                    *acc += channel as u32;
                }
            }
        }
        Rgba(sum.map(|acc| (acc / area) as u8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_matches_wire_resolution() {
        let frame = RgbaImage::from_pixel(360, 270, Rgba([200, 100, 50, 255]));
        let geometry = Geometry { width: 360, height: 270 };

        for format in [WireFormat::Bgr24, WireFormat::Bgr555] {
            let out = sample_frame(&frame, geometry, format).unwrap();
            assert_eq!(out.dimensions(), (format.width(), format.height()));
            // Centre of the frame is fully covered by the source
            assert_eq!(out.get_pixel(88, 72).0, [200, 100, 50, 255]);
        }
    }

    #[test]
    fn test_short_source_leaves_bands_blank() {
        // 360x270 into a 352x288 canvas: 9 uncovered rows above and below
        let frame = RgbaImage::from_pixel(360, 270, Rgba([255, 255, 255, 255]));
        let geometry = Geometry { width: 360, height: 270 };
        let out = sample_frame(&frame, geometry, WireFormat::Bgr24).unwrap();

        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(0, 143).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(0, 5).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_crop_is_centred() {
        // Left half red, right half blue; the crop trims 4 columns each side
        let frame = RgbaImage::from_fn(360, 288, |x, _| {
            if x < 180 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let geometry = Geometry { width: 360, height: 288 };
        let out = sample_frame(&frame, geometry, WireFormat::Bgr24).unwrap();

        assert_eq!(out.get_pixel(87, 72).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(88, 72).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_large_source_is_scaled_to_geometry() {
        let frame = RgbaImage::from_pixel(1280, 960, Rgba([10, 20, 30, 255]));
        let geometry = Geometry::from_source(360, 1280, 960);
        let out = sample_frame(&frame, geometry, WireFormat::Bgr555).unwrap();
        assert_eq!(out.dimensions(), (174, 144));
    }

    #[test]
    fn test_empty_geometry_is_skipped() {
        let frame = RgbaImage::new(360, 270);
        assert!(sample_frame(&frame, Geometry { width: 360, height: 0 }, WireFormat::Bgr24).is_none());
        assert!(sample_frame(&frame, Geometry { width: 100, height: 75 }, WireFormat::Bgr24).is_none());
    }
}
