//! RGBA → wire pixel conversion.

use image::RgbImage;

use super::{CaptureError, WireFormat};

/// Fixed-size output buffer, refilled on every capture tick.
pub struct PixelBuffer {
    format: WireFormat,
    bytes: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            bytes: vec![0; format.frame_len()],
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Converts a full `width x height` RGBA frame into this buffer.
    pub fn fill_from_rgba(&mut self, rgba: &[u8]) -> Result<(), CaptureError> {
        let pixels = (self.format.width() * self.format.height()) as usize;
        if rgba.len() != pixels * 4 {
            return Err(CaptureError::FrameSize {
                expected: pixels * 4,
                actual: rgba.len(),
            });
        }

        match self.format {
            WireFormat::Bgr24 => {
                for (out, px) in self.bytes.chunks_exact_mut(3).zip(rgba.chunks_exact(4)) {
                    out[0] = px[2];
                    out[1] = px[1];
                    out[2] = px[0];
                }
            }
            WireFormat::Bgr555 => {
                for (out, px) in self.bytes.chunks_exact_mut(2).zip(rgba.chunks_exact(4)) {
                    out.copy_from_slice(&pack_bgr555(px[0], px[1], px[2]).to_le_bytes());
                }
            }
        }
        Ok(())
    }

    /// Copies the buffer out for a transport that takes ownership.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

pub fn pack_bgr555(r: u8, g: u8, b: u8) -> u16 {
    ((b as u16 >> 3) << 10) | ((g as u16 >> 3) << 5) | (r as u16 >> 3)
}

/// Expands a received wire frame back into RGB for inspection.
pub fn decode_frame(format: WireFormat, bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    if bytes.len() != format.frame_len() {
        return Err(CaptureError::FrameSize {
            expected: format.frame_len(),
            actual: bytes.len(),
        });
    }

    let mut rgb = Vec::with_capacity((format.width() * format.height() * 3) as usize);
    match format {
        WireFormat::Bgr24 => {
            for px in bytes.chunks_exact(3) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        WireFormat::Bgr555 => {
            for px in bytes.chunks_exact(2) {
                let word = u16::from_le_bytes([px[0], px[1]]);
                let expand = |v: u16| ((v & 0x1F) << 3) as u8;
                rgb.extend_from_slice(&[expand(word), expand(word >> 5), expand(word >> 10)]);
            }
        }
    }

    RgbImage::from_raw(format.width(), format.height(), rgb).ok_or(CaptureError::FrameSize {
        expected: format.frame_len(),
        actual: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_rgba(format: WireFormat, px: [u8; 4]) -> Vec<u8> {
        let pixels = (format.width() * format.height()) as usize;
        px.iter().copied().cycle().take(pixels * 4).collect()
    }

    #[test]
    fn test_bgr24_reorders_without_truncation() {
        let mut buffer = PixelBuffer::new(WireFormat::Bgr24);
        buffer
            .fill_from_rgba(&constant_rgba(WireFormat::Bgr24, [200, 100, 50, 255]))
            .unwrap();

        assert_eq!(buffer.as_bytes().len(), 176 * 144 * 3);
        for px in buffer.as_bytes().chunks_exact(3) {
            assert_eq!(px, &[50, 100, 200]);
        }
    }

    #[test]
    fn test_bgr555_packs_little_endian() {
        let mut buffer = PixelBuffer::new(WireFormat::Bgr555);
        buffer
            .fill_from_rgba(&constant_rgba(WireFormat::Bgr555, [200, 100, 50, 255]))
            .unwrap();

        let expected: u16 = (6 << 10) | (12 << 5) | 25;
        assert_eq!(buffer.as_bytes().len(), 174 * 144 * 2);
        for px in buffer.as_bytes().chunks_exact(2) {
            assert_eq!(px, &expected.to_le_bytes());
        }
    }

    #[test]
    fn test_bgr555_bit_layout() {
        assert_eq!(pack_bgr555(255, 0, 0), 0x001F);
        assert_eq!(pack_bgr555(0, 255, 0), 0x03E0);
        assert_eq!(pack_bgr555(0, 0, 255), 0x7C00);
        // Bit 15 is never set
        assert_eq!(pack_bgr555(255, 255, 255), 0x7FFF);
    }

    #[test]
    fn test_wrong_frame_size_is_rejected() {
        let mut buffer = PixelBuffer::new(WireFormat::Bgr24);
        let err = buffer.fill_from_rgba(&[0; 16]).unwrap_err();
        assert!(matches!(err, CaptureError::FrameSize { actual: 16, .. }));
    }

    #[test]
    fn test_decode_frame_recovers_colour() {
        let mut buffer = PixelBuffer::new(WireFormat::Bgr555);
        buffer
            .fill_from_rgba(&constant_rgba(WireFormat::Bgr555, [200, 100, 50, 255]))
            .unwrap();
        let image = decode_frame(WireFormat::Bgr555, buffer.as_bytes()).unwrap();
        assert_eq!(image.dimensions(), (174, 144));
        // 5-bit channels lose the low three bits
        assert_eq!(image.get_pixel(10, 10).0, [200, 96, 48]);

        assert!(decode_frame(WireFormat::Bgr24, &[0; 12]).is_err());
    }
}
