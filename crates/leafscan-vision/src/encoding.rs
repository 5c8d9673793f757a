//! JPEG encoding and image file IO.

use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};

use crate::error::{VisionError, VisionResult};

/// Default JPEG quality for streamed frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> VisionResult<Bytes> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(VisionError::encode("cannot encode an empty frame"));
    }

    let mut buffer = Vec::with_capacity((width * height) as usize / 4);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(image.as_raw(), width, height, ColorType::Rgb8)
        .map_err(|e| VisionError::encode(e.to_string()))?;

    Ok(Bytes::from(buffer))
}

/// Decode an in-memory image of any supported format into RGB.
pub fn decode_image(data: &[u8]) -> VisionResult<RgbImage> {
    let image = image::load_from_memory(data)?;
    Ok(image.to_rgb8())
}

/// Read an image file from disk into RGB.
pub fn load_image(path: impl AsRef<Path>) -> VisionResult<RgbImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(VisionError::FileNotFound(path.to_path_buf()));
    }
    let image = image::open(path)?;
    Ok(image.to_rgb8())
}

/// Write an RGB image; the format follows the file extension.
pub fn save_image(image: &RgbImage, path: impl AsRef<Path>) -> VisionResult<()> {
    image.save(path.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encode_produces_jpeg_markers() {
        let image = RgbImage::from_pixel(16, 8, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = decode_image(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_encode_empty_frame_fails() {
        assert!(encode_jpeg(&RgbImage::new(0, 0), 80).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_image(b"not an image").unwrap_err();
        assert!(matches!(err, VisionError::InvalidImage(_)));
    }

    #[test]
    fn test_save_and_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        save_image(&image, &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), image);
        assert!(load_image(dir.path().join("missing.png")).is_err());
    }
}
