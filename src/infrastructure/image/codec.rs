//! Image decoding and PNG re-encoding on the blocking pool.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};

use crate::domain::errors::{CacheError, CacheResult};

/// Decodes bytes in any supported format.
///
/// # Errors
/// Returns [`CacheError::Decode`] if the bytes are not a supported image.
pub async fn decode(bytes: Bytes) -> CacheResult<DynamicImage> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| CacheError::internal(format!("decode task panicked: {e}")))?
        .map_err(|e| CacheError::decode(e.to_string()))
}

/// Encodes an image as PNG.
///
/// # Errors
/// Returns [`CacheError::StorageWrite`] if encoding fails.
pub async fn encode_png(image: Arc<DynamicImage>) -> CacheResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png_blocking(&image))
        .await
        .map_err(|e| CacheError::internal(format!("encode task panicked: {e}")))?
        .map_err(|e| CacheError::storage_write(format!("failed to encode png: {e}")))
}

/// PNG has no float sample types, so those are narrowed to 8-bit RGBA first.
pub fn encode_png_blocking(image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buf, ImageFormat::Png)?;
        }
        _ => image.write_to(&mut buf, ImageFormat::Png)?,
    }
    Ok(buf.into_inner())
}


#[cfg(test)]
mod tests {
    use super::fixtures::{encoded, sample_image};
    use super::*;
    use crate::domain::errors::CacheErrorKind;

    #[tokio::test]
    async fn test_png_round_trip_is_pixel_identical() {
        let original = sample_image(8, 6);
        let png = encode_png(Arc::new(original.clone())).await.unwrap();
        let decoded = decode(Bytes::from(png)).await.unwrap();

        assert_eq!(decoded.to_rgb8(), original.to_rgb8());
    }

    #[tokio::test]
    async fn test_other_formats_are_re_encoded_as_png() {
        let original = sample_image(4, 4);
        let jpeg = encoded(&original, ImageFormat::Jpeg);
        let decoded = decode(Bytes::from(jpeg)).await.unwrap();

        let png = encode_png(Arc::new(decoded)).await.unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
    }

    #[tokio::test]
    async fn test_decode_garbage_fails() {
        let err = decode(Bytes::from_static(b"<html>not an image</html>"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CacheErrorKind::Decode);
    }

    #[test]
    fn test_float_images_are_encodable() {
        let img = DynamicImage::ImageRgba32F(image::Rgba32FImage::new(2, 2));
        let png = encode_png_blocking(&img).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
    }
}
