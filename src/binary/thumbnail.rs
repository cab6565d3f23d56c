use image::codecs::jpeg::JpegEncoder;

use crate::error::{Error, Result};

/// Scale an image into a `max_side` square box and re-encode it as JPEG.
///
/// Aspect ratio is preserved and images already inside the box are not
/// upscaled.
pub fn make_thumbnail(data: &[u8], max_side: u32, quality: u8) -> Result<Vec<u8>> {
  let img = image::load_from_memory(data)
    .map_err(|e| Error::Encoding(format!("Failed to decode image: {}", e)))?;

  let img = if img.width() > max_side || img.height() > max_side {
    img.thumbnail(max_side, max_side)
  } else {
    img
  };

  // JPEG has no alpha channel
  let rgb = img.to_rgb8();
  let mut buf = Vec::new();
  JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
    .encode_image(&rgb)
    .map_err(|e| Error::Encoding(format!("Failed to encode thumbnail: {}", e)))?;

  Ok(buf)
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
  let img = image::RgbImage::from_fn(width, height, |x, y| {
    image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
  });
  let mut buf = std::io::Cursor::new(Vec::new());
  image::DynamicImage::ImageRgb8(img)
    .write_to(&mut buf, image::ImageFormat::Png)
    .unwrap();
  buf.into_inner()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_thumbnail_fits_box_and_keeps_aspect() {
    let thumb = make_thumbnail(&sample_png(800, 400), 320, 70).unwrap();
    let decoded = image::load_from_memory(&thumb).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (320, 160));
  }

  #[test]
  fn test_small_image_is_not_upscaled() {
    let thumb = make_thumbnail(&sample_png(100, 50), 320, 70).unwrap();
    let decoded = image::load_from_memory(&thumb).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 50));
  }

  #[test]
  fn test_garbage_is_an_error() {
    assert!(make_thumbnail(b"not an image", 320, 70).is_err());
  }
}
