//! Image decoding, resizing and transport encoding.
//!
//! Every image entering the classifier is an `S x S` RGB raster. The display
//! copy keeps byte values; the inference copy is the same pixels as `f32` in
//! an NHWC batch of one, with no mean subtraction or scaling.

use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, RgbImage, imageops::FilterType};
use ndarray::Array4;
use std::io::Cursor;
use tracing::debug;

/// Interpolation used for every resize in the pipeline, including the saliency
/// map upscale, so that map and display image line up.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Batch-of-one NHWC float tensor fed to the classifier.
pub type InferenceTensor = Array4<f32>;

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub display: RgbImage,
    pub tensor: InferenceTensor,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    size: u32,
}

impl ImageNormalizer {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Decode raw bytes and produce the display and inference copies.
    pub fn normalize(&self, raw_bytes: &[u8]) -> Result<NormalizedImage> {
        let decoded = decode(raw_bytes)?;
        debug!(
            "Decoded image {}x{} ({:?})",
            decoded.width(),
            decoded.height(),
            decoded.color()
        );

        // to_rgb8 reorders/expands whatever the decoder produced (gray, RGBA, 16-bit) to RGB8.
        let rgb = decoded.to_rgb8();
        let display = image::imageops::resize(&rgb, self.size, self.size, RESIZE_FILTER);
        let tensor = to_tensor(&display)?;

        Ok(NormalizedImage { display, tensor })
    }
}

fn decode(raw_bytes: &[u8]) -> Result<DynamicImage> {
    if raw_bytes.is_empty() {
        return Err(Error::decode("image payload is empty"));
    }
    image::load_from_memory(raw_bytes).map_err(|e| Error::decode(e.to_string()))
}

/// Convert an RGB raster into a `[1, H, W, 3]` float tensor.
pub fn to_tensor(image: &RgbImage) -> Result<InferenceTensor> {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image.as_raw().iter().map(|&v| f32::from(v)).collect();
    let tensor = Array4::from_shape_vec((1, height as usize, width as usize, 3), data)?;
    Ok(tensor)
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// PNG-encode and base64 the image for JSON transport.
pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    let png = encode_png(image)?;
    Ok(STANDARD.encode(png))
}

/// Inverse of [`encode_png_base64`]; used by clients and tests.
pub fn decode_png_base64(encoded: &str) -> Result<RgbImage> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::decode(format!("invalid base64: {e}")))?;
    Ok(decode(&bytes)?.to_rgb8())
}
