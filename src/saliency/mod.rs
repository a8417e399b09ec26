//! Gradient-weighted class activation maps and their overlay rendering.

mod colormap;

pub use crate::model::select_target;
pub use colormap::turbo;

use crate::{
    Error, Result,
    imaging::RESIZE_FILTER,
    model::{Classifier, LayerGradient},
};
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::{Array2, Array4, Axis};
use tracing::debug;

/// Guards the max-normalization against an all-zero map.
pub const NORMALIZE_EPSILON: f32 = 1e-8;
/// Share of the original pixel in the overlay.
pub const ORIGINAL_WEIGHT: f64 = 0.6;
/// Share of the color-mapped heat in the overlay.
pub const HEATMAP_WEIGHT: f64 = 0.4;

/// Per-pixel importance in `[0, 1]` at display resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    values: Array2<f32>,
}

impl SaliencyMap {
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn width(&self) -> u32 {
        self.values.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.values.nrows() as u32
    }

    /// Byte-range intensities, truncated.
    pub fn intensities(&self) -> Array2<u8> {
        self.values.mapv(|v| (255.0 * v) as u8)
    }

    /// Render the map through the turbo color map.
    pub fn colorize(&self) -> RgbImage {
        let intensities = self.intensities();
        RgbImage::from_fn(self.width(), self.height(), |x, y| {
            turbo(intensities[[y as usize, x as usize]])
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SaliencyMapper {
    display_size: u32,
}

impl SaliencyMapper {
    pub fn new(display_size: u32) -> Self {
        Self { display_size }
    }

    /// Run the classifier and build a saliency map for its top output channel.
    ///
    /// `Ok(None)` when the classifier cannot provide gradients for `layer`.
    pub fn compute(
        &self,
        classifier: &dyn Classifier,
        input: &Array4<f32>,
        layer: &str,
    ) -> Result<Option<SaliencyMap>> {
        let (_, capture) = classifier.forward_with_gradient(layer, input)?;
        self.map_capture(layer, capture)
    }

    /// Build the map from a capture already taken during the forward pass.
    pub fn map_capture(
        &self,
        layer: &str,
        capture: Option<LayerGradient>,
    ) -> Result<Option<SaliencyMap>> {
        let Some(capture) = capture else {
            debug!("No gradient available for layer '{}'", layer);
            return Ok(None);
        };

        let coarse = grad_cam(layer, &capture)?;
        debug!(
            "Grad-CAM at layer '{}': {}x{} map",
            layer,
            coarse.nrows(),
            coarse.ncols()
        );

        Ok(Some(self.upscale(layer, coarse)?))
    }

    fn upscale(&self, layer: &str, coarse: Array2<f32>) -> Result<SaliencyMap> {
        let (rows, cols) = coarse.dim();
        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(cols as u32, rows as u32, coarse.iter().copied().collect())
                .ok_or_else(|| {
                    Error::saliency(layer, format!("cannot view {rows}x{cols} map as image"))
                })?;

        let resized = image::imageops::resize(
            &buffer,
            self.display_size,
            self.display_size,
            RESIZE_FILTER,
        );
        let size = self.display_size as usize;
        let values = Array2::from_shape_vec((size, size), resized.into_raw())?;

        Ok(SaliencyMap {
            values: normalize(values),
        })
    }

    /// Blend the color-mapped saliency onto the display image.
    pub fn overlay(&self, display: &RgbImage, map: &SaliencyMap) -> Result<RgbImage> {
        if display.dimensions() != (map.width(), map.height()) {
            return Err(Error::internal(format!(
                "display image is {:?} but saliency map is {:?}",
                display.dimensions(),
                (map.width(), map.height())
            )));
        }

        let heat = map.colorize();
        Ok(RgbImage::from_fn(display.width(), display.height(), |x, y| {
            blend(*display.get_pixel(x, y), *heat.get_pixel(x, y))
        }))
    }
}

/// Coarse class activation map at the layer's own spatial resolution.
pub fn grad_cam(layer: &str, capture: &LayerGradient) -> Result<Array2<f32>> {
    let LayerGradient { activation, gradient } = capture;
    if activation.shape() != gradient.shape() {
        return Err(Error::saliency(
            layer,
            format!(
                "activation {:?} does not match gradient {:?}",
                activation.shape(),
                gradient.shape()
            ),
        ));
    }

    let (batch, height, width, channels) = activation.dim();
    if batch != 1 || height == 0 || width == 0 || channels == 0 {
        return Err(Error::saliency(
            layer,
            format!("expected a non-empty batch of one, got {:?}", activation.shape()),
        ));
    }

    let pooled = gradient
        .to_shape((height * width, channels))?
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::saliency(layer, "cannot pool an empty gradient"))?;

    let weighted = activation.to_shape((height * width, channels))?.dot(&pooled);
    let heat = weighted.into_shape_with_order((height, width))?;

    if heat.iter().any(|v| !v.is_finite()) {
        return Err(Error::saliency(layer, "activation or gradient contains non-finite values"));
    }

    Ok(normalize(heat))
}

/// Clamp negatives to zero and scale by the maximum.
fn normalize(map: Array2<f32>) -> Array2<f32> {
    let map = map.mapv(|v| v.max(0.0));
    let max = map.iter().copied().fold(0.0_f32, f32::max);
    map.mapv(|v| v / (max + NORMALIZE_EPSILON))
}

pub fn blend(original: Rgb<u8>, heat: Rgb<u8>) -> Rgb<u8> {
    let mix = |o: u8, h: u8| {
        (ORIGINAL_WEIGHT * f64::from(o) + HEATMAP_WEIGHT * f64::from(h))
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([
        mix(original[0], heat[0]),
        mix(original[1], heat[1]),
        mix(original[2], heat[2]),
    ])
}
