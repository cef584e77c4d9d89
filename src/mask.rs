//! Mask application: confidence mask + colour image → cut-out foreground

use crate::{
    config::ResampleFilter,
    types::{Mask, RasterImage},
};
use image::RgbaImage;
use tracing::{debug, instrument};

/// Turns a segmentation mask into the alpha channel of the source photo
///
/// The source is resampled onto the mask grid, alpha is replaced per pixel,
/// and the result is resampled back to the source resolution. RGB values are
/// preserved; only alpha comes from the mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskApplicator {
    filter: ResampleFilter,
}

impl MaskApplicator {
    #[must_use]
    pub fn new(filter: ResampleFilter) -> Self {
        Self { filter }
    }

    #[must_use]
    pub fn filter(&self) -> ResampleFilter {
        self.filter
    }

    /// Apply `mask` to `source`, returning a new image the size of `source`
    #[instrument(
        skip(self, source, mask),
        fields(
            source = %format!("{}x{}", source.width(), source.height()),
            mask = %format!("{}x{}", mask.width(), mask.height())
        )
    )]
    #[must_use]
    pub fn apply(&self, source: &RasterImage, mask: &Mask) -> RasterImage {
        let filter = self.filter.to_filter_type();
        let (source_width, source_height) = source.dimensions();
        let (mask_width, mask_height) = mask.dimensions();

        let on_mask_grid = source.resized(mask_width, mask_height, filter);
        let cut_out = replace_alpha(on_mask_grid.as_rgba(), mask);

        debug!(
            foreground_ratio = mask.statistics().foreground_ratio,
            "mask applied on {}x{} grid",
            mask_width,
            mask_height
        );

        RasterImage::new(cut_out).resized(source_width, source_height, filter)
    }
}

/// Copy `pixels` with alpha taken from the mask at the same index
fn replace_alpha(pixels: &RgbaImage, mask: &Mask) -> RgbaImage {
    let mut output = pixels.clone();
    for (index, pixel) in output.pixels_mut().enumerate() {
        pixel.0[3] = mask.alpha_at(index);
    }
    output
}
