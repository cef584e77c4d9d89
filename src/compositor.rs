//! Final flattening of background and transformed foreground

use crate::{transform::AffineTransform, types::RasterImage};
use image::{Rgba, RgbaImage};
use tracing::{debug, instrument};

/// Premultiplied colour with alpha in `[0, 1]` and channels in `[0, 255]`
type Premultiplied = [f32; 4];

/// Everything needed to flatten one frame
#[derive(Debug, Clone, Copy)]
pub struct CompositionInput<'a> {
    /// Opaque backdrop; its size becomes the canvas size when present
    pub background: Option<&'a RasterImage>,
    /// Active foreground (segmented or original)
    pub foreground: &'a RasterImage,
    /// Foreground placement
    pub transform: AffineTransform,
    /// Canvas size used when there is no background
    pub viewport: (u32, u32),
    /// Multiplier applied to foreground alpha
    pub opacity: f32,
}

impl<'a> CompositionInput<'a> {
    #[must_use]
    pub fn new(foreground: &'a RasterImage, viewport: (u32, u32)) -> Self {
        Self {
            background: None,
            foreground,
            transform: AffineTransform::IDENTITY,
            viewport,
            opacity: 1.0,
        }
    }

    #[must_use]
    pub fn with_background(mut self, background: Option<&'a RasterImage>) -> Self {
        self.background = background;
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: AffineTransform) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    /// Dimensions of the canvas this input produces
    #[must_use]
    pub fn canvas_dimensions(&self) -> (u32, u32) {
        self.background
            .map_or(self.viewport, RasterImage::dimensions)
    }
}

/// Stateless compositor
pub struct Compositor;

impl Compositor {
    /// Flatten the input into a new image
    ///
    /// With a background the canvas is the background's size and the
    /// background is drawn unscaled at the origin; without one the canvas is
    /// a transparent viewport. The foreground is drawn through the transform
    /// with source-over blending. Identical inputs give identical pixels.
    #[instrument(
        skip(input),
        fields(
            has_background = input.background.is_some(),
            canvas = %format!("{}x{}", input.canvas_dimensions().0, input.canvas_dimensions().1)
        )
    )]
    #[must_use]
    pub fn compose(input: &CompositionInput<'_>) -> RasterImage {
        let mut canvas = match input.background {
            Some(background) => background.as_rgba().clone(),
            None => RgbaImage::new(input.viewport.0, input.viewport.1),
        };

        let opacity = if input.opacity.is_finite() {
            input.opacity.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if opacity > 0.0 {
            draw_layer(&mut canvas, input.foreground.as_rgba(), &input.transform, opacity);
        }

        RasterImage::new(canvas)
    }
}

fn draw_layer(canvas: &mut RgbaImage, layer: &RgbaImage, transform: &AffineTransform, opacity: f32) {
    if let Some((dx, dy)) = transform.integer_translation() {
        draw_translated(canvas, layer, dx, dy, opacity);
        return;
    }

    let Some(inverse) = transform.invert() else {
        debug!("singular foreground transform, nothing drawn");
        return;
    };
    let Some((x_range, y_range)) = destination_bounds(canvas, layer, transform) else {
        return;
    };

    for y in y_range {
        for x in x_range.clone() {
            let (sx, sy) = inverse.map_point(f64::from(x) + 0.5, f64::from(y) + 0.5);
            let sample = sample_bilinear(layer, sx - 0.5, sy - 0.5);
            blend_over(canvas.get_pixel_mut(x, y), sample, opacity);
        }
    }
}

/// Whole-pixel placement: copy-blend without resampling
fn draw_translated(canvas: &mut RgbaImage, layer: &RgbaImage, dx: i64, dy: i64, opacity: f32) {
    let (canvas_width, canvas_height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for (x, y, pixel) in layer.enumerate_pixels() {
        let tx = i64::from(x) + dx;
        let ty = i64::from(y) + dy;
        if tx < 0 || ty < 0 || tx >= canvas_width || ty >= canvas_height {
            continue;
        }
        blend_over(canvas.get_pixel_mut(tx as u32, ty as u32), premultiply(*pixel), opacity);
    }
}

/// Canvas pixel ranges covered by the transformed layer rectangle
fn destination_bounds(
    canvas: &RgbaImage,
    layer: &RgbaImage,
    transform: &AffineTransform,
) -> Option<(std::ops::Range<u32>, std::ops::Range<u32>)> {
    let (w, h) = (f64::from(layer.width()), f64::from(layer.height()));
    let corners = [
        transform.map_point(0.0, 0.0),
        transform.map_point(w, 0.0),
        transform.map_point(0.0, h),
        transform.map_point(w, h),
    ];
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in corners {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
        return None;
    }

    let clamp_x = |v: f64| v.clamp(0.0, f64::from(canvas.width())) as u32;
    let clamp_y = |v: f64| v.clamp(0.0, f64::from(canvas.height())) as u32;
    let x_range = clamp_x(min_x.floor())..clamp_x(max_x.ceil());
    let y_range = clamp_y(min_y.floor())..clamp_y(max_y.ceil());
    if x_range.is_empty() || y_range.is_empty() {
        None
    } else {
        Some((x_range, y_range))
    }
}

fn premultiply(pixel: Rgba<u8>) -> Premultiplied {
    let alpha = f32::from(pixel[3]) / 255.0;
    [
        f32::from(pixel[0]) * alpha,
        f32::from(pixel[1]) * alpha,
        f32::from(pixel[2]) * alpha,
        alpha,
    ]
}

/// Bilinear sample in premultiplied space, transparent outside the layer
fn sample_bilinear(layer: &RgbaImage, x: f64, y: f64) -> Premultiplied {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (width, height) = (i64::from(layer.width()), i64::from(layer.height()));

    let texel = |sx: i64, sy: i64| -> Premultiplied {
        if sx < 0 || sy < 0 || sx >= width || sy >= height {
            [0.0; 4]
        } else {
            premultiply(*layer.get_pixel(sx as u32, sy as u32))
        }
    };

    let tl = texel(x0, y0);
    let tr = texel(x0 + 1, y0);
    let bl = texel(x0, y0 + 1);
    let br = texel(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0.0f32; 4];
    for (channel, value) in out.iter_mut().enumerate() {
        let top = lerp(tl[channel], tr[channel], fx);
        let bottom = lerp(bl[channel], br[channel], fx);
        *value = lerp(top, bottom, fy);
    }
    out
}

/// Source-over blend of a premultiplied sample onto a straight-alpha pixel
fn blend_over(dst: &mut Rgba<u8>, src: Premultiplied, opacity: f32) {
    let [src_r, src_g, src_b, src_a] = src;
    let src_a = src_a * opacity;
    if src_a <= 0.0 {
        return;
    }

    let dst_a = f32::from(dst[3]) / 255.0;
    let keep = dst_a * (1.0 - src_a);
    let out_a = src_a + keep;
    let channel = |s: f32, d: u8| -> u8 {
        ((s * opacity + f32::from(d) * keep) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    *dst = Rgba([
        channel(src_r, dst[0]),
        channel(src_g, dst[1]),
        channel(src_b, dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> RasterImage {
        RasterImage::new(RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([250, 10, 10, 255])
            } else {
                Rgba([10, 10, 250, 255])
            }
        }))
    }

    #[test]
    fn test_canvas_size_follows_background() {
        let foreground = checker(10, 10);
        let background = RasterImage::from_pixel(30, 20, Rgba([0, 255, 0, 255]));

        let with_bg = Compositor::compose(
            &CompositionInput::new(&foreground, (12, 12)).with_background(Some(&background)),
        );
        let without_bg = Compositor::compose(&CompositionInput::new(&foreground, (12, 12)));

        assert_eq!(with_bg.dimensions(), (30, 20));
        assert_eq!(without_bg.dimensions(), (12, 12));
    }

    #[test]
    fn test_identity_copies_opaque_pixels() {
        let foreground = checker(10, 10);
        let background = RasterImage::from_pixel(30, 20, Rgba([0, 255, 0, 255]));
        let composed = Compositor::compose(
            &CompositionInput::new(&foreground, (10, 10)).with_background(Some(&background)),
        );

        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(composed.pixel(x, y), foreground.pixel(x, y));
            }
        }
        assert_eq!(composed.pixel(15, 15), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn test_transparent_canvas_keeps_foreground_alpha() {
        let foreground = RasterImage::from_pixel(4, 4, Rgba([200, 100, 50, 204]));
        let composed = Compositor::compose(&CompositionInput::new(&foreground, (6, 6)));

        assert_eq!(composed.pixel(1, 1), Rgba([200, 100, 50, 204]));
        assert_eq!(composed.pixel(5, 5), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_partial_alpha_blends_over_background() {
        let foreground = RasterImage::from_pixel(2, 2, Rgba([255, 0, 0, 128]));
        let background = RasterImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]));
        let composed = Compositor::compose(
            &CompositionInput::new(&foreground, (2, 2)).with_background(Some(&background)),
        );

        let pixel = composed.pixel(0, 0);
        assert_eq!(pixel[3], 255);
        assert!((i32::from(pixel[0]) - 128).abs() <= 1);
        assert!((i32::from(pixel[2]) - 127).abs() <= 1);
    }

    #[test]
    fn test_integer_translation_places_pixels() {
        let foreground = checker(4, 4);
        let composed = Compositor::compose(
            &CompositionInput::new(&foreground, (10, 10))
                .with_transform(AffineTransform::from_translation(3.0, 5.0)),
        );

        assert_eq!(composed.pixel(3, 5), foreground.pixel(0, 0));
        assert_eq!(composed.pixel(6, 8), foreground.pixel(3, 3));
        assert_eq!(composed.pixel(2, 5)[3], 0);
        assert_eq!(composed.pixel(7, 5)[3], 0);
    }

    #[test]
    fn test_offscreen_translation_draws_nothing() {
        let foreground = checker(4, 4);
        let composed = Compositor::compose(
            &CompositionInput::new(&foreground, (10, 10))
                .with_transform(AffineTransform::from_translation(-50.0, 0.0)),
        );
        assert!(composed.as_rgba().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_translation_past_integer_range_draws_nothing() {
        let foreground = checker(2, 2);
        let background = RasterImage::from_pixel(4, 4, Rgba([0, 255, 0, 255]));

        for (dx, dy) in [(1e19, 0.0), (-1e19, 0.0), (0.0, 1e19), (1e300, -1e300)] {
            let composed = Compositor::compose(
                &CompositionInput::new(&foreground, (4, 4))
                    .with_background(Some(&background))
                    .with_transform(AffineTransform::from_translation(dx, dy)),
            );
            assert_eq!(composed.as_raw(), background.as_raw());
        }
    }

    #[test]
    fn test_scale_enlarges_solid_layer() {
        let foreground = RasterImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let composed = Compositor::compose(
            &CompositionInput::new(&foreground, (20, 20))
                .with_transform(AffineTransform::from_scale(2.0, 2.0, 0.0, 0.0)),
        );

        // Interior of the 8x8 footprint is solid, outside stays transparent
        assert_eq!(composed.pixel(1, 1), Rgba([10, 20, 30, 255]));
        assert_eq!(composed.pixel(6, 6), Rgba([10, 20, 30, 255]));
        assert_eq!(composed.pixel(9, 9)[3], 0);
    }

    #[test]
    fn test_opacity_scales_alpha() {
        let foreground = RasterImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let half = Compositor::compose(&CompositionInput::new(&foreground, (2, 2)).with_opacity(0.5));
        assert_eq!(half.pixel(0, 0), Rgba([255, 255, 255, 128]));

        let none = Compositor::compose(&CompositionInput::new(&foreground, (2, 2)).with_opacity(0.0));
        assert_eq!(none.pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_singular_transform_draws_nothing() {
        let foreground = checker(4, 4);
        let composed = Compositor::compose(
            &CompositionInput::new(&foreground, (4, 4))
                .with_transform(AffineTransform::from_scale(0.0, 0.0, 0.0, 0.0)),
        );
        assert!(composed.as_rgba().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let foreground = checker(16, 16);
        let background = RasterImage::from_pixel(40, 30, Rgba([9, 9, 9, 255]));
        let mut transform = AffineTransform::IDENTITY;
        transform.post_scale(1.37, 1.37, 5.0, 5.0);
        transform.post_rotate(12.0, 8.0, 8.0);
        transform.post_translate(3.3, 2.1);

        let input = CompositionInput::new(&foreground, (40, 30))
            .with_background(Some(&background))
            .with_transform(transform);
        let first = Compositor::compose(&input);
        let second = Compositor::compose(&input);
        assert_eq!(first, second);
    }
}
