//! Augmentation Pipeline
//!
//! Per-sample image transformation with two modes: a deterministic path
//! for validation, test, and inference (decode → resize → scale to [0,1])
//! and a stochastic path for training that chains independent random
//! perturbations. Parameters are redrawn for every sample on every epoch;
//! nothing is cached or memoized.

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Rgb};
use rand::Rng;

use crate::config::AugmentConfig;

/// Which transform chain a stream applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    /// Stochastic chain for training batches
    Train,
    /// Deterministic resize + normalize only
    Eval,
}

/// Per-sample transformation stage shared by training, evaluation, and
/// inference paths.
#[derive(Debug, Clone)]
pub struct Augmentor {
    image_size: u32,
    config: AugmentConfig,
}

impl Augmentor {
    /// Create an augmentor for the given square output resolution
    pub fn new(image_size: usize, config: AugmentConfig) -> Self {
        Self {
            image_size: image_size as u32,
            config,
        }
    }

    /// Output resolution (square)
    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    /// Deterministic path: resize to the fixed resolution and scale to
    /// [0,1] CHW floats. Bit-reproducible for a fixed input.
    pub fn deterministic(&self, image: &DynamicImage) -> Vec<f32> {
        let resized = image.resize_exact(self.image_size, self.image_size, FilterType::Triangle);
        to_chw_floats(&resized)
    }

    /// Stochastic path: flip, rotate, color jitter, optional zoom crop,
    /// then the same resize + normalize as the deterministic path.
    pub fn stochastic<R: Rng>(&self, image: &DynamicImage, rng: &mut R) -> Vec<f32> {
        let mut img = image.clone();

        if rng.gen_bool(0.5) {
            img = DynamicImage::ImageRgb8(image::imageops::flip_horizontal(&img.to_rgb8()));
        }

        img = match rng.gen_range(0..4u8) {
            1 => DynamicImage::ImageRgb8(image::imageops::rotate90(&img.to_rgb8())),
            2 => DynamicImage::ImageRgb8(image::imageops::rotate180(&img.to_rgb8())),
            3 => DynamicImage::ImageRgb8(image::imageops::rotate270(&img.to_rgb8())),
            _ => img,
        };

        let brightness = sample_range(rng, self.config.brightness_range);
        img = adjust_brightness(&img, brightness);

        let contrast = sample_range(rng, self.config.contrast_range);
        img = adjust_contrast(&img, contrast);

        let saturation = sample_range(rng, self.config.saturation_range);
        img = adjust_saturation(&img, saturation);

        if self.config.hue_degrees > 0 {
            let hue = rng.gen_range(-self.config.hue_degrees..=self.config.hue_degrees);
            img = img.huerotate(hue);
        }

        if rng.gen_bool(0.5) {
            img = self.zoom_crop(&img, rng);
        }

        let resized = img.resize_exact(self.image_size, self.image_size, FilterType::Triangle);
        to_chw_floats(&resized)
    }

    /// Random-scale crop biased toward the image center, resized back to
    /// the source dimensions.
    fn zoom_crop<R: Rng>(&self, image: &DynamicImage, rng: &mut R) -> DynamicImage {
        let (width, height) = image.dimensions();
        let zoom = sample_range(rng, self.config.zoom_range).max(1.0);

        let crop_w = (width as f32 / zoom) as u32;
        let crop_h = (height as f32 / zoom) as u32;
        if crop_w == 0 || crop_h == 0 || crop_w >= width || crop_h >= height {
            return image.clone();
        }

        let x = center_biased_offset(rng, width - crop_w);
        let y = center_biased_offset(rng, height - crop_h);

        image
            .crop_imm(x, y, crop_w, crop_h)
            .resize_exact(width, height, FilterType::Triangle)
    }
}

/// Offset within [0, slack] whose jitter stays within a quarter of the
/// slack around the centered position.
fn center_biased_offset<R: Rng>(rng: &mut R, slack: u32) -> u32 {
    let center = slack / 2;
    let jitter = slack / 4;
    if jitter == 0 {
        return center;
    }
    rng.gen_range(center.saturating_sub(jitter)..=(center + jitter).min(slack))
}

fn sample_range<R: Rng>(rng: &mut R, (lo, hi): (f32, f32)) -> f32 {
    if lo >= hi {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

/// Multiply all channels by a factor, clamping to the valid pixel range
fn adjust_brightness(image: &DynamicImage, factor: f32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let adjusted = ImageBuffer::from_fn(width, height, |x, y| {
        let pixel = rgb.get_pixel(x, y);
        Rgb([
            (pixel[0] as f32 * factor).clamp(0.0, 255.0) as u8,
            (pixel[1] as f32 * factor).clamp(0.0, 255.0) as u8,
            (pixel[2] as f32 * factor).clamp(0.0, 255.0) as u8,
        ])
    });

    DynamicImage::ImageRgb8(adjusted)
}

/// Scale the distance of each channel from the mean intensity
fn adjust_contrast(image: &DynamicImage, factor: f32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut sum = 0.0f32;
    for pixel in rgb.pixels() {
        sum += (pixel[0] as f32 + pixel[1] as f32 + pixel[2] as f32) / 3.0;
    }
    let mean = sum / (width * height) as f32;

    let adjusted = ImageBuffer::from_fn(width, height, |x, y| {
        let pixel = rgb.get_pixel(x, y);
        Rgb([
            (mean + factor * (pixel[0] as f32 - mean)).clamp(0.0, 255.0) as u8,
            (mean + factor * (pixel[1] as f32 - mean)).clamp(0.0, 255.0) as u8,
            (mean + factor * (pixel[2] as f32 - mean)).clamp(0.0, 255.0) as u8,
        ])
    });

    DynamicImage::ImageRgb8(adjusted)
}

/// Interpolate between the luminance-grayscale image and the original
fn adjust_saturation(image: &DynamicImage, factor: f32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let adjusted = ImageBuffer::from_fn(width, height, |x, y| {
        let pixel = rgb.get_pixel(x, y);
        let gray =
            0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32;
        Rgb([
            (gray + factor * (pixel[0] as f32 - gray)).clamp(0.0, 255.0) as u8,
            (gray + factor * (pixel[1] as f32 - gray)).clamp(0.0, 255.0) as u8,
            (gray + factor * (pixel[2] as f32 - gray)).clamp(0.0, 255.0) as u8,
        ])
    });

    DynamicImage::ImageRgb8(adjusted)
}

/// Convert to CHW floats in [0, 1]
fn to_chw_floats(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let num_pixels = (width * height) as usize;

    let mut data = vec![0.0f32; 3 * num_pixels];
    for (i, pixel) in rgb.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[num_pixels + i] = pixel[1] as f32 / 255.0;
        data[2 * num_pixels + i] = pixel[2] as f32 / 255.0;
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_image() -> DynamicImage {
        let img = ImageBuffer::from_fn(32, 32, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([200u8, 40u8, 40u8])
            } else {
                Rgb([20u8, 180u8, 90u8])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_deterministic_is_bit_reproducible() {
        let augmentor = Augmentor::new(16, AugmentConfig::default());
        let image = test_image();

        let a = augmentor.deterministic(&image);
        let b = augmentor.deterministic(&image);

        assert_eq!(a, b);
        assert_eq!(a.len(), 3 * 16 * 16);
    }

    #[test]
    fn test_deterministic_output_in_unit_range() {
        let augmentor = Augmentor::new(16, AugmentConfig::default());
        let data = augmentor.deterministic(&test_image());
        assert!(data.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_stochastic_redraws_parameters_per_application() {
        let augmentor = Augmentor::new(16, AugmentConfig::default());
        let image = test_image();

        // Two applications over the same advancing RNG, as consecutive
        // epochs would see
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let a = augmentor.stochastic(&image, &mut rng);
        let b = augmentor.stochastic(&image, &mut rng);

        assert_eq!(a.len(), b.len());
        assert_ne!(a, b);
    }

    #[test]
    fn test_stochastic_same_rng_state_reproduces() {
        let augmentor = Augmentor::new(16, AugmentConfig::default());
        let image = test_image();

        let mut rng_a = ChaCha8Rng::seed_from_u64(9);
        let mut rng_b = ChaCha8Rng::seed_from_u64(9);

        assert_eq!(
            augmentor.stochastic(&image, &mut rng_a),
            augmentor.stochastic(&image, &mut rng_b)
        );
    }

    #[test]
    fn test_stochastic_output_shape_and_range() {
        let augmentor = Augmentor::new(16, AugmentConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let data = augmentor.stochastic(&test_image(), &mut rng);
        assert_eq!(data.len(), 3 * 16 * 16);
        assert!(data.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_brightness_extremes_clamp() {
        let image = test_image();
        let bright = adjust_brightness(&image, 10.0).to_rgb8();
        let dark = adjust_brightness(&image, 0.0).to_rgb8();

        // (0,0) is the red-dominant pixel: 200 * 10 clamps to 255
        assert_eq!(bright.get_pixel(0, 0)[0], 255);
        assert!(dark.pixels().all(|p| p[0] == 0 && p[1] == 0 && p[2] == 0));
    }

    #[test]
    fn test_zero_saturation_is_grayscale() {
        let gray = adjust_saturation(&test_image(), 0.0).to_rgb8();
        for pixel in gray.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    #[test]
    fn test_center_biased_offset_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for slack in [0u32, 1, 7, 100] {
            for _ in 0..50 {
                let offset = center_biased_offset(&mut rng, slack);
                assert!(offset <= slack);
            }
        }
    }
}
