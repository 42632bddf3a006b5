//! Face normalization: crop a detected region and rescale it to the canonical
//! recognizer input size with bicubic (Catmull-Rom) interpolation.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;

/// Default canonical face side, in pixels.
pub const DEFAULT_FACE_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("region {region:?} lies outside the {width}x{height} image")]
    InvalidRegion {
        region: FaceBox,
        width: u32,
        height: u32,
    },
    #[error("canonical size must be non-zero, got {0}x{1}")]
    InvalidSize(u32, u32),
}

/// Crop `region` out of `gray` and rescale it to `size` (width, height).
pub fn normalize(
    gray: &GrayImage,
    region: &FaceBox,
    size: (u32, u32),
) -> Result<GrayImage, NormalizeError> {
    let (width, height) = gray.dimensions();
    if !region.fits_within(width, height) {
        return Err(NormalizeError::InvalidRegion {
            region: *region,
            width,
            height,
        });
    }

    let crop = imageops::crop_imm(gray, region.x, region.y, region.width, region.height).to_image();
    resize_to(crop, size)
}

/// Rescale a whole image to `size`, passing it through untouched if it already matches.
pub fn resize_to(image: GrayImage, size: (u32, u32)) -> Result<GrayImage, NormalizeError> {
    let (w, h) = size;
    if w == 0 || h == 0 {
        return Err(NormalizeError::InvalidSize(w, h));
    }
    if image.dimensions() == size {
        return Ok(image);
    }
    Ok(imageops::resize(&image, w, h, FilterType::CatmullRom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn test_normalize_output_size() {
        let img = gradient(320, 240);
        let face = normalize(&img, &FaceBox::new(50, 40, 120, 150), (100, 100)).unwrap();
        assert_eq!(face.dimensions(), (100, 100));
    }

    #[test]
    fn test_normalize_exact_size_is_plain_crop() {
        let img = gradient(40, 30);
        let face = normalize(&img, &FaceBox::new(5, 7, 10, 10), (10, 10)).unwrap();
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(face.get_pixel(x, y), img.get_pixel(x + 5, y + 7));
            }
        }
    }

    #[test]
    fn test_normalize_uniform_stays_uniform() {
        let img = GrayImage::from_pixel(200, 200, Luma([128]));
        let face = normalize(&img, &FaceBox::new(10, 10, 63, 77), (100, 100)).unwrap();
        assert!(face.pixels().all(|p| (p.0[0] as i32 - 128).abs() <= 1));
    }

    #[test]
    fn test_normalize_rejects_out_of_bounds() {
        let img = gradient(100, 100);
        let err = normalize(&img, &FaceBox::new(60, 0, 50, 50), (100, 100)).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidRegion { width: 100, height: 100, .. }));
    }

    #[test]
    fn test_normalize_rejects_empty_region() {
        let img = gradient(100, 100);
        assert!(matches!(
            normalize(&img, &FaceBox::new(10, 10, 0, 20), (100, 100)),
            Err(NormalizeError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_resize_to_rejects_zero_size() {
        assert!(matches!(
            resize_to(gradient(10, 10), (0, 100)),
            Err(NormalizeError::InvalidSize(0, 100))
        ));
    }
}
