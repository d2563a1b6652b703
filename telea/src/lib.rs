//! Structural fill with OpenCV's fast-marching inpainting (Telea, 2004).

use image::{GrayImage, RgbImage};
use opencv::core::{Mat, MatTraitConst};
use opencv::photo::{INPAINT_TELEA, inpaint as cv_inpaint};

/// Fills every non-zero mask pixel of `image` from its surroundings.
///
/// Pixels outside the mask are returned untouched. An empty mask returns
/// a copy of the input. Fails when dimensions disagree, when `radius` is
/// zero or when the mask leaves no known pixel to sample from.
pub fn inpaint(image: &RgbImage, mask: &GrayImage, radius: u32) -> anyhow::Result<RgbImage> {
    let (width, height) = image.dimensions();
    if mask.dimensions() != (width, height) {
        anyhow::bail!(
            "mask is {}x{} but image is {}x{}",
            mask.width(),
            mask.height(),
            width,
            height
        );
    }
    if radius == 0 {
        anyhow::bail!("inpaint radius must be at least 1");
    }

    let masked = mask.pixels().filter(|p| p[0] > 0).count();
    if masked == 0 {
        return Ok(image.clone());
    }
    if masked == (width as usize) * (height as usize) {
        anyhow::bail!("mask covers the whole image, nothing to sample from");
    }
    tracing::debug!("telea inpainting {masked} pixels with radius {radius}");

    let rows = height as i32;
    let src = Mat::from_slice(image.as_raw())?.reshape(3, rows)?.try_clone()?;
    let binary: Vec<u8> = mask.pixels().map(|p| if p[0] > 0 { 255 } else { 0 }).collect();
    let cv_mask = Mat::from_slice(&binary)?.reshape(1, rows)?.try_clone()?;

    let mut dst = Mat::default();
    cv_inpaint(&src, &cv_mask, &mut dst, radius as f64, INPAINT_TELEA)?;

    let bytes = dst.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes)
        .ok_or_else(|| anyhow::anyhow!("inpaint returned a buffer of unexpected size"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn square_mask(width: u32, height: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
            Luma([if inside { 255 } else { 0 }])
        })
    }

    #[test]
    fn test_uniform_image_stays_uniform() {
        let image = RgbImage::from_pixel(16, 16, Rgb([40, 120, 200]));
        let mask = square_mask(16, 16, 5, 5, 4);

        let filled = inpaint(&image, &mask, 3).unwrap();

        for p in filled.pixels() {
            assert!(p.0.iter().zip([40u8, 120, 200]).all(|(a, b)| a.abs_diff(b) <= 1));
        }
    }

    #[test]
    fn test_pixels_outside_mask_untouched() {
        let image = RgbImage::from_fn(20, 12, |x, y| Rgb([(x * 10) as u8, (y * 20) as u8, 7]));
        let mask = square_mask(20, 12, 8, 4, 3);

        let filled = inpaint(&image, &mask, 3).unwrap();

        for (x, y, p) in filled.enumerate_pixels() {
            if mask.get_pixel(x, y)[0] == 0 {
                assert_eq!(p, image.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_masked_region_takes_surrounding_colour() {
        let mut image = RgbImage::from_pixel(16, 16, Rgb([200, 200, 200]));
        let mask = square_mask(16, 16, 6, 6, 4);
        for (x, y, p) in image.enumerate_pixels_mut() {
            if mask.get_pixel(x, y)[0] > 0 {
                *p = Rgb([0, 0, 0]);
            }
        }

        let filled = inpaint(&image, &mask, 3).unwrap();

        assert!(filled.get_pixel(7, 7)[0] > 150);
        assert!(filled.get_pixel(8, 8)[1] > 150);
    }

    #[test]
    fn test_deterministic() {
        let image = RgbImage::from_fn(24, 24, |x, y| Rgb([(x * 9) as u8, (y * 7) as u8, ((x + y) * 3) as u8]));
        let mask = square_mask(24, 24, 9, 3, 6);

        let a = inpaint(&image, &mask, 4).unwrap();
        let b = inpaint(&image, &mask, 4).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_mask_returns_copy() {
        let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let mask = GrayImage::new(4, 4);

        assert_eq!(inpaint(&image, &mask, 3).unwrap(), image);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let image = RgbImage::new(4, 4);

        assert!(inpaint(&image, &GrayImage::new(3, 4), 3).is_err());
        assert!(inpaint(&image, &square_mask(4, 4, 1, 1, 1), 0).is_err());
        assert!(inpaint(&image, &GrayImage::from_pixel(4, 4, Luma([255])), 3).is_err());
    }

    #[test]
    fn test_linear_ramp_is_continued_across_hole() {
        let image = RgbImage::from_fn(40, 20, |x, _| {
            let v = (6 * x) as u8;
            Rgb([v, v, v])
        });
        let mask = square_mask(40, 20, 16, 6, 8);

        let filled = inpaint(&image, &mask, 5).unwrap();

        for x in 16..24 {
            let expected = (6 * x) as i32;
            let actual = filled.get_pixel(x, 10)[0] as i32;
            assert!(
                (actual - expected).abs() <= 8,
                "x={x}: got {actual}, expected about {expected}"
            );
        }
    }
}
