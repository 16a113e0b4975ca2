use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::error::ProductionError;

/// Resampling filter for every resize; fixed so reruns are pixel-identical.
const RESAMPLE: FilterType = FilterType::Lanczos3;
/// Longest side of the intermediate image used for soft backdrops.
const BACKDROP_WORK_SIDE: u32 = 96;

pub fn decode_image(data: &[u8]) -> Result<DynamicImage, ProductionError> {
    Ok(image::load_from_memory(data)?)
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, ProductionError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Scales to cover `width` x `height` then crops the centre.
pub fn cover_crop(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (iw, ih) = img.dimensions();
    if iw == 0 || ih == 0 {
        return RgbaImage::new(width, height);
    }
    let scale = (width as f64 / iw as f64).max(height as f64 / ih as f64);
    let new_w = ((iw as f64 * scale).round() as u32).max(width);
    let new_h = ((ih as f64 * scale).round() as u32).max(height);
    let resized = if (new_w, new_h) == (iw, ih) {
        img.clone()
    } else {
        imageops::resize(img, new_w, new_h, RESAMPLE)
    };
    let left = (new_w - width) / 2;
    let top = (new_h - height) / 2;
    imageops::crop_imm(&resized, left, top, width, height).to_image()
}

/// Scales to fit inside the bound without upscaling, then by `ratio`.
pub fn fit_within(img: &RgbaImage, bound_w: u32, bound_h: u32, ratio: f64) -> RgbaImage {
    let (iw, ih) = img.dimensions();
    if iw == 0 || ih == 0 {
        return img.clone();
    }
    let fit = (bound_w as f64 / iw as f64)
        .min(bound_h as f64 / ih as f64)
        .min(1.0);
    let scale = fit * ratio;
    let new_w = ((iw as f64 * scale).round() as u32).max(1);
    let new_h = ((ih as f64 * scale).round() as u32).max(1);
    if (new_w, new_h) == (iw, ih) {
        return img.clone();
    }
    imageops::resize(img, new_w, new_h, RESAMPLE)
}

/// Places `img` so its centre lands on (cx, cy), alpha-over.
pub fn paste_centered(canvas: &mut RgbaImage, img: &RgbaImage, cx: f64, cy: f64) {
    let x = (cx - img.width() as f64 / 2.0).round() as i64;
    let y = (cy - img.height() as f64 / 2.0).round() as i64;
    imageops::overlay(canvas, img, x, y);
}

/// Binary alpha: above `threshold` becomes opaque, the rest fully clear.
pub fn harden_alpha(img: &mut RgbaImage, threshold: u8) {
    for px in img.pixels_mut() {
        px.0[3] = if px.0[3] > threshold { 255 } else { 0 };
    }
}

/// Mixes every pixel toward `tint` by `mix` and forces full opacity.
pub fn blend_tint(img: &mut RgbaImage, tint: [u8; 3], mix: f32) {
    let mix = mix.clamp(0.0, 1.0);
    for px in img.pixels_mut() {
        for c in 0..3 {
            let v = px.0[c] as f32 * (1.0 - mix) + tint[c] as f32 * mix;
            px.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        px.0[3] = 255;
    }
}

/// Opaque copy composited over white.
pub fn flatten(img: &RgbaImage) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(img.width(), img.height(), Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut out, img, 0, 0);
    out
}

/// Soft blurred backdrop derived from another layer.
///
/// Blurring happens on a small intermediate so very wide radii stay cheap;
/// the blur radius is an eighth of the shorter side, as in the artwork kit.
pub fn soft_backdrop(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let covered = cover_crop(&flatten(source), width, height);
    let longest = width.max(height).max(1);
    let factor = (BACKDROP_WORK_SIDE as f32 / longest as f32).min(1.0);
    let small_w = ((width as f32 * factor).round() as u32).max(1);
    let small_h = ((height as f32 * factor).round() as u32).max(1);
    let small = imageops::resize(&covered, small_w, small_h, FilterType::Triangle);
    let sigma = (width.min(height) as f32 / 8.0 * factor).max(0.5);
    let blurred = imageops::blur(&small, sigma);
    let mut out = imageops::resize(&blurred, width, height, FilterType::Triangle);
    for px in out.pixels_mut() {
        px.0[3] = 255;
    }
    out
}

/// Grows the canvas by `pad` on every side, keeping content centred.
pub fn pad_transparent(img: &RgbaImage, pad: u32) -> RgbaImage {
    if pad == 0 {
        return img.clone();
    }
    let mut out = RgbaImage::new(img.width() + pad * 2, img.height() + pad * 2);
    imageops::replace(&mut out, img, pad as i64, pad as i64);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_crop_fills_target_exactly() {
        let img = RgbaImage::from_pixel(100, 50, Rgba([10, 20, 30, 255]));
        let out = cover_crop(&img, 40, 60);
        assert_eq!(out.dimensions(), (40, 60));
        assert_eq!(out.get_pixel(20, 30).0, [10, 20, 30, 255]);
    }

    #[test]
    fn fit_within_never_upscales() {
        let img = RgbaImage::new(100, 200);
        assert_eq!(fit_within(&img, 1000, 1000, 1.0).dimensions(), (100, 200));
        assert_eq!(fit_within(&img, 50, 50, 1.0).dimensions(), (25, 50));
        assert_eq!(fit_within(&img, 1000, 1000, 0.5).dimensions(), (50, 100));
    }

    #[test]
    fn hardening_is_binary() {
        let mut img = RgbaImage::new(3, 1);
        img.put_pixel(0, 0, Rgba([0, 0, 0, 128]));
        img.put_pixel(1, 0, Rgba([0, 0, 0, 129]));
        img.put_pixel(2, 0, Rgba([0, 0, 0, 3]));
        harden_alpha(&mut img, 128);
        let alphas: Vec<u8> = img.pixels().map(|p| p.0[3]).collect();
        assert_eq!(alphas, vec![0, 255, 0]);
    }

    #[test]
    fn tint_blend_mixes_toward_color() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 0, 255]));
        blend_tint(&mut img, [0, 0, 255], 0.25);
        assert_eq!(img.get_pixel(1, 1).0, [150, 75, 64, 255]);
    }

    #[test]
    fn padding_centres_content() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let out = pad_transparent(&img, 2);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(2, 2).0, [1, 2, 3, 255]);
    }

    #[test]
    fn backdrop_is_opaque_and_sized() {
        let img = RgbaImage::from_pixel(30, 40, Rgba([90, 90, 90, 255]));
        let out = soft_backdrop(&img, 60, 80);
        assert_eq!(out.dimensions(), (60, 80));
        assert!(out.pixels().all(|p| p.0[3] == 255));
    }
}
