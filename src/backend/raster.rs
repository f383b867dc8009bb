//! Image post-processing shared by the backends.

use image::{DynamicImage, Rgba, RgbaImage};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::backend::{ImageFormat, Rgb};
use crate::error::{Result, ServiceError};

/// Rewrites `path` with every pixel of `color` made fully transparent.
pub fn color_to_transparent(path: &Path, color: Rgb) -> Result<()> {
    let mut img = image::open(path)?.to_rgba8();
    let changed = key_out(&mut img, color);
    img.save_with_format(path, image::ImageFormat::Png)?;
    debug!(path = %path.display(), pixels = changed, "made color transparent");
    Ok(())
}

/// Sets alpha to zero for pixels matching `color`; returns how many changed.
pub fn key_out(img: &mut RgbaImage, color: Rgb) -> usize {
    let Rgb(r, g, b) = color;
    let mut changed = 0;
    for pixel in img.pixels_mut() {
        let Rgba([pr, pg, pb, _]) = *pixel;
        if pr == r && pg == g && pb == b {
            *pixel = Rgba([pr, pg, pb, 0]);
            changed += 1;
        }
    }
    changed
}

/// Encodes `img` in `format`, flattening alpha for formats without it.
pub fn save_image(img: RgbaImage, path: &Path, format: ImageFormat) -> Result<()> {
    let dynamic = DynamicImage::ImageRgba8(img);
    let encoded = match format {
        ImageFormat::Jpg | ImageFormat::Bmp => DynamicImage::ImageRgb8(dynamic.to_rgb8()),
        _ => dynamic,
    };
    encoded.save_with_format(path, format.to_image_format())?;
    Ok(())
}

/// Removes everything inside `dir` but keeps the directory itself.
pub fn clean_directory(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ServiceError::io(dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| ServiceError::io(dir, e))?;
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| ServiceError::io(&path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_key_only_touches_matching_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide.png");
        let mut img = RgbaImage::from_pixel(4, 2, Rgba([0, 255, 0, 255]));
        img.put_pixel(1, 1, Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();

        color_to_transparent(&path, Rgb(0, 255, 0)).unwrap();

        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.get_pixel(0, 0)[3], 0);
        assert_eq!(*back.get_pixel(1, 1), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn clean_directory_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.png"), b"y").unwrap();

        clean_directory(dir.path()).unwrap();

        assert!(dir.path().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        clean_directory(&dir.path().join("missing")).unwrap();
    }
}
