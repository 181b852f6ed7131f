//! Image Test Fixture Generator

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Write a small gradient PNG; distinct seeds give distinct bytes
pub fn write_test_png(path: &Path, seed: u8) -> anyhow::Result<PathBuf> {
    let img = RgbImage::from_fn(48, 32, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(5).wrapping_add(seed),
            (y as u8).wrapping_mul(7),
            seed.wrapping_mul(31),
        ])
    });
    img.save(path)?;
    Ok(path.to_path_buf())
}

/// Write a PNG larger than the default standardization bound
pub fn write_large_png(path: &Path, width: u32, height: u32) -> anyhow::Result<PathBuf> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    img.save(path)?;
    Ok(path.to_path_buf())
}
