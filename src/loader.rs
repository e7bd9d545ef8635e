//! Image file loading and saving for the command-line front end
//!
//! Decoding and encoding run on tokio's blocking pool; `load_image`
//! resolves once the image is decoded and its dimensions are known.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Decode an image file into RGBA
pub async fn load_image(path: &Path) -> Result<RgbaImage> {
    let path: PathBuf = path.to_path_buf();
    let image = tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgba8())
            .with_context(|| format!("Failed to decode image {:?}", path))
    })
    .await
    .context("Image loading task failed")??;

    info!("Decoded image {}x{}", image.width(), image.height());
    Ok(image)
}

/// Encode an image to `path`; the format follows the file extension
pub async fn save_image(image: Arc<RgbaImage>, path: &Path) -> Result<()> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        image
            .save(&path)
            .with_context(|| format!("Failed to write image {:?}", path))?;
        info!("Wrote {}x{} image to {:?}", image.width(), image.height(), path);
        Ok(())
    })
    .await
    .context("Image saving task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("straighten-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_png_save_and_load() {
        let path = temp_path("roundtrip.png");
        let image = RgbaImage::from_fn(7, 5, |x, y| Rgba([x as u8 * 30, y as u8 * 40, 7, 200]));

        save_image(Arc::new(image.clone()), &path).await.unwrap();
        let loaded = load_image(&path).await.unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, image);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let path = temp_path("does-not-exist.png");
        assert!(load_image(&path).await.is_err());
    }
}
