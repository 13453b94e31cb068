//! Image exporters
//!
//! Writes a [`GreyImage`] as 8-bit greyscale, choosing the encoder from the
//! file extension.

use std::path::{Path, PathBuf};

use crate::decoders::image_extension;
use crate::error::EqualizeError;
use crate::models::GreyImage;

/// Encode `image` to `path` as PGM, PNG or TIFF.
pub fn save_grey_image<P: AsRef<Path>>(image: &GreyImage, path: P) -> Result<(), EqualizeError> {
    let path = path.as_ref();
    image_extension(path)?;

    let buffer = image::GrayImage::from_raw(image.width(), image.height(), image.pixels().to_vec())
        .ok_or_else(|| {
            EqualizeError::invalid_input(format!(
                "{}x{} image does not match its {} pixels",
                image.width(),
                image.height(),
                image.pixels().len()
            ))
        })?;

    buffer.save(path).map_err(|source| EqualizeError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

/// `<stem>_equalized.<ext>` next to `input`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pgm".to_string());
    input.with_file_name(format!("{}_equalized.{}", stem, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::load_grey_image;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn gradient(width: u32, height: u32) -> GreyImage {
        let pixels = (0..width * height).map(|i| (i % 256) as u8).collect();
        GreyImage::new(width, height, pixels).unwrap()
    }

    // ========================================================================
    // save_grey_image Tests
    // ========================================================================

    #[test]
    fn test_save_formats_reload_identically() {
        let dir = tempdir().unwrap();
        let image = gradient(17, 5);

        for name in ["out.pgm", "out.png", "out.tiff"] {
            let path = dir.path().join(name);
            save_grey_image(&image, &path).unwrap();
            assert!(path.exists(), "{} not written", name);
            assert_eq!(load_grey_image(&path).unwrap(), image, "{}", name);
        }
    }

    #[test]
    fn test_save_rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let err = save_grey_image(&gradient(2, 2), dir.path().join("out.bmp")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_save_into_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.png");
        let err = save_grey_image(&gradient(2, 2), path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    // ========================================================================
    // default_output_path Tests
    // ========================================================================

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("images/test.pgm")),
            PathBuf::from("images/test_equalized.pgm")
        );
        assert_eq!(
            default_output_path(Path::new("scan")),
            PathBuf::from("scan_equalized.pgm")
        );
    }
}
