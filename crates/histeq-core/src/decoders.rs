//! Image decoding
//!
//! Loads 8-bit single-channel PGM, PNG and TIFF files into a [`GreyImage`].

use std::path::Path;

use image::DynamicImage;

use crate::error::EqualizeError;
use crate::models::GreyImage;

/// File extensions the decoder accepts, lower-case.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pgm", "pnm", "png", "tif", "tiff"];

/// Lower-cased extension of `path`, if it names a supported format.
pub fn image_extension(path: &Path) -> Result<String, EqualizeError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| {
            EqualizeError::invalid_input(format!("{}: no file extension found", path.display()))
        })?;

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(EqualizeError::invalid_input(format!(
            "{}: unsupported file format '{}' (expected one of {})",
            path.display(),
            extension,
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }
    Ok(extension)
}

/// Decode an 8-bit greyscale image from a file path.
///
/// Colour images and other bit depths are rejected as invalid input rather
/// than converted.
pub fn load_grey_image<P: AsRef<Path>>(path: P) -> Result<GreyImage, EqualizeError> {
    let path = path.as_ref();
    image_extension(path)?;

    let decoded = image::open(path).map_err(|source| EqualizeError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    match decoded {
        DynamicImage::ImageLuma8(buffer) => {
            let (width, height) = buffer.dimensions();
            log::debug!("decoded {} ({}x{})", path.display(), width, height);
            GreyImage::new(width, height, buffer.into_raw())
        }
        other => Err(EqualizeError::invalid_input(format!(
            "{}: expected 8-bit greyscale, found {:?}",
            path.display(),
            other.color()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_loads_grey_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grey.png");
        image::GrayImage::from_raw(3, 2, vec![0, 10, 20, 30, 40, 250])
            .unwrap()
            .save(&path)
            .unwrap();

        let image = load_grey_image(&path).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.pixels(), &[0, 10, 20, 30, 40, 250]);
    }

    #[test]
    fn test_loads_binary_pgm() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.pgm");
        let mut bytes = b"P5\n2 2\n255\n".to_vec();
        bytes.extend_from_slice(&[10, 10, 200, 200]);
        std::fs::write(&path, bytes).unwrap();

        let image = load_grey_image(&path).unwrap();
        assert_eq!(image.pixels(), &[10, 10, 200, 200]);
    }

    #[test]
    fn test_rejects_colour_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("colour.png");
        image::RgbImage::new(2, 2).save(&path).unwrap();

        let err = load_grey_image(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("8-bit greyscale"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = load_grey_image(dir.path().join("absent.pgm")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_grey_image("photo.jpg").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("unsupported file format"));

        assert!(image_extension(Path::new("noext")).is_err());
        assert_eq!(image_extension(Path::new("A.TIFF")).unwrap(), "tiff");
    }
}
