use std::env;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use iris_contracts::messages::ImagePayload;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Subdirectory of the platform temp dir that holds thumbnails.
pub const THUMBNAIL_DIR_NAME: &str = "iris-vision";
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 400;

const THUMBNAIL_STEM_BYTES: usize = 20;
const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to read image {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("image could not be decoded: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image could not be encoded as {format}: {source}")]
    Encode {
        format: &'static str,
        source: image::ImageError,
    },
    #[error("failed to write thumbnail {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodedKind {
    Png,
    Jpeg,
}

impl EncodedKind {
    fn from_path(path: &Path) -> Self {
        match lowercase_extension(path).as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            _ => Self::Png,
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

/// Mime type implied by a file's extension: png and jpg/jpeg are recognised,
/// anything else is treated as png.
pub fn mime_for_path(path: &Path) -> &'static str {
    EncodedKind::from_path(path).mime_type()
}

fn thumbnail_extension(path: &Path) -> &'static str {
    match lowercase_extension(path).as_str() {
        "jpg" => "jpg",
        "jpeg" => "jpeg",
        _ => "png",
    }
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedImage {
    pub payload: ImagePayload,
    pub thumbnail_path: PathBuf,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTranscoder {
    thumbnail_dir: PathBuf,
    target_width: u32,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(
            env::temp_dir().join(THUMBNAIL_DIR_NAME),
            DEFAULT_THUMBNAIL_WIDTH,
        )
    }
}

impl ImageTranscoder {
    pub fn new(thumbnail_dir: impl Into<PathBuf>, target_width: u32) -> Self {
        Self {
            thumbnail_dir: thumbnail_dir.into(),
            target_width: target_width.max(1),
        }
    }

    pub fn thumbnail_dir(&self) -> &Path {
        &self.thumbnail_dir
    }

    pub fn target_width(&self) -> u32 {
        self.target_width
    }

    pub fn read_and_transcode(&self, path: &Path) -> Result<TranscodedImage, TranscodeError> {
        let bytes = fs::read(path).map_err(|source| TranscodeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.transcode(&bytes, path)
    }

    /// Decodes once, then produces both the inline payload and the thumbnail.
    /// `source_path` only drives the output format.
    pub fn transcode(
        &self,
        bytes: &[u8],
        source_path: &Path,
    ) -> Result<TranscodedImage, TranscodeError> {
        let image = image::load_from_memory(bytes).map_err(TranscodeError::Decode)?;
        let payload = encode_payload(&image, source_path)?;
        let (thumbnail_path, thumbnail_width, thumbnail_height) =
            self.write_thumbnail(&image, source_path)?;
        Ok(TranscodedImage {
            payload,
            thumbnail_path,
            thumbnail_width,
            thumbnail_height,
        })
    }

    pub fn normalize(
        &self,
        bytes: &[u8],
        source_path: &Path,
    ) -> Result<ImagePayload, TranscodeError> {
        let image = image::load_from_memory(bytes).map_err(TranscodeError::Decode)?;
        encode_payload(&image, source_path)
    }

    fn write_thumbnail(
        &self,
        image: &DynamicImage,
        source_path: &Path,
    ) -> Result<(PathBuf, u32, u32), TranscodeError> {
        if !self.thumbnail_dir.is_dir() {
            fs::create_dir_all(&self.thumbnail_dir).map_err(|source| TranscodeError::Write {
                path: self.thumbnail_dir.clone(),
                source,
            })?;
        }

        let (width, height) =
            thumbnail_dimensions(image.width(), image.height(), self.target_width);
        let resized = image.resize_exact(width, height, FilterType::Triangle);
        let bytes = encode_image(&resized, EncodedKind::from_path(source_path))?;

        let path = self.thumbnail_dir.join(format!(
            "{}-small.{}",
            random_thumbnail_stem(),
            thumbnail_extension(source_path)
        ));
        fs::write(&path, bytes).map_err(|source| TranscodeError::Write {
            path: path.clone(),
            source,
        })?;
        Ok((path, width, height))
    }
}

fn encode_payload(
    image: &DynamicImage,
    source_path: &Path,
) -> Result<ImagePayload, TranscodeError> {
    let kind = EncodedKind::from_path(source_path);
    let bytes = encode_image(image, kind)?;
    Ok(ImagePayload {
        mime_type: kind.mime_type().to_string(),
        base64_data: BASE64.encode(bytes),
    })
}

fn encode_image(image: &DynamicImage, kind: EncodedKind) -> Result<Vec<u8>, TranscodeError> {
    let mut bytes = Vec::new();
    let result = match kind {
        EncodedKind::Png => image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png),
        EncodedKind::Jpeg => JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
            .encode_image(&flatten_onto_white(image)),
    };
    result.map_err(|source| TranscodeError::Encode {
        format: kind.label(),
        source,
    })?;
    Ok(bytes)
}

/// JPEG has no alpha channel; transparent pixels become white.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

/// Width is capped at `target_width` and never upscaled; height keeps the
/// aspect ratio, rounded to the nearest pixel.
pub fn thumbnail_dimensions(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    let source_width = width.max(1);
    let out_width = target_width.min(source_width).max(1);
    let scaled = (u64::from(height) * u64::from(out_width) + u64::from(source_width) / 2)
        / u64::from(source_width);
    (out_width, scaled.clamp(1, u64::from(u32::MAX)) as u32)
}

fn random_thumbnail_stem() -> String {
    let mut bytes = [0u8; THUMBNAIL_STEM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
