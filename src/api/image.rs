//! Loading and shrinking survey photos before they are sent
//!
//! A photo is referenced either by an inline base64 `blob`, a `data:` URI or
//! a local file path.

use std::io::Cursor;

use base64::Engine as _;
use futures::{StreamExt as _, TryStreamExt as _};
use image::{GenericImageView as _, imageops::FilterType};
use tracing::{debug, trace};

use super::Error;
use crate::model::SectionImage;

/// Longest edge of an image sent for content generation.
pub const MAX_EDGE: u32 = 1024;
pub const JPEG_QUALITY: u8 = 70;
/// Images compressed at the same time.
pub const CONCURRENCY: usize = 4;

#[derive(derive_debug::Dbg, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub file_name: String,
    pub mime_type: String,
    #[dbg(skip)]
    pub body: Vec<u8>,
}

/// Read the bytes at `src`, which is a `data:` URI or a local path.
pub async fn load(src: &str) -> Result<Vec<u8>, Error> {
    if let Ok(data) = data_url::DataUrl::process(src) {
        let (body, _) = data.decode_to_vec().map_err(|error| Error::Io {
            error: std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string()),
            path: src.chars().take(32).collect(),
        })?;
        return Ok(body);
    }
    let path = src.strip_prefix("file://").unwrap_or(src);
    tokio::fs::read(path).await.map_err(|error| Error::Io {
        error,
        path: path.to_owned(),
    })
}

/// Bytes of a section image: the inline blob when present, else its path.
pub async fn load_section_image(image: &SectionImage) -> Result<Vec<u8>, Error> {
    if image.blob.is_empty() {
        return load(&image.path).await;
    }
    base64::engine::general_purpose::STANDARD
        .decode(&image.blob)
        .map_err(|error| Error::Io {
            error: std::io::Error::new(std::io::ErrorKind::InvalidData, error),
            path: image.name.clone(),
        })
}

/// Fit within [`MAX_EDGE`] and re-encode as JPEG.
pub fn compress(name: &str, body: &[u8]) -> Result<Vec<u8>, Error> {
    let image_error = |error| Error::Image {
        error,
        name: name.to_owned(),
    };
    let img = image::load_from_memory(body).map_err(image_error)?;
    let (width, height) = img.dimensions();
    let img = if width > MAX_EDGE || height > MAX_EDGE {
        img.resize(MAX_EDGE, MAX_EDGE, FilterType::Triangle)
    } else {
        img
    };
    let mut out = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(image_error)?;
    trace!(name, width, height, bytes = out.get_ref().len(), "image compressed");
    Ok(out.into_inner())
}

fn jpeg_name(name: &str) -> String {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    format!("{stem}.jpg")
}

/// Load and compress `images`, keeping their order.
pub async fn compress_all(images: &[SectionImage]) -> Result<Vec<EncodedImage>, Error> {
    let encoded = futures::stream::iter(images)
        .map(|image| async move {
            let body = load_section_image(image).await?;
            let body = compress(&image.name, &body)?;
            Ok::<_, Error>(EncodedImage {
                file_name: jpeg_name(&image.name),
                mime_type: mime::IMAGE_JPEG.to_string(),
                body,
            })
        })
        .buffered(CONCURRENCY)
        .try_collect::<Vec<_>>()
        .await?;
    debug!(count = encoded.len(), "images prepared for generation");
    Ok(encoded)
}
