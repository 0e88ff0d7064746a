//! Document reassembly: one full-page image per PDF page, via lopdf.
//!
//! Each page's MediaBox equals the image's pixel size (one pixel per PDF
//! point) and the image is drawn at the origin filling the page, with no
//! margin, scaling or rotation. The page images are trusted as-is: no
//! colour conversion and no resizing.
//!
//! | Input | Embedded as |
//! |-------|-------------|
//! | JPEG  | original bytes, `/DCTDecode` |
//! | PNG   | decoded 8-bit samples, `/FlateDecode`, plus an `/SMask` when any pixel is translucent |
//!
//! PDF has no PNG filter, so PNG pixels are decoded and re-deflated; JPEG
//! streams are copied through untouched.

use crate::config::ImageType;
use crate::error::FlattenError;
use crate::output::OutputArtifact;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// XObject resource name used on every page.
const IMAGE_RESOURCE: &str = "Im0";

/// An image file read into memory, with its format already decided by extension.
struct SourceImage {
    path: PathBuf,
    image_type: ImageType,
    bytes: Vec<u8>,
}

/// An image ready to be added to the document.
struct EmbeddedImage {
    width: u32,
    height: u32,
    stream: Stream,
    smask: Option<Stream>,
}

/// Build a PDF with one page per image in `paths`, in order.
///
/// Every path must end in `.png`, `.jpg` or `.jpeg` (any case); the whole
/// list is checked before any file is read. With a `sink`, the PDF is
/// written there and [`OutputArtifact::File`] returned; otherwise the bytes
/// are returned.
pub async fn assemble(
    paths: &[PathBuf],
    sink: Option<&Path>,
) -> Result<OutputArtifact, FlattenError> {
    if paths.is_empty() {
        return Err(FlattenError::EmptyInputSet);
    }

    let kinds = paths
        .iter()
        .map(|p| {
            ImageType::from_path(p).ok_or_else(|| FlattenError::UnsupportedImageFormat {
                path: p.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut sources = Vec::with_capacity(paths.len());
    for (path, image_type) in paths.iter().zip(kinds) {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FlattenError::ImageDecode {
                path: path.clone(),
                detail: format!("read failed: {e}"),
            })?;
        sources.push(SourceImage {
            path: path.clone(),
            image_type,
            bytes,
        });
    }

    // Decoding and deflating is CPU-bound.
    let pdf = tokio::task::spawn_blocking(move || build_pdf(&sources))
        .await
        .map_err(|e| FlattenError::Internal(format!("Assemble task panicked: {}", e)))??;

    info!("Assembled {} pages ({} bytes)", paths.len(), pdf.len());

    match sink {
        Some(path) => {
            tokio::fs::write(path, &pdf)
                .await
                .map_err(|e| FlattenError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            Ok(OutputArtifact::File(path.to_path_buf()))
        }
        None => Ok(OutputArtifact::Bytes(pdf)),
    }
}

/// Assemble the document and serialise it.
fn build_pdf(images: &[SourceImage]) -> Result<Vec<u8>, FlattenError> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(images.len());
    for source in images {
        let embedded = match source.image_type {
            ImageType::Png => embed_png(&source.bytes, &source.path)?,
            ImageType::Jpg => embed_jpeg(&source.bytes, &source.path)?,
        };
        debug!(
            "Page {} ← {} ({}x{})",
            kids.len() + 1,
            source.path.display(),
            embedded.width,
            embedded.height
        );
        kids.push(Object::Reference(add_page(&mut doc, pages_id, embedded)?));
    }

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| FlattenError::PdfBuild(e.to_string()))?;
    Ok(output)
}

/// Add the image XObject, a content stream drawing it, and the page itself.
fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    image: EmbeddedImage,
) -> Result<ObjectId, FlattenError> {
    let width = i64::from(image.width);
    let height = i64::from(image.height);

    let mut stream = image.stream;
    if let Some(smask) = image.smask {
        let smask_id = doc.add_object(smask);
        stream.dict.set("SMask", Object::Reference(smask_id));
    }
    let image_id = doc.add_object(stream);

    // Scale the unit square to the full page: `w 0 0 h 0 0 cm /Im0 Do`.
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(height),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| FlattenError::PdfBuild(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content_bytes));

    let mut xobjects = Dictionary::new();
    xobjects.set(IMAGE_RESOURCE, Object::Reference(image_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut page = Dictionary::new();
    page.set("Type", Object::Name(b"Page".to_vec()));
    page.set("Parent", Object::Reference(pages_id));
    page.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ]),
    );
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Reference(content_id));

    Ok(doc.add_object(page))
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(i64::from(width)));
    dict.set("Height", Object::Integer(i64::from(height)));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    dict
}

/// Embed JPEG bytes unchanged; only the header is decoded for size and components.
fn embed_jpeg(bytes: &[u8], path: &Path) -> Result<EmbeddedImage, FlattenError> {
    let decoder = JpegDecoder::new(Cursor::new(bytes)).map_err(|e| FlattenError::ImageDecode {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let (width, height) = decoder.dimensions();
    let color_space = match decoder.original_color_type() {
        ExtendedColorType::L8 => "DeviceGray",
        ExtendedColorType::Cmyk8 => "DeviceCMYK",
        _ => "DeviceRGB",
    };

    Ok(EmbeddedImage {
        width,
        height,
        stream: Stream::new(image_dict(width, height, color_space, "DCTDecode"), bytes.to_vec()),
        smask: None,
    })
}

/// Decode a PNG to 8-bit samples and deflate them.
fn embed_png(bytes: &[u8], path: &Path) -> Result<EmbeddedImage, FlattenError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(|e| {
        FlattenError::ImageDecode {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }
    })?;
    let (width, height) = (img.width(), img.height());

    let gray = matches!(
        img.color(),
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16
    );
    let (samples, color_space) = if gray {
        (img.to_luma8().into_raw(), "DeviceGray")
    } else {
        (img.to_rgb8().into_raw(), "DeviceRGB")
    };

    let smask = match alpha_channel(&img) {
        Some(alpha) => Some(Stream::new(
            image_dict(width, height, "DeviceGray", "FlateDecode"),
            deflate(&alpha, path)?,
        )),
        None => None,
    };

    Ok(EmbeddedImage {
        width,
        height,
        stream: Stream::new(
            image_dict(width, height, color_space, "FlateDecode"),
            deflate(&samples, path)?,
        ),
        smask,
    })
}

/// The alpha samples, or `None` when the image is fully opaque.
fn alpha_channel(img: &DynamicImage) -> Option<Vec<u8>> {
    if !img.color().has_alpha() {
        return None;
    }
    let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
    if alpha.iter().all(|&a| a == u8::MAX) {
        None
    } else {
        Some(alpha)
    }
}

fn deflate(data: &[u8], path: &Path) -> Result<Vec<u8>, FlattenError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| FlattenError::PdfBuild(format!("deflate {}: {}", path.display(), e)))
}
