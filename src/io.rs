use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use crate::stream::PixelStream;

/// Default cap on how many bytes of a file are read as raw pixel data (100 MiB).
pub const DEFAULT_MAX_RAW_BYTES: u64 = 100 * 1024 * 1024;

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for image and raw imports
#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Decode(String),
    /// The source produced no pixels.
    Empty,
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(e) => write!(f, "I/O error: {}", e),
            ImportError::Decode(e) => write!(f, "Decode error: {}", e),
            ImportError::Empty => write!(f, "No pixel data"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<std::io::Error> for ImportError {
    fn from(e: std::io::Error) -> Self {
        ImportError::Io(e)
    }
}

impl From<image::ImageError> for ImportError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => ImportError::Io(io),
            other => ImportError::Decode(other.to_string()),
        }
    }
}

/// Error type for image export
#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Encode(String),
    /// Nothing to write: the canvas has a zero dimension.
    EmptyCanvas,
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "I/O error: {}", e),
            ExportError::Encode(e) => write!(f, "Encode error: {}", e),
            ExportError::EmptyCanvas => write!(f, "Canvas is empty"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<image::ImageError> for ExportError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => ExportError::Io(io),
            other => ExportError::Encode(other.to_string()),
        }
    }
}

/// Error type for .glp project file operations
#[derive(Debug)]
pub enum ProjectError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for ProjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectError::Io(e) => write!(f, "I/O error: {}", e),
            ProjectError::Serialize(e) => write!(f, "Serialization error: {}", e),
            ProjectError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for ProjectError {}

impl From<std::io::Error> for ProjectError {
    fn from(e: std::io::Error) -> Self {
        ProjectError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for ProjectError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        ProjectError::Serialize(e.to_string())
    }
}

// ============================================================================
// IMAGE IMPORT
// ============================================================================

/// A decoded image as packed ARGB pixels, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub pixels: Vec<u32>,
}

/// Decode any format the `image` crate can read.
pub fn decode_image(path: &Path) -> Result<DecodedImage, ImportError> {
    let img = image::open(path)?;
    from_dynamic(&img)
}

fn from_dynamic(img: &DynamicImage) -> Result<DecodedImage, ImportError> {
    let has_alpha = img.color().has_alpha();
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(ImportError::Empty);
    }
    let pixels = rgba
        .pixels()
        .map(|p| {
            let [r, g, b, a] = p.0;
            u32::from_be_bytes([a, r, g, b])
        })
        .collect();
    Ok(DecodedImage {
        width,
        height,
        has_alpha,
        pixels,
    })
}

// ============================================================================
// RAW IMPORT
// ============================================================================

/// Pack arbitrary bytes into pixels: `(a, r, g, b)` groups when `alpha`,
/// otherwise `(r, g, b)` groups with alpha forced to 0xFF. A trailing partial
/// group is dropped.
pub fn raw_to_pixels(bytes: &[u8], alpha: bool) -> Vec<u32> {
    if alpha {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    } else {
        bytes
            .chunks_exact(3)
            .map(|c| u32::from_be_bytes([0xFF, c[0], c[1], c[2]]))
            .collect()
    }
}

/// Read at most `max_bytes` of any file and pack them as pixels.
pub fn read_raw(path: &Path, alpha: bool, max_bytes: u64) -> Result<Vec<u32>, ImportError> {
    let file = File::open(path)?;
    let mut bytes = Vec::new();
    BufReader::new(file).take(max_bytes).read_to_end(&mut bytes)?;
    let pixels = raw_to_pixels(&bytes, alpha);
    if pixels.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(pixels)
}

/// File name component used as a stream or project title.
pub fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// EXPORT
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
    Webp,
    Tga,
    Tiff,
    Gif,
    Ico,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Bmp => "bmp",
            ExportFormat::Webp => "webp",
            ExportFormat::Tga => "tga",
            ExportFormat::Tiff => "tiff",
            ExportFormat::Gif => "gif",
            ExportFormat::Ico => "ico",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            "bmp" => Some(ExportFormat::Bmp),
            "webp" => Some(ExportFormat::Webp),
            "tga" => Some(ExportFormat::Tga),
            "tif" | "tiff" => Some(ExportFormat::Tiff),
            "gif" => Some(ExportFormat::Gif),
            "ico" => Some(ExportFormat::Ico),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Formats written without an alpha channel.
    pub fn drops_alpha(&self) -> bool {
        matches!(self, ExportFormat::Jpeg | ExportFormat::Bmp)
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            ExportFormat::Png => ImageFormat::Png,
            ExportFormat::Jpeg => ImageFormat::Jpeg,
            ExportFormat::Bmp => ImageFormat::Bmp,
            ExportFormat::Webp => ImageFormat::WebP,
            ExportFormat::Tga => ImageFormat::Tga,
            ExportFormat::Tiff => ImageFormat::Tiff,
            ExportFormat::Gif => ImageFormat::Gif,
            ExportFormat::Ico => ImageFormat::Ico,
        }
    }
}

/// `path` with the format's extension appended unless it already ends in one
/// that maps to `format`.
pub fn with_export_extension(path: &Path, format: ExportFormat) -> PathBuf {
    if ExportFormat::from_path(path) == Some(format) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}

/// Encode `image` and write it. Returns the path actually written.
pub fn export_image(image: &RgbaImage, path: &Path, format: ExportFormat) -> Result<PathBuf, ExportError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ExportError::EmptyCanvas);
    }
    let path = with_export_extension(path, format);
    let mut writer = BufWriter::new(File::create(&path)?);

    if format.drops_alpha() {
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        rgb.write_to(&mut writer, format.image_format())?;
    } else {
        image.write_to(&mut writer, format.image_format())?;
    }
    Ok(path)
}

// ============================================================================
// GLP PROJECT FILE FORMAT
// ============================================================================

/// Magic header for .glp project files
const GLP_MAGIC: &str = "GLP1";

/// Maximum canvas dimension per axis accepted from a project file.
const MAX_CANVAS_DIM: u32 = 1 << 16;
/// Maximum number of streams in a project file.
const MAX_STREAMS: usize = 256;

/// Everything a .glp file holds. The undo stack is not part of it.
#[derive(Serialize, Deserialize)]
pub struct ProjectFile {
    magic: String,
    pub width: u32,
    pub height: u32,
    pub render_type: u32,
    /// Action log, newest first.
    pub actions: Vec<String>,
    pub streams: Vec<PixelStream>,
}

impl ProjectFile {
    pub fn new(
        width: u32,
        height: u32,
        render_type: u32,
        actions: Vec<String>,
        streams: Vec<PixelStream>,
    ) -> Self {
        Self {
            magic: GLP_MAGIC.to_string(),
            width,
            height,
            render_type,
            actions,
            streams,
        }
    }
}

pub fn save_project(project: &ProjectFile, path: &Path) -> Result<(), ProjectError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, project)?;
    Ok(())
}

pub fn load_project(path: &Path) -> Result<ProjectFile, ProjectError> {
    let raw = std::fs::read(path)?;
    parse_project(&raw)
}

fn parse_project(raw: &[u8]) -> Result<ProjectFile, ProjectError> {
    if raw.len() < 12 {
        return Err(ProjectError::InvalidFormat("File too small".into()));
    }

    // bincode encodes a String as an 8-byte length prefix + UTF-8 data,
    // so bytes 8..12 hold the 4-char magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != GLP_MAGIC {
        return Err(ProjectError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let mut project: ProjectFile = bincode::deserialize(raw)?;

    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(ProjectError::InvalidFormat(format!(
            "Canvas size {}x{} exceeds maximum allowed {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if project.streams.len() > MAX_STREAMS {
        return Err(ProjectError::InvalidFormat(format!(
            "Project contains {} streams, which exceeds the maximum of {}",
            project.streams.len(),
            MAX_STREAMS
        )));
    }
    if project.render_type > 3 {
        return Err(ProjectError::InvalidFormat(format!(
            "Unknown render type {}",
            project.render_type
        )));
    }
    for stream in &mut project.streams {
        stream.check_loaded().map_err(ProjectError::InvalidFormat)?;
    }
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("glitchy_io_{}_{}", std::process::id(), name))
    }

    #[test]
    fn raw_bytes_group_with_and_without_alpha() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        assert_eq!(raw_to_pixels(&bytes, true), vec![0x01020304]);
        assert_eq!(raw_to_pixels(&bytes, false), vec![0xFF010203, 0xFF040506]);
    }

    #[test]
    fn read_raw_honours_byte_cap() {
        let path = temp_path("cap.bin");
        std::fs::write(&path, [0xAAu8; 30]).unwrap();
        let pixels = read_raw(&path, false, 9).unwrap();
        assert_eq!(pixels, vec![0xFFAAAAAA; 3]);

        std::fs::write(&path, [0u8; 2]).unwrap();
        assert!(matches!(read_raw(&path, false, 100), Err(ImportError::Empty)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = decode_image(&temp_path("does_not_exist.png")).unwrap_err();
        assert!(matches!(err, ImportError::Io(_)), "{}", err);
    }

    #[test]
    fn export_appends_extension_and_roundtrips_png() {
        let img = RgbaImage::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6, 7, 255]).unwrap();
        let base = temp_path("export_out");
        let written = export_image(&img, &base, ExportFormat::Png).unwrap();
        assert_eq!(written.extension().and_then(|e| e.to_str()), Some("png"));

        let decoded = decode_image(&written).unwrap();
        assert!(decoded.has_alpha);
        assert_eq!(decoded.pixels, vec![0x04010203, 0xFF050607]);
        let _ = std::fs::remove_file(&written);
    }

    #[test]
    fn jpeg_export_drops_alpha() {
        let img = RgbaImage::from_pixel(4, 4, image::Rgba([200, 100, 50, 10]));
        let written = export_image(&img, &temp_path("flat.jpeg"), ExportFormat::Jpeg).unwrap();
        assert!(written.to_string_lossy().ends_with("flat.jpeg"));
        let decoded = decode_image(&written).unwrap();
        assert!(!decoded.has_alpha);
        assert!(decoded.pixels.iter().all(|p| p >> 24 == 0xFF));
        let _ = std::fs::remove_file(&written);
    }

    #[test]
    fn extension_is_appended_when_format_differs() {
        let p = with_export_extension(Path::new("out.png"), ExportFormat::Bmp);
        assert_eq!(p, PathBuf::from("out.png.bmp"));
        let p = with_export_extension(Path::new("out.JPEG"), ExportFormat::Jpeg);
        assert_eq!(p, PathBuf::from("out.JPEG"));
    }

    #[test]
    fn project_file_rejects_bad_magic() {
        assert!(matches!(parse_project(&[0; 4]), Err(ProjectError::InvalidFormat(_))));

        let mut bogus = ProjectFile::new(1, 1, 0, vec![], vec![]);
        bogus.magic = "PFE1".into();
        let bytes = bincode::serialize(&bogus).unwrap();
        assert!(matches!(parse_project(&bytes), Err(ProjectError::InvalidFormat(_))));
    }

    #[test]
    fn project_file_rejects_unknown_render_type() {
        let project = ProjectFile::new(1, 1, 7, vec![], vec![]);
        let bytes = bincode::serialize(&project).unwrap();
        assert!(matches!(parse_project(&bytes), Err(ProjectError::InvalidFormat(_))));
    }

    #[test]
    fn project_file_roundtrip_keeps_streams() {
        let mut stream = PixelStream::from_raw("noise.bin", vec![1, 2, 3, 4], true);
        stream.pos = -3;
        stream.set_pixel(0, 9);
        let project = ProjectFile::new(2, 2, 3, vec!["b".into(), "a".into()], vec![stream]);

        let path = temp_path("roundtrip.glp");
        save_project(&project, &path).unwrap();
        let loaded = load_project(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!((loaded.width, loaded.height, loaded.render_type), (2, 2, 3));
        assert_eq!(loaded.actions, vec!["b", "a"]);
        let s = &loaded.streams[0];
        assert_eq!(s.title, "noise.bin");
        assert_eq!(s.pos, -3);
        assert_eq!(s.pixels(), &[9, 2, 3, 4]);
        assert_eq!(s.original_pixels(), &[1, 2, 3, 4]);
        assert!(s.is_rendered());
    }
}
