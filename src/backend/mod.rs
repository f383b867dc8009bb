pub mod applescript;
pub mod com;
pub mod pptx;
pub mod raster;
pub mod script;

use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, BackendChoice};
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Edits the `.pptx` package directly.
    Pptx,
    /// Drives PowerPoint through its COM automation server.
    Com,
    /// Drives PowerPoint through the AppleScript bridge.
    AppleScript,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Pptx => "pptx",
            BackendKind::Com => "com",
            BackendKind::AppleScript => "applescript",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpg,
    Gif,
    Tif,
    Bmp,
}

impl ImageFormat {
    /// Case-folds and normalizes `jpeg` and `tiff` before matching.
    pub fn parse(image_type: &str) -> Result<Self> {
        match normalize_image_type(image_type).as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" => Ok(ImageFormat::Jpg),
            "gif" => Ok(ImageFormat::Gif),
            "tif" => Ok(ImageFormat::Tif),
            "bmp" => Ok(ImageFormat::Bmp),
            other => Err(ServiceError::UnsupportedFormat(format!(
                "image type `{}`",
                other
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Tif => "tif",
            ImageFormat::Bmp => "bmp",
        }
    }

    /// Shape exports keep an alpha channel, so only PNG and GIF qualify.
    pub fn supports_transparency(self) -> bool {
        matches!(self, ImageFormat::Png | ImageFormat::Gif)
    }

    pub fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpg => image::ImageFormat::Jpeg,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Tif => image::ImageFormat::Tiff,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

pub fn normalize_image_type(image_type: &str) -> String {
    let lower = image_type.trim().trim_start_matches('.').to_ascii_lowercase();
    match lower.as_str() {
        "jpeg" => "jpg".to_string(),
        "tiff" => "tif".to_string(),
        _ => lower,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ExportFlags: u32 {
        /// Empty the output directory before exporting.
        const CLEANUP_FILES = 1;
        /// Turn pixels of the given color transparent after a PNG slide export.
        const TRANSPARENT = 2;
        const SKIP_BACKGROUND = 4;
        const SKIP_SHAPES = 8;
        /// Shape export filter: text frames.
        const TEXT_SHAPES = 16;
        /// Shape export filter: pictures.
        const PICTURE_SHAPES = 32;
    }
}

impl ExportFlags {
    /// Unknown bits are dropped.
    pub fn from_value(value: u64) -> Self {
        ExportFlags::from_bits_truncate(value as u32)
    }

    pub fn wants_text_shapes(self) -> bool {
        self.contains(ExportFlags::TEXT_SHAPES) || !self.contains(ExportFlags::PICTURE_SHAPES)
    }

    pub fn wants_picture_shapes(self) -> bool {
        self.contains(ExportFlags::PICTURE_SHAPES) || !self.contains(ExportFlags::TEXT_SHAPES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const BLACK: Rgb = Rgb(0, 0, 0);

    /// Accepts `#rrggbb`, `#rgb`, `rgb(r, g, b)` and a handful of color names.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || ServiceError::Validation(format!("invalid color `{}`", s));

        if let Some(hex) = s.strip_prefix('#') {
            return match hex.len() {
                6 => {
                    let v = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
                    Ok(Rgb((v >> 16) as u8, (v >> 8) as u8, v as u8))
                }
                3 => {
                    let v = u16::from_str_radix(hex, 16).map_err(|_| invalid())?;
                    let expand = |n: u16| ((n & 0xf) as u8) * 17;
                    Ok(Rgb(expand(v >> 8), expand(v >> 4), expand(v)))
                }
                _ => Err(invalid()),
            };
        }

        let lower = s.to_ascii_lowercase();
        if let Some(body) = lower
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let parts: Vec<u8> = body
                .split(',')
                .map(|p| p.trim().parse::<u8>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| invalid())?;
            return match parts.as_slice() {
                [r, g, b] => Ok(Rgb(*r, *g, *b)),
                _ => Err(invalid()),
            };
        }

        match lower.as_str() {
            "white" => Ok(Rgb::WHITE),
            "black" => Ok(Rgb::BLACK),
            "red" => Ok(Rgb(255, 0, 0)),
            "green" => Ok(Rgb(0, 128, 0)),
            "lime" => Ok(Rgb(0, 255, 0)),
            "blue" => Ok(Rgb(0, 0, 255)),
            "yellow" => Ok(Rgb(255, 255, 0)),
            "magenta" | "fuchsia" => Ok(Rgb(255, 0, 255)),
            "cyan" | "aqua" => Ok(Rgb(0, 255, 255)),
            "gray" | "grey" => Ok(Rgb(128, 128, 128)),
            _ => Err(invalid()),
        }
    }

    /// Parses the `RRGGBB` form used by DrawingML `srgbClr` values.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 6 {
            return None;
        }
        let v = u32::from_str_radix(hex, 16).ok()?;
        Some(Rgb((v >> 16) as u8, (v >> 8) as u8, v as u8))
    }
}

/// `Slide007.png` style name; slide numbers are 1-based.
pub fn slide_file_name(index: usize, digits: usize, format: ImageFormat) -> String {
    format!(
        "Slide{:0width$}.{}",
        index + 1,
        format.extension(),
        width = digits
    )
}

/// Zero-padding width for a deck of `slide_count` slides.
pub fn slide_number_digits(slide_count: usize) -> usize {
    (slide_count + 1).to_string().len()
}

/// 演示文稿抽象接口
///
/// The required methods are the primitives each backend implements. The
/// provided methods build the slide-pattern operations on top of them so
/// every backend produces the same slide counts and text content.
#[async_trait]
pub trait Presentation: Send {
    fn kind(&self) -> BackendKind;

    fn is_open(&self) -> bool;

    async fn slide_count(&mut self) -> Result<usize>;

    /// Paragraph texts of every shape on the slide.
    async fn slide_texts(&mut self, index: usize) -> Result<Vec<String>>;

    /// Paragraph texts of the slide's notes page.
    async fn notes_texts(&mut self, index: usize) -> Result<Vec<String>>;

    async fn save(&mut self, path: &Path) -> Result<()>;

    /// Inserts all slides of `path` before position `at`; returns how many.
    async fn insert_file_slides(&mut self, path: &Path, at: usize) -> Result<usize>;

    /// Copies `sources` (indices before the call) once, in order, placing
    /// the copies at position `insert_at`. Returns the number of slides added.
    async fn duplicate_slides(&mut self, sources: &[usize], insert_at: usize) -> Result<usize>;

    /// Applies every `(find, replace)` pair to the text runs of `slides`.
    /// Returns the number of runs changed.
    async fn find_replace_texts(
        &mut self,
        slides: &[usize],
        pairs: &[(String, String)],
    ) -> Result<usize>;

    async fn render_slide(
        &mut self,
        index: usize,
        path: &Path,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<()>;

    /// Writes one image per qualifying shape as `<stem>_<k>.<ext>`.
    async fn render_shapes(
        &mut self,
        index: usize,
        dir: &Path,
        stem: &str,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<Vec<PathBuf>>;

    /// Releases the document. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    async fn find_replace_text(
        &mut self,
        slides: &[usize],
        find_text: &str,
        replace_text: &str,
    ) -> Result<usize> {
        if find_text.is_empty() {
            return Ok(0);
        }
        let pairs = [(find_text.to_string(), replace_text.to_string())];
        self.find_replace_texts(slides, &pairs).await
    }

    /// Inserts the slides of each file, starting at `at` (append when
    /// `None`). When `separators` is given, those slides are duplicated
    /// between consecutive files.
    async fn insert_slides(
        &mut self,
        sources: &[PathBuf],
        at: Option<usize>,
        separators: Option<&[usize]>,
    ) -> Result<usize> {
        let count = self.slide_count().await?;
        let mut pos = at.unwrap_or(count).min(count);
        let mut separators: Vec<usize> = separators.map(<[usize]>::to_vec).unwrap_or_default();
        let mut total = 0;

        for (i, source) in sources.iter().enumerate() {
            if !source.exists() {
                return Err(ServiceError::FileNotFound(source.clone()));
            }
            let added = self.insert_file_slides(source, pos).await?;
            shift_indices(&mut separators, pos, added);
            pos += added;
            total += added;

            if !separators.is_empty() && i + 1 < sources.len() {
                let added = self.duplicate_slides(&separators, pos).await?;
                shift_indices(&mut separators, pos, added);
                pos += added;
                total += added;
            }
        }

        debug!(files = sources.len(), slides = total, "inserted slides");
        Ok(total)
    }

    /// With a repeat range, the first contiguous block of `repeat_indices`
    /// is copied once per extra replacement text, contiguously after itself,
    /// and copy `k` receives `replace_texts[k]`. Without one, text `i` goes
    /// to `slide_indices[i]` and no slides are added.
    async fn duplicate_slide_with_text(
        &mut self,
        slide_indices: &[usize],
        repeat_indices: Option<&[usize]>,
        find_text: &str,
        replace_texts: &[String],
    ) -> Result<usize> {
        if replace_texts.is_empty() {
            return Ok(0);
        }

        let block = repeat_indices.and_then(first_block);
        let Some((start, end)) = block else {
            for (i, text) in replace_texts.iter().enumerate() {
                match slide_indices.get(i) {
                    Some(&slide) => {
                        self.find_replace_text(&[slide], find_text, text).await?;
                    }
                    None => {
                        warn!(
                            texts = replace_texts.len(),
                            slides = slide_indices.len(),
                            "more replacement texts than slides; extra texts ignored"
                        );
                        break;
                    }
                }
            }
            return Ok(0);
        };

        if let (Some(lo), Some(hi)) = (slide_indices.iter().min(), slide_indices.iter().max()) {
            if start < *lo || end > *hi {
                return Err(ServiceError::InvalidRange(format!(
                    "repeat block {}..={} lies outside slide range {}..={}",
                    start, end, lo, hi
                )));
            }
        }

        let size = end - start + 1;
        let block: Vec<usize> = (start..=end).collect();
        let mut added = 0;
        for k in 1..replace_texts.len() {
            added += self.duplicate_slides(&block, start + k * size).await?;
        }

        for (k, text) in replace_texts.iter().enumerate() {
            let copy: Vec<usize> = (start + k * size..start + (k + 1) * size).collect();
            self.find_replace_text(&copy, find_text, text).await?;
        }

        Ok(added)
    }

    async fn export_slides(
        &mut self,
        slides: &[usize],
        out_dir: &Path,
        format: ImageFormat,
        flags: ExportFlags,
        background_color: Option<Rgb>,
    ) -> Result<Vec<PathBuf>> {
        prepare_output_dir(out_dir, flags)?;
        let count = self.slide_count().await?;
        let digits = slide_number_digits(count);
        let mut written = Vec::with_capacity(slides.len());

        for &index in slides {
            if index >= count {
                return Err(ServiceError::InvalidRange(format!(
                    "slide {} is out of range (0..{})",
                    index, count
                )));
            }
            let path = out_dir.join(slide_file_name(index, digits, format));
            self.render_slide(index, &path, format, flags).await?;

            if flags.contains(ExportFlags::TRANSPARENT) && format == ImageFormat::Png {
                if let Some(color) = background_color {
                    raster::color_to_transparent(&path, color)?;
                }
            }
            written.push(path);
        }

        info!(count = written.len(), dir = %out_dir.display(), "exported slides");
        Ok(written)
    }

    async fn export_shapes(
        &mut self,
        slides: &[usize],
        out_dir: &Path,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<Vec<PathBuf>> {
        if !format.supports_transparency() {
            return Err(ServiceError::UnsupportedFormat(format!(
                "shape export as `{}`",
                format.extension()
            )));
        }
        prepare_output_dir(out_dir, flags)?;
        let count = self.slide_count().await?;
        let digits = slide_number_digits(count);
        let mut written = Vec::new();

        for &index in slides {
            if index >= count {
                return Err(ServiceError::InvalidRange(format!(
                    "slide {} is out of range (0..{})",
                    index, count
                )));
            }
            let stem = format!("Slide{:0width$}", index + 1, width = digits);
            let files = self
                .render_shapes(index, out_dir, &stem, format, flags)
                .await?;
            written.extend(files);
        }

        info!(count = written.len(), dir = %out_dir.display(), "exported shapes");
        Ok(written)
    }
}

/// Shifts every index at or after `pos` by `added`.
fn shift_indices(indices: &mut [usize], pos: usize, added: usize) {
    for index in indices.iter_mut() {
        if *index >= pos {
            *index = index.saturating_add(added);
        }
    }
}

/// First contiguous run of ascending indices, as an inclusive pair.
pub fn first_block(indices: &[usize]) -> Option<(usize, usize)> {
    let (&start, rest) = indices.split_first()?;
    let mut end = start;
    for &n in rest {
        if end.checked_add(1) != Some(n) {
            break;
        }
        end = n;
    }
    Some((start, end))
}

fn prepare_output_dir(dir: &Path, flags: ExportFlags) -> Result<()> {
    if flags.contains(ExportFlags::CLEANUP_FILES) {
        raster::clean_directory(dir)?;
    }
    std::fs::create_dir_all(dir).map_err(|e| ServiceError::io(dir, e))
}

/// 后端工厂接口
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn open(&self, path: &Path) -> Result<Box<dyn Presentation>>;

    async fn new_presentation(&self) -> Result<Box<dyn Presentation>>;
}

/// Availability of each backend on this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub pptx: bool,
    pub com: bool,
    pub applescript: bool,
}

impl ProbeReport {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Pptx => self.pptx,
            BackendKind::Com => self.com,
            BackendKind::AppleScript => self.applescript,
        }
    }

    pub fn available(&self) -> Vec<BackendKind> {
        [BackendKind::Pptx, BackendKind::Com, BackendKind::AppleScript]
            .into_iter()
            .filter(|k| self.is_available(*k))
            .collect()
    }
}

pub async fn probe() -> ProbeReport {
    let report = ProbeReport {
        pptx: true,
        com: com::is_available().await,
        applescript: applescript::is_available().await,
    };
    debug!(?report, "probed presentation backends");
    report
}

/// Picks the backend once per process: direct file manipulation first, then
/// native automation, then the scripting bridge.
pub fn select_backend(
    choice: BackendChoice,
    report: &ProbeReport,
    config: &AppConfig,
) -> Result<Arc<dyn Backend>> {
    let kind = match choice {
        BackendChoice::Auto => [BackendKind::Pptx, BackendKind::Com, BackendKind::AppleScript]
            .into_iter()
            .find(|k| report.is_available(*k))
            .ok_or_else(|| {
                ServiceError::BackendUnavailable(
                    "neither direct .pptx editing nor PowerPoint automation is available".into(),
                )
            })?,
        BackendChoice::Pptx => BackendKind::Pptx,
        BackendChoice::Com => BackendKind::Com,
        BackendChoice::AppleScript => BackendKind::AppleScript,
    };

    if !report.is_available(kind) {
        return Err(ServiceError::BackendUnavailable(format!(
            "backend `{}` is not available on this system",
            kind
        )));
    }

    info!(backend = %kind, "selected presentation backend");
    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Pptx => Arc::new(pptx::PptxBackend::from_config(config)),
        BackendKind::Com => Arc::new(com::ComBackend::new(config)),
        BackendKind::AppleScript => Arc::new(applescript::AppleScriptBackend::new(config)),
    };
    Ok(backend)
}
