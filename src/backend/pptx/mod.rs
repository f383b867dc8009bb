//! Direct `.pptx` backend: edits the Office Open XML package in memory.

pub mod package;
pub mod render;
pub mod slide;
pub mod template;
pub mod xml;

use async_trait::async_trait;
use fontdue::Font;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use self::package::{
    CT_NOTES_SLIDE, CT_SLIDE, ContentTypes, Package, REL_NOTES_MASTER, REL_NOTES_SLIDE, REL_SLIDE,
    REL_SLIDE_LAYOUT, REL_SLIDE_MASTER, Relationship, Relationships, relative_target,
    resolve_target,
};
use self::render::RenderOptions;
use self::xml::{Element, Node};
use crate::backend::{Backend, BackendKind, ExportFlags, ImageFormat, Presentation, raster};
use crate::config::AppConfig;
use crate::error::{Result, ServiceError};

const FIRST_SLIDE_ID: u32 = 256;

pub struct PptxBackend {
    width: u32,
    font_path: Option<PathBuf>,
    font: Arc<OnceLock<Option<Arc<Font>>>>,
}

impl PptxBackend {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            font_path: None,
            font: Arc::new(OnceLock::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            font_path: config.font_path.clone(),
            ..Self::new(config.export_width)
        }
    }

    fn fonts(&self) -> FontSlot {
        FontSlot {
            path: self.font_path.clone(),
            cell: Arc::clone(&self.font),
        }
    }
}

/// Lazily loaded render font, shared by every presentation of a backend.
#[derive(Clone)]
struct FontSlot {
    path: Option<PathBuf>,
    cell: Arc<OnceLock<Option<Arc<Font>>>>,
}

impl FontSlot {
    fn get(&self) -> Option<Arc<Font>> {
        self.cell
            .get_or_init(|| render::load_font(self.path.as_deref()))
            .clone()
    }
}

#[async_trait]
impl Backend for PptxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pptx
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn Presentation>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::io(path, e))?;
        let package = Package::from_bytes(&bytes)?;
        let presentation = PptxPresentation::load(package, self.width, self.fonts())?;
        info!(path = %path.display(), slides = presentation.slides.len(), "opened presentation");
        Ok(Box::new(presentation))
    }

    async fn new_presentation(&self) -> Result<Box<dyn Presentation>> {
        Ok(Box::new(self.blank()?))
    }
}

impl PptxBackend {
    /// A new presentation from the built-in blank template.
    pub fn blank(&self) -> Result<PptxPresentation> {
        PptxPresentation::load(template::blank_package(), self.width, self.fonts())
    }

    pub async fn open_pptx(&self, path: &Path) -> Result<PptxPresentation> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::io(path, e))?;
        PptxPresentation::load(Package::from_bytes(&bytes)?, self.width, self.fonts())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SlideRef {
    id: u32,
    rid: String,
    part: String,
}

pub struct PptxPresentation {
    package: Option<Package>,
    main: String,
    slides: Vec<SlideRef>,
    width: u32,
    fonts: FontSlot,
}

impl std::fmt::Debug for PptxPresentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PptxPresentation")
            .field("main", &self.main)
            .field("slides", &self.slides.len())
            .field("open", &self.package.is_some())
            .finish()
    }
}

impl PptxPresentation {
    fn load(package: Package, width: u32, fonts: FontSlot) -> Result<Self> {
        let main = package.main_part()?;
        let slides = read_slide_list(&package, &main)?;
        Ok(Self {
            package: Some(package),
            main,
            slides,
            width,
            fonts,
        })
    }

    fn package(&self) -> Result<&Package> {
        self.package.as_ref().ok_or(ServiceError::NoPresentation)
    }

    fn package_mut(&mut self) -> Result<&mut Package> {
        self.package.as_mut().ok_or(ServiceError::NoPresentation)
    }

    fn slide(&self, index: usize) -> Result<&SlideRef> {
        self.slides.get(index).ok_or_else(|| {
            ServiceError::InvalidRange(format!(
                "slide {} is out of range (0..{})",
                index,
                self.slides.len()
            ))
        })
    }

    fn next_slide_id(&self) -> u32 {
        self.slides
            .iter()
            .map(|s| s.id + 1)
            .max()
            .unwrap_or(FIRST_SLIDE_ID)
            .max(FIRST_SLIDE_ID)
    }

    fn slide_size(&self) -> Result<(i64, i64)> {
        let root = self.package()?.parse(&self.main)?;
        let size = root.child("p:sldSz");
        let dim = |key: &str| {
            size.and_then(|s| s.attr(key))
                .and_then(|v| v.parse::<i64>().ok())
        };
        Ok((
            dim("cx").unwrap_or(template::SLIDE_WIDTH),
            dim("cy").unwrap_or(template::SLIDE_HEIGHT),
        ))
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            width: self.width,
            font: self.fonts.get(),
        }
    }

    /// Rewrites `p:sldIdLst` from `self.slides`.
    fn write_slide_list(&mut self) -> Result<()> {
        let main = self.main.clone();
        let entries: Vec<Element> = self
            .slides
            .iter()
            .map(|s| {
                Element::new("p:sldId")
                    .with_attr("id", &s.id.to_string())
                    .with_attr("r:id", &s.rid)
            })
            .collect();

        let package = self.package_mut()?;
        let mut root = package.parse(&main)?;
        if entries.is_empty() {
            root.children
                .retain(|n| !matches!(n, Node::Element(e) if e.name == "p:sldIdLst"));
            package.set(&main, root.to_xml().into_bytes());
            return Ok(());
        }
        if root.child("p:sldIdLst").is_none() {
            let pos = root
                .children
                .iter()
                .rposition(|n| {
                    matches!(n, Node::Element(e)
                        if e.name == "p:sldMasterIdLst" || e.name == "p:notesMasterIdLst")
                })
                .map(|i| i + 1)
                .unwrap_or(0);
            root.children
                .insert(pos, Node::Element(Element::new("p:sldIdLst")));
        }
        if let Some(list) = root.child_mut("p:sldIdLst") {
            list.children = entries.into_iter().map(Node::Element).collect();
        }
        package.set(&main, root.to_xml().into_bytes());
        Ok(())
    }

    /// Registers a new slide part with the presentation; returns its ref.
    fn register_slide(
        &self,
        part: &str,
        types: &mut ContentTypes,
        pres_rels: &mut Relationships,
        next_id: &mut u32,
    ) -> SlideRef {
        types.add_override(part, CT_SLIDE);
        let rid = pres_rels.add(REL_SLIDE, &relative_target(&self.main, part));
        let id = *next_id;
        *next_id += 1;
        SlideRef {
            id,
            rid,
            part: part.to_string(),
        }
    }

    /// Appends a slide with one text box per entry and an optional notes page.
    pub fn add_text_slide(&mut self, texts: &[&str], notes: Option<&str>) -> Result<usize> {
        let main = self.main.clone();
        let mut next_id = self.next_slide_id();
        let package = self.package()?;
        let layout = blank_layout(package, &main)?;
        let notes_master = package.related_part(&main, REL_NOTES_MASTER)?;
        let mut types = ContentTypes::load(package)?;
        let mut pres_rels = package.relationships(&main)?;

        let package = self.package_mut()?;
        let part = package.next_part_name("ppt/slides/slide", ".xml");
        package.set(&part, template::text_slide_xml(texts).into_bytes());
        let mut rels = Relationships::default();
        if let Some(layout) = &layout {
            rels.add(REL_SLIDE_LAYOUT, &relative_target(&part, layout));
        }

        if let (Some(notes), Some(master)) = (notes, notes_master) {
            let notes_part = package.next_part_name("ppt/notesSlides/notesSlide", ".xml");
            package.set(&notes_part, template::notes_slide_xml(notes).into_bytes());
            let mut notes_rels = Relationships::default();
            notes_rels.add(REL_NOTES_MASTER, &relative_target(&notes_part, &master));
            notes_rels.add(REL_SLIDE, &relative_target(&notes_part, &part));
            package.set_relationships(&notes_part, &notes_rels);
            types.add_override(&notes_part, CT_NOTES_SLIDE);
            rels.add(REL_NOTES_SLIDE, &relative_target(&part, &notes_part));
        }
        package.set_relationships(&part, &rels);

        let slide = self.register_slide(&part, &mut types, &mut pres_rels, &mut next_id);
        self.slides.push(slide);
        let package = self.package_mut()?;
        types.store(package);
        package.set_relationships(&main, &pres_rels);
        self.write_slide_list()?;
        Ok(self.slides.len() - 1)
    }

    fn notes_part(&self, index: usize) -> Result<Option<String>> {
        let slide = self.slide(index)?;
        self.package()?.related_part(&slide.part, REL_NOTES_SLIDE)
    }
}

/// Reads the ordered slide list from `p:sldIdLst`.
fn read_slide_list(package: &Package, main: &str) -> Result<Vec<SlideRef>> {
    let root = package.parse(main)?;
    let rels = package.relationships(main)?;
    let Some(list) = root.child("p:sldIdLst") else {
        return Ok(Vec::new());
    };
    list.elements()
        .filter(|e| e.name == "p:sldId")
        .map(|e| {
            let rid = e.attr("r:id").unwrap_or_default().to_string();
            let rel = rels
                .get(&rid)
                .ok_or_else(|| ServiceError::xml(main, format!("dangling slide reference {}", rid)))?;
            let id = e
                .attr("id")
                .and_then(|v| v.parse::<u32>().ok())
                .ok_or_else(|| ServiceError::xml(main, "slide id is not a number"))?;
            Ok(SlideRef {
                id,
                rid,
                part: resolve_target(main, &rel.target),
            })
        })
        .collect()
}

/// Layouts of every master, keyed by their `cSld` name, in master order.
fn layouts(package: &Package, main: &str) -> Result<Vec<(Option<String>, String)>> {
    let mut found = Vec::new();
    let main_rels = package.relationships(main)?;
    for master in main_rels.by_type(REL_SLIDE_MASTER) {
        let master_part = resolve_target(main, &master.target);
        let master_rels = package.relationships(&master_part)?;
        for layout in master_rels.by_type(REL_SLIDE_LAYOUT) {
            let layout_part = resolve_target(&master_part, &layout.target);
            let name = match package.get(&layout_part) {
                Some(data) => {
                    let root = xml::parse(&layout_part, data)?;
                    slide::common_slide_name(&root).map(str::to_string)
                }
                None => continue,
            };
            found.push((name, layout_part));
        }
    }
    Ok(found)
}

fn blank_layout(package: &Package, main: &str) -> Result<Option<String>> {
    let all = layouts(package, main)?;
    let blank = all
        .iter()
        .find(|(name, _)| name.as_deref() == Some("Blank"))
        .or_else(|| all.first())
        .map(|(_, part)| part.clone());
    Ok(blank)
}

/// `ppt/media/image12.png` -> (`ppt/media/image`, `.png`).
fn split_part_name(name: &str) -> (String, String) {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.ends_with('/') => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    };
    let base = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    (base.to_string(), ext)
}

/// Copies parts of another package, giving each a fresh name once.
struct PartCopier<'a> {
    src: &'a Package,
    src_types: ContentTypes,
    copied: HashMap<String, String>,
}

impl<'a> PartCopier<'a> {
    fn new(src: &'a Package) -> Result<Self> {
        Ok(Self {
            src,
            src_types: ContentTypes::load(src)?,
            copied: HashMap::new(),
        })
    }

    fn content_type(&self, part: &str) -> Option<String> {
        self.src_types.content_type(part).map(str::to_string)
    }

    /// Copies `src_part` and everything it references; returns the new name.
    fn copy(&mut self, dst: &mut Package, types: &mut ContentTypes, src_part: &str) -> Result<String> {
        if let Some(done) = self.copied.get(src_part) {
            return Ok(done.clone());
        }
        let data = self.src.require(src_part)?.to_vec();
        let (prefix, suffix) = split_part_name(src_part);
        let new_name = dst.next_part_name(&prefix, &suffix);
        dst.set(&new_name, data);
        self.copied.insert(src_part.to_string(), new_name.clone());

        if let Some(ct) = self.content_type(src_part) {
            let is_override = self.src_types.overrides.iter().any(|(p, _)| p == src_part);
            if is_override {
                types.add_override(&new_name, &ct);
            } else if let Some(ext) = suffix.strip_prefix('.') {
                types.add_default(ext, &ct);
            }
        }

        let rels = self.src.relationships(src_part)?;
        if !rels.items.is_empty() {
            let mut out = Relationships::default();
            for rel in &rels.items {
                if rel.external {
                    out.items.push(rel.clone());
                    continue;
                }
                let target = resolve_target(src_part, &rel.target);
                let copied = self.copy(dst, types, &target)?;
                out.items.push(Relationship {
                    target: relative_target(&new_name, &copied),
                    ..rel.clone()
                });
            }
            dst.set_relationships(&new_name, &out);
        }
        Ok(new_name)
    }
}

#[async_trait]
impl Presentation for PptxPresentation {
    fn kind(&self) -> BackendKind {
        BackendKind::Pptx
    }

    fn is_open(&self) -> bool {
        self.package.is_some()
    }

    async fn slide_count(&mut self) -> Result<usize> {
        self.package()?;
        Ok(self.slides.len())
    }

    async fn slide_texts(&mut self, index: usize) -> Result<Vec<String>> {
        let part = self.slide(index)?.part.clone();
        let root = self.package()?.parse(&part)?;
        Ok(slide::paragraph_texts(&root))
    }

    async fn notes_texts(&mut self, index: usize) -> Result<Vec<String>> {
        match self.notes_part(index)? {
            Some(part) => {
                let root = self.package()?.parse(&part)?;
                Ok(slide::notes_paragraphs(&root))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save(&mut self, path: &Path) -> Result<()> {
        let bytes = self.package()?.to_bytes()?;
        let target = path.to_path_buf();
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir).map_err(|e| ServiceError::io(&dir, e))?;
            let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| ServiceError::io(&dir, e))?;
            tmp.write_all(&bytes)
                .map_err(|e| ServiceError::io(tmp.path(), e))?;
            tmp.persist(&target)
                .map_err(|e| ServiceError::io(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| ServiceError::Backend(format!("save task failed: {}", e)))??;

        info!(path = %path.display(), slides = self.slides.len(), "saved presentation");
        Ok(())
    }

    async fn insert_file_slides(&mut self, path: &Path, at: usize) -> Result<usize> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::io(path, e))?;
        let src = Package::from_bytes(&bytes)?;
        let src_main = src.main_part()?;
        let src_slides = read_slide_list(&src, &src_main)?;

        let main = self.main.clone();
        let mut next_id = self.next_slide_id();
        let dst_layouts = layouts(self.package()?, &main)?;
        let fallback_layout = dst_layouts.first().map(|(_, p)| p.clone());
        let notes_master = self.package()?.related_part(&main, REL_NOTES_MASTER)?;
        let mut types = ContentTypes::load(self.package()?)?;
        let mut pres_rels = self.package()?.relationships(&main)?;
        let mut copier = PartCopier::new(&src)?;
        let mut added = Vec::with_capacity(src_slides.len());

        for src_slide in &src_slides {
            let dst = self.package_mut()?;
            let part = dst.next_part_name("ppt/slides/slide", ".xml");
            dst.set(&part, src.require(&src_slide.part)?.to_vec());

            let mut rels = Relationships::default();
            for rel in &src.relationships(&src_slide.part)?.items {
                if rel.external {
                    rels.items.push(rel.clone());
                    continue;
                }
                let src_target = resolve_target(&src_slide.part, &rel.target);
                let new_target = match rel.rel_type.as_str() {
                    REL_SLIDE_LAYOUT => {
                        let name = src
                            .get(&src_target)
                            .map(|data| xml::parse(&src_target, data))
                            .transpose()?
                            .and_then(|root| slide::common_slide_name(&root).map(str::to_string));
                        dst_layouts
                            .iter()
                            .find(|(n, _)| n.is_some() && *n == name)
                            .map(|(_, p)| p.clone())
                            .or_else(|| fallback_layout.clone())
                    }
                    REL_NOTES_SLIDE => match &notes_master {
                        Some(master) => {
                            Some(copy_notes(dst, &mut types, &src, &src_target, &part, master, &mut copier)?)
                        }
                        None => None,
                    },
                    REL_SLIDE => {
                        debug!(target = %src_target, "dropping slide-to-slide link from inserted file");
                        None
                    }
                    _ => Some(copier.copy(dst, &mut types, &src_target)?),
                };
                if let Some(target) = new_target {
                    rels.items.push(Relationship {
                        target: relative_target(&part, &target),
                        ..rel.clone()
                    });
                }
            }
            dst.set_relationships(&part, &rels);
            added.push(self.register_slide(&part, &mut types, &mut pres_rels, &mut next_id));
        }

        let count = added.len();
        let at = at.min(self.slides.len());
        self.slides.splice(at..at, added);
        let package = self.package_mut()?;
        types.store(package);
        package.set_relationships(&main, &pres_rels);
        self.write_slide_list()?;
        debug!(path = %path.display(), at, count, "inserted file slides");
        Ok(count)
    }

    async fn duplicate_slides(&mut self, sources: &[usize], insert_at: usize) -> Result<usize> {
        let src_parts: Vec<String> = sources
            .iter()
            .map(|&i| self.slide(i).map(|s| s.part.clone()))
            .collect::<Result<_>>()?;

        let main = self.main.clone();
        let mut next_id = self.next_slide_id();
        let mut types = ContentTypes::load(self.package()?)?;
        let mut pres_rels = self.package()?.relationships(&main)?;
        let mut added = Vec::with_capacity(src_parts.len());

        for src_part in &src_parts {
            let package = self.package_mut()?;
            let part = package.next_part_name("ppt/slides/slide", ".xml");
            let data = package.require(src_part)?.to_vec();
            package.set(&part, data);

            let mut rels = package.relationships(src_part)?;
            let notes = rels
                .by_type(REL_NOTES_SLIDE)
                .find(|r| !r.external)
                .map(|r| resolve_target(src_part, &r.target));
            rels.remove_type(REL_NOTES_SLIDE);

            if let Some(src_notes) = notes {
                let notes_part = package.next_part_name("ppt/notesSlides/notesSlide", ".xml");
                let data = package.require(&src_notes)?.to_vec();
                package.set(&notes_part, data);
                let mut notes_rels = package.relationships(&src_notes)?;
                for rel in notes_rels.items.iter_mut() {
                    if rel.rel_type == REL_SLIDE {
                        rel.target = relative_target(&notes_part, &part);
                    }
                }
                package.set_relationships(&notes_part, &notes_rels);
                types.add_override(&notes_part, CT_NOTES_SLIDE);
                rels.add(REL_NOTES_SLIDE, &relative_target(&part, &notes_part));
            }
            package.set_relationships(&part, &rels);
            added.push(self.register_slide(&part, &mut types, &mut pres_rels, &mut next_id));
        }

        let count = added.len();
        let at = insert_at.min(self.slides.len());
        self.slides.splice(at..at, added);
        let package = self.package_mut()?;
        types.store(package);
        package.set_relationships(&main, &pres_rels);
        self.write_slide_list()?;
        Ok(count)
    }

    async fn find_replace_texts(
        &mut self,
        slides: &[usize],
        pairs: &[(String, String)],
    ) -> Result<usize> {
        let mut changed = 0;
        for &index in slides {
            let part = self.slide(index)?.part.clone();
            let package = self.package_mut()?;
            let mut root = package.parse(&part)?;
            let n = slide::replace_texts(&mut root, pairs);
            if n > 0 {
                package.set(&part, root.to_xml().into_bytes());
                changed += n;
            }
        }
        Ok(changed)
    }

    async fn render_slide(
        &mut self,
        index: usize,
        path: &Path,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<()> {
        let part = self.slide(index)?.part.clone();
        let size = self.slide_size()?;
        let options = self.render_options();
        let img = render::render_slide(self.package()?, &part, size, &options, flags)?;
        raster::save_image(img, path, format)
    }

    async fn render_shapes(
        &mut self,
        index: usize,
        dir: &Path,
        stem: &str,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<Vec<PathBuf>> {
        let part = self.slide(index)?.part.clone();
        let size = self.slide_size()?;
        let options = self.render_options();
        let images = render::render_shapes(self.package()?, &part, size, &options, flags)?;
        let mut written = Vec::with_capacity(images.len());
        for (k, img) in images.into_iter().enumerate() {
            let path = dir.join(format!("{}_{}.{}", stem, k + 1, format.extension()));
            raster::save_image(img, &path, format)?;
            written.push(path);
        }
        if written.is_empty() {
            warn!(slide = index, "no shapes matched the export filter");
        }
        Ok(written)
    }

    async fn close(&mut self) -> Result<()> {
        if self.package.take().is_some() {
            debug!("closed presentation");
        }
        self.slides.clear();
        Ok(())
    }
}

/// Copies a notes page for an inserted slide, pointing it at `slide_part`
/// and the destination notes master. Returns the new notes part.
fn copy_notes(
    dst: &mut Package,
    types: &mut ContentTypes,
    src: &Package,
    src_notes: &str,
    slide_part: &str,
    master: &str,
    copier: &mut PartCopier<'_>,
) -> Result<String> {
    let part = dst.next_part_name("ppt/notesSlides/notesSlide", ".xml");
    dst.set(&part, src.require(src_notes)?.to_vec());

    let mut rels = Relationships::default();
    for rel in &src.relationships(src_notes)?.items {
        let target = match rel.rel_type.as_str() {
            _ if rel.external => {
                rels.items.push(rel.clone());
                continue;
            }
            REL_SLIDE => slide_part.to_string(),
            REL_NOTES_MASTER => master.to_string(),
            _ => copier.copy(dst, types, &resolve_target(src_notes, &rel.target))?,
        };
        rels.items.push(Relationship {
            target: relative_target(&part, &target),
            ..rel.clone()
        });
    }
    dst.set_relationships(&part, &rels);
    types.add_override(&part, CT_NOTES_SLIDE);
    Ok(part)
}
