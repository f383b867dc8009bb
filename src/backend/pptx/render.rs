//! Rasterizes slides straight from the package XML.
//!
//! Covers what service decks use: solid backgrounds, solid-filled
//! rectangles, plain text frames and embedded pictures. Theme colors,
//! gradients and effects are not interpreted.

use fontdue::{Font, FontSettings};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::package::{Package, REL_SLIDE_LAYOUT, REL_SLIDE_MASTER, resolve_target};
use super::xml::Element;
use crate::backend::{ExportFlags, Rgb};
use crate::error::Result;

const EMU_PER_POINT: f32 = 12_700.0;
const DEFAULT_FONT_SIZE: f32 = 18.0;
const INSET_X: f32 = 91_440.0;
const INSET_Y: f32 = 45_720.0;

const FALLBACK_FONTS: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Loads the configured font, or the first system fallback that parses.
pub fn load_font(configured: Option<&Path>) -> Option<Arc<Font>> {
    let candidates = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(FALLBACK_FONTS.iter().map(PathBuf::from));
    for path in candidates {
        let Ok(data) = std::fs::read(&path) else {
            continue;
        };
        match Font::from_bytes(data, FontSettings::default()) {
            Ok(font) => {
                debug!(path = %path.display(), "loaded render font");
                return Some(Arc::new(font));
            }
            Err(e) => warn!(path = %path.display(), error = e, "font did not parse"),
        }
    }
    warn!("no usable font found; text will not be rendered");
    None
}

#[derive(Clone, Default)]
pub struct RenderOptions {
    /// Output width in pixels; height follows the slide aspect ratio.
    pub width: u32,
    pub font: Option<Arc<Font>>,
}

/// Maps EMU coordinates of a shape tree onto pixels.
#[derive(Debug, Clone, Copy)]
struct Transform {
    dx: f32,
    dy: f32,
    sx: f32,
    sy: f32,
}

impl Transform {
    fn x(&self, emu: f32) -> f32 {
        self.dx + emu * self.sx
    }

    fn y(&self, emu: f32) -> f32 {
        self.dy + emu * self.sy
    }

    /// Enters a group whose children use `ch_off`/`ch_ext` coordinates.
    fn group(&self, frame: Frame, ch_off: (f32, f32), ch_ext: (f32, f32)) -> Transform {
        let kx = if ch_ext.0 > 0.0 { frame.cx / ch_ext.0 } else { 1.0 };
        let ky = if ch_ext.1 > 0.0 { frame.cy / ch_ext.1 } else { 1.0 };
        Transform {
            dx: self.x(frame.x - ch_off.0 * kx),
            dy: self.y(frame.y - ch_off.1 * ky),
            sx: self.sx * kx,
            sy: self.sy * ky,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    x: f32,
    y: f32,
    cx: f32,
    cy: f32,
}

fn num(el: &Element, key: &str) -> f32 {
    el.attr(key).and_then(|v| v.parse::<f32>().ok()).unwrap_or(0.0)
}

fn frame_of(xfrm: &Element) -> Option<Frame> {
    let off = xfrm.child("a:off")?;
    let ext = xfrm.child("a:ext")?;
    Some(Frame {
        x: num(off, "x"),
        y: num(off, "y"),
        cx: num(ext, "cx"),
        cy: num(ext, "cy"),
    })
}

fn solid_color(fill_parent: &Element) -> Option<Rgb> {
    fill_parent
        .path(&["a:solidFill", "a:srgbClr"])
        .and_then(|c| c.attr("val"))
        .and_then(Rgb::from_hex)
}

fn placeholder(shape: &Element) -> Option<(&str, Option<&str>)> {
    let nv = shape.elements().find(|e| e.name.starts_with("p:nv"))?;
    let ph = nv.path(&["p:nvPr", "p:ph"])?;
    Some((ph.attr("type").unwrap_or("body"), ph.attr("idx")))
}

fn sp_tree(root: &Element) -> Option<&Element> {
    root.path(&["p:cSld", "p:spTree"])
}

/// Slide plus the layout and master it inherits from.
struct Inheritance {
    slide: Element,
    layout: Option<Element>,
    master: Option<Element>,
}

impl Inheritance {
    fn load(package: &Package, slide_part: &str) -> Result<Self> {
        let slide = package.parse(slide_part)?;
        let layout_part = package.related_part(slide_part, REL_SLIDE_LAYOUT)?;
        let (layout, master) = match layout_part {
            Some(layout_part) => {
                let master_part = package.related_part(&layout_part, REL_SLIDE_MASTER)?;
                let master = match master_part {
                    Some(part) => Some(package.parse(&part)?),
                    None => None,
                };
                (Some(package.parse(&layout_part)?), master)
            }
            None => (None, None),
        };
        Ok(Self {
            slide,
            layout,
            master,
        })
    }

    fn chain(&self) -> impl Iterator<Item = &Element> {
        std::iter::once(&self.slide)
            .chain(self.layout.iter())
            .chain(self.master.iter())
    }

    fn background(&self) -> Rgb {
        self.chain()
            .find_map(|root| {
                root.path(&["p:cSld", "p:bg", "p:bgPr"])
                    .and_then(solid_color)
            })
            .unwrap_or(Rgb::WHITE)
    }

    /// Position of a placeholder without its own transform.
    fn inherited_frame(&self, kind: &str, idx: Option<&str>) -> Option<Frame> {
        let parents = self.layout.iter().chain(self.master.iter());
        for root in parents {
            let Some(tree) = sp_tree(root) else { continue };
            let found = tree.elements().find(|shape| match placeholder(shape) {
                Some((t, i)) => match idx {
                    Some(idx) if i == Some(idx) => true,
                    _ => t == kind,
                },
                None => false,
            });
            if let Some(frame) = found
                .and_then(|s| s.path(&["p:spPr", "a:xfrm"]))
                .and_then(frame_of)
            {
                return Some(frame);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Text,
    Picture,
    Other,
}

fn shape_kind(shape: &Element) -> ShapeKind {
    match shape.name.as_str() {
        "p:pic" => ShapeKind::Picture,
        "p:sp" => {
            let has_text = shape
                .child("p:txBody")
                .map(|body| !body.text().trim().is_empty())
                .unwrap_or(false);
            if has_text {
                ShapeKind::Text
            } else {
                ShapeKind::Other
            }
        }
        _ => ShapeKind::Other,
    }
}

struct Painter<'a> {
    package: &'a Package,
    slide_part: &'a str,
    inheritance: &'a Inheritance,
    font: Option<&'a Font>,
}

impl Painter<'_> {
    fn frame(&self, shape: &Element, props: &str) -> Option<Frame> {
        if let Some(frame) = shape.path(&[props, "a:xfrm"]).and_then(frame_of) {
            return Some(frame);
        }
        let (kind, idx) = placeholder(shape)?;
        self.inheritance.inherited_frame(kind, idx)
    }

    fn draw_tree(&self, canvas: &mut RgbaImage, tree: &Element, t: Transform) -> Result<()> {
        for shape in tree.elements() {
            self.draw_shape(canvas, shape, t)?;
        }
        Ok(())
    }

    fn draw_shape(&self, canvas: &mut RgbaImage, shape: &Element, t: Transform) -> Result<()> {
        match shape.name.as_str() {
            "p:sp" => {
                let Some(frame) = self.frame(shape, "p:spPr") else {
                    return Ok(());
                };
                if let Some(color) = shape.child("p:spPr").and_then(solid_color) {
                    fill_rect(canvas, t, frame, color);
                }
                if let Some(body) = shape.child("p:txBody") {
                    self.draw_text(canvas, body, t, frame);
                }
            }
            "p:pic" => {
                let Some(frame) = self.frame(shape, "p:spPr") else {
                    return Ok(());
                };
                self.draw_picture(canvas, shape, t, frame)?;
            }
            "p:grpSp" => {
                let Some(xfrm) = shape.path(&["p:grpSpPr", "a:xfrm"]) else {
                    return self.draw_tree(canvas, shape, t);
                };
                let frame = frame_of(xfrm).unwrap_or_default();
                let ch_off = xfrm
                    .child("a:chOff")
                    .map(|e| (num(e, "x"), num(e, "y")))
                    .unwrap_or((frame.x, frame.y));
                let ch_ext = xfrm
                    .child("a:chExt")
                    .map(|e| (num(e, "cx"), num(e, "cy")))
                    .unwrap_or((frame.cx, frame.cy));
                self.draw_tree(canvas, shape, t.group(frame, ch_off, ch_ext))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn draw_picture(
        &self,
        canvas: &mut RgbaImage,
        shape: &Element,
        t: Transform,
        frame: Frame,
    ) -> Result<()> {
        let Some(embed) = shape
            .path(&["p:blipFill", "a:blip"])
            .and_then(|b| b.attr("r:embed"))
        else {
            return Ok(());
        };
        let rels = self.package.relationships(self.slide_part)?;
        let Some(rel) = rels.get(embed).filter(|r| !r.external) else {
            return Ok(());
        };
        let part = resolve_target(self.slide_part, &rel.target);
        let Some(data) = self.package.get(&part) else {
            warn!(part = %part, "picture part is missing");
            return Ok(());
        };
        let picture = match image::load_from_memory(data) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                warn!(part = %part, error = %e, "picture could not be decoded");
                return Ok(());
            }
        };

        let w = (frame.cx * t.sx).round().max(1.0) as u32;
        let h = (frame.cy * t.sy).round().max(1.0) as u32;
        let scaled = imageops::resize(&picture, w, h, FilterType::Triangle);
        imageops::overlay(
            canvas,
            &scaled,
            t.x(frame.x).round() as i64,
            t.y(frame.y).round() as i64,
        );
        Ok(())
    }

    fn draw_text(&self, canvas: &mut RgbaImage, body: &Element, t: Transform, frame: Frame) {
        let Some(font) = self.font else { return };
        let left = t.x(frame.x + INSET_X);
        let right = t.x(frame.x + frame.cx - INSET_X);
        let bottom = t.y(frame.y + frame.cy);
        let mut y = t.y(frame.y + INSET_Y);

        for p in body.elements().filter(|e| e.name == "a:p") {
            let style = ParagraphStyle::of(p);
            let px = style.size_pt * EMU_PER_POINT * t.sy;
            let line_height = px * 1.2;
            let text = paragraph_plain_text(p);

            for line in wrap(font, &text, px, right - left) {
                if y > bottom {
                    return;
                }
                let width = line_width(font, &line, px);
                let x = match style.align {
                    Align::Left => left,
                    Align::Center => left + (right - left - width) / 2.0,
                    Align::Right => right - width,
                };
                draw_line(canvas, font, &line, px, x, y + px, style.color);
                y += line_height;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Align {
    Left,
    Center,
    Right,
}

struct ParagraphStyle {
    size_pt: f32,
    color: Rgb,
    align: Align,
}

impl ParagraphStyle {
    fn of(p: &Element) -> Self {
        let run_props = p
            .elements()
            .find_map(|r| r.child("a:rPr"))
            .or_else(|| p.child("a:endParaRPr"));
        let size_pt = run_props
            .and_then(|rp| rp.attr("sz"))
            .and_then(|sz| sz.parse::<f32>().ok())
            .map(|sz| sz / 100.0)
            .unwrap_or(DEFAULT_FONT_SIZE);
        let color = run_props.and_then(solid_color).unwrap_or(Rgb::BLACK);
        let align = match p.child("a:pPr").and_then(|pp| pp.attr("algn")) {
            Some("ctr") => Align::Center,
            Some("r") => Align::Right,
            _ => Align::Left,
        };
        Self {
            size_pt,
            color,
            align,
        }
    }
}

fn paragraph_plain_text(p: &Element) -> String {
    let mut out = String::new();
    for child in p.elements() {
        match child.name.as_str() {
            "a:r" | "a:fld" => {
                if let Some(t) = child.child("a:t") {
                    out.push_str(&t.text());
                }
            }
            "a:br" => out.push('\n'),
            _ => {}
        }
    }
    out
}

fn line_width(font: &Font, line: &str, px: f32) -> f32 {
    line.chars().map(|ch| font.metrics(ch, px).advance_width).sum()
}

/// Greedy word wrap; explicit breaks always start a new line.
fn wrap(font: &Font, text: &str, px: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for hard in text.split('\n') {
        let mut current = String::new();
        for word in hard.split(' ') {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if !current.is_empty() && line_width(font, &candidate, px) > max_width {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    lines
}

fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgb, coverage: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let Rgb(r, g, b) = color;
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    let a = coverage.clamp(0.0, 1.0);
    let da = dst[3] as f32 / 255.0;
    let out_a = a + da * (1.0 - a);
    if out_a <= 0.0 {
        return;
    }
    let mix = |src: u8, dst: u8| {
        ((src as f32 * a + dst as f32 * da * (1.0 - a)) / out_a).round() as u8
    };
    *dst = Rgba([
        mix(r, dst[0]),
        mix(g, dst[1]),
        mix(b, dst[2]),
        (out_a * 255.0).round() as u8,
    ]);
}

fn draw_line(canvas: &mut RgbaImage, font: &Font, line: &str, px: f32, x: f32, baseline: f32, color: Rgb) {
    let mut pen = x;
    for ch in line.chars() {
        let (metrics, bitmap) = font.rasterize(ch, px);
        let gx0 = pen.round() as i64 + metrics.xmin as i64;
        let gy0 = baseline.round() as i64 - (metrics.height as i64 + metrics.ymin as i64);
        for gy in 0..metrics.height {
            for gx in 0..metrics.width {
                let coverage = bitmap[gy * metrics.width + gx];
                if coverage > 0 {
                    blend(
                        canvas,
                        gx0 + gx as i64,
                        gy0 + gy as i64,
                        color,
                        coverage as f32 / 255.0,
                    );
                }
            }
        }
        pen += metrics.advance_width;
    }
}

fn fill_rect(canvas: &mut RgbaImage, t: Transform, frame: Frame, color: Rgb) {
    let x0 = t.x(frame.x).round().max(0.0) as u32;
    let y0 = t.y(frame.y).round().max(0.0) as u32;
    let x1 = (t.x(frame.x + frame.cx).round().max(0.0) as u32).min(canvas.width());
    let y1 = (t.y(frame.y + frame.cy).round().max(0.0) as u32).min(canvas.height());
    let Rgb(r, g, b) = color;
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }
}

/// Pixel dimensions and the slide-to-pixel transform.
fn canvas_geometry(slide_size: (i64, i64), width: u32) -> (u32, u32, Transform) {
    let (cx, cy) = slide_size;
    let width = width.max(1);
    let scale = width as f32 / cx.max(1) as f32;
    let height = ((cy as f32 * scale).round() as u32).max(1);
    let t = Transform {
        dx: 0.0,
        dy: 0.0,
        sx: scale,
        sy: scale,
    };
    (width, height, t)
}

/// Renders a whole slide.
pub fn render_slide(
    package: &Package,
    slide_part: &str,
    slide_size: (i64, i64),
    options: &RenderOptions,
    flags: ExportFlags,
) -> Result<RgbaImage> {
    let inheritance = Inheritance::load(package, slide_part)?;
    let (w, h, t) = canvas_geometry(slide_size, options.width);

    let mut canvas = if flags.contains(ExportFlags::SKIP_BACKGROUND) {
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]))
    } else {
        let Rgb(r, g, b) = inheritance.background();
        RgbaImage::from_pixel(w, h, Rgba([r, g, b, 255]))
    };

    if !flags.contains(ExportFlags::SKIP_SHAPES) {
        let painter = Painter {
            package,
            slide_part,
            inheritance: &inheritance,
            font: options.font.as_deref(),
        };
        if let Some(tree) = sp_tree(&inheritance.slide) {
            painter.draw_tree(&mut canvas, tree, t)?;
        }
    }
    Ok(canvas)
}

/// Renders each qualifying top-level shape on its own transparent canvas.
pub fn render_shapes(
    package: &Package,
    slide_part: &str,
    slide_size: (i64, i64),
    options: &RenderOptions,
    flags: ExportFlags,
) -> Result<Vec<RgbaImage>> {
    let inheritance = Inheritance::load(package, slide_part)?;
    let (w, h, t) = canvas_geometry(slide_size, options.width);
    let painter = Painter {
        package,
        slide_part,
        inheritance: &inheritance,
        font: options.font.as_deref(),
    };

    let mut images = Vec::new();
    let Some(tree) = sp_tree(&inheritance.slide) else {
        return Ok(images);
    };
    for shape in tree.elements() {
        let wanted = match shape_kind(shape) {
            ShapeKind::Text => flags.wants_text_shapes(),
            ShapeKind::Picture => flags.wants_picture_shapes(),
            ShapeKind::Other => false,
        };
        if !wanted {
            continue;
        }
        let mut canvas = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));
        painter.draw_shape(&mut canvas, shape, t)?;
        images.push(canvas);
    }
    Ok(images)
}
