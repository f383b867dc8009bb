//! OPC package handling: zip parts, relationships and content types.

use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::xml::{self, Element};
use crate::error::{Result, ServiceError};

pub const CONTENT_TYPES: &str = "[Content_Types].xml";

pub const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_SLIDE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
pub const REL_SLIDE_LAYOUT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout";
pub const REL_SLIDE_MASTER: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster";
pub const REL_NOTES_SLIDE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/notesSlide";
pub const REL_NOTES_MASTER: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/notesMaster";

pub const CT_SLIDE: &str = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";
pub const CT_NOTES_SLIDE: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.notesSlide+xml";

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    /// Package-relative name without the leading slash.
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Package {
    parts: Vec<Part>,
}

impl Package {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().trim_start_matches('/').to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| ServiceError::xml(&name, e))?;
            parts.push(Part { name, data });
        }
        let package = Self { parts };
        if !package.contains(CONTENT_TYPES) {
            return Err(ServiceError::xml(CONTENT_TYPES, "missing from package"));
        }
        Ok(package)
    }

    /// Serializes the package; `[Content_Types].xml` always comes first.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let ordered = self
            .parts
            .iter()
            .filter(|p| p.name == CONTENT_TYPES)
            .chain(self.parts.iter().filter(|p| p.name != CONTENT_TYPES));
        for part in ordered {
            writer.start_file(part.name.as_str(), options)?;
            writer
                .write_all(&part.data)
                .map_err(|e| ServiceError::xml(&part.name, e))?;
        }
        Ok(writer.finish()?.into_inner())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parts.iter().any(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    pub fn require(&self, name: &str) -> Result<&[u8]> {
        self.get(name)
            .ok_or_else(|| ServiceError::xml(name, "part is missing"))
    }

    pub fn set(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|p| p.name == name) {
            Some(part) => part.data = data,
            None => self.parts.push(Part {
                name: name.to_string(),
                data,
            }),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.parts.retain(|p| p.name != name);
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    pub fn parse(&self, name: &str) -> Result<Element> {
        xml::parse(name, self.require(name)?)
    }

    pub fn relationships(&self, part: &str) -> Result<Relationships> {
        match self.get(&rels_path(part)) {
            Some(data) => Relationships::parse(&rels_path(part), data),
            None => Ok(Relationships::default()),
        }
    }

    pub fn set_relationships(&mut self, part: &str, rels: &Relationships) {
        self.set(&rels_path(part), rels.to_xml().into_bytes());
    }

    /// First free name of the form `<prefix><n><suffix>`, e.g. `ppt/slides/slide7.xml`.
    pub fn next_part_name(&self, prefix: &str, suffix: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{}{}{}", prefix, n, suffix);
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Target of the first relationship of `rel_type` from `part`, resolved.
    pub fn related_part(&self, part: &str, rel_type: &str) -> Result<Option<String>> {
        let rels = self.relationships(part)?;
        Ok(rels
            .by_type(rel_type)
            .find(|r| !r.external)
            .map(|r| resolve_target(part, &r.target)))
    }

    /// The main presentation part named by the package relationships.
    pub fn main_part(&self) -> Result<String> {
        let rels = self.relationships("")?;
        rels.by_type(REL_OFFICE_DOCUMENT)
            .next()
            .map(|r| resolve_target("", &r.target))
            .ok_or_else(|| ServiceError::xml("_rels/.rels", "no officeDocument relationship"))
    }
}

/// `ppt/slides/slide1.xml` -> `ppt/slides/_rels/slide1.xml.rels`; `""` is the package.
pub fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None if part.is_empty() => "_rels/.rels".to_string(),
        None => format!("_rels/{}.rels", part),
    }
}

fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolves a relationship target relative to the source part's directory.
pub fn resolve_target(source: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = part_dir(source)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Relative reference from `source` to `target`, both package-relative.
pub fn relative_target(source: &str, target: &str) -> String {
    let from: Vec<&str> = part_dir(source).split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count()
        .min(to.len().saturating_sub(1));
    let mut out: Vec<&str> = std::iter::repeat("..").take(from.len() - common).collect();
    out.extend(&to[common..]);
    out.join("/")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relationships {
    pub items: Vec<Relationship>,
}

impl Relationships {
    pub fn parse(part: &str, data: &[u8]) -> Result<Self> {
        let root = xml::parse(part, data)?;
        let items = root
            .elements()
            .filter(|e| e.local_name() == "Relationship")
            .map(|e| Relationship {
                id: e.attr("Id").unwrap_or_default().to_string(),
                rel_type: e.attr("Type").unwrap_or_default().to_string(),
                target: e.attr("Target").unwrap_or_default().to_string(),
                external: e.attr("TargetMode") == Some("External"),
            })
            .collect();
        Ok(Self { items })
    }

    pub fn to_xml(&self) -> String {
        let mut root = Element::new("Relationships").with_attr(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/relationships",
        );
        for rel in &self.items {
            let mut el = Element::new("Relationship")
                .with_attr("Id", &rel.id)
                .with_attr("Type", &rel.rel_type)
                .with_attr("Target", &rel.target);
            if rel.external {
                el.set_attr("TargetMode", "External");
            }
            root.push(el);
        }
        root.to_xml()
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.id == id)
    }

    pub fn by_type<'a>(&'a self, rel_type: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.items.iter().filter(move |r| r.rel_type == rel_type)
    }

    fn next_id(&self) -> String {
        let max = self
            .items
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("rId{}", max + 1)
    }

    /// Adds an internal relationship and returns its new id.
    pub fn add(&mut self, rel_type: &str, target: &str) -> String {
        let id = self.next_id();
        self.items.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            external: false,
        });
        id
    }

    pub fn remove_type(&mut self, rel_type: &str) {
        self.items.retain(|r| r.rel_type != rel_type);
    }
}

/// `[Content_Types].xml`.
#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    pub defaults: Vec<(String, String)>,
    pub overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub fn load(package: &Package) -> Result<Self> {
        let root = package.parse(CONTENT_TYPES)?;
        let mut types = Self::default();
        for el in root.elements() {
            match el.local_name() {
                "Default" => types.defaults.push((
                    el.attr("Extension").unwrap_or_default().to_ascii_lowercase(),
                    el.attr("ContentType").unwrap_or_default().to_string(),
                )),
                "Override" => types.overrides.push((
                    el.attr("PartName")
                        .unwrap_or_default()
                        .trim_start_matches('/')
                        .to_string(),
                    el.attr("ContentType").unwrap_or_default().to_string(),
                )),
                _ => {}
            }
        }
        Ok(types)
    }

    pub fn store(&self, package: &mut Package) {
        let mut root = Element::new("Types").with_attr(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/content-types",
        );
        for (ext, ct) in &self.defaults {
            root.push(
                Element::new("Default")
                    .with_attr("Extension", ext)
                    .with_attr("ContentType", ct),
            );
        }
        for (part, ct) in &self.overrides {
            root.push(
                Element::new("Override")
                    .with_attr("PartName", &format!("/{}", part))
                    .with_attr("ContentType", ct),
            );
        }
        package.set(CONTENT_TYPES, root.to_xml().into_bytes());
    }

    /// Content type of `part`: its override, else the default for its extension.
    pub fn content_type(&self, part: &str) -> Option<&str> {
        if let Some((_, ct)) = self.overrides.iter().find(|(p, _)| p == part) {
            return Some(ct);
        }
        let ext = part.rsplit_once('.')?.1.to_ascii_lowercase();
        self.defaults
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, ct)| ct.as_str())
    }

    pub fn has_default(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.defaults.iter().any(|(e, _)| *e == ext)
    }

    pub fn add_default(&mut self, ext: &str, content_type: &str) {
        if !self.has_default(ext) {
            self.defaults
                .push((ext.to_ascii_lowercase(), content_type.to_string()));
        }
    }

    pub fn add_override(&mut self, part: &str, content_type: &str) {
        match self.overrides.iter_mut().find(|(p, _)| p == part) {
            Some((_, ct)) => *ct = content_type.to_string(),
            None => self
                .overrides
                .push((part.to_string(), content_type.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_paths() {
        assert_eq!(rels_path("ppt/slides/slide1.xml"), "ppt/slides/_rels/slide1.xml.rels");
        assert_eq!(rels_path(""), "_rels/.rels");
    }

    #[test]
    fn resolve_and_relativize() {
        assert_eq!(
            resolve_target("ppt/slides/slide1.xml", "../slideLayouts/slideLayout2.xml"),
            "ppt/slideLayouts/slideLayout2.xml"
        );
        assert_eq!(resolve_target("", "ppt/presentation.xml"), "ppt/presentation.xml");
        assert_eq!(
            relative_target("ppt/slides/slide3.xml", "ppt/media/image1.png"),
            "../media/image1.png"
        );
        assert_eq!(
            relative_target("ppt/presentation.xml", "ppt/slides/slide3.xml"),
            "slides/slide3.xml"
        );
        assert_eq!(
            relative_target("ppt/slides/slide3.xml", "ppt/slides/slide4.xml"),
            "slide4.xml"
        );
    }

    #[test]
    fn relationship_ids_increase() {
        let mut rels = Relationships::default();
        assert_eq!(rels.add(REL_SLIDE, "slides/slide1.xml"), "rId1");
        assert_eq!(rels.add(REL_SLIDE, "slides/slide2.xml"), "rId2");
        let parsed = Relationships::parse("x.rels", rels.to_xml().as_bytes()).unwrap();
        assert_eq!(parsed, rels);
    }
}
