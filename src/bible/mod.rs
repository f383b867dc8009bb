//! Bible text lookup.
//!
//! Translations are read from `<dir>/<version>.json`:
//!
//! ```json
//! { "name": "English Standard Version",
//!   "books": [ { "name": "Genesis", "short_name": "Gen",
//!                "chapters": [ { "no": 1, "verses": [ { "no": 1, "text": "..." } ] } ] } ] }
//! ```
//!
//! A verse number may also be a span such as `"2-3"` for merged verses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};

/// One verse as used by slide placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    pub book: String,
    pub short_book: String,
    pub chapter: u32,
    pub no: String,
    pub text: String,
}

/// A parsed reference such as `John 3:16-4:2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseRef {
    pub book: String,
    pub chapter: u32,
    /// `None` selects the whole chapter.
    pub verse: Option<u32>,
    /// Inclusive end as `(chapter, verse)`.
    pub end: Option<(u32, u32)>,
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.book, self.chapter)?;
        if let Some(v) = self.verse {
            write!(f, ":{}", v)?;
        }
        match self.end {
            Some((c, v)) if c != self.chapter => write!(f, "-{}:{}", c, v),
            Some((_, v)) => write!(f, "-{}", v),
            None => Ok(()),
        }
    }
}

impl VerseRef {
    /// `Book C`, `Book C:V`, `Book C:V-V` or `Book C:V-C:V`. Book names
    /// may contain spaces and digits (`1 John 4:8`).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || ServiceError::Validation(format!("invalid Bible reference `{}`", text));

        let (book, location) = text.rsplit_once(char::is_whitespace).ok_or_else(invalid)?;
        let book = book.trim();
        if book.is_empty() {
            return Err(invalid());
        }
        let number = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid());

        let (start, end) = match location.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (location, None),
        };
        let (chapter, verse) = match start.split_once(':') {
            Some((c, v)) => (number(c)?, Some(number(v)?)),
            None => (number(start)?, None),
        };
        let end = match end {
            None => None,
            Some(end) => match end.split_once(':') {
                Some((c, v)) => Some((number(c)?, number(v)?)),
                None if verse.is_some() => Some((chapter, number(end)?)),
                None => return Err(invalid()),
            },
        };

        if let (Some(v), Some((c2, v2))) = (verse, end) {
            if (c2, v2) < (chapter, v) {
                return Err(invalid());
            }
        }

        Ok(Self {
            book: book.to_string(),
            chapter,
            verse,
            end,
        })
    }
}

/// Splits a comma-separated list; a part without `:` inherits the book and
/// chapter of the previous part (`John 3:16, 18` names `John 3:18`).
pub fn split_references(list: &str) -> Vec<String> {
    let mut book_chapter = String::new();
    let mut out = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.find(':') {
            Some(pos) => {
                book_chapter = part[..=pos].to_string();
                out.push(part.to_string());
            }
            None if !book_chapter.is_empty() && part.chars().all(|c| c.is_ascii_digit() || c == '-') => {
                out.push(format!("{}{}", book_chapter, part));
            }
            None => out.push(part.to_string()),
        }
    }
    out
}

/// 圣经数据源接口
pub trait BibleSource: Send + Sync {
    /// Verses for one reference in one translation.
    fn lookup(&self, reference: &str, version: &str) -> Result<Vec<Verse>>;

    fn versions(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawNo {
    Number(u32),
    Text(String),
}

impl RawNo {
    fn to_label(&self) -> String {
        match self {
            RawNo::Number(n) => n.to_string(),
            RawNo::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawVerse {
    no: RawNo,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawChapter {
    no: u32,
    verses: Vec<RawVerse>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawBook {
    name: String,
    #[serde(default)]
    short_name: String,
    chapters: Vec<RawChapter>,
}

/// 一个圣经译本
#[derive(Debug, Clone, Deserialize)]
pub struct Bible {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lang: String,
    books: Vec<RawBook>,
}

/// Span of a verse label: `"4"` is (4, 4), `"2-3"` is (2, 3).
fn verse_span(label: &str) -> Option<(u32, u32)> {
    let (a, b) = match label.split_once(['-', ':']) {
        Some((a, b)) => (a, b),
        None => (label, label),
    };
    let a = a.trim().parse().ok()?;
    let b: u32 = b.trim().parse().ok()?;
    Some((a, b.max(a)))
}

impl Bible {
    pub fn from_json(content: &str, source: &str) -> Result<Self> {
        serde_json::from_str(content.trim_start_matches('\u{feff}')).map_err(|e| ServiceError::Parse {
            path: source.to_string(),
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        })
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    fn find_book(&self, name: &str) -> Option<&RawBook> {
        self.books.iter().find(|b| {
            b.name.eq_ignore_ascii_case(name)
                || (!b.short_name.is_empty() && b.short_name.eq_ignore_ascii_case(name))
        })
    }

    /// Verses covered by `reference`, in order. Merged verses count once.
    pub fn extract(&self, reference: &VerseRef) -> Vec<Verse> {
        let Some(book) = self.find_book(&reference.book) else {
            return Vec::new();
        };
        let (c1, v1) = (reference.chapter, reference.verse.unwrap_or(1));
        let (c2, v2) = match (reference.verse, reference.end) {
            (_, Some(end)) => end,
            (Some(v), None) => (c1, v),
            (None, None) => (c1, u32::MAX),
        };

        let mut out = Vec::new();
        for chapter in book.chapters.iter().filter(|c| c.no >= c1 && c.no <= c2) {
            let lo = if chapter.no == c1 { v1 } else { 1 };
            let hi = if chapter.no == c2 { v2 } else { u32::MAX };
            for verse in &chapter.verses {
                let label = verse.no.to_label();
                let Some((a, b)) = verse_span(&label) else {
                    continue;
                };
                if a <= hi && b >= lo {
                    out.push(Verse {
                        book: book.name.clone(),
                        short_book: if book.short_name.is_empty() {
                            book.name.clone()
                        } else {
                            book.short_name.clone()
                        },
                        chapter: chapter.no,
                        no: label,
                        text: verse.text.clone(),
                    });
                }
            }
        }
        out
    }
}

/// Reads `<version>.json` files from a directory, caching parsed translations.
pub struct JsonBibleSource {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Bible>>>,
}

impl JsonBibleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self, version: &str) -> Result<Arc<Bible>> {
        if let Some(bible) = self.cache.lock().ok().and_then(|c| c.get(version).cloned()) {
            return Ok(bible);
        }

        let path = self.dir.join(format!("{}.json", version));
        if !path.exists() {
            return Err(ServiceError::VerseNotFound {
                reference: String::new(),
                version: version.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ServiceError::io(&path, e))?;
        let bible = Arc::new(Bible::from_json(&content, &path.display().to_string())?);
        info!(version, books = bible.book_count(), "loaded Bible translation");

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(version.to_string(), Arc::clone(&bible));
        }
        Ok(bible)
    }
}

impl BibleSource for JsonBibleSource {
    fn lookup(&self, reference: &str, version: &str) -> Result<Vec<Verse>> {
        let not_found = || ServiceError::VerseNotFound {
            reference: reference.to_string(),
            version: version.to_string(),
        };
        let parsed = VerseRef::parse(reference).map_err(|_| not_found())?;
        let bible = self.load(version).map_err(|e| match e {
            ServiceError::VerseNotFound { .. } => not_found(),
            other => other,
        })?;
        let verses = bible.extract(&parsed);
        debug!(reference, version, count = verses.len(), "looked up verses");
        if verses.is_empty() {
            return Err(not_found());
        }
        Ok(verses)
    }

    fn versions(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        versions.sort();
        versions
    }
}

/// Verses resolved by the last GenerateBibleVerse of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerseSheet {
    pub main_verses: String,
    /// Placeholder name of the first translation.
    pub primary: String,
    /// One row per verse position: `(placeholder name, verse)` per translation.
    pub rows: Vec<Vec<(String, Verse)>>,
}

impl VerseSheet {
    pub fn primary_verses(&self) -> impl Iterator<Item = &Verse> {
        self.rows.iter().filter_map(move |row| {
            row.iter()
                .find(|(name, _)| *name == self.primary)
                .map(|(_, v)| v)
        })
    }

    /// Byte-order mark, the main verses line, then `<no> <text>` per verse.
    pub fn to_text(&self) -> String {
        let mut out = String::from('\u{feff}');
        out.push_str(&self.main_verses);
        out.push('\n');
        for verse in self.primary_verses() {
            out.push_str(&format!("{} {}\n", verse.no, verse.text));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "name": "Sample",
      "books": [
        { "name": "Genesis", "short_name": "Gen", "chapters": [
          { "no": 1, "verses": [ { "no": 1, "text": "a" }, { "no": 2, "text": "b" }, { "no": "3-4", "text": "cd" } ] },
          { "no": 2, "verses": [ { "no": 1, "text": "e" }, { "no": 2, "text": "f" } ] }
        ] }
      ]
    }"#;

    #[test]
    fn parses_references() {
        let r = VerseRef::parse("1 John 4:8").unwrap();
        assert_eq!((r.book.as_str(), r.chapter, r.verse, r.end), ("1 John", 4, Some(8), None));
        let r = VerseRef::parse("John 3:16-18").unwrap();
        assert_eq!(r.end, Some((3, 18)));
        let r = VerseRef::parse("Gen 1:2-2:1").unwrap();
        assert_eq!(r.end, Some((2, 1)));
        assert_eq!(r.to_string(), "Gen 1:2-2:1");
        assert_eq!(VerseRef::parse("Psalm 23").unwrap().verse, None);
        assert!(VerseRef::parse("Genesis").is_err());
        assert!(VerseRef::parse("John 3:18-16").is_err());
    }

    #[test]
    fn split_inherits_book_and_chapter() {
        assert_eq!(
            split_references("John 3:16, 18-19, Rom 8:28"),
            vec!["John 3:16", "John 3:18-19", "Rom 8:28"]
        );
        assert!(split_references(" , ").is_empty());
    }

    #[test]
    fn extracts_ranges_and_merged_verses() {
        let bible = Bible::from_json(SAMPLE, "sample").unwrap();
        let texts = |r: &str| -> Vec<String> {
            bible
                .extract(&VerseRef::parse(r).unwrap())
                .into_iter()
                .map(|v| v.text)
                .collect()
        };
        assert_eq!(texts("Genesis 1:1"), vec!["a"]);
        assert_eq!(texts("Gen 1:2-3"), vec!["b", "cd"]);
        assert_eq!(texts("Gen 1:4-2:1"), vec!["cd", "e"]);
        assert_eq!(texts("Gen 2"), vec!["e", "f"]);
        assert!(texts("Exodus 1:1").is_empty());
    }

    #[test]
    fn directory_source_reports_missing_verses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SMP.json"), SAMPLE).unwrap();
        let source = JsonBibleSource::new(dir.path());
        assert_eq!(source.versions(), vec!["SMP"]);

        let verses = source.lookup("Genesis 1:1", "SMP").unwrap();
        assert_eq!(verses[0].short_book, "Gen");
        assert!(matches!(
            source.lookup("Genesis 9:9", "SMP"),
            Err(ServiceError::VerseNotFound { .. })
        ));
        assert!(matches!(
            source.lookup("Genesis 1:1", "KJV"),
            Err(ServiceError::VerseNotFound { .. })
        ));
    }

    #[test]
    fn verse_sheet_text_has_bom() {
        let verse = |no: &str, text: &str| Verse {
            book: "Genesis".into(),
            short_book: "Gen".into(),
            chapter: 1,
            no: no.into(),
            text: text.into(),
        };
        let sheet = VerseSheet {
            main_verses: "Genesis 1:1-2".into(),
            primary: "v1".into(),
            rows: vec![
                vec![("v1".into(), verse("1", "a")), ("v2".into(), verse("1", "x"))],
                vec![("v1".into(), verse("2", "b"))],
            ],
        };
        assert_eq!(sheet.to_text(), "\u{feff}Genesis 1:1-2\n1 a\n2 b\n");
    }
}
