//! Hymn lyrics.
//!
//! A lyric file is plain UTF-8 text; stanzas are separated by blank lines.
//! An optional first line `order: v1 c v2 c` names the stanza order, where
//! stanzas are labelled `v1`, `v2`, ... in file order unless a stanza starts
//! with a `[label]` line.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    pub label: String,
    pub lines: Vec<String>,
}

impl Stanza {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Song {
    pub title: String,
    pub order: Vec<String>,
    pub stanzas: Vec<Stanza>,
}

impl Song {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    /// Builds a song whose stanzas are the given texts, labelled `v1`, `v2`, ...
    pub fn from_texts(title: &str, texts: &[String]) -> Self {
        let stanzas = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Stanza {
                label: format!("v{}", i + 1),
                lines: text.lines().map(str::to_string).collect(),
            })
            .collect();
        Self {
            title: title.to_string(),
            order: Vec::new(),
            stanzas,
        }
    }

    pub fn parse(title: &str, content: &str) -> Self {
        let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let mut song = Song::new(title);
        let mut body = content.as_str();

        if let Some(first) = body.lines().next() {
            if let Some(order) = first.trim().strip_prefix("order:") {
                song.order = order.split_whitespace().map(str::to_string).collect();
                body = body.get(first.len()..).unwrap_or("");
            }
        }

        for block in body.split("\n\n") {
            let mut lines: Vec<String> = block
                .lines()
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            if lines.is_empty() {
                continue;
            }
            let label = match lines[0].strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                Some(label) => {
                    let label = label.trim().to_string();
                    lines.remove(0);
                    label
                }
                None => format!("v{}", song.stanzas.len() + 1),
            };
            song.stanzas.push(Stanza { label, lines });
        }
        song
    }

    /// Stanzas in the declared order; file order when no order is given.
    /// Unknown labels in the order are skipped.
    pub fn stanzas_by_order(&self) -> Vec<&Stanza> {
        if self.order.is_empty() {
            return self.stanzas.iter().collect();
        }
        self.order
            .iter()
            .filter_map(|label| self.stanzas.iter().find(|s| &s.label == label))
            .collect()
    }

    pub fn stanza_texts(&self) -> Vec<String> {
        self.stanzas_by_order().into_iter().map(Stanza::text).collect()
    }

    /// Lyric file content that parses back to the same song.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if !self.order.is_empty() {
            out.push_str("order: ");
            out.push_str(&self.order.join(" "));
            out.push('\n');
        }
        let blocks: Vec<String> = self
            .stanzas
            .iter()
            .map(|s| format!("[{}]\n{}", s.label, s.text()))
            .collect();
        out.push_str(&blocks.join("\n\n"));
        out.push('\n');
        out
    }
}

/// 歌词数据源接口
pub trait LyricSource: Send + Sync {
    /// Looks a song up by title or by file path.
    fn find(&self, title: &str) -> Result<Song>;
}

/// Lyric files in a directory, named `<title>.txt`.
#[derive(Debug, Clone)]
pub struct DirLyricSource {
    dir: PathBuf,
}

impl DirLyricSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidates(&self, title: &str) -> Vec<PathBuf> {
        let given = Path::new(title);
        let mut out = vec![given.to_path_buf(), given.with_extension("txt")];
        if let Some(name) = given.file_name() {
            let in_dir = self.dir.join(name);
            out.push(in_dir.with_extension("txt"));
            out.push(in_dir);
        }
        out
    }
}

impl LyricSource for DirLyricSource {
    fn find(&self, title: &str) -> Result<Song> {
        let path = self
            .candidates(title)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ServiceError::LyricNotFound(title.to_string()))?;
        let content = std::fs::read_to_string(&path).map_err(|e| ServiceError::io(&path, e))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| title.to_string());
        debug!(path = %path.display(), "read lyric file");
        Ok(Song::parse(&name, &content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stanzas_follow_declared_order() {
        let song = Song::parse(
            "Amazing Grace",
            "order: v1 c v2 c\n[v1]\nAmazing grace\nhow sweet\n\n[c]\nchorus\n\n[v2]\ntwas grace\n",
        );
        assert_eq!(song.stanzas.len(), 3);
        assert_eq!(
            song.stanza_texts(),
            vec!["Amazing grace\nhow sweet", "chorus", "twas grace", "chorus"]
        );
        assert_eq!(Song::parse("Amazing Grace", &song.to_text()), song);
    }

    #[test]
    fn unlabelled_stanzas_are_numbered() {
        let song = Song::parse("x", "a\nb\n\n\nc\r\n");
        let labels: Vec<&str> = song.stanzas.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["v1", "v2"]);
    }

    #[test]
    fn directory_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Holy.txt"), "Holy holy holy\n").unwrap();
        let source = DirLyricSource::new(dir.path());
        assert_eq!(source.find("Holy").unwrap().stanza_texts(), vec!["Holy holy holy"]);
        assert!(matches!(
            source.find("Missing"),
            Err(ServiceError::LyricNotFound(_))
        ));
    }
}
