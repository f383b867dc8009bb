use async_trait::async_trait;
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{opt_str, req_str, resolve_path};
use crate::error::{Result, ServiceError};
use crate::hymn::Song;
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};

// --- OPEN FILE ---

#[derive(Debug)]
pub struct OpenFileCommand {
    filename: Option<String>,
    notes_filename: Option<String>,
}

impl OpenFileCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let non_empty = |s: Option<&str>| s.filter(|s| !s.trim().is_empty()).map(str::to_string);
        Ok(Self {
            filename: non_empty(opt_str(params, "filename")?),
            notes_filename: non_empty(opt_str(params, "notes_filename")?),
        })
    }
}

pub struct OpenFileDefinition;

impl CommandDefinition for OpenFileDefinition {
    fn name(&self) -> &str {
        "OpenFile"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        OpenFileCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(OpenFileCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for OpenFileCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let backend = ctx.backend();
        let path = match &self.filename {
            None => None,
            Some(filename) => {
                let path = resolve_path(ctx, filename);
                if !path.exists() {
                    return Err(ServiceError::FileNotFound(path));
                }
                Some(path)
            }
        };

        // The previous document is released before the next one is opened.
        ctx.close_presentation().await?;
        let prs = match &path {
            None => {
                ctx.progress(0, "Creating a new presentation.");
                backend.new_presentation().await?
            }
            Some(path) => {
                ctx.progress(
                    0,
                    &format!("Opening a template presentation file '{}'.", path.display()),
                );
                backend.open(path).await?
            }
        };
        ctx.set_presentation(prs).await?;

        if let Some(notes_filename) = &self.notes_filename {
            let path = resolve_path(ctx, notes_filename);
            ctx.progress(90, &format!("Opening a template notes file '{}'.", path.display()));
            let notes = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ServiceError::io(&path, e))?;
            ctx.notes = notes.trim_start_matches('\u{feff}').to_string();
        }
        Ok(())
    }
}

// --- SAVE FILES ---

#[derive(Debug)]
pub struct SaveFilesCommand {
    filename: String,
    lyrics_archive_filename: Option<String>,
    notes_filename: Option<String>,
    verses_filename: Option<String>,
}

impl SaveFilesCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let optional = |key: &str| -> Result<Option<String>> {
            Ok(opt_str(params, key)?
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string))
        };
        Ok(Self {
            filename: req_str(params, "filename")?,
            lyrics_archive_filename: optional("lyrics_archive_filename")?,
            notes_filename: optional("notes_filename")?,
            verses_filename: optional("verses_filename")?,
        })
    }
}

pub struct SaveFilesDefinition;

impl CommandDefinition for SaveFilesDefinition {
    fn name(&self) -> &str {
        "SaveFiles"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        SaveFilesCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(SaveFilesCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for SaveFilesCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let path = resolve_path(ctx, &self.filename);
        ctx.progress(0, &format!("Saving the presentation to the file '{}'.", path.display()));
        ctx.presentation()?.save(&path).await?;

        if let Some(archive) = &self.lyrics_archive_filename {
            if !ctx.lyrics.is_empty() {
                let archive = resolve_path(ctx, archive);
                ctx.progress(
                    80,
                    &format!("Saving the lyrics to the archive file '{}'.", archive.display()),
                );
                write_lyrics_archive(&archive, &ctx.lyrics)?;
            }
        }

        if let Some(notes_filename) = &self.notes_filename {
            let notes_path = resolve_path(ctx, notes_filename);
            ctx.progress(90, &format!("Saving the notes to the file '{}'.", notes_path.display()));
            tokio::fs::write(&notes_path, ctx.notes.as_bytes())
                .await
                .map_err(|e| ServiceError::io(&notes_path, e))?;
        }

        if let Some(verses_filename) = &self.verses_filename {
            let verses_path = resolve_path(ctx, verses_filename);
            match &ctx.verses {
                Some(sheet) => {
                    ctx.progress(
                        95,
                        &format!("Saving Bible verses to file '{}'.", verses_path.display()),
                    );
                    tokio::fs::write(&verses_path, sheet.to_text().as_bytes())
                        .await
                        .map_err(|e| ServiceError::io(&verses_path, e))?;
                }
                None => warn!(path = %verses_path.display(), "no Bible verses were generated; verses file not written"),
            }
        }
        Ok(())
    }
}

/// Writes one `<title>.txt` lyric file per song into a `.zip` archive.
pub fn write_lyrics_archive(path: &Path, songs: &[Song]) -> Result<()> {
    let is_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if !is_zip {
        return Err(ServiceError::UnsupportedFormat(format!(
            "lyrics archive `{}` (only .zip is supported)",
            path.display()
        )));
    }

    let file = File::create(path).map_err(|e| ServiceError::io(path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut names: Vec<String> = Vec::with_capacity(songs.len());

    for song in songs {
        let stem: String = song
            .title
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        let mut name = format!("{}.txt", stem);
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{} ({}).txt", stem, n);
            n += 1;
        }
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(song.to_text().as_bytes())
            .map_err(|e| ServiceError::io(path, e))?;
        names.push(name);
    }
    writer.finish()?;
    info!(path = %path.display(), songs = songs.len(), "wrote lyrics archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn save_requires_filename() {
        assert!(SaveFilesDefinition.validate(&json!({})).is_err());
        assert!(SaveFilesDefinition.validate(&json!({ "filename": "out.pptx" })).is_ok());
    }

    #[test]
    fn open_accepts_empty_filename() {
        assert!(OpenFileDefinition.validate(&json!({ "filename": "" })).is_ok());
        assert!(OpenFileDefinition.validate(&json!({ "filename": 5 })).is_err());
    }

    #[test]
    fn archive_has_one_entry_per_song() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyrics.zip");
        let songs = vec![
            Song::from_texts("Holy", &["Holy holy".to_string()]),
            Song::from_texts("Holy", &["again".to_string()]),
        ];
        write_lyrics_archive(&path, &songs).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut text = String::new();
        archive
            .by_name("Holy (2).txt")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("again"));
    }

    #[test]
    fn archive_must_be_zip() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_lyrics_archive(&dir.path().join("lyrics.osz"), &[]).unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedFormat(_)));
    }
}
