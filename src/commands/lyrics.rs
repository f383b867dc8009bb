use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::slides::duplicate_with_texts;
use super::{opt_bool, opt_range, req_str, str_list};
use crate::error::{Result, ServiceError};
use crate::hymn::Song;
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};
use crate::runtime::slide_range::Expr;

/// Fills a lyric slide block once per stanza of the listed songs.
#[derive(Debug)]
pub struct InsertLyricsCommand {
    lyric_insert_location: Option<Expr>,
    find_text: String,
    filelist: Vec<String>,
    archive_lyric_file: bool,
}

impl InsertLyricsCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let cmd = Self {
            lyric_insert_location: opt_range(params, "lyric_insert_location")?,
            find_text: req_str(params, "find_text")?,
            filelist: str_list(params, "filelist")?,
            archive_lyric_file: opt_bool(params, "archive_lyric_file")?,
        };
        if cmd.lyric_insert_location.is_none() && !cmd.filelist.is_empty() {
            return Err(ServiceError::Validation(
                "`lyric_insert_location` is required".into(),
            ));
        }
        Ok(cmd)
    }
}

pub struct InsertLyricsDefinition;

impl CommandDefinition for InsertLyricsDefinition {
    fn name(&self) -> &str {
        "InsertLyrics"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        InsertLyricsCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(InsertLyricsCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for InsertLyricsCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        if self.filelist.is_empty() {
            return Ok(());
        }
        let source = ctx.lyric_source()?;
        let mut songs: Vec<Song> = Vec::with_capacity(self.filelist.len());
        for entry in &self.filelist {
            let title = ctx.variables.resolve(entry);
            ctx.progress(0, &format!("Looking up lyrics '{}'.", title));
            songs.push(source.find(&title)?);
        }

        let texts: Vec<String> = songs.iter().flat_map(Song::stanza_texts).collect();
        if texts.is_empty() {
            return Err(ServiceError::LyricNotFound(self.filelist.join(", ")));
        }

        let added = duplicate_with_texts(
            ctx,
            None,
            self.lyric_insert_location.as_ref(),
            &self.find_text,
            &texts,
        )
        .await?;
        info!(songs = songs.len(), stanzas = texts.len(), added, "inserted lyrics");

        if self.archive_lyric_file {
            ctx.lyrics.extend(songs);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn location_required_with_songs() {
        let def = InsertLyricsDefinition;
        assert!(def.validate(&json!({ "find_text": "{lyric}", "filelist": ["Holy"] })).is_err());
        assert!(
            def.validate(&json!({
                "find_text": "{lyric}",
                "filelist": ["Holy"],
                "lyric_insert_location": "slide.contains_text('{lyric}')"
            }))
            .is_ok()
        );
        assert!(def.validate(&json!({ "find_text": "{lyric}" })).is_ok());
    }
}
