use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{opt_bool, opt_range, req_str, resolve_path, select_or_all, str_list};
use crate::error::{Result, ServiceError};
use crate::hymn::Song;
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};
use crate::runtime::slide_range::Expr;

// --- INSERT SLIDES ---

#[derive(Debug)]
pub struct InsertSlidesCommand {
    insert_location: Option<Expr>,
    separator_slides: Option<Expr>,
    filelist: Vec<String>,
}

impl InsertSlidesCommand {
    fn from_params(params: &Value) -> Result<Self> {
        Ok(Self {
            insert_location: opt_range(params, "insert_location")?,
            separator_slides: opt_range(params, "separator_slides")?,
            filelist: str_list(params, "filelist")?,
        })
    }
}

pub struct InsertSlidesDefinition;

impl CommandDefinition for InsertSlidesDefinition {
    fn name(&self) -> &str {
        "InsertSlides"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        InsertSlidesCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(InsertSlidesCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for InsertSlidesCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        if self.filelist.is_empty() {
            debug!("no files to insert");
            return Ok(());
        }
        let files: Vec<PathBuf> = self
            .filelist
            .iter()
            .map(|f| resolve_path(ctx, f))
            .collect();

        let at = match &self.insert_location {
            Some(expr) => ctx.select_first(expr).await?.map(|i| i + 1),
            None => None,
        };
        let separators = match &self.separator_slides {
            Some(expr) => Some(ctx.select(expr).await?),
            None => None,
        };

        ctx.progress(0, &format!("Inserting slides from {} file(s).", files.len()));
        let added = ctx
            .presentation()?
            .insert_slides(&files, at, separators.as_deref())
            .await?;
        info!(files = files.len(), added, at = ?at, "inserted slides");
        Ok(())
    }
}

// --- DUPLICATE WITH TEXT ---

#[derive(Debug)]
pub struct DuplicateWithTextCommand {
    slide_range: Option<Expr>,
    repeat_range: Option<Expr>,
    find_text: String,
    replace_texts: Vec<String>,
    archive_lyric_file: bool,
}

impl DuplicateWithTextCommand {
    fn from_params(params: &Value) -> Result<Self> {
        Ok(Self {
            slide_range: opt_range(params, "slide_range")?,
            repeat_range: opt_range(params, "repeat_range")?,
            find_text: req_str(params, "find_text")?,
            replace_texts: str_list(params, "replace_texts")?,
            archive_lyric_file: opt_bool(params, "archive_lyric_file")?,
        })
    }
}

pub struct DuplicateWithTextDefinition;

impl CommandDefinition for DuplicateWithTextDefinition {
    fn name(&self) -> &str {
        "DuplicateWithText"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        DuplicateWithTextCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(DuplicateWithTextCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for DuplicateWithTextCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let texts: Vec<String> = self
            .replace_texts
            .iter()
            .map(|t| ctx.variables.resolve(t))
            .collect();
        let added = duplicate_with_texts(
            ctx,
            self.slide_range.as_ref(),
            self.repeat_range.as_ref(),
            &self.find_text,
            &texts,
        )
        .await?;
        info!(find = %self.find_text, texts = texts.len(), added, "duplicated slides with text");

        if self.archive_lyric_file && !texts.is_empty() {
            ctx.lyrics.push(Song::from_texts(&lyric_title(&self.find_text), &texts));
        }
        Ok(())
    }
}

/// Resolves both ranges and runs the duplicate pass. A repeat block outside
/// the slide range is reported as bad command data.
pub(crate) async fn duplicate_with_texts(
    ctx: &mut ExecutionContext,
    slide_range: Option<&Expr>,
    repeat_range: Option<&Expr>,
    find_text: &str,
    texts: &[String],
) -> Result<usize> {
    let slides = select_or_all(ctx, slide_range).await?;
    let repeat = match repeat_range {
        Some(expr) => Some(ctx.select(expr).await?),
        None => None,
    };
    if repeat.as_ref().is_some_and(Vec::is_empty) {
        return Err(ServiceError::Validation(format!(
            "repeat range `{}` matches no slide",
            repeat_range.map(ToString::to_string).unwrap_or_default()
        )));
    }

    ctx.presentation()?
        .duplicate_slide_with_text(&slides, repeat.as_deref(), find_text, texts)
        .await
        .map_err(|e| match e {
            ServiceError::InvalidRange(msg) => ServiceError::Validation(msg),
            other => other,
        })
}

/// `{Hymn 1}` becomes `Hymn 1`.
pub(crate) fn lyric_title(find_text: &str) -> String {
    find_text
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_text_is_required() {
        let def = DuplicateWithTextDefinition;
        assert!(def.validate(&json!({ "replace_texts": ["a"] })).is_err());
        assert!(
            def.validate(&json!({ "find_text": "{x}", "replace_texts": ["a"], "slide_range": "0" }))
                .is_ok()
        );
    }

    #[test]
    fn bad_ranges_are_validation_errors() {
        let err = InsertSlidesDefinition
            .validate(&json!({ "insert_location": "note.contains_text(" }))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn lyric_titles_drop_braces() {
        assert_eq!(lyric_title("{Amazing Grace}"), "Amazing Grace");
        assert_eq!(lyric_title("plain"), "plain");
    }
}
