use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, Presentation};
use crate::bible::{BibleSource, VerseSheet};
use crate::error::{Result, ServiceError};
use crate::hymn::{LyricSource, Song};
use crate::runtime::monitor::Monitor;
use crate::runtime::slide_range::{Expr, SlideTextIndex};
use crate::runtime::variables::{VariableTable, replace_all};

/// 执行上下文 (Execution Context)
/// 一次运行的全部可变状态：当前演示文稿、变量表、备注文本
pub struct ExecutionContext {
    pub run_id: Uuid,
    backend: Arc<dyn Backend>,
    presentation: Option<Box<dyn Presentation>>,
    index: Option<SlideTextIndex>,

    pub variables: VariableTable,
    /// Companion notes text, one line per slide cue.
    pub notes: String,
    pub verses: Option<VerseSheet>,
    /// Songs to write into the lyrics archive on save.
    pub lyrics: Vec<Song>,

    bible: Option<Arc<dyn BibleSource>>,
    lyric_source: Option<Arc<dyn LyricSource>>,
    monitor: Arc<dyn Monitor>,
}

impl ExecutionContext {
    pub fn new(backend: Arc<dyn Backend>, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            backend,
            presentation: None,
            index: None,
            variables: VariableTable::new(),
            notes: String::new(),
            verses: None,
            lyrics: Vec::new(),
            bible: None,
            lyric_source: None,
            monitor,
        }
    }

    pub fn with_bible(mut self, bible: Option<Arc<dyn BibleSource>>) -> Self {
        self.bible = bible;
        self
    }

    pub fn with_lyrics(mut self, lyrics: Option<Arc<dyn LyricSource>>) -> Self {
        self.lyric_source = lyrics;
        self
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub fn monitor(&self) -> &dyn Monitor {
        self.monitor.as_ref()
    }

    pub fn bible(&self) -> Result<Arc<dyn BibleSource>> {
        self.bible
            .clone()
            .ok_or_else(|| ServiceError::Validation("no Bible directory is configured".into()))
    }

    pub fn lyric_source(&self) -> Result<Arc<dyn LyricSource>> {
        self.lyric_source
            .clone()
            .ok_or_else(|| ServiceError::Validation("no lyrics directory is configured".into()))
    }

    pub fn progress(&self, percent: u8, message: &str) {
        self.monitor.progress(percent, message);
    }

    pub fn has_presentation(&self) -> bool {
        self.presentation.as_ref().is_some_and(|p| p.is_open())
    }

    /// Mutable access to the open presentation. The slide text snapshot is
    /// dropped, since the caller may change slides.
    pub fn presentation(&mut self) -> Result<&mut (dyn Presentation + 'static)> {
        self.index = None;
        match self.presentation.as_deref_mut() {
            Some(p) if p.is_open() => Ok(p),
            _ => Err(ServiceError::NoPresentation),
        }
    }

    /// Installs `prs` as the current presentation, closing the previous one.
    /// If the previous one fails to close, `prs` is closed as well so no
    /// handle outlives the error.
    pub async fn set_presentation(&mut self, mut prs: Box<dyn Presentation>) -> Result<()> {
        if let Err(e) = self.close_presentation().await {
            if let Err(close_err) = prs.close().await {
                warn!(run_id = %self.run_id, error = %close_err, "failed to close new presentation");
            }
            return Err(e);
        }
        debug!(run_id = %self.run_id, backend = %prs.kind(), "presentation attached");
        self.presentation = Some(prs);
        Ok(())
    }

    /// Closes and drops the current presentation. Safe to call repeatedly.
    pub async fn close_presentation(&mut self) -> Result<()> {
        self.index = None;
        let Some(mut prs) = self.presentation.take() else {
            return Ok(());
        };
        match prs.close().await {
            Ok(()) => {
                info!(run_id = %self.run_id, "presentation closed");
                Ok(())
            }
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "failed to close presentation");
                Err(e)
            }
        }
    }

    /// Forces the slide text snapshot to be rebuilt, e.g. after the user
    /// edited the deck during a popup.
    pub fn invalidate_index(&mut self) {
        self.index = None;
    }

    /// Slide and notes text of every slide, rebuilt after any mutation.
    pub async fn slide_index(&mut self) -> Result<&SlideTextIndex> {
        if self.index.is_none() {
            let prs = self.presentation()?;
            let index = SlideTextIndex::build(prs).await?;
            self.index = Some(index);
        }
        self.index.as_ref().ok_or(ServiceError::NoPresentation)
    }

    pub async fn select(&mut self, expr: &Expr) -> Result<Vec<usize>> {
        Ok(expr.select(self.slide_index().await?))
    }

    pub async fn select_first(&mut self, expr: &Expr) -> Result<Option<usize>> {
        Ok(expr.first(self.slide_index().await?))
    }

    /// Substitutes every known variable in all slides and in the notes.
    /// Returns the number of text runs changed.
    pub async fn apply_variables(&mut self) -> Result<usize> {
        if self.variables.is_empty() {
            return Ok(0);
        }
        let mut texts = self.slide_index().await?.all_texts();
        texts.push(self.notes.clone());
        let pairs = self.variables.pairs_for(texts.iter().map(String::as_str));

        let prs = self.presentation()?;
        let count = prs.slide_count().await?;
        let all: Vec<usize> = (0..count).collect();
        let changed = prs.find_replace_texts(&all, &pairs).await?;

        if !self.notes.is_empty() {
            self.notes = replace_all(&self.notes, &pairs).1;
        }
        debug!(run_id = %self.run_id, pairs = pairs.len(), changed, "applied variables");
        Ok(changed)
    }
}
