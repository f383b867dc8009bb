//! Shared plumbing for the automation backends.
//!
//! Both automation backends drive a running PowerPoint through an external
//! interpreter (PowerShell for COM, `osascript` for AppleScript). A
//! [`Dialect`] writes one script per operation; [`ScriptPresentation`]
//! runs it and parses the line-oriented output.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::pptx::PptxBackend;
use super::{BackendKind, ExportFlags, ImageFormat, Presentation, raster};
use crate::error::{Result, ServiceError};

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// An external script interpreter.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRunner {
    pub program: &'static str,
    pub args: &'static [&'static str],
    /// Suffix of the temporary script file.
    pub suffix: &'static str,
}

impl ScriptRunner {
    pub const POWERSHELL: ScriptRunner = ScriptRunner {
        program: "powershell",
        args: &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"],
        suffix: ".ps1",
    };

    pub const OSASCRIPT: ScriptRunner = ScriptRunner {
        program: "osascript",
        args: &[],
        suffix: ".applescript",
    };

    /// Whether the interpreter can be found on `PATH`.
    pub fn program_exists(&self) -> bool {
        let Some(paths) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&paths).any(|dir| {
            dir.join(self.program).is_file() || dir.join(format!("{}.exe", self.program)).is_file()
        })
    }

    /// Runs `script` and returns its standard output. A non-zero exit
    /// status becomes [`ServiceError::Backend`] carrying standard error.
    pub async fn run(&self, script: &str) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("service-ppt-")
            .suffix(self.suffix)
            .tempfile()
            .map_err(|e| ServiceError::io(std::env::temp_dir(), e))?;
        file.write_all(script.as_bytes())
            .map_err(|e| ServiceError::io(file.path(), e))?;
        file.flush().map_err(|e| ServiceError::io(file.path(), e))?;

        let child = Command::new(self.program)
            .args(self.args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServiceError::Backend(format!("cannot start {}: {}", self.program, e)))?;

        let output = tokio::time::timeout(SCRIPT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ServiceError::Backend(format!("{} timed out", self.program)))?
            .map_err(|e| ServiceError::Backend(format!("{} failed: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ServiceError::Backend(if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs a probe script; any failure counts as unavailable.
    pub async fn probe(&self, script: &str) -> bool {
        if !self.program_exists() {
            return false;
        }
        match self.run(script).await {
            Ok(out) => out.trim() == "ok",
            Err(e) => {
                debug!(program = self.program, error = %e, "probe failed");
                false
            }
        }
    }
}

/// Script generator for one automation dialect. Indices are 0-based; the
/// dialect converts them. Every script prints its result on stdout.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Opens a file; prints the handle of the new presentation.
    fn open(&self, path: &Path) -> String;

    /// Creates an empty presentation; prints its handle.
    fn new_presentation(&self) -> String;

    /// Prints the number of slides.
    fn slide_count(&self, handle: &str) -> String;

    /// Prints the text of every text frame on the slide, one paragraph per line.
    fn slide_texts(&self, handle: &str, index: usize) -> String;

    fn notes_texts(&self, handle: &str, index: usize) -> String;

    /// Saves as `.pptx`; prints the handle, which may have changed.
    fn save(&self, handle: &str, path: &Path) -> String;

    /// Prints the number of slides inserted.
    fn insert_file(&self, handle: &str, path: &Path, at: usize) -> String;

    /// Copies one slide to `target`, notes included. `source` and `target`
    /// are positions at the time the script runs.
    fn duplicate(&self, handle: &str, source: usize, target: usize) -> String;

    /// Prints the number of replacements made.
    fn find_replace(&self, handle: &str, slides: &[usize], pairs: &[(String, String)]) -> String;

    /// Exports one slide. When [`Dialect::exports_via_folder`] is true the
    /// script writes every slide into `scratch` instead of `target`.
    fn export_slide(
        &self,
        handle: &str,
        index: usize,
        target: &Path,
        scratch: &Path,
        format: ImageFormat,
        width: u32,
        flags: ExportFlags,
    ) -> String;

    fn exports_via_folder(&self) -> bool {
        false
    }

    /// Exports qualifying shapes, printing one path per line. `None` when
    /// the dialect cannot export shapes itself.
    fn export_shapes(
        &self,
        handle: &str,
        index: usize,
        dir: &Path,
        stem: &str,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Option<String>;

    fn close(&self, handle: &str) -> String;
}

/// Output lines with any trailing CR removed.
pub fn output_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect()
}

/// Splits automation text on paragraph separators (CR, LF, VT).
pub fn split_paragraphs(output: &str) -> Vec<String> {
    let trimmed = output.strip_suffix('\n').unwrap_or(output);
    let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split(['\r', '\n', '\u{b}'])
        .map(str::to_string)
        .collect()
}

pub fn parse_count(output: &str) -> Result<usize> {
    let last = output.lines().map(str::trim).rfind(|l| !l.is_empty());
    last.and_then(|l| l.parse::<usize>().ok()).ok_or_else(|| {
        ServiceError::Backend(format!("expected a number from the script, got `{}`", output.trim()))
    })
}

pub fn parse_handle(output: &str) -> Result<String> {
    output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::Backend("script did not report a presentation".into()))
}

/// Position of each copy: a source shifts when earlier copies land before it.
pub fn duplicate_moves(sources: &[usize], insert_at: usize) -> Vec<(usize, usize)> {
    sources
        .iter()
        .enumerate()
        .map(|(k, &s)| {
            let current = if s >= insert_at { s + k } else { s };
            (current, insert_at + k)
        })
        .collect()
}

/// Finds `Slide<n>.<ext>` style output of a folder export; the stem prefix
/// is localized by PowerPoint, so only the trailing number is matched.
fn find_folder_export(dir: &Path, number: usize) -> Result<PathBuf> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| ServiceError::io(&current, e))?;
        for entry in entries {
            let path = entry.map_err(|e| ServiceError::io(&current, e))?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            let digits: String = stem
                .chars()
                .rev()
                .take_while(char::is_ascii_digit)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if digits.parse::<usize>().ok() == Some(number) {
                return Ok(path);
            }
        }
    }
    Err(ServiceError::Backend(format!(
        "slide {} was not found in the exported folder",
        number
    )))
}

/// A presentation living inside PowerPoint, addressed by handle.
pub struct ScriptPresentation<D: Dialect> {
    runner: ScriptRunner,
    dialect: Arc<D>,
    handle: Option<String>,
    width: u32,
    /// Renders shapes for dialects that cannot export them.
    fallback: Arc<PptxBackend>,
}

impl<D: Dialect> ScriptPresentation<D> {
    pub fn new(
        runner: ScriptRunner,
        dialect: Arc<D>,
        handle: String,
        width: u32,
        fallback: Arc<PptxBackend>,
    ) -> Self {
        Self {
            runner,
            dialect,
            handle: Some(handle),
            width,
            fallback,
        }
    }

    fn handle(&self) -> Result<&str> {
        self.handle.as_deref().ok_or(ServiceError::NoPresentation)
    }

    async fn run(&self, script: String) -> Result<String> {
        debug!(backend = %self.dialect.kind(), bytes = script.len(), "running automation script");
        self.runner.run(&script).await
    }
}

#[async_trait]
impl<D: Dialect + 'static> Presentation for ScriptPresentation<D> {
    fn kind(&self) -> BackendKind {
        self.dialect.kind()
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    async fn slide_count(&mut self) -> Result<usize> {
        let script = self.dialect.slide_count(self.handle()?);
        parse_count(&self.run(script).await?)
    }

    async fn slide_texts(&mut self, index: usize) -> Result<Vec<String>> {
        let script = self.dialect.slide_texts(self.handle()?, index);
        Ok(split_paragraphs(&self.run(script).await?))
    }

    async fn notes_texts(&mut self, index: usize) -> Result<Vec<String>> {
        let script = self.dialect.notes_texts(self.handle()?, index);
        Ok(split_paragraphs(&self.run(script).await?))
    }

    async fn save(&mut self, path: &Path) -> Result<()> {
        let script = self.dialect.save(self.handle()?, path);
        let handle = parse_handle(&self.run(script).await?)?;
        self.handle = Some(handle);
        Ok(())
    }

    async fn insert_file_slides(&mut self, path: &Path, at: usize) -> Result<usize> {
        let script = self.dialect.insert_file(self.handle()?, path, at);
        parse_count(&self.run(script).await?)
    }

    async fn duplicate_slides(&mut self, sources: &[usize], insert_at: usize) -> Result<usize> {
        for (source, target) in duplicate_moves(sources, insert_at) {
            let script = self.dialect.duplicate(self.handle()?, source, target);
            self.run(script).await?;
        }
        Ok(sources.len())
    }

    async fn find_replace_texts(
        &mut self,
        slides: &[usize],
        pairs: &[(String, String)],
    ) -> Result<usize> {
        if slides.is_empty() || pairs.iter().all(|(f, _)| f.is_empty()) {
            return Ok(0);
        }
        let script = self.dialect.find_replace(self.handle()?, slides, pairs);
        parse_count(&self.run(script).await?)
    }

    async fn render_slide(
        &mut self,
        index: usize,
        path: &Path,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<()> {
        let scratch = tempfile::tempdir().map_err(|e| ServiceError::io(std::env::temp_dir(), e))?;
        let export_dir = scratch.path().join("export");
        let script = self.dialect.export_slide(
            self.handle()?,
            index,
            path,
            &export_dir,
            format,
            self.width,
            flags,
        );
        self.run(script).await?;

        if self.dialect.exports_via_folder() {
            let exported = find_folder_export(&export_dir, index + 1)?;
            let img = image::open(&exported)?.to_rgba8();
            raster::save_image(img, path, format)?;
        }
        Ok(())
    }

    async fn render_shapes(
        &mut self,
        index: usize,
        dir: &Path,
        stem: &str,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Result<Vec<PathBuf>> {
        let handle = self.handle()?.to_string();
        if let Some(script) = self
            .dialect
            .export_shapes(&handle, index, dir, stem, format, flags)
        {
            let out = self.run(script).await?;
            return Ok(output_lines(&out)
                .into_iter()
                .filter(|l| !l.trim().is_empty())
                .map(PathBuf::from)
                .collect());
        }

        warn!(
            backend = %self.dialect.kind(),
            "shape export is not scriptable here; rendering a saved copy"
        );
        let scratch = tempfile::tempdir().map_err(|e| ServiceError::io(std::env::temp_dir(), e))?;
        let copy = scratch.path().join("shapes.pptx");
        self.save(&copy).await?;
        let mut rendered = self.fallback.open_pptx(&copy).await?;
        rendered.render_shapes(index, dir, stem, format, flags).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let script = self.dialect.close(&handle);
            self.run(script).await?;
            debug!(backend = %self.dialect.kind(), handle = %handle, "closed presentation");
        }
        Ok(())
    }
}
