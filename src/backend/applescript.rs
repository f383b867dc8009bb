//! PowerPoint for Mac, scripted through `osascript`.
//!
//! The AppleScript dictionary has no slide duplication or file insertion,
//! so those go through System Events keystrokes, which needs the
//! accessibility permission for the calling terminal.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::pptx::PptxBackend;
use super::script::{Dialect, ScriptPresentation, ScriptRunner, parse_handle};
use super::{Backend, BackendKind, ExportFlags, ImageFormat, Presentation};
use crate::config::AppConfig;
use crate::error::{Result, ServiceError};

const PROBE: &str = r#"try
  get id of application "Microsoft PowerPoint"
  return "ok"
on error
  return "missing"
end try
"#;

/// Double-quoted AppleScript literal.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Reference to an open deck by its full path; file names alone can clash.
fn presentation(handle: &str) -> String {
    format!("(first presentation whose full name is {})", quote(handle))
}

fn posix_file(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("POSIX file {}", quote(&absolute.to_string_lossy()))
}

fn save_as_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "save as PNG",
        ImageFormat::Jpg => "save as JPG",
        ImageFormat::Gif => "save as GIF",
        ImageFormat::Tif => "save as TIFF",
        ImageFormat::Bmp => "save as BMP",
    }
}

fn tell_app(body: &str) -> String {
    format!("tell application \"Microsoft PowerPoint\"\n{}\nend tell\n", body)
}

fn collect_texts(target: &str) -> String {
    format!(
        r#"set out to ""
tell {target}
  repeat with k from 1 to count of shapes
    try
      if has text frame of shape k then
        set t to content of text range of text frame of shape k
        if t is not "" then set out to out & t & linefeed
      end if
    end try
  end repeat
end tell
return out"#
    )
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AppleScriptDialect;

impl Dialect for AppleScriptDialect {
    fn kind(&self) -> BackendKind {
        BackendKind::AppleScript
    }

    fn open(&self, path: &Path) -> String {
        tell_app(&format!(
            "open {}\nreturn full name of active presentation",
            posix_file(path)
        ))
    }

    fn new_presentation(&self) -> String {
        tell_app("set prs to make new presentation\nreturn full name of prs")
    }

    fn slide_count(&self, handle: &str) -> String {
        tell_app(&format!(
            "return count of slides of {}",
            presentation(handle)
        ))
    }

    fn slide_texts(&self, handle: &str, index: usize) -> String {
        tell_app(&collect_texts(&format!(
            "slide {} of {}",
            index + 1,
            presentation(handle)
        )))
    }

    fn notes_texts(&self, handle: &str, index: usize) -> String {
        tell_app(&collect_texts(&format!(
            "notes page of slide {} of {}",
            index + 1,
            presentation(handle)
        )))
    }

    fn save(&self, handle: &str, path: &Path) -> String {
        tell_app(&format!(
            "set prs to {}\nsave prs in {} as save as presentation\nreturn full name of prs",
            presentation(handle),
            posix_file(path)
        ))
    }

    fn insert_file(&self, handle: &str, path: &Path, at: usize) -> String {
        // Copy every slide of the source and paste after slide `at`.
        let target = presentation(handle);
        let paste_after = if at == 0 {
            "1".to_string()
        } else {
            at.to_string()
        };
        let mut script = String::new();
        let _ = write!(
            script,
            r#"tell application "Microsoft PowerPoint"
  set before_count to count of slides of {target}
  open {source}
  set src_name to full name of active presentation
  activate
end tell
delay 0.5
tell application "System Events" to tell process "Microsoft PowerPoint"
  keystroke "a" using command down
  keystroke "c" using command down
end tell
delay 0.3
tell application "Microsoft PowerPoint"
  close (first presentation whose full name is src_name) saving no
  activate
  try
    select slide {paste_after} of {target}
  end try
end tell
delay 0.3
tell application "System Events" to tell process "Microsoft PowerPoint"
  keystroke "v" using command down
end tell
delay 0.5
tell application "Microsoft PowerPoint"
  if {at} is 0 and before_count > 0 then move slide 1 of {target} to after slide (count of slides of {target} - before_count + 1) of {target}
  return (count of slides of {target}) - before_count
end tell
"#,
            target = target,
            source = posix_file(path),
            paste_after = paste_after,
            at = at,
        );
        script
    }

    fn duplicate(&self, handle: &str, source: usize, target: usize) -> String {
        let prs = presentation(handle);
        let copy = source + 2;
        let want = target + 1;
        // The keystroke leaves the copy right after its source.
        let placement = match want.cmp(&copy) {
            std::cmp::Ordering::Equal => String::new(),
            std::cmp::Ordering::Less => format!(
                "  move slide {copy} of {prs} to before slide {want} of {prs}\n"
            ),
            std::cmp::Ordering::Greater => format!(
                "  move slide {copy} of {prs} to after slide {want} of {prs}\n"
            ),
        };
        format!(
            r#"tell application "Microsoft PowerPoint"
  activate
  select slide {src} of {prs}
end tell
tell application "System Events" to keystroke "d" using command down
delay 0.2
tell application "Microsoft PowerPoint"
{placement}  return 1
end tell
"#,
            src = source + 1,
        )
    }

    fn find_replace(&self, handle: &str, slides: &[usize], pairs: &[(String, String)]) -> String {
        let list = |items: Vec<String>| format!("{{{}}}", items.join(", "));
        let finds = list(
            pairs
                .iter()
                .filter(|(f, _)| !f.is_empty())
                .map(|(f, _)| quote(f))
                .collect(),
        );
        let replaces = list(
            pairs
                .iter()
                .filter(|(f, _)| !f.is_empty())
                .map(|(_, r)| quote(r))
                .collect(),
        );
        let indices = list(slides.iter().map(|i| (i + 1).to_string()).collect());
        tell_app(&format!(
            r#"set finds to {finds}
set replaces to {replaces}
set n to 0
repeat with i in {indices}
  tell slide (i as integer) of {prs}
    repeat with k from 1 to count of shapes
      try
        if has text frame of shape k then
          set t to content of text range of text frame of shape k
          set changed to false
          repeat with p from 1 to count of finds
            set f to item p of finds
            if t contains f then
              set AppleScript's text item delimiters to f
              set parts to text items of t
              set AppleScript's text item delimiters to item p of replaces
              set t to parts as text
              set AppleScript's text item delimiters to ""
              set changed to true
              set n to n + 1
            end if
          end repeat
          if changed then set content of text range of text frame of shape k to t
        end if
      end try
    end repeat
  end tell
end repeat
return n"#,
            finds = finds,
            replaces = replaces,
            indices = indices,
            prs = presentation(handle),
        ))
    }

    fn export_slide(
        &self,
        handle: &str,
        _index: usize,
        _target: &Path,
        scratch: &Path,
        format: ImageFormat,
        _width: u32,
        flags: ExportFlags,
    ) -> String {
        if flags.intersects(ExportFlags::SKIP_BACKGROUND | ExportFlags::SKIP_SHAPES) {
            warn!("background and shape skipping are ignored by the AppleScript backend");
        }
        tell_app(&format!(
            "save {} in {} as {}\nreturn \"done\"",
            presentation(handle),
            posix_file(scratch),
            save_as_type(format)
        ))
    }

    fn exports_via_folder(&self) -> bool {
        true
    }

    fn export_shapes(
        &self,
        _handle: &str,
        _index: usize,
        _dir: &Path,
        _stem: &str,
        _format: ImageFormat,
        _flags: ExportFlags,
    ) -> Option<String> {
        None
    }

    fn close(&self, handle: &str) -> String {
        tell_app(&format!(
            "close {} saving no\nreturn \"closed\"",
            presentation(handle)
        ))
    }
}

/// True on macOS when `osascript` runs and PowerPoint is installed.
pub async fn is_available() -> bool {
    if !cfg!(target_os = "macos") {
        return false;
    }
    ScriptRunner::OSASCRIPT.probe(PROBE).await
}

pub struct AppleScriptBackend {
    runner: ScriptRunner,
    dialect: Arc<AppleScriptDialect>,
    width: u32,
    fallback: Arc<PptxBackend>,
}

impl AppleScriptBackend {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            runner: ScriptRunner::OSASCRIPT,
            dialect: Arc::new(AppleScriptDialect),
            width: config.export_width,
            fallback: Arc::new(PptxBackend::from_config(config)),
        }
    }

    fn wrap(&self, handle: String) -> Box<dyn Presentation> {
        Box::new(ScriptPresentation::new(
            self.runner,
            Arc::clone(&self.dialect),
            handle,
            self.width,
            Arc::clone(&self.fallback),
        ))
    }
}

#[async_trait]
impl Backend for AppleScriptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::AppleScript
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn Presentation>> {
        if !path.exists() {
            return Err(ServiceError::FileNotFound(path.to_path_buf()));
        }
        let out = self.runner.run(&self.dialect.open(path)).await?;
        let handle = parse_handle(&out)?;
        info!(path = %path.display(), handle = %handle, "opened presentation in PowerPoint");
        Ok(self.wrap(handle))
    }

    async fn new_presentation(&self) -> Result<Box<dyn Presentation>> {
        let out = self.runner.run(&self.dialect.new_presentation()).await?;
        Ok(self.wrap(parse_handle(&out)?))
    }
}
