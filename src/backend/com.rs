//! PowerPoint over COM, scripted through PowerShell (Windows).

use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::pptx::PptxBackend;
use super::script::{Dialect, ScriptPresentation, ScriptRunner, parse_handle};
use super::{Backend, BackendKind, ExportFlags, ImageFormat, Presentation};
use crate::config::AppConfig;
use crate::error::{Result, ServiceError};

const PRELUDE: &str = r#"$ErrorActionPreference = 'Stop'
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8
$app = New-Object -ComObject PowerPoint.Application
"#;

const PROBE: &str = r#"$ErrorActionPreference = 'Stop'
$null = [type]::GetTypeFromProgID('PowerPoint.Application', $true)
Write-Output 'ok'
"#;

// Shape type 14 is msoPlaceholder; placeholder type 2 is the body.
const TEXT_HELPERS: &str = r#"function Write-Paragraphs($shapes, $bodyOnly) {
  foreach ($sh in $shapes) {
    if (-not $sh.HasTextFrame) { continue }
    if ($bodyOnly -and -not ($sh.Type -eq 14 -and $sh.PlaceholderFormat.Type -eq 2)) { continue }
    if (-not $sh.TextFrame.HasText) { continue }
    foreach ($line in ($sh.TextFrame.TextRange.Text -split "[`r`n`v]")) { Write-Output $line }
  }
}
"#;

/// Single-quoted PowerShell literal.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// PowerPoint resolves relative paths against its own working directory.
fn quote_path(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    quote(&absolute.to_string_lossy())
}

fn filter_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "PNG",
        ImageFormat::Jpg => "JPG",
        ImageFormat::Gif => "GIF",
        ImageFormat::Tif => "TIF",
        ImageFormat::Bmp => "BMP",
    }
}

/// ppShapeFormat value for `Shape.Export`.
fn shape_format(format: ImageFormat) -> u8 {
    match format {
        ImageFormat::Gif => 0,
        ImageFormat::Jpg => 1,
        ImageFormat::Png => 2,
        ImageFormat::Bmp => 3,
        ImageFormat::Tif => 2,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PowerShellDialect;

impl PowerShellDialect {
    /// Looks the deck up by `FullName`; two decks may share a file name.
    fn with_presentation(&self, handle: &str, body: &str) -> String {
        format!(
            "{}$prs = $null\nforeach ($p in $app.Presentations) {{ if ($p.FullName -eq {h}) {{ $prs = $p; break }} }}\nif ($prs -eq $null) {{ throw ('presentation is not open: ' + {h}) }}\n{}",
            PRELUDE,
            body,
            h = quote(handle),
        )
    }
}

impl Dialect for PowerShellDialect {
    fn kind(&self) -> BackendKind {
        BackendKind::Com
    }

    fn open(&self, path: &Path) -> String {
        format!(
            "{}$prs = $app.Presentations.Open({}, 0, 0, -1)\nWrite-Output $prs.FullName\n",
            PRELUDE,
            quote_path(path)
        )
    }

    fn new_presentation(&self) -> String {
        format!(
            "{}$prs = $app.Presentations.Add(-1)\nWrite-Output $prs.FullName\n",
            PRELUDE
        )
    }

    fn slide_count(&self, handle: &str) -> String {
        self.with_presentation(handle, "Write-Output $prs.Slides.Count\n")
    }

    fn slide_texts(&self, handle: &str, index: usize) -> String {
        let body = format!(
            "{}Write-Paragraphs $prs.Slides.Item({}).Shapes $false\n",
            TEXT_HELPERS,
            index + 1
        );
        self.with_presentation(handle, &body)
    }

    fn notes_texts(&self, handle: &str, index: usize) -> String {
        let body = format!(
            "{}Write-Paragraphs $prs.Slides.Item({}).NotesPage.Shapes $true\n",
            TEXT_HELPERS,
            index + 1
        );
        self.with_presentation(handle, &body)
    }

    fn save(&self, handle: &str, path: &Path) -> String {
        let body = format!(
            "$prs.SaveAs({}, 24)\nWrite-Output $prs.FullName\n",
            quote_path(path)
        );
        self.with_presentation(handle, &body)
    }

    fn insert_file(&self, handle: &str, path: &Path, at: usize) -> String {
        let body = format!(
            "$n = $prs.Slides.InsertFromFile({}, {}, 1, -1)\nWrite-Output $n\n",
            quote_path(path),
            at
        );
        self.with_presentation(handle, &body)
    }

    fn duplicate(&self, handle: &str, source: usize, target: usize) -> String {
        // Duplicate() leaves the notes body empty, so it is copied explicitly.
        let body = format!(
            r#"$src = $prs.Slides.Item({src})
$dup = $src.Duplicate().Item(1)
foreach ($s in $src.NotesPage.Shapes) {{
  if ($s.Type -eq 14 -and $s.HasTextFrame -and $s.PlaceholderFormat.Type -eq 2) {{
    foreach ($d in $dup.NotesPage.Shapes) {{
      if ($d.Type -eq 14 -and $d.HasTextFrame -and $d.PlaceholderFormat.Type -eq 2) {{
        $d.TextFrame.TextRange.Text = $s.TextFrame.TextRange.Text
      }}
    }}
  }}
}}
$dup.MoveTo({dst})
Write-Output 1
"#,
            src = source + 1,
            dst = target + 1
        );
        self.with_presentation(handle, &body)
    }

    fn find_replace(&self, handle: &str, slides: &[usize], pairs: &[(String, String)]) -> String {
        let mut body = String::from("$n = 0\n$pairs = @(\n");
        for (find, replace) in pairs.iter().filter(|(f, _)| !f.is_empty()) {
            let _ = writeln!(body, "  ,@({}, {})", quote(find), quote(replace));
        }
        body.push_str(")\n");
        let indices: Vec<String> = slides.iter().map(|i| (i + 1).to_string()).collect();
        let _ = write!(
            body,
            r#"foreach ($i in @({})) {{
  foreach ($sh in $prs.Slides.Item($i).Shapes) {{
    if (-not $sh.HasTextFrame) {{ continue }}
    $tr = $sh.TextFrame.TextRange
    foreach ($p in $pairs) {{
      $after = 0
      while ($true) {{
        $r = $tr.Replace($p[0], $p[1], $after, 0, 0)
        if ($r -eq $null) {{ break }}
        $after = $r.Start + $r.Length - 1
        $n++
      }}
    }}
  }}
}}
Write-Output $n
"#,
            indices.join(", ")
        );
        self.with_presentation(handle, &body)
    }

    fn export_slide(
        &self,
        handle: &str,
        index: usize,
        target: &Path,
        _scratch: &Path,
        format: ImageFormat,
        width: u32,
        flags: ExportFlags,
    ) -> String {
        // Flags are applied to a throwaway copy so the deck stays untouched.
        let mut body = format!(
            "$w = {}\n$h = [int]($w * $prs.PageSetup.SlideHeight / $prs.PageSetup.SlideWidth)\n$s = $prs.Slides.Item({}).Duplicate().Item(1)\n",
            width,
            index + 1
        );
        if flags.contains(ExportFlags::SKIP_BACKGROUND) {
            body.push_str("$s.FollowMasterBackground = 0\n$s.Background.Fill.Visible = 0\n");
        }
        if flags.contains(ExportFlags::SKIP_SHAPES) {
            body.push_str(
                "$s.DisplayMasterShapes = 0\nfor ($k = $s.Shapes.Count; $k -ge 1; $k--) { $s.Shapes.Item($k).Delete() }\n",
            );
        }
        let _ = write!(
            body,
            "try {{ $s.Export({}, '{}', $w, $h) }} finally {{ $s.Delete() }}\nWrite-Output 'done'\n",
            quote_path(target),
            filter_name(format)
        );
        self.with_presentation(handle, &body)
    }

    fn export_shapes(
        &self,
        handle: &str,
        index: usize,
        dir: &Path,
        stem: &str,
        format: ImageFormat,
        flags: ExportFlags,
    ) -> Option<String> {
        let body = format!(
            r#"$k = 0
foreach ($sh in $prs.Slides.Item({slide}).Shapes) {{
  $isText = $sh.HasTextFrame -and $sh.TextFrame.HasText
  $isPicture = $sh.Type -eq 13
  if (($isText -and ${text}) -or ($isPicture -and ${picture})) {{
    $k++
    $file = Join-Path {dir} ('{stem}_' + $k + '.{ext}')
    $sh.Export($file, {fmt})
    Write-Output $file
  }}
}}
"#,
            slide = index + 1,
            text = flags.wants_text_shapes(),
            picture = flags.wants_picture_shapes(),
            dir = quote_path(dir),
            stem = stem.replace('\'', "''"),
            ext = format.extension(),
            fmt = shape_format(format),
        );
        Some(self.with_presentation(handle, &body))
    }

    fn close(&self, handle: &str) -> String {
        self.with_presentation(handle, "$prs.Close()\nWrite-Output 'closed'\n")
    }
}

/// True on Windows when PowerShell runs and PowerPoint is registered.
pub async fn is_available() -> bool {
    if !cfg!(windows) {
        return false;
    }
    ScriptRunner::POWERSHELL.probe(PROBE).await
}

pub struct ComBackend {
    runner: ScriptRunner,
    dialect: Arc<PowerShellDialect>,
    width: u32,
    fallback: Arc<PptxBackend>,
}

impl ComBackend {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            runner: ScriptRunner::POWERSHELL,
            dialect: Arc::new(PowerShellDialect),
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
impl Backend for ComBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Com
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn Presentation>> {
        let absolute = std::path::absolute(path).map_err(|e| ServiceError::io(path, e))?;
        if !absolute.exists() {
            return Err(ServiceError::FileNotFound(absolute));
        }
        let out = self.runner.run(&self.dialect.open(&absolute)).await?;
        let handle = parse_handle(&out)?;
        info!(path = %absolute.display(), handle = %handle, "opened presentation in PowerPoint");
        Ok(self.wrap(handle))
    }

    async fn new_presentation(&self) -> Result<Box<dyn Presentation>> {
        let out = self.runner.run(&self.dialect.new_presentation()).await?;
        Ok(self.wrap(parse_handle(&out)?))
    }
}
