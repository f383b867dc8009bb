use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{opt_range, opt_str, opt_u64, req_str, resolve_path, select_or_all};
use crate::backend::{ExportFlags, ImageFormat, Rgb};
use crate::error::{Result, ServiceError};
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};
use crate::runtime::slide_range::Expr;

/// Fields shared by both export commands.
#[derive(Debug)]
struct ExportTarget {
    slide_range: Option<Expr>,
    out_dirname: String,
    format: ImageFormat,
    flags: ExportFlags,
}

impl ExportTarget {
    fn from_params(params: &Value) -> Result<Self> {
        let image_type = opt_str(params, "image_type")?
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("png");
        Ok(Self {
            slide_range: opt_range(params, "slide_range")?,
            out_dirname: req_str(params, "out_dirname")?,
            format: ImageFormat::parse(image_type)?,
            flags: ExportFlags::from_value(opt_u64(params, "flags")?),
        })
    }
}

// --- EXPORT SLIDES ---

#[derive(Debug)]
pub struct ExportSlidesCommand {
    target: ExportTarget,
    color: Option<Rgb>,
}

impl ExportSlidesCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let color = match opt_str(params, "color")? {
            Some(c) if !c.trim().is_empty() => Some(Rgb::parse(c)?),
            _ => None,
        };
        Ok(Self {
            target: ExportTarget::from_params(params)?,
            color,
        })
    }
}

pub struct ExportSlidesDefinition;

impl CommandDefinition for ExportSlidesDefinition {
    fn name(&self) -> &str {
        "ExportSlides"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        ExportSlidesCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(ExportSlidesCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for ExportSlidesCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let t = &self.target;
        let out_dir = resolve_path(ctx, &t.out_dirname);
        let slides = select_or_all(ctx, t.slide_range.as_ref()).await?;
        ctx.progress(
            0,
            &format!("Exporting {} slides to '{}'.", slides.len(), out_dir.display()),
        );

        let color = match (t.flags.contains(ExportFlags::TRANSPARENT), self.color) {
            (true, None) => Some(Rgb::WHITE),
            (_, color) => color,
        };
        let written = ctx
            .presentation()?
            .export_slides(&slides, &out_dir, t.format, t.flags, color)
            .await?;
        info!(files = written.len(), format = t.format.extension(), "exported slides");
        Ok(())
    }
}

// --- EXPORT SHAPES ---

#[derive(Debug)]
pub struct ExportShapesCommand {
    target: ExportTarget,
}

impl ExportShapesCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let target = ExportTarget::from_params(params)?;
        if !target.format.supports_transparency() {
            return Err(ServiceError::UnsupportedFormat(format!(
                "shape export as `{}` (png or gif only)",
                target.format.extension()
            )));
        }
        Ok(Self { target })
    }
}

pub struct ExportShapesDefinition;

impl CommandDefinition for ExportShapesDefinition {
    fn name(&self) -> &str {
        "ExportShapes"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        ExportShapesCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(ExportShapesCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for ExportShapesCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let t = &self.target;
        let out_dir = resolve_path(ctx, &t.out_dirname);
        let slides = select_or_all(ctx, t.slide_range.as_ref()).await?;
        ctx.progress(
            0,
            &format!("Exporting shapes of {} slides to '{}'.", slides.len(), out_dir.display()),
        );
        let written = ctx
            .presentation()?
            .export_shapes(&slides, &out_dir, t.format, t.flags)
            .await?;
        info!(files = written.len(), format = t.format.extension(), "exported shapes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn image_type_defaults_to_png() {
        let cmd = ExportSlidesCommand::from_params(&json!({ "out_dirname": "/tmp/out" })).unwrap();
        assert_eq!(cmd.target.format, ImageFormat::Png);
        assert!(cmd.target.flags.is_empty());
        assert!(cmd.color.is_none());
    }

    #[test]
    fn unknown_types_are_unsupported() {
        let err = ExportSlidesDefinition
            .validate(&json!({ "out_dirname": "out", "image_type": "webp" }))
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedFormat(_)));

        let err = ExportShapesDefinition
            .validate(&json!({ "out_dirname": "out", "image_type": "JPEG" }))
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedFormat(_)));
        assert!(
            ExportShapesDefinition
                .validate(&json!({ "out_dirname": "out", "image_type": "GIF", "flags": 16 }))
                .is_ok()
        );
    }

    #[test]
    fn color_and_flags() {
        let cmd = ExportSlidesCommand::from_params(
            &json!({ "out_dirname": "out", "flags": 3, "color": "#00ff00" }),
        )
        .unwrap();
        assert!(cmd.target.flags.contains(ExportFlags::TRANSPARENT | ExportFlags::CLEANUP_FILES));
        assert_eq!(cmd.color, Some(Rgb(0, 255, 0)));
    }
}
