//! The command variants of a service definition.

pub mod bible;
pub mod export;
pub mod file;
pub mod lyrics;
pub mod prompt;
pub mod slides;
pub mod variables;

use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::{Result, ServiceError};
use crate::runtime::context::ExecutionContext;
use crate::runtime::engine::Engine;
use crate::runtime::slide_range::Expr;

/// Registers every built-in command on `engine`.
pub fn register_standard_commands(engine: &mut Engine) {
    engine.register_command(Box::new(file::OpenFileDefinition));
    engine.register_command(Box::new(file::SaveFilesDefinition));
    engine.register_command(Box::new(slides::InsertSlidesDefinition));
    engine.register_command(Box::new(slides::DuplicateWithTextDefinition));
    engine.register_command(Box::new(lyrics::InsertLyricsDefinition));
    engine.register_command(Box::new(variables::SetVariablesDefinition));
    engine.register_command(Box::new(variables::SymboledDirectoryDefinition));
    engine.register_command(Box::new(bible::GenerateBibleVerseDefinition));
    engine.register_command(Box::new(prompt::PopupMessageDefinition));
    engine.register_command(Box::new(export::ExportSlidesDefinition));
    engine.register_command(Box::new(export::ExportShapesDefinition));
}

fn invalid(key: &str, msg: &str) -> ServiceError {
    ServiceError::Validation(format!("`{}` {}", key, msg))
}

/// A string field; `null` and absence both read as `None`.
pub(crate) fn opt_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(key, "must be a string")),
    }
}

/// A string field that must be present and non-empty.
pub(crate) fn req_str(params: &Value, key: &str) -> Result<String> {
    match opt_str(params, key)? {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(invalid(key, "is required")),
    }
}

pub(crate) fn str_list(params: &Value, key: &str) -> Result<Vec<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(key, "must contain only strings"))
            })
            .collect(),
        Some(_) => Err(invalid(key, "must be an array")),
    }
}

/// Booleans may also be written as 0/1.
pub(crate) fn opt_bool(params: &Value, key: &str) -> Result<bool> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_u64().unwrap_or(0) != 0),
        Some(_) => Err(invalid(key, "must be a boolean")),
    }
}

pub(crate) fn opt_u64(params: &Value, key: &str) -> Result<u64> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| invalid(key, "must be a non-negative integer")),
    }
}

pub(crate) fn opt_object(params: &Value, key: &str) -> Result<Map<String, Value>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(obj)) => Ok(obj.clone()),
        Some(_) => Err(invalid(key, "must be an object")),
    }
}

/// A slide-range predicate; a malformed expression is a data error.
pub(crate) fn opt_range(params: &Value, key: &str) -> Result<Option<Expr>> {
    Expr::parse_optional(opt_str(params, key)?).map_err(|e| match e {
        ServiceError::InvalidRange(msg) => invalid(key, &msg),
        other => other,
    })
}

/// Resolves placeholders in a path taken from command data.
pub(crate) fn resolve_path(ctx: &ExecutionContext, raw: &str) -> PathBuf {
    PathBuf::from(ctx.variables.resolve(raw))
}

/// Slides selected by `range`, or every slide when there is none.
pub(crate) async fn select_or_all(ctx: &mut ExecutionContext, range: Option<&Expr>) -> Result<Vec<usize>> {
    match range {
        Some(expr) => ctx.select(expr).await,
        None => {
            let count = ctx.presentation()?.slide_count().await?;
            Ok((0..count).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_helpers() {
        let params = json!({
            "s": "x", "empty": "", "n": 3, "list": ["a", "b"], "bad_list": [1],
            "b": true, "range": "note.contains_text('x')", "bad_range": "note.("
        });
        assert_eq!(opt_str(&params, "s").unwrap(), Some("x"));
        assert_eq!(opt_str(&params, "missing").unwrap(), None);
        assert!(opt_str(&params, "n").is_err());
        assert!(req_str(&params, "empty").is_err());
        assert_eq!(str_list(&params, "list").unwrap(), vec!["a", "b"]);
        assert!(str_list(&params, "bad_list").is_err());
        assert!(opt_bool(&params, "b").unwrap());
        assert!(opt_bool(&params, "n").unwrap());
        assert_eq!(opt_u64(&params, "n").unwrap(), 3);
        assert!(opt_range(&params, "range").unwrap().is_some());
        assert!(matches!(
            opt_range(&params, "bad_range"),
            Err(ServiceError::Validation(_))
        ));
    }
}
