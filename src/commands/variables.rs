use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::opt_object;
use crate::compiler::core::SYMBOLED_DIRECTORY;
use crate::error::{Result, ServiceError};
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};
use crate::runtime::variables::{FormatValue, replace_all};

// --- SET VARIABLES ---

#[derive(Debug)]
pub struct SetVariablesCommand {
    str_dict: Map<String, Value>,
    format_dict: Map<String, Value>,
}

impl SetVariablesCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let format_dict = opt_object(params, "format_dict")?;
        for (name, value) in &format_dict {
            FormatValue::from_json(name, value)?;
        }
        Ok(Self {
            str_dict: opt_object(params, "str_dict")?,
            format_dict,
        })
    }
}

pub struct SetVariablesDefinition;

impl CommandDefinition for SetVariablesDefinition {
    fn name(&self) -> &str {
        "SetVariables"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        SetVariablesCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(SetVariablesCommand::from_params(&params)?))
    }
}

#[async_trait]
impl Command for SetVariablesCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        // "today" is evaluated now, not when the definition was loaded
        ctx.variables.merge_strings(&self.str_dict);
        ctx.variables.merge_formats(&self.format_dict)?;

        if ctx.has_presentation() {
            let changed = ctx.apply_variables().await?;
            info!(changed, "substituted variables");
        } else {
            let pairs = ctx.variables.pairs_for([ctx.notes.as_str()]);
            ctx.notes = replace_all(&ctx.notes, &pairs).1;
            debug!(variables = self.str_dict.len() + self.format_dict.len(), "no presentation open; notes only");
        }
        Ok(())
    }
}

// --- SYMBOLED DIRECTORY ---

/// Directory symbols are applied when the definition is compiled; at run
/// time the record does nothing.
#[derive(Debug)]
pub struct SymboledDirectoryCommand;

pub struct SymboledDirectoryDefinition;

impl CommandDefinition for SymboledDirectoryDefinition {
    fn name(&self) -> &str {
        SYMBOLED_DIRECTORY
    }
    fn validate(&self, params: &Value) -> Result<()> {
        let Some(obj) = params.as_object() else {
            return Err(ServiceError::Validation("symbol table must be an object".into()));
        };
        match obj.iter().find(|(_, v)| !v.is_string()) {
            Some((key, _)) => Err(ServiceError::Validation(format!(
                "symbol `{}` must map to a directory string",
                key
            ))),
            None => Ok(()),
        }
    }
    fn prepare(&self, _params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(SymboledDirectoryCommand))
    }
}

#[async_trait]
impl Command for SymboledDirectoryCommand {
    async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_dict_is_checked_up_front() {
        let def = SetVariablesDefinition;
        assert!(def.validate(&json!({ "str_dict": { "a": "b" } })).is_ok());
        assert!(
            def.validate(&json!({ "format_dict": { "d": { "format_type": "Nope", "value": "" } } }))
                .is_err()
        );
    }

    #[test]
    fn symbols_must_be_strings() {
        let def = SymboledDirectoryDefinition;
        assert!(def.validate(&json!({ "T": "/templates" })).is_ok());
        assert!(def.validate(&json!({ "T": 1 })).is_err());
    }
}
