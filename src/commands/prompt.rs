use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::opt_str;
use crate::error::Result;
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};

/// Shows `message` and waits until the user acknowledges it. The user may
/// edit the deck meanwhile, so slide text is re-read afterwards.
#[derive(Debug)]
pub struct PopupMessageCommand {
    message: String,
}

pub struct PopupMessageDefinition;

impl CommandDefinition for PopupMessageDefinition {
    fn name(&self) -> &str {
        "PopupMessage"
    }
    fn aliases(&self) -> &[&str] {
        &["PromptCommand"]
    }
    fn validate(&self, params: &Value) -> Result<()> {
        opt_str(params, "message").map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(PopupMessageCommand {
            message: opt_str(&params, "message")?.unwrap_or_default().to_string(),
        }))
    }
}

#[async_trait]
impl Command for PopupMessageCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let message = ctx.variables.resolve(&self.message);
        ctx.monitor().acknowledge(&message).await?;
        ctx.invalidate_index();
        debug!("popup acknowledged");
        Ok(())
    }
}
