use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::error::Result;
use crate::runtime::context::ExecutionContext;

/// 运行时命令接口
#[async_trait]
pub trait Command: Send + Sync + Debug {
    /// 运行时执行
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()>;
}

/// 命令工厂/定义接口
pub trait CommandDefinition: Send + Sync {
    fn name(&self) -> &str;

    /// Other type names accepted for the same command.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn validate(&self, params: &Value) -> Result<()>;

    fn prepare(&self, params: Value) -> Result<Box<dyn Command>>;
}
