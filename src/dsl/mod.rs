pub mod builder;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 服务定义文件中的一条命令记录
///
/// `data` is kept as raw JSON so that keys unknown to the current version
/// survive a decode/encode round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl CommandRecord {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            enabled: true,
            data: Map::new(),
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// An ordered list of command records (`.sdf` file content).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ServiceDefinition {
    pub commands: Vec<CommandRecord>,
}

impl ServiceDefinition {
    pub fn new(commands: Vec<CommandRecord>) -> Self {
        Self { commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.commands.iter().filter(|c| c.enabled).count()
    }
}
