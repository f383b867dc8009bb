use crate::dsl::{CommandRecord, ServiceDefinition};
use serde_json::{Map, Value, json};

pub struct ServiceBuilder {
    pub commands: Vec<CommandRecord>, // public so tests can tweak records in place
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// 添加任意类型的命令
    pub fn command(self, kind: &str, name: &str) -> CommandBuilder {
        CommandBuilder {
            service_builder: self,
            record: CommandRecord::new(kind, name),
        }
    }

    pub fn open_file(self, name: &str, filename: &str) -> Self {
        self.command("OpenFile", name)
            .param("filename", filename)
            .build()
    }

    pub fn new_presentation(self, name: &str) -> Self {
        self.open_file(name, "")
    }

    pub fn save_files(self, name: &str, filename: &str) -> Self {
        self.command("SaveFiles", name)
            .param("filename", filename)
            .build()
    }

    pub fn set_variables(self, name: &str, vars: &[(&str, &str)]) -> Self {
        let str_dict: Map<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        self.command("SetVariables", name)
            .param("str_dict", Value::Object(str_dict))
            .param("format_dict", json!({}))
            .build()
    }

    pub fn popup(self, name: &str, message: &str) -> Self {
        self.command("PopupMessage", name)
            .param("message", message)
            .build()
    }

    pub fn build(self) -> ServiceDefinition {
        ServiceDefinition {
            commands: self.commands,
        }
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CommandBuilder {
    service_builder: ServiceBuilder,
    record: CommandRecord,
}

impl CommandBuilder {
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.record.data.insert(key.to_string(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.record.enabled = false;
        self
    }

    pub fn build(mut self) -> ServiceBuilder {
        self.service_builder.commands.push(self.record);
        self.service_builder
    }
}
