use serde_json::Value;
use tracing::debug;

use crate::compiler::symbols::SymbolTable;
use crate::dsl::ServiceDefinition;

/// Record type whose data is a symbol table rather than a command.
pub const SYMBOLED_DIRECTORY: &str = "SymboledDirectory";

/// 编译后的单个步骤
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    /// Position in the service definition.
    pub index: usize,
    pub kind: String,
    pub name: String,
    pub enabled: bool,
    /// Command data with directory symbols expanded.
    pub data: Value,
}

impl PlanStep {
    /// Label used in logs and errors.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.kind.clone()
        } else {
            format!("{} ({})", self.name, self.kind)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub symbols: SymbolTable,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub struct Compiler {
    symbols: SymbolTable,
}

impl Compiler {
    pub fn new(symbols: SymbolTable) -> Self {
        Self { symbols }
    }

    /// Collects directory symbols, then expands `$(SYMBOL)` prefixes in
    /// every record's path fields. Record order and indices are preserved.
    pub fn compile(&self, service: &ServiceDefinition) -> Plan {
        // 1. Pass 1: symbol tables from enabled SymboledDirectory records
        let mut symbols = self.symbols.clone();
        for record in service
            .commands
            .iter()
            .filter(|r| r.enabled && r.kind == SYMBOLED_DIRECTORY)
        {
            symbols.merge(&record.data);
        }

        // 2. Pass 2: expand
        let steps = service
            .commands
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut data = record.data.clone();
                if record.kind != SYMBOLED_DIRECTORY {
                    symbols.expand(&mut data);
                }
                PlanStep {
                    index,
                    kind: record.kind.clone(),
                    name: record.name.clone(),
                    enabled: record.enabled,
                    data: Value::Object(data),
                }
            })
            .collect::<Vec<_>>();

        debug!(steps = steps.len(), symbols = !symbols.is_empty(), "compiled service definition");
        Plan { steps, symbols }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(SymbolTable::default())
    }
}
