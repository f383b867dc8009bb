use std::fs;
use std::path::Path;
use tracing::info;

use crate::compiler::symbols::SymbolTable;
use crate::dsl::ServiceDefinition;
use crate::error::{Result, ServiceError};

/// Reads a `.sdf` service definition. Parsing is strict: malformed JSON is
/// rejected with the line and column of the first error.
pub fn load_service(path: &Path) -> Result<ServiceDefinition> {
    let content = fs::read_to_string(path).map_err(|e| ServiceError::io(path, e))?;
    let service = parse_service(&content, &path.display().to_string())?;
    info!(path = %path.display(), commands = service.len(), "loaded service definition");
    Ok(service)
}

/// `source` names the input in parse errors.
pub fn parse_service(content: &str, source: &str) -> Result<ServiceDefinition> {
    let content = content.trim_start_matches('\u{feff}');
    serde_json::from_str(content).map_err(|e| ServiceError::Parse {
        path: source.to_string(),
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    })
}

pub fn service_to_string(service: &ServiceDefinition) -> Result<String> {
    serde_json::to_string_pretty(service)
        .map_err(|e| ServiceError::Validation(format!("cannot encode service definition: {}", e)))
}

/// Writes `service`, folding directories back into `$(SYMBOL)` form when a
/// symbol table is given.
pub fn save_service(path: &Path, service: &ServiceDefinition, symbols: Option<&SymbolTable>) -> Result<()> {
    let content = match symbols {
        Some(table) => {
            let mut folded = service.clone();
            for record in &mut folded.commands {
                table.to_symbols(&mut record.data);
            }
            service_to_string(&folded)?
        }
        None => service_to_string(service)?,
    };
    fs::write(path, content).map_err(|e| ServiceError::io(path, e))?;
    info!(path = %path.display(), commands = service.len(), "saved service definition");
    Ok(())
}
