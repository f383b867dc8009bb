//! `$(SYMBOL)` directory prefixes in path fields.
//!
//! Fields whose key ends with `filename` or `dirname` hold one path; fields
//! ending with `filelist` hold an array of paths.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: BTreeMap<String, String>,
}

fn is_path_key(key: &str) -> bool {
    key.ends_with("filename") || key.ends_with("dirname")
}

impl SymbolTable {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, symbol: &str, dir: &str) {
        self.entries.insert(symbol.to_string(), dir.to_string());
    }

    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.entries.get(symbol).map(String::as_str)
    }

    /// Merges string entries of a `SymboledDirectory` record.
    pub fn merge(&mut self, data: &Map<String, Value>) {
        for (symbol, dir) in data {
            if let Some(dir) = dir.as_str() {
                self.insert(symbol, dir);
            }
        }
    }

    /// `$(TEMPLATES)/a.pptx` becomes `<dir>/a.pptx`. Unknown symbols are left alone.
    pub fn expand_path(&self, path: &str) -> Option<String> {
        self.entries.iter().find_map(|(symbol, dir)| {
            path.strip_prefix(&format!("$({})", symbol))
                .map(|rest| format!("{}{}", dir, rest))
        })
    }

    /// The reverse of `expand_path`; the first matching directory wins.
    pub fn fold_path(&self, path: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(_, dir)| !dir.is_empty())
            .find_map(|(symbol, dir)| {
                path.strip_prefix(dir.as_str())
                    .map(|rest| format!("$({}){}", symbol, rest))
            })
    }

    pub fn expand(&self, data: &mut Map<String, Value>) {
        self.translate(data, |path| self.expand_path(path));
    }

    pub fn to_symbols(&self, data: &mut Map<String, Value>) {
        self.translate(data, |path| self.fold_path(path));
    }

    fn translate<F>(&self, data: &mut Map<String, Value>, convert: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.entries.is_empty() {
            return;
        }
        for (key, value) in data.iter_mut() {
            if is_path_key(key) {
                if let Some(new) = value.as_str().and_then(&convert) {
                    *value = Value::String(new);
                }
            } else if key.ends_with("filelist") {
                if let Some(items) = value.as_array_mut() {
                    for item in items {
                        if let Some(new) = item.as_str().and_then(&convert) {
                            *item = Value::String(new);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> SymbolTable {
        let mut t = SymbolTable::default();
        t.insert("TEMPLATES", "/srv/church/templates");
        t
    }

    #[test]
    fn expands_path_fields_only() {
        let mut data = json!({
            "filename": "$(TEMPLATES)/service.pptx",
            "out_dirname": "$(TEMPLATES)/out",
            "filelist": ["$(TEMPLATES)/a.pptx", "b.pptx"],
            "message": "$(TEMPLATES) stays"
        });
        table().expand(data.as_object_mut().unwrap());
        assert_eq!(data["filename"], "/srv/church/templates/service.pptx");
        assert_eq!(data["out_dirname"], "/srv/church/templates/out");
        assert_eq!(data["filelist"], json!(["/srv/church/templates/a.pptx", "b.pptx"]));
        assert_eq!(data["message"], "$(TEMPLATES) stays");
    }

    #[test]
    fn folding_reverses_expansion() {
        let mut data = json!({ "notes_filename": "/srv/church/templates/notes.txt" });
        let t = table();
        t.to_symbols(data.as_object_mut().unwrap());
        assert_eq!(data["notes_filename"], "$(TEMPLATES)/notes.txt");
        t.expand(data.as_object_mut().unwrap());
        assert_eq!(data["notes_filename"], "/srv/church/templates/notes.txt");
    }

    #[test]
    fn unknown_symbol_is_kept() {
        assert_eq!(table().expand_path("$(OTHER)/x"), None);
    }
}
