//! Run-scoped placeholder variables.
//!
//! String variables replace `{name}` literally. Format variables also
//! accept a format suffix, `{name:%B %#d}`, rendered from the value at the
//! time the placeholder is resolved.

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::bible::Verse;
use crate::error::{Result, ServiceError};

const FORMAT_SEP: char = ':';
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
const DEFAULT_VERSE_FORMAT: &str = "%v %t";

#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    DateTime(NaiveDateTime),
}

impl FormatValue {
    /// Decodes `{ "format_type": "DateTimeFormat", "value": "2024-03-31" }`.
    /// `"today"`, `"now"` and an empty value mean the current local time.
    pub fn from_json(name: &str, value: &Value) -> Result<Self> {
        let invalid = |msg: &str| ServiceError::Validation(format!("format variable `{}`: {}", name, msg));

        let (format_type, raw) = match value {
            Value::String(s) => ("DateTimeFormat", s.as_str()),
            Value::Object(obj) => (
                obj.get("format_type")
                    .and_then(Value::as_str)
                    .unwrap_or("DateTimeFormat"),
                obj.get("value").and_then(Value::as_str).unwrap_or(""),
            ),
            _ => return Err(invalid("expected an object")),
        };

        match format_type {
            "DateTimeFormat" => parse_datetime(raw)
                .map(FormatValue::DateTime)
                .ok_or_else(|| invalid(&format!("cannot parse date `{}`", raw))),
            other => Err(invalid(&format!("unknown format type `{}`", other))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FormatValue::DateTime(dt) => serde_json::json!({
                "format_type": "DateTimeFormat",
                "value": dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            }),
        }
    }

    /// Renders with `format`; an empty format uses the type's default.
    pub fn render(&self, format: &str) -> String {
        match self {
            FormatValue::DateTime(dt) => {
                let format = if format.is_empty() {
                    DEFAULT_DATE_FORMAT
                } else {
                    format
                };
                format_datetime(dt, format)
            }
        }
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("today") || raw.eq_ignore_ascii_case("now") {
        return Some(Local::now().naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DEFAULT_DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// `%#m` and `%#d` drop the leading zero; other codes follow strftime.
pub fn format_datetime(dt: &NaiveDateTime, format: &str) -> String {
    const CODES: [&str; 14] = [
        "%Y", "%y", "%m", "%#m", "%d", "%#d", "%W", "%w", "%U", "%j", "%B", "%b", "%A", "%a",
    ];
    let mut out = String::with_capacity(format.len() + 8);
    let mut rest = format;
    'scan: while !rest.is_empty() {
        if rest.starts_with('%') {
            for code in CODES {
                if let Some(tail) = rest.strip_prefix(code) {
                    let rendered = match code {
                        "%#m" => dt.format("%-m").to_string(),
                        "%#d" => dt.format("%-d").to_string(),
                        other => dt.format(other).to_string(),
                    };
                    out.push_str(&rendered);
                    rest = tail;
                    continue 'scan;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// `%B` long book name, `%b` short book name, `%c` chapter, `%v` verse
/// number, `%t` verse text.
pub fn format_verse(format: &str, verse: &Verse) -> String {
    let format = if format.is_empty() {
        DEFAULT_VERSE_FORMAT
    } else {
        format
    };
    format
        .replace("%B", &verse.book)
        .replace("%b", &verse.short_book)
        .replace("%c", &verse.chapter.to_string())
        .replace("%v", &verse.no)
        .replace("%t", &verse.text)
}

/// Occurrences of `{name}` and `{name:FORMAT}` in `text`, as
/// `(placeholder, format)` with an empty format for the bare form.
pub fn placeholders<'a>(text: &'a str, name: &str) -> Vec<(&'a str, &'a str)> {
    let open = format!("{{{}", name);
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(pos) = text[offset..].find(&open) {
        let start = offset + pos;
        let after = &text[start + open.len()..];
        if after.starts_with('}') {
            found.push((&text[start..start + open.len() + 1], ""));
        } else if let Some(format) = after.strip_prefix(FORMAT_SEP) {
            if let Some(close) = format.find('}') {
                if close > 0 {
                    let end = start + open.len() + 1 + close + 1;
                    found.push((&text[start..end], &format[..close]));
                }
            }
        }
        offset = start + open.len();
    }
    found
}

/// Find/replace pairs for every placeholder of `name` found in `texts`.
pub fn placeholder_pairs<'a, I, F>(texts: I, name: &str, render: F) -> Vec<(String, String)>
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> String,
{
    let mut pairs: Vec<(String, String)> = Vec::new();
    if name.is_empty() {
        return pairs;
    }
    for text in texts {
        for (key, format) in placeholders(text, name) {
            if !pairs.iter().any(|(k, _)| k == key) {
                pairs.push((key.to_string(), render(format)));
            }
        }
    }
    pairs
}

/// Applies the pairs in order. Returns the number of pairs that matched.
pub fn replace_all(text: &str, pairs: &[(String, String)]) -> (usize, String) {
    let mut count = 0;
    let mut text = text.to_string();
    for (find, replace) in pairs {
        if !find.is_empty() && text.contains(find.as_str()) {
            text = text.replace(find.as_str(), replace);
            count += 1;
        }
    }
    (count, text)
}

/// `name` becomes `{name}`; already-braced keys are kept.
pub fn braced(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 2);
    if !key.starts_with('{') {
        out.push('{');
    }
    out.push_str(key);
    if !key.ends_with('}') {
        out.push('}');
    }
    out
}

/// 变量替换表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableTable {
    strings: Vec<(String, String)>,
    formats: Vec<(String, FormatValue)>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.formats.is_empty()
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        let key = braced(key);
        match self.strings.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.strings.push((key, value.to_string())),
        }
    }

    pub fn set_format(&mut self, name: &str, value: FormatValue) {
        let name = name.trim_matches(|c| c == '{' || c == '}').to_string();
        match self.formats.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.formats.push((name, value)),
        }
    }

    /// Merges a `str_dict` object. Non-string values are stored as JSON text.
    pub fn merge_strings(&mut self, dict: &Map<String, Value>) {
        for (key, value) in dict {
            match value {
                Value::String(s) => self.set_string(key, s),
                other => self.set_string(key, &other.to_string()),
            }
        }
    }

    pub fn merge_formats(&mut self, dict: &Map<String, Value>) -> Result<()> {
        for (name, value) in dict {
            let value = FormatValue::from_json(name, value)?;
            self.set_format(name, value);
        }
        Ok(())
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        let key = braced(key);
        self.strings
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_format(&self, name: &str) -> Option<&FormatValue> {
        self.formats.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Replacement pairs for everything that can occur in `texts`: all
    /// string variables, then each format placeholder found in the texts.
    pub fn pairs_for<'a, I>(&self, texts: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let texts: Vec<&str> = texts.into_iter().collect();
        let mut pairs = self.strings.clone();
        for (name, value) in &self.formats {
            for pair in placeholder_pairs(texts.iter().copied(), name, |f| value.render(f)) {
                if !pairs.iter().any(|(k, _)| *k == pair.0) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }

    /// Substitutes every known placeholder in `text`.
    pub fn resolve(&self, text: &str) -> String {
        let pairs = self.pairs_for([text]);
        replace_all(text, &pairs).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> FormatValue {
        FormatValue::DateTime(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn string_keys_are_braced() {
        let mut vars = VariableTable::new();
        vars.set_string("pastor", "Kim");
        vars.set_string("{host}", "Lee");
        assert_eq!(vars.resolve("{pastor} and {host}"), "Kim and Lee");
        assert_eq!(vars.get_string("pastor"), Some("Kim"));
    }

    #[test]
    fn later_values_override() {
        let mut vars = VariableTable::new();
        vars.set_string("x", "1");
        vars.set_string("x", "2");
        assert_eq!(vars.resolve("{x}"), "2");
    }

    #[test]
    fn date_codes() {
        let value = date(2024, 3, 3);
        assert_eq!(value.render(""), "2024-03-03");
        assert_eq!(value.render("%#m/%#d/%y"), "3/3/24");
        assert_eq!(value.render("%A, %B %d"), "Sunday, March 03");
        assert_eq!(value.render("%j %a %b"), "063 Sun Mar");
        assert_eq!(value.render("100%"), "100%");
    }

    #[test]
    fn format_placeholders_resolve_with_their_own_format() {
        let mut vars = VariableTable::new();
        vars.set_format("service_date", date(2023, 12, 24));
        let text = "{service_date} / {service_date:%Y%m%d} / {service_date:%B %#d}";
        assert_eq!(vars.resolve(text), "2023-12-24 / 20231224 / December 24");
    }

    #[test]
    fn format_dict_decoding() {
        let mut vars = VariableTable::new();
        let dict = serde_json::json!({
            "d": { "format_type": "DateTimeFormat", "value": "2022-01-02" },
            "now": { "format_type": "DateTimeFormat", "value": "today" }
        });
        vars.merge_formats(dict.as_object().unwrap()).unwrap();
        assert_eq!(vars.resolve("{d:%d.%m}"), "02.01");
        assert!(!vars.resolve("{now}").contains('{'));

        let bad = serde_json::json!({ "x": { "format_type": "Color", "value": "red" } });
        assert!(matches!(
            vars.merge_formats(bad.as_object().unwrap()),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn placeholder_scanning() {
        let found = placeholders("{v} {v:%t} {vv} {v:} {v:%c:%v}", "v");
        assert_eq!(found, vec![("{v}", ""), ("{v:%t}", "%t"), ("{v:%c:%v}", "%c:%v")]);
    }

    #[test]
    fn verse_formatting() {
        let verse = Verse {
            book: "Genesis".into(),
            short_book: "Gen".into(),
            chapter: 1,
            no: "1".into(),
            text: "In the beginning".into(),
        };
        assert_eq!(format_verse("%B %c:%v", &verse), "Genesis 1:1");
        assert_eq!(format_verse("%b", &verse), "Gen");
        assert_eq!(format_verse("", &verse), "1 In the beginning");
        let pairs = placeholder_pairs(["{each_verse:%v} {each_verse:%t}"], "each_verse", |f| {
            format_verse(f, &verse)
        });
        assert_eq!(
            replace_all("{each_verse:%v} {each_verse:%t}", &pairs).1,
            "1 In the beginning"
        );
    }
}
