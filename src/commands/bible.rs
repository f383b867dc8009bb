use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{opt_range, opt_str, req_str};
use crate::bible::{BibleSource, Verse, VerseSheet, split_references};
use crate::error::{Result, ServiceError};
use crate::runtime::context::ExecutionContext;
use crate::runtime::node::{Command, CommandDefinition};
use crate::runtime::slide_range::Expr;
use crate::runtime::variables::{format_verse, placeholder_pairs, replace_all};

/// One translation with the placeholder names it fills.
#[derive(Debug, Clone)]
struct Translation {
    version: String,
    main_verse_name: String,
    each_verse_name: String,
}

/// 生成圣经经文幻灯片
///
/// Replaces the main verse placeholder everywhere, then repeats each slide
/// of `repeat_range` once per resolved verse and fills the per-verse
/// placeholders of every copy.
#[derive(Debug)]
pub struct GenerateBibleVerseCommand {
    bible_format: String,
    translations: Vec<Translation>,
    main_verses: String,
    additional_verses: String,
    repeat_range: Option<Expr>,
}

impl GenerateBibleVerseCommand {
    fn from_params(params: &Value) -> Result<Self> {
        let text = |key: &str| -> Result<String> {
            Ok(opt_str(params, key)?.unwrap_or_default().trim().to_string())
        };

        let mut translations = vec![Translation {
            version: req_str(params, "bible_version1")?,
            main_verse_name: text("main_verse_name1")?,
            each_verse_name: req_str(params, "each_verse_name1")?,
        }];
        let second = Translation {
            version: text("bible_version2")?,
            main_verse_name: text("main_verse_name2")?,
            each_verse_name: text("each_verse_name2")?,
        };
        if !second.version.is_empty() && !second.each_verse_name.is_empty() {
            translations.push(second);
        }

        Ok(Self {
            bible_format: text("bible_format")?,
            translations,
            main_verses: req_str(params, "main_verses")?.trim().to_string(),
            additional_verses: text("additional_verses")?,
            repeat_range: opt_range(params, "repeat_range")?,
        })
    }

    fn references(&self) -> Vec<String> {
        let mut refs = split_references(&self.main_verses);
        refs.extend(split_references(&self.additional_verses));
        refs
    }

    /// One row per verse position. Verse `i` of the second translation is
    /// paired with verse `i` of the first within the same reference.
    fn resolve_rows(&self, source: &dyn BibleSource) -> Result<Vec<Vec<(String, Verse)>>> {
        let mut rows: Vec<Vec<(String, Verse)>> = Vec::new();
        for reference in self.references() {
            let start = rows.len();
            for t in &self.translations {
                let verses = source.lookup(&reference, &t.version)?;
                for (i, verse) in verses.into_iter().enumerate() {
                    let entry = (t.each_verse_name.clone(), verse);
                    match rows.get_mut(start + i) {
                        Some(row) => row.push(entry),
                        None => rows.push(vec![entry]),
                    }
                }
            }
        }
        Ok(rows)
    }
}

pub struct GenerateBibleVerseDefinition;

impl CommandDefinition for GenerateBibleVerseDefinition {
    fn name(&self) -> &str {
        "GenerateBibleVerse"
    }
    fn validate(&self, params: &Value) -> Result<()> {
        GenerateBibleVerseCommand::from_params(params).map(|_| ())
    }
    fn prepare(&self, params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(GenerateBibleVerseCommand::from_params(&params)?))
    }
}

/// Find/replace pairs for every per-verse placeholder in `texts`.
fn verse_pairs(texts: &[String], row: &[(String, Verse)]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (name, verse) in row {
        let found = placeholder_pairs(texts.iter().map(String::as_str), name, |format| {
            format_verse(format, verse)
        });
        for pair in found {
            if !pairs.iter().any(|(k, _)| *k == pair.0) {
                pairs.push(pair);
            }
        }
    }
    pairs
}

/// Repeats every notes line mentioning `name` once per row and fills it.
fn expand_notes(notes: &str, name: &str, rows: &[Vec<(String, Verse)>]) -> String {
    if name.is_empty() || rows.is_empty() || !notes.contains(name) {
        return notes.to_string();
    }
    let mut out: Vec<String> = Vec::new();
    for line in notes.split('\n') {
        if !line.contains(name) {
            out.push(line.to_string());
            continue;
        }
        let texts = [line.to_string()];
        for row in rows {
            out.push(replace_all(line, &verse_pairs(&texts, row)).1);
        }
    }
    out.join("\n")
}

#[async_trait]
impl Command for GenerateBibleVerseCommand {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.progress(0, "Processing Bible Verse.");
        if !self.bible_format.is_empty() && !self.bible_format.eq_ignore_ascii_case("json") {
            warn!(format = %self.bible_format, "only JSON Bible files are read");
        }

        // Look everything up first; a missing verse leaves the slides untouched.
        let source = ctx.bible()?;
        let rows = self.resolve_rows(source.as_ref())?;
        if rows.is_empty() {
            return Err(ServiceError::VerseNotFound {
                reference: self.main_verses.clone(),
                version: self.translations[0].version.clone(),
            });
        }

        // Range data errors must surface before the deck changes.
        let repeat = match &self.repeat_range {
            Some(expr) => ctx.select(expr).await?,
            None => Vec::new(),
        };
        let slide_count = ctx.presentation()?.slide_count().await?;
        if let Some(&bad) = repeat.iter().find(|&&i| i >= slide_count) {
            return Err(ServiceError::Validation(format!(
                "`repeat_range` selects slide {} but the deck has {} slides",
                bad, slide_count
            )));
        }
        if repeat.is_empty() {
            warn!("no repeating slides selected for Bible verses");
        }

        for t in self.translations.iter().filter(|t| !t.main_verse_name.is_empty()) {
            ctx.variables.set_string(&t.main_verse_name, &self.main_verses);
        }
        ctx.apply_variables().await?;

        let copies = rows.len();
        let duplicated = repeat.len() * (copies - 1);
        if duplicated > 0 {
            ctx.progress(0, &format!("Duplicating {} slides for Bible Verse.", duplicated));
        }

        let mut sorted = repeat;
        sorted.sort_unstable();
        sorted.dedup();
        // Back to front, so earlier indices stay valid.
        for (n, &index) in sorted.iter().rev().enumerate() {
            let percent = (100 * n / sorted.len()) as u8;
            ctx.progress(percent, "Duplicating slides and replacing texts.");

            let prs = ctx.presentation()?;
            for _ in 1..copies {
                prs.duplicate_slides(&[index], index + 1).await?;
            }
            for (k, row) in rows.iter().enumerate() {
                let slide = index + k;
                let texts = prs.slide_texts(slide).await?;
                let pairs = verse_pairs(&texts, row);
                prs.find_replace_texts(&[slide], &pairs).await?;
            }
        }

        let primary = &self.translations[0].each_verse_name;
        ctx.notes = expand_notes(&ctx.notes, primary, &rows);
        ctx.invalidate_index();

        info!(
            verses = copies,
            repeated = sorted.len(),
            added = duplicated,
            "generated Bible verse slides"
        );
        ctx.verses = Some(VerseSheet {
            main_verses: self.main_verses.clone(),
            primary: primary.clone(),
            rows,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verse(no: &str, text: &str) -> Verse {
        Verse {
            book: "Genesis".into(),
            short_book: "Gen".into(),
            chapter: 1,
            no: no.into(),
            text: text.into(),
        }
    }

    #[test]
    fn version_and_names_are_required() {
        let def = GenerateBibleVerseDefinition;
        assert!(def.validate(&json!({ "main_verses": "Genesis 1:1" })).is_err());
        assert!(
            def.validate(&json!({
                "bible_version1": "ESV",
                "each_verse_name1": "each_verse",
                "main_verses": "Genesis 1:1",
                "repeat_range": "note.contains_text('MK_bible_verse:repeat')"
            }))
            .is_ok()
        );
    }

    #[test]
    fn notes_lines_repeat_per_verse() {
        let rows = vec![
            vec![("each_verse".to_string(), verse("1", "a"))],
            vec![("each_verse".to_string(), verse("2", "b"))],
        ];
        let notes = "title\n{each_verse:%v}: {each_verse:%t}\nend";
        assert_eq!(expand_notes(notes, "each_verse", &rows), "title\n1: a\n2: b\nend");
        assert_eq!(expand_notes("plain", "each_verse", &rows), "plain");
    }

    #[test]
    fn pairs_cover_both_translations() {
        let row = vec![
            ("v1".to_string(), verse("1", "In the beginning")),
            ("v2".to_string(), verse("1", "Au commencement")),
        ];
        let texts = vec!["{v1:%t} / {v2:%t} ({v1:%b %c:%v})".to_string()];
        let pairs = verse_pairs(&texts, &row);
        assert_eq!(
            replace_all(&texts[0], &pairs).1,
            "In the beginning / Au commencement (Gen 1:1)"
        );
    }
}
