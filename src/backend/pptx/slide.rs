//! Text access on slide and notes DOMs.
//!
//! Text is read per paragraph (`a:p`). Replacements work on the `a:t`
//! runs of a paragraph; a key that spans several runs is handled by
//! merging the paragraph's text into its first run. Line feeds in a
//! replacement become `a:br` breaks, matching how text is read.

use super::xml::{Element, Node};

fn collect_mut<'a>(el: &'a mut Element, name: &str, out: &mut Vec<&'a mut Element>) {
    for child in el.elements_mut() {
        if child.name == name {
            out.push(child);
        } else {
            collect_mut(child, name, out);
        }
    }
}

fn paragraph_text(p: &Element) -> String {
    let mut out = String::new();
    push_paragraph_text(p, &mut out);
    out
}

fn push_paragraph_text(el: &Element, out: &mut String) {
    for node in &el.children {
        if let Node::Element(child) = node {
            match child.name.as_str() {
                "a:t" => out.push_str(&child.text()),
                "a:br" => out.push('\n'),
                _ => push_paragraph_text(child, out),
            }
        }
    }
}

/// Text of every paragraph under `root`, in document order.
pub fn paragraph_texts(root: &Element) -> Vec<String> {
    let mut paragraphs = Vec::new();
    root.descendants("a:p", &mut paragraphs);
    paragraphs.into_iter().map(paragraph_text).collect()
}

fn placeholder_type(sp: &Element) -> Option<&str> {
    sp.path(&["p:nvSpPr", "p:nvPr", "p:ph"])
        .map(|ph| ph.attr("type").unwrap_or("body"))
}

/// Paragraphs of a notes page body. Falls back to every paragraph when the
/// page has no body placeholder.
pub fn notes_paragraphs(root: &Element) -> Vec<String> {
    let mut shapes = Vec::new();
    root.descendants("p:sp", &mut shapes);
    let bodies: Vec<&Element> = shapes
        .into_iter()
        .filter(|sp| placeholder_type(sp) == Some("body"))
        .collect();
    if bodies.is_empty() {
        return paragraph_texts(root);
    }
    bodies.into_iter().flat_map(paragraph_texts).collect()
}

/// Splits every run holding a line feed into runs separated by `a:br`,
/// each carrying the run's properties.
fn split_line_breaks(p: &mut Element) {
    let has_break = |el: &Element| el.name == "a:r" && el.text().contains('\n');
    if !p.elements().any(|el| has_break(el)) {
        return;
    }
    let children = std::mem::take(&mut p.children);
    for node in children {
        let run = match node {
            Node::Element(el) if has_break(&el) => el,
            other => {
                p.children.push(other);
                continue;
            }
        };
        let text = run.text();
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                let mut br = Element::new("a:br");
                if let Some(props) = run.child("a:rPr") {
                    br.push(props.clone());
                }
                p.push(br);
            }
            let mut piece = run.clone();
            if let Some(t) = piece.child_mut("a:t") {
                t.set_text(line);
            }
            p.push(piece);
        }
    }
}

/// Replaces `find` in one paragraph; returns the number of runs changed.
fn replace_in_paragraph(p: &mut Element, find: &str, replace: &str) -> usize {
    let changed = replace_runs(p, find, replace);
    if changed > 0 && replace.contains('\n') {
        split_line_breaks(p);
    }
    changed
}

fn replace_runs(p: &mut Element, find: &str, replace: &str) -> usize {
    let mut runs = Vec::new();
    collect_mut(p, "a:t", &mut runs);

    let texts: Vec<String> = runs.iter().map(|t| t.text()).collect();
    let joined: String = texts.concat();
    let whole = joined.matches(find).count();
    if whole == 0 {
        return 0;
    }
    let per_run: usize = texts.iter().map(|t| t.matches(find).count()).sum();

    if per_run == whole {
        let mut changed = 0;
        for (run, text) in runs.iter_mut().zip(&texts) {
            if text.contains(find) {
                run.set_text(&text.replace(find, replace));
                changed += 1;
            }
        }
        return changed;
    }

    match runs.split_first_mut() {
        Some((first, rest)) => {
            first.set_text(&joined.replace(find, replace));
            for run in rest {
                run.set_text("");
            }
            1
        }
        None => 0,
    }
}

/// Applies every pair, in order, to all paragraphs under `root`.
pub fn replace_texts(root: &mut Element, pairs: &[(String, String)]) -> usize {
    let mut changed = 0;
    for (find, replace) in pairs {
        if find.is_empty() {
            continue;
        }
        root.for_each_mut("a:p", &mut |p| {
            changed += replace_in_paragraph(p, find, replace);
        });
    }
    changed
}

/// Name of a layout or master (`p:cSld/@name`).
pub fn common_slide_name(root: &Element) -> Option<&str> {
    root.child("p:cSld").and_then(|c| c.attr("name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::pptx::xml;

    const SLIDE: &str = r#"<p:sld xmlns:a="a" xmlns:p="p"><p:cSld><p:spTree>
<p:sp><p:txBody><a:p><a:r><a:t>Hello {na</a:t></a:r><a:r><a:t>me}!</a:t></a:r></a:p>
<a:p><a:r><a:t>{name} and {name}</a:t></a:r><a:br/><a:r><a:t>x</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:sld>"#;

    fn pairs(find: &str, replace: &str) -> Vec<(String, String)> {
        vec![(find.to_string(), replace.to_string())]
    }

    #[test]
    fn reads_paragraphs_with_breaks() {
        let root = xml::parse("s", SLIDE.as_bytes()).unwrap();
        assert_eq!(
            paragraph_texts(&root),
            vec!["Hello {name}!", "{name} and {name}\nx"]
        );
    }

    #[test]
    fn replaces_across_runs() {
        let mut root = xml::parse("s", SLIDE.as_bytes()).unwrap();
        let changed = replace_texts(&mut root, &pairs("{name}", "Ann"));
        assert_eq!(changed, 2);
        assert_eq!(paragraph_texts(&root), vec!["Hello Ann!", "Ann and Ann\nx"]);
    }

    #[test]
    fn replacement_is_idempotent() {
        let mut root = xml::parse("s", SLIDE.as_bytes()).unwrap();
        replace_texts(&mut root, &pairs("{name}", "Ann"));
        let once = root.clone();
        assert_eq!(replace_texts(&mut root, &pairs("{name}", "Ann")), 0);
        assert_eq!(root, once);
    }

    #[test]
    fn line_feeds_become_breaks() {
        let slide = r#"<p:sld xmlns:a="a" xmlns:p="p"><p:cSld><p:spTree>
<p:sp><p:txBody><a:p><a:r><a:rPr b="1"/><a:t>{lyric}</a:t></a:r><a:r><a:t> end</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:sld>"#;
        let mut root = xml::parse("s", slide.as_bytes()).unwrap();
        replace_texts(&mut root, &pairs("{lyric}", "Holy, holy\nLord God"));

        // reads back the same text it was given
        assert_eq!(paragraph_texts(&root), vec!["Holy, holy\nLord God end"]);
        let xml = root.to_xml();
        assert!(xml.contains("<a:br><a:rPr b=\"1\"/></a:br>"), "{}", xml);
        assert!(!xml.contains("Holy, holy\n"));

        let mut runs = Vec::new();
        root.descendants("a:r", &mut runs);
        assert_eq!(runs.len(), 3);
        assert!(runs[1].child("a:rPr").is_some());
    }

    #[test]
    fn notes_use_body_placeholder() {
        let notes = r#"<p:notes xmlns:a="a" xmlns:p="p"><p:cSld><p:spTree>
<p:sp><p:nvSpPr><p:nvPr><p:ph type="sldNum"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:r><a:t>3</a:t></a:r></a:p></p:txBody></p:sp>
<p:sp><p:nvSpPr><p:nvPr><p:ph type="body" idx="1"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:r><a:t>MK_verse</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:notes>"#;
        let root = xml::parse("n", notes.as_bytes()).unwrap();
        assert_eq!(notes_paragraphs(&root), vec!["MK_verse"]);
    }
}
