//! Slide-range predicates such as `note.contains_text('MK_bible_verse:repeat')`.
//!
//! Expressions are parsed into a closed AST and evaluated against the text
//! of each slide and its notes page. Besides `contains_text`, the language
//! accepts `and`/`or`/`not`, parentheses, and literal slide indices
//! (`3`, `[4, 5, 6]`), which are zero-based.

use std::fmt;

use crate::backend::Presentation;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Text frames on the slide itself.
    Slide,
    /// The notes page of the slide.
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Contains {
        target: Target,
        text: String,
        ignore_case: bool,
        whole_words: bool,
    },
    Indices(Vec<usize>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Text of one slide, as seen by predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideText {
    pub text: String,
    pub notes: String,
}

/// Per-slide text snapshot of a presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideTextIndex {
    pub slides: Vec<SlideText>,
}

impl SlideTextIndex {
    pub fn new(slides: Vec<SlideText>) -> Self {
        Self { slides }
    }

    pub async fn build(prs: &mut dyn Presentation) -> Result<Self> {
        let count = prs.slide_count().await?;
        let mut slides = Vec::with_capacity(count);
        for index in 0..count {
            let text = prs.slide_texts(index).await?.join("\n");
            let notes = prs.notes_texts(index).await?.join("\n");
            slides.push(SlideText { text, notes });
        }
        Ok(Self { slides })
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Every slide text, then every notes text.
    pub fn all_texts(&self) -> Vec<String> {
        self.slides
            .iter()
            .map(|s| s.text.clone())
            .chain(self.slides.iter().map(|s| s.notes.clone()))
            .collect()
    }
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Parses an optional range field: empty or blank means "no range".
    pub fn parse_optional(source: Option<&str>) -> Result<Option<Expr>> {
        match source.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => Expr::parse(s).map(Some),
        }
    }

    pub fn matches(&self, index: usize, slide: &SlideText) -> bool {
        match self {
            Expr::Contains {
                target,
                text,
                ignore_case,
                whole_words,
            } => {
                let haystack = match target {
                    Target::Slide => &slide.text,
                    Target::Note => &slide.notes,
                };
                contains_text(haystack, text, *ignore_case, *whole_words)
            }
            Expr::Indices(indices) => indices.contains(&index),
            Expr::Not(inner) => !inner.matches(index, slide),
            Expr::And(a, b) => a.matches(index, slide) && b.matches(index, slide),
            Expr::Or(a, b) => a.matches(index, slide) || b.matches(index, slide),
        }
    }

    /// Matching slide indices, ascending. A bare index literal is returned
    /// as written.
    pub fn select(&self, index: &SlideTextIndex) -> Vec<usize> {
        if let Expr::Indices(indices) = self {
            return indices.clone();
        }
        index
            .slides
            .iter()
            .enumerate()
            .filter(|(i, slide)| self.matches(*i, slide))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn first(&self, index: &SlideTextIndex) -> Option<usize> {
        if let Expr::Indices(indices) = self {
            return indices.first().copied();
        }
        index
            .slides
            .iter()
            .enumerate()
            .find(|(i, slide)| self.matches(*i, slide))
            .map(|(i, _)| i)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Contains {
                target,
                text,
                ignore_case,
                whole_words,
            } => {
                let target = match target {
                    Target::Slide => "slide",
                    Target::Note => "note",
                };
                write!(f, "{}.contains_text('{}'", target, text.replace('\'', "\\'"))?;
                if *ignore_case || *whole_words {
                    write!(f, ", ignore_case={}", py_bool(*ignore_case))?;
                }
                if *whole_words {
                    write!(f, ", whole_words=True")?;
                }
                f.write_str(")")
            }
            Expr::Indices(indices) => {
                let items: Vec<String> = indices.iter().map(usize::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Expr::Not(inner) => write!(f, "not ({})", inner),
            Expr::And(a, b) => write!(f, "({}) and ({})", a, b),
            Expr::Or(a, b) => write!(f, "({}) or ({})", a, b),
        }
    }
}

fn py_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

fn contains_text(haystack: &str, needle: &str, ignore_case: bool, whole_words: bool) -> bool {
    if needle.is_empty() {
        return false;
    }
    let (haystack, needle) = if ignore_case {
        (haystack.to_lowercase(), needle.to_lowercase())
    } else {
        (haystack.to_string(), needle.to_string())
    };
    if !whole_words {
        return haystack.contains(&needle);
    }

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(&needle).any(|(start, m)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + m.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Splits ascending indices into inclusive runs of consecutive numbers.
pub fn contiguous_ranges(indices: &[usize]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &n in indices {
        match ranges.last_mut() {
            Some((_, end)) if n == *end + 1 => *end = n,
            _ => ranges.push((n, n)),
        }
    }
    ranges
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(usize),
    Dot,
    Comma,
    Eq,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let invalid = |msg: String| ServiceError::InvalidRange(format!("{} in `{}`", msg, source));
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(_, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(invalid("unterminated string".into()));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let mut n: usize = 0;
                while let Some(&(_, d)) = chars.peek() {
                    let Some(digit) = d.to_digit(10) else { break };
                    n = n
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit as usize))
                        .ok_or_else(|| invalid("index too large".into()))?;
                    chars.next();
                }
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(invalid(format!("unexpected character `{}`", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> ServiceError {
        ServiceError::InvalidRange(format!("{} in `{}`", msg, self.source))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.next() == Some(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(k)) if k == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(expr)
            }
            Some(Token::Int(n)) => Ok(Expr::Indices(vec![n])),
            Some(Token::LBracket) => {
                let mut indices = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::Indices(indices));
                }
                loop {
                    match self.next() {
                        Some(Token::Int(n)) => indices.push(n),
                        _ => return Err(self.error("expected slide index")),
                    }
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err(self.error("expected `,` or `]`")),
                    }
                }
                Ok(Expr::Indices(indices))
            }
            Some(Token::Ident(name)) => {
                let target = match name.as_str() {
                    "slide" => Target::Slide,
                    "note" => Target::Note,
                    _ => return Err(self.error(&format!("unknown name `{}`", name))),
                };
                self.parse_call(target)
            }
            _ => Err(self.error("expected predicate")),
        }
    }

    fn parse_call(&mut self, target: Target) -> Result<Expr> {
        self.expect(Token::Dot, "`.`")?;
        match self.next() {
            Some(Token::Ident(method)) if method == "contains_text" => {}
            _ => return Err(self.error("expected `contains_text`")),
        }
        self.expect(Token::LParen, "`(`")?;
        let text = match self.next() {
            Some(Token::Str(s)) => s,
            _ => return Err(self.error("expected quoted text")),
        };

        let mut flags = [false, false];
        let mut positional = 0;
        loop {
            match self.next() {
                Some(Token::RParen) => break,
                Some(Token::Comma) => {}
                _ => return Err(self.error("expected `,` or `)`")),
            }
            if self.peek() == Some(&Token::RParen) {
                self.pos += 1;
                break;
            }
            let slot = match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                (Some(Token::Ident(name)), Some(Token::Eq)) => {
                    let slot = match name.as_str() {
                        "ignore_case" => 0,
                        "whole_words" => 1,
                        _ => return Err(self.error(&format!("unknown argument `{}`", name))),
                    };
                    self.pos += 2;
                    slot
                }
                _ => {
                    positional += 1;
                    if positional > 2 {
                        return Err(self.error("too many arguments"));
                    }
                    positional - 1
                }
            };
            flags[slot] = match self.next() {
                Some(Token::Ident(b)) if b == "True" || b == "true" => true,
                Some(Token::Ident(b)) if b == "False" || b == "false" => false,
                _ => return Err(self.error("expected True or False")),
            };
        }

        Ok(Expr::Contains {
            target,
            text,
            ignore_case: flags[0],
            whole_words: flags[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SlideTextIndex {
        let slide = |text: &str, notes: &str| SlideText {
            text: text.to_string(),
            notes: notes.to_string(),
        };
        SlideTextIndex::new(vec![
            slide("Welcome", ""),
            slide("{verse}", "MK_bible_verse"),
            slide("{verse}", "MK_bible_verse:repeat"),
            slide("{verse}", "MK_bible_verse:repeat"),
            slide("Announcements", "mk_separator"),
            slide("Bye", "MK_bible_verse:repeat"),
        ])
    }

    #[test]
    fn note_predicate_selects_in_order() {
        let expr = Expr::parse("note.contains_text('MK_bible_verse:repeat')").unwrap();
        assert_eq!(expr.select(&index()), vec![2, 3, 5]);
        assert_eq!(expr.first(&index()), Some(2));
    }

    #[test]
    fn slide_predicate_and_flags() {
        let expr = Expr::parse(r#"slide.contains_text("welcome", ignore_case=True)"#).unwrap();
        assert_eq!(expr.select(&index()), vec![0]);

        let expr = Expr::parse("slide.contains_text('verse', False, True)").unwrap();
        assert_eq!(expr.select(&index()), vec![1, 2, 3]);
        let expr = Expr::parse("slide.contains_text('come', whole_words=True)").unwrap();
        assert!(expr.select(&index()).is_empty());
    }

    #[test]
    fn boolean_operators() {
        let expr = Expr::parse(
            "note.contains_text('MK_bible_verse') and not note.contains_text(':repeat')",
        )
        .unwrap();
        assert_eq!(expr.select(&index()), vec![1]);

        let expr = Expr::parse("slide.contains_text('Bye') or 0").unwrap();
        assert_eq!(expr.select(&index()), vec![0, 5]);
    }

    #[test]
    fn literal_indices() {
        assert_eq!(Expr::parse("[4, 2]").unwrap().select(&index()), vec![4, 2]);
        assert_eq!(Expr::parse("3").unwrap().first(&index()), Some(3));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for bad in [
            "note.contains_text(",
            "page.contains_text('x')",
            "note.contains('x')",
            "note.contains_text('x', maybe)",
            "note.contains_text('x') extra",
            "__import__('os')",
        ] {
            assert!(
                matches!(Expr::parse(bad), Err(ServiceError::InvalidRange(_))),
                "{} should fail",
                bad
            );
        }
    }

    #[test]
    fn display_parses_back() {
        let expr = Expr::parse("not note.contains_text('it\\'s', ignore_case=True)").unwrap();
        assert_eq!(Expr::parse(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn runs_of_consecutive_indices() {
        assert_eq!(contiguous_ranges(&[1, 2, 3, 7, 9, 10]), vec![(1, 3), (7, 7), (9, 10)]);
        assert!(contiguous_ranges(&[]).is_empty());
    }

    #[test]
    fn empty_range_field_is_none() {
        assert_eq!(Expr::parse_optional(Some("  ")).unwrap(), None);
        assert_eq!(Expr::parse_optional(None).unwrap(), None);
    }
}
