//! Semantic element descriptions.
//!
//! An [`Intent`] names a UI element by what it is for ("the prompt field",
//! "the Proceed button") and carries the candidate rules for finding it. The
//! rules are turned into an ordered strategy chain by [`crate::resolver`].

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::driver::{By, Query};

/// Case-insensitive text pattern. The source is kept so drivers that evaluate
/// in the page can rebuild it there.
#[derive(Clone)]
pub struct TextPattern {
    source: String,
    re: Regex,
}

impl TextPattern {
    /// Compile a pattern literal. Panics on invalid syntax, so only use it for
    /// patterns written in code; runtime text goes through [`TextPattern::literal`].
    pub fn new(source: &str) -> Self {
        let re = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|e| panic!("invalid text pattern {source:?}: {e}"));
        Self { source: source.to_string(), re }
    }

    /// Substring match on arbitrary text.
    pub fn literal(text: &str) -> Self {
        Self::new(&regex::escape(text.trim()))
    }

    /// Substring match tolerant to whitespace differences.
    pub fn loose(text: &str) -> Self {
        let parts: Vec<String> = text.split_whitespace().map(regex::escape).collect();
        Self::new(&parts.join(r"\s+"))
    }

    /// Whole-string match, surrounding whitespace ignored.
    pub fn exact(text: &str) -> Self {
        Self::new(&format!(r"^\s*{}\s*$", regex::escape(text.trim())))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for TextPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/i", self.source)
    }
}

impl From<&str> for TextPattern {
    fn from(source: &str) -> Self {
        TextPattern::new(source)
    }
}

/// Fixed priority of resolution strategies; declaration order is evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrategyKind {
    Role,
    Label,
    Placeholder,
    Css,
    Text,
}

impl StrategyKind {
    pub fn of(by: &By) -> Self {
        match by {
            By::Role { .. } => StrategyKind::Role,
            By::Label(_) => StrategyKind::Label,
            By::Placeholder(_) => StrategyKind::Placeholder,
            By::Css(_) => StrategyKind::Css,
            By::Text(_) => StrategyKind::Text,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Role => "role",
            StrategyKind::Label => "label",
            StrategyKind::Placeholder => "placeholder",
            StrategyKind::Css => "css",
            StrategyKind::Text => "text",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Intent {
    name: String,
    rules: Vec<By>,
    has_text: Option<TextPattern>,
    enabled_only: bool,
    search_frames: bool,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            has_text: None,
            enabled_only: false,
            search_frames: false,
        }
    }

    pub fn role(mut self, role: &str, name: impl Into<TextPattern>) -> Self {
        self.rules.push(By::Role { role: role.to_string(), name: Some(name.into()) });
        self
    }

    pub fn any_role(mut self, role: &str) -> Self {
        self.rules.push(By::Role { role: role.to_string(), name: None });
        self
    }

    pub fn label(mut self, pattern: impl Into<TextPattern>) -> Self {
        self.rules.push(By::Label(pattern.into()));
        self
    }

    pub fn placeholder(mut self, pattern: impl Into<TextPattern>) -> Self {
        self.rules.push(By::Placeholder(pattern.into()));
        self
    }

    pub fn css(mut self, selector: &str) -> Self {
        self.rules.push(By::Css(selector.to_string()));
        self
    }

    pub fn text(mut self, pattern: impl Into<TextPattern>) -> Self {
        self.rules.push(By::Text(pattern.into()));
        self
    }

    /// Keep only candidates whose text (descendants included) matches.
    pub fn has_text(mut self, pattern: impl Into<TextPattern>) -> Self {
        self.has_text = Some(pattern.into());
        self
    }

    pub fn enabled_only(mut self) -> Self {
        self.enabled_only = true;
        self
    }

    /// After the main document, repeat the chain inside each child frame.
    pub fn in_frames(mut self) -> Self {
        self.search_frames = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn searches_frames(&self) -> bool {
        self.search_frames
    }

    /// Queries in strategy priority order. Rules of the same kind keep the
    /// order they were declared in.
    pub fn queries(&self) -> Vec<(StrategyKind, Query)> {
        let mut out: Vec<(StrategyKind, Query)> = self
            .rules
            .iter()
            .map(|by| {
                let query = Query {
                    by: by.clone(),
                    has_text: self.has_text.clone(),
                    enabled_only: self.enabled_only,
                };
                (StrategyKind::of(by), query)
            })
            .collect();
        out.sort_by_key(|(kind, _)| *kind);
        out
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lowercase and collapse `_`, `-` and whitespace runs into single spaces.
pub fn normalize_label(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-insensitive fuzzy match: normalized substring, or every token of
/// `wanted` appearing in `candidate` in order.
pub fn fuzzy_matches(candidate: &str, wanted: &str) -> bool {
    let c = normalize_label(candidate);
    let w = normalize_label(wanted);
    if w.is_empty() {
        return false;
    }
    if c.contains(&w) {
        return true;
    }
    let mut rest = c.as_str();
    for token in w.split(' ') {
        match rest.find(token) {
            Some(pos) => rest = &rest[pos + token.len()..],
            None => return false,
        }
    }
    true
}
