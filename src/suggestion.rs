//! Best-effort split of the model's answer into title, description and tags.
//!
//! The raw text stays the source of truth; this only feeds the copy fields
//! of the UI and is allowed to come back empty.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Longest title the prompt asks for, in characters
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Whatever follows the tag line (usually the rationale)
    pub notes: Option<String>,
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"【([^】]+)】").expect("static regex"))
}

fn tag_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[,、，]").expect("static regex"))
}

fn clean(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | ':' | '：'))
}

fn non_empty(text: &str) -> Option<String> {
    let text = clean(text);
    (!text.is_empty()).then(|| text.to_string())
}

impl Suggestion {
    pub fn parse(text: &str) -> Self {
        let markers: Vec<_> = marker_regex().captures_iter(text).collect();
        let mut suggestion = Suggestion::default();

        for (i, caps) in markers.iter().enumerate() {
            let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = markers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(text.len(), |m| m.start());
            let body = &text[whole.end()..end];

            match label.as_str().trim() {
                "タイトル" => {
                    suggestion.title = body.lines().find_map(non_empty);
                }
                "説明欄" => {
                    suggestion.description = non_empty(body);
                }
                "タグ" => {
                    let mut lines = body.lines().skip_while(|line| clean(line).is_empty());
                    if let Some(tag_line) = lines.next() {
                        suggestion.tags = tag_separator()
                            .split(clean(tag_line))
                            .filter_map(non_empty)
                            .collect();
                    }
                    let rest: Vec<&str> = lines.collect();
                    suggestion.notes = non_empty(&rest.join("\n"));
                }
                _ => {}
            }
        }

        suggestion
    }

    /// Whether the title honors the requested length, if a title was found
    pub fn title_within_limit(&self) -> Option<bool> {
        self.title
            .as_ref()
            .map(|title| title.chars().count() <= TITLE_MAX_CHARS)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.tags.is_empty()
    }
}
