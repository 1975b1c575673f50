//! Wikitext cleanup: drops boilerplate sections, then strips markup to prose.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::config::DEFAULT_SECTIONS_TO_REMOVE;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"^<(/?)([A-Za-z][A-Za-z0-9]*)\b[^<>]*?(/?)>").expect("valid regex");
    static ref ENTITY: Regex = Regex::new(r"^&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z]{2,8});").expect("valid regex");
    static ref MAGIC_WORD: Regex = Regex::new(r"^__[A-Z]+__").expect("valid regex");
    static ref COMMENT: Regex = Regex::new(r"<!--.*?-->").expect("valid regex");
}

/// Tags whose content is not part of the readable text.
const INVISIBLE_TAGS: &[&str] = &[
    "ref", "references", "math", "chem", "gallery", "imagemap", "nowiki", "pre", "score",
    "source", "syntaxhighlight", "timeline", "templatedata", "hiero", "graph",
];

const HIDDEN_NAMESPACES: &[&str] = &["file:", "image:", "category:"];

const URL_PREFIXES: &[&str] = &["http://", "https://", "ftp://", "//"];

#[derive(Debug, Error, PartialEq)]
pub enum MarkupError {
    #[error("unterminated {0}")]
    Unterminated(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiMarkupCleaner {
    sections_to_remove: HashSet<String>,
}

impl Default for WikiMarkupCleaner {
    fn default() -> Self { Self::new(DEFAULT_SECTIONS_TO_REMOVE.iter().copied()) }
}

impl WikiMarkupCleaner {
    pub fn new<I, S>(sections_to_remove: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sections_to_remove = sections_to_remove.into_iter().map(|s| s.as_ref().trim().to_lowercase()).collect();
        Self { sections_to_remove }
    }

    /// Plain text of `raw` without deny-listed sections. Never fails: markup the
    /// parser cannot make sense of comes back unchanged.
    pub fn clean(&self, raw: &str) -> String {
        match self.try_clean(raw) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "malformed markup, keeping raw text");
                raw.to_string()
            }
        }
    }

    pub fn try_clean(&self, raw: &str) -> Result<String, MarkupError> {
        let kept = self.remove_sections(raw);
        let inline = strip_inline(&kept)?;
        Ok(finish_lines(&inline))
    }

    /// Drop every deny-listed section together with its subsections.
    fn remove_sections(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut skipping: Option<usize> = None;
        for line in raw.split_inclusive('\n') {
            let heading = parse_heading(line);
            if let (Some(level), Some((h, _))) = (skipping, &heading) {
                if *h <= level { skipping = None; }
            }
            if skipping.is_some() { continue; }
            if let Some((level, title)) = heading {
                let title = title.trim().to_lowercase();
                // empty headings are left alone
                if !title.is_empty() && self.sections_to_remove.contains(&title) {
                    skipping = Some(level);
                    continue;
                }
            }
            out.push_str(line);
        }
        out
    }
}

/// `== Title ==` → `(2, " Title ")`. The level is the shorter of the two `=` runs.
/// Comments on the heading line are ignored.
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let line = COMMENT.replace_all(line, "");
    let line = line.trim_end();
    let left = line.bytes().take_while(|&b| b == b'=').count();
    let right = line.bytes().rev().take_while(|&b| b == b'=').count();
    let level = left.min(right).min(6).min(line.len().saturating_sub(1) / 2);
    if level == 0 { return None; }
    Some((level, line[level..line.len() - level].to_string()))
}

fn strip_inline(src: &str) -> Result<String, MarkupError> {
    let mut out = String::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let rest = &src[i..];
        if rest.starts_with("<!--") {
            let end = rest.find("-->").ok_or(MarkupError::Unterminated("comment"))?;
            i += end + 3;
        } else if rest.starts_with("{{") {
            i += balanced(rest, "{{", "}}").ok_or(MarkupError::Unterminated("template"))?;
        } else if rest.starts_with("[[") {
            let len = balanced(rest, "[[", "]]").ok_or(MarkupError::Unterminated("link"))?;
            out.push_str(&wikilink_text(&rest[2..len - 2])?);
            i += len;
        } else if rest.starts_with('[') && URL_PREFIXES.iter().any(|p| rest[1..].starts_with(p)) {
            match rest.find(']') {
                Some(end) => {
                    if let Some((_, label)) = rest[1..end].split_once(char::is_whitespace) {
                        out.push_str(&strip_inline(label.trim())?);
                    }
                    i += end + 1;
                }
                None => {
                    out.push('[');
                    i += 1;
                }
            }
        } else if rest.starts_with("''") {
            i += rest.bytes().take_while(|&b| b == b'\'').count();
        } else if let Some(caps) = TAG.captures(rest) {
            let whole = caps.get(0).map_or(0, |m| m.end());
            let closing = !caps[1].is_empty();
            let self_closing = !caps[3].is_empty();
            let name = caps[2].to_ascii_lowercase();
            i += whole;
            if name == "br" {
                out.push('\n');
            } else if !closing && !self_closing && INVISIBLE_TAGS.contains(&name.as_str()) {
                i += skip_to_close_tag(&src[i..], &name).ok_or(MarkupError::Unterminated("tag"))?;
            }
        } else if let Some(caps) = ENTITY.captures(rest) {
            let whole = &caps[0];
            match decode_entity(&caps[1]) {
                Some(c) => out.push(c),
                None => out.push_str(whole),
            }
            i += whole.len();
        } else if let Some(m) = MAGIC_WORD.find(rest) {
            i += m.end();
        } else {
            let c = rest.chars().next().unwrap_or(' ');
            out.push(c);
            i += c.len_utf8();
        }
    }
    Ok(out)
}

/// Byte length of the balanced `open … close` run at the start of `s`.
fn balanced(s: &str, open: &str, close: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;
    while i < s.len() {
        let rest = &s[i..];
        if rest.starts_with(open) {
            depth += 1;
            i += open.len();
        } else if rest.starts_with(close) {
            depth -= 1;
            i += close.len();
            if depth == 0 { return Some(i); }
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    None
}

fn skip_to_close_tag(s: &str, name: &str) -> Option<usize> {
    let lower = s.to_ascii_lowercase();
    let needle = format!("</{name}");
    let start = lower.find(&needle)?;
    let end = lower[start..].find('>')?;
    Some(start + end + 1)
}

fn wikilink_text(inner: &str) -> Result<String, MarkupError> {
    let target = inner.split('|').next().unwrap_or("").trim();
    let lower = target.trim_start_matches(':').to_lowercase();
    if HIDDEN_NAMESPACES.iter().any(|ns| lower.starts_with(ns)) {
        return Ok(String::new());
    }
    let label = match inner.rsplit_once('|') {
        Some((_, label)) if !label.trim().is_empty() => label,
        _ => target,
    };
    strip_inline(label)
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "nbsp" => ' ',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "ndash" => '–',
        "mdash" => '—',
        _ => return None,
    })
}

/// Line-level cleanup: headings, table syntax, list markers, rules.
fn finish_lines(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let t = line.trim();
        if parse_heading(t).is_some() || t.starts_with("{|") || t.starts_with("|}") || t.starts_with("|-") || t.starts_with("----") {
            continue;
        }
        if let Some(caption) = t.strip_prefix("|+") {
            lines.push(caption.trim().to_string());
        } else if t.starts_with('|') || t.starts_with('!') {
            let cells: Vec<&str> = t[1..]
                .split("||")
                .flat_map(|c| c.split("!!"))
                .map(|c| c.rsplit('|').next().unwrap_or(c).trim())
                .filter(|c| !c.is_empty())
                .collect();
            lines.push(cells.join(" "));
        } else {
            lines.push(t.trim_start_matches(['*', '#', ':', ';']).trim().to_string());
        }
    }
    lines.join("\n").trim().to_string()
}
