//! Lightweight HTML document scanner
//!
//! Single-pass tag scanner feeding the HTML evaluation stages. This is not a
//! spec-conformant HTML parser: it extracts the element inventory, parent
//! links, visible text and a handful of structural signals the checks need,
//! and tolerates malformed markup instead of rejecting it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("attribute regex")
});

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));

/// Elements that never take a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Block-level elements that may not nest inside `<p>`
const BLOCK_IN_P: &[&str] = &["div", "section", "article", "aside", "header", "footer"];

/// One opening tag found in the document
#[derive(Debug, Clone)]
pub struct Element {
    /// Lowercased tag name
    pub name: String,
    /// Attributes in source order; `None` value for bare attributes
    pub attrs: Vec<(String, Option<String>)>,
    /// Index of the enclosing element, if any
    pub parent: Option<usize>,
}

impl Element {
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(k, _)| k == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }
}

/// Scanned document
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    source: String,
    elements: Vec<Element>,
    text: String,
    nesting_violations: Vec<String>,
    has_doctype: bool,
    bare_table_rows: usize,
    close_counts: HashMap<String, usize>,
}

impl HtmlDocument {
    pub fn parse(source: &str) -> Self {
        Scanner::new(source).scan()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements.iter().filter(move |e| e.name == name)
    }

    pub fn has_doctype(&self) -> bool {
        self.has_doctype
    }

    /// `id` values that occur more than once, with their counts
    pub fn duplicate_ids(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for el in &self.elements {
            if let Some(id) = el.attr("id") {
                *counts.entry(id).or_default() += 1;
            }
        }
        let mut dups: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, n)| (id.to_string(), n))
            .collect();
        dups.sort();
        dups
    }

    /// Unique nesting problems found during the scan
    pub fn nesting_violations(&self) -> &[String] {
        &self.nesting_violations
    }

    /// `<tr>` elements sitting directly under `<table>` without `<tbody>`
    pub fn bare_table_rows(&self) -> usize {
        self.bare_table_rows
    }

    /// Opening tags of `name` with no matching close (or vice versa)
    pub fn unbalanced(&self, name: &str) -> bool {
        let opens = self.find_all(name).count();
        let closes = self.close_counts.get(name).copied().unwrap_or(0);
        opens != closes
    }

    pub fn comment_mismatch(&self) -> bool {
        self.source.matches("<!--").count() != self.source.matches("-->").count()
    }

    /// Visible text, entity-decoded and whitespace-collapsed
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn title(&self) -> Option<String> {
        TITLE_RE
            .captures(&self.source)
            .map(|c| collapse_whitespace(&decode_entities(&c[1])))
            .filter(|t| !t.is_empty())
    }

    /// Inner markup of every `name` element, regex-extracted
    pub fn inner_html(&self, name: &str) -> Vec<String> {
        let re = Regex::new(&format!(r"(?is)<{0}\b[^>]*>(.*?)</{0}>", regex::escape(name)));
        match re {
            Ok(re) => re
                .captures_iter(&self.source)
                .map(|c| c[1].to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Bodies of `<script>` elements without a `src` attribute
    pub fn inline_script_bodies(&self) -> Vec<String> {
        static INLINE_SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script>").expect("script regex")
        });
        INLINE_SCRIPT_RE
            .captures_iter(&self.source)
            .filter(|c| !c[1].to_ascii_lowercase().contains("src"))
            .map(|c| c[2].to_string())
            .collect()
    }

    /// Whether any ancestor of the element at `index` has the given name
    pub fn has_ancestor(&self, index: usize, name: &str) -> bool {
        let mut current = self.elements.get(index).and_then(|e| e.parent);
        while let Some(idx) = current {
            if self.elements[idx].name == name {
                return true;
            }
            current = self.elements[idx].parent;
        }
        false
    }
}

struct Scanner<'a> {
    source: &'a str,
    /// ASCII-lowercased copy with identical byte offsets, for tag searches
    lower: String,
    pos: usize,
    elements: Vec<Element>,
    stack: Vec<(String, usize)>,
    text: String,
    nesting: Vec<String>,
    bare_table_rows: usize,
    close_counts: HashMap<String, usize>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            lower: source.to_ascii_lowercase(),
            pos: 0,
            elements: Vec::new(),
            stack: Vec::new(),
            text: String::new(),
            nesting: Vec::new(),
            bare_table_rows: 0,
            close_counts: HashMap::new(),
        }
    }

    fn scan(mut self) -> HtmlDocument {
        let has_doctype = self
            .source
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("<!doctype");

        while self.pos < self.source.len() {
            let rest = &self.source[self.pos..];
            if rest.starts_with("<!--") {
                self.skip_past("-->");
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.skip_past(">");
            } else if rest.starts_with("</") {
                self.close_tag();
            } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                self.open_tag();
            } else {
                self.take_text();
            }
        }

        self.nesting.dedup();
        HtmlDocument {
            source: self.source.to_string(),
            elements: self.elements,
            text: collapse_whitespace(&self.text),
            nesting_violations: self.nesting,
            has_doctype,
            bare_table_rows: self.bare_table_rows,
            close_counts: self.close_counts,
        }
    }

    fn skip_past(&mut self, terminator: &str) {
        match self.source[self.pos..].find(terminator) {
            Some(offset) => self.pos += offset + terminator.len(),
            None => self.pos = self.source.len(),
        }
    }

    fn take_text(&mut self) {
        let rest = &self.source[self.pos..];
        // A stray leading '<' belongs to this text segment, not a tag
        let start = if rest.starts_with('<') { 1 } else { 0 };
        let end = rest[start..]
            .find('<')
            .map(|o| o + start)
            .unwrap_or(rest.len());
        let segment = &rest[..end];
        if !segment.trim().is_empty() {
            self.text.push_str(&decode_entities(segment));
            self.text.push(' ');
        }
        self.pos += end;
    }

    fn close_tag(&mut self) {
        let rest = &self.source[self.pos..];
        let end = rest.find('>').map(|o| o + 1).unwrap_or(rest.len());
        let name: String = rest[2..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if !name.is_empty() {
            *self.close_counts.entry(name.clone()).or_default() += 1;
            if let Some(at) = self.stack.iter().rposition(|(n, _)| *n == name) {
                self.stack.truncate(at);
            }
        }
        self.pos += end;
    }

    fn open_tag(&mut self) {
        let rest = &self.source[self.pos..];
        let end = match find_tag_end(rest) {
            Some(end) => end,
            None => {
                self.pos = self.source.len();
                return;
            }
        };
        let inner = &rest[1..end - 1];
        let name: String = inner
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if name.is_empty() {
            self.pos += end;
            return;
        }

        let attr_src = inner[name.len()..].trim_end_matches('/');
        let attrs = parse_attrs(attr_src);
        let self_closing = inner.ends_with('/');

        self.record_nesting(&name);
        if name == "tr" {
            if let Some((parent, _)) = self.stack.last() {
                if parent == "table" {
                    self.bare_table_rows += 1;
                }
            }
        }

        let parent = self.stack.last().map(|(_, idx)| *idx);
        let index = self.elements.len();
        self.elements.push(Element {
            name: name.clone(),
            attrs,
            parent,
        });

        self.pos += end;
        if name == "script" || name == "style" {
            // Raw text elements: everything up to the matching close is opaque
            let close = format!("</{}", name);
            match self.lower[self.pos..].find(&close) {
                Some(offset) => {
                    self.pos += offset + close.len();
                    self.skip_past(">");
                    *self.close_counts.entry(name).or_default() += 1;
                }
                None => self.pos = self.source.len(),
            }
            return;
        }
        if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            self.stack.push((name, index));
        }
    }

    fn record_nesting(&mut self, name: &str) {
        let inside = |stack: &[(String, usize)], target: &str| stack.iter().any(|(n, _)| n == target);
        if name == "p" && inside(&self.stack, "p") {
            self.nesting.push("<p> nested inside <p>".to_string());
        }
        if BLOCK_IN_P.contains(&name) && inside(&self.stack, "p") {
            self.nesting
                .push("Block element nested inside <p>".to_string());
        }
        if name == "a" && inside(&self.stack, "a") {
            self.nesting.push("<a> nested inside <a>".to_string());
        }
    }
}

/// Offset one past the closing `>`, honoring quoted attribute values
fn find_tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

fn parse_attrs(src: &str) -> Vec<(String, Option<String>)> {
    ATTR_RE
        .captures_iter(src)
        .map(|c| {
            let name = c[1].to_ascii_lowercase();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| m.as_str().to_string());
            (name, value)
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Demo &amp; Co</title></head>
<body>
  <p id="intro">Hello <a href="/a">first <a href="/b">second</a></a></p>
  <div id="intro">duplicate</div>
  <table><tr><td>x</td></tr></table>
  <script>console.log("hi")</script>
  <img src="/logo.png">
</body>
</html>"#;

    #[test]
    fn test_elements_and_attrs() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.find_all("a").count(), 2);
        let html = doc.find_all("html").next().unwrap();
        assert_eq!(html.attr("lang"), Some("en"));
        assert!(doc.has_doctype());
    }

    #[test]
    fn test_duplicate_ids() {
        let doc = HtmlDocument::parse(PAGE);
        let dups = doc.duplicate_ids();
        assert_eq!(dups, vec![("intro".to_string(), 2)]);
    }

    #[test]
    fn test_nesting_violations() {
        let doc = HtmlDocument::parse(PAGE);
        assert!(doc
            .nesting_violations()
            .contains(&"<a> nested inside <a>".to_string()));
    }

    #[test]
    fn test_bare_table_rows() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.bare_table_rows(), 1);

        let wrapped = HtmlDocument::parse("<table><tbody><tr><td>x</td></tr></tbody></table>");
        assert_eq!(wrapped.bare_table_rows(), 0);
    }

    #[test]
    fn test_title_and_text() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.title().as_deref(), Some("Demo & Co"));
        assert!(doc.text().contains("Hello"));
        // Script bodies are not visible text
        assert!(!doc.text().contains("console.log"));
    }

    #[test]
    fn test_script_bodies_are_opaque() {
        let doc =
            HtmlDocument::parse("<body><script>var a = \"<p>not a tag</p>\";</script></body>");
        assert_eq!(doc.find_all("p").count(), 0);
        assert!(!doc.unbalanced("script"));
    }

    #[test]
    fn test_inline_script_extraction() {
        let doc = HtmlDocument::parse(
            "<script src=\"app.js\"></script><script>eval(payload)</script>",
        );
        let bodies = doc.inline_script_bodies();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("eval("));
    }

    #[test]
    fn test_ancestor_lookup() {
        let doc = HtmlDocument::parse("<form><label><input type=\"text\"></label></form>");
        let input_idx = doc
            .elements()
            .iter()
            .position(|e| e.name == "input")
            .unwrap();
        assert!(doc.has_ancestor(input_idx, "label"));
        assert!(doc.has_ancestor(input_idx, "form"));
        assert!(!doc.has_ancestor(input_idx, "table"));
    }

    #[test]
    fn test_comment_mismatch() {
        assert!(HtmlDocument::parse("<body><!-- open</body>").comment_mismatch());
        assert!(!HtmlDocument::parse("<body><!-- ok --></body>").comment_mismatch());
    }

    #[test]
    fn test_quoted_gt_in_attribute() {
        let doc = HtmlDocument::parse(r#"<a href="/x?a>b" id="link">text</a>"#);
        let a = doc.find_all("a").next().unwrap();
        assert_eq!(a.attr("id"), Some("link"));
    }
}
