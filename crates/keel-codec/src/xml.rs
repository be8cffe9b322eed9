//! A small, strict reader and writer for the markup subset the wire format
//! uses.
//!
//! Supported: elements, single- or double-quoted attributes, text, the five
//! predefined entities, numeric character references, CDATA sections,
//! comments, and processing instructions (skipped). DOCTYPE and other
//! declarations are rejected.
//!
//! The reader parses *fragments*: zero or more top-level elements separated
//! by whitespace. Non-whitespace text outside every element is an error.
//! Every error carries the 1-based line and column where reading stopped.

use keel_contracts::error::DocumentError;

/// Nesting beyond this depth is rejected rather than recursed into.
const MAX_DEPTH: usize = 128;

/// A parsed markup node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with its attributes and children in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    /// All text beneath this element, concatenated in document order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Only the text nodes that are direct children.
    pub fn direct_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// True when the element has no child elements and only whitespace text.
    pub fn is_blank(&self) -> bool {
        self.elements().next().is_none() && self.direct_text().trim().is_empty()
    }

    /// Serialize back to markup, escaping text and attribute values.
    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attributes {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v));
            out.push('"');
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_to(out),
                Node::Text(t) => out.push_str(&escape(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(&e.children, out),
        }
    }
}

/// Escape the five reserved characters so `text` can sit inside an element
/// or a quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// True when `fragment` parses cleanly and contains at least one element.
pub fn is_markup(fragment: &str) -> bool {
    matches!(parse_fragment(fragment), Ok(nodes) if nodes.iter().any(|n| matches!(n, Node::Element(_))))
}

/// Parse a fragment into top-level nodes.
///
/// Top-level text nodes are kept only when they are whitespace; anything
/// else is a malformed document.
pub fn parse_fragment(input: &str) -> Result<Vec<Node>, DocumentError> {
    let mut reader = Reader { src: input, pos: 0 };
    reader.content(None, 0)
}

// ── Reader ────────────────────────────────────────────────────────────────────

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn bump(&mut self, n: usize) {
        self.pos += n;
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.bump(c.len_utf8());
        }
    }

    /// Build an error at byte offset `at`.
    fn error_at(&self, at: usize, cause: impl Into<String>) -> DocumentError {
        let before = &self.src[..at.min(self.src.len())];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        DocumentError::Malformed { line, column, cause: cause.into() }
    }

    fn error(&self, cause: impl Into<String>) -> DocumentError {
        self.error_at(self.pos, cause)
    }

    /// Skip past `terminator`, failing with `what` if it never appears.
    fn skip_past(&mut self, terminator: &str, what: &str) -> Result<&'a str, DocumentError> {
        match self.rest().find(terminator) {
            Some(idx) => {
                let body = &self.rest()[..idx];
                self.bump(idx + terminator.len());
                Ok(body)
            }
            None => Err(self.error(format!("unterminated {what}"))),
        }
    }

    /// Read nodes until the closing tag for `open` (or end of input at the
    /// top level).
    fn content(&mut self, open: Option<&str>, depth: usize) -> Result<Vec<Node>, DocumentError> {
        let mut nodes: Vec<Node> = Vec::new();

        loop {
            if self.eof() {
                return match open {
                    Some(name) => Err(self.error(format!("element <{name}> is never closed"))),
                    None => Ok(nodes),
                };
            }

            let rest = self.rest();
            if rest.starts_with("</") {
                let start = self.pos;
                self.bump(2);
                let name = self.name()?;
                self.skip_whitespace();
                if self.peek() != Some('>') {
                    return Err(self.error(format!("expected '>' to end closing tag </{name}")));
                }
                self.bump(1);
                return match open {
                    Some(expected) if expected == name => Ok(nodes),
                    Some(expected) => Err(self.error_at(
                        start,
                        format!("closing tag </{name}> does not match open element <{expected}>"),
                    )),
                    None => Err(self.error_at(start, format!("closing tag </{name}> has no open element"))),
                };
            } else if rest.starts_with("<!--") {
                self.bump(4);
                self.skip_past("-->", "comment")?;
            } else if rest.starts_with("<![CDATA[") {
                let start = self.pos;
                self.bump(9);
                let body = self.skip_past("]]>", "CDATA section")?;
                if open.is_none() && !body.trim().is_empty() {
                    return Err(self.error_at(start, "text outside of any element"));
                }
                push_text(&mut nodes, body);
            } else if rest.starts_with("<?") {
                self.bump(2);
                self.skip_past("?>", "processing instruction")?;
            } else if rest.starts_with("<!") {
                return Err(self.error("declarations are not supported"));
            } else if rest.starts_with('<') {
                if depth >= MAX_DEPTH {
                    return Err(self.error(format!("elements nested deeper than {MAX_DEPTH}")));
                }
                let element = self.element(depth)?;
                nodes.push(Node::Element(element));
            } else {
                let start = self.pos;
                let text = self.text()?;
                if open.is_none() && !text.trim().is_empty() {
                    return Err(self.error_at(start, "text outside of any element"));
                }
                push_text(&mut nodes, &text);
            }
        }
    }

    /// Read an element starting at '<'.
    fn element(&mut self, depth: usize) -> Result<Element, DocumentError> {
        self.bump(1);
        let name = self.name()?;
        let mut element = Element::new(name);

        loop {
            let had_space = self.peek().is_some_and(char::is_whitespace);
            self.skip_whitespace();

            match self.peek() {
                None => {
                    return Err(self.error(format!("tag <{}> is never finished", element.name)));
                }
                Some('>') => {
                    self.bump(1);
                    element.children = self.content(Some(&element.name), depth + 1)?;
                    return Ok(element);
                }
                Some('/') => {
                    self.bump(1);
                    if self.peek() != Some('>') {
                        return Err(self.error("expected '>' after '/'"));
                    }
                    self.bump(1);
                    return Ok(element);
                }
                Some(_) if !had_space => {
                    return Err(self.error("expected whitespace, '>' or '/>'"));
                }
                Some(_) => {
                    let attr_start = self.pos;
                    let (key, value) = self.attribute()?;
                    if element.attribute(&key).is_some() {
                        return Err(self.error_at(attr_start, format!("duplicate attribute '{key}'")));
                    }
                    element.attributes.push((key, value));
                }
            }
        }
    }

    fn attribute(&mut self) -> Result<(String, String), DocumentError> {
        let key = self.name()?;
        self.skip_whitespace();
        if self.peek() != Some('=') {
            return Err(self.error(format!("expected '=' after attribute '{key}'")));
        }
        self.bump(1);
        self.skip_whitespace();

        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error(format!("attribute '{key}' value must be quoted"))),
        };
        self.bump(1);
        let value_start = self.pos;
        let end = match self.rest().find(quote) {
            Some(idx) => value_start + idx,
            None => return Err(self.error(format!("attribute '{key}' value is never closed"))),
        };
        let raw = &self.src[value_start..end];
        if let Some(idx) = raw.find('<') {
            return Err(self.error_at(value_start + idx, "'<' is not allowed in attribute values"));
        }
        let value = unescape(raw, value_start, self)?;
        self.pos = end + 1;
        Ok((key, value))
    }

    fn name(&mut self) -> Result<String, DocumentError> {
        let start = self.pos;
        let mut chars = self.rest().char_indices();
        match chars.next() {
            Some((_, c)) if c.is_alphabetic() || c == '_' => {}
            _ => return Err(self.error("expected a name")),
        }
        let len = chars
            .find(|(_, c)| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
            .map(|(i, _)| i)
            .unwrap_or(self.rest().len());
        self.bump(len);
        Ok(self.src[start..start + len].to_string())
    }

    /// Read character data up to the next '<'.
    fn text(&mut self) -> Result<String, DocumentError> {
        let start = self.pos;
        let len = self.rest().find('<').unwrap_or(self.rest().len());
        let raw = &self.src[start..start + len];
        let text = unescape(raw, start, self)?;
        self.bump(len);
        Ok(text)
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    match nodes.last_mut() {
        Some(Node::Text(prev)) => prev.push_str(text),
        _ => nodes.push(Node::Text(text.to_string())),
    }
}

/// Resolve entity and character references in `raw`, which starts at byte
/// offset `offset` of the reader's source.
fn unescape(raw: &str, offset: usize, reader: &Reader<'_>) -> Result<String, DocumentError> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut consumed = 0;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let at = offset + consumed + amp;
        let after = &rest[amp + 1..];
        let semi = match after.find(';') {
            Some(i) if i <= 10 => i,
            _ => return Err(reader.error_at(at, "bare '&' must be escaped as &amp;")),
        };
        let entity = &after[..semi];
        let resolved = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    return Err(reader.error_at(at, format!("unknown entity '&{entity};'")));
                };
                match code.and_then(char::from_u32) {
                    Some(c) => c,
                    None => {
                        return Err(reader.error_at(at, format!("invalid character reference '&{entity};'")));
                    }
                }
            }
        };
        out.push(resolved);
        let step = amp + 1 + semi + 1;
        consumed += step;
        rest = &rest[step..];
    }
    out.push_str(rest);
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
