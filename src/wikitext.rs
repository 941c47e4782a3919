//! Expanded wikitext to a [`Node`] tree plus a flat heading index.
//!
//! Block structure (headings, lists, tables, rules) is recognised line by
//! line; inline markup (links, tags, bold and italic) within each line.
//! Nothing here fails: markup that does not close is kept as literal text.

use crate::expand::TemplateOrigin;
use crate::node::{LinkKind, ListMarker, Node, NodeKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use std::rc::{Rc, Weak};

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(=+)(.*?)(=+)\s*$").unwrap());
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^<(/?)([A-Za-z][A-Za-z0-9-]*)((?:\s+[^<>]*?)?)\s*(/?)>"#).unwrap());
static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][\w:.-]*)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#).unwrap()
});
static EXTERNAL_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[((?:https?:|ftp:)?//[^\s\]]+)(?:\s+([^\]]*))?\]").unwrap());

const VOID_TAGS: &[&str] = &["br", "hr", "wbr", "img", "meta", "link", "input", "col", "area"];
const RAW_TAGS: &[&str] = &["pre", "math", "syntaxhighlight", "source", "chem", "ce"];
const INTERWIKI: &[&str] = &[
    "w", "wikipedia", "wikt", "wiktionary", "commons", "s", "wikisource", "species", "wikispecies",
    "b", "wikibooks", "q", "wikiquote", "v", "wikiversity",
];

/// `(text, level, path)` for every heading, in document order. The path
/// lists the titles of the enclosing headings, ending with this one.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingEntry {
    pub text: String,
    pub level: usize,
    pub path: Vec<String>,
}

#[derive(Debug)]
pub struct ParsedPage {
    pub root: Node,
    pub headings: Vec<HeadingEntry>,
    /// Markup problems that were recovered from.
    pub malformed: Vec<String>,
}

/// Parses without template origins.
pub fn parse(text: &str) -> ParsedPage {
    parse_with_origins(text, &[])
}

/// Parses and annotates nodes that start inside one of `invocations`.
pub fn parse_with_origins(text: &str, invocations: &[Rc<TemplateOrigin>]) -> ParsedPage {
    let mut origins: Vec<Rc<TemplateOrigin>> = invocations
        .iter()
        .filter(|o| o.range.start < o.range.end)
        .cloned()
        .collect();
    origins.sort_by_key(|o| o.range.start);
    let mut boundaries: Vec<usize> = origins
        .iter()
        .flat_map(|o| [o.range.start, o.range.end])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let inline = Inline {
        text,
        origins: &origins,
        boundaries: &boundaries,
    };
    let mut builder = Builder::new(inline, text.len());
    let mut pos = 0;
    for line in text.split_inclusive('\n') {
        let end = pos + line.trim_end_matches(['\n', '\r']).len();
        builder.line(pos, end);
        pos += line.len();
    }
    builder.finish()
}

struct Inline<'s> {
    text: &'s str,
    origins: &'s [Rc<TemplateOrigin>],
    boundaries: &'s [usize],
}

/// An inline element still waiting for its closing markup.
struct Open {
    kind: NodeKind,
    start: usize,
    children: Vec<Node>,
}

impl<'s> Inline<'s> {
    fn origin_at(&self, pos: usize) -> Option<Weak<TemplateOrigin>> {
        let i = self.origins.partition_point(|o| o.range.start <= pos);
        let candidate = self.origins.get(i.checked_sub(1)?)?;
        (pos < candidate.range.end).then(|| Rc::downgrade(candidate))
    }

    fn node(&self, kind: NodeKind, span: Range<usize>) -> Node {
        let mut node = Node::new(kind, span.clone());
        node.origin = self.origin_at(span.start);
        node
    }

    /// Text nodes for `start..end`, split where template output begins or ends.
    fn text_nodes(&self, start: usize, end: usize, out: &mut Vec<Node>) {
        if start >= end {
            return;
        }
        let first = self.boundaries.partition_point(|&b| b <= start);
        let mut from = start;
        for &b in &self.boundaries[first..] {
            if b >= end {
                break;
            }
            out.push(self.node(NodeKind::Text(self.text[from..b].to_string()), from..b));
            from = b;
        }
        out.push(self.node(NodeKind::Text(self.text[from..end].to_string()), from..end));
    }

    fn parse(&self, start: usize, end: usize, malformed: &mut Vec<String>) -> Vec<Node> {
        let bytes = self.text.as_bytes();
        let mut stack = vec![Open {
            kind: NodeKind::Root,
            start,
            children: Vec::new(),
        }];
        let mut text_start = start;
        let mut i = start;
        while i < end {
            let next = match bytes[i] {
                b'[' if bytes.get(i + 1) == Some(&b'[') => self.link(i, end, malformed),
                b'[' => self.external_link(i, end),
                b'\'' if bytes.get(i + 1) == Some(&b'\'') => None,
                b'<' => None,
                _ => {
                    i += 1;
                    continue;
                }
            };
            if let Some((node, after)) = next {
                self.flush(&mut stack, text_start, i);
                top(&mut stack).push(node);
                i = after;
                text_start = i;
                continue;
            }
            match bytes[i] {
                b'\'' => {
                    let run = bytes[i..end].iter().take_while(|&&b| b == b'\'').count();
                    self.flush(&mut stack, text_start, i);
                    self.apostrophes(&mut stack, i, run);
                    i += run;
                    text_start = i;
                }
                b'<' => match self.tag(&mut stack, i, end, text_start, malformed) {
                    Some(after) => {
                        i = after;
                        text_start = i;
                    }
                    None => i += 1,
                },
                // An unmatched `[[` stays literal; skip both brackets.
                b'[' if bytes.get(i + 1) == Some(&b'[') => i += 2,
                _ => i += 1,
            }
        }
        self.flush(&mut stack, text_start, end);
        while stack.len() > 1 {
            self.close_top(&mut stack, end);
        }
        stack.pop().map(|root| root.children).unwrap_or_default()
    }

    fn flush(&self, stack: &mut [Open], from: usize, to: usize) {
        if let Some(open) = stack.last_mut() {
            self.text_nodes(from, to, &mut open.children);
        }
    }

    fn close_top(&self, stack: &mut Vec<Open>, end: usize) {
        if stack.len() < 2 {
            return;
        }
        if let Some(open) = stack.pop() {
            let mut node = self.node(open.kind, open.start..end);
            node.children = open.children;
            top(stack).push(node);
        }
    }

    fn is_open(stack: &[Open], kind: &NodeKind) -> bool {
        stack.iter().skip(1).any(|o| &o.kind == kind)
    }

    /// Closes up to and including the innermost element matching `pred`.
    fn close_until(&self, stack: &mut Vec<Open>, end: usize, pred: impl Fn(&NodeKind) -> bool) {
        while stack.len() > 1 {
            let matched = stack.last().is_some_and(|o| pred(&o.kind));
            self.close_top(stack, end);
            if matched {
                break;
            }
        }
    }

    fn toggle(&self, stack: &mut Vec<Open>, kind: NodeKind, at: usize, after: usize) {
        if Self::is_open(stack, &kind) {
            self.close_until(stack, after, |k| *k == kind);
        } else {
            stack.push(Open {
                kind,
                start: at,
                children: Vec::new(),
            });
        }
    }

    fn apostrophes(&self, stack: &mut Vec<Open>, at: usize, run: usize) {
        let (literal, marks) = match run {
            2 | 3 => (0, run),
            4 => (1, 3),
            n => (n - 5, 5),
        };
        if literal > 0 {
            self.flush(stack, at, at + literal);
        }
        let at = at + literal;
        let after = at + marks;
        match marks {
            2 => self.toggle(stack, NodeKind::Italic, at, after),
            3 => self.toggle(stack, NodeKind::Bold, at, after),
            _ => {
                let bold = Self::is_open(stack, &NodeKind::Bold);
                let italic = Self::is_open(stack, &NodeKind::Italic);
                match (bold, italic) {
                    (true, true) => {
                        let inner = stack.last().map(|o| o.kind.clone());
                        let (first, second) = if inner == Some(NodeKind::Bold) {
                            (NodeKind::Bold, NodeKind::Italic)
                        } else {
                            (NodeKind::Italic, NodeKind::Bold)
                        };
                        self.toggle(stack, first, at, after);
                        self.toggle(stack, second, at, after);
                    }
                    (true, false) => {
                        self.toggle(stack, NodeKind::Bold, at, after);
                        self.toggle(stack, NodeKind::Italic, at, after);
                    }
                    (false, true) => {
                        self.toggle(stack, NodeKind::Italic, at, after);
                        self.toggle(stack, NodeKind::Bold, at, after);
                    }
                    (false, false) => {
                        self.toggle(stack, NodeKind::Bold, at, after);
                        self.toggle(stack, NodeKind::Italic, at, after);
                    }
                }
            }
        }
    }

    /// `[[target|display]]`, with nested links allowed in the display part.
    fn link(&self, at: usize, end: usize, malformed: &mut Vec<String>) -> Option<(Node, usize)> {
        let bytes = self.text.as_bytes();
        let mut depth = 0usize;
        let mut pipe = None;
        let mut j = at;
        while j + 1 < end {
            if bytes[j] == b'[' && bytes[j + 1] == b'[' {
                depth += 1;
                j += 2;
                continue;
            }
            if bytes[j] == b']' && bytes[j + 1] == b']' {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                j += 2;
                continue;
            }
            if bytes[j] == b'|' && depth == 1 && pipe.is_none() {
                pipe = Some(j);
            }
            j += 1;
        }
        if depth != 0 || j + 1 >= end {
            malformed.push(format!("unterminated link at byte {}", at));
            return None;
        }
        let close = j;
        let target_end = pipe.unwrap_or(close);
        let raw_target = self.text[at + 2..target_end].trim();
        if raw_target.is_empty() {
            return None;
        }
        let (target, kind) = classify_link(raw_target);
        let mut node = self.node(NodeKind::Link { target, kind }, at..close + 2);
        if let Some(p) = pipe {
            node.children = self.parse(p + 1, close, malformed);
        }
        Some((node, close + 2))
    }

    fn external_link(&self, at: usize, end: usize) -> Option<(Node, usize)> {
        let caps = EXTERNAL_LINK.captures(&self.text[at..end])?;
        let whole = caps.get(0)?;
        let url = caps.get(1)?.as_str().to_string();
        let mut node = self.node(NodeKind::ExternalLink { url }, at..at + whole.end());
        if let Some(display) = caps.get(2).filter(|m| !m.as_str().trim().is_empty()) {
            let start = at + display.start();
            self.text_nodes(start, at + display.end(), &mut node.children);
        }
        Some((node, at + whole.end()))
    }

    /// Handles a tag at `at`. Returns the position after it, or `None` when
    /// the `<` is literal.
    fn tag(
        &self,
        stack: &mut Vec<Open>,
        at: usize,
        end: usize,
        text_start: usize,
        malformed: &mut Vec<String>,
    ) -> Option<usize> {
        let caps = TAG.captures(&self.text[at..end])?;
        let whole = caps.get(0)?.end();
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let self_closing = !caps[4].is_empty();
        let after = at + whole;

        if closing {
            let open = stack
                .iter()
                .skip(1)
                .any(|o| matches!(&o.kind, NodeKind::Tag { name: n, .. } if *n == name));
            if !open {
                malformed.push(format!("stray </{}> at byte {}", name, at));
                return None;
            }
            self.flush(stack, text_start, at);
            self.close_until(stack, after, |k| {
                matches!(k, NodeKind::Tag { name: n, .. } if *n == name)
            });
            return Some(after);
        }

        let attrs = parse_attrs(&caps[3]);
        if name == "nowiki" || RAW_TAGS.contains(&name.as_str()) {
            if self_closing {
                self.flush(stack, text_start, at);
                if name != "nowiki" {
                    top(stack).push(self.node(NodeKind::Tag { name, attrs }, at..after));
                }
                return Some(after);
            }
            let close_pat = format!("</{}", name);
            let rest = &self.text[after..end];
            let rel = rest.to_ascii_lowercase().find(&close_pat)?;
            let content_end = after + rel;
            let close_end = self.text[content_end..end]
                .find('>')
                .map(|p| content_end + p + 1)
                .unwrap_or(end);
            self.flush(stack, text_start, at);
            if name == "nowiki" {
                self.text_nodes(after, content_end, top(stack));
            } else {
                let mut node = self.node(NodeKind::Tag { name, attrs }, at..close_end);
                self.text_nodes(after, content_end, &mut node.children);
                top(stack).push(node);
            }
            return Some(close_end);
        }

        self.flush(stack, text_start, at);
        if self_closing || VOID_TAGS.contains(&name.as_str()) {
            top(stack).push(self.node(NodeKind::Tag { name, attrs }, at..after));
        } else {
            stack.push(Open {
                kind: NodeKind::Tag { name, attrs },
                start: at,
                children: Vec::new(),
            });
        }
        Some(after)
    }
}

fn top(stack: &mut [Open]) -> &mut Vec<Node> {
    // The root frame is never popped.
    match stack.last_mut() {
        Some(open) => &mut open.children,
        None => unreachable!("inline stack always holds the root frame"),
    }
}

fn parse_attrs(s: &str) -> Vec<(String, String)> {
    ATTR.captures_iter(s)
        .map(|c| {
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (c[1].to_ascii_lowercase(), value)
        })
        .collect()
}

fn classify_link(raw: &str) -> (String, LinkKind) {
    if let Some(forced) = raw.strip_prefix(':') {
        return (forced.trim().to_string(), LinkKind::Internal);
    }
    let kind = match raw.split_once(':') {
        Some((prefix, _)) => {
            let prefix = prefix.trim().to_ascii_lowercase();
            match prefix.as_str() {
                "category" | "cat" => LinkKind::Category,
                "file" | "image" => LinkKind::File,
                p if INTERWIKI.contains(&p) => LinkKind::Interwiki,
                p if p != "wt"
                    && (2..=3).contains(&p.len())
                    && p.bytes().all(|b| b.is_ascii_lowercase()) =>
                {
                    LinkKind::Interwiki
                }
                _ => LinkKind::Internal,
            }
        }
        None => LinkKind::Internal,
    };
    (raw.to_string(), kind)
}

/// One open table: its node plus the row and cell being filled.
struct TableState {
    node: Node,
    row: Option<Node>,
    cell: Option<Node>,
}

struct Builder<'s> {
    inline: Inline<'s>,
    /// Open sections; the root is at the bottom and is never popped.
    sections: Vec<Node>,
    lists: Vec<Node>,
    tables: Vec<TableState>,
    headings: Vec<HeadingEntry>,
    path: Vec<(usize, String)>,
    malformed: Vec<String>,
}

impl<'s> Builder<'s> {
    fn new(inline: Inline<'s>, len: usize) -> Self {
        Self {
            inline,
            sections: vec![Node::new(NodeKind::Root, 0..len)],
            lists: Vec::new(),
            tables: Vec::new(),
            headings: Vec::new(),
            path: Vec::new(),
            malformed: Vec::new(),
        }
    }

    fn text(&self) -> &'s str {
        self.inline.text
    }

    fn inline(&mut self, start: usize, end: usize) -> Vec<Node> {
        self.inline.parse(start, end, &mut self.malformed)
    }

    fn line(&mut self, start: usize, end: usize) {
        let line = &self.text()[start..end];
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if trimmed.starts_with("{|") {
            self.close_lists();
            self.open_table(start, end);
            return;
        }
        if !self.tables.is_empty() {
            self.table_line(start + indent, end);
            return;
        }
        if let Some((level, title_start, title_end)) = heading_parts(line) {
            self.close_lists();
            self.heading(start, end, level, start + title_start, start + title_end);
            return;
        }
        if line.starts_with("----") && line.bytes().all(|b| b == b'-' || b == b' ') {
            self.close_lists();
            let node = self.inline.node(NodeKind::HorizontalRule, start..end);
            self.attach(node);
            return;
        }
        let prefix_len = line
            .chars()
            .take_while(|&c| ListMarker::from_char(c).is_some())
            .count();
        if prefix_len > 0 {
            self.list_item(start, end, prefix_len);
            return;
        }

        self.close_lists();
        if line.trim().is_empty() {
            let newline = self.newline(end);
            self.attach_all(newline);
            return;
        }
        let mut nodes = self.inline(start, end);
        nodes.extend(self.newline(end));
        self.attach_all(nodes);
    }

    fn newline(&self, end: usize) -> Option<Node> {
        (end < self.text().len()).then(|| self.inline.node(NodeKind::Text("\n".to_string()), end..end + 1))
    }

    fn attach_all(&mut self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            self.attach(node);
        }
    }

    /// Appends to the innermost open container outside any list.
    fn attach(&mut self, node: Node) {
        if let Some(table) = self.tables.last_mut() {
            match table.cell.as_mut() {
                Some(cell) => push_child(cell, node),
                None => push_child(&mut table.node, node),
            }
            return;
        }
        if let Some(section) = self.sections.last_mut() {
            push_child(section, node);
        }
    }

    fn heading(&mut self, start: usize, end: usize, level: usize, title_start: usize, title_end: usize) {
        while self.sections.len() > 1
            && self
                .sections
                .last()
                .and_then(Node::heading_level)
                .is_some_and(|l| l >= level)
        {
            self.close_section();
        }
        while self.path.last().is_some_and(|(l, _)| *l >= level) {
            self.path.pop();
        }
        let title = self.inline(title_start, title_end);
        let mut node = self.inline.node(NodeKind::Heading { level, title }, start..end);
        let text = node.heading_title().unwrap_or_default();
        self.path.push((level, text.clone()));
        self.headings.push(HeadingEntry {
            text,
            level,
            path: self.path.iter().map(|(_, t)| t.clone()).collect(),
        });
        if end < self.text().len() {
            node.span.end = end + 1;
        }
        self.sections.push(node);
    }

    fn close_section(&mut self) {
        if self.sections.len() < 2 {
            return;
        }
        if let Some(section) = self.sections.pop() {
            self.attach(section);
        }
    }

    fn list_item(&mut self, start: usize, end: usize, prefix_len: usize) {
        let line = &self.text()[start..end];
        let prefix: String = line.chars().take(prefix_len).collect();
        let marker = prefix
            .chars()
            .last()
            .and_then(ListMarker::from_char)
            .unwrap_or(ListMarker::Bullet);
        while let Some(open) = self.lists.last() {
            let open_prefix = open.list_prefix().unwrap_or("");
            if prefix.len() > open_prefix.len() && prefix.starts_with(open_prefix) {
                break;
            }
            self.pop_list();
        }
        let content_start = start + prefix.len();
        let content_start = content_start + (self.text()[content_start..end].len()
            - self.text()[content_start..end].trim_start().len());
        let mut node = self.inline.node(
            NodeKind::ListItem {
                depth: prefix_len,
                marker,
                prefix,
            },
            start..end,
        );
        node.children = self.inline(content_start, end);
        if end < self.text().len() {
            node.span.end = end + 1;
        }
        self.lists.push(node);
    }

    fn pop_list(&mut self) {
        if let Some(item) = self.lists.pop() {
            match self.lists.last_mut() {
                Some(parent) => push_child(parent, item),
                None => self.attach(item),
            }
        }
    }

    fn close_lists(&mut self) {
        while !self.lists.is_empty() {
            self.pop_list();
        }
    }

    fn open_table(&mut self, start: usize, end: usize) {
        let node = self.inline.node(NodeKind::Table, start..end);
        self.tables.push(TableState {
            node,
            row: None,
            cell: None,
        });
    }

    fn table_line(&mut self, start: usize, end: usize) {
        let line = &self.text()[start..end];
        if line.starts_with("|}") {
            self.close_table(end);
            return;
        }
        if line.starts_with("|+") {
            self.finish_cell();
            let mut caption = self.inline.node(NodeKind::TableCaption, start..end);
            caption.children = self.inline(start + 2, end);
            if let Some(table) = self.tables.last_mut() {
                push_child(&mut table.node, caption);
            }
            return;
        }
        if line.starts_with("|-") {
            self.finish_cell();
            self.finish_row();
            let row = self.inline.node(NodeKind::TableRow, start..end);
            if let Some(table) = self.tables.last_mut() {
                table.row = Some(row);
            }
            return;
        }
        let header = line.starts_with('!');
        if header || line.starts_with('|') {
            let separator = if header { "!!" } else { "||" };
            let mut cell_start = start + 1;
            for cell_end in split_cells(self.text(), cell_start, end, separator) {
                self.finish_cell();
                let content_start = cell_content_start(self.text(), cell_start, cell_end);
                let mut cell = self.inline.node(NodeKind::TableCell { header }, cell_start - 1..cell_end);
                cell.children = self.inline(content_start, cell_end);
                if let Some(table) = self.tables.last_mut() {
                    table.cell = Some(cell);
                }
                cell_start = cell_end + separator.len();
            }
            return;
        }
        let mut nodes = Vec::new();
        nodes.extend(self.newline_before(start));
        nodes.extend(self.inline(start, end));
        self.attach_all(nodes);
    }

    fn newline_before(&self, start: usize) -> Option<Node> {
        (start > 0).then(|| self.inline.node(NodeKind::Text("\n".to_string()), start - 1..start))
    }

    fn finish_cell(&mut self) {
        let Some(table) = self.tables.last_mut() else {
            return;
        };
        if let Some(cell) = table.cell.take() {
            let row = table
                .row
                .get_or_insert_with(|| Node::new(NodeKind::TableRow, cell.span.clone()));
            push_child(row, cell);
        }
    }

    fn finish_row(&mut self) {
        let Some(table) = self.tables.last_mut() else {
            return;
        };
        if let Some(row) = table.row.take() {
            push_child(&mut table.node, row);
        }
    }

    fn close_table(&mut self, end: usize) {
        self.finish_cell();
        self.finish_row();
        if let Some(mut table) = self.tables.pop() {
            table.node.span.end = end;
            self.attach(table.node);
        }
    }

    fn finish(mut self) -> ParsedPage {
        self.close_lists();
        if !self.tables.is_empty() {
            self.malformed
                .push(format!("{} unclosed table(s)", self.tables.len()));
            let len = self.text().len();
            while !self.tables.is_empty() {
                self.close_table(len);
            }
        }
        while self.sections.len() > 1 {
            self.close_section();
        }
        let root = self
            .sections
            .pop()
            .unwrap_or_else(|| Node::new(NodeKind::Root, 0..self.inline.text.len()));
        ParsedPage {
            root,
            headings: self.headings,
            malformed: self.malformed,
        }
    }
}

fn push_child(parent: &mut Node, child: Node) {
    if child.span.end > parent.span.end {
        parent.span.end = child.span.end;
    }
    parent.children.push(child);
}

/// `(level, title start, title end)` relative to the line.
fn heading_parts(line: &str) -> Option<(usize, usize, usize)> {
    let caps = HEADING.captures(line)?;
    let left = caps.get(1)?;
    let right = caps.get(3)?;
    let level = left.len().min(right.len()).min(6);
    let title_start = level;
    let title_end = right.end() - level;
    if title_end <= title_start {
        return None;
    }
    let title = &line[title_start..title_end];
    if title.trim().is_empty() {
        return None;
    }
    let lead = title.len() - title.trim_start().len();
    let trail = title.len() - title.trim_end().len();
    Some((level, title_start + lead, title_end - trail))
}

/// Ends of the cells on one table line.
fn split_cells(text: &str, start: usize, end: usize, separator: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut from = start;
    let line = &text[start..end];
    let mut search = 0;
    while let Some(p) = line[search..].find(separator) {
        let at = start + search + p;
        if !inside_link(text, from, at) {
            ends.push(at);
            from = at + separator.len();
        }
        search += p + separator.len();
    }
    ends.push(end);
    ends
}

fn inside_link(text: &str, from: usize, at: usize) -> bool {
    let segment = &text[from..at];
    segment.matches("[[").count() > segment.matches("]]").count()
}

/// Skips `attrs |` at the start of a cell.
fn cell_content_start(text: &str, start: usize, end: usize) -> usize {
    let cell = &text[start..end];
    let mut depth = 0i32;
    let bytes = cell.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'[' if bytes.get(i + 1) == Some(&b'[') => {
                depth += 1;
                i += 2;
                continue;
            }
            b']' if bytes.get(i + 1) == Some(&b']') => {
                depth -= 1;
                i += 2;
                continue;
            }
            b'|' if depth <= 0 => return start + i + 1,
            _ => {}
        }
        i += 1;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(text: &str) -> Node {
        parse(text).root
    }

    fn items(node: &Node) -> Vec<&Node> {
        node.items().collect()
    }

    #[test]
    fn headings_nest_sections() {
        let page = parse("==English==\n===Noun===\n# cat\n==French==\ntext\n");
        let root = &page.root;
        let sections: Vec<_> = root.children.iter().filter(|n| n.heading_level().is_some()).collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading_title().as_deref(), Some("English"));
        let noun = sections[0]
            .children
            .iter()
            .find(|n| n.heading_level() == Some(3))
            .unwrap();
        assert_eq!(noun.heading_title().as_deref(), Some("Noun"));
        assert_eq!(items(noun).len(), 1);
        assert_eq!(sections[1].heading_title().as_deref(), Some("French"));
    }

    #[test]
    fn heading_index_has_paths() {
        let page = parse("==English==\n===Etymology 1===\n====Noun====\n===Etymology 2===\n");
        let paths: Vec<_> = page.headings.iter().map(|h| (h.level, h.path.join("/"))).collect();
        assert_eq!(
            paths,
            vec![
                (2, "English".to_string()),
                (3, "English/Etymology 1".to_string()),
                (4, "English/Etymology 1/Noun".to_string()),
                (3, "English/Etymology 2".to_string()),
            ]
        );
    }

    #[test]
    fn uneven_heading_uses_shorter_run() {
        let page = parse("===Noun==\n");
        assert_eq!(page.headings[0].level, 2);
        assert_eq!(page.headings[0].text, "=Noun");
    }

    #[test]
    fn list_depth_follows_marker_run() {
        let text = "# one\n## sub\n#: example\n# two\n";
        let root = root(text);
        let top = items(&root);
        assert_eq!(top.len(), 2);
        let nested = items(top[0]);
        assert_eq!(nested.len(), 2);
        match &nested[0].kind {
            NodeKind::ListItem { depth, marker, prefix } => {
                assert_eq!(*depth, 2);
                assert_eq!(*marker, ListMarker::Numbered);
                assert_eq!(prefix, "##");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &nested[1].kind {
            NodeKind::ListItem { marker, .. } => assert_eq!(*marker, ListMarker::Indent),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(root.to_wikitext(), text);
    }

    #[test]
    fn mixed_markers_nest() {
        let root = root("* a\n*# b\n*#* c\n* d\n");
        let top = items(&root);
        assert_eq!(top.len(), 2);
        let b = items(top[0]);
        assert_eq!(b.len(), 1);
        assert_eq!(items(b[0]).len(), 1);
        assert_eq!(root.to_wikitext(), "* a\n*# b\n*#* c\n* d\n");
    }

    #[test]
    fn deeper_item_without_parent_still_attaches() {
        let root = root("## orphan\n# next\n");
        assert_eq!(items(&root).len(), 2);
    }

    #[test]
    fn links_and_kinds() {
        let root = root("[[cat|feline]] [[Category:Cats]] [[fr:chat]] [[File:x.png|thumb|[[dog]]]] [[:Category:Dogs]]");
        let links: Vec<_> = root
            .descendants()
            .into_iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Link { target, kind } => Some((target.clone(), *kind)),
                _ => None,
            })
            .collect();
        assert_eq!(
            links,
            vec![
                ("cat".to_string(), LinkKind::Internal),
                ("Category:Cats".to_string(), LinkKind::Category),
                ("fr:chat".to_string(), LinkKind::Interwiki),
                ("File:x.png".to_string(), LinkKind::File),
                ("dog".to_string(), LinkKind::Internal),
                ("Category:Dogs".to_string(), LinkKind::Internal),
            ]
        );
        assert_eq!(root.text(), "feline  fr:chat  Category:Dogs");
    }

    #[test]
    fn external_links() {
        let root = root("see [https://example.org site] and [not a link]");
        let ext = root.descendants().into_iter().find_map(|n| match &n.kind {
            NodeKind::ExternalLink { url } => Some((url.clone(), n.text())),
            _ => None,
        });
        assert_eq!(ext, Some(("https://example.org".to_string(), "site".to_string())));
        assert_eq!(root.text(), "see site and [not a link]");
    }

    #[test]
    fn bold_and_italic() {
        let root = root("''it'' '''bold''' '''''both''''' plain");
        let kinds: Vec<_> = root
            .children
            .iter()
            .filter(|n| !matches!(n.kind, NodeKind::Text(_)))
            .map(|n| n.kind.clone())
            .collect();
        assert_eq!(kinds, vec![NodeKind::Italic, NodeKind::Bold, NodeKind::Bold]);
        assert_eq!(root.text(), "it bold both plain");
    }

    #[test]
    fn unclosed_formatting_closes_at_line_end() {
        let root = root("''open\nnext");
        assert_eq!(root.text(), "open\nnext");
        assert!(matches!(root.children[0].kind, NodeKind::Italic));
    }

    #[test]
    fn tags() {
        let root = root("a<br>b<span class=\"x\">c</span><ref name=r1/><nowiki>[[no]]</nowiki>");
        let tags: Vec<_> = root
            .children
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Tag { name, attrs } => Some((name.clone(), attrs.clone(), n.children.len())),
                _ => None,
            })
            .collect();
        assert_eq!(tags[0], ("br".to_string(), vec![], 0));
        assert_eq!(
            tags[1],
            ("span".to_string(), vec![("class".to_string(), "x".to_string())], 1)
        );
        assert_eq!(tags[2].0, "ref");
        assert_eq!(root.text(), "a\nbc[[no]]");
    }

    #[test]
    fn unmatched_markup_is_literal() {
        let page = parse("a </div> b [[open c ] d");
        assert_eq!(page.root.text(), "a </div> b [[open c ] d");
        assert_eq!(page.malformed.len(), 2);
        let page = parse("x [[unclosed");
        assert_eq!(page.root.text(), "x [[unclosed");
    }

    #[test]
    fn tables() {
        let page = parse("{| class=\"wikitable\"\n|+ Forms\n! case !! singular\n|-\n| nominative || [[cat|kissa]]\n| style=\"x\" | genitive\n|}\nafter\n");
        let table = page
            .root
            .children
            .iter()
            .find(|n| n.kind == NodeKind::Table)
            .unwrap();
        let caption = table.children.iter().find(|n| n.kind == NodeKind::TableCaption).unwrap();
        assert_eq!(caption.text().trim(), "Forms");
        let rows: Vec<_> = table.children.iter().filter(|n| n.kind == NodeKind::TableRow).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].children.len(), 2);
        assert!(matches!(rows[0].children[0].kind, NodeKind::TableCell { header: true }));
        let cells: Vec<String> = rows[1].children.iter().map(|c| c.text().trim().to_string()).collect();
        assert_eq!(cells, vec!["nominative", "kissa", "genitive"]);
        assert!(page.root.text().ends_with("after\n"));
        assert!(page.malformed.is_empty());
    }

    #[test]
    fn unclosed_table_is_recovered() {
        let page = parse("{|\n| a\n");
        assert_eq!(page.malformed.len(), 1);
        assert!(page.root.children.iter().any(|n| n.kind == NodeKind::Table));
    }

    #[test]
    fn spans_point_into_text() {
        let text = "==A==\n# [[b]]\n";
        let page = parse(text);
        for node in page.root.descendants() {
            assert!(node.span.end <= text.len());
            if let NodeKind::Link { .. } = node.kind {
                assert_eq!(&text[node.span.clone()], "[[b]]");
            }
        }
    }

    #[test]
    fn origins_annotate_template_output() {
        let text = "# a cat b\n";
        let origin = Rc::new(TemplateOrigin {
            name: "lb".to_string(),
            args: Vec::new(),
            range: 4..7,
        });
        let page = parse_with_origins(text, &[origin.clone()]);
        let item = items(&page.root)[0];
        let annotated: Vec<_> = item
            .children
            .iter()
            .filter_map(|n| n.origin().map(|o| (o.name.clone(), n.text())))
            .collect();
        assert_eq!(annotated, vec![("lb".to_string(), "cat".to_string())]);
    }
}
