//! The structural tree produced from expanded wikitext.

use crate::expand::TemplateOrigin;
use std::ops::Range;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMarker {
    /// `*`
    Bullet,
    /// `#`
    Numbered,
    /// `:`
    Indent,
    /// `;`
    Definition,
}

impl ListMarker {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '*' => Some(ListMarker::Bullet),
            '#' => Some(ListMarker::Numbered),
            ':' => Some(ListMarker::Indent),
            ';' => Some(ListMarker::Definition),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Internal,
    Category,
    File,
    Interwiki,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    /// Section heading; `children` holds the section body.
    Heading { level: usize, title: Vec<Node> },
    /// `children` holds the item content followed by nested items.
    ListItem {
        depth: usize,
        marker: ListMarker,
        prefix: String,
    },
    Table,
    TableCaption,
    TableRow,
    TableCell { header: bool },
    /// `children` holds the display text, empty when the link has none.
    Link { target: String, kind: LinkKind },
    ExternalLink { url: String },
    Tag {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Bold,
    Italic,
    HorizontalRule,
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
    /// Byte span in the expanded text.
    pub span: Range<usize>,
    /// The top-level template call whose output this node starts in.
    pub origin: Option<Weak<TemplateOrigin>>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.children == other.children && self.span == other.span
    }
}

/// A flattened view of inline content: consecutive nodes produced by the
/// same template call collapse into one `Template` piece.
#[derive(Debug, Clone)]
pub enum Piece {
    Template { origin: Rc<TemplateOrigin>, text: String },
    Link { target: String, text: String },
    Text(String),
}

impl Node {
    pub fn new(kind: NodeKind, span: Range<usize>) -> Self {
        Self {
            kind,
            children: Vec::new(),
            span,
            origin: None,
        }
    }

    pub fn text_node(s: &str, span: Range<usize>) -> Self {
        Self::new(NodeKind::Text(s.to_string()), span)
    }

    pub fn origin(&self) -> Option<Rc<TemplateOrigin>> {
        self.origin.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_list_item(&self) -> bool {
        matches!(self.kind, NodeKind::ListItem { .. })
    }

    pub fn heading_level(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Heading { level, .. } => Some(level),
            _ => None,
        }
    }

    /// Plain text of a heading's title.
    pub fn heading_title(&self) -> Option<String> {
        match &self.kind {
            NodeKind::Heading { title, .. } => Some(collect_text(title).trim().to_string()),
            _ => None,
        }
    }

    pub fn list_prefix(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::ListItem { prefix, .. } => Some(prefix),
            _ => None,
        }
    }

    /// Child nodes that are not nested list items.
    pub fn content(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(|c| !c.is_list_item())
    }

    /// Direct children that are list items.
    pub fn items(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(|c| c.is_list_item())
    }

    /// All nodes below this one in document order.
    pub fn descendants(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack: Vec<&Node> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            if let NodeKind::Heading { title, .. } = &node.kind {
                stack.extend(title.iter().rev());
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Plain text, without markup, references or category links.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out);
        out
    }

    /// Plain text of the content only, skipping nested list items.
    pub fn content_text(&self) -> String {
        let mut out = String::new();
        for child in self.content() {
            child.write_text(&mut out);
        }
        out
    }

    fn write_text(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Text(s) => out.push_str(s),
            NodeKind::Link { target, kind } => match kind {
                LinkKind::Category | LinkKind::File => {}
                LinkKind::Internal | LinkKind::Interwiki => {
                    if self.children.is_empty() {
                        out.push_str(target);
                    } else {
                        write_children(&self.children, out);
                    }
                }
            },
            NodeKind::ExternalLink { .. } => write_children(&self.children, out),
            NodeKind::Tag { name, .. } => match name.as_str() {
                "ref" | "references" => {}
                "br" => out.push('\n'),
                _ => write_children(&self.children, out),
            },
            NodeKind::Heading { title, .. } => {
                write_children(title, out);
                out.push('\n');
                write_children(&self.children, out);
            }
            NodeKind::ListItem { .. } => {
                write_children(&self.children, out);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            NodeKind::TableRow => {
                for (i, cell) in self.children.iter().enumerate() {
                    if i > 0 {
                        out.push('\t');
                    }
                    cell.write_text(out);
                }
                out.push('\n');
            }
            NodeKind::HorizontalRule => {}
            _ => write_children(&self.children, out),
        }
    }

    /// Wikitext rendering; lists are re-flattened with one marker prefix per line.
    pub fn to_wikitext(&self) -> String {
        let mut out = String::new();
        self.write_wikitext(&mut out);
        out
    }

    fn write_wikitext(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Root => write_wikitext_children(&self.children, out),
            NodeKind::Text(s) => out.push_str(s),
            NodeKind::Heading { level, title } => {
                let marks = "=".repeat(*level);
                out.push_str(&marks);
                out.push(' ');
                write_wikitext_children(title, out);
                out.push(' ');
                out.push_str(&marks);
                out.push('\n');
                write_wikitext_children(&self.children, out);
            }
            NodeKind::ListItem { prefix, .. } => {
                out.push_str(prefix);
                out.push(' ');
                let mut nested = Vec::new();
                for child in &self.children {
                    if child.is_list_item() {
                        nested.push(child);
                    } else {
                        child.write_wikitext(out);
                    }
                }
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                for item in nested {
                    item.write_wikitext(out);
                }
            }
            NodeKind::Table => {
                out.push_str("{|\n");
                write_wikitext_children(&self.children, out);
                out.push_str("|}\n");
            }
            NodeKind::TableCaption => {
                out.push_str("|+ ");
                write_wikitext_children(&self.children, out);
                out.push('\n');
            }
            NodeKind::TableRow => {
                out.push_str("|-\n");
                write_wikitext_children(&self.children, out);
            }
            NodeKind::TableCell { header } => {
                out.push_str(if *header { "! " } else { "| " });
                write_wikitext_children(&self.children, out);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            NodeKind::Link { target, .. } => {
                out.push_str("[[");
                out.push_str(target);
                if !self.children.is_empty() {
                    out.push('|');
                    write_wikitext_children(&self.children, out);
                }
                out.push_str("]]");
            }
            NodeKind::ExternalLink { url } => {
                out.push('[');
                out.push_str(url);
                if !self.children.is_empty() {
                    out.push(' ');
                    write_wikitext_children(&self.children, out);
                }
                out.push(']');
            }
            NodeKind::Tag { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for (k, v) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", k, v));
                }
                if self.children.is_empty() {
                    out.push_str(" />");
                } else {
                    out.push('>');
                    write_wikitext_children(&self.children, out);
                    out.push_str(&format!("</{}>", name));
                }
            }
            NodeKind::Bold => {
                out.push_str("'''");
                write_wikitext_children(&self.children, out);
                out.push_str("'''");
            }
            NodeKind::Italic => {
                out.push_str("''");
                write_wikitext_children(&self.children, out);
                out.push_str("''");
            }
            NodeKind::HorizontalRule => out.push_str("----\n"),
        }
    }

    /// Inline content as pieces, grouped by originating template.
    pub fn pieces(&self) -> Vec<Piece> {
        pieces_of(self.content())
    }
}

fn write_children(children: &[Node], out: &mut String) {
    for child in children {
        child.write_text(out);
    }
}

fn write_wikitext_children(children: &[Node], out: &mut String) {
    for child in children {
        child.write_wikitext(out);
    }
}

/// Plain text of a node list.
pub fn collect_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    write_children(nodes, &mut out);
    out
}

pub fn pieces_of<'n>(nodes: impl IntoIterator<Item = &'n Node>) -> Vec<Piece> {
    let mut pieces: Vec<Piece> = Vec::new();
    for node in nodes {
        if let Some(origin) = node.origin() {
            let text = node.text();
            match pieces.last_mut() {
                Some(Piece::Template { origin: last, text: acc }) if Rc::ptr_eq(last, &origin) => {
                    acc.push_str(&text);
                }
                _ => pieces.push(Piece::Template { origin, text }),
            }
            continue;
        }
        match &node.kind {
            NodeKind::Link {
                target,
                kind: LinkKind::Internal | LinkKind::Interwiki,
            } => pieces.push(Piece::Link {
                target: target.clone(),
                text: node.text(),
            }),
            NodeKind::Bold | NodeKind::Italic => pieces.extend(pieces_of(&node.children)),
            _ => {
                let text = node.text();
                match pieces.last_mut() {
                    Some(Piece::Text(acc)) => acc.push_str(&text),
                    _ => pieces.push(Piece::Text(text)),
                }
            }
        }
    }
    pieces
}
