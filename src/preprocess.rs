//! Comment and include-markup handling plus the brace tree builder.
//!
//! The tree builder is a stack scanner in the style of the MediaWiki
//! preprocessor: runs of `{` open elements, runs of `}` close them, and
//! whatever never closes is flattened back into literal text.

use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// A node of the brace tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PNode {
    Text(String),
    /// `{{name|part|...}}`; the first part is the name.
    Template(Vec<Part>),
    /// `{{{name|default}}}`
    Argument(Vec<Part>),
    /// A verbatim extension tag, kept with its markup.
    Nowiki(String),
}

/// One `|`-separated part. `eq` marks the first top-level `=`: nodes before
/// it form the argument name, nodes after it the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    pub nodes: Vec<PNode>,
    pub eq: Option<usize>,
}

impl Part {
    fn push_text(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        let can_merge = self.eq != Some(self.nodes.len());
        if can_merge {
            if let Some(PNode::Text(last)) = self.nodes.last_mut() {
                last.push_str(s);
                return;
            }
        }
        self.nodes.push(PNode::Text(s.to_string()));
    }

    fn push_node(&mut self, node: PNode) {
        match node {
            PNode::Text(s) => self.push_text(&s),
            other => self.nodes.push(other),
        }
    }

    pub fn name_nodes(&self) -> Option<&[PNode]> {
        self.eq.map(|i| &self.nodes[..i])
    }

    pub fn value_nodes(&self) -> &[PNode] {
        match self.eq {
            Some(i) => &self.nodes[i..],
            None => &self.nodes,
        }
    }

    /// Reconstructs the part's source text.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if self.eq == Some(i) {
                out.push('=');
            }
            node.write_source(&mut out);
        }
        if self.eq == Some(self.nodes.len()) {
            out.push('=');
        }
        out
    }
}

impl PNode {
    pub fn write_source(&self, out: &mut String) {
        match self {
            PNode::Text(s) | PNode::Nowiki(s) => out.push_str(s),
            PNode::Template(parts) => write_parts(out, parts, "{{", "}}"),
            PNode::Argument(parts) => write_parts(out, parts, "{{{", "}}}"),
        }
    }

    pub fn source(&self) -> String {
        let mut out = String::new();
        self.write_source(&mut out);
        out
    }
}

fn write_parts(out: &mut String, parts: &[Part], open: &str, close: &str) {
    out.push_str(open);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        out.push_str(&part.source());
    }
    out.push_str(close);
}

/// Source text of a node list.
pub fn source_of(nodes: &[PNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        node.write_source(&mut out);
    }
    out
}

/// Tags whose content is never expanded.
pub const VERBATIM_TAGS: &[&str] = &[
    "nowiki",
    "pre",
    "math",
    "syntaxhighlight",
    "source",
    "chem",
    "ce",
];

static NOINCLUDE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<noinclude\s*>.*?(?:</noinclude\s*>|\z)").unwrap());
static INCLUDEONLY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?includeonly\s*>").unwrap());
static ONLYINCLUDE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<onlyinclude\s*>(.*?)</onlyinclude\s*>").unwrap());
static INCLUDEONLY_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<includeonly\s*>.*?(?:</includeonly\s*>|\z)").unwrap());
static PAGE_ONLY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(?:noinclude|onlyinclude)\s*>").unwrap());

/// Removes `<!-- ... -->` comments. An unterminated comment runs to the end.
pub fn strip_comments(text: &str) -> Cow<'_, str> {
    let finder = memmem::Finder::new("<!--");
    let Some(first) = finder.find(text.as_bytes()) else {
        return Cow::Borrowed(text);
    };
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    let mut start = first;
    loop {
        out.push_str(&text[pos..start]);
        match memmem::find(text[start + 4..].as_bytes(), b"-->") {
            Some(end) => pos = start + 4 + end + 3,
            None => return Cow::Owned(out),
        }
        match finder.find(text[pos..].as_bytes()) {
            Some(next) => start = pos + next,
            None => break,
        }
    }
    out.push_str(&text[pos..]);
    Cow::Owned(out)
}

/// The part of a page body that is visible when the page is transcluded.
pub fn transclusion_view(body: &str) -> String {
    let body = strip_comments(body);
    if ONLYINCLUDE_BLOCK.is_match(&body) {
        return ONLYINCLUDE_BLOCK
            .captures_iter(&body)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect();
    }
    let without = NOINCLUDE_BLOCK.replace_all(&body, "");
    INCLUDEONLY_TAG.replace_all(&without, "").into_owned()
}

/// The part of a page body that is visible when the page is rendered itself.
pub fn page_view(body: &str) -> String {
    let body = strip_comments(body);
    let without = INCLUDEONLY_BLOCK.replace_all(&body, "");
    PAGE_ONLY_TAG.replace_all(&without, "").into_owned()
}

/// True when `text` holds nothing the expander would change.
pub fn is_plain(text: &str) -> bool {
    memmem::find(text.as_bytes(), b"{{").is_none()
        && memmem::find(text.as_bytes(), b"<!--").is_none()
        && !INCLUDEONLY_TAG.is_match(text)
        && !PAGE_ONLY_TAG.is_match(text)
}

#[derive(Clone, Copy, PartialEq)]
enum OpenKind {
    Brace,
    Link,
}

struct Open {
    kind: OpenKind,
    count: usize,
    parts: Vec<Part>,
}

impl Open {
    fn new(kind: OpenKind, count: usize) -> Self {
        Self {
            kind,
            count,
            parts: vec![Part::default()],
        }
    }

    fn current(&mut self) -> &mut Part {
        if self.parts.is_empty() {
            self.parts.push(Part::default());
        }
        let last = self.parts.len() - 1;
        &mut self.parts[last]
    }
}

struct Builder {
    root: Part,
    stack: Vec<Open>,
}

impl Builder {
    fn target(&mut self) -> &mut Part {
        match self.stack.last_mut() {
            Some(open) => open.current(),
            None => &mut self.root,
        }
    }

    fn text(&mut self, s: &str) {
        self.target().push_text(s);
    }

    fn node(&mut self, node: PNode) {
        self.target().push_node(node);
    }

    fn nodes(&mut self, nodes: Vec<PNode>) {
        let target = self.target();
        for node in nodes {
            target.push_node(node);
        }
    }

    fn close_braces(&mut self, mut count: usize) {
        while count > 0 {
            let Some(top) = self.stack.last() else { break };
            if top.kind != OpenKind::Brace {
                break;
            }
            let matched = top.count.min(count).min(3);
            if matched < 2 {
                break;
            }
            let Some(open) = self.stack.pop() else { break };
            count -= matched;
            let node = if matched == 3 {
                PNode::Argument(open.parts)
            } else {
                PNode::Template(open.parts)
            };
            let leftover = open.count - matched;
            if leftover >= 2 {
                let mut again = Open::new(OpenKind::Brace, leftover);
                again.current().push_node(node);
                self.stack.push(again);
            } else {
                if leftover == 1 {
                    self.text("{");
                }
                self.node(node);
            }
        }
        if count > 0 {
            self.text(&"}".repeat(count));
        }
    }

    fn finish(mut self) -> Vec<PNode> {
        while let Some(open) = self.stack.pop() {
            let nodes = flatten_open(open, false);
            self.nodes(nodes);
        }
        self.root.nodes
    }
}

fn flatten_open(open: Open, closed: bool) -> Vec<PNode> {
    let mut acc = Part::default();
    match open.kind {
        OpenKind::Brace => acc.push_text(&"{".repeat(open.count)),
        OpenKind::Link => acc.push_text("[["),
    }
    for (i, part) in open.parts.into_iter().enumerate() {
        if i > 0 {
            acc.push_text("|");
        }
        flatten_part(&mut acc, part);
    }
    if closed && open.kind == OpenKind::Link {
        acc.push_text("]]");
    }
    acc.nodes
}

fn flatten_part(acc: &mut Part, part: Part) {
    let eq = part.eq;
    let len = part.nodes.len();
    for (j, node) in part.nodes.into_iter().enumerate() {
        if eq == Some(j) {
            acc.push_text("=");
        }
        acc.push_node(node);
    }
    if eq == Some(len) {
        acc.push_text("=");
    }
}

/// Matches a verbatim tag opening at `pos`, returning the end of its closing tag.
fn verbatim_end(text: &str, pos: usize) -> Option<usize> {
    let rest = &text[pos + 1..];
    let name = VERBATIM_TAGS.iter().find(|name| {
        rest.len() > name.len()
            && rest.as_bytes()[..name.len()].eq_ignore_ascii_case(name.as_bytes())
            && matches!(rest.as_bytes()[name.len()], b'>' | b' ' | b'/' | b'\t' | b'\n')
    })?;
    let open_end = pos + 1 + rest.find('>')?;
    if text[..open_end].ends_with('/') {
        return Some(open_end + 1);
    }
    let tail = &text.as_bytes()[open_end..];
    let close_start = memmem::find_iter(tail, b"</").map(|at| open_end + at).find(|&at| {
        let after = &text.as_bytes()[at + 2..];
        after.len() >= name.len() && after[..name.len()].eq_ignore_ascii_case(name.as_bytes())
    })?;
    let gt = text[close_start..].find('>')?;
    Some(close_start + gt + 1)
}

fn run_length(bytes: &[u8], pos: usize, ch: u8) -> usize {
    bytes[pos..].iter().take_while(|&&b| b == ch).count()
}

/// Builds the brace tree of `text`. Comments must already be stripped.
pub fn parse(text: &str) -> Vec<PNode> {
    let bytes = text.as_bytes();
    let mut builder = Builder {
        root: Part::default(),
        stack: Vec::new(),
    };
    let mut pos = 0;
    let mut plain_start = 0;

    while pos < bytes.len() {
        let b = bytes[pos];
        if !matches!(b, b'{' | b'}' | b'[' | b']' | b'|' | b'=' | b'<') {
            pos += 1;
            continue;
        }
        builder.text(&text[plain_start..pos]);
        match b {
            b'{' => {
                let n = run_length(bytes, pos, b'{');
                if n >= 2 {
                    builder.stack.push(Open::new(OpenKind::Brace, n));
                } else {
                    builder.text("{");
                }
                pos += n;
            }
            b'}' => {
                let n = run_length(bytes, pos, b'}');
                builder.close_braces(n);
                pos += n;
            }
            b'[' => {
                let n = run_length(bytes, pos, b'[');
                if n >= 2 {
                    builder.text(&"[".repeat(n - 2));
                    builder.stack.push(Open::new(OpenKind::Link, 2));
                } else {
                    builder.text("[");
                }
                pos += n;
            }
            b']' => {
                let n = run_length(bytes, pos, b']');
                let closes_link =
                    n >= 2 && matches!(builder.stack.last(), Some(o) if o.kind == OpenKind::Link);
                if closes_link {
                    if let Some(open) = builder.stack.pop() {
                        let nodes = flatten_open(open, true);
                        builder.nodes(nodes);
                    }
                    builder.text(&"]".repeat(n - 2));
                } else {
                    builder.text(&"]".repeat(n));
                }
                pos += n;
            }
            b'|' => {
                match builder.stack.last_mut() {
                    Some(open) => open.parts.push(Part::default()),
                    None => builder.text("|"),
                }
                pos += 1;
            }
            b'=' => {
                match builder.stack.last_mut() {
                    Some(open)
                        if open.kind == OpenKind::Brace
                            && open.parts.last().map_or(true, |p| p.eq.is_none()) =>
                    {
                        let part = open.current();
                        part.eq = Some(part.nodes.len());
                    }
                    _ => builder.text("="),
                }
                pos += 1;
            }
            _ => match verbatim_end(text, pos) {
                Some(end) => {
                    builder.node(PNode::Nowiki(text[pos..end].to_string()));
                    pos = end;
                }
                None => {
                    builder.text("<");
                    pos += 1;
                }
            },
        }
        plain_start = pos;
    }
    builder.text(&text[plain_start..]);
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> PNode {
        PNode::Text(s.to_string())
    }

    #[test]
    fn strips_comments() {
        assert_eq!(strip_comments("a<!-- x -->b<!--y-->c"), "abc");
        assert_eq!(strip_comments("a<!-- open"), "a");
        assert!(matches!(strip_comments("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn transclusion_rules() {
        assert_eq!(transclusion_view("a<noinclude>doc</noinclude>b"), "ab");
        assert_eq!(transclusion_view("a<includeonly>x</includeonly>"), "ax");
        assert_eq!(
            transclusion_view("junk<onlyinclude>A</onlyinclude>more<onlyinclude>B</onlyinclude>"),
            "AB"
        );
    }

    #[test]
    fn page_rules() {
        assert_eq!(page_view("a<includeonly>x</includeonly>b"), "ab");
        assert_eq!(page_view("a<noinclude>doc</noinclude>"), "adoc");
    }

    #[test]
    fn plain_text_is_single_node() {
        assert_eq!(parse("hello world"), vec![text("hello world")]);
    }

    #[test]
    fn template_parts() {
        let nodes = parse("x{{t|a|k=v}}y");
        assert_eq!(nodes.len(), 3);
        let PNode::Template(parts) = &nodes[1] else {
            panic!("expected template")
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].nodes, vec![text("t")]);
        assert_eq!(parts[1].eq, None);
        assert_eq!(parts[2].eq, Some(1));
        assert_eq!(parts[2].name_nodes(), Some(&[text("k")][..]));
        assert_eq!(parts[2].value_nodes(), &[text("v")][..]);
    }

    #[test]
    fn argument_with_default() {
        let nodes = parse("{{{1|def}}}");
        assert!(matches!(&nodes[0], PNode::Argument(parts) if parts.len() == 2));
    }

    #[test]
    fn five_braces_nest_argument_in_template() {
        let nodes = parse("{{{{{1}}}}}");
        let PNode::Template(parts) = &nodes[0] else {
            panic!("expected template, got {:?}", nodes)
        };
        assert!(matches!(parts[0].nodes[0], PNode::Argument(_)));
    }

    #[test]
    fn pipe_inside_link_does_not_split() {
        let nodes = parse("{{t|[[a|b]]|c}}");
        let PNode::Template(parts) = &nodes[0] else {
            panic!()
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].source(), "[[a|b]]");
    }

    #[test]
    fn equals_inside_link_is_not_a_name() {
        let nodes = parse("{{t|[[a=b]]}}");
        let PNode::Template(parts) = &nodes[0] else {
            panic!()
        };
        assert_eq!(parts[1].eq, None);
    }

    #[test]
    fn unbalanced_braces_stay_literal() {
        assert_eq!(source_of(&parse("a {{b|c")), "a {{b|c");
        assert_eq!(source_of(&parse("a }} b")), "a }} b");
        assert_eq!(parse("a }} b"), vec![text("a }} b")]);
    }

    #[test]
    fn source_roundtrips_markup() {
        let src = "{{a|b={{{1|x}}}|[[c|d]]}} e {{f}}";
        assert_eq!(source_of(&parse(src)), src);
    }

    #[test]
    fn verbatim_tags_are_kept() {
        let nodes = parse("a<nowiki>{{x}}</nowiki>b");
        assert_eq!(nodes[1], PNode::Nowiki("<nowiki>{{x}}</nowiki>".to_string()));
        let nodes = parse("<math>{{y}}</MATH>");
        assert!(matches!(&nodes[0], PNode::Nowiki(_)));
    }

    #[test]
    fn plain_detection() {
        assert!(is_plain("just [[links]] and text"));
        assert!(!is_plain("a {{t}}"));
        assert!(!is_plain("a <!-- c -->"));
    }
}
