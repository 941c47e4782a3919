//! Recursive template and module expansion for one page.
//!
//! An [`Expander`] lives for exactly one page. It owns the per-page caches
//! (parsed template bodies, parsed modules, `#invoke` results) and the
//! page's diagnostics, and it reads pages only through [`PageLookup`].

use crate::config::{Limits, REDIRECT_MAX_DEPTH};
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::error::{ExpandError, ScriptError};
use crate::languages::LanguageTable;
use crate::models::{normalize_title, Namespace, Page};
use crate::parser_functions;
use crate::preprocess::{self, PNode, Part};
use crate::script::{self, Chunk, ScriptHost};
use crate::store::PageLookup;
use rustc_hash::{FxHashMap, FxHashSet};
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// A top-level template call and the bytes of expanded text it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOrigin {
    pub name: String,
    pub args: Vec<(String, String)>,
    pub range: Range<usize>,
}

/// Result of expanding one page.
#[derive(Debug)]
pub struct Expansion {
    pub text: String,
    pub invocations: Vec<Rc<TemplateOrigin>>,
    /// Set when a depth or size budget cut expansion short.
    pub degraded: bool,
    pub diagnostics: PageDiagnostics,
}

/// Ordered template arguments. Setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<(String, String)>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted `key=value` lines; identical argument sets give identical keys.
    fn canonical(&self) -> String {
        let mut pairs: Vec<_> = self.0.iter().collect();
        pairs.sort();
        let mut out = String::new();
        for (k, v) in pairs {
            out.push_str(k);
            out.push('\u{1f}');
            out.push_str(v);
            out.push('\u{1e}');
        }
        out
    }
}

impl From<Vec<(String, String)>> for Args {
    fn from(pairs: Vec<(String, String)>) -> Self {
        let mut args = Args::new();
        for (k, v) in pairs {
            args.set(k, v);
        }
        args
    }
}

/// The invocation a piece of text is being expanded in.
#[derive(Debug, Clone)]
pub struct Frame {
    pub title: String,
    /// `None` for the page itself, where `{{{arg}}}` has nothing to refer to.
    pub args: Option<Rc<Args>>,
    pub depth: usize,
}

impl Frame {
    fn page(title: &str) -> Self {
        Self {
            title: title.to_string(),
            args: None,
            depth: 0,
        }
    }

    fn child(&self, title: String, args: Args) -> Self {
        Self {
            title,
            args: Some(Rc::new(args)),
            depth: self.depth + 1,
        }
    }
}

pub struct Expander<'a> {
    store: &'a dyn PageLookup,
    languages: Arc<LanguageTable>,
    limits: Limits,
    page_title: String,
    templates: FxHashMap<String, Option<Rc<Vec<PNode>>>>,
    modules: FxHashMap<String, Result<Rc<Chunk>, ScriptError>>,
    invoke_cache: FxHashMap<String, String>,
    /// `(title, canonical args)` of every template currently being expanded.
    chain: FxHashSet<(String, String)>,
    output_size: usize,
    calls: usize,
    size_exceeded: bool,
    degraded: bool,
    diagnostics: PageDiagnostics,
}

impl<'a> Expander<'a> {
    pub fn new(
        store: &'a dyn PageLookup,
        languages: Arc<LanguageTable>,
        limits: Limits,
        page_title: &str,
    ) -> Self {
        Self {
            store,
            languages,
            limits,
            page_title: page_title.to_string(),
            templates: FxHashMap::default(),
            modules: FxHashMap::default(),
            invoke_cache: FxHashMap::default(),
            chain: FxHashSet::default(),
            output_size: 0,
            calls: 0,
            size_exceeded: false,
            degraded: false,
            diagnostics: PageDiagnostics::new(page_title),
        }
    }

    /// Expands a page body. Text without templates, comments or include
    /// markup comes back unchanged.
    pub fn expand_page(mut self, body: &str) -> Expansion {
        if preprocess::is_plain(body) {
            return Expansion {
                text: body.to_string(),
                invocations: Vec::new(),
                degraded: false,
                diagnostics: self.diagnostics,
            };
        }
        let view = preprocess::page_view(body);
        let nodes = preprocess::parse(&view);
        let frame = Frame::page(&self.page_title);

        let mut text = String::with_capacity(view.len());
        let mut invocations = Vec::new();
        for node in &nodes {
            match node {
                PNode::Template(parts) => {
                    let start = text.len();
                    let call = self.call_template(parts, &frame, &mut text);
                    if let Some((name, args)) = call {
                        invocations.push(Rc::new(TemplateOrigin {
                            name,
                            args: args.as_slice().to_vec(),
                            range: start..text.len(),
                        }));
                    }
                }
                other => self.expand_node(other, &frame, &mut text),
            }
        }
        Expansion {
            text,
            invocations,
            degraded: self.degraded,
            diagnostics: self.diagnostics,
        }
    }

    /// Expands free-standing wikitext in the page frame, as `frame:preprocess` does.
    pub fn expand_text(&mut self, text: &str, frame: &Frame) -> String {
        let text = preprocess::strip_comments(text);
        let nodes = preprocess::parse(&text);
        self.expand_nodes(&nodes, frame)
    }

    pub fn into_diagnostics(self) -> PageDiagnostics {
        self.diagnostics
    }

    pub(crate) fn page_title(&self) -> &str {
        &self.page_title
    }

    pub(crate) fn language_name(&self, code: &str) -> Option<String> {
        self.languages.name_for(code).map(str::to_string)
    }

    pub(crate) fn page_exists(&self, full_title: &str) -> bool {
        let (ns, title) = Namespace::split_title(full_title);
        !title.is_empty() && self.store.exists(ns, title)
    }

    pub(crate) fn expand_nodes(&mut self, nodes: &[PNode], frame: &Frame) -> String {
        let mut out = String::new();
        for node in nodes {
            self.expand_node(node, frame, &mut out);
        }
        out
    }

    /// Expands a whole part, `=` included.
    pub(crate) fn expand_part(&mut self, part: &Part, frame: &Frame) -> String {
        match part.eq {
            None => self.expand_nodes(&part.nodes, frame),
            Some(i) => {
                let mut out = self.expand_nodes(&part.nodes[..i], frame);
                out.push('=');
                out.push_str(&self.expand_nodes(&part.nodes[i..], frame));
                out
            }
        }
    }

    fn expand_node(&mut self, node: &PNode, frame: &Frame, out: &mut String) {
        match node {
            PNode::Text(s) | PNode::Nowiki(s) => out.push_str(s),
            PNode::Argument(parts) => self.expand_argument(node, parts, frame, out),
            PNode::Template(parts) => {
                self.call_template(parts, frame, out);
            }
        }
    }

    fn expand_argument(&mut self, node: &PNode, parts: &[Part], frame: &Frame, out: &mut String) {
        let Some(args) = frame.args.clone() else {
            node.write_source(out);
            return;
        };
        let name = match parts.first() {
            Some(part) => self.expand_part(part, frame),
            None => String::new(),
        };
        match args.get(name.trim()) {
            Some(value) => out.push_str(value),
            None => {
                if let Some(default) = parts.get(1) {
                    let value = self.expand_part(default, frame);
                    out.push_str(&value);
                }
            }
        }
    }

    /// Expands `{{...}}`. Returns the resolved name and arguments when a
    /// template (rather than a parser function) was called.
    fn call_template(
        &mut self,
        parts: &[Part],
        frame: &Frame,
        out: &mut String,
    ) -> Option<(String, Args)> {
        if self.size_exceeded {
            out.push_str(&PNode::Template(parts.to_vec()).source());
            return None;
        }
        let head = parts.first()?;
        let name = self.expand_part(head, frame);
        let name = name.trim();
        if !self.spend_call(name) {
            out.push_str(&PNode::Template(parts.to_vec()).source());
            return None;
        }

        if let Some((function, first)) = name.split_once(':') {
            let function = function.trim();
            if function.eq_ignore_ascii_case("#invoke") {
                let result = self.invoke(first.trim(), &parts[1..], frame);
                self.account(&result, name);
                out.push_str(&result);
                return None;
            }
            if let Some(result) =
                parser_functions::call(self, function, first.trim(), &parts[1..], frame)
            {
                out.push_str(&result);
                return None;
            }
        } else if parts.len() == 1 {
            if let Some(result) = parser_functions::magic_word(self, name) {
                out.push_str(&result);
                return None;
            }
        }

        let name = strip_subst(name).to_string();
        let args = self.template_args(&parts[1..], frame);
        let result = self.transclude(&name, args.clone(), frame);
        out.push_str(&result);
        Some((name, args))
    }

    /// Evaluates template arguments in the caller's frame. Positional values
    /// keep their whitespace; explicit names win over positions.
    fn template_args(&mut self, parts: &[Part], frame: &Frame) -> Args {
        let mut positional = Vec::new();
        let mut named = Vec::new();
        for part in parts {
            match part.name_nodes() {
                Some(name_nodes) => {
                    let key = self.expand_nodes(name_nodes, frame).trim().to_string();
                    let value = self.expand_nodes(part.value_nodes(), frame).trim().to_string();
                    named.push((key, value));
                }
                None => positional.push(self.expand_nodes(&part.nodes, frame)),
            }
        }
        let mut args = Args::new();
        for (i, value) in positional.into_iter().enumerate() {
            args.set((i + 1).to_string(), value);
        }
        for (key, value) in named {
            args.set(key, value);
        }
        args
    }

    /// Resolves `name` to a page and expands its body with `args`.
    pub(crate) fn transclude(&mut self, name: &str, args: Args, frame: &Frame) -> String {
        let (ns, title) = template_title(name);
        let full = display_title(ns, &title);
        let Some(body) = self.template_body(ns, &title) else {
            self.diagnostics.warning(
                DiagnosticKind::TemplateNotFound,
                ExpandError::TemplateNotFound(full.clone()).to_string(),
                &full,
            );
            return format!("[[:{}]]", full);
        };

        let depth = frame.depth + 1;
        if depth > self.limits.max_depth {
            self.recursion_exceeded(&full, depth);
            return String::new();
        }
        let key = (full.clone(), args.canonical());
        if self.chain.contains(&key) {
            self.recursion_exceeded(&full, depth);
            return String::new();
        }

        trace!(template = %full, depth, "Expanding template");
        self.chain.insert(key.clone());
        let child = frame.child(full.clone(), args);
        let result = self.expand_nodes(&body, &child);
        self.chain.remove(&key);
        self.account(&result, &full);
        result
    }

    fn recursion_exceeded(&mut self, template: &str, depth: usize) {
        self.degraded = true;
        let err = ExpandError::RecursionExceeded {
            template: template.to_string(),
            depth,
        };
        self.diagnostics
            .warning(DiagnosticKind::RecursionExceeded, err.to_string(), template);
    }

    /// Counts one call against the page budget. Once the budget is spent
    /// the page is treated like one that outgrew its size budget.
    fn spend_call(&mut self, template: &str) -> bool {
        if self.size_exceeded {
            return false;
        }
        self.calls += 1;
        if self.calls <= self.limits.max_template_calls {
            return true;
        }
        self.size_exceeded = true;
        self.degraded = true;
        let err = ExpandError::CallBudgetExceeded {
            template: template.to_string(),
            limit: self.limits.max_template_calls,
        };
        self.diagnostics
            .warning(DiagnosticKind::SizeExceeded, err.to_string(), template);
        false
    }

    /// Adds produced bytes to the page budget.
    fn account(&mut self, produced: &str, template: &str) {
        self.output_size += produced.len();
        if !self.size_exceeded && self.output_size > self.limits.max_expanded_size {
            self.size_exceeded = true;
            self.degraded = true;
            let err = ExpandError::SizeExceeded {
                template: template.to_string(),
                limit: self.limits.max_expanded_size,
            };
            self.diagnostics
                .warning(DiagnosticKind::SizeExceeded, err.to_string(), template);
        }
    }

    fn template_body(&mut self, ns: Namespace, title: &str) -> Option<Rc<Vec<PNode>>> {
        let key = display_title(ns, title);
        if let Some(cached) = self.templates.get(&key) {
            return cached.clone();
        }
        let body = self.follow_redirects(ns, title).map(|page| {
            let view = preprocess::transclusion_view(&page.body);
            Rc::new(preprocess::parse(&view))
        });
        self.templates.insert(key, body.clone());
        body
    }

    fn follow_redirects(&self, ns: Namespace, title: &str) -> Option<Arc<Page>> {
        let mut page = self.store.get(ns, title)?;
        for _ in 0..REDIRECT_MAX_DEPTH {
            let Some(target) = page.redirect.clone() else {
                return Some(page);
            };
            let (target_ns, target_title) = Namespace::split_title(&target);
            let target_ns = if target_ns == Namespace::Main { ns } else { target_ns };
            page = self.store.get(target_ns, target_title)?;
        }
        page.redirect.is_none().then_some(page)
    }

    pub(crate) fn load_chunk(&mut self, name: &str) -> Result<Rc<Chunk>, ScriptError> {
        let name = name.strip_prefix("Module:").unwrap_or(name).trim();
        let key = normalize_title(Namespace::Module, name);
        if let Some(cached) = self.modules.get(&key) {
            return cached.clone();
        }
        let loaded = match self.follow_redirects(Namespace::Module, &key) {
            Some(page) => script::parse_chunk(&key, &page.body).map(Rc::new),
            None => Err(ScriptError::ModuleNotFound(key.clone())),
        };
        self.modules.insert(key, loaded.clone());
        loaded
    }

    /// Runs `{{#invoke:module|function|args}}`. Faults are logged and yield
    /// an empty string.
    fn invoke(&mut self, module: &str, parts: &[Part], frame: &Frame) -> String {
        let Some(function_part) = parts.first() else {
            self.diagnostics.warning(
                DiagnosticKind::InterpreterRuntimeError,
                format!("#invoke:{} without a function name", module),
                module,
            );
            return String::new();
        };
        let function = self.expand_part(function_part, frame).trim().to_string();
        let args = self.template_args(&parts[1..], frame);
        let parent = frame.args.clone().unwrap_or_default();

        let cache_key = format!(
            "{}\u{1d}{}\u{1d}{}\u{1d}{}",
            module,
            function,
            args.canonical(),
            parent.canonical()
        );
        if let Some(cached) = self.invoke_cache.get(&cache_key) {
            return cached.clone();
        }

        let context = format!("{}.{}", module, function);
        let depth = frame.depth + 1;
        if depth > self.limits.max_depth {
            self.recursion_exceeded(&context, depth);
            return String::new();
        }
        let key = (format!("Module:{}", context), args.canonical());
        if self.chain.contains(&key) {
            self.recursion_exceeded(&context, depth);
            return String::new();
        }

        self.chain.insert(key.clone());
        let result = match self.load_chunk(module) {
            Ok(chunk) => {
                let limits = self.limits;
                let child = frame.child(format!("Module:{}", module), args.clone());
                let mut host = InvokeHost {
                    expander: self,
                    frame: child,
                };
                script::invoke(
                    &mut host,
                    &chunk,
                    &function,
                    args.as_slice(),
                    parent.as_slice(),
                    &limits,
                )
            }
            Err(e) => Err(e),
        };
        self.chain.remove(&key);
        let output = match result {
            Ok(output) => output,
            Err(ScriptError::UnsupportedHostCall(call)) => {
                self.diagnostics.warning(
                    DiagnosticKind::UnsupportedHostCall,
                    format!("unsupported host call {} in {}", call, context),
                    &context,
                );
                String::new()
            }
            Err(e) => {
                self.diagnostics.warning(
                    DiagnosticKind::InterpreterRuntimeError,
                    format!("{} in {}", e, context),
                    &context,
                );
                String::new()
            }
        };
        self.invoke_cache.insert(cache_key, output.clone());
        output
    }
}

/// Connects one `#invoke` to the expander that issued it.
struct InvokeHost<'e, 'a> {
    expander: &'e mut Expander<'a>,
    frame: Frame,
}

impl ScriptHost for InvokeHost<'_, '_> {
    fn load_module(&mut self, name: &str) -> Result<Rc<Chunk>, ScriptError> {
        self.expander.load_chunk(name)
    }

    fn preprocess(&mut self, text: &str) -> String {
        self.expander.expand_text(text, &self.frame)
    }

    fn expand_template(&mut self, title: &str, args: Vec<(String, String)>) -> String {
        if !self.expander.spend_call(title) {
            return String::new();
        }
        self.expander.transclude(title, Args::from(args), &self.frame)
    }

    fn page_title(&self) -> String {
        self.expander.page_title.clone()
    }

    fn language_name(&self, code: &str) -> Option<String> {
        self.expander.language_name(code)
    }
}

fn strip_subst(name: &str) -> &str {
    for prefix in ["subst:", "safesubst:"] {
        if name.len() > prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return name[prefix.len()..].trim_start();
        }
    }
    name
}

/// Where `{{name}}` points: the Template namespace unless the name carries
/// another namespace prefix or a leading colon (main namespace).
fn template_title(name: &str) -> (Namespace, String) {
    if let Some(main) = name.strip_prefix(':') {
        return (Namespace::Main, normalize_title(Namespace::Main, main));
    }
    match Namespace::split_title(name) {
        (Namespace::Main, title) => (Namespace::Template, normalize_title(Namespace::Template, title)),
        (ns, title) => (ns, normalize_title(ns, title)),
    }
}

fn display_title(ns: Namespace, title: &str) -> String {
    match ns.prefix() {
        Some(prefix) => format!("{}:{}", prefix, title),
        None => title.to_string(),
    }
}

/// Expands one page body against `store`.
pub fn expand_page(
    store: &dyn PageLookup,
    languages: Arc<LanguageTable>,
    limits: Limits,
    title: &str,
    body: &str,
) -> Expansion {
    Expander::new(store, languages, limits, title).expand_page(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_EXPAND_DEPTH;
    use crate::store::PageStore;

    fn store(pages: &[(&str, &str)]) -> PageStore {
        let mut store = PageStore::new();
        for (full, body) in pages {
            let (ns, title) = Namespace::split_title(full);
            store.put(ns, title, body, false);
        }
        store
    }

    fn expand_with(store: &PageStore, limits: Limits, body: &str) -> Expansion {
        expand_page(store, Arc::new(LanguageTable::builtin()), limits, "chat", body)
    }

    fn expand(pages: &[(&str, &str)], body: &str) -> Expansion {
        expand_with(&store(pages), Limits::default(), body)
    }

    #[test]
    fn positional_substitution_is_exact() {
        let e = expand(&[("Template:pair", "<{{{1}}}|{{{2}}}>")], "{{pair| a |b}}");
        assert_eq!(e.text, "< a |b>");
        assert!(e.diagnostics.is_empty());
    }

    #[test]
    fn named_arguments_are_trimmed() {
        let e = expand(&[("Template:t", "[{{{lang}}}]")], "{{t| lang = fr }}");
        assert_eq!(e.text, "[fr]");
    }

    #[test]
    fn defaults_apply_only_to_absent_arguments() {
        let pages = [("Template:d", "({{{1|default}}})")];
        assert_eq!(expand(&pages, "{{d}}").text, "(default)");
        assert_eq!(expand(&pages, "{{d|}}").text, "()");
        assert_eq!(expand(&pages, "{{d|x}}").text, "(x)");
    }

    #[test]
    fn named_argument_overrides_positional() {
        let pages = [("Template:one", "{{{1}}}")];
        assert_eq!(expand(&pages, "{{one|a|1=b}}").text, "b");
        assert_eq!(expand(&pages, "{{one|1=b|a}}").text, "b");
    }

    #[test]
    fn missing_argument_without_default_is_empty() {
        let e = expand(&[("Template:m", "[{{{2}}}]")], "{{m|x}}");
        assert_eq!(e.text, "[]");
    }

    #[test]
    fn self_recursion_terminates() {
        let e = expand(&[("Template:A", "a{{A}}")], "{{A}}");
        assert!(e.degraded);
        assert!(e.diagnostics.has(DiagnosticKind::RecursionExceeded));
        assert!(e.text.starts_with('a'));
    }

    #[test]
    fn depth_limit_stops_varying_recursion() {
        let limits = Limits {
            max_depth: 5,
            ..Limits::default()
        };
        let s = store(&[("Template:grow", "x{{grow|{{{1|}}}x}}")]);
        let e = expand_with(&s, limits, "{{grow}}");
        assert!(e.degraded);
        assert!(e.diagnostics.has(DiagnosticKind::RecursionExceeded));
        assert_eq!(e.text, "xxxxx");
    }

    #[test]
    fn module_reentry_through_preprocess_terminates() {
        let pages = [(
            "Module:loop",
            "return { f = function(frame) return 'x' .. frame:preprocess('{{#invoke:loop|f|' .. frame.args[1] .. 'a}}') end }",
        )];
        let e = expand(&pages, "{{#invoke:loop|f|a}}");
        assert!(e.degraded);
        assert!(e.diagnostics.has(DiagnosticKind::RecursionExceeded));
        assert_eq!(e.text, "x".repeat(MAX_EXPAND_DEPTH));
    }

    #[test]
    fn module_reentry_with_same_arguments_is_cut() {
        let pages = [
            (
                "Module:again",
                "return { f = function(frame) return 'y' .. frame:expandTemplate{title = 'again', args = {}} end }",
            ),
            ("Template:again", "{{#invoke:again|f}}"),
        ];
        let e = expand(&pages, "{{#invoke:again|f}}");
        assert!(e.degraded);
        assert!(e.diagnostics.has(DiagnosticKind::RecursionExceeded));
        assert_eq!(e.text, "y");
    }

    #[test]
    fn call_budget_stops_fan_out() {
        let limits = Limits {
            max_template_calls: 500,
            ..Limits::default()
        };
        let s = store(&[("Template:E", "{{E|{{{1|}}}a}}{{E|{{{1|}}}b}}")]);
        let e = expand_with(&s, limits, "{{E}} tail {{E}}");
        assert!(e.degraded);
        assert!(e.diagnostics.has(DiagnosticKind::SizeExceeded));
        assert!(e.text.ends_with(" tail {{E}}"));
        assert_eq!(e.diagnostics.count(DiagnosticKind::SizeExceeded), 1);
    }

    #[test]
    fn missing_template_marker() {
        let e = expand(&[], "see {{no such}}");
        assert_eq!(e.text, "see [[:Template:No such]]");
        assert_eq!(e.diagnostics.count(DiagnosticKind::TemplateNotFound), 1);
        assert!(!e.degraded);
    }

    #[test]
    fn plain_text_is_unchanged() {
        let text = "== English ==\n# a [[cat|feline]] {not a template}\n";
        let e = expand(&[], text);
        assert_eq!(e.text, text);
        let again = expand(&[], &e.text);
        assert_eq!(again.text, e.text);
    }

    #[test]
    fn expansion_is_idempotent_on_its_output() {
        let e = expand(&[("Template:w", "''{{{1}}}''")], "{{w|word}} and [[link]]");
        let again = expand(&[], &e.text);
        assert_eq!(again.text, e.text);
    }

    #[test]
    fn include_rules_apply() {
        let pages = [(
            "Template:inc",
            "<noinclude>doc</noinclude>body<includeonly>!</includeonly>",
        )];
        let e = expand(&pages, "{{inc}}<noinclude>x</noinclude><includeonly>y</includeonly><!-- c -->");
        assert_eq!(e.text, "body!x");
    }

    #[test]
    fn arguments_expand_in_caller_frame() {
        let pages = [
            ("Template:outer", "{{inner|{{{1}}}}}"),
            ("Template:inner", "<{{{1}}}>"),
        ];
        assert_eq!(expand(&pages, "{{outer|v}}").text, "<v>");
    }

    #[test]
    fn template_redirects_are_followed() {
        let pages = [
            ("Template:old", "#REDIRECT [[Template:new]]"),
            ("Template:new", "new:{{{1}}}"),
        ];
        assert_eq!(expand(&pages, "{{old|z}}").text, "new:z");
    }

    #[test]
    fn size_budget_leaves_later_calls_raw() {
        let limits = Limits {
            max_expanded_size: 10,
            ..Limits::default()
        };
        let s = store(&[("Template:big", "0123456789abcdef")]);
        let e = expand_with(&s, limits, "{{big}}|{{big}}");
        assert!(e.degraded);
        assert!(e.diagnostics.has(DiagnosticKind::SizeExceeded));
        assert_eq!(e.text, "0123456789abcdef|{{big}}");
    }

    #[test]
    fn invocations_record_output_ranges() {
        let e = expand(&[("Template:t", "XY")], "ab{{t|1}}cd");
        assert_eq!(e.invocations.len(), 1);
        let origin = &e.invocations[0];
        assert_eq!(origin.name, "t");
        assert_eq!(origin.args, vec![("1".to_string(), "1".to_string())]);
        assert_eq!(&e.text[origin.range.clone()], "XY");
    }

    #[test]
    fn invoke_runs_module() {
        let pages = [(
            "Module:greet",
            "local p = {}\nfunction p.hello(frame)\n  return 'hello ' .. frame.args[1] .. '/' .. frame:getParent().args.who\nend\nreturn p",
        ), ("Template:greet", "{{#invoke:greet|hello|{{{1}}}}}")];
        let e = expand(&pages, "{{greet|world|who=me}}");
        assert_eq!(e.text, "hello world/me");
        assert!(e.diagnostics.is_empty());
    }

    #[test]
    fn module_can_expand_templates() {
        let pages = [
            (
                "Module:m",
                "return { f = function(frame) return frame:expandTemplate{title = 'b', args = {'x'}} .. frame:preprocess('{{b|y}}') end }",
            ),
            ("Template:b", "<{{{1}}}>"),
        ];
        assert_eq!(expand(&pages, "{{#invoke:m|f}}").text, "<x><y>");
    }

    #[test]
    fn unsupported_host_call_does_not_abort_page() {
        let pages = [("Module:bad", "return { f = function() return mw.site.siteName end }")];
        let e = expand(&pages, "before {{#invoke:bad|f}} after");
        assert_eq!(e.text, "before  after");
        assert!(e.diagnostics.has(DiagnosticKind::UnsupportedHostCall));
        assert!(!e.degraded);
    }

    #[test]
    fn runtime_error_is_reported() {
        let pages = [("Module:err", "return { f = function() error('nope') end }")];
        let e = expand(&pages, "{{#invoke:err|f}}{{#invoke:missing|f}}");
        assert_eq!(e.text, "");
        assert_eq!(e.diagnostics.count(DiagnosticKind::InterpreterRuntimeError), 2);
    }

    #[test]
    fn invoke_results_are_cached() {
        let pages = [("Module:c", "return { f = function(frame) error(frame.args[1]) end }")];
        let e = expand(&pages, "{{#invoke:c|f|a}}{{#invoke:c|f|a}}{{#invoke:c|f|b}}");
        assert_eq!(e.text, "");
        assert_eq!(e.diagnostics.count(DiagnosticKind::InterpreterRuntimeError), 2);
    }

    #[test]
    fn page_level_arguments_stay_literal() {
        let e = expand(&[], "x {{{1}}} y");
        assert_eq!(e.text, "x {{{1}}} y");
    }
}
