//! The fixed host API visible to modules.
//!
//! Modules see `frame` (arguments, parent frame, `preprocess`,
//! `expandTemplate`) and a small `mw` table. Reading any `mw` member that is
//! not installed fails with [`ScriptError::UnsupportedHostCall`].

use super::ast::Chunk;
use super::interp::Interp;
use super::stdlib::{arg_str, string_table, trim_with};
use super::value::{Table, Value};
use crate::error::ScriptError;
use crate::languages::detect_script;
use std::cell::RefCell;
use std::rc::Rc;

/// What the interpreter needs from the expander.
pub trait ScriptHost {
    /// Parsed source of `Module:<name>`; the prefix may be omitted.
    fn load_module(&mut self, name: &str) -> Result<Rc<Chunk>, ScriptError>;

    /// Expands wikitext in the invoking frame.
    fn preprocess(&mut self, text: &str) -> String;

    /// Expands a template with already-evaluated arguments.
    fn expand_template(&mut self, title: &str, args: Vec<(String, String)>) -> String;

    fn page_title(&self) -> String;

    fn language_name(&self, code: &str) -> Option<String>;
}

/// Converts frame arguments into a table with numeric keys for positional slots.
pub fn args_table(args: &[(String, String)]) -> Table {
    let mut table = Table::new();
    for (key, value) in args {
        let key = match key.parse::<usize>() {
            Ok(n) if n > 0 => Value::Number(n as f64),
            _ => Value::str(key),
        };
        // Keys are never nil.
        let _ = table.set(key, Value::str(value));
    }
    table
}

/// Inverse of [`args_table`], used by `expandTemplate`.
fn table_args(table: &Table) -> Vec<(String, String)> {
    table
        .pairs()
        .into_iter()
        .map(|(k, v)| (super::interp::to_display(&k), super::interp::to_display(&v)))
        .collect()
}

fn frame_value(args: &[(String, String)], parent: Option<Value>) -> Value {
    let mut frame = Table::new();
    frame.set_str("args", Value::table(args_table(args)));
    let owned: Rc<Vec<(String, String)>> = Rc::new(args.to_vec());

    frame.set_str(
        "getParent",
        Value::native("getParent", move |_, _| Ok(vec![parent.clone().unwrap_or_default()])),
    );
    frame.set_str(
        "getArgument",
        Value::native("getArgument", move |_, call_args| {
            let key = call_args.get(1).map(super::interp::to_display).unwrap_or_default();
            let found = owned.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone());
            let Some(value) = found else {
                return Ok(vec![Value::Nil]);
            };
            let mut arg = Table::new();
            arg.set_str(
                "expand",
                Value::native("expand", move |_, _| Ok(vec![Value::str(&value)])),
            );
            Ok(vec![Value::table(arg)])
        }),
    );
    frame.set_str(
        "preprocess",
        Value::native("preprocess", |interp, call_args| {
            let text = match call_args.get(1) {
                Some(Value::Table(t)) => super::interp::to_display(&t.borrow().get_str("text")),
                Some(v) => super::interp::to_display(v),
                None => String::new(),
            };
            let out = interp.host.preprocess(&text);
            Ok(vec![Value::string(out)])
        }),
    );
    frame.set_str(
        "expandTemplate",
        Value::native("expandTemplate", |interp, call_args| {
            let Some(Value::Table(request)) = call_args.get(1) else {
                return Err(ScriptError::runtime(
                    "frame:expandTemplate: a table argument is required",
                ));
            };
            let (title, args) = {
                let request = request.borrow();
                let title = match request.get_str("title") {
                    Value::Nil => {
                        return Err(ScriptError::runtime("frame:expandTemplate: a title is required"))
                    }
                    v => super::interp::to_display(&v),
                };
                let args = match request.get_str("args") {
                    Value::Table(t) => table_args(&t.borrow()),
                    _ => Vec::new(),
                };
                (title, args)
            };
            let out = interp.host.expand_template(&title, args);
            Ok(vec![Value::string(out)])
        }),
    );
    frame.set_str(
        "getTitle",
        Value::native("getTitle", |interp, _| Ok(vec![Value::string(interp.host.page_title())])),
    );
    Value::table(frame)
}

/// Builds the `frame` passed to the invoked function.
pub fn make_frame(args: &[(String, String)], parent_args: &[(String, String)]) -> Value {
    let parent = frame_value(parent_args, None);
    frame_value(args, Some(parent))
}

/// Makes unknown members of `table` fail as unsupported host calls.
fn guard(table: &mut Table, prefix: &'static str) {
    let mut meta = Table::new();
    meta.set_str(
        "__index",
        Value::native("unsupported", move |_, args| {
            let key = args.get(1).map(super::interp::to_display).unwrap_or_default();
            Err(ScriptError::UnsupportedHostCall(format!("{}.{}", prefix, key)))
        }),
    );
    table.metatable = Some(Rc::new(RefCell::new(meta)));
}

fn guarded(mut table: Table, prefix: &'static str) -> Value {
    guard(&mut table, prefix);
    Value::table(table)
}

/// Installs the `mw` global.
pub fn install_mw(interp: &mut Interp<'_>) {
    let mut title = Table::new();
    title.set_str(
        "getCurrentTitle",
        Value::native("getCurrentTitle", |interp, _| {
            let text = interp.host.page_title();
            let mut t = Table::new();
            t.set_str("text", Value::str(&text));
            t.set_str("fullText", Value::str(&text));
            t.set_str("prefixedText", Value::str(&text));
            t.set_str("baseText", Value::str(&text));
            t.set_str("subpageText", Value::str(&text));
            t.set_str("nsText", Value::str(""));
            t.set_str("namespace", Value::Number(0.0));
            Ok(vec![guarded(t, "mw.title")])
        }),
    );

    let mut language = Table::new();
    language.set_str(
        "fetchLanguageName",
        Value::native("fetchLanguageName", |interp, args| {
            let code = arg_str(&args, 0, "fetchLanguageName")?;
            let name = interp.host.language_name(&code).unwrap_or_default();
            Ok(vec![Value::string(name)])
        }),
    );

    let mut host = Table::new();
    host.set_str(
        "languageName",
        Value::native("languageName", |interp, args| {
            let code = arg_str(&args, 0, "languageName")?;
            Ok(vec![interp
                .host
                .language_name(&code)
                .map(Value::string)
                .unwrap_or_default()])
        }),
    );
    host.set_str(
        "detectScript",
        Value::native("detectScript", |_, args| {
            let text = arg_str(&args, 0, "detectScript")?;
            Ok(vec![Value::str(detect_script(&text))])
        }),
    );

    let mut text = Table::new();
    text.set_str(
        "trim",
        Value::native("trim", |_, args| {
            let s = arg_str(&args, 0, "trim")?;
            let charset = match args.get(1) {
                Some(Value::Str(cs)) => Some(cs.to_string()),
                _ => None,
            };
            Ok(vec![Value::string(trim_with(&s, charset.as_deref())?)])
        }),
    );
    text.set_str(
        "split",
        Value::native("split", |_, args| {
            let s = arg_str(&args, 0, "split")?;
            let pat = arg_str(&args, 1, "split")?;
            let plain = args.get(2).is_some_and(Value::truthy);
            let pieces = super::stdlib::split(&s, &pat, plain)?;
            Ok(vec![Value::table(Table::from_array(
                pieces.into_iter().map(Value::string).collect(),
            ))])
        }),
    );

    let mut mw = Table::new();
    mw.set_str("title", guarded(title, "mw.title"));
    mw.set_str("language", guarded(language, "mw.language"));
    mw.set_str("host", guarded(host, "mw.host"));
    mw.set_str("text", guarded(text, "mw.text"));
    mw.set_str("ustring", guarded(string_table(true), "mw.ustring"));
    mw.set_str(
        "loadData",
        Value::native("loadData", |interp, args| {
            let name = arg_str(&args, 0, "loadData")?;
            Ok(vec![require(interp, &name)?])
        }),
    );
    interp.set_global("mw", guarded(mw, "mw"));
}

/// Loads and runs a module once per invocation.
pub fn require(interp: &mut Interp<'_>, name: &str) -> Result<Value, ScriptError> {
    let key = name.strip_prefix("Module:").unwrap_or(name).to_string();
    if let Some(value) = interp.loaded.get(&key) {
        return Ok(value.clone());
    }
    let chunk = interp.host.load_module(&key)?;
    let value = interp
        .run_chunk(&chunk)?
        .into_iter()
        .next()
        .filter(|v| !v.is_nil())
        .unwrap_or(Value::Bool(true));
    interp.loaded.insert(key, value.clone());
    Ok(value)
}
