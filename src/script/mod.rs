//! A sandboxed interpreter for the Lua subset used by `Module:` pages.
//!
//! Every `#invoke` gets a fresh [`Interp`]: globals, loaded modules and the
//! step budget never leak between invocations. Parsed chunks are shared via
//! `Rc` and cached by the caller.

pub mod ast;
pub mod host;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod pattern;
pub mod stdlib;
pub mod value;

pub use ast::Chunk;
pub use host::ScriptHost;
pub use parser::parse_chunk;

use crate::config::Limits;
use crate::error::ScriptError;
use interp::{to_display, Interp};
use value::Value;

/// Runs `function` from `chunk` with a frame built from the invocation
/// arguments and returns the concatenated results as text.
pub fn invoke(
    host: &mut dyn ScriptHost,
    chunk: &Chunk,
    function: &str,
    args: &[(String, String)],
    parent_args: &[(String, String)],
    limits: &Limits,
) -> Result<String, ScriptError> {
    let mut interp = Interp::new(host, limits);
    stdlib::install(&mut interp);
    host::install_mw(&mut interp);

    let result = run(&mut interp, chunk, function, args, parent_args);
    tracing::trace!(
        module = %chunk.name,
        function,
        steps = interp.steps(),
        ok = result.is_ok(),
        "invoke finished"
    );
    result.map_err(|e| match e {
        ScriptError::Runtime(message) => {
            ScriptError::Runtime(format!("{} (line {})", message, interp.line()))
        }
        other => other,
    })
}

fn run(
    interp: &mut Interp<'_>,
    chunk: &Chunk,
    function: &str,
    args: &[(String, String)],
    parent_args: &[(String, String)],
) -> Result<String, ScriptError> {
    let exports = interp.run_chunk(chunk)?.into_iter().next().unwrap_or_default();
    let Value::Table(exports) = exports else {
        return Err(ScriptError::runtime(format!(
            "module {} did not return a table",
            chunk.name
        )));
    };
    let func = exports.borrow().get_str(function);
    if !matches!(func, Value::Function(_)) {
        return Err(ScriptError::FunctionNotFound {
            module: chunk.name.clone(),
            function: function.to_string(),
        });
    }
    let frame = host::make_frame(args, parent_args);
    let results = interp.call(&func, vec![frame])?;
    Ok(results
        .iter()
        .filter(|v| !v.is_nil())
        .map(to_display)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct MockHost {
        modules: FxHashMap<String, String>,
        preprocessed: Vec<String>,
        expanded: Vec<(String, Vec<(String, String)>)>,
    }

    impl MockHost {
        fn with(mut self, name: &str, source: &str) -> Self {
            self.modules.insert(name.to_string(), source.to_string());
            self
        }
    }

    impl ScriptHost for MockHost {
        fn load_module(&mut self, name: &str) -> Result<Rc<Chunk>, ScriptError> {
            let source = self
                .modules
                .get(name)
                .ok_or_else(|| ScriptError::ModuleNotFound(name.to_string()))?;
            Ok(Rc::new(parse_chunk(name, source)?))
        }

        fn preprocess(&mut self, text: &str) -> String {
            self.preprocessed.push(text.to_string());
            format!("<{}>", text)
        }

        fn expand_template(&mut self, title: &str, args: Vec<(String, String)>) -> String {
            self.expanded.push((title.to_string(), args));
            format!("[{}]", title)
        }

        fn page_title(&self) -> String {
            "chat".to_string()
        }

        fn language_name(&self, code: &str) -> Option<String> {
            match code {
                "fr" => Some("French".to_string()),
                _ => None,
            }
        }
    }

    fn limits() -> Limits {
        Limits::default()
    }

    fn run_with(host: &mut MockHost, body: &str, args: &[(&str, &str)]) -> Result<String, ScriptError> {
        let source = format!("local p = {{}}\nfunction p.main(frame)\n{}\nend\nreturn p", body);
        let chunk = parse_chunk("Test", &source)?;
        let args: Vec<(String, String)> = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        invoke(host, &chunk, "main", &args, &[], &limits())
    }

    fn eval(body: &str) -> String {
        run_with(&mut MockHost::default(), body, &[]).unwrap()
    }

    #[test]
    fn closures_capture_locals() {
        let out = eval(
            "local function counter()
                local n = 0
                return function() n = n + 1; return n end
            end
            local c = counter()
            c(); c()
            return c()",
        );
        assert_eq!(out, "3");
    }

    #[test]
    fn varargs_and_select() {
        let out = eval(
            "local function f(...)
                local t = {...}
                return select('#', ...) .. ':' .. #t .. ':' .. select(2, ...)
            end
            return f('a', 'b', 'c')",
        );
        assert_eq!(out, "3:3:b");
    }

    #[test]
    fn loops_and_tables() {
        let out = eval(
            "local t = {}
            for i = 1, 5 do t[#t + 1] = i * i end
            local sum = 0
            for _, v in ipairs(t) do sum = sum + v end
            local keys = {}
            for k in pairs({a = 1, b = 2}) do table.insert(keys, k) end
            local n = 0
            while true do n = n + 1; if n >= 3 then break end end
            repeat local done = true until done
            return sum .. ',' .. table.concat(keys, '') .. ',' .. n",
        );
        assert_eq!(out, "55,ab,3");
    }

    #[test]
    fn string_methods_and_patterns() {
        let out = eval(
            "local s = 'Hello World'
            local a = s:upper():sub(1, 5)
            local b = string.match('key=value', '(%w+)=(%w+)')
            local c = select(2, ('a,b,c'):gsub(',', ';'))
            local words = {}
            for w in s:gmatch('%a+') do words[#words + 1] = w:lower() end
            return a .. '|' .. b .. '|' .. c .. '|' .. table.concat(words, '-')",
        );
        assert_eq!(out, "HELLO|key|2|hello-world");
    }

    #[test]
    fn gsub_replacements() {
        let out = eval(
            "local a = ('hello world'):gsub('(%w+)', '<%1>')
            local b = ('$x $y'):gsub('%$(%w)', {x = '1'})
            local c = ('abc'):gsub('%w', function(ch) return ch:upper() end, 2)
            return a .. '|' .. b .. '|' .. c",
        );
        assert_eq!(out, "<hello> <world>|1 $y|ABc");
    }

    #[test]
    fn ustring_counts_characters() {
        let out = eval("return mw.ustring.len('naïve') .. ',' .. string.len('naïve') .. ',' .. mw.ustring.sub('naïve', 3, 3)");
        assert_eq!(out, "5,6,ï");
    }

    #[test]
    fn frame_arguments() {
        let mut host = MockHost::default();
        let out = run_with(
            &mut host,
            "local args = frame.args
            return args[1] .. '/' .. args.lang .. '/' .. tostring(args[2])",
            &[("1", "chat"), ("lang", "fr")],
        )
        .unwrap();
        assert_eq!(out, "chat/fr/nil");
    }

    #[test]
    fn frame_calls_reach_host() {
        let mut host = MockHost::default();
        let out = run_with(
            &mut host,
            "return frame:preprocess('{{x}}') .. frame:expandTemplate{title = 'l', args = {'fr', 'chat'}}
                .. mw.title.getCurrentTitle().text .. mw.language.fetchLanguageName('fr')",
            &[],
        )
        .unwrap();
        assert_eq!(out, "<{{x}}>[l]chatFrench");
        assert_eq!(host.preprocessed, vec!["{{x}}"]);
        assert_eq!(
            host.expanded,
            vec![(
                "l".to_string(),
                vec![("1".to_string(), "fr".to_string()), ("2".to_string(), "chat".to_string())]
            )]
        );
    }

    #[test]
    fn pcall_catches_runtime_errors() {
        let out = eval(
            "local ok, err = pcall(function() error('boom') end)
            return tostring(ok) .. ':' .. err",
        );
        assert_eq!(out, "false:boom");
    }

    #[test]
    fn unsupported_host_call_is_distinct() {
        let err = run_with(&mut MockHost::default(), "return mw.site.server", &[]).unwrap_err();
        assert_eq!(err, ScriptError::UnsupportedHostCall("mw.site".to_string()));

        let err = run_with(
            &mut MockHost::default(),
            "local ok = pcall(function() return mw.message.new('x') end) return ok",
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnsupportedHostCall(_)));
    }

    #[test]
    fn step_budget_stops_infinite_loops() {
        let chunk = parse_chunk("Loop", "local p = {} function p.main() while true do end end return p").unwrap();
        let limits = Limits {
            max_script_steps: 10_000,
            ..Limits::default()
        };
        let err = invoke(&mut MockHost::default(), &chunk, "main", &[], &[], &limits).unwrap_err();
        assert_eq!(err, ScriptError::StepBudget(10_000));
    }

    #[test]
    fn call_depth_stops_runaway_recursion() {
        let err = run_with(
            &mut MockHost::default(),
            "local function f(n) return f(n + 1) + 1 end return f(1)",
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::CallDepth(_)));
    }

    fn runtime_message(body: &str) -> String {
        match run_with(&mut MockHost::default(), body, &[]) {
            Err(ScriptError::Runtime(message)) => message,
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn string_growth_is_bounded() {
        let message = runtime_message("local s = 'x' for i = 1, 28 do s = s .. s end return #s");
        assert!(message.contains("resulting string too large"), "{}", message);
        let message = runtime_message("return #string.rep('ab', 1e15)");
        assert!(message.contains("resulting string too large"), "{}", message);
        let message = runtime_message(
            "local s = string.rep('x', 1000000) local t = {s, s, s, s, s} return #table.concat(t)",
        );
        assert!(message.contains("resulting string too large"), "{}", message);
        assert_eq!(eval("return '[' .. string.rep('', 1e15) .. ']'"), "[]");
        assert_eq!(eval("local s = 'x' for i = 1, 10 do s = s .. s end return #s"), "1024");
    }

    #[test]
    fn unpack_and_format_reject_huge_requests() {
        let message = runtime_message("return select('#', unpack({}, 1, 1e15))");
        assert!(message.contains("too many results to unpack"), "{}", message);
        let message = runtime_message("return string.format('%999999999999s', 'x')");
        assert!(message.contains("width or precision too long"), "{}", message);
        assert_eq!(eval("return #string.format('%99s', 'x')"), "99");
        assert_eq!(eval("return select('#', unpack({1, 2, 3}, 2))"), "2");
    }

    #[test]
    fn table_remove_returns_removed_value() {
        let out = eval(
            "local t = {'a', 'b', 'c'}
            local last = table.remove(t)
            local first = table.remove(t, 1)
            return last .. first .. #t .. t[1]",
        );
        assert_eq!(out, "ca1b");
    }

    #[test]
    fn extreme_negative_indices() {
        assert_eq!(eval("return string.sub('hello', -9223372036854775808)"), "hello");
        assert_eq!(eval("return '[' .. string.sub('hello', 2, -9223372036854775808) .. ']'"), "[]");
        assert_eq!(eval("return string.sub('hello', -math.huge, 2)"), "he");
        assert_eq!(eval("return tostring(pcall(select, -9223372036854775808, 'a'))"), "false");
    }

    #[test]
    fn runtime_errors_carry_line() {
        let err = run_with(&mut MockHost::default(), "local x = nil\nreturn x.y", &[]).unwrap_err();
        match err {
            ScriptError::Runtime(message) => assert!(message.contains("(line 4)"), "{}", message),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn require_loads_once() {
        let mut host = MockHost::default().with(
            "Data",
            "count = (count or 0) + 1 return { greeting = 'salut', count = count }",
        );
        let out = run_with(
            &mut host,
            "local a = require('Module:Data') local b = require('Data')
            return a.greeting .. (a == b and 'same' or 'different') .. a.count",
            &[],
        )
        .unwrap();
        assert_eq!(out, "salutsame1");
    }

    #[test]
    fn missing_module_and_function() {
        let err = run_with(&mut MockHost::default(), "return require('Nope')", &[]).unwrap_err();
        assert_eq!(err, ScriptError::ModuleNotFound("Nope".to_string()));

        let chunk = parse_chunk("M", "return {}").unwrap();
        let err = invoke(&mut MockHost::default(), &chunk, "absent", &[], &[], &limits()).unwrap_err();
        assert!(matches!(err, ScriptError::FunctionNotFound { .. }));
    }

    #[test]
    fn table_sort_with_comparator() {
        let out = eval(
            "local t = {3, 1, 2}
            table.sort(t)
            local u = {'b', 'a', 'c'}
            table.sort(u, function(x, y) return x > y end)
            return table.concat(t, '') .. table.concat(u, '')",
        );
        assert_eq!(out, "123cba");
    }

    #[test]
    fn metatables_and_string_format() {
        let out = eval(
            "local base = {hello = function() return 'hi' end}
            local obj = setmetatable({}, {__index = base})
            return obj.hello() .. string.format(' %s=%d', 'n', 42)",
        );
        assert_eq!(out, "hi n=42");
    }
}
