//! Typed errors for the expansion engine.
//!
//! Per-page faults never escape a page: they are turned into diagnostics by
//! the caller. Only [`ConfigError`] is fatal to a run.

use thiserror::Error;

/// Failures raised while expanding templates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpandError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template recursion depth {depth} exceeded at {template}")]
    RecursionExceeded { template: String, depth: usize },

    #[error("expanded output exceeded {limit} bytes at {template}")]
    SizeExceeded { template: String, limit: usize },

    #[error("call budget of {limit} template calls exhausted at {template}")]
    CallBudgetExceeded { template: String, limit: usize },
}

/// Failures raised by the module interpreter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("unsupported host call: {0}")]
    UnsupportedHostCall(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("function {function} not found in {module}")]
    FunctionNotFound { module: String, function: String },

    #[error("step budget of {0} instructions exhausted")]
    StepBudget(u64),

    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }
}

/// Errors that stop a run before any page is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unrecognized language name: {0}")]
    UnknownLanguage(String),

    #[error("input not found: {0}")]
    MissingInput(String),

    #[error("invalid language table: {0}")]
    LanguageTable(String),
}
