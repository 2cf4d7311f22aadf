// src/templater.rs

//! Template expansion over a variable map.
//!
//! A thin wrapper around a `minijinja` environment carrying the domain
//! function set (`OS`, `ARCH`, `exeExt`, `default`, `ccat`, ...) on top of
//! the builtin filter library. The environment is value-typed and built once
//! per executor; expanding a fully resolved string is the identity.

use std::collections::BTreeMap;

use minijinja::value::{Rest, Value};
use minijinja::{Environment, UndefinedBehavior};

use crate::platform;

pub struct Templater {
    env: Environment<'static>,
}

impl Default for Templater {
    fn default() -> Self {
        Templater::new()
    }
}

impl Templater {
    pub fn new() -> Templater {
        let mut env = Environment::new();
        // Missing keys render as empty output, which is what `empty` and
        // `default` test against.
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        env.add_function("OS", || platform::os_identifier().to_string());
        env.add_function("ARCH", || platform::arch_identifier().to_string());
        env.add_function("exeExt", || platform::exe_ext().to_string());
        // Legacy alias, always true.
        env.add_function("IsSH", || true);

        env.add_function("default", |d: Value, rest: Rest<Value>| {
            rest.iter()
                .find(|v| !is_empty_value(v))
                .cloned()
                .unwrap_or(d)
        });
        env.add_function("empty", |v: Value| is_empty_value(&v));
        env.add_function("compact", |rest: Rest<Value>| {
            rest.iter()
                .filter(|v| !is_empty_value(v))
                .cloned()
                .collect::<Value>()
        });
        env.add_function("ccat", |rest: Rest<Value>| {
            rest.iter()
                .map(|v| match v.as_str() {
                    Some(s) => s.trim().to_string(),
                    None => v.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });

        env.add_filter("catLines", |s: String| {
            s.replace("\r\n", " ").replace('\n', " ")
        });
        env.add_filter("splitLines", |s: String| {
            s.replace("\r\n", "\n")
                .split('\n')
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
        });
        env.add_filter("fromSlash", from_slash);
        env.add_filter("toSlash", to_slash);
        // Deprecated aliases for renamed functions.
        env.add_filter("FromSlash", from_slash);
        env.add_filter("ToSlash", to_slash);
        env.add_function("ExeExt", || platform::exe_ext().to_string());

        Templater { env }
    }

    /// Expand one template string against `vars`.
    ///
    /// Strings without template syntax are returned as-is, which also makes
    /// a second expansion of an already resolved string a no-op.
    pub fn expand(
        &self,
        template: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, minijinja::Error> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }
        self.env.render_str(template, vars)
    }
}

fn is_empty_value(v: &Value) -> bool {
    if v.is_undefined() || v.is_none() {
        return true;
    }
    if let Some(s) = v.as_str() {
        return s.is_empty();
    }
    matches!(v.len(), Some(0))
}

fn from_slash(s: String) -> String {
    if cfg!(windows) {
        s.replace('/', "\\")
    } else {
        s
    }
}

fn to_slash(s: String) -> String {
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s
    }
}
