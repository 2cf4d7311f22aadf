// src/args.rs

//! Positional argument parsing.
//!
//! `taskdag [GLOBAL=val]... [task [VAR=val]...]...` — assignments before the
//! first task name become global variables, assignments after a task name
//! attach to that call.

use crate::taskfile::{Call, Var, Vars};

/// Split trailing CLI arguments into calls and global variables.
pub fn parse(args: &[String]) -> (Vec<Call>, Vars) {
    let mut calls: Vec<Call> = Vec::new();
    let mut globals = Vars::new();

    for arg in args {
        match arg.split_once('=') {
            None => calls.push(Call::new(arg.clone())),
            Some((name, value)) => match calls.last_mut() {
                Some(call) => call.vars.insert(name, Var::r#static(value)),
                None => globals.insert(name, Var::r#static(value)),
            },
        }
    }

    (calls, globals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn assignments_before_first_task_are_global() {
        let (calls, globals) = parse(&strs(&["ENV=prod", "build", "TARGET=x", "test"]));
        assert_eq!(globals.get("ENV"), Some(&Var::Static("prod".into())));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].task, "build");
        assert_eq!(calls[0].vars.get("TARGET"), Some(&Var::Static("x".into())));
        assert_eq!(calls[1].task, "test");
        assert!(calls[1].vars.is_empty());
    }

    #[test]
    fn values_may_contain_equals_signs() {
        let (_, globals) = parse(&strs(&["FLAGS=-D a=b"]));
        assert_eq!(globals.get("FLAGS"), Some(&Var::Static("-D a=b".into())));
    }
}
