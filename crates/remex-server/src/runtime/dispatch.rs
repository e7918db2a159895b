//! Command Dispatch Bridge
//!
//! Runs one [`Command`] against the evaluation context and folds every
//! outcome into a wire-safe [`Value`]:
//!
//! - the result, with callables replaced by `FnRef { arity }`;
//! - `"symbol not found: <name>"` when a name does not resolve;
//! - `"internal error"` for anything else, with the detail logged here only.

use std::sync::Arc;

use boa_engine::value::JsValue;
use futures_util::future::BoxFuture;
use remex_client::{CommandHandler, NetworkClient};
use remex_common::{Command, Value};

use crate::runtime::context::{EvalContext, EvalError};
use crate::runtime::eval_loop::EvalHandle;

const INTERNAL_ERROR: &str = "internal error";

/// Executes `command` with `origin` visible as `remex.peer`.
///
/// The peer entry is removed afterwards whatever the outcome.
pub fn execute(ctx: &mut EvalContext, command: Command, origin: Option<&Arc<NetworkClient>>) -> Value {
    let kind = command.kind();
    if let Err(e) = ctx.set_peer(origin) {
        tracing::error!(kind, error = %e, "failed to expose peer");
        return Value::error(INTERNAL_ERROR);
    }

    let outcome = run(ctx, command);

    if let Err(e) = ctx.clear_peer() {
        tracing::error!(kind, error = %e, "failed to clear peer");
    }

    match outcome {
        Ok(value) => value,
        Err(EvalError::NotFound(name)) => {
            tracing::debug!(kind, symbol = %name, "symbol not found");
            Value::error(format!("symbol not found: {}", name))
        }
        Err(EvalError::Failed(detail)) => {
            tracing::error!(kind, error = %detail, "command failed");
            Value::error(INTERNAL_ERROR)
        }
    }
}

fn run(ctx: &mut EvalContext, command: Command) -> Result<Value, EvalError> {
    match command {
        Command::FunctionCall { name, args } => {
            let function = ctx.lookup(&name)?;
            if ctx.arity(&function)?.is_none() {
                return Err(EvalError::Failed(format!("{} is not callable", name)));
            }
            let args = args
                .into_iter()
                .map(|arg| ctx.import(arg))
                .collect::<Result<Vec<JsValue>, _>>()?;
            let result = ctx.call(&function, &args)?;
            ctx.export(&result)
        }
        Command::DictGet { key } => {
            let name = key_name(&key)?;
            let value = ctx.lookup(name)?;
            ctx.export(&value)
        }
        Command::DictSet { key, value } => {
            let name = key_name(&key)?;
            ctx.define_value(name, value)?;
            Ok(Value::Null)
        }
        Command::RawEval { expression } => match expression {
            Value::Str(source) => ctx.eval_value(&source),
            Value::Symbol(name) => ctx.lookup_value(&name),
            literal => Ok(literal),
        },
    }
}

fn key_name(key: &Value) -> Result<&str, EvalError> {
    key.as_symbol()
        .or_else(|| key.as_str())
        .ok_or_else(|| EvalError::Failed(format!("unsupported dict key {}", key)))
}

/// [`CommandHandler`] that marshals commands onto the evaluation loop.
#[derive(Clone)]
pub struct EvalBridge {
    eval: EvalHandle,
}

impl EvalBridge {
    pub fn new(eval: EvalHandle) -> Self {
        Self { eval }
    }
}

impl CommandHandler for EvalBridge {
    fn dispatch(&self, command: Command, origin: Option<Arc<NetworkClient>>) -> BoxFuture<'static, Value> {
        let kind = command.kind();
        let posted = self
            .eval
            .submit(move |ctx| execute(ctx, command, origin.as_ref()));

        Box::pin(async move {
            let slot = match posted {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::error!(kind, error = %e, "could not post command");
                    return Value::error(INTERNAL_ERROR);
                }
            };
            match slot.await {
                Ok(value) => value,
                Err(_) => {
                    tracing::error!(kind, "command dropped by the evaluation loop");
                    Value::error(INTERNAL_ERROR)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EvalContext {
        let mut ctx = EvalContext::new().unwrap();
        ctx.eval(
            r#"
            function avg(xs) { return xs.reduce((a, b) => a + b, 0) / xs.length; }
            function add(a, b) { return a + b; }
            function explode() { throw new Error('secret detail'); }
            var notFn = 3;
            "#,
        )
        .unwrap();
        ctx
    }

    #[test]
    fn test_function_call() {
        let mut ctx = context();
        let xs: Value = (0..100).map(Value::from).collect();
        assert_eq!(execute(&mut ctx, Command::call("avg", vec![xs]), None), Value::Float(49.5));
        assert_eq!(
            execute(&mut ctx, Command::call("add", vec![Value::Int(2), Value::Int(3)]), None),
            Value::Int(5)
        );
    }

    #[test]
    fn test_unknown_symbol() {
        let mut ctx = context();
        assert_eq!(
            execute(&mut ctx, Command::call("missing", vec![]), None),
            Value::error("symbol not found: missing")
        );
        assert_eq!(
            execute(&mut ctx, Command::get(Value::symbol("missing")), None),
            Value::error("symbol not found: missing")
        );
        assert_eq!(
            execute(&mut ctx, Command::call("class", vec![]), None),
            Value::error("symbol not found: class")
        );
        assert_eq!(
            execute(&mut ctx, Command::get(Value::symbol("a-b")), None),
            Value::error("symbol not found: a-b")
        );
    }

    #[test]
    fn test_failures_do_not_leak_detail() {
        let mut ctx = context();
        assert_eq!(
            execute(&mut ctx, Command::call("explode", vec![]), None),
            Value::error("internal error")
        );
        assert_eq!(
            execute(&mut ctx, Command::call("notFn", vec![]), None),
            Value::error("internal error")
        );
        assert_eq!(
            execute(&mut ctx, Command::eval("(("), None),
            Value::error("internal error")
        );
    }

    #[test]
    fn test_dict_set_then_get() {
        let mut ctx = context();
        assert_eq!(
            execute(&mut ctx, Command::set(Value::symbol("foo"), Value::Int(2)), None),
            Value::Null
        );
        assert_eq!(execute(&mut ctx, Command::get("foo"), None), Value::Int(2));
    }

    #[test]
    fn test_callables_become_references() {
        let mut ctx = context();
        assert_eq!(
            execute(&mut ctx, Command::get(Value::symbol("add")), None),
            Value::FnRef { arity: 2 }
        );
        assert_eq!(
            execute(&mut ctx, Command::eval("(x) => x"), None),
            Value::FnRef { arity: 1 }
        );
    }

    #[test]
    fn test_raw_eval_forms() {
        let mut ctx = context();
        assert_eq!(execute(&mut ctx, Command::eval("1 + 2"), None), Value::Int(3));
        assert_eq!(
            execute(&mut ctx, Command::eval(Value::symbol("notFn")), None),
            Value::Int(3)
        );
        assert_eq!(execute(&mut ctx, Command::eval(Value::Int(9)), None), Value::Int(9));
    }

    #[test]
    fn test_peer_cleared_after_dispatch() {
        let mut ctx = context();
        ctx.eval("function peerType() { return typeof remex.peer; }").unwrap();
        assert_eq!(
            execute(&mut ctx, Command::call("peerType", vec![]), None),
            Value::from("undefined")
        );
        assert_eq!(ctx.eval_value("'peer' in remex").unwrap(), Value::Bool(false));
    }
}
