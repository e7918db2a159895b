use std::sync::Arc;

use boa_engine::{
    js_string, object::JsObject, value::JsValue, Context, JsError, JsString, Source,
};
use remex_client::NetworkClient;
use remex_common::{RemexError, Value};
use thiserror::Error;

use crate::host::Services;
use crate::runtime::{
    async_call::DeferredQueue,
    bindings,
    conversions::{function_arity, js_to_value, value_to_js},
};

/// Failure of an engine operation, split the way the dispatch bridge reports it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A name lookup found nothing.
    #[error("symbol not found: {0}")]
    NotFound(String),

    /// Anything else; the message stays on this side of the wire.
    #[error("{0}")]
    Failed(String),
}

impl From<JsError> for EvalError {
    fn from(err: JsError) -> Self {
        EvalError::Failed(err.to_string())
    }
}

impl From<EvalError> for RemexError {
    fn from(err: EvalError) -> Self {
        RemexError::Evaluation(err.to_string())
    }
}

/// The Boa context of the evaluation loop, with the `remex` primitives
/// installed.
///
/// Not `Send`: it is created on the evaluation thread and never leaves it.
pub struct EvalContext {
    context: Context,
    deferred: DeferredQueue,
    remex: JsObject,
}

impl EvalContext {
    /// A context with only the engine-local primitives (`remex.async`).
    pub fn new() -> Result<Self, EvalError> {
        Self::build(None)
    }

    /// A context whose `remex.connect`/`remex.serve` primitives act on `services`.
    pub fn with_services(services: Arc<Services>) -> Result<Self, EvalError> {
        Self::build(Some(services))
    }

    fn build(services: Option<Arc<Services>>) -> Result<Self, EvalError> {
        let mut context = Context::default();
        let deferred = DeferredQueue::default();
        let remex = bindings::install_bindings(&mut context, deferred.clone(), services)?;
        Ok(Self {
            context,
            deferred,
            remex,
        })
    }

    /// Evaluates `source` as a script and drains the promise jobs it queued.
    pub fn eval(&mut self, source: &str) -> Result<JsValue, EvalError> {
        let result = self.context.eval(Source::from_bytes(source));
        self.run_jobs();
        Ok(result?)
    }

    /// Resolves a global name.
    ///
    /// Properties of the global object are found first; `let`/`const`
    /// bindings of the top-level script are resolved by evaluating the bare
    /// identifier. Anything unresolvable is [`EvalError::NotFound`].
    pub fn lookup(&mut self, name: &str) -> Result<JsValue, EvalError> {
        let global = self.context.global_object();
        let key = JsString::from(name);
        if global.has_property(key.clone(), &mut self.context)? {
            return Ok(global.get(key, &mut self.context)?);
        }

        if !is_identifier(name) || RESERVED_WORDS.contains(&name) {
            return Err(EvalError::NotFound(name.to_string()));
        }
        match self.context.eval(Source::from_bytes(name)) {
            Ok(value) => Ok(value),
            Err(err) if self.is_unresolvable(&err) => Err(EvalError::NotFound(name.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Binds `name` on the global object.
    pub fn define(&mut self, name: &str, value: JsValue) -> Result<(), EvalError> {
        let global = self.context.global_object();
        global.set(JsString::from(name), value, true, &mut self.context)?;
        Ok(())
    }

    pub fn call(&mut self, callable: &JsValue, args: &[JsValue]) -> Result<JsValue, EvalError> {
        let function = callable
            .as_object()
            .filter(|object| object.is_callable())
            .cloned()
            .ok_or_else(|| EvalError::Failed(format!("{} is not callable", callable.display())))?;
        let result = function.call(&JsValue::undefined(), args, &mut self.context);
        self.run_jobs();
        Ok(result?)
    }

    /// The declared parameter count of a callable; `None` for anything else.
    pub fn arity(&mut self, value: &JsValue) -> Result<Option<usize>, EvalError> {
        match value.as_object() {
            Some(object) if object.is_callable() => {
                let object = object.clone();
                Ok(Some(function_arity(&object, &mut self.context)?))
            }
            _ => Ok(None),
        }
    }

    pub fn import(&mut self, value: Value) -> Result<JsValue, EvalError> {
        Ok(value_to_js(value, &mut self.context)?)
    }

    pub fn export(&mut self, value: &JsValue) -> Result<Value, EvalError> {
        Ok(js_to_value(value, &mut self.context)?)
    }

    /// Exposes the connection a command arrived on as `remex.peer`.
    pub fn set_peer(&mut self, peer: Option<&Arc<NetworkClient>>) -> Result<(), EvalError> {
        let Some(client) = peer else {
            return self.clear_peer();
        };
        let proxy = bindings::client_proxy(Arc::clone(client), &mut self.context)?;
        self.remex
            .set(js_string!("peer"), proxy, false, &mut self.context)?;
        Ok(())
    }

    pub fn clear_peer(&mut self) -> Result<(), EvalError> {
        self.remex
            .delete_property_or_throw(js_string!("peer"), &mut self.context)?;
        Ok(())
    }

    /// Runs the `remex.async` calls queued so far.
    pub fn run_deferred(&mut self) -> usize {
        let ran = self.deferred.run_batch(&mut self.context);
        self.run_jobs();
        ran
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub fn run_jobs(&mut self) {
        let _ = self.context.run_jobs();
    }

    /// [`eval`](Self::eval), converted to a wire value.
    pub fn eval_value(&mut self, source: &str) -> Result<Value, EvalError> {
        let result = self.eval(source)?;
        self.export(&result)
    }

    pub fn lookup_value(&mut self, name: &str) -> Result<Value, EvalError> {
        let result = self.lookup(name)?;
        self.export(&result)
    }

    pub fn define_value(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        let value = self.import(value)?;
        self.define(name, value)
    }

    /// Direct access to the engine, for bindings and tests.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// A name that is unbound, or that does not parse as a reference.
    fn is_unresolvable(&mut self, err: &JsError) -> bool {
        let text = match err.try_native(&mut self.context) {
            Ok(native) => native.to_string(),
            Err(_) => err.to_string(),
        };
        text.starts_with("ReferenceError") || text.starts_with("SyntaxError")
    }
}

/// Words that look like identifiers but never name a binding.
const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "new", "null", "return", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
