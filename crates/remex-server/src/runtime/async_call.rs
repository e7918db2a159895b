//! Fire-and-forget calls: `remex.async(fn, cb)`.
//!
//! The wrapper returned to script code has the same `length` as `fn`.
//! Invoking it only records the call and returns `1`; the evaluation loop
//! runs `fn(...args)` and then `cb(result)` once the current task finishes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use boa_engine::{
    js_string,
    native_function::NativeFunction,
    object::{FunctionObjectBuilder, JsObject},
    value::JsValue,
    Context, JsNativeError, JsResult,
};
use boa_gc::{Finalize, Trace};

use crate::runtime::conversions::function_arity;

/// A call recorded by an async wrapper, waiting for the loop to run it.
pub(crate) struct DeferredCall {
    func: JsObject,
    callback: JsObject,
    args: Vec<JsValue>,
}

/// Calls waiting to run on the evaluation loop.
///
/// Only ever touched from the evaluation thread.
#[derive(Clone, Default)]
pub(crate) struct DeferredQueue {
    calls: Rc<RefCell<VecDeque<DeferredCall>>>,
}

impl DeferredQueue {
    pub(crate) fn push(&self, call: DeferredCall) {
        self.calls.borrow_mut().push_back(call);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    /// Runs the calls queued so far; calls they queue wait for the next round.
    ///
    /// A failure in `fn` or `cb` is logged and the rest still run.
    pub(crate) fn run_batch(&self, ctx: &mut Context) -> usize {
        let batch: Vec<_> = self.calls.borrow_mut().drain(..).collect();
        let count = batch.len();
        for call in batch {
            let outcome = call
                .func
                .call(&JsValue::undefined(), &call.args, ctx)
                .and_then(|result| call.callback.call(&JsValue::undefined(), &[result], ctx));
            if let Err(e) = outcome {
                tracing::error!(error = %e, "async call failed");
            }
        }
        count
    }
}

#[derive(Trace, Finalize)]
struct AsyncCaptures {
    func: JsObject,
    callback: JsObject,
    #[unsafe_ignore_trace]
    queue: DeferredQueue,
}

/// Builds the wrapper for `remex.async(fn, cb)`.
pub(crate) fn make_async_wrapper(
    func: JsObject,
    callback: JsObject,
    queue: DeferredQueue,
    ctx: &mut Context,
) -> JsResult<JsObject> {
    if !func.is_callable() || !callback.is_callable() {
        return Err(JsNativeError::typ()
            .with_message("async requires a function and a callback")
            .into());
    }
    let arity = function_arity(&func, ctx)?;

    let wrapper = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, captures: &AsyncCaptures, _context| {
                captures.queue.push(DeferredCall {
                    func: captures.func.clone(),
                    callback: captures.callback.clone(),
                    args: args.to_vec(),
                });
                Ok(JsValue::new(1))
            },
            AsyncCaptures {
                func,
                callback,
                queue,
            },
        ),
    )
    .name(js_string!("async"))
    .length(arity)
    .build();

    Ok(wrapper.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;

    fn setup() -> (Context, DeferredQueue) {
        let mut ctx = Context::default();
        let queue = DeferredQueue::default();
        let install = FunctionObjectBuilder::new(
            ctx.realm(),
            NativeFunction::from_copy_closure_with_captures(
                |_this, args, queue: &QueueCapture, context| {
                    let func = args.first().and_then(JsValue::as_object).cloned();
                    let callback = args.get(1).and_then(JsValue::as_object).cloned();
                    match (func, callback) {
                        (Some(func), Some(callback)) => {
                            Ok(make_async_wrapper(func, callback, queue.0.clone(), context)?.into())
                        }
                        _ => Err(JsNativeError::typ().with_message("need two functions").into()),
                    }
                },
                QueueCapture(queue.clone()),
            ),
        )
        .build();
        ctx.register_global_property(js_string!("wrap"), install, boa_engine::property::Attribute::all())
            .unwrap();
        (ctx, queue)
    }

    #[derive(Trace, Finalize)]
    struct QueueCapture(#[unsafe_ignore_trace] DeferredQueue);

    #[test]
    fn test_wrapper_returns_immediately_and_defers() {
        let (mut ctx, queue) = setup();
        let result = ctx
            .eval(Source::from_bytes(
                r#"
                var seen = [];
                var w = wrap(function (a, b) { seen.push('fn'); return a + b; },
                             function (r) { seen.push('cb:' + r); });
                var immediate = w(40, 2);
                seen.push('after');
                immediate;
                "#,
            ))
            .unwrap();

        assert_eq!(result.as_number(), Some(1.0));
        assert!(!queue.is_empty());

        assert_eq!(queue.run_batch(&mut ctx), 1);
        let seen = ctx.eval(Source::from_bytes("seen.join(',')")).unwrap();
        assert_eq!(
            seen.as_string().map(|s| s.to_std_string_escaped()),
            Some("after,fn,cb:42".to_string())
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wrapper_keeps_arity() {
        let (mut ctx, _queue) = setup();
        let length = ctx
            .eval(Source::from_bytes("wrap(function (x, y, z) {}, function () {}).length"))
            .unwrap();
        assert_eq!(length.as_number(), Some(3.0));
    }

    #[test]
    fn test_non_function_rejected() {
        let (mut ctx, _queue) = setup();
        assert!(ctx.eval(Source::from_bytes("wrap(1, function () {})")).is_err());
    }

    #[test]
    fn test_failure_does_not_stop_batch() {
        let (mut ctx, queue) = setup();
        ctx.eval(Source::from_bytes(
            r#"
            var done = 0;
            wrap(function () { throw new Error('boom'); }, function () { done += 100; })();
            wrap(function () { return 1; }, function (r) { done += r; })();
            "#,
        ))
        .unwrap();

        assert_eq!(queue.run_batch(&mut ctx), 2);
        let done = ctx.eval(Source::from_bytes("done")).unwrap();
        assert_eq!(done.as_number(), Some(1.0));
    }
}
