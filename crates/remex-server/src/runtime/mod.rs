pub mod context;
pub mod dispatch;
pub mod eval_loop;

mod async_call;
mod bindings;
mod conversions;

#[cfg(test)]
mod tests;

pub use context::{EvalContext, EvalError};
pub use dispatch::{execute, EvalBridge};
pub use eval_loop::{EvalHandle, EvalLoop, EvalReceiver};
