//! The evaluation loop: one OS thread owning the engine.
//!
//! Every engine access is a task posted through an [`EvalHandle`]. Posting
//! never blocks; waiting for the result is either a blocking receive (for
//! plain threads) or an await (for the network runtime). After each task the
//! loop drains promise jobs and the `remex.async` queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use remex_common::{RemexError, Result};
use tokio::sync::{mpsc, oneshot};

use crate::runtime::context::EvalContext;

type EvalTask = Box<dyn FnOnce(&mut EvalContext) + Send + 'static>;

enum Message {
    Run(EvalTask),
    /// Re-check the deferred queue.
    Wake,
    Stop,
}

/// Cloneable, thread-safe handle for posting work to the evaluation loop.
#[derive(Clone)]
pub struct EvalHandle {
    sender: mpsc::UnboundedSender<Message>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl EvalHandle {
    /// Posts `task` and returns the slot its result will arrive in.
    pub fn submit<R, F>(&self, task: F) -> Result<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut EvalContext) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: EvalTask = Box::new(move |ctx| {
            let _ = tx.send(task(ctx));
        });
        self.sender
            .send(Message::Run(task))
            .map_err(|_| RemexError::LoopStopped)?;
        Ok(rx)
    }

    /// Runs `task` on the loop and blocks until it finishes.
    ///
    /// Must not be called from the loop itself, nor from inside an async
    /// runtime (use [`run_async`](Self::run_async) there).
    pub fn run<R, F>(&self, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut EvalContext) -> R + Send + 'static,
    {
        if self.is_loop_thread() {
            return Err(RemexError::InvalidRequest(
                "the evaluation loop cannot wait on itself".into(),
            ));
        }
        self.submit(task)?
            .blocking_recv()
            .map_err(|_| RemexError::LoopStopped)
    }

    pub async fn run_async<R, F>(&self, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut EvalContext) -> R + Send + 'static,
    {
        self.submit(task)?.await.map_err(|_| RemexError::LoopStopped)
    }

    pub fn is_loop_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn wake(&self) {
        let _ = self.sender.send(Message::Wake);
    }

    fn stop(&self) {
        let _ = self.sender.send(Message::Stop);
    }
}

/// Owner of the evaluation thread. Stops and joins it on drop.
pub struct EvalLoop {
    handle: EvalHandle,
    thread: Option<JoinHandle<()>>,
}

/// The receiving end of a loop created with [`EvalLoop::channel`].
pub struct EvalReceiver(mpsc::UnboundedReceiver<Message>);

impl EvalLoop {
    /// Creates the task channel before the loop exists, so that the handle
    /// can be given to whatever the loop's context is built from.
    pub fn channel() -> (EvalHandle, EvalReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = EvalHandle {
            sender,
            thread: Arc::new(OnceLock::new()),
        };
        (handle, EvalReceiver(receiver))
    }

    /// Starts the loop thread; `init` builds the context on that thread.
    ///
    /// Returns once the context exists, or with the error `init` produced.
    pub fn start<F>(handle: EvalHandle, receiver: EvalReceiver, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<EvalContext> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let loop_handle = handle.clone();

        let thread = thread::Builder::new()
            .name("remex-eval".to_string())
            .spawn(move || {
                let _ = loop_handle.thread.set(thread::current().id());
                let ctx = match init() {
                    Ok(ctx) => {
                        let _ = ready_tx.send(Ok(()));
                        ctx
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_loop(ctx, receiver.0, &loop_handle);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(RemexError::LoopStopped)
            }
        }
    }

    pub fn handle(&self) -> &EvalHandle {
        &self.handle
    }

    /// Stops the loop after the tasks already posted and joins its thread.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.stop();
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("evaluation thread panicked");
        }
    }
}

impl Drop for EvalLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(mut ctx: EvalContext, mut receiver: mpsc::UnboundedReceiver<Message>, handle: &EvalHandle) {
    tracing::debug!("evaluation loop started");
    while let Some(message) = receiver.blocking_recv() {
        match message {
            Message::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(|| task(&mut ctx))).is_err() {
                    tracing::error!("evaluation task panicked");
                }
            }
            Message::Wake => {}
            Message::Stop => break,
        }

        ctx.run_jobs();
        if ctx.has_deferred() {
            ctx.run_deferred();
            // Calls queued by the batch itself run after whatever is waiting.
            if ctx.has_deferred() {
                handle.wake();
            }
        }
    }
    tracing::debug!("evaluation loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> EvalLoop {
        let (handle, receiver) = EvalLoop::channel();
        EvalLoop::start(handle, receiver, || Ok(EvalContext::new()?)).unwrap()
    }

    #[test]
    fn test_tasks_run_in_order() {
        let eval = start();
        let handle = eval.handle().clone();

        let first = handle.submit(|ctx| ctx.eval_value("var trail = 'a'; trail")).unwrap();
        let second = handle.submit(|ctx| ctx.eval_value("trail += 'b'; trail")).unwrap();

        assert_eq!(first.blocking_recv().unwrap().unwrap(), remex_common::Value::from("a"));
        assert_eq!(second.blocking_recv().unwrap().unwrap(), remex_common::Value::from("ab"));
    }

    #[test]
    fn test_runs_on_the_loop_thread() {
        let eval = start();
        let handle = eval.handle().clone();
        assert!(!handle.is_loop_thread());

        let name = handle
            .run(|_ctx| thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("remex-eval"));
    }

    #[test]
    fn test_deferred_calls_run_after_the_task() {
        let eval = start();
        let handle = eval.handle().clone();

        let immediate = handle
            .run(|ctx| {
                ctx.eval_value(
                    "var got = null; \
                     remex.async(function (a, b) { return a + b; }, function (r) { got = r; })(40, 2)",
                )
            })
            .unwrap()
            .unwrap();
        assert_eq!(immediate, remex_common::Value::Int(1));

        let got = handle.run(|ctx| ctx.lookup_value("got")).unwrap().unwrap();
        assert_eq!(got, remex_common::Value::Int(42));
    }

    #[test]
    fn test_panicking_task_does_not_kill_loop() {
        let eval = start();
        let handle = eval.handle().clone();

        let result: Result<()> = handle.run(|_ctx| panic!("task failure"));
        assert!(result.is_err());
        assert_eq!(handle.run(|_ctx| 5).unwrap(), 5);
    }

    #[test]
    fn test_stopped_loop_rejects_work() {
        let mut eval = start();
        let handle = eval.handle().clone();
        eval.stop();

        assert!(matches!(handle.run(|_ctx| ()), Err(RemexError::LoopStopped)));
    }

    #[test]
    fn test_failed_init_is_reported() {
        let (handle, receiver) = EvalLoop::channel();
        let result = EvalLoop::start(handle, receiver, || {
            Err(RemexError::Evaluation("no engine".into()))
        });
        assert!(matches!(result, Err(RemexError::Evaluation(_))));
    }
}
