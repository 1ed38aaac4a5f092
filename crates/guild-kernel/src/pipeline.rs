//! Async operation pipeline.
//!
//! Every mutation follows the same shape: issue a persistence future, let it
//! complete wherever the runtime happens to poll it, then hop onto the
//! global authority before applying the outcome. [`Pipeline::submit`] is the
//! fire-and-forget form; [`Pipeline::run`] wraps it so `async` callers can
//! await whatever the owner-side continuation produced.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use mti::prelude::*;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{GuildError, GuildResult};
use crate::ids::ActorId;
use crate::router::TaskRouter;

/// Diagnostic context carried through an operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub name: &'static str,
    pub actor: Option<ActorId>,
    pub target: Option<String>,
    pub correlation_id: String,
}

impl OpContext {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            actor: None,
            target: None,
            correlation_id: "op".create_type_id::<V7>().to_string(),
        }
    }

    pub fn by(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn on(mut self, target: impl fmt::Display) -> Self {
        self.target = Some(target.to_string());
        self
    }

    fn actor_field(&self) -> String {
        self.actor.map(|a| a.to_string()).unwrap_or_else(|| "-".into())
    }

    fn target_field(&self) -> &str {
        self.target.as_deref().unwrap_or("-")
    }
}

/// Continuation invoked exactly once with an operation's outcome.
pub type Completion<T> = Box<dyn FnOnce(GuildResult<T>) + Send + 'static>;

/// Await a value delivered through a [`Completion`].
///
/// `start` receives the completion and must arrange for it to be called.
/// Dropping it uncalled resolves to `Internal`.
pub async fn await_completion<T: Send + 'static>(
    start: impl FnOnce(Completion<T>),
) -> GuildResult<T> {
    let (tx, rx) = oneshot::channel();
    start(Box::new(move |outcome| {
        let _ = tx.send(outcome);
    }));
    rx.await
        .unwrap_or_else(|_| Err(GuildError::internal("completion dropped before delivery")))
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    router: TaskRouter,
}

impl Pipeline {
    pub fn new(router: TaskRouter) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    /// Drive `operation` off-owner and hand its outcome to `continuation`
    /// on the global authority.
    ///
    /// A panic inside `operation` or `continuation` is logged with the
    /// context and becomes `Internal`; it never reaches the host.
    pub fn submit<T, F>(
        &self,
        ctx: OpContext,
        operation: F,
        continuation: impl FnOnce(GuildResult<T>) + Send + 'static,
    ) where
        T: Send + 'static,
        F: Future<Output = GuildResult<T>> + Send + 'static,
    {
        let router = self.router.clone();
        tokio::spawn(async move {
            let outcome = match tokio::spawn(operation).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        op = ctx.name,
                        actor = %ctx.actor_field(),
                        target = %ctx.target_field(),
                        correlation_id = %ctx.correlation_id,
                        error = %e,
                        "Operation failed before completion"
                    );
                    Err(GuildError::internal(format!("{} aborted", ctx.name)))
                }
            };

            if let Err(e) = &outcome {
                debug!(
                    op = ctx.name,
                    actor = %ctx.actor_field(),
                    target = %ctx.target_field(),
                    correlation_id = %ctx.correlation_id,
                    error = %e,
                    "Operation returned an error"
                );
            }

            router.run_on_global_authority(move || {
                if catch_unwind(AssertUnwindSafe(|| continuation(outcome))).is_err() {
                    error!(
                        op = ctx.name,
                        actor = %ctx.actor_field(),
                        target = %ctx.target_field(),
                        correlation_id = %ctx.correlation_id,
                        "Continuation panicked"
                    );
                }
            });
        });
    }

    /// [`Pipeline::submit`] for callers that want the owner-side result.
    pub async fn run<T, R, F>(
        &self,
        ctx: OpContext,
        operation: F,
        apply: impl FnOnce(GuildResult<T>) -> GuildResult<R> + Send + 'static,
    ) -> GuildResult<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Future<Output = GuildResult<T>> + Send + 'static,
    {
        await_completion(|done| {
            self.submit(ctx, operation, move |outcome| done(apply(outcome)));
        })
        .await
    }

    /// Owner-side step with no I/O in front of it.
    pub async fn on_owner<R: Send + 'static>(
        &self,
        ctx: &OpContext,
        step: impl FnOnce() -> GuildResult<R> + Send + 'static,
    ) -> GuildResult<R> {
        match self.router.call(step).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    op = ctx.name,
                    actor = %ctx.actor_field(),
                    target = %ctx.target_field(),
                    correlation_id = %ctx.correlation_id,
                    "Owner step did not complete"
                );
                Err(e)
            }
        }
    }
}
