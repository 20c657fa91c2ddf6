//! Pipeline struct, typestate markers and the step runner.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::Connection;

// ============================================================================
// Typestate
// ============================================================================

/// Pipeline state before any step was added.
///
/// Only a fresh pipeline offers
/// [`expect_connection_error`](WsPipeline::expect_connection_error).
#[derive(Debug, Clone, Copy)]
pub struct Fresh;

/// Pipeline state after at least one normal step.
#[derive(Debug, Clone, Copy)]
pub struct Chained;

/// Pipeline state after `expect_connection_error`; no further steps.
#[derive(Debug, Clone, Copy)]
pub struct Rejected;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Fresh {}
    impl Sealed for super::Chained {}
}

/// States that accept normal steps.
pub trait Chainable: sealed::Sealed {}

impl Chainable for Fresh {}
impl Chainable for Chained {}

// ============================================================================
// Steps
// ============================================================================

/// Boxed step body.
pub(crate) type StepFn = Box<dyn FnOnce(Connection) -> BoxFuture<'static, Result<()>> + Send>;

/// One queued pipeline step.
pub(crate) struct Step {
    /// Runs without waiting for the handshake.
    before_open: bool,
    run: StepFn,
}

// ============================================================================
// WsPipeline
// ============================================================================

/// Chain of steps against one client connection.
///
/// Steps start running in call order as soon as they are added; awaiting
/// the pipeline waits for the last one. The first failing step closes the
/// connection and skips the rest. The awaited value is the
/// [`Connection`], never a step's own result.
///
/// # Example
///
/// ```ignore
/// let connection = request(&server)
///     .ws("/path/ws")?
///     .expect_text("hello")
///     .send_text("foo")
///     .expect_text("echo foo")
///     .close()
///     .expect_closed(None, None)
///     .await?;
/// ```
#[must_use = "pipeline failures are only reported when awaited"]
pub struct WsPipeline<S = Chained> {
    connection: Connection,
    steps: mpsc::UnboundedSender<Step>,
    runner: JoinHandle<Result<()>>,
    _state: PhantomData<S>,
}

impl<S> fmt::Debug for WsPipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsPipeline")
            .field("connection", &self.connection)
            .field("finished", &self.runner.is_finished())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WsPipeline - Constructor
// ============================================================================

impl WsPipeline<Fresh> {
    /// Starts the runner for `connection`.
    pub(crate) fn start(connection: Connection) -> Self {
        let (steps, step_rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(run_steps(connection.clone(), step_rx));

        Self {
            connection,
            steps,
            runner,
            _state: PhantomData,
        }
    }
}

// ============================================================================
// WsPipeline - Accessors
// ============================================================================

impl<S> WsPipeline<S> {
    /// Returns the connection the steps run against.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Queues a step and moves to state `T`.
    fn enqueue<T>(self, step: Step) -> WsPipeline<T> {
        // A closed channel means an earlier step failed; awaiting reports it
        let _ = self.steps.send(step);

        WsPipeline {
            connection: self.connection,
            steps: self.steps,
            runner: self.runner,
            _state: PhantomData,
        }
    }

    /// Queues a step that runs once the connection is open.
    pub(crate) fn then<F, Fut>(self, body: F) -> WsPipeline<Chained>
    where
        F: FnOnce(Connection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue(Step {
            before_open: false,
            run: Box::new(move |connection| body(connection).boxed()),
        })
    }

    /// Queues a step that races the handshake itself.
    pub(crate) fn then_before_open<F, Fut>(self, body: F) -> WsPipeline<Rejected>
    where
        F: FnOnce(Connection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue(Step {
            before_open: true,
            run: Box::new(move |connection| body(connection).boxed()),
        })
    }
}

// ============================================================================
// WsPipeline - Awaiting
// ============================================================================

impl<S> IntoFuture for WsPipeline<S> {
    type Output = Result<Connection>;
    type IntoFuture = BoxFuture<'static, Result<Connection>>;

    fn into_future(self) -> Self::IntoFuture {
        let WsPipeline {
            connection,
            steps,
            runner,
            ..
        } = self;

        // Lets the runner finish once the queue drains
        drop(steps);

        async move {
            match runner.await {
                Ok(Ok(())) => Ok(connection),
                Ok(Err(e)) => Err(e),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(Error::step_failed(format!("pipeline runner stopped: {e}"))),
            }
        }
        .boxed()
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Runs queued steps one at a time until the queue closes or a step fails.
async fn run_steps(connection: Connection, mut step_rx: mpsc::UnboundedReceiver<Step>) -> Result<()> {
    let mut handshake_settled = false;
    let mut index = 0usize;

    while let Some(step) = step_rx.recv().await {
        if !step.before_open && !handshake_settled {
            connection.ready().await?;
        }
        handshake_settled = true;

        trace!(connection_id = %connection.id(), step = index, "Running step");

        // Errors win over a step that became ready in the same wakeup
        let outcome = tokio::select! {
            biased;

            error = connection.first_error() => Err(error),

            result = AssertUnwindSafe((step.run)(connection.clone())).catch_unwind() => match result {
                Ok(result) => result,
                Err(panic) => {
                    debug!(connection_id = %connection.id(), step = index, "Step panicked");
                    close_if_active(&connection);
                    std::panic::resume_unwind(panic);
                }
            },
        };

        if let Err(e) = outcome {
            debug!(connection_id = %connection.id(), step = index, error = %e, "Step failed");
            close_if_active(&connection);
            return Err(e);
        }

        index += 1;
    }

    // A pipeline without steps still reports a failed handshake
    if !handshake_settled {
        connection.ready().await?;
    }

    Ok(())
}

/// Starts the closing handshake unless the connection already closes.
fn close_if_active(connection: &Connection) {
    if connection.is_active() {
        connection.close(None, None);
    }
}
