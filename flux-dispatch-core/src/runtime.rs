//! Async action loop
//!
//! Actions produced outside a dispatch (timers, I/O completions, listeners
//! that want to follow up on a change) are queued on an unbounded channel and
//! dispatched one at a time by [`DispatchLoop`]. Nothing reaches the
//! dispatcher while a dispatch is running, so queued work never trips the
//! single-flight check.

use std::rc::Rc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::tasks::TaskManager;
use crate::Action;

/// Queue-driven driver for a [`Dispatcher`]
///
/// The loop owns the receiving end of the action channel; producers hold
/// clones of [`action_tx`](DispatchLoop::action_tx). The dispatcher is not
/// `Send`, so the loop runs on the task that created it.
pub struct DispatchLoop<A: Action, E: 'static = DispatchError> {
    dispatcher: Rc<Dispatcher<A, E>>,
    action_tx: mpsc::UnboundedSender<A>,
    action_rx: mpsc::UnboundedReceiver<A>,
    cancel: CancellationToken,
}

impl<A, E> DispatchLoop<A, E>
where
    A: Action + Send,
    E: From<DispatchError> + 'static,
{
    /// Wrap a shared dispatcher
    pub fn new(dispatcher: Rc<Dispatcher<A, E>>) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher,
            action_tx,
            action_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// The dispatcher this loop drives
    pub fn dispatcher(&self) -> &Rc<Dispatcher<A, E>> {
        &self.dispatcher
    }

    /// Queue an action for a later dispatch
    pub fn enqueue(&self, action: A) {
        let _ = self.action_tx.send(action);
    }

    /// Clone the action sender
    pub fn action_tx(&self) -> mpsc::UnboundedSender<A> {
        self.action_tx.clone()
    }

    /// Task manager whose completions feed this loop
    pub fn task_manager(&self) -> TaskManager<A> {
        TaskManager::new(self.action_tx())
    }

    /// Token that stops [`run`](DispatchLoop::run) when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether [`shutdown`](DispatchLoop::shutdown) was requested
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Dispatch queued actions until quit or shutdown
    ///
    /// `should_quit` sees each action before it is dispatched; returning
    /// `true` stops the loop without dispatching that action. Failed
    /// dispatches are handed to `on_error` and the loop keeps going.
    /// Returns the number of successful dispatches.
    pub async fn run<FQuit, FErr>(&mut self, mut should_quit: FQuit, mut on_error: FErr) -> usize
    where
        FQuit: FnMut(&A) -> bool,
        FErr: FnMut(&'static str, E),
    {
        let label = self.dispatcher.config().label.clone();
        debug!(dispatcher = %label, "Dispatch loop started");

        let mut dispatched = 0;
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(dispatcher = %label, "Dispatch loop cancelled");
                    break;
                }

                received = self.action_rx.recv() => {
                    let Some(action) = received else {
                        break;
                    };
                    if should_quit(&action) {
                        debug!(
                            dispatcher = %label,
                            action = action.name(),
                            "Quit action received"
                        );
                        break;
                    }
                    if dispatch_one(&self.dispatcher, action, &mut on_error) {
                        dispatched += 1;
                    }
                }
            }
        }
        dispatched
    }

    /// Dispatch everything already queued, including actions queued by the
    /// handlers it runs, then return without waiting for more
    pub fn run_until_idle<FErr>(&mut self, mut on_error: FErr) -> usize
    where
        FErr: FnMut(&'static str, E),
    {
        let mut dispatched = 0;
        while let Ok(action) = self.action_rx.try_recv() {
            if dispatch_one(&self.dispatcher, action, &mut on_error) {
                dispatched += 1;
            }
        }
        dispatched
    }
}

fn dispatch_one<A, E, FErr>(
    dispatcher: &Dispatcher<A, E>,
    action: A,
    on_error: &mut FErr,
) -> bool
where
    A: Action,
    E: From<DispatchError> + 'static,
    FErr: FnMut(&'static str, E),
{
    let name = action.name();
    match dispatcher.dispatch(action) {
        Ok(_) => true,
        Err(err) => {
            warn!(
                dispatcher = %dispatcher.config().label,
                action = name,
                "Queued dispatch failed"
            );
            on_error(name, err);
            false
        }
    }
}
