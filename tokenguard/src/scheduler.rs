use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::{
    sync::{oneshot, watch},
    task::AbortHandle,
    time,
};

use crate::{Error, Token};

/// The result of one completed renewal attempt
///
/// `Ok(None)` means the attempt ran but produced no token: it scheduled a
/// retry instead, or bailed out because the manager was stopped.
pub(crate) type RenewalOutcome = Result<Option<Arc<Token>>, Error>;

pub(crate) type RenewalFuture = Pin<Box<dyn Future<Output = RenewalOutcome> + Send>>;

/// Handle to one scheduled renewal attempt
///
/// Cloneable so that any number of waiters can observe the same attempt's
/// outcome.
#[derive(Clone, Debug)]
pub(crate) struct RenewalTask {
    outcome: watch::Receiver<Option<RenewalOutcome>>,
    abort: AbortHandle,
}

impl RenewalTask {
    /// Waits until the attempt has produced an outcome
    ///
    /// Returns `None` if the attempt was cancelled before completing.
    pub(crate) async fn outcome(&mut self) -> Option<RenewalOutcome> {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }

    pub(crate) fn cancel(&self) {
        self.abort.abort();
    }
}

/// The single logical renewal timer
///
/// Arms one-shot attempts after a delay and tracks the most recently
/// scheduled attempt so that late-joining waiters can follow a chain of
/// retries to the freshest one.
#[derive(Debug)]
pub(crate) struct RenewalScheduler {
    last_task: Mutex<Option<RenewalTask>>,
    stopped: AtomicBool,
}

impl RenewalScheduler {
    pub(crate) fn new() -> Self {
        Self {
            last_task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Arms a one-shot timer that runs `renew` after `delay`, recording it
    /// as the latest scheduled attempt
    ///
    /// The attempt is gated until its handle has been stored, so the slot
    /// is always written by the attempt that armed the successor, in
    /// order, and a zero-delay attempt can never race its own
    /// publication.
    pub(crate) fn schedule_next(&self, delay: Duration, renew: RenewalFuture) -> RenewalTask {
        let (tx, rx) = watch::channel(None);
        let (armed_tx, armed_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            // Must not run before the handle is visible to waiters.
            if armed_rx.await.is_err() {
                return;
            }
            if delay > Duration::ZERO {
                time::sleep(delay).await;
            }
            let outcome = renew.await;
            let _ = tx.send(Some(outcome));
        });

        let task = RenewalTask {
            outcome: rx,
            abort: handle.abort_handle(),
        };
        *self
            .last_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task.clone());
        let _ = armed_tx.send(());
        task
    }

    /// The most recently scheduled attempt
    pub(crate) fn last_task(&self) -> Option<RenewalTask> {
        self.last_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Waits on `task`, following the chain of rescheduled attempts until
    /// one yields a token or a terminal error
    ///
    /// An empty outcome means the attempt scheduled a retry; the loop then
    /// picks up the freshest task and waits on that one instead. Returns
    /// `Ok(None)` if the scheduler stops before a token arrives.
    pub(crate) async fn wait_for(&self, task: RenewalTask) -> RenewalOutcome {
        let mut task = task;
        loop {
            match task.outcome().await {
                Some(Ok(Some(token))) => return Ok(Some(token)),
                Some(Err(err)) => return Err(err),
                Some(Ok(None)) | None => {
                    if self.is_stopped() {
                        return Ok(None);
                    }
                    // An attempt publishes an empty outcome only after it
                    // has stored its successor, so this always advances to
                    // a fresh task.
                    match self.last_task() {
                        Some(next) => task = next,
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Marks the scheduler stopped and cancels the outstanding attempt
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.last_task() {
            task.cancel();
        }
    }
}
