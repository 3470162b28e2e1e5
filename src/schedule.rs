//! Cancellable one-shot timers.
//!
//! [`schedule`] runs a callback once after a delay on the Tokio runtime and
//! returns a [`TimerHandle`]. The handle can cancel the timer or push its
//! deadline back, which is how the idle timeout is refreshed on every read.
//! Dropping the handle cancels a timer that has not fired yet.

use std::time::Duration;

use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

/// Handle to a pending timer created by [`schedule`].
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
    deadline: watch::Sender<Instant>,
}

impl TimerHandle {
    /// Stop the timer. Has no effect once the callback has run.
    pub fn cancel(&self) { self.token.cancel(); }

    /// Move the deadline to `delay` from now. Has no effect once the
    /// callback has run or the timer was cancelled.
    pub fn reset(&self, delay: Duration) {
        // The receiver is gone once the timer task has finished.
        let _ = self.deadline.send(Instant::now() + delay);
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.token.is_cancelled() }
}

/// Run `callback` once, `delay` from now, unless the returned handle is
/// cancelled, reset past the firing point, or dropped first.
///
/// Must be called from within a Tokio runtime.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use relaywire::schedule::schedule;
/// use tokio::sync::oneshot;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (tx, rx) = oneshot::channel();
/// let _timer = schedule(Duration::from_millis(5), move || {
///     let _ = tx.send("fired");
/// });
/// assert_eq!(rx.await, Ok("fired"));
/// # }
/// ```
pub fn schedule<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let token = CancellationToken::new();
    let (deadline_tx, mut deadline_rx) = watch::channel(Instant::now() + delay);
    let task_token = token.clone();

    tokio::spawn(async move {
        let fired = loop {
            let deadline = *deadline_rx.borrow_and_update();
            tokio::select! {
                biased;

                () = task_token.cancelled() => break false,

                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        break false;
                    }
                }

                () = sleep_until(deadline) => break true,
            }
        };
        if fired {
            callback();
        }
    });

    TimerHandle {
        token,
        deadline: deadline_tx,
    }
}
