//! Runtime independent timers
//!
//! The orchestrator never picks an async runtime for its callers.
//! Deadlines are signalled by a helper thread through a oneshot channel,
//! so they work with any executor polling the futures.

use std::{
    future::Future,
    pin::Pin,
    sync::mpsc::{self, RecvTimeoutError},
    task::{Context, Poll},
    thread,
    time::Duration,
};

use futures::FutureExt;
use futures_channel::oneshot;

/// Future completing once its duration has elapsed
///
/// Dropping the delay stops its timer thread.
#[must_use = "futures do nothing unless polled"]
pub struct Delay {
    rx: oneshot::Receiver<()>,
    // Never sent on, dropping it wakes the timer thread
    _cancel: mpsc::Sender<()>,
}

/// Creates a [Delay] firing after `duration`
pub fn delay(duration: Duration) -> Delay {
    let (tx, rx) = oneshot::channel::<()>();
    let (cancel, cancelled) = mpsc::channel::<()>();

    thread::spawn(move || {
        if sleep_unless_cancelled(duration, &cancelled) {
            let _ = tx.send(());
        }
    });

    Delay {
        rx,
        _cancel: cancel,
    }
}

/// Returns false if the sending side was dropped before `duration` elapsed
fn sleep_unless_cancelled(duration: Duration, cancelled: &mpsc::Receiver<()>) -> bool {
    matches!(
        cancelled.recv_timeout(duration),
        Err(RecvTimeoutError::Timeout)
    )
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A cancelled sender means the timer thread is gone, treat it as elapsed
        self.rx.poll_unpin(cx).map(|_| ())
    }
}
