use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const ARMED: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Armed,
    Cancelled,
    Fired,
}

/// Single-shot response timer.
///
/// Firing and cancelling race on one compare-and-swap, so exactly one of
/// them wins and a response is never applied twice.
#[derive(Debug)]
pub struct ResponseAlarm {
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

/// Resolves when the alarm fires.
#[derive(Debug)]
pub struct Expiry {
    rx: oneshot::Receiver<()>,
}

impl Expiry {
    /// `true` once the alarm fired, `false` if it was cancelled first.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

impl ResponseAlarm {
    /// Arms an alarm that fires after `window`.
    ///
    /// Outside a tokio runtime the alarm can only be cancelled.
    #[must_use]
    pub fn arm(window: Duration) -> (Self, Expiry) {
        let state = Arc::new(AtomicU8::new(ARMED));
        let (tx, rx) = oneshot::channel();

        let task = match Handle::try_current() {
            Ok(handle) => {
                let state = Arc::clone(&state);
                Some(handle.spawn(async move {
                    tokio::time::sleep(window).await;
                    if state
                        .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        let _ = tx.send(());
                    }
                }))
            }
            Err(_) => {
                tracing::warn!("no async runtime available; response alarm will not fire");
                drop(tx);
                None
            }
        };

        (Self { state, task }, Expiry { rx })
    }

    /// Cancels the alarm. Returns `false` if it already fired.
    pub fn cancel(&self) -> bool {
        let won = matches!(
            self.state
                .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire),
            Ok(_) | Err(CANCELLED)
        );
        if won {
            if let Some(task) = &self.task {
                task.abort();
            }
        }
        won
    }

    #[must_use]
    pub fn state(&self) -> AlarmState {
        match self.state.load(Ordering::Acquire) {
            ARMED => AlarmState::Armed,
            CANCELLED => AlarmState::Cancelled,
            _ => AlarmState::Fired,
        }
    }
}

impl Drop for ResponseAlarm {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
