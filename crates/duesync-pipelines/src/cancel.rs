//! Run-scoped cancellation signal: each pipeline run carries a
//! cancellation signal, and workers check it at safe points.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancellationObserver {
    rx: watch::Receiver<bool>,
}

pub fn cancellation_pair() -> (CancellationToken, CancellationObserver) {
    let (tx, rx) = watch::channel(false);
    (CancellationToken { tx }, CancellationObserver { rx })
}

impl CancellationToken {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationObserver {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; used to race against an
    /// in-flight wait (e.g. `RateGate::admit`).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
