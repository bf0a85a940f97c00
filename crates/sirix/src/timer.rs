use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Background ticker backing the `max_time` auto-commit knob (spec §6.5,
/// §9 Design Notes: "an auto-commit timer should post into the write
/// transaction's own thread rather than call back into it directly").
///
/// Each tick is a message on an `mpsc` channel; [`crate::resource::WriteGuard`]
/// drains it cooperatively between operations and triggers the commit on its
/// own thread, so the timer thread itself never touches the transaction.
pub struct AutoCommitTimer {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AutoCommitTimer {
    pub fn spawn(interval: Duration, tick: Sender<()>) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let loop_cancelled = cancelled.clone();
        let handle = std::thread::Builder::new()
            .name("sirix-auto-commit".into())
            .spawn(move || {
                while !loop_cancelled.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if loop_cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    if tick.send(()).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn auto-commit timer thread");
        Self { cancelled, handle: Some(handle) }
    }

    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AutoCommitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_ticks_until_cancelled() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut timer = AutoCommitTimer::spawn(Duration::from_millis(5), tx);
        rx.recv_timeout(Duration::from_secs(1)).expect("expected at least one tick");
        timer.cancel();
        // draining stops once the thread has joined; no further ticks appear.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }
}
