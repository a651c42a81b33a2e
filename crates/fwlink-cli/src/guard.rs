//! Ctrl+C handling while an upload is on the wire

use anyhow::Result;
use fwlink_client::NavigationGuard;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a Ctrl+C press did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Nothing in flight, leave right away
    Exit,
    /// First press during an upload, the user has been warned
    Warned,
    /// Second press during an upload, the transaction is aborted
    Cancelled,
}

/// Interrupt handler that asks before abandoning an upload
///
/// While armed, the first Ctrl+C only prints a warning and the second one
/// cancels the transaction. Outside an upload Ctrl+C exits immediately.
#[derive(Default)]
pub struct InterruptGuard {
    armed: AtomicBool,
    warned: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl InterruptGuard {
    /// Create a guard and register it as the process Ctrl+C handler
    pub fn install() -> Result<Arc<Self>> {
        let guard = Arc::new(Self::default());
        let handler = guard.clone();
        ctrlc::set_handler(move || match handler.interrupt() {
            Interrupt::Exit => std::process::exit(130),
            Interrupt::Warned => eprintln!(
                "\nUpload in progress: leaving now may leave the device without firmware. \
                 Press Ctrl+C again to abort."
            ),
            Interrupt::Cancelled => eprintln!("\nAborting upload..."),
        })?;
        Ok(guard)
    }

    /// Token cancelled by a confirmed interrupt
    pub fn attach(&self, token: CancellationToken) {
        *self.cancel.lock() = Some(token);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Handle one Ctrl+C press
    pub fn interrupt(&self) -> Interrupt {
        if !self.is_armed() {
            return Interrupt::Exit;
        }
        if !self.warned.swap(true, Ordering::SeqCst) {
            return Interrupt::Warned;
        }
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                Interrupt::Cancelled
            }
            None => Interrupt::Exit,
        }
    }
}

impl NavigationGuard for InterruptGuard {
    fn arm(&self) {
        self.warned.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_exits() {
        let guard = InterruptGuard::default();
        assert_eq!(guard.interrupt(), Interrupt::Exit);
    }

    #[test]
    fn test_armed_needs_two_presses() {
        let guard = InterruptGuard::default();
        let token = CancellationToken::new();
        guard.attach(token.clone());
        guard.arm();

        assert_eq!(guard.interrupt(), Interrupt::Warned);
        assert!(!token.is_cancelled());
        assert_eq!(guard.interrupt(), Interrupt::Cancelled);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_rearm_resets_warning() {
        let guard = InterruptGuard::default();
        guard.attach(CancellationToken::new());
        guard.arm();
        assert_eq!(guard.interrupt(), Interrupt::Warned);

        guard.disarm();
        assert_eq!(guard.interrupt(), Interrupt::Exit);

        guard.arm();
        assert_eq!(guard.interrupt(), Interrupt::Warned);
    }
}
