use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked by streaming calls between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arms the token before a new call so a stale interrupt (for example
    /// one pressed at the prompt) does not cancel it.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Routes SIGINT into the returned token instead of terminating the process.
pub fn install_interrupt_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&token.flag))?;
    Ok(token)
}
