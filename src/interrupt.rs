use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared Ctrl+C flag. The binary raises it from the signal task; the
/// archiver polls it between posts and while sleeping off a rate limit.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}
