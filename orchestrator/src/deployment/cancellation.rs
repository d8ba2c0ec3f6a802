use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A signal carrying a single deployment's cancellation request, checked by
/// the workflow after every step.
#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unrequested() {
        assert!(!CancellationSignal::new().is_requested());
    }

    #[test]
    fn request_is_observed() {
        let signal = CancellationSignal::new();
        signal.request();
        assert!(signal.is_requested());
    }
}
