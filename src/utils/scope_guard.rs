/// Runs a closure when dropped, however the owning scope or stream ends
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(on_drop: F) -> Self {
        Self(Some(on_drop))
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.0.take() {
            on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_exactly_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            let _guard = ScopeGuard::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn travels_with_a_moved_owner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = {
            let calls = calls.clone();
            ScopeGuard::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let owner = vec![guard];
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(owner);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
