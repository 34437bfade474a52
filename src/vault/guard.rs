use std::cell::Cell;
use std::rc::Rc;

use crate::error::{VaultError, VaultResult};

/// Flag held for the whole duration of a vault call.
///
/// Clones share the flag, so a collaborator handed a clone can observe that a
/// call is in flight and any attempt to enter again is refused.
#[derive(Clone, Debug, Default)]
pub struct ReentrancyLock(Rc<Cell<bool>>);

impl ReentrancyLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> VaultResult<ReentrancyGuard> {
        if self.0.get() {
            return Err(VaultError::Reentrancy);
        }
        self.0.set(true);
        Ok(ReentrancyGuard(Rc::clone(&self.0)))
    }

    pub fn is_entered(&self) -> bool {
        self.0.get()
    }
}

/// Releases the lock when dropped, on every exit path.
#[must_use]
#[derive(Debug)]
pub struct ReentrancyGuard(Rc<Cell<bool>>);

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_release() {
        let lock = ReentrancyLock::new();
        let guard = lock.enter().unwrap();
        assert!(lock.is_entered());
        assert!(matches!(lock.clone().enter(), Err(VaultError::Reentrancy)));
        drop(guard);
        assert!(!lock.is_entered());
        let _again = lock.enter().unwrap();
    }

    #[test]
    fn released_on_early_return() {
        fn failing(lock: &ReentrancyLock) -> VaultResult<()> {
            let _guard = lock.enter()?;
            Err(VaultError::InvalidAmount)
        }
        let lock = ReentrancyLock::new();
        assert!(failing(&lock).is_err());
        assert!(!lock.is_entered());
    }
}
