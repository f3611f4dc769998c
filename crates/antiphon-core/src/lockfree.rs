//! Lock-free trigger flags shared between callbacks and the controller.

use std::sync::atomic::{AtomicBool, Ordering};

/// Cache-line aligned atomic bool. Used for one-shot trigger flags that a
/// callback raises and the controller consumes with [`AtomicFlag::take`].
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }

    /// Returns the current value and clears it.
    #[inline]
    pub fn take(&self) -> bool {
        self.swap(false)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_flag_take_clears() {
        let flag = AtomicFlag::default();
        assert!(!flag.take());
        flag.set(true);
        assert!(flag.get());
        assert!(flag.take());
        assert!(!flag.get());
    }
}
