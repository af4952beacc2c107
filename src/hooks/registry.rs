use std::fmt;
use std::sync::Arc;

/// Callbacks accepted while the program initializes.
///
/// Registration needs `&mut self`; [`Registry::freeze`] consumes the open
/// registry, so nothing can be added once readers exist.
pub struct Registry<F> {
    entries: Vec<F>,
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F> Registry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: F) {
        self.entries.push(callback);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close registration. The frozen set is shared without locks.
    pub fn freeze(self) -> Frozen<F> {
        Frozen {
            entries: self.entries.into(),
        }
    }
}

impl<F> IntoIterator for Registry<F> {
    type Item = F;
    type IntoIter = std::vec::IntoIter<F>;

    /// Drain in registration order, for one-shot callbacks.
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<F> fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.entries.len()).finish()
    }
}

/// Immutable callback list; clones share storage.
pub struct Frozen<F> {
    entries: Arc<[F]>,
}

impl<F> Clone for Frozen<F> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<F> Frozen<F> {
    pub fn iter(&self) -> std::slice::Iter<'_, F> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F> fmt::Debug for Frozen<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frozen").field("len", &self.entries.len()).finish()
    }
}

impl<'a, F> IntoIterator for &'a Frozen<F> {
    type Item = &'a F;
    type IntoIter = std::slice::Iter<'a, F>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_freeze_preserves_registration_order() {
        let mut reg: Registry<&'static str> = Registry::new();
        reg.register("a");
        reg.register("b");
        let frozen = reg.freeze();
        assert_eq!(frozen.iter().copied().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_frozen_read_from_many_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg: Registry<Box<dyn Fn() + Send + Sync>> = Registry::new();
        let counter = Arc::clone(&calls);
        reg.register(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let frozen = reg.freeze();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let frozen = frozen.clone();
                thread::spawn(move || {
                    for cb in &frozen {
                        cb();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
