//! Scoped ownership of the tensors a loop tick allocates.
//!
//! Every tensor created by the loop is registered with a [`TensorLedger`] and wrapped in a
//! [`Scoped`] guard. Dropping the guard releases the tensor from the ledger on every exit
//! path, so the live count returns to its baseline between ticks.
use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use tract_onnx::prelude::Tensor;

/// Preprocessed model input.
pub type ScopedTensor = Scoped<Tensor>;
/// Single output of the inference engine.
pub type ScopedOutput = Scoped<Arc<Tensor>>;

#[derive(Default)]
struct Counts {
    live: AtomicUsize,
    total: AtomicU64,
}

/// Counts tensors currently alive and ever allocated.
#[derive(Clone, Default)]
pub struct TensorLedger {
    counts: Arc<Counts>,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` and return a guard releasing it when dropped.
    pub fn scope<T>(&self, value: T) -> Scoped<T> {
        self.counts.live.fetch_add(1, Ordering::AcqRel);
        self.counts.total.fetch_add(1, Ordering::Relaxed);
        Scoped {
            value,
            _release: Release {
                counts: Arc::clone(&self.counts),
            },
        }
    }

    /// Number of scoped tensors not yet released.
    pub fn live(&self) -> usize {
        self.counts.live.load(Ordering::Acquire)
    }

    /// Number of tensors ever registered.
    pub fn total(&self) -> u64 {
        self.counts.total.load(Ordering::Relaxed)
    }
}

/// Decrements the live count once dropped.
struct Release {
    counts: Arc<Counts>,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.counts.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Guard owning a tensor registered with a [`TensorLedger`].
pub struct Scoped<T> {
    value: T,
    _release: Release,
}

impl<T> Scoped<T> {
    /// Hand the tensor off to its single consumer.
    ///
    /// The ledger stops tracking it, the consumer owns it from here on.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tract_onnx::prelude::tract_ndarray;

    fn tensor() -> Tensor {
        tract_ndarray::Array2::<f32>::zeros((2, 2)).into()
    }

    #[test]
    fn test_drop_releases() {
        let ledger = TensorLedger::new();
        {
            let a = ledger.scope(tensor());
            let _b = ledger.scope(Arc::new(tensor()));
            assert_eq!(ledger.live(), 2);
            assert_eq!(a.shape(), &[2, 2]);
        }
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.total(), 2);
    }

    #[test]
    fn test_hand_off_releases() {
        let ledger = TensorLedger::new();
        let scoped = ledger.scope(tensor());
        let inner = scoped.into_inner();
        assert_eq!(ledger.live(), 0);
        assert_eq!(inner.shape(), &[2, 2]);
    }

    #[test]
    fn test_hand_off_releases_once() {
        let ledger = TensorLedger::new();
        let outputs: Vec<_> = (0..3).map(|_| ledger.scope(Arc::new(tensor()))).collect();
        let kept: Vec<Arc<Tensor>> = outputs.into_iter().map(Scoped::into_inner).collect();

        assert_eq!(ledger.live(), 0);
        drop(kept);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.total(), 3);
    }

    #[test]
    fn test_release_on_error_path() {
        fn fails(ledger: &TensorLedger) -> anyhow::Result<()> {
            let _input = ledger.scope(tensor());
            anyhow::bail!("inference failed");
        }

        let ledger = TensorLedger::new();
        assert!(fails(&ledger).is_err());
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_clones_share_counts() {
        let ledger = TensorLedger::new();
        let clone = ledger.clone();
        let _scoped = clone.scope(tensor());
        assert_eq!(ledger.live(), 1);
    }
}
