use std::sync::atomic::{AtomicUsize, Ordering};

use super::LedgerError;

/// Cap on how many records of one kind may exist.
///
/// Creators reserve a slot before reading the store count and hold it until
/// their record is applied, so concurrent creators never see the same count
/// as room to spare.
pub(super) struct Quota {
    pending: AtomicUsize,
    max: usize,
    what: &'static str,
}

/// A reserved slot; released on drop.
pub(super) struct QuotaSlot<'a> {
    pending: &'a AtomicUsize,
}

impl Quota {
    pub(super) fn new(max: usize, what: &'static str) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            max,
            what,
        }
    }

    /// `count` is read after the reservation is taken.
    pub(super) fn reserve(
        &self,
        count: impl FnOnce() -> usize,
    ) -> Result<QuotaSlot<'_>, LedgerError> {
        let others = self.pending.fetch_add(1, Ordering::SeqCst);
        if count() + others >= self.max {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(LedgerError::LimitExceeded(self.what));
        }
        Ok(QuotaSlot {
            pending: &self.pending,
        })
    }
}

impl Drop for QuotaSlot<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn held_slot_counts_against_the_cap() {
        let quota = Quota::new(2, "too many rooms");
        let first = quota.reserve(|| 1).unwrap();
        assert_eq!(
            quota.reserve(|| 1).err(),
            Some(LedgerError::LimitExceeded("too many rooms"))
        );
        drop(first);
        assert!(quota.reserve(|| 1).is_ok());
    }

    #[test]
    fn rejected_reservation_releases_itself() {
        let quota = Quota::new(1, "too many students");
        assert!(quota.reserve(|| 1).is_err());
        assert!(quota.reserve(|| 0).is_ok());
    }

    #[test]
    fn racing_creators_never_overshoot() {
        let quota = Arc::new(Quota::new(5, "too many rooms"));
        let created = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let (quota, created, barrier) = (quota.clone(), created.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    let Ok(_slot) = quota.reserve(|| created.load(Ordering::SeqCst)) else {
                        return;
                    };
                    std::thread::yield_now();
                    created.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(created.load(Ordering::SeqCst) <= 5);
    }
}
