//! Memory accounting for loaded models.
//!
//! Models do not allocate through the manager; they declare a size up front
//! and the manager refuses reservations that would exceed its budget.

use crate::{InferenceError, Result};
use std::sync::{Mutex, PoisonError};

/// A reservation of model memory that must be handed back to
/// [`MemoryManager::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryReservation {
    pub size_bytes: u64,
    pub owner: String,
}

/// Point-in-time view of memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStatus {
    pub limit_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryStatus {
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.limit_bytes.saturating_sub(self.used_bytes)
    }

    /// Fraction of the budget in use; 0.0 for a zero budget.
    #[must_use]
    pub fn usage_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Thread-safe tracker of memory reservations against a fixed limit
#[derive(Debug)]
pub struct MemoryManager {
    limit_bytes: u64,
    used_bytes: Mutex<u64>,
}

impl MemoryManager {
    #[must_use]
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            limit_bytes,
            used_bytes: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        *self.used()
    }

    #[must_use]
    pub fn status(&self) -> MemoryStatus {
        MemoryStatus {
            limit_bytes: self.limit_bytes,
            used_bytes: self.used_bytes(),
        }
    }

    /// Reserve `size_bytes` on behalf of `owner`.
    pub fn reserve(&self, size_bytes: u64, owner: &str) -> Result<MemoryReservation> {
        let mut used = self.used();
        let exceeds = used
            .checked_add(size_bytes)
            .map_or(true, |total| total > self.limit_bytes);
        if exceeds {
            return Err(InferenceError::MemoryExhausted {
                requested: size_bytes,
                owner: owner.to_string(),
                limit: self.limit_bytes,
            });
        }
        *used += size_bytes;
        tracing::debug!("Reserved {} bytes for {} ({} in use)", size_bytes, owner, *used);
        Ok(MemoryReservation {
            size_bytes,
            owner: owner.to_string(),
        })
    }

    pub fn release(&self, reservation: &MemoryReservation) {
        let mut used = self.used();
        *used = used.saturating_sub(reservation.size_bytes);
        tracing::debug!(
            "Released {} bytes held by {} ({} in use)",
            reservation.size_bytes,
            reservation.owner,
            *used
        );
    }

    /// Reserve memory for the lifetime of the returned guard.
    pub fn scoped(&self, size_bytes: u64, owner: &str) -> Result<ScopedReservation<'_>> {
        let reservation = self.reserve(size_bytes, owner)?;
        Ok(ScopedReservation {
            manager: self,
            reservation,
        })
    }

    fn used(&self) -> std::sync::MutexGuard<'_, u64> {
        self.used_bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its reservation when dropped
#[derive(Debug)]
pub struct ScopedReservation<'a> {
    manager: &'a MemoryManager,
    reservation: MemoryReservation,
}

impl ScopedReservation<'_> {
    #[must_use]
    pub fn reservation(&self) -> &MemoryReservation {
        &self.reservation
    }
}

impl Drop for ScopedReservation<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.reservation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_and_release() {
        let manager = MemoryManager::new(100);
        let a = manager.reserve(60, "a").unwrap();
        assert_eq!(manager.used_bytes(), 60);
        assert_eq!(a.owner, "a");

        let err = manager.reserve(41, "b").unwrap_err();
        assert!(matches!(
            err,
            InferenceError::MemoryExhausted { requested: 41, limit: 100, .. }
        ));
        assert_eq!(manager.used_bytes(), 60);

        let b = manager.reserve(40, "b").unwrap();
        assert_eq!(manager.status().available_bytes(), 0);

        manager.release(&a);
        manager.release(&b);
        assert_eq!(manager.used_bytes(), 0);
    }

    #[test]
    fn test_release_never_underflows() {
        let manager = MemoryManager::new(10);
        let r = manager.reserve(5, "x").unwrap();
        manager.release(&r);
        manager.release(&r);
        assert_eq!(manager.used_bytes(), 0);
    }

    #[test]
    fn test_status_ratio() {
        let manager = MemoryManager::new(200);
        let _r = manager.reserve(50, "x").unwrap();
        let status = manager.status();
        assert_eq!(status.used_bytes, 50);
        assert_eq!(status.available_bytes(), 150);
        assert!((status.usage_ratio() - 0.25).abs() < f64::EPSILON);

        let empty = MemoryManager::new(0).status();
        assert_eq!(empty.usage_ratio(), 0.0);
        assert_eq!(empty.available_bytes(), 0);
    }

    #[test]
    fn test_zero_limit_accepts_zero_sized_reservations_only() {
        let manager = MemoryManager::new(0);
        assert!(manager.reserve(0, "free").is_ok());
        assert!(manager.reserve(1, "paid").is_err());
    }

    #[test]
    fn test_scoped_reservation_releases_on_drop() {
        let manager = MemoryManager::new(100);
        {
            let guard = manager.scoped(70, "scratch").unwrap();
            assert_eq!(guard.reservation().size_bytes, 70);
            assert_eq!(manager.used_bytes(), 70);
        }
        assert_eq!(manager.used_bytes(), 0);
    }

    #[test]
    fn test_concurrent_reservations_respect_limit() {
        let manager = Arc::new(MemoryManager::new(1_000));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.reserve(100, &format!("t{i}")).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 10);
        assert_eq!(manager.used_bytes(), 1_000);
    }
}
