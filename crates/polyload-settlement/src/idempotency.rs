//! Execution idempotency guard: an instruction executes at most once.
//!
//! Attempting to execute the same [`InstructionId`] a second time returns
//! [`PolyloadError::InstructionAlreadyExecuted`]. The guard is bounded; once
//! full, the oldest id is evicted. Evicted ids are still protected by the
//! instruction's terminal status.

use std::collections::{HashSet, VecDeque};

use polyload_types::{InstructionId, PolyloadError, Result};

/// Bounded set of instructions that already went through execution.
#[derive(Debug)]
pub struct IdempotencyGuard {
    executed: HashSet<InstructionId>,
    /// Insertion order, front = oldest.
    order: VecDeque<InstructionId>,
    max_size: usize,
}

impl IdempotencyGuard {
    /// A guard remembering up to `max_size` instructions (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            executed: HashSet::with_capacity(max_size),
            order: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Record an execution attempt.
    ///
    /// # Errors
    /// Returns [`PolyloadError::InstructionAlreadyExecuted`] if `id` was
    /// already recorded.
    pub fn mark_executed(&mut self, id: InstructionId) -> Result<()> {
        if self.executed.contains(&id) {
            return Err(PolyloadError::InstructionAlreadyExecuted(id));
        }
        if self.executed.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.executed.remove(&oldest);
            }
        }
        self.executed.insert(id);
        self.order.push_back(id);
        Ok(())
    }

    #[must_use]
    pub fn is_executed(&self, id: &InstructionId) -> bool {
        self.executed.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_execution_blocked() {
        let mut guard = IdempotencyGuard::new(8);
        guard.mark_executed(InstructionId(1)).unwrap();
        let err = guard.mark_executed(InstructionId(1)).unwrap_err();
        assert!(
            matches!(err, PolyloadError::InstructionAlreadyExecuted(InstructionId(1))),
            "got: {err:?}"
        );
        assert!(guard.is_executed(&InstructionId(1)));
    }

    #[test]
    fn evicts_oldest() {
        let mut guard = IdempotencyGuard::new(2);
        for id in 1..=3 {
            guard.mark_executed(InstructionId(id)).unwrap();
        }
        assert_eq!(guard.len(), 2);
        assert!(!guard.is_executed(&InstructionId(1)));
        assert!(guard.is_executed(&InstructionId(3)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut guard = IdempotencyGuard::new(0);
        assert!(guard.is_empty());
        guard.mark_executed(InstructionId(5)).unwrap();
        assert_eq!(guard.len(), 1);
    }
}
