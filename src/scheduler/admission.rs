use std::collections::HashSet;

use uuid::Uuid;

/// Tracks the set of non-terminal jobs and enforces the concurrency ceiling.
///
/// The controller lives inside the job store, so a reservation and the
/// record it guards are always created under the same lock acquisition.
#[derive(Debug)]
pub struct AdmissionController {
    ceiling: usize,
    active: HashSet<Uuid>,
}

impl AdmissionController {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            active: HashSet::new(),
        }
    }

    /// Reserve a slot for `job_id`, or report the caller's queue position.
    pub fn try_reserve(&mut self, job_id: Uuid) -> Result<(), usize> {
        if self.active.len() >= self.ceiling {
            let queue_position = self.active.len() - self.ceiling + 1;
            tracing::warn!(
                active = self.active.len(),
                ceiling = self.ceiling,
                queue_position,
                "Admission rejected"
            );
            return Err(queue_position);
        }
        self.active.insert(job_id);
        Ok(())
    }

    /// Give the slot back. Returns false if the job held no slot.
    pub fn release(&mut self, job_id: &Uuid) -> bool {
        self.active.remove(job_id)
    }

    pub fn is_active(&self, job_id: &Uuid) -> bool {
        self.active.contains(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}
