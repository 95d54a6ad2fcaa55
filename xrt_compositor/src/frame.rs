//! Per-compositor frame-slot bookkeeping.

/// `{id, desired_present_time_ns, predicted_display_time_ns,
/// present_slop_ns, wake_up_time_ns}`. `id == -1` means invalid (spec
/// section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub id: i64,
    pub desired_present_time_ns: i64,
    pub predicted_display_time_ns: i64,
    pub present_slop_ns: i64,
    pub wake_up_time_ns: i64,
}

impl FrameSlot {
    pub const INVALID: Self = Self {
        id: -1,
        desired_present_time_ns: 0,
        predicted_display_time_ns: 0,
        present_slop_ns: 0,
        wake_up_time_ns: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.id != -1
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Two slots per compositor: `predict` fills `waited`;
/// commit moves `waited` -> `rendering`, clearing `waited`; end of render
/// clears `rendering`. At most one slot per role is non-invalid at a time
/// by construction (each field holds exactly one `FrameSlot`).
#[derive(Debug, Default)]
pub struct FramePair {
    pub waited: FrameSlot,
    pub rendering: FrameSlot,
    last_id: i64,
}

#[derive(Debug)]
pub struct FrameIdNotMonotonic {
    pub previous: i64,
    pub attempted: i64,
}

impl std::fmt::Display for FrameIdNotMonotonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame id {} is not greater than the previous id {}",
            self.attempted, self.previous
        )
    }
}

impl std::error::Error for FrameIdNotMonotonic {}

impl FramePair {
    /// Fills `waited` with a freshly predicted slot. Rejects a non-monotonic
    /// id (the id must monotonically increase).
    pub fn predict(&mut self, slot: FrameSlot) -> Result<(), FrameIdNotMonotonic> {
        if slot.id <= self.last_id {
            return Err(FrameIdNotMonotonic {
                previous: self.last_id,
                attempted: slot.id,
            });
        }
        self.last_id = slot.id;
        self.waited = slot;
        Ok(())
    }

    /// Moves `waited` -> `rendering`, clearing `waited` (commit).
    pub fn commit(&mut self) {
        self.rendering = self.waited;
        self.waited = FrameSlot::INVALID;
    }

    /// Clears `rendering` (end of render).
    pub fn finish_render(&mut self) {
        self.rendering = FrameSlot::INVALID;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: i64) -> FrameSlot {
        FrameSlot {
            id,
            ..FrameSlot::INVALID
        }
    }

    #[test]
    fn predict_commit_finish_cycles_through_both_slots() {
        let mut pair = FramePair::default();
        pair.predict(slot(1)).unwrap();
        assert!(pair.waited.is_valid());
        assert!(!pair.rendering.is_valid());

        pair.commit();
        assert!(!pair.waited.is_valid());
        assert!(pair.rendering.is_valid());
        assert_eq!(pair.rendering.id, 1);

        pair.finish_render();
        assert!(!pair.rendering.is_valid());
    }

    #[test]
    fn non_monotonic_frame_id_is_rejected() {
        let mut pair = FramePair::default();
        pair.predict(slot(5)).unwrap();
        pair.commit();
        assert!(pair.predict(slot(5)).is_err());
        assert!(pair.predict(slot(4)).is_err());
        assert!(pair.predict(slot(6)).is_ok());
    }
}
