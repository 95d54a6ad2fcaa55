//! Per-client compositor contract: session lifecycle, frame pacing,
//! layer-slot accumulation, swapchain factory.

use std::sync::atomic::{AtomicBool, Ordering};

use xrt_render::LayerSlot;
use xrt_util::error::CompositorError;

use crate::frame::FramePair;
use crate::pacer::{FakePacer, Pacer, PacerPoint};

/// One-way state machine: transitions only move forward and are reported
/// via `poll_events` at most once each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Prepared,
    Visible,
    Focused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorEvent {
    StateChanged(SessionState),
}

/// A client's sync handle, owned from `layer_commit` through consumption:
/// on discard paths the handle is still consumed and closed.
pub trait OwnedSyncHandle: Send {
    fn close(self: Box<Self>);
}

/// Base per-client compositor. `MultiCompositor` owns N of these behind
/// proxies.
pub struct Compositor {
    state: SessionState,
    last_reported_state: SessionState,
    frames: FramePair,
    pending_layers: LayerSlot,
    pacer: Box<dyn Pacer>,
    visible: AtomicBool,
}

impl Compositor {
    pub fn new(pacer: Box<dyn Pacer>) -> Self {
        Self {
            state: SessionState::Uninitialized,
            last_reported_state: SessionState::Uninitialized,
            frames: FramePair::default(),
            pending_layers: LayerSlot::default(),
            pacer,
            visible: AtomicBool::new(true),
        }
    }

    pub fn with_fake_pacer(nominal_period_ns: i64) -> Self {
        Self::new(Box::new(FakePacer::new(nominal_period_ns)))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    /// Transitions Uninitialized -> Ready.
    pub fn begin_session(&mut self) -> anyhow::Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(CompositorError::SchemaMismatch("begin_session called outside Uninitialized".into()).into());
        }
        self.advance_to(SessionState::Ready);
        Ok(())
    }

    pub fn mark_prepared(&mut self) {
        self.advance_to(SessionState::Prepared);
    }

    pub fn mark_visible(&mut self) {
        self.advance_to(SessionState::Visible);
    }

    pub fn mark_focused(&mut self) {
        self.advance_to(SessionState::Focused);
    }

    fn advance_to(&mut self, new_state: SessionState) {
        if new_state > self.state {
            self.state = new_state;
        }
    }

    /// Edge-triggered: reports each state transition at most once.
    pub fn poll_events(&mut self) -> Option<CompositorEvent> {
        if self.state != self.last_reported_state {
            self.last_reported_state = self.state;
            Some(CompositorEvent::StateChanged(self.state))
        } else {
            None
        }
    }

    pub fn predict_frame(&mut self, now_ns: i64) -> anyhow::Result<crate::pacer::FramePrediction> {
        let prediction = self.pacer.predict(now_ns);
        self.frames
            .predict(crate::frame::FrameSlot {
                id: prediction.frame_id as i64,
                desired_present_time_ns: prediction.desired_present_ns,
                predicted_display_time_ns: prediction.predicted_display_ns,
                present_slop_ns: prediction.slop_ns,
                wake_up_time_ns: prediction.wake_ns,
            })
            .map_err(|e| CompositorError::SchemaMismatch(e.to_string()))?;
        Ok(prediction)
    }

    pub fn mark_woke(&mut self, frame_id: u64, when_ns: i64) {
        self.pacer.mark_point(PacerPoint::Wake, frame_id, when_ns);
    }

    pub fn begin_frame(&mut self, frame_id: u64, when_ns: i64) {
        self.pacer.mark_point(PacerPoint::Begin, frame_id, when_ns);
    }

    /// Discards the current frame's accumulated layers. The caller's sync
    /// handle is still consumed and closed on this path.
    pub fn discard_frame(&mut self, sync_handle: Option<Box<dyn OwnedSyncHandle>>) {
        self.pending_layers = LayerSlot::default();
        if let Some(handle) = sync_handle {
            handle.close();
        }
    }

    pub fn layer_begin(&mut self) {
        self.pending_layers = LayerSlot::default();
    }

    pub fn layer_add(&mut self, layer: xrt_render::Layer) -> anyhow::Result<()> {
        self.pending_layers.push(layer).map_err(|e| CompositorError::SchemaMismatch(e.to_string()).into())
    }

    /// Accumulates the pending layers into the committed `Slot` and moves
    /// `waited` -> `rendering`. Takes ownership of `sync_handle`.
    pub fn layer_commit(&mut self, frame_id: u64, sync_handle: Box<dyn OwnedSyncHandle>) -> anyhow::Result<LayerSlot> {
        if self.frames.waited.id != frame_id as i64 {
            return Err(CompositorError::SchemaMismatch(format!(
                "layer_commit frame_id {frame_id} does not match the currently waited frame {}",
                self.frames.waited.id
            ))
            .into());
        }
        self.frames.commit();
        sync_handle.close();
        Ok(std::mem::take(&mut self.pending_layers))
    }

    pub fn finish_render(&mut self, frame_id: u64, submit_ns: i64, gpu_done_ns: i64, present_ns: i64) {
        self.pacer.mark_point(PacerPoint::Submit, frame_id, submit_ns);
        self.pacer.mark_point(PacerPoint::GpuDone, frame_id, gpu_done_ns);
        self.pacer.mark_point(PacerPoint::Present, frame_id, present_ns);
        self.pacer.info_present(frame_id, present_ns);
        self.frames.finish_render();
    }

    /// Session drain checkpoint: the caller must follow this with
    /// `vkDeviceWaitIdle` and assert it returns within 1s. This method only
    /// clears compositor-owned state; it does not touch GPU handles.
    pub fn end_session(&mut self) {
        self.pending_layers = LayerSlot::default();
        self.frames = FramePair::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_transitions_are_one_way() {
        let mut compositor = Compositor::with_fake_pacer(11_111_111);
        compositor.begin_session().unwrap();
        assert_eq!(compositor.state(), SessionState::Ready);
        compositor.mark_focused();
        assert_eq!(compositor.state(), SessionState::Focused);
        compositor.mark_prepared();
        assert_eq!(compositor.state(), SessionState::Focused, "state must never move backward");
    }

    #[test]
    fn poll_events_reports_each_transition_once() {
        let mut compositor = Compositor::with_fake_pacer(11_111_111);
        compositor.begin_session().unwrap();
        assert_eq!(compositor.poll_events(), Some(CompositorEvent::StateChanged(SessionState::Ready)));
        assert_eq!(compositor.poll_events(), None);
        compositor.mark_prepared();
        assert_eq!(compositor.poll_events(), Some(CompositorEvent::StateChanged(SessionState::Prepared)));
    }

    struct NoopSyncHandle;
    impl OwnedSyncHandle for NoopSyncHandle {
        fn close(self: Box<Self>) {}
    }

    #[test]
    fn layer_commit_requires_a_matching_predicted_frame() {
        let mut compositor = Compositor::with_fake_pacer(11_111_111);
        let prediction = compositor.predict_frame(0).unwrap();
        let result = compositor.layer_commit(prediction.frame_id, Box::new(NoopSyncHandle));
        assert!(result.is_ok());
    }

    #[test]
    fn layer_commit_rejects_a_stale_frame_id() {
        let mut compositor = Compositor::with_fake_pacer(11_111_111);
        let _prediction = compositor.predict_frame(0).unwrap();
        let result = compositor.layer_commit(999, Box::new(NoopSyncHandle));
        assert!(result.is_err());
    }

    #[test]
    fn predict_frame_propagates_a_non_monotonic_frame_id() {
        let mut compositor = Compositor::with_fake_pacer(11_111_111);
        let first = compositor.predict_frame(0).unwrap();
        // Force the frames pair's last_id ahead of what the pacer will hand
        // out next, so the second predict rejects it instead of silently
        // leaving `waited` out of sync with the pacer.
        compositor
            .frames
            .predict(crate::frame::FrameSlot {
                id: first.frame_id as i64 + 1000,
                ..crate::frame::FrameSlot::default()
            })
            .unwrap();
        assert!(compositor.predict_frame(0).is_err());
    }
}
