pub mod compositor;
pub mod frame;
pub mod multi;
pub mod pacer;

pub use compositor::{Compositor, CompositorEvent, OwnedSyncHandle, SessionState};
pub use frame::{FrameIdNotMonotonic, FramePair, FrameSlot};
pub use multi::MultiCompositor;
pub use pacer::{FakePacer, FramePrediction, Pacer, PacerPoint};
