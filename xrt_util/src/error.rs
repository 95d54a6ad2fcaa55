use thiserror::Error;

/// Direction of an external-memory/fence/semaphore handle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleDirection {
    Import,
    Export,
}

impl std::fmt::Display for HandleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Export => write!(f, "export"),
        }
    }
}

/// Matchable error kinds the core raises and call sites can match on.
///
/// Callers almost always propagate these wrapped in `anyhow::Error` via
/// `.context(...)`; this enum exists so that the handful of call sites that
/// need to branch on *kind* (recreate the swapchain on `Vulkan` with an
/// out-of-date code, downgrade a capability on `HandleUnsupported`, etc.)
/// can `downcast_ref` instead of string-matching a message.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// Raw Vulkan result code, stored as `i32` so this crate does not need
    /// to depend on `ash` just to name the error.
    #[error("vulkan call returned {0}")]
    Vulkan(i32),

    #[error("required extension missing: {0}")]
    ExtensionMissing(String),

    #[error("no suitable GPU found")]
    NoDevice,

    #[error("device failed to create: vulkan call returned {0}")]
    DeviceCreate(i32),

    #[error("instance failed to create")]
    InstanceCreate,

    #[error("insufficient permissions to access the GPU (check driver/device node access)")]
    InsufficientPermissions,

    #[error("external {direction} of {kind} is not supported by this device")]
    HandleUnsupported {
        kind: String,
        direction: HandleDirection,
    },

    #[error("swapchain format {format} does not support requested usage {bits}")]
    FormatUnsupported { format: String, bits: String },

    #[error("(format, usage, handle kind) {0} has no import/export support")]
    ImportExportUnsupported(String),

    #[error("presentation target lost")]
    TargetLost,

    #[error("render loop missed its deadline by {over_ns} ns")]
    MissedDeadline { over_ns: i64 },

    #[error("short read while parsing {0}")]
    ShortRead(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Vulkan result codes which are recoverable by rebuilding the presentation
/// target rather than propagating as a fatal error.
pub fn is_recoverable_vulkan_code(raw: i32) -> bool {
    // VK_ERROR_OUT_OF_DATE_KHR = -1000001004, VK_SUBOPTIMAL_KHR = 1000001003
    raw == -1000001004 || raw == 1000001003
}
