/*! OS-exportable handle newtypes.
 *
 * The original C interfaces pass raw fds/HANDLEs/AHardwareBuffer pointers
 * around and leave ownership to convention; here each kind gets an explicit
 * `Drop` so ownership is a type-level fact instead of a comment (see Design
 * Notes: "Ownership of client-supplied OS handles").
 */

use std::os::fd::RawFd;

/// A Unix file descriptor exported from (or imported into) a Vulkan external
/// memory/fence/semaphore object. Closed exactly once on drop.
#[derive(Debug)]
pub struct OpaqueFd(RawFd);

impl OpaqueFd {
    /// Takes ownership of an fd obtained from a Vulkan export call.
    ///
    /// # Safety
    /// `fd` must be a valid, currently-open file descriptor not owned by any
    /// other `OpaqueFd` or closed elsewhere.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }

    /// Releases ownership without closing; the caller becomes responsible
    /// for closing the fd (used when handing it across a process boundary).
    pub fn into_raw(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }
}

impl Drop for OpaqueFd {
    fn drop(&mut self) {
        unsafe {
            libc_close(self.0);
        }
    }
}

unsafe fn libc_close(fd: RawFd) {
    extern "C" {
        fn close(fd: i32) -> i32;
    }
    close(fd);
}

/// A Win32 `HANDLE` exported from (or imported into) a Vulkan external
/// object. Represented as a raw pointer-sized value since this crate does
/// not depend on `windows-sys`; closing is left to the platform-specific
/// caller that owns the loader, matching this crate's Unix-first scope.
#[derive(Debug, Clone, Copy)]
pub struct Win32Handle(pub isize);

impl Win32Handle {
    /// # Safety
    /// `raw` must be a valid Win32 `HANDLE` obtained from a Vulkan export
    /// call; the caller must call `CloseHandle` exactly once.
    pub unsafe fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> isize {
        self.0
    }
}

/// An Android `AHardwareBuffer*`, refcounted by the platform. Acquire/release
/// are explicit rather than hidden behind `Drop` because the underlying
/// refcount is shared with non-Rust owners (the NDK, the compositor's other
/// process) and double-releasing is a use-after-free, not a double-free of
/// Rust-owned memory.
#[derive(Debug, Clone, Copy)]
pub struct AHardwareBufferHandle(pub *mut std::ffi::c_void);

impl AHardwareBufferHandle {
    /// # Safety
    /// `ptr` must be a live `AHardwareBuffer*` that the caller has already
    /// acquired a reference to.
    pub unsafe fn from_raw_acquired(ptr: *mut std::ffi::c_void) -> Self {
        Self(ptr)
    }

    pub fn as_raw(&self) -> *mut std::ffi::c_void {
        self.0
    }
}

/// The OS handle kind negotiated for a given swapchain image or sync object,
/// matching the kinds the compositor negotiates with clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    OpaqueFd,
    Win32Opaque,
    Win32D3D11Texture,
    AndroidHardwareBuffer,
    SyncFd,
    Win32D3D12Fence,
}

impl HandleKind {
    pub fn is_memory_kind(&self) -> bool {
        matches!(
            self,
            Self::OpaqueFd | Self::Win32Opaque | Self::Win32D3D11Texture | Self::AndroidHardwareBuffer
        )
    }

    pub fn is_fence_or_semaphore_kind(&self) -> bool {
        matches!(self, Self::SyncFd | Self::Win32D3D12Fence)
    }
}
