//! Process handle management.
//!
//! A [`ProcessHandle`] owns one platform backend for the lifetime of an
//! attachment. Every access checks the handle's open flag, and a faulting
//! access or a batch boundary runs the full [`ProcessHandle::check`], so a
//! closed handle surfaces as [`Error::NotAttached`] and a dead target as
//! [`Error::ProcessGone`].

#[cfg(target_os = "linux")]
mod linux;
#[cfg(test)]
pub mod mock;
#[cfg(target_os = "windows")]
mod windows;

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::MemoryRegion;

#[cfg(test)]
pub use mock::{MockProcess, MockProcessBuilder};

/// Native pointer size of the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// A loaded executable image in the target process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl ModuleInfo {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// Platform seam for cross-process memory access.
///
/// Implementations must be callable from several threads at once: freeze
/// tasks write while scans read.
pub trait ProcessBackend: Send + Sync {
    fn pid(&self) -> u32;

    fn pointer_width(&self) -> PointerWidth;

    fn is_alive(&self) -> bool;

    /// Fill `buf` from `address`. A short or failed read is an
    /// [`Error::AccessViolation`].
    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    fn write_from(&self, address: u64, data: &[u8]) -> Result<()>;

    /// Committed regions, sorted by base address.
    fn regions(&self) -> Result<Vec<MemoryRegion>>;

    fn modules(&self) -> Result<Vec<ModuleInfo>>;
}

/// An attachment to a running process
pub struct ProcessHandle {
    pid: u32,
    width: PointerWidth,
    backend: Box<dyn ProcessBackend>,
    open: AtomicBool,
}

impl ProcessHandle {
    /// Open the process with the given id for reading and writing.
    pub fn attach(pid: u32) -> Result<Self> {
        let backend = open_native(pid)?;
        let handle = Self::from_backend(backend);
        info!(
            "Attached to process {} ({}-bit)",
            handle.pid,
            handle.width.bits()
        );
        Ok(handle)
    }

    /// Find a process by executable name and attach to it.
    pub fn find_by_name(name: &str) -> Result<Self> {
        let pid = find_pid_by_name(name)?;
        Self::attach(pid)
    }

    pub fn from_backend(backend: Box<dyn ProcessBackend>) -> Self {
        Self {
            pid: backend.pid(),
            width: backend.pointer_width(),
            backend,
            open: AtomicBool::new(true),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.is_open() && self.backend.is_alive()
    }

    /// Open-flag check only. Per-access paths use this and fall back to
    /// [`Self::check`] when an access faults.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::NotAttached)
        }
    }

    /// Fail fast when the handle is closed or the target has exited.
    ///
    /// Asks the OS about the target, so callers run it once per batch of
    /// accesses rather than per access.
    pub fn check(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotAttached);
        }
        if !self.backend.is_alive() {
            return Err(Error::ProcessGone);
        }
        Ok(())
    }

    /// Mark the handle closed. In-flight users observe `NotAttached` on
    /// their next check; the native handle is released on drop.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closed handle for process {}", self.pid);
        }
    }

    pub(crate) fn backend(&self) -> &dyn ProcessBackend {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("width", &self.width)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(target_os = "windows")]
fn open_native(pid: u32) -> Result<Box<dyn ProcessBackend>> {
    Ok(Box::new(windows::WindowsProcess::open(pid)?))
}

#[cfg(target_os = "linux")]
fn open_native(pid: u32) -> Result<Box<dyn ProcessBackend>> {
    Ok(Box::new(linux::LinuxProcess::open(pid)?))
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
fn open_native(_pid: u32) -> Result<Box<dyn ProcessBackend>> {
    Err(Error::Platform(
        "process attachment is only supported on Windows and Linux".to_string(),
    ))
}

/// Look up a process id by executable name (case-insensitive).
pub fn find_pid_by_name(name: &str) -> Result<u32> {
    #[cfg(target_os = "windows")]
    {
        windows::find_pid_by_name(name)
    }
    #[cfg(target_os = "linux")]
    {
        linux::find_pid_by_name(name)
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        Err(Error::ProcessNotFound(name.to_string()))
    }
}
