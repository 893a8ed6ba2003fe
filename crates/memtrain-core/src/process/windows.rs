//! Windows backend using the Win32 process memory APIs.

use std::ffi::c_void;
use std::mem::size_of;

use tracing::debug;
use windows::Win32::Foundation::{BOOL, CloseHandle, ERROR_ACCESS_DENIED, HANDLE};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, PROCESSENTRY32W,
    Process32FirstW, Process32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ,
    PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS, PAGE_READONLY,
    PAGE_READWRITE, PAGE_WRITECOPY, VirtualQueryEx,
};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, IsWow64Process, OpenProcess, PROCESS_QUERY_INFORMATION,
    PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
};

use super::{ModuleInfo, PointerWidth, ProcessBackend};
use crate::error::{Error, Result};
use crate::memory::{MemoryRegion, Protection};

/// Exit code reported for a process that has not terminated
const STILL_ACTIVE: u32 = 259;

pub struct WindowsProcess {
    pid: u32,
    handle: HANDLE,
    width: PointerWidth,
}

// SAFETY: a process HANDLE is a kernel object reference; the Win32 memory
// APIs used here are safe to call concurrently on the same handle.
unsafe impl Send for WindowsProcess {}
unsafe impl Sync for WindowsProcess {}

impl WindowsProcess {
    pub fn open(pid: u32) -> Result<Self> {
        let access =
            PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION;

        // SAFETY: OpenProcess has no memory-safety preconditions; the
        // returned handle is owned by this struct and closed on drop.
        let handle = unsafe { OpenProcess(access, false, pid) }.map_err(|e| {
            if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                Error::AccessDenied(format!("pid {}: {}", pid, e))
            } else {
                Error::ProcessNotFound(format!("pid {}: {}", pid, e))
            }
        })?;

        let mut wow64 = BOOL(0);
        // SAFETY: `wow64` is a valid out-pointer for the duration of the call.
        let is_wow64 = unsafe { IsWow64Process(handle, &mut wow64) }
            .map(|_| wow64.as_bool())
            .unwrap_or(false);
        let width = if cfg!(target_pointer_width = "64") && !is_wow64 {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        };

        Ok(Self { pid, handle, width })
    }
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by OpenProcess and is closed once.
        if let Err(e) = unsafe { CloseHandle(self.handle) } {
            debug!("CloseHandle failed for pid {}: {}", self.pid, e);
        }
    }
}

fn protection_from(protect: u32) -> Protection {
    if protect & PAGE_GUARD.0 != 0 || protect & PAGE_NOACCESS.0 != 0 {
        return Protection::NONE;
    }
    let readable = PAGE_READONLY.0
        | PAGE_READWRITE.0
        | PAGE_WRITECOPY.0
        | PAGE_EXECUTE_READ.0
        | PAGE_EXECUTE_READWRITE.0
        | PAGE_EXECUTE_WRITECOPY.0;
    let writable =
        PAGE_READWRITE.0 | PAGE_WRITECOPY.0 | PAGE_EXECUTE_READWRITE.0 | PAGE_EXECUTE_WRITECOPY.0;
    let executable = PAGE_EXECUTE.0
        | PAGE_EXECUTE_READ.0
        | PAGE_EXECUTE_READWRITE.0
        | PAGE_EXECUTE_WRITECOPY.0;

    Protection {
        read: protect & readable != 0,
        write: protect & writable != 0,
        execute: protect & executable != 0,
    }
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

impl ProcessBackend for WindowsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn is_alive(&self) -> bool {
        let mut code = 0u32;
        // SAFETY: `code` is a valid out-pointer for the duration of the call.
        match unsafe { GetExitCodeProcess(self.handle, &mut code) } {
            Ok(()) => code == STILL_ACTIVE,
            Err(_) => false,
        }
    }

    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut read = 0usize;
        // SAFETY: `buf` is a writable buffer of exactly `buf.len()` bytes.
        let result = unsafe {
            ReadProcessMemory(
                self.handle,
                address as usize as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut read),
            )
        };
        match result {
            Ok(()) if read == buf.len() => Ok(()),
            _ => Err(Error::AccessViolation {
                address,
                size: buf.len(),
            }),
        }
    }

    fn write_from(&self, address: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut written = 0usize;
        // SAFETY: the API only reads `data.len()` bytes from `data`.
        let result = unsafe {
            WriteProcessMemory(
                self.handle,
                address as usize as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                Some(&mut written),
            )
        };
        match result {
            Ok(()) if written == data.len() => Ok(()),
            _ => Err(Error::AccessViolation {
                address,
                size: data.len(),
            }),
        }
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let mut regions = Vec::new();
        let mut address: usize = 0;

        loop {
            let mut info = MEMORY_BASIC_INFORMATION::default();
            // SAFETY: `info` is a correctly sized out-buffer.
            let written = unsafe {
                VirtualQueryEx(
                    self.handle,
                    Some(address as *const c_void),
                    &mut info,
                    size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 {
                break;
            }

            let base = info.BaseAddress as usize;
            if info.State == MEM_COMMIT {
                regions.push(MemoryRegion {
                    base: base as u64,
                    size: info.RegionSize as u64,
                    protection: protection_from(info.Protect.0),
                });
            }

            let next = base.saturating_add(info.RegionSize);
            if next <= address {
                break;
            }
            address = next;
        }

        Ok(regions)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        // SAFETY: snapshot handle is closed below on every path.
        let snapshot =
            unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid) }
                .map_err(|e| Error::Platform(format!("module snapshot failed: {}", e)))?;

        let mut modules = Vec::new();
        let mut entry = MODULEENTRY32W {
            dwSize: size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        // SAFETY: `entry.dwSize` is initialised as the API requires.
        let mut more = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
        while more {
            modules.push(ModuleInfo {
                name: wide_to_string(&entry.szModule),
                base: entry.modBaseAddr as usize as u64,
                size: entry.modBaseSize as u64,
            });
            // SAFETY: same entry buffer, still correctly sized.
            more = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
        }

        // SAFETY: snapshot came from CreateToolhelp32Snapshot.
        unsafe {
            let _ = CloseHandle(snapshot);
        }

        modules.sort_by_key(|m| m.base);
        Ok(modules)
    }
}

pub fn find_pid_by_name(name: &str) -> Result<u32> {
    // SAFETY: snapshot handle is closed below on every path.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| Error::Platform(format!("process snapshot failed: {}", e)))?;

    let mut entry = PROCESSENTRY32W {
        dwSize: size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    let mut found = None;

    // SAFETY: `entry.dwSize` is initialised as the API requires.
    let mut more = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
    while more {
        if wide_to_string(&entry.szExeFile).eq_ignore_ascii_case(name) {
            found = Some(entry.th32ProcessID);
            break;
        }
        // SAFETY: same entry buffer, still correctly sized.
        more = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
    }

    // SAFETY: snapshot came from CreateToolhelp32Snapshot.
    unsafe {
        let _ = CloseHandle(snapshot);
    }

    found.ok_or_else(|| Error::ProcessNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_from_flags() {
        let rw = protection_from(PAGE_READWRITE.0);
        assert!(rw.read && rw.write && !rw.execute);

        let rx = protection_from(PAGE_EXECUTE_READ.0);
        assert!(rx.read && !rx.write && rx.execute);

        let guarded = protection_from(PAGE_READWRITE.0 | PAGE_GUARD.0);
        assert_eq!(guarded, Protection::NONE);
    }

    #[test]
    fn test_wide_to_string_stops_at_nul() {
        let wide: Vec<u16> = "game.exe\0junk".encode_utf16().collect();
        assert_eq!(wide_to_string(&wide), "game.exe");
    }
}
