//! Linux backend using `process_vm_readv`/`process_vm_writev` and procfs.

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

use super::{ModuleInfo, PointerWidth, ProcessBackend};
use crate::error::{Error, Result};
use crate::memory::{MemoryRegion, Protection};

pub struct LinuxProcess {
    pid: i32,
    width: PointerWidth,
}

impl LinuxProcess {
    pub fn open(pid: u32) -> Result<Self> {
        let proc_dir = format!("/proc/{}", pid);
        if pid == 0 || !Path::new(&proc_dir).exists() {
            return Err(Error::ProcessNotFound(format!("pid {}", pid)));
        }

        let process = Self {
            pid: pid as i32,
            width: detect_width(pid),
        };

        // Read one byte so permission problems show up on attach
        // instead of on the first scan.
        let regions = process.regions()?;
        if let Some(region) = regions.iter().find(|r| r.protection.read) {
            let mut first_byte = [0u8; 1];
            match process.read_into(region.base, &mut first_byte) {
                Ok(()) | Err(Error::AccessViolation { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(process)
    }

    fn map_errno(&self, address: u64, size: usize) -> Error {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EPERM) => Error::AccessDenied(format!("pid {}: {}", self.pid, err)),
            Some(libc::ESRCH) => Error::ProcessGone,
            _ => Error::AccessViolation { address, size },
        }
    }
}

/// Read the ELF class byte of the target executable; fall back to the
/// host width when the link is unreadable.
fn detect_width(pid: u32) -> PointerWidth {
    let host = if cfg!(target_pointer_width = "64") {
        PointerWidth::Bits64
    } else {
        PointerWidth::Bits32
    };

    let mut ident = [0u8; 5];
    let header = fs::File::open(format!("/proc/{}/exe", pid))
        .and_then(|mut file| file.read_exact(&mut ident));

    match header {
        Ok(()) if ident[..4] == *b"\x7fELF" => match ident[4] {
            1 => PointerWidth::Bits32,
            2 => PointerWidth::Bits64,
            _ => host,
        },
        Ok(()) => host,
        Err(e) => {
            debug!("Could not read ELF header of pid {}: {}", pid, e);
            host
        }
    }
}

impl ProcessBackend for LinuxProcess {
    fn pid(&self) -> u32 {
        self.pid as u32
    }

    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn is_alive(&self) -> bool {
        // SAFETY: signal 0 performs permission and existence checks only.
        let rc = unsafe { libc::kill(self.pid, 0) };
        if rc != 0 && io::Error::last_os_error().raw_os_error() != Some(libc::EPERM) {
            return false;
        }

        // Zombies still answer kill(0) but have no address space.
        match fs::read_to_string(format!("/proc/{}/stat", self.pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(true),
            Err(_) => false,
        }
    }

    fn read_into(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: address as usize as *mut c_void,
            iov_len: buf.len(),
        };
        // SAFETY: `local` covers exactly `buf`, which outlives the call; the
        // remote iovec is only interpreted by the kernel against the target.
        let n = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
        if n < 0 {
            return Err(self.map_errno(address, buf.len()));
        }
        if n as usize != buf.len() {
            return Err(Error::AccessViolation {
                address,
                size: buf.len(),
            });
        }
        Ok(())
    }

    fn write_from(&self, address: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let local = libc::iovec {
            iov_base: data.as_ptr() as *mut c_void,
            iov_len: data.len(),
        };
        let remote = libc::iovec {
            iov_base: address as usize as *mut c_void,
            iov_len: data.len(),
        };
        // SAFETY: the kernel only reads from `local`, which covers `data`.
        let n = unsafe { libc::process_vm_writev(self.pid, &local, 1, &remote, 1, 0) };
        if n < 0 {
            return Err(self.map_errno(address, data.len()));
        }
        if n as usize != data.len() {
            return Err(Error::AccessViolation {
                address,
                size: data.len(),
            });
        }
        Ok(())
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let maps = read_maps(self.pid)?;
        let mut regions: Vec<MemoryRegion> = maps
            .into_iter()
            .filter(|m| m.path.as_deref() != Some("[vsyscall]"))
            .map(|m| MemoryRegion {
                base: m.start,
                size: m.end - m.start,
                protection: m.protection,
            })
            .collect();
        regions.sort_by_key(|r| r.base);
        Ok(regions)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        let mut images: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for map in read_maps(self.pid)? {
            let Some(path) = map.path else { continue };
            if !path.starts_with('/') {
                continue;
            }
            let entry = images.entry(path).or_insert((map.start, map.end));
            entry.0 = entry.0.min(map.start);
            entry.1 = entry.1.max(map.end);
        }

        let mut modules: Vec<ModuleInfo> = images
            .into_iter()
            .map(|(path, (start, end))| ModuleInfo {
                name: Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(path),
                base: start,
                size: end - start,
            })
            .collect();
        modules.sort_by_key(|m| m.base);
        Ok(modules)
    }
}

struct MapsLine {
    start: u64,
    end: u64,
    protection: Protection,
    path: Option<String>,
}

fn read_maps(pid: i32) -> Result<Vec<MapsLine>> {
    let content = match fs::read_to_string(format!("/proc/{}/maps", pid)) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::ProcessGone),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(Error::AccessDenied(format!("pid {}: {}", pid, e)));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(content.lines().filter_map(parse_maps_line).collect())
}

/// Parse "start-end perms offset dev inode [path]". The path is the rest
/// of the line and may contain spaces.
fn parse_maps_line(line: &str) -> Option<MapsLine> {
    let mut fields = [""; 5];
    let mut rest = line;
    for field in &mut fields {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        *field = &rest[..end];
        rest = &rest[end..];
    }
    let [range, perms, ..] = fields;
    let (start, end) = range.split_once('-')?;
    let perms = perms.as_bytes();
    let path = Some(rest.trim()).filter(|p| !p.is_empty()).map(str::to_string);

    Some(MapsLine {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        protection: Protection {
            read: perms.first() == Some(&b'r'),
            write: perms.get(1) == Some(&b'w'),
            execute: perms.get(2) == Some(&b'x'),
        },
        path,
    })
}

pub fn find_pid_by_name(name: &str) -> Result<u32> {
    for entry in fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };

        let comm = fs::read_to_string(entry.path().join("comm")).unwrap_or_default();
        let exe = fs::read_link(entry.path().join("exe"))
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        if comm.trim().eq_ignore_ascii_case(name) || exe.eq_ignore_ascii_case(name) {
            return Ok(pid);
        }
    }
    Err(Error::ProcessNotFound(name.to_string()))
}
