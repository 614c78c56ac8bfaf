use std::fmt::{Display, Formatter, Result as DisplayResult};

/// A mapped region of the recorded process along with its contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    pub start: u64,
    pub end: u64,
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub pathname: String,
    data: Vec<u8>,
}

impl Display for MemoryMap {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        write!(
            f,
            "{:016x}-{:016x} {}{}{} {}",
            self.start,
            self.end,
            if self.read { "R" } else { "-" },
            if self.write { "W" } else { "-" },
            if self.execute { "X" } else { "-" },
            self.pathname
        )
    }
}

impl MemoryMap {
    /// A region of `size` bytes (at least `data.len()`), zero filled past
    /// `data`. `perms` is in `/proc/<pid>/maps` style, e.g. `r-x`.
    pub fn new(start: u64, size: u64, perms: &str, data: Vec<u8>, pathname: String) -> Self {
        let size = size.max(data.len() as u64);
        let mut data = data;
        data.resize(size as usize, 0);
        Self {
            start,
            end: start.wrapping_add(size),
            read: perms.contains('r'),
            write: perms.contains('w'),
            execute: perms.contains('x'),
            pathname,
            data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Copy out as much of `buf` as the region holds from `addr`
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> usize {
        if !self.contains(addr) {
            return 0;
        }
        let offset = (addr - self.start) as usize;
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    /// Writes ignore permissions: they stand for the process or the tracer
    /// changing memory, not for an access to check
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> usize {
        if !self.contains(addr) {
            return 0;
        }
        let offset = (addr - self.start) as usize;
        let n = bytes.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
        n
    }
}

/// The region containing `addr`
pub fn find_map(maps: &[MemoryMap], addr: u64) -> Option<&MemoryMap> {
    maps.iter().find(|m| m.contains(addr))
}
