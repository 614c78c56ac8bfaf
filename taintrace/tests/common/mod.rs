#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use taintrace::error::{Error, Result};
use taintrace::exception::ExceptionContext;
use taintrace::regs::Registers;
use taintrace::server::{CrashPaths, ReplayServer, Request};
use taintrace::substrate::Substrate;
use uuid::Uuid;

/// In-memory substrate: sparse byte memory, one register snapshot, and every
/// function exported by every module at a fake address
#[derive(Debug, Default)]
pub struct MockSubstrate {
    pub regs: Registers,
    pub memory: HashMap<u64, u8>,
    pub unreadable: HashSet<u64>,
    pub missing: HashSet<String>,
    pub wrapped: Vec<(String, String)>,
    pub regions: HashMap<u64, u64>,
    pub dumps: Vec<PathBuf>,
    pub exits: Vec<i32>,
}

impl MockSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as u64, *b);
        }
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.memory.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }
}

impl Substrate for MockSubstrate {
    fn registers(&self) -> Registers {
        self.regs
    }

    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> usize {
        let mut n = 0;
        for (i, slot) in buf.iter_mut().enumerate() {
            match self.memory.get(&(addr + i as u64)) {
                Some(b) => *slot = *b,
                None => break,
            }
            n += 1;
        }
        n
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> usize {
        self.load(addr, data);
        data.len()
    }

    fn is_readable(&self, addr: u64) -> bool {
        !self.unreadable.contains(&addr)
    }

    fn proc_address(&self, _module: &str, function: &str) -> Option<u64> {
        if self.missing.contains(function) {
            None
        } else {
            Some(0x7ff0_0000_1000)
        }
    }

    fn wrap(&mut self, module: &str, function: &str, _addr: u64) -> Result<()> {
        self.wrapped.push((module.to_string(), function.to_string()));
        Ok(())
    }

    fn region_size(&self, addr: u64) -> Option<u64> {
        self.regions.get(&addr).copied()
    }

    fn pid(&self) -> u32 {
        4242
    }

    fn dump_memory(&mut self, path: &Path, _ctx: &ExceptionContext) -> Result<()> {
        self.dumps.push(path.to_path_buf());
        Ok(())
    }

    fn exit_process(&mut self, code: i32) {
        self.exits.push(code);
    }
}

/// Replay server answering from a table of mutations, logging requests
#[derive(Clone, Default)]
pub struct MockServer {
    pub requests: Arc<Mutex<Vec<Request>>>,
    pub mutations: HashMap<u32, Vec<u8>>,
    pub crash_paths: Option<CrashPaths>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl ReplayServer for MockServer {
    fn register_pid(&mut self, run_id: Uuid, pid: u32, tracing: bool) -> Result<()> {
        self.requests.lock().unwrap().push(Request::RegisterPid {
            run_id,
            pid,
            tracing,
        });
        Ok(())
    }

    fn crash_paths(&mut self, pid: u32) -> Result<CrashPaths> {
        self.requests
            .lock()
            .unwrap()
            .push(Request::CrashPaths { pid });
        self.crash_paths
            .clone()
            .ok_or_else(|| Error::Protocol("no crash paths".to_string()))
    }

    fn replay(&mut self, run_id: Uuid, index: u32, size: u64) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(Request::Replay {
            run_id,
            index,
            size,
        });
        self.mutations
            .get(&index)
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("no mutation {}", index)))
    }
}
