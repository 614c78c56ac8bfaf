//! A substrate over a recorded execution.
//!
//! The log holds what a live instrumentation framework would have delivered:
//! module loads, memory contents, register snapshots before each instruction,
//! calls to interesting functions and the final exception or exit. Feeding
//! it through a [`Session`] triages the execution offline.

use log::{debug, info, warn};
use serde_derive::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{read, File};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::exception::ExceptionContext;
use crate::exports::get_exports;
use crate::hooks::base_name;
use crate::maps::{find_map, MemoryMap};
use crate::regs::Registers;
use crate::session::Session;
use crate::substrate::Substrate;
use crate::trace_entry::TraceEntry;

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub base: u64,
    pub size: u64,
    /// Export name to offset from `base`
    pub exports: HashMap<String, u64>,
}

#[derive(Serialize)]
struct DumpRegion<'a> {
    start: u64,
    end: u64,
    name: &'a str,
    data: &'a [u8],
}

#[derive(Serialize)]
struct MemoryDump<'a> {
    context: &'a ExceptionContext,
    regions: Vec<DumpRegion<'a>>,
}

/// Parse a JSON-lines trace log. Blank lines are skipped.
pub fn read_log<R: BufRead>(reader: R) -> Result<Vec<TraceEntry>> {
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }
    Ok(entries)
}

#[derive(Debug, Default)]
pub struct RecordedProcess {
    pid: u32,
    regs: Registers,
    maps: Vec<MemoryMap>,
    modules: Vec<Module>,
    wrapped: HashSet<String>,
    dumps: Vec<PathBuf>,
    exit_code: Option<i32>,
}

impl RecordedProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_wrapped(&self, function: &str) -> bool {
        self.wrapped.contains(function)
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn maps(&self) -> &[MemoryMap] {
        &self.maps
    }

    /// Memory dumps written so far
    pub fn dumps(&self) -> &[PathBuf] {
        &self.dumps
    }

    pub fn add_map(&mut self, map: MemoryMap) {
        debug!("Mapped {}", map);
        self.maps.push(map);
    }

    fn load_module(
        &mut self,
        name: String,
        base: u64,
        size: u64,
        mut exports: HashMap<String, u64>,
        path: Option<PathBuf>,
    ) {
        if let Some(path) = path {
            match read(&path)
                .map_err(Error::from)
                .and_then(|data| get_exports(&data))
            {
                Ok(image_exports) => {
                    for (export, offset) in image_exports {
                        exports.entry(export).or_insert(offset);
                    }
                }
                Err(e) => warn!("Failed to read exports of {}: {}", path.display(), e),
            }
        }

        self.modules.push(Module {
            name,
            base,
            size,
            exports,
        });
    }

    /// Deliver one recorded event to `session`
    pub fn apply<W: Write>(&mut self, session: &mut Session<W>, entry: TraceEntry) -> Result<()> {
        match entry {
            TraceEntry::ModuleLoad {
                name,
                base,
                size,
                exports,
                path,
            } => {
                self.load_module(name.clone(), base, size, exports, path);
                session.on_module_load(self, &name, base, size);
            }
            TraceEntry::Memory {
                start,
                size,
                perms,
                data,
                name,
            } => self.add_map(MemoryMap::new(start, size, &perms, data, name)),
            TraceEntry::Write { addr, data } => {
                if self.write_memory(addr, &data) < data.len() {
                    warn!("Write of {} bytes at 0x{:x} is not fully mapped", data.len(), addr);
                }
            }
            TraceEntry::Exec { pc, regs } => {
                if let Some(regs) = regs {
                    self.regs = regs;
                }
                self.regs.rip = pc;
                session.exec(&*self, pc);
            }
            TraceEntry::Call { call, exception } => {
                if !self.is_wrapped(&call.function) {
                    return Ok(());
                }
                let replaced = session.on_pre_call(self, &call, exception.as_ref())?;
                if replaced.is_none() && self.exit_code.is_none() {
                    session.on_post_call(self, &call);
                }
            }
            TraceEntry::Exception(ctx) => {
                self.regs = ctx.regs;
                session.on_exception(self, &ctx)?;
            }
            TraceEntry::Exit { code } => self.exit_code = Some(code),
        }
        Ok(())
    }

    /// Attach, deliver every event until the process exits, then finish the
    /// session
    pub fn run<W, I>(&mut self, session: &mut Session<W>, entries: I) -> Result<()>
    where
        W: Write,
        I: IntoIterator<Item = TraceEntry>,
    {
        session.attach(&*self)?;
        for entry in entries {
            if self.exit_code.is_some() {
                break;
            }
            self.apply(session, entry)?;
        }
        if let Some(code) = self.exit_code {
            info!("Process {} exited with {}", self.pid, code);
        }
        session.finish()?;
        Ok(())
    }
}

impl Substrate for RecordedProcess {
    fn registers(&self) -> Registers {
        self.regs
    }

    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> usize {
        find_map(&self.maps, addr).map_or(0, |m| m.read(addr, buf))
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> usize {
        match self.maps.iter_mut().find(|m| m.contains(addr)) {
            Some(map) => map.write(addr, data),
            None => 0,
        }
    }

    fn is_readable(&self, addr: u64) -> bool {
        find_map(&self.maps, addr).map_or(false, |m| m.read)
    }

    fn proc_address(&self, module: &str, function: &str) -> Option<u64> {
        let module = base_name(module);
        self.modules
            .iter()
            .filter(|m| base_name(&m.name).eq_ignore_ascii_case(module))
            .find_map(|m| m.exports.get(function).map(|off| m.base.wrapping_add(*off)))
    }

    fn wrap(&mut self, module: &str, function: &str, _addr: u64) -> Result<()> {
        if !self.wrapped.insert(function.to_string()) {
            return Err(Error::Hook {
                function: function.to_string(),
                reason: format!("already wrapped when {} loaded", module),
            });
        }
        Ok(())
    }

    fn region_size(&self, addr: u64) -> Option<u64> {
        find_map(&self.maps, addr).map(|m| m.end - addr)
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn dump_memory(&mut self, path: &Path, ctx: &ExceptionContext) -> Result<()> {
        let dump = MemoryDump {
            context: ctx,
            regions: self
                .maps
                .iter()
                .map(|m| DumpRegion {
                    start: m.start,
                    end: m.end,
                    name: &m.pathname,
                    data: m.data(),
                })
                .collect(),
        };
        let file = File::create(path).map_err(|source| Error::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer(file, &dump)?;
        self.dumps.push(path.to_path_buf());
        Ok(())
    }

    fn exit_process(&mut self, code: i32) {
        debug!("Terminating process {} with {}", self.pid, code);
        self.exit_code = Some(code);
    }
}
