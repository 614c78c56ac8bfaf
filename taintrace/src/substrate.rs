use std::path::Path;

use crate::error::Result;
use crate::exception::ExceptionContext;
use crate::regs::Registers;

/// What the engine needs from the instrumentation framework it runs under.
/// Callbacks flow the other way: the substrate drives a
/// [`Session`](crate::session::Session) and hands itself in.
pub trait Substrate {
    /// Register state of the instrumented thread before the current
    /// instruction executes
    fn registers(&self) -> Registers;

    /// Read up to `buf.len()` bytes at `addr`, returning how many were read
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> usize;

    /// Write `data` at `addr`, returning how many bytes were written
    fn write_memory(&mut self, addr: u64, data: &[u8]) -> usize;

    fn is_readable(&self, addr: u64) -> bool;

    /// Address of an exported function in a loaded module
    fn proc_address(&self, module: &str, function: &str) -> Option<u64>;

    /// Intercept calls to `function`, delivering pre- and post-call hooks
    fn wrap(&mut self, module: &str, function: &str, addr: u64) -> Result<()>;

    /// Size of the allocation containing `addr`
    fn region_size(&self, addr: u64) -> Option<u64>;

    fn pid(&self) -> u32;

    /// Write a full memory dump of the process as it was at `ctx`
    fn dump_memory(&mut self, path: &Path, ctx: &ExceptionContext) -> Result<()>;

    /// Terminate the target. Nothing is delivered afterwards.
    fn exit_process(&mut self, code: i32);
}
