use log::{debug, error, info};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::{CrashPaths, ReplayServer};
use crate::substrate::Substrate;
use crate::taint::TaintStore;

struct ReplayState {
    /// Zero-based index of the next targeted call
    index: u32,
    server: Option<Box<dyn ReplayServer>>,
}

/// Taints targeted buffers and, when replaying, substitutes the recorded
/// mutation for each targeted call in order
pub struct Coordinator {
    run_id: Option<Uuid>,
    mutate: bool,
    state: Mutex<ReplayState>,
}

impl Coordinator {
    /// Outside replay mode: buffers are only tainted
    pub fn new() -> Self {
        Self {
            run_id: None,
            mutate: false,
            state: Mutex::new(ReplayState {
                index: 0,
                server: None,
            }),
        }
    }

    pub fn replaying(run_id: Uuid, server: Box<dyn ReplayServer>, mutate: bool) -> Self {
        Self {
            run_id: Some(run_id),
            mutate,
            state: Mutex::new(ReplayState {
                index: 0,
                server: Some(server),
            }),
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn is_replaying(&self) -> bool {
        self.run_id.is_some()
    }

    fn lock(&self) -> MutexGuard<ReplayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn index(&self) -> u32 {
        self.lock().index
    }

    pub fn register(&self, pid: u32, tracing: bool) -> Result<()> {
        let run_id = match self.run_id {
            Some(run_id) => run_id,
            None => return Ok(()),
        };
        match self.lock().server.as_mut() {
            Some(server) => server.register_pid(run_id, pid, tracing),
            None => Ok(()),
        }
    }

    pub fn crash_paths(&self, pid: u32) -> Result<CrashPaths> {
        match self.lock().server.as_mut() {
            Some(server) => server.crash_paths(pid),
            None => Err(Error::Config("not replaying".to_string())),
        }
    }

    /// A targeted call finished and filled `size` bytes at `buffer`. Taint
    /// them, then in replay mode overwrite them with the recorded mutation.
    /// The index advances once per call whether or not bytes were
    /// substituted.
    pub fn on_targeted_call(
        &self,
        store: &mut TaintStore,
        substrate: &mut dyn Substrate,
        buffer: u64,
        size: u64,
    ) {
        let mut state = self.lock();

        store.mark_mem(buffer, size);
        debug!("Tainted 0x{:x} bytes at 0x{:x}", size, buffer);

        let run_id = match self.run_id {
            Some(run_id) => run_id,
            None => return,
        };

        let index = state.index;
        state.index += 1;

        if !self.mutate {
            return;
        }

        let server = match state.server.as_mut() {
            Some(server) => server,
            None => return,
        };

        match server.replay(run_id, index, size) {
            Ok(mut bytes) => {
                bytes.truncate(size as usize);
                let written = substrate.write_memory(buffer, &bytes);
                info!(
                    "Replayed mutation {} ({} bytes) into 0x{:x}",
                    index, written, buffer
                );
            }
            Err(e) => error!("Failed to fetch mutation {}: {}", index, e),
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
