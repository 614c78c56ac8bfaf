//! The analysis session: one per traced process, created at attach and
//! finished at exit. Every substrate callback lands here.

use log::{debug, error, info, warn};
use std::fs::File;
use std::io::Write;
use uuid::Uuid;

use crate::decode::{Decoder, MAX_INSN_LEN};
use crate::error::{Error, Result};
use crate::exception::{ExceptionCode, ExceptionContext};
use crate::history::History;
use crate::hooks::{self, HookCall, HookKind, HookTable, PF_FASTFAIL_AVAILABLE};
use crate::instruction::{Idiom, Instruction, Target};
use crate::operand::Operand;
use crate::propagate::propagate;
use crate::regs::Registers;
use crate::replay::Coordinator;
use crate::report::{CrashReport, RunSummary};
use crate::substrate::Substrate;
use crate::taint::TaintStore;
use crate::targets::Targets;
use crate::triage::{triage, Facts};

/// Everything decided before the session starts
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub targets: Targets,
    /// Track taint per instruction. Without it only targeted calls are
    /// handled.
    pub taint: bool,
    /// Hook registry reads as well
    pub registry: bool,
    /// Name of the target module, when it is not the `.exe`
    pub app_name: Option<String>,
}

pub struct Session<W: Write> {
    config: Config,
    store: TaintStore,
    history: History,
    decoder: Decoder,
    coordinator: Coordinator,
    hooks: HookTable,
    output: W,
    crashed: bool,
    finished: bool,
}

impl<W: Write> Session<W> {
    pub fn new(config: Config, coordinator: Coordinator, output: W) -> Self {
        Self {
            config,
            store: TaintStore::new(),
            history: History::new(),
            decoder: Decoder::new(),
            coordinator,
            hooks: HookTable::new(),
            output,
            crashed: false,
            finished: false,
        }
    }

    pub fn store(&self) -> &TaintStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TaintStore {
        &mut self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn targets(&self) -> &Targets {
        &self.config.targets
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    pub fn crashed(&self) -> bool {
        self.crashed
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.coordinator.run_id()
    }

    /// Announce the process to the replay server
    pub fn attach(&mut self, substrate: &dyn Substrate) -> Result<()> {
        self.coordinator.register(substrate.pid(), self.config.taint)
    }

    fn is_app_module(&self, name: &str) -> bool {
        let name = hooks::base_name(name);
        match &self.config.app_name {
            Some(app) => app.eq_ignore_ascii_case(name),
            None => name.to_ascii_lowercase().ends_with(".exe"),
        }
    }

    pub fn on_module_load(&mut self, substrate: &mut dyn Substrate, name: &str, base: u64, size: u64) {
        if self.is_app_module(name) {
            debug!("Target module {} at 0x{:x}-0x{:x}", name, base, base.wrapping_add(size));
            self.history.set_module(base..base.wrapping_add(size));
        }

        let planned = hooks::plan(name, &self.config.targets, self.config.registry);
        if !planned.is_empty() {
            let count = self.hooks.install_all(substrate, name, &planned);
            info!("Installed {}/{} hooks in {}", count, planned.len(), name);
        }
    }

    /// Decode the instruction at `addr`, `None` if it cannot be read or is
    /// not valid
    pub fn decode_at(&self, substrate: &dyn Substrate, addr: u64) -> Option<Instruction> {
        let mut bytes = [0u8; MAX_INSN_LEN];
        let n = substrate.read_memory(addr, &mut bytes);
        if n == 0 {
            debug!("Cannot read instruction bytes at 0x{:x}", addr);
            return None;
        }
        self.decoder.decode(addr, &bytes[..n])
    }

    /// Before-instruction callback
    pub fn exec(&mut self, substrate: &dyn Substrate, pc: u64) -> Option<Idiom> {
        if !self.config.taint || self.crashed {
            return None;
        }
        if self.store.is_empty() && !self.history.in_module(pc) {
            return None;
        }

        self.history.record_insn(pc);
        let instr = self.decode_at(substrate, pc)?;
        let regs = substrate.registers();
        self.exec_decoded(&instr, &regs)
    }

    /// Account for a decoded instruction about to execute with `regs`.
    /// Returns the propagation rule applied, if any.
    fn exec_decoded(&mut self, instr: &Instruction, regs: &Registers) -> Option<Idiom> {
        if let (true, Some(Target::Indirect(Operand::Mem(mem)))) = (instr.is_call(), &instr.target) {
            self.history.record_call(instr.addr, mem.address(regs));
        }

        if self.store.is_empty() {
            return None;
        }
        Some(propagate(&mut self.store, instr, regs))
    }

    /// Pre-call hook. Returns a value to return in place of calling the
    /// function at all.
    pub fn on_pre_call(
        &mut self,
        substrate: &mut dyn Substrate,
        call: &HookCall,
        exception: Option<&ExceptionContext>,
    ) -> Result<Option<u64>> {
        match self.hooks.kind(&call.function) {
            Some(HookKind::FastFailMitigation) => {
                let feature = call.args.first().copied().unwrap_or(0);
                Ok(self.on_feature_query(feature).map(u64::from))
            }
            Some(HookKind::ExceptionFilter) => {
                info!("{} called, triaging", call.function);
                let ctx = match exception {
                    Some(ctx) => ctx.clone(),
                    None => {
                        let regs = substrate.registers();
                        ExceptionContext::new(
                            ExceptionCode::StackBufferOverrun.raw(),
                            regs.rip,
                            regs,
                        )
                    }
                };
                self.on_exception(substrate, &ctx)?;
                Ok(Some(0))
            }
            _ => Ok(None),
        }
    }

    /// Answer for `IsProcessorFeaturePresent`. Fast-fail is reported as
    /// unavailable so it raises a regular exception.
    pub fn on_feature_query(&self, feature: u64) -> Option<bool> {
        if feature == PF_FASTFAIL_AVAILABLE {
            debug!("Denying PF_FASTFAIL_AVAILABLE");
            Some(false)
        } else {
            None
        }
    }

    /// Post-call hook for a wrapped input function
    pub fn on_post_call(&mut self, substrate: &mut dyn Substrate, call: &HookCall) {
        let kind = match self.hooks.kind(&call.function) {
            Some(kind @ (HookKind::Read | HookKind::MapView)) => kind,
            _ => return,
        };

        let targeted = self.config.targets.on_call(&call.function);
        if !targeted {
            return;
        }

        // an empty read still consumes a replay slot
        match kind.buffer(call, substrate) {
            Some((buffer, size)) => {
                debug!("{} is targeted, buffer 0x{:x}+0x{:x}", call.function, buffer, size);
                self.coordinator
                    .on_targeted_call(&mut self.store, substrate, buffer, size);
            }
            None => debug!("{} returned no buffer", call.function),
        }
    }

    /// Exception callback. Triages the fault, emits the report and
    /// terminates the process.
    pub fn on_exception(
        &mut self,
        substrate: &mut dyn Substrate,
        ctx: &ExceptionContext,
    ) -> Result<Option<CrashReport>> {
        if self.crashed {
            return Ok(None);
        }

        let instr = self.decode_at(substrate, ctx.address);
        let facts = Facts::gather(
            ctx.code(),
            substrate.is_readable(ctx.address),
            instr.as_ref(),
            &self.store,
            &ctx.regs,
        );
        let verdict = triage(&facts);
        info!(
            "{} at 0x{:x} in thread {}: {} ({})",
            ctx.code(),
            ctx.address,
            ctx.thread_id,
            verdict.reason,
            verdict.score
        );

        let report = CrashReport::build(
            verdict,
            &facts,
            ctx,
            instr.as_ref().map(|i| i.text.as_str()),
            &self.store,
            &self.history,
            self.run_id(),
        );
        self.crashed = true;

        self.emit(&report)?;
        if self.coordinator.is_replaying() {
            self.persist(substrate, ctx, &report)?;
        }

        substrate.exit_process(1);
        Ok(Some(report))
    }

    fn persist(
        &mut self,
        substrate: &mut dyn Substrate,
        ctx: &ExceptionContext,
        report: &CrashReport,
    ) -> Result<()> {
        let paths = self.coordinator.crash_paths(substrate.pid())?;

        let mut file = File::create(&paths.crash_path).map_err(|source| Error::Persist {
            path: paths.crash_path.clone(),
            source,
        })?;
        serde_json::to_writer(&mut file, report)?;
        file.flush().map_err(|source| Error::Persist {
            path: paths.crash_path.clone(),
            source,
        })?;
        info!("Crash written to {}", paths.crash_path.display());

        if let Err(e) = substrate.dump_memory(&paths.mem_dump_path, ctx) {
            warn!(
                "Failed to dump memory to {}: {}",
                paths.mem_dump_path.display(),
                e
            );
        }
        Ok(())
    }

    fn emit<T: serde::Serialize>(&mut self, doc: &T) -> Result<()> {
        serde_json::to_writer(&mut self.output, doc)?;
        self.output.write_all(b"\n")?;
        self.output.flush()?;
        Ok(())
    }

    /// Detach/exit. Emits the run summary once.
    pub fn finish(&mut self) -> Result<Option<RunSummary>> {
        if self.finished {
            return Ok(None);
        }
        self.finished = true;

        let summary = RunSummary::new(self.crashed, self.run_id());
        if let Err(e) = self.emit(&summary) {
            error!("Failed to write run summary: {}", e);
            return Err(e);
        }
        Ok(Some(summary))
    }
}
