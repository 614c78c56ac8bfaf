//! Functions the session wraps and the modules they are expected in.

use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::substrate::Substrate;
use crate::targets::Targets;

/// `IsProcessorFeaturePresent` feature number for fast-fail support
pub const PF_FASTFAIL_AVAILABLE: u64 = 23;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Fills a caller-supplied buffer with input
    Read,
    /// Returns a view of a mapping, sized by the request or the region
    MapView,
    /// Crash-reporting path that should go to triage instead
    ExceptionFilter,
    /// Feature query that must deny fast-fail so it raises an exception
    FastFailMitigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSpec {
    pub function: &'static str,
    pub modules: &'static [&'static str],
    pub kind: HookKind,
    /// Only hooked when registry reads are tracked
    pub registry: bool,
}

const fn read(function: &'static str, modules: &'static [&'static str]) -> HookSpec {
    HookSpec {
        function,
        modules,
        kind: HookKind::Read,
        registry: false,
    }
}

const KERNEL: &[&str] = &["kernel32.dll", "kernelbase.dll"];
const ADVAPI: &[&str] = &["advapi32.dll", "kernelbase.dll"];
const CRT: &[&str] = &["ucrtbase.dll", "msvcrt.dll"];
const WINHTTP: &[&str] = &["winhttp.dll"];

/// Input primitives that can be targeted
pub static READ_HOOKS: &[HookSpec] = &[
    read("ReadFile", KERNEL),
    read("InternetReadFile", &["wininet.dll"]),
    read("ReadEventLogA", ADVAPI),
    read("ReadEventLogW", ADVAPI),
    read("WinHttpWebSocketReceive", WINHTTP),
    read("WinHttpReadData", WINHTTP),
    read("recv", &["ws2_32.dll"]),
    read("fread_s", CRT),
    read("fread", CRT),
    read("_read", CRT),
    HookSpec {
        function: "MapViewOfFile",
        modules: KERNEL,
        kind: HookKind::MapView,
        registry: false,
    },
    HookSpec {
        function: "RegQueryValueExA",
        modules: ADVAPI,
        kind: HookKind::Read,
        registry: true,
    },
    HookSpec {
        function: "RegQueryValueExW",
        modules: ADVAPI,
        kind: HookKind::Read,
        registry: true,
    },
];

/// Always installed when their module loads
pub static MITIGATION_HOOKS: &[HookSpec] = &[
    HookSpec {
        function: "IsProcessorFeaturePresent",
        modules: &["kernelbase.dll"],
        kind: HookKind::FastFailMitigation,
        registry: false,
    },
    HookSpec {
        function: "UnhandledExceptionFilter",
        modules: &["kernelbase.dll"],
        kind: HookKind::ExceptionFilter,
        registry: false,
    },
    HookSpec {
        function: "VerifierStopMessage",
        modules: &["verifier.dll"],
        kind: HookKind::ExceptionFilter,
        registry: false,
    },
    HookSpec {
        function: "VerifierStopMessageEx",
        modules: &["verifier.dll"],
        kind: HookKind::ExceptionFilter,
        registry: false,
    },
];

impl HookSpec {
    pub fn expected_in(&self, module: &str) -> bool {
        let module = base_name(module);
        self.modules.iter().any(|m| m.eq_ignore_ascii_case(module))
    }
}

/// `C:\Windows\System32\KERNEL32.DLL` -> `KERNEL32.DLL`
pub fn base_name(module: &str) -> &str {
    module.rsplit(|c: char| c == '\\' || c == '/').next().unwrap_or(module)
}

/// Hooks to install when `module` loads
pub fn plan(module: &str, targets: &Targets, registry: bool) -> Vec<&'static HookSpec> {
    READ_HOOKS
        .iter()
        .filter(|spec| registry || !spec.registry)
        .filter(|spec| targets.is_selected(spec.function))
        .chain(MITIGATION_HOOKS.iter())
        .filter(|spec| spec.expected_in(module))
        .collect()
}

/// A completed (or about to be made) call to a wrapped function, with the
/// values the wrapper extracted from its arguments
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HookCall {
    pub function: String,
    #[serde(default)]
    pub args: Vec<u64>,
    /// Destination buffer
    #[serde(default)]
    pub buffer: u64,
    /// Bytes produced, or bytes requested for a mapping
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub ret: u64,
}

impl HookKind {
    /// The buffer a completed call filled, if any
    pub fn buffer(&self, call: &HookCall, substrate: &dyn Substrate) -> Option<(u64, u64)> {
        match self {
            HookKind::Read => Some((call.buffer, call.size)),
            HookKind::MapView => {
                if call.ret == 0 {
                    return None;
                }
                let size = match call.size {
                    0 => substrate.region_size(call.ret)?,
                    size => size,
                };
                Some((call.ret, size))
            }
            HookKind::ExceptionFilter | HookKind::FastFailMitigation => None,
        }
    }
}

/// What has been wrapped so far
#[derive(Debug, Default, Clone)]
pub struct HookTable {
    installed: HashMap<String, HookKind>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, function: &str) -> Option<HookKind> {
        self.installed.get(function).copied()
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    /// Wrap `spec.function` in `module`. Fails when the function is already
    /// wrapped or cannot be found.
    pub fn install(
        &mut self,
        substrate: &mut dyn Substrate,
        module: &str,
        spec: &HookSpec,
    ) -> Result<()> {
        if self.installed.contains_key(spec.function) {
            return Err(Error::Hook {
                function: spec.function.to_string(),
                reason: "already wrapped".to_string(),
            });
        }

        let addr = substrate
            .proc_address(module, spec.function)
            .ok_or_else(|| Error::Hook {
                function: spec.function.to_string(),
                reason: format!("not found in {}", module),
            })?;

        substrate.wrap(module, spec.function, addr)?;
        self.installed.insert(spec.function.to_string(), spec.kind);
        debug!("Wrapped {}!{} at 0x{:x}", module, spec.function, addr);
        Ok(())
    }

    /// Install everything `plan` asks for. Failures are logged and skipped.
    pub fn install_all(
        &mut self,
        substrate: &mut dyn Substrate,
        module: &str,
        specs: &[&HookSpec],
    ) -> usize {
        let mut count = 0;
        for spec in specs {
            match self.install(substrate, module, spec) {
                Ok(()) => count += 1,
                Err(e) => warn!("{}", e),
            }
        }
        count
    }
}
