use std::ops::Range;

/// Number of entries each history buffer keeps
pub const LAST_COUNT: usize = 5;

/// Fixed-capacity ring of addresses. `cursor` is the next slot to write and
/// therefore also the oldest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBuffer<const N: usize> {
    entries: [u64; N],
    cursor: usize,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self {
            entries: [0; N],
            cursor: 0,
        }
    }
}

impl<const N: usize> RingBuffer<N> {
    pub fn push(&mut self, addr: u64) {
        self.entries[self.cursor] = addr;
        self.cursor = (self.cursor + 1) % N;
    }

    /// All `N` slots, oldest first. Slots never written read as zero.
    pub fn oldest_first(&self) -> Vec<u64> {
        (0..N).map(|i| self.entries[(self.cursor + i) % N]).collect()
    }
}

/// Recent instructions and call targets inside the target module
#[derive(Debug, Default, Clone)]
pub struct History {
    module: Option<Range<u64>>,
    pub calls: RingBuffer<LAST_COUNT>,
    pub insns: RingBuffer<LAST_COUNT>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_module(&mut self, module: Range<u64>) {
        self.module = Some(module);
    }

    pub fn module(&self) -> Option<&Range<u64>> {
        self.module.as_ref()
    }

    /// Whether `pc` is inside the target module. Nothing qualifies until the
    /// module has been seen.
    pub fn in_module(&self, pc: u64) -> bool {
        self.module.as_ref().map_or(false, |m| m.contains(&pc))
    }

    pub fn record_insn(&mut self, pc: u64) {
        if self.in_module(pc) {
            self.insns.push(pc);
        }
    }

    pub fn record_call(&mut self, pc: u64, target: u64) {
        if self.in_module(pc) {
            self.calls.push(target);
        }
    }
}
