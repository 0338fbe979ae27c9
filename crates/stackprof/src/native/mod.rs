//! [`Host`] implementation for the current Rust process.

pub mod maps;
pub mod symbols;
pub mod walker;

pub(crate) use walker::interrupted_origin;

use crate::error::Result;
use crate::frame::FrameId;
use crate::host::{FrameInfo, Host, TagLookup, WalkOrigin};
use crate::tag;
use symbols::SymbolIndex;

/// Samples the running executable through frame pointers
pub struct NativeHost {
    symbols: SymbolIndex,
}

impl NativeHost {
    /// Load symbols for the running executable
    pub fn new() -> Result<Self> {
        Ok(Self::with_symbols(SymbolIndex::for_current_exe()?))
    }

    pub fn with_symbols(symbols: SymbolIndex) -> Self {
        NativeHost { symbols }
    }

    pub fn symbols(&self) -> &SymbolIndex {
        &self.symbols
    }
}

impl Host for NativeHost {
    fn walk_stack(&self, origin: WalkOrigin, frames: &mut [FrameId], lines: &mut [u32]) -> usize {
        let capacity = frames.len().min(lines.len());
        if capacity == 0 {
            return 0;
        }
        let mut depth = 0;
        let mut in_profiler = true;

        walker::walk(origin, |pc, exact| {
            // Return addresses point past the call
            let pc = if exact { pc } else { pc.saturating_sub(1) };
            let info = self.symbols.lookup(pc);
            if in_profiler && info.internal {
                return true;
            }
            in_profiler = false;

            frames[depth] = info.frame;
            lines[depth] = info.line;
            depth += 1;
            depth < capacity
        });
        depth
    }

    fn describe(&self, frame: FrameId) -> FrameInfo {
        self.symbols.describe(frame)
    }

    fn read_tag(&self, key: &str, out: &mut [u8]) -> TagLookup {
        tag::read(key, out)
    }

    fn prepare_thread(&self) {
        walker::register_current_thread();
    }
}
