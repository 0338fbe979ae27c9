//! Address -> function and line lookup for the running executable.
//!
//! The index is built once, before sampling starts, and is immutable
//! afterwards. [`SymbolIndex::lookup`] only binary-searches sorted vectors, so
//! it is safe to call from a signal handler.

use super::maps::MemoryMaps;
use crate::error::{Error, Result};
use crate::frame::FrameId;
use crate::host::FrameInfo;
use gimli::{EndianSlice, RunTimeEndian};
use log::{debug, warn};
use object::{Object, ObjectSection, ObjectSymbol};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Functions whose frames sit between user code and the sampler itself
const INTERNAL_PREFIXES: &[&str] = &[
    "stackprof::profiler::",
    "stackprof::trigger::",
    "stackprof::buffer::",
    "stackprof::session::",
    "stackprof::native::walker::",
    "stackprof::native::NativeHost",
    "stackprof::timer::",
    "stackprof_alloc::",
    "__rust_alloc",
    "__rust_realloc",
    "__rdl_",
    "alloc::alloc::",
    "alloc::raw_vec::",
];

fn is_internal(name: &str) -> bool {
    let name = name.trim_start_matches('<');
    INTERNAL_PREFIXES.iter().any(|p| name.starts_with(p))
}

#[derive(Debug, Clone)]
struct FunctionSymbol {
    start: u64,
    end: u64,
    name: String,
    internal: bool,
}

#[derive(Debug, Clone, Copy)]
struct LineRange {
    start: u64,
    end: u64,
    file: u32,
    line: u32,
}

/// What a program counter resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcInfo {
    pub frame: FrameId,
    pub line: u32,
    /// Part of the sampling machinery rather than profiled code
    pub internal: bool,
}

pub struct SymbolIndex {
    functions: Vec<FunctionSymbol>,
    ranges: Vec<LineRange>,
    files: Vec<String>,
    aslr_offset: u64,
}

impl SymbolIndex {
    /// Index the running executable
    pub fn for_current_exe() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let aslr_offset = MemoryMaps::for_self()?.aslr_offset(&exe);
        debug!("Loading symbols from {} (bias 0x{:x})", exe.display(), aslr_offset);
        Self::from_elf(&exe, aslr_offset)
    }

    /// Index an ELF file loaded with the given bias
    pub fn from_elf(path: &Path, aslr_offset: u64) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and dropped before returning
        let mmap = unsafe { memmap2::Mmap::map(&file) }?;
        let object = object::File::parse(&*mmap)
            .map_err(|e| Error::SymbolResolution(format!("Failed to parse ELF: {}", e)))?;

        let functions = parse_functions(&object);
        let has_dwarf = object.section_by_name(".debug_info").is_some();
        if functions.is_empty() && !has_dwarf {
            return Err(Error::MissingDebugInfo {
                path: path.display().to_string(),
            });
        }

        let lines = if has_dwarf {
            parse_line_info(&object).unwrap_or_else(|e| {
                warn!("Ignoring line info in {}: {}", path.display(), e);
                Vec::new()
            })
        } else {
            warn!(
                "No DWARF line info in {}; frames will have no line numbers",
                path.display()
            );
            Vec::new()
        };

        Ok(Self::from_parts(functions, lines, aslr_offset))
    }

    /// Build from `(start, end, mangled or plain name)` functions and
    /// `(start, end, file, line)` line ranges, in link-time addresses.
    pub fn from_parts(
        functions: Vec<(u64, u64, String)>,
        lines: Vec<(u64, u64, String, u32)>,
        aslr_offset: u64,
    ) -> Self {
        let mut functions: Vec<FunctionSymbol> = functions
            .into_iter()
            .map(|(start, end, name)| {
                let name = format!("{:#}", rustc_demangle::demangle(&name));
                FunctionSymbol {
                    start,
                    end,
                    internal: is_internal(&name),
                    name,
                }
            })
            .collect();
        functions.sort_by_key(|f| (f.start, std::cmp::Reverse(f.end)));
        functions.dedup_by_key(|f| f.start);

        // Zero-sized symbols extend to the next one
        for i in 0..functions.len() {
            if functions[i].end <= functions[i].start {
                functions[i].end = functions
                    .get(i + 1)
                    .map_or(functions[i].start + 1, |next| next.start);
            }
        }

        let mut file_ids: HashMap<String, u32> = HashMap::new();
        let mut files = Vec::new();
        let mut ranges: Vec<LineRange> = lines
            .into_iter()
            .map(|(start, end, file, line)| {
                let id = *file_ids.entry(file.clone()).or_insert_with(|| {
                    files.push(file);
                    (files.len() - 1) as u32
                });
                LineRange {
                    start,
                    end,
                    file: id,
                    line,
                }
            })
            .collect();
        ranges.sort_by_key(|r| r.start);

        SymbolIndex {
            functions,
            ranges,
            files,
            aslr_offset,
        }
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn aslr_offset(&self) -> u64 {
        self.aslr_offset
    }

    fn function_at(&self, addr: u64) -> Option<&FunctionSymbol> {
        let idx = self.functions.partition_point(|f| f.start <= addr);
        let f = self.functions.get(idx.checked_sub(1)?)?;
        (addr < f.end).then_some(f)
    }

    fn range_at(&self, addr: u64) -> Option<&LineRange> {
        self.ranges
            .binary_search_by(|r| {
                if addr < r.start {
                    Ordering::Greater
                } else if addr >= r.end {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|idx| &self.ranges[idx])
    }

    /// Resolve a runtime address. Allocation-free.
    ///
    /// Unknown addresses become their own frame identity.
    pub fn lookup(&self, pc: u64) -> PcInfo {
        let addr = pc.wrapping_sub(self.aslr_offset);
        let line = self.range_at(addr).map_or(0, |r| r.line);
        match self.function_at(addr) {
            Some(f) => PcInfo {
                frame: frame_for(f.start),
                line,
                internal: f.internal,
            },
            None => PcInfo {
                frame: frame_for(pc),
                line,
                internal: false,
            },
        }
    }

    /// Name a frame identity produced by [`lookup`](Self::lookup)
    pub fn describe(&self, frame: FrameId) -> FrameInfo {
        let addr = frame.get();
        match self.functions.binary_search_by_key(&addr, |f| f.start) {
            Ok(idx) => {
                let f = &self.functions[idx];
                let range = self.range_at(f.start);
                FrameInfo {
                    name: f.name.clone(),
                    file: range
                        .and_then(|r| self.files.get(r.file as usize))
                        .map_or_else(|| "<unknown>".to_string(), |p| simplify_path(p)),
                    line: range.map(|r| r.line).filter(|l| *l > 0),
                }
            }
            Err(_) => FrameInfo::unknown(frame),
        }
    }
}

/// Frame identities stay clear of the reserved synthetic range
fn frame_for(addr: u64) -> FrameId {
    FrameId::new(addr.max(FrameId::SWEEPING.get() + 1))
}

fn parse_functions(object: &object::File<'_>) -> Vec<(u64, u64, String)> {
    object
        .symbols()
        .filter(|s| s.kind() == object::SymbolKind::Text && s.address() != 0)
        .filter_map(|s| {
            let name = s.name().ok()?;
            Some((s.address(), s.address() + s.size(), name.to_string()))
        })
        .collect()
}

fn parse_line_info(object: &object::File<'_>) -> Result<Vec<(u64, u64, String, u32)>> {
    let endian = if object.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };
    let load_section = |name: &str| -> &[u8] {
        object
            .section_by_name(name)
            .and_then(|s| s.data().ok())
            .unwrap_or(&[])
    };

    let dwarf = gimli::Dwarf {
        debug_abbrev: gimli::DebugAbbrev::new(load_section(".debug_abbrev"), endian),
        debug_info: gimli::DebugInfo::new(load_section(".debug_info"), endian),
        debug_line: gimli::DebugLine::new(load_section(".debug_line"), endian),
        debug_str: gimli::DebugStr::new(load_section(".debug_str"), endian),
        debug_line_str: gimli::DebugLineStr::new(load_section(".debug_line_str"), endian),
        ..Default::default()
    };

    collect_line_ranges(&dwarf)
}

fn collect_line_ranges(
    dwarf: &gimli::Dwarf<EndianSlice<'_, RunTimeEndian>>,
) -> Result<Vec<(u64, u64, String, u32)>> {
    let mut ranges = Vec::new();
    let mut units = dwarf.units();

    while let Ok(Some(header)) = units.next() {
        let unit = dwarf
            .unit(header)
            .map_err(|e| Error::SymbolResolution(format!("Failed to parse unit: {}", e)))?;
        let Some(program) = unit.line_program.clone() else {
            continue;
        };

        let mut rows = program.rows();
        let mut prev: Option<(u64, String, u32)> = None;
        while let Ok(Some((header, row))) = rows.next_row() {
            let addr = row.address();
            let file = row
                .file(header)
                .map(|f| {
                    let mut path = String::new();
                    if let Some(dir) = f.directory(header)
                        && let Ok(dir) = dwarf.attr_string(&unit, dir)
                        && let Ok(dir) = dir.to_string()
                    {
                        path.push_str(dir);
                        if !path.ends_with('/') {
                            path.push('/');
                        }
                    }
                    if let Ok(name) = dwarf.attr_string(&unit, f.path_name())
                        && let Ok(name) = name.to_string()
                    {
                        path.push_str(name);
                    }
                    path
                })
                .unwrap_or_default();
            let line = row.line().map_or(0, |l| l.get() as u32);

            if let Some((prev_addr, prev_file, prev_line)) = prev.take()
                && addr > prev_addr
                && !prev_file.is_empty()
            {
                ranges.push((prev_addr, addr, prev_file, prev_line));
            }
            if !row.end_sequence() {
                prev = Some((addr, file, line));
            }
        }
    }
    Ok(ranges)
}

/// Shorten toolchain and registry paths for display
fn simplify_path(path: &str) -> String {
    let prefixes_to_strip = ["/rustc/", "/.cargo/registry/src/", "/.cargo/git/checkouts/"];

    let mut result = path;
    for prefix in &prefixes_to_strip {
        if let Some(idx) = result.find(prefix) {
            let after_prefix = &result[idx + prefix.len()..];
            if let Some(slash_idx) = after_prefix.find('/') {
                result = &after_prefix[slash_idx + 1..];
            }
        }
    }
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SymbolIndex {
        SymbolIndex::from_parts(
            vec![
                (0x1000, 0x1100, "_ZN4demo4main17h0123456789abcdefE".to_string()),
                (0x1100, 0x1100, "helper".to_string()),
                (0x1200, 0x1300, "stackprof::trigger::interrupt".to_string()),
            ],
            vec![
                (0x1000, 0x1010, "/home/me/demo/src/main.rs".to_string(), 3),
                (0x1010, 0x1080, "/home/me/demo/src/main.rs".to_string(), 4),
            ],
            0x5000_0000,
        )
    }

    #[test]
    fn test_lookup_applies_bias() {
        let index = index();
        let info = index.lookup(0x5000_1020);
        assert_eq!(info.frame, FrameId::new(0x1000));
        assert_eq!(info.line, 4);
        assert!(!info.internal);

        // Zero-sized symbol runs up to the next one
        assert_eq!(index.lookup(0x5000_1150).frame, FrameId::new(0x1100));
        assert!(index.lookup(0x5000_1250).internal);
    }

    #[test]
    fn test_unknown_address_is_its_own_frame() {
        let index = index();
        let info = index.lookup(0x9000_0000);
        assert_eq!(info.frame, FrameId::new(0x9000_0000));
        assert_eq!(info.line, 0);
        assert_eq!(index.describe(info.frame).file, "<unknown>");
    }

    #[test]
    fn test_describe_demangles() {
        let index = index();
        let info = index.describe(FrameId::new(0x1000));
        assert_eq!(info.name, "demo::main");
        assert_eq!(info.file, "/home/me/demo/src/main.rs");
        assert_eq!(info.line, Some(3));
    }

    #[test]
    fn test_simplify_path() {
        assert_eq!(
            simplify_path("/home/u/.cargo/registry/src/index.crates.io-6f17d22bba15001f/serde-1.0.0/src/lib.rs"),
            "serde-1.0.0/src/lib.rs"
        );
        assert_eq!(simplify_path("src/main.rs"), "src/main.rs");
    }

    #[test]
    fn test_current_exe_resolves_own_function() {
        let index = SymbolIndex::for_current_exe().unwrap();
        assert!(index.function_count() > 0);
        let here = test_current_exe_resolves_own_function as *const () as u64;
        let info = index.lookup(here);
        let described = index.describe(info.frame);
        assert!(
            described.name.contains("test_current_exe_resolves_own_function"),
            "resolved to {}",
            described.name
        );
    }
}
