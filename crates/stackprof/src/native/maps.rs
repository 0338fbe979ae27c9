use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// A parsed memory mapping from /proc/self/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    pub pathname: Option<String>,
}

impl MemoryMapping {
    pub fn is_executable(&self) -> bool {
        self.perms.contains('x')
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.start..self.end).contains(&addr)
    }
}

/// Memory mappings of the current process
pub struct MemoryMaps {
    mappings: Vec<MemoryMapping>,
}

impl MemoryMaps {
    pub fn for_self() -> Result<Self> {
        let content = fs::read_to_string("/proc/self/maps").map_err(|e| {
            Error::UnsupportedPlatform(format!("Cannot read /proc/self/maps: {}", e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        MemoryMaps {
            mappings: content.lines().filter_map(Self::parse_line).collect(),
        }
    }

    fn parse_line(line: &str) -> Option<MemoryMapping> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return None;
        }

        let (start, end) = parts[0].split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        let perms = parts[1].to_string();
        let offset = u64::from_str_radix(parts[2], 16).ok()?;

        // Pathname is the last field (if present) and may contain spaces
        let pathname = (parts.len() >= 6).then(|| parts[5..].join(" "));

        Some(MemoryMapping {
            start,
            end,
            perms,
            offset,
            pathname,
        })
    }

    /// Load bias of `exe_path`: runtime address minus link-time address.
    ///
    /// Uses the first mapping of the binary, whose file offset is the true
    /// load base. Non-PIE binaries have no mapping offset and get 0.
    pub fn aslr_offset(&self, exe_path: &Path) -> u64 {
        let exe = exe_path.to_string_lossy();
        let file_name = exe_path.file_name().and_then(|n| n.to_str());

        self.mappings
            .iter()
            .find(|m| match &m.pathname {
                Some(path) => {
                    path == exe.as_ref() || file_name.is_some_and(|name| path.ends_with(name))
                }
                None => false,
            })
            .map_or(0, |m| m.start - m.offset)
    }

    /// Mapping containing `addr`, if any
    pub fn find(&self, addr: u64) -> Option<&MemoryMapping> {
        self.mappings.iter().find(|m| m.contains(addr))
    }
}
