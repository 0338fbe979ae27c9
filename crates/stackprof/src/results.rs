//! The drained profile.

use crate::config::Mode;
use crate::frame::FrameId;
use crate::raw;
use crate::tags::TagSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format version of [`Results`]
pub const RESULTS_VERSION: f64 = 1.2;

/// One frame in the results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub name: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub total_samples: u64,
    /// Samples with this frame as the leaf
    pub samples: u64,
    /// Callee -> count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<BTreeMap<FrameId, u64>>,
    /// Line -> (total, leaf)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<BTreeMap<u32, (u64, u64)>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub version: f64,
    pub mode: Mode,
    /// Microseconds or allocation stride; absent in custom mode
    pub interval: Option<u64>,
    pub samples: u64,
    pub gc_samples: u64,
    pub missed_samples: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub frames: BTreeMap<FrameId, FrameReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_sample_timestamps: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_timestamp_deltas: Option<Vec<u64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_tags: Option<Vec<(TagSet, u64)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_strings: Option<Vec<String>>,
}

impl Results {
    /// First frame with the given name
    pub fn frame_named(&self, name: &str) -> Option<(FrameId, &FrameReport)> {
        self.frames
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, f)| (*id, f))
    }

    /// Sum of leaf counts, equal to `samples` for a complete session
    pub fn leaf_total(&self) -> u64 {
        self.frames.values().map(|f| f.samples).sum()
    }

    /// One innermost-first stack per sample, in capture order
    pub fn expand_raw(&self) -> Option<Vec<Vec<FrameId>>> {
        raw::expand(self.raw.as_deref()?)
    }

    /// Raw runs as `(frames outermost-first, repeat)`
    pub fn expand_raw_runs(&self) -> Option<Vec<(Vec<FrameId>, u64)>> {
        raw::decode_runs(self.raw.as_deref()?)
    }

    /// One tag mapping per sample, in capture order
    pub fn expand_tags(&self) -> Option<Vec<BTreeMap<String, String>>> {
        let sets = self.sample_tags.as_ref()?;
        let strings = self.tag_strings.as_deref().unwrap_or_default();
        let resolve = |id: &u64| strings.get(*id as usize).cloned();

        let mut out = Vec::new();
        for (set, repeat) in sets {
            let tags: BTreeMap<String, String> = set
                .iter()
                .filter_map(|(k, v)| Some((resolve(k)?, resolve(v)?)))
                .collect();
            for _ in 0..*repeat {
                out.push(tags.clone());
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_results() -> Results {
        let a = FrameId::new(0x1000);
        let b = FrameId::new(0x2000);
        let mut frames = BTreeMap::new();
        frames.insert(
            a,
            FrameReport {
                name: "a".into(),
                file: "src/a.rs".into(),
                line: Some(3),
                total_samples: 2,
                samples: 2,
                edges: None,
                lines: Some(BTreeMap::from([(4, (2, 2))])),
            },
        );
        frames.insert(
            b,
            FrameReport {
                name: "b".into(),
                file: "src/b.rs".into(),
                line: None,
                total_samples: 2,
                samples: 0,
                edges: Some(BTreeMap::from([(a, 2)])),
                lines: None,
            },
        );
        Results {
            version: RESULTS_VERSION,
            mode: Mode::Custom,
            interval: None,
            samples: 2,
            gc_samples: 0,
            missed_samples: 0,
            metadata: BTreeMap::from([("app".into(), "demo".into())]),
            frames,
            raw: Some(vec![2, 0x2000, 0x1000, 2]),
            raw_sample_timestamps: Some(vec![10, 20]),
            raw_timestamp_deltas: Some(vec![0, 10]),
            sample_tags: Some(vec![(TagSet::from([(0, 1)]), 1), (TagSet::from([(0, 2)]), 1)]),
            tag_strings: Some(vec!["thread_id".into(), "7".into(), "8".into()]),
        }
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample_results()).unwrap();
        assert_eq!(value["version"], 1.2);
        assert_eq!(value["mode"], "custom");
        assert!(value["interval"].is_null());
        assert_eq!(value["frames"]["8192"]["edges"]["4096"], 2);
        assert_eq!(value["frames"]["4096"]["lines"]["4"], serde_json::json!([2, 2]));
        assert!(value["frames"]["8192"].get("line").is_none());
        assert_eq!(value["sample_tags"][0], serde_json::json!([{"0": 1}, 1]));
    }

    #[test]
    fn test_json_reads_back() {
        let results = sample_results();
        let text = serde_json::to_string(&results).unwrap();
        let back: Results = serde_json::from_str(&text).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn test_optional_sections_omitted() {
        let mut results = sample_results();
        results.raw = None;
        results.raw_sample_timestamps = None;
        results.raw_timestamp_deltas = None;
        results.sample_tags = None;
        results.tag_strings = None;
        let value = serde_json::to_value(results).unwrap();
        for key in ["raw", "raw_sample_timestamps", "sample_tags", "tag_strings"] {
            assert!(value.get(key).is_none(), "{key} should be omitted");
        }
    }

    #[test]
    fn test_expand_helpers() {
        let results = sample_results();
        let stacks = results.expand_raw().unwrap();
        assert_eq!(stacks.len(), 2);
        assert_eq!(stacks[0], vec![FrameId::new(0x1000), FrameId::new(0x2000)]);

        let tags = results.expand_tags().unwrap();
        assert_eq!(tags[0]["thread_id"], "7");
        assert_eq!(tags[1]["thread_id"], "8");

        assert_eq!(results.leaf_total(), results.samples);
        assert_eq!(results.frame_named("b").unwrap().0, FrameId::new(0x2000));
    }
}
