//! Path selection policy. Parsed from a JSON document, tolerantly: a malformed
//! document is logged and the policy falls back to defaults rather than
//! aborting the process — the one place in this crate where a bad document
//! is not a fatal error.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::pcb::IsdAs;

#[derive(Debug, Clone, PartialEq)]
pub struct PathPolicy {
    pub best_set_size: usize,
    pub candidates_set_size: usize,
    pub history_limit: usize,
    pub update_after_number: u64,
    pub update_after_time: u64,
    pub unwanted_ads: HashSet<IsdAs>,
    pub property_ranges: HashMap<String, (f64, f64)>,
    pub property_weights: HashMap<String, f64>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            best_set_size: 5,
            candidates_set_size: 600,
            history_limit: 0,
            update_after_number: 0,
            update_after_time: 0,
            unwanted_ads: HashSet::new(),
            property_ranges: HashMap::new(),
            property_weights: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(rename = "BestSetSize")]
    best_set_size: Option<usize>,
    #[serde(rename = "CandidatesSetSize")]
    candidates_set_size: Option<usize>,
    #[serde(rename = "HistoryLimit")]
    history_limit: Option<usize>,
    #[serde(rename = "UpdateAfterNumber")]
    update_after_number: Option<u64>,
    #[serde(rename = "UpdateAfterTime")]
    update_after_time: Option<u64>,
    #[serde(rename = "UnwantedADs")]
    unwanted_ads: Option<String>,
    #[serde(rename = "PropertyRanges")]
    property_ranges: Option<HashMap<String, String>>,
    #[serde(rename = "PropertyWeights")]
    property_weights: Option<HashMap<String, f64>>,
}

impl PathPolicy {
    /// Loads and parses `path`, falling back to `PathPolicy::default()` and
    /// logging on any I/O or format error. Never returns `Err`.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(policy) => policy,
            Err(reason) => {
                tracing::error!(path = %path.display(), %reason, "failed to parse path policy, using defaults");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, String> {
        let raw_text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let raw: RawPolicy = serde_json::from_str(&raw_text).map_err(|e| e.to_string())?;
        let mut policy = PathPolicy::default();

        if let Some(v) = raw.best_set_size {
            policy.best_set_size = v;
        }
        if let Some(v) = raw.candidates_set_size {
            policy.candidates_set_size = v;
        }
        if let Some(v) = raw.history_limit {
            policy.history_limit = v;
        }
        if let Some(v) = raw.update_after_number {
            policy.update_after_number = v;
        }
        if let Some(v) = raw.update_after_time {
            policy.update_after_time = v;
        }
        if let Some(csv) = raw.unwanted_ads {
            for pair in csv.split(',') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                let (isd, ad) = pair.split_once('-').ok_or("malformed UnwantedADs entry")?;
                let isd_id: u16 = isd.trim().parse().map_err(|_| "bad isd in UnwantedADs")?;
                let ad_id: u32 = ad.trim().parse().map_err(|_| "bad ad in UnwantedADs")?;
                policy.unwanted_ads.insert(IsdAs::new(isd_id, ad_id));
            }
        }
        if let Some(ranges) = raw.property_ranges {
            for (key, range) in ranges {
                let (lo, hi) = range.split_once('-').ok_or("malformed PropertyRanges entry")?;
                let lo: f64 = lo.trim().parse().map_err(|_| "bad range lo")?;
                let hi: f64 = hi.trim().parse().map_err(|_| "bad range hi")?;
                policy.property_ranges.insert(key, (lo, hi));
            }
        }
        if let Some(weights) = raw.property_weights {
            policy.property_weights = weights;
        }

        Ok(policy)
    }

    pub fn weight(&self, key: &str) -> f64 {
        *self.property_weights.get(key).unwrap_or(&0.0)
    }

    pub fn is_unwanted(&self, ad: IsdAs) -> bool {
        self.unwanted_ads.contains(&ad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn malformed_document_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let policy = PathPolicy::load(file.path());
        assert_eq!(policy, PathPolicy::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let policy = PathPolicy::load(Path::new("/nonexistent/path_policy.json"));
        assert_eq!(policy, PathPolicy::default());
    }

    #[test]
    fn parses_weights_and_unwanted_ads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"PropertyWeights": {{"HopsLength": 1.0}}, "UnwantedADs": "1-10, 2-20"}}"#
        )
        .unwrap();
        let policy = PathPolicy::load(file.path());
        assert_eq!(policy.weight("HopsLength"), 1.0);
        assert!(policy.is_unwanted(IsdAs::new(1, 10)));
        assert!(policy.is_unwanted(IsdAs::new(2, 20)));
        assert!(!policy.is_unwanted(IsdAs::new(3, 30)));
    }
}
