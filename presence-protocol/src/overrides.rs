//! Manual override file: lets an operator force a MAC present/absent or
//! quarantine it outright, bypassing the decision engine entirely.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::mac::MacAddress;

#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub quarantine: HashSet<MacAddress>,
    pub force_status: HashMap<MacAddress, bool>,
}

#[derive(Debug, Deserialize)]
struct OverrideFile {
    #[serde(default)]
    quarantine: Vec<MacAddress>,
    #[serde(default, rename = "forceStatus")]
    force_status: HashMap<MacAddress, ForcedStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ForcedStatus {
    Present,
    Absent,
}

impl Overrides {
    pub fn is_quarantined(&self, mac: &MacAddress) -> bool {
        self.quarantine.contains(mac)
    }

    pub fn forced_status(&self, mac: &MacAddress) -> Option<bool> {
        self.force_status.get(mac).copied()
    }

    /// Loads and parses the override file. A missing or malformed file is
    /// not an error here — it falls back to empty overrides and the caller
    /// is expected to log once, not on every poll.
    pub fn load(path: &Path) -> Result<Self, OverrideLoadError> {
        let contents = std::fs::read_to_string(path).map_err(OverrideLoadError::Io)?;
        let parsed: OverrideFile = serde_json::from_str(&contents).map_err(OverrideLoadError::Malformed)?;

        let force_status = parsed
            .force_status
            .into_iter()
            .map(|(mac, status)| (mac, matches!(status, ForcedStatus::Present)))
            .collect();

        Ok(Self { quarantine: parsed.quarantine.into_iter().collect(), force_status })
    }

    /// Polls the override file. A missing or malformed file both fall back
    /// to empty overrides, logged once on the malformed case since a
    /// missing file is the expected steady state when no override is set.
    pub fn reload(path: &Path) -> Overrides {
        match Self::load(path) {
            Ok(fresh) => fresh,
            Err(OverrideLoadError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Overrides::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to reload override file; falling back to empty overrides");
                Overrides::default()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OverrideLoadError {
    #[error("{0}")]
    Io(std::io::Error),
    #[error("malformed override file: {0}")]
    Malformed(serde_json::Error),
}
