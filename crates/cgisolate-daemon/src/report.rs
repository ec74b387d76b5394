//! Serializable views printed by the daemon subcommands

use cgisolate_core::{MountMapping, ResourceHandlerChain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hierarchy directory => controller names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountReport(pub BTreeMap<String, Vec<String>>);

impl From<&MountMapping> for MountReport {
    fn from(mapping: &MountMapping) -> Self {
        Self(
            mapping
                .iter()
                .map(|(path, controllers)| {
                    (
                        path.display().to_string(),
                        controllers.iter().map(|c| c.name().to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

/// Handler kinds in chain order; empty when isolation is off
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub enabled: bool,
    pub handlers: Vec<String>,
}

impl ChainReport {
    pub fn new(chain: Option<&ResourceHandlerChain>) -> Self {
        match chain {
            Some(chain) => Self {
                enabled: true,
                handlers: chain.kinds().iter().map(ToString::to_string).collect(),
            },
            None => Self::default(),
        }
    }
}
