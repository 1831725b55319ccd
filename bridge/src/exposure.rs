use std::collections::HashSet;

use weft_core::{BridgeError, Result};

/// Whitelist of local agents addressable from external systems.
///
/// Read-only after construction, so it is shared without locking.
#[derive(Debug, Clone, Default)]
pub struct ExposureGate {
    exposed: HashSet<String>,
}

impl ExposureGate {
    pub fn new<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exposed: agents.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_exposed(&self, agent_id: &str) -> bool {
        self.exposed.contains(agent_id)
    }

    /// `Ok` if exposed, `NotExposed` otherwise.
    pub fn admit(&self, agent_id: &str) -> Result<()> {
        if self.is_exposed(agent_id) {
            Ok(())
        } else {
            Err(BridgeError::NotExposed(agent_id.to_string()))
        }
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.exposed.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership() {
        let gate = ExposureGate::new(["console", "echo"]);
        assert!(gate.is_exposed("console"));
        assert!(!gate.is_exposed("admin"));
        assert!(!gate.is_exposed("Console"));
        assert!(matches!(gate.admit("admin"), Err(BridgeError::NotExposed(id)) if id == "admin"));
    }
}
