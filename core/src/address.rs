//! Agent addressing: `agent_id` for local agents, `agent_id@system_name` for
//! agents reachable through an external system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BridgeError, Result};

/// Separator between the agent id and the system name in the wire form.
pub const SYSTEM_SEPARATOR: char = '@';

/// Which messaging domain an address belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SystemName {
    /// Owned and executed within this process.
    Local,
    /// Reachable only through the named external system.
    Remote(String),
}

/// Immutable agent address.
///
/// Invariants: `agent_id` is non-empty, and a remote system name is non-empty
/// and free of `@`. A local `agent_id` is free of `@`, so the wire form of
/// every address parses back to the same address. Remote ids may contain `@`
/// (`user@corp@kafka` is agent `user@corp` on `kafka`) but cannot be stripped
/// to a local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentAddress {
    agent_id: String,
    system: SystemName,
}

impl AgentAddress {
    /// Parse the wire form. Splits on the last `@`; no `@` means local.
    ///
    /// ```
    /// use weft_core::AgentAddress;
    ///
    /// let addr = AgentAddress::parse("client1@test_system").unwrap();
    /// assert_eq!(addr.agent_id(), "client1");
    /// assert_eq!(addr.system_of().unwrap(), "test_system");
    ///
    /// assert!(AgentAddress::parse("console").unwrap().is_local());
    /// assert!(AgentAddress::parse("@test_system").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.rsplit_once(SYSTEM_SEPARATOR) {
            None => Self::local(raw),
            Some((agent_id, system)) => Self::remote(agent_id, system),
        }
    }

    /// Tag a bare id as local. The id must not contain `@`.
    pub fn local(agent_id: impl Into<String>) -> Result<Self> {
        let agent_id = agent_id.into();
        if agent_id.is_empty() {
            return Err(BridgeError::MalformedAddress(
                "agent_id must not be empty".into(),
            ));
        }
        if agent_id.contains(SYSTEM_SEPARATOR) {
            return Err(BridgeError::MalformedAddress(format!(
                "local agent_id '{agent_id}' must not contain '{SYSTEM_SEPARATOR}'"
            )));
        }
        Ok(Self {
            agent_id,
            system: SystemName::Local,
        })
    }

    pub fn remote(agent_id: impl Into<String>, system: impl Into<String>) -> Result<Self> {
        let agent_id = agent_id.into();
        let system = system.into();
        if agent_id.is_empty() {
            return Err(BridgeError::MalformedAddress(format!(
                "agent_id must not be empty in '@{system}'"
            )));
        }
        if system.is_empty() || system.contains(SYSTEM_SEPARATOR) {
            return Err(BridgeError::MalformedAddress(format!(
                "system name '{system}' of '{agent_id}' must be non-empty and free of '{SYSTEM_SEPARATOR}'"
            )));
        }
        Ok(Self {
            agent_id,
            system: SystemName::Remote(system),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn system(&self) -> &SystemName {
        &self.system
    }

    pub fn is_local(&self) -> bool {
        matches!(self.system, SystemName::Local)
    }

    /// Name of the external system this address points into.
    pub fn system_of(&self) -> Result<&str> {
        match &self.system {
            SystemName::Remote(name) => Ok(name),
            SystemName::Local => Err(BridgeError::NotExternal(self.agent_id.clone())),
        }
    }

    /// Same agent id, re-tagged with `system`.
    pub fn with_system(&self, system: &str) -> Result<Self> {
        Self::remote(self.agent_id.clone(), system)
    }

    /// Same agent id with the system suffix stripped.
    ///
    /// `MalformedAddress` if the id contains `@`: its bare form would parse
    /// as a different, remote address.
    pub fn to_local(&self) -> Result<Self> {
        Self::local(self.agent_id.clone())
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system {
            SystemName::Local => write!(f, "{}", self.agent_id),
            SystemName::Remote(system) => {
                write!(f, "{}{}{}", self.agent_id, SYSTEM_SEPARATOR, system)
            }
        }
    }
}

impl FromStr for AgentAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentAddress {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AgentAddress> for String {
    fn from(addr: AgentAddress) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_last_separator() {
        let addr = AgentAddress::parse("user@corp@kafka").unwrap();
        assert_eq!(addr.agent_id(), "user@corp");
        assert_eq!(addr.system_of().unwrap(), "kafka");
        assert_eq!(addr.to_string(), "user@corp@kafka");
    }

    #[test]
    fn empty_parts_are_malformed() {
        for raw in ["", "@sys", "id@", "@"] {
            let err = AgentAddress::parse(raw).unwrap_err();
            assert!(
                matches!(err, BridgeError::MalformedAddress(_)),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn system_of_local_is_not_external() {
        let addr = AgentAddress::local("echo").unwrap();
        assert!(matches!(addr.system_of(), Err(BridgeError::NotExternal(_))));
    }

    #[test]
    fn retag_and_strip() {
        let local = AgentAddress::parse("echo").unwrap();
        let remote = local.with_system("weft").unwrap();
        assert_eq!(remote.to_string(), "echo@weft");
        assert_eq!(remote.to_local().unwrap(), local);
    }

    #[test]
    fn ids_with_separator_never_become_local() {
        assert!(matches!(
            AgentAddress::local("a@b"),
            Err(BridgeError::MalformedAddress(_))
        ));

        let remote = AgentAddress::parse("u@corp@test_system").unwrap();
        assert_eq!(remote.agent_id(), "u@corp");
        assert!(matches!(
            remote.to_local(),
            Err(BridgeError::MalformedAddress(_))
        ));
    }

    #[test]
    fn wire_form_parses_back_to_the_same_address() {
        for addr in [
            AgentAddress::local("echo").unwrap(),
            AgentAddress::remote("echo", "weft").unwrap(),
            AgentAddress::remote("u@corp", "test_system").unwrap(),
        ] {
            assert_eq!(AgentAddress::parse(&addr.to_string()).unwrap(), addr);
        }
        assert!(AgentAddress::remote("echo", "a@b").is_err());
    }

    #[test]
    fn serde_uses_wire_form() {
        let addr = AgentAddress::parse("client1@test_system").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"client1@test_system\"");
        let back: AgentAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<AgentAddress>("\"@x\"").is_err());
    }
}
