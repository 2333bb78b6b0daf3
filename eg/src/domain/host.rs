//! Host entries produced by node discovery

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A host that can run workers, with the number of worker slots it offers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    pub slots: usize,
}

impl HostInfo {
    pub fn new(name: impl Into<String>, slots: usize) -> Self {
        Self {
            name: name.into(),
            slots,
        }
    }

    /// Parse `name:slots`, or a bare `name` which gets `default_slots`
    pub fn parse_with_default(line: &str, default_slots: usize) -> eyre::Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(eyre::eyre!("Empty host entry"));
        }

        match line.rsplit_once(':') {
            Some((name, slots)) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(eyre::eyre!("Missing host name in '{}'", line));
                }
                let slots = slots
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| eyre::eyre!("Invalid slot count in '{}': {}", line, e))?;
                Ok(Self::new(name, slots))
            }
            None => Ok(Self::new(line, default_slots)),
        }
    }
}

impl FromStr for HostInfo {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, 1)
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.slots)
    }
}
