//! Dotted product versions mapped to a fixed-width sortable key

use anyhow::{Result, bail};
use std::cmp::Ordering;
use std::fmt;

use crate::constants::patches::{MAX_VERSION_COMPONENTS, MIN_VERSION_COMPONENTS, VERSION_COMPONENT_WIDTH};

/// Version whose ordering is the ordering of its zero-padded key
///
/// `"1.2.10"` becomes `"0000000001.0000000002.0000000010.0000000000.0000000000"`,
/// so plain string comparison of keys matches numeric version order.
#[derive(Debug, Clone)]
pub struct VersionKey {
    text: String,
    key: String,
}

impl VersionKey {
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('.').collect();
        if !(MIN_VERSION_COMPONENTS..=MAX_VERSION_COMPONENTS).contains(&parts.len()) {
            bail!(
                "Unsupported product version '{}': expected {} to {} dotted components",
                text,
                MIN_VERSION_COMPONENTS,
                MAX_VERSION_COMPONENTS
            );
        }
        let mut padded = Vec::with_capacity(MAX_VERSION_COMPONENTS);
        for part in &parts {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                bail!("Unsupported product version '{}': component '{}' is not numeric", text, part);
            }
            let value: u32 = part
                .parse()
                .map_err(|_| anyhow::anyhow!("Unsupported product version '{}': component '{}' is too large", text, part))?;
            padded.push(format!("{value:0width$}", width = VERSION_COMPONENT_WIDTH));
        }
        while padded.len() < MAX_VERSION_COMPONENTS {
            padded.push("0".repeat(VERSION_COMPONENT_WIDTH));
        }
        Ok(Self {
            text: text.trim().to_string(),
            key: padded.join("."),
        })
    }

    /// Version as it was written
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn sortable(&self) -> &str {
        &self.key
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for VersionKey {}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
