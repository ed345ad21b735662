//! Manufacturer registry
//! Maps Bluetooth SIG company identifiers to company names. The table is loaded
//! once, from the bundled resource or a configured file, and is read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use log::{error, info, warn};
use serde::Deserialize;
use tokio::fs;

use crate::error::RegistryError;

/// `value` is written either as a number or as a decimal / `0x`-prefixed hex string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Number(i64),
    Text(String),
}

impl RawIdentifier {
    fn to_company_id(&self) -> Result<u16, RegistryError> {
        let parsed = match self {
            Self::Number(n) => u16::try_from(*n).ok(),
            Self::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u16::from_str_radix(hex, 16).ok(),
                    None => s.parse::<u16>().ok(),
                }
            }
        };
        parsed.ok_or_else(|| RegistryError::InvalidIdentifier(format!("{:?}", self)))
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    value: RawIdentifier,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    company_identifiers: Vec<RawEntry>,
}

/// Immutable lookup table of company identifiers
#[derive(Debug, Clone, Default)]
pub struct ManufacturerRegistry {
    names: HashMap<u16, String>,
}

/// Company identifier table compiled into the binary
const BUNDLED_TABLE: &str = include_str!("../../../assets/company_identifiers.json");

impl ManufacturerRegistry {
    /// An empty registry; every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table shipped with the application.
    pub fn bundled() -> Self {
        match Self::from_json_str(BUNDLED_TABLE) {
            Ok(registry) => registry,
            Err(e) => {
                error!("Bundled manufacturer table is invalid: {}", e);
                Self::empty()
            }
        }
    }

    /// Loads the table from a file. `.yaml`/`.yml` files are read as YAML, anything else as JSON.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let registry = if is_yaml {
            Self::from_yaml_str(&contents)?
        } else {
            Self::from_json_str(&contents)?
        };
        info!(
            "Loaded {} company identifiers from {:?}",
            registry.len(),
            path.to_string_lossy()
        );
        Ok(registry)
    }

    /// Loads `override_path` when one is configured. Falls back to the bundled table when
    /// no override is set or it is missing or malformed.
    pub async fn load_or_bundled(override_path: Option<&Path>) -> Self {
        let Some(path) = override_path else {
            return Self::bundled();
        };
        match Self::load(path).await {
            Ok(registry) => registry,
            Err(e) => {
                warn!(
                    "Manufacturer table unavailable at {:?} ({}), using the bundled table.",
                    path.to_string_lossy(),
                    e
                );
                Self::bundled()
            }
        }
    }

    /// Parses a JSON `company_identifiers` document.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        Self::from_table(serde_json::from_str(json)?)
    }

    /// Parses a YAML `company_identifiers` document, such as the Bluetooth SIG assigned numbers file.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegistryError> {
        Self::from_table(serde_yaml::from_str(yaml)?)
    }

    /// The first entry wins for duplicate identifiers.
    fn from_table(table: RawTable) -> Result<Self, RegistryError> {
        let mut names = HashMap::with_capacity(table.company_identifiers.len());
        for entry in table.company_identifiers {
            let id = entry.value.to_company_id()?;
            names.entry(id).or_insert(entry.name);
        }
        Ok(Self { names })
    }

    pub fn lookup(&self, company_id: u16) -> Option<&str> {
        self.names.get(&company_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(u16, String)> for ManufacturerRegistry {
    fn from_iter<I: IntoIterator<Item = (u16, String)>>(iter: I) -> Self {
        let mut names = HashMap::new();
        for (id, name) in iter {
            names.entry(id).or_insert(name);
        }
        Self { names }
    }
}
