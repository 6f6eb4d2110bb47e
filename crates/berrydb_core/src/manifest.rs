//! Environment catalog of record stores.

use crate::codec::{put_bytes, Reader};
use crate::config::{AccessMethod, Duplicates, StoreConfig};
use crate::error::{CoreError, CoreResult};
use crate::types::StoreId;
use std::collections::BTreeMap;

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"BMFN";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// Persisted shape of one store.
///
/// Only the options that change how stored data is interpreted are kept.
/// Comparators are code and must be supplied again on every open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreEntry {
    /// Stable store ID.
    pub id: StoreId,
    /// Access method.
    pub access: AccessMethod,
    /// Duplicate handling.
    pub duplicates: Duplicates,
    /// Whether B-tree record numbers are enabled.
    pub record_numbers: bool,
    /// Fixed record length of a Recno store.
    pub fixed_length: Option<u32>,
}

impl StoreEntry {
    fn matches(&self, config: &StoreConfig) -> Result<(), String> {
        if self.access != config.access {
            return Err(format!(
                "access method {:?} conflicts with stored {:?}",
                config.access, self.access
            ));
        }
        if self.duplicates != config.duplicates {
            return Err(format!(
                "duplicates {:?} conflict with stored {:?}",
                config.duplicates, self.duplicates
            ));
        }
        if self.record_numbers != config.record_numbers {
            return Err("record number setting conflicts with stored setting".to_string());
        }
        let fixed = config.fixed_length.map(|len| len as u64);
        if self.fixed_length.map(u64::from) != fixed {
            return Err("fixed record length conflicts with stored length".to_string());
        }
        Ok(())
    }
}

/// Catalog of every store ever created in the environment.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Store name to entry mapping.
    pub stores: BTreeMap<String, StoreEntry>,
    /// Next store ID to assign.
    pub next_store_id: u32,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates a new empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: BTreeMap::new(),
            next_store_id: 1,
        }
    }

    /// Looks up a store by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StoreEntry> {
        self.stores.get(name)
    }

    /// Resolves `name` against the catalog.
    ///
    /// Returns the entry and whether it was created by this call.
    ///
    /// # Errors
    ///
    /// - `Config` if the stored shape conflicts with `config`
    /// - `NotFound` if the store is unknown and `config.create` is false
    pub fn resolve(&mut self, name: &str, config: &StoreConfig) -> CoreResult<(StoreEntry, bool)> {
        if let Some(entry) = self.stores.get(name) {
            entry
                .matches(config)
                .map_err(|reason| CoreError::config(format!("store {name}: {reason}")))?;
            return Ok((*entry, false));
        }
        if !config.create {
            return Err(CoreError::not_found(format!("store {name}")));
        }
        let fixed_length = config
            .fixed_length
            .map(u32::try_from)
            .transpose()
            .map_err(|_| CoreError::config("fixed record length exceeds u32"))?;
        let entry = StoreEntry {
            id: StoreId::new(self.next_store_id),
            access: config.access,
            duplicates: config.duplicates,
            record_numbers: config.record_numbers,
            fixed_length,
        };
        self.next_store_id += 1;
        self.stores.insert(name.to_string(), entry);
        Ok((entry, true))
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.next_store_id.to_le_bytes());

        let count = u32::try_from(self.stores.len())
            .map_err(|_| CoreError::invalid_operation("too many stores"))?;
        buf.extend_from_slice(&count.to_le_bytes());
        for (name, entry) in &self.stores {
            put_bytes(&mut buf, name.as_bytes())?;
            buf.extend_from_slice(&entry.id.as_u32().to_le_bytes());
            buf.push(entry.access.as_byte());
            buf.push(entry.duplicates.as_byte());
            buf.push(u8::from(entry.record_numbers));
            buf.extend_from_slice(&entry.fixed_length.unwrap_or(0).to_le_bytes());
        }
        Ok(buf)
    }

    /// Decodes a manifest from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let mut r = Reader::new(data, CoreError::invalid_format);
        if r.raw(4)? != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }
        let version = r.u16()?;
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }
        let next_store_id = r.u32()?;
        let count = r.u32()?;

        let mut stores = BTreeMap::new();
        for _ in 0..count {
            let name = String::from_utf8(r.bytes()?)
                .map_err(|_| CoreError::invalid_format("invalid store name"))?;
            let id = StoreId::new(r.u32()?);
            let access = AccessMethod::from_byte(r.u8()?)
                .ok_or_else(|| CoreError::invalid_format("invalid access method"))?;
            let duplicates = Duplicates::from_byte(r.u8()?)
                .ok_or_else(|| CoreError::invalid_format("invalid duplicate setting"))?;
            let record_numbers = r.u8()? != 0;
            let fixed_length = Some(r.u32()?).filter(|len| *len != 0);
            stores.insert(
                name,
                StoreEntry {
                    id,
                    access,
                    duplicates,
                    record_numbers,
                    fixed_length,
                },
            );
        }
        r.finish("manifest")?;

        Ok(Self {
            stores,
            next_store_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_assigns_stable_ids() {
        let mut manifest = Manifest::new();
        let (a, created) = manifest.resolve("students", &StoreConfig::btree()).unwrap();
        assert!(created);
        let (b, _) = manifest
            .resolve("lastname", &StoreConfig::btree().duplicates(Duplicates::Sorted))
            .unwrap();
        assert_ne!(a.id, b.id);

        let (again, created) = manifest.resolve("students", &StoreConfig::btree()).unwrap();
        assert!(!created);
        assert_eq!(again.id, a.id);
    }

    #[test]
    fn conflicting_reopen_is_a_config_error() {
        let mut manifest = Manifest::new();
        manifest.resolve("s", &StoreConfig::btree()).unwrap();
        let err = manifest
            .resolve("s", &StoreConfig::btree().duplicates(Duplicates::Unsorted))
            .unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
        let err = manifest.resolve("s", &StoreConfig::hash()).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn missing_store_without_create() {
        let mut manifest = Manifest::new();
        let err = manifest
            .resolve("absent", &StoreConfig::btree().create(false))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn encode_decode() {
        let mut manifest = Manifest::new();
        manifest.resolve("a", &StoreConfig::btree().record_numbers(true)).unwrap();
        manifest.resolve("b", &StoreConfig::recno().fixed_length(16, b'#')).unwrap();

        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded.next_store_id, 3);
        assert_eq!(decoded.stores, manifest.stores);
        assert_eq!(decoded.get("b").unwrap().fixed_length, Some(16));
    }

    #[test]
    fn invalid_magic() {
        assert!(Manifest::decode(b"XXXX\x01\x00").is_err());
    }
}
