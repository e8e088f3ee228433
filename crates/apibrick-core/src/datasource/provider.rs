//! Data-source configuration lookup.
//!
//! Backend configuration maps (host, port, credentials, ...) come from
//! external configuration storage. [`StaticDataSourceConfigs`] serves them
//! from the `[[datasources]]` entries of `config.toml`.

use apibrick_types::datasource::DataSourceDescriptor;

/// Resolves the configuration of a data source for a tenant.
pub trait DataSourceConfigProvider: Send + Sync {
    fn lookup(&self, tenant_id: &str, ds_id: &str) -> Option<DataSourceDescriptor>;
}

/// In-memory provider over statically declared descriptors.
///
/// A tenant-specific entry wins over an entry without a tenant.
#[derive(Debug, Clone, Default)]
pub struct StaticDataSourceConfigs {
    entries: Vec<DataSourceDescriptor>,
}

impl StaticDataSourceConfigs {
    pub fn new(entries: Vec<DataSourceDescriptor>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DataSourceConfigProvider for StaticDataSourceConfigs {
    fn lookup(&self, tenant_id: &str, ds_id: &str) -> Option<DataSourceDescriptor> {
        let mut shared = None;
        for entry in self.entries.iter().filter(|e| e.id == ds_id) {
            match entry.tenant.as_deref() {
                Some(tenant) if tenant == tenant_id => return Some(entry.clone()),
                None if shared.is_none() => shared = Some(entry),
                _ => {}
            }
        }
        shared.cloned()
    }
}
