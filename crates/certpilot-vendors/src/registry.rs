//! Explicit vendor registry: a product's `source` key resolves to an
//! interface-typed adapter built once at startup. No runtime class-name
//! construction.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use certpilot_core::CaSettings;
use certpilot_kv::CounterStore;

use crate::adapter::VendorAdapter;
use crate::audit::CaLogStore;
use crate::certum::CertumAdapter;
use crate::errors::VendorError;
use crate::gogetssl::GogetsslAdapter;
use crate::racent::RacentAdapter;
use crate::trustasia::TrustasiaAdapter;

pub struct VendorRegistry {
    adapters: HashMap<&'static str, Arc<dyn VendorAdapter>>,
}

impl VendorRegistry {
    /// Build every configured adapter. Unconfigured vendors are left out
    /// of the registry so resolution fails loudly instead of mid-call.
    pub fn from_settings(
        settings: &CaSettings,
        audit: Arc<dyn CaLogStore>,
        kv: Arc<dyn CounterStore>,
    ) -> Self {
        let mut adapters: HashMap<&'static str, Arc<dyn VendorAdapter>> = HashMap::new();

        if settings.certum.is_configured() {
            let adapter = Arc::new(CertumAdapter::new(settings.certum.clone(), audit.clone()));
            adapters.insert(adapter.source(), adapter);
        }
        if settings.gogetssl.is_configured() {
            let adapter = Arc::new(GogetsslAdapter::new(
                settings.gogetssl.clone(),
                audit.clone(),
                kv.clone(),
            ));
            adapters.insert(adapter.source(), adapter);
        }
        if settings.racent.is_configured() {
            let adapter = Arc::new(RacentAdapter::new(settings.racent.clone(), audit.clone()));
            adapters.insert(adapter.source(), adapter);
        }
        if settings.trustasia.is_configured() {
            let adapter = Arc::new(TrustasiaAdapter::new(
                settings.trustasia.clone(),
                audit.clone(),
            ));
            adapters.insert(adapter.source(), adapter);
        }

        info!(
            "vendor registry initialized with {} adapter(s)",
            adapters.len()
        );

        Self { adapters }
    }

    /// Register an adapter directly (used by tests and custom builds).
    pub fn with_adapter(mut self, adapter: Arc<dyn VendorAdapter>) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn resolve(&self, source: &str) -> Result<Arc<dyn VendorAdapter>, VendorError> {
        if source.is_empty() {
            return Err(VendorError::Configuration(
                "product has no vendor source".to_string(),
            ));
        }

        self.adapters
            .get(source.to_ascii_lowercase().as_str())
            .cloned()
            .ok_or_else(|| {
                VendorError::Configuration(format!("no adapter registered for '{}'", source))
            })
    }

    pub fn sources(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryCaLogStore;
    use certpilot_kv::MemoryCounterStore;

    #[test]
    fn unconfigured_vendors_are_absent() {
        let registry = VendorRegistry::from_settings(
            &CaSettings::default(),
            Arc::new(MemoryCaLogStore::new()),
            Arc::new(MemoryCounterStore::new()),
        );
        assert!(registry.resolve("racent").is_err());
        assert!(registry.resolve("").is_err());
    }

    #[test]
    fn configured_vendor_resolves_case_insensitively() {
        let mut settings = CaSettings::default();
        settings.racent.url = "https://api.racent.test/".to_string();
        settings.racent.token = "token".to_string();

        let registry = VendorRegistry::from_settings(
            &settings,
            Arc::new(MemoryCaLogStore::new()),
            Arc::new(MemoryCounterStore::new()),
        );
        assert!(registry.resolve("racent").is_ok());
        assert!(registry.resolve("Racent").is_ok());
        assert!(registry.resolve("gogetssl").is_err());
    }
}
