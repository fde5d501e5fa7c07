use std::sync::Arc;

use chrono::Duration;

use crate::auth::{AccessController, HeaderPresenceAccess, OpenAccess};
use crate::config::Config;
use crate::storage::driver::DriverFactories;
use crate::storage::layer::LayerService;
use crate::storage::manifest_store::ManifestStore;
use crate::utils::urls::UrlBuilder;

#[derive(Clone)]
pub struct AppState {
    pub layers: LayerService,
    pub manifests: ManifestStore,
    pub access: Arc<dyn AccessController>,
    pub urls: UrlBuilder,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds the application services: resolves the storage driver from
    /// the factory table and wires the stores over it.
    pub fn new(config: Config, factories: &DriverFactories) -> anyhow::Result<Self> {
        let driver = factories.create(&config.storage_driver, &config.storage_parameters)?;

        let layers = LayerService::new(driver.clone(), Duration::seconds(config.upload_ttl_secs));
        let manifests = ManifestStore::new(driver, layers.clone());

        let access: Arc<dyn AccessController> = match config.auth.as_str() {
            "silly" => Arc::new(HeaderPresenceAccess::new(
                config.auth_realm.clone(),
                config.auth_service.clone(),
            )),
            _ => Arc::new(OpenAccess),
        };

        Ok(AppState {
            layers,
            manifests,
            access,
            urls: UrlBuilder::new(config.registry_url.clone()),
            config: Arc::new(config),
        })
    }
}
