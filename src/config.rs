use std::collections::HashMap;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub port: u16,
    pub storage_driver: String,
    pub storage_parameters: HashMap<String, String>,
    pub auth: String,
    pub auth_realm: String,
    pub auth_service: String,
    pub registry_url: String,
    pub upload_ttl_secs: i64,
}

impl Config {
    /// Reads configuration from the environment (after any `.env` overlay
    /// the caller applied).
    pub fn from_env() -> Self {
        let mut storage_parameters = HashMap::new();
        storage_parameters.insert(
            "rootdirectory".to_string(),
            env::var("REGISTRY_ROOT").unwrap_or_else(|_| "/tmp/registry/storage".to_string()),
        );

        Config {
            addr: env::var("REGISTRY_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("REGISTRY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            storage_driver: env::var("REGISTRY_STORAGE")
                .unwrap_or_else(|_| "filesystem".to_string()),
            storage_parameters,
            auth: env::var("REGISTRY_AUTH").unwrap_or_else(|_| "none".to_string()),
            auth_realm: env::var("REGISTRY_AUTH_REALM").unwrap_or_default(),
            auth_service: env::var("REGISTRY_AUTH_SERVICE").unwrap_or_default(),
            registry_url: env::var("REGISTRY_URL").unwrap_or_default(),
            upload_ttl_secs: env::var("REGISTRY_UPLOAD_TTL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(604_800),
        }
    }
}
