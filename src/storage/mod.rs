pub mod blob;
pub mod driver;
pub mod layer;
pub mod manifest_store;
pub mod paths;
pub mod upload;
