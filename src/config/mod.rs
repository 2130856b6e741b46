// ==========================================
// Molecular data portal - configuration layer
// ==========================================
// Role: data mapping document and import settings
// Storage: mapping JSON file + config_kv table
// ==========================================

pub mod config_manager;
pub mod import_config_trait;
pub mod mapping_loader;

pub use config_manager::{config_keys, ConfigManager, ImportSettings};
pub use import_config_trait::ImportConfigReader;
pub use mapping_loader::{load_mapping, load_mapping_str};
