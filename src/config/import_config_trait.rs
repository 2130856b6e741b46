// ==========================================
// Molecular data portal - import settings reader trait
// ==========================================
// Role: read-only access to store-held import settings
// Implementor: ConfigManager (config_kv table)
// Excludes: writing settings, pipeline logic
// ==========================================

use crate::importer::error::ImportResult;
use std::path::PathBuf;

// ==========================================
// ImportConfigReader Trait
// ==========================================
pub trait ImportConfigReader {
    /// Rows per insert statement.
    ///
    /// # Returns
    /// - `Some(n)`: value stored under `import.batch_size`
    /// - `None`: no stored value
    ///
    /// # Errors
    /// - `ImportError::ConfigValue` when the stored value is not a positive integer
    fn get_batch_size(&self) -> ImportResult<Option<usize>>;

    /// Mapping document location.
    ///
    /// # Returns
    /// - `Some(path)`: value stored under `import.mapping_file`
    /// - `None`: no stored value
    fn get_mapping_file(&self) -> ImportResult<Option<PathBuf>>;
}
