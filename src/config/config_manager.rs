// ==========================================
// Molecular data portal - configuration manager
// ==========================================
// Role: load store-held import settings and merge them with CLI flags
// Storage: config_kv table (scope_id = 'global')
// Precedence: CLI flag > config_kv > built-in default
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::error::RepositoryError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use tracing::debug;

/// Default rows per insert statement
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Mapping document shipped with the crate
pub const DEFAULT_MAPPING_FILE: &str = "mapping/data-mapping.json";

/// config_kv keys
pub mod config_keys {
    pub const BATCH_SIZE: &str = "import.batch_size";
    pub const MAPPING_FILE: &str = "import.mapping_file";
}

// ==========================================
// ConfigManager
// ==========================================
pub struct ConfigManager<'a> {
    conn: &'a Connection,
}

impl<'a> ConfigManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Reads a global-scope value from config_kv.
    ///
    /// A store without the config_kv table reads as having no settings.
    fn get_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        if !self.has_config_table()? {
            return Ok(None);
        }

        self.conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| ImportError::store(format!("read setting {}", key), e))
    }

    fn has_config_table(&self) -> ImportResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'config_kv' LIMIT 1",
                [],
                |_row| Ok(true),
            )
            .optional()
            .map_err(|e| ImportError::store("inspect schema", RepositoryError::from(e)))?;
        Ok(found.unwrap_or(false))
    }
}

impl ImportConfigReader for ConfigManager<'_> {
    fn get_batch_size(&self) -> ImportResult<Option<usize>> {
        let raw = match self.get_config_value(config_keys::BATCH_SIZE)? {
            Some(v) => v,
            None => return Ok(None),
        };

        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            Ok(_) => Err(ImportError::ConfigValue {
                key: config_keys::BATCH_SIZE.to_string(),
                value: raw,
                message: "must be greater than zero".to_string(),
            }),
            Err(e) => Err(ImportError::ConfigValue {
                key: config_keys::BATCH_SIZE.to_string(),
                value: raw,
                message: e.to_string(),
            }),
        }
    }

    fn get_mapping_file(&self) -> ImportResult<Option<PathBuf>> {
        let raw = match self.get_config_value(config_keys::MAPPING_FILE)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ImportError::ConfigValue {
                key: config_keys::MAPPING_FILE.to_string(),
                value: raw,
                message: "path is empty".to_string(),
            });
        }
        Ok(Some(PathBuf::from(trimmed)))
    }
}

// ==========================================
// ImportSettings - merged settings for one run
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub mapping_file: PathBuf,
}

impl ImportSettings {
    /// Merges CLI overrides with store-held settings and defaults.
    ///
    /// # Arguments
    /// - `reader`: store-held settings
    /// - `batch_size`: `--batch-size` if given
    /// - `mapping_file`: `--mapping-file` if given
    ///
    /// # Errors
    /// - `ImportError::ConfigValue` for a zero CLI batch size or a malformed stored value
    pub fn resolve(
        reader: &dyn ImportConfigReader,
        batch_size: Option<usize>,
        mapping_file: Option<PathBuf>,
    ) -> ImportResult<Self> {
        if batch_size == Some(0) {
            return Err(ImportError::ConfigValue {
                key: "--batch-size".to_string(),
                value: "0".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let batch_size = match batch_size {
            Some(n) => n,
            None => reader.get_batch_size()?.unwrap_or(DEFAULT_BATCH_SIZE),
        };
        let mapping_file = match mapping_file {
            Some(path) => path,
            None => reader
                .get_mapping_file()?
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_FILE)),
        };

        debug!(batch_size, mapping_file = %mapping_file.display(), "import settings resolved");
        Ok(Self {
            batch_size,
            mapping_file,
        })
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            mapping_file: PathBuf::from(DEFAULT_MAPPING_FILE),
        }
    }
}
