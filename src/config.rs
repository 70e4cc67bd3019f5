use crate::primary_key::HashFunction;
use crate::watermark::watermark_file_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Whether the partition keeps presence markers (dedup) or versioned records (upsert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataMode {
    Dedup,
    Upsert,
}

impl MetadataMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataMode::Dedup => "dedup",
            MetadataMode::Upsert => "upsert",
        }
    }

    /// Name used when wrapping errors and in log spans.
    pub fn manager_name(self) -> &'static str {
        match self {
            MetadataMode::Dedup => "PartitionDedupMetadataManager",
            MetadataMode::Upsert => "PartitionUpsertMetadataManager",
        }
    }
}

impl fmt::Display for MetadataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-partition metadata manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub table_name_with_type: String,
    pub partition_id: u32,
    pub mode: MetadataMode,
    pub primary_key_columns: Vec<String>,
    /// Upsert version columns in priority order. Dedup tables leave this empty.
    #[serde(default)]
    pub comparison_columns: Vec<String>,
    /// Retention window behind the watermark; `0` disables TTL.
    #[serde(default)]
    pub metadata_ttl: f64,
    /// Column whose value is the record's comparison time for TTL purposes.
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub table_index_dir: Option<PathBuf>,
    #[serde(default)]
    pub hash_function: HashFunction,
}

impl MetadataConfig {
    pub fn new(
        table_name_with_type: impl Into<String>,
        partition_id: u32,
        mode: MetadataMode,
        primary_key_columns: Vec<String>,
    ) -> Self {
        Self {
            table_name_with_type: table_name_with_type.into(),
            partition_id,
            mode,
            primary_key_columns,
            comparison_columns: Vec::new(),
            metadata_ttl: 0.0,
            time_column: None,
            table_index_dir: None,
            hash_function: HashFunction::None,
        }
    }

    pub fn with_comparison_columns(mut self, columns: Vec<String>) -> Self {
        self.comparison_columns = columns;
        self
    }

    pub fn with_ttl(mut self, metadata_ttl: f64, time_column: impl Into<String>) -> Self {
        self.metadata_ttl = metadata_ttl;
        self.time_column = Some(time_column.into());
        self
    }

    pub fn with_table_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.table_index_dir = Some(dir.into());
        self
    }

    pub fn with_hash_function(mut self, hash_function: HashFunction) -> Self {
        self.hash_function = hash_function;
        self
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(payload: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(payload).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
        config.validated()
    }

    /// Loads a JSON document from disk and validates it.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let payload = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&payload).map_err(|source| ConfigError::Parse {
            path: Some(path_ref.to_path_buf()),
            source,
        })?;
        config.validated()
    }

    /// Normalizes defaults and rejects inconsistent settings.
    ///
    /// Negative TTLs are clamped to zero. Upsert tables default the time column to the first
    /// comparison column, and dedup tables compare on their time column alone.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.metadata_ttl.is_nan() {
            return Err(ConfigError::InvalidTtl {
                table: self.table_name_with_type,
            });
        }
        if self.metadata_ttl < 0.0 {
            self.metadata_ttl = 0.0;
        }
        if self.primary_key_columns.is_empty() {
            return Err(ConfigError::MissingPrimaryKeyColumns {
                table: self.table_name_with_type,
            });
        }
        match self.mode {
            MetadataMode::Upsert => {
                if self.comparison_columns.is_empty() {
                    return Err(ConfigError::MissingComparisonColumns {
                        table: self.table_name_with_type,
                    });
                }
                if self.time_column.is_none() {
                    self.time_column = self.comparison_columns.first().cloned();
                }
                if let Some(column) = &self.time_column {
                    if !self.comparison_columns.contains(column) {
                        return Err(ConfigError::TimeColumnNotCompared {
                            table: self.table_name_with_type.clone(),
                            column: column.clone(),
                        });
                    }
                }
            }
            MetadataMode::Dedup => {
                if self.comparison_columns.is_empty() {
                    if let Some(column) = &self.time_column {
                        self.comparison_columns = vec![column.clone()];
                    }
                }
            }
        }
        if self.ttl_enabled() && self.time_column.is_none() {
            return Err(ConfigError::MissingTimeColumn {
                table: self.table_name_with_type,
                mode: self.mode,
            });
        }
        Ok(self)
    }

    pub fn ttl_enabled(&self) -> bool {
        self.metadata_ttl > 0.0
    }

    pub fn time_column(&self) -> Option<&str> {
        self.time_column.as_deref()
    }

    /// Watermark file location, when the table has an index directory.
    pub fn watermark_path(&self) -> Option<PathBuf> {
        self.table_index_dir
            .as_deref()
            .map(|dir| watermark_file_path(dir, self.partition_id, self.mode))
    }
}

/// Errors surfaced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read metadata config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse metadata config: {source}")]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },
    #[error("primary key columns must be configured for table {table}")]
    MissingPrimaryKeyColumns { table: String },
    #[error("comparison columns must be configured for upsert table {table}")]
    MissingComparisonColumns { table: String },
    #[error(
        "when metadata TTL is configured, a metadata time column must be configured for {mode} table {table}"
    )]
    MissingTimeColumn { table: String, mode: MetadataMode },
    #[error("time column '{column}' of upsert table {table} is not a comparison column")]
    TimeColumnNotCompared { table: String, column: String },
    #[error("metadata TTL of table {table} is not a number")]
    InvalidTtl { table: String },
}
