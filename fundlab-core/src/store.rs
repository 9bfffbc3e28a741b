//! Parquet snapshot store.
//!
//! Layout: `{dir}/{table_name}.parquet`, one file per source kind, plus a
//! `meta.json` sidecar (row counts, blake3 content hashes, written-at).
//!
//! Writes are atomic (write to .tmp, rename into place) and all-or-nothing:
//! any table failing to write aborts the whole store operation. Access is
//! lazy: tables come back as `scan_parquet` handles with the schema
//! contract's field selection re-applied, so legacy columns on disk are
//! ignored and nothing is read until a consumer collects.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::{SchemaContract, SourceKind};
use crate::universe::Universe;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot at {dir} is missing required table '{table}'")]
    MissingTable { dir: PathBuf, table: &'static str },

    #[error("failed to write table '{table}': {reason}")]
    WriteFailed { table: &'static str, reason: String },

    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata sidecar: {0}")]
    Meta(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Sidecar metadata for one stored table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub rows: usize,
    pub content_hash: String,
}

/// Sidecar metadata for a whole snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub tables: BTreeMap<String, TableMeta>,
    pub written_at: chrono::NaiveDateTime,
}

/// A snapshot directory holding one Universe.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> SnapshotStore {
        SnapshotStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, kind: SourceKind) -> PathBuf {
        self.dir.join(format!("{}.parquet", kind.table_name()))
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    /// Persist every table of `universe` under its fixed name.
    ///
    /// Creates the directory if absent. Write order is irrelevant; a write
    /// failure for any table is fatal to the whole operation.
    pub fn store(&self, universe: &Universe) -> Result<SnapshotMeta, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let mut tables = BTreeMap::new();
        for kind in universe.kinds() {
            let table = kind.table_name();
            let Some(lf) = universe.table(kind) else { continue };
            let df = lf
                .collect()
                .map_err(|e| StoreError::WriteFailed { table, reason: e.to_string() })?;

            let path = self.table_path(kind);
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&df, &tmp_path, table)?;
            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                StoreError::WriteFailed { table, reason: format!("atomic rename: {e}") }
            })?;

            tables.insert(
                table.to_string(),
                TableMeta {
                    rows: df.height(),
                    content_hash: blake3::hash(&fs::read(&path)?).to_hex().to_string(),
                },
            );
        }

        let meta = SnapshotMeta { tables, written_at: chrono::Local::now().naive_local() };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Meta(e.to_string()))?;
        fs::write(self.meta_path(), json)?;
        Ok(meta)
    }

    /// Lazy handles to every persisted table, with the contract's field
    /// selection re-applied. A missing core table is fatal; the optional
    /// kinds load only when their file exists.
    pub fn access(&self) -> Result<Universe, StoreError> {
        let mut universe = Universe::new();
        for kind in SourceKind::ALL {
            let path = self.table_path(kind);
            if !path.exists() {
                if kind.is_optional() {
                    continue;
                }
                return Err(StoreError::MissingTable {
                    dir: self.dir.clone(),
                    table: kind.table_name(),
                });
            }

            let contract = SchemaContract::for_kind(kind);
            let lf = LazyFrame::scan_parquet(&path, Default::default())?
                .select([cols(contract.field_names())]);
            universe.insert(kind, lf);
        }
        Ok(universe)
    }

    /// The snapshot's sidecar metadata, if present and readable.
    pub fn meta(&self) -> Option<SnapshotMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }
}

fn write_parquet(df: &DataFrame, path: &Path, table: &'static str) -> Result<(), StoreError> {
    let file = fs::File::create(path)
        .map_err(|e| StoreError::WriteFailed { table, reason: format!("create: {e}") })?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::WriteFailed { table, reason: format!("write: {e}") })?;
    Ok(())
}
