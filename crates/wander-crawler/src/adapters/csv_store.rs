use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::collab::RecordStore;
use crate::record::ItemRecord;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsvWriterConfig {
    #[serde(default = "default_csv_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub escape: Option<char>,
    #[serde(default)]
    pub flexible: bool,
    #[serde(default = "default_csv_terminator")]
    pub terminator: CsvTerminator,
}

impl Default for CsvWriterConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            escape: None,
            flexible: false,
            terminator: CsvTerminator::Any('\n'),
        }
    }
}

fn default_csv_delimiter() -> char {
    CsvWriterConfig::default().delimiter
}

fn default_csv_terminator() -> CsvTerminator {
    CsvWriterConfig::default().terminator
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CsvTerminator {
    CRLF,
    Any(char),
}

impl From<CsvTerminator> for csv::Terminator {
    fn from(source: CsvTerminator) -> Self {
        match source {
            CsvTerminator::CRLF => Self::CRLF,
            CsvTerminator::Any(c) => Self::Any(c as u8),
        }
    }
}

impl From<&CsvWriterConfig> for csv::WriterBuilder {
    fn from(c: &CsvWriterConfig) -> Self {
        let mut builder = csv::WriterBuilder::new();
        builder.delimiter(c.delimiter as u8);
        builder.terminator(c.terminator.into());
        builder.flexible(c.flexible);
        if let Some(escape) = c.escape {
            builder.double_quote(false);
            builder.escape(escape as u8);
        } else {
            builder.double_quote(true);
        }
        builder
    }
}

impl From<&CsvWriterConfig> for csv::ReaderBuilder {
    fn from(c: &CsvWriterConfig) -> Self {
        let mut builder = csv::ReaderBuilder::new();
        builder.delimiter(c.delimiter as u8);
        builder.terminator(c.terminator.into());
        builder.flexible(c.flexible);
        if let Some(escape) = c.escape {
            builder.double_quote(false);
            builder.escape(Some(escape as u8));
        } else {
            builder.double_quote(true);
        }
        builder
    }
}

/// Append-only CSV file of records, also used as the startup seed.
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
    config: CsvWriterConfig,
    write_lock: Arc<Mutex<()>>,
}

impl CsvRecordStore {
    pub fn new(path: impl Into<PathBuf>, config: CsvWriterConfig) -> Self {
        Self {
            path: path.into(),
            config,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, records: &[ItemRecord]) -> anyhow::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut wtr = csv::WriterBuilder::from(&self.config)
            .has_headers(is_new)
            .from_writer(file);
        for record in records {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn read_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        match fs_err::File::open(&self.path) {
            Ok(file) => read_records(file, &self.config),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordStore for CsvRecordStore {
    async fn add_batch(&self, records: &[ItemRecord]) -> anyhow::Result<()> {
        let store = self.clone();
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || store.append(&records)).await?
    }

    async fn get_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.read_all()).await?
    }
}

fn read_records<R: Read>(rdr: R, config: &CsvWriterConfig) -> anyhow::Result<Vec<ItemRecord>> {
    csv::ReaderBuilder::from(config)
        .has_headers(true)
        .from_reader(rdr)
        .deserialize::<ItemRecord>()
        .map(|row| row.map_err(anyhow::Error::from))
        .collect()
}

/// Reads a bulk export, gzip compressed when the path ends in `.gz`.
/// Every returned record is flagged as imported.
pub fn import_csv(path: impl AsRef<Path>, config: &CsvWriterConfig) -> anyhow::Result<Vec<ItemRecord>> {
    let path = path.as_ref();
    let file = fs_err::File::open(path)?;
    let mut records = match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => read_records(GzDecoder::new(file), config)?,
        _ => read_records(file, config)?,
    };
    records.iter_mut().for_each(|r| r.imported = true);
    log::info!("Imported {} records from {}", records.len(), path.display());
    Ok(records)
}
