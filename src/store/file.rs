use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{RecordStore, Row, StoreError, Table};
use crate::limits::MAX_ROW_BYTES;

/// Encode a single row to [len][bincode][crc32] format.
fn encode_row(writer: &mut impl Write, row: &Row) -> io::Result<()> {
    let payload =
        bincode::serialize(row).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_ROW_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Flat-file record store: one directory per owner, one file per table.
///
/// Format per record: `[u32: len][bincode: Row][u32: crc32]`
/// - A table is always rewritten whole: temp file, fsync, rename.
/// - Truncated or corrupt trailing records are discarded on read.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, owner: &str, table: Table) -> PathBuf {
        self.root.join(owner).join(format!("{}.tbl", table.name()))
    }

    fn write_table_file(path: &Path, rows: &[Row]) -> io::Result<()> {
        let tmp_path = path.with_extension("tbl.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            encode_row(&mut writer, row)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, path)
    }

    fn read_table_file(path: &Path) -> io::Result<Vec<Row>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut rows = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_ROW_BYTES {
                tracing::warn!("oversized record header in {}, discarding tail", path.display());
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!("corrupt record in {}, discarding tail", path.display());
                break;
            }

            match bincode::deserialize::<Row>(&payload) {
                Ok(row) => rows.push(row),
                Err(_) => break,
            }
        }

        Ok(rows)
    }
}

impl RecordStore for FileStore {
    fn read_all(&self, owner: &str, table: Table) -> Result<Vec<Row>, StoreError> {
        Ok(Self::read_table_file(&self.table_path(owner, table))?)
    }

    fn write_all(&self, owner: &str, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        fs::create_dir_all(self.root.join(owner))?;
        Self::write_table_file(&self.table_path(owner, table), &rows)?;
        Ok(())
    }

    fn owners(&self) -> Result<Vec<String>, StoreError> {
        let mut owners = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str() {
                    owners.push(name.to_string());
                }
        }
        owners.sort();
        Ok(owners)
    }
}
