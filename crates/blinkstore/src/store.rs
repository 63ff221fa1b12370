//! Durable map implementation
//!
//! File layout: a single `data.txt` under the storage directory, one
//! `key=value` record per line. Every mutation rewrites the full contents
//! to `data.txt.tmp` and renames it over the live file, so a concurrent
//! open observes either the old or the new file, never a torn one.

use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::record;

/// Name of the live data file
const DATA_FILE: &str = "data.txt";

/// Name of the rewrite scratch file
const TMP_FILE: &str = "data.txt.tmp";

type Map = HashMap<Vec<u8>, Vec<u8>, RandomState>;

/// BlinkStore is the durable half of the engine: a byte-string map with an
/// in-memory mirror that always matches the on-disk file after a mutation
/// returns.
pub struct BlinkStore {
    dir: PathBuf,
    fsync: bool,
    inner: RwLock<Inner>,
}

struct Inner {
    map: Map,
    dirty: bool,
    closed: bool,
}

impl BlinkStore {
    /// Open or create a store in the given directory
    ///
    /// The directory is created if missing. Malformed lines in an existing
    /// data file are skipped; a failure to read the file leaves the store
    /// empty and is reported as a diagnostic, not an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Open a store that fsyncs the data file on every rewrite
    pub fn open_with<P: AsRef<Path>>(path: P, fsync: bool) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let map = match Self::load(&dir.join(DATA_FILE)) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "failed to load data file, starting empty");
                Map::default()
            }
        };

        Ok(BlinkStore {
            dir,
            fsync,
            inner: RwLock::new(Inner {
                map,
                dirty: false,
                closed: false,
            }),
        })
    }

    fn load(path: &Path) -> Result<Map> {
        let mut map = Map::default();
        let mut raw = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut raw)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(map),
            Err(e) => return Err(e.into()),
        }

        for line in raw.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match record::parse_record(line) {
                Ok((_, (key, value))) => {
                    map.insert(key.to_vec(), value.to_vec());
                }
                Err(_) => warn!(len = line.len(), "skipping malformed record"),
            }
        }

        Ok(map)
    }

    /// Look up a key in the in-memory mirror
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().map.get(key).cloned()
    }

    /// Insert or overwrite a key, then rewrite the file
    ///
    /// On a rewrite failure the mirror is rolled back to match the file on
    /// disk and the error propagates.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        record::validate_key(key)?;
        record::validate_value(value)?;

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        let prior = inner.map.insert(key.to_vec(), value.to_vec());
        inner.dirty = true;
        if let Err(e) = self.rewrite(&inner.map) {
            match prior {
                Some(v) => {
                    inner.map.insert(key.to_vec(), v);
                }
                None => {
                    inner.map.remove(key);
                }
            }
            return Err(e);
        }
        inner.dirty = false;
        Ok(())
    }

    /// Remove a key, then rewrite the file; returns prior presence
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        let prior = match inner.map.remove(key) {
            Some(v) => v,
            None => return Ok(false),
        };
        inner.dirty = true;
        if let Err(e) = self.rewrite(&inner.map) {
            inner.map.insert(key.to_vec(), prior);
            return Err(e);
        }
        inner.dirty = false;
        Ok(true)
    }

    /// Drop every record and truncate the file
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(Error::Closed);
        }

        let prior = std::mem::take(&mut inner.map);
        inner.dirty = true;
        if let Err(e) = self.rewrite(&inner.map) {
            inner.map = prior;
            return Err(e);
        }
        inner.dirty = false;
        Ok(())
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    /// True when the store holds no records
    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    /// Force the current file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        let _inner = self.inner.write();
        match File::open(self.dir.join(DATA_FILE)) {
            Ok(file) => {
                file.sync_all()?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Final rewrite if dirty, then fsync; idempotent
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }

        if inner.dirty {
            self.rewrite(&inner.map)?;
            inner.dirty = false;
        }
        match File::open(self.dir.join(DATA_FILE)) {
            Ok(file) => file.sync_all()?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        inner.closed = true;
        Ok(())
    }

    fn rewrite(&self, map: &Map) -> Result<()> {
        let tmp = self.dir.join(TMP_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);

        let mut line = Vec::new();
        for (key, value) in map.iter() {
            line.clear();
            record::encode_record(key, value, &mut line);
            writer.write_all(&line)?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        if self.fsync {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&tmp, self.dir.join(DATA_FILE))?;
        Ok(())
    }
}

impl Drop for BlinkStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
