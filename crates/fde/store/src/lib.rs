//! Encoding storage in the headerless f32 layout.
//!
//! Uses two files:
//! - `encodings.dat`: append-only little-endian f32 values, one encoding after
//!   another with no header, so it can be memory-mapped straight into a MIPS index
//! - `manifest.json`: encoding length, document ids in storage order, the
//!   encoding config and its fingerprint
//!
//! Encoding `i` starts at byte `i * encoding_len * 4`, so no offset index is
//! needed. A store only accepts encodings produced under a config with the same
//! fingerprint as the one it was created with.

use std::io::Write as _;

use eyre::WrapErr as _;

#[cfg(not(target_endian = "little"))]
compile_error!("fde-store maps encodings in place and requires a little-endian target");

const DATA_FILE: &str = "encodings.dat";
const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";
const MANIFEST_VERSION: u32 = 1;

const F32_SIZE: usize = std::mem::size_of::<f32>();

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Manifest {
    version: u32,
    fingerprint: String,
    encoding_len: usize,
    config: fde_core::EncodingConfig,
    ids: Vec<String>,
}

/// Memory-mapped store of encodings keyed by document id.
pub struct EncodingStore {
    base_path: std::path::PathBuf,
    config: fde_core::EncodingConfig,
    encoding_len: usize,
    /// Memory-mapped data file (lazily initialized on first read)
    mmap: Option<memmap2::Mmap>,
    /// Document ids in storage order
    ids: Vec<String>,
    /// id -> storage position
    positions: std::collections::HashMap<String, usize>,
    /// Buffered file handle for batch writes (avoids repeated open/close)
    write_handle: Option<std::io::BufWriter<std::fs::File>>,
    /// Track if we have unflushed writes
    dirty: bool,
}

impl EncodingStore {
    /// Open or create a store for encodings produced under `config`.
    ///
    /// Fails if the store already exists with a different config fingerprint.
    pub fn open(
        base_path: impl Into<std::path::PathBuf>,
        config: &fde_core::EncodingConfig,
    ) -> eyre::Result<Self> {
        let base_path = base_path.into();
        config.validate().wrap_err("refusing to open store")?;

        std::fs::create_dir_all(&base_path)
            .wrap_err_with(|| format!("failed to create directory {}", base_path.display()))?;

        let mut store = Self::empty(base_path, config.clone());

        if let Some(manifest) = store.read_manifest()? {
            let expected = config.fingerprint().to_hex();
            if manifest.fingerprint != expected {
                eyre::bail!(
                    "store at {} holds encodings for config {}, not {expected}",
                    store.base_path.display(),
                    manifest.fingerprint
                );
            }
            store.load(manifest)?;
        } else {
            // Without a manifest no byte of the data file is indexed.
            store.reconcile_data_file(0)?;
        }

        Ok(store)
    }

    /// Open an existing store using the config recorded in its manifest.
    pub fn open_existing(base_path: impl Into<std::path::PathBuf>) -> eyre::Result<Self> {
        let base_path = base_path.into();
        let mut store = Self::empty(base_path, fde_core::EncodingConfig::default());

        let Some(manifest) = store.read_manifest()? else {
            eyre::bail!("no encoding store found at {}", store.base_path.display());
        };

        store.config = manifest.config.clone();
        store.config.validate().wrap_err("store manifest holds an invalid config")?;
        store.encoding_len = store.config.encoding_len();

        if manifest.fingerprint != store.config.fingerprint().to_hex() {
            eyre::bail!("store manifest fingerprint does not match its config");
        }
        store.load(manifest)?;

        Ok(store)
    }

    fn empty(base_path: std::path::PathBuf, config: fde_core::EncodingConfig) -> Self {
        Self {
            base_path,
            encoding_len: config.encoding_len(),
            config,
            mmap: None,
            ids: Vec::new(),
            positions: std::collections::HashMap::new(),
            write_handle: None,
            dirty: false,
        }
    }

    fn read_manifest(&self) -> eyre::Result<Option<Manifest>> {
        let manifest_path = self.base_path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&manifest_path)
            .wrap_err_with(|| format!("failed to read manifest {}", manifest_path.display()))?;
        let manifest: Manifest = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("failed to parse manifest {}", manifest_path.display()))?;

        if manifest.version != MANIFEST_VERSION {
            eyre::bail!(
                "unsupported manifest version: expected {MANIFEST_VERSION}, got {}",
                manifest.version
            );
        }

        Ok(Some(manifest))
    }

    /// Adopt a manifest's ids and reconcile the data file with them.
    fn load(&mut self, manifest: Manifest) -> eyre::Result<()> {
        if manifest.encoding_len != self.encoding_len {
            eyre::bail!(
                "manifest encoding length {} does not match config length {}",
                manifest.encoding_len,
                self.encoding_len
            );
        }

        self.reconcile_data_file(manifest.ids.len())?;

        self.positions = manifest
            .ids
            .iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();
        self.ids = manifest.ids;

        tracing::debug!(count = self.ids.len(), "loaded encoding store");
        Ok(())
    }

    /// Make the data file hold exactly `indexed` encodings.
    ///
    /// Bytes past the indexed encodings were left by an interrupted write and
    /// are dropped; fewer bytes than indexed is an error.
    fn reconcile_data_file(&self, indexed: usize) -> eyre::Result<()> {
        let data_path = self.base_path.join(DATA_FILE);
        let expected_bytes = (indexed * self.encoding_len * F32_SIZE) as u64;
        let actual_bytes = match std::fs::metadata(&data_path) {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };

        if actual_bytes < expected_bytes {
            eyre::bail!(
                "data file {} is truncated: expected {expected_bytes} bytes, found {actual_bytes}",
                data_path.display()
            );
        }
        if actual_bytes > expected_bytes {
            tracing::warn!(
                path = %data_path.display(),
                expected_bytes,
                actual_bytes,
                "dropping unindexed trailing data"
            );
            std::fs::OpenOptions::new()
                .write(true)
                .open(&data_path)
                .and_then(|file| file.set_len(expected_bytes))
                .wrap_err_with(|| format!("failed to truncate {}", data_path.display()))?;
        }

        Ok(())
    }

    /// Write the manifest file from memory.
    ///
    /// The new manifest is written beside the old one and renamed over it, so
    /// a reader sees either the previous or the new manifest in full.
    fn write_manifest(&self) -> eyre::Result<()> {
        let manifest_path = self.base_path.join(MANIFEST_FILE);
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            fingerprint: self.config.fingerprint().to_hex(),
            encoding_len: self.encoding_len,
            config: self.config.clone(),
            ids: self.ids.clone(),
        };

        let tmp_path = self.base_path.join(MANIFEST_TMP_FILE);
        let file = std::fs::File::create(&tmp_path)
            .wrap_err_with(|| format!("failed to create manifest {}", tmp_path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &manifest).wrap_err("failed to write manifest")?;
        writer.flush().wrap_err("failed to flush manifest")?;
        writer
            .get_ref()
            .sync_all()
            .wrap_err("failed to sync manifest")?;
        drop(writer);

        std::fs::rename(&tmp_path, &manifest_path).wrap_err_with(|| {
            format!("failed to replace manifest {}", manifest_path.display())
        })?;

        Ok(())
    }

    /// Ensure the mmap is initialized.
    fn ensure_mmap(&mut self) -> eyre::Result<()> {
        if self.mmap.is_some() || self.ids.is_empty() {
            return Ok(());
        }

        let data_path = self.base_path.join(DATA_FILE);
        let file = std::fs::File::open(&data_path)
            .wrap_err_with(|| format!("failed to open data file {}", data_path.display()))?;

        // SAFETY: the data file is only appended to through this store, and the
        // map is dropped before every append.
        let mmap = unsafe {
            memmap2::Mmap::map(&file)
                .wrap_err_with(|| format!("failed to mmap {}", data_path.display()))?
        };

        self.mmap = Some(mmap);
        Ok(())
    }

    /// Get or create the buffered write handle.
    fn get_write_handle(&mut self) -> eyre::Result<&mut std::io::BufWriter<std::fs::File>> {
        if self.write_handle.is_none() {
            let data_path = self.base_path.join(DATA_FILE);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&data_path)
                .wrap_err_with(|| format!("failed to open data file {}", data_path.display()))?;
            self.write_handle = Some(std::io::BufWriter::with_capacity(64 * 1024, file));
        }
        self.write_handle
            .as_mut()
            .ok_or_else(|| eyre::eyre!("write handle unavailable"))
    }

    /// Store an encoding under `id`.
    ///
    /// Ids already present are skipped. Writes are buffered; call `flush()` to
    /// persist them.
    pub fn store(&mut self, id: &str, encoding: &fde_core::Encoding) -> eyre::Result<()> {
        if self.positions.contains_key(id) {
            tracing::debug!(id, "encoding already stored");
            return Ok(());
        }

        if encoding.len() != self.encoding_len {
            eyre::bail!(
                "expected encoding length {}, got {}",
                self.encoding_len,
                encoding.len()
            );
        }

        // Invalidate mmap before the file grows
        self.mmap = None;

        let writer = self.get_write_handle()?;
        for &value in encoding.as_slice() {
            writer
                .write_all(&value.to_le_bytes())
                .wrap_err("failed to write encoding value")?;
        }

        self.positions.insert(id.to_string(), self.ids.len());
        self.ids.push(id.to_string());
        self.dirty = true;

        Ok(())
    }

    /// Flush buffered writes to disk and update the manifest.
    pub fn flush(&mut self) -> eyre::Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(writer) = &mut self.write_handle {
            writer.flush().wrap_err("failed to flush encodings")?;
        }

        self.write_manifest()?;

        self.dirty = false;
        Ok(())
    }

    /// Encoding stored at `position`.
    pub fn get_at(&mut self, position: usize) -> eyre::Result<Option<&[f32]>> {
        if position >= self.ids.len() {
            return Ok(None);
        }
        if self.dirty {
            self.flush()?;
        }
        self.ensure_mmap()?;
        self.slice_at(position).map(Some)
    }

    /// Encoding stored under `id`.
    pub fn get(&mut self, id: &str) -> eyre::Result<Option<&[f32]>> {
        match self.positions.get(id).copied() {
            Some(position) => self.get_at(position),
            None => Ok(None),
        }
    }

    /// Every stored `(id, encoding)` pair in storage order.
    pub fn entries(&mut self) -> eyre::Result<Vec<(&str, &[f32])>> {
        if self.dirty {
            self.flush()?;
        }
        self.ensure_mmap()?;

        let this = &*self;
        (0..this.ids.len())
            .map(|position| Ok((this.ids[position].as_str(), this.slice_at(position)?)))
            .collect()
    }

    fn slice_at(&self, position: usize) -> eyre::Result<&[f32]> {
        let Some(mmap) = &self.mmap else {
            eyre::bail!("encoding data is not mapped");
        };

        let byte_offset = position * self.encoding_len * F32_SIZE;
        let byte_len = self.encoding_len * F32_SIZE;

        // Bounds check
        if byte_offset + byte_len > mmap.len() {
            eyre::bail!(
                "encoding data out of bounds: offset={byte_offset}, len={byte_len}, file_size={}",
                mmap.len()
            );
        }

        // SAFETY: in bounds, the map is page aligned and every offset is a
        // multiple of 4, and the target is little-endian.
        let data_ptr = unsafe { mmap.as_ptr().add(byte_offset) };
        Ok(unsafe { std::slice::from_raw_parts(data_ptr.cast::<f32>(), self.encoding_len) })
    }

    /// Config every stored encoding was produced under.
    #[must_use]
    pub fn config(&self) -> &fde_core::EncodingConfig {
        &self.config
    }

    /// Length of every stored encoding.
    #[must_use]
    pub fn encoding_len(&self) -> usize {
        self.encoding_len
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Document ids in storage order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of stored encodings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for EncodingStore {
    fn drop(&mut self) {
        // Best-effort flush on drop
        if self.dirty {
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn config() -> fde_core::EncodingConfig {
        fde_core::EncodingConfig::new(4)
            .with_repetitions(2)
            .with_simhash_projections(1)
    }

    fn encoding(seed: usize, len: usize) -> fde_core::Encoding {
        fde_core::Encoding::from_vec((0..len).map(|i| (seed * 1000 + i) as f32).collect())
    }

    fn temp_store_dir(name: &str) -> std::path::PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&tmp);
        tmp
    }

    #[test]
    fn test_store_roundtrip() {
        let tmp = temp_store_dir("fde-store-roundtrip-test");
        let config = config();
        let len = config.encoding_len();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc-a", &encoding(1, len)).unwrap();
        store.store("doc-b", &encoding(2, len)).unwrap();
        store.flush().unwrap();
        assert_eq!(store.len(), 2);

        // Reload store
        drop(store);
        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        assert!(store.contains("doc-b"));
        assert_eq!(store.get("doc-b").unwrap().unwrap(), encoding(2, len).as_slice());
        assert_eq!(store.get_at(0).unwrap().unwrap(), encoding(1, len).as_slice());
        assert!(store.get("missing").unwrap().is_none());
        assert!(store.get_at(2).unwrap().is_none());

        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_data_file_is_headerless() {
        let tmp = temp_store_dir("fde-store-layout-test");
        let config = config();
        let len = config.encoding_len();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        for i in 0..3 {
            store.store(&format!("doc-{i}"), &encoding(i, len)).unwrap();
        }
        store.flush().unwrap();

        let bytes = std::fs::read(tmp.join(DATA_FILE)).unwrap();
        assert_eq!(bytes.len(), 3 * len * 4);
        let second_start = f32::from_le_bytes(bytes[len * 4..len * 4 + 4].try_into().unwrap());
        assert_eq!(second_start, 1000.0);

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_duplicate_ids_are_skipped() {
        let tmp = temp_store_dir("fde-store-duplicate-test");
        let config = config();
        let len = config.encoding_len();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc", &encoding(1, len)).unwrap();
        store.store("doc", &encoding(2, len)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("doc").unwrap().unwrap(), encoding(1, len).as_slice());

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_rejects_wrong_length() {
        let tmp = temp_store_dir("fde-store-length-test");
        let mut store = EncodingStore::open(tmp.clone(), &config()).unwrap();
        assert!(store.store("doc", &encoding(0, 3)).is_err());
        assert!(store.is_empty());

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_rejects_incompatible_config() {
        let tmp = temp_store_dir("fde-store-fingerprint-test");
        let config = config();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc", &encoding(0, config.encoding_len())).unwrap();
        store.flush().unwrap();
        drop(store);

        assert!(EncodingStore::open(tmp.clone(), &config.clone().with_seed(1)).is_err());

        // Query and document modes share a fingerprint.
        let as_document = config.with_encoding_type(fde_core::EncodingType::Average);
        assert!(EncodingStore::open(tmp.clone(), &as_document).is_ok());

        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_open_existing_reads_config() {
        let tmp = temp_store_dir("fde-store-existing-test");
        assert!(EncodingStore::open_existing(tmp.clone()).is_err());

        let config = config().with_seed(99);
        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc", &encoding(3, config.encoding_len())).unwrap();
        drop(store);

        let mut store = EncodingStore::open_existing(tmp.clone()).unwrap();
        assert_eq!(store.config().seed, 99);
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "doc");

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_trailing_data_is_dropped() {
        let tmp = temp_store_dir("fde-store-trailing-test");
        let config = config();
        let len = config.encoding_len();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc", &encoding(1, len)).unwrap();
        store.flush().unwrap();
        drop(store);

        // Simulate a write that never reached the manifest.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(tmp.join(DATA_FILE))
            .unwrap();
        file.write_all(&[0_u8; 12]).unwrap();
        drop(file);

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc-2", &encoding(2, len)).unwrap();
        assert_eq!(store.get("doc-2").unwrap().unwrap(), encoding(2, len).as_slice());

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_orphaned_data_without_manifest_is_dropped() {
        let tmp = temp_store_dir("fde-store-orphan-test");
        let config = config();
        let len = config.encoding_len();

        // A first run that wrote data but died before its manifest.
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join(DATA_FILE), vec![0_u8; len * 4]).unwrap();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        assert!(store.is_empty());
        store.store("doc", &encoding(1, len)).unwrap();
        assert_eq!(store.get("doc").unwrap().unwrap(), encoding(1, len).as_slice());
        drop(store);

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        assert_eq!(store.get("doc").unwrap().unwrap(), encoding(1, len).as_slice());
        assert_eq!(
            std::fs::metadata(tmp.join(DATA_FILE)).unwrap().len(),
            (len * 4) as u64
        );

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn test_manifest_is_replaced_whole() {
        let tmp = temp_store_dir("fde-store-manifest-test");
        let config = config();
        let len = config.encoding_len();

        let mut store = EncodingStore::open(tmp.clone(), &config).unwrap();
        store.store("doc-a", &encoding(1, len)).unwrap();
        store.flush().unwrap();
        store.store("doc-b", &encoding(2, len)).unwrap();
        store.flush().unwrap();

        assert!(!tmp.join(MANIFEST_TMP_FILE).exists());
        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(tmp.join(MANIFEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest.ids, vec!["doc-a".to_string(), "doc-b".to_string()]);
        assert_eq!(manifest.encoding_len, len);
        assert_eq!(manifest.fingerprint, config.fingerprint().to_hex());

        drop(store);
        std::fs::remove_dir_all(&tmp).unwrap();
    }
}
