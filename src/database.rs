//! Database files and their lifecycle.
//!
//! A [`StorageEngine`] owns one database file: its disk manager, buffer pool
//! and the two reserved pages every file starts with (catalog meta at logical
//! page 0, index roots at logical page 1). A [`DatabaseRegistry`] keeps the
//! named engines of a data directory open and is passed explicitly to
//! whoever needs it.

use crate::access::btree::{BPlusTree, KeyManager};
use crate::access::value::DataType;
use crate::storage::buffer::clock::ClockReplacer;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::replacer::Replacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::DiskManager;
use crate::storage::page::catalog_meta_page::{CatalogMeta, CatalogMetaPage};
use crate::storage::page::{IndexRootsPage, PageId, CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID};
use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Page replacement policy of the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReplacerKind {
    #[default]
    Lru,
    Clock,
}

/// Tunables applied when a database file is created or opened.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Number of buffer pool frames.
    pub pool_size: usize,
    pub replacer: ReplacerKind,
    /// Override for the leaf fan-out of new and reopened indexes.
    pub leaf_max_size: Option<usize>,
    /// Override for the internal fan-out of new and reopened indexes.
    pub internal_max_size: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer: ReplacerKind::Lru,
            leaf_max_size: None,
            internal_max_size: None,
        }
    }
}

impl StorageConfig {
    fn build_replacer(&self) -> Box<dyn Replacer> {
        match self.replacer {
            ReplacerKind::Lru => Box::new(LruReplacer::new(self.pool_size)),
            ReplacerKind::Clock => Box::new(ClockReplacer::new(self.pool_size)),
        }
    }

    fn build_buffer_pool(&self, disk_manager: DiskManager) -> Result<BufferPoolManager> {
        if self.pool_size < 4 {
            bail!("Buffer pool needs at least 4 frames, got {}", self.pool_size);
        }
        Ok(BufferPoolManager::new(
            disk_manager,
            self.build_replacer(),
            self.pool_size,
        ))
    }
}

const INDEX_META_MAGIC: u32 = 344_528;

/// One database file.
pub struct StorageEngine {
    path: PathBuf,
    config: StorageConfig,
    buffer_pool: BufferPoolManager,
    // Serializes read-modify-write cycles on the catalog meta page.
    catalog_latch: Mutex<()>,
}

impl StorageEngine {
    /// Create a new database file and reserve its catalog pages.
    pub fn create(path: &Path, config: StorageConfig) -> Result<Self> {
        if path.exists() {
            bail!("Database file already exists at {:?}", path);
        }

        let disk_manager = DiskManager::create(path)?;
        let buffer_pool = config.build_buffer_pool(disk_manager)?;

        let (catalog_id, mut guard) = buffer_pool.new_page()?;
        if catalog_id != CATALOG_META_PAGE_ID {
            bail!("Fresh database handed out page {} for the catalog", catalog_id);
        }
        CatalogMetaPage::from_data(&mut guard[..]).write(&CatalogMeta::default())?;
        drop(guard);

        let (roots_id, mut guard) = buffer_pool.new_page()?;
        if roots_id != INDEX_ROOTS_PAGE_ID {
            bail!("Fresh database handed out page {} for index roots", roots_id);
        }
        IndexRootsPage::from_data(&mut guard[..]).init();
        drop(guard);

        buffer_pool.flush_all()?;
        info!("created database {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            config,
            buffer_pool,
            catalog_latch: Mutex::new(()),
        })
    }

    /// Open an existing database file, validating its catalog page.
    pub fn open(path: &Path, config: StorageConfig) -> Result<Self> {
        if !path.exists() {
            bail!("Database file does not exist at {:?}", path);
        }

        let disk_manager = DiskManager::open(path)?;
        let buffer_pool = config.build_buffer_pool(disk_manager)?;
        let engine = Self {
            path: path.to_path_buf(),
            config,
            buffer_pool,
            catalog_latch: Mutex::new(()),
        };

        let meta = engine
            .catalog_meta()
            .with_context(|| format!("{:?} is not a pagedb database", path))?;
        info!(
            "opened database {:?} with {} indexes",
            path,
            meta.index_meta_pages.len()
        );
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    pub fn catalog_meta(&self) -> Result<CatalogMeta> {
        let guard = self.buffer_pool.fetch_page(CATALOG_META_PAGE_ID)?;
        Ok(CatalogMetaPage::from_data(&guard[..]).read()?)
    }

    fn write_catalog_meta(&self, meta: &CatalogMeta) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(CATALOG_META_PAGE_ID)?;
        CatalogMetaPage::from_data(&mut guard[..]).write(meta)?;
        Ok(())
    }

    pub fn index_ids(&self) -> Result<Vec<u32>> {
        Ok(self.catalog_meta()?.index_meta_pages.into_keys().collect())
    }

    /// Register a new, empty index over keys of `schema`.
    pub fn create_index(&self, schema: Vec<DataType>) -> Result<BPlusTree> {
        let key_manager = KeyManager::new(schema)?;
        let _latch = self.catalog_latch.lock();

        let mut meta = self.catalog_meta()?;
        let index_id = meta.next_index_id();

        // Validates the fan-out before anything is written.
        let tree = BPlusTree::new(
            index_id,
            self.buffer_pool.clone(),
            key_manager,
            self.config.leaf_max_size,
            self.config.internal_max_size,
        )?;

        let (meta_page_id, mut guard) = self.buffer_pool.new_page()?;
        let encoded = encode_key_schema(&mut guard[..], tree.key_manager().schema());
        drop(guard);
        meta.index_meta_pages.insert(index_id, meta_page_id);
        if let Err(e) = encoded.and_then(|()| self.write_catalog_meta(&meta)) {
            self.buffer_pool.delete_page(meta_page_id)?;
            return Err(e);
        }

        debug!(
            "created index {} with metadata page {}",
            index_id, meta_page_id
        );
        Ok(tree)
    }

    pub fn open_index(&self, index_id: u32) -> Result<BPlusTree> {
        let meta_page_id = self.index_meta_page(index_id)?;
        let schema = {
            let guard = self.buffer_pool.fetch_page(meta_page_id)?;
            decode_key_schema(&guard[..])
                .with_context(|| format!("Corrupted metadata for index {}", index_id))?
        };

        BPlusTree::new(
            index_id,
            self.buffer_pool.clone(),
            KeyManager::new(schema)?,
            self.config.leaf_max_size,
            self.config.internal_max_size,
        )
    }

    /// Free every page of an index and forget it. Returns `false` if no
    /// such index exists.
    pub fn drop_index(&self, index_id: u32) -> Result<bool> {
        if self.index_meta_page(index_id).is_err() {
            return Ok(false);
        }
        self.open_index(index_id)?.destroy()?;

        let _latch = self.catalog_latch.lock();
        let mut meta = self.catalog_meta()?;
        if let Some(meta_page_id) = meta.index_meta_pages.remove(&index_id) {
            self.write_catalog_meta(&meta)?;
            if !self.buffer_pool.delete_page(meta_page_id)? {
                bail!("Metadata page {} of index {} is pinned", meta_page_id, index_id);
            }
        }
        debug!("dropped index {}", index_id);
        Ok(true)
    }

    fn index_meta_page(&self, index_id: u32) -> Result<PageId> {
        self.catalog_meta()?
            .index_meta_pages
            .get(&index_id)
            .copied()
            .ok_or_else(|| anyhow!("Index {} does not exist", index_id))
    }

    /// Write every dirty page back and sync the file.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()?;
        Ok(())
    }

    /// Flush and verify that no page is still pinned.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        if !self.buffer_pool.check_all_unpinned() {
            bail!("Closing {:?} with pinned pages", self.path);
        }
        info!("closed database {:?}", self.path);
        Ok(())
    }
}

/// Index metadata page: `magic u32`, `column_count u32`, then per column a
/// type tag byte and, for CHAR, its `u16` capacity.
fn encode_key_schema(data: &mut [u8], schema: &[DataType]) -> Result<()> {
    if 8 + schema.len() * 3 > data.len() {
        bail!("Index key has too many columns: {}", schema.len());
    }
    LittleEndian::write_u32(&mut data[0..], INDEX_META_MAGIC);
    LittleEndian::write_u32(&mut data[4..], schema.len() as u32);
    for (i, data_type) in schema.iter().enumerate() {
        let offset = 8 + i * 3;
        let (tag, width) = match data_type {
            DataType::Boolean => (1, 0),
            DataType::Int32 => (2, 0),
            DataType::Float32 => (3, 0),
            DataType::Char(n) => (4, *n),
        };
        data[offset] = tag;
        LittleEndian::write_u16(&mut data[offset + 1..], width);
    }
    Ok(())
}

fn decode_key_schema(data: &[u8]) -> Result<Vec<DataType>> {
    let magic = LittleEndian::read_u32(&data[0..]);
    if magic != INDEX_META_MAGIC {
        bail!("Bad index metadata magic {:#x}", magic);
    }
    let count = LittleEndian::read_u32(&data[4..]) as usize;
    if 8 + count * 3 > data.len() {
        bail!("Index metadata claims {} columns", count);
    }

    (0..count)
        .map(|i| {
            let offset = 8 + i * 3;
            let width = LittleEndian::read_u16(&data[offset + 1..]);
            match data[offset] {
                1 => Ok(DataType::Boolean),
                2 => Ok(DataType::Int32),
                3 => Ok(DataType::Float32),
                4 => Ok(DataType::Char(width)),
                tag => bail!("Unknown data type tag: {}", tag),
            }
        })
        .collect()
}

/// Named databases of one data directory, each stored as `<name>.db`.
pub struct DatabaseRegistry {
    data_dir: PathBuf,
    config: StorageConfig,
    databases: DashMap<String, Arc<StorageEngine>>,
}

impl DatabaseRegistry {
    pub fn new(data_dir: &Path, config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            databases: DashMap::new(),
        })
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.db", name))
    }

    pub fn create_database(&self, name: &str) -> Result<Arc<StorageEngine>> {
        if self.databases.contains_key(name) {
            bail!("Database '{}' is already open", name);
        }
        let engine = Arc::new(StorageEngine::create(
            &self.path_of(name),
            self.config.clone(),
        )?);
        self.databases.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    /// Return the open engine for `name`, opening its file on first use.
    pub fn open_database(&self, name: &str) -> Result<Arc<StorageEngine>> {
        if let Some(engine) = self.databases.get(name) {
            return Ok(engine.clone());
        }
        let engine = Arc::new(StorageEngine::open(
            &self.path_of(name),
            self.config.clone(),
        )?);
        self.databases.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    pub fn get(&self, name: &str) -> Option<Arc<StorageEngine>> {
        self.databases.get(name).map(|engine| engine.clone())
    }

    /// Names of the currently open databases, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Close `name` and delete its file. Fails while another handle to the
    /// engine is still alive.
    pub fn drop_database(&self, name: &str) -> Result<bool> {
        let path = self.path_of(name);
        if let Some((_, engine)) = self.databases.remove(name) {
            match Arc::try_unwrap(engine) {
                Ok(engine) => engine.close()?,
                Err(engine) => {
                    self.databases.insert(name.to_string(), engine);
                    bail!("Database '{}' is still in use", name);
                }
            }
        }

        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove database file {:?}", path))?;
        info!("dropped database '{}'", name);
        Ok(true)
    }

    /// Close every open database. Engines still referenced elsewhere are
    /// flushed and left to close when their last handle drops.
    pub fn close_all(&self) -> Result<()> {
        for name in self.names() {
            let Some((_, engine)) = self.databases.remove(&name) else {
                continue;
            };
            match Arc::try_unwrap(engine) {
                Ok(engine) => engine.close()?,
                Err(engine) => {
                    warn!("database '{}' still referenced at shutdown", name);
                    engine.flush()?;
                }
            }
        }
        Ok(())
    }
}
