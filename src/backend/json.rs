//! Flat-file JSON backend.
//!
//! Each table lives in its own file under the store directory. Files are
//! created with an empty table on open and re-read only when their
//! modification time changes. Writers are serialised by a single lock and
//! replace a file by writing a temporary sibling and renaming it over the
//! original, so readers always see either the old or the new table.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{
    Backend,
    BackendError,
    LogRecord,
    LogRemoval,
    OverlayMapping,
    OverlayUpdate,
    RouteMapping,
    RouteQuery,
    UnderlayMapping,
    UnderlayUpdate,
    same_ip,
    select_route,
};
use crate::{message::LogEntry, protocol::MacAddress};

pub const OVERLAY_FILE: &str = "vnet_mac_ip.json";
pub const UNDERLAY_FILE: &str = "underlay_mappings.json";
pub const ROUTE_FILE: &str = "vnet_routes.json";
pub const EVENT_FILE: &str = "cn_net_events.json";

/// Underlay table entry, keyed by compute node id in the file.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct UnderlayEntry {
    ip: IpAddr,
    #[serde(default = "super::default_port")]
    port: u16,
}

type OverlayTable = Vec<OverlayMapping>;
type UnderlayTable = BTreeMap<Uuid, UnderlayEntry>;
type RouteTable = Vec<RouteMapping>;
type EventTable = Vec<LogRecord>;

struct Loaded<T> {
    mtime: SystemTime,
    table: Arc<T>,
}

/// One JSON file and its last parsed contents.
struct TableFile<T> {
    path: PathBuf,
    cached: Mutex<Option<Loaded<T>>>,
}

fn io_error(path: &Path, source: std::io::Error) -> BackendError {
    BackendError::Io {
        path: path.to_owned(),
        source,
    }
}

impl<T> TableFile<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            cached: Mutex::new(None),
        }
    }

    /// Create the file with an empty table if it does not exist.
    async fn init(&self) -> Result<(), BackendError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("initialising {}", self.path.display());
                self.write(&T::default()).await.map(|_| ())
            }
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn modified(&self) -> Result<SystemTime, BackendError> {
        tokio::fs::metadata(&self.path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| io_error(&self.path, e))
    }

    /// Current table, re-read from disk only if the file changed.
    async fn load(&self) -> Result<Arc<T>, BackendError> {
        let mtime = self.modified().await?;
        if let Some(loaded) = self.cached.lock().as_ref() {
            if loaded.mtime == mtime {
                return Ok(Arc::clone(&loaded.table));
            }
        }

        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        let table: Arc<T> =
            Arc::new(
                serde_json::from_slice(&raw).map_err(|source| BackendError::Json {
                    path: self.path.clone(),
                    source,
                })?,
            );
        log::debug!("reloaded {}", self.path.display());
        *self.cached.lock() = Some(Loaded {
            mtime,
            table: Arc::clone(&table),
        });
        Ok(table)
    }

    /// Replace the file atomically and remember the new contents.
    async fn write(&self, table: &T) -> Result<Arc<T>, BackendError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let mut temp = self.path.clone().into_os_string();
        temp.push(format!(".{millis}.{}", process::id()));
        let temp = PathBuf::from(temp);

        let body = serde_json::to_vec_pretty(table).map_err(|source| BackendError::Json {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&temp, body)
            .await
            .map_err(|e| io_error(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        let table = Arc::new(table.clone());
        let mtime = self.modified().await?;
        *self.cached.lock() = Some(Loaded {
            mtime,
            table: Arc::clone(&table),
        });
        Ok(table)
    }
}

/// [`Backend`] storing every table as a JSON file in one directory.
pub struct JsonStore {
    dir: PathBuf,
    overlay: TableFile<OverlayTable>,
    underlay: TableFile<UnderlayTable>,
    routes: TableFile<RouteTable>,
    events: TableFile<EventTable>,
    writer: tokio::sync::Mutex<()>,
}

impl JsonStore {
    /// Open the store in `dir`, creating the directory and any missing files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a table file cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        let store = Self {
            overlay: TableFile::new(&dir, OVERLAY_FILE),
            underlay: TableFile::new(&dir, UNDERLAY_FILE),
            routes: TableFile::new(&dir, ROUTE_FILE),
            events: TableFile::new(&dir, EVENT_FILE),
            writer: tokio::sync::Mutex::new(()),
            dir,
        };
        store.overlay.init().await?;
        store.underlay.init().await?;
        store.routes.init().await?;
        store.events.init().await?;
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path { &self.dir }
}

fn underlay_mapping(cn_id: Uuid, entry: &UnderlayEntry) -> UnderlayMapping {
    UnderlayMapping {
        cn_id,
        ip: entry.ip,
        port: entry.port,
    }
}

#[async_trait]
impl Backend for JsonStore {
    async fn lookup_overlay_mac(
        &self,
        mac: MacAddress,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError> {
        let table = self.overlay.load().await?;
        Ok(table
            .iter()
            .find(|rec| rec.mac == mac && rec.vnet_id == vnet_id)
            .cloned())
    }

    async fn lookup_overlay_ip(
        &self,
        ip: IpAddr,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError> {
        let table = self.overlay.load().await?;
        Ok(table
            .iter()
            .find(|rec| same_ip(rec.ip, ip) && rec.vnet_id == vnet_id)
            .cloned())
    }

    async fn lookup_underlay(&self, cn_id: Uuid) -> Result<Option<UnderlayMapping>, BackendError> {
        let table = self.underlay.load().await?;
        Ok(table
            .get(&cn_id)
            .map(|entry| underlay_mapping(cn_id, entry)))
    }

    async fn lookup_underlay_by_ip(
        &self,
        ip: IpAddr,
    ) -> Result<Option<UnderlayMapping>, BackendError> {
        let table = self.underlay.load().await?;
        Ok(table
            .iter()
            .find(|(_, entry)| same_ip(entry.ip, ip))
            .map(|(cn_id, entry)| underlay_mapping(*cn_id, entry)))
    }

    async fn lookup_route(&self, query: RouteQuery) -> Result<Option<RouteMapping>, BackendError> {
        let table = self.routes.load().await?;
        Ok(select_route(table.iter(), &query).cloned())
    }

    async fn fetch_log(
        &self,
        cn_id: Uuid,
        max_entries: usize,
    ) -> Result<Vec<LogEntry>, BackendError> {
        let table = self.events.load().await?;
        Ok(table
            .iter()
            .filter(|record| record.cn_id == cn_id)
            .take(max_entries)
            .map(|record| record.entry)
            .collect())
    }

    async fn remove_log(&self, ids: &[Uuid]) -> Result<Vec<LogRemoval>, BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = EventTable::clone(&*self.events.load().await?);
        let outcomes: Vec<LogRemoval> = ids
            .iter()
            .map(|id| {
                let before = table.len();
                table.retain(|record| record.entry.id() != *id);
                if table.len() < before {
                    LogRemoval::Removed
                } else {
                    LogRemoval::Missing
                }
            })
            .collect();
        if outcomes.contains(&LogRemoval::Removed) {
            self.events.write(&table).await?;
        }
        Ok(outcomes)
    }

    async fn append_log(&self, cn_id: Uuid, entry: LogEntry) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = EventTable::clone(&*self.events.load().await?);
        if table.iter().any(|record| record.entry.id() == entry.id()) {
            return Err(BackendError::Conflict(format!("log entry {}", entry.id())));
        }
        table.push(LogRecord { cn_id, entry });
        self.events.write(&table).await.map(|_| ())
    }

    async fn add_overlay(&self, mapping: OverlayMapping) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = OverlayTable::clone(&*self.overlay.load().await?);
        if table
            .iter()
            .any(|rec| rec.mac == mapping.mac && rec.vnet_id == mapping.vnet_id)
        {
            return Err(BackendError::Conflict(format!(
                "overlay mapping {},{}",
                mapping.mac, mapping.vnet_id
            )));
        }
        table.push(mapping);
        self.overlay.write(&table).await.map(|_| ())
    }

    async fn update_overlay(
        &self,
        mac: MacAddress,
        vnet_id: u32,
        update: OverlayUpdate,
    ) -> Result<OverlayMapping, BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = OverlayTable::clone(&*self.overlay.load().await?);
        let Some(rec) = table
            .iter_mut()
            .find(|rec| rec.mac == mac && rec.vnet_id == vnet_id)
        else {
            return Err(BackendError::Missing(format!("overlay mapping {mac},{vnet_id}")));
        };
        update.apply(rec);
        let updated = rec.clone();
        self.overlay.write(&table).await?;
        Ok(updated)
    }

    async fn remove_overlay(&self, mac: MacAddress, vnet_id: u32) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = OverlayTable::clone(&*self.overlay.load().await?);
        let before = table.len();
        table.retain(|rec| !(rec.mac == mac && rec.vnet_id == vnet_id));
        if table.len() == before {
            return Err(BackendError::Missing(format!("overlay mapping {mac},{vnet_id}")));
        }
        self.overlay.write(&table).await.map(|_| ())
    }

    async fn add_underlay(&self, mapping: UnderlayMapping) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = UnderlayTable::clone(&*self.underlay.load().await?);
        if table.contains_key(&mapping.cn_id) {
            return Err(BackendError::Conflict(format!(
                "underlay mapping {}",
                mapping.cn_id
            )));
        }
        table.insert(
            mapping.cn_id,
            UnderlayEntry {
                ip: mapping.ip,
                port: mapping.port,
            },
        );
        self.underlay.write(&table).await.map(|_| ())
    }

    async fn update_underlay(
        &self,
        cn_id: Uuid,
        update: UnderlayUpdate,
    ) -> Result<UnderlayMapping, BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = UnderlayTable::clone(&*self.underlay.load().await?);
        let Some(entry) = table.get_mut(&cn_id) else {
            return Err(BackendError::Missing(format!("underlay mapping {cn_id}")));
        };
        let mut mapping = underlay_mapping(cn_id, entry);
        update.apply(&mut mapping);
        entry.ip = mapping.ip;
        entry.port = mapping.port;
        self.underlay.write(&table).await?;
        Ok(mapping)
    }

    async fn remove_underlay(&self, cn_id: Uuid) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = UnderlayTable::clone(&*self.underlay.load().await?);
        if table.remove(&cn_id).is_none() {
            return Err(BackendError::Missing(format!("underlay mapping {cn_id}")));
        }
        self.underlay.write(&table).await.map(|_| ())
    }

    async fn add_route(&self, route: RouteMapping) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = RouteTable::clone(&*self.routes.load().await?);
        if table.iter().any(|rec| rec.id == route.id) {
            return Err(BackendError::Conflict(format!("route {}", route.id)));
        }
        table.push(route);
        self.routes.write(&table).await.map(|_| ())
    }

    async fn remove_route(&self, id: Uuid) -> Result<(), BackendError> {
        let _guard = self.writer.lock().await;
        let mut table = RouteTable::clone(&*self.routes.load().await?);
        let before = table.len();
        table.retain(|rec| rec.id != id);
        if table.len() == before {
            return Err(BackendError::Missing(format!("route {id}")));
        }
        self.routes.write(&table).await.map(|_| ())
    }
}
