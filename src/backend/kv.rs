//! Key-value store backend with a read-through cache.
//!
//! Records are stored as JSON values in named buckets. [`KvBackend`] layers
//! the overlay and underlay lookups on top of any [`KvStore`] and keeps
//! recent results, negative ones included, in [`LruCache`]s. Every mutation
//! invalidates the cache keys it affects.

use std::{
    net::{IpAddr, Ipv6Addr},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use super::{
    Backend,
    BackendError,
    LogRemoval,
    OverlayMapping,
    OverlayUpdate,
    RouteMapping,
    RouteQuery,
    UnderlayMapping,
    UnderlayUpdate,
    cache::LruCache,
    same_ip,
    select_route,
};
use crate::{
    message::LogEntry,
    protocol::{MacAddress, to_wire_ip},
};

pub const OVERLAY_BUCKET: &str = "vnet_mac_ip";
pub const UNDERLAY_BUCKET: &str = "portolan_underlay_mappings";
pub const ROUTE_BUCKET: &str = "vnet_routes";
pub const EVENT_BUCKET: &str = "cn_net_events";

/// Minimal document store interface.
///
/// `find` returns every value in `bucket` whose top-level fields equal all
/// of the given `(field, value)` pairs.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, BackendError>;

    /// Store `value`, replacing any existing value.
    async fn put(&self, bucket: &str, key: &str, value: Value) -> Result<(), BackendError>;

    /// Store `value` only if `key` is absent; returns `false` if it existed.
    async fn put_new(&self, bucket: &str, key: &str, value: Value) -> Result<bool, BackendError>;

    /// Delete `key`; returns `false` if it did not exist.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BackendError>;

    async fn find(
        &self,
        bucket: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Value>, BackendError>;
}

/// Concurrent in-process [`KvStore`].
#[derive(Default)]
pub struct MemoryKv {
    buckets: DashMap<String, DashMap<String, Value>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

fn matches(value: &Value, filter: &[(&str, Value)]) -> bool {
    filter
        .iter()
        .all(|(field, expected)| value.get(field) == Some(expected))
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, BackendError> {
        Ok(self
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key).map(|v| v.value().clone())))
    }

    async fn put(&self, bucket: &str, key: &str, value: Value) -> Result<(), BackendError> {
        self.buckets
            .entry(bucket.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn put_new(&self, bucket: &str, key: &str, value: Value) -> Result<bool, BackendError> {
        let bucket = self.buckets.entry(bucket.to_owned()).or_default();
        match bucket.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        Ok(self
            .buckets
            .get(bucket)
            .is_some_and(|b| b.remove(key).is_some()))
    }

    async fn find(
        &self,
        bucket: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Value>, BackendError> {
        Ok(self
            .buckets
            .get(bucket)
            .map(|b| {
                b.iter()
                    .filter(|item| matches(item.value(), filter))
                    .map(|item| item.value().clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Stored form of a queued log entry.
#[derive(Serialize, Deserialize)]
struct EventRecord {
    cn_id: Uuid,
    seq: u64,
    entry: LogEntry,
}

/// Cache sizing for [`KvBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: super::cache::DEFAULT_CAPACITY,
            ttl: super::cache::DEFAULT_TTL,
        }
    }
}

type Cached<T> = LruCache<T, Option<OverlayMapping>>;

/// [`Backend`] over a [`KvStore`] with read-through caching.
pub struct KvBackend<S> {
    store: S,
    overlay_by_mac: Cached<(MacAddress, u32)>,
    overlay_by_ip: Cached<(Ipv6Addr, u32)>,
    underlay: LruCache<Uuid, Option<UnderlayMapping>>,
    next_seq: AtomicU64,
}

fn overlay_key(mac: MacAddress, vnet_id: u32) -> String { format!("{mac},{vnet_id}") }

fn to_value<T: Serialize>(record: &T) -> Result<Value, BackendError> {
    Ok(serde_json::to_value(record)?)
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    Ok(serde_json::from_value(value)?)
}

impl<S: KvStore> KvBackend<S> {
    #[must_use]
    pub fn new(store: S, cache: CacheConfig) -> Self {
        Self {
            store,
            overlay_by_mac: LruCache::new(cache.capacity, cache.ttl),
            overlay_by_ip: LruCache::new(cache.capacity, cache.ttl),
            underlay: LruCache::new(cache.capacity, cache.ttl),
            next_seq: AtomicU64::new(0),
        }
    }

    /// The wrapped store.
    pub fn store(&self) -> &S { &self.store }

    fn invalidate_overlay(&self, mapping: &OverlayMapping) {
        self.overlay_by_mac
            .invalidate(&(mapping.mac, mapping.vnet_id));
        self.overlay_by_ip
            .invalidate(&(to_wire_ip(mapping.ip), mapping.vnet_id));
    }

    async fn fetch_overlay(
        &self,
        mac: MacAddress,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError> {
        self.store
            .get(OVERLAY_BUCKET, &overlay_key(mac, vnet_id))
            .await?
            .map(from_value)
            .transpose()
    }

    async fn fetch_underlay(&self, cn_id: Uuid) -> Result<Option<UnderlayMapping>, BackendError> {
        self.store
            .get(UNDERLAY_BUCKET, &cn_id.to_string())
            .await?
            .map(from_value)
            .transpose()
    }
}

#[async_trait]
impl<S: KvStore> Backend for KvBackend<S> {
    async fn lookup_overlay_mac(
        &self,
        mac: MacAddress,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError> {
        let key = (mac, vnet_id);
        if let Some(hit) = self.overlay_by_mac.get(&key) {
            return Ok(Option::clone(&hit));
        }
        let found = self.fetch_overlay(mac, vnet_id).await?;
        self.overlay_by_mac.insert(key, found.clone());
        Ok(found)
    }

    async fn lookup_overlay_ip(
        &self,
        ip: IpAddr,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError> {
        let key = (to_wire_ip(ip), vnet_id);
        if let Some(hit) = self.overlay_by_ip.get(&key) {
            return Ok(Option::clone(&hit));
        }
        let candidates = self
            .store
            .find(OVERLAY_BUCKET, &[("vnet_id", Value::from(vnet_id))])
            .await?;
        let mut found = None;
        for value in candidates {
            let mapping: OverlayMapping = from_value(value)?;
            if same_ip(mapping.ip, ip) {
                found = Some(mapping);
                break;
            }
        }
        self.overlay_by_ip.insert(key, found.clone());
        Ok(found)
    }

    async fn lookup_underlay(&self, cn_id: Uuid) -> Result<Option<UnderlayMapping>, BackendError> {
        if let Some(hit) = self.underlay.get(&cn_id) {
            return Ok(Option::clone(&hit));
        }
        let found = self.fetch_underlay(cn_id).await?;
        self.underlay.insert(cn_id, found.clone());
        Ok(found)
    }

    async fn lookup_underlay_by_ip(
        &self,
        ip: IpAddr,
    ) -> Result<Option<UnderlayMapping>, BackendError> {
        for value in self.store.find(UNDERLAY_BUCKET, &[]).await? {
            let mapping: UnderlayMapping = from_value(value)?;
            if same_ip(mapping.ip, ip) {
                return Ok(Some(mapping));
            }
        }
        Ok(None)
    }

    async fn lookup_route(&self, query: RouteQuery) -> Result<Option<RouteMapping>, BackendError> {
        let routes = self
            .store
            .find(ROUTE_BUCKET, &[("src_vnet_id", Value::from(query.vnet_id))])
            .await?
            .into_iter()
            .map(from_value)
            .collect::<Result<Vec<RouteMapping>, _>>()?;
        Ok(select_route(&routes, &query).cloned())
    }

    async fn fetch_log(
        &self,
        cn_id: Uuid,
        max_entries: usize,
    ) -> Result<Vec<LogEntry>, BackendError> {
        let mut records = self
            .store
            .find(EVENT_BUCKET, &[("cn_id", Value::from(cn_id.to_string()))])
            .await?
            .into_iter()
            .map(from_value)
            .collect::<Result<Vec<EventRecord>, _>>()?;
        records.sort_by_key(|record| record.seq);
        Ok(records
            .into_iter()
            .take(max_entries)
            .map(|record| record.entry)
            .collect())
    }

    async fn remove_log(&self, ids: &[Uuid]) -> Result<Vec<LogRemoval>, BackendError> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let removed = self.store.delete(EVENT_BUCKET, &id.to_string()).await?;
            outcomes.push(if removed {
                LogRemoval::Removed
            } else {
                LogRemoval::Missing
            });
        }
        Ok(outcomes)
    }

    async fn append_log(&self, cn_id: Uuid, entry: LogEntry) -> Result<(), BackendError> {
        let record = EventRecord {
            cn_id,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            entry,
        };
        let key = entry.id().to_string();
        if self.store.put_new(EVENT_BUCKET, &key, to_value(&record)?).await? {
            Ok(())
        } else {
            Err(BackendError::Conflict(format!("log entry {key}")))
        }
    }

    async fn add_overlay(&self, mapping: OverlayMapping) -> Result<(), BackendError> {
        let key = overlay_key(mapping.mac, mapping.vnet_id);
        if !self
            .store
            .put_new(OVERLAY_BUCKET, &key, to_value(&mapping)?)
            .await?
        {
            return Err(BackendError::Conflict(format!("overlay mapping {key}")));
        }
        self.invalidate_overlay(&mapping);
        Ok(())
    }

    async fn update_overlay(
        &self,
        mac: MacAddress,
        vnet_id: u32,
        update: OverlayUpdate,
    ) -> Result<OverlayMapping, BackendError> {
        let key = overlay_key(mac, vnet_id);
        let Some(mut mapping) = self.fetch_overlay(mac, vnet_id).await? else {
            return Err(BackendError::Missing(format!("overlay mapping {key}")));
        };
        let previous = mapping.clone();
        self.invalidate_overlay(&previous);
        update.apply(&mut mapping);
        self.store
            .put(OVERLAY_BUCKET, &key, to_value(&mapping)?)
            .await?;
        // A lookup racing the write may have re-cached the old record.
        self.invalidate_overlay(&previous);
        self.invalidate_overlay(&mapping);
        Ok(mapping)
    }

    async fn remove_overlay(&self, mac: MacAddress, vnet_id: u32) -> Result<(), BackendError> {
        let key = overlay_key(mac, vnet_id);
        let Some(mapping) = self.fetch_overlay(mac, vnet_id).await? else {
            return Err(BackendError::Missing(format!("overlay mapping {key}")));
        };
        self.store.delete(OVERLAY_BUCKET, &key).await?;
        self.invalidate_overlay(&mapping);
        Ok(())
    }

    async fn add_underlay(&self, mapping: UnderlayMapping) -> Result<(), BackendError> {
        let key = mapping.cn_id.to_string();
        if !self
            .store
            .put_new(UNDERLAY_BUCKET, &key, to_value(&mapping)?)
            .await?
        {
            return Err(BackendError::Conflict(format!("underlay mapping {key}")));
        }
        self.underlay.invalidate(&mapping.cn_id);
        Ok(())
    }

    async fn update_underlay(
        &self,
        cn_id: Uuid,
        update: UnderlayUpdate,
    ) -> Result<UnderlayMapping, BackendError> {
        let Some(mut mapping) = self.fetch_underlay(cn_id).await? else {
            return Err(BackendError::Missing(format!("underlay mapping {cn_id}")));
        };
        update.apply(&mut mapping);
        self.store
            .put(UNDERLAY_BUCKET, &cn_id.to_string(), to_value(&mapping)?)
            .await?;
        self.underlay.invalidate(&cn_id);
        Ok(mapping)
    }

    async fn remove_underlay(&self, cn_id: Uuid) -> Result<(), BackendError> {
        let removed = self
            .store
            .delete(UNDERLAY_BUCKET, &cn_id.to_string())
            .await?;
        self.underlay.invalidate(&cn_id);
        if removed {
            Ok(())
        } else {
            Err(BackendError::Missing(format!("underlay mapping {cn_id}")))
        }
    }

    async fn add_route(&self, route: RouteMapping) -> Result<(), BackendError> {
        let key = route.id.to_string();
        if self
            .store
            .put_new(ROUTE_BUCKET, &key, to_value(&route)?)
            .await?
        {
            Ok(())
        } else {
            Err(BackendError::Conflict(format!("route {key}")))
        }
    }

    async fn remove_route(&self, id: Uuid) -> Result<(), BackendError> {
        if self.store.delete(ROUTE_BUCKET, &id.to_string()).await? {
            Ok(())
        } else {
            Err(BackendError::Missing(format!("route {id}")))
        }
    }
}
