#![cfg(test)]
//! Test-only helpers shared by unit tests.

use std::{
    net::Ipv6Addr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use proptest::{
    collection::vec,
    prelude::{Just, Strategy, any, prop_oneof},
    sample::select,
    test_runner::{Config as ProptestConfig, RngAlgorithm, TestRng, TestRunner},
};
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    backend::{
        BackendError,
        kv::{KvStore, MemoryKv},
    },
    message::{
        Envelope,
        LogAck,
        LogEntry,
        LogRemove,
        LogRemoveAck,
        LogRequest,
        Message,
        RouteAck,
        RouteLog,
        RouteRequest,
        Vl2Ack,
        Vl2Log,
        Vl2Request,
        Vl3Ack,
        Vl3Log,
        Vl3Request,
    },
    protocol::{MacAddress, StatusCode},
};

/// Proptest runner seeded deterministically so failures reproduce.
pub fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    let rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
    TestRunner::new_with_rng(config, rng)
}

pub fn mac() -> impl Strategy<Value = MacAddress> { any::<[u8; 6]>().prop_map(MacAddress) }

/// Addresses biased towards the IPv4-mapped form the service mostly sees.
pub fn wire_ip() -> impl Strategy<Value = Ipv6Addr> {
    prop_oneof![
        any::<[u8; 4]>().prop_map(|v4| std::net::Ipv4Addr::from(v4).to_ipv6_mapped()),
        any::<[u8; 16]>().prop_map(Ipv6Addr::from),
    ]
}

pub fn uuid() -> impl Strategy<Value = Uuid> { any::<[u8; 16]>().prop_map(Uuid::from_bytes) }

pub fn status() -> impl Strategy<Value = StatusCode> {
    select(vec![
        StatusCode::Ok,
        StatusCode::Fatal,
        StatusCode::NotFound,
        StatusCode::BadL3Type,
        StatusCode::BadBulk,
        StatusCode::BadLog,
        StatusCode::LogAgain,
    ])
}

pub fn log_entry() -> impl Strategy<Value = LogEntry> {
    prop_oneof![
        (uuid(), mac(), any::<u32>())
            .prop_map(|(id, mac, vnet_id)| LogEntry::Vl2(Vl2Log { id, mac, vnet_id })),
        (uuid(), wire_ip(), any::<u16>(), any::<u32>()).prop_map(|(id, ip, vlan, vnet_id)| {
            LogEntry::Vl3(Vl3Log {
                id,
                ip,
                vlan,
                vnet_id,
            })
        }),
        (
            uuid(),
            any::<[u32; 3]>(),
            wire_ip(),
            wire_ip(),
            any::<[u16; 2]>(),
            any::<[u8; 2]>(),
        )
            .prop_map(|(id, [src_vnet_id, dst_vnet_id, dc_id], src_ip, dst_ip, vlans, pfx)| {
                LogEntry::Route(RouteLog {
                    id,
                    src_vnet_id,
                    dst_vnet_id,
                    dc_id,
                    src_ip,
                    dst_ip,
                    src_vlan: vlans[0],
                    dst_vlan: vlans[1],
                    src_prefix_len: pfx[0],
                    dst_prefix_len: pfx[1],
                })
            }),
    ]
}

/// Every constructible message shape.
pub fn message() -> impl Strategy<Value = Message> { prop_oneof![request(), reply()] }

fn request() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Ping),
        (mac(), any::<u32>())
            .prop_map(|(mac, vnet_id)| Message::Vl2Request(Vl2Request { mac, vnet_id })),
        (wire_ip(), any::<u32>())
            .prop_map(|(ip, vnet_id)| Message::Vl3Request(Vl3Request { ip, vnet_id })),
        (wire_ip(), any::<u32>())
            .prop_map(|(ip, byte_budget)| Message::LogRequest(LogRequest { ip, byte_budget })),
        vec(uuid(), 0..8).prop_map(|ids| Message::LogRemove(LogRemove { ids })),
        (any::<u32>(), any::<u16>(), wire_ip(), wire_ip()).prop_map(
            |(vnet_id, vlan_id, src_ip, dst_ip)| {
                Message::RouteRequest(RouteRequest {
                    vnet_id,
                    vlan_id,
                    src_ip,
                    dst_ip,
                })
            }
        ),
        vec(any::<u8>(), 0..32).prop_map(|bytes| Message::Shootdown(Bytes::from(bytes))),
    ]
}

fn reply() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Pong),
        (status(), any::<u16>(), wire_ip())
            .prop_map(|(status, port, addr)| Message::Vl2Ack(Vl2Ack { status, port, addr })),
        (status(), mac(), any::<u16>(), wire_ip()).prop_map(|(status, mac, port, addr)| {
            Message::Vl3Ack(Vl3Ack {
                status,
                mac,
                port,
                addr,
            })
        }),
        (status(), vec(log_entry(), 0..6))
            .prop_map(|(status, entries)| Message::LogAck(LogAck { status, entries })),
        status().prop_map(|status| Message::LogRemoveAck(LogRemoveAck { status })),
        (
            status(),
            any::<[u32; 2]>(),
            any::<[u16; 2]>(),
            any::<[u8; 2]>(),
            mac(),
            mac(),
            wire_ip(),
        )
            .prop_map(
                |(status, [dc_id, vnet_id], [vlan_id, port], pfx, src_mac, dst_mac, ip)| {
                    Message::RouteAck(RouteAck {
                        status,
                        dc_id,
                        vnet_id,
                        vlan_id,
                        src_prefix_len: pfx[0],
                        dst_prefix_len: pfx[1],
                        src_mac,
                        dst_mac,
                        port,
                        underlay_ip: ip,
                    })
                }
            ),
    ]
}

pub fn envelope() -> impl Strategy<Value = Envelope> {
    (any::<u16>(), any::<u32>(), message()).prop_map(|(version, request_id, message)| Envelope {
        version,
        request_id,
        message,
    })
}

/// Store that fails every operation.
pub struct BrokenKv;

#[async_trait]
impl KvStore for BrokenKv {
    async fn get(&self, _: &str, _: &str) -> Result<Option<Value>, BackendError> { Err(down()) }

    async fn put(&self, _: &str, _: &str, _: Value) -> Result<(), BackendError> { Err(down()) }

    async fn put_new(&self, _: &str, _: &str, _: Value) -> Result<bool, BackendError> {
        Err(down())
    }

    async fn delete(&self, _: &str, _: &str) -> Result<bool, BackendError> { Err(down()) }

    async fn find(&self, _: &str, _: &[(&str, Value)]) -> Result<Vec<Value>, BackendError> {
        Err(down())
    }
}

fn down() -> BackendError { BackendError::Store(String::from("store unavailable")) }

/// In-memory store whose reads take `delay`.
pub struct SlowKv {
    pub inner: MemoryKv,
    pub delay: Duration,
}

#[async_trait]
impl KvStore for SlowKv {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, value: Value) -> Result<(), BackendError> {
        self.inner.put(bucket, key, value).await
    }

    async fn put_new(&self, bucket: &str, key: &str, value: Value) -> Result<bool, BackendError> {
        self.inner.put_new(bucket, key, value).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        self.inner.delete(bucket, key).await
    }

    async fn find(
        &self,
        bucket: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Value>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(bucket, filter).await
    }
}

/// Store whose every operation panics, to exercise task isolation.
pub struct PanickingKv;

#[async_trait]
impl KvStore for PanickingKv {
    async fn get(&self, _: &str, _: &str) -> Result<Option<Value>, BackendError> {
        panic!("store exploded")
    }

    async fn put(&self, _: &str, _: &str, _: Value) -> Result<(), BackendError> {
        panic!("store exploded")
    }

    async fn put_new(&self, _: &str, _: &str, _: Value) -> Result<bool, BackendError> {
        panic!("store exploded")
    }

    async fn delete(&self, _: &str, _: &str) -> Result<bool, BackendError> {
        panic!("store exploded")
    }

    async fn find(&self, _: &str, _: &[(&str, Value)]) -> Result<Vec<Value>, BackendError> {
        panic!("store exploded")
    }
}

/// Pauses the next `put` once armed, until released.
#[derive(Default)]
pub struct PutGate {
    pub armed: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory store whose writes can be held open by a [`PutGate`].
pub struct GatedKv {
    pub inner: MemoryKv,
    pub gate: Arc<PutGate>,
}

#[async_trait]
impl KvStore for GatedKv {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Value>, BackendError> {
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, value: Value) -> Result<(), BackendError> {
        if self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.entered.notify_one();
            self.gate.release.notified().await;
        }
        self.inner.put(bucket, key, value).await
    }

    async fn put_new(&self, bucket: &str, key: &str, value: Value) -> Result<bool, BackendError> {
        self.inner.put_new(bucket, key, value).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        self.inner.delete(bucket, key).await
    }

    async fn find(
        &self,
        bucket: &str,
        filter: &[(&str, Value)],
    ) -> Result<Vec<Value>, BackendError> {
        self.inner.find(bucket, filter).await
    }
}
