//! Unit tests for request dispatch.

use std::{net::IpAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rstest::{fixture, rstest};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tracing_test::traced_test;
use uuid::Uuid;

use super::*;
use crate::{
    backend::{
        OverlayMapping,
        OverlayUpdate,
        RouteMapping,
        UnderlayMapping,
        kv::{CacheConfig, KvBackend, MemoryKv},
    },
    codec::SvpCodec,
    message::{LogEntry, RouteLog, Vl2Log, decode, encode},
    protocol::{MacAddress, VERSION_ONE},
    test_helpers::{BrokenKv, SlowKv},
};

const VNET: u32 = 12340;
const DST_VNET: u32 = 777;
const CN: Uuid = Uuid::from_u128(0x11);
const DST_CN: Uuid = Uuid::from_u128(0x22);

fn mac(s: &str) -> MacAddress { s.parse().expect("valid MAC") }

fn ip(s: &str) -> IpAddr { s.parse().expect("valid IP") }

fn wire(s: &str) -> std::net::Ipv6Addr { to_wire_ip(ip(s)) }

fn request(message: Message) -> Envelope { Envelope::request(42, message) }

async fn seeded() -> Arc<dyn Backend> {
    let backend = KvBackend::new(MemoryKv::new(), CacheConfig::default());
    backend
        .add_overlay(OverlayMapping {
            mac: mac("00:0a:95:9d:68:16"),
            ip: ip("10.0.0.5"),
            vnet_id: VNET,
            cn_id: CN,
            deleted: false,
            version: 1,
        })
        .await
        .expect("seed overlay");
    backend
        .add_overlay(OverlayMapping {
            mac: mac("02:00:00:00:00:99"),
            ip: ip("172.16.4.9"),
            vnet_id: DST_VNET,
            cn_id: DST_CN,
            deleted: false,
            version: 1,
        })
        .await
        .expect("seed destination overlay");
    backend
        .add_underlay(UnderlayMapping {
            cn_id: CN,
            ip: ip("192.168.1.1"),
            port: 123,
        })
        .await
        .expect("seed underlay");
    backend
        .add_underlay(UnderlayMapping {
            cn_id: DST_CN,
            ip: ip("192.168.1.2"),
            port: 4789,
        })
        .await
        .expect("seed destination underlay");
    Arc::new(backend)
}

fn route(dc_id: u32) -> RouteMapping {
    RouteMapping {
        id: Uuid::from_u128(0x99),
        dc_id,
        src_vnet_id: VNET,
        src_vlan_id: 0,
        src_subnet: "10.0.0.0/24".parse().expect("subnet"),
        dst_vnet_id: DST_VNET,
        dst_vlan_id: 5,
        dst_subnet: "172.16.4.0/24".parse().expect("subnet"),
        src_mac: mac("02:00:00:00:00:01"),
    }
}

fn route_request() -> Message {
    Message::RouteRequest(RouteRequest {
        vnet_id: VNET,
        vlan_id: 0,
        src_ip: wire("10.0.0.5"),
        dst_ip: wire("172.16.4.9"),
    })
}

#[fixture]
fn broken() -> Dispatcher {
    let backend = KvBackend::new(BrokenKv, CacheConfig::default());
    Dispatcher::new(Arc::new(ServerContext::new(Arc::new(backend))))
}

async fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(ServerContext::new(seeded().await)))
}

#[tokio::test]
async fn ping_answers_pong_echoing_header_fields() {
    let d = dispatcher().await;
    let req = Envelope {
        version: VERSION_ONE,
        request_id: 7,
        message: Message::Ping,
    };
    let reply = d.dispatch(&req).await.expect("pong");
    assert_eq!(reply.message, Message::Pong);
    assert_eq!(reply.version, VERSION_ONE);
    assert_eq!(reply.request_id, 7);
}

#[tokio::test]
async fn vl2_resolves_underlay_endpoint() {
    let d = dispatcher().await;
    let reply = d
        .dispatch(&request(Message::Vl2Request(Vl2Request {
            mac: mac("00:0a:95:9d:68:16"),
            vnet_id: VNET,
        })))
        .await
        .expect("vl2 ack");
    assert_eq!(
        reply.message,
        Message::Vl2Ack(Vl2Ack {
            status: StatusCode::Ok,
            port: 123,
            addr: wire("192.168.1.1"),
        })
    );
}

#[tokio::test]
async fn vl2_unknown_mac_is_not_found_with_zeroed_fields() {
    let d = dispatcher().await;
    let reply = d
        .dispatch(&request(Message::Vl2Request(Vl2Request {
            mac: mac("00:0a:95:9d:68:16"),
            vnet_id: 1,
        })))
        .await
        .expect("vl2 ack");
    assert_eq!(
        reply.message,
        Message::Vl2Ack(Vl2Ack::empty(StatusCode::NotFound))
    );
}

#[tokio::test]
async fn deleted_overlay_counts_as_missing() {
    let backend = seeded().await;
    backend
        .update_overlay(
            mac("00:0a:95:9d:68:16"),
            VNET,
            OverlayUpdate {
                deleted: Some(true),
                ..OverlayUpdate::default()
            },
        )
        .await
        .expect("mark deleted");
    let d = Dispatcher::new(Arc::new(ServerContext::new(backend)));

    let vl2 = d
        .dispatch(&request(Message::Vl2Request(Vl2Request {
            mac: mac("00:0a:95:9d:68:16"),
            vnet_id: VNET,
        })))
        .await
        .expect("vl2 ack");
    let vl3 = d
        .dispatch(&request(Message::Vl3Request(Vl3Request {
            ip: wire("10.0.0.5"),
            vnet_id: VNET,
        })))
        .await
        .expect("vl3 ack");
    assert_eq!(vl2.message.status(), Some(StatusCode::NotFound));
    assert_eq!(vl3.message, Message::Vl3Ack(Vl3Ack::empty(StatusCode::NotFound)));
}

#[tokio::test]
async fn vl2_without_underlay_is_not_found() {
    let backend = seeded().await;
    backend.remove_underlay(CN).await.expect("remove underlay");
    let d = Dispatcher::new(Arc::new(ServerContext::new(backend)));

    let reply = d
        .dispatch(&request(Message::Vl2Request(Vl2Request {
            mac: mac("00:0a:95:9d:68:16"),
            vnet_id: VNET,
        })))
        .await
        .expect("vl2 ack");
    assert_eq!(
        reply.message,
        Message::Vl2Ack(Vl2Ack::empty(StatusCode::NotFound))
    );
}

#[tokio::test]
async fn vl3_returns_mac_and_endpoint() {
    let d = dispatcher().await;
    let reply = d
        .dispatch(&request(Message::Vl3Request(Vl3Request {
            ip: wire("10.0.0.5"),
            vnet_id: VNET,
        })))
        .await
        .expect("vl3 ack");
    assert_eq!(
        reply.message,
        Message::Vl3Ack(Vl3Ack {
            status: StatusCode::Ok,
            mac: mac("00:0a:95:9d:68:16"),
            port: 123,
            addr: wire("192.168.1.1"),
        })
    );
}

#[rstest]
#[case::vl2(
    Message::Vl2Request(Vl2Request { mac: MacAddress::ZERO, vnet_id: 1 }),
    Message::Vl2Ack(Vl2Ack::empty(StatusCode::Fatal))
)]
#[case::vl3(
    Message::Vl3Request(Vl3Request { ip: std::net::Ipv6Addr::LOCALHOST, vnet_id: 1 }),
    Message::Vl3Ack(Vl3Ack::empty(StatusCode::Fatal))
)]
#[case::log(
    Message::LogRequest(LogRequest { ip: std::net::Ipv6Addr::LOCALHOST, byte_budget: 512 }),
    Message::LogAck(LogAck::empty(StatusCode::Fatal))
)]
#[case::log_remove(
    Message::LogRemove(LogRemove { ids: vec![Uuid::nil()] }),
    Message::LogRemoveAck(LogRemoveAck { status: StatusCode::Fatal })
)]
#[case::route(route_request(), Message::RouteAck(RouteAck::empty(StatusCode::Fatal)))]
#[tokio::test]
async fn backend_failure_yields_fatal_ack(
    broken: Dispatcher,
    #[case] message: Message,
    #[case] expected: Message,
) {
    let reply = broken.dispatch(&request(message)).await.expect("fatal ack");
    assert_eq!(reply.message, expected);
    assert_eq!(reply.request_id, 42);
}

#[rstest]
#[tokio::test]
async fn ping_needs_no_backend(broken: Dispatcher) {
    let reply = broken.dispatch(&request(Message::Ping)).await;
    assert_eq!(reply.map(|r| r.message), Some(Message::Pong));
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn slow_backend_times_out_to_fatal() {
    let slow = KvBackend::new(
        SlowKv {
            inner: MemoryKv::new(),
            delay: Duration::from_secs(30),
        },
        CacheConfig::default(),
    );
    let ctx = ServerContext::new(Arc::new(slow)).with_backend_timeout(Duration::from_secs(1));
    let d = Dispatcher::new(Arc::new(ctx));

    let reply = d
        .dispatch(&request(Message::Vl2Request(Vl2Request {
            mac: MacAddress::ZERO,
            vnet_id: 1,
        })))
        .await
        .expect("fatal ack");
    assert_eq!(
        reply.message,
        Message::Vl2Ack(Vl2Ack::empty(StatusCode::Fatal))
    );
    assert!(logs_contain("request handler failed"));
}

#[rstest]
#[case::pong(Message::Pong)]
#[case::ack(Message::Vl2Ack(Vl2Ack::empty(StatusCode::Ok)))]
#[case::log_ack(Message::LogAck(LogAck::empty(StatusCode::Ok)))]
#[case::shootdown(Message::Shootdown(Bytes::from_static(b"\x01")))]
#[tokio::test]
async fn non_requests_get_no_response(#[case] message: Message) {
    let d = dispatcher().await;
    assert!(d.dispatch(&request(message)).await.is_none());
}

fn vl2_log(n: u128) -> LogEntry {
    LogEntry::Vl2(Vl2Log {
        id: Uuid::from_u128(n),
        mac: MacAddress::ZERO,
        vnet_id: VNET,
    })
}

fn route_log(n: u128) -> LogEntry {
    LogEntry::Route(RouteLog {
        id: Uuid::from_u128(n),
        src_vnet_id: VNET,
        dst_vnet_id: DST_VNET,
        dc_id: 0,
        src_ip: wire("10.0.0.0"),
        dst_ip: wire("172.16.4.0"),
        src_vlan: 0,
        dst_vlan: 5,
        src_prefix_len: 120,
        dst_prefix_len: 120,
    })
}

#[rstest]
#[case::below_smallest(31, 0)]
#[case::exactly_one(32, 1)]
#[case::route_does_not_fit(103, 1)]
#[case::two_fit(104, 2)]
#[case::all(200, 3)]
#[tokio::test]
async fn log_entries_respect_byte_budget(#[case] budget: u32, #[case] count: usize) {
    let backend = seeded().await;
    for entry in [vl2_log(1), route_log(2), vl2_log(3)] {
        backend.append_log(CN, entry).await.expect("append log");
    }
    let d = Dispatcher::new(Arc::new(ServerContext::new(backend)));

    let reply = d
        .dispatch(&request(Message::LogRequest(LogRequest {
            ip: wire("192.168.1.1"),
            byte_budget: budget,
        })))
        .await
        .expect("log ack");
    let Message::LogAck(ack) = reply.message else {
        panic!("expected log ack, got {:?}", reply.message);
    };
    assert_eq!(ack.status, StatusCode::Ok);
    assert_eq!(ack.entries.len(), count);
    let used: usize = ack.entries.iter().map(LogEntry::encoded_len).sum();
    assert!(used <= budget as usize);
}

#[tokio::test]
async fn log_request_from_unknown_node_is_not_found() {
    let d = dispatcher().await;
    let reply = d
        .dispatch(&request(Message::LogRequest(LogRequest {
            ip: wire("192.168.9.9"),
            byte_budget: 1024,
        })))
        .await
        .expect("log ack");
    assert_eq!(reply.message, Message::LogAck(LogAck::empty(StatusCode::NotFound)));
}

#[tokio::test]
async fn log_remove_of_missing_ids_is_ok() {
    let backend = seeded().await;
    backend.append_log(CN, vl2_log(1)).await.expect("append log");
    let d = Dispatcher::new(Arc::new(ServerContext::new(Arc::clone(&backend))));

    let reply = d
        .dispatch(&request(Message::LogRemove(LogRemove {
            ids: vec![Uuid::from_u128(1), Uuid::from_u128(5)],
        })))
        .await
        .expect("log remove ack");
    assert_eq!(
        reply.message,
        Message::LogRemoveAck(LogRemoveAck {
            status: StatusCode::Ok
        })
    );
    assert!(backend.fetch_log(CN, 10).await.expect("fetch").is_empty());
}

fn expected_route_ack() -> RouteAck {
    RouteAck {
        status: StatusCode::Ok,
        dc_id: 0,
        vnet_id: DST_VNET,
        vlan_id: 5,
        src_prefix_len: 120,
        dst_prefix_len: 120,
        src_mac: mac("02:00:00:00:00:01"),
        dst_mac: mac("02:00:00:00:00:99"),
        port: 4789,
        underlay_ip: wire("192.168.1.2"),
    }
}

#[tokio::test]
async fn route_resolves_destination_in_process() {
    let backend = seeded().await;
    backend.add_route(route(0)).await.expect("add route");
    let d = Dispatcher::new(Arc::new(ServerContext::new(backend)));

    let reply = d.dispatch(&request(route_request())).await.expect("route ack");
    assert_eq!(reply.message, Message::RouteAck(expected_route_ack()));
}

#[tokio::test]
async fn route_without_match_is_not_found() {
    let d = dispatcher().await;
    let reply = d.dispatch(&request(route_request())).await.expect("route ack");
    assert_eq!(
        reply.message,
        Message::RouteAck(RouteAck::empty(StatusCode::NotFound))
    );
}

#[tokio::test]
async fn route_with_unknown_destination_is_not_found() {
    let backend = seeded().await;
    backend
        .remove_overlay(mac("02:00:00:00:00:99"), DST_VNET)
        .await
        .expect("remove destination");
    backend.add_route(route(0)).await.expect("add route");
    let d = Dispatcher::new(Arc::new(ServerContext::new(backend)));

    let reply = d.dispatch(&request(route_request())).await.expect("route ack");
    assert_eq!(
        reply.message,
        Message::RouteAck(RouteAck::empty(StatusCode::NotFound))
    );
}

/// Serve one connection answering every VL3 request with `ack`.
async fn fake_peer(ack: Vl3Ack) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind peer");
    let addr = listener.local_addr().expect("peer addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut framed = Framed::new(stream, SvpCodec::default());
        while let Some(Ok(frame)) = framed.next().await {
            let req = decode(&frame).expect("decodable request");
            assert_eq!(
                req.message,
                Message::Vl3Request(Vl3Request {
                    ip: wire("172.16.4.9"),
                    vnet_id: DST_VNET,
                })
            );
            let reply = encode(&req.reply(Message::Vl3Ack(ack))).expect("encode reply");
            framed.send(reply).await.expect("send reply");
        }
    });
    addr
}

#[tokio::test]
async fn route_to_peer_data_center_asks_the_peer() {
    let remote = Vl3Ack {
        status: StatusCode::Ok,
        mac: mac("02:00:00:00:00:77"),
        port: 4790,
        addr: wire("10.200.0.1"),
    };
    let peer = fake_peer(remote).await;

    let backend = seeded().await;
    backend.add_route(route(3)).await.expect("add route");
    let ctx = ServerContext::new(backend)
        .with_data_center(1)
        .with_route_peer(3, peer);
    let d = Dispatcher::new(Arc::new(ctx));

    let reply = d.dispatch(&request(route_request())).await.expect("route ack");
    assert_eq!(
        reply.message,
        Message::RouteAck(RouteAck {
            dc_id: 3,
            dst_mac: remote.mac,
            port: remote.port,
            underlay_ip: remote.addr,
            ..expected_route_ack()
        })
    );
}

#[tokio::test]
async fn route_peer_for_local_data_center_is_ignored() {
    let backend = seeded().await;
    backend.add_route(route(1)).await.expect("add route");
    let unreachable: SocketAddr = "127.0.0.1:9".parse().expect("addr");
    let ctx = ServerContext::new(backend)
        .with_data_center(1)
        .with_route_peer(1, unreachable);
    let d = Dispatcher::new(Arc::new(ctx));

    let reply = d.dispatch(&request(route_request())).await.expect("route ack");
    assert_eq!(
        reply.message,
        Message::RouteAck(RouteAck {
            dc_id: 1,
            ..expected_route_ack()
        })
    );
}

#[traced_test]
#[tokio::test]
async fn unreachable_peer_yields_fatal_after_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let closed = listener.local_addr().expect("addr");
    drop(listener);

    let backend = seeded().await;
    backend.add_route(route(3)).await.expect("add route");
    let ctx = ServerContext::new(backend)
        .with_route_peer(3, closed)
        .with_remote_policy(Duration::from_millis(200), 2);
    let d = Dispatcher::new(Arc::new(ctx));

    let reply = d.dispatch(&request(route_request())).await.expect("route ack");
    assert_eq!(
        reply.message,
        Message::RouteAck(RouteAck::empty(StatusCode::Fatal))
    );
    assert!(logs_contain("attempt 2/2"));
}

#[test]
fn ipv4_prefixes_are_widened_to_ipv6() {
    assert_eq!(wire_prefix_len("10.0.0.0/8".parse().expect("net")), 104);
    assert_eq!(wire_prefix_len("fd00::/64".parse().expect("net")), 64);
}
