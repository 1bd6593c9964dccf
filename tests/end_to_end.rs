//! Tx/Rx 엔진을 메모리 내 라디오로 연결한 통합 테스트

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use radiolink::interface::{loopback, LoopbackControl};
use radiolink::packet::{encode_packet, verify_packet, PacketHeader};
use radiolink::{
    Config, InterfaceInfo, InterfaceKind, RadioStats, RadioStatsSnapshot, RadioWriter, RxEngine,
    RxInterface, RxQueueEntry, StatsPublisher, TxEngine, TxInterface, STREAM_ID_DATA,
    STREAM_ID_VIDEO_1,
};

fn packet(vehicle_id: u32, stream_id: u8, seq: u32, payload_len: usize) -> Bytes {
    let mut header = PacketHeader::new(11, stream_id, seq);
    header.vehicle_id_src = vehicle_id;
    header.radio_link_packet_index = seq;
    let payload: Vec<u8> = (0..payload_len).map(|_| rand::random()).collect();
    encode_packet(&header, &payload)
}

fn fast_config() -> Config {
    Config {
        tx_fragment_delay_us: 0,
        ..Config::default()
    }
}

fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
    for _ in 0..600 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn collect(rx: &RxEngine, expected: usize) -> Vec<RxQueueEntry> {
    let mut out = Vec::new();
    wait_for(|| {
        while let Some(entry) = rx.pop_next_packet() {
            out.push(entry);
        }
        out.len() >= expected
    });
    // 늦게 도착하는 중복이 없는지 잠시 더 확인
    thread::sleep(Duration::from_millis(30));
    while let Some(entry) = rx.pop_next_packet() {
        out.push(entry);
    }
    out
}

/// SiK 링크 하나 + WiFi 링크 하나
struct Station {
    rx: RxEngine,
    tx: TxEngine,
    stats: Arc<RadioStats>,
    sik: LoopbackControl,
    wifi_writer: Box<dyn RadioWriter>,
}

fn station(config: Config) -> Station {
    let (sik_w, sik_r, sik) = loopback(InterfaceKind::SikSerial);
    let (wifi_w, wifi_r, _wifi) = loopback(InterfaceKind::WifiMonitor);
    let sik_info = InterfaceInfo::new("sik0", InterfaceKind::SikSerial).with_link(0);
    let wifi_info = InterfaceInfo::new("wlan0", InterfaceKind::WifiMonitor).with_link(1);

    let stats = Arc::new(RadioStats::new(&[sik_info.clone(), wifi_info.clone()]));
    let rx = RxEngine::start(
        config.clone(),
        vec![
            RxInterface::new(sik_info.clone(), sik_r),
            RxInterface::new(wifi_info.clone(), wifi_r),
        ],
        stats.clone(),
    )
    .unwrap();
    let tx = TxEngine::start(
        config,
        vec![
            TxInterface::new(sik_info, sik_w),
            TxInterface::receive_only(wifi_info),
        ],
        stats.clone(),
    )
    .unwrap();

    Station {
        rx,
        tx,
        stats,
        sik,
        wifi_writer: Box::new(wifi_w),
    }
}

#[test]
fn test_sik_tx_to_rx_roundtrip() {
    let st = station(fast_config());
    let sent: Vec<Bytes> = (1..=20).map(|seq| packet(3, STREAM_ID_DATA, seq, 90)).collect();
    for p in &sent {
        st.tx.send_sik_packet(0, p).unwrap();
    }

    let got = collect(&st.rx, sent.len());
    assert_eq!(got.len(), sent.len());
    for (entry, expected) in got.iter().zip(&sent) {
        assert!(entry.is_short);
        assert_eq!(entry.interface, 0);
        assert_eq!(&entry.data, expected);
    }
    assert_eq!(st.rx.max_seen_index(3, STREAM_ID_DATA), 20);
}

#[test]
fn test_same_packet_over_two_links_delivered_once() {
    let mut st = station(fast_config());
    let sent: Vec<Bytes> = (0..10).map(|seq| packet(5, STREAM_ID_VIDEO_1, seq, 200)).collect();
    for p in &sent {
        st.tx.send_sik_packet(0, p).unwrap();
        st.wifi_writer.write(p).unwrap();
    }

    let got = collect(&st.rx, sent.len());
    assert_eq!(got.len(), sent.len());

    let mut seqs: Vec<u32> = got
        .iter()
        .filter_map(|e| PacketHeader::read(&e.data))
        .map(|h| h.stream_seq())
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());

    assert!(wait_for(|| {
        let snap = st.stats.snapshot();
        snap.interfaces.iter().map(|i| i.duplicate_packets).sum::<u64>() == 10
    }));
}

#[test]
fn test_vehicle_restart_accepts_new_sequence() {
    let mut st = station(fast_config());
    for seq in 5000..5010 {
        st.wifi_writer.write(&packet(9, STREAM_ID_DATA, seq, 16)).unwrap();
    }
    assert_eq!(collect(&st.rx, 10).len(), 10);
    assert!(!st.rx.is_vehicle_restarted(9));

    // 재부팅 후 인덱스 0부터 다시 시작
    for seq in 0..5 {
        st.wifi_writer.write(&packet(9, STREAM_ID_DATA, seq, 16)).unwrap();
    }
    assert_eq!(collect(&st.rx, 5).len(), 5);
    assert!(st.rx.is_vehicle_restarted(9));
    assert_eq!(st.rx.max_seen_index(9, STREAM_ID_DATA), 4);

    st.rx.reset_vehicle_restarted_flag(9);
    assert!(!st.rx.is_vehicle_restarted(9));

    // 플래그 해제와 함께 재시작 후 이력도 비워짐
    assert!(wait_for(|| st.rx.max_seen_index(9, STREAM_ID_DATA) == 0));
    st.wifi_writer.write(&packet(9, STREAM_ID_DATA, 3, 16)).unwrap();
    assert_eq!(collect(&st.rx, 1).len(), 1);
    assert!(!st.rx.is_vehicle_restarted(9));
}

#[test]
fn test_queue_overflow_keeps_newest() {
    let config = Config {
        rx_queue_capacity: 10,
        ..fast_config()
    };
    let mut st = station(config);
    for seq in 0..30 {
        st.wifi_writer.write(&packet(1, STREAM_ID_DATA, seq, 8)).unwrap();
    }

    assert!(wait_for(|| st.rx.queue_stats().pushed == 30));
    let pending = st.rx.pending_packets();
    assert!(pending <= 10);
    assert_eq!(st.rx.queue_stats().dropped, (30 - pending) as u64);
    assert_eq!(st.rx.queue_stats().max_in_queue, 10);

    let mut last = None;
    while let Some(entry) = st.rx.pop_next_packet() {
        last = PacketHeader::read(&entry.data).map(|h| h.stream_seq());
    }
    assert_eq!(last, Some(29));
}

#[test]
fn test_lossy_sik_link_never_delivers_corrupt_packets() {
    let st = station(fast_config());
    st.sik.set_loss(0.3);

    for seq in 0..60 {
        st.tx.send_sik_packet(0, &packet(2, STREAM_ID_DATA, seq, 120)).unwrap();
    }
    assert!(wait_for(|| st.tx.pending_messages() == 0));
    thread::sleep(Duration::from_millis(100));

    let got = collect(&st.rx, 0);
    assert!(got.len() < 60);
    for entry in &got {
        assert!(verify_packet(&entry.data).is_ok());
    }
    assert!(st.stats.snapshot().interfaces[0].lost_packets > 0);
}

#[test]
fn test_broken_interface_reported_and_reset() {
    let mut st = station(fast_config());
    st.sik.fail_reads();
    assert!(wait_for(|| st.rx.any_interface_broken() == Some(0)));

    // WiFi 링크는 계속 동작
    st.wifi_writer.write(&packet(4, STREAM_ID_DATA, 1, 8)).unwrap();
    assert_eq!(collect(&st.rx, 1).len(), 1);

    st.sik.recover();
    st.rx.reset_broken_interfaces();
    assert_eq!(st.rx.any_interface_broken(), None);

    st.tx.send_sik_packet(0, &packet(4, STREAM_ID_DATA, 2, 8)).unwrap();
    let got = collect(&st.rx, 1);
    assert_eq!(got.len(), 1);
    assert!(got[0].is_short);
}

#[test]
fn test_published_snapshot_readable() {
    let mut st = station(fast_config());
    for seq in 0..5 {
        st.wifi_writer.write(&packet(6, STREAM_ID_DATA, seq, 32)).unwrap();
    }
    assert_eq!(collect(&st.rx, 5).len(), 5);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("radiolink_stats");
    let publisher = StatsPublisher::new(&path);
    let snapshot = st.stats.snapshot();
    publisher.publish(&snapshot).unwrap();

    let read = RadioStatsSnapshot::read_from(&path).unwrap();
    assert_eq!(read.interfaces.len(), 2);
    assert_eq!(read.interfaces[1].unique_packets, 5);
    assert!(read
        .streams
        .iter()
        .any(|s| s.vehicle_id == 6 && s.stream_id == STREAM_ID_DATA && s.rx_packets == 5));
}
