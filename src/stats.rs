//! 라디오 통계
//!
//! Rx/Tx 스레드가 원자 카운터를 갱신하고, 다른 스레드/프로세스는
//! [`RadioStatsSnapshot`]으로 읽는다. 카운터 하나는 찢어지지 않지만
//! 스냅샷 전체의 필드 간 일관성은 보장하지 않는다 (best-effort).

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::interface::{InterfaceInfo, InterfaceKind};
use crate::{Result, MAX_CONCURRENT_VEHICLES, MAX_RADIO_STREAMS};

/// 히스토리 슬라이스 수
pub const STATS_HISTORY_SLICES: usize = 20;

/// 히스토리 슬라이스 길이
pub const STATS_SLICE_INTERVAL: Duration = Duration::from_millis(100);

/// 공유 스냅샷 기본 경로
pub const DEFAULT_STATS_PATH: &str = "/dev/shm/radiolink_stats";

const NO_SIGNAL: i32 = i32::MIN;

/// 일정 간격으로만 true를 돌려주는 로그 제한기
#[derive(Debug, Clone)]
pub(crate) struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// 누적/임시/초당 값 묶음
#[derive(Debug, Default)]
struct RateCounter {
    total: AtomicU64,
    tmp: AtomicU64,
    per_sec: AtomicU64,
}

impl RateCounter {
    fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
        self.tmp.fetch_add(n, Ordering::Relaxed);
    }

    fn roll(&self, elapsed_ms: u64) {
        let tmp = self.tmp.swap(0, Ordering::Relaxed);
        self.per_sec
            .store(tmp * 1000 / elapsed_ms.max(1), Ordering::Relaxed);
    }

    fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn per_sec(&self) -> u64 {
        self.per_sec.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.tmp.store(0, Ordering::Relaxed);
        self.per_sec.store(0, Ordering::Relaxed);
    }
}

/// 히스토리 슬라이스 링 (슬라이스당 값은 255에서 포화)
#[derive(Debug)]
struct History {
    slices: [AtomicU8; STATS_HISTORY_SLICES],
    current: AtomicU32,
}

impl History {
    fn new() -> Self {
        Self {
            slices: std::array::from_fn(|_| AtomicU8::new(0)),
            current: AtomicU32::new(0),
        }
    }

    fn push(&self, index: usize, value: u32) {
        self.slices[index].store(value.min(u8::MAX as u32) as u8, Ordering::Relaxed);
    }

    fn take_current(&self) -> u32 {
        self.current.swap(0, Ordering::Relaxed)
    }

    fn add(&self, n: u32) {
        self.current.fetch_add(n, Ordering::Relaxed);
    }

    fn sum(&self) -> u32 {
        self.slices
            .iter()
            .map(|s| s.load(Ordering::Relaxed) as u32)
            .sum()
    }

    /// 오래된 것부터 정렬된 슬라이스
    fn ordered(&self, newest: usize) -> Vec<u8> {
        (1..=STATS_HISTORY_SLICES)
            .map(|i| self.slices[(newest + i) % STATS_HISTORY_SLICES].load(Ordering::Relaxed))
            .collect()
    }
}

/// 인터페이스별 카운터
struct InterfaceCounters {
    info: InterfaceInfo,
    rx_bytes: RateCounter,
    rx_packets: RateCounter,
    tx_bytes: RateCounter,
    tx_packets: RateCounter,
    unique_packets: AtomicU64,
    duplicate_packets: AtomicU64,
    bad_packets: AtomicU64,
    lost_packets: AtomicU64,
    bad_data_bytes: AtomicU64,
    signal_last: AtomicI32,
    signal_min: AtomicI32,
    signal_max: AtomicI32,
    signal_sum: AtomicI64,
    signal_count: AtomicU64,
    last_rx_ms: AtomicU64,
    last_tx_ms: AtomicU64,
    rx_quality: AtomicU8,
    relative_quality: AtomicU8,
    history_rx: History,
    history_bad: History,
    history_lost: History,
}

impl InterfaceCounters {
    fn new(info: InterfaceInfo) -> Self {
        Self {
            info,
            rx_bytes: RateCounter::default(),
            rx_packets: RateCounter::default(),
            tx_bytes: RateCounter::default(),
            tx_packets: RateCounter::default(),
            unique_packets: AtomicU64::new(0),
            duplicate_packets: AtomicU64::new(0),
            bad_packets: AtomicU64::new(0),
            lost_packets: AtomicU64::new(0),
            bad_data_bytes: AtomicU64::new(0),
            signal_last: AtomicI32::new(NO_SIGNAL),
            signal_min: AtomicI32::new(NO_SIGNAL),
            signal_max: AtomicI32::new(NO_SIGNAL),
            signal_sum: AtomicI64::new(0),
            signal_count: AtomicU64::new(0),
            last_rx_ms: AtomicU64::new(0),
            last_tx_ms: AtomicU64::new(0),
            rx_quality: AtomicU8::new(0),
            relative_quality: AtomicU8::new(0),
            history_rx: History::new(),
            history_bad: History::new(),
            history_lost: History::new(),
        }
    }

    /// 최근 히스토리 기반 수신 품질 (0 ~ 100)
    fn compute_quality(&self) -> u8 {
        let recv = self.history_rx.sum();
        let bad = self.history_bad.sum();
        let lost = self.history_lost.sum();
        if recv + lost == 0 {
            return 0;
        }
        let penalty = 100 * (lost + bad) / (recv + lost);
        100u32.saturating_sub(penalty) as u8
    }
}

/// 차량 × 스트림별 카운터
struct StreamCounters {
    rx_bytes: RateCounter,
    rx_packets: RateCounter,
    last_rx_ms: AtomicU64,
    last_index: AtomicU32,
    has_index: AtomicBool,
    missing: AtomicBool,
}

impl StreamCounters {
    fn new() -> Self {
        Self {
            rx_bytes: RateCounter::default(),
            rx_packets: RateCounter::default(),
            last_rx_ms: AtomicU64::new(0),
            last_index: AtomicU32::new(0),
            has_index: AtomicBool::new(false),
            missing: AtomicBool::new(false),
        }
    }

    fn clear(&self) {
        self.rx_bytes.clear();
        self.rx_packets.clear();
        self.last_rx_ms.store(0, Ordering::Relaxed);
        self.last_index.store(0, Ordering::Relaxed);
        self.has_index.store(false, Ordering::Relaxed);
        self.missing.store(false, Ordering::Relaxed);
    }
}

struct VehicleStreamCounters {
    in_use: AtomicBool,
    vehicle_id: AtomicU32,
    streams: [StreamCounters; MAX_RADIO_STREAMS],
}

impl VehicleStreamCounters {
    fn is_vehicle(&self, vehicle_id: u32) -> bool {
        self.in_use.load(Ordering::Acquire) && self.vehicle_id.load(Ordering::Relaxed) == vehicle_id
    }

    /// 슬롯 반납 (재사용 시 이전 차량 값이 남지 않도록 비움)
    fn release(&self) {
        self.in_use.store(false, Ordering::Release);
        for s in &self.streams {
            s.clear();
        }
    }
}

/// 라디오 링크별 카운터
#[derive(Default)]
struct LinkCounters {
    rx_bytes: RateCounter,
    rx_packets: RateCounter,
    tx_bytes: RateCounter,
    tx_packets: RateCounter,
    last_rtt_us: AtomicU32,
}

struct RollupClock {
    last_second: Instant,
    last_slice: Instant,
    slice_index: usize,
}

/// 프로세스 공유 라디오 통계
pub struct RadioStats {
    started: Instant,
    interfaces: Vec<InterfaceCounters>,
    vehicles: Vec<VehicleStreamCounters>,
    links: Vec<LinkCounters>,
    max_rx_quality: AtomicU8,
    clock: Mutex<RollupClock>,
}

impl RadioStats {
    pub fn new(interfaces: &[InterfaceInfo]) -> Self {
        let link_count = interfaces
            .iter()
            .filter_map(|i| i.radio_link)
            .max()
            .map_or(0, |m| m + 1);
        let now = Instant::now();
        Self {
            started: now,
            interfaces: interfaces
                .iter()
                .cloned()
                .map(InterfaceCounters::new)
                .collect(),
            vehicles: (0..MAX_CONCURRENT_VEHICLES)
                .map(|_| VehicleStreamCounters {
                    in_use: AtomicBool::new(false),
                    vehicle_id: AtomicU32::new(0),
                    streams: std::array::from_fn(|_| StreamCounters::new()),
                })
                .collect(),
            links: (0..link_count).map(|_| LinkCounters::default()).collect(),
            max_rx_quality: AtomicU8::new(0),
            clock: Mutex::new(RollupClock {
                last_second: now,
                last_slice: now,
                slice_index: 0,
            }),
        }
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// 시작 이후 ms (0은 "기록 없음"으로 예약)
    fn now_ms(&self) -> u64 {
        (self.started.elapsed().as_millis() as u64).max(1)
    }

    fn link_of(&self, interface: usize) -> Option<&LinkCounters> {
        let link = self.interfaces.get(interface)?.info.radio_link?;
        self.links.get(link)
    }

    fn vehicle_slot(&self, vehicle_id: u32) -> Option<&VehicleStreamCounters> {
        if let Some(v) = self.vehicles.iter().find(|v| v.is_vehicle(vehicle_id)) {
            return Some(v);
        }
        // Rx 스레드만 새 슬롯을 잡으므로 경쟁 없음
        let free = self.vehicles.iter().find(|v| !v.in_use.load(Ordering::Acquire))?;
        free.vehicle_id.store(vehicle_id, Ordering::Relaxed);
        free.in_use.store(true, Ordering::Release);
        Some(free)
    }

    /// 라디오에서 읽은 원시 프레임 기록 (링크 계층)
    pub fn record_radio_frame(&self, interface: usize, byte_count: usize, data_ok: bool) {
        let Some(iface) = self.interfaces.get(interface) else {
            return;
        };
        iface.rx_bytes.add(byte_count as u64);
        iface.rx_packets.add(1);
        iface.last_rx_ms.store(self.now_ms(), Ordering::Relaxed);
        if data_ok {
            iface.history_rx.add(1);
        } else {
            iface.bad_packets.fetch_add(1, Ordering::Relaxed);
            iface.history_bad.add(1);
        }
    }

    /// 전체 패킷 수신 기록
    ///
    /// 중복/불량이 아닌 패킷만 스트림/링크 카운터에 반영한다.
    pub fn record_rx(
        &self,
        interface: usize,
        vehicle_id: u32,
        stream_id: u8,
        byte_count: usize,
        is_duplicate: bool,
        is_bad: bool,
    ) {
        let Some(iface) = self.interfaces.get(interface) else {
            return;
        };
        if is_bad {
            iface.bad_packets.fetch_add(1, Ordering::Relaxed);
            iface.history_bad.add(1);
            return;
        }
        if is_duplicate {
            iface.duplicate_packets.fetch_add(1, Ordering::Relaxed);
            return;
        }
        iface.unique_packets.fetch_add(1, Ordering::Relaxed);

        let now_ms = self.now_ms();
        if let Some(slot) = self.vehicle_slot(vehicle_id) {
            if let Some(stream) = slot.streams.get(stream_id as usize) {
                stream.rx_bytes.add(byte_count as u64);
                stream.rx_packets.add(1);
                stream.last_rx_ms.store(now_ms, Ordering::Relaxed);
            }
        }
        if let Some(link) = self.link_of(interface) {
            link.rx_bytes.add(byte_count as u64);
            link.rx_packets.add(1);
        }
    }

    /// 스트림 인덱스 기록 (간격이 있으면 누락 플래그)
    pub fn record_stream_index(&self, vehicle_id: u32, stream_id: u8, seq: u32) {
        let Some(stream) = self
            .vehicle_slot(vehicle_id)
            .and_then(|s| s.streams.get(stream_id as usize))
        else {
            return;
        };
        if stream.has_index.swap(true, Ordering::Relaxed) {
            let last = stream.last_index.load(Ordering::Relaxed);
            if seq > last.wrapping_add(1) {
                stream.missing.store(true, Ordering::Relaxed);
            }
        }
        stream.last_index.store(seq, Ordering::Relaxed);
    }

    /// 스트림 누락 플래그 읽고 리셋
    pub fn take_stream_missing_flag(&self, vehicle_id: u32, stream_id: u8) -> bool {
        self.vehicles
            .iter()
            .find(|v| v.is_vehicle(vehicle_id))
            .and_then(|v| v.streams.get(stream_id as usize))
            .map(|s| s.missing.swap(false, Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 손실 패킷 기록
    pub fn record_lost(&self, interface: usize, count: u32) {
        if let Some(iface) = self.interfaces.get(interface) {
            iface.lost_packets.fetch_add(count as u64, Ordering::Relaxed);
            iface.history_lost.add(count);
        }
    }

    /// 동기화 실패로 버린 시리얼 바이트 기록
    pub fn record_bad_data(&self, interface: usize, byte_count: usize) {
        if let Some(iface) = self.interfaces.get(interface) {
            iface
                .bad_data_bytes
                .fetch_add(byte_count as u64, Ordering::Relaxed);
            iface.bad_packets.fetch_add(1, Ordering::Relaxed);
            iface.history_bad.add(1);
        }
    }

    pub fn record_tx(&self, interface: usize, byte_count: usize) {
        let Some(iface) = self.interfaces.get(interface) else {
            return;
        };
        iface.tx_bytes.add(byte_count as u64);
        iface.tx_packets.add(1);
        iface.last_tx_ms.store(self.now_ms(), Ordering::Relaxed);
        if let Some(link) = self.link_of(interface) {
            link.tx_bytes.add(byte_count as u64);
            link.tx_packets.add(1);
        }
    }

    pub fn record_signal(&self, interface: usize, dbm: i32) {
        let Some(iface) = self.interfaces.get(interface) else {
            return;
        };
        iface.signal_last.store(dbm, Ordering::Relaxed);
        let min = iface.signal_min.load(Ordering::Relaxed);
        if min == NO_SIGNAL || dbm < min {
            iface.signal_min.store(dbm, Ordering::Relaxed);
        }
        let max = iface.signal_max.load(Ordering::Relaxed);
        if max == NO_SIGNAL || dbm > max {
            iface.signal_max.store(dbm, Ordering::Relaxed);
        }
        iface.signal_sum.fetch_add(dbm as i64, Ordering::Relaxed);
        iface.signal_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 링크 왕복 시간 기록
    pub fn record_link_rtt(&self, radio_link: usize, rtt: Duration) {
        if let Some(link) = self.links.get(radio_link) {
            let us = rtt.as_micros().min(u32::MAX as u128) as u32;
            link.last_rtt_us.store(us, Ordering::Relaxed);
        }
    }

    /// 주기적 롤업 (Rx 스레드가 호출)
    ///
    /// 슬라이스 간격마다 히스토리/품질 갱신, 1초마다 초당 값 갱신.
    pub fn tick(&self, now: Instant) {
        let mut clock = self.clock.lock();

        if now.saturating_duration_since(clock.last_slice) >= STATS_SLICE_INTERVAL {
            clock.last_slice = now;
            clock.slice_index = (clock.slice_index + 1) % STATS_HISTORY_SLICES;
            self.roll_slice(clock.slice_index);
        }

        let elapsed = now.saturating_duration_since(clock.last_second);
        if elapsed >= Duration::from_secs(1) {
            clock.last_second = now;
            self.roll_per_second(elapsed.as_millis() as u64);
        }
    }

    fn roll_slice(&self, index: usize) {
        let mut max_quality = 0u8;
        for iface in &self.interfaces {
            iface.history_rx.push(index, iface.history_rx.take_current());
            iface.history_bad.push(index, iface.history_bad.take_current());
            iface.history_lost.push(index, iface.history_lost.take_current());
            let quality = iface.compute_quality();
            iface.rx_quality.store(quality, Ordering::Relaxed);
            max_quality = max_quality.max(quality);
        }
        self.max_rx_quality.store(max_quality, Ordering::Relaxed);

        for iface in &self.interfaces {
            let quality = iface.rx_quality.load(Ordering::Relaxed) as u32;
            let relative = if max_quality == 0 {
                0
            } else {
                quality * 100 / max_quality as u32
            };
            iface.relative_quality.store(relative as u8, Ordering::Relaxed);
        }
    }

    /// 초당 값 롤업 (`tmp * 1000 / 경과 ms`)
    pub fn roll_per_second(&self, elapsed_ms: u64) {
        for iface in &self.interfaces {
            iface.rx_bytes.roll(elapsed_ms);
            iface.rx_packets.roll(elapsed_ms);
            iface.tx_bytes.roll(elapsed_ms);
            iface.tx_packets.roll(elapsed_ms);
        }
        for vehicle in &self.vehicles {
            for stream in &vehicle.streams {
                stream.rx_bytes.roll(elapsed_ms);
                stream.rx_packets.roll(elapsed_ms);
            }
        }
        for link in &self.links {
            link.rx_bytes.roll(elapsed_ms);
            link.rx_packets.roll(elapsed_ms);
            link.tx_bytes.roll(elapsed_ms);
            link.tx_packets.roll(elapsed_ms);
        }
    }

    /// 차량 스트림 카운터 해제
    pub fn remove_vehicle(&self, vehicle_id: u32) {
        for v in self.vehicles.iter().filter(|v| v.is_vehicle(vehicle_id)) {
            v.release();
        }
    }

    /// 지정 차량 외 스트림 카운터 전부 해제 (0이면 전부)
    pub fn remove_all_except(&self, vehicle_id: u32) {
        for v in &self.vehicles {
            let keep = vehicle_id != 0 && v.is_vehicle(vehicle_id);
            if !keep && v.in_use.load(Ordering::Acquire) {
                v.release();
            }
        }
    }

    /// 현재 값 스냅샷
    pub fn snapshot(&self) -> RadioStatsSnapshot {
        let newest = self.clock.lock().slice_index;
        let now_ms = self.now_ms();

        let interfaces = self
            .interfaces
            .iter()
            .enumerate()
            .map(|(index, i)| {
                let count = i.signal_count.load(Ordering::Relaxed);
                let signal = |v: &AtomicI32| {
                    let v = v.load(Ordering::Relaxed);
                    (v != NO_SIGNAL).then_some(v)
                };
                InterfaceStatsSnapshot {
                    index,
                    name: i.info.name.clone(),
                    kind: i.info.kind,
                    radio_link: i.info.radio_link,
                    rx_bytes: i.rx_bytes.total(),
                    rx_packets: i.rx_packets.total(),
                    tx_bytes: i.tx_bytes.total(),
                    tx_packets: i.tx_packets.total(),
                    rx_bytes_per_sec: i.rx_bytes.per_sec(),
                    rx_packets_per_sec: i.rx_packets.per_sec(),
                    tx_bytes_per_sec: i.tx_bytes.per_sec(),
                    tx_packets_per_sec: i.tx_packets.per_sec(),
                    unique_packets: i.unique_packets.load(Ordering::Relaxed),
                    duplicate_packets: i.duplicate_packets.load(Ordering::Relaxed),
                    bad_packets: i.bad_packets.load(Ordering::Relaxed),
                    lost_packets: i.lost_packets.load(Ordering::Relaxed),
                    bad_data_bytes: i.bad_data_bytes.load(Ordering::Relaxed),
                    signal_dbm_last: signal(&i.signal_last),
                    signal_dbm_min: signal(&i.signal_min),
                    signal_dbm_max: signal(&i.signal_max),
                    signal_dbm_avg: (count > 0)
                        .then(|| (i.signal_sum.load(Ordering::Relaxed) / count as i64) as i32),
                    ms_since_last_rx: since(now_ms, i.last_rx_ms.load(Ordering::Relaxed)),
                    ms_since_last_tx: since(now_ms, i.last_tx_ms.load(Ordering::Relaxed)),
                    rx_quality: i.rx_quality.load(Ordering::Relaxed),
                    relative_quality: i.relative_quality.load(Ordering::Relaxed),
                    history_rx: i.history_rx.ordered(newest),
                    history_bad: i.history_bad.ordered(newest),
                    history_lost: i.history_lost.ordered(newest),
                }
            })
            .collect();

        let mut streams = Vec::new();
        for v in &self.vehicles {
            if !v.in_use.load(Ordering::Acquire) {
                continue;
            }
            let vehicle_id = v.vehicle_id.load(Ordering::Relaxed);
            for (stream_id, s) in v.streams.iter().enumerate() {
                if s.rx_packets.total() == 0 {
                    continue;
                }
                streams.push(StreamStatsSnapshot {
                    vehicle_id,
                    stream_id: stream_id as u8,
                    rx_bytes: s.rx_bytes.total(),
                    rx_packets: s.rx_packets.total(),
                    rx_bytes_per_sec: s.rx_bytes.per_sec(),
                    rx_packets_per_sec: s.rx_packets.per_sec(),
                    last_index: s.last_index.load(Ordering::Relaxed),
                    has_missing: s.missing.load(Ordering::Relaxed),
                    ms_since_last_rx: since(now_ms, s.last_rx_ms.load(Ordering::Relaxed)),
                });
            }
        }

        let links = self
            .links
            .iter()
            .enumerate()
            .map(|(index, l)| LinkStatsSnapshot {
                index,
                rx_bytes: l.rx_bytes.total(),
                rx_packets: l.rx_packets.total(),
                tx_bytes: l.tx_bytes.total(),
                tx_packets: l.tx_packets.total(),
                rx_bytes_per_sec: l.rx_bytes.per_sec(),
                rx_packets_per_sec: l.rx_packets.per_sec(),
                tx_bytes_per_sec: l.tx_bytes.per_sec(),
                tx_packets_per_sec: l.tx_packets.per_sec(),
                last_rtt_us: l.last_rtt_us.load(Ordering::Relaxed),
            })
            .collect();

        RadioStatsSnapshot {
            uptime_ms: now_ms,
            max_rx_quality: self.max_rx_quality.load(Ordering::Relaxed),
            interfaces,
            streams,
            links,
        }
    }
}

fn since(now_ms: u64, at_ms: u64) -> Option<u64> {
    (at_ms > 0).then(|| now_ms.saturating_sub(at_ms))
}

/// 인터페이스 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStatsSnapshot {
    pub index: usize,
    pub name: String,
    pub kind: InterfaceKind,
    pub radio_link: Option<usize>,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub rx_bytes_per_sec: u64,
    pub rx_packets_per_sec: u64,
    pub tx_bytes_per_sec: u64,
    pub tx_packets_per_sec: u64,
    /// 중복 제거 후 받아들인 전체 패킷
    pub unique_packets: u64,
    pub duplicate_packets: u64,
    pub bad_packets: u64,
    pub lost_packets: u64,
    pub bad_data_bytes: u64,
    pub signal_dbm_last: Option<i32>,
    pub signal_dbm_min: Option<i32>,
    pub signal_dbm_max: Option<i32>,
    pub signal_dbm_avg: Option<i32>,
    pub ms_since_last_rx: Option<u64>,
    pub ms_since_last_tx: Option<u64>,
    /// 최근 히스토리 기반 품질 (0 ~ 100)
    pub rx_quality: u8,
    /// 가장 좋은 인터페이스 대비 품질 (0 ~ 100)
    pub relative_quality: u8,
    /// 오래된 것부터
    pub history_rx: Vec<u8>,
    pub history_bad: Vec<u8>,
    pub history_lost: Vec<u8>,
}

/// 차량 스트림 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatsSnapshot {
    pub vehicle_id: u32,
    pub stream_id: u8,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes_per_sec: u64,
    pub rx_packets_per_sec: u64,
    pub last_index: u32,
    pub has_missing: bool,
    pub ms_since_last_rx: Option<u64>,
}

/// 라디오 링크 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStatsSnapshot {
    pub index: usize,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub rx_bytes_per_sec: u64,
    pub rx_packets_per_sec: u64,
    pub tx_bytes_per_sec: u64,
    pub tx_packets_per_sec: u64,
    pub last_rtt_us: u32,
}

/// 전체 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioStatsSnapshot {
    pub uptime_ms: u64,
    pub max_rx_quality: u8,
    pub interfaces: Vec<InterfaceStatsSnapshot>,
    pub streams: Vec<StreamStatsSnapshot>,
    pub links: Vec<LinkStatsSnapshot>,
}

impl RadioStatsSnapshot {
    /// 게시된 스냅샷 파일 읽기
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let rx: u64 = self.interfaces.iter().map(|i| i.rx_bytes_per_sec).sum();
        let tx: u64 = self.interfaces.iter().map(|i| i.tx_bytes_per_sec).sum();
        let lost: u64 = self.interfaces.iter().map(|i| i.lost_packets).sum();
        let bad: u64 = self.interfaces.iter().map(|i| i.bad_packets).sum();
        let dup: u64 = self.interfaces.iter().map(|i| i.duplicate_packets).sum();
        format!(
            "Uptime: {:.1}s | Rx: {} B/s | Tx: {} B/s | Lost: {} | Bad: {} | Dup: {} | Quality: {}%",
            self.uptime_ms as f64 / 1000.0,
            rx,
            tx,
            lost,
            bad,
            dup,
            self.max_rx_quality,
        )
    }
}

/// 스냅샷을 파일(공유 메모리 경로)로 게시
///
/// 임시 파일에 쓰고 rename하므로 읽는 쪽은 부분 기록을 보지 않는다.
pub struct StatsPublisher {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl StatsPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn publish(&self, snapshot: &RadioStatsSnapshot) -> Result<()> {
        let file = fs::File::create(&self.tmp_path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, snapshot)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_data()?;
        fs::rename(&self.tmp_path, &self.path)?;
        debug!("통계 스냅샷 게시: {}", self.path.display());
        Ok(())
    }

    /// 게시 실패를 로그로만 남김
    pub fn publish_or_warn(&self, snapshot: &RadioStatsSnapshot) {
        if let Err(e) = self.publish(snapshot) {
            warn!("통계 스냅샷 게시 실패 ({}): {}", self.path.display(), e);
        }
    }
}

impl Drop for StatsPublisher {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.tmp_path);
    }
}
