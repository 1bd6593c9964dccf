//! 중복/역순/스트림 재시작 감지
//!
//! - 차량(vehicle) × 스트림별 시퀀스 이력
//! - 512 슬롯 해시 테이블로 O(1) 중복 검사 (충돌 시 덮어씀)
//! - 큰 폭의 인덱스 역행 또는 장시간 침묵 후 역행 → 스트림 재시작
//!
//! 상태는 Rx 스레드만 변경한다. 다른 스레드는 [`DuplicateIndexView`]로
//! 약간 늦을 수 있는 최대 인덱스/재시작 플래그를 잠금 없이 읽는다.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::packet::PacketHeader;
use crate::stats::LogThrottle;
use crate::{MAX_CONCURRENT_VEHICLES, MAX_RADIO_STREAMS, STREAM_ID_VIDEO_1};

/// 스트림별 중복 테이블 슬롯 수
pub const DUPLICATE_TABLE_SIZE: usize = 512;

const DUPLICATE_TABLE_MASK: u32 = (DUPLICATE_TABLE_SIZE as u32) - 1;

const EMPTY_SLOT: u32 = u32::MAX;

/// 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 처음 보는 패킷
    New,
    /// 이미 받은 패킷
    Duplicate,
    /// 송신측 카운터 리셋 감지 (차량 상태 초기화됨)
    RestartDetected,
}

impl Classification {
    /// 소비자에게 전달해야 하는 패킷인지
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Classification::Duplicate)
    }
}

/// 재시작 판단 한계값
#[derive(Debug, Clone, Copy)]
pub struct DuplicateLimits {
    /// 비디오 스트림 허용 역행 폭
    pub max_delta_video: u32,

    /// 데이터 스트림 허용 역행 폭
    pub max_delta_data: u32,

    /// 시리얼 라디오로 받은 데이터 스트림 허용 역행 폭
    pub max_delta_data_serial: u32,

    /// 오래된 패킷 경고를 남기는 활동 윈도우
    pub stale_log_window: Duration,

    /// 이 시간 이상 침묵 후 역행하면 재시작으로 판단
    pub idle_restart_window: Duration,

    /// 침묵 후 재시작 판단에 필요한 최소 역행 폭
    pub idle_regression_margin: u32,
}

impl Default for DuplicateLimits {
    fn default() -> Self {
        Self {
            max_delta_video: 2000,
            max_delta_data: 50,
            max_delta_data_serial: 200,
            stale_log_window: Duration::from_millis(4000),
            idle_restart_window: Duration::from_millis(8000),
            idle_regression_margin: 10,
        }
    }
}

impl DuplicateLimits {
    /// 스트림 종류별 허용 역행 폭
    pub fn max_delta(&self, stream_id: u8, over_serial: bool) -> u32 {
        if stream_id >= STREAM_ID_VIDEO_1 {
            self.max_delta_video
        } else if over_serial {
            self.max_delta_data_serial
        } else {
            self.max_delta_data
        }
    }
}

/// 스트림 하나의 수신 이력
#[derive(Debug, Clone)]
pub struct StreamHistory {
    table: Box<[u32]>,
    max_seen_index: u32,
    last_seen_index: Option<u32>,
    last_seen_time: Option<Instant>,
    restart_detected: bool,
}

impl StreamHistory {
    pub fn new() -> Self {
        Self {
            table: vec![EMPTY_SLOT; DUPLICATE_TABLE_SIZE].into_boxed_slice(),
            max_seen_index: 0,
            last_seen_index: None,
            last_seen_time: None,
            restart_detected: false,
        }
    }

    /// 초기 상태로 되돌림
    pub fn reset(&mut self) {
        self.table.fill(EMPTY_SLOT);
        self.max_seen_index = 0;
        self.last_seen_index = None;
        self.last_seen_time = None;
        self.restart_detected = false;
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.table[(seq & DUPLICATE_TABLE_MASK) as usize] == seq
    }

    fn insert(&mut self, seq: u32) {
        self.table[(seq & DUPLICATE_TABLE_MASK) as usize] = seq;
    }

    fn touch(&mut self, seq: u32, now: Instant) {
        self.last_seen_index = Some(seq);
        self.max_seen_index = self.max_seen_index.max(seq);
        self.last_seen_time = Some(now);
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn max_seen_index(&self) -> u32 {
        self.max_seen_index
    }

    pub fn last_seen_index(&self) -> Option<u32> {
        self.last_seen_index
    }

    pub fn last_seen_time(&self) -> Option<Instant> {
        self.last_seen_time
    }

    /// 직전 분류에서 재시작이 감지되었는지
    pub fn restart_detected(&self) -> bool {
        self.restart_detected
    }
}

impl Default for StreamHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// 차량 하나의 스트림 이력 묶음
#[derive(Debug, Clone)]
pub struct VehicleDuplicateState {
    pub vehicle_id: u32,
    streams: Vec<StreamHistory>,
}

impl VehicleDuplicateState {
    fn new(vehicle_id: u32) -> Self {
        Self {
            vehicle_id,
            streams: (0..MAX_RADIO_STREAMS).map(|_| StreamHistory::new()).collect(),
        }
    }

    fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.reset();
        }
    }

    pub fn stream(&self, stream_id: u8) -> Option<&StreamHistory> {
        self.streams.get(stream_id as usize)
    }
}

/// 슬롯별 원자적 미러
struct VehicleMirror {
    in_use: AtomicBool,
    vehicle_id: AtomicU32,
    restarted: AtomicBool,
    max_seen: [AtomicU32; MAX_RADIO_STREAMS],
}

impl VehicleMirror {
    fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            vehicle_id: AtomicU32::new(0),
            restarted: AtomicBool::new(false),
            max_seen: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    fn clear_indices(&self) {
        for m in &self.max_seen {
            m.store(0, Ordering::Relaxed);
        }
    }

    fn matches(&self, vehicle_id: u32) -> bool {
        self.in_use.load(Ordering::Acquire) && self.vehicle_id.load(Ordering::Relaxed) == vehicle_id
    }
}

/// 다른 스레드용 읽기 전용 뷰 (값이 약간 늦을 수 있음)
#[derive(Clone)]
pub struct DuplicateIndexView {
    slots: Arc<[VehicleMirror]>,
}

impl DuplicateIndexView {
    fn slot(&self, vehicle_id: u32) -> Option<&VehicleMirror> {
        self.slots.iter().find(|m| m.matches(vehicle_id))
    }

    /// 최대 수신 인덱스 (모르는 차량/스트림이면 0)
    pub fn max_seen_index(&self, vehicle_id: u32, stream_id: u8) -> u32 {
        self.slot(vehicle_id)
            .and_then(|m| m.max_seen.get(stream_id as usize))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn is_vehicle_restarted(&self, vehicle_id: u32) -> bool {
        self.slot(vehicle_id)
            .map(|m| m.restarted.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub fn set_vehicle_restarted_flag(&self, vehicle_id: u32) {
        if let Some(m) = self.slot(vehicle_id) {
            m.restarted.store(true, Ordering::Relaxed);
        }
    }

    pub fn reset_vehicle_restarted_flag(&self, vehicle_id: u32) {
        if let Some(m) = self.slot(vehicle_id) {
            m.restarted.store(false, Ordering::Relaxed);
        }
    }

    /// 추적 중인 차량 ID 목록
    pub fn tracked_vehicles(&self) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|m| m.in_use.load(Ordering::Acquire))
            .map(|m| m.vehicle_id.load(Ordering::Relaxed))
            .collect()
    }
}

/// 중복 감지기
pub struct DuplicateDetector {
    limits: DuplicateLimits,
    slots: Vec<Option<VehicleDuplicateState>>,
    mirror: Arc<[VehicleMirror]>,
    no_room_log: LogThrottle,
    stale_log: LogThrottle,
}

impl DuplicateDetector {
    pub fn new(limits: DuplicateLimits) -> Self {
        Self::with_capacity(limits, MAX_CONCURRENT_VEHICLES)
    }

    /// 동시 추적 차량 수 지정
    pub fn with_capacity(limits: DuplicateLimits, max_vehicles: usize) -> Self {
        Self {
            limits,
            slots: (0..max_vehicles).map(|_| None).collect(),
            mirror: (0..max_vehicles).map(|_| VehicleMirror::new()).collect(),
            no_room_log: LogThrottle::new(Duration::from_secs(1)),
            stale_log: LogThrottle::new(Duration::from_secs(1)),
        }
    }

    pub fn limits(&self) -> &DuplicateLimits {
        &self.limits
    }

    /// 읽기 전용 뷰
    pub fn view(&self) -> DuplicateIndexView {
        DuplicateIndexView {
            slots: self.mirror.clone(),
        }
    }

    fn find_slot(&self, vehicle_id: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(v) if v.vehicle_id == vehicle_id))
    }

    fn find_or_allocate(&mut self, vehicle_id: u32) -> Option<usize> {
        if let Some(idx) = self.find_slot(vehicle_id) {
            return Some(idx);
        }
        let idx = self.slots.iter().position(Option::is_none)?;
        self.slots[idx] = Some(VehicleDuplicateState::new(vehicle_id));

        let m = &self.mirror[idx];
        m.clear_indices();
        m.restarted.store(false, Ordering::Relaxed);
        m.vehicle_id.store(vehicle_id, Ordering::Relaxed);
        m.in_use.store(true, Ordering::Release);

        debug!("차량 {} 중복 감지 슬롯 {} 할당", vehicle_id, idx);
        Some(idx)
    }

    fn free_slot(&mut self, idx: usize) {
        if let Some(v) = self.slots[idx].take() {
            debug!("차량 {} 중복 감지 슬롯 {} 해제", v.vehicle_id, idx);
        }
        let m = &self.mirror[idx];
        m.in_use.store(false, Ordering::Release);
        m.clear_indices();
        m.restarted.store(false, Ordering::Relaxed);
    }

    /// 데이터/비디오 스트림 패킷 분류 (무선 인터페이스 기준 한계값)
    pub fn classify(
        &mut self,
        vehicle_id: u32,
        stream_id: u8,
        seq_index: u32,
        now: Instant,
    ) -> Classification {
        self.classify_with(vehicle_id, stream_id, seq_index, false, false, now)
    }

    /// 수신한 전체 패킷 헤더로 분류
    ///
    /// 클럭 동기 핑은 인덱스를 재사용하므로 중복으로 처리하지 않는다.
    pub fn classify_packet(
        &mut self,
        header: &PacketHeader,
        over_serial: bool,
        now: Instant,
    ) -> Classification {
        self.classify_with(
            header.vehicle_id_src,
            header.stream_id(),
            header.stream_seq(),
            over_serial,
            header.is_ping_clock(),
            now,
        )
    }

    fn classify_with(
        &mut self,
        vehicle_id: u32,
        stream_id: u8,
        seq: u32,
        over_serial: bool,
        is_ping: bool,
        now: Instant,
    ) -> Classification {
        if stream_id as usize >= MAX_RADIO_STREAMS {
            debug!("추적 범위 밖 스트림 {} (차량 {})", stream_id, vehicle_id);
            return Classification::New;
        }

        let Some(idx) = self.find_or_allocate(vehicle_id) else {
            if self.no_room_log.ready(now) {
                warn!(
                    "중복 감지 슬롯 부족: 차량 {} 추적 불가 (최대 {})",
                    vehicle_id,
                    self.slots.len()
                );
            }
            return Classification::New;
        };

        let limits = self.limits;
        let max_delta = limits.max_delta(stream_id, over_serial);
        let Some(vehicle) = self.slots[idx].as_mut() else {
            return Classification::New;
        };
        let stream = &mut vehicle.streams[stream_id as usize];
        stream.restart_detected = false;

        let max = stream.max_seen_index;
        let since_last = stream.last_seen_time.map(|t| now.saturating_duration_since(t));

        let far_below = max > seq.saturating_add(max_delta);
        let idle_regression = since_last.map_or(false, |d| d >= limits.idle_restart_window)
            && seq.saturating_add(limits.idle_regression_margin) < max;

        if far_below || idle_regression {
            if far_below
                && since_last.map_or(false, |d| d < limits.stale_log_window)
                && self.stale_log.ready(now)
            {
                warn!(
                    "차량 {} 스트림 {}: 최대 인덱스 {}보다 한참 작은 {} 수신",
                    vehicle_id, stream_id, max, seq
                );
            }
            info!(
                "차량 {} 스트림 {} 재시작 감지: max {} -> {}, 마지막 수신 {:?} 전",
                vehicle_id, stream_id, max, seq, since_last
            );

            vehicle.reset();
            let stream = &mut vehicle.streams[stream_id as usize];
            stream.touch(seq, now);
            stream.restart_detected = true;

            let m = &self.mirror[idx];
            m.clear_indices();
            m.max_seen[stream_id as usize].store(seq, Ordering::Relaxed);
            m.restarted.store(true, Ordering::Relaxed);
            return Classification::RestartDetected;
        }

        if !is_ping && stream.contains(seq) {
            return Classification::Duplicate;
        }

        stream.insert(seq);
        stream.touch(seq, now);
        self.mirror[idx].max_seen[stream_id as usize]
            .store(stream.max_seen_index, Ordering::Relaxed);
        Classification::New
    }

    /// 차량 상태 초기화 (슬롯 유지)
    pub fn reset_vehicle(&mut self, vehicle_id: u32) {
        if let Some(idx) = self.find_slot(vehicle_id) {
            if let Some(v) = self.slots[idx].as_mut() {
                v.reset();
            }
            self.mirror[idx].clear_indices();
            info!("차량 {} 중복 감지 상태 초기화", vehicle_id);
        }
    }

    /// 지정 차량 외 전부 제거 (0이면 전부 제거)
    pub fn remove_all_except(&mut self, vehicle_id: u32) {
        for idx in 0..self.slots.len() {
            let keep = vehicle_id != 0
                && matches!(&self.slots[idx], Some(v) if v.vehicle_id == vehicle_id);
            if !keep {
                self.free_slot(idx);
            }
        }
        info!("차량 {} 외 중복 감지 상태 제거", vehicle_id);
    }

    pub fn remove_vehicle(&mut self, vehicle_id: u32) {
        if let Some(idx) = self.find_slot(vehicle_id) {
            self.free_slot(idx);
            info!("차량 {} 중복 감지 상태 제거", vehicle_id);
        }
    }

    /// 최대 수신 인덱스 (모르는 차량/스트림이면 0)
    pub fn max_seen_index(&self, vehicle_id: u32, stream_id: u8) -> u32 {
        self.stream(vehicle_id, stream_id)
            .map(StreamHistory::max_seen_index)
            .unwrap_or(0)
    }

    pub fn stream(&self, vehicle_id: u32, stream_id: u8) -> Option<&StreamHistory> {
        let idx = self.find_slot(vehicle_id)?;
        self.slots[idx].as_ref()?.stream(stream_id)
    }

    pub fn is_vehicle_restarted(&self, vehicle_id: u32) -> bool {
        self.view().is_vehicle_restarted(vehicle_id)
    }

    pub fn set_vehicle_restarted_flag(&self, vehicle_id: u32) {
        self.view().set_vehicle_restarted_flag(vehicle_id);
    }

    /// 재시작 플래그 해제
    ///
    /// 재시작 이후 스트림을 깨끗한 상태에서 추적하도록 차량 이력도 초기화한다.
    pub fn reset_vehicle_restarted_flag(&mut self, vehicle_id: u32) {
        let Some(idx) = self.find_slot(vehicle_id) else {
            return;
        };
        if let Some(v) = self.slots[idx].as_mut() {
            v.reset();
        }
        let m = &self.mirror[idx];
        m.clear_indices();
        m.restarted.store(false, Ordering::Relaxed);
        debug!("차량 {} 재시작 플래그 해제, 중복 감지 이력 초기화", vehicle_id);
    }

    pub fn tracked_vehicle_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// 스트림별 상태 로그
    pub fn log_info(&self, now: Instant) {
        for vehicle in self.slots.iter().flatten() {
            for (stream_id, stream) in vehicle.streams.iter().enumerate() {
                let Some(last_time) = stream.last_seen_time else {
                    continue;
                };
                debug!(
                    "차량 {} 스트림 {}: max {}, last {:?}, {}ms 전",
                    vehicle.vehicle_id,
                    stream_id,
                    stream.max_seen_index,
                    stream.last_seen_index,
                    now.saturating_duration_since(last_time).as_millis()
                );
            }
        }
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DuplicateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{pack_stream_index, PACKET_TYPE_PING_CLOCK};
    use crate::STREAM_ID_DATA;

    #[test]
    fn test_new_then_duplicate() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        for seq in [0u32, 7, 511, 512, 100_000] {
            assert_eq!(det.classify(1, STREAM_ID_DATA, seq, now), Classification::New);
            assert_eq!(det.classify(1, STREAM_ID_DATA, seq, now), Classification::Duplicate);
        }
    }

    #[test]
    fn test_sequence_scenario() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        let results: Vec<_> = [0u32, 1, 2, 1, 3]
            .iter()
            .map(|&seq| det.classify(42, STREAM_ID_DATA, seq, now))
            .collect();

        use Classification::*;
        assert_eq!(results, vec![New, New, New, Duplicate, New]);
        assert_eq!(det.max_seen_index(42, STREAM_ID_DATA), 3);
        assert_eq!(det.view().max_seen_index(42, STREAM_ID_DATA), 3);
    }

    #[test]
    fn test_far_below_restart() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        det.classify(7, STREAM_ID_DATA, 5000, now);

        assert_eq!(
            det.classify(7, STREAM_ID_DATA, 100, now),
            Classification::RestartDetected
        );
        assert!(det.is_vehicle_restarted(7));
        assert_eq!(det.max_seen_index(7, STREAM_ID_DATA), 100);
        assert_eq!(det.classify(7, STREAM_ID_DATA, 100, now), Classification::New);
        assert_eq!(det.classify(7, STREAM_ID_DATA, 100, now), Classification::Duplicate);

        det.reset_vehicle_restarted_flag(7);
        assert!(!det.is_vehicle_restarted(7));
        assert_eq!(det.max_seen_index(7, STREAM_ID_DATA), 0);
        assert_eq!(det.view().max_seen_index(7, STREAM_ID_DATA), 0);
        assert_eq!(det.classify(7, STREAM_ID_DATA, 100, now), Classification::New);
    }

    #[test]
    fn test_restart_after_silence() {
        let mut det = DuplicateDetector::default();
        let t0 = Instant::now();
        det.classify(42, STREAM_ID_DATA, 10_000, t0);

        let later = t0 + Duration::from_secs(9);
        assert_eq!(
            det.classify(42, STREAM_ID_DATA, 5, later),
            Classification::RestartDetected
        );
        assert_eq!(det.max_seen_index(42, STREAM_ID_DATA), 5);
    }

    #[test]
    fn test_idle_regression_small_gap() {
        let mut det = DuplicateDetector::default();
        let t0 = Instant::now();
        det.classify(1, STREAM_ID_DATA, 30, t0);

        // 델타 50 이내라도 8초 침묵 후 10 이상 역행하면 재시작
        let later = t0 + Duration::from_secs(8);
        assert_eq!(
            det.classify(1, STREAM_ID_DATA, 15, later),
            Classification::RestartDetected
        );

        // 침묵 없이 작은 역행은 단순 역순 수신
        det.classify(1, STREAM_ID_DATA, 40, later);
        assert_eq!(
            det.classify(1, STREAM_ID_DATA, 20, later),
            Classification::New
        );
    }

    #[test]
    fn test_delta_boundaries() {
        let limits = DuplicateLimits::default();
        let now = Instant::now();

        // 데이터 스트림: 정확히 50 역행은 허용
        let mut det = DuplicateDetector::new(limits);
        det.classify(1, STREAM_ID_DATA, 100, now);
        assert_eq!(det.classify(1, STREAM_ID_DATA, 50, now), Classification::New);
        assert_eq!(
            det.classify(1, STREAM_ID_DATA, 49, now),
            Classification::RestartDetected
        );

        // 비디오 스트림: 2000
        let mut det = DuplicateDetector::new(limits);
        det.classify(1, STREAM_ID_VIDEO_1, 3000, now);
        assert_eq!(det.classify(1, STREAM_ID_VIDEO_1, 1000, now), Classification::New);
        assert_eq!(
            det.classify(1, STREAM_ID_VIDEO_1, 999, now),
            Classification::RestartDetected
        );

        assert_eq!(limits.max_delta(STREAM_ID_DATA, true), 200);
    }

    #[test]
    fn test_serial_delta_boundaries() {
        let now = Instant::now();
        let mut header = PacketHeader::new(7, STREAM_ID_DATA, 1000);
        header.vehicle_id_src = 1;

        let mut det = DuplicateDetector::default();
        assert_eq!(det.classify_packet(&header, true, now), Classification::New);

        // 시리얼 링크는 데이터 스트림도 200까지 역행 허용
        header.stream_packet_idx = pack_stream_index(STREAM_ID_DATA, 800);
        assert_eq!(det.classify_packet(&header, true, now), Classification::New);
        header.stream_packet_idx = pack_stream_index(STREAM_ID_DATA, 799);
        assert_eq!(
            det.classify_packet(&header, true, now),
            Classification::RestartDetected
        );

        // 같은 역행 폭도 무선 링크에서는 재시작
        let mut det = DuplicateDetector::default();
        header.stream_packet_idx = pack_stream_index(STREAM_ID_DATA, 1000);
        det.classify_packet(&header, false, now);
        header.stream_packet_idx = pack_stream_index(STREAM_ID_DATA, 800);
        assert_eq!(
            det.classify_packet(&header, false, now),
            Classification::RestartDetected
        );
    }

    #[test]
    fn test_restart_resets_all_streams() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        det.classify(3, STREAM_ID_VIDEO_1, 500, now);
        det.classify(3, STREAM_ID_DATA, 1000, now);

        assert_eq!(
            det.classify(3, STREAM_ID_DATA, 1, now),
            Classification::RestartDetected
        );
        assert_eq!(det.max_seen_index(3, STREAM_ID_VIDEO_1), 0);
        assert_eq!(det.classify(3, STREAM_ID_VIDEO_1, 500, now), Classification::New);
    }

    #[test]
    fn test_table_is_bounded() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        for seq in 0..10_000u32 {
            det.classify(1, STREAM_ID_VIDEO_1, seq, now);
        }
        let stream = det.stream(1, STREAM_ID_VIDEO_1).unwrap();
        assert_eq!(stream.table_len(), DUPLICATE_TABLE_SIZE);
        // 충돌로 덮어쓰인 오래된 인덱스는 다시 New
        assert!(!stream.contains(0));
        assert!(stream.contains(9_999));
    }

    #[test]
    fn test_ping_never_duplicate() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        let mut header = PacketHeader::new(PACKET_TYPE_PING_CLOCK, STREAM_ID_DATA, 9);
        header.vehicle_id_src = 5;

        assert_eq!(det.classify_packet(&header, false, now), Classification::New);
        assert_eq!(det.classify_packet(&header, false, now), Classification::New);

        header.packet_type = 7;
        assert_eq!(det.classify_packet(&header, false, now), Classification::Duplicate);
    }

    #[test]
    fn test_vehicle_table_full() {
        let mut det = DuplicateDetector::with_capacity(DuplicateLimits::default(), 2);
        let now = Instant::now();
        det.classify(1, STREAM_ID_DATA, 1, now);
        det.classify(2, STREAM_ID_DATA, 1, now);

        // 추적 불가 차량은 항상 New
        assert_eq!(det.classify(3, STREAM_ID_DATA, 1, now), Classification::New);
        assert_eq!(det.classify(3, STREAM_ID_DATA, 1, now), Classification::New);
        assert_eq!(det.tracked_vehicle_count(), 2);

        det.remove_vehicle(1);
        assert_eq!(det.classify(3, STREAM_ID_DATA, 1, now), Classification::New);
        assert_eq!(det.classify(3, STREAM_ID_DATA, 1, now), Classification::Duplicate);
    }

    #[test]
    fn test_admin_resets() {
        let mut det = DuplicateDetector::default();
        let now = Instant::now();
        for vid in [10, 20, 30] {
            det.classify(vid, STREAM_ID_DATA, 5, now);
        }

        det.reset_vehicle(10);
        assert_eq!(det.max_seen_index(10, STREAM_ID_DATA), 0);
        assert_eq!(det.classify(10, STREAM_ID_DATA, 5, now), Classification::New);

        det.classify(20, STREAM_ID_DATA, 2000, now);
        det.set_vehicle_restarted_flag(20);
        det.reset_vehicle_restarted_flag(20);
        assert!(!det.is_vehicle_restarted(20));
        assert_eq!(det.max_seen_index(20, STREAM_ID_DATA), 0);
        assert_eq!(det.classify(20, STREAM_ID_DATA, 5, now), Classification::New);

        det.remove_all_except(20);
        assert_eq!(det.tracked_vehicle_count(), 1);
        assert_eq!(det.view().tracked_vehicles(), vec![20]);

        det.remove_all_except(0);
        assert_eq!(det.tracked_vehicle_count(), 0);
        assert_eq!(det.view().max_seen_index(20, STREAM_ID_DATA), 0);
    }
}
