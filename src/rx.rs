//! Rx 엔진
//!
//! - 전용 스레드에서 모든 라디오 인터페이스 읽기 다중화
//! - SiK 짧은 패킷 재조립, WiFi 버퍼 내 전체 패킷 분리
//! - CRC 검증 → 중복 감지 → 통계 → Rx 큐
//!
//! 수신 스레드는 느린 소비자를 기다리지 않는다. 큐 잠금을 제한 시간 안에
//! 얻지 못하면 스레드 로컬 보류 버퍼에 두었다가 다음 루프에서 넣는다.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::dedup::{Classification, DuplicateDetector, DuplicateIndexView};
use crate::interface::{InterfaceInfo, RadioReader, RxInterface};
use crate::packet::{FullPacketIter, PacketFault, PacketHeader};
use crate::rx_queue::{RxQueue, RxQueueEntry, RxQueueStats, RX_QUEUE_DROP_ON_FULL};
use crate::sched;
use crate::sik::{AssemblyOutcome, ScanEvent, SerialFrameScanner, ShortPacketAssembler};
use crate::stats::{LogThrottle, RadioStats};
use crate::{
    Config, Error, Result, MAX_CONCURRENT_VEHICLES, MAX_PACKET_TOTAL_SIZE, MAX_RADIO_INTERFACES,
};

/// 링크 인덱스 간격이 이보다 크면 손실이 아니라 카운터 점프로 본다
const MAX_LINK_INDEX_GAP: u32 = 1000;

/// 이 폭 이상 링크 인덱스가 역행하면 차량 재시작으로 본다
const LINK_INDEX_RESTART_REGRESSION: u32 = 0x0500;

/// 랩어라운드 직전 구간 (재시작 판단 제외)
const LINK_INDEX_WRAP_ZONE: u32 = 0xFFFF_FA00;

/// 외부 명령 (중복 감지기는 Rx 스레드만 변경)
enum RxCmd {
    ResetVehicle(u32),
    RemoveAllExcept(u32),
    RemoveVehicle(u32),
    ResetRestartedFlag(u32),
}

/// 인터페이스 공유 플래그
#[derive(Debug, Clone, Copy, Default)]
struct InterfaceFlags {
    broken: bool,
    paused: u32,
    rx_timeouts: u32,
    bad_packets: u32,
}

/// 큐 뮤텍스로 보호되는 공유 상태
struct RxSharedState {
    queue: RxQueue,
    flags: Vec<InterfaceFlags>,
}

struct RxShared {
    state: Mutex<RxSharedState>,
    max_loop_time_us: AtomicU64,
}

/// Rx 스레드가 소유하는 인터페이스
struct RxPort {
    info: InterfaceInfo,
    reader: Box<dyn RadioReader>,
    scanner: Option<SerialFrameScanner>,
    assembler: ShortPacketAssembler,
    broken: bool,
    /// 잠금을 못 얻어 아직 공유 플래그에 반영하지 못한 고장
    broken_unpublished: bool,
    paused: bool,
    /// 차량별 마지막 링크 인덱스
    link_indices: Vec<(u32, u32)>,
    pending_timeouts: u32,
    pending_bad: u32,
}

impl RxPort {
    fn is_active(&self) -> bool {
        !self.broken && !self.paused
    }

    fn reset_framing(&mut self) {
        if let Some(scanner) = self.scanner.as_mut() {
            scanner.clear();
        }
        self.assembler = ShortPacketAssembler::new();
        self.link_indices.clear();
    }

    /// 차량의 새 링크 인덱스 기록, 이전 값 반환
    fn replace_link_index(&mut self, vehicle_id: u32, index: u32) -> Option<u32> {
        if let Some(entry) = self.link_indices.iter_mut().find(|(v, _)| *v == vehicle_id) {
            return Some(std::mem::replace(&mut entry.1, index));
        }
        if self.link_indices.len() >= MAX_CONCURRENT_VEHICLES {
            self.link_indices.remove(0);
        }
        self.link_indices.push((vehicle_id, index));
        None
    }
}

/// 차량별 수신 카운터
#[derive(Debug, Clone)]
struct VehicleRxCounters {
    vehicle_id: u32,
    total_packets: u64,
    tmp_packets: u32,
    lost_packets: u64,
    min_per_sec: Option<u32>,
    max_per_sec: u32,
}

impl VehicleRxCounters {
    fn new(vehicle_id: u32) -> Self {
        Self {
            vehicle_id,
            total_packets: 0,
            tmp_packets: 0,
            lost_packets: 0,
            min_per_sec: None,
            max_per_sec: 0,
        }
    }
}

/// Rx 스레드 내부 상태 (단일 스레드에서만 접근)
struct RxWorker {
    config: Config,
    ports: Vec<RxPort>,
    detector: DuplicateDetector,
    stats: Arc<RadioStats>,
    shared: Arc<RxShared>,
    cmd_rx: Receiver<RxCmd>,
    running: Arc<AtomicBool>,
    backlog: VecDeque<RxQueueEntry>,
    vehicles: Vec<VehicleRxCounters>,
    read_buf: Vec<u8>,
    loop_count: u32,
    last_second: Instant,
    seconds_rolled: u32,
    last_five_seconds: Instant,
    five_seconds_rolled: u32,
    lock_log: LogThrottle,
    bad_log: LogThrottle,
    slow_log: LogThrottle,
}

impl RxWorker {
    fn run(mut self) {
        if let Some(priority) = self.config.rx_thread_priority {
            sched::raise_current_thread_priority("rx", priority);
        }
        info!("Rx 스레드 시작: 인터페이스 {}개", self.ports.len());

        while self.running.load(Ordering::SeqCst) {
            let loop_start = Instant::now();

            self.process_commands();
            self.sync_shared();

            if self.ports.iter().all(|p| !p.is_active()) {
                self.update_stats(loop_start);
                thread::sleep(Duration::from_millis(self.config.rx_all_paused_sleep_ms));
                continue;
            }

            self.loop_count = self.loop_count.wrapping_add(1);
            if self.loop_count % self.config.rx_stats_every_loops.max(1) == 0 {
                self.update_stats(loop_start);
            }

            // 1단계: 예외 상태 확인
            for index in 0..self.ports.len() {
                if self.ports[index].is_active() && self.ports[index].reader.poll_exception() {
                    self.mark_broken(index, "예외 상태 감지");
                }
            }

            // 2단계: 읽기 가능한 인터페이스 처리
            let mut any_read = false;
            for index in 0..self.ports.len() {
                if !self.ports[index].is_active() {
                    continue;
                }
                match self.ports[index].reader.poll_readable() {
                    Ok(true) => {
                        any_read = true;
                        self.read_interface(index);
                    }
                    Ok(false) => {}
                    Err(e) => self.mark_broken(index, &format!("poll 실패: {}", e)),
                }
            }

            let loop_time = loop_start.elapsed();
            self.track_loop_time(loop_time, loop_start);

            if !any_read {
                thread::sleep(self.config.rx_poll_wait());
            }
        }

        self.flush_backlog();
        info!("Rx 스레드 종료");
    }

    fn process_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                RxCmd::ResetVehicle(vid) => self.detector.reset_vehicle(vid),
                RxCmd::RemoveAllExcept(vid) => {
                    self.detector.remove_all_except(vid);
                    self.stats.remove_all_except(vid);
                    self.vehicles.retain(|v| vid != 0 && v.vehicle_id == vid);
                    for port in &mut self.ports {
                        port.link_indices.retain(|(v, _)| vid != 0 && *v == vid);
                    }
                }
                RxCmd::RemoveVehicle(vid) => {
                    self.detector.remove_vehicle(vid);
                    self.stats.remove_vehicle(vid);
                    self.vehicles.retain(|v| v.vehicle_id != vid);
                    for port in &mut self.ports {
                        port.link_indices.retain(|(v, _)| *v != vid);
                    }
                }
                RxCmd::ResetRestartedFlag(vid) => self.detector.reset_vehicle_restarted_flag(vid),
            }
        }
    }

    /// 공유 플래그 동기화 + 보류 패킷 투입
    fn sync_shared(&mut self) {
        let Some(mut state) = self.shared.state.try_lock_for(self.config.rx_lock_timeout()) else {
            return;
        };

        while let Some(entry) = self.backlog.pop_front() {
            state.queue.push(entry);
        }

        for (port, flags) in self.ports.iter_mut().zip(state.flags.iter_mut()) {
            if std::mem::take(&mut port.broken_unpublished) {
                flags.broken = true;
            }
            flags.rx_timeouts += std::mem::take(&mut port.pending_timeouts);
            flags.bad_packets += std::mem::take(&mut port.pending_bad);

            if port.broken && !flags.broken {
                info!("인터페이스 {} 고장 상태 해제", port.info.name);
                port.reset_framing();
            }
            port.broken = flags.broken;
            port.paused = flags.paused > 0;
        }
    }

    /// 종료 시 보류 패킷 투입 (잠금을 못 얻으면 버림)
    fn flush_backlog(&mut self) {
        if self.backlog.is_empty() {
            return;
        }
        match self.shared.state.try_lock_for(self.config.rx_lock_timeout()) {
            Some(mut state) => {
                while let Some(entry) = self.backlog.pop_front() {
                    state.queue.push(entry);
                }
            }
            None => {
                warn!("Rx 큐 잠금 실패, 보류 패킷 {}개 버림", self.backlog.len());
                self.backlog.clear();
            }
        }
    }

    fn mark_broken(&mut self, index: usize, reason: &str) {
        let port = &mut self.ports[index];
        if port.broken {
            return;
        }
        port.broken = true;
        error!("인터페이스 {} ({}) 고장 처리: {}", index, port.info.name, reason);
        match self.shared.state.try_lock_for(self.config.rx_lock_timeout()) {
            Some(mut state) => state.flags[index].broken = true,
            // 다음 sync_shared에서 반영
            None => port.broken_unpublished = true,
        }
    }

    fn read_interface(&mut self, index: usize) {
        if self.ports[index].info.kind.is_serial() {
            self.read_serial(index);
        } else {
            self.read_wifi(index);
        }
    }

    fn handle_read_error(&mut self, index: usize, e: io::Error) {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                self.ports[index].pending_timeouts += 1;
            }
            _ => self.mark_broken(index, &format!("읽기 실패: {}", e)),
        }
    }

    fn read_serial(&mut self, index: usize) {
        let mut buf = std::mem::take(&mut self.read_buf);
        let port = &mut self.ports[index];
        let free = port.scanner.as_ref().map_or(0, |s| s.free_space()).min(buf.len());

        let result = port.reader.read(&mut buf[..free]);
        match result {
            Ok(0) => port.pending_timeouts += 1,
            Ok(n) => {
                if let Some(scanner) = port.scanner.as_mut() {
                    scanner.extend(&buf[..n]);
                }
                self.drain_serial_frames(index);
            }
            Err(e) => self.handle_read_error(index, e),
        }
        self.read_buf = buf;
    }

    fn drain_serial_frames(&mut self, index: usize) {
        loop {
            let Some(event) = self.ports[index].scanner.as_mut().and_then(|s| s.next_event())
            else {
                return;
            };

            match event {
                ScanEvent::Discarded(n) => {
                    self.stats.record_bad_data(index, n);
                    self.ports[index].pending_bad += 1;
                    debug!("인터페이스 {}: 동기화 실패로 {} bytes 버림", index, n);
                }
                ScanEvent::Frame {
                    header,
                    data,
                    skipped,
                } => {
                    if skipped > 0 {
                        self.stats.record_bad_data(index, skipped);
                    }
                    self.stats
                        .record_radio_frame(index, header.frame_len(), true);

                    let step = self.ports[index].assembler.push(&header, &data);
                    if step.lost_fragments > 0 {
                        self.stats.record_lost(index, step.lost_fragments);
                        if let Some(vid) = self.ports[index].assembler.vehicle_id_src() {
                            self.vehicle_counters(vid).lost_packets += step.lost_fragments as u64;
                        }
                    }

                    match step.outcome {
                        AssemblyOutcome::Pending => {}
                        AssemblyOutcome::Complete(packet) => {
                            self.accept_packet(index, packet, true);
                        }
                        AssemblyOutcome::Rejected(fault) => self.note_bad_packet(index, fault),
                        AssemblyOutcome::Overflow => {
                            let declared = self.ports[index].assembler.limit();
                            self.note_bad_packet(index, PacketFault::TooLarge { declared });
                        }
                    }
                }
            }
        }
    }

    fn read_wifi(&mut self, index: usize) {
        let mut buf = std::mem::take(&mut self.read_buf);
        let result = self.ports[index].reader.read(&mut buf);
        match result {
            Ok(0) => self.mark_broken(index, "빈 버퍼 수신"),
            Ok(n) => {
                if let Some(dbm) = self.ports[index].reader.signal_dbm() {
                    self.stats.record_signal(index, dbm);
                }
                let mut data_ok = true;
                for item in FullPacketIter::new(&buf[..n]) {
                    match item {
                        Ok((_, packet)) => {
                            self.accept_packet(index, Bytes::copy_from_slice(packet), false);
                        }
                        Err(fault) => {
                            data_ok = false;
                            self.note_bad_packet(index, fault);
                        }
                    }
                }
                self.stats.record_radio_frame(index, n, data_ok);
            }
            Err(e) => self.handle_read_error(index, e),
        }
        self.read_buf = buf;
    }

    fn note_bad_packet(&mut self, index: usize, fault: PacketFault) {
        self.ports[index].pending_bad += 1;
        self.stats.record_rx(index, 0, 0, 0, false, true);
        if self.bad_log.ready(Instant::now()) {
            debug!("인터페이스 {} 불량 패킷: {}", index, fault);
        }
    }

    fn vehicle_counters(&mut self, vehicle_id: u32) -> &mut VehicleRxCounters {
        let pos = match self.vehicles.iter().position(|v| v.vehicle_id == vehicle_id) {
            Some(pos) => pos,
            None => {
                if self.vehicles.len() >= MAX_CONCURRENT_VEHICLES {
                    self.vehicles.remove(0);
                }
                self.vehicles.push(VehicleRxCounters::new(vehicle_id));
                self.vehicles.len() - 1
            }
        };
        &mut self.vehicles[pos]
    }

    /// 링크 인덱스 간격으로 손실/재시작 추정
    fn track_link_index(&mut self, index: usize, header: &PacketHeader) {
        let vid = header.vehicle_id_src;
        let current = header.radio_link_packet_index;
        let Some(prev) = self.ports[index].replace_link_index(vid, current) else {
            return;
        };

        if current > prev {
            let gap = current - prev - 1;
            if gap > 0 && gap < MAX_LINK_INDEX_GAP {
                self.stats.record_lost(index, gap);
                self.vehicle_counters(vid).lost_packets += gap as u64;
            }
        } else if current < prev
            && prev < LINK_INDEX_WRAP_ZONE
            && prev - current > LINK_INDEX_RESTART_REGRESSION
        {
            info!(
                "차량 {} 링크 인덱스 역행 ({} -> {}), 재시작 플래그 설정",
                vid, prev, current
            );
            self.detector.set_vehicle_restarted_flag(vid);
        }
    }

    fn accept_packet(&mut self, index: usize, packet: Bytes, is_short: bool) {
        let Some(header) = PacketHeader::read(&packet) else {
            return;
        };
        let now = Instant::now();
        let over_serial = self.ports[index].info.kind.is_serial();

        if !is_short {
            self.track_link_index(index, &header);
        }

        let class = self.detector.classify_packet(&header, over_serial, now);
        let vid = header.vehicle_id_src;
        let stream_id = header.stream_id();

        if class == Classification::Duplicate {
            self.stats
                .record_rx(index, vid, stream_id, packet.len(), true, false);
            return;
        }

        self.stats
            .record_rx(index, vid, stream_id, packet.len(), false, false);
        self.stats.record_stream_index(vid, stream_id, header.stream_seq());
        let counters = self.vehicle_counters(vid);
        counters.total_packets += 1;
        counters.tmp_packets += 1;

        self.push_entry(RxQueueEntry {
            data: packet,
            is_short,
            interface: index,
        });
    }

    fn push_entry(&mut self, entry: RxQueueEntry) {
        match self.shared.state.try_lock_for(self.config.rx_lock_timeout()) {
            Some(mut state) => {
                while let Some(pending) = self.backlog.pop_front() {
                    state.queue.push(pending);
                }
                let dropped = state.queue.push(entry);
                drop(state);
                if dropped > 0 {
                    debug!("Rx 큐 가득 참: 오래된 패킷 {}개 버림", dropped);
                }
            }
            None => {
                if self.lock_log.ready(Instant::now()) {
                    warn!(
                        "Rx 큐 잠금 {}ms 내 획득 실패, 패킷 보류 ({}개)",
                        self.config.rx_lock_timeout_ms,
                        self.backlog.len() + 1
                    );
                }
                if self.backlog.len() >= self.config.rx_queue_capacity {
                    self.backlog.drain(..RX_QUEUE_DROP_ON_FULL.min(self.backlog.len()));
                }
                self.backlog.push_back(entry);
            }
        }
    }

    fn track_loop_time(&mut self, loop_time: Duration, now: Instant) {
        let us = loop_time.as_micros() as u64;
        self.shared.max_loop_time_us.fetch_max(us, Ordering::Relaxed);
        if loop_time > Duration::from_millis(self.config.rx_slow_loop_ms) && self.slow_log.ready(now) {
            warn!("Rx 루프 지연: {:.2}ms", loop_time.as_secs_f64() * 1000.0);
        }
    }

    /// 주기적 통계 롤업 (1초 / 5초)
    fn update_stats(&mut self, now: Instant) {
        self.stats.tick(now);

        if now.saturating_duration_since(self.last_second) >= Duration::from_secs(1) {
            self.last_second = now;
            self.seconds_rolled += 1;

            let mut any = false;
            for v in &mut self.vehicles {
                let tmp = std::mem::take(&mut v.tmp_packets);
                any |= tmp > 0;
                v.min_per_sec = Some(v.min_per_sec.map_or(tmp, |m| m.min(tmp)));
                v.max_per_sec = v.max_per_sec.max(tmp);
            }

            if self.seconds_rolled % 10 == 0 {
                if !any {
                    info!("최근 1초간 수신 패킷 없음");
                }
                for v in &mut self.vehicles {
                    info!(
                        "차량 {}: 총 {} 패킷, 손실 {}, 초당 min/max {}/{}",
                        v.vehicle_id,
                        v.total_packets,
                        v.lost_packets,
                        v.min_per_sec.unwrap_or(0),
                        v.max_per_sec
                    );
                    v.min_per_sec = None;
                    v.max_per_sec = 0;
                }
            }
        }

        if now.saturating_duration_since(self.last_five_seconds) >= Duration::from_secs(5) {
            self.last_five_seconds = now;
            self.five_seconds_rolled += 1;

            if let Some(mut state) = self.shared.state.try_lock_for(self.config.rx_lock_timeout()) {
                let qs = state.queue.stats();
                debug!(
                    "Rx 큐 최대 적재: 최근 {} / 전체 {} (용량 {}, 버림 {})",
                    qs.max_in_queue_interval,
                    qs.max_in_queue,
                    state.queue.capacity(),
                    qs.dropped
                );
                state.queue.reset_interval_max();
                if self.five_seconds_rolled % 10 == 0 {
                    state.queue.reset_max();
                }
            }
            self.detector.log_info(now);
        }
    }
}

/// Rx 엔진 핸들 (외부에서 제어용)
pub struct RxEngine {
    shared: Arc<RxShared>,
    cmd_tx: Sender<RxCmd>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    dedup: DuplicateIndexView,
    interfaces: Vec<InterfaceInfo>,
}

impl RxEngine {
    /// Rx 스레드 시작
    pub fn start(
        config: Config,
        interfaces: Vec<RxInterface>,
        stats: Arc<RadioStats>,
    ) -> Result<Self> {
        if interfaces.is_empty() {
            return Err(Error::NoInterface);
        }
        if interfaces.len() > MAX_RADIO_INTERFACES {
            return Err(Error::InvalidInterface {
                index: MAX_RADIO_INTERFACES,
            });
        }

        let infos: Vec<InterfaceInfo> = interfaces.iter().map(|i| i.info.clone()).collect();
        let shared = Arc::new(RxShared {
            state: Mutex::new(RxSharedState {
                queue: RxQueue::new(config.rx_queue_capacity),
                flags: vec![InterfaceFlags::default(); interfaces.len()],
            }),
            max_loop_time_us: AtomicU64::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = unbounded();

        let ports = interfaces
            .into_iter()
            .map(|i| RxPort {
                scanner: i.info.kind.is_serial().then(|| {
                    SerialFrameScanner::new(
                        config.serial_buffer_size,
                        config.serial_discard_threshold,
                        config.serial_keep_tail,
                    )
                }),
                info: i.info,
                reader: i.reader,
                assembler: ShortPacketAssembler::new(),
                broken: false,
                broken_unpublished: false,
                paused: false,
                link_indices: Vec::new(),
                pending_timeouts: 0,
                pending_bad: 0,
            })
            .collect();

        let detector = DuplicateDetector::new(config.duplicate_limits);
        let dedup = detector.view();
        let now = Instant::now();

        let worker = RxWorker {
            ports,
            detector,
            stats,
            shared: shared.clone(),
            cmd_rx,
            running: running.clone(),
            backlog: VecDeque::new(),
            vehicles: Vec::with_capacity(MAX_CONCURRENT_VEHICLES),
            read_buf: vec![0u8; MAX_PACKET_TOTAL_SIZE * 4],
            loop_count: 0,
            last_second: now,
            seconds_rolled: 0,
            last_five_seconds: now,
            five_seconds_rolled: 0,
            lock_log: LogThrottle::new(Duration::from_secs(1)),
            bad_log: LogThrottle::new(Duration::from_secs(1)),
            slow_log: LogThrottle::new(Duration::from_secs(1)),
            config,
        };

        let handle = thread::Builder::new()
            .name("radiolink-rx".into())
            .spawn(move || worker.run())
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            cmd_tx,
            running,
            handle: Some(handle),
            dedup,
            interfaces: infos,
        })
    }

    pub fn interfaces(&self) -> &[InterfaceInfo] {
        &self.interfaces
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.interfaces.len() {
            Ok(())
        } else {
            Err(Error::InvalidInterface { index })
        }
    }

    /// 다음 수신 패킷 (블록하지 않음)
    pub fn pop_next_packet(&self) -> Option<RxQueueEntry> {
        self.shared.state.lock().queue.pop()
    }

    /// 다음 수신 패킷을 (데이터, SiK 여부, 수신 인터페이스)로
    pub fn try_pop(&self) -> Option<(Bytes, bool, usize)> {
        self.pop_next_packet()
            .map(|e| (e.data, e.is_short, e.interface))
    }

    /// 큐에 남은 패킷 수
    pub fn pending_packets(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn queue_stats(&self) -> RxQueueStats {
        self.shared.state.lock().queue.stats()
    }

    /// 인터페이스 일시정지 (중첩 가능)
    pub fn pause_interface(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let mut state = self.shared.state.lock();
        state.flags[index].paused += 1;
        info!(
            "Rx 인터페이스 {} 일시정지 (count {})",
            index, state.flags[index].paused
        );
        Ok(())
    }

    pub fn resume_interface(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let mut state = self.shared.state.lock();
        let flags = &mut state.flags[index];
        flags.paused = flags.paused.saturating_sub(1);
        info!("Rx 인터페이스 {} 재개 (count {})", index, flags.paused);
        Ok(())
    }

    /// 모든 인터페이스가 일시정지 상태인지
    pub fn all_interfaces_paused(&self) -> bool {
        self.shared.state.lock().flags.iter().all(|f| f.paused > 0)
    }

    /// 고장난 첫 인터페이스
    pub fn any_interface_broken(&self) -> Option<usize> {
        self.shared.state.lock().flags.iter().position(|f| f.broken)
    }

    /// 고장 플래그와 타임아웃/불량 카운터 초기화
    pub fn reset_broken_interfaces(&self) {
        let mut state = self.shared.state.lock();
        for flags in state.flags.iter_mut() {
            flags.broken = false;
            flags.rx_timeouts = 0;
            flags.bad_packets = 0;
        }
        info!("Rx 인터페이스 고장 상태 초기화");
    }

    pub fn any_rx_timeouts(&self) -> Option<usize> {
        self.shared
            .state
            .lock()
            .flags
            .iter()
            .position(|f| f.rx_timeouts > 0)
    }

    /// 타임아웃 횟수 읽고 리셋
    pub fn take_rx_timeouts(&self, index: usize) -> u32 {
        self.shared
            .state
            .lock()
            .flags
            .get_mut(index)
            .map_or(0, |f| std::mem::take(&mut f.rx_timeouts))
    }

    pub fn any_bad_packets(&self) -> Option<usize> {
        self.shared
            .state
            .lock()
            .flags
            .iter()
            .position(|f| f.bad_packets > 0)
    }

    /// 불량 패킷 수 읽고 리셋
    pub fn take_bad_packets(&self, index: usize) -> u32 {
        self.shared
            .state
            .lock()
            .flags
            .get_mut(index)
            .map_or(0, |f| std::mem::take(&mut f.bad_packets))
    }

    /// 최대 루프 시간 읽고 리셋
    pub fn take_max_loop_time(&self) -> Duration {
        Duration::from_micros(self.shared.max_loop_time_us.swap(0, Ordering::Relaxed))
    }

    fn send_cmd(&self, cmd: RxCmd) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("Rx 스레드 종료됨, 명령 무시");
        }
    }

    pub fn reset_vehicle(&self, vehicle_id: u32) {
        self.send_cmd(RxCmd::ResetVehicle(vehicle_id));
    }

    /// 지정 차량 외 전부 제거 (0이면 전부)
    pub fn remove_all_except(&self, vehicle_id: u32) {
        self.send_cmd(RxCmd::RemoveAllExcept(vehicle_id));
    }

    pub fn remove_vehicle(&self, vehicle_id: u32) {
        self.send_cmd(RxCmd::RemoveVehicle(vehicle_id));
    }

    /// 중복 감지기 읽기 전용 뷰
    pub fn dedup_view(&self) -> &DuplicateIndexView {
        &self.dedup
    }

    pub fn max_seen_index(&self, vehicle_id: u32, stream_id: u8) -> u32 {
        self.dedup.max_seen_index(vehicle_id, stream_id)
    }

    pub fn is_vehicle_restarted(&self, vehicle_id: u32) -> bool {
        self.dedup.is_vehicle_restarted(vehicle_id)
    }

    pub fn set_vehicle_restarted_flag(&self, vehicle_id: u32) {
        self.dedup.set_vehicle_restarted_flag(vehicle_id);
    }

    /// 재시작 플래그 해제 + 해당 차량 중복 감지 상태 초기화
    pub fn reset_vehicle_restarted_flag(&self, vehicle_id: u32) {
        self.dedup.reset_vehicle_restarted_flag(vehicle_id);
        self.send_cmd(RxCmd::ResetRestartedFlag(vehicle_id));
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 정지 (스레드 종료까지 대기)
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Rx 스레드 패닉");
            }
        }
    }
}

impl Drop for RxEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{loopback, InterfaceKind, LoopbackControl};
    use crate::packet::encode_packet;
    use crate::sik::ShortPacketFragmenter;

    fn packet(vid: u32, stream: u8, seq: u32, link_index: u32) -> Bytes {
        let mut header = PacketHeader::new(10, stream, seq);
        header.vehicle_id_src = vid;
        header.radio_link_packet_index = link_index;
        encode_packet(&header, &[seq as u8; 16])
    }

    fn start(kinds: &[InterfaceKind]) -> (RxEngine, Vec<LoopbackControl>, Arc<RadioStats>) {
        let mut ifaces = Vec::new();
        let mut controls = Vec::new();
        for (i, &kind) in kinds.iter().enumerate() {
            let (_w, r, c) = loopback(kind);
            ifaces.push(RxInterface::new(InterfaceInfo::new(format!("lo{}", i), kind), r));
            controls.push(c);
        }
        let infos: Vec<_> = ifaces.iter().map(|i| i.info.clone()).collect();
        let stats = Arc::new(RadioStats::new(&infos));
        let engine = RxEngine::start(Config::default(), ifaces, stats.clone()).unwrap();
        (engine, controls, stats)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn drain(engine: &RxEngine, expected: usize) -> Vec<RxQueueEntry> {
        let mut out = Vec::new();
        wait_for(|| engine.pending_packets() >= expected);
        while let Some(e) = engine.pop_next_packet() {
            out.push(e);
        }
        out
    }

    #[test]
    fn test_wifi_packets_deduplicated_across_interfaces() {
        let (engine, ctl, stats) = start(&[InterfaceKind::WifiMonitor, InterfaceKind::WifiMonitor]);

        for seq in 0..5 {
            ctl[0].inject(&packet(42, 0, seq, seq));
            ctl[1].inject(&packet(42, 0, seq, seq));
        }
        assert!(wait_for(|| ctl.iter().all(|c| c.pending_bytes() == 0)));

        let entries = drain(&engine, 5);
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| !e.is_short));
        assert_eq!(engine.max_seen_index(42, 0), 4);

        let snap = stats.snapshot();
        let dup: u64 = snap.interfaces.iter().map(|i| i.duplicate_packets).sum();
        assert_eq!(dup, 5);
    }

    #[test]
    fn test_wifi_buffer_with_multiple_packets() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor]);

        let mut buf = packet(1, 0, 1, 1).to_vec();
        let mut bad = packet(1, 0, 2, 2).to_vec();
        bad[30] ^= 0xFF;
        buf.extend_from_slice(&bad);
        buf.extend_from_slice(&packet(1, 0, 3, 3));
        ctl[0].inject(&buf);

        let entries = drain(&engine, 2);
        assert_eq!(entries.len(), 2);
        assert!(wait_for(|| engine.any_bad_packets() == Some(0)));
        assert_eq!(engine.take_bad_packets(0), 1);
        assert_eq!(engine.take_bad_packets(0), 0);
    }

    #[test]
    fn test_serial_reassembly_to_queue() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::SikSerial]);
        let mut frag = ShortPacketFragmenter::new();

        let original = packet(9, 0, 77, 0);
        ctl[0].inject(&[0x00, 0x13, 0x37]);
        for frame in frag.fragment(&original, 32) {
            ctl[0].inject(&frame);
        }

        let entries = drain(&engine, 1);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_short);
        assert_eq!(entries[0].data, original);
        assert_eq!(entries[0].interface, 0);
    }

    #[test]
    fn test_broken_interface_is_sticky() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor, InterfaceKind::WifiMonitor]);

        ctl[1].raise_exception();
        assert!(wait_for(|| engine.any_interface_broken() == Some(1)));

        // 고장난 인터페이스는 읽지 않음
        ctl[1].recover();
        ctl[1].inject(&packet(1, 0, 1, 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.pending_packets(), 0);

        engine.reset_broken_interfaces();
        assert_eq!(engine.any_interface_broken(), None);
        assert_eq!(drain(&engine, 1).len(), 1);
    }

    #[test]
    fn test_read_failure_marks_broken() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::SikSerial]);
        ctl[0].fail_reads();
        assert!(wait_for(|| engine.any_interface_broken() == Some(0)));
    }

    #[test]
    fn test_paused_interface_not_read() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor]);
        engine.pause_interface(0).unwrap();
        engine.pause_interface(0).unwrap();
        assert!(engine.all_interfaces_paused());
        thread::sleep(Duration::from_millis(20));

        ctl[0].inject(&packet(1, 0, 1, 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.pending_packets(), 0);

        engine.resume_interface(0).unwrap();
        assert!(engine.all_interfaces_paused());
        engine.resume_interface(0).unwrap();
        assert_eq!(drain(&engine, 1).len(), 1);
        assert!(engine.pause_interface(5).is_err());
    }

    #[test]
    fn test_admin_commands_reach_detector() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor]);
        ctl[0].inject(&packet(5, 0, 10, 1));
        assert_eq!(drain(&engine, 1).len(), 1);
        assert_eq!(engine.max_seen_index(5, 0), 10);

        engine.remove_vehicle(5);
        assert!(wait_for(|| engine.max_seen_index(5, 0) == 0));

        // 제거 후 같은 인덱스는 다시 새 패킷
        ctl[0].inject(&packet(5, 0, 10, 2));
        assert_eq!(drain(&engine, 1).len(), 1);
    }

    #[test]
    fn test_link_index_gap_counts_loss() {
        let (engine, ctl, stats) = start(&[InterfaceKind::WifiMonitor]);
        ctl[0].inject(&packet(3, 0, 1, 100));
        ctl[0].inject(&packet(3, 0, 2, 104));
        assert_eq!(drain(&engine, 2).len(), 2);
        assert_eq!(stats.snapshot().interfaces[0].lost_packets, 3);
    }

    #[test]
    fn test_try_pop_returns_origin() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor]);
        let sent = packet(8, 0, 3, 3);
        ctl[0].inject(&sent);
        assert!(wait_for(|| engine.pending_packets() == 1));

        let (data, is_short, interface) = engine.try_pop().unwrap();
        assert_eq!(data, sent);
        assert!(!is_short);
        assert_eq!(interface, 0);
        assert!(engine.try_pop().is_none());
    }

    #[test]
    fn test_queue_lock_contention_holds_packets() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor]);
        {
            // 소비자가 큐를 잡고 있는 동안에도 수신은 계속
            let state = engine.shared.state.lock();
            for seq in 0..3 {
                ctl[0].inject(&packet(2, 0, seq, seq));
            }
            assert!(wait_for(|| ctl[0].pending_bytes() == 0));
            thread::sleep(Duration::from_millis(30));
            assert_eq!(state.queue.len(), 0);
        }

        let seqs: Vec<u32> = drain(&engine, 3)
            .iter()
            .filter_map(|e| PacketHeader::read(&e.data))
            .map(|h| h.stream_seq())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_broken_flag_published_after_lock_contention() {
        let (engine, ctl, _stats) = start(&[InterfaceKind::WifiMonitor]);
        {
            let state = engine.shared.state.lock();
            ctl[0].raise_exception();
            thread::sleep(Duration::from_millis(50));
            assert!(!state.flags[0].broken);
        }
        assert!(wait_for(|| engine.any_interface_broken() == Some(0)));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.any_interface_broken(), Some(0));
    }

    #[test]
    fn test_link_index_tracked_per_vehicle() {
        let (engine, ctl, stats) = start(&[InterfaceKind::WifiMonitor]);
        ctl[0].inject(&packet(1, 0, 1, 10));
        ctl[0].inject(&packet(2, 0, 1, 500));
        ctl[0].inject(&packet(1, 0, 2, 13));
        ctl[0].inject(&packet(2, 0, 2, 501));
        assert_eq!(drain(&engine, 4).len(), 4);
        assert_eq!(stats.snapshot().interfaces[0].lost_packets, 2);
        assert!(!engine.is_vehicle_restarted(1));
        assert!(!engine.is_vehicle_restarted(2));
    }

    #[test]
    fn test_stats_roll_while_all_paused() {
        let (engine, _ctl, stats) = start(&[InterfaceKind::WifiMonitor]);
        engine.pause_interface(0).unwrap();
        stats.record_tx(0, 500);

        let mut rolled = false;
        for _ in 0..600 {
            if stats.snapshot().interfaces[0].tx_bytes_per_sec > 0 {
                rolled = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(rolled);
    }

    #[test]
    fn test_remove_all_except_releases_stats() {
        let (engine, ctl, stats) = start(&[InterfaceKind::WifiMonitor]);
        for vid in 1..=MAX_CONCURRENT_VEHICLES as u32 {
            ctl[0].inject(&packet(vid, 0, 1, vid));
        }
        assert_eq!(drain(&engine, MAX_CONCURRENT_VEHICLES).len(), MAX_CONCURRENT_VEHICLES);

        let keep = MAX_CONCURRENT_VEHICLES as u32;
        engine.remove_all_except(keep);
        assert!(wait_for(|| stats.snapshot().streams.len() == 1));

        // 비워진 슬롯은 새 차량이 사용
        let new_vids: Vec<u32> = (100..100 + MAX_CONCURRENT_VEHICLES as u32 - 1).collect();
        for &vid in &new_vids {
            ctl[0].inject(&packet(vid, 0, 1, 1));
        }
        assert_eq!(drain(&engine, new_vids.len()).len(), new_vids.len());
        let seen: Vec<u32> = stats.snapshot().streams.iter().map(|s| s.vehicle_id).collect();
        assert_eq!(seen.len(), MAX_CONCURRENT_VEHICLES);
        assert!(new_vids.iter().all(|v| seen.contains(v)));
    }
}
