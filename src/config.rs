//! 라디오 링크 설정

use std::time::Duration;

use tracing::warn;

use crate::dedup::DuplicateLimits;
use crate::sik::{SERIAL_BUFFER_SIZE, SERIAL_DISCARD_THRESHOLD, SERIAL_KEEP_TAIL};
use crate::stats::DEFAULT_STATS_PATH;
use crate::{
    DEFAULT_SIK_PACKET_SIZE, MAX_RX_PACKETS_QUEUE, MAX_SIK_PACKET_SIZE, MIN_SIK_PACKET_SIZE,
};

/// 라디오 링크 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// Rx 큐 용량 (패킷 수)
    pub rx_queue_capacity: usize,

    /// 읽을 인터페이스가 없을 때 대기 시간 (마이크로초)
    pub rx_poll_wait_us: u64,

    /// 모든 인터페이스가 일시정지일 때 대기 (밀리초)
    pub rx_all_paused_sleep_ms: u64,

    /// Rx 큐 잠금 대기 상한 (밀리초)
    pub rx_lock_timeout_ms: u64,

    /// 통계 롤업 주기 (루프 횟수)
    pub rx_stats_every_loops: u32,

    /// 느린 루프 경고 기준 (밀리초)
    pub rx_slow_loop_ms: u64,

    /// 시리얼 수신 버퍼 크기
    pub serial_buffer_size: usize,

    /// 프레임 없이 이만큼 쌓이면 정리
    pub serial_discard_threshold: usize,

    /// 정리 시 남기는 뒷부분
    pub serial_keep_tail: usize,

    /// SiK 짧은 패킷 크기 (헤더 포함, 바이트)
    pub sik_packet_size: usize,

    /// Tx IPC 큐 용량 (메시지 수)
    pub tx_queue_capacity: usize,

    /// Tx 큐 투입 재시도 횟수
    pub tx_enqueue_retries: u32,

    /// Tx 큐 투입 재시도 간격 (밀리초)
    pub tx_retry_sleep_ms: u64,

    /// Tx 유휴 백오프 최소/최대/증가폭 (밀리초)
    pub tx_backoff_min_ms: u64,
    pub tx_backoff_max_ms: u64,
    pub tx_backoff_step_ms: u64,

    /// 조각 간 간격 (마이크로초)
    /// 모뎀 실효 처리량에 맞추기 위한 페이싱
    pub tx_fragment_delay_us: u64,

    /// 중복/재시작 판단 한계값
    pub duplicate_limits: DuplicateLimits,

    /// Rx/Tx 스레드 우선순위 (None이면 변경하지 않음)
    pub rx_thread_priority: Option<i32>,
    pub tx_thread_priority: Option<i32>,

    /// 통계 스냅샷 게시 경로
    pub stats_path: String,

    /// 통계 스냅샷 게시 주기 (밀리초)
    pub stats_publish_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rx_queue_capacity: MAX_RX_PACKETS_QUEUE,
            rx_poll_wait_us: 1000,            // 1ms
            rx_all_paused_sleep_ms: 400,
            rx_lock_timeout_ms: 5,
            rx_stats_every_loops: 20,
            rx_slow_loop_ms: 15,
            serial_buffer_size: SERIAL_BUFFER_SIZE,
            serial_discard_threshold: SERIAL_DISCARD_THRESHOLD,
            serial_keep_tail: SERIAL_KEEP_TAIL,
            sik_packet_size: DEFAULT_SIK_PACKET_SIZE,
            tx_queue_capacity: 256,
            tx_enqueue_retries: 2,
            tx_retry_sleep_ms: 5,
            tx_backoff_min_ms: 1,
            tx_backoff_max_ms: 50,
            tx_backoff_step_ms: 5,
            tx_fragment_delay_us: 1000,       // 1ms
            duplicate_limits: DuplicateLimits::default(),
            rx_thread_priority: None,
            tx_thread_priority: None,
            stats_path: DEFAULT_STATS_PATH.to_string(),
            stats_publish_interval_ms: 200,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// SiK 패킷 크기 설정
    ///
    /// 범위 밖이면 기본값으로 되돌린다.
    pub fn set_sik_packet_size(&mut self, size: usize) -> usize {
        self.sik_packet_size = clamp_sik_packet_size(size);
        self.sik_packet_size
    }

    pub fn rx_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.rx_lock_timeout_ms)
    }

    pub fn rx_poll_wait(&self) -> Duration {
        Duration::from_micros(self.rx_poll_wait_us)
    }

    pub fn tx_fragment_delay(&self) -> Duration {
        Duration::from_micros(self.tx_fragment_delay_us)
    }

    /// 장거리용 설정 (작은 조각, 느린 페이싱)
    pub fn long_range() -> Self {
        Self {
            sik_packet_size: 32,
            tx_fragment_delay_us: 3000,
            tx_backoff_max_ms: 50,
            duplicate_limits: DuplicateLimits {
                max_delta_data_serial: 400,
                ..DuplicateLimits::default()
            },
            stats_publish_interval_ms: 500,
            ..Self::default()
        }
    }

    /// 저지연용 설정 (큰 조각, 짧은 대기, 높은 우선순위)
    pub fn low_latency() -> Self {
        Self {
            sik_packet_size: 250,
            tx_fragment_delay_us: 500,
            tx_backoff_max_ms: 10,
            tx_backoff_step_ms: 1,
            rx_poll_wait_us: 250,
            rx_thread_priority: Some(90),
            tx_thread_priority: Some(80),
            ..Self::default()
        }
    }
}

/// SiK 패킷 크기 검증 (범위 밖이면 기본값)
pub fn clamp_sik_packet_size(size: usize) -> usize {
    if (MIN_SIK_PACKET_SIZE..=MAX_SIK_PACKET_SIZE).contains(&size) {
        size
    } else {
        warn!(
            "SiK 패킷 크기 {} 범위 밖 [{}, {}], 기본값 {} 사용",
            size, MIN_SIK_PACKET_SIZE, MAX_SIK_PACKET_SIZE, DEFAULT_SIK_PACKET_SIZE
        );
        DEFAULT_SIK_PACKET_SIZE
    }
}
