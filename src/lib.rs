//! # RadioLink
//!
//! 장거리 FPV 라디오 링크 코어 (지상국/기체 공용)
//!
//! ## 핵심 특징
//! - **다중 인터페이스 수신**: WiFi 모니터 모드 카드와 SiK 시리얼 모뎀을 한 스레드에서 다중화
//! - **SiK 조각화/재조립**: 전체 패킷을 CRC8 짧은 패킷으로 나눠 전송하고 다시 조립
//! - **중복 제거**: 여러 링크로 같은 패킷이 들어와도 한 번만 전달
//! - **재시작 감지**: 스트림 인덱스 역행으로 기체 재부팅 판단
//! - **손실 허용 큐**: 소비자가 느리면 오래된 패킷부터 버림, 수신 스레드는 멈추지 않음
//! - **공유 통계**: 인터페이스/스트림/링크별 처리량, 손실, 품질

pub mod config;
pub mod dedup;
pub mod error;
pub mod interface;
pub mod packet;
pub mod rx;
pub mod rx_queue;
pub mod sched;
pub mod sik;
pub mod stats;
pub mod tx;

pub use config::Config;
pub use dedup::{Classification, DuplicateDetector, DuplicateIndexView, DuplicateLimits};
pub use error::{Error, Result, TxError};
pub use interface::{InterfaceInfo, InterfaceKind, RadioReader, RadioWriter, RxInterface, TxInterface};
pub use packet::{PacketFault, PacketHeader, ShortPacketHeader};
pub use rx::RxEngine;
pub use rx_queue::{RxQueueEntry, RxQueueStats};
pub use stats::{RadioStats, RadioStatsSnapshot, StatsPublisher};
pub use tx::{TxEngine, TxSender};

/// 전체 패킷 최대 크기 (헤더 포함, 바이트)
pub const MAX_PACKET_TOTAL_SIZE: usize = 1500;

/// 동시에 추적하는 최대 차량 수
pub const MAX_CONCURRENT_VEHICLES: usize = 6;

/// 차량당 최대 스트림 수
pub const MAX_RADIO_STREAMS: usize = 8;

/// 최대 라디오 인터페이스 수
pub const MAX_RADIO_INTERFACES: usize = 8;

/// Rx 큐 기본 용량 (패킷 수)
pub const MAX_RX_PACKETS_QUEUE: usize = 200;

/// 스트림 ID
pub const STREAM_ID_DATA: u8 = 0;
pub const STREAM_ID_TELEMETRY: u8 = 1;
pub const STREAM_ID_AUDIO: u8 = 2;
pub const STREAM_ID_DATA2: u8 = 3;
/// 이 값 이상은 비디오 스트림
pub const STREAM_ID_VIDEO_1: u8 = 4;

/// SiK 짧은 패킷 기본 크기 (바이트)
pub const DEFAULT_SIK_PACKET_SIZE: usize = 50;

/// SiK 짧은 패킷 크기 범위
pub const MIN_SIK_PACKET_SIZE: usize = 10;
pub const MAX_SIK_PACKET_SIZE: usize = 250;
