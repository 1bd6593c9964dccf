//! 에러 타입 정의

use thiserror::Error;

use crate::packet::PacketFault;

/// 라디오 링크 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("시리얼 포트 에러: {0}")]
    Serial(#[from] serialport::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 패킷: {0}")]
    InvalidPacket(#[from] PacketFault),

    #[error("유효하지 않은 인터페이스: {index}")]
    InvalidInterface { index: usize },

    #[error("인터페이스 없음")]
    NoInterface,

    #[error("스레드 생성 실패: {0}")]
    ThreadSpawn(String),

    #[error("엔진 정지됨")]
    Stopped,
}

/// Tx 큐 투입 에러
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    #[error("SiK 인터페이스가 아님: {index}")]
    InvalidInterface { index: usize },

    #[error("유효하지 않은 패킷 길이: {len}")]
    InvalidPacket { len: usize },

    #[error("Tx 큐 가득 참")]
    QueueFull,

    #[error("Tx 엔진 정지됨")]
    Stopped,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
