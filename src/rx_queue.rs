//! Rx 큐
//!
//! Rx 스레드(생산자) → 라우터(소비자) 간 유한 큐.
//! 가득 차면 가장 오래된 3개를 버리고 넣는다. 수신 스레드는 느린 소비자를
//! 기다리며 멈추지 않는다.

use std::collections::VecDeque;

use bytes::Bytes;

/// 오버플로우 시 한 번에 버리는 항목 수
pub const RX_QUEUE_DROP_ON_FULL: usize = 3;

/// 큐 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxQueueEntry {
    /// 패킷 바이트 (≤ MAX_PACKET_TOTAL_SIZE)
    pub data: Bytes,

    /// SiK 짧은 패킷 경로로 재조립된 패킷인지
    pub is_short: bool,

    /// 수신 인터페이스 인덱스
    pub interface: usize,
}

impl RxQueueEntry {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 큐 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxQueueStats {
    /// 지금까지의 최대 적재 수
    pub max_in_queue: usize,

    /// 최근 구간 최대 적재 수
    pub max_in_queue_interval: usize,

    /// 오버플로우로 버린 항목 수
    pub dropped: u64,

    /// 넣은 항목 수
    pub pushed: u64,
}

/// 유한 Rx 큐
#[derive(Debug)]
pub struct RxQueue {
    entries: VecDeque<RxQueueEntry>,
    capacity: usize,
    stats: RxQueueStats,
}

impl RxQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(RX_QUEUE_DROP_ON_FULL + 1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            stats: RxQueueStats::default(),
        }
    }

    /// 항목 추가
    ///
    /// 반환: 오버플로우로 버린 항목 수
    pub fn push(&mut self, entry: RxQueueEntry) -> usize {
        let mut dropped = 0;
        if self.entries.len() >= self.capacity {
            dropped = RX_QUEUE_DROP_ON_FULL.min(self.entries.len());
            self.entries.drain(..dropped);
            self.stats.dropped += dropped as u64;
        }

        self.entries.push_back(entry);
        self.stats.pushed += 1;

        let len = self.entries.len();
        self.stats.max_in_queue = self.stats.max_in_queue.max(len);
        self.stats.max_in_queue_interval = self.stats.max_in_queue_interval.max(len);
        dropped
    }

    pub fn pop(&mut self) -> Option<RxQueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> RxQueueStats {
        self.stats
    }

    /// 구간 최대값 리셋
    pub fn reset_interval_max(&mut self) {
        self.stats.max_in_queue_interval = self.entries.len();
    }

    /// 전체 최대값 리셋
    pub fn reset_max(&mut self) {
        self.stats.max_in_queue = self.entries.len();
    }
}
