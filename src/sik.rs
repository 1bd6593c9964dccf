//! SiK 시리얼 라디오 프레이밍
//!
//! - `SerialFrameScanner`: 시리얼 바이트 스트림에서 짧은 패킷 프레임 동기화
//! - `ShortPacketAssembler`: 짧은 패킷 조각 → 전체 패킷 재조립
//! - `ShortPacketFragmenter`: 전체 패킷 → 짧은 패킷 조각 (송신측)

use bytes::Bytes;

use crate::packet::{
    encode_short_packet, find_short_packet, verify_packet, PacketFault, PacketHeader,
    ShortPacketHeader, END_PACKET, MAX_SHORT_PACKET_DATA, PACKET_HEADER_SIZE, REG_PACKET,
    SHORT_PACKET_HEADER_SIZE, START_PACKET,
};
use crate::MAX_PACKET_TOTAL_SIZE;

/// 시리얼 수신 버퍼 크기
pub const SERIAL_BUFFER_SIZE: usize = 512;

/// 프레임을 찾지 못한 채 이만큼 쌓이면 정리
pub const SERIAL_DISCARD_THRESHOLD: usize = 400;

/// 정리 시 남기는 뒷부분 크기
pub const SERIAL_KEEP_TAIL: usize = 256;

/// 재조립 버퍼 상한
pub const MAX_REASSEMBLY_SIZE: usize = 2 * MAX_PACKET_TOTAL_SIZE - 255;

/// 스캐너가 만들어 내는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// 유효한 짧은 패킷 (앞에서 건너뛴 바이트 수 포함)
    Frame {
        header: ShortPacketHeader,
        data: Bytes,
        skipped: usize,
    },
    /// 동기화 실패로 버린 바이트 수
    Discarded(usize),
}

/// 시리얼 바이트 스트림 프레임 스캐너
#[derive(Debug)]
pub struct SerialFrameScanner {
    buf: Vec<u8>,
    capacity: usize,
    discard_threshold: usize,
    keep_tail: usize,
}

impl SerialFrameScanner {
    /// 정리 후 남기는 꼬리는 항상 정리 임계값보다 작다 (정리 때마다 버퍼가 줄어듦)
    pub fn new(capacity: usize, discard_threshold: usize, keep_tail: usize) -> Self {
        let capacity = capacity.max(SHORT_PACKET_HEADER_SIZE + MAX_SHORT_PACKET_DATA);
        let discard_threshold = discard_threshold.clamp(1, capacity);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            discard_threshold,
            keep_tail: keep_tail.min(discard_threshold - 1),
        }
    }

    /// 버퍼에 남은 공간
    pub fn free_space(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 읽은 바이트 추가 (공간이 부족하면 들어가는 만큼만)
    ///
    /// 반환: 실제로 받아들인 바이트 수
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free_space());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// 다음 프레임 또는 정리 이벤트
    pub fn next_event(&mut self) -> Option<ScanEvent> {
        if let Some((offset, header, data)) = find_short_packet(&self.buf) {
            let data = Bytes::copy_from_slice(data);
            self.buf.drain(..offset + header.frame_len());
            return Some(ScanEvent::Frame {
                header,
                data,
                skipped: offset,
            });
        }

        if self.buf.len() >= self.discard_threshold {
            let discard = self.buf.len() - self.keep_tail;
            self.buf.drain(..discard);
            return Some(ScanEvent::Discarded(discard));
        }
        None
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for SerialFrameScanner {
    fn default() -> Self {
        Self::new(SERIAL_BUFFER_SIZE, SERIAL_DISCARD_THRESHOLD, SERIAL_KEEP_TAIL)
    }
}

/// 조각 하나를 넣은 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// 더 많은 조각 필요
    Pending,
    /// CRC 검증된 전체 패킷
    Complete(Bytes),
    /// 길이/CRC 오류로 버림
    Rejected(PacketFault),
    /// 완성 없이 상한 도달
    Overflow,
}

/// 조각 처리 결과 + packet_id 간격으로 추정한 손실 조각 수
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyStep {
    pub outcome: AssemblyOutcome,
    pub lost_fragments: u32,
}

/// 인터페이스별 짧은 패킷 재조립기
#[derive(Debug)]
pub struct ShortPacketAssembler {
    buf: Vec<u8>,
    last_packet_id: Option<u8>,
    vehicle_id_src: Option<u32>,
    limit: usize,
}

impl ShortPacketAssembler {
    pub fn new() -> Self {
        Self::with_limit(MAX_REASSEMBLY_SIZE)
    }

    /// 누적 상한 지정
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(MAX_PACKET_TOTAL_SIZE),
            last_packet_id: None,
            vehicle_id_src: None,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 누적 버퍼 리셋 (packet_id 추적은 유지)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.vehicle_id_src = None;
    }

    pub fn accumulated(&self) -> usize {
        self.buf.len()
    }

    /// 현재 조립 중인 패킷의 송신 차량 ID
    pub fn vehicle_id_src(&self) -> Option<u32> {
        self.vehicle_id_src
    }

    pub fn push(&mut self, header: &ShortPacketHeader, data: &[u8]) -> AssemblyStep {
        let mut lost_fragments = 0;
        if let Some(last) = self.last_packet_id {
            let expected = last.wrapping_add(1);
            if header.packet_id != expected {
                lost_fragments = header.packet_id.wrapping_sub(expected) as u32;
                self.reset();
            }
        }
        self.last_packet_id = Some(header.packet_id);

        if header.start_header == START_PACKET {
            self.reset();
        }

        if self.buf.is_empty() {
            self.vehicle_id_src = PacketHeader::read(data).map(|h| h.vehicle_id_src);
        }
        self.buf.extend_from_slice(data);

        let outcome = self.try_complete(header.start_header == END_PACKET);
        AssemblyStep {
            outcome,
            lost_fragments,
        }
    }

    fn try_complete(&mut self, is_end: bool) -> AssemblyOutcome {
        if self.buf.len() >= PACKET_HEADER_SIZE {
            let declared = u16::from_le_bytes([self.buf[4], self.buf[5]]) as usize;
            if !(PACKET_HEADER_SIZE..=MAX_PACKET_TOTAL_SIZE).contains(&declared) {
                let fault = PacketFault::BadLength {
                    declared,
                    available: self.buf.len(),
                };
                self.reset();
                return AssemblyOutcome::Rejected(fault);
            }

            if self.buf.len() >= declared {
                let result = verify_packet(&self.buf[..declared])
                    .map(|_| Bytes::copy_from_slice(&self.buf[..declared]));
                self.reset();
                return match result {
                    Ok(packet) => AssemblyOutcome::Complete(packet),
                    Err(fault) => AssemblyOutcome::Rejected(fault),
                };
            }

            if is_end {
                let fault = PacketFault::BadLength {
                    declared,
                    available: self.buf.len(),
                };
                self.reset();
                return AssemblyOutcome::Rejected(fault);
            }
        } else if is_end {
            let fault = PacketFault::TooShort {
                available: self.buf.len(),
            };
            self.reset();
            return AssemblyOutcome::Rejected(fault);
        }

        if self.buf.len() >= self.limit {
            self.reset();
            return AssemblyOutcome::Overflow;
        }
        AssemblyOutcome::Pending
    }
}

impl Default for ShortPacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// 인터페이스별 전체 패킷 분할기
#[derive(Debug, Default)]
pub struct ShortPacketFragmenter {
    next_packet_id: u8,
}

impl ShortPacketFragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_packet_id(&self) -> u8 {
        self.next_packet_id
    }

    /// `packet_size` (짧은 패킷 헤더 포함) 단위로 분할
    ///
    /// 첫 조각은 START, 마지막 조각은 END (단일 조각이면 END), 나머지는 REG.
    pub fn fragment(&mut self, packet: &[u8], packet_size: usize) -> Vec<Bytes> {
        let usable = packet_size
            .saturating_sub(SHORT_PACKET_HEADER_SIZE)
            .clamp(1, MAX_SHORT_PACKET_DATA);
        let count = packet.len().div_ceil(usable);

        let mut frames = Vec::with_capacity(count);
        for (i, chunk) in packet.chunks(usable).enumerate() {
            let marker = if i + 1 == count {
                END_PACKET
            } else if i == 0 {
                START_PACKET
            } else {
                REG_PACKET
            };
            if let Some(frame) = encode_short_packet(marker, self.next_packet_id, chunk) {
                frames.push(frame);
            }
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
        }
        frames
    }
}
