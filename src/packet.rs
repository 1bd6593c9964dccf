//! 라디오 패킷 와이어 포맷
//!
//! - 전체 패킷 헤더: 24 bytes, little-endian, 패딩 없음
//! - 짧은 패킷 헤더 (SiK 조각): 4 bytes + 페이로드
//! - CRC32 (전체 패킷) / CRC8 (짧은 패킷)
//!
//! 라디오에서 들어온 바이트는 신뢰할 수 없으므로 모든 파싱은
//! 슬라이스 경계를 검사하고 실패 시 `None`/`false`를 반환한다.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::MAX_PACKET_TOTAL_SIZE;

/// 전체 패킷 헤더 크기 (바이트)
pub const PACKET_HEADER_SIZE: usize = 24;

/// 짧은 패킷 헤더 크기 (바이트)
pub const SHORT_PACKET_HEADER_SIZE: usize = 4;

/// 짧은 패킷 하나가 실을 수 있는 최대 페이로드
pub const MAX_SHORT_PACKET_DATA: usize = u8::MAX as usize;

/// `stream_packet_idx`의 시퀀스 비트 (하위 24비트)
pub const PACKET_FLAGS_MASK_STREAM_PACKET_IDX: u32 = 0x00FF_FFFF;

/// `stream_packet_idx`에서 스트림 ID 위치
pub const PACKET_FLAGS_SHIFT_STREAM_INDEX: u32 = 24;

/// `packet_flags`의 모듈 태그 비트
pub const PACKET_FLAGS_MASK_MODULE: u8 = 0x07;

/// 비디오 모듈 태그
pub const PACKET_COMPONENT_VIDEO: u8 = 1;

/// 클럭 동기 핑 (인덱스를 의도적으로 재사용)
pub const PACKET_TYPE_PING_CLOCK: u8 = 3;

/// 클럭 동기 핑 응답
pub const PACKET_TYPE_PING_CLOCK_REPLY: u8 = 4;

/// 짧은 패킷 시작 마커 (전체 패킷의 첫 조각)
pub const START_PACKET: u8 = 0xF1;

/// 짧은 패킷 종료 마커 (전체 패킷의 마지막 조각)
pub const END_PACKET: u8 = 0xF2;

/// 짧은 패킷 중간 조각 마커
pub const REG_PACKET: u8 = 0xF0;

const CRC8_POLY: u8 = 0x31;

const CRC8_TABLE: [u8; 256] = build_crc8_table();

const fn build_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC32 (IEEE, reflected)
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC8 (poly 0x31, init 0xFF, 반사/최종 XOR 없음)
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0xFF, |crc, &b| CRC8_TABLE[(b ^ crc) as usize])
}

/// 패킷 결함 종류
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFault {
    #[error("헤더보다 짧은 버퍼: {available} bytes")]
    TooShort { available: usize },

    #[error("선언된 길이 불일치: declared {declared}, available {available}")]
    BadLength { declared: usize, available: usize },

    #[error("최대 패킷 크기 초과: {declared} bytes")]
    TooLarge { declared: usize },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },
}

/// 전체 패킷 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// CRC32 (bytes[4..total_length])
    pub crc: u32,

    /// 헤더 포함 전체 길이
    pub total_length: u16,

    /// 패킷 타입
    pub packet_type: u8,

    /// 모듈/컴포넌트 태그
    pub packet_flags: u8,

    /// 상위 8비트 스트림 ID, 하위 24비트 스트림 시퀀스
    pub stream_packet_idx: u32,

    /// 라디오 링크 단위 시퀀스
    pub radio_link_packet_index: u32,

    pub vehicle_id_src: u32,

    pub vehicle_id_dest: u32,
}

impl PacketHeader {
    /// 새 헤더 생성 (길이와 CRC는 인코딩 시 채워짐)
    pub fn new(packet_type: u8, stream_id: u8, stream_seq: u32) -> Self {
        Self {
            packet_type,
            stream_packet_idx: pack_stream_index(stream_id, stream_seq),
            ..Self::default()
        }
    }

    /// 헤더만 디코드
    pub fn read(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..PACKET_HEADER_SIZE)?;
        Some(Self {
            crc: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            total_length: u16::from_le_bytes([b[4], b[5]]),
            packet_type: b[6],
            packet_flags: b[7],
            stream_packet_idx: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            radio_link_packet_index: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            vehicle_id_src: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
            vehicle_id_dest: u32::from_le_bytes([b[20], b[21], b[22], b[23]]),
        })
    }

    /// 헤더 + 페이로드 분리
    ///
    /// `total_length`가 헤더보다 작거나 버퍼를 넘으면 `None`.
    /// 페이로드는 `total_length`까지만 잘라서 반환한다.
    pub fn split(buf: &[u8]) -> Option<(Self, &[u8])> {
        let header = Self::read(buf)?;
        let total = header.total_length as usize;
        if total < PACKET_HEADER_SIZE || total > buf.len() {
            return None;
        }
        Some((header, &buf[PACKET_HEADER_SIZE..total]))
    }

    /// 헤더 직렬화
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.crc);
        buf.put_u16_le(self.total_length);
        buf.put_u8(self.packet_type);
        buf.put_u8(self.packet_flags);
        buf.put_u32_le(self.stream_packet_idx);
        buf.put_u32_le(self.radio_link_packet_index);
        buf.put_u32_le(self.vehicle_id_src);
        buf.put_u32_le(self.vehicle_id_dest);
    }

    pub fn stream_id(&self) -> u8 {
        (self.stream_packet_idx >> PACKET_FLAGS_SHIFT_STREAM_INDEX) as u8
    }

    pub fn stream_seq(&self) -> u32 {
        self.stream_packet_idx & PACKET_FLAGS_MASK_STREAM_PACKET_IDX
    }

    pub fn module(&self) -> u8 {
        self.packet_flags & PACKET_FLAGS_MASK_MODULE
    }

    pub fn is_video(&self) -> bool {
        self.module() == PACKET_COMPONENT_VIDEO
    }

    /// 중복 검사에서 제외되는 클럭 동기 핑 여부
    pub fn is_ping_clock(&self) -> bool {
        matches!(
            self.packet_type,
            PACKET_TYPE_PING_CLOCK | PACKET_TYPE_PING_CLOCK_REPLY
        )
    }
}

/// 스트림 ID + 시퀀스 → `stream_packet_idx`
pub fn pack_stream_index(stream_id: u8, stream_seq: u32) -> u32 {
    ((stream_id as u32) << PACKET_FLAGS_SHIFT_STREAM_INDEX)
        | (stream_seq & PACKET_FLAGS_MASK_STREAM_PACKET_IDX)
}

/// 버퍼 앞에 있는 전체 패킷의 선언 길이
///
/// 헤더를 읽을 수 없거나 선언 길이가 [헤더 크기, 최대 크기] 밖이면 `None`.
pub fn full_packet_length(buf: &[u8]) -> Option<u16> {
    let header = PacketHeader::read(buf)?;
    let total = header.total_length as usize;
    if !(PACKET_HEADER_SIZE..=MAX_PACKET_TOTAL_SIZE).contains(&total) {
        return None;
    }
    Some(header.total_length)
}

/// 전체 패킷 CRC 검증 (헤더의 crc 필드 제외)
pub fn verify_packet(packet: &[u8]) -> Result<PacketHeader, PacketFault> {
    let header = PacketHeader::read(packet).ok_or(PacketFault::TooShort {
        available: packet.len(),
    })?;
    let total = header.total_length as usize;
    if total < PACKET_HEADER_SIZE || total > packet.len() {
        return Err(PacketFault::BadLength {
            declared: total,
            available: packet.len(),
        });
    }
    if total > MAX_PACKET_TOTAL_SIZE {
        return Err(PacketFault::TooLarge { declared: total });
    }
    let got = crc32(&packet[4..total]);
    if got != header.crc {
        return Err(PacketFault::CrcMismatch {
            expected: header.crc,
            got,
        });
    }
    Ok(header)
}

/// 헤더 + 페이로드로 전체 패킷 생성 (`total_length`, `crc` 자동 계산)
pub fn encode_packet(header: &PacketHeader, payload: &[u8]) -> Bytes {
    let total = PACKET_HEADER_SIZE + payload.len();
    let mut header = *header;
    header.total_length = total.min(u16::MAX as usize) as u16;
    header.crc = 0;

    let mut buf = BytesMut::with_capacity(total);
    header.put(&mut buf);
    buf.extend_from_slice(payload);

    let crc = crc32(&buf[4..]);
    buf[..4].copy_from_slice(&crc.to_le_bytes());
    buf.freeze()
}

/// 하나의 라디오 읽기 버퍼 안에 이어붙은 전체 패킷 반복자
///
/// CRC 불일치/최대 크기 초과는 선언 길이만큼 건너뛰고 계속 진행하며,
/// 길이를 신뢰할 수 없는 경우 결함 하나를 돌려준 뒤 종료한다.
pub struct FullPacketIter<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> FullPacketIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            done: false,
        }
    }

    /// 아직 처리하지 않은 바이트 수
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

impl<'a> Iterator for FullPacketIter<'a> {
    type Item = Result<(PacketHeader, &'a [u8]), PacketFault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.buf.len() {
            return None;
        }
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];

        let Some(header) = PacketHeader::read(rest) else {
            self.done = true;
            return Some(Err(PacketFault::TooShort {
                available: rest.len(),
            }));
        };

        let total = header.total_length as usize;
        if total < PACKET_HEADER_SIZE || total > rest.len() {
            self.done = true;
            return Some(Err(PacketFault::BadLength {
                declared: total,
                available: rest.len(),
            }));
        }

        self.pos += total;
        let packet = &rest[..total];
        if total > MAX_PACKET_TOTAL_SIZE {
            return Some(Err(PacketFault::TooLarge { declared: total }));
        }
        match verify_packet(packet) {
            Ok(header) => Some(Ok((header, packet))),
            Err(fault) => Some(Err(fault)),
        }
    }
}

/// 짧은 패킷 헤더 (SiK 조각)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortPacketHeader {
    /// START_PACKET / END_PACKET / REG_PACKET
    pub start_header: u8,

    /// bytes[2..4 + data_length]의 CRC8
    pub crc8: u8,

    /// 인터페이스별 mod-256 조각 카운터
    pub packet_id: u8,

    pub data_length: u8,
}

impl ShortPacketHeader {
    pub fn read(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..SHORT_PACKET_HEADER_SIZE)?;
        Some(Self {
            start_header: b[0],
            crc8: b[1],
            packet_id: b[2],
            data_length: b[3],
        })
    }

    pub fn is_start(&self) -> bool {
        self.start_header == START_PACKET
    }

    pub fn is_end(&self) -> bool {
        self.start_header == END_PACKET
    }

    /// 헤더 포함 프레임 길이
    pub fn frame_len(&self) -> usize {
        SHORT_PACKET_HEADER_SIZE + self.data_length as usize
    }
}

fn is_short_marker(b: u8) -> bool {
    matches!(b, START_PACKET | END_PACKET | REG_PACKET)
}

/// `offset` 위치에서 시작하는 짧은 패킷 디코드 (경계 + CRC8 검사)
pub fn short_packet_at(buf: &[u8], offset: usize) -> Option<(ShortPacketHeader, &[u8])> {
    let rest = buf.get(offset..)?;
    let header = ShortPacketHeader::read(rest)?;
    if !is_short_marker(header.start_header) || header.data_length == 0 {
        return None;
    }
    let frame = rest.get(..header.frame_len())?;
    if crc8(&frame[2..]) != header.crc8 {
        return None;
    }
    Some((header, &frame[SHORT_PACKET_HEADER_SIZE..]))
}

/// `offset` 위치에 유효한 짧은 패킷이 있는지
pub fn is_valid_short_packet_at(buf: &[u8], offset: usize) -> bool {
    short_packet_at(buf, offset).is_some()
}

/// 짧은 패킷 후보 오프셋 (마커 바이트 위치)
pub fn short_packet_candidates(buf: &[u8]) -> impl Iterator<Item = usize> + '_ {
    buf.iter()
        .enumerate()
        .filter(|(_, &b)| is_short_marker(b))
        .map(|(i, _)| i)
}

/// 버퍼에서 첫 번째 유효 짧은 패킷 검색
///
/// 반환: (프레임 시작 오프셋, 헤더, 페이로드)
pub fn find_short_packet(buf: &[u8]) -> Option<(usize, ShortPacketHeader, &[u8])> {
    short_packet_candidates(buf).find_map(|offset| {
        short_packet_at(buf, offset).map(|(header, data)| (offset, header, data))
    })
}

/// 짧은 패킷 인코딩
pub fn encode_short_packet(start_header: u8, packet_id: u8, data: &[u8]) -> Option<Bytes> {
    if data.is_empty() || data.len() > MAX_SHORT_PACKET_DATA {
        return None;
    }
    let mut buf = BytesMut::with_capacity(SHORT_PACKET_HEADER_SIZE + data.len());
    buf.put_u8(start_header);
    buf.put_u8(0);
    buf.put_u8(packet_id);
    buf.put_u8(data.len() as u8);
    buf.extend_from_slice(data);
    buf[1] = crc8(&buf[2..]);
    Some(buf.freeze())
}
