//! 프레임 코덱
//!
//! 무선 링크 위의 원자 단위. 모든 정수는 big-endian.
//!
//! ```text
//! offset 0   kind        1 byte   {0=START,1=DATA,2=END}
//! offset 1   file_id     1 byte
//! offset 2   sequence    2 bytes
//! offset 4   total       2 bytes
//! offset 6   length      2 bytes   (0..=240)
//! offset 8   checksum    2 bytes   (CRC-16/MODBUS, 페이로드만)
//! offset 10  payload     `length` bytes
//! ```
//!
//! 헤더 필드는 체크섬으로 보호되지 않는다. sequence/total 손상은
//! 수신측 조립 일관성 검사에서 걸러진다.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::{HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD};

/// 스트림 버퍼 기본 상한
const DEFAULT_BUFFER_LIMIT: usize = 16 * MAX_FRAME_SIZE;

/// 코덱 수준 에러 - 항상 해당 바이트를 버리고 재동기화하여 복구 가능
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("프레임 잘림: {needed} bytes 필요, {got} bytes 수신")]
    Truncated { needed: usize, got: usize },

    #[error("CRC 불일치: expected {expected:04X}, got {got:04X}")]
    ChecksumMismatch { expected: u16, got: u16 },

    #[error("유효하지 않은 페이로드 길이: {length} (최대 {max})", max = MAX_PAYLOAD)]
    MalformedLength { length: u16 },

    #[error("알 수 없는 프레임 종류: {0}")]
    UnknownKind(u8),
}

/// 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// 파일 시작 알림 (메타데이터)
    Start = 0,

    /// 데이터 청크
    Data = 1,

    /// 마지막 데이터 청크
    End = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameKind::Start),
            1 => Ok(FrameKind::Data),
            2 => Ok(FrameKind::End),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

// CRC-16/MODBUS (reflected 0xA001, init 0xFFFF)
const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// 페이로드 CRC-16 계산
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &byte| {
        (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize]
    })
}

/// 프레임 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 프레임 종류
    pub kind: FrameKind,

    /// 세션 내 파일 식별자 (재사용 가능)
    pub file_id: u8,

    /// 파일 내 0-based 프레임 인덱스
    pub sequence: u16,

    /// 파일의 총 데이터 프레임 수
    pub total: u16,

    /// 유효 페이로드 길이
    pub length: u16,

    /// 페이로드 CRC-16
    pub checksum: u16,
}

impl FrameHeader {
    /// 헤더를 바이트로 직렬화
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1] = self.file_id;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..6].copy_from_slice(&self.total.to_be_bytes());
        buf[6..8].copy_from_slice(&self.length.to_be_bytes());
        buf[8..10].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

/// 검증 전 헤더 필드
struct RawHeader {
    kind: u8,
    file_id: u8,
    sequence: u16,
    total: u16,
    length: u16,
    checksum: u16,
}

impl RawHeader {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: bytes[0],
            file_id: bytes[1],
            sequence: u16::from_be_bytes([bytes[2], bytes[3]]),
            total: u16::from_be_bytes([bytes[4], bytes[5]]),
            length: u16::from_be_bytes([bytes[6], bytes[7]]),
            checksum: u16::from_be_bytes([bytes[8], bytes[9]]),
        })
    }
}

/// 프레임 (헤더 + 페이로드)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// 새 프레임 생성
    ///
    /// # Panics
    /// 페이로드가 `MAX_PAYLOAD`를 넘으면 패닉 (호출자 버그).
    pub fn new(kind: FrameKind, file_id: u8, sequence: u16, total: u16, payload: Bytes) -> Self {
        assert!(
            payload.len() <= MAX_PAYLOAD,
            "payload {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD
        );

        Self {
            header: FrameHeader {
                kind,
                file_id,
                sequence,
                total,
                length: payload.len() as u16,
                checksum: crc16(&payload),
            },
            payload,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    pub fn file_id(&self) -> u8 {
        self.header.file_id
    }

    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn total(&self) -> u16 {
        self.header.total
    }

    /// 인코딩된 전체 크기
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// 바이트에서 역직렬화 및 체크섬 검증
    ///
    /// `10 + length` 이후의 바이트는 무시한다 (데이터그램 패딩).
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let raw = RawHeader::parse(bytes).ok_or(DecodeError::Truncated {
            needed: HEADER_SIZE,
            got: bytes.len(),
        })?;

        let length = raw.length as usize;
        if length > MAX_PAYLOAD {
            return Err(DecodeError::MalformedLength { length: raw.length });
        }

        let end = HEADER_SIZE + length;
        if bytes.len() < end {
            return Err(DecodeError::Truncated {
                needed: end,
                got: bytes.len(),
            });
        }

        let kind = FrameKind::try_from(raw.kind)?;

        let payload = &bytes[HEADER_SIZE..end];
        let actual = crc16(payload);
        if actual != raw.checksum {
            return Err(DecodeError::ChecksumMismatch {
                expected: raw.checksum,
                got: actual,
            });
        }

        Ok(Self {
            header: FrameHeader {
                kind,
                file_id: raw.file_id,
                sequence: raw.sequence,
                total: raw.total,
                length: raw.length,
                checksum: raw.checksum,
            },
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// CRC 검증
    pub fn verify_checksum(&self) -> bool {
        self.header.length as usize == self.payload.len() && crc16(&self.payload) == self.header.checksum
    }
}

/// 프레임 한 개를 인코딩
///
/// # Panics
/// 페이로드가 `MAX_PAYLOAD`를 넘으면 패닉.
pub fn encode_frame(kind: FrameKind, file_id: u8, sequence: u16, total: u16, payload: &[u8]) -> Vec<u8> {
    Frame::new(kind, file_id, sequence, total, Bytes::copy_from_slice(payload)).encode()
}

/// 바이트 스트림용 증분 프레이머
///
/// 임의 단위로 잘린 바이트를 받아 완전한 프레임을 꺼낸다. 디코딩 실패 시
/// 한 바이트를 버리고 다음 그럴듯한 프레임 경계를 다시 찾는다. 한 번의
/// 재동기화 구간에서는 첫 에러만 보고한다.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    limit: usize,
    resyncing: bool,
    discarded: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }

    /// 버퍼 상한 지정 (최소 한 프레임)
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(MAX_FRAME_SIZE);
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
            resyncing: false,
            discarded: 0,
        }
    }

    /// 수신 바이트 추가. 상한을 넘으면 가장 오래된 바이트부터 버린다.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.advance(excess);
            self.discarded += excess as u64;
        }
    }

    /// 다음 완전한 프레임 추출
    ///
    /// `None`이면 더 많은 바이트가 필요하다.
    pub fn next_frame(&mut self) -> Option<std::result::Result<Frame, DecodeError>> {
        loop {
            let raw = RawHeader::parse(&self.buf)?;

            let failure = if raw.length as usize > MAX_PAYLOAD {
                DecodeError::MalformedLength { length: raw.length }
            } else if let Err(e) = FrameKind::try_from(raw.kind) {
                e
            } else {
                let end = HEADER_SIZE + raw.length as usize;
                if self.buf.len() < end {
                    return None;
                }
                match Frame::decode(&self.buf[..end]) {
                    Ok(frame) => {
                        self.buf.advance(end);
                        self.resyncing = false;
                        return Some(Ok(frame));
                    }
                    Err(e) => e,
                }
            };

            self.buf.advance(1);
            self.discarded += 1;

            if !self.resyncing {
                self.resyncing = true;
                return Some(Err(failure));
            }
        }
    }

    /// 완성될 가망이 없는 잔여 바이트 폐기
    pub fn flush_partial(&mut self) -> Option<DecodeError> {
        if self.buf.is_empty() {
            return None;
        }

        let got = self.buf.len();
        let needed = RawHeader::parse(&self.buf)
            .map(|raw| HEADER_SIZE + raw.length as usize)
            .unwrap_or(HEADER_SIZE);

        self.buf.clear();
        self.discarded += got as u64;
        self.resyncing = false;

        Some(DecodeError::Truncated { needed, got })
    }

    /// 대기 중인 바이트 수
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// 재동기화로 버린 누적 바이트 수
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
