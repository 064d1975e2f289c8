//! 파일 ↔ 프레임 분할과 조립
//!
//! - 송신측: 파일을 START + DATA... + END 프레임열로 분할 (`FramePlanner`)
//! - 수신측: file_id별 수신 상태 누적 (`TransferState`)

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::frame::{Frame, FrameKind};
use crate::message::FileMeta;
use crate::{Error, Result, MAX_FRAMES_PER_FILE, MAX_PAYLOAD};

/// 전송 대기 중인 단일 파일 (송신측이 독점 소유)
#[derive(Debug, Clone)]
pub struct OutboundFile {
    pub file_id: u8,
    pub meta: FileMeta,

    /// 메타데이터 알림 프레임
    pub start: Frame,

    /// 데이터 프레임 (마지막은 END)
    pub chunks: Vec<Frame>,
}

impl OutboundFile {
    /// 데이터 프레임 수 (START 제외)
    pub fn total(&self) -> u16 {
        self.chunks.len() as u16
    }

    /// 전송 순서대로 모든 프레임
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::once(&self.start).chain(self.chunks.iter())
    }
}

/// 프레임 분할기 (송신측)
#[derive(Debug, Clone)]
pub struct FramePlanner {
    chunk_size: usize,
}

impl FramePlanner {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_PAYLOAD),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 데이터 프레임 수. 빈 파일도 END 한 개를 가진다.
    pub fn frame_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size).max(1)
    }

    /// 데이터를 프레임들로 분할
    pub fn plan(&self, file_id: u8, name: &str, data: &[u8]) -> Result<OutboundFile> {
        let total = self.frame_count(data.len());
        if total > MAX_FRAMES_PER_FILE {
            return Err(Error::FileTooLarge {
                size: data.len(),
                max: MAX_FRAMES_PER_FILE * self.chunk_size,
            });
        }
        let total = total as u16;

        let meta = FileMeta::new(name, data.len() as u64);
        let start = Frame::new(
            FrameKind::Start,
            file_id,
            0,
            total,
            Bytes::from(meta.to_bytes()?),
        );

        let chunks = if data.is_empty() {
            vec![Frame::new(FrameKind::End, file_id, 0, total, Bytes::new())]
        } else {
            data.chunks(self.chunk_size)
                .enumerate()
                .map(|(idx, piece)| {
                    let kind = if idx + 1 == total as usize {
                        FrameKind::End
                    } else {
                        FrameKind::Data
                    };
                    Frame::new(kind, file_id, idx as u16, total, Bytes::copy_from_slice(piece))
                })
                .collect()
        };

        Ok(OutboundFile {
            file_id,
            meta,
            start,
            chunks,
        })
    }
}

/// 슬롯 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotInsert {
    /// 새 sequence 기록
    New,

    /// 같은 길이의 중복 (멱등)
    Duplicate,

    /// 길이가 다른 중복 - 먼저 기록된 것을 유지
    Conflict { stored: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    payload: Bytes,
    checksum: u16,
}

/// file_id별 수신 상태 (수신측이 독점 소유)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    pub file_id: u8,

    /// 송신측이 선언한 (또는 추론된) 총 데이터 프레임 수
    pub total: u16,

    /// START 메타데이터 (START 손실 시 None)
    pub meta: Option<FileMeta>,

    /// sequence → 검증된 페이로드
    slots: BTreeMap<u16, Slot>,

    /// END 프레임 수신 여부 (힌트)
    end_seen: bool,

    /// 생성 시간
    pub started_at: Instant,

    /// 마지막 유효 프레임 시간
    pub last_activity: Instant,
}

impl TransferState {
    pub fn new(file_id: u8, total: u16, now: Instant) -> Self {
        Self {
            file_id,
            total,
            meta: None,
            slots: BTreeMap::new(),
            end_seen: false,
            started_at: now,
            last_activity: now,
        }
    }

    /// 데이터 프레임 삽입. 호출자가 sequence < total을 보장한다.
    pub fn insert(&mut self, frame: &Frame, now: Instant) -> SlotInsert {
        self.last_activity = now;
        if frame.kind() == FrameKind::End {
            self.end_seen = true;
        }

        if let Some(slot) = self.slots.get(&frame.sequence()) {
            if slot.payload.len() == frame.payload.len() {
                return SlotInsert::Duplicate;
            }
            return SlotInsert::Conflict {
                stored: slot.payload.len(),
            };
        }

        self.slots.insert(
            frame.sequence(),
            Slot {
                payload: frame.payload.clone(),
                checksum: frame.header.checksum,
            },
        );
        SlotInsert::New
    }

    /// START 메타데이터 기록
    pub fn attach_meta(&mut self, meta: FileMeta, now: Instant) {
        self.meta = Some(meta);
        self.last_activity = now;
    }

    /// 이미 기록된 sequence의 체크섬
    pub fn checksum_at(&self, sequence: u16) -> Option<u16> {
        self.slots.get(&sequence).map(|slot| slot.checksum)
    }

    /// 수신된 서로 다른 sequence 수
    pub fn received(&self) -> u16 {
        self.slots.len() as u16
    }

    /// 완료 여부 확인 (개수 기반, END와 무관)
    pub fn is_complete(&self) -> bool {
        self.slots.len() == self.total as usize
    }

    pub fn end_seen(&self) -> bool {
        self.end_seen
    }

    /// 비활성 시간이 `timeout`을 넘었는지
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    /// 누락된 sequence 목록
    pub fn missing_sequences(&self) -> Vec<u16> {
        (0..self.total)
            .filter(|seq| !self.slots.contains_key(seq))
            .collect()
    }

    /// 수신된 sequence 목록 (오름차순)
    pub fn received_sequences(&self) -> Vec<u16> {
        self.slots.keys().copied().collect()
    }

    /// sequence 순서의 체크섬 목록
    pub fn checksums(&self) -> Vec<u16> {
        self.slots.values().map(|slot| slot.checksum).collect()
    }

    /// 수신률 계산
    pub fn receive_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.slots.len() as f64 / self.total as f64
    }

    /// 현재까지 누적된 페이로드 바이트
    pub fn payload_len(&self) -> usize {
        self.slots.values().map(|slot| slot.payload.len()).sum()
    }

    /// sequence 순서로 이어붙인 데이터 추출
    pub fn into_data(self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.payload_len());
        for slot in self.slots.into_values() {
            data.extend_from_slice(&slot.payload);
        }
        data.freeze()
    }
}
