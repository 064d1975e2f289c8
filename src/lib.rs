//! # LFP (LoRa File Protocol)
//!
//! 역방향 채널 없는 저대역 무선 링크용 단방향 청크 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **단방향**: ACK/NACK 없음, 송신측은 수신 여부를 알 수 없음
//! - **고정 프레임**: 10바이트 헤더 + 최대 240바이트 페이로드 (무선 패킷 한계 250바이트)
//! - **Blind Redundancy**: 모든 프레임을 R회 반복 전송으로 손실 보정
//! - **순서 무관 조립**: 중복/순서 뒤바뀜/손실/손상 프레임 허용
//! - **매니페스트 검증**: 파일명→해시 테이블로 종단간 무결성 보고
//! - **선택적 암호화**: ChaCha20-Poly1305 페이로드 변환

pub mod chunk;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod manifest;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;

pub use chunk::{FramePlanner, OutboundFile, TransferState};
pub use config::Config;
pub use crypto::{CryptoError, PayloadCipher};
pub use error::{Error, Result};
pub use frame::{DecodeError, Frame, FrameBuffer, FrameHeader, FrameKind};
pub use manifest::{Manifest, VerifyReport};
pub use message::FileMeta;
pub use receiver::{Accepted, CompletedFile, IncompleteFile, Reassembler, Receiver, ReceiverHandle};
pub use sender::{BatchReport, FailedFile, FileReport, Sender, SenderState};
pub use session::{FileEvent, FileStatus, SessionBridge};
pub use stats::{ReceiveStats, SendStats};
pub use transport::{Impairment, SimLink, StreamLink, Transport, UdpLink};

/// 프레임 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 10;

/// 프레임당 최대 페이로드 (바이트)
pub const MAX_PAYLOAD: usize = 240;

/// 최대 원자 쓰기 크기 - 무선 하드웨어의 최대 패킷 크기
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = MAX_PAYLOAD;

/// 파일당 최대 프레임 수 (sequence/total 필드 폭)
pub const MAX_FRAMES_PER_FILE: usize = u16::MAX as usize;

/// 송신측이 함께 보내는 매니페스트 파일 이름
pub const MANIFEST_FILE_NAME: &str = "manifest.md5";
