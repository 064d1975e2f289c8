//! 에러 타입 정의

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::frame::DecodeError;

/// LFP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("프레임 디코딩 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("암호화 에러: {0}")]
    Crypto(#[from] CryptoError),

    /// 같은 file_id에 다른 total을 가진 프레임 도착
    #[error("total 불일치: file_id={file_id}, expected {expected}, got {got}")]
    TotalConflict { file_id: u8, expected: u16, got: u16 },

    /// 존재할 수 없는 슬롯을 가리키는 프레임
    #[error("유효하지 않은 프레임 식별자: file_id={file_id}, sequence={sequence}, total={total}")]
    UnexpectedId { file_id: u8, sequence: u16, total: u16 },

    /// 이미 기록된 sequence에 길이가 다른 페이로드 도착
    #[error("페이로드 충돌: file_id={file_id}, sequence={sequence}, stored {stored} bytes, got {got} bytes")]
    PayloadConflict {
        file_id: u8,
        sequence: u16,
        stored: usize,
        got: usize,
    },

    #[error("파일이 너무 큼: {size} bytes (최대 {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("프레임이 너무 큼: {size} bytes (최대 {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("전송 실패: file_id={file_id}, {attempts}회 시도")]
    WriteFailed { file_id: u8, attempts: u32 },

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
