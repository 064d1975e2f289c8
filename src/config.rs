//! 프로토콜 설정
//!
//! 전역 상태 없이 송신자/수신자 생성 시 명시적으로 전달된다.

use std::time::Duration;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD};

/// LFP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트, 1..=240)
    pub chunk_size: usize,

    /// 프레임당 전송 횟수 (blind redundancy)
    pub redundancy: u8,

    /// 프레임 쓰기 간격 (밀리초)
    /// 무선 duty-cycle 및 half-duplex 전환 시간 확보
    pub frame_interval_ms: u64,

    /// START 전송 후 대기 (밀리초) - 수신측 준비 시간
    pub announce_delay_ms: u64,

    /// 파일 사이 간격 (밀리초)
    pub file_gap_ms: u64,

    /// 물리 쓰기 실패 시 재시도 횟수
    pub write_retries: u32,

    /// 쓰기 재시도 간격 (밀리초)
    pub retry_backoff_ms: u64,

    /// 첫 파일에 부여할 file_id (이후 순차 증가, 255 다음 0)
    pub first_file_id: u8,

    /// 비활성 전송 상태 만료 시간 (밀리초)
    pub stale_timeout_ms: u64,

    /// 만료 검사 주기 (밀리초)
    pub sweep_interval_ms: u64,

    /// 수신 폴링 대기 (밀리초)
    pub read_poll_ms: u64,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            redundancy: 2,
            frame_interval_ms: 200,
            announce_delay_ms: 500,
            file_gap_ms: 1000,
            write_retries: 3,
            retry_backoff_ms: 500,
            first_file_id: 0,
            stale_timeout_ms: 60_000,
            sweep_interval_ms: 1000,
            read_poll_ms: 100,
            recv_buffer_size: 4096,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {} not in 1..={}",
                self.chunk_size, MAX_PAYLOAD
            )));
        }
        if self.redundancy == 0 {
            return Err(Error::InvalidConfig("redundancy must be at least 1".into()));
        }
        if self.recv_buffer_size < MAX_FRAME_SIZE {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size {} smaller than one frame ({})",
                self.recv_buffer_size, MAX_FRAME_SIZE
            )));
        }
        if self.stale_timeout_ms == 0 {
            return Err(Error::InvalidConfig("stale_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }

    pub fn file_gap(&self) -> Duration {
        Duration::from_millis(self.file_gap_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    /// 파일 하나의 예상 송신 시간 (페이싱만 고려)
    pub fn estimated_airtime(&self, file_len: usize) -> Duration {
        let chunks = file_len.div_ceil(self.chunk_size.max(1)).max(1) as u64;
        let writes = (chunks + 1).saturating_mul(self.redundancy as u64);
        Duration::from_millis(self.frame_interval_ms.saturating_mul(writes)) + self.announce_delay()
    }

    /// 근거리 고속 링크용 설정 (SF7, 250kHz)
    pub fn fast_link() -> Self {
        Self {
            redundancy: 1,
            frame_interval_ms: 50,
            announce_delay_ms: 100,
            file_gap_ms: 250,
            stale_timeout_ms: 20_000,
            ..Self::default()
        }
    }

    /// 손실이 많은 원거리 링크용 설정
    pub fn lossy_link() -> Self {
        Self {
            redundancy: 3,
            frame_interval_ms: 250,
            announce_delay_ms: 1000,
            file_gap_ms: 2000,
            write_retries: 5,
            retry_backoff_ms: 1000,
            stale_timeout_ms: 180_000,
            sweep_interval_ms: 2000,
            ..Self::default()
        }
    }

    /// 페이싱 없는 설정 (시뮬레이션/테스트용)
    pub fn immediate() -> Self {
        Self {
            frame_interval_ms: 0,
            announce_delay_ms: 0,
            file_gap_ms: 0,
            retry_backoff_ms: 0,
            sweep_interval_ms: 20,
            read_poll_ms: 10,
            ..Self::default()
        }
    }
}
