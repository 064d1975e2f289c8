//! 송신자
//!
//! - 파일당 START → DATA... → END 순서로 송신, 파일 간 교차 없음
//! - Blind Redundancy: 모든 프레임을 R회 반복, 수신 확인 없음
//! - 페이싱: 무선 duty-cycle을 위한 고정 간격
//! - 물리 쓰기 실패는 현재 파일에만 치명적

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::chunk::{FramePlanner, OutboundFile};
use crate::crypto::PayloadCipher;
use crate::frame::{Frame, FrameKind};
use crate::stats::SendStats;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 송신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,

    /// START 송신 중
    Announcing,

    /// DATA 송신 중
    Streaming,

    /// END 송신 중
    Draining,
}

/// 파일 하나의 송신 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file_id: u8,
    pub name: String,

    /// 원본 크기
    pub size: usize,

    /// 데이터 프레임 수
    pub total: u16,

    /// 물리 쓰기 횟수 (redundancy 포함)
    pub writes: u64,
}

/// 실패한 파일
#[derive(Debug)]
pub struct FailedFile {
    pub path: PathBuf,
    pub file_id: u8,
    pub error: Error,
}

/// 여러 파일 송신 결과
#[derive(Debug, Default)]
pub struct BatchReport {
    pub sent: Vec<FileReport>,
    pub failed: Vec<FailedFile>,

    /// 다음 파일에 쓸 file_id
    pub next_file_id: u8,
}

impl BatchReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 송신자
pub struct Sender<T> {
    config: Config,
    transport: T,
    planner: FramePlanner,
    cipher: Option<PayloadCipher>,
    state: SenderState,
    stats: Arc<RwLock<SendStats>>,
}

impl<T: Transport> Sender<T> {
    /// 새 송신자 생성
    pub fn new(config: Config, transport: T) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            planner: FramePlanner::new(config.chunk_size),
            config,
            transport,
            cipher: None,
            state: SenderState::Idle,
            stats: Arc::new(RwLock::new(SendStats::new())),
        })
    }

    /// 분할 전 파일 전체 암호화
    pub fn with_cipher(mut self, cipher: PayloadCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// 통계 반환
    pub fn stats(&self) -> SendStats {
        self.stats.read().clone()
    }

    /// 다른 태스크에서 진행 상황을 보기 위한 공유 통계
    pub fn stats_handle(&self) -> Arc<RwLock<SendStats>> {
        self.stats.clone()
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// 메모리 상의 데이터를 파일 하나로 송신
    pub async fn send_bytes(&mut self, file_id: u8, name: &str, data: &[u8]) -> Result<FileReport> {
        let result = self.send_inner(file_id, name, data).await;
        self.state = SenderState::Idle;

        match &result {
            Ok(report) => {
                self.stats.write().files_sent += 1;
                info!(
                    "파일 송신 완료: {} (id={}, {} bytes, {} frames, {} writes)",
                    report.name, report.file_id, report.size, report.total, report.writes
                );
            }
            Err(e) => {
                self.stats.write().files_failed += 1;
                error!("파일 송신 실패: {} (id={}): {}", name, file_id, e);
            }
        }

        result
    }

    async fn send_inner(&mut self, file_id: u8, name: &str, data: &[u8]) -> Result<FileReport> {
        let payload: Cow<'_, [u8]> = match &self.cipher {
            Some(cipher) => Cow::Owned(cipher.encrypt(data)?),
            None => Cow::Borrowed(data),
        };

        let file = self.planner.plan(file_id, name, &payload)?;
        let writes = self.transmit(&file).await?;

        Ok(FileReport {
            file_id,
            name: file.meta.name.clone(),
            size: data.len(),
            total: file.total(),
            writes,
        })
    }

    /// 경로의 파일 송신. 이름은 마지막 경로 구성요소.
    pub async fn send_file(&mut self, file_id: u8, path: &Path) -> Result<FileReport> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                self.stats.write().files_failed += 1;
                error!("파일 읽기 실패 {}: {}", path.display(), e);
                return Err(e.into());
            }
        };

        self.send_bytes(file_id, &name, &data).await
    }

    /// 여러 파일을 순서대로 송신. 실패한 파일은 기록하고 다음으로 넘어간다.
    pub async fn send_batch(&mut self, paths: &[PathBuf]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut file_id = self.config.first_file_id;

        for (idx, path) in paths.iter().enumerate() {
            if idx > 0 {
                pace(self.config.file_gap()).await;
            }

            match self.send_file(file_id, path).await {
                Ok(sent) => report.sent.push(sent),
                Err(e) => {
                    warn!("{} 건너뜀, 다음 파일 계속", path.display());
                    report.failed.push(FailedFile {
                        path: path.clone(),
                        file_id,
                        error: e,
                    });
                }
            }

            file_id = file_id.wrapping_add(1);
        }

        report.next_file_id = file_id;
        info!(
            "배치 송신 종료: {} 성공, {} 실패",
            report.sent.len(),
            report.failed.len()
        );
        report
    }

    async fn transmit(&mut self, file: &OutboundFile) -> Result<u64> {
        info!(
            "파일 송신 시작: {} (id={}, {} bytes, {} frames, redundancy {})",
            file.meta.name,
            file.file_id,
            file.meta.size,
            file.total(),
            self.config.redundancy
        );

        let mut writes = 0;

        self.state = SenderState::Announcing;
        writes += self.write_redundant(&file.start).await?;
        pace(self.config.announce_delay()).await;

        self.state = SenderState::Streaming;
        for frame in &file.chunks {
            if frame.kind() == FrameKind::End {
                self.state = SenderState::Draining;
            }
            writes += self.write_redundant(frame).await?;
        }

        Ok(writes)
    }

    /// 프레임 하나를 redundancy 횟수만큼 송신
    async fn write_redundant(&mut self, frame: &Frame) -> Result<u64> {
        let bytes = frame.encode();
        let copies = self.config.redundancy;

        for copy in 1..=copies {
            self.write_with_retry(&bytes, frame.file_id()).await?;
            debug!(
                "프레임 송신: id={}, kind={:?}, seq={}/{}, {} bytes, copy {}/{}",
                frame.file_id(),
                frame.kind(),
                frame.sequence(),
                frame.total(),
                bytes.len(),
                copy,
                copies
            );
            pace(self.config.frame_interval()).await;
        }

        Ok(copies as u64)
    }

    async fn write_with_retry(&mut self, bytes: &[u8], file_id: u8) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.transport.write_frame(bytes).await {
                Ok(()) => {
                    self.stats.write().record_write(bytes.len());
                    return Ok(());
                }
                Err(e @ Error::FrameTooLarge { .. }) => return Err(e),
                Err(e) if attempts > self.config.write_retries => {
                    error!("쓰기 포기 (id={}, {}회 시도): {}", file_id, attempts, e);
                    return Err(Error::WriteFailed { file_id, attempts });
                }
                Err(e) => {
                    warn!(
                        "쓰기 실패 (id={}, 재시도 {}/{}): {}",
                        file_id, attempts, self.config.write_retries, e
                    );
                    self.stats.write().write_retries += 1;
                    pace(self.config.retry_backoff()).await;
                }
            }
        }
    }
}

async fn pace(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
