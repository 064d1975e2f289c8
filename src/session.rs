//! 세션/매니페스트 브리지
//!
//! 조립이 끝난 파일을 매니페스트와 대조해 종단간 결과를 보고한다.
//! 재전송 요청은 하지 않는다. 판단은 운영자의 몫이다.
//!
//! 매니페스트는 세션 동안 바뀌지 않는다. 수신된 `manifest.md5`도 다른 파일처럼
//! 기록만 되고, 대조는 세션이 끝난 뒤 `Manifest::verify_dir`로 한다.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::crypto::PayloadCipher;
use crate::manifest::{content_hash, Manifest};
use crate::message::FileMeta;
use crate::receiver::{CompletedFile, IncompleteFile};

/// 파일 단위 최종 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    /// 해시 일치
    Verified,

    /// 매니페스트 항목은 있으나 해시 불일치
    Mismatch,

    /// 조립되지 못하고 만료됨
    Incomplete,

    /// 매니페스트에 없는 파일
    Unmanifested,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FileStatus::Verified => "Verified",
            FileStatus::Mismatch => "Mismatch",
            FileStatus::Incomplete => "Incomplete",
            FileStatus::Unmanifested => "Unmanifested",
        };
        f.write_str(text)
    }
}

/// 파일 완료/만료 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub file_id: u8,
    pub filename: String,
    pub status: FileStatus,

    /// 누락 sequence (Incomplete일 때만)
    pub missing: Vec<u16>,

    /// 복원된 바이트 수 (Incomplete면 그때까지 받은 양)
    pub size: usize,

    /// 복원된 내용의 해시
    pub hash: Option<String>,

    /// 기록된 경로
    pub path: Option<PathBuf>,
}

/// 매니페스트 대조기
#[derive(Debug, Default)]
pub struct SessionBridge {
    manifest: Manifest,
    output_dir: Option<PathBuf>,
    cipher: Option<PayloadCipher>,
}

impl SessionBridge {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            output_dir: None,
            cipher: None,
        }
    }

    /// 완료된 파일을 기록할 디렉토리
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// 조립 후 복호화
    pub fn with_cipher(mut self, cipher: PayloadCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// 완료된 파일 처리
    pub async fn complete(&self, file: CompletedFile) -> FileEvent {
        let filename = safe_name(&file.name, file.file_id);

        let data = match &self.cipher {
            Some(cipher) => match cipher.decrypt(&file.data) {
                Ok(plain) => plain,
                Err(e) => {
                    error!(
                        "파일 {} (id={}) 복호화 실패: {} ({} bytes, {} frames)",
                        filename,
                        file.file_id,
                        e,
                        file.data.len(),
                        file.total
                    );
                    return FileEvent {
                        file_id: file.file_id,
                        filename,
                        status: FileStatus::Mismatch,
                        missing: Vec::new(),
                        size: file.data.len(),
                        hash: None,
                        path: None,
                    };
                }
            },
            None => file.data.to_vec(),
        };

        if let Some(declared) = file.declared_size {
            if declared != file.data.len() as u64 {
                warn!(
                    "파일 {} (id={}) 선언 크기 {} != 조립 크기 {}",
                    filename,
                    file.file_id,
                    declared,
                    file.data.len()
                );
            }
        }

        let actual = content_hash(&data);
        let status = match self.manifest.expected(&filename) {
            Some(expected) if expected == actual => FileStatus::Verified,
            Some(expected) => {
                error!(
                    "파일 {} (id={}) 해시 불일치: expected={}, actual={}, declared={:?}, size={}, frames={}/{} (누락 없음)",
                    filename,
                    file.file_id,
                    expected,
                    actual,
                    file.declared_size,
                    data.len(),
                    file.total,
                    file.total
                );
                FileStatus::Mismatch
            }
            None => FileStatus::Unmanifested,
        };

        let path = match self.output_dir.as_deref() {
            Some(dir) => write_output(dir, &filename, &data).await,
            None => None,
        };

        info!(
            "파일 {} (id={}) 수신 완료: {} bytes, {}",
            filename,
            file.file_id,
            data.len(),
            status
        );

        FileEvent {
            file_id: file.file_id,
            filename,
            status,
            missing: Vec::new(),
            size: data.len(),
            hash: Some(actual),
            path,
        }
    }

    /// 만료된 전송 처리
    pub fn incomplete(&self, file: IncompleteFile) -> FileEvent {
        let filename = match &file.name {
            Some(name) => safe_name(name, file.file_id),
            None => FileMeta::fallback_name(file.file_id),
        };

        warn!(
            "파일 {} (id={}) 미완료: {}/{} frames, 누락 {:?}",
            filename, file.file_id, file.received, file.total, file.missing
        );

        FileEvent {
            file_id: file.file_id,
            filename,
            status: FileStatus::Incomplete,
            missing: file.missing,
            size: file.received_bytes,
            hash: None,
            path: None,
        }
    }
}

/// 와이어 이름에서 마지막 경로 구성요소만 취한다
fn safe_name(name: &str, file_id: u8) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        return FileMeta::fallback_name(file_id);
    }
    last.to_string()
}

async fn write_output(dir: &Path, filename: &str, data: &[u8]) -> Option<PathBuf> {
    let path = dir.join(filename);
    let result = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => tokio::fs::write(&path, data).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Some(path),
        Err(e) => {
            error!("파일 기록 실패 {}: {}", path.display(), e);
            None
        }
    }
}
