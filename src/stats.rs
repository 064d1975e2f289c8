//! 전송 통계

use std::time::{Duration, Instant};

use crate::frame::DecodeError;
use crate::session::FileStatus;

/// 송신 통계
#[derive(Debug, Clone)]
pub struct SendStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 쓰기 성공한 프레임 수 (중복 전송 포함)
    pub frames_written: u64,

    /// 쓰기 성공한 바이트 수
    pub bytes_written: u64,

    /// 물리 쓰기 재시도 횟수
    pub write_retries: u64,

    /// 전송 완료 파일 수
    pub files_sent: u64,

    /// 전송 실패 파일 수
    pub files_failed: u64,
}

impl SendStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_written: 0,
            bytes_written: 0,
            write_retries: 0,
            files_sent: 0,
            files_failed: 0,
        }
    }

    /// 프레임 쓰기 기록
    pub fn record_write(&mut self, size: usize) {
        self.frames_written += 1;
        self.bytes_written += size as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_written as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Files: {} sent, {} failed | Frames: {} | Bytes: {} | Throughput: {:.1} B/s | Retries: {}",
            self.elapsed().as_secs_f64(),
            self.files_sent,
            self.files_failed,
            self.frames_written,
            self.bytes_written,
            self.throughput(),
            self.write_retries,
        )
    }
}

impl Default for SendStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 수신 통계
#[derive(Debug, Clone)]
pub struct ReceiveStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송 계층에서 읽은 바이트
    pub bytes_read: u64,

    /// 체크섬 검증 통과 프레임
    pub frames_valid: u64,

    /// 새 sequence로 기록된 프레임
    pub frames_stored: u64,

    /// 중복 수신 (redundancy)
    pub duplicates: u64,

    /// 완료된 파일의 뒤늦은 중복
    pub late_duplicates: u64,

    /// 잘린 프레임
    pub truncated: u64,

    /// CRC 불일치
    pub checksum_failures: u64,

    /// 길이 필드 이상
    pub malformed_lengths: u64,

    /// 알 수 없는 종류
    pub unknown_kinds: u64,

    /// 재동기화로 버린 바이트
    pub discarded_bytes: u64,

    /// total 충돌로 버린 프레임
    pub total_conflicts: u64,

    /// 존재할 수 없는 슬롯을 가리킨 프레임
    pub unexpected_ids: u64,

    /// 길이가 다른 중복
    pub payload_conflicts: u64,

    /// 해석할 수 없는 START 메타데이터
    pub bad_metadata: u64,

    pub files_verified: u64,
    pub files_mismatched: u64,
    pub files_unmanifested: u64,
    pub files_incomplete: u64,
}

impl ReceiveStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bytes_read: 0,
            frames_valid: 0,
            frames_stored: 0,
            duplicates: 0,
            late_duplicates: 0,
            truncated: 0,
            checksum_failures: 0,
            malformed_lengths: 0,
            unknown_kinds: 0,
            discarded_bytes: 0,
            total_conflicts: 0,
            unexpected_ids: 0,
            payload_conflicts: 0,
            bad_metadata: 0,
            files_verified: 0,
            files_mismatched: 0,
            files_unmanifested: 0,
            files_incomplete: 0,
        }
    }

    /// 디코딩 실패 기록
    pub fn record_decode_error(&mut self, error: &DecodeError) {
        match error {
            DecodeError::Truncated { .. } => self.truncated += 1,
            DecodeError::ChecksumMismatch { .. } => self.checksum_failures += 1,
            DecodeError::MalformedLength { .. } => self.malformed_lengths += 1,
            DecodeError::UnknownKind(_) => self.unknown_kinds += 1,
        }
    }

    /// 파일 결과 기록
    pub fn record_file(&mut self, status: FileStatus) {
        match status {
            FileStatus::Verified => self.files_verified += 1,
            FileStatus::Mismatch => self.files_mismatched += 1,
            FileStatus::Unmanifested => self.files_unmanifested += 1,
            FileStatus::Incomplete => self.files_incomplete += 1,
        }
    }

    /// 디코딩 실패 총합
    pub fn decode_failures(&self) -> u64 {
        self.truncated + self.checksum_failures + self.malformed_lengths + self.unknown_kinds
    }

    /// 조립 완료된 파일 수
    pub fn files_completed(&self) -> u64 {
        self.files_verified + self.files_mismatched + self.files_unmanifested
    }

    /// 프레임 수신 성공률
    pub fn success_rate(&self) -> f64 {
        let total = self.frames_valid + self.decode_failures();
        if total == 0 {
            return 0.0;
        }
        self.frames_valid as f64 / total as f64
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} valid, {} failed, {} dup | Files: {} verified, {} mismatch, {} unmanifested, {} incomplete | Success: {:.1}%",
            self.elapsed().as_secs_f64(),
            self.frames_valid,
            self.decode_failures(),
            self.duplicates + self.late_duplicates,
            self.files_verified,
            self.files_mismatched,
            self.files_unmanifested,
            self.files_incomplete,
            self.success_rate() * 100.0,
        )
    }
}

impl Default for ReceiveStats {
    fn default() -> Self {
        Self::new()
    }
}
