//! 수신자
//!
//! - 프레임 재조립 (`Reassembler`, 동기 코어)
//! - 전송 계층 읽기 루프 (`Receiver`, 단일 태스크)
//! - 완료/만료 파일을 세션 브리지를 거쳐 이벤트로 전달

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::{SlotInsert, TransferState};
use crate::frame::{Frame, FrameBuffer, FrameKind};
use crate::message::FileMeta;
use crate::session::{FileEvent, SessionBridge};
use crate::stats::ReceiveStats;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 이벤트 채널 크기
const EVENT_CHANNEL_SIZE: usize = 100;

/// 프레임 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// 새 전송 상태 생성
    Started,

    /// 기존 전송에 메타데이터 기록
    Announced,

    /// 새 sequence 기록
    Stored { received: u16, total: u16 },

    /// redundancy 중복
    Duplicate,

    /// 이미 완료된 파일의 뒤늦은 사본
    LateDuplicate,

    /// 조립은 끝났으나 START를 받지 못함. 이름이 붙거나 만료될 때까지 보류
    AwaitingStart { file_id: u8 },

    /// 파일 완료
    Completed(CompletedFile),
}

/// 조립이 끝난 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub file_id: u8,

    /// START 이름 또는 대체 이름
    pub name: String,

    /// START가 선언한 크기
    pub declared_size: Option<u64>,

    pub data: Bytes,

    /// 데이터 프레임 수
    pub total: u16,
}

/// 완료되지 못하고 정리된 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteFile {
    pub file_id: u8,
    pub name: Option<String>,
    pub total: u16,
    pub received: u16,
    pub received_bytes: usize,
    pub missing: Vec<u16>,
}

impl IncompleteFile {
    fn from_state(state: TransferState) -> Self {
        Self {
            file_id: state.file_id,
            total: state.total,
            received: state.received(),
            received_bytes: state.payload_len(),
            missing: state.missing_sequences(),
            name: state.meta.map(|meta| meta.name),
        }
    }
}

/// 완료된 파일의 흔적. 남은 redundancy 사본이 유령 전송을 만들지 않게 한다.
#[derive(Debug, Clone)]
struct Tombstone {
    total: u16,
    checksums: Vec<u16>,
    finished_at: Instant,
    meta: Option<FileMeta>,

    /// START 없이 완료되어 보류 중인 파일
    unnamed: Option<CompletedFile>,
}

impl Tombstone {
    fn matches(&self, frame: &Frame) -> bool {
        self.total == frame.total()
            && self.checksums.get(frame.sequence() as usize) == Some(&frame.header.checksum)
    }
}

/// 프레임 재조립기
///
/// file_id별 전송 상태를 소유하며 단일 소비자에서만 변경된다.
#[derive(Debug)]
pub struct Reassembler {
    stale_timeout: Duration,
    transfers: HashMap<u8, TransferState>,
    finished: HashMap<u8, Tombstone>,
    retired: Vec<IncompleteFile>,
    released: Vec<CompletedFile>,
    stats: ReceiveStats,
}

impl Reassembler {
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            stale_timeout,
            transfers: HashMap::new(),
            finished: HashMap::new(),
            retired: Vec::new(),
            released: Vec::new(),
            stats: ReceiveStats::new(),
        }
    }

    /// 체크섬 검증된 프레임 처리
    pub fn accept(&mut self, frame: Frame, now: Instant) -> Result<Accepted> {
        self.stats.frames_valid += 1;

        if frame.total() == 0
            || (frame.kind() != FrameKind::Start && frame.sequence() >= frame.total())
        {
            self.stats.unexpected_ids += 1;
            warn!(
                "존재할 수 없는 슬롯: file_id={}, seq={}, total={}",
                frame.file_id(),
                frame.sequence(),
                frame.total()
            );
            return Err(Error::UnexpectedId {
                file_id: frame.file_id(),
                sequence: frame.sequence(),
                total: frame.total(),
            });
        }

        match frame.kind() {
            FrameKind::Start => self.accept_start(frame, now),
            FrameKind::Data | FrameKind::End => self.accept_chunk(frame, now),
        }
    }

    fn accept_start(&mut self, frame: Frame, now: Instant) -> Result<Accepted> {
        let file_id = frame.file_id();
        let total = frame.total();

        let meta = match FileMeta::from_bytes(&frame.payload) {
            Ok(meta) => Some(meta),
            Err(e) => {
                self.stats.bad_metadata += 1;
                warn!("file_id={} START 메타데이터 해석 실패: {}", file_id, e);
                None
            }
        };

        if !self.transfers.contains_key(&file_id) {
            if let Some(accepted) = self.late_start(file_id, total, meta.as_ref()) {
                return Ok(accepted);
            }
        }

        if let Some(state) = self.transfers.get(&file_id) {
            if state.total != total {
                self.resolve_conflict(file_id, total, now)?;
            } else {
                // 다른 파일의 START: 송신측은 이미 다음 파일로 넘어갔다
                let superseded = match (&state.meta, &meta) {
                    (Some(current), Some(next)) if current != next => {
                        info!(
                            "file_id={} 새 파일 알림 ({} → {}), 이전 전송 종료",
                            file_id, current.name, next.name
                        );
                        true
                    }
                    _ => false,
                };

                if superseded {
                    self.retire(file_id);
                } else {
                    if let Some(state) = self.transfers.get_mut(&file_id) {
                        match meta {
                            Some(meta) => state.attach_meta(meta, now),
                            None => state.last_activity = now,
                        }
                    }
                    return Ok(Accepted::Announced);
                }
            }
        }

        Ok(self.open(file_id, total, meta, now))
    }

    /// 이미 완료된 파일에 대한 START. 같은 파일이면 새 세대를 열지 않는다.
    fn late_start(&mut self, file_id: u8, total: u16, meta: Option<&FileMeta>) -> Option<Accepted> {
        let tombstone = self.finished.get_mut(&file_id)?;
        if tombstone.total != total {
            return None;
        }

        match meta {
            Some(meta) if tombstone.meta.is_none() => {
                let mut file = tombstone.unnamed.take()?;
                if meta.size != file.data.len() as u64 {
                    tombstone.unnamed = Some(file);
                    return None;
                }

                info!(
                    "file_id={} 뒤늦은 START로 이름 확정: {} ({} bytes)",
                    file_id, meta.name, meta.size
                );
                file.name = meta.name.clone();
                file.declared_size = Some(meta.size);
                tombstone.meta = Some(meta.clone());
                Some(Accepted::Completed(file))
            }
            Some(meta) if tombstone.meta.as_ref() != Some(meta) => None,
            _ => {
                self.stats.late_duplicates += 1;
                debug!("완료된 file_id={} 의 뒤늦은 START", file_id);
                Some(Accepted::LateDuplicate)
            }
        }
    }

    fn accept_chunk(&mut self, frame: Frame, now: Instant) -> Result<Accepted> {
        let file_id = frame.file_id();
        let total = frame.total();

        if !self.transfers.contains_key(&file_id) {
            if let Some(tombstone) = self.finished.get(&file_id) {
                if tombstone.matches(&frame) {
                    self.stats.late_duplicates += 1;
                    debug!(
                        "완료된 file_id={} 의 뒤늦은 사본: seq={}",
                        file_id,
                        frame.sequence()
                    );
                    return Ok(Accepted::LateDuplicate);
                }
            }
        }

        if let Some(state) = self.transfers.get(&file_id) {
            if state.total != total {
                self.resolve_conflict(file_id, total, now)?;
            }
        }

        if !self.transfers.contains_key(&file_id) {
            // START 손실: 첫 데이터 프레임으로 상태를 추론
            debug!("file_id={} START 없이 시작, total={}", file_id, total);
            self.open(file_id, total, None, now);
        }

        let Some(state) = self.transfers.get_mut(&file_id) else {
            return Ok(Accepted::Started);
        };

        match state.insert(&frame, now) {
            SlotInsert::New => {
                self.stats.frames_stored += 1;
                if state.is_complete() {
                    return Ok(self.finish(file_id, now));
                }
                debug!(
                    "file_id={} seq={} 기록 ({}/{})",
                    file_id,
                    frame.sequence(),
                    state.received(),
                    state.total
                );
                Ok(Accepted::Stored {
                    received: state.received(),
                    total: state.total,
                })
            }
            SlotInsert::Duplicate => {
                self.stats.duplicates += 1;
                Ok(Accepted::Duplicate)
            }
            SlotInsert::Conflict { stored } => {
                self.stats.payload_conflicts += 1;
                warn!(
                    "file_id={} seq={} 길이 충돌: 기록 {} / 수신 {}",
                    file_id,
                    frame.sequence(),
                    stored,
                    frame.payload.len()
                );
                Err(Error::PayloadConflict {
                    file_id,
                    sequence: frame.sequence(),
                    stored,
                    got: frame.payload.len(),
                })
            }
        }
    }

    /// total이 다른 프레임: 기존 상태가 만료됐으면 새 세대로 교체, 아니면 거부
    fn resolve_conflict(&mut self, file_id: u8, total: u16, now: Instant) -> Result<()> {
        let Some(state) = self.transfers.get(&file_id) else {
            return Ok(());
        };

        if state.is_stale(now, self.stale_timeout) {
            info!(
                "file_id={} 만료된 전송 교체 (total {} → {})",
                file_id, state.total, total
            );
            self.retire(file_id);
            return Ok(());
        }

        self.stats.total_conflicts += 1;
        warn!(
            "file_id={} total 충돌: 기록 {} / 수신 {}, 프레임 폐기",
            file_id, state.total, total
        );
        Err(Error::TotalConflict {
            file_id,
            expected: state.total,
            got: total,
        })
    }

    fn open(&mut self, file_id: u8, total: u16, meta: Option<FileMeta>, now: Instant) -> Accepted {
        if let Some(tombstone) = self.finished.remove(&file_id) {
            self.release(file_id, tombstone);
        }

        let mut state = TransferState::new(file_id, total, now);
        if let Some(meta) = meta {
            info!(
                "file_id={} 수신 시작: {} ({} bytes, {} frames)",
                file_id, meta.name, meta.size, total
            );
            state.attach_meta(meta, now);
        }
        self.transfers.insert(file_id, state);
        Accepted::Started
    }

    fn finish(&mut self, file_id: u8, now: Instant) -> Accepted {
        let Some(state) = self.transfers.remove(&file_id) else {
            return Accepted::Duplicate;
        };

        let total = state.total;
        let checksums = state.checksums();
        let meta = state.meta.clone();
        let (name, declared_size) = match &meta {
            Some(meta) => (meta.name.clone(), Some(meta.size)),
            None => (FileMeta::fallback_name(file_id), None),
        };
        let elapsed = now.saturating_duration_since(state.started_at);
        let data = state.into_data();

        debug!(
            "file_id={} 조립 완료: {} bytes, {:.2}s",
            file_id,
            data.len(),
            elapsed.as_secs_f64()
        );

        let file = CompletedFile {
            file_id,
            name,
            declared_size,
            data,
            total,
        };

        let mut tombstone = Tombstone {
            total,
            checksums,
            finished_at: now,
            meta,
            unnamed: None,
        };

        let accepted = if tombstone.meta.is_some() {
            Accepted::Completed(file)
        } else {
            debug!("file_id={} START 없이 완료, 이름을 기다림", file_id);
            tombstone.unnamed = Some(file);
            Accepted::AwaitingStart { file_id }
        };
        self.finished.insert(file_id, tombstone);
        accepted
    }

    /// 보류 중이던 파일을 대체 이름으로 내보낸다
    fn release(&mut self, file_id: u8, tombstone: Tombstone) {
        if let Some(file) = tombstone.unnamed {
            warn!(
                "file_id={} START를 받지 못함, {} 로 보고",
                file_id, file.name
            );
            self.released.push(file);
        }
    }

    fn retire(&mut self, file_id: u8) {
        if let Some(state) = self.transfers.remove(&file_id) {
            self.retired.push(IncompleteFile::from_state(state));
        }
    }

    /// 비활성 전송 정리. 교체되어 밀려난 전송도 함께 보고한다.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<IncompleteFile> {
        let timeout = self.stale_timeout;
        let mut stale: Vec<u8> = self
            .transfers
            .iter()
            .filter(|(_, state)| state.is_stale(now, timeout))
            .map(|(&file_id, _)| file_id)
            .collect();
        stale.sort_unstable();

        for file_id in stale {
            if let Some(state) = self.transfers.get(&file_id) {
                warn!(
                    "file_id={} 타임아웃: {:.1}% 수신",
                    file_id,
                    state.receive_ratio() * 100.0
                );
            }
            self.retire(file_id);
        }

        let mut expired: Vec<u8> = self
            .finished
            .iter()
            .filter(|(_, tombstone)| now.saturating_duration_since(tombstone.finished_at) > timeout)
            .map(|(&file_id, _)| file_id)
            .collect();
        expired.sort_unstable();

        for file_id in expired {
            if let Some(tombstone) = self.finished.remove(&file_id) {
                self.release(file_id, tombstone);
            }
        }

        std::mem::take(&mut self.retired)
    }

    /// 이름 없이 보류됐다가 풀려난 완료 파일들
    pub fn take_released(&mut self) -> Vec<CompletedFile> {
        std::mem::take(&mut self.released)
    }

    /// START를 기다리며 보류 중인 파일 수
    pub fn awaiting_start(&self) -> usize {
        self.finished
            .values()
            .filter(|tombstone| tombstone.unnamed.is_some())
            .count()
    }

    /// 진행 중인 모든 전송을 미완료로 꺼낸다 (종료 시).
    /// 보류 중인 파일은 `take_released`로 나온다.
    pub fn drain(&mut self) -> Vec<IncompleteFile> {
        let mut ids: Vec<u8> = self.transfers.keys().copied().collect();
        ids.sort_unstable();
        for file_id in ids {
            self.retire(file_id);
        }

        let mut finished: Vec<(u8, Tombstone)> = self.finished.drain().collect();
        finished.sort_unstable_by_key(|(file_id, _)| *file_id);
        for (file_id, tombstone) in finished {
            self.release(file_id, tombstone);
        }

        std::mem::take(&mut self.retired)
    }

    /// 진행 중인 전송 수
    pub fn active(&self) -> usize {
        self.transfers.len()
    }

    pub fn transfer(&self, file_id: u8) -> Option<&TransferState> {
        self.transfers.get(&file_id)
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ReceiveStats {
        &mut self.stats
    }
}

/// 수신 루프 (단일 태스크에서만 접근)
pub struct Receiver<T> {
    config: Config,
    transport: T,
    buffer: FrameBuffer,
    reassembler: Reassembler,
    bridge: SessionBridge,
    events: mpsc::Sender<FileEvent>,
    stats: Arc<RwLock<ReceiveStats>>,
    running: Arc<AtomicBool>,
}

impl<T> Receiver<T>
where
    T: Transport + Send + 'static,
{
    /// 수신 태스크 시작
    pub fn spawn(
        config: Config,
        transport: T,
        bridge: SessionBridge,
    ) -> Result<(ReceiverHandle, mpsc::Receiver<FileEvent>)> {
        config.validate()?;

        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let stats = Arc::new(RwLock::new(ReceiveStats::new()));
        let running = Arc::new(AtomicBool::new(true));

        let receiver = Self {
            buffer: FrameBuffer::with_limit(config.recv_buffer_size * 4),
            reassembler: Reassembler::new(config.stale_timeout()),
            config,
            transport,
            bridge,
            events,
            stats: stats.clone(),
            running: running.clone(),
        };

        info!("LFP Receiver started");
        let task = tokio::spawn(receiver.run());

        let handle = ReceiverHandle {
            running,
            stats,
            task,
        };
        Ok((handle, event_rx))
    }

    async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let sweep_interval = self.config.sweep_interval();
        let mut last_sweep = Instant::now();
        let mut idle = true;

        while self.running.load(Ordering::SeqCst) {
            match self.transport.read_available(&mut buf).await {
                Ok(0) => {}
                Ok(len) => {
                    self.reassembler.stats_mut().bytes_read += len as u64;
                    self.buffer.push(&buf[..len]);
                    self.process_buffer().await;
                    idle = false;
                }
                Err(Error::ConnectionClosed) => {
                    info!("전송 계층 종료");
                    break;
                }
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    tokio::time::sleep(self.config.read_poll()).await;
                }
            }

            if last_sweep.elapsed() >= sweep_interval {
                // 한 주기 동안 조용했다면 남은 부분 프레임은 더 이어지지 않는다
                if idle {
                    self.flush_partial();
                }
                let now = Instant::now();
                for file in self.reassembler.evict_stale(now) {
                    self.report_incomplete(file).await;
                }
                self.report_released().await;
                last_sweep = now;
                idle = true;
            }

            self.publish_stats();
        }

        self.flush_partial();
        for file in self.reassembler.drain() {
            self.report_incomplete(file).await;
        }
        self.report_released().await;
        self.publish_stats();

        self.running.store(false, Ordering::SeqCst);
        info!("LFP Receiver stopped");
        Ok(())
    }

    async fn process_buffer(&mut self) {
        while let Some(result) = self.buffer.next_frame() {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("프레임 디코딩 실패: {}", e);
                    self.reassembler.stats_mut().record_decode_error(&e);
                    continue;
                }
            };

            let result = self.reassembler.accept(frame, Instant::now());
            self.report_released().await;

            match result {
                Ok(Accepted::Completed(file)) => self.report_completed(file).await,
                Ok(_) => {}
                Err(e) => debug!("프레임 폐기: {}", e),
            }
        }
    }

    async fn report_completed(&mut self, file: CompletedFile) {
        let event = self.bridge.complete(file).await;
        self.emit(event).await;
    }

    async fn report_released(&mut self) {
        for file in self.reassembler.take_released() {
            self.report_completed(file).await;
        }
    }

    fn flush_partial(&mut self) {
        if let Some(e) = self.buffer.flush_partial() {
            debug!("부분 프레임 폐기: {}", e);
            self.reassembler.stats_mut().record_decode_error(&e);
        }
    }

    async fn report_incomplete(&mut self, file: IncompleteFile) {
        let event = self.bridge.incomplete(file);
        self.emit(event).await;
    }

    async fn emit(&mut self, event: FileEvent) {
        self.reassembler.stats_mut().record_file(event.status);
        let _ = self.events.send(event).await;
    }

    fn publish_stats(&self) {
        let mut stats = self.reassembler.stats().clone();
        stats.discarded_bytes = self.buffer.discarded_bytes();
        *self.stats.write() = stats;
    }
}

/// 수신자 핸들 (외부에서 제어용)
#[derive(Debug)]
pub struct ReceiverHandle {
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<ReceiveStats>>,
    task: JoinHandle<Result<()>>,
}

impl ReceiverHandle {
    /// 정지 요청. 진행 중인 전송은 미완료로 보고된다.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 통계 반환
    pub fn stats(&self) -> ReceiveStats {
        self.stats.read().clone()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 수신 태스크 종료 대기
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FramePlanner;
    use crate::DEFAULT_CHUNK_SIZE;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const STALE: Duration = Duration::from_secs(60);

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn frames_for(file_id: u8, name: &str, data: &[u8]) -> (Frame, Vec<Frame>) {
        let file = FramePlanner::new(DEFAULT_CHUNK_SIZE)
            .plan(file_id, name, data)
            .unwrap();
        (file.start, file.chunks)
    }

    fn expect_completed(result: Result<Accepted>) -> CompletedFile {
        match result.unwrap() {
            Accepted::Completed(file) => file,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_in_order() {
        let data = sample(500);
        let (start, chunks) = frames_for(1, "a.bin", &data);
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        assert_eq!(reassembler.accept(start, now).unwrap(), Accepted::Started);
        assert_eq!(
            reassembler.accept(chunks[0].clone(), now).unwrap(),
            Accepted::Stored { received: 1, total: 3 }
        );
        reassembler.accept(chunks[1].clone(), now).unwrap();
        let file = expect_completed(reassembler.accept(chunks[2].clone(), now));

        assert_eq!(file.name, "a.bin");
        assert_eq!(file.declared_size, Some(500));
        assert_eq!(file.total, 3);
        assert_eq!(file.data.as_ref(), data.as_slice());
        assert_eq!(reassembler.active(), 0);
    }

    #[test]
    fn test_any_permutation_reassembles() {
        let data = sample(240 * 7 + 13);
        let (start, chunks) = frames_for(2, "perm.bin", &data);

        for seed in 0..20 {
            let mut frames: Vec<Frame> = std::iter::once(start.clone())
                .chain(chunks.iter().cloned())
                .collect();
            frames.shuffle(&mut StdRng::seed_from_u64(seed));

            let now = Instant::now();
            let mut reassembler = Reassembler::new(STALE);
            let mut completed = None;
            for frame in frames {
                if let Accepted::Completed(file) = reassembler.accept(frame, now).unwrap() {
                    completed = Some(file);
                }
            }

            let file = completed.expect("file should complete");
            assert_eq!(file.data.as_ref(), data.as_slice(), "seed {}", seed);
            assert_eq!(file.name, "perm.bin", "seed {}", seed);
            assert_eq!(file.declared_size, Some(data.len() as u64));

            // 완료된 파일은 나중에 미완료로 다시 보고되지 않는다
            assert!(reassembler.evict_stale(now + STALE * 2).is_empty(), "seed {}", seed);
            assert!(reassembler.take_released().is_empty());
            assert_eq!(reassembler.active(), 0);
        }
    }

    #[test]
    fn test_late_start_names_completed_file() {
        let data = sample(500);
        let (start, chunks) = frames_for(3, "a.bin", &data);
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        reassembler.accept(chunks[2].clone(), now).unwrap();
        reassembler.accept(chunks[0].clone(), now).unwrap();
        assert_eq!(
            reassembler.accept(chunks[1].clone(), now).unwrap(),
            Accepted::AwaitingStart { file_id: 3 }
        );
        assert_eq!(reassembler.awaiting_start(), 1);

        let file = expect_completed(reassembler.accept(start.clone(), now));
        assert_eq!(file.name, "a.bin");
        assert_eq!(file.declared_size, Some(500));
        assert_eq!(file.data.as_ref(), data.as_slice());
        assert_eq!(reassembler.active(), 0);
        assert_eq!(reassembler.awaiting_start(), 0);

        // redundancy 사본
        assert_eq!(reassembler.accept(start, now).unwrap(), Accepted::LateDuplicate);
        assert_eq!(
            reassembler.accept(chunks[1].clone(), now).unwrap(),
            Accepted::LateDuplicate
        );

        assert!(reassembler.evict_stale(now + STALE + Duration::from_secs(1)).is_empty());
        assert!(reassembler.take_released().is_empty());
    }

    #[test]
    fn test_late_start_of_other_file_opens_new_transfer() {
        let data = sample(300);
        let (_, chunks) = frames_for(4, "lost.bin", &data);
        let (other_start, _) = frames_for(4, "other.bin", &sample(400));
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        for frame in &chunks {
            reassembler.accept(frame.clone(), now).unwrap();
        }
        assert_eq!(reassembler.awaiting_start(), 1);

        // 크기가 다른 START는 보류 중인 파일의 것이 아니다
        assert_eq!(reassembler.accept(other_start, now).unwrap(), Accepted::Started);
        let released = reassembler.take_released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].name, "file_004.bin");
        assert_eq!(released[0].data.as_ref(), data.as_slice());
        assert_eq!(reassembler.transfer(4).unwrap().meta.as_ref().unwrap().name, "other.bin");
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let data = sample(700);
        let (start, chunks) = frames_for(3, "dup.bin", &data);
        let now = Instant::now();

        let mut once = Reassembler::new(STALE);
        let mut twice = Reassembler::new(STALE);
        for reassembler in [&mut once, &mut twice] {
            reassembler.accept(start.clone(), now).unwrap();
            reassembler.accept(chunks[1].clone(), now).unwrap();
        }

        assert_eq!(twice.accept(chunks[1].clone(), now).unwrap(), Accepted::Duplicate);
        assert_eq!(once.transfer(3), twice.transfer(3));
        assert_eq!(twice.stats().duplicates, 1);
    }

    #[test]
    fn test_withheld_frame_is_reported_missing() {
        let data = sample(240 * 5);
        let (start, chunks) = frames_for(4, "lossy.bin", &data);
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        reassembler.accept(start, now).unwrap();
        for frame in chunks.iter().filter(|f| f.sequence() != 2) {
            assert!(!matches!(
                reassembler.accept(frame.clone(), now).unwrap(),
                Accepted::Completed(_)
            ));
        }

        assert!(reassembler.evict_stale(now + STALE).is_empty());

        let evicted = reassembler.evict_stale(now + STALE + Duration::from_secs(1));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].missing, vec![2]);
        assert_eq!(evicted[0].received, 4);
        assert_eq!(evicted[0].name.as_deref(), Some("lossy.bin"));
        assert_eq!(reassembler.active(), 0);
    }

    #[test]
    fn test_corrupted_frame_does_not_touch_state() {
        let data = sample(480);
        let (start, chunks) = frames_for(5, "c.bin", &data);

        let mut corrupted = chunks[0].encode();
        corrupted[20] ^= 0x10;
        let datagrams = vec![start.encode(), corrupted, chunks[1].encode()];

        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);
        let mut errors = 0;
        for datagram in &datagrams {
            match Frame::decode(datagram) {
                Ok(frame) => {
                    reassembler.accept(frame, now).unwrap();
                }
                Err(_) => errors += 1,
            }
        }

        assert_eq!(errors, 1);
        let state = reassembler.transfer(5).unwrap();
        assert_eq!(state.received_sequences(), vec![1]);
        assert_eq!(state.missing_sequences(), vec![0]);

        let file = expect_completed(reassembler.accept(chunks[0].clone(), now));
        assert_eq!(file.data.as_ref(), data.as_slice());
    }

    #[test]
    fn test_total_conflict_discarded_while_active() {
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);
        let (start, chunks) = frames_for(6, "x.bin", &sample(600));
        reassembler.accept(start, now).unwrap();
        reassembler.accept(chunks[0].clone(), now).unwrap();

        let stray = Frame::new(FrameKind::Data, 6, 0, 9, Bytes::from_static(b"stray"));
        assert!(matches!(
            reassembler.accept(stray, now),
            Err(Error::TotalConflict { file_id: 6, expected: 3, got: 9 })
        ));
        assert_eq!(reassembler.transfer(6).unwrap().received(), 1);
        assert_eq!(reassembler.stats().total_conflicts, 1);
    }

    #[test]
    fn test_total_conflict_restarts_stale_transfer() {
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);
        let (start, chunks) = frames_for(6, "old.bin", &sample(600));
        reassembler.accept(start, now).unwrap();
        reassembler.accept(chunks[0].clone(), now).unwrap();

        let later = now + STALE + Duration::from_secs(1);
        let data = sample(100);
        let (new_start, new_chunks) = frames_for(6, "new.bin", &data);
        assert_eq!(reassembler.accept(new_start, later).unwrap(), Accepted::Started);
        let file = expect_completed(reassembler.accept(new_chunks[0].clone(), later));
        assert_eq!(file.name, "new.bin");

        let retired = reassembler.evict_stale(later);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].name.as_deref(), Some("old.bin"));
        assert_eq!(retired[0].missing, vec![1, 2]);
    }

    #[test]
    fn test_unexpected_slot_rejected() {
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        let beyond = Frame::new(FrameKind::Data, 1, 3, 3, Bytes::from_static(b"x"));
        assert!(matches!(
            reassembler.accept(beyond, now),
            Err(Error::UnexpectedId { sequence: 3, total: 3, .. })
        ));

        let empty_total = Frame::new(FrameKind::End, 1, 0, 0, Bytes::new());
        assert!(reassembler.accept(empty_total, now).is_err());
        assert_eq!(reassembler.active(), 0);
        assert_eq!(reassembler.stats().unexpected_ids, 2);
    }

    #[test]
    fn test_payload_conflict_keeps_first_copy() {
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);
        let first = Frame::new(FrameKind::Data, 1, 0, 2, Bytes::from_static(b"abcd"));
        let second = Frame::new(FrameKind::Data, 1, 0, 2, Bytes::from_static(b"ab"));

        reassembler.accept(first, now).unwrap();
        assert!(matches!(
            reassembler.accept(second, now),
            Err(Error::PayloadConflict { stored: 4, got: 2, .. })
        ));

        let last = Frame::new(FrameKind::End, 1, 1, 2, Bytes::from_static(b"ef"));
        assert_eq!(
            reassembler.accept(last, now).unwrap(),
            Accepted::AwaitingStart { file_id: 1 }
        );

        assert!(reassembler.drain().is_empty());
        let released = reassembler.take_released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].data.as_ref(), b"abcdef");
    }

    #[test]
    fn test_missing_start_uses_fallback_name() {
        let data = sample(300);
        let (_, chunks) = frames_for(9, "lost-start.bin", &data);
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        reassembler.accept(chunks[1].clone(), now).unwrap();
        assert_eq!(
            reassembler.accept(chunks[0].clone(), now).unwrap(),
            Accepted::AwaitingStart { file_id: 9 }
        );
        assert!(reassembler.take_released().is_empty());

        // START 없이 tombstone이 만료되면 대체 이름으로 나온다
        assert!(reassembler.evict_stale(now + STALE).is_empty());
        assert!(reassembler.take_released().is_empty());
        assert!(reassembler
            .evict_stale(now + STALE + Duration::from_secs(1))
            .is_empty());

        let released = reassembler.take_released();
        assert_eq!(released.len(), 1);
        let file = &released[0];
        assert_eq!(file.name, "file_009.bin");
        assert_eq!(file.declared_size, None);
        assert_eq!(file.data.as_ref(), data.as_slice());
        assert_eq!(reassembler.awaiting_start(), 0);
    }

    #[test]
    fn test_zero_byte_file_completes_immediately() {
        let (start, chunks) = frames_for(0, "empty.bin", &[]);
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        reassembler.accept(start, now).unwrap();
        let file = expect_completed(reassembler.accept(chunks[0].clone(), now));
        assert_eq!(file.name, "empty.bin");
        assert!(file.data.is_empty());
    }

    #[test]
    fn test_reused_id_does_not_cross_contaminate() {
        let first = sample(500);
        let second: Vec<u8> = sample(500).into_iter().map(|b| b ^ 0xFF).collect();
        let (start_a, chunks_a) = frames_for(5, "first.bin", &first);
        let (start_b, chunks_b) = frames_for(5, "second.bin", &second);
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        reassembler.accept(start_a, now).unwrap();
        let mut done = None;
        for frame in &chunks_a {
            if let Accepted::Completed(file) = reassembler.accept(frame.clone(), now).unwrap() {
                done = Some(file);
            }
        }
        assert_eq!(done.unwrap().data.as_ref(), first.as_slice());

        // redundancy 꼬리
        for frame in &chunks_a {
            assert_eq!(
                reassembler.accept(frame.clone(), now).unwrap(),
                Accepted::LateDuplicate
            );
        }
        assert_eq!(reassembler.active(), 0);

        assert_eq!(reassembler.accept(start_b, now).unwrap(), Accepted::Started);
        assert_eq!(reassembler.transfer(5).unwrap().received(), 0);

        let mut done = None;
        for frame in &chunks_b {
            if let Accepted::Completed(file) = reassembler.accept(frame.clone(), now).unwrap() {
                done = Some(file);
            }
        }
        let file = done.unwrap();
        assert_eq!(file.name, "second.bin");
        assert_eq!(file.data.as_ref(), second.as_slice());
        assert_eq!(reassembler.stats().late_duplicates, 3);
    }

    #[test]
    fn test_new_start_with_same_total_supersedes() {
        let (start_a, chunks_a) = frames_for(7, "a.bin", &sample(500));
        let (start_b, _) = frames_for(7, "b.bin", &sample(600));
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);

        reassembler.accept(start_a.clone(), now).unwrap();
        reassembler.accept(chunks_a[0].clone(), now).unwrap();
        assert_eq!(reassembler.accept(start_a, now).unwrap(), Accepted::Announced);

        assert_eq!(reassembler.accept(start_b, now).unwrap(), Accepted::Started);
        let retired = reassembler.evict_stale(now);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].name.as_deref(), Some("a.bin"));
        assert_eq!(reassembler.transfer(7).unwrap().meta.as_ref().unwrap().name, "b.bin");
    }

    #[test]
    fn test_drain_reports_in_flight() {
        let (start, chunks) = frames_for(1, "half.bin", &sample(500));
        let now = Instant::now();
        let mut reassembler = Reassembler::new(STALE);
        reassembler.accept(start, now).unwrap();
        reassembler.accept(chunks[2].clone(), now).unwrap();

        let drained = reassembler.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].missing, vec![0, 1]);
        assert_eq!(drained[0].received_bytes, 20);
        assert_eq!(reassembler.active(), 0);
    }
}
