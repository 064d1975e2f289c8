//! 전송 계층 어댑터
//!
//! 프로토콜 지식 없이 "최대 N바이트 원자 쓰기"와 "지금 도착한 바이트 읽기"만
//! 제공한다.
//!
//! - `UdpLink`: UDP 소켓 (무선 브리지, 테스트)
//! - `StreamLink`: 바이트 스트림 (시리얼 장치, TCP, in-memory duplex)
//! - `SimLink`: 손실/중복/손상을 흉내내는 프로세스 내 링크

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::{Error, Result, HEADER_SIZE, MAX_FRAME_SIZE};

/// 기본 읽기 폴링 대기
const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// 바이트 채널 추상화
pub trait Transport {
    /// 최대 원자 쓰기 크기
    fn max_write(&self) -> usize {
        MAX_FRAME_SIZE
    }

    /// 프레임 하나를 원자적으로 쓴다. `max_write`를 넘으면 `FrameTooLarge`.
    fn write_frame(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// 현재 도착한 바이트를 읽는다.
    ///
    /// 폴링 구간 안에 아무것도 오지 않으면 `Ok(0)`. 상대가 영구히 사라지면
    /// `ConnectionClosed`.
    fn read_available(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;
}

fn check_size(bytes: &[u8], max: usize) -> Result<()> {
    if bytes.len() > max {
        return Err(Error::FrameTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(())
}

/// UDP 링크
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    poll: Duration,
}

impl UdpLink {
    /// 송신용: 바인드 후 상대 주소로 전송
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            peer: Some(peer),
            poll: DEFAULT_POLL,
        })
    }

    /// 수신 전용: 누구에게서 오든 받는다
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            peer: None,
            poll: DEFAULT_POLL,
        })
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpLink {
    async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        check_size(bytes, self.max_write())?;
        let peer = self.peer.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "수신 전용 링크")
        })?;
        self.socket.send_to(bytes, peer).await?;
        Ok(())
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match tokio::time::timeout(self.poll, self.socket.recv_from(buf)).await {
            Ok(Ok((len, _addr))) => Ok(len),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(0),
        }
    }
}

/// 바이트 스트림 링크
#[derive(Debug)]
pub struct StreamLink<S> {
    stream: S,
    poll: Duration,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl StreamLink<tokio::fs::File> {
    /// 이미 설정된 시리얼 장치 열기 (보드레이트 등은 외부에서 설정)
    pub async fn open_device(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

impl<S> Transport for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        check_size(bytes, self.max_write())?;
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match tokio::time::timeout(self.poll, self.stream.read(buf)).await {
            Ok(Ok(0)) if !buf.is_empty() => Err(Error::ConnectionClosed),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(0),
        }
    }
}

/// 링크 손상 모델 (쓰는 쪽에 적용)
#[derive(Debug, Clone, Default)]
pub struct Impairment {
    /// 무작위 손실 확률
    pub loss_rate: f64,

    /// 무작위 중복 확률
    pub duplicate_rate: f64,

    /// 무작위 단일 비트 손상 확률
    pub corrupt_rate: f64,

    /// n번째 쓰기마다 손실
    pub drop_every: Option<usize>,

    /// n번째 쓰기마다 손상
    pub corrupt_every: Option<usize>,

    /// 난수 시드
    pub seed: u64,
}

impl Impairment {
    /// 손상 없음
    pub fn none() -> Self {
        Self::default()
    }

    /// 무작위 손실만
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }
}

/// 프로세스 내 시뮬레이션 링크
///
/// 쓰기는 패킷 단위로 전달되지만 읽기는 바이트 스트림처럼 임의 경계로
/// 잘려 나온다.
#[derive(Debug)]
pub struct SimLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: BytesMut,
    impairment: Impairment,
    rng: StdRng,
    writes: usize,
    max_read: usize,
    poll: Duration,
}

impl SimLink {
    /// 양방향 링크 쌍 생성. 각 끝의 쓰기에 해당 손상 모델이 적용된다.
    pub fn pair(a_to_b: Impairment, b_to_a: Impairment) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        (Self::new(tx_ab, rx_ba, a_to_b), Self::new(tx_ba, rx_ab, b_to_a))
    }

    /// 단방향 사용을 위한 쌍: (송신 끝, 수신 끝)
    pub fn simplex(impairment: Impairment) -> (Self, Self) {
        Self::pair(impairment, Impairment::none())
    }

    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        impairment: Impairment,
    ) -> Self {
        Self {
            tx,
            rx,
            pending: BytesMut::new(),
            rng: StdRng::seed_from_u64(impairment.seed),
            impairment,
            writes: 0,
            max_read: usize::MAX,
            poll: Duration::from_millis(10),
        }
    }

    /// 읽기 한 번에 돌려줄 최대 바이트 (부분 프레임 재현용)
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// 지금까지의 쓰기 횟수
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p.min(1.0))
    }

    fn every(n: Option<usize>, count: usize) -> bool {
        matches!(n, Some(n) if n > 0 && count % n == 0)
    }

    /// 페이로드 또는 체크섬 영역의 비트 하나 반전
    fn corrupt(&mut self, packet: &mut [u8]) {
        if packet.len() < HEADER_SIZE {
            return;
        }
        let start = if packet.len() > HEADER_SIZE { HEADER_SIZE } else { 8 };
        let idx = self.rng.gen_range(start..packet.len());
        let bit = self.rng.gen_range(0..8);
        packet[idx] ^= 1 << bit;
    }
}

impl Transport for SimLink {
    async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        check_size(bytes, self.max_write())?;
        self.writes += 1;

        if Self::every(self.impairment.drop_every, self.writes) {
            return Ok(());
        }
        let loss_rate = self.impairment.loss_rate;
        if self.chance(loss_rate) {
            return Ok(());
        }

        let mut packet = bytes.to_vec();
        let corrupt_rate = self.impairment.corrupt_rate;
        if Self::every(self.impairment.corrupt_every, self.writes) || self.chance(corrupt_rate) {
            self.corrupt(&mut packet);
        }

        let duplicate_rate = self.impairment.duplicate_rate;
        if self.chance(duplicate_rate) {
            self.tx
                .send(packet.clone())
                .map_err(|_| Error::ConnectionClosed)?;
        }
        self.tx.send(packet).map_err(|_| Error::ConnectionClosed)?;
        Ok(())
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match tokio::time::timeout(self.poll, self.rx.recv()).await {
                Ok(Some(packet)) => self.pending.extend_from_slice(&packet),
                Ok(None) => return Err(Error::ConnectionClosed),
                Err(_) => return Ok(0),
            }
            while let Ok(packet) = self.rx.try_recv() {
                self.pending.extend_from_slice(&packet);
            }
        }

        let n = buf.len().min(self.pending.len()).min(self.max_read);
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}
