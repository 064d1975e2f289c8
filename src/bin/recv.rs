//! LFP 수신기 - LoRa File Protocol
//!
//! 단방향 무선 링크에서 프레임을 받아 파일을 복원하고 매니페스트와 대조한다.
//! 재전송 요청은 하지 않는다. 미완료 파일은 누락 sequence와 함께 보고된다.
//!
//! 예시:
//!   cargo run --release --bin lfp-recv -- --device /dev/ttyUSB0 --output ./received --verify
//!   cargo run --release --bin lfp-recv -- --udp 0.0.0.0:9000 --manifest manifest.md5

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lfp::{
    Config, FileEvent, FileStatus, Manifest, PayloadCipher, Receiver, ReceiverHandle,
    SessionBridge, StreamLink, Transport, UdpLink, MANIFEST_FILE_NAME,
};

/// 수신기 설정
struct RecvOptions {
    udp_bind: Option<SocketAddr>,
    device: Option<PathBuf>,
    output_dir: PathBuf,
    manifest_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    idle_timeout: Option<Duration>,
    verify: bool,
    config: Config,
}

impl Default for RecvOptions {
    fn default() -> Self {
        Self {
            udp_bind: None,
            device: None,
            output_dir: PathBuf::from("received"),
            manifest_path: None,
            key_path: None,
            idle_timeout: None,
            verify: false,
            config: Config::default(),
        }
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 뒤에 값이 필요합니다", flag))
}

fn parse_secs(value: &str, flag: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("{}: 유효한 초 단위 숫자 필요 ({})", flag, value))
}

fn parse_args() -> Result<RecvOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = RecvOptions::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--udp" | "-u" => {
                let value = next_value(&args, &mut i, flag)?;
                opts.udp_bind = Some(value.parse().map_err(|_| format!("유효한 주소 필요: {}", value))?);
            }
            "--device" | "-d" => {
                opts.device = Some(PathBuf::from(next_value(&args, &mut i, flag)?));
            }
            "--output" | "-o" => {
                opts.output_dir = PathBuf::from(next_value(&args, &mut i, flag)?);
            }
            "--manifest" | "-m" => {
                opts.manifest_path = Some(PathBuf::from(next_value(&args, &mut i, flag)?));
            }
            "--key" | "-k" => {
                opts.key_path = Some(PathBuf::from(next_value(&args, &mut i, flag)?));
            }
            "--timeout" | "-t" => {
                let secs = parse_secs(next_value(&args, &mut i, flag)?, flag)?;
                opts.idle_timeout = Some(Duration::from_secs(secs));
            }
            "--stale" => {
                let secs = parse_secs(next_value(&args, &mut i, flag)?, flag)?;
                opts.config.stale_timeout_ms = secs * 1000;
            }
            "--verify" | "-v" => {
                opts.verify = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"LFP Receiver - LoRa File Protocol 수신기

단방향 무선 링크에서 파일을 복원하고 매니페스트와 대조
- 순서 뒤바뀜/중복/손실/손상 프레임 허용
- 미완료 파일은 누락 sequence 목록과 함께 보고

사용법:
  lfp-recv (--udp <BIND> | --device <PATH>) [OPTIONS]

옵션:
  -u, --udp <BIND>        UDP 수신 주소
  -d, --device <PATH>     시리얼 장치 (미리 설정된 tty)
  -o, --output <DIR>      복원 파일 저장 위치 (기본: ./received)
  -m, --manifest <PATH>   대조할 매니페스트 (없으면 수신된 manifest.md5 사용)
  -k, --key <PATH>        사전 공유 키 파일로 복호화
  -t, --timeout <SECS>    이 시간 동안 수신이 없으면 종료
      --stale <SECS>      미완료 전송 만료 시간 (기본: 60)
  -v, --verify            종료 시 출력 디렉토리를 매니페스트와 재대조
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    Ok(opts)
}

fn report_event(event: &FileEvent) {
    match event.status {
        FileStatus::Verified => info!("✓ [{}] {} ({} bytes)", event.file_id, event.filename, event.size),
        FileStatus::Unmanifested => info!(
            "? [{}] {} ({} bytes, 매니페스트에 없음)",
            event.file_id, event.filename, event.size
        ),
        FileStatus::Mismatch => error!(
            "✗ [{}] {} 해시 불일치 ({} bytes)",
            event.file_id, event.filename, event.size
        ),
        FileStatus::Incomplete => warn!(
            "… [{}] {} 미완료, 누락 {} frames: {:?}",
            event.file_id,
            event.filename,
            event.missing.len(),
            event.missing
        ),
    }
}

/// 이벤트 채널이 닫힐 때까지 처리. Ctrl-C 또는 유휴 시간 초과 시 정지 요청.
async fn pump_events(
    handle: &ReceiverHandle,
    mut events: mpsc::Receiver<FileEvent>,
    idle_timeout: Option<Duration>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_bytes = 0;
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => report_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("종료 요청");
                handle.stop();
            }
            _ = ticker.tick() => {
                let bytes = handle.stats().bytes_read;
                if bytes != last_bytes {
                    last_bytes = bytes;
                    last_activity = Instant::now();
                } else if let Some(timeout) = idle_timeout {
                    if handle.is_running() && last_activity.elapsed() >= timeout {
                        info!("{}초 동안 수신 없음, 종료", timeout.as_secs());
                        handle.stop();
                    }
                }
            }
        }
    }
}

async fn run<T>(opts: &RecvOptions, link: T) -> Result<(), Box<dyn std::error::Error>>
where
    T: Transport + Send + 'static,
{
    let manifest = match &opts.manifest_path {
        Some(path) => Manifest::load(path)?,
        None => Manifest::new(),
    };
    info!("매니페스트: {} 항목", manifest.len());

    let mut bridge = SessionBridge::new(manifest).with_output_dir(&opts.output_dir);
    if let Some(key_path) = &opts.key_path {
        bridge = bridge.with_cipher(PayloadCipher::from_key_file(key_path)?);
    }

    let (handle, events) = Receiver::spawn(opts.config.clone(), link, bridge)?;
    pump_events(&handle, events, opts.idle_timeout).await;

    let stats = handle.stats();
    handle.join().await?;

    info!("═══════════════════════════════════════");
    info!("  수신 통계");
    info!("  {}", stats.summary());
    info!(
        "  디코딩 실패: truncated={}, crc={}, length={}, kind={}, 버린 바이트={}",
        stats.truncated,
        stats.checksum_failures,
        stats.malformed_lengths,
        stats.unknown_kinds,
        stats.discarded_bytes
    );
    info!(
        "  충돌: total={}, slot={}, payload={}",
        stats.total_conflicts, stats.unexpected_ids, stats.payload_conflicts
    );
    info!("═══════════════════════════════════════");

    if opts.verify {
        let path = opts
            .manifest_path
            .clone()
            .unwrap_or_else(|| opts.output_dir.join(MANIFEST_FILE_NAME));
        if path.is_file() {
            let report = Manifest::load(&path)?.verify_dir(&opts.output_dir)?;
            info!(
                "디렉토리 검증: {} 항목, 누락 {}, 불일치 {}",
                report.checked,
                report.missing.len(),
                report.changed.len()
            );
            for name in &report.missing {
                warn!("  누락: {}", name);
            }
            for changed in &report.changed {
                error!(
                    "  불일치: {} (expected {}, actual {})",
                    changed.name, changed.expected, changed.actual
                );
            }
        } else {
            warn!("검증할 매니페스트 없음: {}", path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let opts = parse_args()?;
    opts.config.validate()?;

    info!("═══════════════════════════════════════");
    info!("  LFP Receiver");
    info!("  출력: {}", opts.output_dir.display());
    info!("  만료: {}s", opts.config.stale_timeout().as_secs());
    info!("  암호화: {}", if opts.key_path.is_some() { "ON" } else { "OFF" });
    info!("═══════════════════════════════════════");

    match (&opts.udp_bind, &opts.device) {
        (Some(bind), None) => {
            let link = UdpLink::bind(*bind)
                .await?
                .with_poll(opts.config.read_poll());
            run(&opts, link).await
        }
        (None, Some(device)) => {
            let link = StreamLink::open_device(device)
                .await?
                .with_poll(opts.config.read_poll());
            run(&opts, link).await
        }
        _ => Err("--udp 또는 --device 중 하나를 지정하세요".into()),
    }
}
