//! LFP 송신기 - LoRa File Protocol
//!
//! 디렉토리(또는 지정한 파일들)를 단방향 무선 링크로 송신한다.
//! - 파일마다 START + DATA... + END, 모든 프레임을 R회 반복
//! - 선택: 매니페스트(manifest.md5)를 마지막 파일로 함께 송신
//! - 선택: 사전 공유 키로 ChaCha20-Poly1305 암호화
//!
//! 예시:
//!   # 시리얼 장치로 디렉토리의 png 송신
//!   cargo run --release --bin lfp-send -- ./images --device /dev/ttyUSB0 --ext png --with-manifest
//!
//!   # UDP 브리지로 송신
//!   cargo run --release --bin lfp-send -- --file a.bin --udp 192.168.0.10:9000

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lfp::crypto::{generate_key, save_key};
use lfp::manifest::list_files;
use lfp::{
    Config, Manifest, PayloadCipher, Sender, StreamLink, Transport, UdpLink, MANIFEST_FILE_NAME,
};

/// 송신기 설정
struct SendOptions {
    source_dir: Option<PathBuf>,
    files: Vec<PathBuf>,
    udp_peer: Option<SocketAddr>,
    bind_addr: SocketAddr,
    device: Option<PathBuf>,
    extension: Option<String>,
    with_manifest: bool,
    key_path: Option<PathBuf>,
    gen_key: Option<PathBuf>,
    config: Config,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            source_dir: None,
            files: Vec::new(),
            udp_peer: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            device: None,
            extension: None,
            with_manifest: false,
            key_path: None,
            gen_key: None,
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

fn parse_number<N: std::str::FromStr>(value: &str, flag: &str) -> Result<N, String> {
    value
        .parse()
        .map_err(|_| format!("{}: 유효한 숫자 필요 ({})", flag, value))
}

fn parse_args() -> Result<SendOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

fn parse_args_from(args: &[String]) -> Result<SendOptions, String> {
    let mut opts = SendOptions::default();

    // preset은 기반 설정, 개별 옵션은 순서와 관계없이 그 위에 덮어쓴다
    let mut redundancy: Option<u8> = None;
    let mut interval_ms: Option<u64> = None;
    let mut chunk_size: Option<usize> = None;
    let mut first_id: Option<u8> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--file" | "-f" => {
                opts.files.push(PathBuf::from(next_value(args, &mut i, flag)?));
            }
            "--udp" | "-u" => {
                let value = next_value(args, &mut i, flag)?;
                opts.udp_peer = Some(value.parse().map_err(|_| format!("유효한 주소 필요: {}", value))?);
            }
            "--bind" | "-b" => {
                let value = next_value(args, &mut i, flag)?;
                opts.bind_addr = value.parse().map_err(|_| format!("유효한 주소 필요: {}", value))?;
            }
            "--device" | "-d" => {
                opts.device = Some(PathBuf::from(next_value(args, &mut i, flag)?));
            }
            "--preset" => {
                opts.config = match next_value(args, &mut i, flag)? {
                    "fast" => Config::fast_link(),
                    "lossy" => Config::lossy_link(),
                    other => return Err(format!("알 수 없는 preset: {}", other)),
                };
            }
            "--redundancy" | "-r" => {
                redundancy = Some(parse_number(next_value(args, &mut i, flag)?, flag)?);
            }
            "--interval" => {
                interval_ms = Some(parse_number(next_value(args, &mut i, flag)?, flag)?);
            }
            "--chunk-size" => {
                chunk_size = Some(parse_number(next_value(args, &mut i, flag)?, flag)?);
            }
            "--first-id" => {
                first_id = Some(parse_number(next_value(args, &mut i, flag)?, flag)?);
            }
            "--ext" => {
                opts.extension = Some(next_value(args, &mut i, flag)?.to_string());
            }
            "--with-manifest" | "-m" => {
                opts.with_manifest = true;
            }
            "--key" | "-k" => {
                opts.key_path = Some(PathBuf::from(next_value(args, &mut i, flag)?));
            }
            "--gen-key" => {
                opts.gen_key = Some(PathBuf::from(next_value(args, &mut i, flag)?));
            }
            "--help" | "-h" => {
                println!(
                    r#"LFP Sender - LoRa File Protocol 송신기

역방향 채널 없는 단방향 무선 링크용 파일 송신
- 프레임: 10바이트 헤더 + 최대 240바이트 페이로드
- 모든 프레임을 R회 반복 송신 (수신 확인 없음)

사용법:
  lfp-send <DIR> [OPTIONS]
  lfp-send --file <PATH> [--file <PATH>...] [OPTIONS]

링크 (하나 선택):
  -u, --udp <ADDR>        UDP 브리지 주소
  -b, --bind <ADDR>       UDP 로컬 바인드 주소 (기본: 0.0.0.0:0)
  -d, --device <PATH>     시리얼 장치 (미리 설정된 tty)

옵션:
  -f, --file <PATH>       송신할 파일 (여러 번 가능)
      --ext <EXT>         디렉토리에서 이 확장자만 송신
  -m, --with-manifest     manifest.md5를 마지막에 함께 송신
  -r, --redundancy <N>    프레임당 송신 횟수 (기본: 2)
      --interval <MS>     프레임 간격 밀리초 (기본: 200)
      --chunk-size <N>    청크 크기 1..=240 (기본: 240)
      --first-id <N>      첫 file_id (기본: 0)
      --preset <NAME>     fast | lossy
  -k, --key <PATH>        사전 공유 키 파일로 암호화
      --gen-key <PATH>    새 키 파일 생성 후 종료
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(format!("알 수 없는 옵션: {}", other));
            }
            dir => {
                opts.source_dir = Some(PathBuf::from(dir));
            }
        }
        i += 1;
    }

    if let Some(redundancy) = redundancy {
        opts.config.redundancy = redundancy;
    }
    if let Some(interval_ms) = interval_ms {
        opts.config.frame_interval_ms = interval_ms;
    }
    if let Some(chunk_size) = chunk_size {
        opts.config.chunk_size = chunk_size;
    }
    if let Some(first_id) = first_id {
        opts.config.first_file_id = first_id;
    }
    Ok(opts)
}

async fn run<T: Transport>(
    opts: &SendOptions,
    link: T,
    paths: &[PathBuf],
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut sender = Sender::new(opts.config.clone(), link)?;
    if let Some(key_path) = &opts.key_path {
        sender = sender.with_cipher(PayloadCipher::from_key_file(key_path)?);
    }

    let report = sender.send_batch(paths).await;
    for failed in &report.failed {
        warn!(
            "실패: {} (id={}): {}",
            failed.path.display(),
            failed.file_id,
            failed.error
        );
    }

    let mut ok = report.is_ok();
    if opts.with_manifest {
        let manifest = Manifest::from_files(paths)?;
        tokio::time::sleep(opts.config.file_gap()).await;
        if let Err(e) = sender
            .send_bytes(report.next_file_id, MANIFEST_FILE_NAME, manifest.to_text().as_bytes())
            .await
        {
            warn!("매니페스트 송신 실패: {}", e);
            ok = false;
        }
    }

    info!("{}", sender.stats().summary());
    Ok(ok)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let opts = parse_args()?;

    if let Some(path) = &opts.gen_key {
        save_key(path, &generate_key())?;
        info!("키 파일 생성: {}", path.display());
        return Ok(());
    }

    opts.config.validate()?;

    let mut paths = Vec::new();
    if let Some(dir) = &opts.source_dir {
        paths.extend(list_files(dir, opts.extension.as_deref())?);
    }
    paths.extend(opts.files.iter().cloned());
    if paths.is_empty() {
        return Err("송신할 파일이 없습니다 (--help 참고)".into());
    }

    let total_bytes: u64 = paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
    let airtime: std::time::Duration = paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| opts.config.estimated_airtime(m.len() as usize))
        .sum();

    info!("═══════════════════════════════════════");
    info!("  LFP Sender");
    info!("  파일: {} 개, {} bytes", paths.len(), total_bytes);
    info!(
        "  redundancy: {}, 간격: {}ms, 청크: {} bytes",
        opts.config.redundancy, opts.config.frame_interval_ms, opts.config.chunk_size
    );
    info!("  예상 송신 시간: {:.1}s", airtime.as_secs_f64());
    info!("  암호화: {}", if opts.key_path.is_some() { "ON" } else { "OFF" });
    info!("═══════════════════════════════════════");

    let ok = match (&opts.udp_peer, &opts.device) {
        (Some(peer), None) => {
            let link = UdpLink::connect(opts.bind_addr, *peer).await?;
            run(&opts, link, &paths).await?
        }
        (None, Some(device)) => {
            let link = StreamLink::open_device(device).await?;
            run(&opts, link, &paths).await?
        }
        _ => return Err("--udp 또는 --device 중 하나를 지정하세요".into()),
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
