//! 송신자 → 전송 계층 → 수신자 → 매니페스트 종단간 테스트

use std::time::Duration;

use lfp::manifest::content_hash;
use lfp::{
    Config, FileEvent, FileStatus, FramePlanner, Impairment, Manifest, PayloadCipher, Receiver,
    ReceiverHandle, Sender, SessionBridge, SimLink, StreamLink, Transport, UdpLink,
    MANIFEST_FILE_NAME, MAX_PAYLOAD,
};
use tokio::sync::mpsc;

/// 테스트용 데이터 생성
fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 7 + salt as usize * 13) % 251) as u8)
        .collect()
}

fn manifest_of(files: &[(&str, &[u8])]) -> Manifest {
    let mut manifest = Manifest::new();
    for (name, data) in files {
        manifest.insert(name, &content_hash(data));
    }
    manifest
}

/// 채널이 닫힐 때까지 이벤트 수집
async fn collect(mut events: mpsc::Receiver<FileEvent>) -> Vec<FileEvent> {
    let mut collected = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
            Ok(Some(event)) => collected.push(event),
            Ok(None) => break,
            Err(_) => panic!("receiver did not finish in time"),
        }
    }
    collected
}

async fn send_all<T: Transport>(sender: &mut Sender<T>, files: &[(u8, &str, &[u8])]) {
    for (file_id, name, data) in files {
        sender.send_bytes(*file_id, name, data).await.unwrap();
    }
}

fn spawn_receiver<T>(config: Config, link: T, bridge: SessionBridge) -> (ReceiverHandle, mpsc::Receiver<FileEvent>)
where
    T: Transport + Send + 'static,
{
    Receiver::spawn(config, link, bridge).unwrap()
}

#[tokio::test]
async fn test_single_file_verified_and_written() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(500, 1);
    let (tx_link, rx_link) = SimLink::simplex(Impairment::none());

    let bridge = SessionBridge::new(manifest_of(&[("a.bin", &data)])).with_output_dir(dir.path());
    let (handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let mut sender = Sender::new(Config::immediate(), tx_link).unwrap();
    send_all(&mut sender, &[(0, "a.bin", &data)]).await;
    drop(sender);

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].filename, "a.bin");
    assert_eq!(events[0].status, FileStatus::Verified);
    assert_eq!(events[0].size, 500);
    assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), data);

    let stats = handle.stats();
    assert_eq!(stats.files_verified, 1);
    assert_eq!(stats.frames_valid, 8);
    assert_eq!(stats.duplicates, 2);
    assert_eq!(stats.late_duplicates, 1);
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_start_arriving_last_is_still_verified() {
    let data = pattern(500, 8);
    let file = FramePlanner::new(MAX_PAYLOAD).plan(3, "a.bin", &data).unwrap();

    // END, DATA, DATA, START 순서로 도착
    let (mut tx_link, rx_link) = SimLink::simplex(Impairment::none());
    for frame in file.chunks.iter().rev().chain(std::iter::once(&file.start)) {
        tx_link.write_frame(&frame.encode()).await.unwrap();
    }
    drop(tx_link);

    let bridge = SessionBridge::new(manifest_of(&[("a.bin", &data)]));
    let (handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].filename, "a.bin");
    assert_eq!(events[0].status, FileStatus::Verified);

    let stats = handle.stats();
    assert_eq!(stats.files_verified, 1);
    assert_eq!(stats.files_incomplete, 0);
}

#[tokio::test]
async fn test_received_manifest_does_not_change_verdicts() {
    let output = tempfile::tempdir().unwrap();
    let data = pattern(400, 2);
    let listed = manifest_of(&[("late.bin", &data)]);

    let (tx_link, rx_link) = SimLink::simplex(Impairment::none());
    let bridge = SessionBridge::default().with_output_dir(output.path());
    let (_handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let mut sender = Sender::new(Config::immediate(), tx_link).unwrap();
    send_all(
        &mut sender,
        &[(0, MANIFEST_FILE_NAME, listed.to_text().as_bytes()), (1, "late.bin", data.as_slice())],
    )
    .await;
    drop(sender);

    let events = collect(events).await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.status == FileStatus::Unmanifested));

    // 대조는 세션이 끝난 뒤 저장된 매니페스트로 한다
    let stored = Manifest::load(&output.path().join(MANIFEST_FILE_NAME)).unwrap();
    assert!(stored.verify_dir(output.path()).unwrap().is_ok());
}

#[tokio::test]
async fn test_corrupted_copies_are_survived_by_redundancy() {
    let files: Vec<(u8, String, Vec<u8>)> = (0..3u8)
        .map(|i| (i, format!("img{}.png", i), pattern(900 + i as usize * 250, i)))
        .collect();

    // 각 프레임의 두 번째 사본이 손상된다
    let impairment = Impairment {
        corrupt_every: Some(2),
        ..Impairment::none()
    };
    let (tx_link, rx_link) = SimLink::simplex(impairment);
    let rx_link = rx_link.with_max_read(97);

    let mut sender = Sender::new(Config::immediate(), tx_link).unwrap();
    for (file_id, name, data) in &files {
        sender.send_bytes(*file_id, name, data).await.unwrap();
    }
    drop(sender);

    let manifest_entries: Vec<(&str, &[u8])> =
        files.iter().map(|(_, n, d)| (n.as_str(), d.as_slice())).collect();
    let bridge = SessionBridge::new(manifest_of(&manifest_entries));
    let (handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let events = collect(events).await;
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.status == FileStatus::Verified));

    let stats = handle.stats();
    assert!(stats.checksum_failures > 0);
    assert!(stats.discarded_bytes > 0);
}

#[tokio::test]
async fn test_dropped_copies_are_survived_by_redundancy() {
    let data = pattern(2000, 9);
    let impairment = Impairment {
        drop_every: Some(2),
        ..Impairment::none()
    };
    let (tx_link, rx_link) = SimLink::simplex(impairment);

    let bridge = SessionBridge::new(manifest_of(&[("big.bin", &data)]));
    let (handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let mut sender = Sender::new(Config::immediate(), tx_link).unwrap();
    send_all(&mut sender, &[(42, "big.bin", &data)]).await;
    drop(sender);

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, FileStatus::Verified);
    assert_eq!(handle.stats().duplicates, 0);
}

#[tokio::test]
async fn test_lost_frame_reported_incomplete() {
    let config = Config {
        redundancy: 1,
        ..Config::immediate()
    };
    // START, seq0, seq1, seq2(손실), seq3, seq4
    let impairment = Impairment {
        drop_every: Some(4),
        ..Impairment::none()
    };
    let (tx_link, rx_link) = SimLink::simplex(impairment);
    let data = pattern(240 * 5, 3);

    let bridge = SessionBridge::new(manifest_of(&[("holes.bin", &data)]));
    let (handle, events) = spawn_receiver(config.clone(), rx_link, bridge);

    let mut sender = Sender::new(config, tx_link).unwrap();
    send_all(&mut sender, &[(7, "holes.bin", &data)]).await;
    drop(sender);

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, FileStatus::Incomplete);
    assert_eq!(events[0].filename, "holes.bin");
    assert_eq!(events[0].missing, vec![2]);
    assert_eq!(handle.stats().files_incomplete, 1);
}

#[tokio::test]
async fn test_reused_file_id_does_not_cross_contaminate() {
    let first = pattern(700, 1);
    let second = pattern(700, 2);
    let config = Config {
        redundancy: 3,
        ..Config::immediate()
    };
    let (tx_link, rx_link) = SimLink::simplex(Impairment::none());

    let bridge = SessionBridge::new(manifest_of(&[("one.bin", &first), ("two.bin", &second)]));
    let (handle, events) = spawn_receiver(config.clone(), rx_link, bridge);

    let mut sender = Sender::new(config, tx_link).unwrap();
    send_all(&mut sender, &[(5, "one.bin", &first), (5, "two.bin", &second)]).await;
    drop(sender);

    let events = collect(events).await;
    let summary: Vec<(&str, FileStatus)> =
        events.iter().map(|e| (e.filename.as_str(), e.status)).collect();
    assert_eq!(
        summary,
        vec![("one.bin", FileStatus::Verified), ("two.bin", FileStatus::Verified)]
    );
    assert_eq!(handle.stats().late_duplicates, 4);
}

#[tokio::test]
async fn test_batch_with_manifest_then_verify_dir() {
    let source = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for (i, name) in ["b.png", "A.png", "c.png"].iter().enumerate() {
        std::fs::write(source.path().join(name), pattern(300 + i * 111, i as u8)).unwrap();
    }

    let paths = lfp::manifest::list_files(source.path(), Some("png")).unwrap();
    let manifest = Manifest::build(source.path(), Some("png")).unwrap();
    assert_eq!(manifest.len(), 3);

    let (tx_link, rx_link) = SimLink::simplex(Impairment::none());
    let bridge = SessionBridge::default().with_output_dir(output.path());
    let (_handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let mut sender = Sender::new(Config::immediate(), tx_link).unwrap();
    let report = sender.send_batch(&paths).await;
    assert!(report.is_ok());
    sender
        .send_bytes(report.next_file_id, MANIFEST_FILE_NAME, manifest.to_text().as_bytes())
        .await
        .unwrap();
    drop(sender);

    let events = collect(events).await;
    let names: Vec<&str> = events.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, vec!["A.png", "b.png", "c.png", MANIFEST_FILE_NAME]);
    assert!(events.iter().all(|e| e.status == FileStatus::Unmanifested));

    let received = Manifest::load(&output.path().join(MANIFEST_FILE_NAME)).unwrap();
    assert_eq!(received, manifest);
    assert!(received.verify_dir(output.path()).unwrap().is_ok());
}

#[tokio::test]
async fn test_encrypted_transfer() {
    let key = lfp::crypto::generate_key();
    let data = pattern(1000, 4);
    let (tx_link, rx_link) = SimLink::simplex(Impairment::none());

    let bridge = SessionBridge::new(manifest_of(&[("secret.bin", &data)]))
        .with_cipher(PayloadCipher::new(&key));
    let (_handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let mut sender = Sender::new(Config::immediate(), tx_link)
        .unwrap()
        .with_cipher(PayloadCipher::new(&key));
    send_all(&mut sender, &[(1, "secret.bin", &data)]).await;
    drop(sender);

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, FileStatus::Verified);
    assert_eq!(events[0].size, 1000);
}

#[tokio::test]
async fn test_stream_link_transfer() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let data = pattern(1234, 5);

    let bridge = SessionBridge::new(manifest_of(&[("serial.bin", &data)]));
    let rx_link = StreamLink::new(b).with_poll(Duration::from_millis(10));
    let (_handle, events) = spawn_receiver(Config::immediate(), rx_link, bridge);

    let mut sender = Sender::new(Config::immediate(), StreamLink::new(a)).unwrap();
    send_all(&mut sender, &[(2, "serial.bin", &data)]).await;
    drop(sender);

    let events = collect(events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, FileStatus::Verified);
}

#[tokio::test]
async fn test_udp_loopback_transfer() {
    let data = pattern(800, 6);
    let config = Config {
        frame_interval_ms: 1,
        ..Config::immediate()
    };

    let rx_link = UdpLink::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
        .with_poll(Duration::from_millis(10));
    let peer = rx_link.local_addr().unwrap();

    let bridge = SessionBridge::new(manifest_of(&[("udp.bin", &data)]));
    let (handle, mut events) = spawn_receiver(config.clone(), rx_link, bridge);

    let tx_link = UdpLink::connect("127.0.0.1:0".parse().unwrap(), peer)
        .await
        .unwrap();
    let mut sender = Sender::new(config, tx_link).unwrap();
    send_all(&mut sender, &[(3, "udp.bin", &data)]).await;

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.filename, "udp.bin");
    assert_eq!(event.status, FileStatus::Verified);

    handle.stop();
    handle.join().await.unwrap();
}
