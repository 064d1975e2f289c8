//! 매니페스트 (파일명 → 내용 해시)
//!
//! 형식은 `md5sum` 텍스트 출력과 같다: 한 줄에 `"<32자리 hex>  <파일명>"`.
//! 전송 전에 만들어지고 수신 후 종단간 비교에만 쓰인다. 프로토콜 동작에는
//! 관여하지 않는다.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use rayon::prelude::*;
use tracing::debug;

use crate::{Result, MANIFEST_FILE_NAME};

/// MD5 hex 길이
pub const HASH_HEX_LEN: usize = 32;

/// 해시 계산 시 읽기 단위 (1MB)
const READ_BLOCK: usize = 1024 * 1024;

/// 바이트 내용의 해시 (소문자 hex)
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// 파일 내용의 해시 (스트리밍)
pub fn file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut block = vec![0u8; READ_BLOCK];

    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// 디렉토리의 일반 파일 목록 (소문자 이름순)
///
/// `extension`이 주어지면 대소문자 구분 없이 확장자로 거른다.
/// 매니페스트 파일 자체는 제외한다.
pub fn list_files(dir: &Path, extension: Option<&str>) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE_NAME) {
            continue;
        }

        if let Some(ext) = extension {
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        files.push(path);
    }

    files.sort_by_key(|path| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    Ok(files)
}

/// 매니페스트 테이블
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 텍스트 파싱. 빈 줄과 형식이 틀린 줄은 건너뛴다.
    pub fn parse(text: &str) -> Self {
        let mut manifest = Self::new();

        for line in text.lines() {
            let line = line.trim();
            let Some((hash, name)) = line.split_once("  ") else {
                continue;
            };

            let hash = hash.trim();
            let name = name.trim();
            if hash.len() != HASH_HEX_LEN
                || !hash.chars().all(|c| c.is_ascii_hexdigit())
                || name.is_empty()
            {
                continue;
            }

            manifest.insert(name, &hash.to_ascii_lowercase());
        }

        manifest
    }

    /// 파일에서 로드
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// 텍스트로 직렬화 (소문자 이름순)
    pub fn to_text(&self) -> String {
        let mut entries: Vec<(&String, &String)> = self.entries.iter().collect();
        entries.sort_by_key(|(name, _)| name.to_lowercase());

        entries
            .into_iter()
            .map(|(name, hash)| format!("{}  {}\n", hash, name))
            .collect()
    }

    /// 파일로 저장
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    /// 디렉토리의 파일들로 매니페스트 생성 (병렬 해시)
    pub fn build(dir: &Path, extension: Option<&str>) -> Result<Self> {
        let files = list_files(dir, extension)?;
        Self::from_files(&files)
    }

    /// 주어진 파일들로 매니페스트 생성 (병렬 해시)
    pub fn from_files(files: &[PathBuf]) -> Result<Self> {
        let hashed: Vec<(String, String)> = files
            .par_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(file_hash(path).map(|hash| (name, hash)))
            })
            .collect::<std::io::Result<_>>()?;

        debug!("매니페스트 생성: {} 파일", hashed.len());

        let mut manifest = Self::new();
        for (name, hash) in hashed {
            manifest.insert(&name, &hash);
        }
        Ok(manifest)
    }

    pub fn insert(&mut self, name: &str, hash: &str) {
        self.entries.insert(name.to_string(), hash.to_string());
    }

    /// 파일명에 대한 기대 해시
    pub fn expected(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, h)| (n.as_str(), h.as_str()))
    }

    /// 디렉토리 내용을 매니페스트와 대조
    pub fn verify_dir(&self, dir: &Path) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        for (name, expected) in self.iter() {
            report.checked += 1;
            let path = dir.join(name);

            if !path.is_file() {
                report.missing.push(name.to_string());
                continue;
            }

            let actual = file_hash(&path)?;
            if actual != expected {
                report.changed.push(ChangedFile {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(report)
    }
}

/// 내용이 달라진 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

/// 디렉토리 대조 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub missing: Vec<String>,
    pub changed: Vec<ChangedFile>,
}

impl VerifyReport {
    pub fn failures(&self) -> usize {
        self.missing.len() + self.changed.len()
    }

    pub fn is_ok(&self) -> bool {
        self.failures() == 0
    }
}
