//! 암호화 모듈 - 사전 공유 키 + ChaCha20-Poly1305
//!
//! 역방향 채널이 없어 키 교환이 불가능하므로 양측이 같은 키 파일을 가진다.
//!
//! 흐름:
//! 1. `generate_key`로 32바이트 키 생성 후 키 파일로 배포
//! 2. 송신측: 파일 전체를 암호화한 뒤 프레임으로 분할
//! 3. 수신측: 조립 완료 후 복호화, 그 다음 매니페스트 해시 비교

use std::path::Path;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand_core::{OsRng, RngCore};

/// 키 크기 (32 bytes)
pub const KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce 크기 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 태그 크기 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// 암호화로 늘어나는 바이트 수
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("암호화 실패: {0}")]
    EncryptionFailed(String),
    #[error("복호화 실패: {0}")]
    DecryptionFailed(String),
    #[error("잘못된 키 크기: {0} bytes")]
    InvalidKeySize(usize),
    #[error("키 파일 에러: {0}")]
    KeyFile(#[from] std::io::Error),
}

/// 새 무작위 키 생성
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// 키 파일 저장 (원시 32바이트)
pub fn save_key(path: &Path, key: &[u8; KEY_SIZE]) -> Result<(), CryptoError> {
    std::fs::write(path, key)?;
    Ok(())
}

/// 키 파일 로드
pub fn load_key(path: &Path) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = std::fs::read(path)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeySize(bytes.len()))
}

/// 파일 페이로드 암호화기
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: ChaCha20Poly1305,
}

impl PayloadCipher {
    /// 키로 암호화기 생성
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// 키 파일에서 생성
    pub fn from_key_file(path: &Path) -> Result<Self, CryptoError> {
        Ok(Self::new(&load_key(path)?))
    }

    /// 암호화
    /// 반환: nonce(12) + ciphertext(원본 + 16바이트 태그)
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// 복호화
    /// 입력: nonce(12) + ciphertext
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if encrypted.len() < ENCRYPTION_OVERHEAD {
            return Err(CryptoError::DecryptionFailed("데이터가 너무 짧음".into()));
        }

        let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
        let ciphertext = &encrypted[NONCE_SIZE..];

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadCipher(..)")
    }
}
