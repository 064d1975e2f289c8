//! START 프레임 메타데이터
//!
//! 역방향 채널이 없으므로 송신측이 수신측에 알리는 유일한 제어 정보.
//! bincode로 직렬화되어 START 프레임 페이로드에 실린다.

use serde::{Deserialize, Serialize};

use crate::{Result, MAX_PAYLOAD};

/// 직렬화 오버헤드: 이름 길이(u64) + 크기(u64)
const META_OVERHEAD: usize = 16;

/// 메타데이터에 실을 수 있는 최대 파일 이름 길이 (바이트)
pub const MAX_NAME_LEN: usize = MAX_PAYLOAD - META_OVERHEAD;

/// 파일 메타데이터 (START 페이로드)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// 파일 이름 (경로 제외)
    pub name: String,

    /// 패킷화된 바이트 수 (암호화 시 암호문 크기)
    pub size: u64,
}

impl FileMeta {
    /// 새 메타데이터 생성. 이름은 UTF-8 경계에서 잘린다.
    pub fn new(name: &str, size: u64) -> Self {
        Self {
            name: truncate_name(name, MAX_NAME_LEN).to_string(),
            size,
        }
    }

    /// START 없이 완성된 파일에 붙이는 이름
    pub fn fallback_name(file_id: u8) -> String {
        format!("file_{:03}.bin", file_id)
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn truncate_name(name: &str, max_len: usize) -> &str {
    if name.len() <= max_len {
        return name;
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
