//! 인증 토큰 제공 포트.
//!
//! 토큰 획득 정책은 이 크레이트의 관심사가 아니다. 연결 생성 시 주입되며
//! 반환된 토큰은 파싱/검증 없이 그대로 전송된다.

use async_trait::async_trait;

use crate::error::CoreError;

/// Bearer 토큰 제공자
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 현재 유효한 액세스 토큰 (`None`이면 인증 없이 연결)
    async fn access_token(&self) -> Result<Option<String>, CoreError>;
}
