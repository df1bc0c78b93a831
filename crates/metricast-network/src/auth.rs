//! 토큰 제공자 구현.
//!
//! 토큰 획득 정책은 외부에 맡긴다. 고정 토큰과 클로저 래퍼만 제공한다.

use async_trait::async_trait;
use metricast_core::error::CoreError;
use metricast_core::ports::auth::TokenProvider;

/// 고정 토큰 제공자
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    /// 새 고정 토큰 제공자 생성
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// 인증 없이 연결
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 토큰 값은 출력하지 않는다
        f.debug_struct("StaticTokenProvider")
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<Option<String>, CoreError> {
        Ok(self.token.clone())
    }
}

/// 동기 클로저 기반 토큰 제공자
pub struct FnTokenProvider<F> {
    accessor: F,
}

impl<F> FnTokenProvider<F>
where
    F: Fn() -> Result<Option<String>, CoreError> + Send + Sync,
{
    /// 클로저를 토큰 제공자로 감싸기
    pub fn new(accessor: F) -> Self {
        Self { accessor }
    }
}

#[async_trait]
impl<F> TokenProvider for FnTokenProvider<F>
where
    F: Fn() -> Result<Option<String>, CoreError> + Send + Sync,
{
    async fn access_token(&self) -> Result<Option<String>, CoreError> {
        (self.accessor)()
    }
}
