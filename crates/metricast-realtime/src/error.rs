//! 구독 계층 에러.

use metricast_core::error::CoreError;
use thiserror::Error;

use crate::subscription::MultiSubscription;

/// 구독 계층 에러
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// 코어 에러
    #[error(transparent)]
    Core(#[from] CoreError),

    /// 다중 구독 중 일부 실패
    ///
    /// 성공한 구독은 해제되지 않은 채 `subscribed`로 돌려준다.
    /// 전부 아니면 전무가 필요하면 호출자가 `subscribed.unsubscribe()`를 호출한다.
    #[error("다중 구독 {failed}/{total}건 실패: {first_error}")]
    PartialSubscribe {
        /// 실패 건수
        failed: usize,
        /// 요청 건수
        total: usize,
        /// 첫 번째 실패
        first_error: CoreError,
        /// 성공한 구독
        subscribed: MultiSubscription,
    },
}

impl RealtimeError {
    /// 코어 에러 참조 (다중 구독 실패면 첫 번째 실패)
    pub fn core(&self) -> &CoreError {
        match self {
            RealtimeError::Core(e) => e,
            RealtimeError::PartialSubscribe { first_error, .. } => first_error,
        }
    }
}
