//! Metricast 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 자체 에러 타입에서 `#[from] CoreError`로 래핑한다.

use thiserror::Error;

/// 코어 레이어 에러.
/// 연결, 원격 호출, 구독, 설정 등 도메인 공통 에러를 정의한다.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 허브가 `Connected` 상태가 아닐 때 호출 시도
    #[error("허브 미연결 상태")]
    NotConnected,

    /// 연결 수립/재연결 실패
    #[error("연결 에러: {0}")]
    Connection(String),

    /// 원격 프로시저가 에러로 응답
    #[error("원격 호출 실패 — {method}: {message}")]
    Remote {
        /// 호출한 허브 메서드 이름
        method: String,
        /// 서버가 돌려준 에러 메시지
        message: String,
    },

    /// 원격 메트릭 구독 실패 (로컬 등록은 롤백됨)
    #[error("메트릭 구독 실패 — {metric_id}: {message}")]
    RemoteSubscribeFailed {
        /// 대상 메트릭 ID
        metric_id: String,
        /// 실패 사유
        message: String,
    },

    /// 원격 메트릭 구독 해제 실패 (로컬 정리는 계속 진행)
    #[error("메트릭 구독 해제 실패 — {metric_id}: {message}")]
    RemoteUnsubscribeFailed {
        /// 대상 메트릭 ID
        metric_id: String,
        /// 실패 사유
        message: String,
    },

    /// 소비자 콜백이 fan-out 중 패닉
    #[error("콜백 에러 — {metric_id}: {message}")]
    Callback {
        /// 업데이트를 전달하던 메트릭 ID
        metric_id: String,
        /// 패닉 메시지
        message: String,
    },

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패 — {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 인증 실패 (토큰 제공자 에러 등)
    #[error("인증 에러: {0}")]
    Auth(String),

    /// 네트워크 에러 (전송 실패, HTTP 에러)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),
}

impl CoreError {
    /// 호출자의 요청이 거절되었는지 여부 (UI가 반응해야 하는 에러)
    pub fn is_request_rejected(&self) -> bool {
        matches!(
            self,
            CoreError::NotConnected
                | CoreError::RemoteSubscribeFailed { .. }
                | CoreError::Connection(_)
        )
    }
}
