//! # metricast-realtime
//!
//! 허브 연결 위에서 동작하는 메트릭 구독 계층.
//!
//! - [`subscription`]: 참조 카운트 기반 구독 관리자, 팬아웃
//! - [`context`]: 연결 수명주기와 관리자를 묶는 실시간 컨텍스트
//! - [`simulator`]: 결정적 데이터 소스 (`HubClient` 구현)
//! - [`error`]: 구독 계층 에러

pub mod context;
pub mod error;
pub mod simulator;
pub mod subscription;

pub use context::{current, RealtimeContext};
pub use error::RealtimeError;
pub use subscription::{
    MetricCallback, MetricSubscription, MetricSubscriptionManager, MultiMetricCallback,
    MultiSubscription, UnsubscribeReport,
};
