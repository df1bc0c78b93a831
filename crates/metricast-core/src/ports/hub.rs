//! 허브 연결 포트.
//!
//! 구현: `metricast-network::hub_connection::HubConnection` (실제 허브),
//! `metricast-realtime::simulator::SimulatedHub` (결정적 데이터 소스).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::CoreError;
use crate::models::connection::ConnectionState;

/// 원격 메트릭 구독 메서드
pub const SUBSCRIBE_METHOD: &str = "SubscribeToMetric";

/// 원격 메트릭 구독 해제 메서드
pub const UNSUBSCRIBE_METHOD: &str = "UnsubscribeFromMetric";

/// 인바운드 이벤트 핸들러 (이벤트 인자 목록을 받음)
///
/// 동일성은 `Arc` 포인터로 판정한다. `off`로 제거하려면 등록 시 사용한
/// `Arc`를 보관해 두어야 한다.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// 두 핸들러가 같은 등록인지 비교 (vtable 차이 무시)
pub fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// 허브 연결
///
/// 단일 전송 연결 위에서 원격 호출과 이벤트 디스패치를 제공한다.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// 연결 수립. 이미 `Connected`면 no-op.
    ///
    /// 실패는 호출자에게 그대로 전달되며 자동 재시도하지 않는다.
    async fn connect(&self) -> Result<(), CoreError>;

    /// 연결 종료. 이미 끊긴 상태면 no-op.
    async fn disconnect(&self) -> Result<(), CoreError>;

    /// 원격 프로시저 호출
    ///
    /// `Connected`가 아니면 네트워크 왕복 없이 즉시 `CoreError::NotConnected`.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CoreError>;

    /// 이벤트 핸들러 등록
    fn on(&self, event: &str, handler: EventHandler);

    /// 이벤트 핸들러 제거 (`None`이면 해당 이벤트의 모든 핸들러 제거)
    fn off(&self, event: &str, handler: Option<&EventHandler>);

    /// 현재 연결 상태 스냅샷
    fn state(&self) -> ConnectionState;

    /// 연결 여부
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// 현재 연결 ID
    fn connection_id(&self) -> Option<String> {
        self.state().connection_id
    }
}
