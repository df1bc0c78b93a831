//! 허브 연결 상태 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 연결 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// 연결 끊김 (초기 상태)
    #[default]
    Disconnected,
    /// 연결 수립 중
    Connecting,
    /// 연결됨
    Connected,
    /// 재연결 시도 중
    Reconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// 허브 연결의 특정 시점 스냅샷
///
/// 연결 객체만 변경하며, 다른 컴포넌트에게는 읽기 전용이다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// 현재 상태
    pub status: ConnectionStatus,
    /// 연결 ID (`Connected`일 때만 존재)
    pub connection_id: Option<String>,
    /// 마지막 전이가 실패였을 때의 에러
    pub error: Option<String>,
    /// 가장 최근 연결 성공 시각
    pub last_connected: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// 연결 수립 중 상태로 전이
    pub fn connecting(&self) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            connection_id: None,
            error: None,
            last_connected: self.last_connected,
        }
    }

    /// 연결 성공 상태로 전이
    pub fn connected(&self, connection_id: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            connection_id: Some(connection_id.into()),
            error: None,
            last_connected: Some(Utc::now()),
        }
    }

    /// 재연결 상태로 전이 (끊김 사유 기록)
    pub fn reconnecting(&self, reason: Option<String>) -> Self {
        Self {
            status: ConnectionStatus::Reconnecting,
            connection_id: None,
            error: reason,
            last_connected: self.last_connected,
        }
    }

    /// 연결 끊김 상태로 전이 (`error`가 있으면 실패 전이)
    pub fn disconnected(&self, error: Option<String>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            connection_id: None,
            error,
            last_connected: self.last_connected,
        }
    }

    /// 연결 여부
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
