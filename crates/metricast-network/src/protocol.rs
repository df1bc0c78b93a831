//! 허브 메시지 프레임.
//!
//! 전송 방식과 무관하게 텍스트 프레임 하나에 JSON 메시지 하나를 싣는다.

use metricast_core::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 허브 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubMessage {
    /// 클라이언트 → 서버 원격 호출
    #[serde(rename_all = "camelCase")]
    Invocation {
        invocation_id: String,
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// 서버 → 클라이언트 호출 결과
    #[serde(rename_all = "camelCase")]
    Completion {
        invocation_id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// 서버 → 클라이언트 이벤트 푸시
    Event {
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// keep-alive
    Ping,
    /// 서버 측 연결 종료 통보
    Close {
        #[serde(default)]
        error: Option<String>,
    },
}

impl HubMessage {
    /// 호출 메시지 생성
    pub fn invocation(invocation_id: impl Into<String>, target: &str, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id: invocation_id.into(),
            target: target.to_string(),
            arguments,
        }
    }

    /// 텍스트 프레임으로 인코딩
    pub fn encode(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 텍스트 프레임 디코딩
    pub fn decode(frame: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(frame)?)
    }
}
