//! 전송 계층 추상화.
//!
//! 허브 연결은 전송 방식을 모른다. 커넥터가 링크(송신 싱크 + 수신 채널)를
//! 열어 주고, 연결은 그 위에서 프레임만 주고받는다.

use async_trait::async_trait;
use metricast_core::config::TransportPreference;
use metricast_core::error::CoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{sse_transport, ws_transport};

/// 수신 채널 버퍼 크기
pub(crate) const INBOUND_BUFFER: usize = 256;

/// 전송 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// 양방향 WebSocket
    WebSocket,
    /// 서버 푸시 전용 SSE (+ HTTP POST 송신)
    ServerSentEvents,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "WebSocket"),
            TransportKind::ServerSentEvents => write!(f, "SSE"),
        }
    }
}

/// 선호도에 따른 협상 순서
pub fn negotiation_order(preference: TransportPreference) -> &'static [TransportKind] {
    match preference {
        TransportPreference::Auto => &[TransportKind::WebSocket, TransportKind::ServerSentEvents],
        TransportPreference::WebSocket => &[TransportKind::WebSocket],
        TransportPreference::ServerSentEvents => &[TransportKind::ServerSentEvents],
    }
}

/// 전송에서 올라오는 메시지
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// 텍스트 프레임 (허브 메시지 JSON)
    Frame(String),
    /// 전송 종료 (사유)
    Closed(Option<String>),
}

/// 송신 싱크
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// 텍스트 프레임 전송
    async fn send(&self, frame: String) -> Result<(), CoreError>;

    /// 전송 종료
    async fn close(&self) -> Result<(), CoreError>;
}

/// 연결 요청 파라미터
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// 허브 엔드포인트 (http/https)
    pub endpoint: String,
    /// 클라이언트가 발급한 연결 ID
    pub connection_id: String,
    /// Bearer 토큰
    pub access_token: Option<String>,
}

/// 수립된 전송 링크
pub struct TransportLink {
    /// 전송 방식
    pub kind: TransportKind,
    /// 송신 싱크
    pub sink: Arc<dyn FrameSink>,
    /// 수신 채널
    pub inbound: mpsc::Receiver<TransportMessage>,
}

/// 전송 링크 생성기
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// 지정한 방식으로 링크 수립
    async fn open(
        &self,
        kind: TransportKind,
        request: &ConnectRequest,
    ) -> Result<TransportLink, CoreError>;
}

/// 실제 네트워크 커넥터 (tokio-tungstenite / reqwest + eventsource-stream)
pub struct NetworkConnector {
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl NetworkConnector {
    /// 새 커넥터 생성
    ///
    /// `request_timeout`은 SSE 폴백의 송신 POST에만 적용된다.
    /// 스트림 GET은 장기 연결이라 타임아웃을 걸지 않는다.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            request_timeout,
        }
    }
}

#[async_trait]
impl TransportConnector for NetworkConnector {
    async fn open(
        &self,
        kind: TransportKind,
        request: &ConnectRequest,
    ) -> Result<TransportLink, CoreError> {
        match kind {
            TransportKind::WebSocket => ws_transport::open(request).await,
            TransportKind::ServerSentEvents => {
                sse_transport::open(&self.http_client, request, self.request_timeout).await
            }
        }
    }
}
