//! WebSocket 전송.
//!
//! `tokio-tungstenite` 기반 양방향 프레임 전송.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metricast_core::error::CoreError;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::transport::{
    ConnectRequest, FrameSink, TransportKind, TransportLink, TransportMessage, INBOUND_BUFFER,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 허브 엔드포인트를 WebSocket URL로 변환
///
/// http → ws, https → wss. 연결 ID와 토큰은 쿼리로 전달한다.
pub fn websocket_url(request: &ConnectRequest) -> Result<Url, CoreError> {
    let mut url = Url::parse(&request.endpoint)
        .map_err(|e| CoreError::Config(format!("허브 URL 파싱 실패: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoreError::Config(format!(
                "지원하지 않는 URL 스킴: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| CoreError::Config(format!("URL 스킴 변경 실패: {scheme}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("connectionId", &request.connection_id);
        if let Some(token) = &request.access_token {
            query.append_pair("access_token", token);
        }
    }

    Ok(url)
}

/// WebSocket 링크 수립
pub async fn open(request: &ConnectRequest) -> Result<TransportLink, CoreError> {
    let url = websocket_url(request)?;

    // 토큰이 로그에 남지 않도록 쿼리 제외
    info!("WebSocket 연결: {}{}", url.origin().ascii_serialization(), url.path());

    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| CoreError::Connection(format!("WebSocket 연결 실패: {e}")))?;

    let (write, read) = ws_stream.split();
    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

    tokio::spawn(read_loop(read, tx));

    Ok(TransportLink {
        kind: TransportKind::WebSocket,
        sink: Arc::new(WsSink {
            write: tokio::sync::Mutex::new(write),
        }),
        inbound: rx,
    })
}

/// 수신 루프
async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::Sender<TransportMessage>) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if tx.send(TransportMessage::Frame(text.to_string())).await.is_err() {
                    debug!("수신 채널 닫힘, WebSocket 수신 루프 종료");
                    return;
                }
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => {
                    if tx.send(TransportMessage::Frame(text)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("UTF-8이 아닌 바이너리 프레임 무시: {e}"),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .or_else(|| Some("서버가 WebSocket을 닫음".to_string()));
            }
            Some(Ok(_)) => {} // Ping/Pong은 자동 처리
            Some(Err(e)) => {
                warn!("WebSocket 수신 에러: {e}");
                break Some(format!("WebSocket 수신 에러: {e}"));
            }
            None => break Some("WebSocket 스트림 종료".to_string()),
        }
    };

    let _ = tx.send(TransportMessage::Closed(reason)).await;
    debug!("WebSocket 수신 루프 종료");
}

/// WebSocket 송신 싱크
struct WsSink {
    write: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&self, frame: String) -> Result<(), CoreError> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| CoreError::Network(format!("WebSocket 전송 실패: {e}")))
    }

    async fn close(&self) -> Result<(), CoreError> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Close(None))
            .await
            .map_err(|e| CoreError::Network(format!("WebSocket 종료 실패: {e}")))
    }
}
