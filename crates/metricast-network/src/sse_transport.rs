//! SSE(Server-Sent Events) 폴백 전송.
//!
//! WebSocket을 쓸 수 없을 때 사용한다. 수신은 SSE 스트림
//! (`GET {endpoint}/stream`), 송신은 프레임 단위 HTTP POST
//! (`POST {endpoint}/send`)로 처리한다.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use metricast_core::error::CoreError;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::transport::{
    ConnectRequest, FrameSink, TransportKind, TransportLink, TransportMessage, INBOUND_BUFFER,
};

/// `{endpoint}/{suffix}?connectionId=...` URL 생성
fn endpoint_url(request: &ConnectRequest, suffix: &str) -> Result<Url, CoreError> {
    let raw = format!("{}/{suffix}", request.endpoint.trim_end_matches('/'));
    let mut url =
        Url::parse(&raw).map_err(|e| CoreError::Config(format!("허브 URL 파싱 실패: {e}")))?;
    url.query_pairs_mut()
        .append_pair("connectionId", &request.connection_id);
    Ok(url)
}

/// SSE 링크 수립
pub async fn open(
    http_client: &reqwest::Client,
    request: &ConnectRequest,
    request_timeout: Duration,
) -> Result<TransportLink, CoreError> {
    let stream_url = endpoint_url(request, "stream")?;
    let send_url = endpoint_url(request, "send")?;

    info!("SSE 연결: {}{}", stream_url.origin().ascii_serialization(), stream_url.path());

    let mut builder = http_client
        .get(stream_url.as_str())
        .header(ACCEPT, "text/event-stream");
    if let Some(token) = &request.access_token {
        builder = builder.bearer_auth(token);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| CoreError::Connection(format!("SSE 연결 실패: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CoreError::Connection(format!("SSE 연결 거부 ({status})")));
    }

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    let reader = tokio::spawn(read_loop(response, tx));

    Ok(TransportLink {
        kind: TransportKind::ServerSentEvents,
        sink: Arc::new(SseSink {
            http_client: http_client.clone(),
            send_url,
            access_token: request.access_token.clone(),
            request_timeout,
            reader,
        }),
        inbound: rx,
    })
}

/// 수신 루프. SSE 이벤트의 data 필드가 허브 프레임 하나
async fn read_loop(response: reqwest::Response, tx: mpsc::Sender<TransportMessage>) {
    let mut events = Box::pin(response.bytes_stream().eventsource());

    let reason = loop {
        match events.next().await {
            Some(Ok(event)) => {
                if event.data.is_empty() {
                    debug!("빈 SSE 이벤트 무시 (event={})", event.event);
                    continue;
                }
                if tx.send(TransportMessage::Frame(event.data)).await.is_err() {
                    debug!("수신 채널 닫힘, SSE 수신 루프 종료");
                    return;
                }
            }
            Some(Err(e)) => {
                warn!("SSE 스트림 에러: {e}");
                break Some(format!("SSE 스트림 에러: {e}"));
            }
            None => break Some("SSE 스트림 종료".to_string()),
        }
    };

    let _ = tx.send(TransportMessage::Closed(reason)).await;
    debug!("SSE 수신 루프 종료");
}

/// SSE 송신 싱크 (프레임마다 POST)
struct SseSink {
    http_client: reqwest::Client,
    send_url: Url,
    access_token: Option<String>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

#[async_trait]
impl FrameSink for SseSink {
    async fn send(&self, frame: String) -> Result<(), CoreError> {
        let mut builder = self
            .http_client
            .post(self.send_url.as_str())
            .timeout(self.request_timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(frame);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("SSE 송신 실패: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Network(format!("SSE 송신 거부 ({status})")));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.reader.abort();
        Ok(())
    }
}

impl Drop for SseSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
