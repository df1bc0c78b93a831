//! 허브 연결: `HubClient` 포트 구현.
//!
//! 한 번에 정확히 하나의 전송 링크를 소유한다. 상태 머신:
//!
//! ```text
//! Disconnected → Connecting → Connected
//! Connected → Reconnecting → Connected | Disconnected
//! ```
//!
//! 예기치 않은 끊김은 백그라운드 감시 태스크가 처리하며
//! 백오프 스케줄([`reconnect_delay`])에 따라 재연결한다.
//! 명시적 `connect()` 실패는 호출자에게 전달되고, 백그라운드 재연결 실패는
//! 로그와 `ConnectionState.error`로만 드러난다.

use async_trait::async_trait;
use metricast_core::config::HubConfig;
use metricast_core::error::CoreError;
use metricast_core::models::connection::{ConnectionState, ConnectionStatus};
use metricast_core::ports::auth::TokenProvider;
use metricast_core::ports::hub::{same_handler, EventHandler, HubClient};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::reconnect_delay;
use crate::protocol::HubMessage;
use crate::transport::{
    negotiation_order, ConnectRequest, FrameSink, NetworkConnector, TransportConnector,
    TransportKind, TransportLink, TransportMessage,
};

/// 호출 응답 대기자 (에러 응답은 서버 메시지)
type PendingReply = oneshot::Sender<Result<Value, String>>;

/// 허브 연결 빌더
pub struct HubConnectionBuilder {
    config: HubConfig,
    connector: Option<Arc<dyn TransportConnector>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl HubConnectionBuilder {
    /// 전송 커넥터 지정 (기본: 실제 네트워크)
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 토큰 제공자 지정
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// 연결 생성 (아직 연결하지 않음)
    pub fn build(self) -> HubConnection {
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(NetworkConnector::new(Duration::from_millis(
                self.config.request_timeout_ms,
            )))
        });
        let (state_tx, _) = watch::channel(ConnectionState::default());

        HubConnection {
            inner: Arc::new(HubInner {
                config: self.config,
                connector,
                token_provider: self.token_provider,
                state_tx,
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                sink: RwLock::new(None),
                transport: RwLock::new(None),
                session: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                reconnect_attempts: AtomicU32::new(0),
                next_invocation_id: AtomicU64::new(1),
            }),
        }
    }
}

/// 허브 연결
pub struct HubConnection {
    inner: Arc<HubInner>,
}

/// 감시 태스크 세션
struct Session {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Session {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
    }
}

struct HubInner {
    config: HubConfig,
    connector: Arc<dyn TransportConnector>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    state_tx: watch::Sender<ConnectionState>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    pending: Mutex<HashMap<String, PendingReply>>,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    transport: RwLock<Option<TransportKind>>,
    session: Mutex<Option<Session>>,
    /// connect/disconnect 직렬화
    lifecycle: tokio::sync::Mutex<()>,
    reconnect_attempts: AtomicU32,
    next_invocation_id: AtomicU64,
}

impl HubConnection {
    /// 실제 네트워크 커넥터로 연결 생성
    pub fn new(config: HubConfig) -> Self {
        Self::builder(config).build()
    }

    /// 빌더 생성
    pub fn builder(config: HubConfig) -> HubConnectionBuilder {
        HubConnectionBuilder {
            config,
            connector: None,
            token_provider: None,
        }
    }

    /// 상태 변경 수신기 생성
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// 현재 재연결 시도 횟수 (성공 시 0으로 리셋)
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// 협상된 전송 방식
    pub fn transport(&self) -> Option<TransportKind> {
        *self.inner.transport.read()
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(session) = self.inner.session.lock().take() {
            session.stop();
        }
    }
}

#[async_trait]
impl HubClient for HubConnection {
    async fn connect(&self) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.is_connected() {
            debug!("이미 연결됨, connect 무시");
            return Ok(());
        }

        // 재연결을 포기했거나 진행 중인 이전 세션 정리
        if let Some(session) = self.inner.session.lock().take() {
            session.stop();
        }
        self.inner.detach();

        self.inner.transition(|s| s.connecting());

        match self.inner.establish().await {
            Ok((link, connection_id)) => {
                let inbound = self.inner.attach(link);
                self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
                self.inner.transition(|s| s.connected(connection_id));

                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let task = tokio::spawn(HubInner::supervise(
                    self.inner.clone(),
                    inbound,
                    shutdown_rx,
                ));
                *self.inner.session.lock() = Some(Session { shutdown_tx, task });

                info!("허브 연결 성공");
                Ok(())
            }
            Err(e) => {
                warn!("허브 연결 실패: {e}");
                let message = e.to_string();
                self.inner.transition(|s| s.disconnected(Some(message)));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        // 종료 신호는 세션 락 안에서 보낸다 (재연결 태스크의 attach와 직렬화)
        let had_session = {
            let mut session = self.inner.session.lock();
            match session.take() {
                Some(session) => {
                    session.stop();
                    true
                }
                None => false,
            }
        };

        let sink = self.inner.detach();
        if let Some(sink) = &sink {
            if let Err(e) = sink.close().await {
                debug!("전송 종료 중 에러 (무시): {e}");
            }
        }
        self.inner.fail_pending();

        if !had_session && sink.is_none() && self.state().status == ConnectionStatus::Disconnected
        {
            return Ok(());
        }

        self.inner.transition(|s| s.disconnected(None));
        info!("허브 연결 종료");
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CoreError> {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }
        let sink = self
            .inner
            .sink
            .read()
            .clone()
            .ok_or(CoreError::NotConnected)?;

        let invocation_id = self
            .inner
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let frame = HubMessage::invocation(invocation_id.clone(), method, args).encode()?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(invocation_id.clone(), tx);

        // 등록 직후 링크가 교체됐으면 fail_pending이 이 대기자를 놓쳤을 수 있다
        let still_attached = self
            .inner
            .sink
            .read()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &sink));
        if !still_attached {
            self.inner.pending.lock().remove(&invocation_id);
            return Err(CoreError::Connection(format!("{method} 전송 전에 연결이 끊김")));
        }

        debug!(method, invocation_id = %invocation_id, "허브 호출");
        if let Err(e) = sink.send(frame).await {
            self.inner.pending.lock().remove(&invocation_id);
            return Err(e);
        }

        // 응답 또는 링크 끊김(fail_pending)까지 대기. 시간 제한은 호출자 몫이다.
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(CoreError::Remote {
                method: method.to_string(),
                message,
            }),
            Err(_) => Err(CoreError::Connection(format!(
                "{method} 응답 전에 연결이 끊김"
            ))),
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.inner
            .handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn off(&self, event: &str, handler: Option<&EventHandler>) {
        let mut handlers = self.inner.handlers.write();
        match handler {
            None => {
                handlers.remove(event);
            }
            Some(target) => {
                if let Some(list) = handlers.get_mut(event) {
                    list.retain(|h| !same_handler(h, target));
                    if list.is_empty() {
                        handlers.remove(event);
                    }
                }
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }
}

impl HubInner {
    /// 상태 전이 (watch 구독자에게 통지)
    fn transition(&self, next: impl FnOnce(&ConnectionState) -> ConnectionState) {
        self.state_tx.send_modify(|state| {
            let updated = next(state);
            if updated.status != state.status {
                debug!("연결 상태 전이: {} → {}", state.status, updated.status);
            }
            *state = updated;
        });
    }

    /// 토큰 획득 + 전송 협상
    async fn establish(&self) -> Result<(TransportLink, String), CoreError> {
        let access_token = match &self.token_provider {
            Some(provider) => provider.access_token().await?,
            None => None,
        };
        let connection_id = Uuid::new_v4().to_string();
        let request = ConnectRequest {
            endpoint: self.config.endpoint(),
            connection_id: connection_id.clone(),
            access_token,
        };

        let mut last_error = None;
        for kind in negotiation_order(self.config.transport) {
            match self.connector.open(*kind, &request).await {
                Ok(link) => {
                    info!(transport = %kind, connection_id = %connection_id, "허브 전송 수립");
                    return Ok((link, connection_id));
                }
                Err(e) => {
                    warn!("{kind} 전송 실패: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CoreError::Connection("사용 가능한 전송 없음".to_string())))
    }

    /// 링크 장착, 수신 채널 반환
    fn attach(&self, link: TransportLink) -> mpsc::Receiver<TransportMessage> {
        *self.sink.write() = Some(link.sink);
        *self.transport.write() = Some(link.kind);
        link.inbound
    }

    /// 링크 분리
    fn detach(&self) -> Option<Arc<dyn FrameSink>> {
        *self.transport.write() = None;
        self.sink.write().take()
    }

    /// 대기 중인 호출 모두 실패 처리 (송신자 drop → 연결 에러)
    fn fail_pending(&self) {
        let drained: Vec<PendingReply> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            debug!("응답 대기 호출 {}건 실패 처리", drained.len());
        }
    }

    /// 감시 루프: 수신 → 끊김 감지 → 재연결
    async fn supervise(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<TransportMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            let reason = tokio::select! {
                _ = shutdown_rx.changed() => return,
                reason = self.pump(&mut inbound) => reason,
            };
            if *shutdown_rx.borrow() {
                return;
            }

            warn!("허브 연결 끊김: {reason}");
            self.detach();
            self.fail_pending();
            self.transition(|s| s.reconnecting(Some(reason)));

            match self.reconnect(&mut shutdown_rx).await {
                Some(next) => inbound = next,
                None => return,
            }
        }
    }

    /// 링크가 닫힐 때까지 프레임 처리, 끊김 사유 반환
    async fn pump(&self, inbound: &mut mpsc::Receiver<TransportMessage>) -> String {
        while let Some(message) = inbound.recv().await {
            match message {
                TransportMessage::Frame(frame) => {
                    if let Some(reason) = self.handle_frame(&frame) {
                        return reason;
                    }
                }
                TransportMessage::Closed(reason) => {
                    return reason.unwrap_or_else(|| "전송 종료".to_string());
                }
            }
        }
        "전송 채널 닫힘".to_string()
    }

    /// 프레임 하나 처리 (서버가 종료를 통보하면 사유 반환)
    fn handle_frame(&self, frame: &str) -> Option<String> {
        let message = match HubMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("허브 프레임 디코딩 실패: {e}");
                return None;
            }
        };

        match message {
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let waiter = self.pending.lock().remove(&invocation_id);
                match waiter {
                    Some(tx) => {
                        let outcome = match error {
                            Some(message) => Err(message),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => debug!("대기자 없는 호출 응답: {invocation_id}"),
                }
            }
            HubMessage::Event { target, arguments } => self.dispatch(&target, &arguments),
            HubMessage::Ping => {}
            HubMessage::Close { error } => {
                return Some(error.unwrap_or_else(|| "서버가 연결 종료".to_string()));
            }
            HubMessage::Invocation { target, .. } => {
                debug!("서버 측 호출은 지원하지 않음: {target}");
            }
        }
        None
    }

    /// 이벤트를 등록된 핸들러 스냅샷에 전달
    fn dispatch(&self, event: &str, arguments: &[Value]) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!("핸들러 없는 이벤트 무시: {event}");
            return;
        }

        for handler in handlers {
            // 핸들러 패닉이 수신 루프를 죽이지 않도록 격리
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(arguments))).is_err() {
                error!(event, "이벤트 핸들러 패닉");
            }
        }
    }

    /// 백오프 재연결. 성공 시 새 수신 채널, 포기/종료 시 `None`.
    async fn reconnect(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<mpsc::Receiver<TransportMessage>> {
        loop {
            let attempt = self.reconnect_attempts.load(Ordering::SeqCst);
            if let Some(max) = self.config.max_reconnect_attempts {
                if attempt >= max {
                    warn!("재연결 {attempt}회 실패 - 포기");
                    self.transition(|s| {
                        let last = s.error.clone().unwrap_or_default();
                        s.disconnected(Some(format!("재연결 {attempt}회 실패 후 포기: {last}")))
                    });
                    return None;
                }
            }

            let delay = reconnect_delay(attempt);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "허브 재연결 대기"
            );
            tokio::select! {
                _ = shutdown_rx.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = shutdown_rx.changed() => return None,
                outcome = self.establish() => outcome,
            };

            match outcome {
                Ok((link, connection_id)) => {
                    let _session = self.session.lock();
                    if *shutdown_rx.borrow() {
                        return None;
                    }
                    let inbound = self.attach(link);
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    self.transition(|s| s.connected(connection_id));
                    info!("허브 재연결 성공");
                    return Some(inbound);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, "허브 재연결 실패: {e}");
                    let message = e.to_string();
                    self.transition(|s| s.reconnecting(Some(message)));
                }
            }
        }
    }
}
