//! 통합 테스트 공용 허브 더블.

#![allow(dead_code)]

use async_trait::async_trait;
use metricast_core::error::CoreError;
use metricast_core::models::connection::ConnectionState;
use metricast_core::models::metric::{metric_event_name, MetricUpdate};
use metricast_core::ports::hub::{same_handler, EventHandler, HubClient};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// 호출을 기록하고 실패를 주입할 수 있는 허브
pub struct RecordingHub {
    state: RwLock<ConnectionState>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    /// 순서대로 기록된 호출 ("connect", "disconnect", "Method:metric")
    log: Mutex<Vec<String>>,
    /// (method, metric) 조합별 원격 실패
    failures: Mutex<HashSet<(String, String)>>,
    connect_error: Mutex<Option<String>>,
    latency: Duration,
}

impl RecordingHub {
    /// 이미 연결된 허브
    pub fn connected() -> Self {
        let hub = Self::disconnected();
        *hub.state.write() = ConnectionState::default().connected("test-conn");
        hub
    }

    /// 끊긴 허브 (connect 호출 시 연결됨)
    pub fn disconnected() -> Self {
        Self {
            state: RwLock::new(ConnectionState::default()),
            handlers: RwLock::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            connect_error: Mutex::new(None),
            latency: Duration::ZERO,
        }
    }

    /// 원격 호출마다 지연 추가
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `method(metric_id)` 호출을 원격 에러로 응답
    pub fn fail(&self, method: &str, metric_id: &str) {
        self.failures
            .lock()
            .insert((method.to_string(), metric_id.to_string()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// 다음 connect를 실패시킴
    pub fn fail_connect(&self, message: &str) {
        *self.connect_error.lock() = Some(message.to_string());
    }

    /// 외부 요인으로 상태 변경 (연결 끊김 흉내 등)
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// 전체 호출 기록
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// 특정 메서드로 호출된 메트릭 목록 (호출 순서)
    pub fn invocations_of(&self, method: &str) -> Vec<String> {
        let prefix = format!("{method}:");
        self.log
            .lock()
            .iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// 등록된 핸들러 수
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map(Vec::len).unwrap_or(0)
    }

    /// 서버 푸시 흉내
    pub fn emit(&self, event: &str, payload: Value) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        let arguments = [payload];
        for handler in handlers {
            handler(&arguments[..]);
        }
    }

    /// 메트릭 업데이트 푸시
    pub fn push_update(&self, metric_id: &str, value: f64, timestamp: i64) {
        let update = MetricUpdate::new(metric_id, value, timestamp);
        self.emit(
            &metric_event_name(metric_id),
            serde_json::to_value(update).unwrap(),
        );
    }
}

#[async_trait]
impl HubClient for RecordingHub {
    async fn connect(&self) -> Result<(), CoreError> {
        self.log.lock().push("connect".to_string());
        if let Some(message) = self.connect_error.lock().take() {
            let mut state = self.state.write();
            *state = state.disconnected(Some(message.clone()));
            return Err(CoreError::Connection(message));
        }
        let mut state = self.state.write();
        *state = state.connected("test-conn");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        self.log.lock().push("disconnect".to_string());
        let mut state = self.state.write();
        *state = state.disconnected(None);
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CoreError> {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }
        let metric_id = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.log.lock().push(format!("{method}:{metric_id}"));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let key = (method.to_string(), metric_id);
        if self.failures.lock().contains(&key) {
            return Err(CoreError::Remote {
                method: method.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(Value::Null)
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    fn off(&self, event: &str, handler: Option<&EventHandler>) {
        let mut handlers = self.handlers.write();
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
        self.state.read().clone()
    }
}
