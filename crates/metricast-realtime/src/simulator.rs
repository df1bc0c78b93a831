//! 결정적 데이터 소스.
//!
//! 실제 허브 없이 `HubClient` 계약을 그대로 만족하는 시뮬레이터.
//! 구독된 메트릭마다 랜덤 워크로 값을 만들어 주기적으로 이벤트를 푸시한다.
//! 시드를 고정하면 같은 구독 순서에서 같은 값 열이 나온다.

use async_trait::async_trait;
use chrono::Utc;
use metricast_core::config::{MetricProfile, SimulatorConfig};
use metricast_core::error::CoreError;
use metricast_core::models::connection::ConnectionState;
use metricast_core::models::metric::{metric_event_name, MetricUpdate};
use metricast_core::ports::hub::{
    same_handler, EventHandler, HubClient, SUBSCRIBE_METHOD, UNSUBSCRIBE_METHOD,
};
use parking_lot::{Mutex, RwLock};
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 메트릭 하나의 랜덤 워크
///
/// 다음 값 = 이전 값 + U(-volatility, +volatility) + drift, [min, max]로 고정.
pub struct RandomWalk {
    profile: MetricProfile,
    value: f64,
    rng: StdRng,
    noise: Option<Uniform<f64>>,
    /// 마지막으로 내보낸 타임스탬프 (벽시계가 뒤로 가도 감소하지 않음)
    last_timestamp: i64,
}

impl RandomWalk {
    pub fn new(profile: MetricProfile, seed: u64) -> Self {
        let noise = if profile.volatility > 0.0 {
            Uniform::new_inclusive(-profile.volatility, profile.volatility).ok()
        } else {
            None
        };
        let value = bounded(profile.initial, &profile);
        Self {
            profile,
            value,
            rng: StdRng::seed_from_u64(seed),
            noise,
            last_timestamp: i64::MIN,
        }
    }

    /// 현재 값
    pub fn value(&self) -> f64 {
        self.value
    }

    /// 한 걸음 진행 후 새 값 반환
    pub fn step(&mut self) -> f64 {
        let noise = match &self.noise {
            Some(distribution) => distribution.sample(&mut self.rng),
            None => 0.0,
        };
        self.value = bounded(self.value + noise + self.profile.drift, &self.profile);
        self.value
    }

    /// 한 걸음 진행 후 delta/trend가 채워진 업데이트 생성
    ///
    /// `timestamp`가 이전 값보다 작으면 이전 값을 유지한다.
    pub fn next_update(&mut self, timestamp: i64) -> MetricUpdate {
        let timestamp = timestamp.max(self.last_timestamp);
        self.last_timestamp = timestamp;
        let previous = self.value;
        let value = self.step();
        MetricUpdate::new(self.profile.metric_id.clone(), value, timestamp).with_previous(previous)
    }
}

fn bounded(value: f64, profile: &MetricProfile) -> f64 {
    // clamp는 min > max에서 패닉하므로 max/min 조합 사용
    value.max(profile.min).min(profile.max)
}

/// 메트릭 ID별 시드 파생 (FNV-1a)
fn metric_seed(base: u64, metric_id: &str) -> u64 {
    metric_id
        .bytes()
        .fold(base ^ 0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

/// 시뮬레이터 허브
pub struct SimulatedHub {
    inner: Arc<SimInner>,
}

struct SimInner {
    config: SimulatorConfig,
    seed: u64,
    state: RwLock<ConnectionState>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    streams: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SimulatedHub {
    pub fn new(config: SimulatorConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        debug!(seed, "시뮬레이터 시드");
        Self {
            inner: Arc::new(SimInner {
                config,
                seed,
                state: RwLock::new(ConnectionState::default()),
                handlers: RwLock::new(HashMap::new()),
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 값을 생성 중인 메트릭 목록 (정렬됨)
    pub fn active_streams(&self) -> Vec<String> {
        let mut metrics: Vec<String> = self.inner.streams.lock().keys().cloned().collect();
        metrics.sort();
        metrics
    }

    fn start_stream(&self, metric_id: &str) {
        let mut streams = self.inner.streams.lock();
        if streams.contains_key(metric_id) {
            debug!(metric_id, "이미 생성 중인 메트릭");
            return;
        }

        let walk = RandomWalk::new(
            self.inner.config.profile_for(metric_id),
            metric_seed(self.inner.seed, metric_id),
        );
        let period = self
            .inner
            .config
            .tick_interval()
            .max(Duration::from_millis(1));
        let task = tokio::spawn(run_stream(
            Arc::downgrade(&self.inner),
            metric_event_name(metric_id),
            walk,
            period,
        ));
        streams.insert(metric_id.to_string(), task);
        info!(metric_id, "시뮬레이션 스트림 시작");
    }

    fn stop_stream(&self, metric_id: &str) {
        if let Some(task) = self.inner.streams.lock().remove(metric_id) {
            task.abort();
            info!(metric_id, "시뮬레이션 스트림 종료");
        }
    }

    fn stop_all_streams(&self) {
        let drained: Vec<(String, JoinHandle<()>)> = self.inner.streams.lock().drain().collect();
        for (metric_id, task) in drained {
            task.abort();
            debug!(metric_id = %metric_id, "시뮬레이션 스트림 중단");
        }
    }
}

impl Drop for SimulatedHub {
    fn drop(&mut self) {
        self.stop_all_streams();
    }
}

/// 주기적 값 생성 루프 (첫 값은 즉시)
async fn run_stream(hub: Weak<SimInner>, event: String, mut walk: RandomWalk, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(hub) = hub.upgrade() else {
            break;
        };
        let update = walk.next_update(Utc::now().timestamp_millis());
        hub.emit(&event, &update);
    }
}

impl SimInner {
    fn emit(&self, event: &str, update: &MetricUpdate) {
        let payload = match serde_json::to_value(update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("시뮬레이션 값 직렬화 실패: {e}");
                return;
            }
        };
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();

        let arguments = [payload];
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&arguments[..]))).is_err() {
                error!(event, "이벤트 핸들러 패닉");
            }
        }
    }
}

#[async_trait]
impl HubClient for SimulatedHub {
    async fn connect(&self) -> Result<(), CoreError> {
        if self.is_connected() {
            return Ok(());
        }
        {
            let mut state = self.inner.state.write();
            *state = state.connecting();
        }

        tokio::time::sleep(self.inner.config.connect_delay()).await;

        let connection_id = format!("sim-{}", Uuid::new_v4());
        {
            let mut state = self.inner.state.write();
            *state = state.connected(connection_id);
        }
        info!("시뮬레이터 연결");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        self.stop_all_streams();
        let mut state = self.inner.state.write();
        *state = state.disconnected(None);
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, CoreError> {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }

        let metric_id = || {
            args.first()
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| CoreError::Validation {
                    field: "metric_id".to_string(),
                    message: format!("{method} 호출에 메트릭 ID 인자가 없음"),
                })
        };

        match method {
            SUBSCRIBE_METHOD => {
                self.start_stream(&metric_id()?);
                Ok(Value::Null)
            }
            UNSUBSCRIBE_METHOD => {
                self.stop_stream(&metric_id()?);
                Ok(Value::Null)
            }
            other => Err(CoreError::Remote {
                method: other.to_string(),
                message: "시뮬레이터가 지원하지 않는 메서드".to_string(),
            }),
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
        self.inner.state.read().clone()
    }
}
