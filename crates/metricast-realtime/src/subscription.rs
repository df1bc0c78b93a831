//! 메트릭 구독 관리자.
//!
//! 메트릭마다 허브 측 구독은 최대 하나만 유지하고, 로컬 콜백은 여러 개를
//! 참조 카운트로 관리한다. 첫 등록이 원격 구독을, 마지막 해제가 원격
//! 구독 해제를 일으킨다.
//!
//! 같은 메트릭에 대한 구독/해제는 메트릭별 FIFO 게이트로 호출 순서대로
//! 직렬화된다. 로컬 장부는 동기 락 안에서만 변경하며, 락을 쥔 채
//! `.await`하지 않는다.

use futures::future::join_all;
use metricast_core::error::CoreError;
use metricast_core::models::metric::{metric_event_name, MetricUpdate};
use metricast_core::ports::hub::{EventHandler, HubClient, SUBSCRIBE_METHOD, UNSUBSCRIBE_METHOD};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::error::RealtimeError;

/// 단일 메트릭 콜백
pub type MetricCallback = Arc<dyn Fn(&MetricUpdate) + Send + Sync>;

/// 다중 메트릭 콜백 (메트릭 ID와 함께 호출)
pub type MultiMetricCallback = Arc<dyn Fn(&str, &MetricUpdate) + Send + Sync>;

/// 등록 식별자 (subscribe 호출마다 새로 발급)
type RegistrationId = u64;

/// 메트릭 하나의 구독 장부
struct MetricRecord {
    /// 확정된 등록
    callbacks: Vec<(RegistrationId, MetricCallback)>,
    /// 원격 구독 응답을 기다리는 첫 등록
    pending: Option<(RegistrationId, MetricCallback)>,
    /// 원격 구독 확정 여부
    active: bool,
    /// 허브에 등록한 이벤트 핸들러
    handler: EventHandler,
}

impl MetricRecord {
    /// 팬아웃 대상 스냅샷 (확정 + 대기)
    fn snapshot(&self) -> Vec<MetricCallback> {
        self.callbacks
            .iter()
            .chain(self.pending.iter())
            .map(|(_, cb)| cb.clone())
            .collect()
    }
}

struct Shared {
    hub: Arc<dyn HubClient>,
    records: Mutex<HashMap<String, MetricRecord>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_id: AtomicU64,
}

/// 메트릭 구독 관리자
///
/// 복제해도 같은 장부를 공유한다. 연결 수명주기는 관리하지 않는다.
#[derive(Clone)]
pub struct MetricSubscriptionManager {
    shared: Arc<Shared>,
}

impl MetricSubscriptionManager {
    /// 허브 위에 관리자 생성
    pub fn new(hub: Arc<dyn HubClient>) -> Self {
        Self {
            shared: Arc::new(Shared {
                hub,
                records: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 사용 중인 허브
    pub fn hub(&self) -> &Arc<dyn HubClient> {
        &self.shared.hub
    }

    /// 메트릭 구독
    ///
    /// 해당 메트릭의 첫 등록이면 허브 이벤트 핸들러를 등록하고
    /// `SubscribeToMetric`을 호출한다. 원격 구독이 실패하면 핸들러와 등록을
    /// 모두 되돌리고 에러를 반환한다.
    pub async fn subscribe(
        &self,
        metric_id: &str,
        callback: MetricCallback,
    ) -> Result<MetricSubscription, RealtimeError> {
        let id = Shared::subscribe(&self.shared, metric_id, callback).await?;
        Ok(MetricSubscription {
            shared: self.shared.clone(),
            metric_id: metric_id.to_string(),
            id,
            released: AtomicBool::new(false),
        })
    }

    /// 여러 메트릭을 하나의 콜백으로 동시에 구독
    ///
    /// 일부만 실패하면 성공한 구독은 유지한 채
    /// [`RealtimeError::PartialSubscribe`]에 담아 돌려준다.
    pub async fn subscribe_multiple<S: AsRef<str>>(
        &self,
        metric_ids: &[S],
        callback: MultiMetricCallback,
    ) -> Result<MultiSubscription, RealtimeError> {
        let attempts = metric_ids.iter().map(|metric_id| {
            let metric_id = metric_id.as_ref().to_string();
            let callback = callback.clone();
            let tagged = metric_id.clone();
            let wrapped: MetricCallback = Arc::new(move |update| callback(&tagged, update));
            async move { (metric_id.clone(), self.subscribe(&metric_id, wrapped).await) }
        });
        let results = join_all(attempts).await;

        let total = results.len();
        let mut subscriptions = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (metric_id, result) in results {
            match result {
                Ok(subscription) => subscriptions.push(subscription),
                Err(RealtimeError::Core(e)) => {
                    warn!(metric_id = %metric_id, "다중 구독 중 실패: {e}");
                    failures.push(e);
                }
                Err(RealtimeError::PartialSubscribe { first_error, .. }) => failures.push(first_error),
            }
        }

        let subscribed = MultiSubscription { subscriptions };
        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(subscribed),
            Some(first_error) => Err(RealtimeError::PartialSubscribe {
                failed,
                total,
                first_error,
                subscribed,
            }),
        }
    }

    /// 모든 메트릭 구독 해제
    ///
    /// 로컬 장부는 무조건 비우고, 활성 메트릭마다 원격 해제를 동시에 시도한다.
    /// 실패는 모아서 보고할 뿐 중단하지 않는다.
    pub async fn unsubscribe_all(&self) -> UnsubscribeReport {
        let drained: Vec<(String, MetricRecord)> = self.shared.records.lock().drain().collect();

        let mut targets = Vec::new();
        for (metric_id, record) in drained {
            self.shared
                .hub
                .off(&metric_event_name(&metric_id), Some(&record.handler));
            // 대기 중인 첫 등록은 진행 중인 subscribe가 정리한다
            if record.active {
                targets.push(metric_id);
            }
        }
        targets.sort();

        let hub = &self.shared.hub;
        let outcomes = join_all(targets.iter().map(|metric_id| async move {
            let result = hub
                .invoke(UNSUBSCRIBE_METHOD, vec![Value::from(metric_id.as_str())])
                .await;
            (metric_id.clone(), result)
        }))
        .await;

        let mut report = UnsubscribeReport {
            attempted: targets.clone(),
            failed: Vec::new(),
        };
        for (metric_id, result) in outcomes {
            if let Err(e) = result {
                let err = CoreError::RemoteUnsubscribeFailed {
                    metric_id: metric_id.clone(),
                    message: e.to_string(),
                };
                warn!("{err}");
                report.failed.push((metric_id, err));
            }
        }

        info!(
            attempted = report.attempted.len(),
            failed = report.failed.len(),
            "전체 구독 해제"
        );
        report
    }

    /// 원격 구독이 확정된 메트릭 목록 (정렬됨)
    pub fn active_metrics(&self) -> Vec<String> {
        let mut metrics: Vec<String> = self
            .shared
            .records
            .lock()
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(metric_id, _)| metric_id.clone())
            .collect();
        metrics.sort();
        metrics
    }

    /// 확정된 등록 수 (대기 중인 첫 등록은 제외)
    pub fn subscriber_count(&self, metric_id: &str) -> usize {
        self.shared
            .records
            .lock()
            .get(metric_id)
            .map(|record| record.callbacks.len())
            .unwrap_or(0)
    }

    /// 원격 구독 확정 여부
    pub fn is_metric_active(&self, metric_id: &str) -> bool {
        self.shared
            .records
            .lock()
            .get(metric_id)
            .is_some_and(|record| record.active)
    }

    /// 업데이트를 해당 메트릭의 모든 콜백에 전달
    ///
    /// 허브 이벤트 핸들러가 호출하는 경로와 같다.
    pub fn handle_update(&self, metric_id: &str, update: &MetricUpdate) {
        self.shared.dispatch(metric_id, update);
    }
}

impl Shared {
    /// 메트릭별 게이트 획득 (없으면 생성)
    fn gate(&self, metric_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .entry(metric_id.to_string())
            .or_default()
            .clone()
    }

    /// 아무도 쓰지 않는 게이트 제거
    fn release_gate(&self, metric_id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock();
        // 맵 + 호출자 보유분 외에는 대기자가 없음
        if Arc::strong_count(&gate) == 2 && !self.records.lock().contains_key(metric_id) {
            gates.remove(metric_id);
        }
    }

    async fn subscribe(
        this: &Arc<Self>,
        metric_id: &str,
        callback: MetricCallback,
    ) -> Result<RegistrationId, CoreError> {
        let gate = this.gate(metric_id);
        let result = {
            let _turn = gate.lock().await;
            Self::subscribe_in_turn(this, metric_id, callback).await
        };
        this.release_gate(metric_id, gate);
        result
    }

    async fn subscribe_in_turn(
        this: &Arc<Self>,
        metric_id: &str,
        callback: MetricCallback,
    ) -> Result<RegistrationId, CoreError> {
        let id = this.next_id.fetch_add(1, Ordering::Relaxed);

        let handler = {
            let mut records = this.records.lock();
            if let Some(record) = records.get_mut(metric_id).filter(|r| r.active) {
                record.callbacks.push((id, callback));
                debug!(
                    metric_id,
                    subscribers = record.callbacks.len(),
                    "기존 구독에 콜백 추가"
                );
                return Ok(id);
            }

            let handler = Self::event_handler(this, metric_id);
            records.insert(
                metric_id.to_string(),
                MetricRecord {
                    callbacks: Vec::new(),
                    pending: Some((id, callback)),
                    active: false,
                    handler: handler.clone(),
                },
            );
            handler
        };

        let event = metric_event_name(metric_id);
        this.hub.on(&event, handler.clone());
        let mut in_flight = PendingRegistration {
            shared: this.clone(),
            metric_id: metric_id.to_string(),
            id,
            handler: handler.clone(),
            settled: false,
        };

        let outcome = this
            .hub
            .invoke(SUBSCRIBE_METHOD, vec![Value::from(metric_id)])
            .await;
        in_flight.settled = true;

        match outcome {
            Ok(_) => {
                let committed = {
                    let mut records = this.records.lock();
                    match records.get_mut(metric_id) {
                        Some(record) if record.pending.as_ref().is_some_and(|(p, _)| *p == id) => {
                            if let Some(registration) = record.pending.take() {
                                record.callbacks.push(registration);
                            }
                            record.active = true;
                            true
                        }
                        _ => false,
                    }
                };

                if committed {
                    info!(metric_id, "메트릭 구독 시작");
                    return Ok(id);
                }

                // 응답을 기다리는 동안 unsubscribe_all이 장부를 비움
                this.hub.off(&event, Some(&handler));
                let mut release = RemoteRelease {
                    shared: this.clone(),
                    metric_id: metric_id.to_string(),
                    done: false,
                };
                let outcome = this
                    .hub
                    .invoke(UNSUBSCRIBE_METHOD, vec![Value::from(metric_id)])
                    .await;
                release.done = true;
                if let Err(e) = outcome {
                    warn!(metric_id, "취소된 구독의 원격 해제 실패: {e}");
                }
                Err(CoreError::RemoteSubscribeFailed {
                    metric_id: metric_id.to_string(),
                    message: "구독 확정 전에 전체 해제됨".to_string(),
                })
            }
            Err(e) => {
                this.hub.off(&event, Some(&handler));
                {
                    let mut records = this.records.lock();
                    let ours = records
                        .get(metric_id)
                        .and_then(|record| record.pending.as_ref())
                        .is_some_and(|(p, _)| *p == id);
                    if ours {
                        records.remove(metric_id);
                    }
                }

                warn!(metric_id, "메트릭 구독 실패, 등록 롤백: {e}");
                Err(match e {
                    CoreError::NotConnected => CoreError::NotConnected,
                    CoreError::Remote { message, .. } => CoreError::RemoteSubscribeFailed {
                        metric_id: metric_id.to_string(),
                        message,
                    },
                    other => CoreError::RemoteSubscribeFailed {
                        metric_id: metric_id.to_string(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    fn spawn_release(this: &Arc<Self>, metric_id: &str) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Self::release_abandoned(this.clone(), metric_id.to_string()));
            }
            Err(_) => debug!(metric_id, "런타임 없음, 원격 해제 생략"),
        }
    }

    /// 중간에 버려진 구독의 원격 해제
    ///
    /// 게이트 순서를 따르므로 그 사이 새로 확정된 구독이 있으면 건드리지 않는다.
    async fn release_abandoned(this: Arc<Self>, metric_id: String) {
        let gate = this.gate(&metric_id);
        {
            let _turn = gate.lock().await;
            let superseded = this.records.lock().contains_key(&metric_id);
            if superseded {
                debug!(metric_id = %metric_id, "취소된 구독 이후 새 구독이 확정됨, 원격 해제 생략");
            } else {
                match this
                    .hub
                    .invoke(UNSUBSCRIBE_METHOD, vec![Value::from(metric_id.as_str())])
                    .await
                {
                    Ok(_) => debug!(metric_id = %metric_id, "취소된 구독 원격 해제"),
                    Err(e) => warn!(metric_id = %metric_id, "취소된 구독의 원격 해제 실패: {e}"),
                }
            }
        }
        this.release_gate(&metric_id, gate);
    }

    async fn unsubscribe(this: &Arc<Self>, metric_id: &str, id: RegistrationId) {
        let gate = this.gate(metric_id);
        {
            let _turn = gate.lock().await;
            Self::unsubscribe_in_turn(this, metric_id, id).await;
        }
        this.release_gate(metric_id, gate);
    }

    async fn unsubscribe_in_turn(this: &Arc<Self>, metric_id: &str, id: RegistrationId) {
        let handler = {
            let mut records = this.records.lock();
            let Some(record) = records.get_mut(metric_id) else {
                debug!(metric_id, "이미 정리된 구독 해제 무시");
                return;
            };
            let before = record.callbacks.len();
            record.callbacks.retain(|(rid, _)| *rid != id);
            if record.callbacks.len() == before {
                debug!(metric_id, "이미 정리된 등록 해제 무시");
                return;
            }
            if !record.callbacks.is_empty() || record.pending.is_some() {
                debug!(
                    metric_id,
                    subscribers = record.callbacks.len(),
                    "콜백 제거"
                );
                return;
            }
            match records.remove(metric_id) {
                Some(record) => record.handler,
                None => return,
            }
        };

        this.hub.off(&metric_event_name(metric_id), Some(&handler));
        let mut release = RemoteRelease {
            shared: this.clone(),
            metric_id: metric_id.to_string(),
            done: false,
        };
        let outcome = this
            .hub
            .invoke(UNSUBSCRIBE_METHOD, vec![Value::from(metric_id)])
            .await;
        release.done = true;
        match outcome {
            Ok(_) => info!(metric_id, "메트릭 구독 종료"),
            Err(e) => {
                let err = CoreError::RemoteUnsubscribeFailed {
                    metric_id: metric_id.to_string(),
                    message: e.to_string(),
                };
                warn!("{err}");
            }
        }
    }

    /// 허브 이벤트 핸들러 생성 (장부는 약한 참조로 잡는다)
    fn event_handler(this: &Arc<Self>, metric_id: &str) -> EventHandler {
        let weak: Weak<Self> = Arc::downgrade(this);
        let metric_id = metric_id.to_string();
        Arc::new(move |args: &[Value]| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Some(payload) = args.first() else {
                warn!(metric_id = %metric_id, "인자 없는 메트릭 이벤트 무시");
                return;
            };
            match serde_json::from_value::<MetricUpdate>(payload.clone()) {
                Ok(update) => shared.dispatch(&metric_id, &update),
                Err(e) => warn!(metric_id = %metric_id, "메트릭 업데이트 역직렬화 실패: {e}"),
            }
        })
    }

    /// 팬아웃
    fn dispatch(&self, metric_id: &str, update: &MetricUpdate) {
        let callbacks = self
            .records
            .lock()
            .get(metric_id)
            .map(MetricRecord::snapshot)
            .unwrap_or_default();

        if callbacks.is_empty() {
            warn!(metric_id, "구독자 없는 메트릭 업데이트 무시");
            return;
        }

        for callback in callbacks {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(update))) {
                let err = CoreError::Callback {
                    metric_id: metric_id.to_string(),
                    message: panic_message(payload.as_ref()),
                };
                error!("{err}");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "알 수 없는 패닉".to_string()
    }
}

/// 원격 응답 전의 첫 등록
///
/// `subscribe` future가 응답 전에 drop되면 대기 등록과 핸들러를 되돌리고,
/// 이미 수락됐을 수 있는 원격 구독은 백그라운드에서 해제한다.
struct PendingRegistration {
    shared: Arc<Shared>,
    metric_id: String,
    id: RegistrationId,
    handler: EventHandler,
    settled: bool,
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        self.shared
            .hub
            .off(&metric_event_name(&self.metric_id), Some(&self.handler));
        {
            let mut records = self.shared.records.lock();
            let ours = records
                .get(&self.metric_id)
                .and_then(|record| record.pending.as_ref())
                .is_some_and(|(p, _)| *p == self.id);
            if ours {
                records.remove(&self.metric_id);
            }
        }
        warn!(metric_id = %self.metric_id, "응답 전에 취소된 구독 롤백");

        Shared::spawn_release(&self.shared, &self.metric_id);
    }
}

/// 로컬 장부에서 이미 지운 메트릭의 원격 해제가 끝나기 전에 drop되면
/// 백그라운드에서 다시 해제한다.
struct RemoteRelease {
    shared: Arc<Shared>,
    metric_id: String,
    done: bool,
}

impl Drop for RemoteRelease {
    fn drop(&mut self) {
        if !self.done {
            Shared::spawn_release(&self.shared, &self.metric_id);
        }
    }
}

/// 단일 등록 핸들
///
/// `unsubscribe()`는 정확히 이 등록 하나만 되돌리며 여러 번 호출해도 안전하다.
/// 핸들을 drop해도 구독은 해제되지 않는다.
pub struct MetricSubscription {
    shared: Arc<Shared>,
    metric_id: String,
    id: RegistrationId,
    released: AtomicBool,
}

impl MetricSubscription {
    /// 구독 대상 메트릭 ID
    pub fn metric_id(&self) -> &str {
        &self.metric_id
    }

    /// 등록 해제 (마지막 등록이면 원격 구독도 해제)
    pub async fn unsubscribe(&self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        // 도중에 취소되면 다음 호출이 다시 시도한다 (등록 제거는 멱등)
        Shared::unsubscribe(&self.shared, &self.metric_id, self.id).await;
        self.released.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MetricSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSubscription")
            .field("metric_id", &self.metric_id)
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

/// 다중 구독 핸들
#[derive(Debug, Default)]
pub struct MultiSubscription {
    subscriptions: Vec<MetricSubscription>,
}

impl MultiSubscription {
    /// 포함된 메트릭 ID 목록
    pub fn metric_ids(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.metric_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// 포함된 모든 등록 해제
    pub async fn unsubscribe(&self) {
        join_all(self.subscriptions.iter().map(|s| s.unsubscribe())).await;
    }
}

/// 전체 구독 해제 결과
#[derive(Debug, Default)]
pub struct UnsubscribeReport {
    /// 원격 해제를 시도한 메트릭
    pub attempted: Vec<String>,
    /// 원격 해제에 실패한 메트릭과 에러
    pub failed: Vec<(String, CoreError)>,
}

impl UnsubscribeReport {
    /// 모든 원격 해제 성공 여부
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
