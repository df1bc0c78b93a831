//! 실시간 컨텍스트.
//!
//! 허브 연결과 구독 관리자의 수명주기를 묶는다. 전역 싱글턴 대신
//! 명시적 객체로 만들고, 필요한 태스크에만 [`RealtimeContext::scope`]로
//! 현재 컨텍스트를 노출한다.

use metricast_core::config::RealtimeConfig;
use metricast_core::error::CoreError;
use metricast_core::models::connection::ConnectionState;
use metricast_core::ports::hub::HubClient;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::subscription::MetricSubscriptionManager;

tokio::task_local! {
    static CURRENT: Arc<RealtimeContext>;
}

/// 현재 태스크 스코프의 실시간 컨텍스트
///
/// 스코프 밖이거나 이미 종료된 컨텍스트면 `CoreError::Config`.
pub fn current() -> Result<Arc<RealtimeContext>, CoreError> {
    let context = CURRENT
        .try_with(Arc::clone)
        .map_err(|_| CoreError::Config("활성 실시간 컨텍스트 스코프 밖에서 접근".to_string()))?;
    if context.is_shut_down() {
        return Err(CoreError::Config("이미 종료된 실시간 컨텍스트".to_string()));
    }
    Ok(context)
}

/// 실시간 컨텍스트
pub struct RealtimeContext {
    hub: Arc<dyn HubClient>,
    manager: MetricSubscriptionManager,
    state_tx: watch::Sender<ConnectionState>,
    poller: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
    /// shutdown 직렬화
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl RealtimeContext {
    /// 컨텍스트 시작
    ///
    /// `auto_connect`면 즉시 연결한다. 연결 실패는 반환하지 않고
    /// 관찰 상태의 `error`에 남긴다.
    pub async fn start(hub: Arc<dyn HubClient>, config: RealtimeConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(hub.state());
        let context = Arc::new(Self {
            manager: MetricSubscriptionManager::new(hub.clone()),
            hub,
            state_tx,
            poller: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            shutdown_lock: tokio::sync::Mutex::new(()),
        });

        if config.auto_connect {
            match context.hub.connect().await {
                Ok(()) => {
                    context.refresh_state();
                    info!("실시간 컨텍스트 연결 완료");
                }
                Err(e) => {
                    warn!("실시간 컨텍스트 자동 연결 실패: {e}");
                    let message = e.to_string();
                    let snapshot = context.hub.state();
                    context.state_tx.send_modify(|state| {
                        *state = snapshot;
                        if state.error.is_none() {
                            state.error = Some(message);
                        }
                    });
                }
            }
        }

        let poller = tokio::spawn(poll_state(
            Arc::downgrade(&context),
            config.state_poll_interval(),
        ));
        *context.poller.lock() = Some(poller);

        context
    }

    /// 현재 관찰 상태
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// 관찰 상태 변경 수신기
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 구독 관리자
    pub fn manager(&self) -> &MetricSubscriptionManager {
        &self.manager
    }

    /// 허브 연결
    pub fn connection(&self) -> &Arc<dyn HubClient> {
        &self.hub
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// `context`를 현재 컨텍스트로 두고 `future` 실행
    pub async fn scope<F>(context: Arc<Self>, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(context, future).await
    }

    /// 현재 스코프 컨텍스트의 구독 관리자
    pub fn session() -> Result<MetricSubscriptionManager, CoreError> {
        current().map(|context| context.manager.clone())
    }

    /// 종료: 전체 구독 해제 → 연결 종료. 두 번째 호출부터는 no-op.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let _serial = self.shutdown_lock.lock().await;
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("이미 종료된 실시간 컨텍스트");
            return Ok(());
        }

        info!("실시간 컨텍스트 종료 시작");
        let report = self.manager.unsubscribe_all().await;
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                "일부 메트릭의 원격 구독 해제 실패"
            );
        }

        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }

        let result = self.hub.disconnect().await;
        self.refresh_state();
        info!("실시간 컨텍스트 종료 완료");
        result
    }

    /// 허브 상태를 관찰 상태로 복사 (바뀐 경우에만 통지)
    fn refresh_state(&self) {
        let next = self.hub.state();
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("관찰 상태 갱신: {} → {}", state.status, next.status);
            *state = next;
            true
        });
    }
}

impl Drop for RealtimeContext {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
    }
}

/// 상태 폴링 루프 (컨텍스트가 사라지거나 종료되면 멈춘다)
async fn poll_state(context: Weak<RealtimeContext>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(context) = context.upgrade() else {
            break;
        };
        if context.is_shut_down() {
            break;
        }
        context.refresh_state();
    }
}
