//! 애플리케이션 설정 구조체.
//!
//! 허브 URL, 전송 방식, 재연결 한도, 상태 폴링 주기, 시뮬레이터 프로파일 등
//! 런타임 설정을 정의한다. `config` crate를 통해 파일/환경변수에서 로드.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::CoreError;

/// 환경변수 오버라이드 접두사 (예: `METRICAST__HUB__BASE_URL`)
pub const ENV_PREFIX: &str = "METRICAST";

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 허브 연결 설정
    pub hub: HubConfig,
    /// 실시간 컨텍스트 설정
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// 결정적 데이터 소스 설정
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

// ============================================================
// 허브 설정
// ============================================================

/// 전송 방식 선호도
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPreference {
    /// WebSocket 우선, 실패 시 SSE로 폴백
    #[default]
    Auto,
    /// WebSocket 전용
    WebSocket,
    /// SSE(서버 푸시) 전용
    ServerSentEvents,
}

/// 허브 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// 허브 서버 기본 URL (예: "https://hub.example.com")
    pub base_url: String,
    /// 허브 엔드포인트 경로
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
    /// 전송 방식
    #[serde(default)]
    pub transport: TransportPreference,
    /// 자동 재연결 최대 시도 횟수 (`None`이면 무제한)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,
    /// SSE 폴백의 HTTP 요청 타임아웃 (밀리초)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl HubConfig {
    /// 허브 엔드포인트 전체 URL
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.hub_path.trim_start_matches('/')
        )
    }
}

// ============================================================
// 실시간 컨텍스트 설정
// ============================================================

/// 실시간 컨텍스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// 컨텍스트 생성 시 즉시 연결
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// 관찰용 연결 상태 동기화 주기 (밀리초)
    #[serde(default = "default_state_poll_interval_ms")]
    pub state_poll_interval_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            state_poll_interval_ms: default_state_poll_interval_ms(),
        }
    }
}

impl RealtimeConfig {
    /// 상태 폴링 주기를 Duration으로 반환
    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms)
    }
}

// ============================================================
// 시뮬레이터 설정
// ============================================================

/// 메트릭별 랜덤 워크 파라미터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricProfile {
    /// 메트릭 ID
    pub metric_id: String,
    /// 하한
    pub min: f64,
    /// 상한
    pub max: f64,
    /// 초기값
    pub initial: f64,
    /// 틱당 최대 랜덤 변화폭
    pub volatility: f64,
    /// 틱당 고정 추세
    #[serde(default)]
    pub drift: f64,
}

impl MetricProfile {
    /// 새 프로파일 생성
    pub fn new(metric_id: &str, min: f64, max: f64, initial: f64, volatility: f64) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            min,
            max,
            initial,
            volatility,
            drift: 0.0,
        }
    }

    /// 고정 추세 지정
    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }

    /// 알 수 없는 메트릭용 범용 프로파일 (0~100)
    pub fn generic(metric_id: &str) -> Self {
        Self::new(metric_id, 0.0, 100.0, 50.0, 5.0)
    }
}

/// 결정적 데이터 소스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// 연결 협상 지연 흉내 (밀리초)
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    /// 값 생성 주기 (밀리초)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 난수 시드 (`None`이면 매 실행 무작위)
    #[serde(default)]
    pub seed: Option<u64>,
    /// 메트릭별 프로파일
    #[serde(default = "default_metric_profiles")]
    pub metrics: Vec<MetricProfile>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: default_connect_delay_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            seed: None,
            metrics: default_metric_profiles(),
        }
    }
}

impl SimulatorConfig {
    /// 메트릭 프로파일 조회 (없으면 범용 프로파일)
    pub fn profile_for(&self, metric_id: &str) -> MetricProfile {
        self.metrics
            .iter()
            .find(|p| p.metric_id == metric_id)
            .cloned()
            .unwrap_or_else(|| MetricProfile::generic(metric_id))
    }

    /// 값 생성 주기를 Duration으로 반환
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// 연결 지연을 Duration으로 반환
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정값 반환
    pub fn default_config() -> Self {
        Self {
            hub: HubConfig {
                base_url: "http://localhost:5000".to_string(),
                hub_path: default_hub_path(),
                transport: TransportPreference::Auto,
                max_reconnect_attempts: default_max_reconnect_attempts(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            realtime: RealtimeConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }

    /// 기본값 → 설정 파일(선택) → 환경변수 순으로 병합하여 로드
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let defaults = config::Config::try_from(&Self::default_config())
            .map_err(|e| CoreError::Config(format!("기본 설정 변환 실패: {e}")))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!("설정 파일 로드: {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let loaded: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CoreError::Config(format!("설정 로드 실패: {e}")))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// 설정값 유효성 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.hub.base_url.trim().is_empty() {
            return Err(CoreError::Validation {
                field: "hub.base_url".to_string(),
                message: "비어 있음".to_string(),
            });
        }
        if self.realtime.state_poll_interval_ms == 0 {
            return Err(CoreError::Validation {
                field: "realtime.state_poll_interval_ms".to_string(),
                message: "0보다 커야 함".to_string(),
            });
        }
        if self.simulator.tick_interval_ms == 0 {
            return Err(CoreError::Validation {
                field: "simulator.tick_interval_ms".to_string(),
                message: "0보다 커야 함".to_string(),
            });
        }
        for profile in &self.simulator.metrics {
            if profile.min > profile.max {
                return Err(CoreError::Validation {
                    field: format!("simulator.metrics.{}", profile.metric_id),
                    message: format!("min({}) > max({})", profile.min, profile.max),
                });
            }
        }
        Ok(())
    }
}

// ============================================================
// 기본값 함수
// ============================================================

fn default_true() -> bool {
    true
}
fn default_hub_path() -> String {
    "/hubs/metrics".to_string()
}
fn default_max_reconnect_attempts() -> Option<u32> {
    Some(10)
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_state_poll_interval_ms() -> u64 {
    2_000
}
fn default_connect_delay_ms() -> u64 {
    500
}
fn default_tick_interval_ms() -> u64 {
    1_000
}
fn default_metric_profiles() -> Vec<MetricProfile> {
    vec![
        MetricProfile::new("cpu_usage", 0.0, 100.0, 35.0, 5.0),
        MetricProfile::new("memory_usage", 0.0, 100.0, 60.0, 2.0).with_drift(0.05),
        MetricProfile::new("request_rate", 0.0, 5_000.0, 1_200.0, 150.0),
        MetricProfile::new("response_time", 5.0, 2_000.0, 120.0, 25.0),
        MetricProfile::new("error_rate", 0.0, 100.0, 0.5, 0.3),
        MetricProfile::new("active_users", 0.0, 10_000.0, 850.0, 40.0).with_drift(1.0),
    ]
}
