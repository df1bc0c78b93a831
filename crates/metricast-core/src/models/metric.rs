//! 메트릭 업데이트 모델.
//!
//! 허브가 푸시하는 단일 관측값과 이벤트 이름 규칙을 정의.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 메트릭 이벤트 이름 접두사
pub const METRIC_EVENT_PREFIX: &str = "metric_";

/// 추세 판정 임계값 (이보다 작은 변화는 보합)
const TREND_EPSILON: f64 = 1e-9;

/// 메트릭 ID에 대응하는 허브 인바운드 이벤트 이름
///
/// 순수 함수. 테스트에서 내부 상태 없이 이벤트 이름을 예측할 수 있다.
pub fn metric_event_name(metric_id: &str) -> String {
    format!("{METRIC_EVENT_PREFIX}{metric_id}")
}

/// 변화 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// 상승
    Up,
    /// 하락
    Down,
    /// 보합
    Stable,
}

impl Trend {
    /// 직전 관측값 대비 변화량으로 추세 판정
    pub fn from_delta(delta: f64) -> Self {
        if delta > TREND_EPSILON {
            Trend::Up
        } else if delta < -TREND_EPSILON {
            Trend::Down
        } else {
            Trend::Stable
        }
    }
}

/// 한 시점의 단일 메트릭 관측값
///
/// 콜백 호출이 끝나면 버려지는 일회성 값이다. 같은 `metric_id`에 대해
/// `timestamp`는 도착 순서대로 단조 증가해야 하며, 순서 보장은 전송 계층 책임.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricUpdate {
    /// 메트릭 식별자 (예: "cpu_usage")
    pub metric_id: String,
    /// 측정값
    pub value: f64,
    /// 측정 시각 (epoch 밀리초)
    pub timestamp: i64,
    /// 직전 관측값 대비 변화량
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// 변화 방향
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    /// 추가 정보 (불투명 key-value)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl MetricUpdate {
    /// 변화량/추세 없는 단순 관측값 생성
    pub fn new(metric_id: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            metric_id: metric_id.into(),
            value,
            timestamp,
            delta: None,
            trend: None,
            metadata: None,
        }
    }

    /// 직전 값 기준으로 delta/trend 채우기
    pub fn with_previous(mut self, previous: f64) -> Self {
        let delta = self.value - previous;
        self.delta = Some(delta);
        self.trend = Some(Trend::from_delta(delta));
        self
    }
}
