//! 재연결 백오프 스케줄.

use std::time::Duration;

/// 3회차 이후 지수 백오프 기준값 (밀리초)
const BASE_DELAY_MS: u64 = 2_000;

/// 재연결 지연 상한 (밀리초)
const MAX_DELAY_MS: u64 = 30_000;

/// `attempt`번째 재연결 시도 전 대기 시간
///
/// 0회차 즉시, 1회차 2초, 2회차 10초, 이후 `min(30초, 2초 * 2^attempt)`.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let millis = match attempt {
        0 => 0,
        1 => 2_000,
        2 => 10_000,
        n => BASE_DELAY_MS
            .saturating_mul(2u64.saturating_pow(n))
            .min(MAX_DELAY_MS),
    };
    Duration::from_millis(millis)
}
