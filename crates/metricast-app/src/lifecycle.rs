//! 실행 수명 제어.
//!
//! 구독 세션을 언제 끝낼지 결정한다: OS 시그널, `--duration` 만료,
//! 또는 내부 요청. 종료 사유는 watch 채널로 보조 태스크에 전파된다.

use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// 세션 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT / SIGTERM / Ctrl+C
    Signal,
    /// 실행 시간 만료
    Deadline,
    /// 코드에서 직접 요청 (예: 구독 실패)
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "시그널"),
            Self::Deadline => write!(f, "실행 시간 만료"),
            Self::Requested => write!(f, "요청"),
        }
    }
}

/// 실행 가드. 첫 종료 사유만 기록된다.
pub struct RunGuard {
    stop_tx: watch::Sender<Option<StopReason>>,
}

impl RunGuard {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(None);
        Self { stop_tx }
    }

    /// 종료 통지 수신기 (값이 `Some`이 되면 종료)
    pub fn stop_receiver(&self) -> watch::Receiver<Option<StopReason>> {
        self.stop_tx.subscribe()
    }

    /// 종료 요청. 이미 종료 중이면 사유를 덮어쓰지 않는다.
    pub fn stop(&self, reason: StopReason) {
        let first = self.stop_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(%reason, "세션 종료 요청");
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_tx.borrow()
    }

    /// 시그널 또는 `limit` 만료 중 먼저 오는 쪽까지 대기.
    /// 다른 경로로 이미 종료 요청된 경우에도 반환한다.
    pub async fn run_until_stopped(&self, limit: Option<Duration>) -> std::io::Result<StopReason> {
        let mut stop_rx = self.stop_receiver();
        tokio::select! {
            received = next_signal() => {
                received?;
                self.stop(StopReason::Signal);
            }
            _ = deadline(limit) => self.stop(StopReason::Deadline),
            _ = stop_rx.wait_for(Option::is_some) => {}
        }
        Ok(self.stop_reason().unwrap_or(StopReason::Requested))
    }
}

impl Default for RunGuard {
    fn default() -> Self {
        Self::new()
    }
}

async fn next_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => info!("SIGINT 수신"),
            _ = terminate.recv() => info!("SIGTERM 수신"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C 수신");
    }

    Ok(())
}

/// `limit`이 없으면 끝나지 않음
async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
