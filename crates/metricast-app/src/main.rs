//! # metricast-app
//!
//! Metricast 바이너리 진입점.
//! 설정 병합, 허브/시뮬레이터 선택, 실시간 컨텍스트 수명주기 관리.

mod lifecycle;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use directories::ProjectDirs;
use metricast_core::config::{AppConfig, TransportPreference};
use metricast_core::models::metric::MetricUpdate;
use metricast_core::ports::hub::HubClient;
use metricast_network::auth::StaticTokenProvider;
use metricast_network::hub_connection::HubConnection;
use metricast_realtime::simulator::SimulatedHub;
use metricast_realtime::{MultiMetricCallback, MultiSubscription, RealtimeContext, RealtimeError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::lifecycle::{RunGuard, StopReason};

/// 실시간 메트릭 구독 클라이언트
#[derive(Parser, Debug)]
#[command(name = "metricast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉터리의 config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 허브 URL (예: http://localhost:5000)
    #[arg(long)]
    hub_url: Option<String>,

    /// 전송 방식
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// 허브 대신 시뮬레이터 사용
    #[arg(long)]
    simulate: bool,

    /// 구독할 메트릭 (쉼표 구분)
    #[arg(long, value_delimiter = ',', default_values = ["cpu_usage", "memory_usage"])]
    metrics: Vec<String>,

    /// 실행 시간 (초, 생략 시 시그널까지)
    #[arg(long)]
    duration: Option<u64>,

    /// 허브 액세스 토큰
    #[arg(long)]
    access_token: Option<String>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Auto,
    Websocket,
    Sse,
}

impl From<TransportArg> for TransportPreference {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Auto => TransportPreference::Auto,
            TransportArg::Websocket => TransportPreference::WebSocket,
            TransportArg::Sse => TransportPreference::ServerSentEvents,
        }
    }
}

/// 설정 파일 경로 결정 (CLI 인자 또는 플랫폼별 기본 경로)
///
/// # 플랫폼별 기본 경로:
/// - macOS: `~/Library/Application Support/io.metricast.metricast/config.toml`
/// - Windows: `%APPDATA%\metricast\metricast\config\config.toml`
/// - Linux: `~/.config/metricast/config.toml`
///
/// 기본 경로에 파일이 없으면 `None` (기본값 + 환경변수만 사용).
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        ProjectDirs::from("io", "metricast", "metricast")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .filter(|path| path.exists())
    })
}

/// CLI 인자로 설정 덮어쓰기
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(url) = &args.hub_url {
        config.hub.base_url = url.clone();
    }
    if let Some(transport) = args.transport {
        config.hub.transport = transport.into();
    }
}

/// 허브 구현 선택
fn build_hub(config: &AppConfig, args: &Args) -> Arc<dyn HubClient> {
    if args.simulate {
        info!("시뮬레이터 모드");
        return Arc::new(SimulatedHub::new(config.simulator.clone()));
    }

    info!(endpoint = %config.hub.endpoint(), transport = ?config.hub.transport, "허브 모드");
    let mut builder = HubConnection::builder(config.hub.clone());
    if let Some(token) = &args.access_token {
        builder = builder.token_provider(Arc::new(StaticTokenProvider::new(token.clone())));
    }
    Arc::new(builder.build())
}

/// 업데이트 로그 출력 콜백
fn log_updates() -> MultiMetricCallback {
    Arc::new(|metric_id: &str, update: &MetricUpdate| {
        info!(
            metric_id,
            value = update.value,
            delta = ?update.delta,
            trend = ?update.trend,
            timestamp = update.timestamp,
            "메트릭 업데이트"
        );
    })
}

/// 요청한 메트릭 구독 (일부 실패는 경고 후 계속)
async fn subscribe_requested(
    context: &RealtimeContext,
    metrics: &[String],
) -> Result<MultiSubscription> {
    match context
        .manager()
        .subscribe_multiple(metrics, log_updates())
        .await
    {
        Ok(subscription) => Ok(subscription),
        Err(RealtimeError::PartialSubscribe {
            failed,
            total,
            first_error,
            subscribed,
        }) if !subscribed.is_empty() => {
            warn!("메트릭 {failed}/{total}건 구독 실패 (계속 진행): {first_error}");
            Ok(subscribed)
        }
        Err(e) => bail!("메트릭 구독 실패: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "metricast={},metricast_app={},metricast_core={},metricast_network={},metricast_realtime={}",
        args.log_level, args.log_level, args.log_level, args.log_level, args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    let config_path = resolve_config_path(args.config.clone());
    let mut config = AppConfig::load(config_path.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    if args.metrics.is_empty() {
        bail!("구독할 메트릭이 없음");
    }

    let hub = build_hub(&config, &args);
    let context = RealtimeContext::start(hub, config.realtime.clone()).await;
    if let Some(error) = context.state().error {
        warn!("초기 연결 실패: {error}");
    }

    let guard = RunGuard::new();

    // 연결 상태 변화 로그
    let mut state_rx = context.watch_state();
    let mut stop_rx = guard.stop_receiver();
    let state_logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop_rx.wait_for(Option::is_some) => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = state_rx.borrow_and_update().clone();
                    match state.error {
                        Some(error) => warn!(status = %state.status, "연결 상태 변경: {error}"),
                        None => info!(status = %state.status, "연결 상태 변경"),
                    }
                }
            }
        }
    });

    let subscription = match subscribe_requested(&context, &args.metrics).await {
        Ok(subscription) => subscription,
        Err(e) => {
            guard.stop(StopReason::Requested);
            context.shutdown().await?;
            return Err(e);
        }
    };
    info!(
        metrics = ?subscription.metric_ids(),
        "Metricast 실행 중 (Ctrl+C로 종료)"
    );

    let reason = guard
        .run_until_stopped(args.duration.map(Duration::from_secs))
        .await?;

    context.shutdown().await?;
    let _ = state_logger.await;

    info!(%reason, "Metricast 종료");
    Ok(())
}
