//! # metricast-network
//!
//! 허브 연결 어댑터.
//! 원격 허브와의 단일 영속 연결을 소유하며, WebSocket 우선 / SSE 폴백으로
//! 전송을 협상하고, 원격 호출과 인바운드 이벤트 디스패치, 자동 재연결을 담당한다.
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use metricast_core::config::AppConfig;
//! use metricast_network::hub_connection::HubConnection;
//!
//! let config = AppConfig::default_config();
//! let hub = HubConnection::new(config.hub.clone());
//! hub.connect().await?;
//! ```

pub mod auth;
pub mod backoff;
pub mod hub_connection;
pub mod protocol;
pub mod sse_transport;
pub mod transport;
pub mod ws_transport;
