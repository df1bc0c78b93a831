//! Metricast 도메인 모델.
//!
//! 허브와 클라이언트가 주고받는 데이터 구조체를 정의한다.
//! 모든 모델은 `serde` Serialize/Deserialize를 구현한다.

pub mod connection;
pub mod metric;
