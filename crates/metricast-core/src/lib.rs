//! # metricast-core
//!
//! Metricast 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 메트릭 업데이트, 연결 상태 (serde Serialize/Deserialize)
//! - [`ports`]: 허브 연결/토큰 제공 포트 인터페이스 (async_trait)
//! - [`error`]: 핵심 에러 타입 (thiserror)
//! - [`config`]: 애플리케이션 설정 구조체 및 로더

pub mod config;
pub mod error;
pub mod models;
pub mod ports;
