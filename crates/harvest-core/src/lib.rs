//! harvest-core
//!
//! Core building blocks for asynchronous, per-session collection runs and the
//! cached read path over their persisted snapshots.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, category, envelope, job, record, errors）
//! - **ports**: 抽象化レイヤー（ObjectStore, Collector, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryObjectStore, LocalObjectStore, CollectorRegistry）
//! - **cache**: TTL 付き ResultCache
//! - **app**: アプリケーションロジック（builder, service, tracker, orchestrator, repository）
//! - **config**: HarvestConfig
//! - **observability**: tracing の初期化、トラッカーの集計

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{AppBuilder, BuildError, CollectionService, StartRequest};
pub use config::HarvestConfig;
pub use domain::{HarvestError, JobStatus};
