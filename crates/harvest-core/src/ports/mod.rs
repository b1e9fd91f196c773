//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//!
//! # 設計原則
//! - ObjectStore が source of truth（正本）
//! - ResultCache はその手前に置く読み取り用キャッシュ（正本ではない）
//! - Collector は外部コラボレーター（コアは呼び出すだけ）

pub mod clock;
pub mod collector;
pub mod id_generator;
pub mod object_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::collector::{AuthContext, Collector};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::object_store::{ObjectStore, StoreError, keys};
