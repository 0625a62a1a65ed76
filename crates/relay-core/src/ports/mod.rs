//! Ports - 抽象化レイヤー
//!
//! dispatcher が外部と接する境界を trait として定義します。
//! 実装は `impls` か、ライブラリの利用者が用意します。

pub mod clock;
pub mod handler;
pub mod id_generator;
pub mod splitter;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::Handler;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::splitter::TaskSplitter;
