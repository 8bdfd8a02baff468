//! # 着色 Petri 网执行引擎
//!
//! 网由库所（place）与迁移（transition）构成的二部图表示：
//!
//! * 每个库所绑定一个处理函数，消费其输入、产生其输出；
//! * 迁移 `t = (S, R)` 在每个发送库所 `s ∈ S` 各提交一个令牌后发射：
//!   若 `|S| > 1`，按声明顺序用 [`Payload::merge`] 折叠（AND-join）；
//!   发射结果复制给每个接收库所 `r ∈ R`（AND-split）；
//! * 多个迁移共享同一发送库所时，每个产出令牌恰好被一个迁移取走，
//!   按迁移就绪的先后顺序公平仲裁。
//!
//! 令牌每穿过一个迁移追加一个检查点 `(迁移, 时间)`。网先在 Inactive 状态下构建，
//! 再通过 [`Net::run`] 并发执行直至完成或被取消。
//!
//! ## 示例
//!
//! ```rust
//! use cpn::net::{Context, Net};
//! use cpn::payload::Counter;
//! use cpn::process::{Collector, Generator};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = Collector::take(3);
//! let net: Net<Counter> = Net::new("demo");
//! net.add_place("p0", Generator::range(0, 3, 1, |idx| Counter(idx as u64))).unwrap();
//! net.add_place("p1", sink.clone()).unwrap();
//! net.add_transition("t0", ["p0"], ["p1"]).unwrap();
//!
//! let ctx = Context::background().with_timeout(std::time::Duration::from_secs(5));
//! net.run(&ctx).await.unwrap();
//!
//! assert_eq!(net.stats().get("p0").unwrap().sent, 3);
//! assert_eq!(sink.payloads(), vec![Counter(0), Counter(1), Counter(2)]);
//! # }
//! ```

pub mod context;
pub mod core;
pub mod fabric;
pub mod ids;
pub mod io;
pub mod place;
pub mod stats;
pub mod token;
pub mod transition;

pub use context::Context;
pub use self::core::{Net, NetError, NetState};
pub use fabric::{Fabric, FabricError, ReadySignals, SendPermit};
pub use ids::{PlaceId, TransitionId};
pub use place::{Place, PlaceError};
pub use stats::{NetStats, Stats};
pub use token::{Checkpoint, MergeError, Payload, Token};
pub use transition::Transition;
