//! Reference blocks
//!
//! A small set of blocks covering every rate kind, history, tags and
//! messages:
//! - **Sources**: [`VectorSource`], [`CounterSource`], [`NullSource`]
//! - **Stream**: [`AddConst`], [`Head`], [`KeepOneInN`], [`Repeat`],
//!   [`KeepMInN`], [`MovingSum`], [`TagForwarder`]
//! - **Sinks**: [`VectorSink`], [`NullSink`]
//! - **Messages**: [`MessageDebug`]

mod message;
mod sinks;
mod sources;
mod stream;

pub use message::{MessageDebug, MessageDebugHandle};
pub use sinks::{NullSink, VectorSink, VectorSinkHandle};
pub use sources::{CounterSource, NullSource, VectorSource};
pub use stream::{AddConst, Head, KeepMInN, KeepOneInN, MovingSum, Repeat, Scalar, TagForwarder};
