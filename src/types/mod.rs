//! 类型系统模块：定义流式协议的线上帧与解码后的事件类型。
//!
//! # Types Module
//!
//! Wire-level frame shapes and the decoded protocol events built from them.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProtocolEvent`] | One decoded unit from a streaming endpoint |
//! | [`StreamEvent`] | What a stream client delivers to its single event handler |
//! | [`FlatFrame`] | `task_id` / `chunk` / `done` style frame |
//! | [`SectionFrame`] | `type`-discriminated multi-section frame |

pub mod events;
pub mod frame;

pub use events::{ProtocolEvent, StreamEvent};
pub use frame::{FlatFrame, SectionFrame};
