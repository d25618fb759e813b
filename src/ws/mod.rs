//! 任务状态 WebSocket：断线重连、心跳与离线消息队列。
//!
//! # Task Monitor
//!
//! A [`TaskMonitor`] keeps one WebSocket open against
//! `/ws/task_status/{task_id}` for as long as the server task runs:
//!
//! ```text
//! Connecting ──open──▶ Open ──close()──▶ Closing ──▶ Closed
//!     ▲                  │
//!     └──backoff delay───┘  abnormal close (not 1000, not intentional)
//! ```
//!
//! - on open the attempt counter resets and queued messages flush in FIFO order
//! - `{"type":"ping"}` frames are answered with `{"type":"pong"}` and never forwarded
//! - the reconnect schedule comes from [`crate::resilience::BackoffPolicy`]
//!
//! [`task::watch_task`] layers the `PENDING`/`STARTED`/`PROGRESS`/`SUCCESS`/`FAILURE`
//! semantics on top of the raw message channel.

pub mod monitor;
pub mod queue;
pub mod task;

pub use monitor::{
    derive_ws_url, ConnectionState, MonitorEvent, MonitorEvents, ReconnectionInfo, TaskMonitor,
};
pub use queue::OutboundQueue;
pub use task::{watch_task, TaskState, TaskStatusMessage, TaskUpdate};
