//! relay-im：一对一实时消息投递服务，离线暂存转发
//! relay-im: one-to-one realtime message delivery with offline
//! store-and-forward
//!
//! 核心管线：会话网关 → 入口（落库+入队）→ 队列 → 分发器 →
//! {接收方会话 | 收件箱缓存}；确认路径带补偿回滚
//! Core pipeline: session gateway → ingress (persist + enqueue) → queue →
//! dispatcher → {receiver session | inbox cache}; the ack path carries a
//! compensating rollback

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod tasks;
pub mod ws;

pub use config::Settings;
pub use error::{RelayError, Result};
pub use registry::{ConnectionRegistry, SessionHandle};
pub use server::RelayImServer;
pub use store::MessageStore;
