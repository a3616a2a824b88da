//! Helios client core.
//!
//! - [`store`]: the observable application state and its named operations.
//! - [`realtime`]: the reconnecting WebSocket channel that feeds the store.
//! - [`storage`]: durable home for the persisted store slices.
//! - [`config`]: layered configuration shared by the `helios` binary.
//! - [`logging`]: subscriber setup honouring `logging.level` and `logging.file`.

pub mod config;
pub mod logging;
pub mod realtime;
pub mod storage;
pub mod store;

pub use helios_protocol as protocol;
