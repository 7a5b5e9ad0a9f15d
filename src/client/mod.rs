//! Watching client: the range list, its persistence and the server connection

pub mod connection;
pub mod state;
pub mod store;

pub use connection::{ConnectionState, ReconnectPolicy, Reconnector, WatchOptions, Watcher};
pub use state::{ClientState, HostSlot, LastScan, Range};
pub use store::StateStore;
