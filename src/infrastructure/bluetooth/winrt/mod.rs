//! Windows Runtime backend

mod gatt;
mod watcher;

pub use gatt::WinRtTransport;
pub use watcher::WinRtWatcher;
