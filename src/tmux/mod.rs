// ABOUTME: Tmux adapter module - typed wrapper around shelling out to `tmux`
// Exposes a common TmuxAdapter trait implemented by both the local and SSH-remote adapters

pub mod adapter;
pub mod error;
pub mod quote;
pub mod remote;
pub mod types;

pub use adapter::{LocalTmuxAdapter, TmuxAdapter};
pub use error::TmuxError;
pub use remote::RemoteTmuxAdapter;
pub use types::{ClientEntry, Window, WindowSource};
