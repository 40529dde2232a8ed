//! cc-browser daemon runtime.
//!
//! A long-running local daemon that drives a Chromium-family browser over the
//! Chrome DevTools Protocol. The HTTP surface lives in `ccb-cli`; this crate
//! owns everything behind it: workspace descriptors and the daemon lockfile,
//! the browser launcher, the CDP connection cache, per-page state (console /
//! error / network rings and ref maps), the interaction dispatcher with its
//! human-mode timing engine, the CAPTCHA subsystem, named tab sessions, and
//! the record/replay engines.

pub mod captcha;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod launcher;
pub mod lockfile;
pub mod page;
pub mod paths;
pub mod recorder;
pub mod replay;
pub mod sessions;
pub mod snapshot;
pub mod timing;
pub mod types;
pub mod workspace;

pub use dispatch::{Daemon, DaemonConfig};
pub use error::{CcbError, Result};
pub use types::ActiveSession;
