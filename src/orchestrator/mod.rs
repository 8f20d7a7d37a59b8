//! Run lifecycle orchestration.
//!
//! This module owns the run/stop protocol and its transcript (`controller`),
//! keeps the local phase honest against the server (`reconciler`), and maps
//! UI commands onto both (`session`). Presentation layers only call into here.

mod controller;
mod reconciler;
#[cfg_attr(not(feature = "tui"), allow(dead_code))]
mod session;
mod state;

pub(crate) use controller::spawn_controller;
pub(crate) use reconciler::spawn_status_reconciler;
#[cfg(feature = "tui")]
pub(crate) use session::{run_session, SessionNotice, UiCommand};
#[cfg(feature = "tui")]
pub(crate) use state::RunState;
