//! # slirc-services
//!
//! A Rust library for running IRC services against an InspIRCd-compatible
//! network, speaking the 1202 server-to-server dialect as a pseudo-server.
//!
//! ## Features
//!
//! - Line framing and parsing of the S2S wire dialect
//! - CAPAB handshake with capability and mode-vocabulary ingestion
//! - Authoritative tracking of servers, users and channels with modes
//! - Mode parsing over the peer-announced A/B/C/D class tables
//! - Pseudoclient and pseudo-server introduction, with auto-respawn
//! - A hook bus publishing normalized events to fault-isolated plugins
//! - Optional Tokio integration for async line transport
//!
//! ## Quick Start
//!
//! ```no_run
//! use slirc_services::config::Config;
//! use slirc_services::hooks::default_permissions;
//! use slirc_services::link::Link;
//! use slirc_services::plugins::opercmds;
//!
//! let config = Config::parse(r##"
//!     hostname = "services.example"
//!     sendpass = "sendpass"
//!     recvpass = "recvpass"
//!     sid = "0AL"
//!     channels = ["#services"]
//! "##).expect("valid config");
//!
//! let mut link = Link::new(config);
//! opercmds::register(&mut link.hooks, default_permissions());
//! link.hooks.subscribe("JOIN", |_session, event| {
//!     println!("join event: {:?}", event.payload);
//! });
//!
//! link.start().expect("bring-up");
//! for line in link.drain_outbox() {
//!     // hand to the transport
//!     let _ = line;
//! }
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod caps;
pub mod casemap;
pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod hostmask;
pub mod link;
pub mod mode;
pub mod plugins;
pub mod session;
pub mod state;

#[cfg(feature = "tokio")]
pub mod transport;

pub use self::caps::{ClassSplit, ModeClass, ModeTable, PrefixSpec};
pub use self::config::Config;
pub use self::error::{FrameError, ProtocolError, Result, StateError};
pub use self::frame::Frame;
pub use self::hooks::{Event, EventPayload, HookBus};
pub use self::link::Link;
pub use self::mode::{ModeChange, Sign, Target};
pub use self::session::{LinkState, Session, UpdateField};
pub use self::state::{Network, Server, User};

#[cfg(feature = "tokio")]
pub use self::transport::{run_link, LineCodec, MAX_LINE_LEN};
