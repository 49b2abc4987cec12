//! Per-link composition: one session, one hook bus, one feed loop.
//!
//! The transport (or a test) pushes raw lines in here. Each line is
//! parsed, handled, and its normalized event published — in that order,
//! so subscribers always observe completed state mutations, and events
//! reach them in exact wire order.

use tracing::debug;

use crate::config::Config;
use crate::error::{ProtocolError, StateError};
use crate::frame::Frame;
use crate::hooks::{Event, HookBus};
use crate::session::Session;

/// One remote link: protocol session plus its subscriber registries.
pub struct Link {
    pub session: Session,
    pub hooks: HookBus,
}

impl Link {
    pub fn new(config: Config) -> Self {
        Link {
            session: Session::new(config),
            hooks: HookBus::new(),
        }
    }

    /// Run the bring-up sequence (see [`Session::start`]).
    pub fn start(&mut self) -> Result<(), StateError> {
        self.session.start()
    }

    /// Feed one raw wire line through parse, dispatch and publication.
    ///
    /// Malformed frames are dropped here; an `Err` means the link is dead
    /// (authentication failure or peer `ERROR`).
    pub fn feed_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let frame = match Frame::parse(line) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(?err, line, "dropping malformed frame");
                return Ok(());
            }
        };

        if let Some(event) = self.session.handle_frame(&frame)? {
            if self.session.is_bot_privmsg(&event.payload) {
                if let crate::hooks::EventPayload::Privmsg { text, .. } = &event.payload {
                    self.hooks
                        .dispatch_command(&mut self.session, &event.source, text);
                }
            }
            self.hooks.dispatch(&mut self.session, &event);
        }

        // Events queued by plugins during dispatch publish now, still in
        // order, without re-entering the bus.
        while let Some(event) = self.session.take_pending_hook() {
            self.hooks.dispatch(&mut self.session, &event);
        }
        Ok(())
    }

    /// Publish a plugin-originated event immediately.
    pub fn call_hooks(&mut self, event: Event) {
        self.hooks.dispatch(&mut self.session, &event);
        while let Some(event) = self.session.take_pending_hook() {
            self.hooks.dispatch(&mut self.session, &event);
        }
    }

    /// Drain queued outbound lines for the transport.
    pub fn drain_outbox(&mut self) -> Vec<String> {
        self.session.drain_outbox()
    }
}
