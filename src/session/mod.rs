//! The protocol engine: handshake, dispatch, and outbound emission.
//!
//! A [`Session`] is sans-IO: it consumes parsed frames and queues outbound
//! lines on an internal outbox. The caller (the [`Link`](crate::link::Link)
//! feed loop, or a test) decides when to flush. No network calls, no
//! timers, pure state transitions.
//!
//! One session serves one remote link and exclusively owns that link's
//! network state. Handlers run to completion between frames; there is
//! nothing to lock.

mod emit;
mod handlers;

pub use emit::UpdateField;

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ProtocolError, StateError};
use crate::frame::Frame;
use crate::hooks::{Event, EventPayload};
use crate::mode::{self, ModeChange, Target};
use crate::state::Network;
use crate::caps::ModeTable;

use handlers::Handler;

/// Protocol version announced in `CAPAB START`.
pub const PROTOCOL_VERSION: &str = "1202";

/// Identity of the default pseudoclient and of our server introduction.
/// These strings are wire-visible and fixed by the dialect's conventions.
pub const SERVICE_NICK: &str = "PyLink";
pub const SERVICE_IDENT: &str = "pylink";
pub const SERVICE_DESC: &str = "PyLink Service";
pub const SERVICE_GECOS: &str = "PyLink Client";

/// Handshake and link lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    /// Our `CAPAB` block is out; ingesting the peer's.
    CapabNegotiation,
    /// The peer has authenticated with its `SERVER` introduction.
    AuthPending,
    /// Burst in flight (ours is sent eagerly; the uplink's is replaying).
    Bursting,
    /// The uplink finished its burst; normal operation.
    Linked,
    /// Terminated by `ERROR`, authentication failure, or connection loss.
    Closed,
}

/// Per-link protocol engine and state owner.
pub struct Session {
    pub config: Config,
    pub state: LinkState,
    /// Network state exclusively owned by this session.
    pub net: Network,
    /// Mode vocabulary learned from the uplink's `CAPAB` exchange.
    pub modes: ModeTable,
    /// SID of the authenticated uplink, once its `SERVER` arrives.
    pub uplink: Option<String>,
    /// UID of the default pseudoclient, once spawned.
    pub pseudoclient: Option<String>,
    /// TS at which this link was started.
    pub start_ts: i64,
    outbox: VecDeque<String>,
    pending_hooks: VecDeque<Event>,
    handlers: HashMap<&'static str, Handler>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Session {
            config,
            state: LinkState::Disconnected,
            net: Network::new(),
            modes: ModeTable::new(),
            uplink: None,
            pseudoclient: None,
            start_ts: 0,
            outbox: VecDeque::new(),
            pending_hooks: VecDeque::new(),
            handlers: handlers::table(),
        }
    }

    /// Current wall-clock TS, in the wire's unit.
    pub(crate) fn now_ts(&self) -> i64 {
        Utc::now().timestamp()
    }

    /// Run the bring-up sequence: capability advertisement, our `SERVER`
    /// introduction, our burst (one pseudoclient plus the configured
    /// channels), and the closing `ENDBURST`.
    pub fn start(&mut self) -> Result<(), StateError> {
        let ts = self.now_ts();
        self.start_ts = ts;
        let sid = self.config.sid.clone();
        let hostname = self.config.hostname.clone();

        self.net.add_server(&sid, &hostname, None, true);

        self.send(format!("CAPAB START {}", PROTOCOL_VERSION));
        self.send(format!("CAPAB CAPABILITIES :PROTOCOL={}", PROTOCOL_VERSION));
        self.send("CAPAB END".to_string());
        self.state = LinkState::CapabNegotiation;

        self.send(format!(
            "SERVER {} {} 0 {} :{}",
            hostname, self.config.sendpass, sid, SERVICE_DESC
        ));
        self.send_from_server(&sid, &format!("BURST {}", ts));
        let uid = self.spawn_client(
            SERVICE_NICK,
            SERVICE_IDENT,
            &hostname,
            &[ModeChange::plus('o', None)],
            None,
        )?;
        self.pseudoclient = Some(uid.clone());
        self.send_from_server(&sid, "ENDBURST");
        for channel in self.config.channels.clone() {
            self.join_client(&uid, &channel)?;
        }
        self.state = LinkState::Bursting;
        info!(%sid, %hostname, "link bring-up sent, bursting");
        Ok(())
    }

    /// Handle one parsed frame. Returns the normalized event to publish,
    /// if the command produced one. Unknown commands are ignored.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Option<Event>, ProtocolError> {
        // Pre-authentication traffic arrives unprefixed: the peer's SERVER
        // introduction and its CAPAB exchange.
        if frame.source.is_none() {
            match frame.command.as_str() {
                "SERVER" => return self.authenticate_uplink(&frame.args).map(|_| None),
                "CAPAB" => {
                    self.ingest_capab(&frame.args);
                    return Ok(None);
                }
                _ => {}
            }
        }

        let source = match &frame.source {
            Some(source) => source.clone(),
            // Unprefixed post-auth traffic speaks for the uplink itself.
            None => match &self.uplink {
                Some(uplink) => uplink.clone(),
                None => {
                    debug!(command = %frame.command, "dropping unsourced frame before auth");
                    return Ok(None);
                }
            },
        };

        let Some(handler) = self.handlers.get(frame.command.as_str()).copied() else {
            debug!(command = %frame.command, "ignoring unknown command");
            return Ok(None);
        };

        let payload = handler(self, &source, &frame.args)?;
        Ok(payload.map(|payload| Event {
            source,
            command: frame.command.clone(),
            payload,
        }))
    }

    /// Top-level `SERVER`: the uplink authenticating to us.
    fn authenticate_uplink(&mut self, args: &[String]) -> Result<(), ProtocolError> {
        if args.len() < 4 {
            debug!("dropping truncated SERVER introduction");
            return Ok(());
        }
        let (name, recvpass, sid) = (&args[0], &args[1], &args[3]);
        if recvpass != &self.config.recvpass {
            self.state = LinkState::Closed;
            return Err(ProtocolError::BadReceivePassword {
                server: name.clone(),
            });
        }
        self.net.add_server(sid, name, None, false);
        self.uplink = Some(sid.clone());
        self.state = LinkState::AuthPending;
        info!(%sid, %name, "uplink authenticated");
        Ok(())
    }

    /// `CAPAB <subcommand> :<tokens...>` — the mode vocabulary and limits.
    fn ingest_capab(&mut self, args: &[String]) {
        let Some(subcommand) = args.first() else {
            return;
        };
        let tokens: Vec<&str> = args[1..]
            .iter()
            .flat_map(|arg| arg.split_whitespace())
            .collect();
        self.modes.ingest_capab(subcommand, &tokens);
    }

    /// Parse mode tokens against this link's learned vocabulary.
    pub fn parse_modes(&self, target: Target<'_>, tokens: &[&str]) -> Vec<ModeChange> {
        mode::parse_modes(&self.modes, &self.net, target, tokens)
    }

    pub(crate) fn apply_modes(&mut self, target: Target<'_>, changes: &[ModeChange]) {
        mode::apply_modes(&self.modes, &mut self.net, target, changes);
    }

    /// Depth-first SQUIT cascade. Children split before their parent so no
    /// server ever outlives its uplink; iteration works on snapshots
    /// because the live tables shrink underneath it.
    pub(crate) fn squit_server(&mut self, sid: &str) {
        let children: Vec<String> = self
            .net
            .servers
            .iter()
            .filter(|(_, server)| server.parent.as_deref() == Some(sid))
            .map(|(child, _)| child.clone())
            .collect();
        for child in &children {
            debug!(parent = %sid, %child, "splitting leaf server");
            self.squit_server(child);
        }

        let users: Vec<String> = self
            .net
            .servers
            .get(sid)
            .map(|server| server.users.iter().cloned().collect())
            .unwrap_or_default();
        for uid in users {
            self.net.remove_user(&uid);
        }
        self.net.remove_server(sid);
    }

    /// Spawn (or re-spawn) the default pseudoclient and join it to the
    /// configured channels.
    pub(crate) fn respawn_pseudoclient(&mut self) -> Result<(), StateError> {
        let hostname = self.config.hostname.clone();
        let uid = self.spawn_client(
            SERVICE_NICK,
            SERVICE_IDENT,
            &hostname,
            &[ModeChange::plus('o', None)],
            None,
        )?;
        self.pseudoclient = Some(uid.clone());
        for channel in self.config.channels.clone() {
            self.join_client(&uid, &channel)?;
        }
        Ok(())
    }

    /// Whether the default pseudoclient is gone from the store and needs
    /// respawning (it was killed, or its server was split).
    pub(crate) fn pseudoclient_lost(&self) -> bool {
        match &self.pseudoclient {
            Some(uid) => self.net.get_user(uid).is_none(),
            None => false,
        }
    }

    pub(crate) fn restore_pseudoclient(&mut self) {
        if !self.net.is_internal_server(&self.config.sid) {
            warn!("root pseudo-server is gone; cannot respawn pseudoclient");
            return;
        }
        if let Err(err) = self.respawn_pseudoclient() {
            warn!(?err, "failed to respawn pseudoclient");
        }
    }

    /// Queue a plugin-originated event for publication after the current
    /// dispatch completes. Subscribers never re-enter the bus.
    pub fn call_hooks(&mut self, event: Event) {
        self.pending_hooks.push_back(event);
    }

    pub(crate) fn take_pending_hook(&mut self) -> Option<Event> {
        self.pending_hooks.pop_front()
    }

    /// Queue a raw line for the transport.
    pub(crate) fn send(&mut self, line: String) {
        debug!(line = %line, "queueing outbound");
        self.outbox.push_back(line);
    }

    /// Drain all queued outbound lines, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<String> {
        self.outbox.drain(..).collect()
    }

    /// The event payload shape for a PRIVMSG addressed to the default
    /// pseudoclient, which the feed loop routes into the bot registry.
    pub(crate) fn is_bot_privmsg(&self, payload: &EventPayload) -> bool {
        matches!(
            payload,
            EventPayload::Privmsg { target, .. }
                if self.pseudoclient.as_deref() == Some(target.as_str())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::parse(
            r##"
            hostname = "services.example"
            sendpass = "outgoing"
            recvpass = "incoming"
            sid = "0AL"
            channels = ["#services"]
        "##,
        )
        .unwrap()
    }

    fn feed(session: &mut Session, line: &str) -> Option<Event> {
        session
            .handle_frame(&Frame::parse(line).unwrap())
            .expect("frame handled")
    }

    #[test]
    fn test_start_emits_handshake_in_order() {
        let mut session = Session::new(test_config());
        session.start().unwrap();
        let out = session.drain_outbox();

        assert_eq!(out[0], "CAPAB START 1202");
        assert_eq!(out[1], "CAPAB CAPABILITIES :PROTOCOL=1202");
        assert_eq!(out[2], "CAPAB END");
        assert!(out[3].starts_with("SERVER services.example outgoing 0 0AL :PyLink Service"));
        assert!(out[4].starts_with(":0AL BURST "));
        assert!(out[5].starts_with(":0AL UID 0ALAAAAAA "));
        assert_eq!(out[6], ":0AL ENDBURST");
        assert!(out[7].contains("FJOIN #services"));
        assert_eq!(session.state, LinkState::Bursting);
        assert_eq!(session.pseudoclient.as_deref(), Some("0ALAAAAAA"));
    }

    #[test]
    fn test_uplink_authentication() {
        let mut session = Session::new(test_config());
        session.start().unwrap();
        let event = feed(&mut session, "SERVER uplink.example incoming 0 70M :desc");
        assert!(event.is_none());
        assert_eq!(session.uplink.as_deref(), Some("70M"));
        assert_eq!(session.state, LinkState::AuthPending);
        assert!(!session.net.is_internal_server("70M"));
    }

    #[test]
    fn test_bad_recvpass_is_fatal() {
        let mut session = Session::new(test_config());
        session.start().unwrap();
        session.drain_outbox();
        let err = session
            .handle_frame(&Frame::parse("SERVER uplink.example wrongpass 0 70M :desc").unwrap())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::BadReceivePassword { .. }));
        assert_eq!(session.state, LinkState::Closed);
        assert!(session.drain_outbox().is_empty());
    }

    #[test]
    fn test_endburst_links() {
        let mut session = Session::new(test_config());
        session.start().unwrap();
        feed(&mut session, "SERVER uplink.example incoming 0 70M :desc");
        feed(&mut session, ":70M BURST 1433044587");
        assert!(session.net.servers["70M"].bursting);
        feed(&mut session, ":70M ENDBURST");
        assert_eq!(session.state, LinkState::Linked);
        assert!(!session.net.servers["70M"].bursting);
    }

    #[test]
    fn test_unknown_command_ignored() {
        let mut session = Session::new(test_config());
        session.start().unwrap();
        feed(&mut session, "SERVER uplink.example incoming 0 70M :desc");
        assert!(feed(&mut session, ":70M FROBNICATE a b c").is_none());
    }
}
