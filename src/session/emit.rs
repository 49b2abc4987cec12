//! Outbound command emission.
//!
//! Everything we put on the wire goes through these emitters. Each one
//! validates that the acting entity is ours, emits the line, and eagerly
//! applies the same change to local state so queries observe it before
//! any echo from the uplink.

use tracing::{debug, info};

use crate::casemap;
use crate::error::StateError;
use crate::mode::{self, ModeChange, Target};
use crate::state::{is_valid_channel, is_valid_nick, is_valid_server_name, User};

use super::{Session, SERVICE_GECOS};

/// Which client field an `update_client` call rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    /// Display host (`CHGHOST`).
    Host,
    /// Ident (`CHGIDENT`).
    Ident,
    /// Realname / GECOS (`CHGNAME`).
    Name,
}

impl Session {
    pub(crate) fn send_from_server(&mut self, sid: &str, msg: &str) {
        self.send(format!(":{} {}", sid, msg));
    }

    pub(crate) fn send_from_user(&mut self, uid: &str, msg: &str) {
        self.send(format!(":{} {}", uid, msg));
    }

    fn require_internal_client(&self, uid: &str) -> Result<String, StateError> {
        self.net
            .is_internal_client(uid)
            .map(str::to_string)
            .ok_or_else(|| StateError::NotInternalClient(uid.to_string()))
    }

    /// Introduce a new pseudoclient on one of our servers (the root by
    /// default) and register it locally. Returns the allocated UID.
    pub fn spawn_client(
        &mut self,
        nick: &str,
        ident: &str,
        host: &str,
        modes: &[ModeChange],
        server: Option<&str>,
    ) -> Result<String, StateError> {
        let sid = server.unwrap_or(&self.config.sid).to_string();
        if !self.net.is_internal_server(&sid) {
            return Err(StateError::NotInternalServer(sid));
        }
        if !is_valid_nick(nick) {
            return Err(StateError::InvalidNick(nick.to_string()));
        }

        let uid = self.net.next_uid(&sid)?;
        let ts = self.now_ts();
        let joined = mode::join_modes(modes);
        self.send_from_server(
            &sid,
            &format!(
                "UID {uid} {ts} {nick} {host} {host} {ident} 0.0.0.0 {ts} {joined} + :{gecos}",
                uid = uid,
                ts = ts,
                nick = nick,
                host = host,
                ident = ident,
                joined = joined,
                gecos = SERVICE_GECOS,
            ),
        );

        let mut user = User::new(&uid, nick, ident, host, ts);
        user.realname = SERVICE_GECOS.to_string();
        self.net.add_user(user);
        self.apply_modes(Target::User(&uid), modes);
        info!(%uid, %nick, %sid, "spawned pseudoclient");
        Ok(uid)
    }

    /// Introduce a pseudo-server under one of ours (the root by default).
    pub fn spawn_server(
        &mut self,
        name: &str,
        sid: &str,
        parent: Option<&str>,
        desc: &str,
    ) -> Result<(), StateError> {
        let name = casemap::to_lower(name);
        let parent = parent.unwrap_or(&self.config.sid).to_string();
        if sid.len() != 3 {
            return Err(StateError::InvalidSid(sid.to_string()));
        }
        if self.net.servers.contains_key(sid) {
            return Err(StateError::DuplicateSid(sid.to_string()));
        }
        if self.net.servers.values().any(|server| server.name == name) {
            return Err(StateError::DuplicateServerName(name));
        }
        if !self.net.is_internal_server(&parent) {
            return Err(StateError::NotInternalServer(parent));
        }
        if !is_valid_server_name(&name) {
            return Err(StateError::InvalidServerName(name));
        }

        self.send_from_server(&parent, &format!("SERVER {} * 1 {} :{}", name, sid, desc));
        self.send_from_server(sid, "ENDBURST");
        self.net.add_server(sid, &name, Some(&parent), true);
        info!(%sid, %name, %parent, "spawned pseudo-server");
        Ok(())
    }

    /// Allocate a free SID for a spawned server, in the `9..` range so it
    /// stays clear of configured identifiers.
    pub fn allocate_sid(&self) -> Option<String> {
        const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        for hi in ALPHABET {
            for lo in ALPHABET {
                let candidate = format!("9{}{}", *hi as char, *lo as char);
                if !self.net.servers.contains_key(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Join one of our pseudoclients to a channel. One channel per line.
    pub fn join_client(&mut self, uid: &str, channel: &str) -> Result<(), StateError> {
        let channel = casemap::to_lower(channel);
        let sid = self.require_internal_client(uid)?;
        if !is_valid_channel(&channel) {
            return Err(StateError::InvalidChannel(channel));
        }
        let ts = self.now_ts();
        self.send_from_server(&sid, &format!("FJOIN {} {} + :,{}", channel, ts, uid));
        let chan = self.net.ensure_channel(&channel);
        if chan.ts == 0 {
            chan.ts = ts;
        }
        chan.users.insert(uid.to_string());
        Ok(())
    }

    pub fn part_client(
        &mut self,
        uid: &str,
        channel: &str,
        reason: Option<&str>,
    ) -> Result<(), StateError> {
        let channel = casemap::to_lower(channel);
        self.require_internal_client(uid)?;
        if !is_valid_channel(&channel) {
            return Err(StateError::InvalidChannel(channel));
        }
        let msg = match reason {
            Some(reason) => format!("PART {} :{}", channel, reason),
            None => format!("PART {}", channel),
        };
        self.send_from_user(uid, &msg);
        self.net.channel_remove_user(&channel, uid);
        Ok(())
    }

    /// Kick a user as one of our pseudoclients. Locally the target just
    /// leaves the member set, same as a part.
    pub fn kick_client(
        &mut self,
        kicker: &str,
        channel: &str,
        target: &str,
        reason: Option<&str>,
    ) -> Result<(), StateError> {
        let channel = casemap::to_lower(channel);
        self.require_internal_client(kicker)?;
        let reason = reason.unwrap_or("No reason given");
        self.send_from_user(kicker, &format!("KICK {} {} :{}", channel, target, reason));
        self.net.channel_remove_user(&channel, target);
        Ok(())
    }

    /// Quit and deregister one of our pseudoclients.
    pub fn quit_client(&mut self, uid: &str, reason: &str) -> Result<(), StateError> {
        self.require_internal_client(uid)?;
        self.send_from_user(uid, &format!("QUIT :{}", reason));
        self.net.remove_user(uid);
        Ok(())
    }

    /// Change a pseudoclient's nick.
    pub fn nick_client(&mut self, uid: &str, newnick: &str) -> Result<(), StateError> {
        self.require_internal_client(uid)?;
        if !is_valid_nick(newnick) {
            return Err(StateError::InvalidNick(newnick.to_string()));
        }
        let ts = self.now_ts();
        self.send_from_user(uid, &format!("NICK {} {}", newnick, ts));
        if let Some(user) = self.net.get_user_mut(uid) {
            user.nick = newnick.to_string();
        }
        Ok(())
    }

    /// Kill a user from one of our entities (client or server source).
    pub fn kill(&mut self, source: &str, target: &str, reason: &str) -> Result<(), StateError> {
        let internal = self.net.is_internal_server(source)
            || self.net.is_internal_client(source).is_some();
        if !internal {
            return Err(StateError::NotInternalClient(source.to_string()));
        }
        if self.net.get_user(target).is_none() {
            return Err(StateError::UnknownUser(target.to_string()));
        }
        self.send(format!(":{} KILL {} :{}", source, target, reason));
        self.net.remove_user(target);
        Ok(())
    }

    /// Set a channel topic as one of our pseudoclients.
    pub fn topic(&mut self, source: &str, channel: &str, text: &str) -> Result<(), StateError> {
        let channel = casemap::to_lower(channel);
        self.require_internal_client(source)?;
        if self.net.get_channel(&channel).is_none() {
            return Err(StateError::UnknownChannel(channel));
        }
        self.send_from_user(source, &format!("TOPIC {} :{}", channel, text));
        self.net.ensure_channel(&channel).topic = Some(text.to_string());
        Ok(())
    }

    /// Set modes from one of our entities. Channel changes travel as
    /// `FMODE` with the channel's TS, user changes as `MODE`.
    pub fn mode(
        &mut self,
        source: &str,
        target: Target<'_>,
        changes: &[ModeChange],
    ) -> Result<(), StateError> {
        let internal = self.net.is_internal_server(source)
            || self.net.is_internal_client(source).is_some();
        if !internal {
            return Err(StateError::NotInternalClient(source.to_string()));
        }
        let joined = mode::join_modes(changes);
        match target {
            Target::Channel(name) => {
                let name = casemap::to_lower(name);
                let ts = self
                    .net
                    .get_channel(&name)
                    .map(|chan| chan.ts)
                    .filter(|ts| *ts != 0)
                    .unwrap_or_else(|| self.now_ts());
                self.send(format!(":{} FMODE {} {} {}", source, name, ts, joined));
                self.apply_modes(Target::Channel(&name), changes);
            }
            Target::User(uid) => {
                if self.net.get_user(uid).is_none() {
                    return Err(StateError::UnknownUser(uid.to_string()));
                }
                self.send(format!(":{} MODE {} {}", source, uid, joined));
                self.apply_modes(Target::User(uid), changes);
            }
        }
        Ok(())
    }

    /// Rewrite a user's visible host, ident or realname, from our root
    /// server. Works on any known user, ours or not; services get to do
    /// that.
    pub fn update_client(
        &mut self,
        uid: &str,
        field: UpdateField,
        value: &str,
    ) -> Result<(), StateError> {
        let sid = self.config.sid.clone();
        let Some(user) = self.net.get_user_mut(uid) else {
            return Err(StateError::UnknownUser(uid.to_string()));
        };
        match field {
            UpdateField::Host => user.host = value.to_string(),
            UpdateField::Ident => user.ident = value.to_string(),
            UpdateField::Name => user.realname = value.to_string(),
        }
        match field {
            UpdateField::Host => {
                self.send_from_server(&sid, &format!("CHGHOST {} {}", uid, value))
            }
            UpdateField::Ident => {
                self.send_from_server(&sid, &format!("CHGIDENT {} {}", uid, value))
            }
            UpdateField::Name => {
                self.send_from_server(&sid, &format!("CHGNAME {} :{}", uid, value))
            }
        }
        debug!(%uid, ?field, %value, "updated client field");
        Ok(())
    }

    /// NOTICE from one of our pseudoclients.
    pub fn notice(&mut self, source: &str, target: &str, text: &str) -> Result<(), StateError> {
        self.require_internal_client(source)?;
        self.send_from_user(source, &format!("NOTICE {} :{}", target, text));
        Ok(())
    }

    /// PRIVMSG from one of our pseudoclients.
    pub fn privmsg(&mut self, source: &str, target: &str, text: &str) -> Result<(), StateError> {
        self.require_internal_client(source)?;
        self.send_from_user(source, &format!("PRIVMSG {} :{}", target, text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn started() -> Session {
        let config = Config::parse(
            r#"
            hostname = "services.example"
            sendpass = "outgoing"
            recvpass = "incoming"
            sid = "0AL"
        "#,
        )
        .unwrap();
        let mut session = Session::new(config);
        session.start().unwrap();
        session.drain_outbox();
        session
    }

    #[test]
    fn test_spawn_client_wire_format() {
        let mut session = started();
        let uid = session
            .spawn_client("ModeBot", "modes", "services.example", &[], None)
            .unwrap();
        let out = session.drain_outbox();
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with(&format!(":0AL UID {} ", uid)));
        assert!(out[0].contains(" ModeBot services.example services.example modes 0.0.0.0 "));
        assert!(out[0].ends_with(" + + :PyLink Client"));
        assert_eq!(session.net.get_user(&uid).unwrap().nick, "ModeBot");
    }

    #[test]
    fn test_spawn_client_validates() {
        let mut session = started();
        assert!(matches!(
            session.spawn_client("1bad", "x", "h.example", &[], None),
            Err(StateError::InvalidNick(_))
        ));
        assert!(matches!(
            session.spawn_client("ok", "x", "h.example", &[], Some("70M")),
            Err(StateError::NotInternalServer(_))
        ));
    }

    #[test]
    fn test_spawn_server_validates_and_emits() {
        let mut session = started();
        session
            .spawn_server("jupe.example", "9ZZ", None, "juped")
            .unwrap();
        let out = session.drain_outbox();
        assert_eq!(out[0], ":0AL SERVER jupe.example * 1 9ZZ :juped");
        assert_eq!(out[1], ":9ZZ ENDBURST");
        assert!(session.net.is_internal_server("9ZZ"));

        assert!(matches!(
            session.spawn_server("other.example", "9ZZ", None, "dup"),
            Err(StateError::DuplicateSid(_))
        ));
        assert!(matches!(
            session.spawn_server("jupe.example", "9ZY", None, "dup"),
            Err(StateError::DuplicateServerName(_))
        ));
        assert!(matches!(
            session.spawn_server("nodots", "9ZX", None, "bad"),
            Err(StateError::InvalidServerName(_))
        ));
        assert!(matches!(
            session.spawn_server("x.example", "TOOLONG", None, "bad"),
            Err(StateError::InvalidSid(_))
        ));
    }

    #[test]
    fn test_join_and_part_update_state() {
        let mut session = started();
        let uid = session.pseudoclient.clone().unwrap();
        session.join_client(&uid, "#Chat").unwrap();
        assert!(session.net.get_channel("#chat").unwrap().users.contains(&uid));
        let out = session.drain_outbox();
        assert!(out[0].starts_with(":0AL FJOIN #chat "));
        assert!(out[0].ends_with(&format!("+ :,{}", uid)));

        session.part_client(&uid, "#chat", Some("done")).unwrap();
        assert!(!session.net.get_channel("#chat").unwrap().users.contains(&uid));
        let out = session.drain_outbox();
        assert_eq!(out[0], format!(":{} PART #chat :done", uid));
    }

    #[test]
    fn test_kill_requires_known_target() {
        let mut session = started();
        let uid = session.pseudoclient.clone().unwrap();
        assert!(matches!(
            session.kill(&uid, "70MAAAAAA", "gone"),
            Err(StateError::UnknownUser(_))
        ));
    }

    #[test]
    fn test_update_client_eagerly_mutates() {
        let mut session = started();
        let uid = session.pseudoclient.clone().unwrap();
        session
            .update_client(&uid, UpdateField::Host, "cloak.example")
            .unwrap();
        assert_eq!(session.net.get_user(&uid).unwrap().host, "cloak.example");
        let out = session.drain_outbox();
        assert_eq!(out[0], format!(":0AL CHGHOST {} cloak.example", uid));
    }

    #[test]
    fn test_allocate_sid_skips_taken() {
        let mut session = started();
        session
            .spawn_server("a.example", "900", None, "first")
            .unwrap();
        assert_eq!(session.allocate_sid().as_deref(), Some("901"));
    }
}
