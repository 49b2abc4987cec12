//! Authoritative in-memory network state.
//!
//! Servers, users and channels as last reported by the uplink, plus the
//! entities we introduced ourselves. All cross references are identifiers
//! (SID, UID, folded channel name) looked up in the store, never direct
//! handles, so cascading deletes cannot dangle.
//!
//! The store is touched only from the single task driving its link, so it
//! is plain owned collections with no interior locking.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::casemap;
use crate::error::StateError;

/// One server on the network, keyed by its 3-character SID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    /// Server name, folded lowercase.
    pub name: String,
    /// Parent SID. `None` for the uplink and for our own root.
    pub parent: Option<String>,
    /// True iff this server was spawned by us.
    pub internal: bool,
    /// UIDs owned by this server.
    pub users: HashSet<String>,
    /// Set while the server is replaying its burst.
    pub bursting: bool,
}

/// One user, keyed by a UID whose first three characters are its owning SID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub nick: String,
    pub ident: String,
    /// Display host.
    pub host: String,
    pub realhost: String,
    pub ip: String,
    /// Realname (GECOS).
    pub realname: String,
    /// Seconds since epoch at introduction.
    pub ts: i64,
    /// User modes; class B/C modes keep their argument.
    pub modes: HashMap<char, Option<String>>,
    /// Out-of-band account flag; gates remote split requests.
    pub identified: bool,
}

impl User {
    pub fn new(uid: &str, nick: &str, ident: &str, host: &str, ts: i64) -> Self {
        User {
            uid: uid.to_string(),
            nick: nick.to_string(),
            ident: ident.to_string(),
            host: host.to_string(),
            realhost: host.to_string(),
            ip: "0.0.0.0".to_string(),
            realname: String::new(),
            ts,
            modes: HashMap::new(),
            identified: false,
        }
    }
}

/// One channel, keyed by its folded name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    /// Member UIDs.
    pub users: HashSet<String>,
    /// Per-member status modes (op, voice, ...).
    pub prefixes: HashMap<String, BTreeSet<char>>,
    /// Channel modes; class B/C modes keep their argument.
    pub modes: HashMap<char, Option<String>>,
    /// List-valued modes (bans, excepts, invex), keyed by letter.
    pub lists: HashMap<char, BTreeSet<String>>,
    pub topic: Option<String>,
    pub ts: i64,
}

impl Channel {
    /// Drop a member and its status modes. Idempotent.
    pub fn remove_user(&mut self, uid: &str) {
        self.users.remove(uid);
        self.prefixes.remove(uid);
    }
}

const UID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const UID_SUFFIX_LEN: usize = 6;

/// TS6-style UID generator: 3-char SID plus a 6-character odometer over
/// `A-Z0-9`, wrapping when the counter space is exhausted. One generator
/// per internal server, otherwise allocations would not wrap correctly.
#[derive(Debug, Clone)]
pub struct UidGenerator {
    sid: String,
    counter: [usize; UID_SUFFIX_LEN],
}

impl UidGenerator {
    pub fn new(sid: &str) -> Self {
        UidGenerator {
            sid: sid.to_string(),
            counter: [0; UID_SUFFIX_LEN],
        }
    }

    /// Allocate the next UID.
    pub fn next_uid(&mut self) -> String {
        let mut uid = String::with_capacity(3 + UID_SUFFIX_LEN);
        uid.push_str(&self.sid);
        for digit in self.counter {
            uid.push(UID_ALPHABET[digit] as char);
        }
        for digit in self.counter.iter_mut().rev() {
            *digit += 1;
            if *digit < UID_ALPHABET.len() {
                break;
            }
            *digit = 0;
        }
        uid
    }
}

/// The per-link network store.
#[derive(Debug, Default)]
pub struct Network {
    pub servers: HashMap<String, Server>,
    pub users: HashMap<String, User>,
    pub channels: HashMap<String, Channel>,
    uidgens: HashMap<String, UidGenerator>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server. The name is folded once here.
    pub fn add_server(&mut self, sid: &str, name: &str, parent: Option<&str>, internal: bool) {
        debug!(%sid, %name, internal, "registering server");
        self.servers.insert(
            sid.to_string(),
            Server {
                name: casemap::to_lower(name),
                parent: parent.map(str::to_string),
                internal,
                users: HashSet::new(),
                bursting: false,
            },
        );
    }

    /// Remove a single server entry. Idempotent at the leaf level; the
    /// session's SQUIT cascade is responsible for children and users.
    pub fn remove_server(&mut self, sid: &str) -> Option<Server> {
        debug!(%sid, "removing server");
        self.servers.remove(sid)
    }

    /// Register a user under its owning server (the first three characters
    /// of the UID).
    pub fn add_user(&mut self, user: User) {
        let sid = owning_sid(&user.uid).to_string();
        if let Some(server) = self.servers.get_mut(&sid) {
            server.users.insert(user.uid.clone());
        }
        self.users.insert(user.uid.clone(), user);
    }

    /// Remove a user from the store, every channel member set, and its
    /// owning server's user set.
    pub fn remove_user(&mut self, uid: &str) -> Option<User> {
        for channel in self.channels.values_mut() {
            channel.remove_user(uid);
        }
        if let Some(server) = self.servers.get_mut(owning_sid(uid)) {
            server.users.remove(uid);
        }
        debug!(%uid, "removing user");
        self.users.remove(uid)
    }

    pub fn get_user(&self, uid: &str) -> Option<&User> {
        self.users.get(uid)
    }

    pub fn get_user_mut(&mut self, uid: &str) -> Option<&mut User> {
        self.users.get_mut(uid)
    }

    /// Case-insensitive nick lookup. Linear over the user table, which is
    /// fine at service scale.
    pub fn nick_to_uid(&self, nick: &str) -> Option<&str> {
        self.users
            .values()
            .find(|u| casemap::eq_ci(&u.nick, nick))
            .map(|u| u.uid.as_str())
    }

    /// Fetch or create a channel by folded name.
    pub fn ensure_channel(&mut self, name: &str) -> &mut Channel {
        self.channels.entry(casemap::to_lower(name)).or_default()
    }

    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&casemap::to_lower(name))
    }

    /// Drop a user from one channel's member set.
    pub fn channel_remove_user(&mut self, name: &str, uid: &str) {
        if let Some(channel) = self.channels.get_mut(&casemap::to_lower(name)) {
            channel.remove_user(uid);
        }
    }

    pub fn is_internal_server(&self, sid: &str) -> bool {
        self.servers.get(sid).is_some_and(|s| s.internal)
    }

    /// If `uid` names one of our pseudoclients, the SID of its owning
    /// internal server.
    pub fn is_internal_client<'a>(&self, uid: &'a str) -> Option<&'a str> {
        let sid = owning_sid(uid);
        (self.users.contains_key(uid) && self.is_internal_server(sid)).then_some(sid)
    }

    /// Allocate a UID from the per-server generator. Only internal servers
    /// introduce users.
    pub fn next_uid(&mut self, sid: &str) -> Result<String, StateError> {
        if !self.is_internal_server(sid) {
            return Err(StateError::NotInternalServer(sid.to_string()));
        }
        let generator = self
            .uidgens
            .entry(sid.to_string())
            .or_insert_with(|| UidGenerator::new(sid));
        Ok(generator.next_uid())
    }

    /// Resolve a server name (folded) to its SID.
    pub fn server_name_to_sid(&self, name: &str) -> Option<&str> {
        let folded = casemap::to_lower(name);
        self.servers
            .iter()
            .find(|(_, s)| s.name == folded)
            .map(|(sid, _)| sid.as_str())
    }
}

/// The owning SID is the first three characters of a UID.
pub fn owning_sid(uid: &str) -> &str {
    &uid[..uid.len().min(3)]
}

/// Nick syntax: leading letter or special, then letters, digits, `-` and
/// specials.
pub fn is_valid_nick(nick: &str) -> bool {
    let special = |c: char| "[]\\`_^{|}".contains(c);
    let mut chars = nick.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || special(c) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || special(c))
}

/// Channel names start with `#`.
pub fn is_valid_channel(name: &str) -> bool {
    name.len() > 1 && name.starts_with('#') && !name.contains([' ', ',', '\x07'])
}

/// Server names are letters, digits, `-` and `.`, with at least one dot.
pub fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name.contains('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Network {
        let mut net = Network::new();
        net.add_server("0AL", "services.example", None, true);
        net.add_server("70M", "uplink.example", None, false);
        net
    }

    #[test]
    fn test_uid_generator_sequence() {
        let mut gen = UidGenerator::new("0AL");
        assert_eq!(gen.next_uid(), "0ALAAAAAA");
        assert_eq!(gen.next_uid(), "0ALAAAAAB");
        for _ in 0..24 {
            gen.next_uid();
        }
        assert_eq!(gen.next_uid(), "0ALAAAAA0");
    }

    #[test]
    fn test_uid_generator_carry_and_wrap() {
        let mut gen = UidGenerator::new("0AL");
        gen.counter = [35, 35, 35, 35, 35, 34];
        assert_eq!(gen.next_uid(), "0AL999998");
        assert_eq!(gen.next_uid(), "0AL999999");
        // Counter space exhausted: wrap back to the start.
        assert_eq!(gen.next_uid(), "0ALAAAAAA");
    }

    #[test]
    fn test_add_user_joins_server_set() {
        let mut net = seeded();
        net.add_user(User::new("70MAAAAAA", "alice", "alice", "host", 100));
        assert!(net.servers["70M"].users.contains("70MAAAAAA"));
        assert_eq!(net.get_user("70MAAAAAA").unwrap().nick, "alice");
    }

    #[test]
    fn test_remove_user_cascades() {
        let mut net = seeded();
        net.add_user(User::new("70MAAAAAA", "alice", "alice", "host", 100));
        let chan = net.ensure_channel("#Chat");
        chan.users.insert("70MAAAAAA".into());
        chan.prefixes
            .entry("70MAAAAAA".into())
            .or_default()
            .insert('o');

        net.remove_user("70MAAAAAA");
        assert!(net.get_user("70MAAAAAA").is_none());
        assert!(!net.channels["#chat"].users.contains("70MAAAAAA"));
        assert!(!net.channels["#chat"].prefixes.contains_key("70MAAAAAA"));
        assert!(!net.servers["70M"].users.contains("70MAAAAAA"));
    }

    #[test]
    fn test_nick_lookup_is_case_insensitive() {
        let mut net = seeded();
        net.add_user(User::new("70MAAAAAA", "Derp[1]", "d", "host", 100));
        assert_eq!(net.nick_to_uid("derp{1}"), Some("70MAAAAAA"));
        assert_eq!(net.nick_to_uid("nobody"), None);
    }

    #[test]
    fn test_internal_lookups() {
        let mut net = seeded();
        net.add_user(User::new("0ALAAAAAA", "svc", "svc", "host", 100));
        net.add_user(User::new("70MAAAAAA", "alice", "alice", "host", 100));
        assert!(net.is_internal_server("0AL"));
        assert!(!net.is_internal_server("70M"));
        assert_eq!(net.is_internal_client("0ALAAAAAA"), Some("0AL"));
        assert_eq!(net.is_internal_client("70MAAAAAA"), None);
    }

    #[test]
    fn test_next_uid_requires_internal_server() {
        let mut net = seeded();
        assert_eq!(net.next_uid("0AL").unwrap(), "0ALAAAAAA");
        assert!(matches!(
            net.next_uid("70M"),
            Err(StateError::NotInternalServer(_))
        ));
    }

    #[test]
    fn test_server_name_to_sid() {
        let net = seeded();
        assert_eq!(net.server_name_to_sid("UPLINK.example"), Some("70M"));
        assert_eq!(net.server_name_to_sid("nope.example"), None);
    }

    #[test]
    fn test_validators() {
        assert!(is_valid_nick("PyLink"));
        assert!(is_valid_nick("[bot]`_"));
        assert!(!is_valid_nick("9abc"));
        assert!(!is_valid_nick(""));
        assert!(is_valid_channel("#chat"));
        assert!(!is_valid_channel("chat"));
        assert!(is_valid_server_name("test.server"));
        assert!(!is_valid_server_name("nodots"));
        assert!(!is_valid_server_name("under_score.net"));
    }
}
