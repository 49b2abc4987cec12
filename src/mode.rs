//! Mode parsing and application over the learned vocabulary.
//!
//! Nothing in this module knows any mode letter by name. Argument arity
//! comes from the [`ModeTable`](crate::caps::ModeTable) announced by the
//! uplink at handshake: list and key modes always consume an argument,
//! set-only modes consume one when setting, flags never do, and prefix
//! modes consume a member argument that is resolved nick-to-UID when
//! possible. A letter whose required argument is missing is discarded
//! rather than failing the whole string.

use std::fmt;

use tracing::debug;

use crate::caps::{ModeClass, ModeTable};
use crate::state::Network;

/// Mode change direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sign::Plus => "+",
            Sign::Minus => "-",
        })
    }
}

/// One parsed mode change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub sign: Sign,
    pub letter: char,
    pub arg: Option<String>,
}

impl ModeChange {
    pub fn plus(letter: char, arg: Option<&str>) -> Self {
        ModeChange {
            sign: Sign::Plus,
            letter,
            arg: arg.map(str::to_string),
        }
    }

    pub fn minus(letter: char, arg: Option<&str>) -> Self {
        ModeChange {
            sign: Sign::Minus,
            letter,
            arg: arg.map(str::to_string),
        }
    }
}

/// What a mode string applies to. Selects the user or channel class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    User(&'a str),
    Channel(&'a str),
}

impl Target<'_> {
    fn is_channel(&self) -> bool {
        matches!(self, Target::Channel(_))
    }
}

/// Parse mode tokens (`["+ovk-l", "alice", "bob", "secret"]`) into changes
/// in input order.
pub fn parse_modes(
    table: &ModeTable,
    net: &Network,
    target: Target<'_>,
    tokens: &[&str],
) -> Vec<ModeChange> {
    let Some((letters, args)) = tokens.split_first() else {
        return Vec::new();
    };
    let mut args = args.iter();
    let mut sign = Sign::Plus;
    let mut changes = Vec::new();

    for letter in letters.chars() {
        match letter {
            '+' => sign = Sign::Plus,
            '-' => sign = Sign::Minus,
            _ => {
                let class = table.classify(target.is_channel(), letter);
                let wants_arg = match class {
                    ModeClass::List | ModeClass::AlwaysArg | ModeClass::Prefix => true,
                    ModeClass::SetArg => sign == Sign::Plus,
                    ModeClass::Flag => false,
                };
                let arg = if wants_arg {
                    match args.next() {
                        Some(arg) => Some(*arg),
                        None => {
                            debug!(%letter, "dropping mode letter with missing argument");
                            continue;
                        }
                    }
                } else {
                    None
                };

                // Prefix-mode arguments name a member; accept a UID as-is
                // and fall back to nick resolution.
                let arg = match (class, arg) {
                    (ModeClass::Prefix, Some(arg)) if !net.users.contains_key(arg) => {
                        Some(net.nick_to_uid(arg).unwrap_or(arg).to_string())
                    }
                    (_, arg) => arg.map(str::to_string),
                };

                changes.push(ModeChange { sign, letter, arg });
            }
        }
    }

    changes
}

/// Apply parsed changes to the target's mode state.
///
/// List modes keep a set of arguments (duplicate adds are no-ops), prefix
/// modes update the channel's per-member status sets, and everything else
/// lands in the flat mode map.
pub fn apply_modes(
    table: &ModeTable,
    net: &mut Network,
    target: Target<'_>,
    changes: &[ModeChange],
) {
    match target {
        Target::Channel(name) => {
            let channel_target = true;
            let channel = net.ensure_channel(name);
            for change in changes {
                match table.classify(channel_target, change.letter) {
                    ModeClass::Prefix => {
                        let Some(member) = &change.arg else { continue };
                        match change.sign {
                            Sign::Plus => {
                                channel
                                    .prefixes
                                    .entry(member.clone())
                                    .or_default()
                                    .insert(change.letter);
                            }
                            Sign::Minus => {
                                if let Some(prefixes) = channel.prefixes.get_mut(member) {
                                    prefixes.remove(&change.letter);
                                    if prefixes.is_empty() {
                                        channel.prefixes.remove(member);
                                    }
                                }
                            }
                        }
                    }
                    ModeClass::List => {
                        let Some(arg) = &change.arg else { continue };
                        let list = channel.lists.entry(change.letter).or_default();
                        match change.sign {
                            Sign::Plus => {
                                list.insert(arg.clone());
                            }
                            Sign::Minus => {
                                list.remove(arg);
                            }
                        }
                    }
                    _ => match change.sign {
                        Sign::Plus => {
                            channel.modes.insert(change.letter, change.arg.clone());
                        }
                        Sign::Minus => {
                            channel.modes.remove(&change.letter);
                        }
                    },
                }
            }
        }
        Target::User(uid) => {
            let Some(user) = net.get_user_mut(uid) else {
                debug!(%uid, "mode change for unknown user");
                return;
            };
            for change in changes {
                match change.sign {
                    Sign::Plus => {
                        user.modes.insert(change.letter, change.arg.clone());
                    }
                    Sign::Minus => {
                        user.modes.remove(&change.letter);
                    }
                }
            }
        }
    }
}

/// Serialize changes back to wire form: a signed letter run followed by
/// the arguments in order. An empty change set collapses to `+`.
pub fn join_modes(changes: &[ModeChange]) -> String {
    if changes.is_empty() {
        return "+".to_string();
    }
    let mut letters = String::new();
    let mut args = Vec::new();
    let mut current: Option<Sign> = None;
    for change in changes {
        if current != Some(change.sign) {
            letters.push(match change.sign {
                Sign::Plus => '+',
                Sign::Minus => '-',
            });
            current = Some(change.sign);
        }
        letters.push(change.letter);
        if let Some(arg) = &change.arg {
            args.push(arg.as_str());
        }
    }
    if args.is_empty() {
        letters
    } else {
        format!("{} {}", letters, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::User;

    fn fixtures() -> (ModeTable, Network) {
        let mut table = ModeTable::new();
        table.ingest_capab(
            "CAPABILITIES",
            &[
                "CHANMODES=Ibe,k,l,mnt",
                "USERMODES=,,s,iow",
                "PREFIX=(ov)@+",
            ],
        );
        let mut net = Network::new();
        net.add_server("70M", "uplink.example", None, false);
        net.add_user(User::new("70MAAAAAA", "alice", "alice", "host", 1));
        net.add_user(User::new("70MAAAAAB", "bob", "bob", "host", 2));
        (table, net)
    }

    #[test]
    fn test_parse_arity_per_class() {
        let (table, net) = fixtures();
        let changes = parse_modes(
            &table,
            &net,
            Target::Channel("#chat"),
            &["+ovk-l", "alice", "bob", "secret"],
        );
        assert_eq!(
            changes,
            vec![
                ModeChange::plus('o', Some("70MAAAAAA")),
                ModeChange::plus('v', Some("70MAAAAAB")),
                ModeChange::plus('k', Some("secret")),
                ModeChange::minus('l', None),
            ]
        );
    }

    #[test]
    fn test_parse_default_sign_is_plus() {
        let (table, net) = fixtures();
        let changes = parse_modes(&table, &net, Target::Channel("#chat"), &["nt"]);
        assert_eq!(
            changes,
            vec![ModeChange::plus('n', None), ModeChange::plus('t', None)]
        );
    }

    #[test]
    fn test_parse_discards_letter_missing_arg() {
        let (table, net) = fixtures();
        // +k requires an argument; none is left after +o consumes "alice".
        let changes = parse_modes(&table, &net, Target::Channel("#chat"), &["+ok", "alice"]);
        assert_eq!(changes, vec![ModeChange::plus('o', Some("70MAAAAAA"))]);
    }

    #[test]
    fn test_parse_list_mode_consumes_on_unset() {
        let (table, net) = fixtures();
        let changes = parse_modes(
            &table,
            &net,
            Target::Channel("#chat"),
            &["-b", "*!*@evil.example"],
        );
        assert_eq!(changes, vec![ModeChange::minus('b', Some("*!*@evil.example"))]);
    }

    #[test]
    fn test_parse_unresolvable_prefix_arg_kept_verbatim() {
        let (table, net) = fixtures();
        let changes = parse_modes(&table, &net, Target::Channel("#chat"), &["+o", "ghost"]);
        assert_eq!(changes, vec![ModeChange::plus('o', Some("ghost"))]);
    }

    #[test]
    fn test_apply_channel_modes() {
        let (table, mut net) = fixtures();
        let changes = vec![
            ModeChange::plus('n', None),
            ModeChange::plus('t', None),
            ModeChange::plus('k', Some("secret")),
            ModeChange::plus('o', Some("70MAAAAAA")),
            ModeChange::plus('b', Some("*!*@evil.example")),
        ];
        apply_modes(&table, &mut net, Target::Channel("#chat"), &changes);

        let chan = net.get_channel("#chat").unwrap();
        assert!(chan.modes.contains_key(&'n'));
        assert_eq!(chan.modes[&'k'], Some("secret".to_string()));
        assert!(chan.prefixes["70MAAAAAA"].contains(&'o'));
        assert!(chan.lists[&'b'].contains("*!*@evil.example"));
    }

    #[test]
    fn test_apply_unset_and_duplicates() {
        let (table, mut net) = fixtures();
        apply_modes(
            &table,
            &mut net,
            Target::Channel("#chat"),
            &[
                ModeChange::plus('b', Some("mask")),
                ModeChange::plus('b', Some("mask")),
                ModeChange::plus('o', Some("70MAAAAAA")),
            ],
        );
        assert_eq!(net.get_channel("#chat").unwrap().lists[&'b'].len(), 1);

        apply_modes(
            &table,
            &mut net,
            Target::Channel("#chat"),
            &[
                ModeChange::minus('b', Some("mask")),
                ModeChange::minus('o', Some("70MAAAAAA")),
            ],
        );
        let chan = net.get_channel("#chat").unwrap();
        assert!(chan.lists[&'b'].is_empty());
        assert!(!chan.prefixes.contains_key("70MAAAAAA"));
    }

    #[test]
    fn test_apply_user_modes() {
        let (table, mut net) = fixtures();
        let changes = parse_modes(&table, &net, Target::User("70MAAAAAA"), &["-i+xc"]);
        apply_modes(&table, &mut net, Target::User("70MAAAAAA"), &changes);
        let user = net.get_user("70MAAAAAA").unwrap();
        assert!(user.modes.contains_key(&'x'));
        assert!(user.modes.contains_key(&'c'));
        assert!(!user.modes.contains_key(&'i'));
    }

    #[test]
    fn test_join_modes() {
        assert_eq!(join_modes(&[]), "+");
        assert_eq!(join_modes(&[ModeChange::plus('o', None)]), "+o");
        assert_eq!(
            join_modes(&[
                ModeChange::plus('o', Some("70MAAAAAA")),
                ModeChange::plus('v', Some("70MAAAAAB")),
                ModeChange::minus('k', Some("secret")),
            ]),
            "+ov-k 70MAAAAAA 70MAAAAAB secret"
        );
    }
}
