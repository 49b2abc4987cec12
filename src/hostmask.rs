//! Hostmask matching.
//!
//! Plain `nick!user@host` masks with `*`/`?` wildcards, matched under
//! RFC1459 folding against a user's display host, real host and IP, plus
//! the composable extended targets used by the ban checker:
//!
//! - `$channel:#chan` — matches members of the channel;
//! - `$and:(mask+$channel:#chan)` — every `+`-separated clause matches.

use crate::casemap;
use crate::state::Network;

/// Glob match with `*` (any run) and `?` (any one character), folded
/// case-insensitively on both sides.
pub fn wildcard_match(mask: &str, text: &str) -> bool {
    let mask: Vec<char> = casemap::to_lower(mask).chars().collect();
    let text: Vec<char> = casemap::to_lower(text).chars().collect();

    let (mut m, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if m < mask.len() && (mask[m] == '?' || mask[m] == text[t]) {
            m += 1;
            t += 1;
        } else if m < mask.len() && mask[m] == '*' {
            star = Some((m, t));
            m += 1;
        } else if let Some((sm, st)) = star {
            m = sm + 1;
            t = st + 1;
            star = Some((sm, st + 1));
        } else {
            return false;
        }
    }
    while m < mask.len() && mask[m] == '*' {
        m += 1;
    }
    m == mask.len()
}

/// Fill in the omitted parts of a bare mask: `user@host` gains a `*!`
/// nick part, a lone nick gains `!*@*`.
fn normalize_mask(mask: &str) -> String {
    if mask.contains('!') {
        mask.to_string()
    } else if mask.contains('@') {
        format!("*!{}", mask)
    } else {
        format!("{}!*@*", mask)
    }
}

/// Resolve a target (UID, nick, or literal hostmask) and test it against
/// a mask or extended target.
pub fn match_host(net: &Network, mask: &str, target: &str) -> bool {
    if let Some(rest) = mask.strip_prefix('$') {
        return match_extended(net, rest, target);
    }

    let uid = if net.users.contains_key(target) {
        Some(target)
    } else {
        net.nick_to_uid(target)
    };

    let mask = normalize_mask(mask);
    match uid {
        Some(uid) => {
            let Some(user) = net.get_user(uid) else {
                return false;
            };
            [&user.host, &user.realhost, &user.ip].iter().any(|host| {
                wildcard_match(&mask, &format!("{}!{}@{}", user.nick, user.ident, host))
            })
        }
        // Not a known user: treat the target as a literal hostmask.
        None => wildcard_match(&mask, target),
    }
}

fn match_extended(net: &Network, exttarget: &str, target: &str) -> bool {
    if let Some(channel) = exttarget.strip_prefix("channel:") {
        let uid = if net.users.contains_key(target) {
            Some(target)
        } else {
            net.nick_to_uid(target)
        };
        let Some(uid) = uid else { return false };
        return net
            .get_channel(channel)
            .is_some_and(|chan| chan.users.contains(uid));
    }
    if let Some(inner) = exttarget
        .strip_prefix("and:(")
        .and_then(|s| s.strip_suffix(')'))
    {
        return inner
            .split('+')
            .all(|clause| match_host(net, clause, target));
    }
    false
}
