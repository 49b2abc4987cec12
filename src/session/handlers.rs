//! Inbound command handlers.
//!
//! One function per wire command, registered in an explicit table keyed by
//! canonical command name. Each handler mutates state first and then
//! returns the normalized event for the hook bus, so subscribers always
//! observe completed mutations. Handlers tolerate short or odd argument
//! lists by dropping the frame; only `ERROR` and a failed authentication
//! are fatal.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::casemap;
use crate::error::ProtocolError;
use crate::hooks::EventPayload;
use crate::mode::Target;
use crate::state::User;

use super::Session;

pub(crate) type Handler =
    fn(&mut Session, &str, &[String]) -> Result<Option<EventPayload>, ProtocolError>;

/// Build the dispatch table. Populated once per session.
pub(crate) fn table() -> HashMap<&'static str, Handler> {
    let mut table: HashMap<&'static str, Handler> = HashMap::new();
    table.insert("PING", handle_ping);
    table.insert("SERVER", handle_server);
    table.insert("UID", handle_uid);
    table.insert("FJOIN", handle_fjoin);
    table.insert("PART", handle_part);
    table.insert("KICK", handle_kick);
    table.insert("QUIT", handle_quit);
    table.insert("KILL", handle_kill);
    table.insert("NICK", handle_nick);
    table.insert("SAVE", handle_save);
    table.insert("FMODE", handle_fmode);
    table.insert("MODE", handle_mode);
    table.insert("SQUIT", handle_squit);
    table.insert("RSQUIT", handle_rsquit);
    table.insert("IDLE", handle_idle);
    table.insert("ERROR", handle_error);
    table.insert("PRIVMSG", handle_privmsg);
    table.insert("BURST", handle_burst);
    table.insert("ENDBURST", handle_endburst);
    table
}

// <- :70M PING 70M 0AL
// -> :0AL PONG 0AL 70M
fn handle_ping(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(target) = args.get(1) else {
        return Ok(None);
    };
    if session.net.is_internal_server(target) {
        let target = target.clone();
        session.send_from_server(&target, &format!("PONG {} {}", target, source));
    }
    Ok(None)
}

// A nested introduction, relayed by the uplink during or after its burst:
// <- :70M SERVER millennium.overdrive.pw * 1 1ML :a long description
fn handle_server(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 4 {
        return Ok(None);
    }
    session.net.add_server(&args[3], &args[0], Some(source), false);
    Ok(None)
}

// <- :70M UID 70MAAAAAB 1429934638 GL 0::1 hidden-7j810p.IP gl 0::1 1429934638 +Wioswx +ACGKNOQXacfgklnoqvx :realname
fn handle_uid(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 10 {
        debug!("dropping truncated UID");
        return Ok(None);
    }
    let Ok(ts) = args[1].parse::<i64>() else {
        debug!(ts = %args[1], "dropping UID with unparseable TS");
        return Ok(None);
    };
    let (uid, nick, realhost, host, ident, ip) =
        (&args[0], &args[2], &args[3], &args[4], &args[5], &args[6]);

    let mut user = User::new(uid, nick, ident, host, ts);
    user.realhost = realhost.clone();
    user.ip = ip.clone();
    user.realname = args.last().cloned().unwrap_or_default();
    session.net.add_user(user);

    let mode_tokens = [args[8].as_str(), args[9].as_str()];
    let changes = session.parse_modes(Target::User(uid), &mode_tokens);
    debug!(%uid, ?changes, "applying introduction modes");
    session.apply_modes(Target::User(uid), &changes);

    Ok(Some(EventPayload::Uid {
        uid: uid.clone(),
        ts,
        nick: nick.clone(),
        realhost: realhost.clone(),
        host: host.clone(),
        ident: ident.clone(),
        ip: ip.clone(),
    }))
}

// <- :70M FJOIN #chat 1423790411 +AFPfjnt 6:5 7:5 :o,1SRAABIT4 v,1IOAAF53R
// Each member arrives as 'modeprefix(es),UID'.
fn handle_fjoin(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 3 {
        return Ok(None);
    }
    let channel = casemap::to_lower(&args[0]);
    let ts = args[1].parse::<i64>().unwrap_or(0);

    let mode_tokens: Vec<&str> = args[2..args.len() - 1].iter().map(String::as_str).collect();
    let changes = session.parse_modes(Target::Channel(&channel), &mode_tokens);
    session.apply_modes(Target::Channel(&channel), &changes);

    let userlist: Vec<String> = args
        .last()
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let chan = session.net.ensure_channel(&channel);
    if chan.ts == 0 {
        chan.ts = ts;
    }
    let mut users = Vec::new();
    for entry in userlist {
        let Some((prefixes, uid)) = entry.split_once(',') else {
            continue;
        };
        chan.users.insert(uid.to_string());
        for letter in prefixes.chars() {
            chan.prefixes.entry(uid.to_string()).or_default().insert(letter);
        }
        users.push(uid.to_string());
    }

    Ok(Some(EventPayload::Join { channel, users }))
}

fn handle_part(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(channel) = args.first() else {
        return Ok(None);
    };
    let channel = casemap::to_lower(channel);
    session.net.channel_remove_user(&channel, source);
    Ok(Some(EventPayload::Part {
        channel,
        reason: args.get(1).cloned().unwrap_or_default(),
    }))
}

// :70MAAAAAA KICK #endlessvoid 0ALAAAAAA :some reason
// Kicking our pseudoclient does not stick: it rejoins immediately.
fn handle_kick(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 2 {
        return Ok(None);
    }
    let channel = casemap::to_lower(&args[0]);
    let target = args[1].clone();
    session.net.channel_remove_user(&channel, &target);

    if session.pseudoclient.as_deref() == Some(target.as_str()) {
        info!(%channel, "pseudoclient was kicked, rejoining");
        if let Err(err) = session.join_client(&target, &channel) {
            debug!(?err, "failed to rejoin after kick");
        }
    }

    Ok(Some(EventPayload::Kick {
        channel,
        target,
        reason: args.get(2).cloned().unwrap_or_default(),
    }))
}

fn handle_quit(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    session.net.remove_user(source);
    Ok(Some(EventPayload::Quit {
        reason: args.first().cloned().unwrap_or_default(),
    }))
}

fn handle_kill(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(target) = args.first().cloned() else {
        return Ok(None);
    };
    if session.net.remove_user(&target).is_none() {
        return Ok(None);
    }
    if session.pseudoclient_lost() {
        info!(%target, "pseudoclient was killed, respawning");
        session.restore_pseudoclient();
    }
    Ok(Some(EventPayload::Kill {
        target,
        reason: args.get(1).cloned().unwrap_or_default(),
    }))
}

// <- :70MAAAAAA NICK GL-devel 1434744242
fn handle_nick(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(newnick) = args.first() else {
        return Ok(None);
    };
    let Some(user) = session.net.get_user_mut(source) else {
        return Ok(None);
    };
    user.nick = newnick.clone();
    Ok(Some(EventPayload::Nick {
        target: newnick.clone(),
        ts: args.get(1).and_then(|ts| ts.parse().ok()).unwrap_or(0),
    }))
}

// Nick-collision resolution: the collided user's nick becomes its UID.
// <- :70M SAVE 0AL000001 1433728673
fn handle_save(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(target) = args.first().cloned() else {
        return Ok(None);
    };
    let Some(user) = session.net.get_user_mut(&target) else {
        return Ok(None);
    };
    user.nick = target.clone();
    Ok(Some(EventPayload::Nick {
        target,
        ts: args.get(1).and_then(|ts| ts.parse().ok()).unwrap_or(0),
    }))
}

// <- :70MAAAAAA FMODE #chat 1433653462 +hhT 70MAAAAAA 70MAAAAAD
fn handle_fmode(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 3 {
        return Ok(None);
    }
    let channel = casemap::to_lower(&args[0]);
    let tokens: Vec<&str> = args[2..].iter().map(String::as_str).collect();
    let changes = session.parse_modes(Target::Channel(&channel), &tokens);
    session.apply_modes(Target::Channel(&channel), &changes);
    Ok(Some(EventPayload::Mode {
        target: channel,
        modes: changes,
    }))
}

// MODE carries user modes in this dialect; channel modes travel as FMODE.
// <- :70MAAAAAA MODE 70MAAAAAA -i+xc
fn handle_mode(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 2 {
        return Ok(None);
    }
    let target = args[0].clone();
    let tokens: Vec<&str> = args[1..].iter().map(String::as_str).collect();
    let changes = session.parse_modes(Target::User(&target), &tokens);
    session.apply_modes(Target::User(&target), &changes);
    Ok(Some(EventPayload::Mode {
        target,
        modes: changes,
    }))
}

// :70M SQUIT 1ML :Server quit by GL!gl@0::1
fn handle_squit(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(target) = args.first().cloned() else {
        return Ok(None);
    };
    info!(server = %target, "netsplit");
    session.squit_server(&target);
    if session.pseudoclient_lost() {
        info!("pseudoclient lost to netsplit, respawning");
        session.restore_pseudoclient();
    }
    Ok(Some(EventPayload::Squit { target }))
}

// Oper-initiated remote split, by server name rather than SID. Only acted
// on when it names one of our own pseudo-servers and the sender is
// identified with us.
// <- :1MLAAAAIG RSQUIT ayy.lmao :some reason
fn handle_rsquit(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(named) = args.first() else {
        return Ok(None);
    };
    let target = match session.net.server_name_to_sid(named) {
        Some(sid) => sid.to_string(),
        None => named.clone(),
    };
    if !session.net.is_internal_server(&target) {
        return Ok(None);
    }

    let identified = session
        .net
        .get_user(source)
        .is_some_and(|user| user.identified);
    if !identified {
        let text = "Error: you are not authorized to split servers!".to_string();
        if let Some(pseudoclient) = session.pseudoclient.clone() {
            let _ = session.notice(&pseudoclient, source, &text);
        }
        return Ok(None);
    }

    let requester = session
        .net
        .get_user(source)
        .map(|user| user.nick.clone())
        .unwrap_or_else(|| source.to_string());
    let reason = format!("Requested by {}", requester);
    let parent = session
        .net
        .servers
        .get(&target)
        .and_then(|server| server.parent.clone())
        .unwrap_or_else(|| session.config.sid.clone());
    session.send_from_server(&parent, &format!("SQUIT {} :{}", target, reason));
    session.squit_server(&target);
    Ok(Some(EventPayload::Squit { target }))
}

// Remote WHOIS idle query; answered on behalf of the queried client.
// <- :70MAAAAAA IDLE 1MLAAAAIG
// -> :1MLAAAAIG IDLE 70MAAAAAA 1433036797 0
fn handle_idle(
    session: &mut Session,
    source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    let Some(target) = args.first() else {
        return Ok(None);
    };
    let Some(ts) = session.net.get_user(target).map(|user| user.ts) else {
        return Ok(None);
    };
    let target = target.clone();
    session.send_from_user(&target, &format!("IDLE {} {} 0", source, ts));
    Ok(None)
}

fn handle_error(
    session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    session.state = super::LinkState::Closed;
    Err(ProtocolError::PeerError(
        args.first().cloned().unwrap_or_default(),
    ))
}

fn handle_privmsg(
    _session: &mut Session,
    _source: &str,
    args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if args.len() < 2 {
        return Ok(None);
    }
    Ok(Some(EventPayload::Privmsg {
        target: args[0].clone(),
        text: args[1].clone(),
    }))
}

// <- :70M BURST 1433044587
fn handle_burst(
    session: &mut Session,
    source: &str,
    _args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if let Some(server) = session.net.servers.get_mut(source) {
        server.bursting = true;
    }
    Ok(None)
}

// The uplink's ENDBURST completes the handshake.
fn handle_endburst(
    session: &mut Session,
    source: &str,
    _args: &[String],
) -> Result<Option<EventPayload>, ProtocolError> {
    if let Some(server) = session.net.servers.get_mut(source) {
        server.bursting = false;
    }
    if session.uplink.as_deref() == Some(source) {
        session.state = super::LinkState::Linked;
        info!("uplink burst complete, link established");
    }
    Ok(None)
}
