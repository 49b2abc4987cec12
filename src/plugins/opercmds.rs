//! Network management bot commands.
//!
//! Each verb is gated by a named `opercmds.<verb>` permission through the
//! injected permission checker, acts as the default pseudoclient, and
//! acknowledges with `Done.`. Replies travel as NOTICEs back to the
//! invoking user.

use crate::hooks::{Event, HookBus, PermissionFn};
use crate::hostmask::match_host;
use crate::mode::Target;
use crate::session::Session;
use crate::state::{is_valid_server_name, owning_sid};

/// Hard ceiling for `checkban --maxresults`; anything larger could flood
/// the client or the server off.
const CHECKBAN_MAX_RESULTS: usize = 200;

const BOLD: &str = "\x02";

/// Register every operator command on the bus.
pub fn register(bus: &mut HookBus, perms: PermissionFn) {
    {
        let perms = perms.clone();
        bus.add_command("checkban", move |session, source, args| {
            check(&perms, session, source, "opercmds.checkban")?;
            checkban(session, source, args)
        });
    }
    {
        let perms = perms.clone();
        bus.add_command("jupe", move |session, source, args| {
            check(&perms, session, source, "opercmds.jupe")?;
            jupe(session, source, args)
        });
    }
    {
        let perms = perms.clone();
        bus.add_command("kick", move |session, source, args| {
            check(&perms, session, source, "opercmds.kick")?;
            kick(session, source, args)
        });
    }
    {
        let perms = perms.clone();
        bus.add_command("kill", move |session, source, args| {
            check(&perms, session, source, "opercmds.kill")?;
            kill(session, source, args)
        });
    }
    {
        let perms = perms.clone();
        bus.add_command("mode", move |session, source, args| {
            check(&perms, session, source, "opercmds.mode")?;
            mode(session, source, args)
        });
    }
    {
        let perms = perms.clone();
        bus.add_command("topic", move |session, source, args| {
            check(&perms, session, source, "opercmds.topic")?;
            topic(session, source, args)
        });
    }
    for field in [
        crate::session::UpdateField::Host,
        crate::session::UpdateField::Ident,
        crate::session::UpdateField::Name,
    ] {
        let perms = perms.clone();
        let (verb, perm, human) = match field {
            crate::session::UpdateField::Host => ("chghost", "opercmds.chghost", "host"),
            crate::session::UpdateField::Ident => ("chgident", "opercmds.chgident", "ident"),
            crate::session::UpdateField::Name => ("chgname", "opercmds.chgname", "GECOS"),
        };
        bus.add_command(verb, move |session, source, args| {
            check(&perms, session, source, perm)?;
            chgfield(session, source, args, field, human)
        });
    }
}

fn check(
    perms: &PermissionFn,
    session: &Session,
    source: &str,
    perm: &str,
) -> Result<(), String> {
    if (**perms)(session, source, perm) {
        Ok(())
    } else {
        Err(format!("You are missing the permission '{}'.", perm))
    }
}

fn reply(session: &mut Session, target: &str, text: &str) -> Result<(), String> {
    let pseudoclient = session
        .pseudoclient
        .clone()
        .ok_or("the service client is not online")?;
    session
        .notice(&pseudoclient, target, text)
        .map_err(|err| err.to_string())
}

fn service_uid(session: &Session) -> Result<String, String> {
    session
        .pseudoclient
        .clone()
        .ok_or_else(|| "the service client is not online".to_string())
}

struct CheckbanArgs {
    banmask: String,
    target: String,
    channel: String,
    maxresults: usize,
}

fn parse_checkban_args(args: &[String]) -> Result<CheckbanArgs, String> {
    let mut banmask = None;
    let mut target = None;
    let mut channel = String::new();
    let mut maxresults = 50usize;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--channel" => {
                channel = iter
                    .next()
                    .ok_or("--channel requires a channel name")?
                    .clone();
            }
            "--maxresults" => {
                let value = iter.next().ok_or("--maxresults requires a number")?;
                maxresults = value.parse().map_err(|_| {
                    format!(
                        "{} is not a positive integer between 1 and {}.",
                        value, CHECKBAN_MAX_RESULTS
                    )
                })?;
                if maxresults == 0 || maxresults > CHECKBAN_MAX_RESULTS {
                    return Err(format!(
                        "{} is not a positive integer between 1 and {}.",
                        value, CHECKBAN_MAX_RESULTS
                    ));
                }
            }
            _ if banmask.is_none() => banmask = Some(arg.clone()),
            _ if target.is_none() => target = Some(arg.clone()),
            _ => return Err(format!("unexpected argument {:?}", arg)),
        }
    }

    Ok(CheckbanArgs {
        banmask: banmask.ok_or("Not enough arguments. Needs 1-2: banmask, target (optional).")?,
        target: target.unwrap_or_default(),
        channel,
        maxresults,
    })
}

/// `checkban <banmask> [<target>] [--channel #chan] [--maxresults <num>]`
///
/// Without a target, lists connected users the mask would affect, capped
/// at `maxresults` lines. With one, answers whether the mask matches it.
fn checkban(session: &mut Session, source: &str, args: &[String]) -> Result<(), String> {
    let mut parsed = parse_checkban_args(args)?;

    if parsed.target.is_empty() {
        // The --channel flag is convenience sugar over the $and/$channel
        // extended targets.
        if !parsed.channel.is_empty() {
            parsed.banmask = format!("$and:({}+$channel:{})", parsed.banmask, parsed.channel);
        }

        reply(
            session,
            source,
            &format!(
                "Checking for hosts that match {b}{}{b}:",
                parsed.banmask,
                b = BOLD
            ),
        )?;

        let mut shown = Vec::new();
        let mut results = 0usize;
        for (uid, user) in &session.net.users {
            if !match_host(&session.net, &parsed.banmask, uid) {
                continue;
            }
            if results < parsed.maxresults {
                let server = session
                    .net
                    .servers
                    .get(owning_sid(uid))
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                shown.push(format!(
                    "{b}{}{b} ({}@{}) [{}] {{{b}{}{b}}}",
                    user.nick,
                    user.ident,
                    user.host,
                    user.realname,
                    server,
                    b = BOLD
                ));
            }
            results += 1;
        }
        for line in shown {
            reply(session, source, &line)?;
        }

        if results > 0 {
            reply(
                session,
                source,
                &format!(
                    "{b}{}{b} out of {b}{}{b} results shown.",
                    results.min(parsed.maxresults),
                    results,
                    b = BOLD
                ),
            )?;
        } else {
            reply(session, source, "No results found.")?;
        }
    } else if match_host(&session.net, &parsed.banmask, &parsed.target) {
        reply(
            session,
            source,
            &format!(
                "Yes, {b}{}{b} matches {b}{}{b}.",
                parsed.target,
                parsed.banmask,
                b = BOLD
            ),
        )?;
    } else {
        reply(
            session,
            source,
            &format!(
                "No, {b}{}{b} does not match {b}{}{b}.",
                parsed.target,
                parsed.banmask,
                b = BOLD
            ),
        )?;
    }
    Ok(())
}

/// `jupe <server> [<reason>]` — occupy a server name with a pseudo-server.
fn jupe(session: &mut Session, source: &str, args: &[String]) -> Result<(), String> {
    let servername = args
        .first()
        .ok_or("Not enough arguments. Needs 1-2: servername, reason (optional).")?
        .clone();
    let reason = if args.len() > 1 {
        args[1..].join(" ")
    } else {
        "No reason given".to_string()
    };

    if !is_valid_server_name(&servername) {
        return Err(format!("Invalid server name {:?}.", servername));
    }

    let requester = session
        .net
        .get_user(source)
        .map(|u| u.nick.clone())
        .unwrap_or_else(|| source.to_string());
    let desc = format!("Juped by {}: [{}]", requester, reason);

    let sid = session
        .allocate_sid()
        .ok_or("no free SID available for the jupe server")?;
    session
        .spawn_server(&servername, &sid, None, &desc)
        .map_err(|err| err.to_string())?;

    let service = service_uid(session)?;
    session.call_hooks(Event::custom(
        &service,
        "OPERCMDS_SPAWNSERVER",
        vec![
            ("name".into(), servername),
            ("sid".into(), sid),
            ("text".into(), desc),
        ],
    ));
    reply(session, source, "Done.")
}

/// `kick <channel> <user> [<reason>]`
fn kick(session: &mut Session, source: &str, args: &[String]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("Not enough arguments. Needs 2-3: channel, target, reason (optional).".into());
    }
    let channel = args[0].clone();
    let reason = args[2..].join(" ");

    if session.net.get_channel(&channel).is_none() {
        return Err(format!("Unknown channel {:?}.", channel));
    }
    let target = resolve_user(session, &args[1])
        .ok_or_else(|| format!("No such target nick {:?}.", args[1]))?;

    let service = service_uid(session)?;
    session
        .kick_client(&service, &channel, &target, some_nonempty(&reason))
        .map_err(|err| err.to_string())?;
    reply(session, source, "Done.")?;
    session.call_hooks(Event::custom(
        &service,
        "CHANCMDS_KICK",
        vec![
            ("channel".into(), channel),
            ("target".into(), target),
            ("text".into(), reason),
        ],
    ));
    Ok(())
}

/// `kill <target> [<reason>]`
fn kill(session: &mut Session, source: &str, args: &[String]) -> Result<(), String> {
    let target = args
        .first()
        .ok_or("Not enough arguments. Needs 1-2: target, reason (optional).")?;
    let reason = args[1..].join(" ");

    let target =
        resolve_user(session, target).ok_or_else(|| format!("No such nick {:?}.", target))?;

    let service = service_uid(session)?;
    let service_nick = session
        .net
        .get_user(&service)
        .map(|u| u.nick.clone())
        .unwrap_or_default();
    session
        .kill(&service, &target, &reason)
        .map_err(|err| err.to_string())?;
    reply(session, source, "Done.")?;
    session.call_hooks(Event::custom(
        &service,
        "CHANCMDS_KILL",
        vec![
            ("target".into(), target),
            ("text".into(), format!("Killed ({} ({}))", service_nick, reason)),
        ],
    ));
    Ok(())
}

/// `mode <channel> <modes...>`
fn mode(session: &mut Session, source: &str, args: &[String]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("Not enough arguments. Needs 2: target, modes to set.".into());
    }
    let channel = args[0].clone();
    if session.net.get_channel(&channel).is_none() {
        return Err(format!("Unknown channel {:?}.", channel));
    }

    let tokens: Vec<&str> = args[1..].iter().map(String::as_str).collect();
    let changes = session.parse_modes(Target::Channel(&channel), &tokens);
    if changes.is_empty() {
        // Modes were given but none parsed into anything meaningful, e.g.
        // "+o" with no argument.
        return Err("No valid modes were given.".into());
    }

    let service = service_uid(session)?;
    session
        .mode(&service, Target::Channel(&channel), &changes)
        .map_err(|err| err.to_string())?;
    session.call_hooks(Event::custom(
        &service,
        "OPERCMDS_MODEOVERRIDE",
        vec![
            ("target".into(), channel),
            ("modes".into(), crate::mode::join_modes(&changes)),
        ],
    ));
    reply(session, source, "Done.")
}

/// `topic <channel> <topic...>`
fn topic(session: &mut Session, source: &str, args: &[String]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("Not enough arguments. Needs 2: channel, topic.".into());
    }
    let channel = args[0].clone();
    let text = args[1..].join(" ");

    if session.net.get_channel(&channel).is_none() {
        return Err(format!("Unknown channel {:?}.", channel));
    }

    let service = service_uid(session)?;
    session
        .topic(&service, &channel, &text)
        .map_err(|err| err.to_string())?;
    reply(session, source, "Done.")?;
    session.call_hooks(Event::custom(
        &service,
        "CHANCMDS_TOPIC",
        vec![
            ("channel".into(), channel),
            ("text".into(), text),
            ("setter".into(), source.to_string()),
        ],
    ));
    Ok(())
}

/// Shared body of `chghost` / `chgident` / `chgname`.
fn chgfield(
    session: &mut Session,
    source: &str,
    args: &[String],
    field: crate::session::UpdateField,
    human: &str,
) -> Result<(), String> {
    if args.len() < 2 {
        return Err(format!(
            "Not enough arguments. Needs 2: target, new {}.",
            human
        ));
    }
    let target = resolve_user(session, &args[0])
        .ok_or_else(|| format!("No such nick {:?}.", args[0]))?;
    session
        .update_client(&target, field, &args[1])
        .map_err(|err| err.to_string())?;
    reply(session, source, "Done.")
}

/// Accept a UID directly or resolve a nick.
fn resolve_user(session: &Session, target: &str) -> Option<String> {
    if session.net.users.contains_key(target) {
        return Some(target.to_string());
    }
    session.net.nick_to_uid(target).map(str::to_string)
}

fn some_nonempty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}
