//! The hook bus: normalized events out, plugin subscribers in.
//!
//! Every inbound command that carries information for plugins produces one
//! [`Event`], published in wire order. Subscribers register under the
//! canonical event name; a small rewrite table maps dialect-specific wire
//! names (`FJOIN`, `SAVE`, `RSQUIT`, `FMODE`) onto the generic ones so
//! plugins stay dialect-agnostic.
//!
//! A faulting subscriber must not take the link down: panics are caught,
//! logged with their payload, and dispatch continues with the next
//! subscriber.
//!
//! The bus also owns the bot-command registry dispatched from `PRIVMSG`
//! lines addressed to the default pseudoclient.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::mode::ModeChange;
use crate::session::Session;

/// A normalized event published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Originating SID or UID.
    pub source: String,
    /// The wire command (or plugin-chosen name) that produced this event.
    pub command: String,
    pub payload: EventPayload,
}

impl Event {
    /// Build a plugin-originated event for [`Session::call_hooks`].
    pub fn custom(source: &str, name: &str, fields: Vec<(String, String)>) -> Self {
        Event {
            source: source.to_string(),
            command: name.to_string(),
            payload: EventPayload::Custom { fields },
        }
    }
}

/// Parsed fields of an event, one variant per command shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Uid {
        uid: String,
        ts: i64,
        nick: String,
        realhost: String,
        host: String,
        ident: String,
        ip: String,
    },
    Join {
        channel: String,
        users: Vec<String>,
    },
    Part {
        channel: String,
        reason: String,
    },
    Kick {
        channel: String,
        target: String,
        reason: String,
    },
    Quit {
        reason: String,
    },
    Kill {
        target: String,
        reason: String,
    },
    Nick {
        target: String,
        ts: i64,
    },
    Mode {
        target: String,
        modes: Vec<ModeChange>,
    },
    Squit {
        target: String,
    },
    Privmsg {
        target: String,
        text: String,
    },
    /// Plugin-defined event with free-form fields.
    Custom {
        fields: Vec<(String, String)>,
    },
}

/// Rewrite dialect-specific wire names to canonical event names.
pub fn canonical_name(command: &str) -> &str {
    match command {
        "FJOIN" => "JOIN",
        "SAVE" => "NICK",
        "RSQUIT" => "SQUIT",
        "FMODE" => "MODE",
        other => other,
    }
}

/// A hook subscriber.
pub type HookFn = Box<dyn Fn(&mut Session, &Event) + Send>;

/// A bot command. An `Err` is reported back to the invoking user as a
/// NOTICE and logged locally.
pub type CommandFn = Box<dyn Fn(&mut Session, &str, &[String]) -> Result<(), String> + Send>;

/// Permission check seam: `(session, invoking UID, permission name)`.
/// The real decision belongs to an external permissions collaborator;
/// [`default_permissions`] gates on the user's `identified` flag.
pub type PermissionFn = Arc<dyn Fn(&Session, &str, &str) -> bool + Send + Sync>;

/// Grant every permission to identified users, nothing to anyone else.
pub fn default_permissions() -> PermissionFn {
    Arc::new(|session, uid, _perm| {
        session.net.get_user(uid).is_some_and(|user| user.identified)
    })
}

/// Registry of hook subscribers and bot commands.
///
/// Registration happens once, before the first line is fed; dispatch is
/// read-only over the registries.
#[derive(Default)]
pub struct HookBus {
    hooks: HashMap<String, Vec<HookFn>>,
    commands: HashMap<String, CommandFn>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a canonical event name (`JOIN`, `NICK`, `SQUIT`, ...).
    pub fn subscribe<F>(&mut self, command: &str, hook: F)
    where
        F: Fn(&mut Session, &Event) + Send + 'static,
    {
        self.hooks
            .entry(command.to_ascii_uppercase())
            .or_default()
            .push(Box::new(hook));
    }

    /// Register a bot command verb.
    pub fn add_command<F>(&mut self, verb: &str, command: F)
    where
        F: Fn(&mut Session, &str, &[String]) -> Result<(), String> + Send + 'static,
    {
        self.commands
            .insert(verb.to_ascii_lowercase(), Box::new(command));
    }

    /// Publish an event to its subscribers, in registration order.
    pub fn dispatch(&self, session: &mut Session, event: &Event) {
        let name = canonical_name(&event.command);
        let Some(subscribers) = self.hooks.get(name) else {
            return;
        };
        debug!(command = %event.command, hook = %name, "dispatching event");
        for subscriber in subscribers {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber(session, event)));
            if let Err(payload) = outcome {
                error!(
                    hook = %name,
                    panic = %panic_message(&payload),
                    "hook subscriber panicked; continuing with next subscriber"
                );
            }
        }
    }

    /// Dispatch a `PRIVMSG` text sent to the pseudoclient as a bot
    /// command. Replies go back to `source` as NOTICEs.
    pub fn dispatch_command(&self, session: &mut Session, source: &str, text: &str) {
        let mut words = text.split_whitespace();
        let Some(verb) = words.next() else { return };
        let verb = verb.to_ascii_lowercase();
        let args: Vec<String> = words.map(str::to_string).collect();

        let Some(command) = self.commands.get(&verb) else {
            reply(session, source, &format!("Unknown command '{}'.", verb));
            return;
        };

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| command(session, source, &args)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                error!(%verb, %message, "bot command failed");
                reply(session, source, &format!("Error: {}", message));
            }
            Err(payload) => {
                let message = panic_message(&payload);
                error!(%verb, panic = %message, "bot command panicked");
                reply(
                    session,
                    source,
                    &format!("Uncaught panic in command '{}': {}", verb, message),
                );
            }
        }
    }
}

fn reply(session: &mut Session, target: &str, text: &str) {
    let Some(pseudoclient) = session.pseudoclient.clone() else {
        return;
    };
    if let Err(err) = session.notice(&pseudoclient, target, text) {
        debug!(?err, "failed to deliver bot reply");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_rewrites() {
        assert_eq!(canonical_name("FJOIN"), "JOIN");
        assert_eq!(canonical_name("SAVE"), "NICK");
        assert_eq!(canonical_name("RSQUIT"), "SQUIT");
        assert_eq!(canonical_name("FMODE"), "MODE");
        assert_eq!(canonical_name("QUIT"), "QUIT");
    }

    #[test]
    fn test_custom_event() {
        let event = Event::custom(
            "0ALAAAAAA",
            "OPERCMDS_SPAWNSERVER",
            vec![("name".into(), "jupe.example".into())],
        );
        assert_eq!(event.command, "OPERCMDS_SPAWNSERVER");
        assert!(matches!(event.payload, EventPayload::Custom { .. }));
    }
}
