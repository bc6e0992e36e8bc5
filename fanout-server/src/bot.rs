//! Server-side bot commands invoked with the `@server` prefix.

use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::{
    envelope::strip_prefix_ignore_case,
    registry::{ANONYMOUS, SessionId},
};

pub const BOT_COMMAND_PREFIX: &str = "@server";

/// Read-only server state handed to a command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub admin_identity: Option<String>,
    pub started_at: DateTime<Utc>,
    pub active_users: Vec<String>,
}

pub trait BotCommand: Send + Sync {
    /// Invocation token, matched case-insensitively.
    fn name(&self) -> &str;

    fn execute(
        &self,
        session: SessionId,
        identity: &str,
        args: &[&str],
        snapshot: &ServerSnapshot,
    ) -> Result<String>;
}

struct FnCommand<F> {
    name: String,
    handler: F,
}

impl<F> BotCommand for FnCommand<F>
where
    F: Fn(SessionId, &str, &[&str], &ServerSnapshot) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        session: SessionId,
        identity: &str,
        args: &[&str],
        snapshot: &ServerSnapshot,
    ) -> Result<String> {
        (self.handler)(session, identity, args, snapshot)
    }
}

/// Name-keyed command table. Filled once before the router is built.
#[derive(Default)]
pub struct BotDispatcher {
    commands: BTreeMap<String, Box<dyn BotCommand>>,
}

impl BotDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher preloaded with `info`, `status` and `who`.
    pub fn with_builtin_commands() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(InfoCommand);
        dispatcher.register(StatusCommand);
        dispatcher.register(WhoCommand);
        dispatcher
    }

    pub fn register(&mut self, command: impl BotCommand + 'static) {
        let name = command.name().to_lowercase();
        if self.commands.insert(name.clone(), Box::new(command)).is_some() {
            info!(command = %name, "replaced bot command");
        } else {
            debug!(command = %name, "registered bot command");
        }
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(SessionId, &str, &[&str], &ServerSnapshot) -> Result<String> + Send + Sync + 'static,
    {
        self.register(FnCommand {
            name: name.into(),
            handler,
        });
    }

    pub fn command_names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn is_command(&self, text: &str) -> bool {
        strip_prefix_ignore_case(text.trim(), BOT_COMMAND_PREFIX).is_some()
    }

    /// Runs the command named in `text` and returns the reply for the caller.
    ///
    /// Handler errors and panics are turned into an error reply.
    pub fn dispatch(
        &self,
        session: SessionId,
        identity: &str,
        text: &str,
        snapshot: &ServerSnapshot,
    ) -> String {
        let body = strip_prefix_ignore_case(text.trim(), BOT_COMMAND_PREFIX).unwrap_or_default();
        let mut parts = body.split_whitespace();

        let Some(token) = parts.next() else {
            return format!(
                "Error: No command specified. Available commands: {}",
                self.available()
            );
        };
        let name = token.to_lowercase();
        let args: Vec<&str> = parts.collect();

        let Some(command) = self.commands.get(&name) else {
            return format!(
                "Error: Unknown command '{name}'. Available commands: {}",
                self.available()
            );
        };

        info!(command = %name, %session, identity, "executing bot command");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            command.execute(session, identity, &args, snapshot)
        }));

        match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                error!(command = %name, error = ?err, "bot command failed");
                format!("Error: Failed to process command - {err}")
            }
            Err(_) => {
                error!(command = %name, "bot command panicked");
                "Error: Failed to process command - command panicked".to_string()
            }
        }
    }

    fn available(&self) -> String {
        self.command_names().join(", ")
    }
}

struct InfoCommand;

impl BotCommand for InfoCommand {
    fn name(&self) -> &str {
        "info"
    }

    fn execute(
        &self,
        session: SessionId,
        identity: &str,
        _args: &[&str],
        _snapshot: &ServerSnapshot,
    ) -> Result<String> {
        let name = if identity.trim().is_empty() || identity == ANONYMOUS {
            "anonym"
        } else {
            identity
        };
        Ok(format!("Client-ID: {session}\n[SYSTEM] Client-Name: {name}"))
    }
}

struct StatusCommand;

impl BotCommand for StatusCommand {
    fn name(&self) -> &str {
        "status"
    }

    fn execute(
        &self,
        _session: SessionId,
        _identity: &str,
        _args: &[&str],
        snapshot: &ServerSnapshot,
    ) -> Result<String> {
        let admin = snapshot.admin_identity.as_deref().unwrap_or("none");
        let uptime = Utc::now().signed_duration_since(snapshot.started_at);
        Ok(format!(
            "Admin: {admin}\nOnline: {}\nUptime: {}",
            snapshot.active_users.len(),
            format_uptime(uptime)
        ))
    }
}

struct WhoCommand;

impl BotCommand for WhoCommand {
    fn name(&self) -> &str {
        "who"
    }

    fn execute(
        &self,
        _session: SessionId,
        _identity: &str,
        _args: &[&str],
        snapshot: &ServerSnapshot,
    ) -> Result<String> {
        if snapshot.active_users.is_empty() {
            return Ok("Nobody has joined yet".to_string());
        }
        Ok(format!("Online: {}", snapshot.active_users.join(", ")))
    }
}

fn format_uptime(uptime: chrono::Duration) -> String {
    let total = uptime.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    format!("{hours}h {minutes}m {seconds}s")
}
