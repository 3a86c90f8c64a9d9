//! Command registry and dispatcher.
//!
//! Commands are `!name [args]` messages in a session thread (or the first
//! message of a new one). The registry is a declarative table; the
//! dispatcher parses, gates by context and audience, and yields a typed
//! action for the session manager to execute. The same table derives the
//! help text and the allow-set of assistant-executable commands.

use std::collections::HashSet;

/// Who may issue a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Human thread participants only.
    User,
    /// The child assistant only (via `!cmd` lines in its output).
    Assistant,
    /// Either.
    Both,
}

/// Where the command was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandContext {
    /// The message that would start a new session.
    FirstMessage,
    /// Inside an existing session thread.
    InSession,
}

/// Who is issuing the command right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issuer {
    /// A human user.
    User,
    /// The child assistant's output parser.
    Assistant,
}

/// One row of the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Command name without the `!` prefix.
    pub name: &'static str,
    /// One-line description for `!help`.
    pub description: &'static str,
    /// Argument synopsis for `!help`; empty when none.
    pub arguments: &'static str,
    /// Who may issue it.
    pub audience: Audience,
    /// Whether it works as the first message of a new session.
    pub first_message: bool,
    /// Whether the assistant's output parser may execute it.
    pub assistant_executable: bool,
    /// Whether its output is fed back to the assistant.
    pub returns_result: bool,
    /// Whether it requires allow-list membership.
    pub elevated: bool,
}

/// Typed effect of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Post the registry-derived help text.
    ShowHelp,
    /// Post the built-in release notes.
    ShowReleaseNotes,
    /// Cancel the session.
    Stop,
    /// Interrupt the child's current turn, keep the session.
    Escape,
    /// Short-circuit a pending plan approval.
    Approve,
    /// Add a user to the session allow-list.
    Invite {
        /// `@user` reference as typed.
        user: String,
    },
    /// Remove a user from the session allow-list.
    Kick {
        /// `@user` reference as typed.
        user: String,
    },
    /// Change working directory (restarts the child).
    ChangeDir {
        /// Requested path.
        path: String,
    },
    /// Toggle the permission mode.
    Permissions {
        /// `true` for interactive, `false` for skip.
        interactive: bool,
        /// Text after the mode word; the prompt in first-message context.
        remaining: String,
    },
    /// Worktree lifecycle.
    Worktree(WorktreeCommand),
    /// Interact with the auto-updater.
    Update {
        /// `Some(true)` = now, `Some(false)` = defer, `None` = show status.
        now: Option<bool>,
    },
    /// Terminate the whole process (emergency stop).
    Kill,
    /// Open a bug-report interaction.
    Bug {
        /// Free-form description.
        description: String,
    },
    /// Plugin lifecycle (implies child restart).
    Plugin(PluginCommand),
    /// Forward as `/name` to the child.
    Passthrough {
        /// Child-side slash-command name.
        name: &'static str,
        /// Remaining argument text.
        rest: String,
    },
    /// The command parsed but its arguments did not; post the usage line.
    Invalid {
        /// Short explanation for the thread.
        usage: String,
    },
}

/// Worktree subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorktreeCommand {
    /// Create (or join) a worktree for `branch`; `remaining` is the prompt
    /// text that follows in a first message.
    Create {
        /// Branch name.
        branch: String,
        /// Prompt text after the branch argument.
        remaining: String,
    },
    /// List worktrees of the session repository.
    List,
    /// Switch the session into an existing worktree.
    Switch {
        /// Branch name.
        branch: String,
    },
    /// Remove a worktree.
    Remove {
        /// Branch name.
        branch: String,
    },
    /// Remove all unused worktrees under the central root.
    Cleanup,
    /// Opt the pending session out of worktree prompting.
    Off,
}

/// Plugin subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCommand {
    /// List installed plugins.
    List,
    /// Install a plugin.
    Install {
        /// Plugin reference.
        name: String,
    },
    /// Uninstall a plugin.
    Uninstall {
        /// Plugin reference.
        name: String,
    },
}

/// Dispatch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command, unknown, or gated out in this context.
    NotHandled,
    /// A command to execute, plus whether it needs elevation.
    Handled {
        /// Action for the manager.
        action: CommandAction,
        /// Whether allow-list membership must be checked first.
        elevated: bool,
    },
}

/// The declarative command table.
pub struct CommandRegistry {
    specs: Vec<CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CommandRegistry {
    /// The built-in command table.
    #[must_use]
    pub fn builtin() -> Self {
        let specs = vec![
            CommandSpec {
                name: "help",
                description: "Show available commands",
                arguments: "",
                audience: Audience::User,
                first_message: true,
                assistant_executable: false,
                returns_result: false,
                elevated: false,
            },
            CommandSpec {
                name: "release-notes",
                description: "Show release notes",
                arguments: "",
                audience: Audience::User,
                first_message: true,
                assistant_executable: false,
                returns_result: false,
                elevated: false,
            },
            CommandSpec {
                name: "stop",
                description: "End the session",
                arguments: "",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "escape",
                description: "Interrupt the current turn without ending the session",
                arguments: "",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "approve",
                description: "Approve the pending plan",
                arguments: "",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "invite",
                description: "Allow a user to control this session",
                arguments: "@user",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "kick",
                description: "Revoke a user's session access",
                arguments: "@user",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "cd",
                description: "Change working directory (restarts the assistant)",
                arguments: "<path>",
                audience: Audience::Both,
                first_message: true,
                assistant_executable: true,
                returns_result: true,
                elevated: true,
            },
            CommandSpec {
                name: "permissions",
                description: "Switch permission handling",
                arguments: "interactive|skip",
                audience: Audience::User,
                first_message: true,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "worktree",
                description: "Run the session in a git worktree",
                arguments: "<branch>|list|switch|remove|cleanup|off",
                audience: Audience::Both,
                first_message: true,
                assistant_executable: true,
                returns_result: true,
                elevated: true,
            },
            CommandSpec {
                name: "update",
                description: "Apply or defer a pending update",
                arguments: "[now|defer]",
                audience: Audience::User,
                first_message: true,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "kill",
                description: "Terminate the whole bridge process",
                arguments: "",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "bug",
                description: "File a bug report with session context",
                arguments: "<description>",
                audience: Audience::Both,
                first_message: false,
                assistant_executable: true,
                returns_result: true,
                elevated: true,
            },
            CommandSpec {
                name: "plugin",
                description: "Manage assistant plugins (restarts the assistant)",
                arguments: "list|install|uninstall",
                audience: Audience::User,
                first_message: false,
                assistant_executable: false,
                returns_result: false,
                elevated: true,
            },
            CommandSpec {
                name: "context",
                description: "Forward /context to the assistant",
                arguments: "",
                audience: Audience::Both,
                first_message: false,
                assistant_executable: true,
                returns_result: true,
                elevated: true,
            },
            CommandSpec {
                name: "cost",
                description: "Forward /cost to the assistant",
                arguments: "",
                audience: Audience::Both,
                first_message: false,
                assistant_executable: true,
                returns_result: true,
                elevated: true,
            },
            CommandSpec {
                name: "compact",
                description: "Forward /compact to the assistant",
                arguments: "",
                audience: Audience::Both,
                first_message: false,
                assistant_executable: true,
                returns_result: true,
                elevated: true,
            },
        ];
        Self { specs }
    }

    /// Look a command up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    /// All rows, in table order.
    #[must_use]
    pub fn specs(&self) -> &[CommandSpec] {
        &self.specs
    }

    /// Names the assistant's output parser may execute.
    #[must_use]
    pub fn assistant_allow_set(&self) -> HashSet<&'static str> {
        self.specs
            .iter()
            .filter(|spec| spec.assistant_executable)
            .map(|spec| spec.name)
            .collect()
    }

    /// Help text derived from the table (user-audience rows only).
    #[must_use]
    pub fn help_text(&self) -> String {
        let mut out = String::from("**Commands**\n");
        for spec in &self.specs {
            if spec.audience == Audience::Assistant {
                continue;
            }
            if spec.arguments.is_empty() {
                out.push_str(&format!("`!{}` — {}\n", spec.name, spec.description));
            } else {
                out.push_str(&format!(
                    "`!{} {}` — {}\n",
                    spec.name, spec.arguments, spec.description
                ));
            }
        }
        out
    }

    /// Parse and gate a message. Returns [`DispatchOutcome::NotHandled`]
    /// when the text is not a command, the command is unknown, or it is
    /// unavailable in this context or to this issuer.
    #[must_use]
    pub fn dispatch(
        &self,
        text: &str,
        context: CommandContext,
        issuer: Issuer,
    ) -> DispatchOutcome {
        let trimmed = text.trim();
        let Some(body) = trimmed.strip_prefix('!') else {
            return DispatchOutcome::NotHandled;
        };
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };

        let Some(spec) = self.get(name) else {
            return DispatchOutcome::NotHandled;
        };

        match (spec.audience, issuer) {
            (Audience::User, Issuer::Assistant) | (Audience::Assistant, Issuer::User) => {
                return DispatchOutcome::NotHandled;
            }
            _ => {}
        }
        if issuer == Issuer::Assistant && !spec.assistant_executable {
            return DispatchOutcome::NotHandled;
        }
        if context == CommandContext::FirstMessage && !spec.first_message {
            return DispatchOutcome::NotHandled;
        }
        // `!worktree off` only makes sense before a session exists.
        if name == "worktree" && rest == "off" && context != CommandContext::FirstMessage {
            return DispatchOutcome::NotHandled;
        }

        let action = parse_action(name, rest);
        DispatchOutcome::Handled { action, elevated: spec.elevated }
    }
}

fn parse_action(name: &str, rest: &str) -> CommandAction {
    match name {
        "help" => CommandAction::ShowHelp,
        "release-notes" => CommandAction::ShowReleaseNotes,
        "stop" => CommandAction::Stop,
        "escape" => CommandAction::Escape,
        "approve" => CommandAction::Approve,
        "invite" => parse_user_arg(rest, "invite").map_or_else(
            || CommandAction::Invalid { usage: "usage: `!invite @user`".into() },
            |user| CommandAction::Invite { user },
        ),
        "kick" => parse_user_arg(rest, "kick").map_or_else(
            || CommandAction::Invalid { usage: "usage: `!kick @user`".into() },
            |user| CommandAction::Kick { user },
        ),
        "cd" => {
            if rest.is_empty() {
                CommandAction::Invalid { usage: "usage: `!cd <path>`".into() }
            } else {
                CommandAction::ChangeDir { path: rest.to_owned() }
            }
        }
        "permissions" => {
            let (mode, remaining) = match rest.split_once(char::is_whitespace) {
                Some((mode, remaining)) => (mode, remaining.trim().to_owned()),
                None => (rest, String::new()),
            };
            match mode {
                "interactive" => CommandAction::Permissions { interactive: true, remaining },
                "skip" => CommandAction::Permissions { interactive: false, remaining },
                _ => CommandAction::Invalid {
                    usage: "usage: `!permissions interactive|skip`".into(),
                },
            }
        }
        "worktree" => parse_worktree(rest),
        "update" => match rest {
            "" => CommandAction::Update { now: None },
            "now" => CommandAction::Update { now: Some(true) },
            "defer" => CommandAction::Update { now: Some(false) },
            _ => CommandAction::Invalid { usage: "usage: `!update [now|defer]`".into() },
        },
        "kill" => CommandAction::Kill,
        "bug" => CommandAction::Bug { description: rest.to_owned() },
        "plugin" => parse_plugin(rest),
        "context" => CommandAction::Passthrough { name: "context", rest: rest.to_owned() },
        "cost" => CommandAction::Passthrough { name: "cost", rest: rest.to_owned() },
        "compact" => CommandAction::Passthrough { name: "compact", rest: rest.to_owned() },
        other => CommandAction::Invalid { usage: format!("unknown command `!{other}`") },
    }
}

fn parse_user_arg(rest: &str, _cmd: &str) -> Option<String> {
    let user = rest.split_whitespace().next()?;
    let user = user.trim_start_matches('@');
    if user.is_empty() {
        None
    } else {
        Some(user.to_owned())
    }
}

fn parse_worktree(rest: &str) -> CommandAction {
    let (sub, tail) = match rest.split_once(char::is_whitespace) {
        Some((sub, tail)) => (sub, tail.trim()),
        None => (rest, ""),
    };
    match sub {
        "" => CommandAction::Invalid {
            usage: "usage: `!worktree <branch>|list|switch|remove|cleanup|off`".into(),
        },
        "list" => CommandAction::Worktree(WorktreeCommand::List),
        "cleanup" => CommandAction::Worktree(WorktreeCommand::Cleanup),
        "off" => CommandAction::Worktree(WorktreeCommand::Off),
        "switch" => {
            if tail.is_empty() {
                CommandAction::Invalid { usage: "usage: `!worktree switch <branch>`".into() }
            } else {
                CommandAction::Worktree(WorktreeCommand::Switch { branch: tail.to_owned() })
            }
        }
        "remove" => {
            if tail.is_empty() {
                CommandAction::Invalid { usage: "usage: `!worktree remove <branch>`".into() }
            } else {
                CommandAction::Worktree(WorktreeCommand::Remove { branch: tail.to_owned() })
            }
        }
        branch => CommandAction::Worktree(WorktreeCommand::Create {
            branch: branch.to_owned(),
            remaining: tail.to_owned(),
        }),
    }
}

fn parse_plugin(rest: &str) -> CommandAction {
    let (sub, tail) = match rest.split_once(char::is_whitespace) {
        Some((sub, tail)) => (sub, tail.trim()),
        None => (rest, ""),
    };
    match sub {
        "list" => CommandAction::Plugin(PluginCommand::List),
        "install" if !tail.is_empty() => {
            CommandAction::Plugin(PluginCommand::Install { name: tail.to_owned() })
        }
        "uninstall" if !tail.is_empty() => {
            CommandAction::Plugin(PluginCommand::Uninstall { name: tail.to_owned() })
        }
        _ => CommandAction::Invalid { usage: "usage: `!plugin list|install <name>|uninstall <name>`".into() },
    }
}

/// Scan assistant output text for `!cmd` lines it is allowed to execute.
///
/// Lines whose command is outside the allow-set are silently ignored.
#[must_use]
pub fn extract_assistant_commands<'a>(
    registry: &CommandRegistry,
    text: &'a str,
) -> Vec<&'a str> {
    let allow = registry.assistant_allow_set();
    text.lines()
        .map(str::trim)
        .filter(|line| {
            line.strip_prefix('!').is_some_and(|body| {
                let name = body.split_whitespace().next().unwrap_or("");
                allow.contains(name)
            })
        })
        .collect()
}
