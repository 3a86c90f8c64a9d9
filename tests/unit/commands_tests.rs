use thread_relay::commands::{
    extract_assistant_commands, CommandAction, CommandContext, CommandRegistry, DispatchOutcome,
    Issuer, WorktreeCommand,
};

fn registry() -> CommandRegistry {
    CommandRegistry::builtin()
}

#[test]
fn non_commands_are_not_handled() {
    let outcome = registry().dispatch("hello there", CommandContext::InSession, Issuer::User);
    assert_eq!(outcome, DispatchOutcome::NotHandled);
}

#[test]
fn unknown_commands_are_not_handled() {
    let outcome = registry().dispatch("!frobnicate", CommandContext::InSession, Issuer::User);
    assert_eq!(outcome, DispatchOutcome::NotHandled);
}

#[test]
fn stop_is_gated_out_of_first_message_context() {
    let reg = registry();
    // Not available before a session exists.
    assert_eq!(
        reg.dispatch("!stop", CommandContext::FirstMessage, Issuer::User),
        DispatchOutcome::NotHandled
    );
    // Available inside a session, and elevated.
    let DispatchOutcome::Handled { action, elevated } =
        reg.dispatch("!stop", CommandContext::InSession, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert_eq!(action, CommandAction::Stop);
    assert!(elevated);
}

#[test]
fn help_works_in_both_contexts_without_elevation() {
    let reg = registry();
    for context in [CommandContext::FirstMessage, CommandContext::InSession] {
        let DispatchOutcome::Handled { action, elevated } =
            reg.dispatch("!help", context, Issuer::User)
        else {
            panic!("expected handled");
        };
        assert_eq!(action, CommandAction::ShowHelp);
        assert!(!elevated);
    }
}

#[test]
fn assistant_cannot_run_user_only_commands() {
    let reg = registry();
    assert_eq!(
        reg.dispatch("!stop", CommandContext::InSession, Issuer::Assistant),
        DispatchOutcome::NotHandled
    );
    // But it may run `!cd`.
    assert!(matches!(
        reg.dispatch("!cd /tmp", CommandContext::InSession, Issuer::Assistant),
        DispatchOutcome::Handled { action: CommandAction::ChangeDir { .. }, .. }
    ));
}

#[test]
fn worktree_branch_parses_with_remaining_prompt() {
    let DispatchOutcome::Handled { action, .. } = registry().dispatch(
        "!worktree feature-xyz implement X",
        CommandContext::FirstMessage,
        Issuer::User,
    ) else {
        panic!("expected handled");
    };
    assert_eq!(
        action,
        CommandAction::Worktree(WorktreeCommand::Create {
            branch: "feature-xyz".into(),
            remaining: "implement X".into(),
        })
    );
}

#[test]
fn worktree_subcommands_parse() {
    let reg = registry();
    let DispatchOutcome::Handled { action, .. } =
        reg.dispatch("!worktree list", CommandContext::FirstMessage, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert_eq!(action, CommandAction::Worktree(WorktreeCommand::List));

    let DispatchOutcome::Handled { action, .. } =
        reg.dispatch("!worktree switch main", CommandContext::FirstMessage, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert_eq!(
        action,
        CommandAction::Worktree(WorktreeCommand::Switch { branch: "main".into() })
    );
}

#[test]
fn worktree_off_only_works_in_first_message() {
    let reg = registry();
    assert!(matches!(
        reg.dispatch("!worktree off", CommandContext::FirstMessage, Issuer::User),
        DispatchOutcome::Handled { action: CommandAction::Worktree(WorktreeCommand::Off), .. }
    ));
    assert_eq!(
        reg.dispatch("!worktree off", CommandContext::InSession, Issuer::User),
        DispatchOutcome::NotHandled
    );
}

#[test]
fn permissions_parses_mode_and_remaining() {
    let DispatchOutcome::Handled { action, .. } = registry().dispatch(
        "!permissions skip build the feature",
        CommandContext::FirstMessage,
        Issuer::User,
    ) else {
        panic!("expected handled");
    };
    assert_eq!(
        action,
        CommandAction::Permissions { interactive: false, remaining: "build the feature".into() }
    );
}

#[test]
fn invalid_arguments_produce_usage_text() {
    let DispatchOutcome::Handled { action, .. } =
        registry().dispatch("!permissions maybe", CommandContext::FirstMessage, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert!(matches!(action, CommandAction::Invalid { .. }));

    let DispatchOutcome::Handled { action, .. } =
        registry().dispatch("!invite", CommandContext::InSession, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert!(matches!(action, CommandAction::Invalid { .. }));
}

#[test]
fn invite_strips_the_at_sign() {
    let DispatchOutcome::Handled { action, .. } =
        registry().dispatch("!invite @sam", CommandContext::InSession, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert_eq!(action, CommandAction::Invite { user: "sam".into() });
}

#[test]
fn passthrough_commands_forward_to_the_child() {
    let DispatchOutcome::Handled { action, .. } =
        registry().dispatch("!compact focus on tests", CommandContext::InSession, Issuer::User)
    else {
        panic!("expected handled");
    };
    assert_eq!(
        action,
        CommandAction::Passthrough { name: "compact", rest: "focus on tests".into() }
    );
}

#[test]
fn assistant_allow_set_matches_the_table() {
    let allow = registry().assistant_allow_set();
    assert!(allow.contains("cd"));
    assert!(allow.contains("worktree"));
    assert!(allow.contains("bug"));
    assert!(!allow.contains("stop"));
    assert!(!allow.contains("kill"));
}

#[test]
fn extract_assistant_commands_filters_by_allow_set() {
    let reg = registry();
    let text = "working on it\n!cd /tmp/project\n!kill\n!cost\n";
    let found = extract_assistant_commands(&reg, text);
    assert_eq!(found, vec!["!cd /tmp/project", "!cost"]);
}

#[test]
fn help_text_lists_user_commands() {
    let help = registry().help_text();
    assert!(help.contains("!help"));
    assert!(help.contains("!worktree"));
    assert!(help.contains("!stop"));
}
