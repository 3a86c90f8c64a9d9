use thread_relay::config::{GlobalConfig, PermissionsMode, WorktreeMode};
use thread_relay::AppError;

fn sample_toml(workspace: &str) -> String {
    format!(
        r#"
working_dir = '{workspace}'
permissions_mode = "auto"
chrome = true
worktree_mode = "require"
max_sessions = 3
session_timeout_ms = 60000

[stream]
soft_break_chars = 1500
min_break_chars = 400
max_lines_before_break = 12
max_height_px = 450
update_debounce_ms = 250
typing_interval_ms = 2000

[reconnect]
backoff_base_ms = 500
max_attempts = 4
heartbeat_interval_ms = 10000
heartbeat_timeout_ms = 20000

[slack]
bot_token = "xoxb-test"
app_token = "xapp-test"
allowed_users = ["U1"]
"#
    )
}

fn minimal_toml(workspace: &str) -> String {
    format!(
        r#"
working_dir = '{workspace}'

[mattermost]
url = "https://mm.example.com"
token = "token"
allowed_users = ["u1"]
"#
    )
}

#[test]
fn parses_full_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert_eq!(config.permissions_mode, PermissionsMode::Auto);
    assert!(config.chrome);
    assert_eq!(config.worktree_mode, WorktreeMode::Require);
    assert_eq!(config.max_sessions, 3);
    assert_eq!(config.stream.soft_break_chars, 1500);
    assert_eq!(config.reconnect.max_attempts, 4);
    let slack = config.slack.expect("slack section");
    assert_eq!(slack.allowed_users, vec!["U1".to_owned()]);
}

#[test]
fn defaults_apply_for_minimal_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = minimal_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert_eq!(config.permissions_mode, PermissionsMode::Interactive);
    assert_eq!(config.worktree_mode, WorktreeMode::Prompt);
    assert_eq!(config.max_sessions, 5);
    assert_eq!(config.session_timeout_ms, 1_800_000);
    assert_eq!(config.stream.soft_break_chars, 2000);
    assert_eq!(config.stream.min_break_chars, 500);
    assert_eq!(config.stream.max_lines_before_break, 15);
    assert_eq!(config.stream.max_height_px, 500);
    assert_eq!(config.stream.update_debounce_ms, 500);
    assert_eq!(config.stream.typing_interval_ms, 3000);
    assert_eq!(config.reconnect.backoff_base_ms, 1000);
    assert_eq!(config.reconnect.max_attempts, 10);
    assert!(config.keep_alive);
}

#[test]
fn zero_max_sessions_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "working_dir = '{}'\nmax_sessions = 0\n\n[slack]\nbot_token = \"x\"\napp_token = \"y\"\n",
        temp.path().to_str().expect("utf8 path")
    );
    let err = GlobalConfig::from_toml_str(&toml).expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn missing_platforms_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!("working_dir = '{}'\n", temp.path().to_str().expect("utf8 path"));
    let err = GlobalConfig::from_toml_str(&toml).expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn bad_working_dir_is_rejected() {
    let toml = "working_dir = '/definitely/not/a/real/path/here'\n\n[slack]\nbot_token = \"x\"\napp_token = \"y\"\n";
    let err = GlobalConfig::from_toml_str(toml).expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn min_break_must_stay_below_soft_break() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "working_dir = '{}'\n\n[stream]\nsoft_break_chars = 100\nmin_break_chars = 100\n\n[slack]\nbot_token = \"x\"\napp_token = \"y\"\n",
        temp.path().to_str().expect("utf8 path")
    );
    let err = GlobalConfig::from_toml_str(&toml).expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn enabled_platforms_requires_complete_credentials() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "working_dir = '{}'\n\n[slack]\nbot_token = \"x\"\n",
        temp.path().to_str().expect("utf8 path")
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    // App token missing: configured but not enabled.
    assert!(config.enabled_platforms().is_empty());
}

#[test]
fn state_file_defaults_under_working_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = minimal_toml(temp.path().to_str().expect("utf8 path"));
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    assert!(config.state_file().ends_with(".thread-relay/sessions.json"));
}
