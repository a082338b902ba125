use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tether_core::{
    ActionKind, ConflictPolicy, Payload, Priority, QueueOptions, ResolutionChoice, SyncStatus,
};

use crate::cli::{ChoiceArg, PriorityArg};
use crate::commands::common::{format_payload, format_status_lines, parse_payload, Context, Session};
use crate::commands::config::{apply_profile_update, parse_override, ProfileUpdate};
use crate::commands::conflicts::resolution_choice;
use crate::commands::queue::{clear_pending, queue_options};
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

fn no_env(_: &str) -> Option<String> {
    None
}

fn local_context(db_path: PathBuf) -> Context {
    Context::resolve("test".to_string(), &CliProfile::default(), Some(db_path), no_env).unwrap()
}

#[test]
fn parse_payload_prefers_json() {
    assert_eq!(
        parse_payload(r#"{"title":"a"}"#),
        Payload::Json(serde_json::json!({"title": "a"}))
    );
    assert_eq!(parse_payload("hello"), Payload::Text("hello".to_string()));
}

#[test]
fn format_payload_summarizes_bytes() {
    assert_eq!(format_payload(&Payload::Bytes(vec![1, 2, 3])), "<3 bytes>");
    assert_eq!(format_payload(&Payload::Text("  hi  ".into())), "hi");
}

#[test]
fn queue_options_follow_flags() {
    let options = queue_options(PriorityArg::Critical, Some(2), Some(" posts:1 ".into()));
    assert_eq!(
        options,
        QueueOptions::default()
            .with_priority(Priority::Critical)
            .with_max_attempts(2)
            .with_cache_key("posts:1")
    );
    assert_eq!(
        queue_options(PriorityArg::Normal, None, Some("  ".into())),
        QueueOptions::default()
    );
}

#[test]
fn resolution_choice_requires_value_only_for_merged() {
    assert_eq!(
        resolution_choice(ChoiceArg::Server, None).unwrap(),
        ResolutionChoice::Server
    );
    assert_eq!(
        resolution_choice(ChoiceArg::Merged, Some("merged")).unwrap(),
        ResolutionChoice::Merged(Payload::Text("merged".into()))
    );
    assert!(matches!(
        resolution_choice(ChoiceArg::Merged, None),
        Err(CliError::InvalidArgument(_))
    ));
    assert!(matches!(
        resolution_choice(ChoiceArg::Client, Some("x")),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn parse_override_splits_and_uppercases() {
    assert_eq!(
        parse_override(" tether_max_attempts = 3 ").unwrap(),
        ("TETHER_MAX_ATTEMPTS".to_string(), "3".to_string())
    );
    assert!(parse_override("TETHER_MAX_ATTEMPTS").is_err());
    assert!(parse_override("TETHER_MAX_ATTEMPTS=").is_err());
}

#[test]
fn profile_update_validates_and_activates() {
    let mut config = CliProfilesConfig::default();
    apply_profile_update(
        &mut config,
        "work",
        ProfileUpdate {
            remote_url: Some("https://api.example.com".into()),
            overrides: vec!["TETHER_CONFLICT_POLICY=manual".into()],
            activate: true,
            ..ProfileUpdate::default()
        },
    )
    .unwrap();

    assert_eq!(config.active_profile.as_deref(), Some("work"));
    let profile = config.profile("work").unwrap();
    assert_eq!(
        profile.remote_base_url.as_deref(),
        Some("https://api.example.com")
    );

    let rejected = apply_profile_update(
        &mut config,
        "work",
        ProfileUpdate {
            overrides: vec!["TETHER_MAX_ATTEMPTS=0".into()],
            ..ProfileUpdate::default()
        },
    );
    assert!(matches!(rejected, Err(CliError::Core(_))));
}

#[test]
fn context_prefers_environment_over_profile() {
    let profile = CliProfile {
        remote_base_url: Some("https://profile.example.com".into()),
        probe_url: None,
        db_path: Some(PathBuf::from("/tmp/profile.db")),
        engine: BTreeMap::from([
            ("TETHER_CONFLICT_POLICY".to_string(), "merge".to_string()),
            ("TETHER_MAX_ATTEMPTS".to_string(), "7".to_string()),
        ]),
    };
    let env = |name: &str| match name {
        "TETHER_REMOTE_URL" => Some("https://env.example.com".to_string()),
        "TETHER_MAX_ATTEMPTS" => Some("2".to_string()),
        _ => None,
    };

    let context = Context::resolve("default".into(), &profile, None, env).unwrap();
    assert_eq!(
        context.remote_base_url.as_deref(),
        Some("https://env.example.com")
    );
    assert_eq!(
        context.probe_url.as_deref(),
        Some("https://env.example.com")
    );
    assert_eq!(context.db_path, PathBuf::from("/tmp/profile.db"));
    assert_eq!(context.engine_config.default_max_attempts, 2);
    assert_eq!(context.engine_config.conflict_policy, ConflictPolicy::Merge);

    let flagged = Context::resolve(
        "default".into(),
        &profile,
        Some(PathBuf::from("/tmp/flag.db")),
        no_env,
    )
    .unwrap();
    assert_eq!(flagged.db_path, PathBuf::from("/tmp/flag.db"));
}

#[test]
fn context_rejects_invalid_profile_urls() {
    let profile = CliProfile {
        remote_base_url: Some("example.com".into()),
        ..CliProfile::default()
    };
    assert!(matches!(
        Context::resolve("default".into(), &profile, None, no_env),
        Err(CliError::Config(_))
    ));
}

#[test]
fn status_lines_mention_degraded_storage() {
    let status = SyncStatus {
        is_online: true,
        pending_actions: 3,
        degraded: true,
        ..SyncStatus::default()
    };
    let lines = format_status_lines(&status);
    assert_eq!(lines[0], "State:     error");
    assert!(lines.contains(&"Pending:   3".to_string()));
    assert!(lines.iter().any(|line| line.contains("degraded")));
}

#[tokio::test]
async fn queued_actions_survive_between_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let context = local_context(dir.path().join("state.db"));

    let session = Session::open_local(&context).await.unwrap();
    session
        .engine
        .queue_action(
            ActionKind::Update,
            "posts/1",
            Some(parse_payload(r#"{"title":"offline edit"}"#)),
            QueueOptions::default(),
        )
        .await
        .unwrap();
    session
        .engine
        .queue_action(
            ActionKind::Create,
            "posts",
            None,
            QueueOptions::default().with_priority(Priority::Critical),
        )
        .await
        .unwrap();
    session.close().await;

    let session = Session::open_local(&context).await.unwrap();
    let targets = session
        .engine
        .pending_actions()
        .await
        .into_iter()
        .map(|action| action.target)
        .collect::<Vec<_>>();
    assert_eq!(targets, vec!["posts".to_string(), "posts/1".to_string()]);
    assert!(!session.engine.get_sync_status().is_online);
    session.close().await;
}

#[tokio::test]
async fn clear_pending_drops_queue_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let context = local_context(dir.path().join("state.db"));

    let session = Session::open_local(&context).await.unwrap();
    for target in ["posts/1", "posts/2"] {
        session
            .engine
            .queue_action(ActionKind::Delete, target, None, QueueOptions::default())
            .await
            .unwrap();
    }
    session.close().await;

    assert_eq!(clear_pending(&context).await.unwrap(), 2);
    assert_eq!(clear_pending(&context).await.unwrap(), 0);

    let session = Session::open_local(&context).await.unwrap();
    assert!(session.engine.pending_actions().await.is_empty());
    session.close().await;
}

#[tokio::test]
async fn cached_values_survive_between_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let context = local_context(dir.path().join("state.db"));

    let session = Session::open_local(&context).await.unwrap();
    session
        .engine
        .cache_data("profile:me", parse_payload("Ada"), Duration::from_secs(3600))
        .await
        .unwrap();
    session.close().await;

    let session = Session::open_local(&context).await.unwrap();
    let entry = session.engine.get_cached_data("profile:me").await.unwrap();
    assert_eq!(entry.value, Payload::Text("Ada".into()));
    assert_eq!(entry.version, 1);
    assert_eq!(session.engine.clear_cache(None).await.unwrap(), 1);
    session.close().await;
}

#[tokio::test]
async fn connected_session_requires_remote() {
    let dir = tempfile::tempdir().unwrap();
    let context = local_context(dir.path().join("state.db"));
    assert!(matches!(
        Session::open_connected(&context).await,
        Err(CliError::RemoteNotConfigured)
    ));
}
