use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use fleetlink_core::{LifecycleKind, MessageRule, RuleSetReader};

use crate::config::{FirstMatchPrecedence, MessageSettings, Settings};
use crate::replica::StateReplica;
use crate::testutil::{
    services_with, RecordingFileLog, RecordingNotifier, RecordingSink, ScriptResult,
    ScriptedEvaluator, StubGateway,
};
use crate::traits::{ExternalServices, PlayerRef};

use super::{EventDisposition, RuleEngine, RuleStore};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    engine: Arc<RuleEngine>,
    gateway: Arc<StubGateway>,
    sink: Arc<RecordingSink>,
    scripts: Arc<ScriptedEvaluator>,
    notifier: Arc<RecordingNotifier>,
    file_log: Arc<RecordingFileLog>,
    services: ExternalServices,
    replica: Arc<StateReplica>,
}

fn rules(kind: LifecycleKind, text: &str) -> Vec<MessageRule> {
    RuleSetReader::default()
        .load_lines(kind, "test.rs", text.lines())
        .expect("test rules parse")
}

fn fixture(settings: Settings, players: Vec<PlayerRef>) -> Fixture {
    let settings = Arc::new(settings);
    let replica = Arc::new(StateReplica::new());
    let gateway = Arc::new(StubGateway::with_players(players));
    let sink = Arc::new(RecordingSink::with_servers(vec![("lobby", 2)]));
    let scripts = Arc::new(ScriptedEvaluator::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let file_log = Arc::new(RecordingFileLog::default());

    let mut services = services_with(gateway.clone(), sink.clone());
    services.scripts = scripts.clone();
    services.notifier = notifier.clone();
    services.file_log = file_log.clone();

    let engine = Arc::new(RuleEngine::new(
        "proxy-1",
        Arc::new(RuleStore::new()),
        replica.clone(),
        services.clone(),
        settings,
    ));

    Fixture {
        engine,
        gateway,
        sink,
        scripts,
        notifier,
        file_log,
        services,
        replica,
    }
}

fn immediate_settings() -> Settings {
    Settings {
        messages: MessageSettings {
            defer_join_ms: 0,
            ..MessageSettings::default()
        },
        ..Settings::default()
    }
}

fn player(name: &str) -> PlayerRef {
    PlayerRef::new(name, Uuid::new_v4(), "lobby")
}

fn run(f: &Fixture, kind: LifecycleKind, actor: &PlayerRef) -> EventDisposition {
    f.engine.run_event(kind, actor, HashMap::new())
}

// ---------------------------------------------------------------------------
// Message rotation
// ---------------------------------------------------------------------------

#[test]
fn rotation_advances_once_per_event_and_wraps() {
    let ann = player("Ann");
    let ben = player("Ben");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);
    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group default\nmessages:\n- \"Welcome, {player}!\"\n- \"Hi {player}\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);
    run(&f, LifecycleKind::Join, &ben);
    run(&f, LifecycleKind::Join, &ann);

    let chats = f.gateway.chats();
    // Two receivers, one shared body per event.
    assert_eq!(chats.len(), 6);
    assert!(chats[..2].iter().all(|(_, text)| text == "Welcome, Ann!"));
    assert!(chats[2..4].iter().all(|(_, text)| text == "Hi Ben"));
    assert!(chats[4..].iter().all(|(_, text)| text == "Welcome, Ann!"));
}

#[test]
fn rotation_is_not_consumed_when_nobody_is_eligible() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);
    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group gated\nrequire sender perm some.perm\nmessages:\n- \"first\"\n- \"second\"",
        ),
    );

    // Actor lacks the permission: no receiver confirmed, index untouched.
    run(&f, LifecycleKind::Join, &ann);
    assert!(f.gateway.chats().is_empty());

    f.gateway.grant(ann.id, "some.perm");
    run(&f, LifecycleKind::Join, &ann);
    assert_eq!(f.gateway.chats()[0].1, "first");
}

// ---------------------------------------------------------------------------
// Chain ordering, abort, deny
// ---------------------------------------------------------------------------

#[test]
fn abort_stops_later_rules_but_not_earlier_ones() {
    let ann = player("Ann");
    let mut settings = immediate_settings();
    settings.messages.stop_on_first_match = false;
    let f = fixture(settings, vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group one\nmessages:\n- \"rule one\"\n\
             group two\nthen abort\nmessages:\n- \"rule two\"\n\
             group three\nmessages:\n- \"rule three\"",
        ),
    );

    let disposition = run(&f, LifecycleKind::Join, &ann);

    let bodies: Vec<String> = f.gateway.chats().into_iter().map(|(_, text)| text).collect();
    assert_eq!(bodies, vec!["rule one", "rule two"]);
    // Abort is cooperative control flow, not a cancellation.
    assert_eq!(disposition, EventDisposition::allowed());
}

#[test]
fn deny_cancels_the_event() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);
    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(LifecycleKind::Join, "group deny\nthen deny\nmessages:\n- \"nope\""),
    );

    let disposition = run(&f, LifecycleKind::Join, &ann);
    assert!(disposition.cancelled);
    assert!(!disposition.silent);
}

#[test]
fn deny_silently_flags_the_silent_cancel() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);
    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group hush\nthen deny silently\nmessages:\n- \"quiet\"",
        ),
    );

    let disposition = run(&f, LifecycleKind::Join, &ann);
    assert!(disposition.cancelled);
    assert!(disposition.silent);
}

#[test]
fn no_permission_message_cancels_the_whole_event() {
    let ann = player("Ann");
    let ben = player("Ben");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group guarded\nrequire sender perm vip.join you are not a vip\nmessages:\n- \"vip joined\"\n\
             group fallback\nmessages:\n- \"someone joined\"",
        ),
    );

    let disposition = run(&f, LifecycleKind::Join, &ann);

    assert!(disposition.cancelled);
    // Only the actor heard about it, and the fallback rule never ran.
    let chats = f.gateway.chats();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0], ("Ann".to_string(), "you are not a vip".to_string()));
}

// ---------------------------------------------------------------------------
// First-match semantics
// ---------------------------------------------------------------------------

#[test]
fn stop_on_first_match_skips_messaged_receivers_for_later_rules() {
    let ann = player("Ann");
    let ben = player("Ben");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);

    // Rule one only reaches Ann (receiver permission); rule two reaches
    // everyone still unmessaged.
    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group first\nrequire receiver perm early.bird\nmessages:\n- \"early\"\n\
             group second\nmessages:\n- \"late\"",
        ),
    );
    f.gateway.grant(ann.id, "early.bird");

    run(&f, LifecycleKind::Join, &ann);

    let chats = f.gateway.chats();
    assert_eq!(chats.len(), 2);
    assert!(chats.contains(&("Ann".to_string(), "early".to_string())));
    assert!(chats.contains(&("Ben".to_string(), "late".to_string())));
}

#[test]
fn aborting_rule_can_be_configured_to_reach_messaged_receivers() {
    let ann = player("Ann");
    let mut settings = immediate_settings();
    settings.messages.first_match_precedence = FirstMatchPrecedence::DeliverInAbortingRules;
    let f = fixture(settings, vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group first\nmessages:\n- \"hello\"\n\
             group closing\nthen abort\nmessages:\n- \"goodbye\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);

    let bodies: Vec<String> = f.gateway.chats().into_iter().map(|(_, text)| text).collect();
    assert_eq!(bodies, vec!["hello", "goodbye"]);
}

// ---------------------------------------------------------------------------
// Once-per-event actions
// ---------------------------------------------------------------------------

#[test]
fn actions_fire_once_per_event_not_once_per_receiver() {
    let ann = player("Ann");
    let ben = player("Ben");
    let cara = player("Cara");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben, cara]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group loud\nthen command spawn\nthen write joins.log {player_name} joined\nthen notify ops {player_name} arrived\nmessages:\n- \"{player} is here\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);

    // Message per receiver, actions once.
    assert_eq!(f.gateway.chats().len(), 3);
    assert_eq!(f.gateway.player_commands(), vec![("Ann".to_string(), "spawn".to_string())]);
    assert_eq!(f.file_log.lines(), vec![("joins.log".to_string(), "Ann joined".to_string())]);
    assert_eq!(f.notifier.notes(), vec![("ops".to_string(), "Ann arrived".to_string())]);
}

#[test]
fn proxy_commands_run_locally_and_broadcast_to_the_fleet() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group relay\nthen proxy alert {player_name} joined\nmessages:\n- \"hi\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);

    assert_eq!(f.gateway.console_commands(), vec!["alert Ann joined"]);
    assert_eq!(f.sink.sent().len(), 1);
}

#[test]
fn kick_disconnects_the_actor_with_the_substituted_reason() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group bouncer\nthen kick begone {player_name}\nmessages:\n- \"removed\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);
    assert_eq!(f.gateway.kicks(), vec![("Ann".to_string(), "begone Ann".to_string())]);
}

#[test]
fn warn_messages_pick_one_alternative_for_the_actor() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group warned\nthen warn slow down|take a breath\nmessages:\n- \"hi\"",
        ),
    );

    // No runtime in reach: the deferred warn runs inline.
    run(&f, LifecycleKind::Join, &ann);

    let warn = f
        .gateway
        .chats()
        .into_iter()
        .find(|(name, text)| name == "Ann" && text != "hi")
        .expect("warn delivered");
    assert!(warn.1 == "slow down" || warn.1 == "take a breath");
}

#[test]
fn failing_notification_sink_does_not_fail_the_event() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);
    f.notifier.fail_next();

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group flaky\nthen notify ops hello\nmessages:\n- \"hi\"",
        ),
    );

    let disposition = run(&f, LifecycleKind::Join, &ann);
    assert_eq!(disposition, EventDisposition::allowed());
    assert_eq!(f.gateway.chats().len(), 1);
}

#[test]
fn rule_without_messages_still_runs_actions() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(LifecycleKind::Join, "group silent\nthen command spawn"),
    );

    run(&f, LifecycleKind::Join, &ann);
    assert!(f.gateway.chats().is_empty());
    assert_eq!(f.gateway.player_commands().len(), 1);
}

// ---------------------------------------------------------------------------
// Gates: disabled / expired / seen-before / cooldown
// ---------------------------------------------------------------------------

#[test]
fn disabled_and_expired_rules_are_skipped() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group off\ndisabled\nmessages:\n- \"never\"\n\
             group past\nexpires 1 January 2001, 00:00\nmessages:\n- \"too late\"\n\
             group live\nmessages:\n- \"still here\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);

    let bodies: Vec<String> = f.gateway.chats().into_iter().map(|(_, text)| text).collect();
    assert_eq!(bodies, vec!["still here"]);
}

#[test]
fn seen_before_gates_filter_on_the_actor() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group first-timer\nignore playedbefore\nmessages:\n- \"welcome, new face\"\n\
             group regular\nrequire playedbefore\nmessages:\n- \"welcome back\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);
    let bodies: Vec<String> = f.gateway.chats().into_iter().map(|(_, text)| text).collect();
    assert_eq!(bodies, vec!["welcome, new face"]);

    f.services.seen.record(ann.id);
    run(&f, LifecycleKind::Join, &ann);
    let bodies: Vec<String> = f.gateway.chats().into_iter().map(|(_, text)| text).collect();
    assert_eq!(bodies, vec!["welcome, new face", "welcome back"]);
}

#[test]
fn cooldown_suppresses_repeat_firings() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group throttled\ndelay 1 hour\nmessages:\n- \"rare\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);
    run(&f, LifecycleKind::Join, &ann);

    assert_eq!(f.gateway.chats().len(), 1);
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

#[test]
fn receiver_predicates_filter_per_receiver() {
    let ann = player("Ann");
    let ben = player("Ben");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group staff-only\nrequire receiver perm staff.see\nmessages:\n- \"psst\"",
        ),
    );
    f.gateway.grant(ben.id, "staff.see");

    run(&f, LifecycleKind::Join, &ann);

    let chats = f.gateway.chats();
    assert_eq!(chats, vec![("Ben".to_string(), "psst".to_string())]);
}

#[test]
fn ignore_receiver_permission_excludes_holders() {
    let ann = player("Ann");
    let ben = player("Ben");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group public\nignore receiver perm hide.joins\nmessages:\n- \"{player} joined\"",
        ),
    );
    f.gateway.grant(ben.id, "hide.joins");

    run(&f, LifecycleKind::Join, &ann);

    let chats = f.gateway.chats();
    assert_eq!(chats, vec![("Ann".to_string(), "Ann joined".to_string())]);
}

#[test]
fn self_targeting_flags() {
    let ann = player("Ann");
    let ben = player("Ben");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group mirror\nrequire self\nmessages:\n- \"you joined\"\n\
             group others\nignore self\nmessages:\n- \"they joined\"",
        ),
    );
    let mut settings = immediate_settings();
    settings.messages.stop_on_first_match = false;
    // Re-run with first-match off so both rules can reach Ann and Ben.
    let f2 = fixture(settings, vec![ann.clone(), ben.clone()]);
    f2.engine
        .store()
        .replace_chain(LifecycleKind::Join, f.engine.store().chain(LifecycleKind::Join).to_vec());

    run(&f2, LifecycleKind::Join, &ann);

    let chats = f2.gateway.chats();
    assert!(chats.contains(&("Ann".to_string(), "you joined".to_string())));
    assert!(chats.contains(&("Ben".to_string(), "they joined".to_string())));
    assert!(!chats.contains(&("Ben".to_string(), "you joined".to_string())));
    assert!(!chats.contains(&("Ann".to_string(), "they joined".to_string())));
}

#[test]
fn server_predicates_match_case_insensitively() {
    let ann = player("Ann");
    let ben = PlayerRef::new("Ben", Uuid::new_v4(), "Survival");
    let f = fixture(immediate_settings(), vec![ann.clone(), ben.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group lobby-news\nrequire receiver server lobby\nmessages:\n- \"lobby hears this\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);

    let chats = f.gateway.chats();
    assert_eq!(chats, vec![("Ann".to_string(), "lobby hears this".to_string())]);
}

#[test]
fn scripts_gate_and_script_failures_skip_only_their_rule() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group scripted-out\nrequire sender script gate_a\nmessages:\n- \"a\"\n\
             group broken\nrequire sender script gate_b\nmessages:\n- \"b\"\n\
             group plain\nmessages:\n- \"c\"",
        ),
    );
    f.scripts.set("gate_a", ScriptResult::Value(Some(false)));
    f.scripts.set("gate_b", ScriptResult::Fail("syntax error".to_string()));

    run(&f, LifecycleKind::Join, &ann);

    // Rule a filtered out, rule b crashed and was skipped, rule c ran.
    let bodies: Vec<String> = f.gateway.chats().into_iter().map(|(_, text)| text).collect();
    assert_eq!(bodies, vec!["c"]);
}

// ---------------------------------------------------------------------------
// Variables and prefixes
// ---------------------------------------------------------------------------

#[test]
fn replica_variables_flow_into_messages() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);
    f.replica.apply_single("Ann", ann.id, "S:lobby.<<N:Annie.<<G:vip");

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(
            LifecycleKind::Join,
            "group vars\nmessages:\n- \"{player_nick} ({player_group}) joined {player_server}\"",
        ),
    );

    run(&f, LifecycleKind::Join, &ann);
    assert_eq!(f.gateway.chats()[0].1, "Annie (vip) joined lobby");
}

#[test]
fn configured_prefix_applies_when_the_rule_has_none() {
    let ann = player("Ann");
    let mut settings = immediate_settings();
    settings
        .messages
        .prefix
        .insert(LifecycleKind::Join, "[+] ".to_string());
    let f = fixture(settings, vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(LifecycleKind::Join, "group plain\nmessages:\n- \"{player} joined\""),
    );

    run(&f, LifecycleKind::Join, &ann);
    assert_eq!(f.gateway.chats()[0].1, "[+] Ann joined");
}

#[test]
fn event_variables_override_replica_projection() {
    let ann = player("Ann");
    let f = fixture(immediate_settings(), vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Switch,
        rules(
            LifecycleKind::Switch,
            "group moved\nmessages:\n- \"{player} went {from_server} -> {to_server}\"",
        ),
    );

    let mut variables = HashMap::new();
    variables.insert("from_server".to_string(), "lobby".to_string());
    variables.insert("to_server".to_string(), "survival".to_string());
    f.engine.run_event(LifecycleKind::Switch, &ann, variables);

    assert_eq!(f.gateway.chats()[0].1, "Ann went lobby -> survival");
}

// ---------------------------------------------------------------------------
// Dispatch: apply_on and the JOIN defer
// ---------------------------------------------------------------------------

#[test]
fn kinds_outside_apply_on_are_ignored() {
    let ann = player("Ann");
    let mut settings = immediate_settings();
    settings.messages.apply_on = vec![LifecycleKind::Join];
    let f = fixture(settings, vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Quit,
        rules(LifecycleKind::Quit, "group bye\nmessages:\n- \"gone\""),
    );

    f.engine
        .broadcast(LifecycleKind::Quit, &ann, HashMap::new());
    assert!(f.gateway.chats().is_empty());
}

#[tokio::test(start_paused = true)]
async fn join_broadcast_is_deferred_by_the_configured_delay() {
    let ann = player("Ann");
    let mut settings = immediate_settings();
    settings.messages.defer_join_ms = 1000;
    let f = fixture(settings, vec![ann.clone()]);

    f.engine.store().replace_chain(
        LifecycleKind::Join,
        rules(LifecycleKind::Join, "group hello\nmessages:\n- \"hi {player}\""),
    );

    f.engine
        .broadcast(LifecycleKind::Join, &ann, HashMap::new());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(f.gateway.chats().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(f.gateway.chats().len(), 1);
}

// ---------------------------------------------------------------------------
// Store: reload semantics
// ---------------------------------------------------------------------------

#[test]
fn reload_swaps_chains_and_keeps_broken_kinds_authoritative() {
    let dir = tempfile::tempdir().unwrap();
    let join_path = dir.path().join("join.rs");

    std::fs::write(&join_path, "group v1\nmessages:\n- \"one\"\n").unwrap();

    let store = RuleStore::new();
    let failures = store.reload_from_dir(dir.path());
    assert!(failures.is_empty());
    assert_eq!(store.chain(LifecycleKind::Join)[0].group, "v1");
    // Missing files load as empty chains.
    assert!(store.chain(LifecycleKind::Quit).is_empty());

    // A broken join source keeps the previous chain; a fresh quit source
    // still loads.
    std::fs::write(&join_path, "group v2\nfrobnicate\n").unwrap();
    std::fs::write(dir.path().join("quit.rs"), "group bye\nmessages:\n- \"bye\"\n").unwrap();

    let failures = store.reload_from_dir(dir.path());
    assert_eq!(failures.len(), 1);
    assert_eq!(store.chain(LifecycleKind::Join)[0].group, "v1");
    assert_eq!(store.chain(LifecycleKind::Quit)[0].group, "bye");
}

#[test]
fn rotation_state_survives_reload() {
    let store = RuleStore::new();
    assert_eq!(store.next_message_index(LifecycleKind::Join, "g", 2), 0);
    assert_eq!(store.next_message_index(LifecycleKind::Join, "g", 2), 1);
    assert_eq!(store.next_message_index(LifecycleKind::Join, "g", 2), 0);
    // Shrinking the list wraps the stored index safely.
    assert_eq!(store.next_message_index(LifecycleKind::Join, "g", 1), 0);
}
