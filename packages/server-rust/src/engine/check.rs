//! Per-event evaluation state: receiver iteration, the predicate chain,
//! and once-per-event action execution.

use std::collections::{HashMap, HashSet};

use chrono::{Local, NaiveDateTime};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleetlink_core::rules::split_alternatives;
use fleetlink_core::{LifecycleKind, MessageRule};

use crate::config::FirstMatchPrecedence;
use crate::traits::PlayerRef;

use super::{defer_action, EngineError, RuleEngine, StepOutcome, WARN_DELAY};

// ---------------------------------------------------------------------------
// MessageCheck
// ---------------------------------------------------------------------------

/// How one receiver fared against one rule's predicates.
enum Verdict {
    /// Predicates hold; the receiver gets the message.
    Eligible,
    /// Predicates do not hold for this receiver; move to the next one.
    Skip,
    /// A no-permission message was sent; the whole event is cancelled.
    Cancel,
}

/// State carried across the rule chain of a single lifecycle event.
pub(super) struct MessageCheck<'a> {
    engine: &'a RuleEngine,
    kind: LifecycleKind,
    actor: PlayerRef,
    event_variables: HashMap<String, String>,
    /// Receivers already shown a message by an earlier rule in this event.
    messaged: HashSet<Uuid>,
    /// Guards once-per-event execution of non-message directives.
    executed: bool,
    now: NaiveDateTime,
}

impl<'a> MessageCheck<'a> {
    pub(super) fn new(
        engine: &'a RuleEngine,
        kind: LifecycleKind,
        actor: PlayerRef,
        event_variables: HashMap<String, String>,
    ) -> Self {
        Self {
            engine,
            kind,
            actor,
            event_variables,
            messaged: HashSet::new(),
            executed: false,
            now: Local::now().naive_local(),
        }
    }

    /// Whole-rule gates checked before any receiver work.
    pub(super) fn can_filter(&self, rule: &MessageRule) -> bool {
        let directives = &rule.directives;

        if directives.disabled {
            return false;
        }
        if let Some(at) = directives.expires_at {
            if self.now > at {
                return false;
            }
        }

        let seen = &self.engine.services.seen;
        if directives.require_seen_before && !seen.contains(&self.actor.id) {
            return false;
        }
        if directives.ignore_seen_before && seen.contains(&self.actor.id) {
            return false;
        }

        true
    }

    /// Evaluates one rule against every connected receiver.
    pub(super) fn filter(&mut self, rule: &MessageRule) -> Result<StepOutcome, EngineError> {
        debug!(rule = rule.uid(), "filtering");

        if let Some(delay) = &rule.directives.delay {
            if !self
                .engine
                .store
                .cooldown_ready(self.kind, rule.uid(), delay.every)
            {
                debug!(rule = rule.uid(), "rule cooling down");
                return Ok(StepOutcome::Continue);
            }
        }

        // The rotation index is consumed only once the first receiver is
        // confirmed eligible, so events that match nobody leave it alone.
        let mut picked: Option<Option<String>> = None;

        for receiver in self.engine.services.gateway.online_players() {
            if rule.require_self && receiver.id != self.actor.id {
                continue;
            }
            if rule.ignore_self && receiver.id == self.actor.id {
                continue;
            }
            if self.skipped_as_already_messaged(rule, &receiver) {
                debug!(receiver = %receiver.name, "already received a message this event");
                continue;
            }

            match self.eligible(rule, &receiver)? {
                Verdict::Skip => continue,
                Verdict::Cancel => {
                    return Ok(StepOutcome::Handled {
                        cancelled: true,
                        silent: false,
                    })
                }
                Verdict::Eligible => {}
            }

            let body = picked
                .get_or_insert_with(|| self.pick_message(rule))
                .clone();
            self.deliver(rule, &receiver, body.as_deref());
            self.messaged.insert(receiver.id);

            if !self.executed {
                self.executed = true;
                let outcome = self.execute_directives(rule);
                if outcome != StepOutcome::Continue {
                    return Ok(outcome);
                }
            }
        }

        Ok(StepOutcome::Continue)
    }

    fn skipped_as_already_messaged(&self, rule: &MessageRule, receiver: &PlayerRef) -> bool {
        let messages = &self.engine.settings.messages;
        if !messages.stop_on_first_match || !self.messaged.contains(&receiver.id) {
            return false;
        }
        // Configurable precedence: an aborting rule may be allowed to reach
        // receivers earlier rules already messaged.
        !(rule.directives.abort
            && messages.first_match_precedence == FirstMatchPrecedence::DeliverInAbortingRules)
    }

    // -- predicate chain ----------------------------------------------------

    fn eligible(
        &self,
        rule: &MessageRule,
        receiver: &PlayerRef,
    ) -> Result<Verdict, EngineError> {
        let gateway = &self.engine.services.gateway;

        if let Some((permission, deny_message)) = &rule.require_actor_permission {
            let permission = self.substitute_for(&self.actor, rule, permission);
            if !gateway.has_capability(&self.actor, &permission) {
                if let Some(message) = deny_message {
                    let message = self.substitute_for(&self.actor, rule, message);
                    gateway.send_chat(&self.actor, &message);
                    return Ok(Verdict::Cancel);
                }
                debug!(rule = rule.uid(), "actor lacks required permission");
                return Ok(Verdict::Skip);
            }
        }

        if let Some((permission, deny_message)) = &rule.require_receiver_permission {
            let permission = self.substitute_for(receiver, rule, permission);
            if !gateway.has_capability(receiver, &permission) {
                if let Some(message) = deny_message {
                    let message = self.substitute_for(receiver, rule, message);
                    gateway.send_chat(receiver, &message);
                    return Ok(Verdict::Cancel);
                }
                debug!(rule = rule.uid(), receiver = %receiver.name, "receiver lacks required permission");
                return Ok(Verdict::Skip);
            }
        }

        if let Some(script) = &rule.require_actor_script {
            if self.run_script(&self.actor, rule, script)? == Some(false) {
                return Ok(Verdict::Skip);
            }
        }
        if let Some(script) = &rule.require_receiver_script {
            if self.run_script(receiver, rule, script)? == Some(false) {
                return Ok(Verdict::Skip);
            }
        }

        if let Some(required) = &rule.require_actor_server {
            if !server_matches(&self.actor, required) {
                return Ok(Verdict::Skip);
            }
        }
        if let Some(required) = &rule.require_receiver_server {
            if !server_matches(receiver, required) {
                return Ok(Verdict::Skip);
            }
        }

        if let Some(permission) = &rule.ignore_actor_permission {
            let permission = self.substitute_for(&self.actor, rule, permission);
            if gateway.has_capability(&self.actor, &permission) {
                return Ok(Verdict::Skip);
            }
        }
        if let Some(permission) = &rule.ignore_receiver_permission {
            let permission = self.substitute_for(receiver, rule, permission);
            if gateway.has_capability(receiver, &permission) {
                return Ok(Verdict::Skip);
            }
        }

        if let Some(script) = &rule.ignore_actor_script {
            if self.run_script(&self.actor, rule, script)? == Some(true) {
                return Ok(Verdict::Skip);
            }
        }
        if let Some(script) = &rule.ignore_receiver_script {
            if self.run_script(receiver, rule, script)? == Some(true) {
                return Ok(Verdict::Skip);
            }
        }

        if let Some(ignored) = &rule.ignore_actor_server {
            if server_matches(&self.actor, ignored) {
                return Ok(Verdict::Skip);
            }
        }
        if let Some(ignored) = &rule.ignore_receiver_server {
            if server_matches(receiver, ignored) {
                return Ok(Verdict::Skip);
            }
        }

        Ok(Verdict::Eligible)
    }

    fn run_script(
        &self,
        subject: &PlayerRef,
        rule: &MessageRule,
        script: &str,
    ) -> Result<Option<bool>, EngineError> {
        let bindings = self.variables_for(subject, rule);
        let expr = substitute(script, &bindings);
        self.engine
            .services
            .scripts
            .evaluate(&expr, &bindings)
            .map_err(EngineError::Script)
    }

    // -- delivery and directives --------------------------------------------

    fn pick_message(&self, rule: &MessageRule) -> Option<String> {
        if rule.messages.is_empty() {
            return None;
        }
        let index =
            self.engine
                .store
                .next_message_index(self.kind, rule.uid(), rule.messages.len());
        Some(rule.messages[index].clone())
    }

    fn deliver(&self, rule: &MessageRule, receiver: &PlayerRef, body: Option<&str>) {
        let Some(body) = body else { return };

        let vars = self.variables_for(&self.actor, rule);
        let mut text = substitute(body, &vars).replace("{player}", &self.actor.name);

        let prefix = rule
            .prefix
            .clone()
            .or_else(|| self.engine.settings.messages.prefix.get(&self.kind).cloned());
        if let Some(prefix) = prefix {
            text = format!("{prefix}{text}");
        }
        if let Some(suffix) = &rule.suffix {
            text.push_str(suffix);
        }

        self.engine.services.gateway.send_chat(receiver, &text);
    }

    /// Non-message actions, fired once per event by the first eligible
    /// receiver.
    fn execute_directives(&self, rule: &MessageRule) -> StepOutcome {
        let directives = &rule.directives;
        let services = &self.engine.services;
        let vars = self.variables_for(&self.actor, rule);

        for command in &directives.player_commands {
            services
                .gateway
                .run_player_command(&self.actor, &substitute(command, &vars));
        }

        for command in &directives.proxy_commands {
            let command = substitute(command, &vars);
            services.gateway.run_console_command(&command);
            self.engine.broadcast_command(&command);
        }

        for line in &directives.console_messages {
            info!(target: "fleetlink::rules", "{}", substitute(line, &vars));
        }

        for (file, line) in &directives.write_messages {
            services.file_log.append(file, &substitute(line, &vars));
        }

        for (channel, message) in &directives.notify_messages {
            // Best-effort: a broken sink never fails the event.
            if let Err(err) = services.notifier.notify(channel, &substitute(message, &vars)) {
                warn!(channel = %channel, %err, "notification sink failed");
            }
        }

        if let Some(kick) = &directives.kick_message {
            services.gateway.disconnect(&self.actor, &substitute(kick, &vars));
        }

        for warn_set in &directives.warn_messages {
            let alternatives = split_alternatives(&substitute(warn_set, &vars));
            let actor = self.actor.clone();
            let gateway = services.gateway.clone();
            defer_action(WARN_DELAY, move || {
                let pick = &alternatives[rand::rng().random_range(0..alternatives.len())];
                gateway.send_chat(&actor, pick);
            });
        }

        if !directives.ignore_logging {
            debug!(rule = rule.uid(), "rule actions executed");
        }

        if directives.deny {
            if !directives.ignore_verbose {
                debug!(rule = rule.uid(), "event cancelled");
            }
            return StepOutcome::Handled {
                cancelled: true,
                silent: false,
            };
        }
        if directives.deny_silently {
            return StepOutcome::Handled {
                cancelled: true,
                silent: true,
            };
        }
        if directives.abort {
            return StepOutcome::AbortChain;
        }

        StepOutcome::Continue
    }

    // -- variables ----------------------------------------------------------

    fn variables_for(&self, subject: &PlayerRef, rule: &MessageRule) -> HashMap<String, String> {
        let mut vars = self
            .engine
            .replica
            .variables(&subject.name)
            .unwrap_or_else(|| fallback_variables(subject));
        vars.extend(self.event_variables.clone());
        vars.insert("broadcast_group".to_string(), rule.group.clone());
        vars
    }

    fn substitute_for(&self, subject: &PlayerRef, rule: &MessageRule, text: &str) -> String {
        substitute(text, &self.variables_for(subject, rule))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn server_matches(player: &PlayerRef, server: &str) -> bool {
    player
        .server
        .as_deref()
        .is_some_and(|current| current.eq_ignore_ascii_case(server))
}

/// Replaces every `{key}` placeholder present in `vars`.
fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{key}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    out
}

/// Variables for a player the replica has not seen yet.
fn fallback_variables(player: &PlayerRef) -> HashMap<String, String> {
    let server = player.server.clone().unwrap_or_default();

    let mut map = HashMap::new();
    map.insert("player_name".into(), player.name.clone());
    map.insert("name".into(), player.name.clone());
    map.insert("player_nick".into(), player.name.clone());
    map.insert("nick".into(), player.name.clone());
    map.insert("player_group".into(), String::new());
    map.insert("player_prefix".into(), String::new());
    map.insert("player_server".into(), server);
    map.insert("player_afk".into(), "false".into());
    map.insert("player_ignoring_pms".into(), "false".into());
    map.insert("player_vanished".into(), "false".into());
    map
}
