//! Lifecycle announcement rules: require/ignore predicates for both the
//! actor and every candidate receiver, plus a rotating message list.

use super::operator::{join_range, DirectivesBuilder};
use super::{Directives, LifecycleKind};

// ---------------------------------------------------------------------------
// MessageRule
// ---------------------------------------------------------------------------

/// One immutable announcement rule, produced by [`MessageRuleBuilder`] at
/// end-of-parse.
///
/// `actor` predicates gate on the player whose lifecycle event fired;
/// `receiver` predicates gate on each candidate player being shown the
/// message. `require` predicates must hold for the rule to match; `ignore`
/// predicates exclude when they hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRule {
    /// The rule's uid, taken from its `group <name>` line.
    pub group: String,
    /// Which lifecycle transition this rule announces.
    pub kind: Option<LifecycleKind>,
    /// Prepended to every message; falls back to the per-kind configured
    /// prefix when unset.
    pub prefix: Option<String>,
    /// Appended to every message.
    pub suffix: Option<String>,
    /// Rotating message bodies.
    pub messages: Vec<String>,
    /// Permission the actor must hold, with an optional no-permission
    /// message that cancels the whole event when sent.
    pub require_actor_permission: Option<(String, Option<String>)>,
    /// Permission each receiver must hold, same no-permission semantics.
    pub require_receiver_permission: Option<(String, Option<String>)>,
    /// Script that must evaluate true for the actor.
    pub require_actor_script: Option<String>,
    /// Script that must evaluate true for each receiver.
    pub require_receiver_script: Option<String>,
    /// Backend server the actor must be on.
    pub require_actor_server: Option<String>,
    /// Backend server each receiver must be on.
    pub require_receiver_server: Option<String>,
    /// Deliver only to the actor themselves.
    pub require_self: bool,
    /// Never deliver to the actor themselves.
    pub ignore_self: bool,
    /// Permission that exempts the actor from this rule.
    pub ignore_actor_permission: Option<String>,
    /// Permission that exempts a receiver from this rule.
    pub ignore_receiver_permission: Option<String>,
    /// Script that, when true, exempts the actor.
    pub ignore_actor_script: Option<String>,
    /// Script that, when true, exempts a receiver.
    pub ignore_receiver_script: Option<String>,
    /// Backend server the actor must not be on.
    pub ignore_actor_server: Option<String>,
    /// Backend server a receiver must not be on.
    pub ignore_receiver_server: Option<String>,
    /// Directives shared with every rule kind.
    pub directives: Directives,
}

impl MessageRule {
    /// The rule's uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.group
    }
}

// ---------------------------------------------------------------------------
// MessageRuleBuilder
// ---------------------------------------------------------------------------

/// Accumulates a [`MessageRule`] from operator lines.
///
/// Common directives are tried first, then — once a `message:` /
/// `messages:` line has been seen — remaining lines feed the message list
/// (`- "body"` items, with bare lines appended to the previous item for
/// multi-line bodies).
#[derive(Debug)]
pub struct MessageRuleBuilder {
    rule: MessageRule,
    base: DirectivesBuilder,
    loading_messages: bool,
}

impl MessageRuleBuilder {
    /// Starts a rule for the given lifecycle kind and group uid.
    #[must_use]
    pub fn new(kind: LifecycleKind, group: &str) -> Self {
        Self {
            rule: MessageRule {
                group: group.to_string(),
                kind: Some(kind),
                ..MessageRule::default()
            },
            base: DirectivesBuilder::default(),
            loading_messages: false,
        }
    }

    /// Feeds one space-tokenized operator line to the builder.
    pub fn parse_line(&mut self, args: &[&str]) {
        if args.is_empty() {
            return;
        }
        if self.base.parse_common(args) {
            return;
        }
        if self.loading_messages {
            self.parse_message_line(args);
            return;
        }

        let first_two = join_range(args, 0, 2);
        let first_three = join_range(args, 0, 3);
        let rest_after_one = join_range(args, 1, args.len());
        let rest_after_three = join_range(args, 3, args.len());

        match args[0] {
            "prefix" => {
                append_multiline(&mut self.rule.prefix, &rest_after_one);
                return;
            }
            "suffix" => {
                append_multiline(&mut self.rule.suffix, &rest_after_one);
                return;
            }
            "message:" | "messages:" => {
                self.loading_messages = true;
                return;
            }
            _ => {}
        }

        match first_three.as_str() {
            "require sender perm" | "require sender permission" => {
                self.set_permission(true, rest_after_three, "require sender perm");
            }
            "require receiver perm" | "require receiver permission" => {
                self.set_permission(false, rest_after_three, "require receiver perm");
            }
            "require sender script" => self.set_once(
                |rule| &mut rule.require_actor_script,
                rest_after_three,
                "require sender script",
            ),
            "require receiver script" => self.set_once(
                |rule| &mut rule.require_receiver_script,
                rest_after_three,
                "require receiver script",
            ),
            "require sender server" => self.set_once(
                |rule| &mut rule.require_actor_server,
                rest_after_three,
                "require sender server",
            ),
            "require receiver server" => self.set_once(
                |rule| &mut rule.require_receiver_server,
                rest_after_three,
                "require receiver server",
            ),
            "ignore sender perm" | "ignore sender permission" => self.set_once(
                |rule| &mut rule.ignore_actor_permission,
                rest_after_three,
                "ignore sender perm",
            ),
            "ignore receiver perm" | "ignore receiver permission" => self.set_once(
                |rule| &mut rule.ignore_receiver_permission,
                rest_after_three,
                "ignore receiver perm",
            ),
            "ignore sender script" => self.set_once(
                |rule| &mut rule.ignore_actor_script,
                rest_after_three,
                "ignore sender script",
            ),
            "ignore receiver script" => self.set_once(
                |rule| &mut rule.ignore_receiver_script,
                rest_after_three,
                "ignore receiver script",
            ),
            "ignore sender server" => self.set_once(
                |rule| &mut rule.ignore_actor_server,
                rest_after_three,
                "ignore sender server",
            ),
            "ignore receiver server" => self.set_once(
                |rule| &mut rule.ignore_receiver_server,
                rest_after_three,
                "ignore receiver server",
            ),
            _ => match first_two.as_str() {
                "require self" => {
                    if self.rule.require_self {
                        self.base.push_error("'require self' already set");
                    }
                    self.rule.require_self = true;
                }
                "ignore self" => {
                    if self.rule.ignore_self {
                        self.base.push_error("'ignore self' already set");
                    }
                    self.rule.ignore_self = true;
                }
                _ => self
                    .base
                    .push_error(format!("unrecognized operator '{}'", args.join(" "))),
            },
        }
    }

    /// Finishes the build; a rule with collected errors is rejected so a
    /// half-parsed rule never executes.
    pub fn finish(self) -> Result<MessageRule, Vec<String>> {
        let mut rule = self.rule;
        let (directives, errors) = self.base.finish();
        if !errors.is_empty() {
            return Err(errors);
        }
        rule.directives = directives;
        Ok(rule)
    }

    /// The group uid this builder is assembling.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.rule.group
    }

    fn parse_message_line(&mut self, args: &[&str]) {
        let everything = args.join(" ");
        let everything = everything.trim();

        if let Some(item) = everything.strip_prefix('-') {
            let mut line = item.trim();
            if line.starts_with('"') || line.starts_with('\'') {
                line = &line[1..];
            }
            if line.ends_with('"') || line.ends_with('\'') {
                line = &line[..line.len() - 1];
            }
            self.rule.messages.push(line.to_string());
        } else if let Some(last) = self.rule.messages.last_mut() {
            // A bare line continues the previous message body.
            last.push('\n');
            last.push_str(everything);
        } else {
            self.base.push_error(format!(
                "enter messages with '-' on each line, got: {everything}"
            ));
        }
    }

    fn set_permission(&mut self, actor: bool, rest: String, operator: &str) {
        let slot = if actor {
            &mut self.rule.require_actor_permission
        } else {
            &mut self.rule.require_receiver_permission
        };
        if slot.is_some() {
            self.base.push_error(format!("operator '{operator}' already defined"));
            return;
        }
        let (permission, message) = match rest.split_once(' ') {
            Some((permission, message)) => (permission.to_string(), Some(message.to_string())),
            None => (rest, None),
        };
        *slot = Some((permission, message));
    }

    fn set_once(
        &mut self,
        slot: impl FnOnce(&mut MessageRule) -> &mut Option<String>,
        value: String,
        operator: &str,
    ) {
        let slot = slot(&mut self.rule);
        if slot.is_some() {
            self.base.push_error(format!("operator '{operator}' already defined"));
        } else {
            *slot = Some(value);
        }
    }
}

fn append_multiline(slot: &mut Option<String>, line: &str) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(line);
        }
        None => *slot = Some(line.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
