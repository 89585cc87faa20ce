//! Directives shared by every rule and the operator lines they parse from.
//!
//! Operator lines are space-tokenized; the first one or two tokens select
//! the directive and the remainder is its argument. Validation problems are
//! collected on the builder rather than failing the line, so a broken rule
//! is reported once, with everything wrong about it, at finalization.

use std::time::Duration;

use chrono::NaiveDateTime;

/// Date format of the `expires` operator. Short month names are accepted
/// too (`%B` is lenient when parsing).
const EXPIRES_FORMAT: &str = "%d %B %Y, %H:%M";

// ---------------------------------------------------------------------------
// RuleDelay
// ---------------------------------------------------------------------------

/// A per-rule cooldown: the rule fires at most once per `every`, with an
/// optional message shown when it is suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDelay {
    pub every: Duration,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Directives
// ---------------------------------------------------------------------------

/// The side effects and gates common to every rule kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    /// Wall-clock time after which the rule no longer fires.
    pub expires_at: Option<NaiveDateTime>,
    /// Cooldown between firings.
    pub delay: Option<RuleDelay>,
    /// Commands run as the actor.
    pub player_commands: Vec<String>,
    /// Commands run on every proxy node.
    pub proxy_commands: Vec<String>,
    /// Lines written to the operator log.
    pub console_messages: Vec<String>,
    /// (file, line) pairs appended to external log files.
    pub write_messages: Vec<(String, String)>,
    /// (channel, message) pairs for the notification sink.
    pub notify_messages: Vec<(String, String)>,
    /// Deferred messages to the actor; each entry is a pipe-delimited
    /// alternative set picked from at random.
    pub warn_messages: Vec<String>,
    /// When set, the actor is disconnected with this reason.
    pub kick_message: Option<String>,
    /// Stop evaluating further rules for this event.
    pub abort: bool,
    /// Cancel the event outright.
    pub deny: bool,
    /// Cancel the event but tell only the actor it went through.
    pub deny_silently: bool,
    /// Fire only for actors who have connected before.
    pub require_seen_before: bool,
    /// Skip actors who have connected before.
    pub ignore_seen_before: bool,
    /// Exempt the rule from logging.
    pub ignore_logging: bool,
    /// Suppress verbose output for this rule.
    pub ignore_verbose: bool,
    /// Rule is temporarily turned off.
    pub disabled: bool,
}

// ---------------------------------------------------------------------------
// DirectivesBuilder
// ---------------------------------------------------------------------------

/// Accumulates [`Directives`] line by line, collecting validation errors.
#[derive(Debug, Default)]
pub(crate) struct DirectivesBuilder {
    inner: Directives,
    errors: Vec<String>,
}

impl DirectivesBuilder {
    pub(crate) fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    fn check_unset(&mut self, already: bool, operator: &str) {
        if already {
            self.errors.push(format!("operator '{operator}' already defined"));
        }
    }

    /// Tries to parse one operator line as a common directive.
    ///
    /// Returns `true` if the line was consumed. Lines that look like a
    /// common directive but have broken arguments are consumed too, with the
    /// problem recorded on the builder.
    pub(crate) fn parse_common(&mut self, args: &[&str]) -> bool {
        let param = join_range(args, 0, 2);
        let the_rest = if args.len() >= 2 {
            join_range(args, 2, args.len())
        } else {
            String::new()
        };

        match (args[0], param.as_str()) {
            ("expires", _) => {
                self.check_unset(self.inner.expires_at.is_some(), "expires");
                let raw = join_range(args, 1, args.len());
                match NaiveDateTime::parse_from_str(&raw, EXPIRES_FORMAT) {
                    Ok(at) => self.inner.expires_at = Some(at),
                    Err(err) => self.push_error(format!(
                        "syntax error in 'expires'; valid: dd MMMM yyyy, HH:mm, got {raw:?}: {err}"
                    )),
                }
            }
            ("delay", _) => {
                self.check_unset(self.inner.delay.is_some(), "delay");
                match parse_period(&join_range(args, 1, 3)) {
                    Ok(every) => {
                        let message = if args.len() > 3 {
                            Some(join_range(args, 3, args.len()))
                        } else {
                            None
                        };
                        self.inner.delay = Some(RuleDelay { every, message });
                    }
                    Err(err) => self.push_error(format!(
                        "syntax error in 'delay'; valid: <amount> <unit>: {err}"
                    )),
                }
            }
            (_, "then command" | "then commands") => {
                self.inner.player_commands.extend(split_alternatives(&the_rest));
            }
            (_, "then proxy" | "then proxyconsole") => {
                self.inner.proxy_commands.extend(split_alternatives(&the_rest));
            }
            (_, "then log") => {
                self.inner.console_messages.extend(split_alternatives(&the_rest));
            }
            (_, "then kick") => {
                self.check_unset(self.inner.kick_message.is_some(), "then kick");
                self.inner.kick_message = Some(the_rest);
            }
            (_, "then notify") => match the_rest.split_once(' ') {
                Some((channel, message)) => self
                    .inner
                    .notify_messages
                    .push((channel.to_string(), message.to_string())),
                None => self.push_error("wrong 'then notify' syntax, usage: <channel> <message>"),
            },
            (_, "then write") => match the_rest.split_once(' ') {
                Some((file, message)) => self
                    .inner
                    .write_messages
                    .push((file.to_string(), message.to_string())),
                None => self.push_error("wrong 'then write' syntax, usage: <file> <message>"),
            },
            (_, "then warn") => {
                self.inner.warn_messages.push(the_rest);
            }
            (_, "then abort") => {
                self.check_unset(self.inner.abort, "then abort");
                self.inner.abort = true;
            }
            (_, "then deny") => {
                if the_rest == "silently" {
                    self.check_unset(self.inner.deny_silently, "then deny silently");
                    self.inner.deny_silently = true;
                } else {
                    self.check_unset(self.inner.deny, "then deny");
                    self.inner.deny = true;
                }
            }
            (_, "require playedbefore") => {
                self.check_unset(self.inner.require_seen_before, "require playedbefore");
                self.inner.require_seen_before = true;
            }
            (_, "ignore playedbefore") => {
                self.check_unset(self.inner.ignore_seen_before, "ignore playedbefore");
                self.inner.ignore_seen_before = true;
            }
            (_, "dont log") => {
                self.check_unset(self.inner.ignore_logging, "dont log");
                self.inner.ignore_logging = true;
            }
            (_, "dont verbose") => {
                self.check_unset(self.inner.ignore_verbose, "dont verbose");
                self.inner.ignore_verbose = true;
            }
            ("disabled", _) => {
                self.check_unset(self.inner.disabled, "disabled");
                self.inner.disabled = true;
            }
            _ => return false,
        }

        true
    }

    /// Finishes the build, yielding the directives and everything that went
    /// wrong while collecting them.
    pub(crate) fn finish(self) -> (Directives, Vec<String>) {
        (self.inner, self.errors)
    }
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

/// Joins `tokens[from..to]` with single spaces, clamping the range.
pub(crate) fn join_range(tokens: &[&str], from: usize, to: usize) -> String {
    let to = to.min(tokens.len());
    if from >= to {
        return String::new();
    }
    tokens[from..to].join(" ")
}

/// Splits on `|`, honoring `\|` as an escaped literal pipe.
#[must_use]
pub fn split_alternatives(message: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'|') {
            current.push('|');
            chars.next();
        } else if c == '|' {
            out.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    out.push(current);
    out
}

/// Parses a human-readable period such as `5 seconds` or `2 minutes`.
///
/// `ticks` are the legacy 1/20-second unit; they round down to whole
/// seconds.
fn parse_period(raw: &str) -> Result<Duration, String> {
    let mut tokens = raw.split_whitespace();
    let amount: u64 = tokens
        .next()
        .ok_or_else(|| "missing amount".to_string())?
        .parse()
        .map_err(|_| format!("bad amount in {raw:?}"))?;
    let unit = tokens.next().ok_or_else(|| "missing unit".to_string())?;

    let seconds = if unit.starts_with("tick") {
        amount / 20
    } else if unit.starts_with("second") {
        amount
    } else if unit.starts_with("minute") {
        amount * 60
    } else if unit.starts_with("hour") {
        amount * 3600
    } else if unit.starts_with("day") {
        amount * 86_400
    } else if unit.starts_with("week") {
        amount * 604_800
    } else if unit.starts_with("month") {
        amount * 2_629_743
    } else if unit.starts_with("year") {
        amount * 31_556_926
    } else {
        return Err(format!("unknown time unit {unit:?}"));
    };

    Ok(Duration::from_secs(seconds))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
