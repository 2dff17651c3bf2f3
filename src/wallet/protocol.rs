//! zingo-cli interactive protocol
//!
//! The text the wallet prints is the only interface it offers, so every
//! pattern the faucet relies on lives here, keyed by transfer state. The
//! sequencer interprets the resulting [`Action`]s and never looks at raw
//! patterns itself.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::config::Config;
use crate::session::ExpectationSet;

use super::parser::is_transparent_address;
use super::types::{FailureReason, TransferRequest, TransferState};

/// What a matched pattern means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `(regtest) Block:210 (type 'help') >>`
    Prompt,
    SyncComplete,
    SyncRunning,
    SyncError,
    NothingToShield,
    /// `"txids": [ ... ]`
    Txids,
    Error,
}

/// What the sequencer does after a step resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Advance(TransferState),
    /// Wait, then continue optimistically
    PauseThenAdvance(Duration, TransferState),
    /// Log a warning and continue
    WarnThenAdvance(&'static str, TransferState),
    Fail(FailureReason),
}

/// Timing and policy for one transfer session
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub startup_timeout: Duration,
    pub sync_timeout: Duration,
    pub step_timeout: Duration,
    pub confirm_timeout: Duration,
    /// How long to keep polling for shielded funds after a shield
    pub shield_settle: Duration,
    pub poll_interval: Duration,
    pub sync_running_delay: Duration,
    /// Kept aside from the spendable balance for the transaction fee
    pub fee_reserve_zatoshis: u64,
    pub shield_before_send: bool,
}

impl TransferSettings {
    pub fn from_config(config: &Config) -> Self {
        let timeouts = &config.timeouts;
        Self {
            startup_timeout: timeouts.startup(),
            sync_timeout: timeouts.sync(),
            step_timeout: timeouts.step(),
            confirm_timeout: timeouts.confirm(),
            shield_settle: timeouts.shield_settle(),
            poll_interval: timeouts.poll_interval(),
            sync_running_delay: timeouts.sync_running_delay(),
            fee_reserve_zatoshis: config.faucet.fee_reserve_zatoshis,
            shield_before_send: config.faucet.shield_before_send,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One turn of the conversation
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub state: TransferState,
    /// Line to send, `None` to only wait
    pub command: Option<String>,
    pub expect: ExpectationSet<Signal>,
    pub on_match: Vec<(Signal, Action)>,
    pub on_timeout: Action,
    /// Wait for the prompt again after a non-prompt match
    pub settle: bool,
}

impl CommandStep {
    fn new(state: TransferState, command: Option<String>, expect: ExpectationSet<Signal>) -> Self {
        Self {
            state,
            command,
            expect,
            on_match: Vec::new(),
            on_timeout: Action::Fail(FailureReason::Io),
            settle: false,
        }
    }

    fn on(mut self, signal: Signal, action: Action) -> Self {
        self.on_match.push((signal, action));
        self
    }

    fn on_timeout(mut self, action: Action) -> Self {
        self.on_timeout = action;
        self
    }

    fn settle(mut self) -> Self {
        self.settle = true;
        self
    }

    /// Action for a matched signal
    pub fn action_for(&self, signal: Signal) -> Option<&Action> {
        self.on_match
            .iter()
            .find(|(s, _)| *s == signal)
            .map(|(_, action)| action)
    }
}

static PROMPT: OnceLock<Regex> = OnceLock::new();
static SYNC_COMPLETE: OnceLock<Regex> = OnceLock::new();
static SYNC_RUNNING: OnceLock<Regex> = OnceLock::new();
static SYNC_ERROR: OnceLock<Regex> = OnceLock::new();
static NOTHING_TO_SHIELD: OnceLock<Regex> = OnceLock::new();
static TXIDS: OnceLock<Regex> = OnceLock::new();
static ERROR_LINE: OnceLock<Regex> = OnceLock::new();

pub fn prompt_pattern() -> Regex {
    PROMPT
        .get_or_init(|| Regex::new(r"(?i)block:?\s*(\d+)[^\n]*>>").expect("Invalid prompt regex"))
        .clone()
}

fn sync_complete_pattern() -> Regex {
    SYNC_COMPLETE
        .get_or_init(|| {
            Regex::new(r"(?i)sync(?:ing)?\s+(?:is\s+)?(?:complete[d]?|finished|successful)")
                .expect("Invalid sync complete regex")
        })
        .clone()
}

fn sync_running_pattern() -> Regex {
    SYNC_RUNNING
        .get_or_init(|| {
            Regex::new(r"(?i)(?:sync(?:ing)?\s+is\s+already\s+running|already\s+syncing)")
                .expect("Invalid sync running regex")
        })
        .clone()
}

fn sync_error_pattern() -> Regex {
    SYNC_ERROR
        .get_or_init(|| {
            Regex::new(r"(?i)sync(?:ing)?\s+(?:error|failed)[^\n]*")
                .expect("Invalid sync error regex")
        })
        .clone()
}

fn nothing_to_shield_pattern() -> Regex {
    NOTHING_TO_SHIELD
        .get_or_init(|| {
            Regex::new(
                r"(?i)(?:nothing\s+to\s+shield|no\s+(?:transparent\s+)?funds\s+to\s+shield|insufficient\s+(?:transparent\s+)?funds\s+to\s+shield)",
            )
            .expect("Invalid nothing-to-shield regex")
        })
        .clone()
}

fn txids_pattern() -> Regex {
    TXIDS
        .get_or_init(|| Regex::new(r#""?txids"?\s*:?\s*\[[^\]]*\]"#).expect("Invalid txids regex"))
        .clone()
}

fn error_line_pattern() -> Regex {
    ERROR_LINE
        .get_or_init(|| {
            // A line that starts with `error:` / `"error":`, not log noise mentioning errors
            Regex::new(r#"(?im)^\s*"?error"?\s*[:=][^\n]*"#).expect("Invalid error regex")
        })
        .clone()
}

/// Command that submits the transfer proposal
///
/// Amount goes out in zatoshis. zingo-cli rejects memos for transparent
/// destinations, so the memo is dropped there.
pub fn send_command(request: &TransferRequest) -> String {
    let base = format!("send {} {}", request.to_address, request.zatoshis());
    match &request.memo {
        Some(memo) if !is_transparent_address(&request.to_address) => {
            let memo = memo
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace(['\r', '\n'], " ");
            format!("{} \"{}\"", base, memo)
        }
        _ => base,
    }
}

/// Expectation table for the transfer state machine
#[derive(Debug, Clone)]
pub struct StepTable {
    settings: TransferSettings,
}

impl StepTable {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// State that follows a completed sync
    fn after_sync(&self) -> TransferState {
        if self.settings.shield_before_send {
            TransferState::Shielding
        } else {
            TransferState::BalanceCheck
        }
    }

    /// Bare wait for the ready prompt, used to settle after a step
    pub fn prompt(&self, timeout: Duration) -> ExpectationSet<Signal> {
        ExpectationSet::new(timeout).expect(prompt_pattern(), Signal::Prompt)
    }

    /// Step for `state`, `None` for terminal states
    pub fn step(&self, state: TransferState, request: &TransferRequest) -> Option<CommandStep> {
        let s = &self.settings;
        let step = match state {
            TransferState::Ready => CommandStep::new(
                state,
                None,
                ExpectationSet::new(s.startup_timeout).expect(prompt_pattern(), Signal::Prompt),
            )
            .on(Signal::Prompt, Action::Advance(TransferState::Syncing))
            .on_timeout(Action::Fail(FailureReason::StartupTimeout)),

            TransferState::Syncing => CommandStep::new(
                state,
                Some("sync run".to_string()),
                ExpectationSet::new(s.sync_timeout)
                    .expect(sync_error_pattern(), Signal::SyncError)
                    .expect(sync_running_pattern(), Signal::SyncRunning)
                    .expect(sync_complete_pattern(), Signal::SyncComplete),
            )
            .on(Signal::SyncComplete, Action::Advance(self.after_sync()))
            .on(
                Signal::SyncRunning,
                Action::PauseThenAdvance(s.sync_running_delay, self.after_sync()),
            )
            .on(
                Signal::SyncError,
                Action::WarnThenAdvance("wallet reported a sync error", self.after_sync()),
            )
            .on_timeout(Action::Fail(FailureReason::SyncTimeout))
            .settle(),

            TransferState::Shielding => CommandStep::new(
                state,
                Some("shield".to_string()),
                ExpectationSet::new(s.step_timeout)
                    .expect(nothing_to_shield_pattern(), Signal::NothingToShield)
                    .expect(error_line_pattern(), Signal::Error)
                    .expect(prompt_pattern(), Signal::Prompt),
            )
            .on(Signal::Prompt, Action::Advance(TransferState::ShieldConfirming))
            .on(
                Signal::NothingToShield,
                Action::Advance(TransferState::BalanceCheck),
            )
            .on(
                Signal::Error,
                Action::WarnThenAdvance("shield was rejected", TransferState::BalanceCheck),
            )
            .on_timeout(Action::Fail(FailureReason::ShieldFailed))
            .settle(),

            TransferState::ShieldConfirming => CommandStep::new(
                state,
                Some("confirm".to_string()),
                ExpectationSet::new(s.confirm_timeout)
                    .expect(txids_pattern(), Signal::Txids)
                    .expect(error_line_pattern(), Signal::Error),
            )
            .on(Signal::Txids, Action::Advance(TransferState::BalanceCheck))
            .on(
                Signal::Error,
                Action::WarnThenAdvance(
                    "shield confirmation was rejected",
                    TransferState::BalanceCheck,
                ),
            )
            .on_timeout(Action::Fail(FailureReason::ShieldFailed))
            .settle(),

            TransferState::BalanceCheck => CommandStep::new(
                state,
                Some("balance".to_string()),
                ExpectationSet::new(s.step_timeout).expect(prompt_pattern(), Signal::Prompt),
            )
            .on(Signal::Prompt, Action::Advance(TransferState::Sending))
            .on_timeout(Action::Fail(FailureReason::BalanceUnavailable)),

            TransferState::Sending => CommandStep::new(
                state,
                Some(send_command(request)),
                ExpectationSet::new(s.step_timeout)
                    .expect(error_line_pattern(), Signal::Error)
                    .expect(prompt_pattern(), Signal::Prompt),
            )
            .on(Signal::Prompt, Action::Advance(TransferState::Confirming))
            .on(Signal::Error, Action::Fail(FailureReason::SendFailed))
            .on_timeout(Action::Fail(FailureReason::SendFailed)),

            TransferState::Confirming => CommandStep::new(
                state,
                Some("confirm".to_string()),
                ExpectationSet::new(s.confirm_timeout)
                    .expect(txids_pattern(), Signal::Txids)
                    .expect(error_line_pattern(), Signal::Error),
            )
            .on(Signal::Txids, Action::Advance(TransferState::Done))
            .on(Signal::Error, Action::Fail(FailureReason::ConfirmFailed))
            .on_timeout(Action::Fail(FailureReason::ConfirmFailed)),

            TransferState::Done | TransferState::Failed => return None,
        };
        Some(step)
    }
}
