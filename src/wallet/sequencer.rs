//! Transfer state machine
//!
//! Drives one interactive wallet session through
//! `Ready → Syncing → Shielding → [ShieldConfirming] → BalanceCheck → Sending → Confirming → Done`
//! using the expectation table in [`super::protocol`]. Whatever happens, the
//! session is told to `quit` and shut down before [`TransferSequencer::execute`]
//! returns.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::session::{ExpectOutcome, Expecter, Matched, Transport};

use super::parser::{first_txid, parse_balance};
use super::protocol::{Action, CommandStep, Signal, StepTable, TransferSettings};
use super::types::{FailureReason, TransferRequest, TransferState};

/// How much of the seen output to keep in error messages
const DIAGNOSTIC_TAIL_CHARS: usize = 400;

/// A transfer that ended in the `Failed` state
#[derive(Debug, thiserror::Error)]
#[error("{reason} while {state}: {error}")]
pub struct TransferFailure {
    /// State the machine was in when it failed
    pub state: TransferState,
    pub reason: FailureReason,
    #[source]
    pub error: Error,
}

impl TransferFailure {
    fn new(state: TransferState, reason: FailureReason, error: Error) -> Self {
        Self {
            state,
            reason,
            error,
        }
    }
}

type StepResult<T> = std::result::Result<T, TransferFailure>;

/// Runs the transfer protocol over one session
pub struct TransferSequencer<S> {
    expecter: Expecter<S>,
    table: StepTable,
    /// A shield transaction was submitted in this session
    shield_pending: bool,
    /// When to stop waiting for shielded funds to become spendable
    poll_deadline: Option<Instant>,
}

impl<S: Transport> TransferSequencer<S> {
    pub fn new(session: S, settings: TransferSettings) -> Self {
        Self {
            expecter: Expecter::new(session),
            table: StepTable::new(settings),
            shield_pending: false,
            poll_deadline: None,
        }
    }

    /// Run the transfer and return the transaction id
    ///
    /// Consumes the sequencer: the session is closed on every path.
    pub async fn execute(mut self, request: &TransferRequest) -> StepResult<String> {
        let result = self.run(request).await;

        match &result {
            Ok(txid) => info!("Transfer reached done state (txid {})", txid),
            Err(failure) => warn!("Transfer failed: {}", failure),
        }

        self.finish().await;
        result
    }

    async fn finish(&mut self) {
        if let Err(e) = self.expecter.send("quit").await {
            debug!("Could not send quit (session likely gone): {}", e);
        }
        self.expecter.close().await;
    }

    async fn run(&mut self, request: &TransferRequest) -> StepResult<String> {
        let mut state = TransferState::Ready;

        loop {
            let Some(step) = self.table.step(state, request) else {
                return Err(TransferFailure::new(
                    state,
                    FailureReason::Io,
                    Error::Command(format!("no step defined for {} state", state)),
                ));
            };
            debug!("Entering {} state", state);

            let matched = self.exchange(&step).await?;
            let action = step
                .action_for(matched.tag)
                .cloned()
                .unwrap_or_else(|| step.on_timeout.clone());

            let next = match action {
                Action::Fail(reason) => {
                    return Err(TransferFailure::new(
                        state,
                        reason,
                        Error::Rejected(diagnostic(&matched.transcript())),
                    ));
                }
                Action::Advance(next) => next,
                Action::PauseThenAdvance(delay, next) => {
                    info!("Wallet busy in {} state, waiting {:?}", state, delay);
                    tokio::time::sleep(delay).await;
                    next
                }
                Action::WarnThenAdvance(message, next) => {
                    warn!("{}: {}", message, diagnostic(&matched.text));
                    next
                }
            };

            if step.settle && matched.tag != Signal::Prompt {
                self.settle(&step).await?;
            }

            state = match state {
                TransferState::ShieldConfirming if matched.tag == Signal::Txids => {
                    let txid = listed_txid(&matched).unwrap_or_default();
                    info!("Shield transaction submitted {}", txid);
                    self.shield_pending = true;
                    next
                }
                TransferState::BalanceCheck => self.check_balance(&matched, request).await?,
                TransferState::Confirming => {
                    return listed_txid(&matched).ok_or_else(|| {
                        TransferFailure::new(
                            state,
                            FailureReason::ConfirmFailed,
                            Error::Command(format!(
                                "confirmation listed no transaction id: {}",
                                diagnostic(&matched.transcript())
                            )),
                        )
                    });
                }
                _ => next,
            };
        }
    }

    /// Send the step's command and wait for one of its patterns
    async fn exchange(&mut self, step: &CommandStep) -> StepResult<Matched<Signal>> {
        if let Some(command) = &step.command {
            self.expecter
                .send(command)
                .await
                .map_err(|e| TransferFailure::new(step.state, FailureReason::Io, e))?;
        }

        let outcome = self.expecter.expect(&step.expect).await;
        self.resolve(step, outcome, &step.on_timeout)
    }

    /// Wait for the ready prompt after a step's own response
    async fn settle(&mut self, step: &CommandStep) -> StepResult<()> {
        let prompt = self.table.prompt(step.expect.timeout());
        let outcome = self.expecter.expect(&prompt).await;
        self.resolve(step, outcome, &step.on_timeout).map(|_| ())
    }

    fn resolve(
        &self,
        step: &CommandStep,
        outcome: ExpectOutcome<Signal>,
        on_timeout: &Action,
    ) -> StepResult<Matched<Signal>> {
        match outcome {
            ExpectOutcome::Matched(matched) => Ok(matched),
            ExpectOutcome::Eof { seen } => Err(TransferFailure::new(
                step.state,
                FailureReason::ProcessExited,
                Error::ProcessExited(diagnostic(&seen)),
            )),
            ExpectOutcome::Timeout { seen } => {
                debug!("Output before timeout: {}", diagnostic(&seen));
                let reason = match on_timeout {
                    Action::Fail(reason) => *reason,
                    _ => FailureReason::Io,
                };
                Err(TransferFailure::new(
                    step.state,
                    reason,
                    Error::Timeout {
                        context: format!("waiting for wallet in {} state", step.state),
                        secs: step.expect.timeout().as_secs(),
                    },
                ))
            }
        }
    }

    /// Gate the send on the spendable balance
    ///
    /// Returns the next state: `Sending` when funds suffice, `BalanceCheck`
    /// again while waiting for a shield to confirm.
    async fn check_balance(
        &mut self,
        matched: &Matched<Signal>,
        request: &TransferRequest,
    ) -> StepResult<TransferState> {
        let settings = self.table.settings().clone();
        let snapshot = parse_balance(&matched.before);
        let spendable = snapshot.spendable();
        // An unrepresentable requirement can never be met
        let Some(required) = request
            .zatoshis()
            .checked_add(settings.fee_reserve_zatoshis)
        else {
            return Err(TransferFailure::new(
                TransferState::BalanceCheck,
                FailureReason::InsufficientFunds,
                Error::InsufficientFunds {
                    spendable,
                    required: u64::MAX,
                },
            ));
        };

        if spendable >= required {
            info!(
                "Balance check passed: {} zatoshis spendable, {} required",
                spendable, required
            );
            return Ok(TransferState::Sending);
        }

        if self.shield_pending {
            let deadline = *self
                .poll_deadline
                .get_or_insert_with(|| Instant::now() + settings.shield_settle);

            if Instant::now() + settings.poll_interval < deadline {
                info!(
                    "Waiting for shielded funds: {} of {} zatoshis spendable",
                    spendable, required
                );
                tokio::time::sleep(settings.poll_interval).await;
                self.resync(request).await?;
                return Ok(TransferState::BalanceCheck);
            }
            warn!(
                "Shielded funds not spendable after {:?}",
                settings.shield_settle
            );
        }

        Err(TransferFailure::new(
            TransferState::BalanceCheck,
            FailureReason::InsufficientFunds,
            Error::InsufficientFunds {
                spendable,
                required,
            },
        ))
    }

    /// Sync once while polling; the next state is decided by the caller
    async fn resync(&mut self, request: &TransferRequest) -> StepResult<()> {
        let Some(step) = self.table.step(TransferState::Syncing, request) else {
            return Ok(());
        };
        let matched = self.exchange(&step).await?;
        if matched.tag == Signal::SyncError {
            warn!("Sync error while polling: {}", diagnostic(&matched.text));
        }
        self.settle(&step).await
    }
}

/// Transaction id from a `txids` match
///
/// The list itself comes first; log noise before it may hold other hashes.
fn listed_txid(matched: &Matched<Signal>) -> Option<String> {
    first_txid(&matched.text).or_else(|| first_txid(&matched.transcript()))
}

/// Last part of captured output, trimmed, for error messages
fn diagnostic(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= DIAGNOSTIC_TAIL_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - DIAGNOSTIC_TAIL_CHARS).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedTransport;
    use std::time::Duration;

    const PROMPT: &str = "(regtest) Block:210 (type 'help') >> ";
    const TADDR: &str = "tmBsTi2xWTjUdEXnuTceL7fecEQKeWaPDJd";

    fn txid() -> String {
        "7b".repeat(32)
    }

    fn settings() -> TransferSettings {
        TransferSettings {
            startup_timeout: Duration::from_millis(300),
            sync_timeout: Duration::from_millis(300),
            step_timeout: Duration::from_millis(300),
            confirm_timeout: Duration::from_millis(300),
            shield_settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            sync_running_delay: Duration::from_millis(10),
            fee_reserve_zatoshis: 10_000,
            shield_before_send: true,
        }
    }

    fn reply(body: &str) -> String {
        format!("{}\n{}", body, PROMPT)
    }

    fn confirm_output(txid: &str) -> String {
        reply(&format!("{{\n  \"txids\": [\n    \"{}\"\n  ]\n}}", txid))
    }

    /// A wallet that syncs, has nothing to shield and 5 ZEC in orchard
    fn funded_wallet() -> ScriptedTransport {
        ScriptedTransport::new()
            .with_output(&format!("Launching sync task...\n{}", PROMPT))
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("Error: No transparent funds to shield"))
            .reply(
                "balance",
                &reply("{\n  confirmed_orchard_balance: 500_000_000\n  confirmed_transparent_balance: 0\n}"),
            )
            .reply("send", &reply("{\n  \"fee\": 10000\n}"))
            .reply("confirm", &confirm_output(&txid()))
    }

    fn request(amount: f64) -> TransferRequest {
        TransferRequest::new(TADDR, amount, Some("thanks".to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_returns_txid() {
        let transport = funded_wallet();
        let log = transport.log();

        let result = TransferSequencer::new(transport, settings())
            .execute(&request(1.5))
            .await;

        assert_eq!(result.unwrap(), txid());
        assert_eq!(
            log.sent(),
            vec![
                "sync run".to_string(),
                "shield".to_string(),
                "balance".to_string(),
                format!("send {} 150000000", TADDR),
                "confirm".to_string(),
                "quit".to_string(),
            ]
        );
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_insufficient_funds_never_sends() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("nothing to shield"))
            .reply("balance", &reply("confirmed_orchard_balance: 50_000"));
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::InsufficientFunds);
        assert_eq!(failure.state, TransferState::BalanceCheck);
        assert!(matches!(
            failure.error,
            Error::InsufficientFunds {
                spendable: 50_000,
                required: 100_010_000
            }
        ));
        assert!(log.sent_with_prefix("send").is_empty());
        assert_eq!(log.sent().last().map(String::as_str), Some("quit"));
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_fee_reserve_is_required() {
        // Exactly the amount, but nothing left for the fee
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("nothing to shield"))
            .reply("balance", &reply("confirmed_orchard_balance: 100_000_000"));
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::InsufficientFunds);
        assert!(log.sent_with_prefix("send").is_empty());
    }

    #[tokio::test]
    async fn test_startup_timeout_still_quits() {
        let transport = ScriptedTransport::new().with_output("Loading wallet...\n");
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::StartupTimeout);
        assert_eq!(failure.state, TransferState::Ready);
        assert!(matches!(failure.error, Error::Timeout { .. }));
        assert_eq!(log.sent(), vec!["quit".to_string()]);
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_confirm_error_is_reported() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("nothing to shield"))
            .reply("balance", &reply("confirmed_orchard_balance: 500_000_000"))
            .reply("send", &reply("{ \"fee\": 10000 }"))
            .reply("confirm", &reply("Error: transaction rejected by lightwalletd"));
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::ConfirmFailed);
        assert!(failure.to_string().contains("rejected by lightwalletd"));
        assert_eq!(log.sent().last().map(String::as_str), Some("quit"));
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_send_error_fails_transfer() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("nothing to shield"))
            .reply("balance", &reply("confirmed_orchard_balance: 500_000_000"))
            .reply("send", &reply("Error: invalid address"));
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::SendFailed);
        assert!(log.sent_with_prefix("confirm").is_empty());
    }

    #[tokio::test]
    async fn test_process_exit_is_fatal() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("nothing to shield"))
            .reply_then_eof("balance", "thread 'main' panicked at 'wallet locked'");
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::ProcessExited);
        assert!(failure.error.to_string().contains("panicked"));
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_sync_running_and_sync_error_are_tolerated() {
        let no_shield = TransferSettings {
            shield_before_send: false,
            ..settings()
        };

        for sync_output in ["Error: sync is already running", "Sync error: connection reset"] {
            let transport = ScriptedTransport::new()
                .with_output(PROMPT)
                .reply("sync run", &reply(sync_output))
                .reply("balance", &reply("confirmed_sapling_balance: 300_000_000"))
                .reply("send", &reply("{}"))
                .reply("confirm", &confirm_output(&txid()));
            let log = transport.log();

            let result = TransferSequencer::new(transport, no_shield.clone())
                .execute(&request(1.0))
                .await;

            assert_eq!(result.unwrap(), txid());
            assert!(log.sent_with_prefix("shield").is_empty());
        }
    }

    #[tokio::test]
    async fn test_polls_until_shielded_funds_are_spendable() {
        let shield_txid = "c3".repeat(32);
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("{ \"fee\": 10000, \"value_to_shield\": 200000000 }"))
            .reply("confirm", &confirm_output(&shield_txid))
            .reply("balance", &reply("confirmed_transparent_balance: 200_000_000"))
            .reply("balance", &reply("confirmed_transparent_balance: 200_000_000"))
            .reply("balance", &reply("confirmed_orchard_balance: 199_990_000"))
            .reply("send", &reply("{}"))
            .reply("confirm", &confirm_output(&txid()));
        let log = transport.log();

        let result = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await;

        assert_eq!(result.unwrap(), txid());
        assert_eq!(log.sent_with_prefix("balance").len(), 3);
        // Initial sync plus one per poll
        assert_eq!(log.sent_with_prefix("sync run").len(), 3);
        assert_eq!(log.sent_with_prefix("send").len(), 1);
    }

    #[tokio::test]
    async fn test_poll_gives_up_at_deadline() {
        let short_settle = TransferSettings {
            shield_settle: Duration::from_millis(50),
            ..settings()
        };
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("{ \"value_to_shield\": 200000000 }"))
            .reply("confirm", &confirm_output(&"c3".repeat(32)))
            .reply("balance", &reply("confirmed_transparent_balance: 200_000_000"));
        let log = transport.log();

        let failure = TransferSequencer::new(transport, short_settle)
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::InsufficientFunds);
        assert!(log.sent_with_prefix("send").is_empty());
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_txid_comes_from_the_txids_list() {
        let block_hash = "cd".repeat(32);
        let noisy_confirm = reply(&format!(
            "INFO fetched block hash {}\n{{\"txids\": [\"{}\"]}}",
            block_hash,
            txid()
        ));
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("nothing to shield"))
            .reply("balance", &reply("confirmed_orchard_balance: 500_000_000"))
            .reply("send", &reply("{}"))
            .reply("confirm", &noisy_confirm);

        let result = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await;

        assert_eq!(result.unwrap(), txid());
    }

    #[tokio::test]
    async fn test_amount_beyond_u64_never_sends() {
        // Built directly: the constructor refuses amounts this large
        let huge = TransferRequest {
            to_address: TADDR.to_string(),
            amount: 1e12,
            memo: None,
        };
        let transport = funded_wallet();
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&huge)
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::InsufficientFunds);
        assert!(matches!(
            failure.error,
            Error::InsufficientFunds {
                spendable: 500_000_000,
                required: u64::MAX
            }
        ));
        assert!(log.sent_with_prefix("send").is_empty());
        assert_eq!(log.sent().last().map(String::as_str), Some("quit"));
        assert!(log.closed());
    }

    #[tokio::test]
    async fn test_fee_reserve_at_u64_limit_never_sends() {
        let greedy = TransferSettings {
            fee_reserve_zatoshis: u64::MAX,
            ..settings()
        };
        let transport = funded_wallet();
        let log = transport.log();

        let failure = TransferSequencer::new(transport, greedy)
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::InsufficientFunds);
        assert!(log.sent_with_prefix("send").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_shield_moves_on_to_balance_check() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("Error: lightwalletd unreachable"))
            .reply("balance", &reply("confirmed_orchard_balance: 500_000_000"))
            .reply("send", &reply("{}"))
            .reply("confirm", &confirm_output(&txid()));
        let log = transport.log();

        let result = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await;

        assert_eq!(result.unwrap(), txid());
        assert_eq!(
            log.sent(),
            vec![
                "sync run".to_string(),
                "shield".to_string(),
                "balance".to_string(),
                format!("send {} 100000000", TADDR),
                "confirm".to_string(),
                "quit".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_shield_confirm_error_is_tolerated() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("{ \"fee\": 10000 }"))
            .reply("confirm", &reply("Error: shield transaction expired"))
            .reply("balance", &reply("confirmed_orchard_balance: 500_000_000"))
            .reply("send", &reply("{}"))
            .reply("confirm", &confirm_output(&txid()));
        let log = transport.log();

        let result = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await;

        assert_eq!(result.unwrap(), txid());
        assert_eq!(log.sent_with_prefix("confirm").len(), 2);
        // No shield is pending, so there is no polling
        assert_eq!(log.sent_with_prefix("balance").len(), 1);
    }

    #[tokio::test]
    async fn test_shield_confirm_timeout_is_fatal() {
        let transport = ScriptedTransport::new()
            .with_output(PROMPT)
            .reply("sync run", &reply("sync complete"))
            .reply("shield", &reply("{ \"fee\": 10000 }"))
            .reply("confirm", "Waiting for lightwalletd...\n");
        let log = transport.log();

        let failure = TransferSequencer::new(transport, settings())
            .execute(&request(1.0))
            .await
            .unwrap_err();

        assert_eq!(failure.reason, FailureReason::ShieldFailed);
        assert_eq!(failure.state, TransferState::ShieldConfirming);
        assert!(matches!(failure.error, Error::Timeout { .. }));
        assert!(log.sent_with_prefix("balance").is_empty());
        assert!(log.sent_with_prefix("send").is_empty());
        assert_eq!(log.sent().last().map(String::as_str), Some("quit"));
        assert!(log.closed());
    }

    #[test]
    fn test_diagnostic_keeps_tail() {
        let long = format!("{}END", "x".repeat(1000));
        let text = diagnostic(&long);
        assert!(text.starts_with("..."));
        assert!(text.ends_with("END"));
        assert_eq!(diagnostic("  short \n"), "short");
    }
}
