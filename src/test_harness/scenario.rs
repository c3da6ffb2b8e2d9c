//! Transaction sequence test scenario framework.
//!
//! This module provides `SequenceScenario` for testing how ordered writes behave
//! under each submission policy when individual steps confirm, revert, stall or
//! are rejected.

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::ext::{BindError, PreparedTx, SequencePolicy, TransactionResult};

use super::{AuctionFixture, WriteBehavior};

// ============================================================================
// TxAction
// ============================================================================

/// How the ledger treats a step's transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxAction {
    /// Included successfully on the first poll
    Confirm,
    /// Included successfully after this many empty polls
    ConfirmAfter(u32),
    /// Passes the dry run, reverts on chain
    RevertOnChain,
    /// Dry run reverts with this reason; never submitted
    RevertInSimulation(String),
    /// Accepted but never included
    NeverMined,
}

impl TxAction {
    fn behavior(&self) -> WriteBehavior {
        match self {
            TxAction::Confirm => WriteBehavior::confirm(),
            TxAction::ConfirmAfter(polls) => WriteBehavior::confirm_after(*polls),
            TxAction::RevertOnChain => WriteBehavior::revert_on_chain(),
            TxAction::RevertInSimulation(reason) => WriteBehavior::revert_in_simulation(reason.clone()),
            TxAction::NeverMined => WriteBehavior::never_mined(),
        }
    }
}

// ============================================================================
// ExpectedStep
// ============================================================================

/// Expected fate of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedStep {
    /// Confirmed and reported among the completed steps
    Confirmed,
    /// The step the sequence failed at
    Failed,
    /// Never sent to the ledger
    NotSubmitted,
    /// Sent, but after the failing step, so not reported
    Unreported,
}

// ============================================================================
// TxSpec
// ============================================================================

/// Specification for a single step in a scenario
#[derive(Debug, Clone)]
pub struct TxSpec {
    pub name: String,
    pub action: TxAction,
    pub expected: ExpectedStep,
}

impl TxSpec {
    pub fn new(name: impl Into<String>, action: TxAction, expected: ExpectedStep) -> Self {
        Self { name: name.into(), action, expected }
    }

    pub fn confirm(name: impl Into<String>) -> Self {
        Self::new(name, TxAction::Confirm, ExpectedStep::Confirmed)
    }

    pub fn revert_on_chain(name: impl Into<String>) -> Self {
        Self::new(name, TxAction::RevertOnChain, ExpectedStep::Failed)
    }

    pub fn revert_in_simulation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(name, TxAction::RevertInSimulation(reason.into()), ExpectedStep::Failed)
    }

    pub fn never_mined(name: impl Into<String>) -> Self {
        Self::new(name, TxAction::NeverMined, ExpectedStep::Failed)
    }

    /// Override the expected fate, e.g. for steps after a failure.
    pub fn expect(mut self, expected: ExpectedStep) -> Self {
        self.expected = expected;
        self
    }
}

// ============================================================================
// SequenceScenario
// ============================================================================

/// A configurable test scenario for transaction sequences
///
/// # Example
///
/// ```ignore
/// SequenceScenario::new("Revert in middle")
///     .policy(SequencePolicy::Sequential)
///     .tx(TxSpec::confirm("approve"))
///     .tx(TxSpec::revert_on_chain("bid"))
///     .tx(TxSpec::confirm("claim").expect(ExpectedStep::NotSubmitted))
///     .run(&fixture)
///     .await
///     .unwrap()
///     .assert_passed();
/// ```
pub struct SequenceScenario {
    name: String,
    description: Option<String>,
    policy: SequencePolicy,
    timeout: Duration,
    tx_specs: Vec<TxSpec>,
}

impl SequenceScenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            policy: SequencePolicy::Sequential,
            timeout: Duration::from_secs(5),
            tx_specs: Vec::new(),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn policy(mut self, policy: SequencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tx(mut self, spec: TxSpec) -> Self {
        self.tx_specs.push(spec);
        self
    }

    /// Run the scenario and verify results
    pub async fn run(self, fixture: &AuctionFixture) -> Result<ScenarioResult> {
        println!("\n{}", "=".repeat(60));
        println!("Scenario: {} ({:?})", self.name, self.policy);
        if let Some(desc) = &self.description {
            println!("Description: {}", desc);
        }
        println!("{}\n", "=".repeat(60));

        // Phase 1: one distinct write per step, scripted on the ledger
        let mut txs: Vec<PreparedTx> = Vec::with_capacity(self.tx_specs.len());
        for (i, spec) in self.tx_specs.iter().enumerate() {
            let tx = fixture.place_bid(i as u64).map_err(|e| anyhow!("failed to build step {i}: {e}"))?;
            fixture.ledger.on_write(&tx, spec.action.behavior());
            println!("  [{}] '{}' scripted as {:?}", i, spec.name, spec.action);
            txs.push(tx);
        }

        // Phase 2: submit
        println!("\nSubmitting {} steps...", txs.len());
        let outcome = fixture.client.orchestrator().submit_sequence(txs.clone(), self.policy, self.timeout).await;

        let (failed_at, reported): (Option<usize>, Vec<TransactionResult>) = match outcome {
            Ok(results) => (None, results),
            Err(BindError::SequenceStepFailed { index, completed, reason, .. }) => {
                println!("  sequence failed at step {}: {}", index, reason);
                (Some(index), completed)
            }
            Err(other) => return Err(anyhow!("unexpected sequence error: {other}")),
        };

        // Phase 3: verify each step
        println!("\nVerifying...");
        let sent = fixture.ledger.sent();
        let mut all_passed = true;
        let mut step_results = Vec::with_capacity(txs.len());

        for (i, (spec, tx)) in self.tx_specs.iter().zip(&txs).enumerate() {
            let submitted = sent.iter().any(|s| s.target == tx.target() && &s.calldata == tx.calldata());
            let actual = if failed_at == Some(i) {
                ExpectedStep::Failed
            } else if reported.get(i).is_some_and(|r| r.is_confirmed()) {
                ExpectedStep::Confirmed
            } else if submitted {
                ExpectedStep::Unreported
            } else {
                ExpectedStep::NotSubmitted
            };

            let passed = actual == spec.expected;
            println!(
                "  {} [{}] '{}': expected {:?}, got {:?}",
                if passed { "PASS" } else { "FAIL" },
                i,
                spec.name,
                spec.expected,
                actual
            );
            all_passed &= passed;
            step_results.push(StepResult { name: spec.name.clone(), expected: spec.expected, actual, passed });
        }

        println!("\n{}", "=".repeat(60));
        println!("Result: {}", if all_passed { "ALL PASSED" } else { "SOME FAILED" });
        println!("{}\n", "=".repeat(60));

        Ok(ScenarioResult { name: self.name, all_passed, failed_at, step_results, reported })
    }
}

// ============================================================================
// StepResult
// ============================================================================

/// Result of a single step in a scenario
#[derive(Debug)]
pub struct StepResult {
    pub name: String,
    pub expected: ExpectedStep,
    pub actual: ExpectedStep,
    pub passed: bool,
}

// ============================================================================
// ScenarioResult
// ============================================================================

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub all_passed: bool,
    pub failed_at: Option<usize>,
    pub step_results: Vec<StepResult>,
    /// Results the orchestrator reported as completed
    pub reported: Vec<TransactionResult>,
}

impl ScenarioResult {
    pub fn assert_passed(&self) {
        assert!(
            self.all_passed,
            "Scenario '{}' failed: {:?}",
            self.name,
            self.step_results.iter().filter(|r| !r.passed).collect::<Vec<_>>()
        );
    }
}
