//! Estimate, submit and confirm writes, alone or in sequences.
//!
//! Nothing here retries a write. The only repeated request is the receipt poll,
//! which is idempotent.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use alloy::{primitives::Address, transports::TransportError};
use tokio::time::Instant;

use crate::ext::{
    backoff_duration, classify_rpc_error, revert_reason, safe_gas_limit, BindError,
    ClientConfig, ConfirmationConfig, ConfirmationReceipt, GasConfig, GasInfo, GasPricing,
    PreparedTx, RemoteLedger, SequencePolicy, SubmittedStep, TransactionHandle, TransactionResult,
    TxOutcome,
};

pub struct TransactionOrchestrator<L: ?Sized> {
    ledger: Arc<L>,
    confirmation: ConfirmationConfig,
    gas: GasConfig,
}

impl<L: ?Sized> Clone for TransactionOrchestrator<L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone(), confirmation: self.confirmation.clone(), gas: self.gas.clone() }
    }
}

enum Poll {
    NotYet,
    Included(ConfirmationReceipt),
    Done(TxOutcome),
}

impl<L: RemoteLedger + ?Sized> TransactionOrchestrator<L> {
    pub fn new(ledger: Arc<L>, config: &ClientConfig) -> Self {
        Self { ledger, confirmation: config.confirmation.clone(), gas: config.gas.clone() }
    }

    pub fn confirmation_config(&self) -> &ConfirmationConfig {
        &self.confirmation
    }

    fn sender(&self, tx: &PreparedTx) -> Option<Address> {
        tx.opts().from.or_else(|| self.ledger.default_sender())
    }

    fn estimate_error(&self, tx: &PreparedTx, err: TransportError) -> BindError {
        if classify_rpc_error(&err).is_revert() {
            let reason = revert_reason(&err);
            tracing::info!(label = tx.label(), %reason, "dry run reverted");
            BindError::SimulationReverted { label: tx.label().to_string(), reason }
        } else {
            tracing::warn!(label = tx.label(), error = %err, "gas estimation failed");
            BindError::Transport(err)
        }
    }

    /// Dry-run `tx` and price it. Never submits.
    ///
    /// A revert during the dry run fails with `SimulationReverted` carrying the
    /// decoded reason.
    pub async fn estimate_gas(&self, tx: &PreparedTx) -> Result<GasInfo, BindError> {
        let request = tx.to_request(self.sender(tx), None);
        let estimated_gas = self.ledger.estimate_gas(&request).await.map_err(|e| self.estimate_error(tx, e))?;
        let pricing = tx.opts().gas.resolve(&*self.ledger, self.gas.fee_multiplier).await?;

        let info = GasInfo {
            estimated_gas,
            safe_gas_limit: safe_gas_limit(estimated_gas, self.gas.limit_multiplier_percent),
            pricing,
        };
        tracing::debug!(
            label = tx.label(),
            estimated_gas,
            safe_gas_limit = info.safe_gas_limit,
            max_fee = info.max_fee(),
            "estimated gas"
        );
        Ok(info)
    }

    /// Submit `tx` and return without waiting for inclusion.
    pub async fn submit(&self, tx: &PreparedTx) -> Result<TransactionHandle, BindError> {
        self.submit_with_nonce(tx, None).await
    }

    async fn submit_with_nonce(
        &self,
        tx: &PreparedTx,
        nonce: Option<u64>,
    ) -> Result<TransactionHandle, BindError> {
        let (gas_limit, pricing): (u64, GasPricing) = match tx.opts().gas_limit {
            Some(limit) => (limit, tx.opts().gas.resolve(&*self.ledger, self.gas.fee_multiplier).await?),
            None => {
                let info = self.estimate_gas(tx).await?;
                (info.safe_gas_limit, info.pricing)
            }
        };

        let from = self.sender(tx);
        let nonce = nonce.or(tx.opts().nonce);
        let request = pricing.apply(tx.to_request(from, nonce)).gas_limit(gas_limit);

        let hash = self.ledger.send_transaction(request).await.map_err(|e| {
            tracing::warn!(label = tx.label(), ?nonce, error = %e, "failed to submit transaction");
            BindError::Transport(e)
        })?;

        tracing::info!(%hash, label = tx.label(), ?from, ?nonce, gas_limit, "submitted transaction");

        Ok(TransactionHandle {
            hash,
            label: tx.label().to_string(),
            from,
            nonce,
            submitted_at: Instant::now(),
        })
    }

    async fn poll_once(&self, handle: &TransactionHandle) -> Result<Poll, TransportError> {
        let Some(receipt) = self.ledger.receipt(handle.hash).await? else {
            return Ok(Poll::NotYet);
        };
        if !receipt.success {
            return Ok(Poll::Done(TxOutcome::Reverted(receipt)));
        }
        let required = self.confirmation.confirmations.max(1);
        if required == 1 {
            return Ok(Poll::Done(TxOutcome::Confirmed(receipt)));
        }
        let head = self.ledger.block_number().await?;
        let depth = (head + 1).saturating_sub(receipt.block_number);
        if depth >= required {
            Ok(Poll::Done(TxOutcome::Confirmed(receipt)))
        } else {
            tracing::debug!(hash = %handle.hash, depth, required, "awaiting confirmations");
            Ok(Poll::Included(receipt))
        }
    }

    /// Poll for the receipt until it settles or `timeout` elapses.
    ///
    /// A zero timeout polls exactly once. Transient polling errors (network
    /// failures and unclassified errors) count as "not yet" and delay the next poll
    /// with backoff. Any other polling error ends the wait early, with `Pending` if
    /// the receipt was already seen and `TimedOut` otherwise.
    pub async fn wait_for_confirmation(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> TransactionResult {
        let deadline = Instant::now() + timeout;
        let mut included: Option<ConfirmationReceipt> = None;
        let mut errors = 0u32;

        let outcome = loop {
            match self.poll_once(handle).await {
                Ok(Poll::Done(outcome)) => break outcome,
                Ok(Poll::Included(receipt)) => {
                    included = Some(receipt);
                    errors = 0;
                }
                Ok(Poll::NotYet) => errors = 0,
                Err(e) => {
                    let kind = classify_rpc_error(&e);
                    if !kind.is_transient() {
                        tracing::warn!(hash = %handle.hash, error = %e, ?kind, "receipt poll failed permanently");
                        break match included.take() {
                            Some(receipt) => TxOutcome::Pending(receipt),
                            None => TxOutcome::TimedOut,
                        };
                    }
                    tracing::warn!(hash = %handle.hash, error = %e, ?kind, errors, "receipt poll failed");
                    errors += 1;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break match included.take() {
                    Some(receipt) => TxOutcome::Pending(receipt),
                    None => TxOutcome::TimedOut,
                };
            }
            let mut delay = self.confirmation.poll_interval;
            if errors > 0 {
                delay = delay.max(backoff_duration(errors - 1, self.confirmation.retry_backoff_ms));
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
        };

        match &outcome {
            TxOutcome::Confirmed(r) => {
                tracing::info!(hash = %handle.hash, label = %handle.label, block = r.block_number, "transaction confirmed")
            }
            TxOutcome::Reverted(r) => {
                tracing::warn!(hash = %handle.hash, label = %handle.label, block = r.block_number, "transaction reverted")
            }
            TxOutcome::Pending(r) => {
                tracing::info!(hash = %handle.hash, label = %handle.label, block = r.block_number, "transaction still pending confirmation")
            }
            TxOutcome::TimedOut => {
                tracing::warn!(hash = %handle.hash, label = %handle.label, ?timeout, "timed out waiting for receipt")
            }
        }

        TransactionResult { hash: handle.hash, label: handle.label.clone(), outcome }
    }

    /// Like [`wait_for_confirmation`](Self::wait_for_confirmation), but gives up
    /// with `TimedOut` as soon as `cancel` resolves.
    pub async fn wait_with_cancel<C>(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
        cancel: C,
    ) -> TransactionResult
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.wait_for_confirmation(handle, timeout) => result,
            _ = cancel => {
                tracing::info!(hash = %handle.hash, label = %handle.label, "wait cancelled");
                TransactionResult { hash: handle.hash, label: handle.label.clone(), outcome: TxOutcome::TimedOut }
            }
        }
    }

    /// Submit an ordered list of writes under `policy`.
    ///
    /// Fails with `SequenceStepFailed` naming the first failing index. Results of
    /// the steps before it are returned in the error; they are not rolled back.
    /// Handles of the failing step and of any later submitted steps are returned
    /// too, so a step that merely timed out can still be waited on.
    pub async fn submit_sequence(
        &self,
        txs: Vec<PreparedTx>,
        policy: SequencePolicy,
        timeout: Duration,
    ) -> Result<Vec<TransactionResult>, BindError> {
        tracing::debug!(steps = txs.len(), ?policy, "submitting sequence");
        match policy {
            SequencePolicy::Sequential => self.submit_sequential(&txs, timeout).await,
            SequencePolicy::Parallel => self.submit_parallel(&txs, timeout).await,
        }
    }

    async fn submit_sequential(
        &self,
        txs: &[PreparedTx],
        timeout: Duration,
    ) -> Result<Vec<TransactionResult>, BindError> {
        let mut completed = Vec::with_capacity(txs.len());
        for (index, tx) in txs.iter().enumerate() {
            let handle = match self.submit(tx).await {
                Ok(handle) => handle,
                Err(e) => return Err(step_failed(index, completed, None, Vec::new(), e.to_string())),
            };
            let result = self.wait_for_confirmation(&handle, timeout).await;
            if !result.is_confirmed() {
                let reason = result.failure_reason();
                let failed = SubmittedStep { index, handle, result };
                return Err(step_failed(index, completed, Some(failed), Vec::new(), reason));
            }
            completed.push(result);
        }
        Ok(completed)
    }

    async fn submit_parallel(
        &self,
        txs: &[PreparedTx],
        timeout: Duration,
    ) -> Result<Vec<TransactionResult>, BindError> {
        let mut next_nonce: HashMap<Address, u64> = HashMap::new();
        let mut handles = Vec::with_capacity(txs.len());
        let mut submit_failure: Option<(usize, String)> = None;

        for (index, tx) in txs.iter().enumerate() {
            match self.assign_nonce(tx, &mut next_nonce).await {
                Ok(nonce) => match self.submit_with_nonce(tx, nonce).await {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        submit_failure = Some((index, e.to_string()));
                        break;
                    }
                },
                Err(e) => {
                    submit_failure = Some((index, format!("failed to fetch pending nonce: {e}")));
                    break;
                }
            }
        }

        // Everything submitted is awaited against one shared deadline.
        let deadline = Instant::now() + timeout;
        let mut steps = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = self.wait_for_confirmation(&handle, remaining).await;
            steps.push(SubmittedStep { index, handle, result });
        }

        if let Some(index) = steps.iter().position(|step| !step.result.is_confirmed()) {
            let unreported = steps.split_off(index + 1);
            let failed = steps.pop();
            let reason = failed.as_ref().map(|step| step.result.failure_reason()).unwrap_or_default();
            let completed = steps.into_iter().map(|step| step.result).collect();
            return Err(step_failed(index, completed, failed, unreported, reason));
        }
        let results = steps.into_iter().map(|step| step.result).collect();
        if let Some((index, reason)) = submit_failure {
            return Err(step_failed(index, results, None, Vec::new(), reason));
        }
        Ok(results)
    }

    /// Consecutive nonces per sender, starting at the pending nonce. Explicit
    /// nonces and sender-less writes are left alone.
    async fn assign_nonce(
        &self,
        tx: &PreparedTx,
        next_nonce: &mut HashMap<Address, u64>,
    ) -> Result<Option<u64>, TransportError> {
        if tx.opts().nonce.is_some() {
            return Ok(None);
        }
        let Some(sender) = self.sender(tx) else {
            return Ok(None);
        };
        let nonce = match next_nonce.get(&sender) {
            Some(nonce) => *nonce,
            None => self.ledger.pending_nonce(sender).await?,
        };
        next_nonce.insert(sender, nonce + 1);
        Ok(Some(nonce))
    }
}

fn step_failed(
    index: usize,
    completed: Vec<TransactionResult>,
    failed: Option<SubmittedStep>,
    unreported: Vec<SubmittedStep>,
    reason: String,
) -> BindError {
    tracing::warn!(
        index,
        completed = completed.len(),
        unreported = unreported.len(),
        %reason,
        "sequence step failed"
    );
    BindError::SequenceStepFailed { index, completed, failed: failed.map(Box::new), unreported, reason }
}
