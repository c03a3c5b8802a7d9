//! # Escrow Engine
//!
//! Runs one state-machine call per invocation against persisted state:
//!
//! 1. Enter the call's serialization scope.
//! 2. Reconstruct the working ledger from the checkpoint.
//! 3. Hydrate the target entry, its dispute record and every balance the
//!    call may touch from the record store.
//! 4. For `create`, quote the verifier from the directory.
//! 5. Apply the call through the pure core.
//! 6. Write back: balance deltas, entry and dispute records, the
//!    checkpoint (atomically advanced by the counter delta), the journal.
//! 7. Publish events.
//!
//! A rejected call writes nothing.
//!
//! ## Commit Lock
//!
//! Write-back runs under one engine-wide mutex so journal order matches
//! commit order. Calls that can debit a pending balance (`withdraw`, and
//! `raiseDispute`, which may reverse a release) hold it for the whole
//! call, so the balance they validated against cannot move underneath
//! them.
//!
//! ## Fraud Gate
//!
//! With a [`RiskScorer`] configured, a successful verification submission
//! is scored outside the entry's scope and the outcome is reported as
//! `completeFraudCheck` under the configured gate oracle. Scorer failures
//! leave the entry in `FRAUD_CHECK_PENDING` for a human oracle or the
//! dispute window.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use vesc_core::{
    AccountId, Amount, BalanceKind, Caller, ErrorClass, EscrowError, RequestId, Timestamp,
};
use vesc_ledger::{
    apply, Bucket, Counters, DisputeInfo, Effects, EscrowCall, EscrowRequest, EscrowStatus,
    EventKind, FraudPolicy, Ledger, LedgerPolicy, Summary, Verdict, VerifierQuote,
};
use vesc_replay::{reconstruct, Checkpoint, JournalError, JournalRecord};

use crate::config::{ConfigError, EngineConfig};
use crate::memory::MemoryPorts;
use crate::ports::{CollaboratorError, EscrowEvent, Ports, RiskScorer, StoreError};
use crate::scope::{ScopeKey, Scopes};

/// Errors from the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The core rejected the call.
    #[error(transparent)]
    Escrow(#[from] EscrowError),

    /// A store failed.
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    /// A collaborator failed.
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// The journal failed to replay or serialize.
    #[error("journal failure: {0}")]
    Journal(#[from] JournalError),

    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// The core rejection, if this is one.
    pub fn escrow(&self) -> Option<&EscrowError> {
        match self {
            Self::Escrow(e) => Some(e),
            _ => None,
        }
    }
}

/// What an accepted call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    /// The call's name.
    pub call: &'static str,
    /// The entry it targeted.
    pub request_id: Option<RequestId>,
    /// The entry's status afterwards.
    pub status: Option<EscrowStatus>,
    /// Events published, in order.
    pub events: Vec<EventKind>,
    /// Counters as committed.
    pub counters: Counters,
    /// Amount paid out by a withdrawal.
    pub withdrawn: Amount,
    /// Journal sequence number.
    pub seq: u64,
    /// Whether the checkpoint was missing or malformed before the call.
    pub degraded: bool,
}

/// Outcome of [`EscrowEngine::sweep_expired`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries cancelled.
    pub cancelled: Vec<RequestId>,
    /// Entries that could not be cancelled, with the reason.
    pub failed: Vec<(RequestId, String)>,
}

/// The escrow orchestrator.
pub struct EscrowEngine {
    policy: LedgerPolicy,
    fraud_policy: FraudPolicy,
    gate_oracle: Caller,
    ports: Ports,
    scopes: Scopes,
    commit: Mutex<()>,
}

impl std::fmt::Debug for EscrowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowEngine")
            .field("policy", &self.policy)
            .field("fraud_policy", &self.fraud_policy)
            .field("gate_oracle", &self.gate_oracle)
            .field("scorer", &self.ports.scorer.is_some())
            .finish_non_exhaustive()
    }
}

impl EscrowEngine {
    /// Build an engine from configuration and collaborators.
    pub fn new(config: &EngineConfig, ports: Ports) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            policy: config.policy()?,
            fraud_policy: config.fraud_policy(),
            gate_oracle: config.gate_oracle()?,
            ports,
            scopes: Scopes::new(),
            commit: Mutex::new(()),
        })
    }

    /// Build an engine over fresh in-memory adapters. The verifier
    /// directory comes from the configuration.
    pub fn in_memory(
        config: &EngineConfig,
        scorer: Option<Arc<dyn RiskScorer>>,
    ) -> Result<(Self, MemoryPorts), EngineError> {
        let memory = MemoryPorts::new(config.directory()?, config.policy()?);
        let engine = Self::new(config, memory.ports(scorer))?;
        Ok((engine, memory))
    }

    /// The ledger policy in force.
    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    // ── Operations ─────────────────────────────────────────────────────

    /// Open an entry. The verifier is quoted from the directory.
    pub fn create(
        &self,
        caller: &Caller,
        request_id: RequestId,
        verifier: AccountId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Receipt, EngineError> {
        self.execute(
            caller,
            EscrowCall::Create {
                request_id,
                verifier,
                amount,
                quote: VerifierQuote {
                    active: false,
                    fee: 0,
                },
            },
            now,
        )
    }

    /// Confirm the funds of an entry are locked.
    pub fn lock_funds(&self, caller: &Caller, request_id: RequestId, now: Timestamp) -> Result<Receipt, EngineError> {
        self.execute(caller, EscrowCall::LockFunds { request_id }, now)
    }

    /// Submit a verification payload, then run the fraud gate if a risk
    /// scorer is configured. The returned receipt reflects the last call
    /// that committed.
    pub fn submit_verification(
        &self,
        caller: &Caller,
        request_id: RequestId,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> Result<Receipt, EngineError> {
        let receipt = self.execute(
            caller,
            EscrowCall::SubmitVerification {
                request_id,
                payload: payload.clone(),
            },
            now,
        )?;
        let Some(scorer) = self.ports.scorer.clone() else {
            return Ok(receipt);
        };
        Ok(self
            .run_fraud_gate(scorer.as_ref(), request_id, &payload, now)
            .unwrap_or(receipt))
    }

    /// Report a fraud-check outcome as an oracle.
    pub fn complete_fraud_check(
        &self,
        caller: &Caller,
        request_id: RequestId,
        risk_score: u8,
        is_fraud: bool,
        now: Timestamp,
    ) -> Result<Receipt, EngineError> {
        self.execute(
            caller,
            EscrowCall::CompleteFraudCheck {
                request_id,
                risk_score,
                is_fraud,
            },
            now,
        )
    }

    /// Raise a dispute as the entry's user or verifier.
    pub fn raise_dispute(
        &self,
        caller: &Caller,
        request_id: RequestId,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<Receipt, EngineError> {
        self.execute(
            caller,
            EscrowCall::RaiseDispute {
                request_id,
                reason: reason.into(),
            },
            now,
        )
    }

    /// Rule on an open dispute.
    pub fn resolve_dispute(
        &self,
        caller: &Caller,
        request_id: RequestId,
        user_favored: bool,
        resolution: impl Into<String>,
        now: Timestamp,
    ) -> Result<Receipt, EngineError> {
        self.execute(
            caller,
            EscrowCall::ResolveDispute {
                request_id,
                user_favored,
                resolution: resolution.into(),
            },
            now,
        )
    }

    /// Cancel an entry whose deadline passed before verification.
    pub fn cancel_expired(&self, caller: &Caller, request_id: RequestId, now: Timestamp) -> Result<Receipt, EngineError> {
        self.execute(caller, EscrowCall::CancelExpired { request_id }, now)
    }

    /// Pay out the caller's pending balance for its role.
    pub fn withdraw(&self, caller: &Caller, now: Timestamp) -> Result<Receipt, EngineError> {
        self.execute(caller, EscrowCall::Withdraw, now)
    }

    /// Run one call through the full invocation pipeline.
    ///
    /// Any quote carried by a `Create` call is replaced with the directory's.
    pub fn execute(&self, caller: &Caller, call: EscrowCall, now: Timestamp) -> Result<Receipt, EngineError> {
        let name = call.name();
        let span = tracing::info_span!(
            "escrow_call",
            invocation = %Uuid::new_v4(),
            call = name,
            caller = %caller.account,
            role = %caller.role,
        );
        let _entered = span.enter();

        let bucket = caller.role.balance_kind();
        let _scope = self.scopes.enter(ScopeKey::of(&call, caller.account, bucket));
        let held = matches!(call, EscrowCall::Withdraw | EscrowCall::RaiseDispute { .. })
            .then(|| self.commit.lock());

        let result = self.run(caller, call, now, held);
        match &result {
            Ok(receipt) => {
                metrics::counter!("vesc_calls_total", "call" => name, "outcome" => "accepted").increment(1);
                tracing::info!(
                    status = receipt.status.map(|s| s.as_str()),
                    seq = receipt.seq,
                    degraded = receipt.degraded,
                    "escrow call accepted"
                );
            }
            Err(e) => {
                let outcome = e.escrow().map(|e| e.class().as_str()).unwrap_or("error");
                metrics::counter!("vesc_calls_total", "call" => name, "outcome" => outcome).increment(1);
                log_rejection(name, e);
            }
        }
        result
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// One stored entry.
    pub fn entry(&self, request_id: &RequestId) -> Result<Option<EscrowRequest>, EngineError> {
        Ok(self.ports.records.load_entry(request_id)?)
    }

    /// One stored dispute record.
    pub fn dispute(&self, request_id: &RequestId) -> Result<Option<DisputeInfo>, EngineError> {
        Ok(self.ports.records.load_dispute(request_id)?)
    }

    /// One pending balance, held credit included.
    pub fn balance(&self, account: &AccountId, kind: BalanceKind) -> Result<Amount, EngineError> {
        Ok(self.ports.records.load_balance(account, kind)?)
    }

    /// One pending bucket with its holds.
    pub fn bucket(&self, account: &AccountId, kind: BalanceKind) -> Result<Bucket, EngineError> {
        Ok(self.ports.records.load_bucket(account, kind)?)
    }

    /// The committed counters.
    pub fn counters(&self) -> Result<Counters, EngineError> {
        let bytes = self.ports.checkpoints.load()?;
        Ok(reconstruct(bytes.as_deref()).ledger.counters)
    }

    /// Journal records for one entry since the last compaction.
    pub fn history(&self, request_id: &RequestId) -> Result<Vec<JournalRecord>, EngineError> {
        let journal = self.ports.journal.load()?;
        Ok(journal.history(request_id).into_iter().cloned().collect())
    }

    // ── Maintenance ────────────────────────────────────────────────────

    /// Cancel every stored entry whose deadline has passed before
    /// verification. Each cancellation is an ordinary `cancelExpired` call.
    pub fn sweep_expired(&self, caller: &Caller, now: Timestamp) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();
        let candidates: Vec<RequestId> = self
            .ports
            .records
            .list_entries()?
            .into_iter()
            .filter(|e| {
                matches!(e.status, EscrowStatus::Created | EscrowStatus::FundsLocked) && e.is_expired_at(now)
            })
            .map(|e| e.request_id)
            .collect();
        for request_id in candidates {
            match self.cancel_expired(caller, request_id, now) {
                Ok(_) => report.cancelled.push(request_id),
                Err(e) => report.failed.push((request_id, e.to_string())),
            }
        }
        tracing::info!(
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "expiry sweep finished"
        );
        Ok(report)
    }

    /// Replay the journal into the complete ledger.
    pub fn rebuild_from_journal(&self) -> Result<Ledger, EngineError> {
        Ok(self.ports.journal.load()?.rebuild()?)
    }

    /// Fold the journal into a snapshot. Returns the snapshot's sequence number.
    pub fn compact_journal(&self) -> Result<u64, EngineError> {
        let _commit = self.commit.lock();
        let mut journal = self.ports.journal.load()?;
        journal.compact()?;
        let seq = journal.last_seq();
        self.ports.journal.replace(journal)?;
        tracing::info!(seq, "journal compacted");
        Ok(seq)
    }

    // ── Pipeline ───────────────────────────────────────────────────────

    fn run(
        &self,
        caller: &Caller,
        call: EscrowCall,
        now: Timestamp,
        held: Option<MutexGuard<'_, ()>>,
    ) -> Result<Receipt, EngineError> {
        let checkpoint = self.ports.checkpoints.load()?;
        let reconstruction = reconstruct(checkpoint.as_deref());
        let mut ledger = reconstruction.ledger;
        self.hydrate(&mut ledger, caller, &call)?;
        let call = self.quote(call)?;

        let effects = apply(&mut ledger, &self.policy, caller, &call, now)?;
        let summary = effects.summarize();

        let commit = match held {
            Some(guard) => guard,
            None => self.commit.lock(),
        };
        let (counters, seq) = self.write_back(&ledger, caller, &call, &summary, now)?;
        drop(commit);

        self.publish(&summary, counters, now);
        let request_id = call.request_id();
        Ok(Receipt {
            call: call.name(),
            request_id,
            status: request_id.and_then(|id| ledger.entry(&id)).map(|e| e.status),
            events: summary.events.iter().map(|(kind, _)| *kind).collect(),
            counters,
            withdrawn: summary.withdrawn,
            seq,
            degraded: reconstruction.degraded,
        })
    }

    /// Load the stored state the call may read into the working ledger.
    fn hydrate(&self, ledger: &mut Ledger, caller: &Caller, call: &EscrowCall) -> Result<(), EngineError> {
        let records = &self.ports.records;
        if let Some(request_id) = call.request_id() {
            if let Some(entry) = records.load_entry(&request_id)? {
                let mut buckets = vec![
                    (entry.user, BalanceKind::UserRefund),
                    (entry.verifier, BalanceKind::VerifierEarnings),
                    (self.policy.fee_recipient, BalanceKind::PlatformFee),
                ];
                // A reversal debits whoever the release actually credited.
                if let Some(recipient) = entry.fee_recipient.filter(|r| *r != self.policy.fee_recipient) {
                    buckets.push((recipient, BalanceKind::PlatformFee));
                }
                for (account, kind) in buckets {
                    ledger.set_bucket(account, kind, records.load_bucket(&account, kind)?);
                }
                ledger.entries.insert(request_id, entry);
            }
            if let Some(dispute) = records.load_dispute(&request_id)? {
                ledger.disputes.insert(request_id, dispute);
            }
        }
        if let (EscrowCall::Withdraw, Some(kind)) = (call, caller.role.balance_kind()) {
            ledger.set_bucket(caller.account, kind, records.load_bucket(&caller.account, kind)?);
        }
        Ok(())
    }

    fn quote(&self, call: EscrowCall) -> Result<EscrowCall, EngineError> {
        match call {
            EscrowCall::Create {
                request_id,
                verifier,
                amount,
                ..
            } => {
                let directory = &self.ports.directory;
                let quote = VerifierQuote {
                    active: directory.is_active(&verifier)?,
                    fee: directory.quoted_fee(&verifier)?.unwrap_or(0),
                };
                Ok(EscrowCall::Create {
                    request_id,
                    verifier,
                    amount,
                    quote,
                })
            }
            other => Ok(other),
        }
    }

    /// Persist an accepted call. Must run under the commit lock.
    fn write_back(
        &self,
        ledger: &Ledger,
        caller: &Caller,
        call: &EscrowCall,
        summary: &Summary,
        now: Timestamp,
    ) -> Result<(Counters, u64), EngineError> {
        let records = &self.ports.records;
        for delta in &summary.balances {
            records.apply_balance(delta)?;
        }
        if let Some(request_id) = call.request_id() {
            if let Some(entry) = ledger.entry(&request_id) {
                records.save_entry(entry)?;
            }
            if let Some(dispute) = ledger.dispute(&request_id) {
                records.save_dispute(dispute)?;
            }
        }

        let mut committed = Counters::default();
        self.ports.checkpoints.update(&mut |current| {
            let base = current
                .and_then(|bytes| Checkpoint::decode(bytes).ok())
                .unwrap_or_default();
            let next = base
                .advance(&summary.counters, summary.pointer)
                .map_err(|e| StoreError::Inconsistent(e.to_string()))?;
            committed = next.counters;
            Ok(next.encode())
        })?;

        let seq = self.ports.journal.append(now, *caller, call.clone())?;
        Ok((committed, seq))
    }

    fn publish(&self, summary: &Summary, counters: Counters, now: Timestamp) {
        for (kind, request_id) in &summary.events {
            let verdict = match kind {
                EventKind::FundsReleased => Some(Verdict::ReleaseToVerifier),
                EventKind::RefundIssued => Some(Verdict::RefundUser),
                _ => None,
            };
            if let Some(verdict) = verdict {
                metrics::counter!("vesc_settlements_total", "verdict" => verdict.as_str()).increment(1);
            }
            let event = EscrowEvent {
                kind: *kind,
                request_id: *request_id,
                counters,
                at: now,
            };
            if let Err(e) = self.ports.sink.publish(&event) {
                tracing::warn!(error = %e, event = kind.as_str(), request_id = %request_id, "event publication failed");
            }
        }
    }

    /// Score a submitted payload and report the outcome as the gate oracle.
    fn run_fraud_gate(
        &self,
        scorer: &dyn RiskScorer,
        request_id: RequestId,
        payload: &[u8],
        now: Timestamp,
    ) -> Option<Receipt> {
        let raw = match scorer.score(&request_id, payload) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, request_id = %request_id, "risk scorer failed, fraud check left pending");
                return None;
            }
        };
        let assessment = match self.fraud_policy.assess(raw.risk_score, raw.flagged) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(error = %e, request_id = %request_id, "risk scorer returned an unusable score");
                return None;
            }
        };
        let call = EscrowCall::CompleteFraudCheck {
            request_id,
            risk_score: assessment.risk_score,
            is_fraud: assessment.is_fraud,
        };
        self.execute(&self.gate_oracle, call, now).ok()
    }
}

fn log_rejection(call: &'static str, error: &EngineError) {
    match error {
        EngineError::Escrow(e) => match e.class() {
            ErrorClass::Authorization => {
                tracing::warn!(target: "vesc::security", call, error = %e, "unauthorized escrow call")
            }
            ErrorClass::State => tracing::info!(call, error = %e, "escrow call rejected"),
            ErrorClass::Validation => tracing::debug!(call, error = %e, "escrow call rejected"),
        },
        other => tracing::error!(call, error = %other, "escrow call failed"),
    }
}
