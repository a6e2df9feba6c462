//! Safety control plane.
//!
//! `SafetyGate` is the only writer of the singleton `SafetyState`. Every
//! change goes through `propose_transition`, which:
//!
//! 1. diffs the proposal against a fresh read of the stored state,
//! 2. demands the exact confirmation phrase for a critical transition
//!    (enabling mainnet, unlocking execution, disabling safe mode),
//! 3. clears or stamps the derived reason/timestamp fields,
//! 4. commits the new version together with one audit entry, retrying a
//!    bounded number of times when a concurrent writer got there first.
//!
//! Business-rule mismatches come back as `SafetyError::Rejected` and never
//! touch the store. Only store failures surface as `SafetyError::Store`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::{RecordStore, StoreError};
use crate::types::{FieldChange, LaunchStage, PipelineError, SafetyAuditEntry, SafetyState};

pub const PHRASE_ENABLE_MAINNET: &str = "I CONFIRM MAINNET";
pub const PHRASE_UNLOCK_EXECUTION: &str = "I CONFIRM UNLOCK EXECUTION";
pub const PHRASE_DISABLE_SAFE_MODE: &str = "I CONFIRM DISABLE SAFE MODE";

/// Commit attempts before a version conflict is handed back to the caller.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Fields excluded from audit diffs; they change on every commit.
const BOOKKEEPING_FIELDS: &[&str] = &["version", "updatedAt", "updatedBy"];

// ---------------------------------------------------------------------------
// Critical actions
// ---------------------------------------------------------------------------

/// Transitions that need an exact confirmation phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalAction {
    EnableMainnet,
    UnlockExecution,
    DisableSafeMode,
}

impl CriticalAction {
    pub fn required_phrase(&self) -> &'static str {
        match self {
            CriticalAction::EnableMainnet => PHRASE_ENABLE_MAINNET,
            CriticalAction::UnlockExecution => PHRASE_UNLOCK_EXECUTION,
            CriticalAction::DisableSafeMode => PHRASE_DISABLE_SAFE_MODE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CriticalAction::EnableMainnet => "enable_mainnet",
            CriticalAction::UnlockExecution => "unlock_execution",
            CriticalAction::DisableSafeMode => "disable_safe_mode",
        }
    }

    /// The critical transitions `before → after` performs.
    fn detect(before: &SafetyState, after: &SafetyState) -> Vec<CriticalAction> {
        let mut found = Vec::new();
        if !before.is_mainnet_mode && after.is_mainnet_mode {
            found.push(CriticalAction::EnableMainnet);
        }
        if before.execution_locked && !after.execution_locked {
            found.push(CriticalAction::UnlockExecution);
        }
        if before.safe_mode_enabled && !after.safe_mode_enabled {
            found.push(CriticalAction::DisableSafeMode);
        }
        found
    }
}

impl fmt::Display for CriticalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CriticalAction {
    type Err = RejectedTransition;

    /// Accepts `enable_mainnet`, `ENABLE_MAINNET`, `enable-mainnet` and `enableMainnet`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "enablemainnet" => Ok(CriticalAction::EnableMainnet),
            "unlockexecution" => Ok(CriticalAction::UnlockExecution),
            "disablesafemode" => Ok(CriticalAction::DisableSafeMode),
            _ => Err(RejectedTransition::new(
                RejectReason::ActionMismatch,
                format!("unknown action: {s}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a proposed transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    PhraseMismatch,
    UnknownField,
    InvalidValue,
    MultipleCriticalTransitions,
    ActionMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason:?}: {detail}")]
pub struct RejectedTransition {
    pub reason: RejectReason,
    pub detail: String,
}

impl RejectedTransition {
    pub fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Safety transition rejected: {0}")]
    Rejected(RejectedTransition),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RejectedTransition> for SafetyError {
    fn from(rejection: RejectedTransition) -> Self {
        SafetyError::Rejected(rejection)
    }
}

/// Store failures stay `PipelineError::Store`.
impl From<SafetyError> for PipelineError {
    fn from(e: SafetyError) -> Self {
        match e {
            SafetyError::Store(s) => PipelineError::Store(s),
            SafetyError::Rejected(r) => PipelineError::Safety(r.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Proposed updates
// ---------------------------------------------------------------------------

/// A partial `SafetyState`. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyUpdate {
    pub auto_arbitrage_enabled: Option<bool>,
    pub safe_mode_enabled: Option<bool>,
    pub safe_mode_reason: Option<String>,
    pub execution_locked: Option<bool>,
    pub execution_lock_reason: Option<String>,
    pub is_mainnet_mode: Option<bool>,
    pub launch_stage: Option<LaunchStage>,
    pub native_automation_enabled: Option<bool>,
    pub evm_automation_enabled: Option<bool>,
    pub wallet_check_enabled: Option<bool>,
}

impl SafetyUpdate {
    /// Parse the `updates` object of an operator request (camelCase keys).
    pub fn from_json_map(map: &Map<String, Value>) -> Result<Self, RejectedTransition> {
        let mut update = SafetyUpdate::default();
        for (key, value) in map {
            match key.as_str() {
                "autoArbitrageEnabled" => update.auto_arbitrage_enabled = Some(bool_field(key, value)?),
                "safeModeEnabled" => update.safe_mode_enabled = Some(bool_field(key, value)?),
                "safeModeReason" => update.safe_mode_reason = Some(string_field(key, value)?),
                "executionLocked" => update.execution_locked = Some(bool_field(key, value)?),
                "executionLockReason" => update.execution_lock_reason = Some(string_field(key, value)?),
                "isMainnetMode" => update.is_mainnet_mode = Some(bool_field(key, value)?),
                "launchStage" => {
                    let stage = serde_json::from_value::<LaunchStage>(value.clone()).map_err(|_| {
                        RejectedTransition::new(
                            RejectReason::InvalidValue,
                            format!("{key} must be one of DEVELOPMENT, STAGING, PRE_LAUNCH, LIVE"),
                        )
                    })?;
                    update.launch_stage = Some(stage);
                }
                "nativeAutomationEnabled" => {
                    update.native_automation_enabled = Some(bool_field(key, value)?)
                }
                "evmAutomationEnabled" => update.evm_automation_enabled = Some(bool_field(key, value)?),
                "walletCheckEnabled" => update.wallet_check_enabled = Some(bool_field(key, value)?),
                _ => {
                    return Err(RejectedTransition::new(
                        RejectReason::UnknownField,
                        format!("unknown or read-only field: {key}"),
                    ))
                }
            }
        }
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        *self == SafetyUpdate::default()
    }

    /// Apply onto `current`, maintaining the derived reason/timestamp fields.
    fn apply(&self, current: &SafetyState) -> Result<SafetyState, RejectedTransition> {
        let now = Utc::now();
        let mut next = current.clone();

        if let Some(v) = self.auto_arbitrage_enabled {
            next.auto_arbitrage_enabled = v;
        }
        if let Some(v) = self.is_mainnet_mode {
            next.is_mainnet_mode = v;
        }
        if let Some(v) = self.launch_stage {
            next.launch_stage = v;
        }
        if let Some(v) = self.native_automation_enabled {
            next.native_automation_enabled = v;
        }
        if let Some(v) = self.evm_automation_enabled {
            next.evm_automation_enabled = v;
        }
        if let Some(v) = self.wallet_check_enabled {
            next.wallet_check_enabled = v;
        }

        // Safe mode
        next.safe_mode_enabled = self.safe_mode_enabled.unwrap_or(current.safe_mode_enabled);
        if next.safe_mode_enabled {
            if !current.safe_mode_enabled {
                next.safe_mode_triggered_at = Some(now);
                next.safe_mode_reason = Some("manual".to_string());
            }
            if let Some(reason) = &self.safe_mode_reason {
                next.safe_mode_reason = Some(reason.clone());
            }
        } else {
            if self.safe_mode_reason.is_some() {
                return Err(RejectedTransition::new(
                    RejectReason::InvalidValue,
                    "safeModeReason requires safe mode to be enabled",
                ));
            }
            next.safe_mode_reason = None;
            next.safe_mode_triggered_at = None;
        }

        // Execution lock
        next.execution_locked = self.execution_locked.unwrap_or(current.execution_locked);
        if next.execution_locked {
            if !current.execution_locked {
                next.execution_locked_at = Some(now);
                next.execution_lock_reason = Some("manual lock".to_string());
            }
            if let Some(reason) = &self.execution_lock_reason {
                next.execution_lock_reason = Some(reason.clone());
            }
        } else {
            if self.execution_lock_reason.is_some() {
                return Err(RejectedTransition::new(
                    RejectReason::InvalidValue,
                    "executionLockReason requires execution to be locked",
                ));
            }
            next.execution_lock_reason = None;
            next.execution_locked_at = None;
        }

        Ok(next)
    }
}

fn bool_field(key: &str, value: &Value) -> Result<bool, RejectedTransition> {
    value.as_bool().ok_or_else(|| {
        RejectedTransition::new(RejectReason::InvalidValue, format!("{key} must be a boolean"))
    })
}

fn string_field(key: &str, value: &Value) -> Result<String, RejectedTransition> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(RejectedTransition::new(
            RejectReason::InvalidValue,
            format!("{key} must be a non-empty string"),
        )),
    }
}

/// Field-level diff of two states, bookkeeping fields excluded.
fn diff(before: &SafetyState, after: &SafetyState) -> Vec<FieldChange> {
    let (Ok(Value::Object(old)), Ok(Value::Object(new))) =
        (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Vec::new();
    };
    new.iter()
        .filter(|(field, _)| !BOOKKEEPING_FIELDS.contains(&field.as_str()))
        .filter_map(|(field, value)| {
            let previous = old.get(field).cloned().unwrap_or(Value::Null);
            (previous != *value).then(|| FieldChange {
                field: field.clone(),
                old: previous,
                new: value.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct SafetyGate {
    store: Arc<dyn RecordStore>,
}

impl SafetyGate {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Current state; the fail-closed initial state when none is stored yet.
    pub async fn read_state(&self) -> Result<SafetyState, StoreError> {
        Ok(self
            .store
            .load_safety_state()
            .await?
            .unwrap_or_else(SafetyState::initial))
    }

    /// Validate and commit an operator-proposed change.
    ///
    /// `action` names the critical transition the caller intends; when it is
    /// omitted the transition is inferred from the diff. Either way the
    /// supplied phrase must match the transition's constant exactly.
    pub async fn propose_transition(
        &self,
        update: &SafetyUpdate,
        actor: &str,
        action: Option<CriticalAction>,
        supplied_phrase: Option<&str>,
    ) -> Result<SafetyState, SafetyError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.read_state().await?;
            let next = match Self::validate(&current, update, action, supplied_phrase) {
                Ok(next) => next,
                Err(rejection) => {
                    warn!(
                        actor,
                        reason = ?rejection.reason,
                        detail = %rejection.detail,
                        "Safety transition rejected"
                    );
                    return Err(rejection.into());
                }
            };

            let label = action.map(|a| a.as_str()).unwrap_or("update");
            match self.commit(&current, next, actor, label).await {
                Err(StoreError::VersionConflict { expected, found }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(expected, found, attempt, "Safety state changed underneath, retrying");
                    continue;
                }
                other => return other.map_err(SafetyError::from),
            }
        }
    }

    /// Enter safe mode without a phrase. A no-op if safe mode is already on.
    pub async fn trip_safe_mode(&self, reason: &str, actor: &str) -> Result<SafetyState, SafetyError> {
        let update = SafetyUpdate {
            safe_mode_enabled: Some(true),
            safe_mode_reason: Some(reason.to_string()),
            ..Default::default()
        };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.read_state().await?;
            if current.safe_mode_enabled {
                return Ok(current);
            }
            let next = update.apply(&current)?;
            match self.commit(&current, next, actor, "trip_safe_mode").await {
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => continue,
                Ok(state) => {
                    warn!(reason, actor, "Safe mode tripped");
                    return Ok(state);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn audit_log(&self, limit: usize) -> Result<Vec<SafetyAuditEntry>, StoreError> {
        self.store.safety_audit(limit).await
    }

    fn validate(
        current: &SafetyState,
        update: &SafetyUpdate,
        action: Option<CriticalAction>,
        supplied_phrase: Option<&str>,
    ) -> Result<SafetyState, RejectedTransition> {
        let next = update.apply(current)?;
        let critical = CriticalAction::detect(current, &next);

        if critical.len() > 1 {
            return Err(RejectedTransition::new(
                RejectReason::MultipleCriticalTransitions,
                format!(
                    "one critical transition per request, got: {}",
                    critical.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        let required = match (critical.first().copied(), action) {
            (Some(found), Some(named)) if found != named => {
                return Err(RejectedTransition::new(
                    RejectReason::ActionMismatch,
                    format!("action {named} does not match requested transition {found}"),
                ))
            }
            (Some(found), _) => Some(found),
            (None, Some(named)) if !Self::targets(update, named) => {
                return Err(RejectedTransition::new(
                    RejectReason::ActionMismatch,
                    format!("action {named} is not part of the requested updates"),
                ))
            }
            (None, named) => named,
        };

        if let Some(required) = required {
            if supplied_phrase != Some(required.required_phrase()) {
                return Err(RejectedTransition::new(
                    RejectReason::PhraseMismatch,
                    format!("{required} requires its exact confirmation phrase"),
                ));
            }
        }

        Ok(next)
    }

    /// Whether `update` asks for the target value of `action`.
    fn targets(update: &SafetyUpdate, action: CriticalAction) -> bool {
        match action {
            CriticalAction::EnableMainnet => update.is_mainnet_mode == Some(true),
            CriticalAction::UnlockExecution => update.execution_locked == Some(false),
            CriticalAction::DisableSafeMode => update.safe_mode_enabled == Some(false),
        }
    }

    async fn commit(
        &self,
        current: &SafetyState,
        mut next: SafetyState,
        actor: &str,
        action: &str,
    ) -> Result<SafetyState, StoreError> {
        let changes = diff(current, &next);
        if changes.is_empty() {
            return Ok(current.clone());
        }

        let now = Utc::now();
        next.version = current.version + 1;
        next.updated_at = now;
        next.updated_by = actor.to_string();

        let audit = SafetyAuditEntry {
            id: Uuid::new_v4(),
            version: next.version,
            actor: actor.to_string(),
            action: action.to_string(),
            changes,
            at: now,
        };
        self.store.commit_safety_state(current.version, &next, &audit).await?;

        info!(
            actor,
            action,
            version = next.version,
            fields = audit.changes.len(),
            state = %next,
            "Safety state committed"
        );
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
