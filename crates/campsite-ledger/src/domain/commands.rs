//! Device command intents and forced-shutdown feedback
//!
//! The ledger never talks to pedestals directly. It queues `set_state`
//! intents for an external dispatcher and folds shutdown feedback back into
//! its optimistic view of each meter.

use crate::domain::types::{MeterId, OrganizationId, PowerState, ShutdownReason};
use crate::error::Result;
use crate::storage::LedgerTransaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

pub const SET_STATE: &str = "set_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Superseded,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Pending => write!(f, "pending"),
            CommandStatus::Superseded => write!(f, "superseded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerCommand {
    pub organization_id: OrganizationId,
    pub meter_id: MeterId,
    pub command: String,
    pub value: PowerState,
    pub reason: Option<ShutdownReason>,
    pub created_at: DateTime<Utc>,
}

impl PowerCommand {
    pub fn set_state(organization_id: OrganizationId, meter_id: MeterId, value: PowerState) -> Self {
        Self {
            organization_id,
            meter_id,
            command: SET_STATE.to_string(),
            value,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn off(
        organization_id: OrganizationId,
        meter_id: MeterId,
        reason: Option<ShutdownReason>,
    ) -> Self {
        Self {
            reason,
            ..Self::set_state(organization_id, meter_id, PowerState::Off)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Enqueued,
    AlreadyPending,
}

/// Forced-shutdown feedback from the external guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownEvent {
    pub organization_id: OrganizationId,
    pub meter_id: MeterId,
    pub reason: ShutdownReason,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

pub struct PowerCommandIssuer;

impl PowerCommandIssuer {
    /// Queue an intent and record the optimistic state inside `tx`.
    pub async fn issue(
        tx: &mut dyn LedgerTransaction,
        command: &PowerCommand,
    ) -> Result<EnqueueOutcome> {
        let outcome = tx.enqueue_command(command).await?;
        tx.set_power_state(
            &command.organization_id,
            &command.meter_id,
            command.value,
            command.reason,
        )
        .await?;

        match outcome {
            EnqueueOutcome::Enqueued => info!(
                meter = %command.meter_id,
                value = %command.value,
                reason = ?command.reason,
                "queued power command"
            ),
            EnqueueOutcome::AlreadyPending => debug!(
                meter = %command.meter_id,
                value = %command.value,
                "identical power command already pending"
            ),
        }

        Ok(outcome)
    }

    /// Fold a forced-shutdown event into local state: power is assumed OFF.
    pub async fn apply_feedback(
        tx: &mut dyn LedgerTransaction,
        event: &ShutdownEvent,
    ) -> Result<()> {
        tx.set_power_state(
            &event.organization_id,
            &event.meter_id,
            PowerState::Off,
            Some(event.reason),
        )
        .await?;

        info!(
            meter = %event.meter_id,
            reason = %event.reason,
            "meter forced off by guard"
        );
        Ok(())
    }
}
