//! Support ticket aggregate and its lifecycle state machine.
//!
//! ```text
//! open ──assign──▶ assigned ──start_work──▶ in_progress ──resolve──▶ resolved ──close──▶ closed
//!                                                ▲                     │
//!                                                └──────reopen─────────┘  (within the reopen window)
//! ```
//!
//! [`Ticket::apply`] is the only way status changes. It validates the whole
//! command before touching any field, so a rejected command leaves the
//! ticket exactly as it was.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{RoomId, TicketId, UserId};
use crate::error::ChatError;

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Waiting for an agent.
    Open,
    /// An agent has taken the ticket.
    Assigned,
    /// The agent is working on it.
    InProgress,
    /// Solved; may still be reopened within the window.
    Resolved,
    /// Terminal.
    Closed,
}

impl TicketStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Open,
        Self::Assigned,
        Self::InProgress,
        Self::Resolved,
        Self::Closed,
    ];

    /// Returns `true` for the terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ChatError::InvalidPayload(format!("unknown ticket status: {s}")))
    }
}

/// Ticket priority. Orthogonal to status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low urgency.
    Low,
    /// Default urgency.
    #[default]
    Normal,
    /// Escalated.
    High,
}

impl Priority {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Name of a lifecycle action, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketAction {
    /// `open → assigned`.
    Assign,
    /// `assigned → in_progress`.
    StartWork,
    /// `in_progress → resolved`.
    Resolve,
    /// `resolved → closed`.
    Close,
    /// `resolved → in_progress`.
    Reopen,
}

impl fmt::Display for TicketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Assign => "assign",
            Self::StartWork => "start work on",
            Self::Resolve => "resolve",
            Self::Close => "close",
            Self::Reopen => "reopen",
        })
    }
}

/// A lifecycle command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketCommand {
    /// Hand the ticket to an agent.
    Assign {
        /// Agent taking the ticket.
        agent_id: UserId,
    },
    /// Begin work.
    StartWork,
    /// Mark solved with a summary.
    Resolve {
        /// Resolution summary.
        summary: String,
    },
    /// Close for good.
    Close,
    /// Resume work on a resolved ticket.
    Reopen,
}

impl TicketCommand {
    /// Returns the action name.
    #[must_use]
    pub const fn action(&self) -> TicketAction {
        match self {
            Self::Assign { .. } => TicketAction::Assign,
            Self::StartWork => TicketAction::StartWork,
            Self::Resolve { .. } => TicketAction::Resolve,
            Self::Close => TicketAction::Close,
            Self::Reopen => TicketAction::Reopen,
        }
    }
}

/// Who caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// A user acting through a session.
    User {
        /// Acting user.
        user_id: UserId,
    },
    /// The server (idle sweeper, automatic start of work).
    System,
}

impl Actor {
    /// Shorthand for [`Actor::User`].
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self::User { user_id }
    }
}

/// One entry in a ticket's audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransitionRecord {
    /// Status before.
    pub from: TicketStatus,
    /// Status after.
    pub to: TicketStatus,
    /// Who did it.
    pub actor: Actor,
    /// When.
    pub at: DateTime<Utc>,
}

/// A tracked support case, bound 1:1 to a support room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Ticket {
    /// Ticket identifier.
    pub ticket_id: TicketId,
    /// Bound support room.
    pub room_id: RoomId,
    /// User who asked for help.
    pub requester_user_id: UserId,
    /// Agent handling the ticket.
    pub assigned_agent_id: Option<UserId>,
    /// Lifecycle status.
    pub status: TicketStatus,
    /// Urgency.
    pub priority: Priority,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition or priority change.
    pub updated_at: DateTime<Utc>,
    /// Last transition or room message; drives idle auto-close.
    pub last_activity_at: DateTime<Utc>,
    /// Set while `resolved`; anchors the reopen window.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Summary given at resolution.
    pub resolution: Option<String>,
    /// Ordered transition history.
    pub history: Vec<TransitionRecord>,
}

impl Ticket {
    /// Creates an `open` ticket.
    #[must_use]
    pub fn new(ticket_id: TicketId, room_id: RoomId, requester: UserId, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            ticket_id,
            room_id,
            requester_user_id: requester,
            assigned_agent_id: None,
            status: TicketStatus::Open,
            priority,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            resolved_at: None,
            resolution: None,
            history: Vec::new(),
        }
    }

    /// Returns `true` if `user` is the requester or the assigned agent.
    #[must_use]
    pub fn is_party(&self, user: &UserId) -> bool {
        &self.requester_user_id == user || self.assigned_agent_id.as_ref() == Some(user)
    }

    /// Returns `true` for a resolved ticket idle for at least `idle`.
    #[must_use]
    pub fn is_idle_resolved(&self, now: DateTime<Utc>, idle: Duration) -> bool {
        self.status == TicketStatus::Resolved && now - self.last_activity_at >= idle
    }

    /// Validates and applies a lifecycle command.
    ///
    /// # Errors
    ///
    /// - [`ChatError::TicketNotOpen`], [`ChatError::TicketNotAssigned`],
    ///   [`ChatError::TicketNotInProgress`] when `assign`, `start_work` or
    ///   `resolve` is attempted from the wrong status.
    /// - [`ChatError::InvalidTicketTransition`] for any command on a closed
    ///   ticket, `close` outside `resolved`, and `reopen` outside
    ///   `resolved` or after `reopen_window` has elapsed.
    pub fn apply(
        &mut self,
        command: TicketCommand,
        actor: Actor,
        now: DateTime<Utc>,
        reopen_window: Duration,
    ) -> Result<TransitionRecord, ChatError> {
        let from = self.status;
        let to = self.target(&command, now, reopen_window)?;

        match command {
            TicketCommand::Assign { agent_id } => self.assigned_agent_id = Some(agent_id),
            TicketCommand::Resolve { summary } => {
                self.resolved_at = Some(now);
                self.resolution = Some(summary);
            }
            TicketCommand::Reopen => {
                self.resolved_at = None;
                self.resolution = None;
            }
            TicketCommand::StartWork | TicketCommand::Close => {}
        }

        let record = TransitionRecord { from, to, actor, at: now };
        self.status = to;
        self.updated_at = now;
        self.last_activity_at = now;
        self.history.push(record.clone());
        Ok(record)
    }

    fn target(
        &self,
        command: &TicketCommand,
        now: DateTime<Utc>,
        reopen_window: Duration,
    ) -> Result<TicketStatus, ChatError> {
        let ticket_id = self.ticket_id;
        let status = self.status;
        let invalid = || ChatError::InvalidTicketTransition {
            ticket_id,
            status,
            action: command.action(),
        };

        if status.is_terminal() {
            return Err(invalid());
        }

        match (command, status) {
            (TicketCommand::Assign { .. }, TicketStatus::Open) => Ok(TicketStatus::Assigned),
            (TicketCommand::Assign { .. }, _) => Err(ChatError::TicketNotOpen { ticket_id, status }),
            (TicketCommand::StartWork, TicketStatus::Assigned) => Ok(TicketStatus::InProgress),
            (TicketCommand::StartWork, _) => Err(ChatError::TicketNotAssigned { ticket_id, status }),
            (TicketCommand::Resolve { .. }, TicketStatus::InProgress) => Ok(TicketStatus::Resolved),
            (TicketCommand::Resolve { .. }, _) => {
                Err(ChatError::TicketNotInProgress { ticket_id, status })
            }
            (TicketCommand::Close, TicketStatus::Resolved) => Ok(TicketStatus::Closed),
            (TicketCommand::Reopen, TicketStatus::Resolved) => match self.resolved_at {
                Some(resolved_at) if now - resolved_at <= reopen_window => {
                    Ok(TicketStatus::InProgress)
                }
                _ => Err(invalid()),
            },
            (TicketCommand::Close | TicketCommand::Reopen, _) => Err(invalid()),
        }
    }
}
