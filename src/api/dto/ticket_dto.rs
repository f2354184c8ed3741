//! Ticket endpoint DTOs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::PaginationMeta;
use crate::domain::{Message, Ticket, TicketCounts, TicketStatus};

/// Filter for `GET /api/v1/tickets`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TicketFilter {
    /// Only tickets in this status.
    pub status: Option<TicketStatus>,
}

/// Paginated ticket list.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TicketListResponse {
    /// Tickets on this page, oldest first.
    pub data: Vec<Ticket>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Ticket counts for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TicketStatsResponse {
    /// Every ticket ever created.
    pub total: usize,
    /// Count per status name.
    pub by_status: BTreeMap<String, usize>,
    /// Tickets not yet closed.
    pub active: usize,
}

impl From<TicketCounts> for TicketStatsResponse {
    fn from(counts: TicketCounts) -> Self {
        let active = counts
            .by_status
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, n)| n)
            .sum();
        Self {
            total: counts.total,
            by_status: counts
                .by_status
                .into_iter()
                .map(|(status, n)| (status.as_str().to_string(), n))
                .collect(),
            active,
        }
    }
}

/// Full export of a ticket and its room's messages.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TicketHistoryResponse {
    /// The ticket with its transition history.
    pub ticket: Ticket,
    /// Messages of the bound support room, in log order.
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_active_tickets() {
        let counts = TicketCounts {
            total: 6,
            by_status: vec![
                (TicketStatus::Open, 2),
                (TicketStatus::InProgress, 1),
                (TicketStatus::Closed, 3),
            ],
        };
        let stats = TicketStatsResponse::from(counts);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.by_status.get("closed"), Some(&3));
        assert_eq!(stats.by_status.get("in_progress"), Some(&1));
    }
}
