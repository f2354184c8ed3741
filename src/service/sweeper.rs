//! Periodic housekeeping: idle ticket auto-close and idle-away presence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::ChatGateway;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Resolved tickets closed for inactivity.
    pub tickets_closed: usize,
    /// Sessions marked away.
    pub sessions_away: usize,
}

/// Runs the sweeper on a fixed interval.
#[derive(Debug, Clone)]
pub struct Sweeper {
    gateway: Arc<ChatGateway>,
    interval: Duration,
    away_after: Option<chrono::Duration>,
}

impl Sweeper {
    /// Creates a sweeper. `away_after = None` disables idle-away.
    #[must_use]
    pub fn new(gateway: Arc<ChatGateway>, interval: Duration, away_after: Option<chrono::Duration>) -> Self {
        Self {
            gateway,
            interval,
            away_after,
        }
    }

    /// Performs one sweep.
    pub async fn run_once(&self) -> SweepReport {
        let now = Utc::now();
        let tickets_closed = self.gateway.tickets().close_idle(now).await;
        let sessions_away = match self.away_after {
            Some(after) => self.gateway.mark_idle_away(now - after).await,
            None => 0,
        };
        SweepReport {
            tickets_closed,
            sessions_away,
        }
    }

    /// Spawns the sweep loop on the current runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = self.run_once().await;
                if report != SweepReport::default() {
                    tracing::info!(
                        tickets_closed = report.tickets_closed,
                        sessions_away = report.sessions_away,
                        "sweep completed"
                    );
                }
            }
        })
    }
}
