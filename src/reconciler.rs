//! Left-member retention tracker.
//!
//! A reconciliation pass walks the known-members set, asks Telegram for each
//! member's live status, and advances the member's cadence state:
//! departed members get re-engagement notices on the configured schedule,
//! members seen back in the channel have their departure record dropped.
//! The departures file is written once at the end of the pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::cadence::{now_unix, UnixSeconds};
use crate::context::BotContext;
use crate::gateway::Gateway;
use crate::metrics;
use crate::store::MemberId;
use crate::templates::TemplateKind;
use crate::Result;

/// Counters of a single pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub departed: usize,
    pub rejoined: usize,
    pub notices_sent: usize,
    pub send_failures: usize,
    pub lookup_failures: usize,
    pub capped: usize,
}

pub struct Reconciler<G> {
    ctx: Arc<BotContext<G>>,
}

impl<G: Gateway + 'static> Reconciler<G> {
    pub fn new(ctx: Arc<BotContext<G>>) -> Self {
        Self { ctx }
    }

    /// Run one reconciliation pass at time `now`.
    ///
    /// Per-member failures are logged and counted; only a failure to write
    /// the departures file is returned.
    pub async fn run_pass(&self, now: UnixSeconds) -> Result<PassSummary> {
        let members = self.ctx.store.known_members().await;
        let mut summary = PassSummary::default();

        for member in members {
            summary.checked += 1;
            self.reconcile_member(member, now, &mut summary).await;
        }

        self.ctx.store.flush_departures().await?;
        Ok(summary)
    }

    async fn reconcile_member(
        &self,
        member: MemberId,
        now: UnixSeconds,
        summary: &mut PassSummary,
    ) {
        let status = match self
            .ctx
            .gateway
            .member_status(self.ctx.channel_id, member)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                summary.lookup_failures += 1;
                metrics::record_member_check("error");
                error!(user_id = member, "Error checking member: {}", err);
                return;
            }
        };

        if status.is_departed() {
            summary.departed += 1;
            metrics::record_member_check("departed");
            self.handle_departed(member, now, summary).await;
        } else {
            metrics::record_member_check("member");
            if self.ctx.store.remove_departure(member).await.is_some() {
                summary.rejoined += 1;
                info!(
                    user_id = member,
                    status = status.as_str(),
                    "Member rejoined, departure record cleared"
                );
            }
        }
    }

    async fn handle_departed(
        &self,
        member: MemberId,
        now: UnixSeconds,
        summary: &mut PassSummary,
    ) {
        let policy = self.ctx.retention.policy;
        // Records at the cap are kept exactly as they are.
        let record = self
            .ctx
            .store
            .upsert_departure(member, |existing| match existing {
                Some(record) if policy.is_exhausted(&record) => record,
                other => policy.observe_departed(other, now),
            })
            .await;

        if policy.is_exhausted(&record) {
            summary.capped += 1;
            debug!(user_id = member, count = record.occurrence_count, "Notice cap reached");
            return;
        }

        if !policy.is_due(&record, now) {
            return;
        }

        let first_name = self.ctx.first_name(member).await;
        match self
            .ctx
            .send_template(TemplateKind::Reengagement, member, &first_name)
            .await
        {
            Ok(()) => {
                summary.notices_sent += 1;
                // A rejoin during the send removes the record; it must stay removed.
                match self
                    .ctx
                    .store
                    .update_departure(member, |record| record.record_sent(now))
                    .await
                {
                    Some(record) => info!(
                        user_id = member,
                        count = record.occurrence_count,
                        "Sent re-engagement notice"
                    ),
                    None => info!(
                        user_id = member,
                        "Sent re-engagement notice, member rejoined meanwhile"
                    ),
                }
            }
            // Logged by send_template; retried on the next pass.
            Err(_) => summary.send_failures += 1,
        }
    }

    /// Run passes forever: first after `first_pass_delay_secs`, then every
    /// `poll_interval_secs`.
    pub async fn run(self) {
        let settings = self.ctx.retention;
        sleep(Duration::from_secs(settings.first_pass_delay_secs)).await;

        let mut ticker = interval(Duration::from_secs(settings.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let start = Instant::now();
            let result = self.run_pass(now_unix()).await;
            metrics::record_pass(start.elapsed(), self.ctx.store.known_count().await);

            match result {
                Ok(summary) => {
                    info!(
                        checked = summary.checked,
                        departed = summary.departed,
                        rejoined = summary.rejoined,
                        sent = summary.notices_sent,
                        failed = summary.send_failures + summary.lookup_failures,
                        "Reconciliation pass finished"
                    );
                }
                Err(err) => {
                    error!("Reconciliation pass failed to persist departures: {}", err);
                }
            }
        }
    }
}

/// Spawn the periodic reconciliation loop.
pub fn spawn_reconciler<G: Gateway + 'static>(ctx: Arc<BotContext<G>>) -> JoinHandle<()> {
    tokio::spawn(Reconciler::new(ctx).run())
}
