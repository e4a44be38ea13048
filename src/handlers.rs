//! Real-time event handlers: join requests and membership changes.

use tracing::{debug, error, info};

use crate::context::BotContext;
use crate::gateway::{ChannelId, Gateway, MemberStatus};
use crate::metrics;
use crate::store::MemberId;
use crate::templates::TemplateKind;

/// A pending request to join the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub chat: ChannelId,
    pub user: MemberId,
    pub first_name: String,
}

/// A membership change pushed by Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    pub chat: ChannelId,
    pub user: MemberId,
    pub first_name: String,
    pub status: MemberStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Approval failed; nothing else was done.
    ApprovalFailed,
    /// Approved and welcomed.
    Welcomed,
    /// Approved, but the welcome message could not be delivered.
    WelcomeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Update for a chat other than the managed channel.
    OtherChat,
    /// The user is still a member.
    NotDeparted,
    /// Farewell messages are switched off.
    Disabled,
    FarewellSent,
    FarewellFailed,
}

/// Approve a join request, remember the member and send the welcome.
///
/// Store and delivery failures after a successful approval are logged; the
/// approval itself is never rolled back.
pub async fn handle_join_request<G: Gateway>(
    ctx: &BotContext<G>,
    request: &JoinRequest,
) -> JoinOutcome {
    if let Err(err) = ctx
        .gateway
        .approve_join_request(request.chat, request.user)
        .await
    {
        metrics::record_join_request(false);
        error!(
            user_id = request.user,
            chat_id = request.chat,
            "Failed to approve join request: {}",
            err
        );
        return JoinOutcome::ApprovalFailed;
    }
    metrics::record_join_request(true);
    info!(user_id = request.user, name = %request.first_name, "Approved join request");

    if let Err(err) = ctx.store.record_member(request.user).await {
        error!(user_id = request.user, "Failed to save member: {}", err);
    }

    match ctx.store.clear_departure(request.user).await {
        Ok(true) => info!(user_id = request.user, "Member rejoined, departure record cleared"),
        Ok(false) => {}
        Err(err) => error!(
            user_id = request.user,
            "Failed to clear departure record: {}",
            err
        ),
    }

    match ctx
        .send_template(TemplateKind::Welcome, request.user, &request.first_name)
        .await
    {
        Ok(()) => JoinOutcome::Welcomed,
        Err(_) => JoinOutcome::WelcomeFailed,
    }
}

/// React to a membership change in the managed channel.
pub async fn handle_member_update<G: Gateway>(
    ctx: &BotContext<G>,
    update: &MemberUpdate,
) -> LeaveOutcome {
    if update.chat != ctx.channel_id {
        debug!(chat_id = update.chat, "Ignoring membership update from another chat");
        return LeaveOutcome::OtherChat;
    }

    if !update.status.is_departed() {
        return LeaveOutcome::NotDeparted;
    }

    info!(
        user_id = update.user,
        status = update.status.as_str(),
        "Member left the channel"
    );

    if !ctx.farewell_enabled {
        return LeaveOutcome::Disabled;
    }

    match ctx
        .send_template(TemplateKind::Farewell, update.user, &update.first_name)
        .await
    {
        Ok(()) => LeaveOutcome::FarewellSent,
        Err(_) => LeaveOutcome::FarewellFailed,
    }
}
