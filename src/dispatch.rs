//! Update dispatch: routes join requests and membership changes from
//! Telegram to the handlers, over long polling or a webhook listener.
//!
//! In webhook mode the listener port also answers `GET /` and
//! `GET /metrics`, so platform health checks and the keep-alive ping reach
//! the same public URL as Telegram.

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use teloxide::types::{ChatJoinRequest, ChatMemberUpdated, User};
use teloxide::update_listeners::webhooks;
use tracing::{debug, error, info};

use crate::config::TransportMode;
use crate::context::BotContext;
use crate::gateway::TeloxideGateway;
use crate::handlers::{self, JoinRequest, MemberUpdate};
use crate::metrics;
use crate::{Error, Result};

pub type SharedContext = Arc<BotContext<TeloxideGateway>>;

fn member_id(user: &User) -> i64 {
    user.id.0 as i64
}

impl From<&ChatJoinRequest> for JoinRequest {
    fn from(request: &ChatJoinRequest) -> Self {
        Self {
            chat: request.chat.id.0,
            user: member_id(&request.from),
            first_name: request.from.first_name.clone(),
        }
    }
}

impl From<&ChatMemberUpdated> for MemberUpdate {
    fn from(update: &ChatMemberUpdated) -> Self {
        let user = &update.new_chat_member.user;
        Self {
            chat: update.chat.id.0,
            user: member_id(user),
            first_name: user.first_name.clone(),
            status: update.new_chat_member.status().into(),
        }
    }
}

/// Handler tree. Handlers log their own failures, so endpoints never
/// return an error to the dispatcher.
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_chat_join_request().endpoint(
            |request: ChatJoinRequest, ctx: SharedContext| async move {
                let outcome = handlers::handle_join_request(&ctx, &JoinRequest::from(&request)).await;
                debug!(user_id = request.from.id.0, ?outcome, "Join request handled");
                respond(())
            },
        ))
        .branch(Update::filter_chat_member().endpoint(
            |update: ChatMemberUpdated, ctx: SharedContext| async move {
                let update = MemberUpdate::from(&update);
                let outcome = handlers::handle_member_update(&ctx, &update).await;
                debug!(user_id = update.user, ?outcome, "Membership update handled");
                respond(())
            },
        ))
}

/// Add the health and metrics routes to the webhook router.
pub fn with_health_routes(router: Router) -> Router {
    router
        .route("/", get(|| async { metrics::HEALTH_TEXT }))
        .route("/metrics", get(metrics_text))
}

async fn metrics_text() -> Response {
    match metrics::encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run the dispatcher until Ctrl-C.
pub async fn run_dispatcher(bot: Bot, ctx: SharedContext, transport: &TransportMode) -> Result<()> {
    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![ctx])
        .default_handler(|upd| async move {
            debug!(update_id = upd.id, "Unhandled update");
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build();

    match transport {
        TransportMode::Polling => {
            info!("Starting long polling");
            dispatcher.dispatch().await;
        }
        TransportMode::Webhook { url, listen_addr } => {
            let url = reqwest::Url::parse(url)
                .map_err(|e| Error::Config(format!("Invalid webhook URL {}: {}", url, e)))?;
            info!(%url, %listen_addr, "Starting webhook listener");

            let (listener, stop_flag, router) =
                webhooks::axum_to_router(bot, webhooks::Options::new(*listen_addr, url)).await?;
            let server = axum::Server::try_bind(listen_addr).map_err(|e| {
                Error::ConnectionError(format!("Failed to bind {}: {}", listen_addr, e))
            })?;
            let app = with_health_routes(router);
            let addr = *listen_addr;
            tokio::spawn(async move {
                if let Err(err) = server
                    .serve(app.into_make_service())
                    .with_graceful_shutdown(stop_flag)
                    .await
                {
                    error!(%addr, "Webhook server failed: {}", err);
                }
            });

            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
    }

    info!("Dispatcher stopped");
    Ok(())
}
