//! Shared bot context.
//!
//! Built once at startup and handed (behind an `Arc`) to the dispatcher,
//! the event handlers and the reconciler.

use tracing::{debug, info, warn};

use crate::config::{Config, RetentionSettings};
use crate::gateway::{ChannelId, Gateway};
use crate::metrics;
use crate::store::{MemberId, MemberStore};
use crate::templates::{TemplateKind, TemplateSet};
use crate::Result;

pub struct BotContext<G> {
    pub gateway: G,
    pub store: MemberStore,
    pub channel_id: ChannelId,
    pub templates: TemplateSet,
    pub retention: RetentionSettings,
    pub fallback_name: String,
    pub farewell_enabled: bool,
}

impl<G: Gateway> BotContext<G> {
    pub fn new(gateway: G, store: MemberStore, config: &Config) -> Self {
        Self {
            gateway,
            store,
            channel_id: config.channel_id,
            templates: config.templates.clone(),
            retention: config.retention,
            fallback_name: config.fallback_name.clone(),
            farewell_enabled: config.farewell_enabled,
        }
    }

    /// Recipient's first name, or the configured fallback when the lookup
    /// fails or the name is blank.
    pub async fn first_name(&self, user: MemberId) -> String {
        match self.gateway.display_name(user).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => self.fallback_name.clone(),
            Err(err) => {
                debug!(user_id = user, "Display name lookup failed: {}", err);
                self.fallback_name.clone()
            }
        }
    }

    /// Render `kind` for `first_name` and send it to `user`.
    pub async fn send_template(
        &self,
        kind: TemplateKind,
        user: MemberId,
        first_name: &str,
    ) -> Result<()> {
        let name = if first_name.trim().is_empty() {
            self.fallback_name.as_str()
        } else {
            first_name
        };
        let message = self.templates.get(kind).render(name);

        match self.gateway.send_message(user, &message).await {
            Ok(()) => {
                metrics::record_message(kind.label(), true);
                info!(user_id = user, kind = kind.label(), "Sent direct message");
                Ok(())
            }
            Err(err) => {
                metrics::record_message(kind.label(), false);
                warn!(user_id = user, kind = kind.label(), "Couldn't send direct message: {}", err);
                Err(err)
            }
        }
    }
}
