//! Messaging gateway: the Telegram operations the bot depends on.
//!
//! The reconciler and event handlers only talk to [`Gateway`], so tests can
//! drive them with an in-memory implementation. [`TeloxideGateway`] is the
//! production implementation over the Bot API.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberStatus, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode,
};

use crate::store::MemberId;
use crate::templates::{LinkButton, OutboundMessage, TextFormat};
use crate::{Error, Result};

/// Telegram chat identifier of the managed channel.
pub type ChannelId = i64;

/// Membership status of a user in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    /// `left` and `kicked` count as departed; every other status is a member.
    pub fn is_departed(&self) -> bool {
        matches!(self, MemberStatus::Left | MemberStatus::Kicked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Owner => "owner",
            MemberStatus::Administrator => "administrator",
            MemberStatus::Member => "member",
            MemberStatus::Restricted => "restricted",
            MemberStatus::Left => "left",
            MemberStatus::Kicked => "kicked",
        }
    }
}

impl From<ChatMemberStatus> for MemberStatus {
    fn from(status: ChatMemberStatus) -> Self {
        match status {
            ChatMemberStatus::Owner => MemberStatus::Owner,
            ChatMemberStatus::Administrator => MemberStatus::Administrator,
            ChatMemberStatus::Member => MemberStatus::Member,
            ChatMemberStatus::Restricted => MemberStatus::Restricted,
            ChatMemberStatus::Left => MemberStatus::Left,
            ChatMemberStatus::Banned => MemberStatus::Kicked,
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Approve a pending join request of `user` to `chat`.
    async fn approve_join_request(&self, chat: ChannelId, user: MemberId) -> Result<()>;

    /// Send a direct message (text, or photo with caption) to `user`.
    async fn send_message(&self, user: MemberId, message: &OutboundMessage) -> Result<()>;

    /// Live membership status of `user` in `channel`.
    async fn member_status(&self, channel: ChannelId, user: MemberId) -> Result<MemberStatus>;

    /// First name of `user`, if Telegram exposes one.
    async fn display_name(&self, user: MemberId) -> Result<Option<String>>;
}

/// [`Gateway`] over the Telegram Bot API.
#[derive(Clone)]
pub struct TeloxideGateway {
    bot: Bot,
}

impl TeloxideGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn user_id(id: MemberId) -> Result<UserId> {
    u64::try_from(id)
        .map(UserId)
        .map_err(|_| Error::InvalidArgument(format!("Invalid user id: {}", id)))
}

#[allow(deprecated)]
fn parse_mode(format: TextFormat) -> Option<ParseMode> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some(ParseMode::Html),
        TextFormat::Markdown => Some(ParseMode::Markdown),
        TextFormat::MarkdownV2 => Some(ParseMode::MarkdownV2),
    }
}

fn keyboard(button: &LinkButton) -> Result<InlineKeyboardMarkup> {
    let url = reqwest::Url::parse(&button.url)
        .map_err(|e| Error::InvalidArgument(format!("Invalid button url {}: {}", button.url, e)))?;
    Ok(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url(button.text.clone(), url),
    ]]))
}

fn photo_input(photo: &str) -> Result<InputFile> {
    if photo.starts_with("http://") || photo.starts_with("https://") {
        let url = reqwest::Url::parse(photo)
            .map_err(|e| Error::InvalidArgument(format!("Invalid photo url {}: {}", photo, e)))?;
        Ok(InputFile::url(url))
    } else {
        Ok(InputFile::file(photo))
    }
}

#[async_trait]
impl Gateway for TeloxideGateway {
    async fn approve_join_request(&self, chat: ChannelId, user: MemberId) -> Result<()> {
        self.bot
            .approve_chat_join_request(ChatId(chat), user_id(user)?)
            .await?;
        Ok(())
    }

    async fn send_message(&self, user: MemberId, message: &OutboundMessage) -> Result<()> {
        let chat = ChatId(user);
        let markup = message.button.as_ref().map(keyboard).transpose()?;
        let mode = parse_mode(message.format);

        match &message.photo {
            Some(photo) => {
                let mut request = self
                    .bot
                    .send_photo(chat, photo_input(photo)?)
                    .caption(message.text.clone());
                if let Some(mode) = mode {
                    request = request.parse_mode(mode);
                }
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await?;
            }
            None => {
                let mut request = self.bot.send_message(chat, message.text.clone());
                if let Some(mode) = mode {
                    request = request.parse_mode(mode);
                }
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await?;
            }
        }

        Ok(())
    }

    async fn member_status(&self, channel: ChannelId, user: MemberId) -> Result<MemberStatus> {
        let member = self
            .bot
            .get_chat_member(ChatId(channel), user_id(user)?)
            .await?;
        Ok(member.status().into())
    }

    async fn display_name(&self, user: MemberId) -> Result<Option<String>> {
        let chat = self.bot.get_chat(ChatId(user)).await?;
        Ok(chat.first_name().map(str::to_owned))
    }
}
