//! SydneyBot: a Discord conversational agent with probabilistic reply decisions
//! and OpenPipe-backed generation.

pub mod completion;
pub mod config;
pub mod conversation;
pub mod discord;
pub mod engine;
pub mod error;
pub mod presence;
pub mod prompts;
pub mod store;
pub mod text;

pub use error::{Error, Result};

use std::future::Future;

/// Conversation scope: a guild or the direct-message sentinel.
///
/// Scopes group conversation state above channel granularity. Direct messages
/// all share one sentinel scope, matching the `"DM"` key used in persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    DirectMessage,
    Guild(u64),
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeId::DirectMessage => write!(f, "DM"),
            ScopeId::Guild(id) => write!(f, "{}", id),
        }
    }
}

/// Composite key for per-channel conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub scope: ScopeId,
    pub channel_id: u64,
}

/// A guild member visible to mention substitution.
#[derive(Debug, Clone)]
pub struct MemberProfile {
    pub user_id: u64,
    pub display_name: String,
    pub username: String,
}

impl MemberProfile {
    /// The platform mention token for this member.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.user_id)
    }
}

/// Inbound message from the chat platform, as seen by the policy engine.
///
/// The adapter resolves everything that needs gateway or cache access up
/// front (clean content, member profiles, the self-mention flag) so the
/// engine stays platform-agnostic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: u64,
    pub channel_id: u64,
    pub channel_name: String,
    pub guild_id: Option<u64>,
    pub guild_name: Option<String>,
    pub author_id: u64,
    pub author_display_name: String,
    /// Raw message text, mention tokens intact.
    pub content: String,
    /// Message text with mention tokens rendered as display names.
    pub clean_content: String,
    /// Whether the agent itself appears in the message's mention set.
    pub mentions_self: bool,
    /// Guild members available for mention substitution. Empty in DMs.
    pub members: Vec<MemberProfile>,
}

impl InboundMessage {
    /// Resolve the conversation scope for this message.
    pub fn scope(&self) -> ScopeId {
        match self.guild_id {
            Some(id) => ScopeId::Guild(id),
            None => ScopeId::DirectMessage,
        }
    }

    pub fn is_direct_message(&self) -> bool {
        self.guild_id.is_none()
    }
}

/// Outbound side of the chat platform.
///
/// The engine only ever talks to this trait; the Discord adapter implements
/// it over the HTTP API and tests substitute a recording stub.
pub trait ChatDispatcher: Send + Sync {
    /// RAII guard that keeps a typing indicator alive while in scope.
    type Typing: Send;

    /// Start a typing indicator in the given channel.
    fn start_typing(&self, channel_id: u64) -> Self::Typing;

    /// Reply to the triggering message without pinging its author.
    fn send_reply(
        &self,
        message: &InboundMessage,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Send a plain message to a channel.
    fn send_message(
        &self,
        channel_id: u64,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Attach an emoji reaction to the triggering message.
    fn add_reaction(
        &self,
        message: &InboundMessage,
        glyph: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}
