//! Discord gateway adapter: inbound event translation, the command surface,
//! and outbound dispatch through the HTTP API.

use crate::engine::PolicyEngine;
use crate::error::Result;
use crate::store::PreferenceStore;
use crate::{ChatDispatcher, InboundMessage, MemberProfile, ScopeId, presence};

use serenity::all::{
    ChannelId, Colour, Context, CreateAllowedMentions, CreateEmbed, CreateEmbedFooter,
    CreateMessage, EventHandler, GatewayIntents, Message, MessageId, MessageReference,
    ReactionType, Ready,
};
use serenity::http::{Http, Typing};
use serenity::utils::{ContentSafeOptions, content_safe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Prefix for the command surface. Messages starting with it bypass the
/// policy pipeline entirely.
pub const COMMAND_PREFIX: &str = "s!";

/// Gateway event handler wiring Discord events into the policy engine.
pub struct Handler {
    engine: Arc<PolicyEngine>,
    store: PreferenceStore,
    presence_started: AtomicBool,
}

impl Handler {
    pub fn new(engine: Arc<PolicyEngine>, store: PreferenceStore) -> Self {
        Self {
            engine,
            store,
            presence_started: AtomicBool::new(false),
        }
    }

    /// Gateway intents the bot needs: message content for trigger matching,
    /// members for mention substitution.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }

    async fn handle_command(&self, ctx: &Context, msg: &Message, input: &str) -> Result<()> {
        let mut parts = input.split_whitespace();
        match parts.next().unwrap_or_default() {
            "sydney_help" | "sydney_commands" | "sydneyhelp" => self.send_help(ctx, msg).await,
            "set_reply_probability" => {
                self.set_probability(ctx, msg, parts.next(), ProbabilityField::Reply)
                    .await
            }
            "set_reaction_probability" => {
                self.set_probability(ctx, msg, parts.next(), ProbabilityField::Reaction)
                    .await
            }
            _ => {
                msg.channel_id
                    .say(&ctx.http, "Sorry, I didn't recognize that command.")
                    .await?;
                Ok(())
            }
        }
    }

    async fn send_help(&self, ctx: &Context, msg: &Message) -> Result<()> {
        let embed = CreateEmbed::new()
            .title("SydneyBot Help")
            .description("Here are the commands you can use with SydneyBot:")
            .colour(Colour::BLUE)
            .field(
                "General Commands",
                "**s!sydney_help**\n\
                 Displays this help message.\n\n\
                 **s!set_reaction_probability <value>**\n\
                 Sets the reaction probability (0-1). Determines how often Sydney reacts to messages with emojis.\n\n\
                 **s!set_reply_probability <value>**\n\
                 Sets the reply probability (0-1). Determines how often Sydney randomly replies to messages.",
                false,
            )
            .field(
                "Interaction with Sydney",
                "Sydney will respond to messages that mention her or contain trigger words.\n\
                 She may also randomly reply or react to messages based on the set probabilities.\n\
                 To get Sydney's attention, you can mention her, use one of her trigger words, **or reply to one of her messages**.",
                false,
            )
            .field(
                "Examples",
                "- **Mentioning Sydney:** `@SydneyBot How are you today?`\n\
                 - **Using a trigger word:** `Sydney, tell me a joke!`\n\
                 - **Replying to Sydney:** *(reply to one of her messages)* `That's interesting! Tell me more.`\n\
                 - **Setting reaction probability:** `s!set_reaction_probability 0.5`\n\
                 - **Setting reply probability:** `s!set_reply_probability 0.2`",
                false,
            )
            .footer(CreateEmbedFooter::new(
                "Feel free to reach out if you have any questions!",
            ));

        msg.channel_id
            .send_message(&ctx.http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }

    async fn set_probability(
        &self,
        ctx: &Context,
        msg: &Message,
        arg: Option<&str>,
        field: ProbabilityField,
    ) -> Result<()> {
        let Some(arg) = arg else {
            msg.channel_id
                .say(&ctx.http, "Missing required argument. Please check the command usage.")
                .await?;
            return Ok(());
        };
        let Ok(value) = arg.parse::<f64>() else {
            msg.channel_id
                .say(&ctx.http, "Invalid argument type. Please check the command usage.")
                .await?;
            return Ok(());
        };
        if !(0.0..=1.0).contains(&value) {
            msg.channel_id
                .say(&ctx.http, "Probability must be between 0 and 1.")
                .await?;
            return Ok(());
        }

        let scope = msg
            .guild_id
            .map(|id| ScopeId::Guild(id.get()))
            .unwrap_or(ScopeId::DirectMessage);
        let (reply, reaction, label) = match field {
            ProbabilityField::Reply => (Some(value), None, "Reply"),
            ProbabilityField::Reaction => (None, Some(value), "Reaction"),
        };
        self.store
            .set_probabilities(&scope, msg.channel_id.get(), reply, reaction)
            .await?;

        msg.channel_id
            .say(&ctx.http, format!("{label} probability set to {value} for this channel."))
            .await?;
        Ok(())
    }
}

enum ProbabilityField {
    Reply,
    Reaction,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "gateway session ready");
        self.engine.set_self_user_id(ready.user.id.get());

        // ready fires again on reconnect; start the rotation only once.
        if !self.presence_started.swap(true, Ordering::SeqCst) {
            presence::spawn(ctx, Arc::clone(&self.engine));
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }

        if let Some(rest) = msg.content.strip_prefix(COMMAND_PREFIX) {
            if let Err(error) = self.handle_command(&ctx, &msg, rest).await {
                tracing::error!(%error, "command handling failed");
                let _ = msg
                    .channel_id
                    .say(&ctx.http, "An error occurred while processing the command.")
                    .await;
            }
            return;
        }

        let inbound = build_inbound(&ctx, &msg);
        let dispatcher = DiscordDispatcher { http: Arc::clone(&ctx.http) };
        self.engine.handle_message(&inbound, &dispatcher).await;
    }
}

/// Resolve everything the engine needs from the gateway cache up front.
fn build_inbound(ctx: &Context, msg: &Message) -> InboundMessage {
    let self_id = ctx.cache.current_user().id;
    let clean_content = content_safe(
        &ctx.cache,
        &msg.content,
        &ContentSafeOptions::default(),
        &msg.mentions,
    );

    let mut guild_name = None;
    let mut channel_name = "DM".to_string();
    let mut members = Vec::new();
    if let Some(guild) = msg.guild(&ctx.cache) {
        guild_name = Some(guild.name.clone());
        if let Some(channel) = guild.channels.get(&msg.channel_id) {
            channel_name = channel.name.clone();
        }
        members = guild
            .members
            .values()
            .map(|member| MemberProfile {
                user_id: member.user.id.get(),
                display_name: member.display_name().to_string(),
                username: member.user.name.clone(),
            })
            .collect();
    }

    let author_display_name = msg
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone());

    InboundMessage {
        message_id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        channel_name,
        guild_id: msg.guild_id.map(|id| id.get()),
        guild_name,
        author_id: msg.author.id.get(),
        author_display_name,
        content: msg.content.clone(),
        clean_content,
        mentions_self: msg.mentions.iter().any(|user| user.id == self_id),
        members,
    }
}

/// Outbound dispatch through the Discord HTTP API.
pub struct DiscordDispatcher {
    http: Arc<Http>,
}

impl ChatDispatcher for DiscordDispatcher {
    type Typing = Typing;

    fn start_typing(&self, channel_id: u64) -> Typing {
        ChannelId::new(channel_id).start_typing(&self.http)
    }

    async fn send_reply(&self, message: &InboundMessage, text: &str) -> Result<()> {
        let builder = CreateMessage::new()
            .content(text)
            .reference_message(MessageReference::from((
                ChannelId::new(message.channel_id),
                MessageId::new(message.message_id),
            )))
            // Substituted mentions still ping; the reply itself does not.
            .allowed_mentions(CreateAllowedMentions::new().all_users(true).replied_user(false));
        ChannelId::new(message.channel_id)
            .send_message(&self.http, builder)
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<()> {
        ChannelId::new(channel_id).say(&self.http, text).await?;
        Ok(())
    }

    async fn add_reaction(&self, message: &InboundMessage, glyph: &str) -> Result<()> {
        ChannelId::new(message.channel_id)
            .create_reaction(
                &self.http,
                MessageId::new(message.message_id),
                ReactionType::Unicode(glyph.to_string()),
            )
            .await?;
        Ok(())
    }
}
