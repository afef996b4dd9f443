//! Conversation policy engine: per-message response decisions, bounded
//! context assembly, completion orchestration, and reply post-processing.

use crate::completion::{self, ChatMessage, CompletionClient, MessageRole, RequestTags};
use crate::config::TriggerConfig;
use crate::conversation::{ConversationHistory, ConversationTurn, RecentAuthorWindow, Role};
use crate::error::Result;
use crate::store::{PreferenceStore, ProbabilityPair};
use crate::{ChatDispatcher, ConversationKey, InboundMessage};
use crate::{prompts, text};

use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

/// The one fixed natural-language instruction the engine understands.
/// Intentionally a single narrow phrasing, not a parser.
static PREFIX_INSTRUCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)start your messages with(?: that)? by saying (.+?) before everything").unwrap()
});

const PROCESSING_APOLOGY: &str = "Sorry, I encountered an error while processing your request.";

/// Central per-message decision and orchestration logic.
///
/// Owns all live conversation state, keyed by (scope, channel). State maps
/// are guarded by short-scope mutexes never held across an await; two
/// messages in the same channel can interleave around a slow backend call,
/// which is the accepted best-effort consistency model.
pub struct PolicyEngine {
    self_user_id: OnceLock<u64>,
    triggers: TriggerConfig,
    completion: CompletionClient,
    store: PreferenceStore,
    histories: Mutex<HashMap<ConversationKey, ConversationHistory>>,
    recent_authors: Mutex<HashMap<u64, RecentAuthorWindow>>,
}

impl PolicyEngine {
    pub fn new(
        triggers: TriggerConfig,
        completion: CompletionClient,
        store: PreferenceStore,
    ) -> Self {
        Self {
            self_user_id: OnceLock::new(),
            triggers,
            completion,
            store,
            histories: Mutex::new(HashMap::new()),
            recent_authors: Mutex::new(HashMap::new()),
        }
    }

    /// Record the agent's own user id once the gateway session is ready.
    pub fn set_self_user_id(&self, user_id: u64) {
        let _ = self.self_user_id.set(user_id);
    }

    /// Number of channels with live conversation state, for presence reporting.
    pub fn active_conversation_count(&self) -> usize {
        self.histories().len()
    }

    fn histories(&self) -> MutexGuard<'_, HashMap<ConversationKey, ConversationHistory>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<u64, RecentAuthorWindow>> {
        self.recent_authors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one inbound message end to end.
    ///
    /// Never returns an error: every failure is contained here, surfaced to
    /// the user as a generic apology at worst, so one bad message can't take
    /// down the handling of future events.
    pub async fn handle_message<D: ChatDispatcher>(&self, message: &InboundMessage, dispatcher: &D) {
        let Some(self_id) = self.self_user_id.get().copied() else {
            tracing::warn!("inbound message before gateway identity is known, dropping");
            return;
        };

        let scope = message.scope();
        let key = ConversationKey { scope, channel_id: message.channel_id };

        let probabilities = match self.store.probabilities(&scope, message.channel_id).await {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(%error, "failed to load probabilities, using defaults");
                ProbabilityPair::default()
            }
        };

        let content = format!("{}: {}", message.author_display_name, message.clean_content);

        self.apply_prefix_instruction(message, &content, dispatcher).await;

        self.histories()
            .entry(key.clone())
            .or_default()
            .push(ConversationTurn::user(content));

        // Double-response guard: when a different non-self author posted in
        // the last few seconds, another agent is likely already answering.
        // Gates the response and the reaction alike.
        let now = Instant::now();
        let guarded = {
            let mut windows = self.windows();
            let window = windows.entry(message.channel_id).or_default();
            window.record(message.author_id, now);
            window.has_other_recent_author(message.author_id, self_id)
        };
        if guarded {
            tracing::debug!(
                channel_id = message.channel_id,
                "another author posted recently, suppressing"
            );
            return;
        }

        if let Some(use_premium) = self.response_decision(message, probabilities.reply) {
            if let Err(error) = self.respond(message, &key, use_premium, dispatcher).await {
                tracing::error!(
                    %error,
                    author = %message.author_display_name,
                    "error while processing response"
                );
                if let Err(error) = dispatcher.send_reply(message, PROCESSING_APOLOGY).await {
                    tracing::error!(%error, "failed to deliver apology reply");
                }
            }
        }

        if text::sample(probabilities.reaction) {
            self.react(message, dispatcher).await;
        }
    }

    /// First matching rule wins. `Some(use_premium)` means respond.
    fn response_decision(&self, message: &InboundMessage, reply_probability: f64) -> Option<bool> {
        if message.mentions_self {
            return Some(false);
        }
        if text::contains_trigger_word(&message.content, &self.triggers.words) {
            return Some(false);
        }
        if text::contains_trigger_word(&message.content, &self.triggers.expensive_words) {
            return Some(true);
        }
        if message.is_direct_message() {
            return Some(false);
        }
        if text::sample(reply_probability) {
            return Some(false);
        }
        None
    }

    /// Detect the "start your messages with …" instruction and persist the
    /// requested prefix. Runs before the response decision and is not itself
    /// a response trigger.
    async fn apply_prefix_instruction<D: ChatDispatcher>(
        &self,
        message: &InboundMessage,
        content: &str,
        dispatcher: &D,
    ) {
        let Some(captures) = PREFIX_INSTRUCTION.captures(content) else {
            return;
        };
        let prefix = captures[1].trim().to_string();

        if !text::is_valid_prefix(&prefix) {
            if let Err(error) = dispatcher
                .send_message(message.channel_id, "Sorry, that prefix is invalid or too long.")
                .await
            {
                tracing::error!(%error, "failed to send prefix rejection");
            }
            return;
        }

        match self.store.set_prefix(message.author_id, &prefix).await {
            Ok(()) => {
                let confirmation =
                    format!("Okay, I'll start my messages with '{prefix}' from now on.");
                if let Err(error) = dispatcher.send_message(message.channel_id, &confirmation).await
                {
                    tracing::error!(%error, "failed to send prefix confirmation");
                }
            }
            Err(error) => {
                tracing::error!(%error, user_id = message.author_id, "failed to persist prefix");
            }
        }
    }

    /// Build the context window, call the completion client, post-process,
    /// dispatch, and record the assistant turn.
    async fn respond<D: ChatDispatcher>(
        &self,
        message: &InboundMessage,
        key: &ConversationKey,
        use_premium: bool,
        dispatcher: &D,
    ) -> Result<()> {
        let scope_name = message.guild_name.as_deref().unwrap_or("DM");
        let system_prompt = prompts::system_prompt(
            &message.author_display_name,
            scope_name,
            &message.channel_name,
        );

        let mut context = vec![ChatMessage::system(system_prompt)];
        {
            let histories = self.histories();
            if let Some(history) = histories.get(key) {
                context.extend(history.turns().map(|turn| ChatMessage {
                    role: match turn.role {
                        Role::User => MessageRole::User,
                        Role::Assistant => MessageRole::Assistant,
                    },
                    content: turn.content.clone(),
                }));
            }
        }

        let tags = RequestTags {
            user_id: message.author_id.to_string(),
            channel_id: message.channel_id.to_string(),
            server_id: key.scope.to_string(),
            interaction_type: "trigger_chat",
            prompt_id: "sydney_v1.0",
        };

        let response = {
            let _typing = dispatcher.start_typing(message.channel_id);
            self.completion
                .generate(context, tags, completion::DEFAULT_TEMPERATURE, use_premium)
                .await
        };

        // The model sometimes echoes a speaker label from the transcript.
        let mut reply = match text::split_persona_label(&response) {
            Some((_, body)) => body.to_string(),
            None => response,
        };

        match self.store.prefix(message.author_id).await {
            Ok(Some(prefix)) => reply = format!("{prefix} {reply}"),
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "failed to load message prefix"),
        }

        if !message.is_direct_message() {
            let author_mention = format!("<@{}>", message.author_id);
            reply = text::replace_member_names(&reply, &message.members);
            reply = text::replace_ping_token(&reply, &author_mention);
            reply =
                text::replace_name_exclamation(&reply, &message.author_display_name, &author_mention);
        }

        let reply = text::truncate_reply(&reply);

        dispatcher.send_reply(message, &reply).await?;

        self.histories()
            .entry(key.clone())
            .or_default()
            .push(ConversationTurn::assistant(reply));

        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(error) = store.snapshot().await {
                tracing::warn!(%error, "failed to snapshot preference store");
            }
        });

        Ok(())
    }

    /// Ask the classification call for a single glyph and attach it.
    /// Failures are logged and swallowed; the user never sees them.
    async fn react<D: ChatDispatcher>(&self, message: &InboundMessage, dispatcher: &D) {
        let context = vec![
            ChatMessage::system(prompts::reaction_system_prompt()),
            ChatMessage::user(message.clean_content.clone()),
        ];

        let glyph = {
            let _typing = dispatcher.start_typing(message.channel_id);
            self.completion.classify_reaction(context).await
        };

        let Some(glyph) = glyph else {
            tracing::debug!("no suitable reaction found");
            return;
        };

        if let Err(error) = dispatcher.add_reaction(message, glyph.trim()).await {
            tracing::warn!(%error, "failed to add reaction");
        }
    }
}
