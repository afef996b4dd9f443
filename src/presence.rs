//! Periodic presence rotation. Cosmetic: reads cache counts and the
//! engine's conversation totals, nothing else.

use crate::engine::PolicyEngine;

use rand::Rng as _;
use serenity::all::{ActivityData, Context};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ROTATION_INTERVAL: Duration = Duration::from_secs(300);

/// Spawn the rotation task. Runs for the life of the process.
pub fn spawn(ctx: Context, engine: Arc<PolicyEngine>) -> tokio::task::JoinHandle<()> {
    let started_at = Instant::now();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ROTATION_INTERVAL);
        loop {
            ticker.tick().await;

            let guild_count = ctx.cache.guild_count();
            let user_count: u64 = ctx
                .cache
                .guilds()
                .iter()
                .filter_map(|id| ctx.cache.guild(*id).map(|guild| guild.member_count))
                .sum();
            let active_chats = engine.active_conversation_count();
            let uptime = format_uptime(started_at.elapsed());

            let statuses = [
                ActivityData::watching(format!("{guild_count} servers")),
                ActivityData::listening(format!("{user_count} users")),
                ActivityData::watching(format!("{active_chats} active chats")),
                ActivityData::playing("with AI conversations"),
                ActivityData::watching(format!("Uptime: {uptime}")),
                ActivityData::listening("s!sydney_help"),
            ];
            let pick = rand::rng().random_range(0..statuses.len());
            ctx.set_activity(Some(statuses[pick].clone()));
        }
    })
}

fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
