//! # Bot Module
//!
//! Thin Discord adapter for the playback engine.
//!
//! This module contains:
//! - Text command parsing and dispatch (`!play`, `!skip`, ...)
//! - Voice state tracking: listener counts and forced disconnects
//! - Forwarding of [`PlaybackNotice`](crate::audio::PlaybackNotice) values
//!   to the last text channel used in each guild
//!
//! ## Architecture
//!
//! [`RatMusicBot`] implements Serenity's [`EventHandler`] trait and never
//! touches the voice transport directly: every playback action goes through
//! the shared [`PlaybackController`].

use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod events;
pub mod handlers;

use crate::{audio::player::PlaybackController, config::Config};

/// Manejador de eventos de Discord
pub struct RatMusicBot {
    config: Arc<Config>,
    pub controller: Arc<PlaybackController>,
    /// Último canal de texto usado por guild; destino de los avisos
    text_channels: Arc<DashMap<GuildId, ChannelId>>,
}

impl RatMusicBot {
    pub fn new(config: Arc<Config>, controller: Arc<PlaybackController>) -> Self {
        Self {
            config,
            controller,
            text_channels: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn text_channels(&self) -> Arc<DashMap<GuildId, ChannelId>> {
        self.text_channels.clone()
    }

    pub(crate) fn remember_text_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.text_channels.insert(guild_id, channel_id);
    }
}

#[async_trait]
impl EventHandler for RatMusicBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.guild_id.is_none() {
            return;
        }
        if !msg.content.starts_with(&self.config.command_prefix) {
            return;
        }

        if let Err(e) = handlers::handle_message(&ctx, &msg, self).await {
            error!("Error manejando comando: {:?}", e);
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        events::handle_voice_state(&ctx, old, new, self).await;
    }
}
