use dashmap::DashMap;
use serenity::{
    http::Http,
    model::{
        id::{ChannelId, GuildId},
        voice::VoiceState,
    },
    prelude::Context,
};
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    audio::player::{CloseReason, PlaybackNotice},
    bot::RatMusicBot,
    error::ControllerError,
};

/// Cuenta los usuarios (sin bots) presentes en `channel_id`
pub fn count_listeners(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> usize {
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        return 0;
    };

    guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel_id))
        .filter(|state| {
            let is_bot = state
                .member
                .as_ref()
                .map(|member| member.user.bot)
                .or_else(|| ctx.cache.user(state.user_id).map(|user| user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count()
}

/// Procesa cambios de estado de voz: desconexión forzada del bot y
/// población de oyentes del canal de la sesión.
pub async fn handle_voice_state(
    ctx: &Context,
    old: Option<VoiceState>,
    new: VoiceState,
    bot: &RatMusicBot,
) {
    let Some(guild_id) = new.guild_id else {
        return;
    };

    let current_user_id = ctx.cache.current_user().id;
    if new.user_id == current_user_id && old.is_some() && new.channel_id.is_none() {
        info!("🔌 Bot desconectado en guild {}", guild_id);
        match bot.controller.disconnect(guild_id).await {
            Ok(()) | Err(ControllerError::NotConnected) => {}
            Err(e) => error!("Error al cerrar la sesión: {:?}", e),
        }
        return;
    }

    let Some(snapshot) = bot.controller.snapshot(guild_id) else {
        return;
    };

    let listeners = count_listeners(ctx, guild_id, snapshot.channel);
    if snapshot.listeners != Some(listeners) {
        debug!("👥 {} oyentes en guild {}", listeners, guild_id);
    }
    bot.controller.update_listeners(guild_id, listeners);
}

/// Texto de un aviso de reproducción
pub fn describe_notice(notice: &PlaybackNotice) -> String {
    match notice {
        PlaybackNotice::NowPlaying { track, .. } => {
            format!("🎵 Reproduciendo: **{}** (<@{}>)", track.title, track.requester)
        }
        PlaybackNotice::TrackFailed { track, reason, .. } => {
            format!("❌ No se pudo reproducir **{}**: {}", track.title, reason)
        }
        PlaybackNotice::QueueFinished { .. } => "📭 La cola ha terminado".to_string(),
        PlaybackNotice::SessionClosed { reason, .. } => match reason {
            CloseReason::Disconnected => "👋 Sesión cerrada".to_string(),
            CloseReason::Idle(reason) => format!("💤 Desconectado por inactividad ({})", reason),
        },
        PlaybackNotice::StoreUnavailable { error, .. } => {
            format!("⚠️ Almacenamiento de la cola no disponible: {}", error)
        }
    }
}

/// Reenvía cada aviso como un mensaje al último canal de texto del guild
pub fn spawn_notice_forwarder(
    http: Arc<Http>,
    text_channels: Arc<DashMap<GuildId, ChannelId>>,
    mut notices: UnboundedReceiver<PlaybackNotice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            let session = notice.session();
            let Some(channel_id) = text_channels.get(&session).map(|c| *c) else {
                debug!("Aviso sin canal de texto en {}: {:?}", session, notice);
                continue;
            };

            if let Err(e) = channel_id.say(&http, describe_notice(&notice)).await {
                warn!("Error al enviar aviso a {}: {:?}", channel_id, e);
            }
        }
        info!("📪 Reenvío de avisos detenido");
    })
}
