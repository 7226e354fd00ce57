use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{
        codecs::{get_codec_registry, get_probe},
        HttpRequest, Input, YoutubeDl,
    },
    tracks::{PlayMode, Track, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::audio::{inactivity::IdleReason, track::TrackRecord};
use crate::error::PlaybackStartError;

/// Tiempo máximo para que una entrada quede lista para reproducir.
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Señales asíncronas que el controlador procesa en su bucle de eventos.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Fin natural, parada o error de la reproducción `play_id`
    TrackEnded {
        session: GuildId,
        play_id: u64,
        error: Option<String>,
    },
    /// Expiró un temporizador de inactividad
    IdleExpired {
        session: GuildId,
        reason: IdleReason,
        timer_id: u64,
    },
}

/// Contrato con el transporte de audio.
///
/// Solo el `PlaybackController` invoca `play`/`stop`. Cada reproducción lleva
/// un `play_id` que el transporte devuelve en [`EngineEvent::TrackEnded`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackTransport: Send + Sync {
    async fn connect(&self, session: GuildId, channel: ChannelId) -> Result<()>;

    async fn play(
        &self,
        session: GuildId,
        track: &TrackRecord,
        play_id: u64,
        volume: u8,
    ) -> std::result::Result<(), PlaybackStartError>;

    async fn stop(&self, session: GuildId);

    async fn pause(&self, session: GuildId) -> Result<()>;

    async fn resume(&self, session: GuildId) -> Result<()>;

    async fn set_volume(&self, session: GuildId, volume: u8) -> Result<()>;

    async fn is_playing(&self, session: GuildId) -> bool;

    async fn is_paused(&self, session: GuildId) -> bool;

    /// Abandona el canal de voz y libera los recursos de la sesión
    async fn release(&self, session: GuildId);
}

fn to_gain(volume: u8) -> f32 {
    f32::from(volume.min(100)) / 100.0
}

struct ActiveTrack {
    play_id: u64,
    handle: TrackHandle,
}

/// Transporte sobre songbird.
///
/// Las fuentes de proveedores con extracción propia se entregan a `YoutubeDl`;
/// las URLs de stream directo se reproducen con `HttpRequest`.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    tracks: DashMap<GuildId, ActiveTrack>,
    events: UnboundedSender<EngineEvent>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, events: UnboundedSender<EngineEvent>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("no se pudo crear el cliente HTTP del transporte")?;

        Ok(Self {
            manager,
            http,
            tracks: DashMap::new(),
            events,
        })
    }

    fn input_for(&self, track: &TrackRecord) -> Input {
        if track.provider.is_direct_stream() {
            HttpRequest::new(self.http.clone(), track.source_uri.clone()).into()
        } else {
            YoutubeDl::new(self.http.clone(), track.source_uri.clone()).into()
        }
    }

    fn rejected(track: &TrackRecord, reason: impl ToString) -> PlaybackStartError {
        PlaybackStartError::Rejected {
            provider: track.provider,
            source_uri: track.source_uri.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PlaybackTransport for SongbirdTransport {
    async fn connect(&self, session: GuildId, channel: ChannelId) -> Result<()> {
        self.manager
            .join(session, channel)
            .await
            .with_context(|| format!("no se pudo unir al canal {}", channel))?;
        info!("🔊 Conectado al canal de voz {} en {}", channel, session);
        Ok(())
    }

    async fn play(
        &self,
        session: GuildId,
        track: &TrackRecord,
        play_id: u64,
        volume: u8,
    ) -> std::result::Result<(), PlaybackStartError> {
        let call = self
            .manager
            .get(session)
            .ok_or(PlaybackStartError::NotConnected)?;

        let input = self.input_for(track);
        let playable = tokio::time::timeout(
            START_TIMEOUT,
            input.make_playable_async(get_codec_registry(), get_probe()),
        )
        .await
        .map_err(|_| PlaybackStartError::Timeout(track.title.clone()))?
        .map_err(|e| Self::rejected(track, e))?;

        let handle = {
            let mut handler = call.lock().await;
            handler.stop();
            handler.play(Track::from(playable).volume(to_gain(volume)))
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(
                Event::Track(event),
                TrackEndNotifier {
                    session,
                    play_id,
                    events: self.events.clone(),
                },
            ) {
                let _ = handle.stop();
                return Err(Self::rejected(track, e));
            }
        }

        self.tracks.insert(session, ActiveTrack { play_id, handle });
        debug!("▶️ Reproducción {} iniciada en {}: {}", play_id, session, track.title);
        Ok(())
    }

    async fn stop(&self, session: GuildId) {
        if let Some((_, active)) = self.tracks.remove(&session) {
            let _ = active.handle.stop();
            debug!("⏹️ Reproducción {} detenida en {}", active.play_id, session);
        }
    }

    async fn pause(&self, session: GuildId) -> Result<()> {
        let active = self
            .tracks
            .get(&session)
            .context("no hay reproducción activa")?;
        active.handle.pause()?;
        Ok(())
    }

    async fn resume(&self, session: GuildId) -> Result<()> {
        let active = self
            .tracks
            .get(&session)
            .context("no hay reproducción activa")?;
        active.handle.play()?;
        Ok(())
    }

    async fn set_volume(&self, session: GuildId, volume: u8) -> Result<()> {
        if let Some(active) = self.tracks.get(&session) {
            active.handle.set_volume(to_gain(volume))?;
        }
        Ok(())
    }

    async fn is_playing(&self, session: GuildId) -> bool {
        let Some(handle) = self.tracks.get(&session).map(|a| a.handle.clone()) else {
            return false;
        };
        match handle.get_info().await {
            Ok(info) => matches!(info.playing, PlayMode::Play),
            Err(_) => false,
        }
    }

    async fn is_paused(&self, session: GuildId) -> bool {
        let Some(handle) = self.tracks.get(&session).map(|a| a.handle.clone()) else {
            return false;
        };
        match handle.get_info().await {
            Ok(info) => matches!(info.playing, PlayMode::Pause),
            Err(_) => false,
        }
    }

    async fn release(&self, session: GuildId) {
        self.stop(session).await;
        if self.manager.get(session).is_some() {
            if let Err(e) = self.manager.remove(session).await {
                warn!("Error al salir del canal de voz en {}: {}", session, e);
            } else {
                info!("👋 Desconectado del canal de voz en {}", session);
            }
        }
    }
}

/// Reenvía el fin o error de una pista al bucle de eventos del controlador
struct TrackEndNotifier {
    session: GuildId,
    play_id: u64,
    events: UnboundedSender<EngineEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        if let Some(ref e) = error {
            error!("❌ Error de reproducción en {}: {}", self.session, e);
        }

        if self
            .events
            .send(EngineEvent::TrackEnded {
                session: self.session,
                play_id: self.play_id,
                error,
            })
            .is_err()
        {
            warn!("Bucle de eventos cerrado; fin de pista descartado");
        }

        None
    }
}
