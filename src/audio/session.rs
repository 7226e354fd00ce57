use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::audio::{
    queue::{LoopMode, PlaybackQueue},
    track::TrackRecord,
};
use crate::storage::PersistentQueueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Resolving,
    Playing,
    Paused,
    Advancing,
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackPhase::Idle => "inactivo",
            PlaybackPhase::Resolving => "resolviendo",
            PlaybackPhase::Playing => "reproduciendo",
            PlaybackPhase::Paused => "en pausa",
            PlaybackPhase::Advancing => "avanzando",
        };
        f.write_str(label)
    }
}

/// Motivo del último incremento de `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Clear,
    Disconnect,
}

/// Estado mutable de una sesión; protegido por un mutex síncrono que nunca
/// se mantiene a través de un `.await`.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub channel: ChannelId,
    pub current: Option<TrackRecord>,
    /// Registro encolado del que salió `current`; difiere de éste cuando
    /// sonó un proveedor alternativo
    pub origin: Option<TrackRecord>,
    pub loop_mode: LoopMode,
    pub volume: u8,
    pub tracks_played: u64,
    pub total_playtime_millis: u64,
    pub phase: PlaybackPhase,
    pub epoch: u64,
    pub cancel_cause: Option<CancelCause>,
    /// Identidad de la reproducción vigente en el transporte; 0 = ninguna
    pub play_id: u64,
    /// Última población conocida de oyentes (sin bots)
    pub listeners: Option<usize>,
    pub started_at: Option<Instant>,
}

impl SessionState {
    fn new(channel: ChannelId, volume: u8) -> Self {
        Self {
            channel,
            current: None,
            origin: None,
            loop_mode: LoopMode::Off,
            volume: volume.min(100),
            tracks_played: 0,
            total_playtime_millis: 0,
            phase: PlaybackPhase::Idle,
            epoch: 0,
            cancel_cause: None,
            play_id: 0,
            listeners: None,
            started_at: None,
        }
    }

    /// Retira el track actual y devuelve su registro encolado
    pub fn take_current(&mut self) -> Option<TrackRecord> {
        let current = self.current.take();
        self.origin.take().or(current)
    }

    /// Incrementa la generación de cancelación
    pub fn cancel(&mut self, cause: CancelCause) -> u64 {
        self.epoch += 1;
        self.cancel_cause = Some(cause);
        self.epoch
    }
}

pub struct SessionHandle {
    pub id: GuildId,
    pub state: Mutex<SessionState>,
    /// Guardia de avance: como máximo un avance en curso por sesión
    pub advance: tokio::sync::Mutex<()>,
    pub queue: PlaybackQueue,
}

impl SessionHandle {
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.state.lock().phase
    }

    pub fn current(&self) -> Option<TrackRecord> {
        self.state.lock().current.clone()
    }

    /// Registro encolado del track actual, sin la sustitución de proveedor
    pub fn current_origin(&self) -> Option<TrackRecord> {
        let state = self.state.lock();
        state.origin.clone().or_else(|| state.current.clone())
    }
}

/// Ciclo de vida explícito de las sesiones activas.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<SessionHandle>>,
    store: Arc<dyn PersistentQueueStore>,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn PersistentQueueStore>, history_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            history_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn PersistentQueueStore> {
        &self.store
    }

    /// Crea la sesión o, si ya existe, actualiza su canal de voz
    pub fn create(&self, id: GuildId, channel: ChannelId, volume: u8) -> Arc<SessionHandle> {
        let handle = self
            .sessions
            .entry(id)
            .or_insert_with(|| {
                info!("🆕 Sesión creada para {}", id);
                Arc::new(SessionHandle {
                    id,
                    state: Mutex::new(SessionState::new(channel, volume)),
                    advance: tokio::sync::Mutex::new(()),
                    queue: PlaybackQueue::new(id, self.store.clone(), self.history_limit),
                })
            })
            .clone();

        handle.state.lock().channel = channel;
        handle
    }

    pub fn get(&self, id: GuildId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    pub fn destroy(&self, id: GuildId) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.remove(&id).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!("🗑️ Sesión destruida para {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryQueueStore;

    #[test]
    fn create_is_idempotent_and_destroy_removes() {
        let registry = SessionRegistry::new(Arc::new(MemoryQueueStore::new()), 50);
        let guild = GuildId::new(1);

        let first = registry.create(guild, ChannelId::new(10), 80);
        first.state.lock().cancel(CancelCause::Clear);
        let again = registry.create(guild, ChannelId::new(11), 20);

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.epoch(), 1);
        assert_eq!(again.state.lock().volume, 80);
        assert_eq!(again.state.lock().channel, ChannelId::new(11));
        assert_eq!(registry.len(), 1);

        assert!(registry.destroy(guild).is_some());
        assert!(registry.get(guild).is_none());
        assert!(registry.destroy(guild).is_none());
    }

    #[test]
    fn take_current_returns_queued_record() {
        use crate::audio::track::Provider;
        use serenity::model::id::UserId;

        let queued = TrackRecord::new(
            "Song",
            "https://yt/1",
            "https://yt/1",
            Provider::YouTube,
            UserId::new(7),
        );
        let mut state = SessionState::new(ChannelId::new(10), 50);
        state.current = Some(queued.with_source("https://inv/1", Provider::Invidious));
        state.origin = Some(queued.clone());

        assert_eq!(state.take_current(), Some(queued));
        assert!(state.current.is_none() && state.origin.is_none());
        assert_eq!(state.take_current(), None);
    }
}
