use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::transport::EngineEvent;

pub const DEFAULT_LISTENERS_LEFT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_QUEUE_EXHAUSTED_TIMEOUT: Duration = Duration::from_secs(300);

/// Condición que arma un temporizador de inactividad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleReason {
    /// No quedan oyentes (no bots) en el canal de voz
    ListenersLeft,
    /// La cola se agotó y no hay nada reproduciéndose
    QueueExhausted,
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleReason::ListenersLeft => f.write_str("canal sin oyentes"),
            IdleReason::QueueExhausted => f.write_str("cola agotada"),
        }
    }
}

struct IdleTimer {
    id: u64,
    token: CancellationToken,
}

/// Temporizadores de inactividad cancelables por sesión y motivo.
///
/// Al expirar no se destruye nada: se envía [`EngineEvent::IdleExpired`] al
/// controlador, que valida el id con [`consume`](Self::consume) y vuelve a
/// comprobar la condición antes de cerrar la sesión.
pub struct InactivityMonitor {
    timers: DashMap<(GuildId, IdleReason), IdleTimer>,
    next_id: AtomicU64,
    events: UnboundedSender<EngineEvent>,
}

impl InactivityMonitor {
    pub fn new(events: UnboundedSender<EngineEvent>) -> Self {
        Self {
            timers: DashMap::new(),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Inicia o reinicia la cuenta regresiva; devuelve el id del temporizador
    pub fn arm(&self, session: GuildId, reason: IdleReason, timeout: Duration) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = self
            .timers
            .insert((session, reason), IdleTimer { id, token: token.clone() })
        {
            previous.token.cancel();
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    debug!("⏰ Temporizador {} expiró en {} ({})", id, session, reason);
                    let _ = events.send(EngineEvent::IdleExpired {
                        session,
                        reason,
                        timer_id: id,
                    });
                }
            }
        });

        info!(
            "⏳ Inactividad armada en {} ({}): {}",
            session,
            reason,
            humantime::format_duration(timeout)
        );
        id
    }

    pub fn disarm(&self, session: GuildId, reason: IdleReason) -> bool {
        match self.timers.remove(&(session, reason)) {
            Some((_, timer)) => {
                timer.token.cancel();
                debug!("⏳ Inactividad desarmada en {} ({})", session, reason);
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self, session: GuildId) {
        self.disarm(session, IdleReason::ListenersLeft);
        self.disarm(session, IdleReason::QueueExhausted);
    }

    pub fn is_armed(&self, session: GuildId, reason: IdleReason) -> bool {
        self.timers.contains_key(&(session, reason))
    }

    /// Retira el temporizador si `timer_id` sigue siendo el vigente.
    ///
    /// `false` indica una expiración obsoleta (rearmado o desarmado después).
    pub fn consume(&self, session: GuildId, reason: IdleReason, timer_id: u64) -> bool {
        self.timers
            .remove_if(&(session, reason), |_, timer| timer.id == timer_id)
            .is_some()
    }
}
