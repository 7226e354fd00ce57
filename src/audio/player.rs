use chrono::Utc;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::audio::{
    inactivity::{
        IdleReason, InactivityMonitor, DEFAULT_LISTENERS_LEFT_TIMEOUT,
        DEFAULT_QUEUE_EXHAUSTED_TIMEOUT,
    },
    queue::{LoopMode, DEFAULT_HISTORY_SIZE},
    session::{CancelCause, PlaybackPhase, SessionHandle, SessionRegistry},
    track::{Provider, TrackRecord},
    transport::{EngineEvent, PlaybackTransport},
    votes::{VoteOutcome, VoteSkipCoordinator, DEFAULT_VOTE_RATIO},
};
use crate::error::{ControllerError, ControllerResult, PlaybackStartError, StoreError};
use crate::sources::{ResolutionKind, TrackResolver};
use crate::storage::{PersistentQueueStore, SavedSession};

/// Parámetros del motor de reproducción.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_volume: u8,
    pub max_queue_size: usize,
    /// `None` = sin límite
    pub max_song_duration: Option<Duration>,
    pub allow_duplicates: bool,
    pub history_size: usize,
    pub listeners_left_timeout: Duration,
    pub queue_exhausted_timeout: Duration,
    pub vote_skip_ratio: f64,
    /// Proveedores cuya reproducción activa la cadena de fallback al fallar
    pub unreliable_providers: Vec<Provider>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_volume: 50,
            max_queue_size: 500,
            max_song_duration: Some(Duration::from_secs(7200)),
            allow_duplicates: true,
            history_size: DEFAULT_HISTORY_SIZE,
            listeners_left_timeout: DEFAULT_LISTENERS_LEFT_TIMEOUT,
            queue_exhausted_timeout: DEFAULT_QUEUE_EXHAUSTED_TIMEOUT,
            vote_skip_ratio: DEFAULT_VOTE_RATIO,
            unreliable_providers: vec![Provider::YouTube],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Disconnected,
    Idle(IdleReason),
}

/// Avisos para la capa de comandos; uno por evento, nunca repetidos.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackNotice {
    NowPlaying {
        session: GuildId,
        track: TrackRecord,
    },
    TrackFailed {
        session: GuildId,
        track: TrackRecord,
        reason: String,
    },
    QueueFinished {
        session: GuildId,
    },
    SessionClosed {
        session: GuildId,
        reason: CloseReason,
    },
    StoreUnavailable {
        session: GuildId,
        error: String,
    },
}

impl PlaybackNotice {
    pub fn session(&self) -> GuildId {
        match self {
            PlaybackNotice::NowPlaying { session, .. }
            | PlaybackNotice::TrackFailed { session, .. }
            | PlaybackNotice::QueueFinished { session }
            | PlaybackNotice::SessionClosed { session, .. }
            | PlaybackNotice::StoreUnavailable { session, .. } => *session,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub kind: ResolutionKind,
    /// Track que empezó a sonar como resultado de esta petición
    pub started: Option<TrackRecord>,
    /// `(posición, track)` de lo que quedó en cola
    pub queued: Vec<(usize, TrackRecord)>,
    /// Entradas de playlist descartadas por límites o duplicados
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    Skipped { track: TrackRecord, by_vote: bool },
    Vote(VoteOutcome),
}

/// Vista de lectura de una sesión para la capa de comandos.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: GuildId,
    pub channel: ChannelId,
    pub phase: PlaybackPhase,
    pub current: Option<TrackRecord>,
    pub upcoming: Vec<TrackRecord>,
    /// Duración conocida de `upcoming`
    pub upcoming_duration: Duration,
    pub queue_len: usize,
    pub loop_mode: LoopMode,
    pub volume: u8,
    pub tracks_played: u64,
    pub total_playtime: Duration,
    pub history: Vec<TrackRecord>,
    pub votes: usize,
    pub listeners: Option<usize>,
}

enum StartResult {
    Started(TrackRecord),
    Failed(String),
    Cancelled,
}

/// Cómo terminó el track actual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Natural,
    Errored,
    Skipped,
}

/// Máquina de estados de reproducción.
///
/// Todas las mutaciones de una sesión pasan por aquí. El avance se serializa
/// con la guardia de la sesión y se cancela con `epoch`: `clear_queue` y
/// `disconnect` lo incrementan antes de esperar la guardia.
pub struct PlaybackController {
    registry: SessionRegistry,
    resolver: Arc<TrackResolver>,
    transport: Arc<dyn PlaybackTransport>,
    votes: VoteSkipCoordinator,
    inactivity: InactivityMonitor,
    notices: UnboundedSender<PlaybackNotice>,
    settings: EngineSettings,
    next_play_id: AtomicU64,
}

impl PlaybackController {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn PersistentQueueStore>,
        resolver: Arc<TrackResolver>,
        transport: Arc<dyn PlaybackTransport>,
        events: UnboundedSender<EngineEvent>,
        notices: UnboundedSender<PlaybackNotice>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(store, settings.history_size),
            resolver,
            transport,
            votes: VoteSkipCoordinator::new(settings.vote_skip_ratio),
            inactivity: InactivityMonitor::new(events),
            notices,
            settings,
            next_play_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn inactivity(&self) -> &InactivityMonitor {
        &self.inactivity
    }

    fn session(&self, session: GuildId) -> ControllerResult<Arc<SessionHandle>> {
        self.registry.get(session).ok_or(ControllerError::NotConnected)
    }

    fn notify(&self, notice: PlaybackNotice) {
        if self.notices.send(notice).is_err() {
            debug!("Canal de avisos cerrado");
        }
    }

    fn store_unavailable(&self, session: GuildId, error: &StoreError) {
        error!("💾 Almacenamiento no disponible en {}: {}", session, error);
        self.notify(PlaybackNotice::StoreUnavailable {
            session,
            error: error.to_string(),
        });
    }

    /// Se une al canal y restaura la sesión guardada, si existe
    pub async fn connect(&self, session: GuildId, channel: ChannelId) -> ControllerResult<()> {
        self.transport
            .connect(session, channel)
            .await
            .map_err(|e| ControllerError::Transport(e.to_string()))?;

        let handle = self
            .registry
            .create(session, channel, self.settings.default_volume);
        let _guard = handle.advance.lock().await;

        match self.registry.store().take_session(session).await {
            Ok(Some(saved)) => {
                {
                    let mut state = handle.state.lock();
                    state.volume = saved.volume.min(100);
                    state.loop_mode = saved.loop_mode;
                }
                if let Some(current) = saved.current {
                    info!("⏮️ Restaurando sesión de {}: {}", session, current.title);
                    if let Err(e) = handle.queue.push_front(current).await {
                        self.store_unavailable(session, &e);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => self.store_unavailable(session, &e),
        }

        handle.queue.refresh_cache().await;

        let idle = handle.state.lock().current.is_none();
        if idle && !handle.queue.cached_is_empty() {
            let epoch = handle.epoch();
            self.advance_locked(&handle, None, epoch).await;
        } else if idle {
            // Conectada sin nada que sonar: el temporizador corre desde ya
            let mut state = handle.state.lock();
            state.phase = PlaybackPhase::Idle;
            self.inactivity.arm(
                session,
                IdleReason::QueueExhausted,
                self.settings.queue_exhausted_timeout,
            );
        }
        Ok(())
    }

    /// Resuelve `query` y lo agrega a la cola; si la sesión está inactiva,
    /// empieza a reproducir.
    pub async fn enqueue(
        &self,
        session: GuildId,
        query: &str,
        requester: UserId,
    ) -> ControllerResult<EnqueueOutcome> {
        let handle = self.session(session)?;
        let epoch = handle.epoch();

        // La búsqueda corre fuera de la guardia
        let resolution = self.resolver.resolve(query, None, requester).await?;
        let mut candidates = resolution.tracks;
        if resolution.kind == ResolutionKind::Search {
            candidates.truncate(1);
        }

        let _guard = handle.advance.lock().await;
        if handle.epoch() != epoch || self.registry.get(session).is_none() {
            debug!("Petición descartada en {}: la sesión cambió", session);
            return Err(ControllerError::Cancelled);
        }

        let (accepted, rejected) = self.admit(&handle, candidates).await?;

        let mut outcome = EnqueueOutcome {
            kind: resolution.kind,
            started: None,
            queued: Vec::new(),
            rejected,
        };

        let idle = {
            let state = handle.state.lock();
            state.current.is_none() && state.phase == PlaybackPhase::Idle
        };
        let mut store_error = None;
        let queue_empty = match handle.queue.is_empty().await {
            Ok(empty) => empty,
            Err(e) => {
                self.store_unavailable(session, &e);
                store_error = Some(e);
                handle.queue.cached_is_empty()
            }
        };

        let mut accepted = accepted.into_iter();
        let first = if idle && queue_empty {
            accepted.next()
        } else {
            None
        };

        for track in accepted.by_ref() {
            match handle.queue.append(track.clone()).await {
                Ok(position) => outcome.queued.push((position, track)),
                Err(e) => {
                    if store_error.is_none() {
                        self.store_unavailable(session, &e);
                    }
                    store_error = Some(e);
                    outcome.rejected += 1;
                    break;
                }
            }
        }
        // Tras un fallo del almacenamiento el resto no se intenta
        outcome.rejected += accepted.count();

        if first.is_none() && outcome.queued.is_empty() {
            if let Some(e) = store_error {
                return Err(e.into());
            }
        }

        if idle {
            self.inactivity.disarm(session, IdleReason::QueueExhausted);
            let before = handle.queue.len().await.unwrap_or(handle.queue.cached_len());
            outcome.started = self.advance_locked(&handle, first, epoch).await;
            // Lo que el avance sacó de la cola ya no tiene posición
            let popped = before.saturating_sub(handle.queue.len().await.unwrap_or(before));
            if popped > 0 {
                outcome.queued.retain(|(position, _)| *position > popped);
                for (position, _) in outcome.queued.iter_mut() {
                    *position -= popped;
                }
            }
        }

        Ok(outcome)
    }

    /// Aplica límites de cola, duración y duplicados
    async fn admit(
        &self,
        handle: &SessionHandle,
        candidates: Vec<TrackRecord>,
    ) -> ControllerResult<(Vec<TrackRecord>, usize)> {
        // Sin store se decide con la caché; el aviso lo emite quien llama
        let queued_len = match handle.queue.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!("💾 Límites de {} evaluados con la caché: {}", handle.id, e);
                handle.queue.cached_len()
            }
        };
        let mut known = if self.settings.allow_duplicates {
            Vec::new()
        } else {
            let mut known = handle
                .queue
                .preview(queued_len)
                .await
                .unwrap_or_else(|_| handle.queue.cached_preview());
            known.extend(handle.current_origin());
            known
        };

        let total = candidates.len();
        let mut accepted = Vec::new();
        let mut first_error = None;

        for track in candidates {
            let rejection = if queued_len + accepted.len() >= self.settings.max_queue_size {
                Some(ControllerError::QueueFull(self.settings.max_queue_size))
            } else if let (Some(max), Some(duration)) =
                (self.settings.max_song_duration, track.duration())
            {
                (duration > max).then(|| ControllerError::TrackTooLong {
                    title: track.title.clone(),
                    max_secs: max.as_secs(),
                })
            } else {
                None
            };

            let rejection = rejection.or_else(|| {
                (!self.settings.allow_duplicates && known.iter().any(|k| k.same_identity(&track)))
                    .then(|| ControllerError::Duplicate(track.title.clone()))
            });

            match rejection {
                Some(e) => {
                    debug!("Track rechazado: {}", e);
                    first_error.get_or_insert(e);
                }
                None => {
                    if !self.settings.allow_duplicates {
                        known.push(track.clone());
                    }
                    accepted.push(track);
                }
            }
        }

        if accepted.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        let rejected = total - accepted.len();
        Ok((accepted, rejected))
    }

    /// Señal de fin de la reproducción `play_id` desde el transporte
    pub async fn on_track_end(&self, session: GuildId, play_id: u64, error: Option<String>) {
        let Some(handle) = self.registry.get(session) else {
            return;
        };

        let _guard = match handle.advance.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if handle.state.lock().play_id != play_id {
                    debug!("Avance concurrente ignorado en {} (play {})", session, play_id);
                    return;
                }
                // La guardia la tiene otra operación y el fin es del track vigente
                handle.advance.lock().await
            }
        };

        let (current_play, phase) = {
            let state = handle.state.lock();
            (state.play_id, state.phase)
        };
        if current_play != play_id
            || !matches!(phase, PlaybackPhase::Playing | PlaybackPhase::Paused)
        {
            debug!("Fin de reproducción obsoleto en {} (play {})", session, play_id);
            return;
        }

        let finish = match &error {
            Some(reason) => {
                if let Some(track) = handle.current() {
                    warn!("❌ Falló la reproducción de {}: {}", track.title, reason);
                    self.notify(PlaybackNotice::TrackFailed {
                        session,
                        track,
                        reason: reason.clone(),
                    });
                }
                Finish::Errored
            }
            None => Finish::Natural,
        };

        let epoch = handle.epoch();
        let replay = self.finish_current(&handle, finish);
        self.advance_locked(&handle, replay, epoch).await;
    }

    /// Retira el track actual; devuelve el track a repetir si aplica
    fn finish_current(&self, handle: &SessionHandle, finish: Finish) -> Option<TrackRecord> {
        let (finished, loop_mode) = {
            let mut state = handle.state.lock();
            let finished = state.take_current();
            if let Some(track) = &finished {
                let elapsed = state
                    .started_at
                    .map(|at| at.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                let played = match track.duration_millis {
                    0 => elapsed,
                    total => elapsed.min(total),
                };
                state.tracks_played += 1;
                state.total_playtime_millis += played;
            }
            state.phase = PlaybackPhase::Advancing;
            state.play_id = 0;
            state.started_at = None;
            (finished, state.loop_mode)
        };

        self.votes.clear(handle.id);

        let track = finished?;
        if loop_mode == LoopMode::Track && finish == Finish::Natural {
            info!("🔂 Repitiendo track: {}", track.title);
            return Some(track);
        }
        handle.queue.push_history(track);
        None
    }

    /// Toma el siguiente track de la cola o recarga desde el historial.
    ///
    /// Un fallo de lectura se reintenta una vez.
    async fn pick_next(&self, handle: &SessionHandle) -> Result<Option<TrackRecord>, StoreError> {
        let popped = match handle.queue.pop_front().await {
            Ok(next) => next,
            Err(e) => {
                warn!("💾 Reintentando lectura de la cola en {}: {}", handle.id, e);
                handle.queue.pop_front().await?
            }
        };
        if popped.is_some() {
            return Ok(popped);
        }

        let loop_mode = handle.state.lock().loop_mode;
        if loop_mode == LoopMode::Queue && handle.queue.history_len() > 0 {
            handle.queue.refill_from_history().await?;
            return handle.queue.pop_front().await;
        }
        Ok(None)
    }

    /// Bucle de avance; requiere la guardia de la sesión.
    ///
    /// Devuelve el track que quedó sonando. Los tracks que no arrancan se
    /// notifican una vez y se pasa al siguiente.
    async fn advance_locked(
        &self,
        handle: &SessionHandle,
        mut next: Option<TrackRecord>,
        epoch: u64,
    ) -> Option<TrackRecord> {
        let session = handle.id;

        loop {
            if handle.epoch() != epoch {
                self.settle_cancelled(handle, next.take()).await;
                return None;
            }

            let candidate = match next.take() {
                Some(track) => track,
                None => match self.pick_next(handle).await {
                    Ok(Some(track)) => track,
                    Ok(None) => {
                        self.go_idle(handle, true);
                        info!("📭 Cola terminada en {}", session);
                        self.notify(PlaybackNotice::QueueFinished { session });
                        return None;
                    }
                    Err(e) => {
                        self.go_idle(handle, false);
                        self.store_unavailable(session, &e);
                        return None;
                    }
                },
            };

            handle.state.lock().phase = PlaybackPhase::Resolving;

            match self.start_with_fallback(handle, &candidate, epoch).await {
                StartResult::Started(playing) => return Some(playing),
                StartResult::Failed(reason) => {
                    warn!("⏭️ No se pudo reproducir {}: {}", candidate.title, reason);
                    self.notify(PlaybackNotice::TrackFailed {
                        session,
                        track: candidate,
                        reason,
                    });
                }
                StartResult::Cancelled => {
                    self.settle_cancelled(handle, Some(candidate)).await;
                    return None;
                }
            }
        }
    }

    /// Deja la sesión inactiva tras una cancelación; un track interrumpido
    /// por desconexión vuelve a la cabeza de la cola.
    async fn settle_cancelled(&self, handle: &SessionHandle, pending: Option<TrackRecord>) {
        let cause = {
            let mut state = handle.state.lock();
            state.phase = PlaybackPhase::Idle;
            state.play_id = 0;
            state.cancel_cause
        };

        if let (Some(track), Some(CancelCause::Disconnect)) = (pending, cause) {
            debug!("Avance cancelado por desconexión: {} vuelve a la cola", track.title);
            if let Err(e) = handle.queue.push_front(track).await {
                self.store_unavailable(handle.id, &e);
            }
        }
    }

    fn go_idle(&self, handle: &SessionHandle, arm_timer: bool) {
        let mut state = handle.state.lock();
        state.phase = PlaybackPhase::Idle;
        state.current = None;
        state.origin = None;
        state.play_id = 0;
        state.started_at = None;
        if arm_timer {
            self.inactivity.arm(
                handle.id,
                IdleReason::QueueExhausted,
                self.settings.queue_exhausted_timeout,
            );
        }
    }

    fn next_play_id(&self, handle: &SessionHandle) -> u64 {
        let play_id = self.next_play_id.fetch_add(1, Ordering::Relaxed);
        handle.state.lock().play_id = play_id;
        play_id
    }

    /// Arranca `track`; si su proveedor es poco fiable y falla, prueba el
    /// mismo título en los proveedores de fallback.
    async fn start_with_fallback(
        &self,
        handle: &SessionHandle,
        track: &TrackRecord,
        epoch: u64,
    ) -> StartResult {
        let session = handle.id;
        let volume = handle.state.lock().volume;

        let play_id = self.next_play_id(handle);
        let mut reason = match self.transport.play(session, track, play_id, volume).await {
            Ok(()) => {
                return self
                    .confirm_started(handle, track.clone(), None, play_id, epoch)
                    .await
            }
            Err(PlaybackStartError::NotConnected) => {
                return StartResult::Failed(PlaybackStartError::NotConnected.to_string())
            }
            Err(e) => e.to_string(),
        };
        warn!("⚠️ Falló el inicio de {} ({}): {}", track.title, track.provider, reason);

        if !self.settings.unreliable_providers.contains(&track.provider) {
            return StartResult::Failed(reason);
        }

        for provider in self.resolver.fallback_order() {
            if provider == track.provider {
                continue;
            }
            if handle.epoch() != epoch {
                return StartResult::Cancelled;
            }

            let Some(alternative) = self
                .resolver
                .find_alternative(provider, &track.title, track.requester)
                .await
            else {
                continue;
            };

            let attempt = track.with_source(alternative.source_uri, alternative.provider);
            let play_id = self.next_play_id(handle);
            match self.transport.play(session, &attempt, play_id, volume).await {
                Ok(()) => {
                    info!("🔄 Reproduciendo {} vía {}", attempt.title, provider);
                    return self
                        .confirm_started(handle, attempt, Some(track.clone()), play_id, epoch)
                        .await;
                }
                Err(e) => {
                    warn!("⚠️ Fallback {} falló para {}: {}", provider, track.title, e);
                    reason = e.to_string();
                }
            }
        }

        handle.state.lock().play_id = 0;
        StartResult::Failed(reason)
    }

    /// `origin` es el registro encolado cuando `track` es un alternativo
    async fn confirm_started(
        &self,
        handle: &SessionHandle,
        track: TrackRecord,
        origin: Option<TrackRecord>,
        play_id: u64,
        epoch: u64,
    ) -> StartResult {
        if handle.epoch() != epoch {
            self.transport.stop(handle.id).await;
            return StartResult::Cancelled;
        }

        {
            let mut state = handle.state.lock();
            state.current = Some(track.clone());
            state.origin = origin;
            state.phase = PlaybackPhase::Playing;
            state.play_id = play_id;
            state.started_at = Some(Instant::now());
            self.inactivity.disarm(handle.id, IdleReason::QueueExhausted);
        }
        self.votes.clear(handle.id);

        info!("🎵 Reproduciendo: {}", track);
        self.notify(PlaybackNotice::NowPlaying {
            session: handle.id,
            track: track.clone(),
        });
        StartResult::Started(track)
    }

    /// Salta el track actual, directamente o por votación
    pub async fn skip(
        &self,
        session: GuildId,
        requester: UserId,
        privileged: bool,
        population: usize,
    ) -> ControllerResult<SkipOutcome> {
        let handle = self.session(session)?;
        let current = handle
            .current()
            .ok_or(ControllerError::NotApplicable("no hay nada reproduciéndose"))?;

        if self
            .votes
            .should_bypass(requester, Some(current.requester), privileged, population)
        {
            let track = self.force_skip(&handle).await?;
            return Ok(SkipOutcome::Skipped {
                track,
                by_vote: false,
            });
        }

        self.register_vote(session, requester, population).await
    }

    /// Registra un voto de salto; al alcanzar el umbral salta el track
    pub async fn register_vote(
        &self,
        session: GuildId,
        voter: UserId,
        population: usize,
    ) -> ControllerResult<SkipOutcome> {
        let handle = self.session(session)?;
        if handle.current().is_none() {
            return Err(ControllerError::NotApplicable("no hay nada reproduciéndose"));
        }

        match self.votes.register_vote(session, voter, population) {
            VoteOutcome::ThresholdReached { votes, required } => {
                info!("🗳️ Salto por votación en {} ({}/{})", session, votes, required);
                let track = self.force_skip(&handle).await?;
                Ok(SkipOutcome::Skipped {
                    track,
                    by_vote: true,
                })
            }
            outcome => Ok(SkipOutcome::Vote(outcome)),
        }
    }

    async fn force_skip(&self, handle: &SessionHandle) -> ControllerResult<TrackRecord> {
        let play_id = handle.state.lock().play_id;
        let _guard = handle.advance.lock().await;

        let skipped = {
            let state = handle.state.lock();
            match (&state.current, state.play_id == play_id) {
                (Some(track), true) => track.clone(),
                _ => return Err(ControllerError::NotApplicable("el track ya cambió")),
            }
        };

        let epoch = handle.epoch();
        self.transport.stop(handle.id).await;
        info!("⏭️ Saltando: {}", skipped.title);
        let replay = self.finish_current(handle, Finish::Skipped);
        self.advance_locked(handle, replay, epoch).await;
        Ok(skipped)
    }

    pub async fn pause(&self, session: GuildId) -> ControllerResult<()> {
        let handle = self.session(session)?;
        if handle.phase() != PlaybackPhase::Playing {
            return Err(ControllerError::NotApplicable("no hay nada reproduciéndose"));
        }
        self.transport
            .pause(session)
            .await
            .map_err(|e| ControllerError::Transport(e.to_string()))?;

        let mut state = handle.state.lock();
        if state.phase == PlaybackPhase::Playing {
            state.phase = PlaybackPhase::Paused;
        }
        info!("⏸️ Reproducción pausada en {}", session);
        Ok(())
    }

    pub async fn resume(&self, session: GuildId) -> ControllerResult<()> {
        let handle = self.session(session)?;
        if handle.phase() != PlaybackPhase::Paused {
            return Err(ControllerError::NotApplicable("la reproducción no está en pausa"));
        }
        self.transport
            .resume(session)
            .await
            .map_err(|e| ControllerError::Transport(e.to_string()))?;

        let mut state = handle.state.lock();
        if state.phase == PlaybackPhase::Paused {
            state.phase = PlaybackPhase::Playing;
        }
        info!("▶️ Reproducción reanudada en {}", session);
        Ok(())
    }

    pub fn set_loop_mode(&self, session: GuildId, mode: LoopMode) -> ControllerResult<()> {
        let handle = self.session(session)?;
        handle.state.lock().loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Repetición desactivada"),
            LoopMode::Track => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
        Ok(())
    }

    pub async fn set_volume(&self, session: GuildId, volume: u32) -> ControllerResult<()> {
        let handle = self.session(session)?;
        let volume = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(ControllerError::InvalidVolume(volume))?;

        handle.state.lock().volume = volume;
        self.transport
            .set_volume(session, volume)
            .await
            .map_err(|e| ControllerError::Transport(e.to_string()))?;
        info!("🔊 Volumen ajustado a {}%", volume);
        Ok(())
    }

    /// Vacía la cola; cancela cualquier avance en curso
    pub async fn clear_queue(&self, session: GuildId) -> ControllerResult<usize> {
        let handle = self.session(session)?;
        handle.state.lock().cancel(CancelCause::Clear);

        let _guard = handle.advance.lock().await;
        let removed = handle.queue.clear().await?;

        let mut state = handle.state.lock();
        if state.current.is_none() {
            state.phase = PlaybackPhase::Idle;
            self.inactivity.arm(
                session,
                IdleReason::QueueExhausted,
                self.settings.queue_exhausted_timeout,
            );
        }
        Ok(removed)
    }

    pub async fn shuffle(&self, session: GuildId) -> ControllerResult<usize> {
        let handle = self.session(session)?;
        let _guard = handle.advance.lock().await;
        Ok(handle.queue.shuffle().await?)
    }

    /// Elimina la posición 1-based y devuelve el track eliminado
    pub async fn remove(&self, session: GuildId, position: usize) -> ControllerResult<TrackRecord> {
        let handle = self.session(session)?;
        let _guard = handle.advance.lock().await;

        let len = handle.queue.len().await?;
        if position == 0 || position > len {
            return Err(ControllerError::InvalidPosition { position, len });
        }

        let track = handle
            .queue
            .preview(position)
            .await?
            .pop()
            .ok_or(ControllerError::InvalidPosition { position, len })?;

        if !handle.queue.remove(position).await? {
            return Err(ControllerError::InvalidPosition { position, len });
        }
        Ok(track)
    }

    /// Guarda la sesión, libera el transporte y destruye la sesión
    pub async fn disconnect(&self, session: GuildId) -> ControllerResult<()> {
        let handle = self.session(session)?;
        handle.state.lock().cancel(CancelCause::Disconnect);

        let _guard = handle.advance.lock().await;
        self.teardown(&handle, CloseReason::Disconnected).await;
        Ok(())
    }

    /// Requiere la guardia de la sesión
    async fn teardown(&self, handle: &SessionHandle, reason: CloseReason) {
        let session = handle.id;
        self.inactivity.disarm_all(session);

        let saved = {
            let mut state = handle.state.lock();
            let saved = SavedSession {
                current: state.take_current(),
                volume: state.volume,
                loop_mode: state.loop_mode,
                saved_at: Utc::now(),
            };
            state.phase = PlaybackPhase::Idle;
            state.play_id = 0;
            saved
        };

        self.transport.stop(session).await;
        self.transport.release(session).await;

        if let Err(e) = self.registry.store().save_session(session, saved).await {
            self.store_unavailable(session, &e);
        }

        self.votes.clear(session);
        self.registry.destroy(session);
        info!("👋 Sesión cerrada en {} ({:?})", session, reason);
        self.notify(PlaybackNotice::SessionClosed { session, reason });
    }

    /// Actualiza la población de oyentes (sin bots) del canal de voz
    pub fn update_listeners(&self, session: GuildId, count: usize) {
        let Some(handle) = self.registry.get(session) else {
            return;
        };

        let mut state = handle.state.lock();
        let previous = state.listeners.replace(count);
        if count == 0 {
            if previous != Some(0) || !self.inactivity.is_armed(session, IdleReason::ListenersLeft) {
                self.inactivity.arm(
                    session,
                    IdleReason::ListenersLeft,
                    self.settings.listeners_left_timeout,
                );
            }
        } else {
            self.inactivity.disarm(session, IdleReason::ListenersLeft);
        }
    }

    async fn on_idle_expired(&self, session: GuildId, reason: IdleReason, timer_id: u64) {
        if !self.inactivity.consume(session, reason, timer_id) {
            debug!("Temporizador obsoleto {} en {}", timer_id, session);
            return;
        }
        let Some(handle) = self.registry.get(session) else {
            return;
        };

        let _guard = handle.advance.lock().await;

        let still_idle = match reason {
            IdleReason::ListenersLeft => handle.state.lock().listeners == Some(0),
            IdleReason::QueueExhausted => {
                let has_current = handle.current().is_some();
                match handle.queue.is_empty().await {
                    Ok(empty) => empty && !has_current,
                    Err(e) => {
                        warn!("💾 No se pudo comprobar la cola de {}: {}", session, e);
                        false
                    }
                }
            }
        };

        if !still_idle {
            debug!("⏳ {} en {} ya no aplica", reason, session);
            return;
        }

        info!("💤 Cerrando sesión de {} por inactividad ({})", session, reason);
        handle.state.lock().cancel(CancelCause::Disconnect);
        self.teardown(&handle, CloseReason::Idle(reason)).await;
    }

    pub fn snapshot(&self, session: GuildId) -> Option<SessionSnapshot> {
        let handle = self.registry.get(session)?;
        let state = handle.state.lock().clone();

        Some(SessionSnapshot {
            session,
            channel: state.channel,
            phase: state.phase,
            current: state.current,
            upcoming: handle.queue.cached_preview(),
            upcoming_duration: handle.queue.cached_duration(),
            queue_len: handle.queue.cached_len(),
            loop_mode: state.loop_mode,
            volume: state.volume,
            tracks_played: state.tracks_played,
            total_playtime: Duration::from_millis(state.total_playtime_millis),
            history: handle.queue.history_snapshot(),
            votes: self.votes.votes(session),
            listeners: state.listeners,
        })
    }

    pub async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::TrackEnded {
                session,
                play_id,
                error,
            } => self.on_track_end(session, play_id, error).await,
            EngineEvent::IdleExpired {
                session,
                reason,
                timer_id,
            } => self.on_idle_expired(session, reason, timer_id).await,
        }
    }

    /// Bucle de eventos: cada evento en su propia tarea
    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<EngineEvent>) {
        info!("🎛️ Bucle de eventos de reproducción iniciado");
        while let Some(event) = events.recv().await {
            let controller = self.clone();
            tokio::spawn(async move {
                controller.handle_event(event).await;
            });
        }
        info!("🎛️ Bucle de eventos de reproducción detenido");
    }

    /// Desconecta todas las sesiones guardando su estado
    pub async fn shutdown(&self) {
        for session in self.registry.ids() {
            if let Err(e) = self.disconnect(session).await {
                warn!("Error cerrando sesión {}: {}", session, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::MockPlaybackTransport;
    use crate::sources::resolver::ResolverSettings;
    use crate::storage::MemoryQueueStore;
    use tokio::sync::mpsc;

    fn controller(transport: MockPlaybackTransport) -> PlaybackController {
        let (events, _) = mpsc::unbounded_channel();
        let (notices, _) = mpsc::unbounded_channel();
        PlaybackController::new(
            EngineSettings::default(),
            Arc::new(MemoryQueueStore::new()),
            Arc::new(TrackResolver::new(vec![], None, ResolverSettings::default())),
            Arc::new(transport),
            events,
            notices,
        )
    }

    fn connected_transport() -> MockPlaybackTransport {
        let mut transport = MockPlaybackTransport::new();
        transport.expect_connect().returning(|_, _| Ok(()));
        transport
    }

    #[tokio::test]
    async fn operations_without_session_are_rejected() {
        let controller = controller(MockPlaybackTransport::new());
        let guild = GuildId::new(1);

        assert!(matches!(
            controller.pause(guild).await,
            Err(ControllerError::NotConnected)
        ));
        assert!(matches!(
            controller.enqueue(guild, "x", UserId::new(1)).await,
            Err(ControllerError::NotConnected)
        ));
        assert!(controller.snapshot(guild).is_none());
    }

    #[tokio::test]
    async fn pause_and_resume_require_matching_phase() {
        let controller = controller(connected_transport());
        let guild = GuildId::new(2);
        controller.connect(guild, ChannelId::new(20)).await.unwrap();

        assert!(matches!(
            controller.pause(guild).await,
            Err(ControllerError::NotApplicable(_))
        ));
        assert!(matches!(
            controller.resume(guild).await,
            Err(ControllerError::NotApplicable(_))
        ));
    }

    #[tokio::test]
    async fn volume_is_validated() {
        let mut transport = connected_transport();
        transport.expect_set_volume().times(1).returning(|_, _| Ok(()));
        let controller = controller(transport);
        let guild = GuildId::new(3);
        controller.connect(guild, ChannelId::new(30)).await.unwrap();

        assert!(matches!(
            controller.set_volume(guild, 101).await,
            Err(ControllerError::InvalidVolume(101))
        ));
        controller.set_volume(guild, 80).await.unwrap();
        assert_eq!(controller.snapshot(guild).unwrap().volume, 80);
    }

    #[tokio::test]
    async fn remove_rejects_out_of_range_positions() {
        let controller = controller(connected_transport());
        let guild = GuildId::new(4);
        controller.connect(guild, ChannelId::new(40)).await.unwrap();

        assert!(matches!(
            controller.remove(guild, 1).await,
            Err(ControllerError::InvalidPosition { position: 1, len: 0 })
        ));
    }
}
