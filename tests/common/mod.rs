#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rat_music::{
    audio::{
        player::{EngineSettings, PlaybackController, PlaybackNotice},
        track::{Provider, TrackRecord},
        transport::{EngineEvent, PlaybackTransport},
    },
    error::{PlaybackStartError, StoreError},
    sources::{resolver::ResolverSettings, Candidate, MusicSource, TrackResolver},
    storage::{MemoryQueueStore, PersistentQueueStore, SavedSession, StoreResult},
};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub fn guild() -> GuildId {
    GuildId::new(1)
}

pub fn user(id: u64) -> UserId {
    UserId::new(id)
}

pub fn channel() -> ChannelId {
    ChannelId::new(100)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayCall {
    pub session: GuildId,
    pub title: String,
    pub provider: Provider,
    pub play_id: u64,
}

/// Transporte en memoria que registra cada llamada
#[derive(Default)]
pub struct FakeTransport {
    plays: Mutex<Vec<PlayCall>>,
    failing: Mutex<HashSet<Provider>>,
    active: Mutex<HashMap<GuildId, u64>>,
    play_delay: Mutex<Option<Duration>>,
    overlaps: AtomicUsize,
    stops: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeTransport {
    pub fn fail_provider(&self, provider: Provider) {
        self.failing.lock().insert(provider);
    }

    pub fn set_play_delay(&self, delay: Duration) {
        *self.play_delay.lock() = Some(delay);
    }

    pub fn plays(&self) -> Vec<PlayCall> {
        self.plays.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.plays.lock().iter().map(|p| p.title.clone()).collect()
    }

    /// Id de la reproducción activa en `session`
    pub fn active(&self, session: GuildId) -> Option<u64> {
        self.active.lock().get(&session).copied()
    }

    /// Marca el track activo como terminado y devuelve su id
    pub fn finish(&self, session: GuildId) -> Option<u64> {
        self.active.lock().remove(&session)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackTransport for FakeTransport {
    async fn connect(&self, _session: GuildId, _channel: ChannelId) -> Result<()> {
        Ok(())
    }

    async fn play(
        &self,
        session: GuildId,
        track: &TrackRecord,
        play_id: u64,
        _volume: u8,
    ) -> Result<(), PlaybackStartError> {
        let delay = *self.play_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(&track.provider) {
            return Err(PlaybackStartError::Rejected {
                provider: track.provider,
                source_uri: track.source_uri.clone(),
                reason: "403".to_string(),
            });
        }

        if self.active.lock().insert(session, play_id).is_some() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.plays.lock().push(PlayCall {
            session,
            title: track.title.clone(),
            provider: track.provider,
            play_id,
        });
        Ok(())
    }

    async fn stop(&self, session: GuildId) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.lock().remove(&session);
    }

    async fn pause(&self, _session: GuildId) -> Result<()> {
        Ok(())
    }

    async fn resume(&self, _session: GuildId) -> Result<()> {
        Ok(())
    }

    async fn set_volume(&self, _session: GuildId, _volume: u8) -> Result<()> {
        Ok(())
    }

    async fn is_playing(&self, session: GuildId) -> bool {
        self.active.lock().contains_key(&session)
    }

    async fn is_paused(&self, _session: GuildId) -> bool {
        false
    }

    async fn release(&self, session: GuildId) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.active.lock().remove(&session);
    }
}

/// Proveedor que devuelve un resultado con el título de la consulta
pub struct FakeSource {
    provider: Provider,
    searches: AtomicUsize,
}

impl FakeSource {
    pub fn new(provider: Provider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            searches: AtomicUsize::new(0),
        })
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MusicSource for FakeSource {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<Candidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let uri = format!("https://{}.test/{}", self.provider, query.replace(' ', "-"));
        Ok(vec![
            Candidate::new(query, uri.clone(), uri, self.provider).with_duration_millis(180_000)
        ])
    }

    async fn get_track(&self, url: &str) -> Result<Candidate> {
        anyhow::bail!("sin soporte para {}", url)
    }

    async fn get_playlist(&self, url: &str, _max_items: usize) -> Result<Vec<Candidate>> {
        anyhow::bail!("sin soporte para {}", url)
    }

    fn is_valid_url(&self, _url: &str) -> bool {
        false
    }

    fn is_playlist_url(&self, _url: &str) -> bool {
        false
    }

    fn source_name(&self) -> &'static str {
        "fake"
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

/// Store en memoria con fallos inyectables
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryQueueStore,
    /// Próximas lecturas de cabeza que fallan
    fail_pops: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_pops(&self, count: usize) {
        self.fail_pops.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lectura rechazada".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("escritura rechazada".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentQueueStore for FailingStore {
    async fn append(&self, session: GuildId, record: TrackRecord) -> StoreResult<usize> {
        self.check_writes()?;
        self.inner.append(session, record).await
    }

    async fn push_front(&self, session: GuildId, record: TrackRecord) -> StoreResult<()> {
        self.check_writes()?;
        self.inner.push_front(session, record).await
    }

    async fn pop_front(&self, session: GuildId) -> StoreResult<Option<TrackRecord>> {
        let failed = self
            .fail_pops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("lectura de cabeza rechazada".to_string()));
        }
        self.check_writes()?;
        self.inner.pop_front(session).await
    }

    async fn remove_at(&self, session: GuildId, position: usize) -> StoreResult<bool> {
        self.check_writes()?;
        self.inner.remove_at(session, position).await
    }

    async fn clear(&self, session: GuildId) -> StoreResult<usize> {
        self.check_writes()?;
        self.inner.clear(session).await
    }

    async fn preview(&self, session: GuildId, limit: usize) -> StoreResult<Vec<TrackRecord>> {
        self.check_reads()?;
        self.inner.preview(session, limit).await
    }

    async fn size(&self, session: GuildId) -> StoreResult<usize> {
        self.check_reads()?;
        self.inner.size(session).await
    }

    async fn replace(&self, session: GuildId, records: Vec<TrackRecord>) -> StoreResult<()> {
        self.check_writes()?;
        self.inner.replace(session, records).await
    }

    async fn save_session(&self, session: GuildId, saved: SavedSession) -> StoreResult<()> {
        self.check_writes()?;
        self.inner.save_session(session, saved).await
    }

    async fn take_session(&self, session: GuildId) -> StoreResult<Option<SavedSession>> {
        self.inner.take_session(session).await
    }
}

pub struct Harness {
    pub controller: Arc<PlaybackController>,
    pub transport: Arc<FakeTransport>,
    pub sources: Vec<Arc<FakeSource>>,
    pub events: Option<UnboundedReceiver<EngineEvent>>,
    pub notices: UnboundedReceiver<PlaybackNotice>,
}

impl Harness {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_store(settings, Arc::new(MemoryQueueStore::new()))
    }

    /// YouTube, SoundCloud e Invidious, en ese orden de prioridad
    pub fn with_store(settings: EngineSettings, store: Arc<dyn PersistentQueueStore>) -> Self {
        let sources = vec![
            FakeSource::new(Provider::YouTube),
            FakeSource::new(Provider::SoundCloud),
            FakeSource::new(Provider::Invidious),
        ];
        let direct = FakeSource::new(Provider::Direct);

        let resolver = TrackResolver::new(
            sources
                .iter()
                .map(|s| s.clone() as Arc<dyn MusicSource>)
                .collect(),
            Some(direct as Arc<dyn MusicSource>),
            ResolverSettings::default(),
        );

        let transport = Arc::new(FakeTransport::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let controller = Arc::new(PlaybackController::new(
            settings,
            store,
            Arc::new(resolver),
            transport.clone(),
            events_tx,
            notices_tx,
        ));

        Self {
            controller,
            transport,
            sources,
            events: Some(events_rx),
            notices: notices_rx,
        }
    }

    /// Arranca el bucle de eventos del controlador
    pub fn run_events(&mut self) {
        if let Some(events) = self.events.take() {
            tokio::spawn(self.controller.clone().run(events));
        }
    }

    pub async fn connect(&self) {
        self.controller
            .connect(guild(), channel())
            .await
            .expect("connect");
    }

    pub async fn enqueue(&self, query: &str) {
        self.controller
            .enqueue(guild(), query, user(1))
            .await
            .expect("enqueue");
    }

    /// Simula el fin natural del track activo
    pub async fn finish_current(&self) {
        let play_id = self.transport.finish(guild()).expect("no hay track activo");
        self.controller.on_track_end(guild(), play_id, None).await;
    }

    pub fn current_title(&self) -> Option<String> {
        self.controller
            .snapshot(guild())
            .and_then(|s| s.current)
            .map(|t| t.title)
    }

    pub fn store_failures(&mut self) -> usize {
        self.drain_notices()
            .iter()
            .filter(|n| matches!(n, PlaybackNotice::StoreUnavailable { .. }))
            .count()
    }

    pub fn drain_notices(&mut self) -> Vec<PlaybackNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }
}
