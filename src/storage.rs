//! Almacenamiento persistente de colas por sesión.
//!
//! Cada sesión (guild) tiene una lista ordenada de [`TrackRecord`] con
//! posiciones 1-based que se recalculan en cada cambio estructural, más una
//! instantánea opcional de la sesión guardada al desconectar.
//!
//! El store asume acceso serializado por sesión: quien llama sostiene el
//! guard de avance del [`PlaybackController`](crate::audio::player::PlaybackController).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::audio::{queue::LoopMode, track::TrackRecord};
use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Estado de sesión guardado al desconectar para reanudar después.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub current: Option<TrackRecord>,
    pub volume: u8,
    pub loop_mode: LoopMode,
    pub saved_at: DateTime<Utc>,
}

/// Almacenamiento ordenado y durable de tracks por sesión.
#[async_trait]
pub trait PersistentQueueStore: Send + Sync {
    /// Agrega al final y devuelve la posición 1-based asignada
    async fn append(&self, session: GuildId, record: TrackRecord) -> StoreResult<usize>;

    /// Inserta en la cabeza de la cola
    async fn push_front(&self, session: GuildId, record: TrackRecord) -> StoreResult<()>;

    async fn pop_front(&self, session: GuildId) -> StoreResult<Option<TrackRecord>>;

    /// Elimina la posición 1-based; `false` si está fuera de rango
    async fn remove_at(&self, session: GuildId, position: usize) -> StoreResult<bool>;

    /// Vacía la cola y devuelve cuántos tracks se eliminaron
    async fn clear(&self, session: GuildId) -> StoreResult<usize>;

    async fn preview(&self, session: GuildId, limit: usize) -> StoreResult<Vec<TrackRecord>>;

    async fn size(&self, session: GuildId) -> StoreResult<usize>;

    /// Reemplaza la cola completa (mezcla, recarga desde historial)
    async fn replace(&self, session: GuildId, records: Vec<TrackRecord>) -> StoreResult<()>;

    async fn save_session(&self, session: GuildId, saved: SavedSession) -> StoreResult<()>;

    /// Devuelve y elimina la instantánea guardada
    async fn take_session(&self, session: GuildId) -> StoreResult<Option<SavedSession>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTrack {
    position: usize,
    #[serde(flatten)]
    track: TrackRecord,
}

/// Documento JSON por guild: `queues/guild_<id>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueDocument {
    guild_id: u64,
    #[serde(default)]
    queue: Vec<StoredTrack>,
    #[serde(default)]
    saved_session: Option<SavedSession>,
    updated_at: DateTime<Utc>,
}

impl QueueDocument {
    fn empty(guild_id: GuildId) -> Self {
        Self {
            guild_id: guild_id.get(),
            queue: Vec::new(),
            saved_session: None,
            updated_at: Utc::now(),
        }
    }

    fn renumber(&mut self) {
        for (i, entry) in self.queue.iter_mut().enumerate() {
            entry.position = i + 1;
        }
        self.updated_at = Utc::now();
    }

    fn set_tracks(&mut self, tracks: impl IntoIterator<Item = TrackRecord>) {
        self.queue = tracks
            .into_iter()
            .map(|track| StoredTrack { position: 0, track })
            .collect();
        self.renumber();
    }
}

/// Store basado en archivos JSON, un documento por servidor.
///
/// Los documentos se cargan en memoria al iniciar y cada mutación se escribe
/// a un archivo temporal y se renombra, de modo que un fallo a mitad de
/// escritura nunca deja un documento truncado. Cada documento tiene su
/// propio lock: la escritura de una sesión no bloquea a las demás.
pub struct JsonQueueStore {
    data_dir: PathBuf,
    documents: DashMap<u64, Arc<Mutex<QueueDocument>>>,
}

impl JsonQueueStore {
    pub async fn new(data_dir: PathBuf) -> StoreResult<Self> {
        let queues_dir = data_dir.join("queues");
        fs::create_dir_all(&queues_dir).await?;

        info!("📁 Store de colas inicializado en: {}", queues_dir.display());

        let store = Self {
            data_dir,
            documents: DashMap::new(),
        };
        store.load_all().await?;
        Ok(store)
    }

    async fn load_all(&self) -> StoreResult<()> {
        let queues_dir = self.data_dir.join("queues");
        let mut files = fs::read_dir(&queues_dir).await?;
        let mut loaded = 0usize;
        let mut pending_tracks = 0usize;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<QueueDocument>(&content) {
                    Ok(mut doc) => {
                        doc.renumber();
                        pending_tracks += doc.queue.len();
                        self.documents.insert(guild_id, Arc::new(Mutex::new(doc)));
                        loaded += 1;
                    }
                    Err(e) => warn!("Cola corrupta para guild {}: {}", guild_id, e),
                },
                Err(e) => warn!("Error leyendo cola de guild {}: {}", guild_id, e),
            }
        }

        if loaded > 0 {
            info!(
                "📂 Cargadas {} colas persistidas ({} tracks pendientes)",
                loaded, pending_tracks
            );
        }
        Ok(())
    }

    fn file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir
            .join("queues")
            .join(format!("guild_{}.json", guild_id))
    }

    async fn write_document(&self, doc: &QueueDocument) -> StoreResult<()> {
        let path = self.file_path(doc.guild_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!("💾 Cola persistida para guild {}", doc.guild_id);
        Ok(())
    }

    fn document(&self, session: GuildId) -> Arc<Mutex<QueueDocument>> {
        self.documents
            .entry(session.get())
            .or_insert_with(|| Arc::new(Mutex::new(QueueDocument::empty(session))))
            .clone()
    }

    /// Aplica `f` al documento de la sesión y lo persiste.
    ///
    /// Si la escritura falla, el documento en memoria se restaura para que
    /// memoria y disco no diverjan.
    async fn mutate<T>(
        &self,
        session: GuildId,
        f: impl FnOnce(&mut QueueDocument) -> T,
    ) -> StoreResult<T> {
        let document = self.document(session);
        let mut doc = document.lock().await;
        let before = doc.clone();
        let out = f(&mut *doc);

        if let Err(e) = self.write_document(&*doc).await {
            *doc = before;
            return Err(e);
        }
        Ok(out)
    }

    async fn read<T>(&self, session: GuildId, f: impl FnOnce(Option<&QueueDocument>) -> T) -> T {
        let document = self.documents.get(&session.get()).map(|entry| entry.clone());
        match document {
            Some(document) => {
                let doc = document.lock().await;
                f(Some(&*doc))
            }
            None => f(None),
        }
    }
}

#[async_trait]
impl PersistentQueueStore for JsonQueueStore {
    async fn append(&self, session: GuildId, record: TrackRecord) -> StoreResult<usize> {
        self.mutate(session, |doc| {
            doc.queue.push(StoredTrack {
                position: 0,
                track: record,
            });
            doc.renumber();
            doc.queue.len()
        })
        .await
    }

    async fn push_front(&self, session: GuildId, record: TrackRecord) -> StoreResult<()> {
        self.mutate(session, |doc| {
            doc.queue.insert(
                0,
                StoredTrack {
                    position: 0,
                    track: record,
                },
            );
            doc.renumber();
        })
        .await
    }

    async fn pop_front(&self, session: GuildId) -> StoreResult<Option<TrackRecord>> {
        let empty = self.read(session, |doc| doc.map_or(true, |d| d.queue.is_empty())).await;
        if empty {
            return Ok(None);
        }

        self.mutate(session, |doc| {
            if doc.queue.is_empty() {
                return None;
            }
            let entry = doc.queue.remove(0);
            doc.renumber();
            Some(entry.track)
        })
        .await
    }

    async fn remove_at(&self, session: GuildId, position: usize) -> StoreResult<bool> {
        let len = self.size(session).await?;
        if position == 0 || position > len {
            return Ok(false);
        }

        self.mutate(session, |doc| {
            if position > doc.queue.len() {
                return false;
            }
            doc.queue.remove(position - 1);
            doc.renumber();
            true
        })
        .await
    }

    async fn clear(&self, session: GuildId) -> StoreResult<usize> {
        self.mutate(session, |doc| {
            let removed = doc.queue.len();
            doc.queue.clear();
            doc.renumber();
            removed
        })
        .await
    }

    async fn preview(&self, session: GuildId, limit: usize) -> StoreResult<Vec<TrackRecord>> {
        Ok(self
            .read(session, |doc| {
                doc.map(|d| {
                    d.queue
                        .iter()
                        .take(limit)
                        .map(|entry| entry.track.clone())
                        .collect()
                })
                .unwrap_or_default()
            })
            .await)
    }

    async fn size(&self, session: GuildId) -> StoreResult<usize> {
        Ok(self.read(session, |doc| doc.map_or(0, |d| d.queue.len())).await)
    }

    async fn replace(&self, session: GuildId, records: Vec<TrackRecord>) -> StoreResult<()> {
        self.mutate(session, |doc| doc.set_tracks(records)).await
    }

    async fn save_session(&self, session: GuildId, saved: SavedSession) -> StoreResult<()> {
        self.mutate(session, |doc| {
            doc.saved_session = Some(saved);
            doc.updated_at = Utc::now();
        })
        .await
    }

    async fn take_session(&self, session: GuildId) -> StoreResult<Option<SavedSession>> {
        let has_saved = self
            .read(session, |doc| doc.is_some_and(|d| d.saved_session.is_some()))
            .await;
        if !has_saved {
            return Ok(None);
        }
        self.mutate(session, |doc| doc.saved_session.take()).await
    }
}

#[derive(Debug, Default)]
struct MemoryEntry {
    queue: Vec<TrackRecord>,
    saved: Option<SavedSession>,
}

/// Store en memoria (sin durabilidad entre reinicios).
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: DashMap<GuildId, MemoryEntry>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentQueueStore for MemoryQueueStore {
    async fn append(&self, session: GuildId, record: TrackRecord) -> StoreResult<usize> {
        let mut entry = self.entries.entry(session).or_default();
        entry.queue.push(record);
        Ok(entry.queue.len())
    }

    async fn push_front(&self, session: GuildId, record: TrackRecord) -> StoreResult<()> {
        self.entries.entry(session).or_default().queue.insert(0, record);
        Ok(())
    }

    async fn pop_front(&self, session: GuildId) -> StoreResult<Option<TrackRecord>> {
        Ok(self.entries.get_mut(&session).and_then(|mut entry| {
            if entry.queue.is_empty() {
                None
            } else {
                Some(entry.queue.remove(0))
            }
        }))
    }

    async fn remove_at(&self, session: GuildId, position: usize) -> StoreResult<bool> {
        let Some(mut entry) = self.entries.get_mut(&session) else {
            return Ok(false);
        };
        if position == 0 || position > entry.queue.len() {
            return Ok(false);
        }
        entry.queue.remove(position - 1);
        Ok(true)
    }

    async fn clear(&self, session: GuildId) -> StoreResult<usize> {
        Ok(self
            .entries
            .get_mut(&session)
            .map(|mut entry| entry.queue.drain(..).count())
            .unwrap_or(0))
    }

    async fn preview(&self, session: GuildId, limit: usize) -> StoreResult<Vec<TrackRecord>> {
        Ok(self
            .entries
            .get(&session)
            .map(|entry| entry.queue.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn size(&self, session: GuildId) -> StoreResult<usize> {
        Ok(self.entries.get(&session).map_or(0, |entry| entry.queue.len()))
    }

    async fn replace(&self, session: GuildId, records: Vec<TrackRecord>) -> StoreResult<()> {
        self.entries.entry(session).or_default().queue = records;
        Ok(())
    }

    async fn save_session(&self, session: GuildId, saved: SavedSession) -> StoreResult<()> {
        self.entries.entry(session).or_default().saved = Some(saved);
        Ok(())
    }

    async fn take_session(&self, session: GuildId) -> StoreResult<Option<SavedSession>> {
        Ok(self
            .entries
            .get_mut(&session)
            .and_then(|mut entry| entry.saved.take()))
    }
}
