use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::audio::track::TrackRecord;
use crate::storage::{PersistentQueueStore, StoreResult};

/// Límite por defecto del historial de reproducción.
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// Cantidad de entradas que se reflejan en la vista previa cacheada.
const PREVIEW_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" | "none" | "no" => Some(LoopMode::Off),
            "track" | "song" | "cancion" | "canción" => Some(LoopMode::Track),
            "queue" | "all" | "cola" => Some(LoopMode::Queue),
            _ => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Off => f.write_str("desactivado"),
            LoopMode::Track => f.write_str("canción"),
            LoopMode::Queue => f.write_str("cola"),
        }
    }
}

#[derive(Debug, Default)]
struct QueueCache {
    len: usize,
    preview: Vec<TrackRecord>,
}

/// Fachada de cola por sesión sobre el [`PersistentQueueStore`].
///
/// Las lecturas `cached_*` no bloquean y pueden estar ligeramente
/// desactualizadas; `len()` / `is_empty()` consultan el store.
pub struct PlaybackQueue {
    session: GuildId,
    store: Arc<dyn PersistentQueueStore>,
    cache: RwLock<QueueCache>,
    history: Mutex<VecDeque<TrackRecord>>,
    history_limit: usize,
}

impl PlaybackQueue {
    pub fn new(session: GuildId, store: Arc<dyn PersistentQueueStore>, history_limit: usize) -> Self {
        Self {
            session,
            store,
            cache: RwLock::new(QueueCache::default()),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn session(&self) -> GuildId {
        self.session
    }

    /// Agrega un track al final y devuelve su posición
    pub async fn append(&self, record: TrackRecord) -> StoreResult<usize> {
        let title = record.title.clone();
        let position = self.store.append(self.session, record).await?;
        info!("➕ Agregado a la cola: {} (posición {})", title, position);
        self.refresh_cache().await;
        Ok(position)
    }

    /// Devuelve un track a la cabeza de la cola
    pub async fn push_front(&self, record: TrackRecord) -> StoreResult<()> {
        debug!("⏮️ Devolviendo a la cabeza: {}", record.title);
        self.store.push_front(self.session, record).await?;
        self.refresh_cache().await;
        Ok(())
    }

    /// Obtiene el siguiente track (FIFO)
    pub async fn pop_front(&self) -> StoreResult<Option<TrackRecord>> {
        let next = self.store.pop_front(self.session).await?;
        match &next {
            Some(item) => info!("➡️ Siguiente en cola: {}", item.title),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        self.refresh_cache().await;
        Ok(next)
    }

    /// Elimina la posición 1-based; `false` si no existe
    pub async fn remove(&self, position: usize) -> StoreResult<bool> {
        let removed = self.store.remove_at(self.session, position).await?;
        if removed {
            debug!("❌ Track eliminado en posición {}", position);
            self.refresh_cache().await;
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> StoreResult<usize> {
        let removed = self.store.clear(self.session).await?;
        info!("🗑️ Cola limpiada ({} canciones)", removed);
        self.refresh_cache().await;
        Ok(removed)
    }

    /// Mezcla la cola
    pub async fn shuffle(&self) -> StoreResult<usize> {
        let len = self.store.size(self.session).await?;
        let mut records = self.store.preview(self.session, len).await?;
        {
            let mut rng = rand::thread_rng();
            records.shuffle(&mut rng);
        }
        let shuffled = records.len();
        self.store.replace(self.session, records).await?;
        info!("🔀 Cola mezclada ({} canciones)", shuffled);
        self.refresh_cache().await;
        Ok(shuffled)
    }

    /// Vuelca el historial a la cola, del más antiguo al más reciente
    pub async fn refill_from_history(&self) -> StoreResult<usize> {
        let drained: Vec<TrackRecord> = self.history.lock().drain(..).collect();
        if drained.is_empty() {
            return Ok(0);
        }

        let len = self.store.size(self.session).await?;
        let mut records = self.store.preview(self.session, len).await?;
        let refilled = drained.len();
        records.extend(drained.iter().cloned());

        if let Err(e) = self.store.replace(self.session, records).await {
            // Sin cambios en el store: el historial vuelve a su sitio
            let mut history = self.history.lock();
            for record in drained.into_iter().rev() {
                history.push_front(record);
            }
            return Err(e);
        }

        info!("🔁 Cola recargada desde el historial ({} canciones)", refilled);
        self.refresh_cache().await;
        Ok(refilled)
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.store.size(self.session).await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn preview(&self, limit: usize) -> StoreResult<Vec<TrackRecord>> {
        self.store.preview(self.session, limit).await
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len
    }

    pub fn cached_is_empty(&self) -> bool {
        self.cache.read().len == 0
    }

    pub fn cached_preview(&self) -> Vec<TrackRecord> {
        self.cache.read().preview.clone()
    }

    /// Duración conocida de lo que queda en la vista previa cacheada
    pub fn cached_duration(&self) -> Duration {
        self.cache
            .read()
            .preview
            .iter()
            .filter_map(TrackRecord::duration)
            .sum()
    }

    /// Registra un track terminado; el más antiguo se descarta al superar el límite
    pub fn push_history(&self, record: TrackRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn history_snapshot(&self) -> Vec<TrackRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Reconstruye la caché consultiva desde el store.
    ///
    /// Un fallo del store deja la caché anterior intacta.
    pub async fn refresh_cache(&self) {
        let result = async {
            let len = self.store.size(self.session).await?;
            let preview = self.store.preview(self.session, PREVIEW_LIMIT).await?;
            StoreResult::Ok(QueueCache { len, preview })
        }
        .await;

        match result {
            Ok(fresh) => *self.cache.write() = fresh,
            Err(e) => warn!(
                "⚠️ No se pudo refrescar la caché de cola de {}: {}",
                self.session, e
            ),
        }
    }
}
