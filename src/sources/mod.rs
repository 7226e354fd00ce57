//! Proveedores de resolución de pistas.
//!
//! Cada proveedor implementa [`MusicSource`] y devuelve [`Candidate`]s sin
//! solicitante; el [`TrackResolver`](resolver::TrackResolver) los convierte en
//! [`TrackRecord`] y aplica el orden de prioridad y los fallbacks.

pub mod direct_url;
pub mod invidious;
pub mod resolver;
pub mod soundcloud;
pub mod youtube;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;

use crate::audio::track::{Provider, TrackRecord};

pub use direct_url::DirectUrlClient;
pub use invidious::InvidiousClient;
pub use resolver::{Resolution, ResolutionKind, TrackResolver};
pub use soundcloud::SoundCloudClient;
pub use youtube::YouTubeClient;
pub use ytdlp::YtDlp;

/// Trait común para todas las fuentes de música
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Busca tracks en la fuente
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>>;

    /// Obtiene información detallada de un track por URL
    async fn get_track(&self, url: &str) -> Result<Candidate>;

    /// Obtiene tracks de una playlist, como máximo `max_items`
    async fn get_playlist(&self, url: &str, max_items: usize) -> Result<Vec<Candidate>>;

    /// Verifica si la URL es válida para esta fuente
    fn is_valid_url(&self, url: &str) -> bool;

    /// Si la URL apunta a una colección en lugar de un track
    fn is_playlist_url(&self, url: &str) -> bool;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;

    fn provider(&self) -> Provider;
}

/// Resultado de un proveedor, todavía sin solicitante.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub source_uri: String,
    pub origin_uri: String,
    pub duration_millis: u64,
    pub thumbnail: Option<String>,
    pub provider: Provider,
}

impl Candidate {
    pub fn new(
        title: impl Into<String>,
        source_uri: impl Into<String>,
        origin_uri: impl Into<String>,
        provider: Provider,
    ) -> Self {
        Self {
            title: title.into(),
            source_uri: source_uri.into(),
            origin_uri: origin_uri.into(),
            duration_millis: 0,
            thumbnail: None,
            provider,
        }
    }

    pub fn with_duration_millis(mut self, duration_millis: u64) -> Self {
        self.duration_millis = duration_millis;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn into_record(self, requester: UserId) -> TrackRecord {
        TrackRecord::new(
            self.title,
            self.source_uri,
            self.origin_uri,
            self.provider,
            requester,
        )
        .with_duration_millis(self.duration_millis)
        .with_thumbnail(self.thumbnail)
    }
}

/// Si el texto es una URL http(s)
pub fn is_http_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
