use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::fmt;
use std::time::Duration;

/// Proveedores de resolución, en orden de prioridad de búsqueda.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    YouTube,
    SoundCloud,
    Invidious,
    /// Extracción fuera de banda con yt-dlp; el transporte recibe una URL de stream.
    Direct,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::SoundCloud => "soundcloud",
            Provider::Invidious => "invidious",
            Provider::Direct => "direct",
        }
    }

    /// Si el transporte reproduce `source_uri` como HTTP plano en lugar de
    /// dejar que yt-dlp lo resuelva.
    pub fn is_direct_stream(&self) -> bool {
        matches!(self, Provider::Invidious | Provider::Direct)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "youtube" | "yt" => Some(Provider::YouTube),
            "soundcloud" | "sc" => Some(Provider::SoundCloud),
            "invidious" | "inv" => Some(Provider::Invidious),
            "direct" => Some(Provider::Direct),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descripción inmutable de un elemento en cola o reproduciéndose.
///
/// `source_uri` puede expirar y re-resolverse; la identidad estable del
/// track es `(origin_uri, provider)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    pub source_uri: String,
    pub origin_uri: String,
    /// 0 = desconocida o en vivo
    pub duration_millis: u64,
    pub provider: Provider,
    pub requester: UserId,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl TrackRecord {
    pub fn new(
        title: impl Into<String>,
        source_uri: impl Into<String>,
        origin_uri: impl Into<String>,
        provider: Provider,
        requester: UserId,
    ) -> Self {
        let title = title.into();
        Self {
            title: if title.trim().is_empty() {
                "Desconocido".to_string()
            } else {
                title
            },
            source_uri: source_uri.into(),
            origin_uri: origin_uri.into(),
            duration_millis: 0,
            provider,
            requester,
            requested_at: Utc::now(),
            thumbnail: None,
        }
    }

    pub fn with_duration_millis(mut self, duration_millis: u64) -> Self {
        self.duration_millis = duration_millis;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail.filter(|t| !t.is_empty());
        self
    }

    /// Copia con otra fuente reproducible; usada solo para un intento de
    /// reproducción, la copia persistida en la cola no cambia.
    pub fn with_source(&self, source_uri: impl Into<String>, provider: Provider) -> Self {
        Self {
            source_uri: source_uri.into(),
            provider,
            ..self.clone()
        }
    }

    pub fn identity(&self) -> (&str, Provider) {
        (self.origin_uri.as_str(), self.provider)
    }

    pub fn same_identity(&self, other: &TrackRecord) -> bool {
        self.identity() == other.identity()
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.duration_millis > 0).then(|| Duration::from_millis(self.duration_millis))
    }

    pub fn is_live(&self) -> bool {
        self.duration_millis == 0
    }
}

impl fmt::Display for TrackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration() {
            Some(d) => {
                let secs = d.as_secs();
                write!(f, "{} [{}:{:02}] ({})", self.title, secs / 60, secs % 60, self.provider)
            }
            None => write!(f, "{} [en vivo] ({})", self.title, self.provider),
        }
    }
}
