use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    sync::OnceLock,
    time::Duration,
};
use tracing::{info, warn};

use super::{Candidate, MusicSource};
use crate::audio::track::Provider;

/// Instancias públicas usadas cuando no se configuran otras
pub const DEFAULT_INSTANCES: &[&str] = &[
    "https://yewtu.be",
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
    "https://invidious.protokolla.fi",
    "https://invidious.privacydev.net",
];

/// itag de audio AAC 128k, reproducible como HTTP plano
const AUDIO_ITAG: u32 = 140;

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    #[serde(default)]
    width: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousVideo {
    video_id: String,
    title: String,
    #[serde(default)]
    length_seconds: Option<u64>,
    #[serde(default)]
    live_now: Option<bool>,
    #[serde(default)]
    video_thumbnails: Option<Vec<Thumbnail>>,
}

#[derive(Debug, Deserialize)]
struct InvidiousPlaylist {
    #[serde(default)]
    videos: Vec<InvidiousVideo>,
}

fn video_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[?&]v=|youtu\.be/|/embed/|/shorts/)([a-zA-Z0-9_-]{11})").ok()
    })
    .as_ref()
}

/// Cliente para la API de Invidious con rotación de instancias.
///
/// La fuente reproducible apunta a `latest_version` con `local=true`, así el
/// audio se sirve desde la propia instancia y no caduca como las URLs de
/// googlevideo.
pub struct InvidiousClient {
    client: reqwest::Client,
    instances: Vec<String>,
    current_instance: AtomicUsize,
}

impl InvidiousClient {
    pub fn new(instances: Vec<String>, timeout: Duration) -> Result<Self> {
        let instances: Vec<String> = instances
            .into_iter()
            .map(|i| i.trim().trim_end_matches('/').to_string())
            .filter(|i| !i.is_empty())
            .collect();
        if instances.is_empty() {
            anyhow::bail!("Se necesita al menos una instancia de Invidious");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .context("Error creando cliente HTTP para Invidious")?;

        Ok(Self {
            client,
            instances,
            current_instance: AtomicUsize::new(0),
        })
    }

    pub fn with_default_instances(timeout: Duration) -> Result<Self> {
        Self::new(
            DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect(),
            timeout,
        )
    }

    /// Instancias en orden de intento, empezando por la siguiente en la rotación
    fn rotation(&self) -> impl Iterator<Item = &str> {
        let start = self.current_instance.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        self.instances
            .iter()
            .cycle()
            .skip(start)
            .take(self.instances.len())
            .map(String::as_str)
    }

    /// Extrae el video ID de una URL de YouTube o de una instancia
    pub fn extract_video_id(url: &str) -> Option<String> {
        video_id_regex()?
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn playlist_id(url: &str) -> Option<String> {
        url::Url::parse(url)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == "list")
            .map(|(_, v)| v.into_owned())
    }

    fn stream_url(instance: &str, video_id: &str) -> String {
        format!(
            "{}/latest_version?id={}&itag={}&local=true",
            instance, video_id, AUDIO_ITAG
        )
    }

    fn to_candidate(instance: &str, video: InvidiousVideo) -> Candidate {
        let duration_millis = if video.live_now.unwrap_or(false) {
            0
        } else {
            video.length_seconds.unwrap_or(0) * 1000
        };
        let thumbnail = video
            .video_thumbnails
            .and_then(|thumbs| thumbs.into_iter().find(|t| t.width >= 320))
            .map(|t| t.url);

        Candidate::new(
            video.title,
            Self::stream_url(instance, &video.video_id),
            format!("https://www.youtube.com/watch?v={}", video.video_id),
            Provider::Invidious,
        )
        .with_duration_millis(duration_millis)
        .with_thumbnail(thumbnail)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Error en request a Invidious")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response
            .json()
            .await
            .context("Error parseando respuesta JSON")
    }

    /// Prueba cada instancia hasta que una responda
    async fn with_instances<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = String::new();
        for instance in self.rotation().map(str::to_string).collect::<Vec<_>>() {
            match f(instance.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("❌ Falló {} en {}: {}", what, instance, e);
                    last_error = format!("{}: {}", instance, e);
                }
            }
        }
        anyhow::bail!(
            "Falló {} en todas las instancias de Invidious. Último error: {}",
            what,
            last_error
        )
    }
}

#[async_trait]
impl MusicSource for InvidiousClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        info!("🔍 Buscando en Invidious: {}", query);
        self.with_instances("búsqueda", |instance| async move {
            let url = format!("{}/api/v1/search", instance);
            let results: Vec<InvidiousVideo> = self
                .get_json(&url, &[("q", query), ("type", "video"), ("page", "1")])
                .await?;
            if results.is_empty() {
                anyhow::bail!("sin resultados");
            }
            Ok(results
                .into_iter()
                .take(limit)
                .map(|video| Self::to_candidate(&instance, video))
                .collect())
        })
        .await
    }

    async fn get_track(&self, url: &str) -> Result<Candidate> {
        let video_id = Self::extract_video_id(url)
            .with_context(|| format!("No se pudo extraer video ID de la URL: {}", url))?;

        self.with_instances("obtener video", |instance| {
            let video_id = video_id.clone();
            async move {
                let api = format!("{}/api/v1/videos/{}", instance, video_id);
                let video: InvidiousVideo = self.get_json(&api, &[]).await?;
                Ok(Self::to_candidate(&instance, video))
            }
        })
        .await
    }

    async fn get_playlist(&self, url: &str, max_items: usize) -> Result<Vec<Candidate>> {
        let playlist_id =
            Self::playlist_id(url).with_context(|| format!("URL sin playlist: {}", url))?;

        self.with_instances("obtener playlist", |instance| {
            let playlist_id = playlist_id.clone();
            async move {
                let api = format!("{}/api/v1/playlists/{}", instance, playlist_id);
                let playlist: InvidiousPlaylist = self.get_json(&api, &[]).await?;
                Ok(playlist
                    .videos
                    .into_iter()
                    .take(max_items)
                    .map(|video| Self::to_candidate(&instance, video))
                    .collect())
            }
        })
        .await
    }

    fn is_valid_url(&self, url: &str) -> bool {
        self.instances
            .iter()
            .any(|instance| url.starts_with(instance.as_str()))
            && (url.contains("watch?v=") || url.contains("list="))
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        self.is_valid_url(url) && url.contains("/playlist?")
    }

    fn source_name(&self) -> &'static str {
        "Invidious"
    }

    fn provider(&self) -> Provider {
        Provider::Invidious
    }
}
