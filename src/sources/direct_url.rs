use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{is_http_url, Candidate, MusicSource, YtDlp};
use crate::audio::track::Provider;

const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus", ".aac", ".webm"];

/// Extracción fuera de banda: yt-dlp obtiene la URL de stream y el
/// transporte la reproduce como HTTP plano.
pub struct DirectUrlClient {
    ytdlp: Arc<YtDlp>,
}

impl DirectUrlClient {
    pub fn new(ytdlp: Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }

    /// Si la URL ya apunta a un archivo de audio
    pub fn is_audio_file(url: &str) -> bool {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| url.to_lowercase());
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    /// Envuelve una URL reproducible sin consultar a ningún proveedor
    pub fn wrap_url(url: &str) -> Candidate {
        let title = url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|name| !name.is_empty())
            .map(|name| match urlencoding::decode(&name) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => name.clone(),
            })
            .unwrap_or_else(|| url.to_string());

        Candidate::new(title, url, url, Provider::Direct)
    }

    async fn extract(&self, target: &str, origin: Option<&str>) -> Result<Candidate> {
        let entry = self.ytdlp.extract_stream(target).await?;
        let stream = entry.url.clone().context("yt-dlp no devolvió URL de stream")?;
        let origin = origin
            .map(str::to_string)
            .or_else(|| entry.page_url().map(str::to_string))
            .unwrap_or_else(|| stream.clone());

        debug!("🔗 Stream directo obtenido para {}", origin);
        Ok(Candidate::new(
            entry.title.clone().unwrap_or_default(),
            stream,
            origin,
            Provider::Direct,
        )
        .with_duration_millis(entry.duration_millis())
        .with_thumbnail(entry.best_thumbnail()))
    }
}

#[async_trait]
impl MusicSource for DirectUrlClient {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<Candidate>> {
        let target = format!("ytsearch1:{}", query);
        Ok(vec![self.extract(&target, None).await?])
    }

    async fn get_track(&self, url: &str) -> Result<Candidate> {
        if Self::is_audio_file(url) {
            return Ok(Self::wrap_url(url));
        }
        self.extract(url, Some(url)).await
    }

    async fn get_playlist(&self, url: &str, _max_items: usize) -> Result<Vec<Candidate>> {
        anyhow::bail!("La extracción directa no soporta playlists: {}", url)
    }

    fn is_valid_url(&self, url: &str) -> bool {
        is_http_url(url)
    }

    fn is_playlist_url(&self, _url: &str) -> bool {
        false
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }

    fn provider(&self) -> Provider {
        Provider::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wraps_audio_urls_with_file_name() {
        let candidate = DirectUrlClient::wrap_url("https://cdn.example.com/music/My%20Song.mp3?x=1");
        assert_eq!(candidate.title, "My Song.mp3");
        assert_eq!(candidate.provider, Provider::Direct);
        assert_eq!(candidate.source_uri, candidate.origin_uri);
        assert!(DirectUrlClient::is_audio_file("https://cdn.example.com/a.FLAC"));
        assert!(!DirectUrlClient::is_audio_file("https://example.com/page"));
    }
}
