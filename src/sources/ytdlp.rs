use anyhow::{Context, Result};
use async_process::Command;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::Candidate;
use crate::audio::track::Provider;

/// Procesos yt-dlp concurrentes permitidos
const MAX_CONCURRENT: usize = 3;

/// Entrada JSON emitida por `yt-dlp --dump-json` (una por línea).
#[derive(Debug, Deserialize)]
pub(crate) struct YtDlpEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Option<Vec<YtDlpThumbnail>>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
    /// En modo plano es la página; con `-f` es el stream seleccionado
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct YtDlpThumbnail {
    pub url: String,
}

impl YtDlpEntry {
    pub fn page_url(&self) -> Option<&str> {
        self.webpage_url
            .as_deref()
            .or(self.original_url.as_deref())
            .or(self.url.as_deref())
            .filter(|u| u.starts_with("http"))
    }

    pub fn best_thumbnail(&self) -> Option<String> {
        self.thumbnail.clone().or_else(|| {
            self.thumbnails
                .as_ref()
                .and_then(|thumbs| thumbs.last())
                .map(|t| t.url.clone())
        })
    }

    pub fn duration_millis(&self) -> u64 {
        if self.is_live.unwrap_or(false) {
            return 0;
        }
        self.duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| Duration::from_secs_f64(d).as_millis() as u64)
            .unwrap_or(0)
    }

    /// Candidato cuya fuente reproducible es la propia página
    pub fn into_page_candidate(self, provider: Provider) -> Option<Candidate> {
        let page = self.page_url()?.to_string();
        Some(
            Candidate::new(
                self.title.clone().unwrap_or_default(),
                page.clone(),
                page,
                provider,
            )
            .with_duration_millis(self.duration_millis())
            .with_thumbnail(self.best_thumbnail()),
        )
    }
}

/// Parsea la salida de `--dump-json`, ignorando líneas que no son JSON
pub(crate) fn parse_entries(stdout: &str) -> Vec<YtDlpEntry> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Línea de yt-dlp ignorada: {}", e);
                None
            }
        })
        .collect()
}

/// Ejecutor de yt-dlp compartido por los proveedores.
pub struct YtDlp {
    binary: String,
    cookies: Option<PathBuf>,
    limiter: Semaphore,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            cookies: find_cookies_file(),
            limiter: Semaphore::new(MAX_CONCURRENT),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self.limiter.acquire().await?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(["--no-warnings", "--socket-timeout", "15"]);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Error al ejecutar {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Búsqueda plana con un prefijo de extractor (`ytsearch`, `scsearch`)
    pub async fn search(
        &self,
        prefix: &str,
        query: &str,
        limit: usize,
        provider: Provider,
    ) -> Result<Vec<Candidate>> {
        let search_query = format!("{}{}:{}", prefix, limit.max(1), query);
        info!("🔍 Buscando en {}: {}", provider, query);

        let stdout = self
            .run(&["--flat-playlist", "--dump-json", "--skip-download", &search_query])
            .await?;

        Ok(parse_entries(&stdout)
            .into_iter()
            .filter_map(|entry| entry.into_page_candidate(provider))
            .take(limit)
            .collect())
    }

    /// Metadata de una URL individual
    pub async fn info(&self, url: &str, provider: Provider) -> Result<Candidate> {
        debug!("📊 Obteniendo info de: {}", url);
        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--skip-download", url])
            .await?;

        parse_entries(&stdout)
            .into_iter()
            .next()
            .and_then(|entry| entry.into_page_candidate(provider))
            .with_context(|| format!("yt-dlp no devolvió información para {}", url))
    }

    /// Expande una playlist (modo plano) hasta `max_items` entradas
    pub async fn playlist(
        &self,
        url: &str,
        max_items: usize,
        provider: Provider,
    ) -> Result<Vec<Candidate>> {
        info!("📋 Obteniendo playlist: {}", url);
        let end = max_items.max(1).to_string();
        let stdout = self
            .run(&["--flat-playlist", "--dump-json", "--playlist-end", &end, url])
            .await?;

        Ok(parse_entries(&stdout)
            .into_iter()
            .filter_map(|entry| entry.into_page_candidate(provider))
            .take(max_items)
            .collect())
    }

    /// Extrae el stream de audio directo de una URL o búsqueda de yt-dlp.
    ///
    /// Devuelve la entrada completa: `url` es el stream seleccionado.
    pub async fn extract_stream(&self, target: &str) -> Result<YtDlpEntry> {
        debug!("🎵 Extrayendo stream de audio para: {}", target);
        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "-f",
                "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio/best",
                target,
            ])
            .await?;

        let entry = parse_entries(&stdout)
            .into_iter()
            .next()
            .context("yt-dlp no devolvió ninguna entrada")?;

        if entry.url.as_deref().map_or(true, |u| !u.starts_with("http")) {
            anyhow::bail!("No se pudo obtener URL de stream");
        }
        Ok(entry)
    }

    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("{} no encontrado", self.binary))?;
        if !output.status.success() {
            anyhow::bail!("{} --version falló", self.binary);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Verifica que yt-dlp y ffmpeg estén disponibles
pub async fn verify_dependencies(ytdlp_binary: &str) -> Result<()> {
    match YtDlp::new(ytdlp_binary).version().await {
        Ok(version) => info!("✅ yt-dlp versión: {}", version),
        Err(e) => {
            error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
            return Err(e);
        }
    }

    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(output) if output.status.success() => info!("✅ ffmpeg disponible"),
        _ => {
            error!("❌ ffmpeg no encontrado. Instala con: sudo apt install ffmpeg");
            anyhow::bail!("ffmpeg no disponible");
        }
    }

    Ok(())
}

/// Busca archivo de cookies disponible
fn find_cookies_file() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = std::env::var("YTDLP_COOKIES") {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join(".config/yt-dlp/cookies.txt"));
    }
    candidates.push(PathBuf::from("./cookies.txt"));

    match candidates.into_iter().find(|path| path.is_file()) {
        Some(path) => {
            info!("🍪 Cookies encontradas en: {}", path.display());
            Some(path)
        }
        None => {
            warn!("🍪 No se encontraron cookies - algunas funcionalidades pueden estar limitadas");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_flat_search_output() {
        let stdout = r#"{"id":"abc","title":"Song A","url":"https://www.youtube.com/watch?v=abc","duration":212.0}
not json
{"id":"def","title":"Live","url":"https://www.youtube.com/watch?v=def","is_live":true,"duration":9999}
{"id":"ghi","title":"No url"}"#;

        let candidates: Vec<Candidate> = parse_entries(stdout)
            .into_iter()
            .filter_map(|e| e.into_page_candidate(Provider::YouTube))
            .collect();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Song A");
        assert_eq!(candidates[0].duration_millis, 212_000);
        assert_eq!(candidates[1].duration_millis, 0);
    }

    #[test]
    fn page_url_prefers_webpage_url() {
        let entry: YtDlpEntry = serde_json::from_str(
            r#"{"webpage_url":"https://soundcloud.com/a/b","url":"https://cdn/stream.mp3"}"#,
        )
        .unwrap();
        assert_eq!(entry.page_url(), Some("https://soundcloud.com/a/b"));
    }
}
