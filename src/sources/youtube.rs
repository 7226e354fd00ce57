use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};

use super::{Candidate, MusicSource, YtDlp};
use crate::audio::track::Provider;

fn youtube_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?|embed/|v/|shorts/|playlist\?)|youtu\.be/|music\.youtube\.com/)",
        )
        .ok()
    })
    .as_ref()
}

/// Cliente para YouTube vía yt-dlp
pub struct YouTubeClient {
    ytdlp: Arc<YtDlp>,
}

impl YouTubeClient {
    pub fn new(ytdlp: Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        youtube_regex().is_some_and(|re| re.is_match(url))
    }

    pub fn is_youtube_playlist(url: &str) -> bool {
        Self::is_youtube_url(url)
            && (url.contains("/playlist?") || (url.contains("list=") && !url.contains("watch?v=")))
    }
}

#[async_trait]
impl MusicSource for YouTubeClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        self.ytdlp
            .search("ytsearch", query, limit, Provider::YouTube)
            .await
    }

    async fn get_track(&self, url: &str) -> Result<Candidate> {
        self.ytdlp.info(url, Provider::YouTube).await
    }

    async fn get_playlist(&self, url: &str, max_items: usize) -> Result<Vec<Candidate>> {
        self.ytdlp.playlist(url, max_items, Provider::YouTube).await
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        Self::is_youtube_playlist(url)
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }

    fn provider(&self) -> Provider {
        Provider::YouTube
    }
}
