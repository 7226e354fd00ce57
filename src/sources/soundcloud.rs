use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{Candidate, MusicSource, YtDlp};
use crate::audio::track::Provider;

/// Cliente de SoundCloud vía el extractor `scsearch` de yt-dlp
pub struct SoundCloudClient {
    ytdlp: Arc<YtDlp>,
}

impl SoundCloudClient {
    pub fn new(ytdlp: Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }

    fn host_matches(url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .is_some_and(|host| {
                host == "soundcloud.com" || host.ends_with(".soundcloud.com") || host == "snd.sc"
            })
    }
}

#[async_trait]
impl MusicSource for SoundCloudClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        self.ytdlp
            .search("scsearch", query, limit, Provider::SoundCloud)
            .await
    }

    async fn get_track(&self, url: &str) -> Result<Candidate> {
        self.ytdlp.info(url, Provider::SoundCloud).await
    }

    async fn get_playlist(&self, url: &str, max_items: usize) -> Result<Vec<Candidate>> {
        self.ytdlp.playlist(url, max_items, Provider::SoundCloud).await
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::host_matches(url)
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        Self::host_matches(url) && url.contains("/sets/")
    }

    fn source_name(&self) -> &'static str {
        "SoundCloud"
    }

    fn provider(&self) -> Provider {
        Provider::SoundCloud
    }
}
