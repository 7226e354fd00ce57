use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{
    inactivity::{DEFAULT_LISTENERS_LEFT_TIMEOUT, DEFAULT_QUEUE_EXHAUSTED_TIMEOUT},
    player::EngineSettings,
    queue::DEFAULT_HISTORY_SIZE,
    track::Provider,
    votes::DEFAULT_VOTE_RATIO,
};
use crate::sources::{invidious::DEFAULT_INSTANCES, resolver::ResolverSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Json,
    Memory,
}

impl FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" | "file" => Ok(QueueBackend::Json),
            "memory" | "mem" => Ok(QueueBackend::Memory),
            other => anyhow::bail!("QUEUE_BACKEND desconocido: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,
    pub dj_role_id: Option<u64>,

    // Almacenamiento
    pub data_dir: PathBuf,
    pub queue_backend: QueueBackend,

    // Audio
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub history_size: usize,

    // Límites
    pub max_song_duration: u64, // En segundos, 0 = sin límite
    pub allow_duplicates: bool,

    // Búsqueda
    pub search_limit: usize,
    pub provider_timeout: Duration,
    pub search_cache_ttl: Duration,
    pub invidious_instances: Vec<String>,
    pub ytdlp_path: String,
    pub unreliable_providers: Vec<Provider>,
    pub fallback_order: Vec<Provider>,

    // Inactividad y votos
    pub idle_timeout: Duration,
    pub queue_exhausted_timeout: Duration,
    pub vote_skip_ratio: f64,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} inválido ('{}'): {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn parse_duration(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => humantime::parse_duration(raw.trim())
            .with_context(|| format!("{} inválido ('{}')", key, raw)),
        _ => Ok(default),
    }
}

fn parse_providers(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Vec<Provider>,
) -> Result<Vec<Provider>> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                Provider::parse(p).with_context(|| format!("{}: proveedor desconocido '{}'", key, p))
            })
            .collect(),
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        if config.queue_backend == QueueBackend::Json {
            std::fs::create_dir_all(&config.data_dir).with_context(|| {
                format!("No se pudo crear DATA_DIR {}", config.data_dir.display())
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Construye la configuración desde una función de búsqueda de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no configurado")?,
            command_prefix: lookup("COMMAND_PREFIX")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.command_prefix),
            dj_role_id: match lookup("DJ_ROLE_ID") {
                Some(raw) if !raw.trim().is_empty() => {
                    Some(raw.trim().parse().context("DJ_ROLE_ID inválido")?)
                }
                _ => None,
            },

            // Almacenamiento
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            queue_backend: parse_var(&lookup, "QUEUE_BACKEND", defaults.queue_backend)?,

            // Audio
            default_volume: parse_var(&lookup, "DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: parse_var(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_playlist_size: parse_var(&lookup, "MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            history_size: parse_var(&lookup, "HISTORY_SIZE", defaults.history_size)?,

            // Límites
            max_song_duration: parse_var(&lookup, "MAX_SONG_DURATION", defaults.max_song_duration)?,
            allow_duplicates: parse_var(&lookup, "ALLOW_DUPLICATES", defaults.allow_duplicates)?,

            // Búsqueda
            search_limit: parse_var(&lookup, "SEARCH_LIMIT", defaults.search_limit)?,
            provider_timeout: parse_duration(&lookup, "PROVIDER_TIMEOUT", defaults.provider_timeout)?,
            search_cache_ttl: parse_duration(&lookup, "SEARCH_CACHE_TTL", defaults.search_cache_ttl)?,
            invidious_instances: match lookup("INVIDIOUS_INSTANCES") {
                Some(raw) if !raw.trim().is_empty() => raw
                    .split(',')
                    .map(|i| i.trim().to_string())
                    .filter(|i| !i.is_empty())
                    .collect(),
                _ => defaults.invidious_instances,
            },
            ytdlp_path: lookup("YTDLP_PATH")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.ytdlp_path),
            unreliable_providers: parse_providers(
                &lookup,
                "UNRELIABLE_PROVIDERS",
                defaults.unreliable_providers,
            )?,
            fallback_order: parse_providers(&lookup, "FALLBACK_ORDER", defaults.fallback_order)?,

            // Inactividad y votos
            idle_timeout: parse_duration(&lookup, "IDLE_TIMEOUT", defaults.idle_timeout)?,
            queue_exhausted_timeout: parse_duration(
                &lookup,
                "QUEUE_EXHAUSTED_TIMEOUT",
                defaults.queue_exhausted_timeout,
            )?,
            vote_skip_ratio: parse_var(&lookup, "VOTE_SKIP_RATIO", defaults.vote_skip_ratio)?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 100
    /// - Queue and playlist limits must be greater than 0
    /// - Search limit must be between 1 and 10
    /// - Vote ratio must be in (0, 1]
    /// - At least one Invidious instance
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN está vacío");
        }

        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if !(1..=10).contains(&self.search_limit) {
            anyhow::bail!("Search limit must be between 1 and 10, got: {}", self.search_limit);
        }

        if !(self.vote_skip_ratio > 0.0 && self.vote_skip_ratio <= 1.0) {
            anyhow::bail!("Vote skip ratio must be in (0, 1], got: {}", self.vote_skip_ratio);
        }

        if self.provider_timeout.is_zero() {
            anyhow::bail!("Provider timeout must be greater than 0");
        }

        if self.invidious_instances.is_empty() {
            anyhow::bail!("At least one Invidious instance is required");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}', DJ role {}\n  \
            Storage: {:?} backend in {}\n  \
            Audio: {}% vol, {} queue, {} playlist, {} history\n  \
            Limits: {}s max duration, duplicates={}\n  \
            Search: {} results, {} timeout, {} cache, {} Invidious instances\n  \
            Idle: {} without listeners, {} after queue end, vote ratio {}",
            self.command_prefix,
            self.dj_role_id.map_or("none".to_string(), |id| id.to_string()),
            self.queue_backend,
            self.data_dir.display(),
            self.default_volume,
            self.max_queue_size,
            self.max_playlist_size,
            self.history_size,
            self.max_song_duration,
            self.allow_duplicates,
            self.search_limit,
            humantime::format_duration(self.provider_timeout),
            humantime::format_duration(self.search_cache_ttl),
            self.invidious_instances.len(),
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.queue_exhausted_timeout),
            self.vote_skip_ratio,
        )
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_volume: self.default_volume,
            max_queue_size: self.max_queue_size,
            max_song_duration: (self.max_song_duration > 0)
                .then(|| Duration::from_secs(self.max_song_duration)),
            allow_duplicates: self.allow_duplicates,
            history_size: self.history_size,
            listeners_left_timeout: self.idle_timeout,
            queue_exhausted_timeout: self.queue_exhausted_timeout,
            vote_skip_ratio: self.vote_skip_ratio,
            unreliable_providers: self.unreliable_providers.clone(),
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            search_limit: self.search_limit,
            provider_timeout: self.provider_timeout,
            max_playlist_size: self.max_playlist_size,
            fallback_order: self.fallback_order.clone(),
            search_cache_ttl: self.search_cache_ttl,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token must be provided)
            discord_token: String::new(),
            command_prefix: "!".to_string(),
            dj_role_id: None,

            data_dir: "./data".into(),
            queue_backend: QueueBackend::Json,

            default_volume: 50,
            max_queue_size: 500,
            max_playlist_size: 100,
            history_size: DEFAULT_HISTORY_SIZE,

            max_song_duration: 7200, // 2 hours
            allow_duplicates: true,

            search_limit: 5,
            provider_timeout: Duration::from_secs(15),
            search_cache_ttl: Duration::from_secs(300),
            invidious_instances: DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect(),
            ytdlp_path: "yt-dlp".to_string(),
            unreliable_providers: vec![Provider::YouTube],
            fallback_order: vec![Provider::SoundCloud, Provider::Invidious, Provider::Direct],

            idle_timeout: DEFAULT_LISTENERS_LEFT_TIMEOUT,
            queue_exhausted_timeout: DEFAULT_QUEUE_EXHAUSTED_TIMEOUT,
            vote_skip_ratio: DEFAULT_VOTE_RATIO,
        }
    }
}
