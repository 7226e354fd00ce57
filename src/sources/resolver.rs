use serenity::model::id::UserId;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{direct_url::DirectUrlClient, is_http_url, Candidate, MusicSource};
use crate::audio::track::{Provider, TrackRecord};
use crate::cache::SearchCache;
use crate::error::ResolutionError;

/// Máximo de candidatos devueltos por una búsqueda
pub const MAX_SEARCH_LIMIT: usize = 10;

/// Las playlists tardan más que una búsqueda simple
const PLAYLIST_TIMEOUT_FACTOR: u32 = 4;

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub search_limit: usize,
    pub provider_timeout: Duration,
    pub max_playlist_size: usize,
    /// Orden de proveedores alternativos cuando falla una reproducción
    pub fallback_order: Vec<Provider>,
    pub search_cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            search_limit: 5,
            provider_timeout: Duration::from_secs(15),
            max_playlist_size: 100,
            fallback_order: vec![Provider::SoundCloud, Provider::Invidious, Provider::Direct],
            search_cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// Referencia reproducible directa, sin búsqueda
    Direct,
    /// URL de un track de un proveedor
    Track,
    /// Candidatos de una búsqueda de texto, el mejor primero
    Search,
    Playlist,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub kind: ResolutionKind,
    pub tracks: Vec<TrackRecord>,
}

/// Clasificación de una consulta de usuario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// `direct:<x>`: extracción directa primero, luego la cadena normal
    Direct(String),
    /// Prefijo explícito de proveedor (`yt:`, `sc:`, `inv:`...)
    Prefixed { provider: Provider, query: String },
    /// URL reconocida por un proveedor
    ProviderUrl { provider: Provider, url: String },
    /// Cualquier otra URL http(s): ya es reproducible
    PlainUrl(String),
    Search(String),
}

const PREFIXES: &[(&str, Option<Provider>)] = &[
    ("direct:", None),
    ("ytsearch:", Some(Provider::YouTube)),
    ("yt:", Some(Provider::YouTube)),
    ("scsearch:", Some(Provider::SoundCloud)),
    ("sc:", Some(Provider::SoundCloud)),
    ("inv:", Some(Provider::Invidious)),
];

/// Convierte consultas en [`TrackRecord`]s consultando proveedores por
/// prioridad. Los errores de proveedor se registran y nunca se propagan.
pub struct TrackResolver {
    providers: Vec<(Provider, Arc<dyn MusicSource>)>,
    direct: Option<Arc<dyn MusicSource>>,
    cache: SearchCache,
    settings: ResolverSettings,
}

impl TrackResolver {
    /// `providers` en orden de prioridad de búsqueda
    pub fn new(
        providers: Vec<Arc<dyn MusicSource>>,
        direct: Option<Arc<dyn MusicSource>>,
        settings: ResolverSettings,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|source| (source.provider(), source))
            .collect();

        Self {
            providers,
            direct,
            cache: SearchCache::new(settings.search_cache_ttl),
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    fn search_limit(&self) -> usize {
        self.settings.search_limit.clamp(1, MAX_SEARCH_LIMIT)
    }

    fn source_for(&self, provider: Provider) -> Option<&Arc<dyn MusicSource>> {
        self.providers
            .iter()
            .find(|(p, _)| *p == provider)
            .map(|(_, source)| source)
            .or_else(|| {
                self.direct
                    .as_ref()
                    .filter(|_| provider == Provider::Direct)
            })
    }

    pub fn classify_query(&self, query: &str) -> Result<QueryKind, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::EmptyQuery);
        }

        for (prefix, provider) in PREFIXES {
            let matches = query
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches {
                let rest = query.get(prefix.len()..).unwrap_or_default().trim().to_string();
                if rest.is_empty() {
                    return Err(ResolutionError::EmptyQuery);
                }
                return Ok(match provider {
                    None => QueryKind::Direct(rest),
                    Some(provider) => QueryKind::Prefixed {
                        provider: *provider,
                        query: rest,
                    },
                });
            }
        }

        if is_http_url(query) {
            let owner = self
                .providers
                .iter()
                .find(|(_, source)| source.is_valid_url(query));
            return Ok(match owner {
                Some((provider, _)) => QueryKind::ProviderUrl {
                    provider: *provider,
                    url: query.to_string(),
                },
                None => QueryKind::PlainUrl(query.to_string()),
            });
        }

        if query.starts_with("http://") || query.starts_with("https://") {
            return Err(ResolutionError::InvalidUrl(query.to_string()));
        }

        Ok(QueryKind::Search(query.to_string()))
    }

    pub async fn resolve(
        &self,
        query: &str,
        preferred: Option<Provider>,
        requester: UserId,
    ) -> Result<Resolution, ResolutionError> {
        let resolution = match self.classify_query(query)? {
            QueryKind::Direct(target) => match self.resolve_direct(&target).await {
                Some(candidate) => Resolution {
                    kind: ResolutionKind::Direct,
                    tracks: vec![candidate.into_record(requester)],
                },
                None => {
                    debug!("Extracción directa sin éxito, usando la cadena normal");
                    return self.resolve_fallthrough(&target, preferred, requester).await;
                }
            },
            QueryKind::Prefixed { provider, query } => {
                self.search_chain(&query, Some(provider), requester).await?
            }
            QueryKind::ProviderUrl { provider, url } => {
                self.resolve_url(provider, &url, requester).await?
            }
            QueryKind::PlainUrl(url) => Resolution {
                kind: ResolutionKind::Direct,
                tracks: vec![DirectUrlClient::wrap_url(&url).into_record(requester)],
            },
            QueryKind::Search(text) => self.search_chain(&text, preferred, requester).await?,
        };

        info!(
            "🎯 '{}' resuelto: {:?} con {} track(s)",
            query.trim(),
            resolution.kind,
            resolution.tracks.len()
        );
        Ok(resolution)
    }

    /// Cadena normal para el objetivo de un `direct:` que no se pudo extraer
    async fn resolve_fallthrough(
        &self,
        target: &str,
        preferred: Option<Provider>,
        requester: UserId,
    ) -> Result<Resolution, ResolutionError> {
        if is_http_url(target) {
            if let Some((provider, _)) = self
                .providers
                .iter()
                .find(|(_, source)| source.is_valid_url(target))
            {
                return self.resolve_url(*provider, target, requester).await;
            }
            return Ok(Resolution {
                kind: ResolutionKind::Direct,
                tracks: vec![DirectUrlClient::wrap_url(target).into_record(requester)],
            });
        }
        self.search_chain(target, preferred, requester).await
    }

    async fn resolve_direct(&self, target: &str) -> Option<Candidate> {
        let direct = self.direct.as_ref()?;
        if is_http_url(target) {
            self.bounded(Provider::Direct, "extracción", direct.get_track(target), 1)
                .await
        } else {
            self.bounded(Provider::Direct, "extracción", direct.search(target, 1), 1)
                .await
                .and_then(|found| found.into_iter().next())
        }
    }

    /// Ejecuta una llamada de proveedor con límite de tiempo; los fallos se registran
    async fn bounded<T>(
        &self,
        provider: Provider,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
        timeout_factor: u32,
    ) -> Option<T> {
        let limit = self.settings.provider_timeout * timeout_factor;
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("⚠️ {} falló en {}: {}", what, provider, e);
                None
            }
            Err(_) => {
                warn!("⏰ {} en {} excedió {:?}", what, provider, limit);
                None
            }
        }
    }

    async fn search_chain(
        &self,
        query: &str,
        preferred: Option<Provider>,
        requester: UserId,
    ) -> Result<Resolution, ResolutionError> {
        let limit = self.search_limit();
        let mut order: Vec<&(Provider, Arc<dyn MusicSource>)> = self.providers.iter().collect();
        if let Some(preferred) = preferred {
            order.sort_by_key(|(p, _)| *p != preferred);
        }

        for (provider, source) in order {
            let candidates = match self.cache.get(*provider, query, limit) {
                Some(hit) => hit,
                None => {
                    let found = self
                        .bounded(*provider, "búsqueda", source.search(query, limit), 1)
                        .await
                        .unwrap_or_default();
                    self.cache.put(*provider, query, limit, &found);
                    found
                }
            };

            if !candidates.is_empty() {
                debug!("✅ {} devolvió {} resultado(s)", provider, candidates.len());
                return Ok(Resolution {
                    kind: ResolutionKind::Search,
                    tracks: candidates
                        .into_iter()
                        .take(limit)
                        .map(|c| c.into_record(requester))
                        .collect(),
                });
            }
        }

        Err(ResolutionError::NoResults {
            query: query.to_string(),
        })
    }

    async fn resolve_url(
        &self,
        provider: Provider,
        url: &str,
        requester: UserId,
    ) -> Result<Resolution, ResolutionError> {
        if let Some(source) = self.source_for(provider) {
            if source.is_playlist_url(url) {
                let max = self.settings.max_playlist_size.max(1);
                let entries = self
                    .bounded(
                        provider,
                        "playlist",
                        source.get_playlist(url, max),
                        PLAYLIST_TIMEOUT_FACTOR,
                    )
                    .await
                    .unwrap_or_default();
                if !entries.is_empty() {
                    info!("📋 Playlist expandida: {} canciones", entries.len());
                    return Ok(Resolution {
                        kind: ResolutionKind::Playlist,
                        tracks: entries
                            .into_iter()
                            .take(max)
                            .map(|c| c.into_record(requester))
                            .collect(),
                    });
                }
            } else if let Some(candidate) = self
                .bounded(provider, "obtener track", source.get_track(url), 1)
                .await
            {
                return Ok(Resolution {
                    kind: ResolutionKind::Track,
                    tracks: vec![candidate.into_record(requester)],
                });
            }
        }

        // Último recurso: extracción directa de la misma URL
        if let Some(candidate) = self.resolve_direct(url).await {
            return Ok(Resolution {
                kind: ResolutionKind::Track,
                tracks: vec![candidate.into_record(requester)],
            });
        }

        Err(ResolutionError::NoResults {
            query: url.to_string(),
        })
    }

    /// Proveedores alternativos disponibles, en orden de intento
    pub fn fallback_order(&self) -> Vec<Provider> {
        self.settings
            .fallback_order
            .iter()
            .copied()
            .filter(|p| self.source_for(*p).is_some())
            .collect()
    }

    /// Busca el mismo título en otro proveedor; `None` si no hay resultado
    pub async fn find_alternative(
        &self,
        provider: Provider,
        title: &str,
        requester: UserId,
    ) -> Option<TrackRecord> {
        let source = self.source_for(provider)?;
        info!("🔄 Buscando alternativa en {} para: {}", provider, title);
        self.bounded(provider, "alternativa", source.search(title, 1), 1)
            .await?
            .into_iter()
            .next()
            .map(|c| c.into_record(requester))
    }
}
