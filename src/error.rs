//! Taxonomía de errores del motor de reproducción.
//!
//! Los proveedores y el transporte nunca abortan una sesión: sus fallos se
//! registran y se convierten en uno de estos tipos en la frontera del motor.
//! Las capas externas (bot, `main`) siguen usando `anyhow`.

use thiserror::Error;

use crate::audio::track::Provider;

/// Ningún proveedor pudo resolver la consulta. La cola no se modifica.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("la consulta está vacía")]
    EmptyQuery,

    #[error("no se encontraron resultados para '{query}'")]
    NoResults { query: String },

    #[error("URL no válida: {0}")]
    InvalidUrl(String),
}

/// Un track resuelto no pudo iniciarse en el transporte.
#[derive(Debug, Error)]
pub enum PlaybackStartError {
    #[error("no hay conexión de voz para la sesión")]
    NotConnected,

    #[error("el transporte rechazó {provider} '{source_uri}': {reason}")]
    Rejected {
        provider: Provider,
        source_uri: String,
        reason: String,
    },

    #[error("tiempo agotado iniciando '{0}'")]
    Timeout(String),
}

/// El almacenamiento persistente de colas no está disponible.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error de E/S en el almacenamiento: {0}")]
    Io(#[from] std::io::Error),

    #[error("documento de cola corrupto: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("almacenamiento no disponible: {0}")]
    Unavailable(String),
}

/// Errores que el controlador devuelve a la capa de comandos.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no hay sesión activa en este servidor")]
    NotConnected,

    #[error("operación no aplicable en el estado actual: {0}")]
    NotApplicable(&'static str),

    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("'{title}' excede la duración máxima de {max_secs}s")]
    TrackTooLong { title: String, max_secs: u64 },

    #[error("'{0}' ya está en la cola")]
    Duplicate(String),

    #[error("el volumen debe estar entre 0 y 100, recibido {0}")]
    InvalidVolume(u32),

    #[error("posición inválida {position}: la cola tiene {len} canciones")]
    InvalidPosition { position: usize, len: usize },

    #[error("la solicitud fue cancelada por un cambio de sesión")]
    Cancelled,

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("error de transporte: {0}")]
    Transport(String),
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;
