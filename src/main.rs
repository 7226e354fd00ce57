use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use rat_music::{
    audio::{player::PlaybackController, transport::SongbirdTransport},
    bot::{events::spawn_notice_forwarder, RatMusicBot},
    config::{Config, QueueBackend},
    sources::{
        ytdlp::verify_dependencies, DirectUrlClient, InvidiousClient, MusicSource,
        SoundCloudClient, TrackResolver, YouTubeClient, YtDlp,
    },
    storage::{JsonQueueStore, MemoryQueueStore, PersistentQueueStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rat_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Rat Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        verify_dependencies(&config.ytdlp_path).await?;
        println!("OK");
        return Ok(());
    }

    info!("⚙️ {}", config.summary());

    // Almacenamiento de colas
    let store: Arc<dyn PersistentQueueStore> = match config.queue_backend {
        QueueBackend::Json => Arc::new(JsonQueueStore::new(config.data_dir.clone()).await?),
        QueueBackend::Memory => {
            warn!("💾 Cola en memoria: no sobrevive reinicios");
            Arc::new(MemoryQueueStore::new())
        }
    };

    // Proveedores de música
    let ytdlp = Arc::new(YtDlp::new(config.ytdlp_path.clone()));
    let providers: Vec<Arc<dyn MusicSource>> = vec![
        Arc::new(YouTubeClient::new(ytdlp.clone())),
        Arc::new(SoundCloudClient::new(ytdlp.clone())),
        Arc::new(InvidiousClient::new(
            config.invidious_instances.clone(),
            config.provider_timeout,
        )?),
    ];
    let direct: Arc<dyn MusicSource> = Arc::new(DirectUrlClient::new(ytdlp));
    let resolver = Arc::new(TrackResolver::new(
        providers,
        Some(direct),
        config.resolver_settings(),
    ));

    // Motor de reproducción
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone(), events_tx.clone())?);

    let controller = Arc::new(PlaybackController::new(
        config.engine_settings(),
        store,
        resolver.clone(),
        transport,
        events_tx,
        notices_tx,
    ));
    tokio::spawn(controller.clone().run(events_rx));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = RatMusicBot::new(config.clone(), controller.clone());
    let text_channels = handler.text_channels();

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    spawn_notice_forwarder(client.http.clone(), text_channels, notices_rx);

    // Limpieza periódica del caché de búsquedas
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let cache = resolver.cache();
            let removed = cache.cleanup();
            let metrics = cache.metrics();
            info!("🧹 Caché de búsquedas: {} entradas expiradas eliminadas", removed);
            info!(
                "📊 Caché: {}/{} entradas, {} aciertos, {} fallos ({:.1}%), {} desalojos",
                cache.len(),
                cache.capacity(),
                metrics.hits,
                metrics.misses,
                metrics.hit_rate() * 100.0,
                metrics.evictions
            );
        }
    });

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, guardando sesiones...");
        controller.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
