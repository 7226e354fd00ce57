use anyhow::Result;
use serenity::{
    model::{
        channel::Message,
        id::{ChannelId, GuildId, RoleId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::info;

use crate::{
    audio::{
        player::{EnqueueOutcome, SessionSnapshot, SkipOutcome},
        queue::LoopMode,
        votes::VoteOutcome,
    },
    bot::{events::count_listeners, RatMusicBot},
    error::ControllerError,
    sources::ResolutionKind,
};

/// Comandos de texto reconocidos
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Pause,
    Resume,
    Loop(Option<String>),
    Volume(Option<String>),
    Clear,
    Remove(Option<String>),
    Shuffle,
    Queue,
    NowPlaying,
    Leave,
    Help,
}

impl Command {
    /// Interpreta `content` con el prefijo dado; `None` si no es un comando
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let body = content.strip_prefix(prefix)?.trim();
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        let arg = (!args.is_empty()).then(|| args.to_string());

        let command = match name.to_lowercase().as_str() {
            "play" | "p" => Command::Play(arg?),
            "skip" | "s" => Command::Skip,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "loop" => Command::Loop(arg),
            "volume" | "vol" => Command::Volume(arg),
            "clear" => Command::Clear,
            "remove" | "rm" => Command::Remove(arg),
            "shuffle" => Command::Shuffle,
            "queue" | "q" => Command::Queue,
            "nowplaying" | "np" => Command::NowPlaying,
            "leave" | "disconnect" => Command::Leave,
            "help" => Command::Help,
            _ => return None,
        };
        Some(command)
    }
}

/// Maneja un mensaje con prefijo de comando
pub async fn handle_message(ctx: &Context, msg: &Message, bot: &RatMusicBot) -> Result<()> {
    let guild_id = msg
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    let Some(command) = Command::parse(&msg.content, &bot.config().command_prefix) else {
        return Ok(());
    };

    info!(
        "📝 Comando {:?} usado por {} en guild {}",
        command, msg.author.name, guild_id
    );
    bot.remember_text_channel(guild_id, msg.channel_id);

    let reply = match execute(ctx, msg, guild_id, command, bot).await {
        Ok(reply) => reply,
        Err(e) => format!("❌ {}", e),
    };

    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

async fn execute(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    command: Command,
    bot: &RatMusicBot,
) -> Result<String, ControllerError> {
    let controller = &bot.controller;

    match command {
        Command::Play(query) => {
            let voice_channel = get_user_voice_channel(ctx, guild_id, msg.author.id)
                .ok_or(ControllerError::NotApplicable("debes estar en un canal de voz"))?;

            if controller.snapshot(guild_id).is_none() {
                controller.connect(guild_id, voice_channel).await?;
                let listeners = count_listeners(ctx, guild_id, voice_channel);
                controller.update_listeners(guild_id, listeners);
            }

            let outcome = controller.enqueue(guild_id, &query, msg.author.id).await?;
            Ok(describe_enqueue(&outcome))
        }
        Command::Skip => {
            let population = controller
                .snapshot(guild_id)
                .map(|s| count_listeners(ctx, guild_id, s.channel))
                .unwrap_or(0);
            let privileged = is_privileged(msg, bot);

            match controller
                .skip(guild_id, msg.author.id, privileged, population)
                .await?
            {
                SkipOutcome::Skipped { track, by_vote } => Ok(if by_vote {
                    format!("⏭️ Saltado por votación: **{}**", track.title)
                } else {
                    format!("⏭️ Saltado: **{}**", track.title)
                }),
                SkipOutcome::Vote(VoteOutcome::AlreadyVoted { votes, required }) => {
                    Ok(format!("🗳️ Ya votaste ({}/{})", votes, required))
                }
                SkipOutcome::Vote(outcome) => Ok(format!(
                    "🗳️ Voto registrado ({}/{})",
                    outcome.votes(),
                    outcome.required()
                )),
            }
        }
        Command::Pause => {
            controller.pause(guild_id).await?;
            Ok("⏸️ Pausado".to_string())
        }
        Command::Resume => {
            controller.resume(guild_id).await?;
            Ok("▶️ Reanudado".to_string())
        }
        Command::Loop(mode) => {
            let current = controller
                .snapshot(guild_id)
                .ok_or(ControllerError::NotConnected)?
                .loop_mode;
            let mode = match mode {
                Some(raw) => LoopMode::parse(&raw)
                    .ok_or(ControllerError::NotApplicable("modo inválido: off, track o queue"))?,
                None => match current {
                    LoopMode::Off => LoopMode::Track,
                    LoopMode::Track => LoopMode::Queue,
                    LoopMode::Queue => LoopMode::Off,
                },
            };
            controller.set_loop_mode(guild_id, mode)?;
            Ok(format!("🔁 Repetición: {}", mode))
        }
        Command::Volume(level) => match level {
            None => {
                let snapshot = controller
                    .snapshot(guild_id)
                    .ok_or(ControllerError::NotConnected)?;
                Ok(format!("🔊 Volumen actual: {}%", snapshot.volume))
            }
            Some(raw) => {
                let volume = raw
                    .trim_end_matches('%')
                    .parse::<u32>()
                    .map_err(|_| ControllerError::NotApplicable("el volumen debe ser un número"))?;
                controller.set_volume(guild_id, volume).await?;
                Ok(format!("🔊 Volumen ajustado a {}%", volume))
            }
        },
        Command::Clear => {
            let removed = controller.clear_queue(guild_id).await?;
            Ok(format!("🗑️ Cola limpiada ({} canciones)", removed))
        }
        Command::Remove(position) => {
            let position = position
                .and_then(|p| p.parse::<usize>().ok())
                .ok_or(ControllerError::NotApplicable("indica la posición a eliminar"))?;
            let track = controller.remove(guild_id, position).await?;
            Ok(format!("🗑️ Eliminado #{}: **{}**", position, track.title))
        }
        Command::Shuffle => {
            let count = controller.shuffle(guild_id).await?;
            Ok(format!("🔀 Cola mezclada ({} canciones)", count))
        }
        Command::Queue => {
            let snapshot = controller
                .snapshot(guild_id)
                .ok_or(ControllerError::NotConnected)?;
            Ok(describe_queue(&snapshot))
        }
        Command::NowPlaying => {
            let snapshot = controller
                .snapshot(guild_id)
                .ok_or(ControllerError::NotConnected)?;
            Ok(match &snapshot.current {
                Some(track) => format!(
                    "🎵 Reproduciendo ({}): **{}** [{}] pedido por <@{}>",
                    snapshot.phase,
                    track.title,
                    format_track_duration(track.duration()),
                    track.requester
                ),
                None => "📭 No hay nada reproduciéndose".to_string(),
            })
        }
        Command::Leave => {
            controller.disconnect(guild_id).await?;
            Ok("👋 Desconectado del canal de voz".to_string())
        }
        Command::Help => Ok(help_text(&bot.config().command_prefix)),
    }
}

fn is_privileged(msg: &Message, bot: &RatMusicBot) -> bool {
    let Some(role) = bot.config().dj_role_id else {
        return false;
    };
    msg.member
        .as_ref()
        .is_some_and(|member| member.roles.contains(&RoleId::new(role)))
}

fn describe_enqueue(outcome: &EnqueueOutcome) -> String {
    let mut lines = Vec::new();

    if let Some(track) = &outcome.started {
        lines.push(format!("🎵 Reproduciendo: **{}**", track.title));
    }

    match (outcome.kind, outcome.queued.as_slice()) {
        (_, []) => {}
        (ResolutionKind::Playlist, queued) => {
            lines.push(format!("📋 {} canciones agregadas a la cola", queued.len()));
        }
        (_, queued) => {
            for (position, track) in queued {
                lines.push(format!(
                    "➕ #{} **{}** [{}]",
                    position,
                    track.title,
                    format_track_duration(track.duration())
                ));
            }
        }
    }

    if outcome.rejected > 0 {
        lines.push(format!("⚠️ {} canciones descartadas", outcome.rejected));
    }
    if lines.is_empty() {
        lines.push("⚠️ No se pudo reproducir la canción".to_string());
    }
    lines.join("\n")
}

fn describe_queue(snapshot: &SessionSnapshot) -> String {
    let mut lines = Vec::new();

    match &snapshot.current {
        Some(track) => lines.push(format!("🎵 Ahora: **{}**", track.title)),
        None => lines.push("📭 Nada reproduciéndose".to_string()),
    }

    if snapshot.upcoming.is_empty() {
        lines.push("La cola está vacía".to_string());
    } else {
        for (index, track) in snapshot.upcoming.iter().enumerate() {
            lines.push(format!(
                "{}. {} [{}]",
                index + 1,
                track.title,
                format_track_duration(track.duration())
            ));
        }
        if snapshot.queue_len > snapshot.upcoming.len() {
            lines.push(format!(
                "... y {} más",
                snapshot.queue_len - snapshot.upcoming.len()
            ));
        }
        lines.push(format!(
            "⏱️ Duración: {}",
            format_duration(snapshot.upcoming_duration)
        ));
    }

    lines.push(format!(
        "🔁 Repetición: {} | 🔊 Volumen: {}% | 🎶 Reproducidas: {}",
        snapshot.loop_mode, snapshot.volume, snapshot.tracks_played
    ));
    lines.join("\n")
}

fn help_text(prefix: &str) -> String {
    [
        ("play <búsqueda|url>", "Reproduce o agrega a la cola"),
        ("skip", "Salta la canción (votación si no eres DJ)"),
        ("pause / resume", "Pausa o reanuda"),
        ("loop [off|track|queue]", "Cambia el modo de repetición"),
        ("volume [0-100]", "Muestra o ajusta el volumen"),
        ("remove <posición>", "Elimina una canción de la cola"),
        ("shuffle / clear", "Mezcla o vacía la cola"),
        ("queue / nowplaying", "Muestra la cola o la canción actual"),
        ("leave", "Sale del canal de voz"),
    ]
    .iter()
    .map(|(usage, description)| format!("`{}{}` {}", prefix, usage, description))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Formatea una duración como `m:ss` o `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn format_track_duration(duration: Option<Duration>) -> String {
    duration
        .map(format_duration)
        .unwrap_or_else(|| "🔴 En vivo".to_string())
}

// Funciones auxiliares

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
