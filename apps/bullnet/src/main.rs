use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use bullnet::{Data, Error, command, config::Config, format};
use chrono_tz::UTC;
use market::{
    AccumulationTracker, DarkPoolService, GexService, LevelMemory, PineSeeds, store_from_env,
};
use poise::{Framework, FrameworkError, FrameworkOptions, PrefixFrameworkOptions};
use serenity::all::{ActivityData, ChannelId, ClientBuilder, GatewayIntents};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_futures::Instrument;
use tracing_subscriber::EnvFilter;

mod scheduled;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let store = store_from_env().await.context("init store failed")?;
    let data = Data {
        gex: Arc::new(GexService::from_env().context("init gex service failed")?),
        darkpool: Arc::new(DarkPoolService::from_env().context("init dark pool service failed")?),
        memory: Arc::new(LevelMemory::new(Arc::clone(&store))),
        accumulation: Arc::new(AccumulationTracker::new(store)),
        pine_seeds: PineSeeds::from_env()?.map(Arc::new),
        ratios: Arc::new(RwLock::new(config.ratios)),
        tz: config.timezone,
    };

    let Some(token) = config.discord_token.clone() else {
        info!("DISCORD_TOKEN not set, printing a single report");
        return scheduled::print_report(&data).await;
    };

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: command::commands(),
            prefix_options: PrefixFrameworkOptions {
                prefix: Some("!".into()),
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup({
            let data = data.clone();
            let config = config.clone();

            move |ctx, ready, framework| {
                let data = data.clone();
                let config = config.clone();

                Box::pin(async move {
                    info!(
                        "{} [{}] connected successfully!",
                        ready.user.name, ready.user.id
                    );

                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                    let ctx_clone = ctx.clone();
                    let tz = config.timezone;
                    tokio::spawn(async move {
                        let mut show_version = true;
                        let mut tick = tokio::time::interval(Duration::from_secs(30));

                        loop {
                            tick.tick().await;

                            let text = if show_version {
                                if config.version.starts_with('v') {
                                    config.version.clone()
                                } else {
                                    format!("Version - {}", config.version)
                                }
                            } else {
                                let now = chrono::Utc::now().with_timezone(&tz);
                                format!("Time - {}", now.format("%H:%M (%Z)"))
                            };

                            ctx_clone.set_activity(Some(ActivityData::custom(text)));
                            show_version = !show_version;
                        }
                    });

                    Ok(data)
                })
            }
        })
        .build();

    let mut client = ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .context("creating discord client failed")?;

    let sched = JobScheduler::new().await?;

    if config.schedule_active() {
        let http = client.http.clone();
        let channel = ChannelId::new(config.channel_id);

        for (cron, with_darkpool) in [
            (scheduled::GEX_AND_DARKPOOL, true),
            (scheduled::GEX_ONLY, false),
        ] {
            let http = http.clone();
            let data = data.clone();

            sched
                .add(Job::new_async_tz(cron, UTC, move |_uuid, _l| {
                    let http = http.clone();
                    let data = data.clone();
                    let span = tracing::info_span!("scheduled_job", cron, with_darkpool);

                    Box::pin(
                        async move {
                            if let Err(e) =
                                scheduled::run_scheduled(http, channel, data, with_darkpool).await
                            {
                                error!(error = ?e, "scheduled report failed");
                            }
                        }
                        .instrument(span),
                    )
                })?)
                .await?;
        }
        info!(channel_id = config.channel_id, "scheduled reports enabled");
    } else {
        info!("scheduled reports disabled");
    }

    sched.shutdown_on_ctrl_c();
    sched.start().await?;

    tokio::spawn(async move {
        if let Err(why) = client.start().await {
            error!("Client error: {why:?}");
        }
    });

    shutdown_signal().await;

    info!("Shutdown complete.");
    Ok(())
}

async fn on_error(error: FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            warn!(command = %ctx.command().name, error = ?error, "command failed");
            if let Err(e) = ctx.say(format::error_message("Befehl fehlgeschlagen", &error)).await {
                error!(error = ?e, "reporting command error failed");
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!(error = ?e, "framework error handler failed");
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::{
            select,
            signal::unix::{SignalKind, signal},
        };
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            error!("failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };
        select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv()  => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
