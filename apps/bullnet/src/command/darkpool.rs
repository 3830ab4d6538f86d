use chrono::Local;
use tracing::{info, warn};

use super::{say_error, ticker_or_default};
use crate::{Context, Error, format, reports};

/// Dark pool levels from the previous session.
#[poise::command(prefix_command, slash_command, aliases("dp"))]
pub async fn darkpool(
    ctx: Context<'_>,
    #[description = "Ticker (Standard: QQQ)"] ticker: Option<String>,
) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    let ticker = ticker_or_default(ticker);
    info!(%ticker, "darkpool: invoked");

    let post = match reports::darkpool_post(ctx.data(), &ticker).await {
        Ok(post) => post,
        Err(e) => return say_error(ctx, "Dark Pool Fehler", &e).await,
    };

    ctx.say(&post.text).await?;
    if let Some(embed) = post.embed {
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
    }
    Ok(())
}

/// Largest block prints with their bid/ask side.
#[poise::command(prefix_command, slash_command)]
pub async fn prints(
    ctx: Context<'_>,
    #[description = "Ticker (Standard: QQQ)"] ticker: Option<String>,
) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    let ticker = ticker_or_default(ticker);
    info!(%ticker, "prints: invoked");

    match reports::prints_post(ctx.data(), &ticker).await {
        Ok(msg) => {
            ctx.say(msg).await?;
            Ok(())
        }
        Err(e) => say_error(ctx, "Block Trades Fehler", &e).await,
    }
}

/// Remembered dark pool levels price has not reached yet.
#[poise::command(prefix_command, slash_command)]
pub async fn memory(
    ctx: Context<'_>,
    #[description = "Ticker (Standard: QQQ)"] ticker: Option<String>,
) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    let ticker = ticker_or_default(ticker);
    let data = ctx.data();

    let spot = match data.gex.cboe().fetch_chain(&ticker).await {
        Ok(chain) => Some(chain.spot),
        Err(e) => {
            warn!(%ticker, error = ?e, "memory: spot unavailable");
            None
        }
    };

    match data.memory.active(&ticker, spot).await {
        Ok(levels) => {
            let msg = format::memory_message(&ticker, &levels, spot, Local::now().date_naive());
            ctx.say(format::truncate(&msg)).await?;
            Ok(())
        }
        Err(e) => say_error(ctx, "DP Memory Fehler", &e).await,
    }
}

/// Price zones with repeated block buying or selling over the last week.
#[poise::command(prefix_command, slash_command)]
pub async fn accumulation(
    ctx: Context<'_>,
    #[description = "Ticker (Standard: QQQ)"] ticker: Option<String>,
) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    let ticker = ticker_or_default(ticker);
    let data = ctx.data();

    match data.accumulation.zones(&ticker).await {
        Ok(zones) => {
            let ratio = data.ratio_for(&ticker).await;
            ctx.say(format::accumulation_message(&ticker, &zones, ratio))
                .await?;
            Ok(())
        }
        Err(e) => say_error(ctx, "Akkumulation Fehler", &e).await,
    }
}
