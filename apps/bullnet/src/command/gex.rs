use tracing::{info, warn};

use super::{say_error, send_gex, ticker_or_default};
use crate::{Context, Error, format, reports};

/// Full GEX report with CFD conversion.
#[poise::command(prefix_command, slash_command)]
pub async fn gex(
    ctx: Context<'_>,
    #[description = "Ticker (Standard: QQQ)"] ticker: Option<String>,
) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    let ticker = ticker_or_default(ticker);
    info!(%ticker, "gex: invoked");

    match reports::gex_post(ctx.data(), &ticker).await {
        Ok(post) => send_gex(ctx, &post).await,
        Err(e) => {
            warn!(%ticker, error = ?e, "gex: report failed");
            say_error(ctx, &format!("Keine Daten fuer {ticker}"), &e).await
        }
    }
}

/// Quick regime check for QQQ.
#[poise::command(prefix_command, slash_command)]
pub async fn gamma(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    match ctx.data().gex.run("QQQ").await {
        Ok(report) => {
            ctx.say(format::gamma_line(&report)).await?;
        }
        Err(e) => say_error(ctx, "Gamma nicht verfuegbar", &e).await?,
    }
    Ok(())
}

/// QQQ levels for the TradingView indicator inputs.
#[poise::command(prefix_command, slash_command)]
pub async fn levels(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    match ctx.data().gex.run("QQQ").await {
        Ok(report) => {
            let ratio = ctx.data().ratio_for("QQQ").await;
            ctx.say(format::levels_message(&report, ratio)).await?;
        }
        Err(e) => say_error(ctx, "Levels nicht verfuegbar", &e).await?,
    }
    Ok(())
}

/// Nasdaq GEX, dark pool and gold GEX in one go.
#[poise::command(prefix_command, slash_command)]
pub async fn all(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;
    info!("all: invoked");

    let data = ctx.data();
    let (nasdaq, dp, gold) = tokio::join!(
        reports::gex_post(data, "QQQ"),
        reports::darkpool_post(data, "QQQ"),
        reports::gex_post(data, "GLD"),
    );

    match nasdaq {
        Ok(post) => send_gex(ctx, &post).await?,
        Err(e) => say_error(ctx, "Keine Daten fuer QQQ", &e).await?,
    }

    match dp {
        Ok(post) => {
            ctx.say(&post.text).await?;
        }
        Err(e) => warn!(error = ?e, "all: dark pool failed"),
    }

    match gold {
        Ok(post) => send_gex(ctx, &post).await?,
        Err(e) => say_error(ctx, "Keine Gold Daten", &e).await?,
    }

    Ok(())
}
