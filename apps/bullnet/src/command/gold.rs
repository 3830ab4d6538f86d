use tracing::info;

use super::{say_error, send_gex, valid_ratio};
use crate::{Context, Error, format, reports};

/// Gold (GLD) GEX report with XAUUSD conversion.
#[poise::command(prefix_command, slash_command)]
pub async fn gold(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    match reports::gex_post(ctx.data(), "GLD").await {
        Ok(post) => send_gex(ctx, &post).await,
        Err(e) => say_error(ctx, "Keine Gold Daten", &e).await,
    }
}

/// Gold levels converted to XAUUSD.
#[poise::command(prefix_command, slash_command)]
pub async fn goldlevels(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_or_broadcast().await?;

    match ctx.data().gex.run("GLD").await {
        Ok(report) => {
            let ratio = ctx.data().ratio_for("GLD").await;
            ctx.say(format::gold_levels_message(&report, ratio)).await?;
            Ok(())
        }
        Err(e) => say_error(ctx, "Gold Levels nicht verfuegbar", &e).await,
    }
}

/// Show or set the GLD to XAUUSD ratio.
#[poise::command(prefix_command, slash_command)]
pub async fn goldratio(
    ctx: Context<'_>,
    #[description = "Neuer Ratio"] value: Option<f64>,
) -> Result<(), Error> {
    let msg = match value.map(valid_ratio) {
        Some(Ok(v)) => {
            ctx.data().ratios.write().await.gold = v;
            info!(ratio = v, "goldratio: updated");
            format::gold_ratio_message(v, true)
        }
        Some(Err(reason)) => reason.to_string(),
        None => format::gold_ratio_message(ctx.data().ratios.read().await.gold, false),
    };

    ctx.say(msg).await?;
    Ok(())
}
