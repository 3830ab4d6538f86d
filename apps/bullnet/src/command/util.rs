use tracing::warn;

use crate::{Context, Error, format};

/// CBOE connectivity check.
#[poise::command(prefix_command, slash_command)]
pub async fn test(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Teste CBOE Verbindung...").await?;

    match ctx.data().gex.cboe().probe("QQQ").await {
        Ok(probe) => {
            ctx.say(format!(
                "Status: {} | Size: {} bytes",
                probe.status, probe.bytes
            ))
            .await?;
            ctx.say(format!(
                "Spot: {} | Options: {}",
                format::price(probe.spot),
                probe.contracts
            ))
            .await?;
        }
        Err(e) => {
            warn!(error = ?e, "test: CBOE probe failed");
            ctx.say(format::error_message("CBOE Fehler", &e)).await?;
        }
    }
    Ok(())
}

/// Command overview.
#[poise::command(prefix_command, slash_command)]
pub async fn hilfe(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(format::help_message()).await?;
    Ok(())
}
