use tracing::info;

use super::valid_ratio;
use crate::{Context, Error, format};

/// Show or set the QQQ to NAS100 CFD ratio.
#[poise::command(prefix_command, slash_command)]
pub async fn ratio(
    ctx: Context<'_>,
    #[description = "Neuer Ratio"] value: Option<f64>,
) -> Result<(), Error> {
    let msg = match value.map(valid_ratio) {
        Some(Ok(v)) => {
            ctx.data().ratios.write().await.nasdaq = v;
            info!(ratio = v, "ratio: updated");
            format::ratio_message(v, true)
        }
        Some(Err(reason)) => reason.to_string(),
        None => format::ratio_message(ctx.data().ratios.read().await.nasdaq, false),
    };

    ctx.say(msg).await?;
    Ok(())
}
