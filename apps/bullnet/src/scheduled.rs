use std::sync::Arc;

use anyhow::Result;
use bullnet::{Data, reports};
use serenity::all::{ChannelId, Http};
use tracing::{info, instrument, warn};

/// Cron expressions (UTC, with seconds) for the scheduled posts. The first
/// session post also carries the dark pool report.
pub const GEX_AND_DARKPOOL: &str = "0 0 14 * * Mon-Fri";
pub const GEX_ONLY: &str = "0 0 17,20 * * Mon-Fri";

#[instrument(
    name = "run_scheduled",
    skip(http, data),
    fields(channel_id = %channel)
)]
pub async fn run_scheduled(
    http: Arc<Http>,
    channel: ChannelId,
    data: Data,
    with_darkpool: bool,
) -> Result<()> {
    match reports::gex_post(&data, "QQQ").await {
        Ok(post) => {
            post.send_to(&http, channel).await?;
            info!(
                gamma_flip = ?post.report.levels.gamma_flip,
                "scheduled gex posted"
            );
        }
        Err(e) => warn!(error = ?e, "scheduled gex failed"),
    }

    if with_darkpool {
        let post = reports::darkpool_post(&data, "QQQ").await?;
        post.send_to(&http, channel).await?;
        info!(levels = post.report.levels.len(), "scheduled dark pool posted");
    }

    Ok(())
}

/// Without a Discord token: print one QQQ report to stdout.
#[instrument(name = "report_mode", skip(data))]
pub async fn print_report(data: &Data) -> Result<()> {
    let gex = reports::gex_post(data, "QQQ").await?;
    println!("{}", gex.text);

    let dp = reports::darkpool_post(data, "QQQ").await?;
    println!("{}", dp.text);

    Ok(())
}
