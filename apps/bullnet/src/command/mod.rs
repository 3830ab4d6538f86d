mod darkpool;
mod gex;
mod gold;
mod ratio;
mod util;

use crate::{Context, Data, Error, format, reports::GexPost};

pub use darkpool::{accumulation, darkpool, memory, prints};
pub use gex::{all, gamma, gex, levels};
pub use gold::{gold, goldlevels, goldratio};
pub use ratio::ratio;
pub use util::{hilfe, test};

pub fn commands() -> Vec<poise::Command<Data, Error>> {
    vec![
        gex(),
        gold(),
        goldlevels(),
        goldratio(),
        darkpool(),
        prints(),
        memory(),
        accumulation(),
        gamma(),
        ratio(),
        levels(),
        all(),
        test(),
        hilfe(),
    ]
}

/// Text block first so it renders above the embed and chart.
async fn send_gex(ctx: Context<'_>, post: &GexPost) -> Result<(), Error> {
    ctx.say(&post.text).await?;
    ctx.send(post.reply()).await?;
    Ok(())
}

async fn say_error(ctx: Context<'_>, context: &str, err: &anyhow::Error) -> Result<(), Error> {
    ctx.say(format::error_message(context, err)).await?;
    Ok(())
}

fn ticker_or_default(ticker: Option<String>) -> String {
    market::ticker::normalize(ticker.as_deref().unwrap_or("QQQ"))
}

/// Positive finite ratio, or the reason it was rejected.
fn valid_ratio(value: f64) -> Result<f64, &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err("Ratio muss eine positive Zahl sein.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_qqq() {
        assert_eq!(ticker_or_default(None), "QQQ");
        assert_eq!(ticker_or_default(Some("gold".into())), "GLD");
    }

    #[test]
    fn rejects_non_positive_ratios() {
        assert_eq!(valid_ratio(41.0), Ok(41.0));
        assert!(valid_ratio(0.0).is_err());
        assert!(valid_ratio(-3.0).is_err());
        assert!(valid_ratio(f64::NAN).is_err());
    }

    #[test]
    fn registers_every_command() {
        let names: Vec<String> = commands().into_iter().map(|c| c.name).collect();
        for name in ["gex", "darkpool", "prints", "memory", "accumulation", "hilfe"] {
            assert!(names.iter().any(|n| n == name), "{name} missing");
        }
    }
}
