use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use super::{GammaRegime, KeyLevels, OptionContract, OptionKind, StrikeGex};

pub const RISK_FREE_RATE: f64 = 0.045;
pub const DIVIDEND_YIELD: f64 = 0.005;
pub const MAX_EXPIRATIONS: usize = 12;

fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Black-Scholes gamma with continuous dividend yield.
pub fn bs_gamma(s: f64, k: f64, t: f64, r: f64, q: f64, sigma: f64) -> f64 {
    if t <= 0.0 || sigma <= 0.0 || s <= 0.0 {
        return 0.0;
    }

    let sqrt_t = t.sqrt();
    let d1 = ((s / k).ln() + (r - q + 0.5 * sigma * sigma) * t) / (sigma * sqrt_t);
    (-q * t).exp() * norm_pdf(d1) / (s * sigma * sqrt_t)
}

fn strike_key(strike: f64) -> i64 {
    (strike * 1000.0).round() as i64
}

/// Dealer GEX per 1% move, aggregated by strike over the nearest expirations.
pub fn calculate_gex(spot: f64, contracts: &[OptionContract]) -> Vec<StrikeGex> {
    let expirations: BTreeSet<_> = contracts
        .iter()
        .map(|c| c.expiration)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_EXPIRATIONS)
        .collect();

    let mut by_strike: BTreeMap<i64, StrikeGex> = BTreeMap::new();

    for c in contracts.iter().filter(|c| expirations.contains(&c.expiration)) {
        let gamma = if c.gamma > 0.0 {
            c.gamma
        } else {
            bs_gamma(spot, c.strike, c.t, RISK_FREE_RATE, DIVIDEND_YIELD, c.iv)
        };

        let gex = gamma * c.open_interest as f64 * 100.0 * spot * spot * 0.01;

        let entry = by_strike
            .entry(strike_key(c.strike))
            .or_insert_with(|| StrikeGex {
                strike: c.strike,
                call_gex: 0.0,
                put_gex: 0.0,
                net_gex: 0.0,
                total_oi: 0,
                total_volume: 0,
            });

        match c.kind {
            OptionKind::Call => {
                entry.call_gex += gex;
                entry.net_gex += gex;
            }
            OptionKind::Put => {
                entry.put_gex -= gex;
                entry.net_gex -= gex;
            }
        }
        entry.total_oi += c.open_interest;
        entry.total_volume += c.volume;
    }

    by_strike.into_values().collect()
}

/// Zero crossing of net GEX nearest to spot, linearly interpolated between
/// adjacent strikes. Input must be sorted by strike.
pub fn gamma_flip(spot: f64, strikes: &[StrikeGex]) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;

    for pair in strikes.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.net_gex * b.net_gex >= 0.0 {
            continue;
        }

        let ratio = a.net_gex.abs() / (a.net_gex.abs() + b.net_gex.abs());
        let flip = a.strike + ratio * (b.strike - a.strike);
        let dist = (flip - spot).abs();

        if best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, flip));
        }
    }

    best.map(|(_, flip)| flip)
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// First strike maximising `score`, ignoring entries where it returns None.
fn first_max_by(strikes: &[StrikeGex], score: impl Fn(&StrikeGex) -> Option<f64>) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for s in strikes {
        if let Some(v) = score(s)
            && best.is_none_or(|(bv, _)| v > bv)
        {
            best = Some((v, s.strike));
        }
    }
    best.map(|(_, strike)| strike)
}

pub fn find_key_levels(spot: f64, strikes: &[StrikeGex]) -> KeyLevels {
    let mut levels = KeyLevels::default();
    if strikes.is_empty() {
        return levels;
    }

    levels.call_wall = first_max_by(strikes, |s| (s.call_gex > 0.0).then_some(s.call_gex));
    levels.put_wall = first_max_by(strikes, |s| (s.put_gex < 0.0).then_some(-s.put_gex));

    if let Some(flip) = gamma_flip(spot, strikes) {
        levels.gamma_flip = Some(round_cents(flip));
        levels.regime = Some(GammaRegime::from_flip(spot, flip));
    }

    if strikes.iter().map(|s| s.total_volume).sum::<u64>() > 0 {
        levels.hvl = first_max_by(strikes, |s| Some(s.total_volume as f64));
    }

    levels.abs_gamma_strike = first_max_by(strikes, |s| Some(s.call_gex.abs() + s.put_gex.abs()));

    levels
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn contract(strike: f64, kind: OptionKind, oi: u64, gamma: f64, day: u32) -> OptionContract {
        OptionContract {
            strike,
            kind,
            expiration: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            dte: 5,
            t: 5.0 / 365.0,
            open_interest: oi,
            volume: oi / 10,
            iv: 0.2,
            gamma,
            bid: 1.0,
            ask: 1.1,
        }
    }

    fn strike(strike: f64, call: f64, put: f64, volume: u64) -> StrikeGex {
        StrikeGex {
            strike,
            call_gex: call,
            put_gex: put,
            net_gex: call + put,
            total_oi: 0,
            total_volume: volume,
        }
    }

    #[test]
    fn bs_gamma_matches_reference() {
        // ATM, 30 days, 20% vol: d1 ~ 0.086, gamma ~ 0.0693
        let g = bs_gamma(100.0, 100.0, 30.0 / 365.0, 0.045, 0.005, 0.2);
        assert!((g - 0.06916).abs() < 1e-3, "gamma = {g}");

        assert_eq!(bs_gamma(100.0, 100.0, 0.0, 0.045, 0.005, 0.2), 0.0);
        assert_eq!(bs_gamma(100.0, 100.0, 0.1, 0.045, 0.005, 0.0), 0.0);
    }

    #[test]
    fn aggregates_dealer_gex_by_strike() {
        let contracts = vec![
            contract(100.0, OptionKind::Call, 1000, 0.05, 17),
            contract(100.0, OptionKind::Put, 500, 0.04, 17),
            contract(105.0, OptionKind::Call, 200, 0.02, 24),
        ];

        let gex = calculate_gex(100.0, &contracts);
        assert_eq!(gex.len(), 2);

        // 0.05 * 1000 * 100 * 100^2 * 0.01
        let call = 0.05 * 1000.0 * 100.0 * 10_000.0 * 0.01;
        let put = 0.04 * 500.0 * 100.0 * 10_000.0 * 0.01;
        assert!((gex[0].call_gex - call).abs() < 1e-6);
        assert!((gex[0].put_gex + put).abs() < 1e-6);
        assert!((gex[0].net_gex - (call - put)).abs() < 1e-6);
        assert_eq!(gex[0].total_oi, 1500);
        assert_eq!(gex[1].strike, 105.0);
    }

    #[test]
    fn keeps_nearest_expirations_only() {
        let mut contracts = Vec::new();
        for day in 1..=(MAX_EXPIRATIONS as u32 + 2) {
            contracts.push(contract(100.0 + day as f64, OptionKind::Call, 100, 0.01, day));
        }

        let gex = calculate_gex(100.0, &contracts);
        assert_eq!(gex.len(), MAX_EXPIRATIONS);
        assert_eq!(gex.last().unwrap().strike, 100.0 + MAX_EXPIRATIONS as f64);
    }

    #[test]
    fn finds_walls_flip_and_hvl() {
        let strikes = vec![
            strike(95.0, 1.0, -8.0, 10),
            strike(100.0, 3.0, -5.0, 40),
            strike(105.0, 9.0, -2.0, 25),
            strike(110.0, 6.0, -1.0, 5),
        ];

        let levels = find_key_levels(103.0, &strikes);
        assert_eq!(levels.call_wall, Some(105.0));
        assert_eq!(levels.put_wall, Some(95.0));
        // net: -7, -2, 7, 5 -> crossing between 100 and 105 at 100 + 2/9 * 5
        assert_eq!(levels.gamma_flip, Some(101.11));
        assert_eq!(levels.regime, Some(GammaRegime::Positive));
        assert_eq!(levels.hvl, Some(100.0));
        assert_eq!(levels.abs_gamma_strike, Some(105.0));
    }

    #[test]
    fn flip_picks_crossing_nearest_spot() {
        let strikes = vec![
            strike(90.0, 1.0, 0.0, 0),
            strike(95.0, 0.0, -1.0, 0),
            strike(100.0, 0.0, -1.0, 0),
            strike(105.0, 1.0, 0.0, 0),
        ];

        assert_eq!(gamma_flip(104.0, &strikes), Some(102.5));
        assert_eq!(gamma_flip(91.0, &strikes), Some(92.5));
    }

    #[test]
    fn no_volume_means_no_hvl() {
        let strikes = vec![strike(100.0, 2.0, -1.0, 0), strike(101.0, 1.0, -3.0, 0)];
        let levels = find_key_levels(100.2, &strikes);
        assert_eq!(levels.hvl, None);
        assert_eq!(levels.regime, Some(GammaRegime::Negative));
        assert!(find_key_levels(100.0, &[]).is_empty());
    }
}
