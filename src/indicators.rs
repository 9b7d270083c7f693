use crate::config::{AdxSample, ADX_EPSILON};
use crate::types::Candle;

/// Average Directional Index with its two directional indicators, all in [0, 100].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Wilder recursion `x[i] = (x[i-1]·(period-1) + raw[i]) / period`, seeded with the
/// mean of the first `period` raw values.
fn wilder(raw: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; raw.len()];
    if raw.is_empty() {
        return out;
    }
    let seed_len = period.min(raw.len());
    out[0] = raw[..seed_len].iter().sum::<f64>() / seed_len as f64;
    let p = period as f64;
    for i in 1..raw.len() {
        out[i] = (out[i - 1] * (p - 1.0) + raw[i]) / p;
    }
    out
}

/// Full ADX series, one reading per bar after the first.
/// `None` when fewer than `period + 1` candles are supplied.
pub fn adx_series(candles: &[Candle], period: usize) -> Option<Vec<AdxReading>> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let n = candles.len() - 1;
    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);
    let mut tr = Vec::with_capacity(n);

    for w in candles.windows(2) {
        let (prev, curr) = (&w[0], &w[1]);
        let up = curr.high - prev.high;
        let down = prev.low - curr.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(
            (curr.high - curr.low)
                .max((curr.high - prev.close).abs())
                .max((curr.low - prev.close).abs()),
        );
    }

    let atr = wilder(&tr, period);
    let plus_smooth = wilder(&plus_dm, period);
    let minus_smooth = wilder(&minus_dm, period);

    let mut plus_di = Vec::with_capacity(n);
    let mut minus_di = Vec::with_capacity(n);
    let mut dx = Vec::with_capacity(n);
    for i in 0..n {
        let p = 100.0 * plus_smooth[i] / (atr[i] + ADX_EPSILON);
        let m = 100.0 * minus_smooth[i] / (atr[i] + ADX_EPSILON);
        plus_di.push(p);
        minus_di.push(m);
        dx.push(100.0 * (p - m).abs() / (p + m + ADX_EPSILON));
    }
    let adx = wilder(&dx, period);

    Some(
        (0..n)
            .map(|i| AdxReading { adx: adx[i], plus_di: plus_di[i], minus_di: minus_di[i] })
            .collect(),
    )
}

/// Single ADX reading taken from the series according to `sample`.
pub fn adx(candles: &[Candle], period: usize, sample: AdxSample) -> Option<AdxReading> {
    let series = adx_series(candles, period)?;
    match sample {
        AdxSample::Latest => series.last().copied(),
        AdxSample::PreviousBar if series.len() >= 2 => Some(series[series.len() - 2]),
        AdxSample::PreviousBar => series.last().copied(),
    }
}

/// Reading for a fetched history whose last bar may still be forming.
///
/// `PreviousBar` steps back over the forming bar; when `forming` is false every bar is
/// closed and the last one is read, so the newest completed candle is never skipped.
pub fn adx_live(candles: &[Candle], forming: bool, period: usize, sample: AdxSample) -> Option<AdxReading> {
    let sample = if forming { sample } else { AdxSample::Latest };
    adx(candles, period, sample)
}
