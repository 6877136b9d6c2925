//! Tick → minute bar → N-minute bar aggregation
//!
//! [`BarGenerator`] folds a tick stream into one OHLCV bar per wall-clock
//! minute; [`XMinBarGenerator`] folds minute bars into N-minute composites
//! aligned to minute-of-day boundaries. Both return the finalized bar from
//! their update method instead of invoking a callback, which keeps the
//! dispatch sequencing in one place (the runner).

use chrono::{DateTime, Timelike, Utc};

use crate::types::{Bar, Tick};

/// Zero out seconds and sub-second parts of a timestamp
fn truncate_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// Minute bar aggregator for one instrument
#[derive(Default)]
pub struct BarGenerator {
    bar: Option<Bar>,
    last_tick: Option<Tick>,
}

impl BarGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one tick; returns the finalized bar when a minute boundary closes
    ///
    /// A tick not strictly newer than the last accepted tick is discarded
    /// before touching any state. This guards against reordering and
    /// duplication when the same instrument is subscribed through multiple
    /// venues.
    pub fn update_tick(&mut self, tick: &Tick) -> Option<Bar> {
        if let Some(last) = &self.last_tick {
            if tick.timestamp <= last.timestamp {
                return None;
            }
        }

        let mut finished = None;
        let new_minute = match &self.bar {
            None => true,
            Some(bar) => {
                truncate_to_minute(bar.timestamp) != truncate_to_minute(tick.timestamp)
            }
        };

        if new_minute {
            if let Some(mut bar) = self.bar.take() {
                bar.timestamp = truncate_to_minute(bar.timestamp);
                finished = Some(bar);
            }
            self.bar = Some(Bar {
                symbol: tick.symbol.clone(),
                exchange: tick.exchange.clone(),
                venue_id: tick.venue_id.clone(),
                trading_day: tick.trading_day.clone(),
                timestamp: tick.timestamp,
                open: tick.last_price,
                high: tick.last_price,
                low: tick.last_price,
                close: tick.last_price,
                volume: 0.0,
                open_interest: tick.open_interest,
            });
        }

        if let Some(bar) = self.bar.as_mut() {
            bar.high = bar.high.max(tick.last_price);
            bar.low = bar.low.min(tick.last_price);
            bar.close = tick.last_price;
            bar.open_interest = tick.open_interest;
            // Tick volume is cumulative; the bar accumulates deltas. The very
            // first tick has no previous value to diff against.
            if let Some(last) = &self.last_tick {
                bar.volume += tick.volume - last.volume;
            }
        }

        self.last_tick = Some(tick.clone());
        finished
    }
}

/// N-minute composite bar aggregator for one instrument
///
/// Only meaningful for windows larger than one minute; windows are aligned to
/// minute-of-day boundaries, not to the first bar received.
pub struct XMinBarGenerator {
    x_min: u32,
    bar: Option<Bar>,
}

impl XMinBarGenerator {
    pub fn new(x_min: u32) -> Self {
        Self { x_min, bar: None }
    }

    /// Fold one minute bar; returns the finalized composite when the window
    /// closes, i.e. when `(minute_of_day + 1) % x_min == 0` for the incoming
    /// bar
    pub fn update_bar(&mut self, bar: &Bar) -> Option<Bar> {
        match self.bar.as_mut() {
            None => {
                let mut composite = bar.clone();
                composite.volume = bar.volume;
                self.bar = Some(composite);
            }
            Some(composite) => {
                // Open is fixed once the window starts; extrema extend.
                composite.high = composite.high.max(bar.high);
                composite.low = composite.low.min(bar.low);
                composite.close = bar.close;
                composite.volume += bar.volume;
                composite.open_interest = bar.open_interest;
            }
        }

        if (bar.minute_of_day() + 1) % self.x_min == 0 {
            if let Some(mut composite) = self.bar.take() {
                composite.timestamp = truncate_to_minute(bar.timestamp);
                return Some(composite);
            }
        }
        None
    }
}
