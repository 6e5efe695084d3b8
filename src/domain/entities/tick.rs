use chrono::NaiveDateTime;

use crate::domain::entities::instrument::InstrumentId;

/// A single market tick as produced by the feed. Immutable and ephemeral.
#[derive(Debug, Clone)]
pub struct Tick {
    pub instrument: InstrumentId,
    pub ltp: f64,
    pub timestamp: NaiveDateTime,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl Tick {
    pub fn new(instrument: InstrumentId, ltp: f64, timestamp: NaiveDateTime) -> Self {
        Tick {
            instrument,
            ltp,
            timestamp,
            volume: None,
            open_interest: None,
            bid: None,
            ask: None,
        }
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }
}
