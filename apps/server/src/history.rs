//! Fixed-length sample history.
//!
//! Four parallel tracks (timestamp, temperature, humidity, boiler on) share
//! one write position. Pushing overwrites the oldest slot, so the buffer never
//! grows and every index refers to the same sample instant in all tracks.

use chrono::{DateTime, Duration, Local};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub boiler_on: bool,
}

#[derive(Debug, Clone)]
pub struct History {
    timestamps: Vec<DateTime<Local>>,
    temperature: Vec<Option<f64>>,
    humidity: Vec<Option<f64>>,
    boiler_on: Vec<bool>,
    // Slot the next push writes, which is also the oldest entry.
    head: usize,
    pushed: usize,
}

impl History {
    /// A buffer of `len` unknown samples whose placeholder timestamps step
    /// back from `now` by `interval`, so charts span the full window at once.
    pub fn new(len: usize, now: DateTime<Local>, interval: Duration) -> Self {
        let len = len.max(1);
        let step_ms = interval.num_milliseconds();
        let timestamps = (0..len)
            .map(|i| now - Duration::milliseconds(step_ms * (len - 1 - i) as i64))
            .collect();
        Self {
            timestamps,
            temperature: vec![None; len],
            humidity: vec![None; len],
            boiler_on: vec![false; len],
            head: 0,
            pushed: 0,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        let i = self.head;
        self.timestamps[i] = sample.timestamp;
        self.temperature[i] = sample.temperature;
        self.humidity[i] = sample.humidity;
        self.boiler_on[i] = sample.boiler_on;
        self.head = (self.head + 1) % self.len();
        self.pushed += 1;
    }

    /// Sets the boiler track of the newest sample.
    pub fn mark_newest_boiler_on(&mut self, on: bool) {
        let i = self.newest_index();
        self.boiler_on[i] = on;
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True until the first real sample arrives.
    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    /// Real samples held, at most `len()`.
    pub fn filled(&self) -> usize {
        self.pushed.min(self.len())
    }

    pub fn newest(&self) -> Option<Sample> {
        if self.is_empty() {
            return None;
        }
        Some(self.sample(self.newest_index()))
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        let len = self.len();
        (0..len).map(move |k| self.sample((self.head + k) % len))
    }

    #[cfg(test)]
    pub fn timestamps(&self) -> Vec<DateTime<Local>> {
        self.samples().map(|s| s.timestamp).collect()
    }

    #[cfg(test)]
    pub fn temperatures(&self) -> Vec<Option<f64>> {
        self.samples().map(|s| s.temperature).collect()
    }

    #[cfg(test)]
    pub fn humidities(&self) -> Vec<Option<f64>> {
        self.samples().map(|s| s.humidity).collect()
    }

    #[cfg(test)]
    pub fn boiler_on(&self) -> Vec<bool> {
        self.samples().map(|s| s.boiler_on).collect()
    }

    fn newest_index(&self) -> usize {
        (self.head + self.len() - 1) % self.len()
    }

    fn sample(&self, i: usize) -> Sample {
        Sample {
            timestamp: self.timestamps[i],
            temperature: self.temperature[i],
            humidity: self.humidity[i],
            boiler_on: self.boiler_on[i],
        }
    }
}

/// Contiguous boiler-on stretches as `(start, end)`. A stretch ends at the
/// first sample with the boiler off, or at the newest sample if still running.
pub fn heating_periods(samples: &[Sample]) -> Vec<(DateTime<Local>, DateTime<Local>)> {
    let mut periods = Vec::new();
    let mut start = None;
    for s in samples {
        match (start, s.boiler_on) {
            (None, true) => start = Some(s.timestamp),
            (Some(begin), false) => {
                periods.push((begin, s.timestamp));
                start = None;
            }
            _ => {}
        }
    }
    if let (Some(begin), Some(last)) = (start, samples.last()) {
        periods.push((begin, last.timestamp));
    }
    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn sample(k: i64, temperature: f64, boiler_on: bool) -> Sample {
        Sample {
            timestamp: t0() + Duration::seconds(15 * k),
            temperature: Some(temperature),
            humidity: Some(50.0 + k as f64),
            boiler_on,
        }
    }

    #[test]
    fn placeholders_span_window() {
        let h = History::new(4, t0(), Duration::seconds(15));
        assert!(h.is_empty());
        assert_eq!(h.newest(), None);
        assert_eq!(h.temperatures(), vec![None; 4]);
        let ts = h.timestamps();
        assert_eq!(ts[0], t0() - Duration::seconds(45));
        assert_eq!(ts[3], t0());
    }

    #[test]
    fn partial_fill_keeps_unknowns_oldest() {
        let mut h = History::new(4, t0(), Duration::seconds(15));
        h.push(sample(1, 18.0, false));
        h.push(sample(2, 18.5, false));
        assert_eq!(h.temperatures(), vec![None, None, Some(18.0), Some(18.5)]);
        assert_eq!(h.filled(), 2);
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn evicts_oldest_first() {
        let n = 5;
        let mut h = History::new(n, t0(), Duration::seconds(15));
        for k in 0..(n as i64 + 3) {
            h.push(sample(k, k as f64, k % 2 == 0));
            assert_eq!(h.len(), n);
            assert_eq!(h.temperatures().len(), n);
            assert_eq!(h.humidities().len(), n);
            assert_eq!(h.boiler_on().len(), n);
        }
        let temps: Vec<f64> = h.temperatures().into_iter().map(|t| t.unwrap()).collect();
        assert_eq!(temps, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(h.boiler_on(), vec![false, true, false, true, false]);
        assert_eq!(h.newest().unwrap(), sample(7, 7.0, false));
        // Tracks stay aligned on one instant.
        for s in h.samples() {
            let k = (s.timestamp - t0()).num_seconds() / 15;
            assert_eq!(s.temperature, Some(k as f64));
            assert_eq!(s.humidity, Some(50.0 + k as f64));
        }
    }

    #[test]
    fn single_slot_buffer() {
        let mut h = History::new(1, t0(), Duration::seconds(15));
        h.push(sample(1, 20.0, false));
        h.push(sample(2, 21.0, false));
        assert_eq!(h.temperatures(), vec![Some(21.0)]);
    }

    #[test]
    fn marks_newest_boiler_state() {
        let mut h = History::new(3, t0(), Duration::seconds(15));
        h.push(sample(1, 18.0, false));
        h.push(sample(2, 18.0, false));
        h.mark_newest_boiler_on(true);
        assert_eq!(h.boiler_on(), vec![false, false, true]);
    }

    #[test]
    fn periods_close_on_off_sample() {
        let samples: Vec<Sample> = [false, true, true, false, true]
            .iter()
            .enumerate()
            .map(|(k, &on)| sample(k as i64, 18.0, on))
            .collect();
        let periods = heating_periods(&samples);
        assert_eq!(
            periods,
            vec![
                (samples[1].timestamp, samples[3].timestamp),
                (samples[4].timestamp, samples[4].timestamp),
            ]
        );
        assert!(heating_periods(&[]).is_empty());
    }
}
