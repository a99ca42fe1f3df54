//! Tempo map: piecewise constant-acceleration mapping between score time and beats.

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};

/// Reference beat value corresponding to tempo 1.0.
pub const DEFAULT_BEAT_BASIS: f64 = 60.0;

/// Maximum number of (time, tempo) breakpoints accepted by [`TempoMap::set_points`].
pub const MAX_TEMPO_POINTS: usize = 20;

/// Far-future time sentinel closing the final segment.
const END_OF_TIME: f64 = 0.999_999e10;

/// Immutable view of a built tempo map.
///
/// Between breakpoints `m` and `m+1` the tempo-over-basis varies with
/// constant acceleration `(t[m+1]^2 - t[m]^2) / (2 * (x[m+1] - x[m]))`;
/// beat positions at each breakpoint are precomputed so conversions are a
/// segment scan plus a closed form.
#[derive(Debug, Clone)]
pub struct TempoSnapshot {
    /// Breakpoint times in seconds; index 0 is a synthetic origin point.
    xtime: Vec<f64>,
    /// Tempo over basis at each breakpoint.
    tempo: Vec<f64>,
    /// Beat position at each breakpoint.
    rxtime: Vec<f64>,
    /// Acceleration within each segment.
    accel: Vec<f64>,
    npts: usize,
}

impl TempoSnapshot {
    fn identity() -> Self {
        Self {
            xtime: Vec::new(),
            tempo: Vec::new(),
            rxtime: Vec::new(),
            accel: Vec::new(),
            npts: 0,
        }
    }

    /// Whether any tempo points are in effect.
    pub fn is_set(&self) -> bool {
        self.npts > 0
    }

    /// Convert seconds of score time to beats. Identity when no map is set.
    pub fn time_to_beat(&self, time: f64) -> f64 {
        if !self.is_set() {
            return time;
        }
        let time = time.max(0.0);
        let mut m = 0;
        let mut durp = 0.0;
        if time > 0.0 {
            for seg in 0..=self.npts {
                if time > self.xtime[seg] && time <= self.xtime[seg + 1] {
                    durp = time - self.xtime[seg];
                    m = seg;
                    break;
                }
            }
        }
        if self.accel[m] == 0.0 {
            durp / self.tempo[m] + self.rxtime[m]
        } else {
            ((self.tempo[m].powi(2) + 2.0 * self.accel[m] * durp).sqrt() - self.tempo[m])
                / self.accel[m]
                + self.rxtime[m]
        }
    }

    /// Convert beats to seconds of score time. Identity when no map is set.
    pub fn beat_to_time(&self, beat: f64) -> f64 {
        if !self.is_set() {
            return beat;
        }
        let mut m = 0;
        if beat != 0.0 {
            for seg in 0..=self.npts {
                if beat > self.rxtime[seg] && beat <= self.rxtime[seg + 1] {
                    m = seg;
                    break;
                }
            }
        }
        if self.accel[m] == 0.0 {
            (beat - self.rxtime[m]) * self.tempo[m] + self.xtime[m]
        } else {
            (((beat - self.rxtime[m]) * self.accel[m] + self.tempo[m]).powi(2)
                - self.tempo[m].powi(2))
                / (2.0 * self.accel[m])
                + self.xtime[m]
        }
    }
}

/// Mutable tempo map. Single producer; readers go through [`TempoMap::snapshot`].
#[derive(Debug)]
pub struct TempoMap {
    basis: f64,
    snapshot: Arc<TempoSnapshot>,
}

impl TempoMap {
    pub fn new() -> Self {
        Self {
            basis: DEFAULT_BEAT_BASIS,
            snapshot: Arc::new(TempoSnapshot::identity()),
        }
    }

    /// Set the reference beat value for subsequent [`set_points`](Self::set_points) calls.
    pub fn set_basis(&mut self, basis: f64) -> Result<()> {
        if basis <= 0.0 {
            return Err(Error::Param(format!("tbase: basis must be positive, got {basis}")));
        }
        self.basis = basis;
        Ok(())
    }

    pub fn basis(&self) -> f64 {
        self.basis
    }

    /// Rebuild the map from `(time, tempo)` breakpoints.
    ///
    /// An empty slice clears the map back to the identity mapping. Tempi
    /// must be nonzero and at most [`MAX_TEMPO_POINTS`] pairs are accepted.
    pub fn set_points(&mut self, points: &[(f64, f64)]) -> Result<()> {
        if points.is_empty() {
            info!("tempo: tempo changes cleared out");
            self.snapshot = Arc::new(TempoSnapshot::identity());
            return Ok(());
        }
        if points.len() > MAX_TEMPO_POINTS {
            return Err(Error::Param(format!(
                "tempo: at most {MAX_TEMPO_POINTS} time/tempo pairs allowed"
            )));
        }
        let npts = points.len();
        let mut xtime = vec![0.0; npts + 2];
        let mut tempo = vec![0.0; npts + 2];
        for (i, &(time, bpm)) in points.iter().enumerate() {
            if bpm == 0.0 {
                return Err(Error::Param(
                    "tempo: tempo value cannot be zero - did you reverse your arguments?".into(),
                ));
            }
            xtime[i + 1] = time;
            tempo[i + 1] = bpm / self.basis;
        }
        xtime[npts + 1] = END_OF_TIME;
        tempo[npts + 1] = tempo[npts];
        tempo[0] = tempo[1];

        let mut rxtime = vec![0.0; npts + 2];
        let mut accel = vec![0.0; npts + 2];
        rxtime[npts + 1] = END_OF_TIME;
        let mut prev_beat = 0.0;
        for m in 0..=npts {
            let dur = xtime[m + 1] - xtime[m];
            if dur == 0.0 {
                accel[m] = 0.0;
                rxtime[m + 1] = rxtime[m];
            } else {
                accel[m] = (tempo[m + 1].powi(2) - tempo[m].powi(2)) / (2.0 * dur);
                rxtime[m + 1] = if accel[m] == 0.0 {
                    dur / tempo[m] + prev_beat
                } else {
                    ((tempo[m].powi(2) + 2.0 * accel[m] * dur).sqrt() - tempo[m]) / accel[m]
                        + prev_beat
                };
            }
            prev_beat = rxtime[m + 1];
        }

        self.snapshot = Arc::new(TempoSnapshot {
            xtime,
            tempo,
            rxtime,
            accel,
            npts,
        });
        Ok(())
    }

    /// Get an immutable snapshot for conversions.
    pub fn snapshot(&self) -> Arc<TempoSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn time_to_beat(&self, time: f64) -> f64 {
        self.snapshot.time_to_beat(time)
    }

    pub fn beat_to_time(&self, beat: f64) -> f64 {
        self.snapshot.beat_to_time(beat)
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_without_map() {
        let map = TempoMap::new();
        assert_eq!(map.time_to_beat(3.14), 3.14);
        assert_eq!(map.beat_to_time(-2.0), -2.0);
    }

    #[test]
    fn test_accelerating_segment_closed_form() {
        let mut map = TempoMap::new();
        map.set_basis(60.0).unwrap();
        map.set_points(&[(0.0, 60.0), (4.0, 120.0)]).unwrap();

        // tempo-over-basis ramps 1 -> 2 over 4 seconds, so
        // a = (2^2 - 1^2) / (2 * 4) = 0.375 and
        // beats(4) = (sqrt(1 + 2 * a * 4) - 1) / a.
        let a = 0.375;
        let expected = ((1.0 + 2.0 * a * 4.0f64).sqrt() - 1.0) / a;
        assert!((map.time_to_beat(4.0) - expected).abs() < 1e-9);
        assert!((map.beat_to_time(map.time_to_beat(4.0)) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_over_many_positions() {
        let mut map = TempoMap::new();
        map.set_points(&[(0.0, 60.0), (2.0, 90.0), (5.0, 240.0), (9.0, 30.0)])
            .unwrap();
        for i in 0..200 {
            let t = i as f64 * 0.11;
            let b = map.time_to_beat(t);
            assert!(
                (map.beat_to_time(b) - t).abs() < 1e-6,
                "round trip failed at t={t}"
            );
            let t2 = map.beat_to_time(b);
            assert!((map.time_to_beat(t2) - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_constant_tempo_is_linear() {
        let mut map = TempoMap::new();
        map.set_points(&[(0.0, 120.0)]).unwrap();
        // Tempo-over-basis is 2, so one second of real time covers half a
        // basis beat and the mapping is linear both ways.
        assert!((map.time_to_beat(1.0) - 0.5).abs() < 1e-9);
        assert!((map.beat_to_time(4.0) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_basis_scales_tempo() {
        let mut map = TempoMap::new();
        map.set_basis(120.0).unwrap();
        map.set_points(&[(0.0, 120.0)]).unwrap();
        // 120 over a basis of 120: one beat per second.
        assert!((map.time_to_beat(3.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tempo_rejected() {
        let mut map = TempoMap::new();
        assert!(map.set_points(&[(0.0, 0.0)]).is_err());
        // The failed call must not have installed a map.
        assert_eq!(map.time_to_beat(1.5), 1.5);
    }

    #[test]
    fn test_clearing_restores_identity() {
        let mut map = TempoMap::new();
        map.set_points(&[(0.0, 90.0)]).unwrap();
        assert!(map.snapshot().is_set());
        map.set_points(&[]).unwrap();
        assert!(!map.snapshot().is_set());
        assert_eq!(map.time_to_beat(7.0), 7.0);
    }

    #[test]
    fn test_negative_time_clamped_when_set() {
        let mut map = TempoMap::new();
        map.set_points(&[(0.0, 60.0)]).unwrap();
        assert_eq!(map.time_to_beat(-3.0), 0.0);
    }

    #[test]
    fn test_too_many_points_rejected() {
        let mut map = TempoMap::new();
        let points: Vec<(f64, f64)> = (0..=MAX_TEMPO_POINTS).map(|i| (i as f64, 60.0)).collect();
        assert!(map.set_points(&points).is_err());
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut map = TempoMap::new();
        map.set_points(&[(0.0, 60.0)]).unwrap();
        let snap = map.snapshot();
        map.set_points(&[(0.0, 120.0)]).unwrap();
        assert!((snap.time_to_beat(1.0) - 1.0).abs() < 1e-9);
        assert!((map.time_to_beat(1.0) - 2.0).abs() < 1e-9);
    }
}
