use std::fmt;

use fugue_core::{DeviceAddress, SensorKind};
use serde::Serialize;

/// Received-versus-expected sample totals of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub address: DeviceAddress,
    /// Total time spent streaming, in seconds.
    pub streamed_secs: f64,
    pub kinds: Vec<KindReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindReport {
    pub kind: SensorKind,
    pub rate_hz: f64,
    pub received: u64,
    pub expected: u64,
}

impl KindReport {
    pub fn new(kind: SensorKind, rate_hz: f64, received: u64, streamed_secs: f64) -> Self {
        let expected = (rate_hz * streamed_secs).round().max(0.0) as u64;
        Self {
            kind,
            rate_hz,
            received,
            expected,
        }
    }

    /// Share of expected samples that arrived, if any were expected.
    pub fn ratio(&self) -> Option<f64> {
        (self.expected > 0).then(|| self.received as f64 / self.expected as f64)
    }
}

impl SampleReport {
    pub fn total_received(&self) -> u64 {
        self.kinds.iter().map(|k| k.received).sum()
    }
}

impl fmt::Display for SampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} streamed {:.1}s", self.address, self.streamed_secs)?;
        for kind in &self.kinds {
            write!(f, "; {}: {}/{}", kind.kind, kind.received, kind.expected)?;
            if let Some(ratio) = kind.ratio() {
                write!(f, " ({:.1}%)", ratio * 100.0)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_follows_rate_and_duration() {
        let kind = KindReport::new(SensorKind::Accelerometer, 25.0, 120, 5.0);

        assert_eq!(kind.expected, 125);
        assert_eq!(kind.ratio(), Some(0.96));
    }

    #[test]
    fn no_ratio_without_streaming() {
        let kind = KindReport::new(SensorKind::Temperature, 1.0, 0, 0.0);
        assert_eq!(kind.ratio(), None);

        let report = SampleReport {
            address: "EC:47:49:CF:53:C4".parse().unwrap(),
            streamed_secs: 0.0,
            kinds: vec![kind],
        };
        assert_eq!(
            report.to_string(),
            "EC:47:49:CF:53:C4 streamed 0.0s; Temperature: 0/0"
        );
    }
}
