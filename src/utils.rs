use crate::base::{Error, Result};
use crate::types::{AngleQ6, Sample};
use log::trace;
use std::time::{SystemTime, UNIX_EPOCH};

/// Host time in nanoseconds since the Unix epoch.
pub fn host_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[inline]
fn set_degrees(sample: &mut Sample, degrees: f32) {
    let check_bit = sample.angle.0 & 1;
    sample.angle = AngleQ6(AngleQ6::from_degrees(degrees).0 & !1 | check_bit);
}

/// Puts a revolution in ascending angle order.
///
/// Samples without a return carry no trustworthy angle, so they are given
/// evenly spaced angles (`360 / N` apart) relative to their neighbours with
/// a return. The buffer is then rotated to start at the first place where
/// the angle falls back by more than 180 degrees. Timestamps stay at their
/// positions; only the measurements move.
///
/// Fails, leaving the buffer untouched, when it is empty or holds no sample
/// with a return.
pub fn ascend_scan_data(scan: &mut [Sample]) -> Result<()> {
    trace!("ascend_scan_data called with {} samples", scan.len());

    let first_valid = scan.iter().position(|s| s.distance.is_valid());
    let last_valid = scan.iter().rposition(|s| s.distance.is_valid());
    let (first_valid, last_valid) = match (first_valid, last_valid) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(Error::fail("no valid sample in scan")),
    };

    let count = scan.len();
    let increment = 360.0f32 / count as f32;

    for i in (0..first_valid).rev() {
        let expected = (scan[i + 1].angle.degrees() - increment).max(0.0);
        set_degrees(&mut scan[i], expected);
    }

    for i in last_valid + 1..count {
        let mut expected = scan[i - 1].angle.degrees() + increment;
        if expected > 360.0 {
            expected -= 360.0;
        }
        set_degrees(&mut scan[i], expected);
    }

    let front = scan[0].angle.degrees();
    for (i, sample) in scan.iter_mut().enumerate().skip(1) {
        if !sample.distance.is_valid() {
            let mut expected = front + i as f32 * increment;
            if expected > 360.0 {
                expected -= 360.0;
            }
            set_degrees(sample, expected);
        }
    }

    let zero_pos = scan
        .windows(2)
        .position(|w| w[0].angle.degrees() - w[1].angle.degrees() > 180.0)
        .map(|i| i + 1)
        .unwrap_or(0);
    trace!("Rotating scan to start at index {}", zero_pos);

    if zero_pos > 0 {
        let timestamps: Vec<u64> = scan.iter().map(|s| s.timestamp).collect();
        scan.rotate_left(zero_pos);
        for (sample, timestamp) in scan.iter_mut().zip(timestamps) {
            sample.timestamp = timestamp;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DistanceQ2;

    fn sample(degrees: f32, distance: u16, timestamp: u64) -> Sample {
        Sample {
            angle: AngleQ6::from_degrees(degrees),
            distance: DistanceQ2(distance),
            timestamp,
            ..Sample::default()
        }
    }

    fn degrees(scan: &[Sample]) -> Vec<f32> {
        scan.iter().map(|s| s.angle.degrees()).collect()
    }

    #[test]
    fn rotates_to_the_wrap_point() {
        let mut scan = vec![
            sample(180.0, 10, 0),
            sample(270.0, 10, 1),
            sample(0.0, 10, 2),
            sample(90.0, 10, 3),
        ];
        ascend_scan_data(&mut scan).unwrap();
        assert_eq!(degrees(&scan), vec![0.0, 90.0, 180.0, 270.0]);
        // measurements moved, times stayed
        let timestamps: Vec<u64> = scan.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![0, 1, 2, 3]);
        assert_eq!(scan[0].distance, DistanceQ2(10));
    }

    #[test]
    fn fills_angles_of_samples_without_return() {
        let mut scan = vec![
            sample(0.0, 0, 0),
            sample(90.0, 10, 0),
            sample(0.0, 0, 0),
            sample(270.0, 10, 0),
            sample(0.0, 0, 0),
        ];
        ascend_scan_data(&mut scan).unwrap();
        // increment 72: leading 90-72, then every gap is front + i*72
        assert_eq!(degrees(&scan), vec![18.0, 90.0, 162.0, 270.0, 306.0]);
        assert!(scan.iter().all(|s| s.angle.check_bit()));
    }

    #[test]
    fn leading_fill_clamps_at_zero() {
        let mut scan = vec![
            sample(300.0, 0, 0),
            sample(10.0, 10, 0),
            sample(100.0, 10, 0),
            sample(200.0, 10, 0),
        ];
        ascend_scan_data(&mut scan).unwrap();
        assert_eq!(scan[0].angle.degrees(), 0.0);
    }

    #[test]
    fn trailing_fill_wraps_past_full_circle() {
        let mut scan = vec![
            sample(100.0, 10, 0),
            sample(200.0, 10, 0),
            sample(330.0, 10, 0),
            sample(0.0, 0, 0),
        ];
        ascend_scan_data(&mut scan).unwrap();
        // front + 3*90 wraps to 10, which then starts the scan
        assert_eq!(degrees(&scan), vec![10.0, 100.0, 200.0, 330.0]);
    }

    #[test]
    fn is_idempotent_on_ordered_scans() {
        let mut scan: Vec<Sample> = (0..8)
            .map(|i| sample(((i * 45 + 200) % 360) as f32, 10, i))
            .collect();
        ascend_scan_data(&mut scan).unwrap();
        let once = scan.clone();
        ascend_scan_data(&mut scan).unwrap();
        assert_eq!(scan, once);
        assert!(degrees(&scan).windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn fails_without_any_return() {
        let mut scan = vec![sample(10.0, 0, 0), sample(20.0, 0, 1)];
        let before = scan.clone();
        assert!(matches!(
            ascend_scan_data(&mut scan),
            Err(Error::OperationFail { .. })
        ));
        assert_eq!(scan, before);

        let mut empty: Vec<Sample> = Vec::new();
        assert!(ascend_scan_data(&mut empty).is_err());
    }
}
