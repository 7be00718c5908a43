use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{fs, io};
use tracing::{debug, error};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// A single reading of the power source, in microwatts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PowerReading {
    pub value: u64,
    pub timestamp_ms: u64,
}

/// Periodically reads a power value (e.g. `/sys/class/hwmon/hwmonX/device/power1_average`) on a
/// background thread.
pub struct PowerSampler;

impl PowerSampler {
    pub fn start(path: impl Into<PathBuf>, interval: Duration) -> PowerMeasurement {
        let path = path.into();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::spawn(move || {
            let mut readings = vec![];
            loop {
                match read_power(&path) {
                    Ok(reading) => readings.push(reading),
                    Err(err) => {
                        error!(path = %path.display(), %err, "Unable to read power usage");
                        break;
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        match read_power(&path) {
                            Ok(reading) => readings.push(reading),
                            Err(err) => {
                                error!(path = %path.display(), %err, "Unable to read power usage")
                            }
                        }
                        break;
                    }
                }
            }
            debug!(readings = readings.len(), "Power sampling finished");
            readings
        });
        PowerMeasurement { stop_tx, handle }
    }
}

/// A running power measurement. Sampling continues until [`PowerMeasurement::stop`] is called.
pub struct PowerMeasurement {
    stop_tx: Sender<()>,
    handle: JoinHandle<Vec<PowerReading>>,
}

impl PowerMeasurement {
    pub fn stop(self) -> Vec<PowerReading> {
        // the sampling thread might already have exited after a read failure
        let _ = self.stop_tx.send(());
        match self.handle.join() {
            Ok(readings) => readings,
            Err(_) => {
                error!("Power sampling thread panicked");
                vec![]
            }
        }
    }
}

fn read_power(path: &Path) -> io::Result<PowerReading> {
    let content = fs::read_to_string(path)?;
    let value = content
        .trim()
        .parse()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(PowerReading {
        value,
        timestamp_ms: super::unix_time_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn start_stop_yields_a_reading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1500000").unwrap();
        let measurement = PowerSampler::start(file.path(), Duration::from_millis(50));
        let readings = measurement.stop();
        assert!(!readings.is_empty());
        assert!(readings.iter().all(|r| r.value == 1_500_000));
    }

    #[test]
    fn unreadable_source_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let measurement = PowerSampler::start(dir.path().join("missing"), DEFAULT_SAMPLE_INTERVAL);
        assert!(measurement.stop().is_empty());
    }
}
