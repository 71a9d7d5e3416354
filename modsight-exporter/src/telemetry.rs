//! Self-telemetry about the exporter, served at `/metrics`.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::Duration;

use parking_lot::RwLock;

use modsight_engine::bus::BusStats;
use modsight_engine::error::ScrapeError;

/// Externally-visible outcome classes of a scrape request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestStatus {
    Ok,
    ErrorSocket,
    ErrorTimeout,
    ErrorParsingValue,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Ok => "OK",
            RequestStatus::ErrorSocket => "ERROR_SOCKET",
            RequestStatus::ErrorTimeout => "ERROR_TIMEOUT",
            RequestStatus::ErrorParsingValue => "ERROR_PARSING_VALUE",
        }
    }

    /// Classify a failed scrape for the status label.
    pub fn from_error(error: &ScrapeError) -> Self {
        match error {
            ScrapeError::Connect { .. } => RequestStatus::ErrorSocket,
            ScrapeError::Timeout { .. } => RequestStatus::ErrorTimeout,
            _ => RequestStatus::ErrorParsingValue,
        }
    }
}

/// Counters describing the exporter itself.
#[derive(Default)]
pub struct Telemetry {
    /// Requests by target and outcome.
    requests: RwLock<BTreeMap<(String, RequestStatus), u64>>,
    /// Total duration of successful requests per target.
    durations: RwLock<BTreeMap<String, f64>>,
}

impl Telemetry {
    /// Record the outcome of one scrape request.
    pub fn observe_request(&self, target: &str, status: RequestStatus, duration: Duration) {
        *self
            .requests
            .write()
            .entry((target.to_string(), status))
            .or_default() += 1;

        if status == RequestStatus::Ok {
            *self
                .durations
                .write()
                .entry(target.to_string())
                .or_default() += duration.as_secs_f64();
        }
    }

    /// Render self metrics plus the engine's bus statistics in the
    /// exposition format.
    pub fn render(&self, bus: &HashMap<String, BusStats>) -> String {
        let mut output = Vec::with_capacity(1024);

        let requests = self.requests.read();
        writeln!(
            output,
            "# HELP modbus_requests_total Number of modbus scrape requests by target and status."
        )
        .ok();
        writeln!(output, "# TYPE modbus_requests_total counter").ok();
        for ((target, status), count) in requests.iter() {
            writeln!(
                output,
                "modbus_requests_total{{status=\"{}\",target=\"{}\"}} {}",
                status.as_str(),
                target,
                count
            )
            .ok();
        }
        drop(requests);

        let durations = self.durations.read();
        writeln!(
            output,
            "# HELP modbus_request_duration_seconds_total Total duration of successful modbus requests by target."
        )
        .ok();
        writeln!(output, "# TYPE modbus_request_duration_seconds_total counter").ok();
        for (target, seconds) in durations.iter() {
            writeln!(
                output,
                "modbus_request_duration_seconds_total{{target=\"{}\"}} {}",
                target, seconds
            )
            .ok();
        }
        drop(durations);

        let mut targets: Vec<_> = bus.iter().collect();
        targets.sort_by_key(|(target, _)| target.as_str());

        writeln!(
            output,
            "# HELP modbus_serial_lock_waiters Requests currently waiting for a serial bus."
        )
        .ok();
        writeln!(output, "# TYPE modbus_serial_lock_waiters gauge").ok();
        for (target, stats) in &targets {
            writeln!(
                output,
                "modbus_serial_lock_waiters{{target=\"{}\"}} {}",
                target, stats.waiting
            )
            .ok();
        }

        writeln!(
            output,
            "# HELP modbus_serial_lock_wait_seconds_total Total time spent waiting for a serial bus by target."
        )
        .ok();
        writeln!(output, "# TYPE modbus_serial_lock_wait_seconds_total counter").ok();
        for (target, stats) in &targets {
            writeln!(
                output,
                "modbus_serial_lock_wait_seconds_total{{target=\"{}\"}} {}",
                target, stats.lock_wait_seconds
            )
            .ok();
        }

        writeln!(
            output,
            "# HELP modbus_serial_retries_total Scrape attempts repeated after transport failures by target."
        )
        .ok();
        writeln!(output, "# TYPE modbus_serial_retries_total counter").ok();
        for (target, stats) in &targets {
            writeln!(
                output,
                "modbus_serial_retries_total{{target=\"{}\"}} {}",
                target, stats.retries
            )
            .ok();
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let connect = ScrapeError::Connect {
            target: "t".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(
            RequestStatus::from_error(&connect),
            RequestStatus::ErrorSocket
        );

        let timeout = ScrapeError::Timeout {
            target: "t".to_string(),
        };
        assert_eq!(
            RequestStatus::from_error(&timeout),
            RequestStatus::ErrorTimeout
        );

        let decode = ScrapeError::MissingBitOffset {
            name: "m".to_string(),
        };
        assert_eq!(
            RequestStatus::from_error(&decode),
            RequestStatus::ErrorParsingValue
        );
    }

    #[test]
    fn renders_request_counters() {
        let telemetry = Telemetry::default();
        telemetry.observe_request("10.0.0.1:502", RequestStatus::Ok, Duration::from_millis(250));
        telemetry.observe_request("10.0.0.1:502", RequestStatus::Ok, Duration::from_millis(250));
        telemetry.observe_request(
            "10.0.0.1:502",
            RequestStatus::ErrorSocket,
            Duration::from_millis(10),
        );

        let text = telemetry.render(&HashMap::new());
        assert!(text.contains(
            "modbus_requests_total{status=\"OK\",target=\"10.0.0.1:502\"} 2"
        ));
        assert!(text.contains(
            "modbus_requests_total{status=\"ERROR_SOCKET\",target=\"10.0.0.1:502\"} 1"
        ));
        assert!(text.contains(
            "modbus_request_duration_seconds_total{target=\"10.0.0.1:502\"} 0.5"
        ));
    }

    #[test]
    fn failed_requests_do_not_add_duration() {
        let telemetry = Telemetry::default();
        telemetry.observe_request(
            "t",
            RequestStatus::ErrorTimeout,
            Duration::from_secs(5),
        );
        let text = telemetry.render(&HashMap::new());
        assert!(!text.contains("modbus_request_duration_seconds_total{target=\"t\"}"));
    }

    #[test]
    fn renders_bus_statistics() {
        let telemetry = Telemetry::default();
        let bus = HashMap::from([(
            "/dev/ttyUSB0".to_string(),
            BusStats {
                waiting: 2,
                lock_wait_seconds: 1.5,
                retries: 3,
            },
        )]);

        let text = telemetry.render(&bus);
        assert!(text.contains("modbus_serial_lock_waiters{target=\"/dev/ttyUSB0\"} 2"));
        assert!(text.contains(
            "modbus_serial_lock_wait_seconds_total{target=\"/dev/ttyUSB0\"} 1.5"
        ));
        assert!(text.contains("modbus_serial_retries_total{target=\"/dev/ttyUSB0\"} 3"));
    }
}
