//! Status and self-test reports handed to the API layer.
//!
//! Everything here serializes to camelCase JSON.

use serde::Serialize;

use crate::config::Direction;
use crate::sap::DiscoveredStream;

/// State of one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatus {
    pub instance_id: u32,
    pub name: String,
    pub direction: Direction,
    pub running: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PtpStatus {
    /// The PTP daemon is up. Offset tracking is not available from the
    /// daemon, so this is the best signal there is.
    pub synced: bool,
    pub offset_ns: i64,
    pub grandmaster_clock_id: String,
    /// `running` or `not running`.
    pub daemon_state: String,
    pub hardware_timestamping: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub active: bool,
    pub transports: Vec<TransportStatus>,
    pub ptp: PtpStatus,
    pub discovered_streams: Vec<DiscoveredStream>,
    pub announcer_running: bool,
    pub receiver_running: bool,
}

impl Status {
    pub fn running_transports(&self, direction: Direction) -> usize {
        self.transports
            .iter()
            .filter(|t| t.direction == direction && t.running)
            .count()
    }
}

/// One named self-test check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub message: String,
}

impl TestResult {
    pub fn new(test_name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            passed,
            message: message.into(),
        }
    }

    /// Pick `ok` or `fail` as the message depending on `passed`.
    pub fn check(
        test_name: impl Into<String>,
        passed: bool,
        ok: impl Into<String>,
        fail: impl Into<String>,
    ) -> Self {
        let message = if passed { ok.into() } else { fail.into() };
        Self::new(test_name, passed, message)
    }
}

/// Ordered self-test results with totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    pub results: Vec<TestResult>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub all_passed: bool,
}

impl From<Vec<TestResult>> for SelfTestReport {
    fn from(results: Vec<TestResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            results,
            total,
            passed,
            failed: total - passed,
            all_passed: passed == total,
        }
    }
}

impl SelfTestReport {
    pub fn result(&self, test_name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.test_name == test_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_totals() {
        let report = SelfTestReport::from(vec![
            TestResult::new("a", true, "ok"),
            TestResult::new("b", false, "nope"),
            TestResult::new("c", true, "ok"),
        ]);
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.all_passed);
        assert_eq!(report.result("b").unwrap().message, "nope");
    }

    #[test]
    fn check_picks_message() {
        assert_eq!(TestResult::check("x", true, "yes", "no").message, "yes");
        assert_eq!(TestResult::check("x", false, "yes", "no").message, "no");
    }

    #[test]
    fn serializes_camel_case() {
        let status = TransportStatus {
            instance_id: 3,
            name: "Main".to_string(),
            direction: Direction::Receive,
            running: false,
            error: "Watchdog: pipeline stalled".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["instanceId"], 3);
        assert_eq!(json["direction"], "receive");
        assert_eq!(json["error"], "Watchdog: pipeline stalled");

        let report = SelfTestReport::from(vec![TestResult::new("sdp_generation", true, "ok")]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["allPassed"], true);
        assert_eq!(json["results"][0]["testName"], "sdp_generation");
    }
}
