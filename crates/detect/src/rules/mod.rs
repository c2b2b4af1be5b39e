// The detector rule sets.
// One module per rule family; `all_detectors` is the registry the runtime
// schedules.

pub mod admin_escalation;
pub mod allowed_blocked;
pub mod endpoint_scan;
pub mod failed_logins;
pub mod file_activity;
pub mod firewall_denied;
pub mod firewall_flood;
pub mod port_scan;
pub mod protocol_misuse;
pub mod sql_injection;
pub mod xss;

use siem_common::config::Settings;

use crate::Detector;

/// Every registered detector, ready for scheduling or a full scan.
pub fn all_detectors(settings: &Settings) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(failed_logins::FailedLoginDetector::from_settings(settings)),
        Box::new(firewall_denied::FirewallDeniedDetector::from_settings(settings)),
        Box::new(allowed_blocked::AllowedBlockedDetector::from_settings(settings)),
        Box::new(firewall_flood::FirewallFloodDetector::from_settings(settings)),
        Box::new(port_scan::PortScanDetector::from_settings(settings)),
        Box::new(endpoint_scan::EndpointScanDetector::from_settings(settings)),
        Box::new(sql_injection::SqlInjectionDetector::from_settings(settings)),
        Box::new(xss::XssDetector::from_settings(settings)),
        Box::new(admin_escalation::AdminEscalationDetector::from_settings(settings)),
        Box::new(file_activity::FileActivityDetector::from_settings(settings)),
        Box::new(protocol_misuse::ProtocolMisuseDetector::from_settings(settings)),
    ]
}
