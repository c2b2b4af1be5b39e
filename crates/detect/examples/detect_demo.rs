// Run the full detector registry over a synthetic attack stream and
// print the alerts each rule set produces. No database involved: lines
// go straight from the normalizer into the detectors.

use siem_common::config::Settings;
use siem_common::parsers::Normalizer;
use siem_detect::rules::all_detectors;

fn attack_stream() -> Vec<String> {
    let mut lines = Vec::new();

    // brute force: one account hammered from one address
    for _ in 0..6 {
        lines.push(
            "Sep  2 15:21:30 server01 sshd[1234]: Failed password for admin from 42.236.12.235 port 22 ssh2"
                .to_string(),
        );
    }
    // credential stuffing: one address, many accounts
    for user in ["u1", "u2", "u3", "u4", "u5"] {
        lines.push(format!(
            "Sep  2 15:21:40 server01 sshd[1234]: Failed password for {user} from 198.51.100.77 port 22 ssh2"
        ));
    }
    // percent-encoded SQL injection probe
    lines.push(
        r#"203.0.113.9 - - [02/Sep/2025:15:21:42 +0000] "GET /api/users?id=1%27%20OR%20%271%27%3D%271 HTTP/1.1" 200 0 "-" "curl/7.68.0""#
            .to_string(),
    );
    // port scan: twenty unique ports against one destination
    for port in 1000..1020 {
        lines.push(format!(
            "action=DENY src=9.9.9.9 dst=172.20.0.1 dport={port} proto=tcp"
        ));
    }
    // protocol misuse: repeated telnet attempts
    for _ in 0..3 {
        lines.push("action=DENY src=203.0.113.7 dst=172.20.0.2 dport=23 proto=telnet".to_string());
    }
    lines
}

fn main() {
    println!("Detector demo\n");
    println!("{}", "=".repeat(60));

    let normalizer = Normalizer::bare();
    let events: Vec<_> = attack_stream()
        .iter()
        .filter_map(|line| normalizer.normalize(line))
        .collect();
    println!("normalized {} events", events.len());

    let settings = Settings::with_defaults("postgres://unused");
    let mut total = 0;
    for mut detector in all_detectors(&settings) {
        detector.begin_scan();
        let alerts = detector.scan(&events);
        for alert in &alerts {
            total += 1;
            println!(
                "[{}] {} - user:{} ip:{} count:{} score:{:.1}",
                alert.severity,
                alert.rule,
                alert.user_name.as_deref().unwrap_or("-"),
                alert.source_ip.as_deref().unwrap_or("-"),
                alert.attempt_count,
                alert.score,
            );
            println!("   {}", alert.evidence);
        }
    }

    println!("{}", "=".repeat(60));
    println!("{total} alert(s) raised");
}
