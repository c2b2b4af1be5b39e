// Feed log lines through the normalizer and summarise what parsed.
// Pass a log file as the first argument, or run without one to use the
// built-in sample lines.

use std::collections::HashMap;
use std::env;
use std::fs;

use siem_common::parsers::Normalizer;

const SAMPLE_LINES: &[&str] = &[
    "Sep  2 15:21:30 server01 sshd[1234]: Failed password for admin from 42.236.12.235 port 22 ssh2",
    "Sep  2 15:21:31 server01 sshd[1234]: Failed password for root from 42.236.12.235 port 22 ssh2",
    r#"42.236.12.235 - - [02/Sep/2025:15:21:32 +0000] "POST /login HTTP/1.1" 401 234 "-" "Mozilla/5.0""#,
    r#"203.0.113.9 - - [02/Sep/2025:15:21:33 +0000] "GET /api/users?id=1%27%20OR%20%271%27%3D%271 HTTP/1.1" 200 0 "-" "curl/7.68.0""#,
    "action=DENY src=203.0.113.7 dst=172.20.0.2 dport=23 proto=telnet",
    "action=ALLOW src=198.51.100.4 dst=172.20.0.2 dport=443 proto=tcp",
    r#"{"timestamp":"2025-09-02T15:21:34Z","event":{"category":["file"]},"source":{"ip":"198.51.100.9"},"user":{"name":"bob"},"file":{"name":"report.locked"},"message":"rename"}"#,
    "this line matches no parser and is dropped",
];

fn main() {
    println!("Normalizer demo\n");
    println!("{}", "=".repeat(60));

    let content = env::args()
        .nth(1)
        .map(|path| fs::read_to_string(&path).expect("failed to read log file"));
    let lines: Vec<&str> = match &content {
        Some(content) => content.lines().collect(),
        None => SAMPLE_LINES.to_vec(),
    };

    let normalizer = Normalizer::bare();
    let mut parsed = 0;
    let mut dropped = 0;
    let mut by_category: HashMap<String, usize> = HashMap::new();

    for (i, line) in lines.iter().enumerate() {
        match normalizer.normalize(line) {
            Some(event) => {
                parsed += 1;
                for tag in &event.category {
                    *by_category.entry(tag.clone()).or_insert(0) += 1;
                }
                println!(
                    "line {:>3}: [{}] src={} outcome={}",
                    i + 1,
                    event.category.join(","),
                    event.source_ip.as_deref().unwrap_or("-"),
                    event.outcome.as_deref().unwrap_or("-"),
                );
            }
            None => {
                dropped += 1;
                println!("line {:>3}: no parser matched", i + 1);
            }
        }
    }

    println!("{}", "=".repeat(60));
    println!("parsed {parsed}/{} lines, dropped {dropped}", lines.len());
    for (tag, count) in &by_category {
        println!("   {tag}: {count}");
    }
}
