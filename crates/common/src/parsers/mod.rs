// Log normalizer
// Structured parsers for the supported log formats, tried in a fixed order

pub mod firewall;
pub mod ssh;
pub mod structured;
pub mod web;

use tracing::debug;

use crate::enrich::Enricher;
use crate::Event;

pub use structured::RawRecord;

/// Try every line parser in order: firewall key=value, SSH auth failure,
/// web access, structured JSON. `None` means the line matched nothing and
/// the caller should drop it.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    firewall::parse(line)
        .or_else(|| ssh::parse(line))
        .or_else(|| web::parse(line))
        .or_else(|| structured::parse(line))
}

/// Normalizer front end: parse + best-effort enrichment.
pub struct Normalizer {
    enricher: Enricher,
}

impl Normalizer {
    pub fn new(enricher: Enricher) -> Self {
        Normalizer { enricher }
    }

    /// Parser-only normalizer, used by tests and by callers that do not
    /// want DNS/GeoIP lookups.
    pub fn bare() -> Self {
        Normalizer {
            enricher: Enricher::disabled(),
        }
    }

    /// Normalize one raw line into an Event, or `None` when no parser
    /// matched. Never fails: enrichment errors degrade to null fields.
    pub fn normalize(&self, line: &str) -> Option<Event> {
        let mut event = match parse_line(line) {
            Some(ev) => ev,
            None => {
                debug!("line matched no parser: {line:?}");
                return None;
            }
        };
        self.enricher.apply(&mut event);
        Some(event)
    }

    /// Normalize a structured push payload. Unlike the line path this
    /// reports why the record was rejected, for the ingest response body.
    pub fn normalize_record(
        &self,
        value: serde_json::Value,
    ) -> Result<Event, crate::SiemError> {
        let mut event = structured::from_value(value)?;
        self.enricher.apply(&mut event);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_order_firewall_first() {
        // A key=value line that also contains an IP must hit the firewall
        // parser, not fall through to the web parser.
        let ev = parse_line("action=DENY src=42.1.1.1 dst=10.0.0.5 dport=22 proto=tcp").unwrap();
        assert_eq!(ev.category, vec!["firewall"]);
    }

    #[test]
    fn test_unparseable_line_is_none() {
        assert!(parse_line("completely freeform text with no structure").is_none());
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn test_every_parsed_event_has_category_and_timestamp() {
        let lines = [
            "action=ALLOW src=42.1.1.1 dst=10.0.0.5 dport=443 proto=tcp",
            "Sep  2 15:21:30 server01 sshd[1234]: Failed password for admin from 42.236.12.235 port 22 ssh2",
            r#"42.236.12.235 - - [02/Sep/2025:15:21:30 +0000] "POST /login HTTP/1.1" 401 234 "-" "Mozilla/5.0""#,
            r#"{"timestamp":"2025-09-02T15:21:30Z","event":{"category":["file"],"outcome":"success"},"source":{"ip":"1.2.3.4"},"message":"renamed"}"#,
        ];
        for line in lines {
            let ev = parse_line(line).unwrap_or_else(|| panic!("no parser for: {line}"));
            assert!(!ev.category.is_empty(), "no category for: {line}");
        }
    }
}
