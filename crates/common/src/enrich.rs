//! Best-effort event enrichment: GeoIP city lookup and reverse DNS.
//!
//! Failures here never fail normalization; a lookup that errors simply
//! leaves the fields absent.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use maxminddb::geoip2;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::Event;

pub struct Enricher {
    geoip: Option<maxminddb::Reader<Vec<u8>>>,
    reverse_dns: bool,
}

impl Enricher {
    /// No-op enricher for tests and parsers that must stay offline.
    pub fn disabled() -> Self {
        Enricher {
            geoip: None,
            reverse_dns: false,
        }
    }

    /// Enricher with an optional GeoLite2 City database. An unreadable
    /// database downgrades to no GeoIP rather than failing startup.
    pub fn new(geoip_db_path: Option<&Path>, reverse_dns: bool) -> Self {
        let geoip = geoip_db_path.and_then(|path| match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => Some(reader),
            Err(e) => {
                warn!("GeoIP database {path:?} unavailable, enrichment disabled: {e}");
                None
            }
        });
        Enricher { geoip, reverse_dns }
    }

    /// Attach `source.geo` / `source.hostname` to the event's raw document.
    pub fn apply(&self, event: &mut Event) {
        let Some(ip_str) = event.source_ip.as_deref() else {
            return;
        };
        let Ok(addr) = IpAddr::from_str(ip_str) else {
            return;
        };

        let geo = self.lookup_city(addr);
        let hostname = if self.reverse_dns {
            dns_lookup::lookup_addr(&addr).ok()
        } else {
            None
        };
        if geo.is_none() && hostname.is_none() {
            return;
        }

        let Value::Object(root) = &mut event.raw else {
            return;
        };
        let source = root
            .entry("source")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(source) = source {
            if let Some(geo) = geo {
                source.insert("geo".to_string(), geo);
            }
            if let Some(hostname) = hostname {
                source.insert("hostname".to_string(), Value::String(hostname));
            }
        }
    }

    fn lookup_city(&self, addr: IpAddr) -> Option<Value> {
        let reader = self.geoip.as_ref()?;
        let city: geoip2::City = match reader.lookup(addr) {
            Ok(city) => city,
            Err(e) => {
                debug!("GeoIP lookup failed for {addr}: {e}");
                return None;
            }
        };
        let english = |names: Option<std::collections::BTreeMap<&str, &str>>| {
            names.and_then(|n| n.get("en").map(|s| s.to_string()))
        };
        let country = english(city.country.and_then(|c| c.names));
        let region = english(
            city.subdivisions
                .and_then(|s| s.into_iter().next())
                .and_then(|s| s.names),
        );
        let city_name = english(city.city.and_then(|c| c.names));
        if country.is_none() && region.is_none() && city_name.is_none() {
            return None;
        }
        Some(json!({
            "country_name": country,
            "region_name": region,
            "city_name": city_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_disabled_enricher_is_a_noop() {
        let mut ev = Event::at(Utc::now());
        ev.source_ip = Some("8.8.8.8".to_string());
        let raw_before = ev.raw.clone();
        Enricher::disabled().apply(&mut ev);
        assert_eq!(ev.raw, raw_before);
    }

    #[test]
    fn test_missing_geo_db_downgrades() {
        let enricher = Enricher::new(Some(Path::new("/nonexistent/GeoLite2-City.mmdb")), false);
        let mut ev = Event::at(Utc::now());
        ev.source_ip = Some("8.8.8.8".to_string());
        enricher.apply(&mut ev);
        assert!(ev.raw.get("source").is_none());
    }
}
