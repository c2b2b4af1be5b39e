//! Web access log parser (Apache/Nginx combined-like).
//!
//! Format: `IP - - [timestamp] "METHOD /path HTTP/1.1" status size "referer" "user-agent"`

use chrono::{DateTime, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, digit1, space1},
    combinator::map_res,
    sequence::delimited,
    IResult,
};
use serde_json::json;

use crate::net::normalize_ip;
use crate::Event;

const METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

fn parse_ip(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '.' || c == ':')(input)
}

/// `[02/Sep/2025:15:21:30 +0000]` via chrono's `%d/%b/%Y:%H:%M:%S %z`.
fn parse_timestamp(input: &str) -> IResult<&str, DateTime<Utc>> {
    let (input, inner) = delimited(char('['), take_until("]"), char(']'))(input)?;
    match DateTime::parse_from_str(inner, "%d/%b/%Y:%H:%M:%S %z") {
        Ok(dt) => Ok((input, dt.with_timezone(&Utc))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::MapRes,
        ))),
    }
}

/// `"GET /path HTTP/1.1"` -> (method, path)
fn parse_request(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, _) = char('"')(input)?;
    let (input, method) = take_while1(|c: char| c.is_ascii_uppercase())(input)?;
    let (input, _) = space1(input)?;
    let (input, path) = take_until(" HTTP")(input)?;
    let (input, _) = space1(input)?;
    let (input, _version) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, (method, path)))
}

fn parse_status(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

/// Response size can be `-` for bodyless responses.
fn parse_size(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(digit1, |s: &str| s.parse::<u64>()),
        map_res(tag("-"), |_| Ok::<u64, std::num::ParseIntError>(0)),
    ))(input)
}

fn parse_quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_until("\""), char('"'))(input)
}

fn parse_combined(input: &str) -> IResult<&str, Event> {
    let (input, ip) = parse_ip(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("-")(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("-")(input)?;
    let (input, _) = space1(input)?;
    let (input, timestamp) = parse_timestamp(input)?;
    let (input, _) = space1(input)?;
    let (input, (method, path)) = parse_request(input)?;
    let (input, _) = space1(input)?;
    let (input, status) = parse_status(input)?;
    let (input, _) = space1(input)?;
    let (input, size) = parse_size(input)?;
    let (input, _) = space1(input)?;
    let (input, referer) = parse_quoted(input)?;
    let (input, _) = space1(input)?;
    let (input, user_agent) = parse_quoted(input)?;

    if !METHODS.contains(&method) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let outcome = if status / 100 == 2 { "success" } else { "failure" };
    let mut ev = Event::at(timestamp);
    ev.category = vec!["web".to_string()];
    ev.outcome = Some(outcome.to_string());
    ev.action = Some("request".to_string());
    ev.source_ip = normalize_ip(ip);
    ev.http_method = Some(method.to_string());
    ev.http_status = Some(status as i32);
    ev.url_path = Some(path.to_string());
    ev.user_agent = Some(user_agent.to_string());
    ev.raw = json!({
        "timestamp": timestamp.to_rfc3339(),
        "event": { "category": ["web"], "outcome": outcome, "action": "request" },
        "source": { "ip": ev.source_ip },
        "http": {
            "request": { "method": method, "body.bytes": size, "referrer": referer },
            "response": { "status_code": status },
        },
        "url": { "path": path },
        "user_agent": { "original": user_agent },
    });
    Ok((input, ev))
}

pub fn parse(line: &str) -> Option<Event> {
    match parse_combined(line) {
        Ok((_, mut ev)) => {
            ev.message = Some(line.trim().to_string());
            Some(ev)
        }
        Err(_) => None,
    }
}
