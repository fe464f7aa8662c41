/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The wire format: `?verb args...` requests, `!verb ok|fail
//! args...` replies, `#verb args...` informs, one message per line.

use crate::error::TransportError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Invalid,
    Fail,
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Invalid => "invalid",
            ReplyStatus::Fail => "fail",
        };
        write!(f, "{s}")
    }
}

impl ReplyStatus {
    fn parse(s: &str) -> Result<Self, TransportError> {
        match s {
            "ok" => Ok(ReplyStatus::Ok),
            "invalid" => Ok(ReplyStatus::Invalid),
            "fail" => Ok(ReplyStatus::Fail),
            other => Err(TransportError::Protocol(format!(
                "unknown reply status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KatcpMessage {
    Request {
        name: String,
        args: Vec<String>,
    },
    Reply {
        name: String,
        status: ReplyStatus,
        args: Vec<String>,
    },
    Inform {
        name: String,
        args: Vec<String>,
    },
}

impl KatcpMessage {
    pub fn request(name: impl Into<String>, args: Vec<String>) -> Self {
        KatcpMessage::Request {
            name: name.into(),
            args,
        }
    }

    pub fn ok_reply(name: impl Into<String>, args: Vec<String>) -> Self {
        KatcpMessage::Reply {
            name: name.into(),
            status: ReplyStatus::Ok,
            args,
        }
    }

    pub fn fail_reply(name: impl Into<String>, reason: impl Into<String>) -> Self {
        KatcpMessage::Reply {
            name: name.into(),
            status: ReplyStatus::Fail,
            args: vec![reason.into()],
        }
    }

    pub fn inform(name: impl Into<String>, args: Vec<String>) -> Self {
        KatcpMessage::Inform {
            name: name.into(),
            args,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            KatcpMessage::Request { name, .. }
            | KatcpMessage::Reply { name, .. }
            | KatcpMessage::Inform { name, .. } => name,
        }
    }

    /// Parse a single line (without trailing `\n`).
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let line = line.trim_end_matches('\r');
        let mut parts = line.split(' ');
        let head = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TransportError::Protocol("empty katcp line".to_owned()))?;
        let args: Vec<String> = parts
            .filter(|s| !s.is_empty())
            .map(crate::escape::unescape_string)
            .collect();

        let (marker, name) = head.split_at(1);
        match marker {
            "?" => Ok(KatcpMessage::Request {
                name: name.to_owned(),
                args,
            }),
            "#" => Ok(KatcpMessage::Inform {
                name: name.to_owned(),
                args,
            }),
            "!" => {
                let mut args = args;
                if args.is_empty() {
                    return Err(TransportError::Protocol(format!(
                        "reply '{line}' missing status"
                    )));
                }
                let status = ReplyStatus::parse(&args.remove(0))?;
                Ok(KatcpMessage::Reply {
                    name: name.to_owned(),
                    status,
                    args,
                })
            }
            other => Err(TransportError::Protocol(format!(
                "unknown message marker '{other}'"
            ))),
        }
    }

    pub fn to_line(&self) -> String {
        let mut out = String::new();
        let (marker, name, mut args) = match self {
            KatcpMessage::Request { name, args } => ("?", name.as_str(), args.clone()),
            KatcpMessage::Inform { name, args } => ("#", name.as_str(), args.clone()),
            KatcpMessage::Reply { name, status, args } => {
                let mut all = vec![status.to_string()];
                all.extend(args.iter().cloned());
                ("!", name.as_str(), all)
            }
        };
        out.push_str(marker);
        out.push_str(name);
        for arg in args.drain(..) {
            out.push(' ');
            out.push_str(&crate::escape::escape_string(&arg));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request() {
        let msg = KatcpMessage::parse("?configure eff\\_rec 20 3").unwrap();
        assert_eq!(
            msg,
            KatcpMessage::Request {
                name: "configure".to_owned(),
                args: vec!["eff rec".to_owned(), "20".to_owned(), "3".to_owned()],
            }
        );
    }

    #[test]
    fn round_trips_reply() {
        let msg = KatcpMessage::ok_reply("configure", vec!["ready".to_owned()]);
        let line = msg.to_line();
        assert_eq!(line, "!configure ok ready");
        assert_eq!(KatcpMessage::parse(&line).unwrap(), msg);
    }

    #[test]
    fn round_trips_inform_with_spaces() {
        let msg = KatcpMessage::inform("log", vec!["hello world".to_owned()]);
        let line = msg.to_line();
        assert_eq!(line, "#log hello\\_world");
        assert_eq!(KatcpMessage::parse(&line).unwrap(), msg);
    }
}
