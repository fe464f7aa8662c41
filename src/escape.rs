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

//! KATCP argument escaping, grounded on `utils/katcp.py`:
//! whitespace is escaped as `\_`, everything else follows the usual
//! backslash-escape conventions so a packed dict survives a trip through a
//! whitespace-delimited wire message.

use serde::{Serialize, de::DeserializeOwned};

/// Escape a single KATCP argument: only spaces need protecting, since they
/// are the field delimiter.
pub fn escape_string(s: &str) -> String {
    s.replace(' ', "\\_")
}

/// Reverse of [`escape_string`] plus the usual single- and two-character
/// backslash escapes a KATCP peer may emit (`\n`, `\t`, `\xNN`, ...).
pub fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('_') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('v') => out.push('\u{0b}'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) => out.push(byte as char),
                    Err(_) => {
                        out.push('\\');
                        out.push('x');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Serialize `value` to compact JSON and escape it for embedding as a single
/// KATCP argument.
pub fn pack_dict<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(escape_string(&json))
}

/// Inverse of [`pack_dict`].
pub fn unpack_dict<T: DeserializeOwned>(arg: &str) -> serde_json::Result<T> {
    let unescaped = unescape_string(arg);
    serde_json::from_str(&unescaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escape_round_trips_spaces() {
        let escaped = escape_string("hello world");
        assert_eq!(escaped, "hello\\_world");
        assert_eq!(unescape_string(&escaped), "hello world");
    }

    #[test]
    fn pack_and_unpack_dict_round_trip() {
        let value = json!({"ra": 10.5, "dec": -45.0, "source": "PSR J1713+0747"});
        let packed = pack_dict(&value).expect("pack");
        assert!(!packed.contains(' '));
        let unpacked: serde_json::Value = unpack_dict(&packed).expect("unpack");
        assert_eq!(unpacked, value);
    }

    #[test]
    fn unescape_handles_hex_escapes() {
        assert_eq!(unescape_string("\\x41\\x42"), "AB");
    }
}
