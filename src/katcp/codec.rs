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

use super::message::KatcpMessage;
use crate::error::TransportError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Frames a byte stream into [`KatcpMessage`]s, one per line, on top of
/// `tokio_util`'s `LinesCodec`.
#[derive(Debug, Default)]
pub struct KatcpCodec {
    lines: LinesCodec,
}

impl Decoder for KatcpCodec {
    type Item = KatcpMessage;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode(src) {
            Ok(Some(line)) => {
                if line.is_empty() {
                    return self.decode(src);
                }
                KatcpMessage::parse(&line).map(Some)
            }
            Ok(None) => Ok(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Err(TransportError::Protocol("line too long".to_owned()))
            }
            Err(LinesCodecError::Io(e)) => Err(TransportError::Protocol(e.to_string())),
        }
    }
}

impl Encoder<KatcpMessage> for KatcpCodec {
    type Error = TransportError;

    fn encode(&mut self, item: KatcpMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.lines
            .encode(item.to_line(), dst)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
