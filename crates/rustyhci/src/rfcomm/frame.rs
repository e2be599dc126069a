//! RFCOMM frame and multiplexer message codecs
//!
//! Frames follow TS 07.10 basic mode as profiled by RFCOMM:
//! `address | control | length (1 or 2 bytes, EA) | [credits] | data | FCS`.
//! The FCS covers address and control for UIH frames and address, control
//! and length for all other frames.

use super::constants::*;
use super::RfcommError;
use crate::error::CodecError;

/// CRC-8 frame check sequence (reflected polynomial x^8 + x^2 + x + 1)
pub fn fcs(data: &[u8]) -> u8 {
    0xFF - crc(data)
}

fn crc(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x01 != 0 {
                (crc >> 1) ^ 0xE0
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// DLCI of `channel` on a session this side initiated
pub fn dlci(channel: u8) -> u8 {
    channel << 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Sabm,
    Ua,
    Dm,
    Disc,
    Uih,
}

impl FrameType {
    fn control(self) -> u8 {
        match self {
            FrameType::Sabm => RFCOMM_SABM,
            FrameType::Ua => RFCOMM_UA,
            FrameType::Dm => RFCOMM_DM,
            FrameType::Disc => RFCOMM_DISC,
            FrameType::Uih => RFCOMM_UIH,
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = CodecError;

    fn try_from(control: u8) -> Result<Self, Self::Error> {
        match control & !RFCOMM_PF {
            RFCOMM_SABM => Ok(FrameType::Sabm),
            RFCOMM_UA => Ok(FrameType::Ua),
            RFCOMM_DM => Ok(FrameType::Dm),
            RFCOMM_DISC => Ok(FrameType::Disc),
            RFCOMM_UIH => Ok(FrameType::Uih),
            other => Err(CodecError::InvalidValue {
                field: "rfcomm control",
                value: other as u32,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dlci: u8,
    /// Command/response bit of the address field
    pub cr: bool,
    pub frame_type: FrameType,
    pub poll: bool,
    /// Credits granted by a UIH frame with the P/F bit set
    pub credits: Option<u8>,
    pub data: Vec<u8>,
}

impl Frame {
    fn control(dlci: u8, cr: bool, frame_type: FrameType) -> Self {
        Self {
            dlci,
            cr,
            frame_type,
            poll: true,
            credits: None,
            data: Vec::new(),
        }
    }

    pub fn sabm(dlci: u8, cr: bool) -> Self {
        Self::control(dlci, cr, FrameType::Sabm)
    }

    pub fn ua(dlci: u8, cr: bool) -> Self {
        Self::control(dlci, cr, FrameType::Ua)
    }

    pub fn dm(dlci: u8, cr: bool) -> Self {
        Self::control(dlci, cr, FrameType::Dm)
    }

    pub fn disc(dlci: u8, cr: bool) -> Self {
        Self::control(dlci, cr, FrameType::Disc)
    }

    pub fn uih(dlci: u8, cr: bool, data: Vec<u8>) -> Self {
        Self {
            dlci,
            cr,
            frame_type: FrameType::Uih,
            poll: false,
            credits: None,
            data,
        }
    }

    /// UIH frame that grants `credits` and carries `data`
    pub fn credit(dlci: u8, cr: bool, credits: u8, data: Vec<u8>) -> Self {
        Self {
            poll: true,
            credits: Some(credits),
            ..Self::uih(dlci, cr, data)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.push((self.dlci << 2) | ((self.cr as u8) << 1) | RFCOMM_EA);
        let pf = if self.poll { RFCOMM_PF } else { 0 };
        out.push(self.frame_type.control() | pf);

        let len = self.data.len();
        if len <= 0x7F {
            out.push(((len as u8) << 1) | RFCOMM_EA);
        } else {
            out.push((len << 1) as u8);
            out.push((len >> 7) as u8);
        }

        let covered = if self.frame_type == FrameType::Uih {
            2
        } else {
            out.len()
        };
        let check = fcs(&out[..covered]);

        if let Some(credits) = self.credits {
            out.push(credits);
        }
        out.extend_from_slice(&self.data);
        out.push(check);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RfcommError> {
        CodecError::check(buf, 4)?;
        let address = buf[0];
        if address & RFCOMM_EA == 0 {
            return Err(CodecError::InvalidValue {
                field: "rfcomm address",
                value: address as u32,
            }
            .into());
        }
        let control = buf[1];
        let frame_type = FrameType::try_from(control)?;
        let poll = control & RFCOMM_PF != 0;

        let (len, mut pos) = if buf[2] & RFCOMM_EA != 0 {
            ((buf[2] >> 1) as usize, 3)
        } else {
            CodecError::check(buf, 5)?;
            (((buf[2] >> 1) as usize) | ((buf[3] as usize) << 7), 4)
        };
        let covered = if frame_type == FrameType::Uih { 2 } else { pos };

        let credits = if frame_type == FrameType::Uih && poll {
            CodecError::check(buf, pos + 1)?;
            pos += 1;
            Some(buf[pos - 1])
        } else {
            None
        };

        CodecError::check(buf, pos + len + 1)?;
        let mut check = buf[..covered].to_vec();
        check.push(buf[pos + len]);
        if crc(&check) != RFCOMM_FCS_GOOD {
            return Err(RfcommError::BadFcs);
        }

        Ok(Self {
            dlci: address >> 2,
            cr: address & RFCOMM_CR != 0,
            frame_type,
            poll,
            credits,
            data: buf[pos..pos + len].to_vec(),
        })
    }
}

/// DLC parameter negotiation (PN) values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamNegotiation {
    pub dlci: u8,
    /// Credit based flow control requested or accepted
    pub credit_flow: bool,
    pub priority: u8,
    pub max_frame_size: u16,
    pub credits: u8,
}

/// A multiplexer control message, carried in UIH frames on DLCI 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxMessage {
    Pn {
        command: bool,
        params: ParamNegotiation,
    },
    Msc {
        command: bool,
        dlci: u8,
        signals: u8,
    },
    Test {
        command: bool,
        data: Vec<u8>,
    },
    /// Non Supported Command response naming the rejected type byte
    Nsc {
        rejected: u8,
    },
    Other {
        kind: u8,
        command: bool,
        data: Vec<u8>,
    },
}

impl MuxMessage {
    pub fn is_command(&self) -> bool {
        match self {
            MuxMessage::Pn { command, .. }
            | MuxMessage::Msc { command, .. }
            | MuxMessage::Test { command, .. }
            | MuxMessage::Other { command, .. } => *command,
            MuxMessage::Nsc { .. } => false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (kind, command, body) = match self {
            MuxMessage::Pn { command, params } => {
                let cl = match (params.credit_flow, command) {
                    (false, _) => 0,
                    (true, true) => RFCOMM_CFC_REQUEST,
                    (true, false) => RFCOMM_CFC_ACCEPT,
                };
                let mut body = vec![params.dlci, cl, params.priority, 0];
                body.extend_from_slice(&params.max_frame_size.to_le_bytes());
                body.push(0);
                body.push(params.credits);
                (RFCOMM_MCC_PN, *command, body)
            }
            MuxMessage::Msc {
                command,
                dlci,
                signals,
            } => (
                RFCOMM_MCC_MSC,
                *command,
                vec![(dlci << 2) | RFCOMM_CR | RFCOMM_EA, signals | RFCOMM_EA],
            ),
            MuxMessage::Test { command, data } => (RFCOMM_MCC_TEST, *command, data.clone()),
            MuxMessage::Nsc { rejected } => (RFCOMM_MCC_NSC, false, vec![*rejected]),
            MuxMessage::Other {
                kind,
                command,
                data,
            } => (*kind, *command, data.clone()),
        };

        let mut out = vec![(kind << 2) | ((command as u8) << 1) | RFCOMM_EA];
        out.push(((body.len() as u8) << 1) | RFCOMM_EA);
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RfcommError> {
        CodecError::check(buf, 2)?;
        let kind = buf[0] >> 2;
        let command = buf[0] & RFCOMM_CR != 0;
        let len = (buf[1] >> 1) as usize;
        CodecError::check(buf, 2 + len)?;
        let body = &buf[2..2 + len];

        let msg = match kind {
            RFCOMM_MCC_PN => {
                CodecError::check(body, 8)?;
                MuxMessage::Pn {
                    command,
                    params: ParamNegotiation {
                        dlci: body[0] & 0x3F,
                        credit_flow: body[1] == RFCOMM_CFC_REQUEST
                            || body[1] == RFCOMM_CFC_ACCEPT,
                        priority: body[2] & 0x3F,
                        max_frame_size: u16::from_le_bytes([body[4], body[5]]),
                        credits: body[7] & 0x07,
                    },
                }
            }
            RFCOMM_MCC_MSC => {
                CodecError::check(body, 2)?;
                MuxMessage::Msc {
                    command,
                    dlci: body[0] >> 2,
                    signals: body[1],
                }
            }
            RFCOMM_MCC_TEST => MuxMessage::Test {
                command,
                data: body.to_vec(),
            },
            RFCOMM_MCC_NSC => {
                CodecError::check(body, 1)?;
                MuxMessage::Nsc { rejected: body[0] }
            }
            kind => MuxMessage::Other {
                kind,
                command,
                data: body.to_vec(),
            },
        };
        Ok(msg)
    }
}
