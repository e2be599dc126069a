//! L2CAP signaling commands
//!
//! A signaling PDU packs one or more commands, each
//! `code (u8), identifier (u8), length (u16), data`. [`SignalingMessage`]
//! is the typed `data`; [`SignalCommand`] adds the identifier.

use super::constants::*;
use super::options::{decode_options, encode_options, ConfigOption};
use crate::error::CodecError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Identifier pairing a request with its response
pub type SignalId = u8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    CommandReject {
        reason: u16,
        data: Vec<u8>,
    },
    ConnectionRequest {
        psm: u16,
        source_cid: u16,
    },
    ConnectionResponse {
        destination_cid: u16,
        source_cid: u16,
        result: u16,
        status: u16,
    },
    ConfigurationRequest {
        destination_cid: u16,
        flags: u16,
        options: Vec<ConfigOption>,
    },
    ConfigurationResponse {
        source_cid: u16,
        flags: u16,
        result: u16,
        options: Vec<ConfigOption>,
    },
    DisconnectionRequest {
        destination_cid: u16,
        source_cid: u16,
    },
    DisconnectionResponse {
        destination_cid: u16,
        source_cid: u16,
    },
    EchoRequest {
        data: Vec<u8>,
    },
    EchoResponse {
        data: Vec<u8>,
    },
    InformationRequest {
        info_type: u16,
    },
    InformationResponse {
        info_type: u16,
        result: u16,
        data: Vec<u8>,
    },
    CreateChannelRequest {
        psm: u16,
        source_cid: u16,
        controller_id: u8,
    },
    CreateChannelResponse {
        destination_cid: u16,
        source_cid: u16,
        result: u16,
        status: u16,
    },
    MoveChannelRequest {
        initiator_cid: u16,
        dest_controller_id: u8,
    },
    MoveChannelResponse {
        initiator_cid: u16,
        result: u16,
    },
    ConnectionParameterUpdateRequest {
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    ConnectionParameterUpdateResponse {
        result: u16,
    },
    LeCreditBasedConnectionRequest {
        le_psm: u16,
        source_cid: u16,
        mtu: u16,
        mps: u16,
        initial_credits: u16,
    },
    LeCreditBasedConnectionResponse {
        destination_cid: u16,
        mtu: u16,
        mps: u16,
        initial_credits: u16,
        result: u16,
    },
    LeFlowControlCredit {
        cid: u16,
        credits: u16,
    },
    /// A command this side does not decode
    Unknown {
        code: u8,
        data: Vec<u8>,
    },
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl SignalingMessage {
    /// Command code
    pub fn code(&self) -> u8 {
        match self {
            Self::CommandReject { .. } => L2CAP_COMMAND_REJECT,
            Self::ConnectionRequest { .. } => L2CAP_CONNECTION_REQUEST,
            Self::ConnectionResponse { .. } => L2CAP_CONNECTION_RESPONSE,
            Self::ConfigurationRequest { .. } => L2CAP_CONFIGURE_REQUEST,
            Self::ConfigurationResponse { .. } => L2CAP_CONFIGURE_RESPONSE,
            Self::DisconnectionRequest { .. } => L2CAP_DISCONNECTION_REQUEST,
            Self::DisconnectionResponse { .. } => L2CAP_DISCONNECTION_RESPONSE,
            Self::EchoRequest { .. } => L2CAP_ECHO_REQUEST,
            Self::EchoResponse { .. } => L2CAP_ECHO_RESPONSE,
            Self::InformationRequest { .. } => L2CAP_INFORMATION_REQUEST,
            Self::InformationResponse { .. } => L2CAP_INFORMATION_RESPONSE,
            Self::CreateChannelRequest { .. } => L2CAP_CREATE_CHANNEL_REQUEST,
            Self::CreateChannelResponse { .. } => L2CAP_CREATE_CHANNEL_RESPONSE,
            Self::MoveChannelRequest { .. } => L2CAP_MOVE_CHANNEL_REQUEST,
            Self::MoveChannelResponse { .. } => L2CAP_MOVE_CHANNEL_RESPONSE,
            Self::ConnectionParameterUpdateRequest { .. } => {
                L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST
            }
            Self::ConnectionParameterUpdateResponse { .. } => {
                L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE
            }
            Self::LeCreditBasedConnectionRequest { .. } => L2CAP_LE_CREDIT_BASED_CONNECTION_REQUEST,
            Self::LeCreditBasedConnectionResponse { .. } => {
                L2CAP_LE_CREDIT_BASED_CONNECTION_RESPONSE
            }
            Self::LeFlowControlCredit { .. } => L2CAP_LE_FLOW_CONTROL_CREDIT,
            Self::Unknown { code, .. } => *code,
        }
    }

    /// Command data, without the four byte command header
    pub fn encode_params(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::CommandReject { reason, data } => {
                put16(&mut out, *reason);
                out.extend_from_slice(data);
            }
            Self::ConnectionRequest { psm, source_cid } => {
                put16(&mut out, *psm);
                put16(&mut out, *source_cid);
            }
            Self::ConnectionResponse {
                destination_cid,
                source_cid,
                result,
                status,
            }
            | Self::CreateChannelResponse {
                destination_cid,
                source_cid,
                result,
                status,
            } => {
                put16(&mut out, *destination_cid);
                put16(&mut out, *source_cid);
                put16(&mut out, *result);
                put16(&mut out, *status);
            }
            Self::ConfigurationRequest {
                destination_cid,
                flags,
                options,
            } => {
                put16(&mut out, *destination_cid);
                put16(&mut out, *flags);
                out.extend_from_slice(&encode_options(options));
            }
            Self::ConfigurationResponse {
                source_cid,
                flags,
                result,
                options,
            } => {
                put16(&mut out, *source_cid);
                put16(&mut out, *flags);
                put16(&mut out, *result);
                out.extend_from_slice(&encode_options(options));
            }
            Self::DisconnectionRequest {
                destination_cid,
                source_cid,
            }
            | Self::DisconnectionResponse {
                destination_cid,
                source_cid,
            } => {
                put16(&mut out, *destination_cid);
                put16(&mut out, *source_cid);
            }
            Self::EchoRequest { data } | Self::EchoResponse { data } => {
                out.extend_from_slice(data)
            }
            Self::InformationRequest { info_type } => put16(&mut out, *info_type),
            Self::InformationResponse {
                info_type,
                result,
                data,
            } => {
                put16(&mut out, *info_type);
                put16(&mut out, *result);
                out.extend_from_slice(data);
            }
            Self::CreateChannelRequest {
                psm,
                source_cid,
                controller_id,
            } => {
                put16(&mut out, *psm);
                put16(&mut out, *source_cid);
                out.push(*controller_id);
            }
            Self::MoveChannelRequest {
                initiator_cid,
                dest_controller_id,
            } => {
                put16(&mut out, *initiator_cid);
                out.push(*dest_controller_id);
            }
            Self::MoveChannelResponse {
                initiator_cid,
                result,
            } => {
                put16(&mut out, *initiator_cid);
                put16(&mut out, *result);
            }
            Self::ConnectionParameterUpdateRequest {
                interval_min,
                interval_max,
                latency,
                timeout,
            } => {
                put16(&mut out, *interval_min);
                put16(&mut out, *interval_max);
                put16(&mut out, *latency);
                put16(&mut out, *timeout);
            }
            Self::ConnectionParameterUpdateResponse { result } => put16(&mut out, *result),
            Self::LeCreditBasedConnectionRequest {
                le_psm,
                source_cid,
                mtu,
                mps,
                initial_credits,
            } => {
                put16(&mut out, *le_psm);
                put16(&mut out, *source_cid);
                put16(&mut out, *mtu);
                put16(&mut out, *mps);
                put16(&mut out, *initial_credits);
            }
            Self::LeCreditBasedConnectionResponse {
                destination_cid,
                mtu,
                mps,
                initial_credits,
                result,
            } => {
                put16(&mut out, *destination_cid);
                put16(&mut out, *mtu);
                put16(&mut out, *mps);
                put16(&mut out, *initial_credits);
                put16(&mut out, *result);
            }
            Self::LeFlowControlCredit { cid, credits } => {
                put16(&mut out, *cid);
                put16(&mut out, *credits);
            }
            Self::Unknown { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    /// Decode the data of a command with the given code
    pub fn decode(code: u8, data: &[u8]) -> Result<Self, CodecError> {
        let mut rdr = Cursor::new(data);
        let need = |n: usize| CodecError::check(data, n);

        Ok(match code {
            L2CAP_COMMAND_REJECT => {
                need(2)?;
                Self::CommandReject {
                    reason: rdr.read_u16::<LittleEndian>()?,
                    data: data[2..].to_vec(),
                }
            }
            L2CAP_CONNECTION_REQUEST => {
                need(4)?;
                Self::ConnectionRequest {
                    psm: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_CONNECTION_RESPONSE => {
                need(8)?;
                Self::ConnectionResponse {
                    destination_cid: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                    result: rdr.read_u16::<LittleEndian>()?,
                    status: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_CONFIGURE_REQUEST => {
                need(4)?;
                Self::ConfigurationRequest {
                    destination_cid: rdr.read_u16::<LittleEndian>()?,
                    flags: rdr.read_u16::<LittleEndian>()?,
                    options: decode_options(&data[4..])?,
                }
            }
            L2CAP_CONFIGURE_RESPONSE => {
                need(6)?;
                Self::ConfigurationResponse {
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                    flags: rdr.read_u16::<LittleEndian>()?,
                    result: rdr.read_u16::<LittleEndian>()?,
                    options: decode_options(&data[6..])?,
                }
            }
            L2CAP_DISCONNECTION_REQUEST => {
                need(4)?;
                Self::DisconnectionRequest {
                    destination_cid: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_DISCONNECTION_RESPONSE => {
                need(4)?;
                Self::DisconnectionResponse {
                    destination_cid: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_ECHO_REQUEST => Self::EchoRequest {
                data: data.to_vec(),
            },
            L2CAP_ECHO_RESPONSE => Self::EchoResponse {
                data: data.to_vec(),
            },
            L2CAP_INFORMATION_REQUEST => {
                need(2)?;
                Self::InformationRequest {
                    info_type: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_INFORMATION_RESPONSE => {
                need(4)?;
                Self::InformationResponse {
                    info_type: rdr.read_u16::<LittleEndian>()?,
                    result: rdr.read_u16::<LittleEndian>()?,
                    data: data[4..].to_vec(),
                }
            }
            L2CAP_CREATE_CHANNEL_REQUEST => {
                need(5)?;
                Self::CreateChannelRequest {
                    psm: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                    controller_id: rdr.read_u8()?,
                }
            }
            L2CAP_CREATE_CHANNEL_RESPONSE => {
                need(8)?;
                Self::CreateChannelResponse {
                    destination_cid: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                    result: rdr.read_u16::<LittleEndian>()?,
                    status: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_MOVE_CHANNEL_REQUEST => {
                need(3)?;
                Self::MoveChannelRequest {
                    initiator_cid: rdr.read_u16::<LittleEndian>()?,
                    dest_controller_id: rdr.read_u8()?,
                }
            }
            L2CAP_MOVE_CHANNEL_RESPONSE => {
                need(4)?;
                Self::MoveChannelResponse {
                    initiator_cid: rdr.read_u16::<LittleEndian>()?,
                    result: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST => {
                need(8)?;
                Self::ConnectionParameterUpdateRequest {
                    interval_min: rdr.read_u16::<LittleEndian>()?,
                    interval_max: rdr.read_u16::<LittleEndian>()?,
                    latency: rdr.read_u16::<LittleEndian>()?,
                    timeout: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE => {
                need(2)?;
                Self::ConnectionParameterUpdateResponse {
                    result: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_LE_CREDIT_BASED_CONNECTION_REQUEST => {
                need(10)?;
                Self::LeCreditBasedConnectionRequest {
                    le_psm: rdr.read_u16::<LittleEndian>()?,
                    source_cid: rdr.read_u16::<LittleEndian>()?,
                    mtu: rdr.read_u16::<LittleEndian>()?,
                    mps: rdr.read_u16::<LittleEndian>()?,
                    initial_credits: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_LE_CREDIT_BASED_CONNECTION_RESPONSE => {
                need(10)?;
                Self::LeCreditBasedConnectionResponse {
                    destination_cid: rdr.read_u16::<LittleEndian>()?,
                    mtu: rdr.read_u16::<LittleEndian>()?,
                    mps: rdr.read_u16::<LittleEndian>()?,
                    initial_credits: rdr.read_u16::<LittleEndian>()?,
                    result: rdr.read_u16::<LittleEndian>()?,
                }
            }
            L2CAP_LE_FLOW_CONTROL_CREDIT => {
                need(4)?;
                Self::LeFlowControlCredit {
                    cid: rdr.read_u16::<LittleEndian>()?,
                    credits: rdr.read_u16::<LittleEndian>()?,
                }
            }
            other => Self::Unknown {
                code: other,
                data: data.to_vec(),
            },
        })
    }

    /// Whether this message answers a request
    pub fn is_response(&self) -> bool {
        matches!(
            self.code(),
            L2CAP_COMMAND_REJECT
                | L2CAP_CONNECTION_RESPONSE
                | L2CAP_CONFIGURE_RESPONSE
                | L2CAP_DISCONNECTION_RESPONSE
                | L2CAP_ECHO_RESPONSE
                | L2CAP_INFORMATION_RESPONSE
                | L2CAP_CREATE_CHANNEL_RESPONSE
                | L2CAP_MOVE_CHANNEL_RESPONSE
                | L2CAP_MOVE_CHANNEL_CONFIRMATION_RESPONSE
                | L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE
                | L2CAP_LE_CREDIT_BASED_CONNECTION_RESPONSE
        )
    }
}

/// One command on the signaling channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalCommand {
    pub identifier: SignalId,
    pub message: SignalingMessage,
}

impl SignalCommand {
    pub fn new(identifier: SignalId, message: SignalingMessage) -> Self {
        Self {
            identifier,
            message,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let params = self.message.encode_params();
        let mut out = Vec::with_capacity(L2CAP_SIG_HEADER_SIZE + params.len());
        out.push(self.message.code());
        out.push(self.identifier);
        put16(&mut out, params.len() as u16);
        out.extend_from_slice(&params);
        out
    }

    /// Decode the command at the start of `data`, returning it and the
    /// number of bytes it occupied
    pub fn decode(data: &[u8]) -> Result<(Self, usize), CodecError> {
        CodecError::check(data, L2CAP_SIG_HEADER_SIZE)?;
        let code = data[0];
        let identifier = data[1];
        let len = u16::from_le_bytes([data[2], data[3]]) as usize;
        let body = &data[L2CAP_SIG_HEADER_SIZE..];
        CodecError::check(body, len)?;

        let message = SignalingMessage::decode(code, &body[..len])?;
        Ok((
            Self {
                identifier,
                message,
            },
            L2CAP_SIG_HEADER_SIZE + len,
        ))
    }

    /// Decode every command packed in one signaling PDU
    pub fn parse_all(data: &[u8]) -> Result<Vec<Self>, CodecError> {
        let mut commands = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (cmd, used) = Self::decode(&data[offset..])?;
            commands.push(cmd);
            offset += used;
        }
        Ok(commands)
    }
}
