// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Packet model for the Gearman binary protocol.
//!
//! A packet is a magic (request or response), a type code and a list of
//! NUL-separated arguments. The argument layout is fixed per packet type,
//! so arguments are addressed by [`Field`] rather than by position.

use bytes::Bytes;

use crate::frame::FrameError;

/// Packet direction marker carried in the first four header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// `\0REQ` - sent by clients and workers
    Request,
    /// `\0RES` - sent by the job server
    Response,
}

impl Magic {
    pub const REQUEST_BYTES: [u8; 4] = *b"\0REQ";
    pub const RESPONSE_BYTES: [u8; 4] = *b"\0RES";

    pub fn as_bytes(self) -> [u8; 4] {
        match self {
            Magic::Request => Self::REQUEST_BYTES,
            Magic::Response => Self::RESPONSE_BYTES,
        }
    }
}

impl TryFrom<[u8; 4]> for Magic {
    type Error = FrameError;

    fn try_from(value: [u8; 4]) -> Result<Self, Self::Error> {
        match value {
            Self::REQUEST_BYTES => Ok(Magic::Request),
            Self::RESPONSE_BYTES => Ok(Magic::Response),
            other => Err(FrameError::InvalidMagic(other)),
        }
    }
}

/// Named packet arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    JobHandle,
    FunctionName,
    UniqueId,
    Data,
    ClientId,
    Timeout,
    Numerator,
    Denominator,
    ErrorCode,
    ErrorText,
    Option,
}

/// Packet types used on the worker side of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    EchoReq = 16,
    EchoRes = 17,
    Error = 19,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
}

impl PacketType {
    /// Argument layout, in wire order. The last argument absorbs any
    /// remaining bytes including embedded NULs.
    pub fn fields(self) -> &'static [Field] {
        use Field::*;
        match self {
            PacketType::ResetAbilities
            | PacketType::PreSleep
            | PacketType::Noop
            | PacketType::GrabJob
            | PacketType::NoJob
            | PacketType::AllYours
            | PacketType::GrabJobUniq => &[],
            PacketType::CanDo | PacketType::CantDo => &[FunctionName],
            PacketType::CanDoTimeout => &[FunctionName, Timeout],
            PacketType::SubmitJob => &[FunctionName, UniqueId, Data],
            PacketType::JobCreated | PacketType::WorkFail => &[JobHandle],
            PacketType::JobAssign => &[JobHandle, FunctionName, Data],
            PacketType::JobAssignUniq => &[JobHandle, FunctionName, UniqueId, Data],
            PacketType::WorkStatus => &[JobHandle, Numerator, Denominator],
            PacketType::WorkComplete
            | PacketType::WorkException
            | PacketType::WorkData
            | PacketType::WorkWarning => &[JobHandle, Data],
            PacketType::EchoReq | PacketType::EchoRes => &[Data],
            PacketType::Error => &[ErrorCode, ErrorText],
            PacketType::SetClientId => &[ClientId],
            PacketType::OptionReq | PacketType::OptionRes => &[Option],
        }
    }

    pub fn arg_count(self) -> usize {
        self.fields().len()
    }
}

impl TryFrom<u32> for PacketType {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, <Self as TryFrom<u32>>::Error> {
        let kind = match value {
            1 => PacketType::CanDo,
            2 => PacketType::CantDo,
            3 => PacketType::ResetAbilities,
            4 => PacketType::PreSleep,
            6 => PacketType::Noop,
            7 => PacketType::SubmitJob,
            8 => PacketType::JobCreated,
            9 => PacketType::GrabJob,
            10 => PacketType::NoJob,
            11 => PacketType::JobAssign,
            12 => PacketType::WorkStatus,
            13 => PacketType::WorkComplete,
            14 => PacketType::WorkFail,
            16 => PacketType::EchoReq,
            17 => PacketType::EchoRes,
            19 => PacketType::Error,
            22 => PacketType::SetClientId,
            23 => PacketType::CanDoTimeout,
            24 => PacketType::AllYours,
            25 => PacketType::WorkException,
            26 => PacketType::OptionReq,
            27 => PacketType::OptionRes,
            28 => PacketType::WorkData,
            29 => PacketType::WorkWarning,
            30 => PacketType::GrabJobUniq,
            31 => PacketType::JobAssignUniq,
            _ => return Err(FrameError::InvalidPacketType(value)),
        };
        Ok(kind)
    }
}

/// A decoded protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub kind: PacketType,
    pub args: Vec<Bytes>,
}

impl Packet {
    pub fn new(magic: Magic, kind: PacketType, args: Vec<Bytes>) -> Self {
        Self { magic, kind, args }
    }

    /// Create a request packet
    pub fn request(kind: PacketType, args: Vec<Bytes>) -> Self {
        Self::new(Magic::Request, kind, args)
    }

    /// Create a response packet
    pub fn response(kind: PacketType, args: Vec<Bytes>) -> Self {
        Self::new(Magic::Response, kind, args)
    }

    /// Look up a named argument using the packet type's layout.
    pub fn field(&self, field: Field) -> Option<&Bytes> {
        let index = self.kind.fields().iter().position(|f| *f == field)?;
        self.args.get(index)
    }

    /// Named argument interpreted as UTF-8, lossy.
    pub fn field_str(&self, field: Field) -> Option<String> {
        self.field(field)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    // ========== Worker requests ==========

    pub fn can_do(function: &str) -> Self {
        Self::request(PacketType::CanDo, vec![Bytes::copy_from_slice(function.as_bytes())])
    }

    /// CAN_DO_TIMEOUT carries the timeout in whole seconds as decimal text.
    pub fn can_do_timeout(function: &str, timeout_secs: u64) -> Self {
        Self::request(
            PacketType::CanDoTimeout,
            vec![
                Bytes::copy_from_slice(function.as_bytes()),
                Bytes::from(timeout_secs.to_string()),
            ],
        )
    }

    pub fn cant_do(function: &str) -> Self {
        Self::request(PacketType::CantDo, vec![Bytes::copy_from_slice(function.as_bytes())])
    }

    pub fn reset_abilities() -> Self {
        Self::request(PacketType::ResetAbilities, Vec::new())
    }

    pub fn grab_job() -> Self {
        Self::request(PacketType::GrabJob, Vec::new())
    }

    pub fn grab_job_uniq() -> Self {
        Self::request(PacketType::GrabJobUniq, Vec::new())
    }

    pub fn pre_sleep() -> Self {
        Self::request(PacketType::PreSleep, Vec::new())
    }

    pub fn set_client_id(id: &str) -> Self {
        Self::request(PacketType::SetClientId, vec![Bytes::copy_from_slice(id.as_bytes())])
    }

    pub fn echo_req(data: impl Into<Bytes>) -> Self {
        Self::request(PacketType::EchoReq, vec![data.into()])
    }

    pub fn option_req(option: &str) -> Self {
        Self::request(PacketType::OptionReq, vec![Bytes::copy_from_slice(option.as_bytes())])
    }

    // ========== Job results ==========

    pub fn work_complete(handle: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self::request(PacketType::WorkComplete, vec![handle.into(), data.into()])
    }

    pub fn work_fail(handle: impl Into<Bytes>) -> Self {
        Self::request(PacketType::WorkFail, vec![handle.into()])
    }

    pub fn work_exception(handle: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self::request(PacketType::WorkException, vec![handle.into(), data.into()])
    }

    pub fn work_data(handle: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self::request(PacketType::WorkData, vec![handle.into(), data.into()])
    }

    pub fn work_warning(handle: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self::request(PacketType::WorkWarning, vec![handle.into(), data.into()])
    }

    pub fn work_status(handle: impl Into<Bytes>, numerator: u64, denominator: u64) -> Self {
        Self::request(
            PacketType::WorkStatus,
            vec![
                handle.into(),
                Bytes::from(numerator.to_string()),
                Bytes::from(denominator.to_string()),
            ],
        )
    }
}
