pub(crate) mod param_add_outgoing_streams;
pub(crate) mod param_forward_tsn_supported;
pub(crate) mod param_header;
pub(crate) mod param_outgoing_reset_request;
pub(crate) mod param_reconfig_response;
pub(crate) mod param_state_cookie;
pub(crate) mod param_supported_extensions;
pub(crate) mod param_type;
pub(crate) mod param_unknown;

use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};

use param_add_outgoing_streams::ParamAddOutgoingStreams;
use param_forward_tsn_supported::ParamForwardTsnSupported;
use param_header::*;
use param_outgoing_reset_request::ParamOutgoingResetRequest;
use param_reconfig_response::ParamReconfigResponse;
use param_state_cookie::ParamStateCookie;
use param_supported_extensions::ParamSupportedExtensions;
use param_type::*;
use param_unknown::ParamUnknown;

pub(crate) use crate::error::{Error, Result};
pub(crate) use crate::util::*;

pub(crate) trait Param: fmt::Display + fmt::Debug {
    fn header(&self) -> ParamHeader;
    fn unmarshal(raw: &Bytes) -> Result<Self>
    where
        Self: Sized;
    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize>;
    fn value_length(&self) -> usize;
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    fn marshal(&self) -> Result<Bytes> {
        let capacity = PARAM_HEADER_LENGTH + self.value_length();
        let mut buf = BytesMut::with_capacity(capacity);
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// build_param delegates to the typed parameter for a raw TLV.
pub(crate) fn build_param(raw_param: &Bytes) -> Result<Box<dyn Param + Send + Sync>> {
    if raw_param.len() < PARAM_HEADER_LENGTH {
        return Err(Error::ErrParamHeaderTooShort);
    }
    let t = ParamType::from(u16::from_be_bytes([raw_param[0], raw_param[1]]));
    Ok(match t {
        ParamType::StateCookie => Box::new(ParamStateCookie::unmarshal(raw_param)?),
        ParamType::OutSsnResetReq => Box::new(ParamOutgoingResetRequest::unmarshal(raw_param)?),
        ParamType::AddOutStreamsReq => Box::new(ParamAddOutgoingStreams::unmarshal(raw_param)?),
        ParamType::ReconfigResp => Box::new(ParamReconfigResponse::unmarshal(raw_param)?),
        ParamType::ForwardTsnSupp => Box::new(ParamForwardTsnSupported::unmarshal(raw_param)?),
        ParamType::SupportedExt => Box::new(ParamSupportedExtensions::unmarshal(raw_param)?),
        _ => Box::new(ParamUnknown::unmarshal(raw_param)?),
    })
}
