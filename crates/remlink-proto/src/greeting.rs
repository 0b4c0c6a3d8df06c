//! Greeting frame options
//!
//! A greeting is a [`MessageType::Greeting`] byte followed by a sequence of
//! `(type: u8, length: u8, value)` options. Unknown option types are skipped
//! so that newer peers can add options without breaking older ones.

use crate::{MessageType, ProtocolError};
use bytes::{Buf, BufMut, Bytes};

/// The only protocol version this implementation speaks
pub const PROTOCOL_VERSION: u8 = 0;

/// Option type: protocol version, first value byte is the version number
pub const OPTION_VERSION: u8 = 0;

/// Option type: one SASL mechanism name
pub const OPTION_SASL_MECH: u8 = 1;

/// Option type: the sender's endpoint name
pub const OPTION_ENDPOINT_NAME: u8 = 2;

/// One decoded greeting option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetingOption {
    /// Peer protocol version
    Version(u8),
    /// Offered mechanism name
    SaslMechanism(String),
    /// Peer endpoint name
    EndpointName(String),
    /// Option this implementation does not understand
    Unknown {
        /// Option type byte
        option_type: u8,
        /// Number of value bytes that were skipped
        length: u8,
    },
}

/// Parsed greeting contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Greeting {
    /// Peer protocol version, if the peer announced one
    pub version: Option<u8>,
    /// Offered mechanisms in the sender's order of preference
    pub mechanisms: Vec<String>,
    /// Peer endpoint name
    pub endpoint_name: Option<String>,
    /// Number of unknown options that were skipped
    pub skipped_options: usize,
}

impl Greeting {
    /// Create a greeting announcing the supported protocol version
    pub fn new() -> Self {
        Self {
            version: Some(PROTOCOL_VERSION),
            ..Default::default()
        }
    }

    /// Add an offered mechanism
    pub fn with_mechanism(mut self, name: impl Into<String>) -> Self {
        self.mechanisms.push(name.into());
        self
    }

    /// Set the endpoint name
    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = Some(name.into());
        self
    }

    /// Decode a full greeting message, including its leading type byte
    pub fn decode(message: Bytes) -> Result<Self, ProtocolError> {
        let (message_type, body) = MessageType::split(message)?;
        if message_type != MessageType::Greeting {
            return Err(ProtocolError::UnexpectedMessage {
                expected: MessageType::Greeting.name(),
                actual: message_type.name(),
            });
        }
        Self::parse(body)
    }

    /// Parse the options that follow the greeting type byte
    pub fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut greeting = Self::default();
        while body.has_remaining() {
            match next_option(&mut body)? {
                GreetingOption::Version(version) => greeting.version = Some(version),
                GreetingOption::SaslMechanism(name) => greeting.mechanisms.push(name),
                GreetingOption::EndpointName(name) => greeting.endpoint_name = Some(name),
                GreetingOption::Unknown { .. } => greeting.skipped_options += 1,
            }
        }
        Ok(greeting)
    }

    /// Encode the greeting, type byte first
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        buf.put_u8(MessageType::Greeting.code());
        if let Some(version) = self.version {
            buf.put_u8(OPTION_VERSION);
            buf.put_u8(1);
            buf.put_u8(version);
        }
        for name in &self.mechanisms {
            put_option(buf, OPTION_SASL_MECH, name.as_bytes())?;
        }
        if let Some(name) = &self.endpoint_name {
            put_option(buf, OPTION_ENDPOINT_NAME, name.as_bytes())?;
        }
        Ok(())
    }
}

/// Write one raw option triple
pub fn put_option<B: BufMut>(buf: &mut B, option_type: u8, value: &[u8]) -> Result<(), ProtocolError> {
    let length = u8::try_from(value.len()).map_err(|_| ProtocolError::OptionTooLong(value.len()))?;
    buf.put_u8(option_type);
    buf.put_u8(length);
    buf.put_slice(value);
    Ok(())
}

/// Read the next option triple, consuming exactly its declared length
pub fn next_option(buf: &mut Bytes) -> Result<GreetingOption, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::MalformedOption {
            option_type: buf.chunk().first().copied().unwrap_or_default(),
            reason: "truncated option header".to_string(),
        });
    }
    let option_type = buf.get_u8();
    let length = buf.get_u8();
    let len = usize::from(length);
    if len > buf.remaining() {
        return Err(ProtocolError::MalformedOption {
            option_type,
            reason: format!("declares {} bytes but only {} remain", len, buf.remaining()),
        });
    }

    match option_type {
        OPTION_VERSION => {
            if len == 0 {
                return Err(ProtocolError::MalformedOption {
                    option_type,
                    reason: "version option has no value".to_string(),
                });
            }
            let version = buf.get_u8();
            // Trailing version bytes are not interpreted.
            buf.advance(len - 1);
            Ok(GreetingOption::Version(version))
        }
        OPTION_SASL_MECH => Ok(GreetingOption::SaslMechanism(take_string(buf, len, "mechanism name")?)),
        OPTION_ENDPOINT_NAME => Ok(GreetingOption::EndpointName(take_string(buf, len, "endpoint name")?)),
        _ => {
            buf.advance(len);
            Ok(GreetingOption::Unknown { option_type, length })
        }
    }
}

fn take_string(buf: &mut Bytes, len: usize, field: &'static str) -> Result<String, ProtocolError> {
    let value = buf.split_to(len);
    String::from_utf8(value.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}
