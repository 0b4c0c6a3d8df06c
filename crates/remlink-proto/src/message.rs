//! Message type codes and dispatch

use crate::ProtocolError;
use bytes::{Buf, Bytes};

/// Leading type byte of every protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Server greeting carrying version and mechanism options
    Greeting = 0,
    /// Client's choice of authentication mechanism
    AuthRequest = 1,
    /// Mechanism challenge from the server
    AuthChallenge = 2,
    /// Mechanism response from the client
    AuthResponse = 3,
    /// Authentication finished successfully
    AuthComplete = 4,
    /// Authentication was refused
    AuthRejected = 5,
    /// Open a handle to a named service
    ServiceRequest = 16,
    /// Requested service does not exist
    ServiceNotFound = 17,
    /// Handle to the requested service is open
    ServiceClientOpened = 18,
    /// Service side closed a handle
    ClientAsyncClose = 19,
    /// Client side closed a handle
    ClientOnewayClose = 20,
    /// Invocation on an open handle
    Request = 32,
    /// Successful invocation result
    Reply = 33,
    /// Failed invocation result
    ReplyException = 34,
}

impl MessageType {
    /// Wire code of this type
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human readable name, used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::AuthRequest => "auth-request",
            Self::AuthChallenge => "auth-challenge",
            Self::AuthResponse => "auth-response",
            Self::AuthComplete => "auth-complete",
            Self::AuthRejected => "auth-rejected",
            Self::ServiceRequest => "service-request",
            Self::ServiceNotFound => "service-not-found",
            Self::ServiceClientOpened => "service-client-opened",
            Self::ClientAsyncClose => "client-async-close",
            Self::ClientOnewayClose => "client-oneway-close",
            Self::Request => "request",
            Self::Reply => "reply",
            Self::ReplyException => "reply-exception",
        }
    }

    /// Split the leading type byte off a message
    ///
    /// Returns the type and the remaining body.
    pub fn split(mut message: Bytes) -> Result<(Self, Bytes), ProtocolError> {
        if !message.has_remaining() {
            return Err(ProtocolError::EmptyMessage);
        }
        let message_type = Self::try_from(message.get_u8())?;
        Ok((message_type, message))
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Greeting,
            1 => Self::AuthRequest,
            2 => Self::AuthChallenge,
            3 => Self::AuthResponse,
            4 => Self::AuthComplete,
            5 => Self::AuthRejected,
            16 => Self::ServiceRequest,
            17 => Self::ServiceNotFound,
            18 => Self::ServiceClientOpened,
            19 => Self::ClientAsyncClose,
            20 => Self::ClientOnewayClose,
            32 => Self::Request,
            33 => Self::Reply,
            34 => Self::ReplyException,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MessageType; 14] = [
        MessageType::Greeting,
        MessageType::AuthRequest,
        MessageType::AuthChallenge,
        MessageType::AuthResponse,
        MessageType::AuthComplete,
        MessageType::AuthRejected,
        MessageType::ServiceRequest,
        MessageType::ServiceNotFound,
        MessageType::ServiceClientOpened,
        MessageType::ClientAsyncClose,
        MessageType::ClientOnewayClose,
        MessageType::Request,
        MessageType::Reply,
        MessageType::ReplyException,
    ];

    #[test]
    fn test_codes_map_back_to_types() {
        for message_type in ALL {
            assert_eq!(MessageType::try_from(message_type.code()).unwrap(), message_type);
        }
    }

    #[test]
    fn test_unknown_codes_rejected() {
        let known: Vec<u8> = ALL.iter().map(|t| t.code()).collect();
        for code in 0..=u8::MAX {
            if !known.contains(&code) {
                assert!(matches!(
                    MessageType::try_from(code),
                    Err(ProtocolError::UnknownMessageType(c)) if c == code
                ));
            }
        }
    }

    #[test]
    fn test_split_message() {
        let (message_type, body) = MessageType::split(Bytes::from_static(&[2, 9, 8])).unwrap();
        assert_eq!(message_type, MessageType::AuthChallenge);
        assert_eq!(&body[..], &[9, 8]);
    }

    #[test]
    fn test_split_empty_message() {
        assert!(matches!(MessageType::split(Bytes::new()), Err(ProtocolError::EmptyMessage)));
    }
}
