//! Control and request frame layouts
//!
//! [`Frame`] is the decoded form of one protocol message. Decoding dispatches
//! on the leading [`MessageType`] byte; every type has exactly one layout.

use crate::{Greeting, MessageType, ProtocolError};
use bytes::{Buf, BufMut, Bytes};

/// Decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Server greeting
    Greeting(Greeting),
    /// Client's chosen mechanism
    AuthRequest {
        /// Mechanism name
        mechanism: String,
    },
    /// Mechanism challenge
    AuthChallenge(Bytes),
    /// Mechanism response
    AuthResponse(Bytes),
    /// Authentication finished, with optional final mechanism data
    AuthComplete(Bytes),
    /// Authentication refused, with an optional UTF-8 reason
    AuthRejected(Bytes),
    /// Open a handle under `id` to the named service
    ServiceRequest {
        /// Sender-assigned handle id
        id: u32,
        /// Service name
        service: String,
    },
    /// No such service
    ServiceNotFound {
        /// Handle id from the request
        id: u32,
    },
    /// Handle is open
    ServiceClientOpened {
        /// Handle id from the request
        id: u32,
    },
    /// Service side closed the handle
    ClientAsyncClose {
        /// Handle id
        id: u32,
    },
    /// Client side closed the handle
    ClientOnewayClose {
        /// Handle id
        id: u32,
    },
    /// Invocation on an open handle
    Request {
        /// Handle id
        id: u32,
        /// Correlation id for the reply
        request_id: u32,
        /// Opaque request payload
        payload: Bytes,
    },
    /// Invocation result
    Reply {
        /// Correlation id from the request
        request_id: u32,
        /// Opaque reply payload
        payload: Bytes,
    },
    /// Invocation failure
    ReplyException {
        /// Correlation id from the request
        request_id: u32,
        /// Failure description
        message: String,
    },
}

impl Frame {
    /// Decode one message, leading type byte included
    pub fn decode(message: Bytes) -> Result<Self, ProtocolError> {
        let (message_type, mut body) = MessageType::split(message)?;
        let frame = match message_type {
            MessageType::Greeting => Self::Greeting(Greeting::parse(body)?),
            MessageType::AuthRequest => Self::AuthRequest {
                mechanism: take_utf8(body, "mechanism name")?,
            },
            MessageType::AuthChallenge => Self::AuthChallenge(body),
            MessageType::AuthResponse => Self::AuthResponse(body),
            MessageType::AuthComplete => Self::AuthComplete(body),
            MessageType::AuthRejected => Self::AuthRejected(body),
            MessageType::ServiceRequest => {
                let id = take_u32(&mut body, "handle id")?;
                Self::ServiceRequest {
                    id,
                    service: take_utf8(body, "service name")?,
                }
            }
            MessageType::ServiceNotFound => Self::ServiceNotFound {
                id: take_u32(&mut body, "handle id")?,
            },
            MessageType::ServiceClientOpened => Self::ServiceClientOpened {
                id: take_u32(&mut body, "handle id")?,
            },
            MessageType::ClientAsyncClose => Self::ClientAsyncClose {
                id: take_u32(&mut body, "handle id")?,
            },
            MessageType::ClientOnewayClose => Self::ClientOnewayClose {
                id: take_u32(&mut body, "handle id")?,
            },
            MessageType::Request => {
                let id = take_u32(&mut body, "handle id")?;
                let request_id = take_u32(&mut body, "request id")?;
                Self::Request {
                    id,
                    request_id,
                    payload: body,
                }
            }
            MessageType::Reply => {
                let request_id = take_u32(&mut body, "request id")?;
                Self::Reply {
                    request_id,
                    payload: body,
                }
            }
            MessageType::ReplyException => {
                let request_id = take_u32(&mut body, "request id")?;
                Self::ReplyException {
                    request_id,
                    message: take_utf8(body, "exception message")?,
                }
            }
        };
        Ok(frame)
    }

    /// Message type of this frame
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Greeting(_) => MessageType::Greeting,
            Self::AuthRequest { .. } => MessageType::AuthRequest,
            Self::AuthChallenge(_) => MessageType::AuthChallenge,
            Self::AuthResponse(_) => MessageType::AuthResponse,
            Self::AuthComplete(_) => MessageType::AuthComplete,
            Self::AuthRejected(_) => MessageType::AuthRejected,
            Self::ServiceRequest { .. } => MessageType::ServiceRequest,
            Self::ServiceNotFound { .. } => MessageType::ServiceNotFound,
            Self::ServiceClientOpened { .. } => MessageType::ServiceClientOpened,
            Self::ClientAsyncClose { .. } => MessageType::ClientAsyncClose,
            Self::ClientOnewayClose { .. } => MessageType::ClientOnewayClose,
            Self::Request { .. } => MessageType::Request,
            Self::Reply { .. } => MessageType::Reply,
            Self::ReplyException { .. } => MessageType::ReplyException,
        }
    }

    /// Encode the message, type byte first
    ///
    /// The transport header is not written; callers reserve it in the buffer
    /// beforehand.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        if let Self::Greeting(greeting) = self {
            return greeting.encode(buf);
        }
        buf.put_u8(self.message_type().code());
        match self {
            Self::Greeting(_) => {}
            Self::AuthRequest { mechanism } => buf.put_slice(mechanism.as_bytes()),
            Self::AuthChallenge(payload)
            | Self::AuthResponse(payload)
            | Self::AuthComplete(payload)
            | Self::AuthRejected(payload) => buf.put_slice(payload),
            Self::ServiceRequest { id, service } => {
                buf.put_u32(*id);
                buf.put_slice(service.as_bytes());
            }
            Self::ServiceNotFound { id }
            | Self::ServiceClientOpened { id }
            | Self::ClientAsyncClose { id }
            | Self::ClientOnewayClose { id } => buf.put_u32(*id),
            Self::Request { id, request_id, payload } => {
                buf.put_u32(*id);
                buf.put_u32(*request_id);
                buf.put_slice(payload);
            }
            Self::Reply { request_id, payload } => {
                buf.put_u32(*request_id);
                buf.put_slice(payload);
            }
            Self::ReplyException { request_id, message } => {
                buf.put_u32(*request_id);
                buf.put_slice(message.as_bytes());
            }
        }
        Ok(())
    }

    /// Encoded size of the frame, type byte included
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Greeting(greeting) => {
                greeting.version.map_or(0, |_| 3)
                    + greeting.mechanisms.iter().map(|m| 2 + m.len()).sum::<usize>()
                    + greeting.endpoint_name.as_ref().map_or(0, |n| 2 + n.len())
            }
            Self::AuthRequest { mechanism } => mechanism.len(),
            Self::AuthChallenge(payload)
            | Self::AuthResponse(payload)
            | Self::AuthComplete(payload)
            | Self::AuthRejected(payload) => payload.len(),
            Self::ServiceRequest { service, .. } => 4 + service.len(),
            Self::ServiceNotFound { .. }
            | Self::ServiceClientOpened { .. }
            | Self::ClientAsyncClose { .. }
            | Self::ClientOnewayClose { .. } => 4,
            Self::Request { payload, .. } => 8 + payload.len(),
            Self::Reply { payload, .. } => 4 + payload.len(),
            Self::ReplyException { message, .. } => 4 + message.len(),
        }
    }
}

fn take_u32(body: &mut Bytes, field: &'static str) -> Result<u32, ProtocolError> {
    if body.remaining() < 4 {
        return Err(ProtocolError::Truncated {
            field,
            needed: 4,
            remaining: body.remaining(),
        });
    }
    Ok(body.get_u32())
}

fn take_utf8(body: Bytes, field: &'static str) -> Result<String, ProtocolError> {
    String::from_utf8(body.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.encoded_len());
        buf.freeze()
    }

    #[test]
    fn test_async_close_layout() {
        let bytes = encode(&Frame::ClientAsyncClose { id: 0x0102_0304 });
        assert_eq!(&bytes[..], &[19, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_request_layout() {
        let frame = Frame::Request {
            id: 7,
            request_id: 9,
            payload: Bytes::from_static(b"hi"),
        };
        let bytes = encode(&frame);
        assert_eq!(&bytes[..], &[32, 0, 0, 0, 7, 0, 0, 0, 9, b'h', b'i']);
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_service_request_decode() {
        let frame = Frame::decode(Bytes::from_static(&[16, 0, 0, 0, 3, b'r', b'o', b't'])).unwrap();
        assert_eq!(
            frame,
            Frame::ServiceRequest {
                id: 3,
                service: "rot".to_string()
            }
        );
    }

    #[test]
    fn test_truncated_id() {
        let result = Frame::decode(Bytes::from_static(&[19, 0, 0]));
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated { field: "handle id", needed: 4, remaining: 2 })
        ));
    }

    #[test]
    fn test_auth_frames_keep_payload() {
        let frame = Frame::decode(Bytes::from_static(&[2])).unwrap();
        assert_eq!(frame, Frame::AuthChallenge(Bytes::new()));

        let frame = Frame::decode(Bytes::from_static(&[3, 0, b'a', 0, b'b'])).unwrap();
        assert_eq!(frame, Frame::AuthResponse(Bytes::from_static(&[0, b'a', 0, b'b'])));
    }

    #[test]
    fn test_greeting_frame() {
        let greeting = Greeting::new().with_mechanism("PLAIN");
        let bytes = encode(&Frame::Greeting(greeting.clone()));
        assert_eq!(Frame::decode(bytes).unwrap(), Frame::Greeting(greeting));
    }

    #[test]
    fn test_unknown_type() {
        let result = Frame::decode(Bytes::from_static(&[99, 1, 2]));
        assert!(matches!(result, Err(ProtocolError::UnknownMessageType(99))));
    }

    #[test]
    fn test_reply_exception_utf8() {
        let result = Frame::decode(Bytes::from_static(&[34, 0, 0, 0, 1, 0xFF]));
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8("exception message"))));
    }
}
