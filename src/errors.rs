use std::{error, fmt, io};

/// Error kinds surfaced by the connection engine and its collaborators.
///
/// Parse-level kinds terminate the connection without a response byte;
/// routing-level kinds are mapped to `404`/`405` responses; handler
/// failures are mapped to an empty `500`.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,
    UriTooLong,
    HttpVersionNotSupported,

    MalformedRequest,
    TooManyHeaders,
    ContentTooLarge,

    RouteNotFound,
    MethodNotAllowed,
    HandlerFailed,
    MissingStatus,

    SocketClosed,
    SocketError(IoError),
}

impl ErrorKind {
    /// True for the kinds the engine sheds without writing a response.
    #[inline]
    pub(crate) const fn is_parse_level(&self) -> bool {
        matches!(
            self,
            Self::InvalidMethod
                | Self::UriTooLong
                | Self::HttpVersionNotSupported
                | Self::MalformedRequest
                | Self::TooManyHeaders
                | Self::ContentTooLarge
        )
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<crate::query::Error> for ErrorKind {
    fn from(_: crate::query::Error) -> Self {
        ErrorKind::MalformedRequest
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => ErrorKind::SocketClosed,
            _ => ErrorKind::SocketError(IoError(err)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Failure returned from a handler or middleware.
///
/// The engine logs the reason and answers the request with an empty
/// `500 Internal Server Error`; the connection itself stays usable.
///
/// # Examples
/// ```
/// use zzz_web::HandlerError;
///
/// fn load(id: i64) -> Result<(), HandlerError> {
///     if id < 0 {
///         return Err(HandlerError::from("negative id"));
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct HandlerError {
    reason: std::borrow::Cow<'static, str>,
}

impl HandlerError {
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl error::Error for HandlerError {}
impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<&'static str> for HandlerError {
    fn from(reason: &'static str) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(reason: String) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        Self {
            reason: err.to_string().into(),
        }
    }
}
