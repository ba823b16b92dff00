use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Terminal state of a request, rendered as the numeric `code` of the
/// response envelope
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ErrorCode {
    /// The request was admitted
    Ok,
    /// Missing or malformed input
    InvalidRequest,
    /// The product id is not part of the current catalogue
    NotFoundProduct,
    /// The user signature does not match
    AuthFailed,
    /// The user exceeded the per-second request limit
    ServiceBusy,
    /// The sale has not started yet
    ActiveNotStarted,
    /// The sale is over
    ActiveAlreadyEnded,
    /// The product is sold out
    ActiveSoldOut,
    /// Reserved for the fulfilment queue, never emitted by the gateway
    ProcessTimeout,
    /// Reserved for the fulfilment queue, never emitted by the gateway
    ClientClosed,
}

impl ErrorCode {
    /// Numeric value sent to clients
    pub const fn code(self) -> u32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::InvalidRequest => 1001,
            ErrorCode::NotFoundProduct => 1002,
            ErrorCode::AuthFailed => 1003,
            ErrorCode::ServiceBusy => 1004,
            ErrorCode::ActiveNotStarted => 1005,
            ErrorCode::ActiveAlreadyEnded => 1006,
            ErrorCode::ActiveSoldOut => 1007,
            ErrorCode::ProcessTimeout => 1008,
            ErrorCode::ClientClosed => 1009,
        }
    }

    /// Inverse of [`Self::code()`]
    pub fn from_code(code: u32) -> Option<Self> {
        use ErrorCode::*;
        [
            Ok,
            InvalidRequest,
            NotFoundProduct,
            AuthFailed,
            ServiceBusy,
            ActiveNotStarted,
            ActiveAlreadyEnded,
            ActiveSoldOut,
            ProcessTimeout,
            ClientClosed,
        ]
        .into_iter()
        .find(|kind| kind.code() == code)
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

/// Evaluated status of one product, as listed by `/secinfo`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ProductInfo {
    /// Product id
    pub product_id: u64,
    /// Whether the sale is running
    pub start: bool,
    /// Whether the sale is over (ended or sold out)
    pub end: bool,
    /// Human readable status
    pub status: String,
}

/// Response sent to the client
///
/// Serialises to `{"code": .., "message": .., "data": [..]}` where `data` is
/// only present for product listings.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Envelope {
    /// A bare verdict
    Status {
        /// Terminal state
        code: ErrorCode,
        /// Human readable reason
        message: String,
    },
    /// A single product, rendered as a one-element `data` array
    Item(ProductInfo),
    /// Every product of the current catalogue
    List(Vec<ProductInfo>),
}

impl Envelope {
    /// The message sent along with [`ErrorCode::Ok`]
    pub const SUCCESS: &'static str = "success";

    /// An accepted request without payload
    pub fn success() -> Self {
        Self::Status {
            code: ErrorCode::Ok,
            message: Self::SUCCESS.to_owned(),
        }
    }

    /// A rejected request
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Get the envelope's code
    pub fn code(&self) -> ErrorCode {
        match self {
            Envelope::Status { code, .. } => *code,
            Envelope::Item(_) | Envelope::List(_) => ErrorCode::Ok,
        }
    }

    /// Get the envelope's message
    pub fn message(&self) -> &str {
        match self {
            Envelope::Status { message, .. } => message,
            Envelope::Item(_) | Envelope::List(_) => Self::SUCCESS,
        }
    }

    /// Get the product payload, if any
    pub fn data(&self) -> Option<&[ProductInfo]> {
        match self {
            Envelope::Status { .. } => None,
            Envelope::Item(info) => Some(std::slice::from_ref(info)),
            Envelope::List(list) => Some(list),
        }
    }

    /// Render the envelope as JSON
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self.data();
        let mut map = serializer.serialize_map(Some(if data.is_some() { 3 } else { 2 }))?;
        map.serialize_entry("code", &self.code())?;
        map.serialize_entry("message", self.message())?;
        if let Some(data) = data {
            map.serialize_entry("data", data)?;
        }
        map.end()
    }
}

/// Client-side view of a serialised [`Envelope`]
#[derive(Clone, PartialEq, Eq, Deserialize, Debug)]
pub struct Reply {
    /// Numeric code, see [`ErrorCode::code()`]
    pub code: u32,
    /// Human readable message
    pub message: String,
    /// Product payload
    #[serde(default)]
    pub data: Option<Vec<ProductInfo>>,
}

impl Reply {
    /// Get the reply's code as [`ErrorCode`], if known
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}
