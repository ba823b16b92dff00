//! 🏗 Infrastructure shared by the flash-sale gateway: products, requests,
//! response envelopes and configuration.
#![warn(missing_docs)]

mod config;
mod envelope;
mod product;
mod request;

pub use config::{Config, ConfigError, SignatureScheme};
pub use envelope::{Envelope, ErrorCode, ProductInfo, Reply};
pub use product::{decode_products, DecodeError, Product, ProductStatus};
pub use request::{RawRequest, Request, RequestHandler, RequestKind};
