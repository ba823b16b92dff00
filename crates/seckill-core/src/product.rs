use serde::Deserialize;
use thiserror::Error;

/// Administrative state of a product
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ProductStatus {
    /// The sale runs according to its time window
    Normal,
    /// All items have been sold
    SoldOut,
    /// An operator closed the sale by hand
    ForceSoldOut,
}

impl ProductStatus {
    /// Map the integer used by the configuration store
    ///
    /// `0` is normal, `1` sold out and `2` force sold out. Everything else is
    /// rejected.
    pub fn from_wire(status: i64) -> Option<Self> {
        match status {
            0 => Some(Self::Normal),
            1 => Some(Self::SoldOut),
            2 => Some(Self::ForceSoldOut),
            _ => None,
        }
    }

    /// Whether the product can no longer be bought regardless of its window
    #[inline]
    pub fn is_sold_out(self) -> bool {
        matches!(self, Self::SoldOut | Self::ForceSoldOut)
    }
}

/// One row of the flash-sale catalogue
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Product {
    /// Unique, positive product id
    pub product_id: u64,
    /// Wall-clock second at which the sale opens
    pub start_time: i64,
    /// Wall-clock second at which the sale closes
    pub end_time: i64,
    /// Administrative state
    pub status: ProductStatus,
    /// Total number of items offered
    pub count: u64,
    /// Number of items left
    pub left: u64,
}

/// A product record as it is stored in the configuration store
#[derive(Deserialize, Debug)]
struct ProductRecord {
    #[serde(rename = "ProductId")]
    product_id: i64,
    #[serde(rename = "StartTime")]
    start_time: i64,
    #[serde(rename = "EndTime")]
    end_time: i64,
    #[serde(rename = "Status")]
    status: i64,
    #[serde(rename = "Count", default)]
    count: i64,
    #[serde(rename = "Left", default)]
    left: i64,
}

/// Error while decoding the product list stored under the watched key
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The value is not a JSON array of product records
    #[error("malformed product list: {0}")]
    Json(#[from] serde_json::Error),
    /// A product id is zero or negative
    #[error("invalid product id {0}")]
    InvalidProductId(i64),
    /// The sale window is empty or inverted
    #[error("product {product_id}: start time {start} is not before end time {end}")]
    InvalidWindow {
        /// Offending product
        product_id: i64,
        /// Start of the window
        start: i64,
        /// End of the window
        end: i64,
    },
    /// `Count` or `Left` is negative
    #[error("product {0}: negative item count")]
    NegativeCount(i64),
    /// The status integer is not known
    #[error("product {product_id}: unknown status {status}")]
    UnknownStatus {
        /// Offending product
        product_id: i64,
        /// Status as found on the wire
        status: i64,
    },
}

impl TryFrom<ProductRecord> for Product {
    type Error = DecodeError;

    fn try_from(record: ProductRecord) -> Result<Self, Self::Error> {
        let id = record.product_id;
        if id <= 0 {
            return Err(DecodeError::InvalidProductId(id));
        }
        if record.start_time >= record.end_time {
            return Err(DecodeError::InvalidWindow {
                product_id: id,
                start: record.start_time,
                end: record.end_time,
            });
        }
        if record.count < 0 || record.left < 0 {
            return Err(DecodeError::NegativeCount(id));
        }
        let status =
            ProductStatus::from_wire(record.status).ok_or(DecodeError::UnknownStatus {
                product_id: id,
                status: record.status,
            })?;

        Ok(Product {
            product_id: id as u64,
            start_time: record.start_time,
            end_time: record.end_time,
            status,
            count: record.count as u64,
            left: record.left as u64,
        })
    }
}

/// Decode the JSON array of product records stored under the watched key
///
/// Decoding is all-or-nothing: a single invalid record rejects the whole
/// value. Unknown fields are ignored.
pub fn decode_products(value: &[u8]) -> Result<Vec<Product>, DecodeError> {
    let records: Vec<ProductRecord> = serde_json::from_slice(value)?;
    records.into_iter().map(Product::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_records_and_ignores_unknown_fields() {
        let value = br#"[
            {"ProductId": 1028, "StartTime": 1000, "EndTime": 2000, "Status": 0,
             "Count": 100, "Left": 40, "Comment": "spring sale"},
            {"ProductId": 1029, "StartTime": 1000, "EndTime": 2000, "Status": 2,
             "Count": 10, "Left": 0}
        ]"#;
        let products = decode_products(value).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(
            products[0],
            Product {
                product_id: 1028,
                start_time: 1000,
                end_time: 2000,
                status: ProductStatus::Normal,
                count: 100,
                left: 40,
            }
        );
        assert_eq!(products[1].status, ProductStatus::ForceSoldOut);
    }

    #[test]
    fn count_and_left_are_optional() {
        let value = br#"[{"ProductId": 7, "StartTime": 1, "EndTime": 2, "Status": 1}]"#;
        let products = decode_products(value).unwrap();
        assert_eq!(products[0].count, 0);
        assert_eq!(products[0].status, ProductStatus::SoldOut);
    }

    #[test]
    fn one_bad_record_rejects_the_list() {
        let value = br#"[
            {"ProductId": 1, "StartTime": 1000, "EndTime": 2000, "Status": 0},
            {"ProductId": 2, "StartTime": 1000, "EndTime": 2000, "Status": 9}
        ]"#;
        assert!(matches!(
            decode_products(value),
            Err(DecodeError::UnknownStatus {
                product_id: 2,
                status: 9
            })
        ));
    }

    #[test]
    fn rejects_invalid_records() {
        let inverted = br#"[{"ProductId": 1, "StartTime": 2000, "EndTime": 2000, "Status": 0}]"#;
        assert!(matches!(
            decode_products(inverted),
            Err(DecodeError::InvalidWindow { .. })
        ));

        let zero_id = br#"[{"ProductId": 0, "StartTime": 1, "EndTime": 2, "Status": 0}]"#;
        assert!(matches!(
            decode_products(zero_id),
            Err(DecodeError::InvalidProductId(0))
        ));

        let negative = br#"[{"ProductId": 3, "StartTime": 1, "EndTime": 2, "Status": 0, "Left": -1}]"#;
        assert!(matches!(
            decode_products(negative),
            Err(DecodeError::NegativeCount(3))
        ));

        assert!(matches!(
            decode_products(b"{\"ProductId\": 1}"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(decode_products(b"[]").unwrap().is_empty());
    }
}
