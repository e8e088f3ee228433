//! BSON to JSON conversion.

use apibrick_core::datasource::source::DataConverter;
use apibrick_types::ValueMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mongodb::bson::{Bson, Document};
use serde_json::{Value, json};

/// Converts BSON values into JSON-safe primitives.
///
/// ObjectIds become hex strings, datetimes RFC 3339 strings, Decimal128
/// values strings, and binary base64. Documents and arrays are converted
/// recursively. Remaining exotic types fall back to their display form.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConverter;

impl DataConverter for MongoConverter {
    type Raw = Bson;

    fn convert(&self, raw: Bson) -> Value {
        match raw {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => json!(b),
            Bson::Int32(i) => json!(i),
            Bson::Int64(i) => json!(i),
            Bson::Double(f) => json!(f),
            Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => json!(s),
            Bson::ObjectId(oid) => json!(oid.to_hex()),
            Bson::DateTime(dt) => match dt.try_to_rfc3339_string() {
                Ok(s) => json!(s),
                Err(_) => json!(dt.timestamp_millis()),
            },
            Bson::Decimal128(d) => json!(d.to_string()),
            Bson::Binary(bin) => json!(BASE64.encode(&bin.bytes)),
            Bson::Timestamp(ts) => json!({"t": ts.time, "i": ts.increment}),
            Bson::Array(items) => Value::Array(items.into_iter().map(|item| self.convert(item)).collect()),
            Bson::Document(doc) => Value::Object(self.convert_document(doc)),
            other => json!(other.to_string()),
        }
    }
}

impl MongoConverter {
    pub fn convert_document(&self, doc: Document) -> ValueMap {
        doc.into_iter()
            .map(|(key, value)| (key, self.convert(value)))
            .collect()
    }
}
