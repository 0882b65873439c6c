use std::sync::Arc;

use ripple_common::{InMemoryFormat, Result};

use crate::record::{Data, StoredValue};

/// How a record store keeps values in memory
pub trait RecordFormat: Send + Sync + 'static {
    const FORMAT: InMemoryFormat;

    /// Convert an incoming serialized value into the stored representation
    fn to_stored(value: Data) -> Result<StoredValue>;
}

/// Values are kept deserialized
pub struct ObjectFormat;

impl RecordFormat for ObjectFormat {
    const FORMAT: InMemoryFormat = InMemoryFormat::Object;

    fn to_stored(value: Data) -> Result<StoredValue> {
        let object: serde_json::Value = value.deserialize()?;
        Ok(StoredValue::Object(Arc::new(object)))
    }
}

/// Values are kept as the serialized bytes they arrived in
pub struct BinaryFormat;

impl RecordFormat for BinaryFormat {
    const FORMAT: InMemoryFormat = InMemoryFormat::Binary;

    fn to_stored(value: Data) -> Result<StoredValue> {
        Ok(StoredValue::Binary(value))
    }
}
