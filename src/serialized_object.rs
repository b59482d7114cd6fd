//! Binary serialization for scenes, probe batches, and baked data layers.
//!
//! Serialized objects are flat little-endian byte buffers with an embedded
//! schema version. Readers must tolerate absent layers, validate that lengths
//! are non-zero where the schema requires it, and reject buffers whose
//! embedded version is higher than the reader's.

/// The current schema version embedded in serialized objects.
pub const SERIALIZED_OBJECT_VERSION: u32 = 1;

const MAGIC: u32 = 0x4543_4646; // "ECFF"

/// A serialized representation of an API object, like a
/// [`Scene`](crate::Scene) or [`ProbeBatch`](crate::ProbeBatch).
///
/// Create an empty serialized object to serialize an existing object to a
/// byte array, or wrap an existing byte array to deserialize it.
#[derive(Debug)]
pub struct SerializedObject {
    data: Vec<u8>,
    cursor: usize,
}

impl SerializedObject {
    /// Creates a new empty serialized object for serialization purposes.
    pub fn new() -> Self {
        let mut object = Self {
            data: Vec::new(),
            cursor: 0,
        };

        object.write_u32(MAGIC);
        object.write_u32(SERIALIZED_OBJECT_VERSION);
        object
    }

    /// Wraps an existing byte buffer for deserialization.
    ///
    /// Call [`Self::check_header`] (done implicitly by the `load` functions of
    /// serializable objects) before reading payload fields.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mut object = Self { data, cursor: 0 };
        // Position the cursor past the header; validity is checked on read.
        let _ = object.check_header();
        object
    }

    /// The serialized bytes, including the header.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Validates the magic number and embedded version.
    pub fn check_header(&mut self) -> Result<(), SerializeError> {
        self.cursor = 0;

        let magic = self.read_u32()?;
        if magic != MAGIC {
            return Err(SerializeError::BadMagic { found: magic });
        }

        let version = self.read_u32()?;
        if version > SERIALIZED_OBJECT_VERSION {
            return Err(SerializeError::UnsupportedVersion {
                found: version,
                supported: SERIALIZED_OBJECT_VERSION,
            });
        }

        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], SerializeError> {
        if self.cursor + N > self.data.len() {
            return Err(SerializeError::UnexpectedEnd {
                offset: self.cursor,
            });
        }

        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, SerializeError> {
        Ok(self.read_bytes::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, SerializeError> {
        Ok(u32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, SerializeError> {
        Ok(i32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SerializeError> {
        Ok(u64::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, SerializeError> {
        Ok(f32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, SerializeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an array length that the schema requires to be non-zero.
    pub fn read_nonzero_length(&mut self) -> Result<usize, SerializeError> {
        let length = self.read_u64()? as usize;
        if length == 0 {
            return Err(SerializeError::EmptyArray {
                offset: self.cursor,
            });
        }
        Ok(length)
    }

    /// Reads an array length that may legitimately be zero.
    pub fn read_length(&mut self) -> Result<usize, SerializeError> {
        Ok(self.read_u64()? as usize)
    }
}

impl Default for SerializedObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialization errors.
#[derive(Debug, PartialEq, Eq)]
pub enum SerializeError {
    /// The buffer does not start with the expected magic number.
    BadMagic { found: u32 },
    /// The buffer was written by a newer library version.
    UnsupportedVersion { found: u32, supported: u32 },
    /// The buffer ended in the middle of a field.
    UnexpectedEnd { offset: usize },
    /// An array the schema requires to be non-empty had zero length.
    EmptyArray { offset: usize },
    /// A field held a value outside its schema's valid range.
    InvalidValue { offset: usize },
}

impl std::error::Error for SerializeError {}

impl std::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::BadMagic { found } => write!(f, "bad magic number {found:#x}"),
            Self::UnsupportedVersion { found, supported } => write!(
                f,
                "serialized object version {found} is newer than supported version {supported}"
            ),
            Self::UnexpectedEnd { offset } => {
                write!(f, "serialized object ended unexpectedly at offset {offset}")
            }
            Self::EmptyArray { offset } => {
                write!(f, "zero-length array at offset {offset}")
            }
            Self::InvalidValue { offset } => {
                write!(f, "invalid field value at offset {offset}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut object = SerializedObject::new();
        object.write_u32(42);
        object.write_f32(1.5);
        object.write_bool(true);
        object.write_i32(-7);

        let mut reader = SerializedObject::from_bytes(object.data().to_vec());
        assert_eq!(reader.read_u32().unwrap(), 42);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), -7);
    }

    #[test]
    fn test_rejects_newer_version() {
        let mut object = SerializedObject::new();
        object.write_u32(0);

        let mut bytes = object.data().to_vec();
        // Overwrite the embedded version with a newer one.
        bytes[4..8].copy_from_slice(&(SERIALIZED_OBJECT_VERSION + 1).to_le_bytes());

        let mut reader = SerializedObject {
            data: bytes,
            cursor: 0,
        };
        assert!(matches!(
            reader.check_header(),
            Err(SerializeError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_truncated_buffer() {
        let object = SerializedObject::new();
        let mut reader = SerializedObject::from_bytes(object.data().to_vec());
        assert!(matches!(
            reader.read_u32(),
            Err(SerializeError::UnexpectedEnd { .. })
        ));
    }
}
