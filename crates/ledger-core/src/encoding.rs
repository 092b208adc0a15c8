//! Serde helpers for byte fields.
//!
//! Human-readable formats (JSON) get base58 or base64 strings, binary formats
//! (bincode) get the raw bytes.

macro_rules! text_bytes {
    ($name:ident, $encode:expr, $decode:expr) => {
        pub mod $name {
            use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

            pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
                T: AsRef<[u8]>,
            {
                if serializer.is_human_readable() {
                    let encode: fn(&[u8]) -> String = $encode;
                    serializer.serialize_str(&encode(value.as_ref()))
                } else {
                    value.as_ref().serialize(serializer)
                }
            }

            pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
            where
                D: Deserializer<'de>,
                T: TryFrom<Vec<u8>>,
            {
                let bytes = if deserializer.is_human_readable() {
                    let text = String::deserialize(deserializer)?;
                    let decode: fn(&str) -> Result<Vec<u8>, String> = $decode;
                    decode(&text).map_err(D::Error::custom)?
                } else {
                    Vec::<u8>::deserialize(deserializer)?
                };
                let len = bytes.len();
                T::try_from(bytes)
                    .map_err(|_| D::Error::custom(format!("unexpected byte length {}", len)))
            }
        }
    };
}

text_bytes!(
    base58,
    |bytes| bs58::encode(bytes).into_string(),
    |text| bs58::decode(text).into_vec().map_err(|e| e.to_string())
);

text_bytes!(
    base64,
    |bytes| {
        use ::base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(bytes)
    },
    |text| {
        use ::base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.decode(text).map_err(|e| e.to_string())
    }
);
