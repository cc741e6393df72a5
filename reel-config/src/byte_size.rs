use std::fmt;
use std::str::FromStr;

use human_size::{Byte, ParsingError, Size, SpecificSize};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Multiples used to render a byte size, largest first.
const MULTIPLES: &[(u64, &str)] = &[
    (1_000_000_000, "GB"),
    (1_073_741_824, "GiB"),
    (1_000_000, "MB"),
    (1_048_576, "MiB"),
    (1_000, "kB"),
    (1_024, "KiB"),
];

/// Represents a size in bytes.
///
/// `ByteSize` can be parsed from strings with a unit, such as `"10KiB"` or `"1MB"`, or from a
/// plain integer number of bytes. It serializes to the shortest string with an exact unit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Create a byte size from bytes.
    pub const fn bytes(value: u64) -> Self {
        Self(value)
    }

    /// Create a byte size from kilobytes (1000 bytes).
    pub const fn kilobytes(value: u64) -> Self {
        Self(value * 1_000)
    }

    /// Create a byte size from kibibytes (1024 bytes).
    pub const fn kibibytes(value: u64) -> Self {
        Self(value * 1_024)
    }

    /// Create a byte size from megabytes (1000 kilobytes).
    pub const fn megabytes(value: u64) -> Self {
        Self(value * 1_000_000)
    }

    /// Return the value in bytes.
    pub const fn as_bytes(self) -> u64 {
        self.0
    }
}

impl From<u64> for ByteSize {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 > 0 {
            for &(factor, unit) in MULTIPLES {
                if self.0 % factor == 0 {
                    return write!(f, "{}{unit}", self.0 / factor);
                }
            }
        }

        write!(f, "{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = ParsingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(bytes) = value.parse::<u64>() {
            return Ok(Self(bytes));
        }

        let size: Size = value.parse()?;
        let bytes: SpecificSize<Byte> = size.into();
        Ok(Self(bytes.value() as u64))
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;

        impl de::Visitor<'_> for V {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a byte size, either as integer or with a unit")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<ByteSize, E> {
                u64::try_from(value)
                    .map(ByteSize)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ByteSize, E> {
                value
                    .parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size() {
        assert_eq!("42MiB".parse::<ByteSize>().unwrap().as_bytes(), 44_040_192);
        assert_eq!("1kB".parse::<ByteSize>().unwrap().as_bytes(), 1_000);
        assert_eq!("1KiB".parse::<ByteSize>().unwrap().as_bytes(), 1_024);
        assert_eq!("1MB".parse::<ByteSize>().unwrap().as_bytes(), 1_000_000);
        assert_eq!("1025".parse::<ByteSize>().unwrap().as_bytes(), 1_025);
        assert!("ten bytes".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_display_byte_size() {
        assert_eq!(ByteSize::bytes(1_025).to_string(), "1025B");
        assert_eq!(ByteSize::kibibytes(10).to_string(), "10KiB");
        assert_eq!(ByteSize::megabytes(1).to_string(), "1MB");
        assert_eq!(ByteSize::bytes(1_048_576).to_string(), "1MiB");
        assert_eq!(ByteSize::bytes(0).to_string(), "0B");
    }

    #[test]
    fn test_deserialize_byte_size() {
        let sizes: Vec<ByteSize> = serde_json::from_str(r#"[20000, "10KiB", "1MB"]"#).unwrap();
        assert_eq!(
            sizes,
            [
                ByteSize::bytes(20_000),
                ByteSize::kibibytes(10),
                ByteSize::megabytes(1)
            ]
        );
        assert!(serde_json::from_str::<ByteSize>("-1").is_err());
    }
}
