//! Accumulator body format: newline-delimited `key,value` records with the
//! value as decimal text.
//!
//! Keys may themselves contain commas; the value is always the text after the
//! last comma.

use std::fmt::{Display, Write as _};

use bytes::Bytes;

use crate::error::ParseError;

/// A value that can be carried between rounds as decimal text.
pub trait DecimalValue: Copy + Display + Send + Sync + 'static {
    fn parse_decimal(text: &str) -> Result<Self, String>;
}

macro_rules! decimal_value {
    ($($t:ty),*) => {
        $(
            impl DecimalValue for $t {
                fn parse_decimal(text: &str) -> Result<Self, String> {
                    text.parse::<$t>().map_err(|e| e.to_string())
                }
            }
        )*
    };
}

decimal_value!(f64, u64, i64);

/// Serialize accumulated pairs. Row order follows the iterator.
pub fn encode<'a, K, V, I>(pairs: I) -> Bytes
where
    K: AsRef<str> + 'a,
    V: Display + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{},{}", key.as_ref(), value);
    }
    Bytes::from(out)
}

/// Parse one `key,value` record.
pub fn decode_record<V: DecimalValue>(line: &str) -> Result<(String, V), ParseError> {
    let line = line.trim_end_matches('\r');
    let (key, value) = line
        .rsplit_once(',')
        .ok_or_else(|| ParseError::new(line, "missing `,` separator"))?;
    if key.is_empty() {
        return Err(ParseError::new(line, "empty key"));
    }
    let value = V::parse_decimal(value.trim()).map_err(|e| ParseError::new(line, e))?;
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn accumulator_survives_a_round_trip() {
        let mut acc: HashMap<String, f64> = HashMap::new();
        acc.insert("10.0.0.1".to_string(), 12.5);
        acc.insert("10.0.0.2".to_string(), 0.1 + 0.2);
        acc.insert("a,b".to_string(), -3.0);

        let body = encode(acc.iter());
        let text = std::str::from_utf8(&body).unwrap();

        let decoded: HashMap<String, f64> = text
            .lines()
            .map(|line| decode_record::<f64>(line).unwrap())
            .collect();

        assert_eq!(decoded.len(), acc.len());
        for (key, value) in &acc {
            assert!((decoded[key] - value).abs() < 1e-9, "{key}");
        }
    }

    #[test]
    fn integers_are_written_as_plain_decimals() {
        let acc: Vec<(String, u64)> = vec![("the".into(), 42), ("cat".into(), 7)];
        let body = encode(acc.iter().map(|(k, v)| (k, v)));
        assert_eq!(&body[..], b"the,42\ncat,7\n");
    }

    #[test]
    fn malformed_records_are_reported() {
        assert!(decode_record::<f64>("no separator").is_err());
        assert!(decode_record::<f64>(",5").is_err());
        assert!(decode_record::<f64>("key,not-a-number").is_err());
        assert_eq!(
            decode_record::<u64>("key,5\r").unwrap(),
            ("key".to_string(), 5)
        );
    }
}
