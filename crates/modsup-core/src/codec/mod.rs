//! Typed value ↔ Modbus register/coil conversion.
//!
//! Pure functions, no I/O. Register payloads are `u16` words as they appear
//! on the wire (byte order within a word is big-endian there); `WordOrder`
//! only decides which word of a multi-register value comes first. Strings
//! pack two bytes per register, most significant byte first.
//!
//! Decode returns `Value::List` for everything except strings; the poll
//! engine unwraps single-element lists to scalars. Encode accepts a scalar
//! when one value is expected and a list of exactly `read_amount` values
//! otherwise.

use crate::model::{DataType, Value, WordOrder};
use std::fmt;

/// Conversion failure. `BadType` means the value cannot be coerced at all;
/// the range variants mean it fit the type but not the width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    BadType(String),
    Overflow,
    Underflow,
    /// Payload length does not match the tag's derived read width.
    Length { expected: usize, got: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BadType(msg) => write!(f, "bad value type: {}", msg),
            CodecError::Overflow => write!(f, "value too large for data type"),
            CodecError::Underflow => write!(f, "value too small for data type"),
            CodecError::Length { expected, got } => {
                write!(f, "expected {} words, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for CodecError {}

// ============================================================
// Decode
// ============================================================

/// Decodes a register payload into a typed value.
///
/// `read_amount` is the number of values (characters for strings); the
/// payload length must match the derived register count exactly.
pub fn decode_registers(
    regs: &[u16],
    data_type: DataType,
    word_order: WordOrder,
    read_amount: u16,
) -> Result<Value, CodecError> {
    let expected = expected_registers(data_type, read_amount);
    if regs.len() != expected {
        return Err(CodecError::Length {
            expected,
            got: regs.len(),
        });
    }

    if data_type == DataType::String {
        return Ok(Value::Str(unpack_string(regs, read_amount)));
    }

    let width = data_type.width() as usize;
    let mut out = Vec::with_capacity(read_amount as usize);
    for chunk in regs.chunks(width) {
        out.push(decode_one(chunk, data_type, word_order));
    }
    Ok(Value::List(out))
}

/// Decodes a coil/discrete-input payload, truncated to `read_amount` bits.
pub fn decode_bits(bits: &[bool], read_amount: u16) -> Value {
    Value::List(
        bits.iter()
            .take(read_amount as usize)
            .map(|b| Value::Bool(*b))
            .collect(),
    )
}

fn decode_one(chunk: &[u16], data_type: DataType, word_order: WordOrder) -> Value {
    let raw = combine_words(chunk, word_order);
    match data_type {
        DataType::Bool => Value::Bool(raw != 0),
        DataType::Int16 => Value::I64(raw as u16 as i16 as i64),
        DataType::Uint16 => Value::U64(raw),
        DataType::Int32 => Value::I64(raw as u32 as i32 as i64),
        DataType::Uint32 => Value::U64(raw),
        DataType::Int64 => Value::I64(raw as i64),
        DataType::Uint64 => Value::U64(raw),
        DataType::Float32 => Value::F64(f32::from_bits(raw as u32) as f64),
        DataType::Float64 => Value::F64(f64::from_bits(raw)),
        DataType::String => unreachable!("strings are unpacked separately"),
    }
}

/// Folds 1, 2, or 4 registers into a u64, most significant word first.
fn combine_words(chunk: &[u16], word_order: WordOrder) -> u64 {
    let mut raw: u64 = 0;
    match word_order {
        WordOrder::Big => {
            for w in chunk {
                raw = (raw << 16) | *w as u64;
            }
        }
        WordOrder::Little => {
            for w in chunk.iter().rev() {
                raw = (raw << 16) | *w as u64;
            }
        }
    }
    raw
}

/// Splits a u64 into `width` registers per word order.
fn split_words(raw: u64, width: usize, word_order: WordOrder) -> Vec<u16> {
    let mut words: Vec<u16> = (0..width)
        .rev()
        .map(|i| (raw >> (16 * i)) as u16)
        .collect();
    if word_order == WordOrder::Little {
        words.reverse();
    }
    words
}

fn unpack_string(regs: &[u16], read_amount: u16) -> String {
    let mut bytes = Vec::with_capacity(regs.len() * 2);
    for reg in regs {
        bytes.push((reg >> 8) as u8);
        bytes.push(*reg as u8);
    }
    bytes.truncate(read_amount as usize);
    // Trailing NULs are padding, not payload.
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

// ============================================================
// Encode
// ============================================================

/// Encodes a typed value into a register payload for a write.
///
/// Width policy matches [`decode_registers`]: the result always holds the
/// tag's full derived register count.
pub fn encode_registers(
    value: &Value,
    data_type: DataType,
    word_order: WordOrder,
    read_amount: u16,
) -> Result<Vec<u16>, CodecError> {
    if data_type == DataType::String {
        let text = match value {
            Value::Str(s) => s.as_str(),
            other => return Err(CodecError::BadType(format!("expected string, got {}", other))),
        };
        return pack_string(text, read_amount);
    }

    let values = scalars(value, read_amount)?;
    let width = data_type.width() as usize;
    let mut regs = Vec::with_capacity(values.len() * width);
    for v in values {
        let raw = encode_one(v, data_type)?;
        regs.extend(split_words(raw, width, word_order));
    }
    Ok(regs)
}

/// Encodes a value into coil bits; everything coercible to boolean is
/// accepted, numbers by zero test.
pub fn encode_coils(value: &Value, read_amount: u16) -> Result<Vec<bool>, CodecError> {
    let values = scalars(value, read_amount)?;
    values.iter().map(|v| coerce_bool(v)).collect()
}

/// Flattens a scalar-or-list into exactly `read_amount` scalars.
fn scalars(value: &Value, read_amount: u16) -> Result<Vec<&Value>, CodecError> {
    let items: Vec<&Value> = match value {
        Value::List(items) => items.iter().collect(),
        scalar => vec![scalar],
    };
    if items.len() != read_amount as usize {
        return Err(CodecError::Length {
            expected: read_amount as usize,
            got: items.len(),
        });
    }
    if items.iter().any(|v| matches!(v, Value::List(_))) {
        return Err(CodecError::BadType("nested lists are not encodable".into()));
    }
    Ok(items)
}

fn coerce_bool(value: &Value) -> Result<bool, CodecError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::I64(v) => Ok(*v != 0),
        Value::U64(v) => Ok(*v != 0),
        Value::F64(v) => Ok(*v != 0.0),
        other => Err(CodecError::BadType(format!("expected boolean, got {}", other))),
    }
}

/// Coerces one scalar into the raw bit pattern of `data_type`.
fn encode_one(value: &Value, data_type: DataType) -> Result<u64, CodecError> {
    match data_type {
        DataType::Bool => Ok(coerce_bool(value)? as u64),
        DataType::Int16 => signed(value, i16::MIN as i64, i16::MAX as i64).map(|v| v as u16 as u64),
        DataType::Int32 => signed(value, i32::MIN as i64, i32::MAX as i64).map(|v| v as u32 as u64),
        DataType::Int64 => signed(value, i64::MIN, i64::MAX).map(|v| v as u64),
        DataType::Uint16 => unsigned(value, u16::MAX as u64),
        DataType::Uint32 => unsigned(value, u32::MAX as u64),
        DataType::Uint64 => unsigned(value, u64::MAX),
        DataType::Float32 => Ok((coerce_f64(value)? as f32).to_bits() as u64),
        DataType::Float64 => coerce_f64(value).map(f64::to_bits),
        DataType::String => unreachable!("strings are packed separately"),
    }
}

/// Integer coercion: integers pass through, floats truncate toward zero
/// (fractional writes are operator input, not wire data), numeric strings
/// parse. Range is checked against the target type.
fn coerce_i128(value: &Value) -> Result<i128, CodecError> {
    match value {
        Value::I64(v) => Ok(*v as i128),
        Value::U64(v) => Ok(*v as i128),
        Value::Bool(b) => Ok(*b as i128),
        Value::F64(v) => {
            if v.is_finite() {
                Ok(v.trunc() as i128)
            } else {
                Err(CodecError::BadType("non-finite float".into()))
            }
        }
        Value::Str(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| CodecError::BadType(format!("not an integer: {:?}", s))),
        Value::List(_) => Err(CodecError::BadType("expected integer, got list".into())),
    }
}

fn signed(value: &Value, min: i64, max: i64) -> Result<i64, CodecError> {
    let v = coerce_i128(value)?;
    if v > max as i128 {
        Err(CodecError::Overflow)
    } else if v < min as i128 {
        Err(CodecError::Underflow)
    } else {
        Ok(v as i64)
    }
}

fn unsigned(value: &Value, max: u64) -> Result<u64, CodecError> {
    let v = coerce_i128(value)?;
    if v < 0 {
        Err(CodecError::Underflow)
    } else if v > max as i128 {
        Err(CodecError::Overflow)
    } else {
        Ok(v as u64)
    }
}

fn coerce_f64(value: &Value) -> Result<f64, CodecError> {
    match value {
        Value::F64(v) => Ok(*v),
        Value::I64(v) => Ok(*v as f64),
        Value::U64(v) => Ok(*v as f64),
        Value::Bool(b) => Ok(*b as u8 as f64),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CodecError::BadType(format!("not a float: {:?}", s))),
        Value::List(_) => Err(CodecError::BadType("expected float, got list".into())),
    }
}

fn pack_string(text: &str, read_amount: u16) -> Result<Vec<u16>, CodecError> {
    let bytes = text.as_bytes();
    if bytes.len() > read_amount as usize {
        return Err(CodecError::Overflow);
    }
    let word_count = read_amount.div_ceil(2) as usize;
    let mut padded = bytes.to_vec();
    padded.resize(word_count * 2, 0);
    Ok(padded
        .chunks(2)
        .map(|pair| ((pair[0] as u16) << 8) | pair[1] as u16)
        .collect())
}

fn expected_registers(data_type: DataType, read_amount: u16) -> usize {
    match data_type {
        DataType::String => read_amount.div_ceil(2) as usize,
        other => other.width() as usize * read_amount as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value, data_type: DataType, word_order: WordOrder, read_amount: u16) {
        let regs = encode_registers(&value, data_type, word_order, read_amount).unwrap();
        let decoded = decode_registers(&regs, data_type, word_order, read_amount).unwrap();
        let expected = match &value {
            Value::Str(_) => value.clone(),
            Value::List(_) => value.clone(),
            scalar => Value::List(vec![scalar.clone()]),
        };
        assert_eq!(decoded, expected, "{:?} via {:?}", value, word_order);
    }

    #[test]
    fn int16_decode_matches_wire_example() {
        // Registers [0x002A] on a big-endian device → 42.
        let decoded =
            decode_registers(&[0x002A], DataType::Int16, WordOrder::Big, 1).unwrap();
        assert_eq!(decoded, Value::List(vec![Value::I64(42)]));
    }

    #[test]
    fn int16_negative_is_twos_complement() {
        let decoded =
            decode_registers(&[0xFFFE], DataType::Int16, WordOrder::Big, 1).unwrap();
        assert_eq!(decoded, Value::List(vec![Value::I64(-2)]));
    }

    #[test]
    fn float32_little_endian_pi() {
        let decoded =
            decode_registers(&[0xF5C3, 0x4048], DataType::Float32, WordOrder::Little, 1)
                .unwrap();
        match decoded {
            Value::List(items) => match items[0] {
                Value::F64(v) => assert!((v - 3.14).abs() < 1e-6, "got {}", v),
                ref other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn word_order_roundtrips() {
        for order in [WordOrder::Big, WordOrder::Little] {
            roundtrip(Value::I64(-123456), DataType::Int32, order, 1);
            roundtrip(Value::U64(3_000_000_000), DataType::Uint32, order, 1);
            roundtrip(Value::I64(i64::MIN + 7), DataType::Int64, order, 1);
            roundtrip(Value::U64(u64::MAX - 1), DataType::Uint64, order, 1);
            roundtrip(Value::F64(-0.15625), DataType::Float32, order, 1);
            roundtrip(Value::F64(2.718281828459045), DataType::Float64, order, 1);
            roundtrip(Value::I64(-2), DataType::Int16, order, 1);
            roundtrip(Value::U64(65535), DataType::Uint16, order, 1);
        }
    }

    #[test]
    fn multi_value_roundtrip() {
        roundtrip(
            Value::List(vec![Value::I64(1), Value::I64(-1), Value::I64(300)]),
            DataType::Int16,
            WordOrder::Big,
            3,
        );
        roundtrip(
            Value::List(vec![Value::F64(1.5), Value::F64(-2.25)]),
            DataType::Float32,
            WordOrder::Little,
            2,
        );
    }

    #[test]
    fn string_packs_msb_first_and_trims_nuls() {
        let regs = encode_registers(
            &Value::Str("abc".into()),
            DataType::String,
            WordOrder::Big,
            5,
        )
        .unwrap();
        assert_eq!(regs, vec![0x6162, 0x6300, 0x0000]);
        let decoded = decode_registers(&regs, DataType::String, WordOrder::Big, 5).unwrap();
        assert_eq!(decoded, Value::Str("abc".into()));
    }

    #[test]
    fn string_too_long_overflows() {
        let err = encode_registers(
            &Value::Str("toolong".into()),
            DataType::String,
            WordOrder::Big,
            4,
        )
        .unwrap_err();
        assert_eq!(err, CodecError::Overflow);
    }

    #[test]
    fn integer_range_checks() {
        let over = encode_registers(&Value::I64(70000), DataType::Int16, WordOrder::Big, 1);
        assert_eq!(over.unwrap_err(), CodecError::Overflow);

        let under = encode_registers(&Value::I64(-1), DataType::Uint16, WordOrder::Big, 1);
        assert_eq!(under.unwrap_err(), CodecError::Underflow);

        let ok = encode_registers(&Value::U64(65535), DataType::Uint16, WordOrder::Big, 1);
        assert_eq!(ok.unwrap(), vec![0xFFFF]);
    }

    #[test]
    fn numeric_strings_coerce_on_write() {
        let regs =
            encode_registers(&Value::Str("42".into()), DataType::Int16, WordOrder::Big, 1)
                .unwrap();
        assert_eq!(regs, vec![0x002A]);

        let err = encode_registers(
            &Value::Str("forty-two".into()),
            DataType::Int16,
            WordOrder::Big,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::BadType(_)));
    }

    #[test]
    fn coil_coercion() {
        assert_eq!(encode_coils(&Value::Bool(true), 1).unwrap(), vec![true]);
        assert_eq!(encode_coils(&Value::I64(0), 1).unwrap(), vec![false]);
        assert_eq!(
            encode_coils(
                &Value::List(vec![Value::Bool(true), Value::U64(3)]),
                2
            )
            .unwrap(),
            vec![true, true]
        );
        assert!(encode_coils(&Value::Str("on".into()), 1).is_err());
    }

    #[test]
    fn bits_truncate_to_read_amount() {
        let bits = [true, false, true, true, false, false, false, false];
        assert_eq!(
            decode_bits(&bits, 3),
            Value::List(vec![
                Value::Bool(true),
                Value::Bool(false),
                Value::Bool(true)
            ])
        );
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = decode_registers(&[1, 2, 3], DataType::Int32, WordOrder::Big, 1).unwrap_err();
        assert_eq!(err, CodecError::Length { expected: 2, got: 3 });
    }
}
