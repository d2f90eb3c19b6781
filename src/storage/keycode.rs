//! Order-preserving key encoding
//!
//! Keys are serialized so that the byte order of two encoded keys matches the
//! order of the original values, which lets the MVCC and SQL layers express
//! "all rows of table t" or "all versions of key k" as a byte prefix scan.
//!
//! Encoding:
//! - enum variant: one byte with the variant index
//! - bool: 0x00 or 0x01
//! - u64: 8 bytes big-endian
//! - i64: 8 bytes big-endian with the sign bit flipped
//! - f64: big-endian bits, sign bit flipped for positives, all bits flipped for negatives
//! - bytes and strings: 0x00 escaped as 0x00 0xff, terminated by 0x00 0x00
//!
//! The format is not self-describing, so only types with a known shape
//! (tuples, tuple/newtype/unit enum variants, primitives above) are supported.

use serde::{
    de::{self, IntoDeserializer},
    ser::{self, Impossible},
    Deserialize, Serialize,
};

use crate::error::{Error, Result};

/// Serializes a key into its order-preserving byte form
pub fn serialize_key<T: Serialize>(key: &T) -> Result<Vec<u8>> {
    let mut serializer = Serializer { output: Vec::new() };
    key.serialize(&mut serializer)?;
    Ok(serializer.output)
}

/// Deserializes a key, rejecting trailing bytes
pub fn deserialize_key<'a, T: Deserialize<'a>>(input: &'a [u8]) -> Result<T> {
    let mut deserializer = Deserializer { input };
    let value = T::deserialize(&mut deserializer)?;
    if !deserializer.input.is_empty() {
        return Err(Error::Internal(format!(
            "unexpected trailing bytes {:x?} in key",
            deserializer.input
        )));
    }
    Ok(value)
}

fn unsupported(what: &str) -> Error {
    Error::Internal(format!("{} is not supported by the key encoding", what))
}

pub struct Serializer {
    output: Vec<u8>,
}

impl Serializer {
    fn write_bytes(&mut self, bytes: &[u8]) {
        for b in bytes {
            match b {
                0x00 => self.output.extend([0x00, 0xff]),
                b => self.output.push(*b),
            }
        }
        self.output.extend([0x00, 0x00]);
    }
}

impl<'a> ser::Serializer for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Impossible<(), Error>;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Impossible<(), Error>;
    type SerializeTupleVariant = Self;
    type SerializeMap = Impossible<(), Error>;
    type SerializeStruct = Impossible<(), Error>;
    type SerializeStructVariant = Impossible<(), Error>;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.output.push(v as u8);
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Result<()> {
        Err(unsupported("i8"))
    }

    fn serialize_i16(self, _: i16) -> Result<()> {
        Err(unsupported("i16"))
    }

    fn serialize_i32(self, _: i32) -> Result<()> {
        Err(unsupported("i32"))
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        let mut bytes = v.to_be_bytes();
        bytes[0] ^= 1 << 7;
        self.output.extend(bytes);
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Result<()> {
        Err(unsupported("u8"))
    }

    fn serialize_u16(self, _: u16) -> Result<()> {
        Err(unsupported("u16"))
    }

    fn serialize_u32(self, _: u32) -> Result<()> {
        Err(unsupported("u32"))
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.output.extend(v.to_be_bytes());
        Ok(())
    }

    fn serialize_f32(self, _: f32) -> Result<()> {
        Err(unsupported("f32"))
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        let mut bytes = v.to_be_bytes();
        if v.is_sign_negative() {
            bytes.iter_mut().for_each(|b| *b = !*b);
        } else {
            bytes[0] ^= 1 << 7;
        }
        self.output.extend(bytes);
        Ok(())
    }

    fn serialize_char(self, _: char) -> Result<()> {
        Err(unsupported("char"))
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.write_bytes(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        self.write_bytes(v);
        Ok(())
    }

    fn serialize_none(self) -> Result<()> {
        Err(unsupported("Option"))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _: &T) -> Result<()> {
        Err(unsupported("Option"))
    }

    fn serialize_unit(self) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        index: u32,
        _variant: &'static str,
    ) -> Result<()> {
        let index = u8::try_from(index)
            .map_err(|_| Error::Internal(format!("variant index {} too large", index)))?;
        self.output.push(index);
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<()> {
        self.serialize_unit_variant(name, index, variant)?;
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(unsupported("sequence"))
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(unsupported("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        self.serialize_unit_variant(name, index, variant)?;
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Err(unsupported("map"))
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeStruct> {
        Err(unsupported("struct"))
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(unsupported("struct variant"))
    }
}

impl<'a> ser::SerializeTuple for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a> ser::SerializeTupleVariant for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

pub struct Deserializer<'de> {
    input: &'de [u8],
}

impl<'de> Deserializer<'de> {
    fn take_bytes(&mut self, len: usize) -> Result<&'de [u8]> {
        if self.input.len() < len {
            return Err(Error::Internal(format!(
                "key too short: need {} bytes, have {}",
                len,
                self.input.len()
            )));
        }
        let (bytes, rest) = self.input.split_at(len);
        self.input = rest;
        Ok(bytes)
    }

    /// Decodes an escaped, terminated byte string
    fn take_escaped(&mut self) -> Result<Vec<u8>> {
        let mut decoded = Vec::new();
        let mut iter = self.input.iter().enumerate();
        let taken = loop {
            match iter.next() {
                Some((_, 0x00)) => match iter.next() {
                    Some((i, 0x00)) => break i + 1,
                    Some((_, 0xff)) => decoded.push(0x00),
                    _ => return Err(Error::Internal("invalid escape sequence in key".into())),
                },
                Some((_, b)) => decoded.push(*b),
                None => return Err(Error::Internal("unterminated byte string in key".into())),
            }
        };
        self.input = &self.input[taken..];
        Ok(decoded)
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V: de::Visitor<'de>>(self, _: V) -> Result<V::Value> {
        Err(unsupported("self-describing deserialization"))
    }

    fn deserialize_bool<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.take_bytes(1)?[0] {
            0x00 => visitor.visit_bool(false),
            0x01 => visitor.visit_bool(true),
            b => Err(Error::Internal(format!("invalid boolean byte {:#04x}", b))),
        }
    }

    fn deserialize_i64<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let mut bytes: [u8; 8] = self.take_bytes(8)?.try_into()?;
        bytes[0] ^= 1 << 7;
        visitor.visit_i64(i64::from_be_bytes(bytes))
    }

    fn deserialize_u64<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let bytes: [u8; 8] = self.take_bytes(8)?.try_into()?;
        visitor.visit_u64(u64::from_be_bytes(bytes))
    }

    fn deserialize_f64<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let mut bytes: [u8; 8] = self.take_bytes(8)?.try_into()?;
        if bytes[0] >> 7 == 1 {
            bytes[0] ^= 1 << 7;
        } else {
            bytes.iter_mut().for_each(|b| *b = !*b);
        }
        visitor.visit_f64(f64::from_be_bytes(bytes))
    }

    fn deserialize_str<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let bytes = self.take_escaped()?;
        visitor.visit_str(&String::from_utf8(bytes)?)
    }

    fn deserialize_string<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let bytes = self.take_escaped()?;
        visitor.visit_string(String::from_utf8(bytes)?)
    }

    fn deserialize_bytes<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let bytes = self.take_escaped()?;
        visitor.visit_bytes(&bytes)
    }

    fn deserialize_byte_buf<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_byte_buf(self.take_escaped()?)
    }

    fn deserialize_unit<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_tuple<V: de::Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(self)
    }

    fn deserialize_enum<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_enum(self)
    }

    serde::forward_to_deserialize_any! {
        i8 i16 i32 u8 u16 u32 f32 char option unit_struct newtype_struct seq
        tuple_struct map struct identifier ignored_any
    }
}

impl<'de, 'a> de::SeqAccess<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>> {
        seed.deserialize(&mut **self).map(Some)
    }
}

impl<'de, 'a> de::EnumAccess<'de> for &'a mut Deserializer<'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant)> {
        let index = self.take_bytes(1)?[0] as u32;
        let variant_de: de::value::U32Deserializer<Error> = index.into_deserializer();
        let value = seed.deserialize(variant_de)?;
        Ok((value, self))
    }
}

impl<'de, 'a> de::VariantAccess<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: de::Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(self)
    }

    fn struct_variant<V: de::Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value> {
        Err(unsupported("struct variant"))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{deserialize_key, serialize_key};
    use crate::error::Result;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Key {
        Unit,
        Name(String),
        Entry(String, u64),
        Raw(#[serde(with = "serde_bytes")] Vec<u8>, i64),
        Score(f64),
    }

    #[test]
    fn test_encode_layout() -> Result<()> {
        assert_eq!(serialize_key(&Key::Unit)?, vec![0x00]);
        assert_eq!(
            serialize_key(&Key::Name("a\0b".into()))?,
            vec![0x01, b'a', 0x00, 0xff, b'b', 0x00, 0x00]
        );
        assert_eq!(
            serialize_key(&Key::Entry("t".into(), 258))?,
            vec![0x02, b't', 0x00, 0x00, 0, 0, 0, 0, 0, 0, 1, 2]
        );
        Ok(())
    }

    #[test]
    fn test_decode() -> Result<()> {
        for key in [
            Key::Unit,
            Key::Name("users".into()),
            Key::Entry("t\0".into(), u64::MAX),
            Key::Raw(vec![0, 0xff, 0, 7], -42),
            Key::Score(-1.5),
        ] {
            let bytes = serialize_key(&key)?;
            assert_eq!(deserialize_key::<Key>(&bytes)?, key);
        }
        assert!(deserialize_key::<Key>(&[0x01, b'a']).is_err());
        Ok(())
    }

    #[test]
    fn test_order_preserved() -> Result<()> {
        let ordered = [
            Key::Entry("t".into(), 2),
            Key::Entry("t".into(), 10),
            Key::Entry("t".into(), 300),
            Key::Entry("t1".into(), 0),
            Key::Entry("u".into(), 0),
        ];
        let encoded = ordered
            .iter()
            .map(serialize_key)
            .collect::<Result<Vec<_>>>()?;
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));

        let ints = [i64::MIN, -1, 0, 1, i64::MAX]
            .iter()
            .map(|i| serialize_key(&Key::Raw(vec![], *i)))
            .collect::<Result<Vec<_>>>()?;
        assert!(ints.windows(2).all(|w| w[0] < w[1]));

        let floats = [-10.5, -0.25, 0.0, 0.25, 1e10]
            .iter()
            .map(|f| serialize_key(&Key::Score(*f)))
            .collect::<Result<Vec<_>>>()?;
        assert!(floats.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }
}
