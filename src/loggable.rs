use crate::protocol::{self, Kind, Presentation, Writer};
use crate::string_registry::Literal;

/// A type that can be written as one field of a binary entry.
///
/// `encoded_len` must return exactly the bytes `encode` writes: producers
/// size the entry buffer from it before encoding.
///
/// Implementations for new types usually delegate to the ones provided here:
///
/// ```
/// use async_binary_logger::{Loggable, Writer};
///
/// struct Celsius(f32);
///
/// impl Loggable for Celsius {
///     fn encoded_len(&self) -> usize {
///         self.0.encoded_len()
///     }
///     fn encode(&self, w: &mut Writer<'_>) {
///         self.0.encode(w)
///     }
/// }
/// ```
pub trait Loggable {
    fn encoded_len(&self) -> usize;
    fn encode(&self, w: &mut Writer<'_>);
}

impl<T: Loggable + ?Sized> Loggable for &T {
    #[inline]
    fn encoded_len(&self) -> usize {
        (**self).encoded_len()
    }

    #[inline]
    fn encode(&self, w: &mut Writer<'_>) {
        (**self).encode(w)
    }
}

/// Integer types with a wire kind. Sealed: the set of kinds is fixed.
pub trait Integer: Copy + private::Sealed {
    #[doc(hidden)]
    fn field_len(self) -> usize;
    #[doc(hidden)]
    fn write_field(self, w: &mut Writer<'_>, presentation: Presentation);
}

mod private {
    pub trait Sealed {}
}

macro_rules! unsigned_impl {
    ($($ty:ty => $kind:ident),*) => {$(
        impl private::Sealed for $ty {}

        impl Integer for $ty {
            #[inline]
            fn field_len(self) -> usize {
                protocol::unsigned_len(self as u64)
            }
            #[inline]
            fn write_field(self, w: &mut Writer<'_>, presentation: Presentation) {
                w.write_unsigned(Kind::$kind, self as u64, presentation)
            }
        }

        impl Loggable for $ty {
            #[inline]
            fn encoded_len(&self) -> usize {
                self.field_len()
            }
            #[inline]
            fn encode(&self, w: &mut Writer<'_>) {
                self.write_field(w, Presentation::Normal)
            }
        }
    )*};
}

macro_rules! signed_impl {
    ($($ty:ty => $kind:ident),*) => {$(
        impl private::Sealed for $ty {}

        impl Integer for $ty {
            #[inline]
            fn field_len(self) -> usize {
                protocol::signed_len(self as i64)
            }
            #[inline]
            fn write_field(self, w: &mut Writer<'_>, presentation: Presentation) {
                w.write_signed(Kind::$kind, self as i64, presentation)
            }
        }

        impl Loggable for $ty {
            #[inline]
            fn encoded_len(&self) -> usize {
                self.field_len()
            }
            #[inline]
            fn encode(&self, w: &mut Writer<'_>) {
                self.write_field(w, Presentation::Normal)
            }
        }
    )*};
}

unsigned_impl!(u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => U64);
signed_impl!(i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => I64);

impl Loggable for f32 {
    fn encoded_len(&self) -> usize {
        protocol::F32_LEN
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_f32(*self, Presentation::Normal)
    }
}

impl Loggable for f64 {
    fn encoded_len(&self) -> usize {
        protocol::F64_LEN
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_f64(*self, Presentation::Normal)
    }
}

impl Loggable for bool {
    fn encoded_len(&self) -> usize {
        protocol::BOOL_LEN
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_bool(*self)
    }
}

/// Strings are copied into the entry.
impl Loggable for str {
    fn encoded_len(&self) -> usize {
        protocol::len_prefixed_len(self.len())
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_str(self)
    }
}

impl Loggable for String {
    fn encoded_len(&self) -> usize {
        self.as_str().encoded_len()
    }
    fn encode(&self, w: &mut Writer<'_>) {
        self.as_str().encode(w)
    }
}

/// Registered literals travel as their id only.
impl Loggable for Literal {
    fn encoded_len(&self) -> usize {
        protocol::unsigned_len(self.id() as u64)
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_literal(*self)
    }
}

impl<T> Loggable for *const T {
    fn encoded_len(&self) -> usize {
        Raw(*self as usize as u64).encoded_len()
    }
    fn encode(&self, w: &mut Writer<'_>) {
        Raw(*self as usize as u64).encode(w)
    }
}

impl<T> Loggable for *mut T {
    fn encoded_len(&self) -> usize {
        self.cast_const().encoded_len()
    }
    fn encode(&self, w: &mut Writer<'_>) {
        self.cast_const().encode(w)
    }
}

/// Renders an integer as `0x...`.
#[derive(Debug, Clone, Copy)]
pub struct Hex<T>(pub T);

impl<T: Integer> Loggable for Hex<T> {
    fn encoded_len(&self) -> usize {
        self.0.field_len()
    }
    fn encode(&self, w: &mut Writer<'_>) {
        self.0.write_field(w, Presentation::Hex)
    }
}

/// Zero-padded integers, fixed-point floats.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidth<T>(pub T);

impl<T: Integer> Loggable for FixedWidth<T> {
    fn encoded_len(&self) -> usize {
        self.0.field_len()
    }
    fn encode(&self, w: &mut Writer<'_>) {
        self.0.write_field(w, Presentation::FixedWidth)
    }
}

impl Loggable for FixedWidth<f32> {
    fn encoded_len(&self) -> usize {
        protocol::F32_LEN
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_f32(self.0, Presentation::FixedWidth)
    }
}

impl Loggable for FixedWidth<f64> {
    fn encoded_len(&self) -> usize {
        protocol::F64_LEN
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_f64(self.0, Presentation::FixedWidth)
    }
}

/// A byte stream, copied into the entry and rendered as hex.
#[derive(Debug, Clone, Copy)]
pub struct Bytes<'a>(pub &'a [u8]);

impl Loggable for Bytes<'_> {
    fn encoded_len(&self) -> usize {
        protocol::len_prefixed_len(self.0.len())
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_bytes(self.0)
    }
}

/// An opaque machine word such as an address, always rendered as hex.
#[derive(Debug, Clone, Copy)]
pub struct Raw(pub u64);

impl Loggable for Raw {
    fn encoded_len(&self) -> usize {
        protocol::unsigned_len(self.0)
    }
    fn encode(&self, w: &mut Writer<'_>) {
        w.write_unsigned(Kind::Raw, self.0, Presentation::Hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: &dyn Loggable) -> Vec<u8> {
        let mut buf = vec![0u8; value.encoded_len()];
        let mut w = Writer::new(&mut buf);
        value.encode(&mut w);
        assert!(!w.overflowed());
        let written = w.position();
        assert_eq!(written, buf.len(), "encoded_len must match encode");
        buf
    }

    #[test]
    fn test_numeric_serialization() {
        assert_eq!(encoded(&12345i32), vec![0x17, 0x39, 0x30]);
        assert_eq!(encoded(&7u64), vec![0x04, 7]);
        assert_eq!(encoded(&-2i64), vec![0x08, 0xfe]);
        assert_eq!(encoded(&1.5f32), [&[0x29u8][..], &1.5f32.to_le_bytes()].concat());
        assert_eq!(encoded(&Hex(0xabcdu16)), vec![0x52, 0xcd, 0xab]);
        assert_eq!(encoded(&FixedWidth(3u8)), vec![0x81, 3]);
    }

    #[test]
    fn test_string_serialization() {
        assert_eq!(encoded(&"Hello"), b"\x0d\x05Hello".to_vec());
        assert_eq!(encoded(&String::new()), vec![0x0d, 0]);
        assert_eq!(encoded(&Bytes(&[1, 2])), vec![0x0e, 2, 1, 2]);
    }

    #[test]
    fn test_bool_serialization() {
        assert_eq!(encoded(&true), vec![0x1b]);
        assert_eq!(encoded(&false), vec![0x0b]);
    }

    #[test]
    fn test_pointer_is_raw() {
        let p = 0x1000usize as *const u8;
        assert_eq!(encoded(&p), vec![0x50, 0x00, 0x10]);
    }
}
