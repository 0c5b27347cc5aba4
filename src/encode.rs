/*!
Streaming CBOR encoder.

[`Encoder`] writes type-and-argument headers in their shortest form and
delegates payload bytes to any [`Sink`]. Containers are written through
closure scopes: the encoder counts the values a closure produces and
asserts the exact count a definite-length header declared, so a malformed
writer fails loudly instead of producing broken framing.

```
use rill_cbor::encode;

let bytes = encode::with(|e| {
    e.emit_array(Some(2), |e| {
        e.emit_int(1);
        e.emit_text("two");
    });
});
assert_eq!(bytes, [0x82, 0x01, 0x63, b't', b'w', b'o']);
```
*/

use half::f16;
use num_traits::ToPrimitive;

use crate::float::{self, Width};
use crate::stream::{Buffer, Sink};
use crate::value::Value;

/// A type that can write itself as a single CBOR value.
pub trait ToCbor {
    /// Emits `self` to the encoder as exactly one value.
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>);
}

/// A streaming CBOR encoder over a byte sink.
///
/// Not safe for concurrent use; a panic inside a writer closure leaves the
/// sink partially written and the encoder should be discarded.
#[derive(Debug, Default)]
pub struct Encoder<W> {
    sink: W,
    written: u64,
}

impl<W: Sink> Encoder<W> {
    /// Creates an encoder over `sink`.
    pub fn new(sink: W) -> Self {
        Self { sink, written: 0 }
    }

    /// Consumes the encoder, returning the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Shortest-form header: 1, 2, 3, 5, or 9 bytes by argument magnitude.
    fn emit_head(&mut self, major: u8, argument: u64) {
        if argument < 24 {
            self.sink.write_u8((major << 5) | argument as u8);
        } else if argument <= u64::from(u8::MAX) {
            self.sink.write_u8((major << 5) | 24);
            self.sink.write_u8(argument as u8);
        } else if argument <= u64::from(u16::MAX) {
            self.sink.write_u8((major << 5) | 25);
            self.sink.write_raw_be(argument, 2);
        } else if argument <= u64::from(u32::MAX) {
            self.sink.write_u8((major << 5) | 26);
            self.sink.write_raw_be(argument, 4);
        } else {
            self.sink.write_u8((major << 5) | 27);
            self.sink.write_raw_be(argument, 8);
        }
    }

    /// Runs `f` in a fresh value-count scope, returning how many values it
    /// wrote. The enclosing count is restored afterwards.
    fn scope<F: FnOnce(&mut Self)>(&mut self, f: F) -> u64 {
        let saved = std::mem::replace(&mut self.written, 0);
        f(self);
        std::mem::replace(&mut self.written, saved)
    }

    /// Writes an integer. Negative values use major 1 with argument
    /// `-(v + 1)`.
    pub fn emit_int(&mut self, value: i64) {
        if value >= 0 {
            self.emit_head(0, value as u64);
        } else {
            self.emit_head(1, !(value as u64));
        }
        self.written += 1;
    }

    /// Writes an unsigned integer, covering the upper half of the u64 range
    /// that `emit_int` cannot express.
    pub fn emit_uint(&mut self, value: u64) {
        self.emit_head(0, value);
        self.written += 1;
    }

    /// Writes `false` or `true`.
    pub fn emit_bool(&mut self, value: bool) {
        self.sink.write_u8(if value { 0xF5 } else { 0xF4 });
        self.written += 1;
    }

    /// Writes `null`.
    pub fn emit_null(&mut self) {
        self.sink.write_u8(0xF6);
        self.written += 1;
    }

    /// Writes `undefined`.
    pub fn emit_undefined(&mut self) {
        self.sink.write_u8(0xF7);
        self.written += 1;
    }

    /// Writes a binary16 float (3 bytes).
    pub fn emit_f16(&mut self, value: f16) {
        self.sink.write_u8(0xF9);
        self.sink.write_raw(&value.to_be_bytes());
        self.written += 1;
    }

    /// Writes a binary32 float (5 bytes).
    pub fn emit_f32(&mut self, value: f32) {
        self.sink.write_u8(0xFA);
        self.sink.write_f32(value);
        self.written += 1;
    }

    /// Writes a binary64 float (9 bytes).
    pub fn emit_f64(&mut self, value: f64) {
        self.sink.write_u8(0xFB);
        self.sink.write_f64(value);
        self.written += 1;
    }

    /// Writes a float at the narrowest lossless width.
    pub fn emit_float(&mut self, value: f64) {
        if let Some(h) = float::narrow_f16(value) {
            self.emit_f16(h);
        } else if let Some(s) = float::narrow_f32(value) {
            self.emit_f32(s);
        } else {
            self.emit_f64(value);
        }
    }

    /// Writes a definite-length byte string.
    pub fn emit_blob(&mut self, bytes: &[u8]) {
        self.emit_head(2, bytes.len() as u64);
        self.sink.write_raw(bytes);
        self.written += 1;
    }

    /// Writes a definite-length byte string of declared length `len`, whose
    /// payload the callback writes directly to the sink.
    ///
    /// # Panics
    ///
    /// Panics if the callback writes a number of bytes other than `len`.
    pub fn emit_blob_with<F>(&mut self, len: usize, f: F)
    where
        F: FnOnce(&mut W),
    {
        self.emit_head(2, len as u64);
        let before = self.sink.total_written();
        f(&mut self.sink);
        let wrote = self.sink.total_written() - before;
        if wrote != len as u64 {
            panic!("blob callback wrote {wrote} bytes, declared {len}");
        }
        self.written += 1;
    }

    /// Writes an indefinite-length byte string. Each call to the stream
    /// handle emits one whole definite chunk; a break byte terminates the
    /// string when the callback returns.
    pub fn emit_blob_stream<F>(&mut self, f: F)
    where
        F: FnOnce(&mut BlobStream<'_, W>),
    {
        self.sink.write_u8(0x5F);
        let mut stream = BlobStream { enc: self };
        f(&mut stream);
        self.sink.write_u8(0xFF);
        self.written += 1;
    }

    /// Writes a definite-length text string.
    pub fn emit_text(&mut self, text: &str) {
        self.emit_head(3, text.len() as u64);
        self.sink.write_raw(text.as_bytes());
        self.written += 1;
    }

    /// Writes an indefinite-length text string, one definite chunk per call
    /// to the stream handle.
    pub fn emit_text_stream<F>(&mut self, f: F)
    where
        F: FnOnce(&mut TextStream<'_, W>),
    {
        self.sink.write_u8(0x7F);
        let mut stream = TextStream { enc: self };
        f(&mut stream);
        self.sink.write_u8(0xFF);
        self.written += 1;
    }

    /// Writes a tag followed by the single value the callback produces.
    ///
    /// # Panics
    ///
    /// Panics if the callback writes a number of values other than one.
    pub fn emit_tag<F>(&mut self, tag: u64, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.emit_head(6, tag);
        let wrote = self.scope(f);
        if wrote != 1 {
            panic!("tag scope wrote {wrote} values, expected exactly 1");
        }
        self.written += 1;
    }

    /// Writes an array. `Some(n)` emits a definite header and requires the
    /// callback to write exactly `n` values; `None` emits the indefinite
    /// form terminated by a break.
    ///
    /// # Panics
    ///
    /// Panics on a definite value-count mismatch.
    pub fn emit_array<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Self),
    {
        match count {
            Some(n) => self.emit_head(4, n as u64),
            None => self.sink.write_u8(0x9F),
        }
        let wrote = self.scope(f);
        match count {
            Some(n) if wrote != n as u64 => {
                panic!("array scope wrote {wrote} values, declared {n}")
            }
            Some(_) => {}
            None => self.sink.write_u8(0xFF),
        }
        self.written += 1;
    }

    /// Writes each item of a collection as a definite array.
    pub fn emit_array_of<T: ToCbor>(&mut self, items: &[T]) {
        self.emit_array(Some(items.len()), |e| {
            for item in items {
                item.to_cbor(e);
            }
        });
    }

    /// Writes a map. `Some(n)` emits a definite header and requires the
    /// callback to write exactly `2 * n` values (alternating key, value);
    /// `None` emits the indefinite form, which requires an even count.
    ///
    /// # Panics
    ///
    /// Panics on a value-count or parity mismatch.
    pub fn emit_map<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Self),
    {
        match count {
            Some(n) => self.emit_head(5, n as u64),
            None => self.sink.write_u8(0xBF),
        }
        let wrote = self.scope(f);
        match count {
            Some(n) => {
                let expected = 2 * n as u64;
                if wrote != expected {
                    panic!("map scope wrote {wrote} values, expected {expected}");
                }
            }
            None => {
                if wrote % 2 != 0 {
                    panic!("indefinite map scope wrote an odd number of values ({wrote})");
                }
                self.sink.write_u8(0xFF);
            }
        }
        self.written += 1;
    }

    /// Writes key/value pairs as a definite map.
    pub fn emit_map_of<K: ToCbor, V: ToCbor>(&mut self, entries: &[(K, V)]) {
        self.emit_map(Some(entries.len()), |e| {
            for (k, v) in entries {
                k.to_cbor(e);
                v.to_cbor(e);
            }
        });
    }

    /// Writes a definite map whose keys are strictly increasing integer
    /// field ids. The field count is discovered by staging the fields in a
    /// scratch buffer before the header is written.
    ///
    /// # Panics
    ///
    /// Panics if a field id is not greater than the previous one, or a
    /// field callback writes a number of values other than one.
    pub fn emit_obj<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ObjEncoder<'_, Buffer>),
    {
        let mut scratch = Encoder::new(Buffer::new());
        let mut obj = ObjEncoder {
            enc: &mut scratch,
            last_id: -1,
            fields: 0,
        };
        f(&mut obj);
        let fields = obj.fields;
        self.emit_head(5, fields);
        let staged = scratch.into_sink();
        self.sink.write_raw(staged.as_bytes());
        self.written += 1;
    }

    /// Writes object fields with no enclosing map header, as a flat
    /// key/value sequence in the current scope.
    ///
    /// # Panics
    ///
    /// Same conditions as [`Encoder::emit_obj`].
    pub fn emit_fields<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ObjEncoder<'_, W>),
    {
        let mut obj = ObjEncoder {
            enc: self,
            last_id: -1,
            fields: 0,
        };
        f(&mut obj);
    }

    /// Writes a generic value tree. Floats with [`Width::Auto`] choose the
    /// narrowest lossless width; explicit widths are honored. Containers
    /// are always written in definite-length form.
    ///
    /// # Panics
    ///
    /// Panics if a float's declared non-auto width cannot represent its
    /// value losslessly, i.e. the float fails [`Value::is_valid`]. NaN is
    /// accepted at any width.
    pub fn emit_value(&mut self, value: &Value) {
        match value {
            Value::Int(v) => self.emit_int(*v),
            Value::Float { value, width } => match width {
                Width::Auto => self.emit_float(*value),
                Width::Half => match float::narrow_f16(*value) {
                    Some(h) => self.emit_f16(h),
                    None if value.is_nan() => self.emit_f16(f16::from_f64(*value)),
                    None => panic!("float {value} is not representable at half width"),
                },
                Width::Single => match float::narrow_f32(*value) {
                    Some(s) => self.emit_f32(s),
                    None if value.is_nan() => self.emit_f32(*value as f32),
                    None => panic!("float {value} is not representable at single width"),
                },
                Width::Double => self.emit_f64(*value),
            },
            Value::Text(s) => self.emit_text(s),
            Value::Blob(b) => self.emit_blob(b),
            Value::Array(items) => self.emit_array(Some(items.len()), |e| {
                for item in items {
                    e.emit_value(item);
                }
            }),
            Value::Map(entries) => self.emit_map(Some(entries.len()), |e| {
                for (k, v) in entries {
                    e.emit_value(k);
                    e.emit_value(v);
                }
            }),
            Value::Tag(tag, inner) => self.emit_tag(*tag, |e| e.emit_value(inner)),
            Value::False => self.emit_bool(false),
            Value::True => self.emit_bool(true),
            Value::Null => self.emit_null(),
            Value::Undefined => self.emit_undefined(),
        }
    }

    /// Writes one already-encoded CBOR value verbatim.
    pub fn emit_raw(&mut self, encoded: &[u8]) {
        self.sink.write_raw(encoded);
        self.written += 1;
    }

    /// Writes any [`ToCbor`] value.
    pub fn emit<T: ToCbor + ?Sized>(&mut self, value: &T) {
        value.to_cbor(self);
    }

    /// Writes an enumeration by its integer discriminant.
    ///
    /// # Panics
    ///
    /// Panics if the discriminant does not fit an `i64`.
    pub fn emit_enum<T: ToPrimitive>(&mut self, value: &T) {
        let v = value
            .to_i64()
            .expect("enum discriminant must fit a signed 64-bit integer");
        self.emit_int(v);
    }
}

/// Writer handle inside [`Encoder::emit_blob_stream`]; each `chunk` call is
/// one definite byte-string chunk.
pub struct BlobStream<'a, W> {
    enc: &'a mut Encoder<W>,
}

impl<W: Sink> BlobStream<'_, W> {
    /// Writes one chunk.
    pub fn chunk(&mut self, bytes: &[u8]) {
        self.enc.emit_head(2, bytes.len() as u64);
        self.enc.sink.write_raw(bytes);
    }
}

/// Writer handle inside [`Encoder::emit_text_stream`]; each `chunk` call is
/// one definite text chunk.
pub struct TextStream<'a, W> {
    enc: &'a mut Encoder<W>,
}

impl<W: Sink> TextStream<'_, W> {
    /// Writes one chunk.
    pub fn chunk(&mut self, text: &str) {
        self.enc.emit_head(3, text.len() as u64);
        self.enc.sink.write_raw(text.as_bytes());
    }
}

/// Field writer handle for [`Encoder::emit_obj`] and
/// [`Encoder::emit_fields`].
pub struct ObjEncoder<'a, W> {
    enc: &'a mut Encoder<W>,
    last_id: i64,
    fields: u64,
}

impl<W: Sink> ObjEncoder<'_, W> {
    /// Writes one field: the id as the key, then the single value the
    /// callback produces.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not greater than the previously written id, or if
    /// the callback writes a number of values other than one.
    pub fn field<F>(&mut self, id: u32, f: F)
    where
        F: FnOnce(&mut Encoder<W>),
    {
        if i64::from(id) <= self.last_id {
            panic!(
                "field id {id} not greater than previous id {}; ids must be strictly increasing",
                self.last_id
            );
        }
        self.last_id = i64::from(id);
        self.enc.emit_int(i64::from(id));
        let wrote = self.enc.scope(f);
        if wrote != 1 {
            panic!("field {id} callback wrote {wrote} values, expected exactly 1");
        }
        self.enc.written += 1;
        self.fields += 1;
    }
}

impl<T: ToCbor + ?Sized> ToCbor for &T {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        (**self).to_cbor(encoder);
    }
}

macro_rules! to_cbor_int {
    ($($t:ty),*) => {$(
        impl ToCbor for $t {
            fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
                encoder.emit_int(i64::from(*self));
            }
        }
    )*};
}

to_cbor_int!(i8, i16, i32, i64, u8, u16, u32);

impl ToCbor for u64 {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_uint(*self);
    }
}

impl ToCbor for usize {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_uint(*self as u64);
    }
}

impl ToCbor for bool {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_bool(*self);
    }
}

impl ToCbor for f64 {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_float(*self);
    }
}

impl ToCbor for f32 {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_float(f64::from(*self));
    }
}

impl ToCbor for f16 {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_f16(*self);
    }
}

impl ToCbor for str {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_text(self);
    }
}

impl ToCbor for String {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_text(self);
    }
}

impl ToCbor for [u8] {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_blob(self);
    }
}

impl ToCbor for Vec<u8> {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_blob(self);
    }
}

impl<const N: usize> ToCbor for [u8; N] {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_blob(self);
    }
}

impl ToCbor for Value {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        encoder.emit_value(self);
    }
}

impl<T: ToCbor> ToCbor for Option<T> {
    fn to_cbor<W: Sink>(&self, encoder: &mut Encoder<W>) {
        match self {
            Some(value) => value.to_cbor(encoder),
            None => encoder.emit_undefined(),
        }
    }
}

/// Encodes one [`ToCbor`] value into a fresh byte vector.
pub fn emit<T: ToCbor + ?Sized>(value: &T) -> Vec<u8> {
    let mut e = Encoder::new(Vec::new());
    value.to_cbor(&mut e);
    e.into_sink()
}

/// Encodes a generic value tree into a fresh byte vector.
pub fn emit_value(value: &Value) -> Vec<u8> {
    let mut e = Encoder::new(Vec::new());
    e.emit_value(value);
    e.into_sink()
}

/// Runs a writer closure against a fresh byte vector and returns it.
pub fn with<F>(f: F) -> Vec<u8>
where
    F: FnOnce(&mut Encoder<Vec<u8>>),
{
    let mut e = Encoder::new(Vec::new());
    f(&mut e);
    e.into_sink()
}
