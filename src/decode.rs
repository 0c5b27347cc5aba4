/*!
Streaming CBOR decoder.

[`Decoder`] pulls headers and payloads from any [`Source`] through a strict
state machine. Every read runs as a scope: the decoder parses one header,
hands control to a caller-supplied closure to consume the payload (which may
itself make nested reads), then verifies the payload was fully consumed
before advancing the enclosing container. Indefinite-length containers,
chunked byte/text strings, and break markers are tracked by the same
machine, so a closure can simply loop with the `try_parse_*` readers until
they report the end of the current context.

```
use rill_cbor::decode::Decoder;

let data: &[u8] = &[0x82, 0x01, 0x63, b't', b'w', b'o'];
let mut dec = Decoder::new(data);
let (n, s) = dec
    .parse_array(|dec, _count| {
        let n = dec.parse_int()?;
        let s = dec.parse_text()?;
        Ok::<_, rill_cbor::decode::Error>((n, s))
    })
    .unwrap();
assert_eq!((n, s.as_str()), (1, "two"));
```

A decode error poisons the decoder: any further read panics until
[`Decoder::reset`] is called.
*/

use half::f16;
use num_traits::FromPrimitive;
use thiserror::Error;

use crate::float::Width;
use crate::stream::Source;
use crate::value::Value;

/// Nesting cap for the generic-tree and skip readers.
pub const MAX_RECURSION: usize = 64;

/// Decode-time input errors.
///
/// These indicate malformed or unexpected input, never codec misuse; misuse
/// (out-of-order field probes, reads after an error) panics instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A value header was required but the input ended.
    #[error("Expected value, got end of input")]
    UnexpectedEnd,

    /// A header or payload needs more bytes than the source holds.
    #[error("Not enough data for encoded value")]
    NotEnoughData,

    /// Minor values 28..=30 are reserved.
    #[error("Reserved minor-type value {0}")]
    ReservedMinor(u8),

    /// Minor 31 on a major type with no indefinite form.
    #[error("Indefinite length is not valid for major type {0}")]
    InvalidIndefinite(u8),

    /// A break byte outside any indefinite context.
    #[error("Break at an illegal position")]
    UnexpectedBreak,

    /// A map ended between a key and its value.
    #[error("Map has key but no value")]
    PartialMap,

    /// A typed reader met a different header type.
    #[error("Incorrect type, expecting {expected}, found {found}")]
    IncorrectType {
        /// What the reader required.
        expected: &'static str,
        /// What the header carried.
        found: &'static str,
    },

    /// Simple values other than false/true/null/undefined.
    #[error("Invalid simple type {0}")]
    InvalidSimpleType(u8),

    /// A chunked string contains a chunk of the wrong major type or a
    /// nested indefinite chunk.
    #[error("Chunked string contains an invalid chunk")]
    InvalidChunk,

    /// The tag on the wire differs from the expected one.
    #[error("Tag mismatch, expecting {expected}, found {found}")]
    TagMismatch {
        /// The caller-supplied tag.
        expected: u64,
        /// The tag on the wire.
        found: u64,
    },

    /// A byte string's total length differs from the caller's expectation.
    #[error("Length mismatch, expecting {expected} bytes, found {actual}")]
    LengthMismatch {
        /// The caller-supplied length.
        expected: u64,
        /// The length on the wire.
        actual: u64,
    },

    /// A reader closure returned before consuming its whole payload.
    #[error("More items to be read")]
    MoreItems,

    /// A container's declared size cannot be tracked.
    #[error("Container size out of range")]
    Oversize,

    /// Values nested deeper than [`MAX_RECURSION`].
    #[error("Maximum recursion depth reached")]
    MaxRecursion,

    /// Data remains after the single value a one-shot parse allows.
    #[error("Additional data after the end of the value")]
    TrailingData,

    /// A float narrowing would lose precision.
    #[error("Loss of floating-point precision")]
    PrecisionLoss,

    /// No enumeration variant matches the decoded discriminant.
    #[error("Invalid enumeration value {0}")]
    InvalidEnumValue(i64),

    /// Text is not valid UTF-8.
    #[error(transparent)]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// An integer does not fit the requested width.
    #[error(transparent)]
    IntOutOfRange(#[from] std::num::TryFromIntError),
}

/// The type of a just-parsed header. `End` means the current context has no
/// further values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// No more values in the current context.
    End,
    /// Major 0 or 1.
    Int,
    /// Major 2.
    Blob,
    /// Major 3.
    Text,
    /// Major 4.
    Array,
    /// Major 5.
    Map,
    /// Major 6.
    Tag,
    /// Major 7, minor 20 or 21.
    Bool,
    /// Major 7, minor 22.
    Null,
    /// Major 7, minor 23.
    Undefined,
    /// Major 7, minor 25.
    Float16,
    /// Major 7, minor 26.
    Float32,
    /// Major 7, minor 27.
    Float64,
}

impl Kind {
    /// Name used in type-mismatch errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::End => "End",
            Self::Int => "Int",
            Self::Blob => "Blob",
            Self::Text => "Text",
            Self::Array => "Array",
            Self::Map => "Map",
            Self::Tag => "Tag",
            Self::Bool => "Bool",
            Self::Null => "Null",
            Self::Undefined => "Undefined",
            Self::Float16 => "Float16",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
        }
    }
}

/// Payload progress of the innermost open value, or the context sentinel
/// the decoder is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Definite remainder: items for arrays, key+value slots for maps,
    /// bytes for strings, 1 for tags, 0 for payload-free values.
    Count(u64),
    /// Top level: values until end of input.
    Sequence,
    /// Inside an indefinite byte string, between chunks.
    BlobChunks,
    /// Inside an indefinite text string, between chunks.
    TextChunks,
    /// Inside an indefinite array.
    IndefiniteList,
    /// Inside an indefinite map, a key comes next.
    IndefiniteMapKey,
    /// Inside an indefinite map, a value comes next.
    IndefiniteMapValue,
    /// A break byte was just consumed; folded into the enclosing context
    /// before the read completes.
    Break,
    /// Poisoned by an earlier error.
    Failed,
}

/// A streaming CBOR decoder over a byte source.
///
/// Single-threaded; not safe for concurrent use. After any read returns an
/// error the decoder is poisoned and further reads panic until
/// [`Decoder::reset`].
pub struct Decoder<S> {
    source: S,
    argument: u64,
    progress: Progress,
    pending: Option<u8>,
}

impl<S: Source> Decoder<S> {
    /// Creates a decoder reading a top-level sequence of values from
    /// `source`.
    pub fn new(source: S) -> Self {
        Self {
            source,
            argument: 0,
            progress: Progress::Sequence,
            pending: None,
        }
    }

    /// Restores the initial top-level sequence state, clearing any error.
    /// The underlying source is left wherever it was.
    pub fn reset(&mut self) {
        self.argument = 0;
        self.progress = Progress::Sequence;
        self.pending = None;
    }

    /// Consumes the decoder, returning the source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// `true` when the decoder sits at the top level with no bytes left.
    pub fn at_end(&mut self) -> bool {
        self.progress == Progress::Sequence && self.pending.is_none() && !self.source.can_read(1)
    }

    fn next_initial(&mut self) -> Option<u8> {
        if let Some(b) = self.pending.take() {
            return Some(b);
        }
        if self.source.can_read(1) {
            Some(self.source.read_raw_be(1) as u8)
        } else {
            None
        }
    }

    fn peek_initial(&mut self) -> Option<u8> {
        let b = self.next_initial()?;
        self.pending = Some(b);
        Some(b)
    }

    /// Parses one header, leaving its argument in `self.argument` and the
    /// payload progress in `self.progress`.
    fn read_header(&mut self) -> Result<Kind, Error> {
        match self.progress {
            Progress::Failed => panic!("decoder used after a decode error; call reset() first"),
            Progress::Count(0) | Progress::Break => return Ok(Kind::End),
            _ => {}
        }

        let Some(initial) = self.next_initial() else {
            return match self.progress {
                Progress::Sequence => Ok(Kind::End),
                _ => Err(Error::UnexpectedEnd),
            };
        };
        let major = initial >> 5;
        let minor = initial & 0x1F;

        if minor == 31 {
            if major == 7 {
                // Break byte.
                return match self.progress {
                    Progress::BlobChunks
                    | Progress::TextChunks
                    | Progress::IndefiniteList
                    | Progress::IndefiniteMapKey => {
                        self.progress = Progress::Break;
                        Ok(Kind::End)
                    }
                    Progress::IndefiniteMapValue => Err(Error::PartialMap),
                    _ => Err(Error::UnexpectedBreak),
                };
            }
            if !(2..=5).contains(&major) {
                return Err(Error::InvalidIndefinite(major));
            }
        }

        // Chunk contexts only admit definite chunks of the same major type.
        match self.progress {
            Progress::BlobChunks if major != 2 || minor == 31 => return Err(Error::InvalidChunk),
            Progress::TextChunks if major != 3 || minor == 31 => return Err(Error::InvalidChunk),
            _ => {}
        }

        let indefinite = minor == 31;
        let argument = match minor {
            0..=23 => u64::from(minor),
            24..=27 => {
                let width = 1usize << (minor - 24);
                if !self.source.can_read(width) {
                    return Err(Error::NotEnoughData);
                }
                self.source.read_raw_be(width)
            }
            28..=30 => return Err(Error::ReservedMinor(minor)),
            _ => 0,
        };
        self.argument = argument;

        let kind = match major {
            0 => {
                self.argument = i64::try_from(argument)? as u64;
                self.progress = Progress::Count(0);
                Kind::Int
            }
            1 => {
                let magnitude = i64::try_from(argument)?;
                self.argument = (-1 - magnitude) as u64;
                self.progress = Progress::Count(0);
                Kind::Int
            }
            2 | 3 => {
                if indefinite {
                    self.progress = if major == 2 {
                        Progress::BlobChunks
                    } else {
                        Progress::TextChunks
                    };
                } else {
                    let len = usize::try_from(argument).map_err(|_| Error::NotEnoughData)?;
                    if !self.source.can_read(len) {
                        return Err(Error::NotEnoughData);
                    }
                    self.progress = Progress::Count(argument);
                }
                if major == 2 {
                    Kind::Blob
                } else {
                    Kind::Text
                }
            }
            4 => {
                self.progress = if indefinite {
                    Progress::IndefiniteList
                } else {
                    Progress::Count(argument)
                };
                Kind::Array
            }
            5 => {
                self.progress = if indefinite {
                    Progress::IndefiniteMapKey
                } else {
                    Progress::Count(argument.checked_mul(2).ok_or(Error::Oversize)?)
                };
                Kind::Map
            }
            6 => {
                self.progress = Progress::Count(1);
                Kind::Tag
            }
            _ => {
                self.progress = Progress::Count(0);
                match minor {
                    20 => {
                        self.argument = 0;
                        Kind::Bool
                    }
                    21 => {
                        self.argument = 1;
                        Kind::Bool
                    }
                    22 => Kind::Null,
                    23 => Kind::Undefined,
                    25 => Kind::Float16,
                    26 => Kind::Float32,
                    27 => Kind::Float64,
                    0..=19 => return Err(Error::InvalidSimpleType(minor)),
                    // minor 24: a one-byte simple value, also unsupported
                    _ => return Err(Error::InvalidSimpleType(argument as u8)),
                }
            }
        };
        Ok(kind)
    }

    /// The read-one discipline: snapshot the enclosing context, parse a
    /// header, run the payload callback, then verify consumption and
    /// advance the enclosing context. Any error poisons the decoder.
    fn scoped<T, F, E>(&mut self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Self, Kind) -> Result<T, E>,
        E: From<Error>,
    {
        let outer = self.progress;
        let kind = match self.read_header() {
            Ok(kind) => kind,
            Err(e) => {
                self.progress = Progress::Failed;
                return Err(e.into());
            }
        };
        if kind == Kind::End {
            if self.progress == Progress::Break {
                // The break terminates the context we were reading from.
                self.progress = Progress::Count(0);
            }
            return Ok(None);
        }
        match f(self, kind).and_then(|v| {
            self.end_value(outer).map_err(E::from)?;
            Ok(v)
        }) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                self.progress = Progress::Failed;
                Err(e)
            }
        }
    }

    /// Verifies the just-read value's payload is exhausted, then restores
    /// and advances the enclosing context.
    fn end_value(&mut self, outer: Progress) -> Result<(), Error> {
        if self.progress != Progress::Count(0) {
            return Err(Error::MoreItems);
        }
        self.progress = match outer {
            Progress::Sequence => Progress::Sequence,
            Progress::Count(n) => Progress::Count(n - 1),
            Progress::IndefiniteList => Progress::IndefiniteList,
            Progress::IndefiniteMapKey => Progress::IndefiniteMapValue,
            Progress::IndefiniteMapValue => Progress::IndefiniteMapKey,
            Progress::BlobChunks => Progress::BlobChunks,
            Progress::TextChunks => Progress::TextChunks,
            Progress::Break | Progress::Failed => unreachable!(),
        };
        Ok(())
    }

    /// Whether another value is available in the current context. Inside an
    /// indefinite container this may consume a pending break byte.
    pub fn has_more(&mut self) -> Result<bool, Error> {
        match self.progress {
            Progress::Failed => panic!("decoder used after a decode error; call reset() first"),
            Progress::Count(0) | Progress::Break => Ok(false),
            Progress::Count(_) => Ok(true),
            Progress::Sequence => Ok(self.pending.is_some() || self.source.can_read(1)),
            Progress::IndefiniteMapValue => Ok(true),
            Progress::IndefiniteList
            | Progress::IndefiniteMapKey
            | Progress::BlobChunks
            | Progress::TextChunks => match self.next_initial() {
                None => Err(Error::UnexpectedEnd),
                Some(0xFF) => {
                    self.progress = Progress::Count(0);
                    Ok(false)
                }
                Some(b) => {
                    self.pending = Some(b);
                    Ok(true)
                }
            },
        }
    }

    /// Reads part of the current definite payload into `buf`.
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let Progress::Count(remaining) = self.progress else {
            unreachable!()
        };
        debug_assert!(buf.len() as u64 <= remaining);
        let got = self.source.read_raw(buf);
        self.progress = Progress::Count(remaining - got as u64);
        if got < buf.len() {
            return Err(Error::NotEnoughData);
        }
        Ok(())
    }

    /// Reads an integer, or `None` at the end of the current context.
    pub fn try_parse_int(&mut self) -> Result<Option<i64>, Error> {
        self.scoped(|dec, kind| match kind {
            Kind::Int => Ok(dec.argument as i64),
            _ => Err(Error::IncorrectType {
                expected: "Int",
                found: kind.name(),
            }),
        })
    }

    /// Reads an integer.
    pub fn parse_int(&mut self) -> Result<i64, Error> {
        self.try_parse_int()?.ok_or(Error::NotEnoughData)
    }

    /// Reads an integer, saturating-clamped to the `i32` range. Use
    /// [`Decoder::parse_int`] for the full 64-bit value; the clamp here is
    /// deliberate, not an error.
    pub fn parse_int32(&mut self) -> Result<i32, Error> {
        Ok(self.parse_int()?.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    /// Reads a boolean, or `None` at the end of the current context.
    pub fn try_parse_bool(&mut self) -> Result<Option<bool>, Error> {
        self.scoped(|dec, kind| match kind {
            Kind::Bool => Ok(dec.argument == 1),
            _ => Err(Error::IncorrectType {
                expected: "Bool",
                found: kind.name(),
            }),
        })
    }

    /// Reads a boolean.
    pub fn parse_bool(&mut self) -> Result<bool, Error> {
        self.try_parse_bool()?.ok_or(Error::NotEnoughData)
    }

    /// Reads a `null`.
    pub fn parse_null(&mut self) -> Result<(), Error> {
        self.scoped(|_, kind| match kind {
            Kind::Null => Ok(()),
            _ => Err(Error::IncorrectType {
                expected: "Null",
                found: kind.name(),
            }),
        })?
        .ok_or(Error::NotEnoughData)
    }

    /// Reads an `undefined`.
    pub fn parse_undefined(&mut self) -> Result<(), Error> {
        self.scoped(|_, kind| match kind {
            Kind::Undefined => Ok(()),
            _ => Err(Error::IncorrectType {
                expected: "Undefined",
                found: kind.name(),
            }),
        })?
        .ok_or(Error::NotEnoughData)
    }

    /// Reads a float of any width as binary64, or `None` at the end of the
    /// current context.
    pub fn try_parse_float(&mut self) -> Result<Option<f64>, Error> {
        self.scoped(|dec, kind| match kind {
            Kind::Float16 => Ok(f64::from(f16::from_bits(dec.argument as u16))),
            Kind::Float32 => Ok(f64::from(f32::from_bits(dec.argument as u32))),
            Kind::Float64 => Ok(f64::from_bits(dec.argument)),
            _ => Err(Error::IncorrectType {
                expected: "Float",
                found: kind.name(),
            }),
        })
    }

    /// Reads a float of any width as binary64.
    pub fn parse_float(&mut self) -> Result<f64, Error> {
        self.try_parse_float()?.ok_or(Error::NotEnoughData)
    }

    /// Reads a tagged value, or `None` at the end of the current context.
    /// The callback receives the tag number and must consume exactly one
    /// value. If `expected` is given, a different tag is an error.
    pub fn try_parse_tag<T, F, E>(&mut self, expected: Option<u64>, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Self, u64) -> Result<T, E>,
        E: From<Error>,
    {
        self.scoped(|dec, kind| {
            if kind != Kind::Tag {
                return Err(Error::IncorrectType {
                    expected: "Tag",
                    found: kind.name(),
                }
                .into());
            }
            let tag = dec.argument;
            if let Some(expected) = expected {
                if expected != tag {
                    return Err(Error::TagMismatch {
                        expected,
                        found: tag,
                    }
                    .into());
                }
            }
            f(dec, tag)
        })
    }

    /// Reads a tagged value.
    pub fn parse_tag<T, F, E>(&mut self, expected: Option<u64>, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self, u64) -> Result<T, E>,
        E: From<Error>,
    {
        self.try_parse_tag(expected, f)?
            .ok_or_else(|| Error::NotEnoughData.into())
    }

    /// Reads a byte string, or `None` at the end of the current context.
    ///
    /// The callback gets a [`BlobSource`] over the payload: a bounded view
    /// for the definite form, a chunk-following view for the indefinite
    /// form. The callback must drain it completely. If `expected_len` is
    /// given, the total payload length must match.
    pub fn try_parse_blob<T, F, E>(&mut self, expected_len: Option<u64>, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut BlobSource<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        self.scoped(move |dec, kind| {
            if kind != Kind::Blob {
                return Err(Error::IncorrectType {
                    expected: "Blob",
                    found: kind.name(),
                }
                .into());
            }
            if let (Some(expected), Progress::Count(actual)) = (expected_len, dec.progress) {
                if expected != actual {
                    return Err(Error::LengthMismatch { expected, actual }.into());
                }
            }
            let chunked = dec.progress == Progress::BlobChunks;
            let mut sub = BlobSource {
                dec,
                chunked,
                done: false,
                total: 0,
                error: None,
            };
            let out = f(&mut sub)?;
            let total = sub.finish().map_err(E::from)?;
            if let Some(expected) = expected_len {
                if total != expected {
                    return Err(Error::LengthMismatch {
                        expected,
                        actual: total,
                    }
                    .into());
                }
            }
            Ok(out)
        })
    }

    /// Reads a byte string.
    pub fn parse_blob<T, F, E>(&mut self, expected_len: Option<u64>, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut BlobSource<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        self.try_parse_blob(expected_len, f)?
            .ok_or_else(|| Error::NotEnoughData.into())
    }

    /// Reads a whole byte string into a vector, following chunks if the
    /// string is indefinite.
    pub fn parse_blob_vec(&mut self) -> Result<Vec<u8>, Error> {
        self.try_parse_blob_vec()?.ok_or(Error::NotEnoughData)
    }

    /// Like [`Decoder::parse_blob_vec`], or `None` at the end of the
    /// current context.
    pub fn try_parse_blob_vec(&mut self) -> Result<Option<Vec<u8>>, Error> {
        self.scoped(|dec, kind| match kind {
            Kind::Blob => dec.read_blob_payload(),
            _ => Err(Error::IncorrectType {
                expected: "Blob",
                found: kind.name(),
            }),
        })
    }

    /// Reads a text string, concatenating chunks if the string is
    /// indefinite, or `None` at the end of the current context. Each chunk
    /// must be valid UTF-8 on its own.
    pub fn try_parse_text(&mut self) -> Result<Option<String>, Error> {
        self.scoped(|dec, kind| match kind {
            Kind::Text => dec.read_text_payload(),
            _ => Err(Error::IncorrectType {
                expected: "Text",
                found: kind.name(),
            }),
        })
    }

    /// Reads a text string.
    pub fn parse_text(&mut self) -> Result<String, Error> {
        self.try_parse_text()?.ok_or(Error::NotEnoughData)
    }

    fn read_blob_payload(&mut self) -> Result<Vec<u8>, Error> {
        match self.progress {
            Progress::Count(len) => {
                let mut buf = vec![0u8; len as usize];
                self.read_payload(&mut buf)?;
                Ok(buf)
            }
            Progress::BlobChunks => {
                let mut out = Vec::new();
                loop {
                    match self.read_header()? {
                        Kind::End => {
                            self.progress = Progress::Count(0);
                            return Ok(out);
                        }
                        _ => {
                            let Progress::Count(len) = self.progress else {
                                unreachable!()
                            };
                            let at = out.len();
                            out.resize(at + len as usize, 0);
                            self.read_payload(&mut out[at..])?;
                            self.progress = Progress::BlobChunks;
                        }
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    fn read_text_payload(&mut self) -> Result<String, Error> {
        match self.progress {
            Progress::Count(len) => {
                let mut buf = vec![0u8; len as usize];
                self.read_payload(&mut buf)?;
                String::from_utf8(buf).map_err(|e| e.utf8_error().into())
            }
            Progress::TextChunks => {
                let mut out = String::new();
                loop {
                    match self.read_header()? {
                        Kind::End => {
                            self.progress = Progress::Count(0);
                            return Ok(out);
                        }
                        _ => {
                            let Progress::Count(len) = self.progress else {
                                unreachable!()
                            };
                            let mut buf = vec![0u8; len as usize];
                            self.read_payload(&mut buf)?;
                            out.push_str(std::str::from_utf8(&buf)?);
                            self.progress = Progress::TextChunks;
                        }
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    /// Reads an array, or `None` at the end of the current context. The
    /// callback receives the element count (`None` for the indefinite form)
    /// and must consume values until the nested reads report `End`.
    pub fn try_parse_array<T, F, E>(&mut self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Self, Option<u64>) -> Result<T, E>,
        E: From<Error>,
    {
        self.scoped(|dec, kind| {
            if kind != Kind::Array {
                return Err(Error::IncorrectType {
                    expected: "Array",
                    found: kind.name(),
                }
                .into());
            }
            let count = match dec.progress {
                Progress::Count(n) => Some(n),
                _ => None,
            };
            f(dec, count)
        })
    }

    /// Reads an array.
    pub fn parse_array<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self, Option<u64>) -> Result<T, E>,
        E: From<Error>,
    {
        self.try_parse_array(f)?
            .ok_or_else(|| Error::NotEnoughData.into())
    }

    /// Reads an array of [`FromCbor`] values into a vector.
    pub fn parse_array_of<T>(&mut self) -> Result<Vec<T>, T::Error>
    where
        T: FromCbor,
    {
        self.parse_array(|dec, count| {
            let mut out = Vec::with_capacity(count.unwrap_or(0).min(256) as usize);
            match count {
                Some(n) => {
                    for _ in 0..n {
                        out.push(T::from_cbor(dec)?);
                    }
                }
                None => {
                    while dec.has_more().map_err(T::Error::from)? {
                        out.push(T::from_cbor(dec)?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Reads a map, or `None` at the end of the current context. The
    /// callback receives the entry count (`None` for the indefinite form)
    /// and must consume alternating keys and values until the nested reads
    /// report `End`.
    pub fn try_parse_map<T, F, E>(&mut self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Self, Option<u64>) -> Result<T, E>,
        E: From<Error>,
    {
        self.scoped(|dec, kind| {
            if kind != Kind::Map {
                return Err(Error::IncorrectType {
                    expected: "Map",
                    found: kind.name(),
                }
                .into());
            }
            let count = match dec.progress {
                Progress::Count(slots) => Some(slots / 2),
                _ => None,
            };
            f(dec, count)
        })
    }

    /// Reads a map.
    pub fn parse_map<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self, Option<u64>) -> Result<T, E>,
        E: From<Error>,
    {
        self.try_parse_map(f)?
            .ok_or_else(|| Error::NotEnoughData.into())
    }

    /// Reads a map of [`FromCbor`] keys and values into an entry vector.
    pub fn parse_map_of<K, V>(&mut self) -> Result<Vec<(K, V)>, K::Error>
    where
        K: FromCbor,
        V: FromCbor<Error = K::Error>,
    {
        self.parse_map(|dec, count| {
            let mut out = Vec::with_capacity(count.unwrap_or(0).min(256) as usize);
            match count {
                Some(n) => {
                    for _ in 0..n {
                        let k = K::from_cbor(dec)?;
                        let v = V::from_cbor(dec)?;
                        out.push((k, v));
                    }
                }
                None => {
                    while dec.has_more().map_err(K::Error::from)? {
                        let k = K::from_cbor(dec)?;
                        let v = V::from_cbor(dec)?;
                        out.push((k, v));
                    }
                }
            }
            Ok(out)
        })
    }

    /// Reads an object: a map whose keys are non-negative integer field
    /// ids, probed in strictly increasing id order through the [`Fields`]
    /// handle. Fields the callback does not request are drained on exit.
    pub fn try_parse_obj<T, F, E>(&mut self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Fields<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        self.scoped(|dec, kind| {
            if kind != Kind::Map {
                return Err(Error::IncorrectType {
                    expected: "Map",
                    found: kind.name(),
                }
                .into());
            }
            let mut fields = Fields {
                dec,
                state: FieldState::Fresh,
                last_consumed: -1,
            };
            let out = f(&mut fields)?;
            fields.finish().map_err(E::from)?;
            Ok(out)
        })
    }

    /// Reads an object.
    pub fn parse_obj<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Fields<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        self.try_parse_obj(f)?
            .ok_or_else(|| Error::NotEnoughData.into())
    }

    /// Reads object fields directly from the current context, with no map
    /// framing: the flat key/value sequence written by the encoder's
    /// header-less object form. Remaining pairs are drained on exit.
    pub fn parse_fields<T, F, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Fields<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        let mut fields = Fields {
            dec: self,
            state: FieldState::Fresh,
            last_consumed: -1,
        };
        let out = f(&mut fields)?;
        fields.finish().map_err(E::from)?;
        Ok(out)
    }

    /// Reads one value of any type into the generic tree, or `None` at the
    /// end of the current context. Indefinite-length encodings are not
    /// preserved: re-encoding the tree produces definite, shortest-form
    /// bytes.
    pub fn try_parse_value(&mut self) -> Result<Option<Value>, Error> {
        self.parse_value_depth(MAX_RECURSION)
    }

    /// Reads one value of any type into the generic tree.
    pub fn parse_value(&mut self) -> Result<Value, Error> {
        self.try_parse_value()?.ok_or(Error::NotEnoughData)
    }

    fn parse_value_depth(&mut self, depth: usize) -> Result<Option<Value>, Error> {
        self.scoped(|dec, kind| match kind {
            Kind::Int => Ok(Value::Int(dec.argument as i64)),
            Kind::Bool => Ok(Value::bool(dec.argument == 1)),
            Kind::Null => Ok(Value::Null),
            Kind::Undefined => Ok(Value::Undefined),
            Kind::Float16 => Ok(Value::Float {
                value: f64::from(f16::from_bits(dec.argument as u16)),
                width: Width::Half,
            }),
            Kind::Float32 => Ok(Value::Float {
                value: f64::from(f32::from_bits(dec.argument as u32)),
                width: Width::Single,
            }),
            Kind::Float64 => Ok(Value::Float {
                value: f64::from_bits(dec.argument),
                width: Width::Double,
            }),
            Kind::Blob => dec.read_blob_payload().map(Value::Blob),
            Kind::Text => dec.read_text_payload().map(Value::Text),
            Kind::Array => {
                if depth == 0 {
                    return Err(Error::MaxRecursion);
                }
                let mut items = match dec.progress {
                    Progress::Count(n) => Vec::with_capacity(n.min(256) as usize),
                    _ => Vec::new(),
                };
                while let Some(item) = dec.parse_value_depth(depth - 1)? {
                    items.push(item);
                }
                Ok(Value::Array(items))
            }
            Kind::Map => {
                if depth == 0 {
                    return Err(Error::MaxRecursion);
                }
                let mut entries = Vec::new();
                while let Some(key) = dec.parse_value_depth(depth - 1)? {
                    match dec.parse_value_depth(depth - 1)? {
                        Some(value) => entries.push((key, value)),
                        None => return Err(Error::PartialMap),
                    }
                }
                Ok(Value::Map(entries))
            }
            Kind::Tag => {
                if depth == 0 {
                    return Err(Error::MaxRecursion);
                }
                let tag = dec.argument;
                let inner = dec
                    .parse_value_depth(depth - 1)?
                    .ok_or(Error::NotEnoughData)?;
                Ok(Value::Tag(tag, Box::new(inner)))
            }
            Kind::End => unreachable!(),
        })
    }

    /// Skips one value of any type, recursing into containers and
    /// discarding string payloads. Returns `false` at the end of the
    /// current context.
    pub fn skip_value(&mut self) -> Result<bool, Error> {
        self.skip_value_depth(MAX_RECURSION)
    }

    fn skip_value_depth(&mut self, depth: usize) -> Result<bool, Error> {
        let skipped = self.scoped(|dec, kind| match kind {
            Kind::Int
            | Kind::Bool
            | Kind::Null
            | Kind::Undefined
            | Kind::Float16
            | Kind::Float32
            | Kind::Float64 => Ok(()),
            Kind::Blob | Kind::Text => dec.skip_string_payload(),
            Kind::Array | Kind::Map => {
                if depth == 0 {
                    return Err(Error::MaxRecursion);
                }
                while dec.skip_value_depth(depth - 1)? {}
                Ok(())
            }
            Kind::Tag => {
                if depth == 0 {
                    return Err(Error::MaxRecursion);
                }
                dec.skip_value_depth(depth - 1)?;
                Ok(())
            }
            Kind::End => unreachable!(),
        })?;
        Ok(skipped.is_some())
    }

    fn skip_string_payload(&mut self) -> Result<(), Error> {
        let chunks = match self.progress {
            Progress::BlobChunks | Progress::TextChunks => Some(self.progress),
            _ => None,
        };
        loop {
            match self.progress {
                Progress::Count(0) => match chunks {
                    Some(state) => self.progress = state,
                    None => return Ok(()),
                },
                Progress::Count(remaining) => {
                    let want = remaining.min(usize::MAX as u64) as usize;
                    let skipped = self.source.read_skip(want);
                    if skipped == 0 {
                        return Err(Error::NotEnoughData);
                    }
                    self.progress = Progress::Count(remaining - skipped as u64);
                }
                Progress::BlobChunks | Progress::TextChunks => match self.read_header()? {
                    Kind::End => {
                        self.progress = Progress::Count(0);
                        return Ok(());
                    }
                    _ => {}
                },
                _ => unreachable!(),
            }
        }
    }

    /// Reads a value through its [`FromCbor`] implementation.
    pub fn parse<T: FromCbor>(&mut self) -> Result<T, T::Error> {
        T::from_cbor(self)
    }

    /// Reads an enumeration by its integer discriminant.
    pub fn parse_enum<T: FromPrimitive>(&mut self) -> Result<T, Error> {
        let v = self.parse_int()?;
        T::from_i64(v).ok_or(Error::InvalidEnumValue(v))
    }
}

/// A byte-level view over one byte string's payload, handed to
/// [`Decoder::parse_blob`] callbacks.
///
/// For the definite form it is bounded to the declared length; for the
/// indefinite form it follows successive chunk headers, so reads and skips
/// span chunk boundaries transparently. `can_read` only answers within the
/// current chunk. The view is exclusive to the callback and must not be
/// retained past it.
pub struct BlobSource<'a, S: Source> {
    dec: &'a mut Decoder<S>,
    chunked: bool,
    done: bool,
    total: u64,
    error: Option<Error>,
}

impl<S: Source> BlobSource<'_, S> {
    /// Total payload bytes consumed so far.
    pub fn total_read(&self) -> u64 {
        self.total
    }

    /// Bytes available in the current chunk, opening the next chunk when
    /// the current one is exhausted. 0 means the payload is drained or an
    /// error is held for the scope exit.
    fn ensure_chunk(&mut self) -> u64 {
        if self.error.is_some() {
            return 0;
        }
        loop {
            match self.dec.progress {
                Progress::Count(0) => {
                    if self.chunked && !self.done {
                        self.dec.progress = Progress::BlobChunks;
                    } else {
                        return 0;
                    }
                }
                Progress::Count(n) => return n,
                Progress::BlobChunks | Progress::TextChunks => {}
                _ => return 0,
            }
            match self.dec.read_header() {
                Ok(Kind::End) => {
                    self.done = true;
                    self.dec.progress = Progress::Count(0);
                    return 0;
                }
                Ok(_) => {}
                Err(e) => {
                    self.error = Some(e);
                    return 0;
                }
            }
        }
    }

    fn finish(&mut self) -> Result<u64, Error> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.ensure_chunk() > 0 {
            return Err(Error::MoreItems);
        }
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        Ok(self.total)
    }
}

impl<S: Source> Source for BlobSource<'_, S> {
    fn can_read(&mut self, n: usize) -> bool {
        self.ensure_chunk() >= n as u64 && self.dec.source.can_read(n)
    }

    fn suggest_available(&self) -> usize {
        let in_chunk = match self.dec.progress {
            Progress::Count(n) => n.min(usize::MAX as u64) as usize,
            _ => 0,
        };
        in_chunk.min(self.dec.source.suggest_available())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> usize {
        let mut done = 0;
        while done < buf.len() {
            let avail = self.ensure_chunk();
            if avail == 0 {
                break;
            }
            let want = avail.min((buf.len() - done) as u64) as usize;
            let got = self.dec.source.read_raw(&mut buf[done..done + want]);
            if let Progress::Count(n) = self.dec.progress {
                self.dec.progress = Progress::Count(n - got as u64);
            }
            self.total += got as u64;
            done += got;
            if got < want {
                break;
            }
        }
        done
    }

    fn read_skip(&mut self, n: usize) -> usize {
        let mut done = 0;
        while done < n {
            let avail = self.ensure_chunk();
            if avail == 0 {
                break;
            }
            let want = avail.min((n - done) as u64) as usize;
            let got = self.dec.source.read_skip(want);
            if let Progress::Count(remaining) = self.dec.progress {
                self.dec.progress = Progress::Count(remaining - got as u64);
            }
            self.total += got as u64;
            done += got;
            if got < want {
                break;
            }
        }
        done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Fresh,
    Consumed(u32),
    Peeked(u32),
    End,
}

/// Field-probing handle for [`Decoder::parse_obj`] and
/// [`Decoder::parse_fields`].
pub struct Fields<'a, S: Source> {
    dec: &'a mut Decoder<S>,
    state: FieldState,
    last_consumed: i64,
}

impl<S: Source> Fields<'_, S> {
    /// Probes for the field with the given id. Returns `Some` with the
    /// callback's result when the field is present, `None` when it is
    /// absent. Keys below the requested id are skipped; the first key above
    /// it is parked for the next probe.
    ///
    /// The callback must consume exactly one value.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not greater than the last consumed id: fields must
    /// be requested in strictly increasing order.
    pub fn field<T, F, E>(&mut self, id: u32, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut Decoder<S>) -> Result<T, E>,
        E: From<Error>,
    {
        if i64::from(id) <= self.last_consumed {
            panic!(
                "field {id} requested after field {} was consumed; ids must be strictly increasing",
                self.last_consumed
            );
        }
        loop {
            match self.state {
                FieldState::End => return Ok(None),
                FieldState::Peeked(parked) => {
                    if parked < id {
                        // The parked field was never requested; drop it.
                        self.state = FieldState::Fresh;
                        self.dec.skip_value().map_err(E::from)?;
                    } else if parked == id {
                        self.state = FieldState::Consumed(id);
                        self.last_consumed = i64::from(id);
                        return f(self.dec).map(Some);
                    } else {
                        return Ok(None);
                    }
                }
                FieldState::Fresh | FieldState::Consumed(_) => {
                    let key = match self.dec.try_parse_int().map_err(E::from)? {
                        None => {
                            self.state = FieldState::End;
                            return Ok(None);
                        }
                        Some(key) => key,
                    };
                    if key < i64::from(id) {
                        self.dec.skip_value().map_err(E::from)?;
                    } else if key == i64::from(id) {
                        self.state = FieldState::Consumed(id);
                        self.last_consumed = i64::from(id);
                        return f(self.dec).map(Some);
                    } else if key <= i64::from(i32::MAX) {
                        self.state = FieldState::Peeked(key as u32);
                        return Ok(None);
                    } else {
                        // Beyond the probeable id range; nothing further can
                        // match, so drain to the end.
                        self.dec.skip_value().map_err(E::from)?;
                        self.drain_pairs().map_err(E::from)?;
                        self.state = FieldState::End;
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn drain_pairs(&mut self) -> Result<(), Error> {
        while self.dec.skip_value()? {
            if !self.dec.skip_value()? {
                return Err(Error::PartialMap);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        if let FieldState::Peeked(_) = self.state {
            self.dec.skip_value()?;
            self.state = FieldState::Fresh;
        }
        if self.state != FieldState::End {
            self.drain_pairs()?;
            self.state = FieldState::End;
        }
        Ok(())
    }
}

/// A type that can read itself from a decoder as a single CBOR value.
pub trait FromCbor: Sized {
    /// The error produced; anything the decoder's own [`Error`] converts
    /// into.
    type Error: From<self::Error>;

    /// Reads one value.
    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error>;
}

impl FromCbor for i64 {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        decoder.parse_int()
    }
}

macro_rules! from_cbor_int {
    ($($t:ty),*) => {$(
        impl FromCbor for $t {
            type Error = Error;

            fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
                Ok(<$t>::try_from(decoder.parse_int()?)?)
            }
        }
    )*};
}

from_cbor_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromCbor for bool {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        decoder.parse_bool()
    }
}

impl FromCbor for f64 {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        decoder.parse_float()
    }
}

impl FromCbor for f32 {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        let v = decoder.parse_float()?;
        crate::float::narrow_f32(v)
            .or_else(|| v.is_nan().then_some(v as f32))
            .ok_or(Error::PrecisionLoss)
    }
}

impl FromCbor for String {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        decoder.parse_text()
    }
}

impl FromCbor for Vec<u8> {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        decoder.parse_blob_vec()
    }
}

impl FromCbor for Value {
    type Error = Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        decoder.parse_value()
    }
}

impl<T: FromCbor> FromCbor for Option<T> {
    type Error = T::Error;

    fn from_cbor<S: Source>(decoder: &mut Decoder<S>) -> Result<Self, Self::Error> {
        // Peek only while a value can actually follow; at an exhausted
        // context the next byte belongs to the enclosing container.
        let has_more = decoder.has_more().map_err(T::Error::from)?;
        if has_more && decoder.peek_initial() == Some(0xF7) {
            decoder.parse_undefined().map_err(T::Error::from)?;
            Ok(None)
        } else {
            Ok(Some(T::from_cbor(decoder)?))
        }
    }
}

/// Decodes exactly one [`FromCbor`] value from `data`, requiring the whole
/// input to be consumed.
pub fn parse<T: FromCbor>(data: &[u8]) -> Result<T, T::Error> {
    let mut decoder = Decoder::new(data);
    let value = T::from_cbor(&mut decoder)?;
    if !decoder.at_end() {
        return Err(Error::TrailingData.into());
    }
    Ok(value)
}

/// Decodes exactly one generic value from `data`, requiring the whole input
/// to be consumed.
pub fn parse_value(data: &[u8]) -> Result<Value, Error> {
    parse(data)
}
