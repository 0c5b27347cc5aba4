/*!
A streaming CBOR ([RFC 8949](https://www.rfc-editor.org/rfc/rfc8949.html))
encoder and decoder over abstract byte streams.

The codec makes a single pass in each direction with no intermediate tree:
the [`encode::Encoder`] writes headers and payloads straight into any
[`stream::Sink`], and the [`decode::Decoder`] pulls them back out of any
[`stream::Source`] through a strict state machine that tracks nested
definite and indefinite containers, chunked byte/text strings, tags, and
break markers across caller-supplied closures. An owned [`value::Value`]
tree is available for the "decode arbitrary CBOR" path and for tests.

# Encoding

```
use rill_cbor::encode;

let bytes = encode::with(|e| {
    e.emit_map(Some(2), |e| {
        e.emit_text("name");
        e.emit_text("rill");
        e.emit_text("size");
        e.emit_int(3);
    });
});
assert_eq!(bytes[0], 0xA2);
```

Definite-length scopes count the values their closure writes and panic on a
mismatch, so framing errors surface at the write site.

# Decoding

```
use rill_cbor::decode::{self, Decoder};

let data: &[u8] = &[0x83, 0x01, 0x02, 0x03];
let mut dec = Decoder::new(data);
let sum = dec
    .parse_array(|dec, _| {
        let mut sum = 0;
        while let Some(v) = dec.try_parse_int()? {
            sum += v;
        }
        Ok::<_, decode::Error>(sum)
    })
    .unwrap();
assert_eq!(sum, 6);
```

# Objects

Maps whose keys are integer field ids can be written with
[`encode::Encoder::emit_obj`] and probed with
[`decode::Decoder::parse_obj`], requesting fields in increasing id order
without materializing the map.
*/

pub mod decode;
pub mod encode;
pub mod float;
pub mod stream;
pub mod value;

pub use crate::float::Width;

#[cfg(test)]
mod decode_tests;
