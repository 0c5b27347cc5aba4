use half::f16;
use hex_literal::hex;

use crate::decode::{self, Decoder, Error};
use crate::encode;
use crate::stream::{Buffer, Source};
use crate::value::Value;
use crate::Width;

fn val(data: &[u8]) -> Value {
    decode::parse_value(data).unwrap()
}

/// A decoder that owns its input, so tests can hold it across statements.
fn dec(data: &[u8]) -> Decoder<Buffer> {
    Decoder::new(Buffer::from_vec(data.to_vec()))
}

#[test]
fn rfc_integers() {
    // RFC 8949, Appendix A:
    // https://www.rfc-editor.org/rfc/rfc8949.html#section-appendix.a
    assert_eq!(decode::parse::<i64>(&hex!("00")).unwrap(), 0);
    assert_eq!(decode::parse::<i64>(&hex!("01")).unwrap(), 1);
    assert_eq!(decode::parse::<i64>(&hex!("0a")).unwrap(), 10);
    assert_eq!(decode::parse::<i64>(&hex!("17")).unwrap(), 23);
    assert_eq!(decode::parse::<i64>(&hex!("1818")).unwrap(), 24);
    assert_eq!(decode::parse::<i64>(&hex!("1819")).unwrap(), 25);
    assert_eq!(decode::parse::<i64>(&hex!("1864")).unwrap(), 100);
    assert_eq!(decode::parse::<i64>(&hex!("1903e8")).unwrap(), 1000);
    assert_eq!(decode::parse::<i64>(&hex!("1a000f4240")).unwrap(), 1000000);
    assert_eq!(
        decode::parse::<i64>(&hex!("1b000000e8d4a51000")).unwrap(),
        1000000000000
    );
    assert_eq!(decode::parse::<i64>(&hex!("20")).unwrap(), -1);
    assert_eq!(decode::parse::<i64>(&hex!("29")).unwrap(), -10);
    assert_eq!(decode::parse::<i64>(&hex!("3863")).unwrap(), -100);
    assert_eq!(decode::parse::<i64>(&hex!("3903e7")).unwrap(), -1000);
    assert_eq!(
        decode::parse::<i64>(&hex!("3b7fffffffffffffff")).unwrap(),
        i64::MIN
    );
    assert_eq!(
        decode::parse::<i64>(&hex!("1b7fffffffffffffff")).unwrap(),
        i64::MAX
    );

    // Arguments outside the signed 64-bit model are rejected.
    assert!(decode::parse::<i64>(&hex!("1bffffffffffffffff")).is_err());
    assert!(decode::parse::<i64>(&hex!("3bffffffffffffffff")).is_err());
    // Bignums are not interpreted; the tag passes through to the tree.
    assert!(decode::parse::<i64>(&hex!("c249010000000000000000")).is_err());
}

#[test]
fn rfc_floats() {
    assert_eq!(decode::parse::<f64>(&hex!("f90000")).unwrap(), 0.0);
    assert_eq!(
        decode::parse::<f64>(&hex!("f98000")).unwrap().to_bits(),
        (-0.0f64).to_bits()
    );
    assert_eq!(decode::parse::<f64>(&hex!("f93c00")).unwrap(), 1.0);
    assert_eq!(
        decode::parse::<f64>(&hex!("fb3ff199999999999a")).unwrap(),
        1.1
    );
    assert_eq!(decode::parse::<f64>(&hex!("f93e00")).unwrap(), 1.5);
    assert_eq!(decode::parse::<f64>(&hex!("f97bff")).unwrap(), 65504.0);
    assert_eq!(decode::parse::<f64>(&hex!("fa47c35000")).unwrap(), 100000.0);
    assert_eq!(
        decode::parse::<f64>(&hex!("fa7f7fffff")).unwrap(),
        3.4028234663852886e+38
    );
    assert_eq!(
        decode::parse::<f64>(&hex!("fb7e37e43c8800759c")).unwrap(),
        1.0e+300
    );
    assert_eq!(
        decode::parse::<f64>(&hex!("f90001")).unwrap(),
        5.960464477539063e-8
    );
    assert_eq!(
        decode::parse::<f64>(&hex!("f90400")).unwrap(),
        0.00006103515625
    );
    assert_eq!(decode::parse::<f64>(&hex!("f9c400")).unwrap(), -4.0);
    assert_eq!(
        decode::parse::<f64>(&hex!("fbc010666666666666")).unwrap(),
        -4.1
    );
    assert_eq!(
        decode::parse::<f64>(&hex!("f97c00")).unwrap(),
        f64::INFINITY
    );
    assert!(decode::parse::<f64>(&hex!("f97e00")).unwrap().is_nan());
    assert_eq!(
        decode::parse::<f64>(&hex!("f9fc00")).unwrap(),
        f64::NEG_INFINITY
    );
    assert_eq!(
        decode::parse::<f64>(&hex!("fa7f800000")).unwrap(),
        f64::INFINITY
    );
    assert!(decode::parse::<f64>(&hex!("fa7fc00000")).unwrap().is_nan());
    assert_eq!(
        decode::parse::<f64>(&hex!("fb7ff0000000000000")).unwrap(),
        f64::INFINITY
    );
    assert!(decode::parse::<f64>(&hex!("fb7ff8000000000000"))
        .unwrap()
        .is_nan());
}

#[test]
fn rfc_simple_values() {
    assert!(!decode::parse::<bool>(&hex!("f4")).unwrap());
    assert!(decode::parse::<bool>(&hex!("f5")).unwrap());
    assert_eq!(val(&hex!("f6")), Value::Null);
    assert_eq!(val(&hex!("f7")), Value::Undefined);

    // Only false/true/null/undefined are supported.
    assert!(matches!(
        decode::parse_value(&hex!("f0")),
        Err(Error::InvalidSimpleType(16))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("f8ff")),
        Err(Error::InvalidSimpleType(255))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("f81f")),
        Err(Error::InvalidSimpleType(31))
    ));
}

#[test]
fn rfc_strings() {
    assert_eq!(decode::parse::<String>(&hex!("60")).unwrap(), "");
    assert_eq!(decode::parse::<String>(&hex!("6161")).unwrap(), "a");
    assert_eq!(decode::parse::<String>(&hex!("6449455446")).unwrap(), "IETF");
    assert_eq!(decode::parse::<String>(&hex!("62225c")).unwrap(), "\"\\");
    assert_eq!(decode::parse::<String>(&hex!("62c3bc")).unwrap(), "\u{00fc}");
    assert_eq!(decode::parse::<String>(&hex!("63e6b0b4")).unwrap(), "\u{6c34}");
    assert_eq!(
        decode::parse::<String>(&hex!("64f0908591")).unwrap(),
        "\u{10151}"
    );
    assert_eq!(
        decode::parse::<String>(&hex!("7f657374726561646d696e67ff")).unwrap(),
        "streaming"
    );

    assert_eq!(decode::parse::<Vec<u8>>(&hex!("40")).unwrap(), b"");
    assert_eq!(
        decode::parse::<Vec<u8>>(&hex!("4401020304")).unwrap(),
        hex!("01020304")
    );
    assert_eq!(
        decode::parse::<Vec<u8>>(&hex!("5f42010243030405ff")).unwrap(),
        hex!("0102030405")
    );
}

#[test]
fn rfc_arrays_and_maps() {
    let mut d = dec(&hex!("80"));
    d.parse_array(|d, count| {
        assert_eq!(count, Some(0));
        assert!(d.try_parse_int()?.is_none());
        Ok::<_, Error>(())
    })
    .unwrap();

    let mut d = dec(&hex!("8301820203820405"));
    d.parse_array(|d, count| {
        assert_eq!(count, Some(3));
        assert_eq!(d.parse_int()?, 1);
        d.parse_array(|d, _| {
            assert_eq!(d.parse_int()?, 2);
            assert_eq!(d.parse_int()?, 3);
            Ok::<_, Error>(())
        })?;
        d.parse_array(|d, _| {
            assert_eq!(d.parse_int()?, 4);
            assert_eq!(d.parse_int()?, 5);
            Ok::<_, Error>(())
        })?;
        Ok::<_, Error>(())
    })
    .unwrap();
    assert!(d.at_end());

    let mut d = dec(&hex!(
        "98190102030405060708090a0b0c0d0e0f101112131415161718181819"
    ));
    d.parse_array(|d, count| {
        assert_eq!(count, Some(25));
        for i in 1..=25 {
            assert_eq!(d.parse_int()?, i);
        }
        Ok::<_, Error>(())
    })
    .unwrap();

    let mut d = dec(&hex!("a26161016162820203"));
    d.parse_map(|d, count| {
        assert_eq!(count, Some(2));
        assert_eq!(d.parse_text()?, "a");
        assert_eq!(d.parse_int()?, 1);
        assert_eq!(d.parse_text()?, "b");
        d.parse_array(|d, _| {
            assert_eq!(d.parse_int()?, 2);
            assert_eq!(d.parse_int()?, 3);
            Ok::<_, Error>(())
        })?;
        Ok::<_, Error>(())
    })
    .unwrap();
}

#[test]
fn rfc_indefinite_containers() {
    let mut d = dec(&hex!("9fff"));
    d.parse_array(|d, count| {
        assert_eq!(count, None);
        assert!(d.try_parse_int()?.is_none());
        Ok::<_, Error>(())
    })
    .unwrap();
    assert!(d.at_end());

    let mut d = dec(&hex!("9f018202039f0405ffff"));
    d.parse_array(|d, count| {
        assert_eq!(count, None);
        assert_eq!(d.parse_int()?, 1);
        d.parse_array(|d, count| {
            assert_eq!(count, Some(2));
            assert_eq!(d.parse_int()?, 2);
            assert_eq!(d.parse_int()?, 3);
            Ok::<_, Error>(())
        })?;
        d.parse_array(|d, count| {
            assert_eq!(count, None);
            assert_eq!(d.parse_int()?, 4);
            assert_eq!(d.parse_int()?, 5);
            assert!(d.try_parse_int()?.is_none());
            Ok::<_, Error>(())
        })?;
        assert!(d.try_parse_int()?.is_none());
        Ok::<_, Error>(())
    })
    .unwrap();
    assert!(d.at_end());

    assert_eq!(
        val(&hex!("83018202039f0405ff")),
        Value::Array(vec![
            Value::Int(1),
            Value::Array(vec![Value::Int(2), Value::Int(3)]),
            Value::Array(vec![Value::Int(4), Value::Int(5)]),
        ])
    );
    assert_eq!(
        val(&hex!("bf61610161629f0203ffff")),
        Value::Map(vec![
            (Value::Text("a".into()), Value::Int(1)),
            (
                Value::Text("b".into()),
                Value::Array(vec![Value::Int(2), Value::Int(3)])
            ),
        ])
    );
    assert_eq!(
        val(&hex!("bf6346756ef563416d7421ff")),
        Value::Map(vec![
            (Value::Text("Fun".into()), Value::True),
            (Value::Text("Amt".into()), Value::Int(-2)),
        ])
    );
}

#[test]
fn tags_round_trip_uninterpreted() {
    let mut d = dec(&hex!("c11a514b67b0"));
    let v = d
        .parse_tag(Some(1), |d, tag| {
            assert_eq!(tag, 1);
            d.parse_int()
        })
        .unwrap();
    assert_eq!(v, 1363896240);

    assert_eq!(
        val(&hex!("d74401020304")),
        Value::Tag(23, Box::new(Value::Blob(hex!("01020304").into())))
    );
    assert_eq!(
        val(&hex!("c1c20a")),
        Value::Tag(1, Box::new(Value::Tag(2, Box::new(Value::Int(10)))))
    );
}

#[test]
fn tag_mismatch() {
    let mut d = dec(&hex!("c101"));
    let r: Result<i64, Error> = d.parse_tag(Some(2), |d, _| d.parse_int());
    assert!(matches!(
        r,
        Err(Error::TagMismatch {
            expected: 2,
            found: 1
        })
    ));
}

#[test]
fn tag_requires_inner_value() {
    assert!(matches!(
        decode::parse_value(&hex!("c1")),
        Err(Error::UnexpectedEnd)
    ));
}

#[test]
fn integer_boundaries_round_trip() {
    for v in [
        0i64,
        1,
        -1,
        23,
        -23,
        24,
        -24,
        0xFF,
        -0xFF,
        0x100,
        -0x100,
        0xFFFF,
        -0xFFFF,
        0x10000,
        -0x10000,
        0xFFFF_FFFF,
        -0xFFFF_FFFF,
        0x1_0000_0000,
        -0x1_0000_0000,
        i64::MIN,
        i64::MAX,
    ] {
        let bytes = encode::with(|e| e.emit_int(v));
        assert_eq!(decode::parse::<i64>(&bytes).unwrap(), v, "value {v}");
    }
}

#[test]
fn float_boundaries_round_trip() {
    for v in [
        0.0f64,
        -0.0,
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::NAN,
        f64::from_bits(0x7ff8_0000_0000_1234), // NaN with payload
        f64::from(f32::MIN),
        f64::from(f32::MAX),
        f64::MIN_POSITIVE,
        f64::MAX,
        f64::from(f16::from_f64(std::f64::consts::PI)),
        f64::from(std::f32::consts::PI),
        std::f64::consts::PI,
    ] {
        let bytes = encode::with(|e| e.emit_float(v));
        let back = val(&bytes);
        assert_eq!(back, Value::float(v), "value {v}");
    }
}

#[test]
fn int32_clamps_out_of_range() {
    let mut d = dec(&hex!("1b0000000100000000"));
    assert_eq!(d.parse_int32().unwrap(), i32::MAX);
    let mut d = dec(&hex!("3affffffff"));
    assert_eq!(d.parse_int32().unwrap(), i32::MIN);
    let mut d = dec(&hex!("187f"));
    assert_eq!(d.parse_int32().unwrap(), 127);
}

#[test]
fn type_mismatches() {
    let mut d = dec(&hex!("6161"));
    assert!(matches!(
        d.parse_int(),
        Err(Error::IncorrectType {
            expected: "Int",
            found: "Text"
        })
    ));

    let mut d = dec(&hex!("f6"));
    assert!(matches!(d.parse_bool(), Err(Error::IncorrectType { .. })));

    let mut d = dec(&hex!("f7"));
    assert!(matches!(d.parse_null(), Err(Error::IncorrectType { .. })));
}

#[test]
fn malformed_headers() {
    assert!(matches!(
        decode::parse_value(&hex!("1c")),
        Err(Error::ReservedMinor(28))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("1d")),
        Err(Error::ReservedMinor(29))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("3e")),
        Err(Error::ReservedMinor(30))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("1f")),
        Err(Error::InvalidIndefinite(0))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("3f")),
        Err(Error::InvalidIndefinite(1))
    ));
    assert!(matches!(
        decode::parse_value(&hex!("df")),
        Err(Error::InvalidIndefinite(6))
    ));
}

#[test]
fn break_positions() {
    // Top level.
    assert!(matches!(
        decode::parse_value(&hex!("ff")),
        Err(Error::UnexpectedBreak)
    ));
    // Inside a definite array.
    assert!(matches!(
        decode::parse_value(&hex!("8201ff")),
        Err(Error::UnexpectedBreak)
    ));
    // Between a key and its value in an indefinite map.
    assert!(matches!(
        decode::parse_value(&hex!("bf01ff")),
        Err(Error::PartialMap)
    ));
}

#[test]
fn truncated_input() {
    assert!(matches!(
        decode::parse_value(&[]),
        Err(Error::NotEnoughData)
    ));
    assert!(matches!(
        decode::parse_value(&hex!("8201")),
        Err(Error::UnexpectedEnd)
    ));
    assert!(matches!(
        decode::parse_value(&hex!("19ff")),
        Err(Error::NotEnoughData)
    ));
    assert!(matches!(
        decode::parse_value(&hex!("440102")),
        Err(Error::NotEnoughData)
    ));
    assert!(matches!(
        decode::parse_value(&hex!("5f4101")),
        Err(Error::UnexpectedEnd)
    ));
}

#[test]
fn trailing_data() {
    assert!(matches!(
        decode::parse_value(&hex!("0001")),
        Err(Error::TrailingData)
    ));
}

#[test]
fn invalid_chunks() {
    // Text chunk inside a byte stream.
    assert!(matches!(
        decode::parse_value(&hex!("5f6161ff")),
        Err(Error::InvalidChunk)
    ));
    // Nested indefinite chunk.
    assert!(matches!(
        decode::parse_value(&hex!("5f5fffff")),
        Err(Error::InvalidChunk)
    ));
    // Integer inside a text stream.
    assert!(matches!(
        decode::parse_value(&hex!("7f01ff")),
        Err(Error::InvalidChunk)
    ));
}

#[test]
fn strict_utf8() {
    assert!(matches!(
        decode::parse_value(&hex!("62fffe")),
        Err(Error::InvalidUtf8(_))
    ));
    // Each chunk must be valid UTF-8 on its own.
    assert!(matches!(
        decode::parse_value(&hex!("7f61c361bcff")),
        Err(Error::InvalidUtf8(_))
    ));
}

#[test]
fn text_chunk_counts() {
    assert_eq!(decode::parse::<String>(&hex!("7fff")).unwrap(), "");
    assert_eq!(decode::parse::<String>(&hex!("7f6161ff")).unwrap(), "a");
    assert_eq!(
        decode::parse::<String>(&hex!("7f60616160ff")).unwrap(),
        "a"
    );
}

#[test]
fn blob_chunk_counts() {
    assert_eq!(decode::parse::<Vec<u8>>(&hex!("5fff")).unwrap(), b"");
    assert_eq!(decode::parse::<Vec<u8>>(&hex!("5f4107ff")).unwrap(), [7]);
    assert_eq!(
        decode::parse::<Vec<u8>>(&hex!("5f40410740ff")).unwrap(),
        [7]
    );
}

#[test]
fn large_blob() {
    let payload = vec![0xAB; 10_000];
    let bytes = encode::with(|e| e.emit_blob(&payload));
    assert_eq!(bytes.len(), 3 + 10_000);
    assert_eq!(decode::parse::<Vec<u8>>(&bytes).unwrap(), payload);
}

#[test]
fn blob_reader_definite() {
    let mut d = dec(&hex!("4401020304"));
    let out = d
        .parse_blob(Some(4), |b| {
            assert!(b.can_read(4));
            Ok::<_, Error>(b.read_all_available())
        })
        .unwrap();
    assert_eq!(out, hex!("01020304"));
    assert!(d.at_end());
}

#[test]
fn blob_reader_expected_length_mismatch() {
    let mut d = dec(&hex!("4401020304"));
    let r: Result<Vec<u8>, Error> = d.parse_blob(Some(3), |b| Ok(b.read_all_available()));
    assert!(matches!(
        r,
        Err(Error::LengthMismatch {
            expected: 3,
            actual: 4
        })
    ));
}

#[test]
fn blob_reader_chunked_expected_length() {
    let mut d = dec(&hex!("5f42010243030405ff"));
    let out = d
        .parse_blob(Some(5), |b| Ok::<_, Error>(b.read_all_available()))
        .unwrap();
    assert_eq!(out, hex!("0102030405"));

    let mut d = dec(&hex!("5f42010243030405ff"));
    let r: Result<Vec<u8>, Error> = d.parse_blob(Some(4), |b| Ok(b.read_all_available()));
    assert!(matches!(r, Err(Error::LengthMismatch { .. })));
}

#[test]
fn blob_reader_must_be_drained() {
    let mut d = dec(&hex!("4401020304"));
    let r: Result<(), Error> = d.parse_blob(None, |_| Ok(()));
    assert!(matches!(r, Err(Error::MoreItems)));
}

#[test]
fn blob_reader_skip_spans_chunks() {
    let mut payload = vec![0u8; 37];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut payload);

    let bytes = encode::with(|e| {
        e.emit_blob_stream(|s| {
            s.chunk(b"abcdef");
            s.chunk(b"ghijkl");
            s.chunk(&payload);
        });
    });

    let mut d = dec(&bytes);
    let out = d
        .parse_blob(None, |b| {
            assert_eq!(b.read_skip(12), 12);
            let mut out = vec![0u8; 37];
            assert_eq!(b.read_raw(&mut out), 37);
            assert!(!b.can_read(1));
            Ok::<_, Error>(out)
        })
        .unwrap();
    assert_eq!(out, payload);
    assert!(d.at_end());
}

#[test]
fn skip_is_equivalent_to_reading() {
    let bytes = encode::with(|e| {
        e.emit_map(None, |e| {
            e.emit_text("k");
            e.emit_array(Some(3), |e| {
                e.emit_blob_stream(|s| {
                    s.chunk(b"ab");
                    s.chunk(b"cd");
                });
                e.emit_text_stream(|s| s.chunk("ef"));
                e.emit_tag(55799, |e| e.emit_float(1.5));
            });
        });
        e.emit_int(42);
    });

    let mut d = dec(&bytes);
    assert!(d.skip_value().unwrap());
    assert_eq!(d.parse_int().unwrap(), 42);
    assert!(d.at_end());
    assert!(!d.skip_value().unwrap());

    let mut d = dec(&bytes);
    d.parse_value().unwrap();
    assert_eq!(d.parse_int().unwrap(), 42);
    assert!(d.at_end());
}

#[test]
fn nesting_to_ten_levels() {
    let mut bytes = vec![0x81u8; 10];
    bytes.push(0x01);
    let mut expected = Value::Int(1);
    for _ in 0..10 {
        expected = Value::Array(vec![expected]);
    }
    assert_eq!(val(&bytes), expected);

    let mut d = dec(&bytes);
    assert!(d.skip_value().unwrap());
    assert!(d.at_end());
}

#[test]
fn nesting_beyond_recursion_cap() {
    let mut bytes = vec![0x81u8; decode::MAX_RECURSION + 5];
    bytes.push(0x01);
    assert!(matches!(
        decode::parse_value(&bytes),
        Err(Error::MaxRecursion)
    ));
    let mut d = dec(&bytes);
    assert!(matches!(d.skip_value(), Err(Error::MaxRecursion)));
}

#[test]
fn duplicate_map_keys_preserved() {
    let bytes = encode::with(|e| {
        e.emit_map(Some(2), |e| {
            e.emit_int(1);
            e.emit_text("a");
            e.emit_int(1);
            e.emit_text("b");
        });
    });
    assert_eq!(
        val(&bytes),
        Value::Map(vec![
            (Value::Int(1), Value::Text("a".into())),
            (Value::Int(1), Value::Text("b".into())),
        ])
    );
}

#[test]
fn empty_and_single_pair_maps() {
    assert_eq!(val(&hex!("a0")), Value::Map(vec![]));
    assert_eq!(
        val(&hex!("a10102")),
        Value::Map(vec![(Value::Int(1), Value::Int(2))])
    );
    assert_eq!(val(&hex!("bfff")), Value::Map(vec![]));
}

#[test]
fn float_widths_recorded() {
    assert_eq!(
        decode::parse_value(&hex!("f952e0")).unwrap(),
        Value::Float {
            value: 55.0,
            width: Width::Half
        }
    );
    let Value::Float { width, .. } = val(&hex!("fa47c35000")) else {
        panic!("not a float");
    };
    assert_eq!(width, Width::Single);
    let Value::Float { width, .. } = val(&hex!("fb3ff199999999999a")) else {
        panic!("not a float");
    };
    assert_eq!(width, Width::Double);
}

#[test]
fn canonical_reencode() {
    // Half-precision 55.0 narrows back to the same bytes.
    let v = val(&hex!("f952e0"));
    assert_eq!(v, Value::float(55.0));
    assert_eq!(*encode::emit_value(&Value::float(55.0)), hex!("f952e0"));

    // Indefinite encodings re-encode definite.
    let v = val(&hex!("9f0102ff"));
    assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(2)]));
    assert_eq!(*encode::emit_value(&v), hex!("820102"));
}

#[test]
fn top_level_sequence() {
    let mut d = dec(&hex!("010203"));
    assert_eq!(d.parse_int().unwrap(), 1);
    assert_eq!(d.parse_int().unwrap(), 2);
    assert_eq!(d.parse_int().unwrap(), 3);
    assert!(d.try_parse_int().unwrap().is_none());
    assert!(d.at_end());
}

#[test]
fn poisoned_decoder_recovers_after_reset() {
    let mut d = dec(&hex!("1c07"));
    assert!(d.parse_int().is_err());
    d.reset();
    assert_eq!(d.parse_int().unwrap(), 7);
}

#[test]
#[should_panic(expected = "decoder used after a decode error")]
fn poisoned_decoder_panics() {
    let mut d = dec(&hex!("1c00"));
    assert!(d.parse_int().is_err());
    let _ = d.parse_int();
}

#[test]
fn reader_error_poisons_decoder() {
    let mut d = dec(&hex!("820102"));
    let r: Result<(), Error> = d.parse_array(|d, _| {
        d.parse_int()?;
        Err(Error::PrecisionLoss)
    });
    assert!(matches!(r, Err(Error::PrecisionLoss)));
}

#[test]
fn unconsumed_payload_is_an_error() {
    // The callback leaves one array item unread.
    let mut d = dec(&hex!("820102"));
    let r: Result<(), Error> = d.parse_array(|d, _| {
        d.parse_int()?;
        Ok(())
    });
    assert!(matches!(r, Err(Error::MoreItems)));
}

#[test]
fn object_field_probing() {
    let bytes = hex!("a20a0a0f0f");
    let mut d = dec(&bytes);
    let present = d
        .parse_obj(|o| {
            let mut present = Vec::new();
            for id in 0..20 {
                if let Some(v) = o.field(id, |d| d.parse_int())? {
                    assert_eq!(v, i64::from(id));
                    present.push(id);
                }
            }
            Ok::<_, Error>(present)
        })
        .unwrap();
    assert_eq!(present, [10, 15]);
    assert!(d.at_end());
}

#[test]
#[should_panic(expected = "ids must be strictly increasing")]
fn probing_below_consumed_id_panics() {
    let bytes = hex!("a20a0a0f0f");
    let mut d = dec(&bytes);
    let _ = d.parse_obj(|o| {
        o.field(10, |d| d.parse_int())?;
        o.field(5, |d| d.parse_int())?;
        Ok::<_, Error>(())
    });
}

#[test]
fn object_skips_unrequested_fields() {
    let bytes = encode::with(|e| {
        e.emit_obj(|o| {
            o.field(1, |e| e.emit_text("skipped"));
            o.field(7, |e| {
                e.emit_array(Some(2), |e| {
                    e.emit_int(1);
                    e.emit_int(2);
                })
            });
            o.field(9, |e| e.emit_int(9));
        });
        e.emit_int(99);
    });
    let mut d = dec(&bytes);
    let v = d.parse_obj(|o| o.field(9, |d| d.parse_int())).unwrap();
    assert_eq!(v, Some(9));
    assert_eq!(d.parse_int().unwrap(), 99);
    assert!(d.at_end());
}

#[test]
fn object_drains_on_early_exit() {
    let bytes = encode::with(|e| {
        e.emit_obj(|o| {
            o.field(1, |e| e.emit_int(1));
            o.field(2, |e| e.emit_int(2));
        });
        e.emit_int(42);
    });
    let mut d = dec(&bytes);
    d.parse_obj(|_| Ok::<_, Error>(())).unwrap();
    assert_eq!(d.parse_int().unwrap(), 42);
}

#[test]
fn object_peeked_field_consumable_later() {
    let bytes = hex!("a20a0a0f0f");
    let mut d = dec(&bytes);
    d.parse_obj(|o| {
        // Requesting 3 parks key 10; 10 must then still be consumable.
        assert!(o.field(3, |d| d.parse_int())?.is_none());
        assert_eq!(o.field(10, |d| d.parse_int())?, Some(10));
        assert_eq!(o.field(15, |d| d.parse_int())?, Some(15));
        assert!(o.field(16, |d| d.parse_int())?.is_none());
        Ok::<_, Error>(())
    })
    .unwrap();
    assert!(d.at_end());
}

#[test]
fn object_key_beyond_i32_drains() {
    let bytes = encode::with(|e| {
        e.emit_map(Some(2), |e| {
            e.emit_int(5_000_000_000);
            e.emit_int(1);
            e.emit_int(6_000_000_000);
            e.emit_int(2);
        });
    });
    let mut d = dec(&bytes);
    let (a, b) = d
        .parse_obj(|o| {
            let a = o.field(3, |d| d.parse_int())?;
            let b = o.field(4, |d| d.parse_int())?;
            Ok::<_, Error>((a, b))
        })
        .unwrap();
    assert_eq!((a, b), (None, None));
    assert!(d.at_end());
}

#[test]
fn object_with_indefinite_map() {
    let bytes = hex!("bf0a0a0f0fff");
    let mut d = dec(&bytes);
    d.parse_obj(|o| {
        assert_eq!(o.field(10, |d| d.parse_int())?, Some(10));
        assert_eq!(o.field(15, |d| d.parse_int())?, Some(15));
        Ok::<_, Error>(())
    })
    .unwrap();
    assert!(d.at_end());
}

#[test]
fn object_rejects_non_integer_keys() {
    let bytes = hex!("a1616101");
    let mut d = dec(&bytes);
    let r: Result<Option<i64>, Error> = d.parse_obj(|o| o.field(0, |d| d.parse_int()));
    assert!(matches!(r, Err(Error::IncorrectType { .. })));
}

#[test]
fn implicit_object_fields() {
    let bytes = hex!("0a0a0f0f");
    let mut d = dec(&bytes);
    let (a, b) = d
        .parse_fields(|o| {
            let a = o.field(10, |d| d.parse_int())?;
            let b = o.field(15, |d| d.parse_int())?;
            Ok::<_, Error>((a, b))
        })
        .unwrap();
    assert_eq!((a, b), (Some(10), Some(15)));
    assert!(d.at_end());
}

#[test]
fn collection_readers() {
    let mut d = dec(&hex!("9f010203ff"));
    assert_eq!(d.parse_array_of::<i64>().unwrap(), [1, 2, 3]);

    let mut d = dec(&hex!("83010203"));
    assert_eq!(d.parse_array_of::<i64>().unwrap(), [1, 2, 3]);

    let mut d = dec(&hex!("a2616101616202"));
    assert_eq!(
        d.parse_map_of::<String, i64>().unwrap(),
        [("a".to_string(), 1), ("b".to_string(), 2)]
    );
}

#[derive(Debug, PartialEq)]
enum Mode {
    Off,
    On,
}

impl num_traits::FromPrimitive for Mode {
    fn from_i64(n: i64) -> Option<Self> {
        match n {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            _ => None,
        }
    }

    fn from_u64(n: u64) -> Option<Self> {
        Self::from_i64(i64::try_from(n).ok()?)
    }
}

impl num_traits::ToPrimitive for Mode {
    fn to_i64(&self) -> Option<i64> {
        Some(match self {
            Self::Off => 0,
            Self::On => 1,
        })
    }

    fn to_u64(&self) -> Option<u64> {
        self.to_i64().map(|v| v as u64)
    }
}

#[test]
fn enum_templates() {
    let bytes = encode::with(|e| e.emit_enum(&Mode::On));
    let mut d = dec(&bytes);
    assert_eq!(d.parse_enum::<Mode>().unwrap(), Mode::On);

    let mut d = dec(&hex!("05"));
    assert!(matches!(
        d.parse_enum::<Mode>(),
        Err(Error::InvalidEnumValue(5))
    ));
}

#[test]
fn option_reader() {
    assert_eq!(decode::parse::<Option<i64>>(&hex!("f7")).unwrap(), None);
    assert_eq!(decode::parse::<Option<i64>>(&hex!("03")).unwrap(), Some(3));
}

#[test]
fn scenario_single_bytes() {
    assert_eq!(val(&hex!("00")), Value::Int(0));
    assert_eq!(*encode::emit_value(&Value::Int(0)), hex!("00"));
    assert_eq!(val(&hex!("18ff")), Value::Int(255));
    assert_eq!(*encode::emit_value(&Value::Int(255)), hex!("18ff"));
    assert_eq!(val(&hex!("20")), Value::Int(-1));
    assert_eq!(val(&hex!("f4")), Value::False);
    assert_eq!(val(&hex!("f5")), Value::True);
}
