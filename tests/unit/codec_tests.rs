use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use thread_relay::child::codec::{StreamCodec, MAX_LINE_BYTES};

#[test]
fn decodes_complete_lines_and_buffers_partials() {
    let mut codec = StreamCodec::new();
    let mut buf = BytesMut::from(&b"{\"type\":\"result\"}\n{\"type\""[..]);

    let first = codec.decode(&mut buf).expect("decode");
    assert_eq!(first.as_deref(), Some("{\"type\":\"result\"}"));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None, "partial line buffers");
}

#[test]
fn decode_eof_flushes_an_unterminated_tail() {
    let mut codec = StreamCodec::new();
    let mut buf = BytesMut::from(&b"tail without newline"[..]);

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    let tail = codec.decode_eof(&mut buf).expect("decode eof");
    assert_eq!(tail.as_deref(), Some("tail without newline"));
}

#[test]
fn oversized_lines_are_rejected() {
    let mut codec = StreamCodec::with_limit(8);
    assert_eq!(codec.limit(), 8);

    let mut buf = BytesMut::from(&b"0123456789abcdef\n"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(StreamCodec::new().limit(), MAX_LINE_BYTES);
    assert_eq!(MAX_LINE_BYTES, 1_048_576);
}

#[test]
fn encoder_appends_the_newline_delimiter() {
    let mut codec = StreamCodec::new();
    let mut buf = BytesMut::new();
    codec.encode("{\"x\":1}".to_owned(), &mut buf).expect("encode");
    assert_eq!(&buf[..], b"{\"x\":1}\n");
}
