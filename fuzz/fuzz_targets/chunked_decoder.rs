#![no_main]

use libfuzzer_sys::fuzz_target;

use streamfetch::transform::fuzzing::decode_chunked_in_pieces;

fuzz_target!(|data: &[u8]| {
    let Some((&split, body)) = data.split_first() else {
        return;
    };
    let whole = decode_chunked_in_pieces(body, body.len());
    let pieces = decode_chunked_in_pieces(body, usize::from(split));
    if let (Ok(whole), Ok(pieces)) = (whole, pieces) {
        assert_eq!(whole, pieces, "decoding must not depend on read boundaries");
    }
});
