//! Property-based tests for the WAV container encoder.

use proptest::prelude::*;

use fabula_core::voice::wav::HEADER_LEN;
use fabula_core::voice::{WavFormat, encode_wav, inspect, parse_header};

fn any_format() -> impl Strategy<Value = WavFormat> {
    (
        1u32..=192_000,
        1u16..=8,
        prop_oneof![Just(8u16), Just(16u16), Just(24u16), Just(32u16)],
    )
        .prop_map(|(rate, channels, bits)| WavFormat::new(rate, channels, bits))
}

proptest! {
    #[test]
    fn encoded_length_is_header_plus_payload(
        pcm in proptest::collection::vec(any::<u8>(), 0..2048),
        format in any_format(),
    ) {
        let wav = encode_wav(&pcm, format);
        prop_assert_eq!(wav.len(), HEADER_LEN + pcm.len());
        prop_assert_eq!(&wav[HEADER_LEN..], &pcm[..]);
    }

    #[test]
    fn header_reproduces_parameters(
        pcm in proptest::collection::vec(any::<u8>(), 0..2048),
        format in any_format(),
    ) {
        let header = parse_header(&encode_wav(&pcm, format)).unwrap();
        prop_assert_eq!(header.format, format);
        prop_assert_eq!(header.data_len as usize, pcm.len());
        prop_assert_eq!(header.riff_len as usize, 36 + pcm.len());
        prop_assert_eq!(header.format_tag, 1);
        prop_assert_eq!(header.block_align, format.block_align());
        prop_assert_eq!(header.byte_rate, format.byte_rate());
    }

    #[test]
    fn mono_16bit_speech_decodes_with_hound(
        samples in proptest::collection::vec(any::<i16>(), 1..1024),
    ) {
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let summary = inspect(&encode_wav(&pcm, WavFormat::default())).unwrap();
        prop_assert_eq!(summary.format, WavFormat::default());
        prop_assert_eq!(summary.frames as usize, samples.len());
    }
}

#[test]
fn empty_payload_is_a_valid_header() {
    let wav = encode_wav(&[], WavFormat::default());
    assert_eq!(wav.len(), HEADER_LEN);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
    assert_eq!(&wav[12..16], b"fmt ");
    assert_eq!(&wav[36..40], b"data");
    assert_eq!(parse_header(&wav).unwrap().data_len, 0);
}
