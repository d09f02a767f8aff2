//! PCM conversion between the voice transport and recognizers.

pub mod pcm;

pub use pcm::{
    RecognizerAudio, TransportFormat, decode_s16le, downmix_to_mono, encode_wav, normalized_rms,
    resample_linear, write_wav_file,
};
