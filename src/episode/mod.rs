mod fetch;
mod naming;

pub use fetch::{
    AudioExtractor, DEFAULT_MIRRORS, FetchContext, FetchedAudio, MIRROR_ID_PLACEHOLDER, MirrorSet,
    ResilientFetcher,
};
pub use naming::{
    AUDIO_EXTENSION, AUDIO_MIME_TYPE, AssetKey, KEY_SEPARATOR, channel_slug, key_prefix,
    local_filename, local_stem, validate_slug,
};
