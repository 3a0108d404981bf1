mod manager;

pub use manager::{
    extension_for_url, mime_type_for_extension, mime_type_for_filename, CacheError, CacheManager,
    CachedAsset, DEFAULT_BUFFER_SIZE, PARTIAL_SUFFIX,
};
