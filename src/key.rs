// src/key.rs
//! Hash-validated keys used to find resources in the cache.
//!
//! A [`KeyBlob`] is a run of 32-bit words laid out as
//! `[hash, domain | (size_bytes << 16), payload...]`. The hash covers every word after the
//! first one and is computed once, when the [`KeyBuilder`] is finished, so a key is write-once.
//! A key whose domain is `0` (the default) is invalid and never matches a live resource.
//!
//! * [`ScratchKey`]: shared by interchangeable resources (same shape, format, usage).
//! * [`UniqueKey`]: names exactly one logical resource and can carry custom data.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use xxhash_rust::xxh3::xxh3_64;

const HASH_INDEX: usize = 0;
const DOMAIN_AND_SIZE_INDEX: usize = 1;
const METADATA_WORDS: usize = 2;

/// Opaque payload carried by a [`UniqueKey`]. Not hashed and not compared.
pub type CustomData = Arc<[u8]>;

// ============================================================================
// 1. KEY BLOB
// ============================================================================

/// Variable-length, hash-validated key. Empty storage means "invalid".
#[derive(Clone, Default)]
pub struct KeyBlob {
    words: Box<[u32]>,
}

impl KeyBlob {
    /// The invalid key.
    pub fn invalid() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.words.is_empty()
    }

    /// Content hash of everything after the hash word. `0` for an invalid key.
    #[inline]
    pub fn hash(&self) -> u32 {
        self.words.get(HASH_INDEX).copied().unwrap_or(0)
    }

    #[inline]
    pub fn domain(&self) -> u16 {
        self.words
            .get(DOMAIN_AND_SIZE_INDEX)
            .map_or(0, |w| (w & 0xffff) as u16)
    }

    /// Total key size in bytes, including the two metadata words.
    #[inline]
    pub fn size(&self) -> usize {
        self.words
            .get(DOMAIN_AND_SIZE_INDEX)
            .map_or(0, |w| (w >> 16) as usize)
    }

    /// Payload words written through the builder.
    #[inline]
    pub fn data(&self) -> &[u32] {
        if self.is_valid() {
            &self.words[METADATA_WORDS..]
        } else {
            &[]
        }
    }

    /// Drop back to the invalid state.
    pub fn reset(&mut self) {
        self.words = Box::default();
    }

    fn content_hash(words: &[u32]) -> u32 {
        let bytes: &[u8] = bytemuck::cast_slice(&words[DOMAIN_AND_SIZE_INDEX..]);
        xxh3_64(bytes) as u32
    }
}

impl PartialEq for KeyBlob {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Eq for KeyBlob {}

impl Hash for KeyBlob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(KeyBlob::hash(self));
    }
}

impl fmt::Debug for KeyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("KeyBlob(invalid)");
        }
        f.debug_struct("KeyBlob")
            .field("domain", &self.domain())
            .field("hash", &format_args!("{:#010x}", self.hash()))
            .field("data", &self.data())
            .finish()
    }
}

// ============================================================================
// 2. BUILDER
// ============================================================================

/// Two-phase key construction: reserve payload words, fill them, then [`finish`](Self::finish).
pub struct KeyBuilder {
    words: Vec<u32>,
}

impl KeyBuilder {
    /// Reserve `data_words` payload words in `domain`.
    ///
    /// Panics when `domain` is 0 or the key would not fit its 16-bit size field.
    pub fn new(domain: u16, data_words: usize) -> Self {
        assert!(domain != 0, "key domain 0 is reserved for invalid keys");
        let total = METADATA_WORDS + data_words;
        let size = total * std::mem::size_of::<u32>();
        assert!(size <= u16::MAX as usize, "key of {size} bytes is too large");

        let mut words = vec![0u32; total];
        words[DOMAIN_AND_SIZE_INDEX] = domain as u32 | ((size as u32) << 16);
        Self { words }
    }

    /// Number of payload words reserved.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len() - METADATA_WORDS
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute the hash and freeze the key.
    pub fn finish(mut self) -> KeyBlob {
        self.words[HASH_INDEX] = KeyBlob::content_hash(&self.words);
        KeyBlob {
            words: self.words.into_boxed_slice(),
        }
    }
}

impl Index<usize> for KeyBuilder {
    type Output = u32;

    fn index(&self, i: usize) -> &u32 {
        assert!(i < self.len(), "key payload index {i} out of range");
        &self.words[METADATA_WORDS + i]
    }
}

impl IndexMut<usize> for KeyBuilder {
    fn index_mut(&mut self, i: usize) -> &mut u32 {
        assert!(i < self.len(), "key payload index {i} out of range");
        &mut self.words[METADATA_WORDS + i]
    }
}

// ============================================================================
// 3. SCRATCH KEYS
// ============================================================================

static NEXT_RESOURCE_TYPE: AtomicU32 = AtomicU32::new(1);
static NEXT_KEY_DOMAIN: AtomicU32 = AtomicU32::new(1);

fn generate_domain(counter: &AtomicU32, what: &str) -> u16 {
    let value = counter.fetch_add(1, Ordering::Relaxed);
    assert!(value <= u16::MAX as u32, "too many {what} generated");
    value as u16
}

/// Process-wide tag naming one concrete resource shape (texture, buffer, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType(u16);

impl ResourceType {
    pub fn generate() -> Self {
        Self(generate_domain(&NEXT_RESOURCE_TYPE, "resource types"))
    }

    #[inline]
    pub fn value(self) -> u16 {
        self.0
    }
}

/// Key shared by interchangeable resources.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    blob: KeyBlob,
}

impl ScratchKey {
    pub fn builder(resource_type: ResourceType, data_words: usize) -> ScratchKeyBuilder {
        ScratchKeyBuilder {
            inner: KeyBuilder::new(resource_type.0, data_words),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        ResourceType(self.blob.domain())
    }

    pub fn is_valid(&self) -> bool {
        self.blob.is_valid()
    }

    pub fn hash(&self) -> u32 {
        self.blob.hash()
    }

    pub fn size(&self) -> usize {
        self.blob.size()
    }

    pub fn data(&self) -> &[u32] {
        self.blob.data()
    }

    pub fn reset(&mut self) {
        self.blob.reset();
    }
}

impl fmt::Debug for ScratchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScratchKey({:?})", self.blob)
    }
}

pub struct ScratchKeyBuilder {
    inner: KeyBuilder,
}

impl ScratchKeyBuilder {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn finish(self) -> ScratchKey {
        ScratchKey {
            blob: self.inner.finish(),
        }
    }
}

impl Index<usize> for ScratchKeyBuilder {
    type Output = u32;
    fn index(&self, i: usize) -> &u32 {
        &self.inner[i]
    }
}

impl IndexMut<usize> for ScratchKeyBuilder {
    fn index_mut(&mut self, i: usize) -> &mut u32 {
        &mut self.inner[i]
    }
}

// ============================================================================
// 4. UNIQUE KEYS
// ============================================================================

/// Process-wide tag naming one ownership domain of unique keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDomain(u16);

impl KeyDomain {
    pub fn generate() -> Self {
        Self(generate_domain(&NEXT_KEY_DOMAIN, "unique key domains"))
    }

    #[inline]
    pub fn value(self) -> u16 {
        self.0
    }
}

/// Key naming exactly one logical resource. Equality and hashing ignore the tag and the
/// custom data.
#[derive(Clone, Default)]
pub struct UniqueKey {
    blob: KeyBlob,
    tag: Option<&'static str>,
    custom_data: Option<CustomData>,
}

impl UniqueKey {
    pub fn builder(domain: KeyDomain, data_words: usize, tag: Option<&'static str>) -> UniqueKeyBuilder {
        UniqueKeyBuilder {
            inner: KeyBuilder::new(domain.0, data_words),
            tag,
            parent_words: 0,
        }
    }

    /// Layer a new domain on top of `inner`. The payload starts with the inner key's domain
    /// and payload; the `extra_words` that follow are the builder's indices `0..extra_words`.
    pub fn from_parent(
        inner: &UniqueKey,
        domain: KeyDomain,
        extra_words: usize,
        tag: Option<&'static str>,
    ) -> UniqueKeyBuilder {
        assert!(inner.is_valid(), "cannot layer on an invalid key");
        let inner_data = inner.data();
        let parent_words = 1 + inner_data.len();
        let mut inner_builder = KeyBuilder::new(domain.0, parent_words + extra_words);
        inner_builder[0] = inner.blob.domain() as u32;
        for (i, w) in inner_data.iter().enumerate() {
            inner_builder[1 + i] = *w;
        }
        UniqueKeyBuilder {
            inner: inner_builder,
            tag,
            parent_words,
        }
    }

    pub fn domain(&self) -> KeyDomain {
        KeyDomain(self.blob.domain())
    }

    pub fn is_valid(&self) -> bool {
        self.blob.is_valid()
    }

    pub fn hash(&self) -> u32 {
        self.blob.hash()
    }

    pub fn size(&self) -> usize {
        self.blob.size()
    }

    pub fn data(&self) -> &[u32] {
        self.blob.data()
    }

    pub fn tag(&self) -> Option<&'static str> {
        self.tag
    }

    pub fn custom_data(&self) -> Option<&CustomData> {
        self.custom_data.as_ref()
    }

    pub fn ref_custom_data(&self) -> Option<CustomData> {
        self.custom_data.clone()
    }

    pub fn set_custom_data(&mut self, data: Option<CustomData>) {
        self.custom_data = data;
    }

    pub fn with_custom_data(mut self, data: CustomData) -> Self {
        self.custom_data = Some(data);
        self
    }

    pub fn reset(&mut self) {
        self.blob.reset();
        self.tag = None;
        self.custom_data = None;
    }
}

impl PartialEq for UniqueKey {
    fn eq(&self, other: &Self) -> bool {
        self.blob == other.blob
    }
}

impl Eq for UniqueKey {}

impl Hash for UniqueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&self.blob, state);
    }
}

impl fmt::Debug for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueKey")
            .field("blob", &self.blob)
            .field("tag", &self.tag)
            .field("custom_data_len", &self.custom_data.as_ref().map(|d| d.len()))
            .finish()
    }
}

pub struct UniqueKeyBuilder {
    inner: KeyBuilder,
    tag: Option<&'static str>,
    parent_words: usize,
}

impl UniqueKeyBuilder {
    /// Writable payload words (excludes words copied from a parent key).
    pub fn len(&self) -> usize {
        self.inner.len() - self.parent_words
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(self) -> UniqueKey {
        UniqueKey {
            blob: self.inner.finish(),
            tag: self.tag,
            custom_data: None,
        }
    }
}

impl Index<usize> for UniqueKeyBuilder {
    type Output = u32;
    fn index(&self, i: usize) -> &u32 {
        &self.inner[self.parent_words + i]
    }
}

impl IndexMut<usize> for UniqueKeyBuilder {
    fn index_mut(&mut self, i: usize) -> &mut u32 {
        &mut self.inner[self.parent_words + i]
    }
}

// ============================================================================
// 5. STATIC UNIQUE KEYS
// ============================================================================

/// A unique key with its own domain, created on first use. Declare as a `static`:
///
/// ```
/// use gpu_resource_cache::key::StaticUniqueKey;
/// static QUAD_INDEX_BUFFER: StaticUniqueKey = StaticUniqueKey::new("QuadIndexBuffer");
/// assert!(QUAD_INDEX_BUFFER.get().is_valid());
/// ```
pub struct StaticUniqueKey {
    tag: &'static str,
    key: OnceLock<UniqueKey>,
}

impl StaticUniqueKey {
    pub const fn new(tag: &'static str) -> Self {
        Self {
            tag,
            key: OnceLock::new(),
        }
    }

    pub fn get(&self) -> &UniqueKey {
        self.key
            .get_or_init(|| UniqueKey::builder(KeyDomain::generate(), 0, Some(self.tag)).finish())
    }
}
