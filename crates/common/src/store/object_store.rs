use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::ErrorKind;

/// Default size of the backing memory in bytes
pub const DEFAULT_STORE_CAPACITY: usize = 0xFFF;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no contiguous space left for {requested} bytes")]
    NoMemory { requested: usize },
    #[error("object ({type_tag:#04x}, {id}) already exists")]
    Duplicate { type_tag: u8, id: u16 },
    #[error("objects must have a non-zero size")]
    EmptyObject,
    #[error("access of {len} bytes at offset {offset} exceeds object size {size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("object ({type_tag:#04x}, {id}) no longer exists")]
    StaleHandle { type_tag: u8, id: u16 },
    #[error("every object id is in use")]
    IdsExhausted,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NoMemory { .. } | StoreError::IdsExhausted => ErrorKind::Resource,
            StoreError::Duplicate { .. }
            | StoreError::EmptyObject
            | StoreError::OutOfRange { .. } => ErrorKind::Protocol,
            StoreError::StaleHandle { .. } => ErrorKind::Internal,
        }
    }
}

/// Reference to a live object in an [`ObjectStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHandle {
    type_tag: u8,
    id: u16,
    offset: usize,
    size: usize,
}

impl ObjectHandle {
    pub fn type_tag(&self) -> u8 {
        self.type_tag
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ObjectEntry {
    type_tag: u8,
    id: u16,
    offset: usize,
    size: usize,
}

impl From<&ObjectEntry> for ObjectHandle {
    fn from(entry: &ObjectEntry) -> Self {
        ObjectHandle {
            type_tag: entry.type_tag,
            id: entry.id,
            offset: entry.offset,
            size: entry.size,
        }
    }
}

/// Fixed-size arena of variable-length objects keyed by `(type_tag, id)`.
///
/// Objects are placed first-fit in the gaps between live objects and are
/// never moved. Enumeration follows allocation order. The store knows
/// nothing about what it holds; callers only ever hand it ciphertext.
#[derive(Clone, Serialize, Deserialize)]
pub struct ObjectStore {
    memory: Vec<u8>,
    objects: Vec<ObjectEntry>,
    next_id: u16,
    #[serde(skip)]
    cursor: usize,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        self.memory.zeroize();
    }
}

impl ObjectStore {
    pub fn new(capacity: usize) -> Self {
        ObjectStore {
            memory: vec![0u8; capacity],
            objects: Vec::new(),
            next_id: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn used(&self) -> usize {
        self.objects.iter().map(|o| o.size).sum()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn entry(&self, handle: &ObjectHandle) -> Result<&ObjectEntry, StoreError> {
        self.objects
            .iter()
            .find(|o| o.type_tag == handle.type_tag && o.id == handle.id)
            .filter(|o| o.offset == handle.offset && o.size == handle.size)
            .ok_or(StoreError::StaleHandle {
                type_tag: handle.type_tag,
                id: handle.id,
            })
    }

    /// Start of the first gap able to hold `size` bytes
    fn first_fit(&self, size: usize) -> Option<usize> {
        let mut placed: Vec<(usize, usize)> =
            self.objects.iter().map(|o| (o.offset, o.size)).collect();
        placed.sort_unstable();

        let mut start = 0usize;
        for (offset, len) in placed {
            if offset - start >= size {
                return Some(start);
            }
            start = offset + len;
        }
        (self.capacity() - start >= size).then_some(start)
    }

    /// Reserve `size` bytes for the object `(type_tag, id)`
    pub fn create(&mut self, type_tag: u8, id: u16, size: usize) -> Result<ObjectHandle, StoreError> {
        if size == 0 {
            return Err(StoreError::EmptyObject);
        }
        if self.exists(type_tag, id) {
            return Err(StoreError::Duplicate { type_tag, id });
        }
        let offset = self
            .first_fit(size)
            .ok_or(StoreError::NoMemory { requested: size })?;
        let entry = ObjectEntry {
            type_tag,
            id,
            offset,
            size,
        };
        self.objects.push(entry);
        tracing::debug!(type_tag, id, offset, size, "object created");
        Ok(ObjectHandle::from(&entry))
    }

    /// Create an object under the next free id.
    ///
    /// Ids come from a counter that only moves forward; live ids are skipped
    /// so an id is never handed out twice while its object exists.
    pub fn create_next(&mut self, type_tag: u8, size: usize) -> Result<ObjectHandle, StoreError> {
        let mut id = self.next_id;
        let mut probes = 0u32;
        while self.exists(type_tag, id) {
            id = id.wrapping_add(1);
            probes += 1;
            if probes > u16::MAX as u32 {
                return Err(StoreError::IdsExhausted);
            }
        }
        let handle = self.create(type_tag, id, size)?;
        self.next_id = id.wrapping_add(1);
        Ok(handle)
    }

    pub fn write(&mut self, handle: &ObjectHandle, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        let entry = *self.entry(handle)?;
        let end = checked_end(offset, bytes.len(), entry.size)?;
        self.memory[entry.offset + offset..entry.offset + end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, handle: &ObjectHandle, offset: usize, len: usize) -> Result<&[u8], StoreError> {
        let entry = self.entry(handle)?;
        let end = checked_end(offset, len, entry.size)?;
        Ok(&self.memory[entry.offset + offset..entry.offset + end])
    }

    /// The whole object
    pub fn data(&self, handle: &ObjectHandle) -> Result<&[u8], StoreError> {
        self.read(handle, 0, handle.size)
    }

    pub fn exists(&self, type_tag: u8, id: u16) -> bool {
        self.objects
            .iter()
            .any(|o| o.type_tag == type_tag && o.id == id)
    }

    pub fn find(&self, type_tag: u8, id: u16) -> Option<ObjectHandle> {
        self.objects
            .iter()
            .find(|o| o.type_tag == type_tag && o.id == id)
            .map(ObjectHandle::from)
    }

    /// Restart enumeration and return the first object
    pub fn first(&mut self) -> Option<ObjectHandle> {
        self.cursor = 0;
        self.next()
    }

    /// Continue enumeration from the last returned object
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<ObjectHandle> {
        let entry = self.objects.get(self.cursor)?;
        self.cursor += 1;
        Some(ObjectHandle::from(entry))
    }

    /// Drop every object, optionally wiping the backing memory
    pub fn reset(&mut self, secure_erase: bool) {
        if secure_erase {
            self.memory.as_mut_slice().zeroize();
        }
        self.objects.clear();
        self.cursor = 0;
        tracing::debug!(secure_erase, "object store reset");
    }
}

fn checked_end(offset: usize, len: usize, size: usize) -> Result<usize, StoreError> {
    offset
        .checked_add(len)
        .filter(|end| *end <= size)
        .ok_or(StoreError::OutOfRange { offset, len, size })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_create_write_read() {
        let mut store = ObjectStore::new(256);
        let handle = store.create(0, 7, 32).unwrap();
        store.write(&handle, 4, b"abcd").unwrap();
        assert_eq!(store.read(&handle, 4, 4).unwrap(), b"abcd");
        assert_eq!(store.data(&handle).unwrap().len(), 32);
        assert!(store.exists(0, 7));
        assert_eq!(store.find(0, 7), Some(handle));
        assert_eq!(store.used(), 32);
    }

    #[test]
    fn test_out_of_range_access_is_an_error() {
        let mut store = ObjectStore::new(64);
        let handle = store.create(0, 1, 16).unwrap();
        assert!(matches!(
            store.write(&handle, 10, &[0u8; 7]),
            Err(StoreError::OutOfRange { .. })
        ));
        assert!(store.read(&handle, 16, 1).is_err());
        assert!(store.read(&handle, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_rejects_duplicates_and_empty_objects() {
        let mut store = ObjectStore::new(64);
        store.create(0, 1, 16).unwrap();
        assert!(matches!(
            store.create(0, 1, 16),
            Err(StoreError::Duplicate { .. })
        ));
        // same id under another tag is a different key
        assert!(store.create(1, 1, 16).is_ok());
        assert!(matches!(store.create(0, 2, 0), Err(StoreError::EmptyObject)));
    }

    #[test]
    fn test_exhaustion() {
        let mut store = ObjectStore::new(64);
        store.create(0, 1, 48).unwrap();
        let err = store.create(0, 2, 32).unwrap_err();
        assert!(matches!(err, StoreError::NoMemory { requested: 32 }));
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(store.create(0, 2, 16).is_ok());
    }

    #[test]
    fn test_first_fit_reuses_space_after_reset() {
        let mut store = ObjectStore::new(64);
        store.create(0, 1, 64).unwrap();
        store.reset(true);
        assert!(store.is_empty());
        let handle = store.create(0, 2, 64).unwrap();
        assert_eq!(store.data(&handle).unwrap(), &[0u8; 64][..]);
    }

    #[test]
    fn test_stale_handle_after_reset() {
        let mut store = ObjectStore::new(64);
        let handle = store.create(0, 1, 16).unwrap();
        store.reset(false);
        assert!(matches!(
            store.read(&handle, 0, 1),
            Err(StoreError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_enumeration_in_allocation_order() {
        let mut store = ObjectStore::new(256);
        for id in [5u16, 2, 9] {
            store.create(0, id, 16).unwrap();
        }
        let mut ids = Vec::new();
        let mut next = store.first();
        while let Some(handle) = next {
            ids.push(handle.id());
            next = store.next();
        }
        assert_eq!(ids, vec![5, 2, 9]);
        // first() restarts the walk
        assert_eq!(store.first().map(|h| h.id()), Some(5));
    }

    #[test]
    fn test_next_id_skips_live_ids_and_never_goes_back() {
        let mut store = ObjectStore::new(256);
        store.create(0, 1, 16).unwrap();
        let a = store.create_next(0, 16).unwrap();
        let b = store.create_next(0, 16).unwrap();
        let c = store.create_next(0, 16).unwrap();
        assert_eq!((a.id(), b.id(), c.id()), (0, 2, 3));

        // ids keep increasing after a reset
        store.reset(false);
        assert_eq!(store.create_next(0, 16).unwrap().id(), 4);
    }
}
