//! Handle-indexed table of open files and their key definitions.
//!
//! Each open file owns one key pool per key number, sized by that key's
//! definition. The pools are drained and dropped when the file is closed.

use tracing::info;

use crate::error::PoolError;
use crate::key::KeyPool;
use crate::types::{Handle, KeyNumber};

/// Definition of one index key of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDefinition {
    /// Bytes of indexed field data carried by every key.
    pub field_length: usize,
}

impl KeyDefinition {
    #[must_use]
    pub const fn new(field_length: usize) -> Self {
        Self { field_length }
    }

    /// Check the definition against the configured key length limit.
    pub fn validate(&self, max_key_length: usize) -> Result<(), PoolError> {
        if self.field_length == 0 {
            return Err(PoolError::BadKeyDefinition(
                "field length must be at least 1".to_string(),
            ));
        }
        if self.field_length > max_key_length {
            return Err(PoolError::BadKeyDefinition(format!(
                "field length {} exceeds the limit of {max_key_length}",
                self.field_length
            )));
        }
        Ok(())
    }
}

/// Per-file state: one key pool per key number.
#[derive(Debug)]
pub struct FileDescriptor {
    pools: Vec<KeyPool>,
}

impl FileDescriptor {
    /// Key numbers defined for the file, in ascending order.
    pub fn key_numbers(&self) -> impl Iterator<Item = KeyNumber> + '_ {
        (0..self.pools.len()).map(KeyNumber)
    }
}

/// The descriptor table, indexed by [`Handle`].
#[derive(Debug)]
pub struct FileTable {
    files: Vec<Option<FileDescriptor>>,
    max_key_length: usize,
}

impl FileTable {
    /// Create an empty table accepting keys up to `max_key_length` bytes.
    #[must_use]
    pub const fn new(max_key_length: usize) -> Self {
        Self {
            files: Vec::new(),
            max_key_length,
        }
    }

    /// Register a file with its key definitions and return its handle.
    ///
    /// The lowest free handle is reused. Nothing is registered if any
    /// definition is rejected.
    pub fn open(&mut self, definitions: &[KeyDefinition]) -> Result<Handle, PoolError> {
        for definition in definitions {
            definition.validate(self.max_key_length)?;
        }

        let pools = definitions
            .iter()
            .map(|definition| KeyPool::new(definition.field_length))
            .collect();
        let descriptor = Some(FileDescriptor { pools });
        let position = if let Some(position) = self.files.iter().position(Option::is_none) {
            self.files[position] = descriptor;
            position
        } else {
            self.files.push(descriptor);
            self.files.len() - 1
        };

        let handle = Handle(position);
        info!(%handle, keys = definitions.len(), "opened file");
        Ok(handle)
    }

    /// Close a file, draining every key pool and freeing the handle.
    /// Returns the number of pooled keys whose memory was released.
    ///
    /// Refused while any key of the file is live.
    pub fn close(&mut self, handle: Handle) -> Result<usize, PoolError> {
        let descriptor = self.descriptor_mut(handle)?;
        if let Some((key_number, live)) = descriptor
            .pools
            .iter()
            .zip(0..)
            .find(|(pool, _)| pool.live() > 0)
            .map(|(pool, number)| (KeyNumber(number), pool.live()))
        {
            return Err(PoolError::LiveKeysOutstanding {
                handle,
                key_number,
                live,
            });
        }

        let mut drained = 0;
        for (pool, number) in descriptor.pools.iter_mut().zip(0..) {
            drained += pool.drain(handle, KeyNumber(number))?;
        }
        self.files[handle.0] = None;
        while matches!(self.files.last(), Some(None)) {
            self.files.pop();
        }
        info!(%handle, drained, "closed file");
        Ok(drained)
    }

    /// The descriptor of an open file.
    pub fn descriptor(&self, handle: Handle) -> Result<&FileDescriptor, PoolError> {
        self.files
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(PoolError::NotOpen { handle })
    }

    fn descriptor_mut(&mut self, handle: Handle) -> Result<&mut FileDescriptor, PoolError> {
        self.files
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(PoolError::NotOpen { handle })
    }

    /// The key pool of an index.
    pub fn key_pool(&self, handle: Handle, key_number: KeyNumber) -> Result<&KeyPool, PoolError> {
        self.descriptor(handle)?
            .pools
            .get(key_number.0)
            .ok_or(PoolError::BadKeyNumber { handle, key_number })
    }

    /// The key pool of an index, for acquiring and releasing.
    pub fn key_pool_mut(
        &mut self,
        handle: Handle,
        key_number: KeyNumber,
    ) -> Result<&mut KeyPool, PoolError> {
        self.descriptor_mut(handle)?
            .pools
            .get_mut(key_number.0)
            .ok_or(PoolError::BadKeyNumber { handle, key_number })
    }

    /// Handles of every open file, in ascending order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.is_some())
            .map(|(position, _)| Handle(position))
    }
}
