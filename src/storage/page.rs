//! Slotted heap page format.
//!
//! A page is PAGE_SIZE bytes: a header bitmap with one bit per slot (bit set
//! means the slot is occupied), followed by an array of fixed-width tuple
//! slots. The slot count is the largest n with n * (tuple_size * 8 + 1) <=
//! PAGE_SIZE * 8, and the header occupies the minimum whole-byte count
//! covering n bits.

use crate::access::schema::Schema;
use crate::access::tuple::{Tuple, TupleId};
use crate::catalog::TableId;
use crate::storage::error::{StorageError, StorageResult};

/// Bytes per page, including the header.
pub const PAGE_SIZE: usize = 4096;

/// Identifies a page: table plus zero-based page index within that table's
/// file. Used as the cache key and the lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table_id.0, self.page_no)
    }
}

/// An in-memory heap page, held decoded as an occupancy-tracked tuple array.
#[derive(Debug, Clone)]
pub struct HeapPage {
    id: PageId,
    schema: Schema,
    slots: Vec<Option<Tuple>>,
}

impl HeapPage {
    /// Number of tuple slots a page of this schema holds.
    pub fn num_slots_for(schema: &Schema) -> usize {
        (PAGE_SIZE * 8) / (schema.tuple_size() * 8 + 1)
    }

    /// Size in bytes of the occupancy bitmap for this schema.
    pub fn header_size_for(schema: &Schema) -> usize {
        Self::num_slots_for(schema).div_ceil(8)
    }

    /// Creates an empty page (every slot unoccupied).
    pub fn empty(id: PageId, schema: Schema) -> Self {
        let num_slots = Self::num_slots_for(&schema);
        Self {
            id,
            schema,
            slots: vec![None; num_slots],
        }
    }

    /// Decodes a page from its on-disk bytes.
    pub fn from_bytes(id: PageId, schema: Schema, bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::Corrupted(format!(
                "page {} has {} bytes, expected {}",
                id,
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let num_slots = Self::num_slots_for(&schema);
        let header_size = Self::header_size_for(&schema);
        let tuple_size = schema.tuple_size();

        let mut slots = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            let occupied = bytes[slot / 8] & (1 << (slot % 8)) != 0;
            if occupied {
                let start = header_size + slot * tuple_size;
                let mut tuple = Tuple::decode(&schema, &bytes[start..start + tuple_size])?;
                tuple.set_location(Some(TupleId::new(id, slot as u16)));
                slots.push(Some(tuple));
            } else {
                slots.push(None);
            }
        }
        Ok(Self { id, schema, slots })
    }

    /// Encodes the page to exactly PAGE_SIZE bytes, zero-padded at the tail.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        let header_size = Self::header_size_for(&self.schema);
        let tuple_size = self.schema.tuple_size();
        let mut bytes = vec![0u8; PAGE_SIZE];

        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(tuple) = entry {
                bytes[slot / 8] |= 1 << (slot % 8);
                let start = header_size + slot * tuple_size;
                bytes[start..start + tuple_size].copy_from_slice(&tuple.encode()?);
            }
        }
        Ok(bytes)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Stores the tuple in the first empty slot and records its location.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> StorageResult<u16> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(StorageError::PageFull)? as u16;
        tuple.set_location(Some(TupleId::new(self.id, slot)));
        self.slots[slot as usize] = Some(tuple.clone());
        Ok(slot)
    }

    /// Clears the given slot.
    pub fn delete_tuple(&mut self, slot: u16) -> StorageResult<()> {
        let num_slots = self.slots.len() as u16;
        if slot >= num_slots {
            return Err(StorageError::InvalidSlot { slot, num_slots });
        }
        if self.slots[slot as usize].take().is_none() {
            return Err(StorageError::SlotEmpty(slot));
        }
        Ok(())
    }

    pub fn tuple(&self, slot: u16) -> StorageResult<&Tuple> {
        let num_slots = self.slots.len() as u16;
        self.slots
            .get(slot as usize)
            .ok_or(StorageError::InvalidSlot { slot, num_slots })?
            .as_ref()
            .ok_or(StorageError::SlotEmpty(slot))
    }

    /// Iterates over the occupied slots in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }
}
