use crate::runtime::instance::Instance;
use std::fmt;

/// A view over `len` consecutive structs that reuses one `Instance` for all of them.
///
/// Elements aren't cached and the instance handed out by `get` is moved by the next call, so keep the values
/// you need, not the instance. Use `Instance::get_struct_array` when every element has to stay alive.
pub struct InstantList {
    cursor: Instance,
    base_address: u64,
    base_position: usize,
    element_size: usize,
    len: usize,
    next: usize,
}

impl InstantList {
    pub(crate) fn new(cursor: Instance, element_size: usize, len: usize) -> Self {
        InstantList {
            base_address: cursor.address(),
            base_position: cursor.position(),
            cursor,
            element_size,
            len,
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Distance in bytes between two elements.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Points the shared instance at element `index`.
    pub fn get(&self, index: usize) -> Option<&Instance> {
        if index >= self.len {
            return None;
        }

        let delta = index * self.element_size;
        self.cursor
            .rebind(self.base_address + delta as u64, self.base_position + delta);
        Some(&self.cursor)
    }

    /// Moves to the next element. `None` once every element was visited.
    pub fn step(&mut self) -> Option<&Instance> {
        let index = self.next;
        if index >= self.len {
            return None;
        }
        self.next += 1;
        self.get(index)
    }

    /// Starts stepping from the first element again.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

impl fmt::Debug for InstantList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstantList")
            .field("type_name", &self.cursor.type_name())
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("element_size", &self.element_size)
            .field("len", &self.len)
            .finish()
    }
}
