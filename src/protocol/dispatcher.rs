//! # Dispatch Table
//!
//! Maps application data names to server-assigned numeric IDs and to ordered
//! handler lists.
//!
//! The table is generic over the handler signature so the server (handlers
//! that see the originating client entry) and the client (handlers that see
//! only packet and transport) share one implementation.
//!
//! Two index maps, by name and by ID, are rebuilt whenever IDs change:
//! on the server when it starts, on the client after the data list exchange.
//! Handlers registered for the same name append to the existing entry;
//! dispatch runs the list in reverse so later registrations run first.

use crate::config::MAX_DATA_NAME_LEN;
use crate::core::codec::DataId;
use crate::protocol::data_id;
use std::collections::HashMap;
use std::rc::Rc;

/// One named data type: its assigned ID and its handlers in registration
/// order.
pub struct DataEntry<F: ?Sized> {
    name: String,
    data_id: DataId,
    callbacks: Vec<Rc<F>>,
}

impl<F: ?Sized> DataEntry<F> {
    /// The registered data name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The currently assigned data ID, [`data_id::UNKNOWN`] before
    /// assignment.
    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    /// Number of handlers registered for this name.
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }
}

/// Ordered set of data entries with name and ID indexes.
pub struct DataTable<F: ?Sized> {
    entries: Vec<DataEntry<F>>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<DataId, usize>,
}

impl<F: ?Sized> Default for DataTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> DataTable<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Clamp a name to the maximum registered length, respecting UTF-8
    /// boundaries.
    pub fn truncate_name(name: &str) -> &str {
        if name.len() <= MAX_DATA_NAME_LEN {
            return name;
        }
        let mut end = MAX_DATA_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        &name[..end]
    }

    /// Position of the entry registered under `name`, if any.
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = Self::truncate_name(name);
        self.entries.iter().position(|entry| entry.name == name)
    }

    /// Register a data name without any handler, returning its position.
    /// Useful for send-only data types.
    pub fn register_type(&mut self, name: &str) -> usize {
        let name = Self::truncate_name(name);
        if let Some(index) = self.position(name) {
            return index;
        }
        self.entries.push(DataEntry {
            name: name.to_string(),
            data_id: data_id::UNKNOWN,
            callbacks: Vec::new(),
        });
        self.entries.len() - 1
    }

    /// Append a handler under `name`, creating the entry if needed. Returns
    /// the entry's position.
    pub fn register_handler(&mut self, name: &str, callback: Rc<F>) -> usize {
        let index = self.register_type(name);
        self.entries[index].callbacks.push(callback);
        index
    }

    /// Assign an ID to the entry at `index`.
    pub fn assign_id(&mut self, index: usize, id: DataId) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.data_id = id;
        }
    }

    /// Rebuild the name and ID indexes from the entry list.
    pub fn rebuild_index(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        for (index, entry) in self.entries.iter().enumerate() {
            self.by_name.insert(entry.name.clone(), index);
            self.by_id.insert(entry.data_id, index);
        }
    }

    /// Forget all assigned IDs and drop the indexes. Entries and their
    /// handlers survive, so a later negotiation can reuse the names.
    pub fn reset_ids(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        for entry in &mut self.entries {
            entry.data_id = data_id::UNKNOWN;
        }
    }

    /// Resolve a name to its assigned ID through the index.
    pub fn id_for_name(&self, name: &str) -> Option<DataId> {
        let name = Self::truncate_name(name);
        self.by_name
            .get(name)
            .map(|&index| self.entries[index].data_id)
    }

    /// Resolve a name by scanning the entry list, bypassing the index.
    /// Usable before the engine has started.
    pub fn id_for_name_unindexed(&self, name: &str) -> Option<DataId> {
        let name = Self::truncate_name(name);
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.data_id)
    }

    /// Resolve an assigned ID back to its name.
    pub fn name_for_id(&self, id: DataId) -> Option<&str> {
        self.by_id
            .get(&id)
            .map(|&index| self.entries[index].name.as_str())
    }

    /// The handler list for an assigned ID, in registration order. The list
    /// is cloned so dispatch can run without borrowing the table.
    pub fn callbacks_for_id(&self, id: DataId) -> Option<Vec<Rc<F>>> {
        self.by_id
            .get(&id)
            .map(|&index| self.entries[index].callbacks.clone())
    }

    /// All registered entries in registration order.
    pub fn entries(&self) -> &[DataEntry<F>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestFn = dyn Fn(&mut Vec<u32>);

    fn push_handler(value: u32) -> Rc<TestFn> {
        Rc::new(move |log: &mut Vec<u32>| log.push(value))
    }

    #[test]
    fn same_name_appends_to_existing_entry() {
        let mut table: DataTable<TestFn> = DataTable::new();
        table.register_handler("jump", push_handler(1));
        table.register_handler("jump", push_handler(2));
        table.register_handler("run", push_handler(3));

        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].callback_count(), 2);
        assert_eq!(table.entries()[1].callback_count(), 1);
    }

    #[test]
    fn reverse_iteration_runs_later_handlers_first() {
        let mut table: DataTable<TestFn> = DataTable::new();
        let index = table.register_handler("jump", push_handler(1));
        table.register_handler("jump", push_handler(2));
        table.assign_id(index, 7);
        table.rebuild_index();

        let mut log = Vec::new();
        let callbacks = table.callbacks_for_id(7).expect("entry indexed");
        for callback in callbacks.iter().rev() {
            callback(&mut log);
        }
        assert_eq!(log, vec![2, 1]);
    }

    #[test]
    fn index_maps_follow_assignment() {
        let mut table: DataTable<TestFn> = DataTable::new();
        let a = table.register_type("a");
        let b = table.register_type("b");
        table.assign_id(a, 7);
        table.assign_id(b, 8);
        table.rebuild_index();

        assert_eq!(table.id_for_name("a"), Some(7));
        assert_eq!(table.id_for_name("b"), Some(8));
        assert_eq!(table.name_for_id(8), Some("b"));
        assert_eq!(table.id_for_name("missing"), None);
    }

    #[test]
    fn reset_ids_keeps_entries_and_handlers() {
        let mut table: DataTable<TestFn> = DataTable::new();
        let index = table.register_handler("jump", push_handler(1));
        table.assign_id(index, 7);
        table.rebuild_index();

        table.reset_ids();
        assert_eq!(table.id_for_name("jump"), None);
        assert_eq!(table.entries()[0].data_id(), data_id::UNKNOWN);
        assert_eq!(table.entries()[0].callback_count(), 1);
    }

    #[test]
    fn long_names_are_truncated_consistently() {
        let long = "x".repeat(MAX_DATA_NAME_LEN + 50);
        let mut table: DataTable<TestFn> = DataTable::new();
        let index = table.register_type(&long);
        assert_eq!(table.entries()[index].name().len(), MAX_DATA_NAME_LEN);
        // the truncated and full spellings resolve to the same entry
        assert_eq!(table.position(&long), Some(index));
    }
}
