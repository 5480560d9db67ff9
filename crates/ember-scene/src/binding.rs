//! User bindings attached to a renderable.

use ash::vk;
use hashbrown::HashMap;

/// Lowest binding index available to user bindings. Slots below it are
/// reserved: 0 is the view uniform, 1 the model uniform.
pub const FIRST_USER_BINDING: u32 = 2;

/// One user-provided shader binding.
#[derive(Debug, Clone, Copy)]
pub enum Binding {
    /// Combined image sampler.
    Texture {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
    /// Extra uniform buffer range.
    Uniform {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
}

/// Set of user bindings, keyed by binding index.
#[derive(Debug, Default)]
pub struct BindingSet {
    slots: HashMap<u32, Binding>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a binding at `index`.
    ///
    /// Panics on a reserved or occupied index; both are programming
    /// errors, not runtime conditions.
    pub fn add(&mut self, index: u32, binding: Binding) {
        assert!(
            index >= FIRST_USER_BINDING,
            "binding index {index} is reserved"
        );
        assert!(
            !self.slots.contains_key(&index),
            "binding index {index} already in use"
        );
        self.slots.insert(index, binding);
    }

    /// Replace the binding at `index`, which must exist.
    pub fn replace(&mut self, index: u32, binding: Binding) {
        assert!(
            self.slots.contains_key(&index),
            "binding index {index} not in use"
        );
        self.slots.insert(index, binding);
    }

    pub fn remove(&mut self, index: u32) -> Option<Binding> {
        self.slots.remove(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Iterate bindings in ascending index order, as descriptor writes
    /// expect.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (u32, &Binding)> {
        let mut entries: Vec<(u32, &Binding)> =
            self.slots.iter().map(|(&index, binding)| (index, binding)).collect();
        entries.sort_unstable_by_key(|&(index, _)| index);
        entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture() -> Binding {
        Binding::Texture {
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
        }
    }

    #[test]
    fn bindings_iterate_in_index_order() {
        let mut set = BindingSet::new();
        set.add(5, texture());
        set.add(2, texture());
        set.add(3, texture());

        let order: Vec<u32> = set.iter_ordered().map(|(i, _)| i).collect();
        assert_eq!(order, vec![2, 3, 5]);
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn occupied_index_is_rejected() {
        let mut set = BindingSet::new();
        set.add(2, texture());
        set.add(2, texture());
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn reserved_index_is_rejected() {
        let mut set = BindingSet::new();
        set.add(1, texture());
    }
}
