//! The set of chunks holding every entity of one archetype.

use std::sync::Arc;

use rayon::prelude::*;

use crate::archetype::Archetype;
use crate::chunk::Chunk;
use crate::component_data::ComponentValueRef;
use crate::entity::Entity;

/// A densely packed list of chunks for a single archetype.
///
/// Every chunk except the last one is always full. Removing a row fills the
/// hole with the very last row, so removal is O(1).
#[derive(Debug)]
pub struct ChunkSet {
    archetype: Arc<Archetype>,
    chunks: Vec<Chunk>,
    len: usize,
}

impl ChunkSet {
    /// Create a new empty `ChunkSet`.
    pub fn new(archetype: Arc<Archetype>) -> ChunkSet {
        ChunkSet {
            archetype,
            chunks: Vec::new(),
            len: 0,
        }
    }

    /// Return the archetype all the chunks share.
    pub fn archetype(&self) -> &Arc<Archetype> {
        &self.archetype
    }

    /// The number of entities stored across all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no entities are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the chunks in this set.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    /// Get a single chunk.
    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    /// Iterate over all of the chunks.
    pub fn iter_chunks(&self) -> impl Iterator<Item=&Chunk> + '_ {
        self.chunks.iter()
    }

    /// Iterate over all of the chunks in parallel.
    pub fn par_iter_chunks(&self) -> impl IndexedParallelIterator<Item=&Chunk> + '_ {
        self.chunks.par_iter()
    }

    /// Append a row, returning its `(chunk, row)` position.
    pub(crate) fn push<'a>(&mut self, entity: Entity, values: impl IntoIterator<Item=ComponentValueRef<'a>>) -> (usize, usize) {
        if self.chunks.last().map_or(true, Chunk::is_full) {
            self.chunks.push(Chunk::new(self.archetype.clone()));
        }

        let chunk_index = self.chunks.len() - 1;
        let row = self.chunks[chunk_index].push(entity, values);
        self.len += 1;
        (chunk_index, row)
    }

    /// Remove the row at `(chunk, row)`.
    ///
    /// If another entity was moved to fill the hole, returns it together with
    /// its new position (which is always `(chunk, row)`).
    pub(crate) fn remove(&mut self, chunk: usize, row: usize) -> Option<(Entity, usize, usize)> {
        let last_index = self.chunks.len() - 1;

        let moved = if chunk == last_index {
            self.chunks[chunk].swap_remove(row)
        } else {
            let (head, tail) = self.chunks.split_at_mut(last_index);
            let target = &mut head[chunk];
            let last = &mut tail[0];
            let last_row = last.len() - 1;
            target.copy_row_from(row, last, last_row);
            last.pop();
            Some(target.entities()[row])
        };

        if self.chunks.last().map_or(false, Chunk::is_empty) {
            self.chunks.pop();
        }

        self.len -= 1;
        moved.map(|entity| (entity, chunk, row))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::component::Component;
    use crate::component_set;
    use rayon::iter::ParallelIterator;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Label(u32);

    crate::component!(Label);

    fn fill(set: &mut ChunkSet, n: u32) {
        for i in 0..n {
            let label = Label(i);
            set.push(Entity::from_raw_parts(i, 0), vec![ComponentValueRef::from(&label)]);
        }
    }

    fn labels(set: &ChunkSet) -> Vec<u32> {
        set.iter_chunks()
            .flat_map(|c| c.components::<Label>().unwrap().iter().map(|l| l.0))
            .collect()
    }

    #[test]
    fn test_push_fills_chunks() {
        let archetype = Arc::new(Archetype::new(0, component_set!(Label::type_id()), 2));
        let mut set = ChunkSet::new(archetype);
        fill(&mut set, 5);

        assert_eq!(set.len(), 5);
        assert_eq!(set.chunks().len(), 3);
        assert_eq!(labels(&set), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_fills_from_last_chunk() {
        let archetype = Arc::new(Archetype::new(0, component_set!(Label::type_id()), 2));
        let mut set = ChunkSet::new(archetype);
        fill(&mut set, 5);

        let moved = set.remove(0, 1);
        assert_eq!(moved, Some((Entity::from_raw_parts(4, 0), 0, 1)));
        assert_eq!(set.chunks().len(), 2);
        assert_eq!(labels(&set), vec![0, 4, 2, 3]);

        // Removing the final row moves nothing.
        assert_eq!(set.remove(1, 1), None);
        assert_eq!(labels(&set), vec![0, 4, 2]);

        assert_eq!(set.par_iter_chunks().map(Chunk::len).sum::<usize>(), 3);
    }
}
