//! Single-level timing wheel with per-node cycle counts.
//!
//! Every bucket is a singly linked list threaded through a shared node
//! arena; freed slots are recycled through a free list. The cursor names the
//! next bucket to visit: a tick takes that bucket, then advances. An item
//! pushed with delay `d` is placed `d` buckets past the cursor and fires on
//! tick `d + 1`, after `d` full tick periods.

use std::collections::HashMap;

use crate::{Item, ItemId, QueueError, QueueResult};

/// Number of buckets; one revolution covers an hour at one tick per second
pub const WHEEL_SIZE: usize = 3600;

type NodeIndex = usize;

#[derive(Debug)]
struct Node {
    item: Item,
    cycle_count: u64,
    wheel_index: usize,
    next: Option<NodeIndex>,
}

#[derive(Debug)]
enum Slot {
    Occupied(Node),
    Free { next_free: Option<NodeIndex> },
}

/// Where a pushed item landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub bucket: usize,
    pub cycle_count: u64,
}

#[derive(Debug)]
pub struct Wheel {
    size: usize,
    cursor: usize,
    heads: Vec<Option<NodeIndex>>,
    slots: Vec<Slot>,
    free_head: Option<NodeIndex>,
    /// Pending item ids and the bucket holding each
    tracking: HashMap<ItemId, usize>,
}

impl Wheel {
    pub fn new() -> Self {
        Self::with_size(WHEEL_SIZE)
    }

    /// Wheel with a custom bucket count (must be non-zero)
    pub fn with_size(size: usize) -> Self {
        assert!(size > 0, "wheel size must be non-zero");
        Self {
            size,
            cursor: 0,
            heads: vec![None; size],
            slots: Vec::new(),
            free_head: None,
            tracking: HashMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Next bucket to visit
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.tracking.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracking.is_empty()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.tracking.contains_key(id)
    }

    /// Compute the bucket and remaining revolutions for a delay in ticks
    pub fn placement(&self, delay: u64) -> Placement {
        let size = self.size as u64;
        let cursor = self.cursor as u64;
        let target = cursor.saturating_add(delay);

        let bucket = (target % size) as usize;
        let mut cycle_count = target / size;
        // A bucket behind the cursor is first reached only after the wrap.
        // The cursor bucket itself is visited on the very next tick.
        if cycle_count > 0 && bucket < self.cursor {
            cycle_count -= 1;
        }
        Placement { bucket, cycle_count }
    }

    /// Insert an item. Negative delays count as zero; zero-delay items fire on
    /// the next tick.
    ///
    /// Fails with [`QueueError::DuplicateItem`] while another item with the
    /// same id is pending.
    pub fn push(&mut self, mut item: Item) -> QueueResult<Placement> {
        if item.id.is_empty() {
            item.id = ItemId::new();
        }
        if self.tracking.contains_key(&item.id) {
            return Err(QueueError::DuplicateItem(item.id.to_string()));
        }
        let placement = self.placement(item.effective_delay() as u64);
        self.tracking.insert(item.id.clone(), placement.bucket);

        let node = Node {
            item,
            cycle_count: placement.cycle_count,
            wheel_index: placement.bucket,
            next: self.heads[placement.bucket],
        };
        let index = self.alloc(node);
        self.heads[placement.bucket] = Some(index);
        Ok(placement)
    }

    /// Visit the cursor bucket, collect every item whose cycle has elapsed,
    /// then advance
    pub fn tick(&mut self) -> Vec<Item> {
        let bucket = self.cursor;
        self.cursor = (self.cursor + 1) % self.size;

        let mut fired = Vec::new();
        let mut prev: Option<NodeIndex> = None;
        let mut cur = self.heads[bucket];

        while let Some(index) = cur {
            let (next, due) = match &mut self.slots[index] {
                Slot::Occupied(node) => {
                    debug_assert_eq!(node.wheel_index, bucket);
                    if node.cycle_count == 0 {
                        (node.next, true)
                    } else {
                        node.cycle_count -= 1;
                        (node.next, false)
                    }
                }
                Slot::Free { .. } => unreachable!("free slot linked into bucket {bucket}"),
            };

            if due {
                self.unlink(bucket, prev, next);
                let node = self.release(index);
                self.tracking.remove(&node.item.id);
                fired.push(node.item);
            } else {
                prev = Some(index);
            }
            cur = next;
        }

        fired
    }

    fn unlink(&mut self, bucket: usize, prev: Option<NodeIndex>, next: Option<NodeIndex>) {
        match prev {
            None => self.heads[bucket] = next,
            Some(p) => {
                if let Slot::Occupied(node) = &mut self.slots[p] {
                    node.next = next;
                }
            }
        }
    }

    fn alloc(&mut self, node: Node) -> NodeIndex {
        match self.free_head {
            Some(index) => {
                if let Slot::Free { next_free } = self.slots[index] {
                    self.free_head = next_free;
                }
                self.slots[index] = Slot::Occupied(node);
                index
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, index: NodeIndex) -> Node {
        let slot = std::mem::replace(
            &mut self.slots[index],
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(index);
        match slot {
            Slot::Occupied(node) => node,
            Slot::Free { .. } => unreachable!("double release of wheel slot {index}"),
        }
    }
}

impl Default for Wheel {
    fn default() -> Self {
        Self::new()
    }
}
