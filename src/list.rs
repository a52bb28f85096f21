use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// A node of one of our intrusive linked lists.
///
/// The node is never heap-allocated on its own: it is always written at an
/// address inside memory we already own (the start of a mapped region for
/// blocks, the start of a chunk for chunks). The payload of a chunk therefore
/// starts right after its `Node<Chunk>` header.
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Doubly-linked list whose nodes live at caller-chosen addresses.
///
/// The head is the oldest node and the tail is the most recently appended
/// one, so iteration order is insertion order. For the block list that means
/// acquisition order; for a chunk list it means address order, because chunks
/// are only ever created at the start of a block or by splitting an existing
/// chunk in place.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Link<Node<T>> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a new node to the Linked List.
    ///
    /// It is very important for us that, because we are the actual memory
    /// allocator, this method can not make allocations itself. Therefore,
    /// it has to receive the `addr` where this node has to be written.
    ///
    /// This way, the node will be placed inside of our data structures in
    /// the exact place we want.
    ///
    /// **SAFETY**: Caller (we, as the allocator) must guarantee that `addr` is
    /// valid for writing a `Node<T>` and stays valid while the node is linked.
    pub unsafe fn append(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            if let Some(mut tail) = self.tail {
                tail.as_mut().next = Some(node);
            } else {
                self.head = Some(node);
            }

            self.tail = Some(node);
            self.len += 1;

            node
        }
    }

    /// Writes a new node at `addr` and links it immediately after `after`.
    ///
    /// This is how chunk splitting introduces the free remainder: the new node
    /// lands at the split address and takes over `after`'s old successor.
    ///
    /// **SAFETY**: same contract as [`List::append`], and `after` must be a
    /// node of this list.
    pub unsafe fn insert_after(
        &mut self,
        mut after: NonNull<Node<T>>,
        data: T,
        addr: NonNull<u8>,
    ) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: after.as_ref().next,
                prev: Some(after),
                data,
            });

            match after.as_ref().next {
                Some(mut next) => next.as_mut().prev = Some(node),
                None => self.tail = Some(node),
            }

            after.as_mut().next = Some(node);
            self.len += 1;

            node
        }
    }

    /// Unlinks `node` from the list. The node's memory is not touched, it
    /// simply stops being reachable from the list.
    ///
    /// **SAFETY**: `node` must be a node of this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let next = node.as_ref().next;
            let prev = node.as_ref().prev;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
            self.remaining -= 1;

            Some(&node.as_ref().data)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
