//! Definition and implementations of `LockCouplingList`
//!
use node_arena::{Key, NodeArena, NodeGuard, NodeIdx, NIL};
use std::fmt;

const HEAD: NodeIdx = 0;

/// The locked pair returned by `locate`: `prev` is always held, `curr` is the first node with
/// `curr.key >= key` (held) or `None` when every key in the list is smaller. Dropping the window
/// releases both locks, predecessor first.
struct Window<'a, V: 'a> {
    prev: NodeGuard<'a, V>,
    curr: Option<NodeGuard<'a, V>>,
}

impl<'a, V> Window<'a, V> {
    /// `curr` if it holds exactly `key`.
    #[inline]
    fn matching(&self, key: Key) -> Option<&NodeGuard<'a, V>> {
        match self.curr {
            Some(ref curr) if curr.key == key => Some(curr),
            _ => None,
        }
    }
}

/// `LockCouplingList` is a sorted singly linked list whose operations may run from many threads
/// at once. Every node carries its own spin lock and a traversal holds at most two adjacent
/// nodes locked at any time (hand-over-hand locking), always acquiring forward from the
/// sentinel head, so operations on distant parts of the chain do not block each other and
/// the fixed acquisition order rules out deadlock.
///
/// Keys are kept in non-decreasing order. Duplicate keys are allowed; a new node is placed in
/// front of the existing nodes with the same key, so `lookup` and `remove` always see the most
/// recently inserted one.
///
/// Nodes live in a `NodeArena` and link to each other by index. A removed node is unlinked while
/// both it and its predecessor are locked and reclaimed only after both locks are released; at
/// that point no other thread can reach it, since reaching it requires the predecessor's lock
/// and the predecessor no longer points at it.
///
/// `lookup` copies the payload out while the node is still locked. Use `lookup_with` to borrow
/// it in place, or store an `Arc` as payload to share it beyond the call.
///
/// # Examples
///
/// ```
/// use rs_lockcoupling::lock_coupling_list::LockCouplingList;
///
/// let list = LockCouplingList::new();
/// list.insert(2, "two");
/// list.insert(1, "one");
/// assert_eq!(list.keys(), vec![1, 2]);
/// assert_eq!(list.lookup(2), Some("two"));
/// assert_eq!(list.remove(1), Some("one"));
/// assert_eq!(list.lookup(1), None);
/// ```
///
pub struct LockCouplingList<V> {
    arena: NodeArena<V>,
}

impl<V> Default for LockCouplingList<V> {
    fn default() -> Self {
        LockCouplingList::new()
    }
}

impl<V> LockCouplingList<V> {
    /// Return an empty list: the sentinel head and nothing else.
    pub fn new() -> LockCouplingList<V> {
        let arena = NodeArena::new();
        let head = arena.alloc(0, None, NIL);
        debug_assert_eq!(head, HEAD);
        LockCouplingList { arena }
    }

    #[inline]
    fn lock_successor<'a>(&'a self, prev: &NodeGuard<'a, V>) -> Option<NodeGuard<'a, V>> {
        if prev.next == NIL {
            None
        } else {
            Some(self.arena.lock(prev.next))
        }
    }

    /// Hand-over-hand search for the window of `key`. The sentinel's own key is never compared.
    fn locate(&self, key: Key) -> Window<V> {
        let mut prev = self.arena.lock(HEAD);
        let mut curr = self.lock_successor(&prev);
        loop {
            match curr {
                Some(ref c) if c.key < key => {}
                _ => break,
            }
            if let Some(next) = curr.take() {
                // the old predecessor is unlocked here, after its successor was locked
                prev = next;
            }
            curr = self.lock_successor(&prev);
        }
        Window { prev, curr }
    }

    /// Insert `payload` under `key`. Always succeeds; duplicates go in front of existing nodes
    /// with the same key.
    pub fn insert(&self, key: Key, payload: V) {
        let mut window = self.locate(key);
        let next = window.curr.as_ref().map_or(NIL, |c| c.idx());
        let node = self.arena.alloc(key, Some(payload), next);
        window.prev.next = node;
    }

    /// Remove the most recently inserted node with `key` and hand its payload back.
    ///
    /// Return `None`, leaving the list untouched, if `key` is absent.
    pub fn remove(&self, key: Key) -> Option<V> {
        let Window { mut prev, curr } = self.locate(key);
        match curr {
            Some(curr) if curr.key == key => {
                prev.next = curr.next;
                let victim = curr.idx();
                drop(prev);
                drop(curr);
                unsafe { self.arena.reclaim(victim) }
            }
            _ => None,
        }
    }

    /// Run `f` on the payload of `key` while its node is locked. `f` gets `None` if `key` is
    /// absent. `f` must not call back into this list.
    pub fn lookup_with<F, R>(&self, key: Key, f: F) -> R
    where
        F: FnOnce(Option<&V>) -> R,
    {
        let window = self.locate(key);
        f(window.matching(key).and_then(|c| c.payload.as_ref()))
    }

    /// Return true if some node holds `key`.
    pub fn contains(&self, key: Key) -> bool {
        self.locate(key).matching(key).is_some()
    }

    /// Visit every node in chain order with hand-over-hand locking. Concurrent updates outside
    /// the visited pair may or may not be seen. `f` must not call back into this list.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(Key, &V),
    {
        let mut prev = self.arena.lock(HEAD);
        while let Some(curr) = self.lock_successor(&prev) {
            if let Some(ref payload) = curr.payload {
                f(curr.key, payload);
            }
            prev = curr;
        }
    }

    /// Keys in chain order.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = vec![];
        self.for_each(|k, _| keys.push(k));
        keys
    }

    pub fn len(&self) -> usize {
        let mut n = 0;
        self.for_each(|_, _| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.arena.lock(HEAD).next == NIL
    }

    /// Return true if every adjacent pair of nodes is in non-decreasing key order.
    pub fn check_order(&self) -> bool {
        let mut prev = self.arena.lock(HEAD);
        let mut last = None;
        while let Some(curr) = self.lock_successor(&prev) {
            if let Some(k) = last {
                if k > curr.key {
                    warn!("order broken, {} before {}", k, curr.key);
                    return false;
                }
            }
            last = Some(curr.key);
            prev = curr;
        }
        true
    }

    /// Detach the whole chain from the sentinel, then reclaim it node by node, passing each
    /// payload to `f` in chain order. Return the number of reclaimed nodes.
    fn reclaim_chain<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(Key, V),
    {
        let mut n = 0;
        let mut next = {
            let mut head = self.arena.lock(HEAD);
            let first = head.next;
            head.next = NIL;
            first
        };
        while next != NIL {
            let (key, following) = {
                let node = self.arena.lock(next);
                (node.key, node.next)
            };
            if let Some(payload) = unsafe { self.arena.reclaim(next) } {
                f(key, payload);
            }
            n += 1;
            next = following;
        }
        n
    }

    /// Unlink every node and hand the payloads back in chain order. Taking `&mut self` makes
    /// this exclusive: with an `Arc`-shared list, join all workers and `Arc::try_unwrap` first.
    pub fn drain(&mut self) -> Vec<(Key, V)> {
        let mut items = vec![];
        self.reclaim_chain(|key, payload| items.push((key, payload)));
        items
    }

    /// Release every real node and its payload. The list stays usable and empty afterwards.
    pub fn destroy(&mut self) {
        let n = self.reclaim_chain(|_, payload| drop(payload));
        if n != 0 {
            debug!(
                "destroy released {} nodes, live_nodes={}",
                n,
                self.arena.live_count()
            );
        }
    }

    /// Node slots currently backed by memory, the sentinel included. Freed slots are reused, so
    /// this follows the peak size of the list rather than the number of inserts.
    pub fn node_capacity(&self) -> usize {
        self.arena.capacity()
    }
}

impl<V> LockCouplingList<V>
where
    V: Clone,
{
    /// Return a copy of the payload of the most recently inserted node with `key`.
    pub fn lookup(&self, key: Key) -> Option<V> {
        self.lookup_with(key, |v| v.cloned())
    }
}

impl<V> Drop for LockCouplingList<V> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<V> fmt::Debug for LockCouplingList<V>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut entries = vec![];
        self.for_each(|k, v| entries.push(format!("{}: {:?}", k, v)));
        write!(f, "[{}]", entries.join(", "))
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Node {
        cnt: Rc<RefCell<i32>>,
        v: i32,
    }

    impl Drop for Node {
        fn drop(&mut self) {
            *self.cnt.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_base() {
        use lock_coupling_list::LockCouplingList;

        let list = LockCouplingList::new();
        assert!(list.is_empty());
        assert_eq!(list.lookup(1), None);
        assert_eq!(list.remove(1), None);
        list.insert(1, 10);
        assert!(!list.is_empty());
        assert_eq!(list.lookup(1), Some(10));
        assert_eq!(list.remove(1), Some(10));
        assert!(list.is_empty());
        let test_num = 100;
        for i in (0..test_num).rev() {
            list.insert(i, i * 10);
        }
        assert_eq!(list.keys(), (0..test_num).collect::<Vec<_>>());
        assert_eq!(list.len(), test_num as usize);
        assert!(list.check_order());
    }

    #[test]
    fn test_locate_window() {
        use lock_coupling_list::{LockCouplingList, HEAD};

        let list = LockCouplingList::new();
        {
            let w = list.locate(5);
            assert_eq!(w.prev.idx(), HEAD);
            assert!(w.curr.is_none());
        }
        list.insert(3, ());
        list.insert(7, ());
        {
            let w = list.locate(5);
            assert_eq!(w.prev.key, 3);
            assert_eq!(w.curr.as_ref().map(|c| c.key), Some(7));
        }
        {
            let w = list.locate(i64::min_value());
            assert_eq!(w.prev.idx(), HEAD);
            assert_eq!(w.curr.as_ref().map(|c| c.key), Some(3));
        }
        {
            let w = list.locate(8);
            assert_eq!(w.prev.key, 7);
            assert!(w.curr.is_none());
        }
    }

    #[test]
    fn test_duplicate_keys() {
        use lock_coupling_list::LockCouplingList;

        let list = LockCouplingList::new();
        list.insert(5, "a");
        list.insert(5, "b");
        list.insert(4, "x");
        assert_eq!(list.keys(), vec![4, 5, 5]);
        assert_eq!(list.lookup(5), Some("b"));
        assert_eq!(list.remove(5), Some("b"));
        assert_eq!(list.lookup(5), Some("a"));
        assert_eq!(list.remove(5), Some("a"));
        assert_eq!(list.remove(5), None);
        assert_eq!(list.keys(), vec![4]);
    }

    #[test]
    fn test_lookup_with() {
        use lock_coupling_list::LockCouplingList;

        let list = LockCouplingList::new();
        list.insert(1, String::from("one"));
        assert_eq!(list.lookup_with(1, |v| v.map(|s| s.len())), Some(3));
        assert!(list.lookup_with(2, |v| v.is_none()));
        assert!(list.contains(1));
        assert!(!list.contains(2));
    }

    #[test]
    fn test_slot_reuse() {
        use lock_coupling_list::LockCouplingList;

        let list = LockCouplingList::new();
        for round in 0..10 {
            for i in 0..50 {
                list.insert(i, round);
            }
            for i in 0..50 {
                assert_eq!(list.remove(i), Some(round));
            }
        }
        assert!(list.is_empty());
        // only the sentinel is left, and freed slots were recycled
        assert_eq!(list.arena.live_count(), 1);
        assert!(list.node_capacity() < 200);
    }

    #[test]
    fn test_debug() {
        use lock_coupling_list::LockCouplingList;

        let list = LockCouplingList::new();
        list.insert(2, 'b');
        list.insert(1, 'a');
        assert_eq!(format!("{:?}", list), "[1: 'a', 2: 'b']");
    }

    #[test]
    fn test_memory_leak() {
        use lock_coupling_list::LockCouplingList;

        let cnt = Rc::new(RefCell::new(0));
        let test_num = 100;
        {
            let mut list = LockCouplingList::new();
            for i in 0..test_num {
                list.insert(i as i64, Node { cnt: cnt.clone(), v: i });
            }
            assert_eq!(*cnt.borrow(), 0);
            for i in 0..10 {
                assert_eq!(list.remove(i as i64).unwrap().v, i);
            }
            assert_eq!(*cnt.borrow(), 10);
            let drained = list.drain();
            assert_eq!(drained.len(), 90);
            assert_eq!(drained[0].0, 10);
            assert!(list.is_empty());
            drop(drained);
            assert_eq!(*cnt.borrow(), test_num);
            for i in 0..5 {
                list.insert(i, Node { cnt: cnt.clone(), v: i as i32 });
            }
        }
        assert_eq!(*cnt.borrow(), test_num + 5);
    }

    #[test]
    fn test_destroy_releases_in_place() {
        use lock_coupling_list::LockCouplingList;

        let cnt = Rc::new(RefCell::new(0));
        let mut list = LockCouplingList::new();
        for i in 0..40 {
            list.insert(i, Node { cnt: cnt.clone(), v: i as i32 });
        }
        let capacity = list.node_capacity();
        list.destroy();
        assert_eq!(*cnt.borrow(), 40);
        assert!(list.is_empty());
        assert_eq!(list.arena.live_count(), 1);
        // destroying an empty list is a no-op
        list.destroy();
        assert_eq!(*cnt.borrow(), 40);
        for i in 0..40 {
            list.insert(i, Node { cnt: cnt.clone(), v: i as i32 });
        }
        assert_eq!(list.node_capacity(), capacity);
        assert_eq!(list.lookup_with(7, |n| n.map(|n| n.v)), Some(7));
    }
}
