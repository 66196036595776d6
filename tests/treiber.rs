use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};

use crossbeam_utils::thread::scope;

use quiesce::{unprotected, Atomic, Collector, Guard, Owned};

struct Stack<T> {
    head: Atomic<Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    elem: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    #[inline]
    fn new(elem: T) -> Self {
        Self { elem: ManuallyDrop::new(elem), next: Atomic::null() }
    }
}

impl<T> Stack<T> {
    #[inline]
    fn new() -> Self {
        Self { head: Atomic::null() }
    }

    #[inline]
    fn push(&self, elem: T, guard: &Guard) {
        let mut node = Owned::new(Node::new(elem));

        loop {
            let head = self.head.load(Acquire, guard);
            node.next.store(head, Relaxed);

            match self.head.compare_and_set_weak(head, node, Release, guard) {
                Ok(_) => return,
                Err(fail) => node = fail.new,
            }
        }
    }

    #[inline]
    fn pop(&self, guard: &Guard) -> Option<T> {
        loop {
            let head = self.head.load(Acquire, guard);
            match unsafe { head.as_ref() } {
                Some(node) => {
                    let next = node.next.load(Relaxed, guard);
                    if self.head.compare_and_set_weak(head, next, Release, guard).is_ok() {
                        unsafe {
                            // The node is unlinked; its element is moved out
                            // and only the node itself is reclaimed lazily.
                            let elem = ptr::read(&*node.elem);
                            guard.defer_destroy(head);
                            return Some(elem);
                        }
                    }
                }
                None => return None,
            }
        }
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = unprotected();
            let mut curr = self.head.load(Relaxed, guard);
            while let Some(node) = curr.as_ref() {
                let next = node.next.load(Relaxed, guard);

                let mut node = curr.into_owned();
                ManuallyDrop::drop(&mut node.elem);
                drop(node);

                curr = next;
            }
        }
    }
}

static DROPS: AtomicUsize = AtomicUsize::new(0);

struct DropCount;

impl Drop for DropCount {
    fn drop(&mut self) {
        DROPS.fetch_add(1, Relaxed);
    }
}

#[test]
fn treiber_stack() {
    const THREADS: usize = 8;
    const INITIAL: usize = 1_000;
    const OPERATIONS: usize = 100_000;

    let collector = Collector::new();
    let stack = Stack::new();

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|_| {
                let handle = collector.register();

                for _ in 0..INITIAL {
                    stack.push(DropCount, &handle.pin());
                }

                for _ in 0..OPERATIONS {
                    let guard = handle.pin();
                    let _ = stack.pop(&guard);
                    stack.push(DropCount, &guard);
                }
            });
        }
    })
    .unwrap();

    // Elements still on the stack are dropped here; nodes and bags drain
    // when the collector goes away.
    drop(stack);
    drop(collector);

    assert_eq!(THREADS * (INITIAL + OPERATIONS), DROPS.load(Relaxed));
}
