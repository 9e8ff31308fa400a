//! Shared test scaffolding: a logging external object.
//!
//! `TestObject` maintains its own parent/child structure the way a real
//! backend would, appends every mutation to a shared log, and asserts the
//! `before` hint it receives on relocation. Tests compare the log literally.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::{Rc, Weak};

use trellis::{Context, TreeObject};

#[derive(Clone)]
pub struct TestObject {
    inner: Rc<RefCell<Inner>>,
    log: Rc<RefCell<String>>,
}

struct Inner {
    name: String,
    parent: Weak<RefCell<Inner>>,
    children: Vec<TestObject>,
}

impl TestObject {
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Render the subtree as `name(child;child;)`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        let inner = self.inner.borrow();
        out.push_str(&inner.name);
        out.push('(');
        for child in &inner.children {
            child.write(out);
            out.push(';');
        }
        out.push(')');
    }
}

impl TreeObject for TestObject {
    fn remove(&self) {
        {
            let mut log = self.log.borrow_mut();
            let _ = write!(log, "removing {}; ", self.inner.borrow().name);
        }
        let parent = self.inner.borrow().parent.upgrade();
        if let Some(parent) = parent {
            parent.borrow_mut().children.retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
        }
        self.inner.borrow_mut().parent = Weak::new();
    }

    fn relocate(&self, parent: &Self, after: Option<&Self>, before: Option<&Self>) {
        {
            let mut log = self.log.borrow_mut();
            let _ = write!(
                log,
                "relocating {} into {}",
                self.inner.borrow().name,
                parent.inner.borrow().name,
            );
            if let Some(after) = after {
                let _ = write!(log, " after {}", after.inner.borrow().name);
            }
            let _ = write!(log, "; ");
        }

        let old_parent = self.inner.borrow().parent.upgrade();
        if let Some(old_parent) = old_parent {
            old_parent
                .borrow_mut()
                .children
                .retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
        }
        self.inner.borrow_mut().parent = Rc::downgrade(&parent.inner);

        let mut siblings = parent.inner.borrow_mut();
        let insert_at = match after {
            Some(after) => {
                siblings
                    .children
                    .iter()
                    .position(|child| Rc::ptr_eq(&child.inner, &after.inner))
                    .expect("`after` is not a sibling")
                    + 1
            }
            None => 0,
        };
        siblings.children.insert(insert_at, self.clone());

        // `before` is an assertion about the resulting next sibling.
        match before {
            Some(before) => assert!(
                Rc::ptr_eq(&siblings.children[insert_at + 1].inner, &before.inner),
                "relocation landed before the wrong sibling",
            ),
            None => assert_eq!(
                insert_at + 1,
                siblings.children.len(),
                "relocation expected to land last",
            ),
        }
    }
}

/// Creates test objects wired to one shared mutation log.
#[derive(Clone)]
pub struct Spawner {
    log: Rc<RefCell<String>>,
}

impl Spawner {
    pub fn new() -> Self {
        Self { log: Rc::new(RefCell::new(String::new())) }
    }

    pub fn object(&self, name: &str) -> TestObject {
        TestObject {
            inner: Rc::new(RefCell::new(Inner {
                name: name.to_owned(),
                parent: Weak::new(),
                children: Vec::new(),
            })),
            log: self.log.clone(),
        }
    }

    /// Append a marker to the log (for observing traversal decisions).
    pub fn note(&self, text: &str) {
        self.log.borrow_mut().push_str(text);
    }

    /// Take and clear the accumulated log.
    pub fn take_log(&self) -> String {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

/// A leaf widget: one object synchronized at the current position.
pub fn object(ctx: &mut Context<'_, TestObject>, spawner: &Spawner, name: &str) {
    let node = ctx.node_cell(|| spawner.object(name));
    if ctx.is_refresh() {
        ctx.place(node);
    }
}

/// A container widget: places itself, then reconciles its children.
pub fn container(
    ctx: &mut Context<'_, TestObject>,
    spawner: &Spawner,
    name: &str,
    f: impl FnOnce(&mut Context<'_, TestObject>),
) {
    let node = ctx.node_cell(|| spawner.object(name));
    ctx.container(node, f);
}

/// The piecewise variant: the container is placed separately from opening
/// its children scope.
pub fn piecewise_container(
    ctx: &mut Context<'_, TestObject>,
    spawner: &Spawner,
    name: &str,
    f: impl FnOnce(&mut Context<'_, TestObject>),
) {
    let node = ctx.node_cell(|| spawner.object(name));
    if ctx.is_refresh() {
        ctx.place(node);
    }
    ctx.children(node, f);
}
