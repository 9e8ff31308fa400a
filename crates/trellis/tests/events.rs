//! Event routing: targeting a dispatch at a previously captured region, path
//! relevance during the re-invocation, broadcasts, and stale targets.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{container, object, Spawner, TestObject};
use trellis::{RegionId, System};

/// Event payload: records which widgets saw it and whether they were on the
/// path to the target.
#[derive(Default)]
struct Probe {
    hits: Vec<(&'static str, bool)>,
}

type Slot = Rc<Cell<Option<RegionId>>>;

fn build(
    spawner: &Spawner,
    show_b: &Rc<Cell<bool>>,
) -> (System<TestObject>, Slot, Slot) {
    let button_a: Slot = Rc::new(Cell::new(None));
    let button_b: Slot = Rc::new(Cell::new(None));

    let sp = spawner.clone();
    let show = show_b.clone();
    let slot_a = button_a.clone();
    let slot_b = button_b.clone();
    let system = System::new(spawner.object("root"), move |ctx| {
        ctx.region(|ctx| {
            container(ctx, &sp, "panel_a", |ctx| {
                let relevant = ctx.is_relevant();
                if let Some(probe) = ctx.event_mut::<Probe>() {
                    probe.hits.push(("panel_a", relevant));
                }
                ctx.region(|ctx| {
                    if ctx.is_refresh() {
                        slot_a.set(ctx.current_region());
                    }
                    object(ctx, &sp, "button_a");
                    let relevant = ctx.is_relevant();
                    if let Some(probe) = ctx.event_mut::<Probe>() {
                        probe.hits.push(("button_a", relevant));
                    }
                });
            });
        });
        ctx.branch(show.get(), |ctx| {
            ctx.region(|ctx| {
                container(ctx, &sp, "panel_b", |ctx| {
                    let relevant = ctx.is_relevant();
                    if let Some(probe) = ctx.event_mut::<Probe>() {
                        probe.hits.push(("panel_b", relevant));
                    }
                    ctx.region(|ctx| {
                        if ctx.is_refresh() {
                            slot_b.set(ctx.current_region());
                        }
                        object(ctx, &sp, "button_b");
                        let relevant = ctx.is_relevant();
                        if let Some(probe) = ctx.event_mut::<Probe>() {
                            probe.hits.push(("button_b", relevant));
                        }
                    });
                });
            });
        });
    });

    (system, button_a, button_b)
}

#[test]
fn targeted_dispatch_marks_only_the_path_relevant() {
    let spawner = Spawner::new();
    let show_b = Rc::new(Cell::new(true));
    let (mut system, button_a, button_b) = build(&spawner, &show_b);

    system.refresh();
    let target_a = button_a.get().expect("region captured during refresh");
    let target_b = button_b.get().expect("region captured during refresh");

    let mut probe = Probe::default();
    system.dispatch(Some(target_a), &mut probe);
    assert_eq!(
        probe.hits,
        [("panel_a", true), ("button_a", true), ("panel_b", false), ("button_b", false)],
    );

    let mut probe = Probe::default();
    system.dispatch(Some(target_b), &mut probe);
    assert_eq!(
        probe.hits,
        [("panel_a", false), ("button_a", false), ("panel_b", true), ("button_b", true)],
    );
}

#[test]
fn broadcast_reaches_every_region() {
    let spawner = Spawner::new();
    let show_b = Rc::new(Cell::new(true));
    let (mut system, _, _) = build(&spawner, &show_b);

    system.refresh();

    let mut probe = Probe::default();
    system.broadcast(&mut probe);
    assert_eq!(
        probe.hits,
        [("panel_a", true), ("button_a", true), ("panel_b", true), ("button_b", true)],
    );
}

#[test]
fn stale_target_delivers_at_the_root() {
    let spawner = Spawner::new();
    let show_b = Rc::new(Cell::new(true));
    let (mut system, _, button_b) = build(&spawner, &show_b);

    system.refresh();
    let target_b = button_b.get().expect("region captured during refresh");

    // The branch declaring panel_b is dropped; its regions retire with their
    // cells.
    show_b.set(false);
    system.refresh();
    spawner.take_log();

    let mut probe = Probe::default();
    system.dispatch(Some(target_b), &mut probe);
    assert_eq!(probe.hits, [("panel_a", false), ("button_a", false)]);
}

#[test]
fn regions_keep_identity_across_passes() {
    let spawner = Spawner::new();
    let show_b = Rc::new(Cell::new(true));
    let (mut system, button_a, _) = build(&spawner, &show_b);

    system.refresh();
    let first = button_a.get();
    system.refresh();
    let second = button_a.get();

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[test]
fn events_do_not_disturb_the_materialized_tree() {
    let spawner = Spawner::new();
    let show_b = Rc::new(Cell::new(true));
    let (mut system, button_a, _) = build(&spawner, &show_b);

    system.refresh();
    spawner.take_log();
    let rendered = system.tree().object(system.tree().root()).render();

    let mut probe = Probe::default();
    system.dispatch(button_a.get(), &mut probe);

    assert_eq!(spawner.take_log(), "");
    assert_eq!(system.tree().object(system.tree().root()).render(), rendered);
}
