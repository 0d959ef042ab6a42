//! Per-frame recording: dispatch sizing, parity, time gating and hazards.

mod common;

use common::{desc, Harness};
use fluidx::clock::{FLAT_STEP, VOLUME_STEP};
use fluidx::gpu::{BindingResource, BoundTable, Command, ResourceId, ResourceState};

fn dispatch<'a>(commands: &'a [Command], name: &str) -> (&'a [BoundTable], [u32; 3]) {
    commands
        .iter()
        .find_map(|command| match command {
            Command::Dispatch { label, tables, groups, .. } if *label == name => Some((tables.as_slice(), *groups)),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no `{name}` dispatch recorded"))
}

fn draw(commands: &[Command]) -> &Command {
    let draws: Vec<&Command> = commands.iter().filter(|c| matches!(c, Command::Draw { .. })).collect();
    assert_eq!(draws.len(), 1, "exactly one draw per frame");
    draws[0]
}

#[test]
fn test_volume_dispatch_sizes() {
    let mut harness = Harness::new(&desc(64, 64, 64, 0));
    let commands = harness.frame(1.0 / 60.0, 0);

    assert_eq!(dispatch(commands.commands(), "Advection").1, [8, 8, 64]);
    assert_eq!(dispatch(commands.commands(), "Projection").1, [16, 16, 16]);
}

#[test]
fn test_flat_particle_dispatch_sizes() {
    let mut harness = Harness::new(&desc(256, 256, 1, 2000));
    let commands = harness.frame(1.0 / 60.0, 0);

    assert_eq!(dispatch(commands.commands(), "Advection").1, [32, 32, 1]);
    assert_eq!(dispatch(commands.commands(), "Projection").1, [32, 32, 1]);
    assert_eq!(dispatch(commands.commands(), "ParticleUpdate").1, [32, 1, 1]);

    let Command::Draw { vertices, instances, .. } = draw(commands.commands()) else {
        unreachable!()
    };
    assert_eq!(*vertices, 0..4);
    assert_eq!(*instances, 0..2000);
}

#[test]
fn test_parity_toggles_only_on_positive_time() {
    let mut harness = Harness::new(&desc(32, 32, 1, 0));
    let mut expected = harness.fluid.parity();

    for (frame, elapsed) in [0.0, 0.01, 0.0, 0.0, 0.02, 0.001, -0.5].into_iter().enumerate() {
        harness.frame(elapsed, frame as u32 % 3);
        if elapsed > 0.0 {
            expected ^= 1;
        }
        assert_eq!(harness.fluid.parity(), expected, "after frame {frame} ({elapsed}s)");
    }
}

#[test]
fn test_zero_time_never_advances() {
    let mut harness = Harness::new(&desc(32, 32, 1, 0));
    for frame in 0..20 {
        let commands = harness.frame(0.0, frame % 3);
        // Kernels still run every frame.
        dispatch(commands.commands(), "Advection");
        dispatch(commands.commands(), "Projection");
        assert_eq!(harness.per_frame(frame % 3).time_step, 0.0);
    }
    assert_eq!(harness.fluid.simulation().clock().accumulated(), 0.0);
}

#[test]
fn test_flat_accumulator_releases_one_step() {
    let mut harness = Harness::new(&desc(32, 32, 1, 0));
    let steps: Vec<f32> = (0..6)
        .map(|frame| {
            harness.frame(0.0005, frame % 3);
            harness.per_frame(frame % 3).time_step
        })
        .collect();

    // 0.5ms, 1.0ms, then 1.5ms crosses the 1.25ms step and resets.
    assert_eq!(steps, vec![0.0, 0.0, FLAT_STEP, 0.0, 0.0, FLAT_STEP]);
}

#[test]
fn test_volume_steps_every_slow_frame() {
    let mut harness = Harness::new(&desc(16, 16, 16, 0));
    for frame in 0..4 {
        harness.frame(1.0 / 30.0, frame % 3);
        let params = harness.per_frame(frame % 3);
        assert_eq!(params.time_step, VOLUME_STEP);
        assert_eq!(params.frame_time, 1.0 / 30.0);
        assert_eq!(harness.fluid.simulation().clock().accumulated(), 0.0);
    }
}

#[test]
fn test_per_frame_slots_follow_frame_index() {
    let mut harness = Harness::new(&desc(16, 16, 1, 0));
    for frame in 0..6u32 {
        let commands = harness.frame(0.01, frame % 3);
        let (tables, _) = dispatch(commands.commands(), "Advection");
        assert_eq!(tables[0].dynamic_offsets, vec![(frame % 3) * 256]);
    }
}

#[test]
fn test_first_volume_frame_barriers() {
    let mut harness = Harness::new(&desc(32, 32, 32, 0));
    let commands = harness.frame(0.01, 0);
    let fields = harness.fluid.fields();
    let tex = |h| ResourceId::Texture(h);

    let v0 = tex(fields.velocity(0).handle());
    let v1 = tex(fields.velocity(1).handle());
    let written = tex(fields.colors().write().handle());
    let read = tex(fields.colors().read().handle());

    let list = commands.commands();
    assert_eq!(list.len(), 5, "barrier, advect, barrier, project, draw");

    let Command::Barrier(advect) = &list[0] else { panic!("expected advection barriers") };
    let targets: Vec<_> = advect.iter().map(|t| t.target()).collect();
    assert_eq!(
        targets,
        vec![
            (v0, ResourceState::ComputeRead),
            (v1, ResourceState::UnorderedAccess),
            (written, ResourceState::UnorderedAccess),
            (read, ResourceState::ShaderRead),
        ]
    );

    let Command::Barrier(project) = &list[2] else { panic!("expected projection barriers") };
    let targets: Vec<_> = project.iter().map(|t| t.target()).collect();
    assert_eq!(
        targets,
        vec![
            (v0, ResourceState::UnorderedAccess),
            (v1, ResourceState::ComputeRead),
            (written, ResourceState::ShaderRead),
        ]
    );

    // Projection already left the color readable, so the draw needs no barrier.
    assert!(matches!(list[4], Command::Draw { label: "RayCast", .. }));
}

#[test]
fn test_every_frame_reestablishes_hazards() {
    let mut harness = Harness::new(&desc(32, 32, 1, 0));
    harness.frame(0.01, 0);
    for frame in 1..5 {
        let commands = harness.frame(0.01, frame % 3);
        let barriers: Vec<_> = commands
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Barrier(transitions) => Some(transitions.len()),
                _ => None,
            })
            .collect();
        // Velocity pair plus the newly written color half, twice.
        assert_eq!(barriers, vec![3, 3]);
    }
}

#[test]
fn test_presentation_samples_freshly_written_color() {
    let mut harness = Harness::new(&desc(32, 32, 1, 0));
    for frame in 0..4 {
        let commands = harness.frame(0.01, frame % 3);

        let (advect_tables, _) = dispatch(commands.commands(), "Advection");
        let written = harness.fluid.fields().colors().write().handle();
        let color_pair = harness.device.table(advect_tables[3].table);
        assert_eq!(color_pair.entries[1].resource, BindingResource::StorageTexture(written));

        let Command::Draw { tables, .. } = draw(commands.commands()) else {
            unreachable!()
        };
        // The 2D view binds the color field and the clamp sampler, nothing else.
        assert_eq!(tables.len(), 2);
        let sampled = harness.device.table(tables[0].table);
        assert_eq!(sampled.entries.len(), 1);
        assert_eq!(sampled.entries[0].resource, BindingResource::Texture(written));
        assert_eq!(tables[1].index, 1);
        assert_eq!(tables[1].table, harness.fluid.tables().linear_clamp);
    }
}

#[test]
fn test_particle_frame_hazards() {
    let mut harness = Harness::new(&desc(32, 32, 8, 64));
    let commands = harness.frame(0.01, 0);
    let particles = ResourceId::Buffer(harness.fluid.presentation().particles().unwrap().buffer().handle());
    let v0 = ResourceId::Texture(harness.fluid.fields().velocity(0).handle());

    let list = commands.commands();
    let update_at = list
        .iter()
        .position(|c| matches!(c, Command::Dispatch { label: "ParticleUpdate", .. }))
        .unwrap();

    let Command::Barrier(before_update) = &list[update_at - 1] else { panic!("expected barrier") };
    let targets: Vec<_> = before_update.iter().map(|t| t.target()).collect();
    assert_eq!(
        targets,
        vec![(v0, ResourceState::ComputeRead), (particles, ResourceState::UnorderedAccess)]
    );
    assert_eq!(before_update[1].before, ResourceState::CopyDest);

    let Command::Barrier(before_draw) = &list[update_at + 1] else { panic!("expected barrier") };
    assert_eq!(before_draw[0].target(), (particles, ResourceState::ComputeRead));
    assert!(matches!(list[update_at + 2], Command::Draw { label: "Particles", .. }));
}

#[test]
fn test_particle_draw_offsets() {
    let mut harness = Harness::new(&desc(32, 32, 1, 16));
    let commands = harness.frame(0.01, 2);
    let Command::Draw { tables, .. } = draw(commands.commands()) else {
        unreachable!()
    };
    assert_eq!(tables[0].dynamic_offsets, vec![512, 512]);
}
