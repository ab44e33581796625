// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end frame scenarios against the headless backend.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::renderer::{GpuResource, InterfaceBinding, ShaderInterface, ShaderProgramId};
use tessera_infra::{GpuTimeline, HeadlessDevice, RecordedCommand};
use tessera_render::{
    CommandError, CompletionStatus, Controller, DrawItem, DrawItemId, ExhaustionPolicy,
    FrameError, Geometry, MismatchReason, RendererConfig, TextureBinding, UniformBlockData,
};

struct Scene {
    device: HeadlessDevice,
    program: ShaderProgramId,
    controller: Controller,
}

impl Scene {
    fn new(config: RendererConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let device = HeadlessDevice::new();
        let program = device.register_program(
            "lit",
            ShaderInterface::new(vec![
                InterfaceBinding::uniform("transform", 0, 0, 16),
                InterfaceBinding::texture("albedo", 1, 0),
            ]),
        );
        let controller = Controller::new(Arc::new(device.clone()), config).unwrap();
        Self {
            device,
            program,
            controller,
        }
    }

    fn item(&self, id: u64, frame: u32) -> DrawItem {
        DrawItem::new(
            DrawItemId(id),
            format!("item {id}"),
            tessera_core::renderer::PipelineStateDescriptor::new(self.program),
            Geometry::procedural(3),
        )
        .with_uniform(UniformBlockData::from_pod("transform", &[frame, id as u32, 0, 0]))
    }

    fn frame(&mut self, frame: u32, ids: &[u64]) -> tessera_render::FrameReport {
        let items: Vec<DrawItem> = ids.iter().map(|id| self.item(*id, frame)).collect();
        self.controller.render_frame(&items).unwrap()
    }
}

fn manual(policy: ExhaustionPolicy) -> RendererConfig {
    RendererConfig {
        fence_wait_timeout_ms: 1,
        exhaustion_policy: policy,
        ..RendererConfig::default()
    }
}

#[test]
fn test_identical_state_shares_one_pipeline() {
    let mut scene = Scene::new(RendererConfig::default());
    let ids: Vec<u64> = (0..50).collect();
    let report = scene.frame(1, &ids);

    assert_eq!(report.recorded.len(), 50);
    assert_eq!(scene.device.calls().create_pipeline, 1);
    assert_eq!(scene.device.live_pipelines(), 1);
    let stats = scene.controller.stats();
    assert_eq!(stats.draw_calls, 50);
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.cache.hits, 49);
}

#[test]
fn test_draws_follow_item_order() {
    let mut scene = Scene::new(RendererConfig::default());
    let order = [5u64, 3, 9, 1];
    let items: Vec<DrawItem> = order
        .iter()
        .map(|id| {
            let mut item = scene.item(*id, 1);
            item.geometry = Geometry::procedural(*id as u32 * 3);
            item
        })
        .collect();
    let report = scene.controller.render_frame(&items).unwrap();

    let recorded: Vec<u64> = report.recorded.iter().map(|id| id.0).collect();
    assert_eq!(recorded, order);
    let draws: Vec<u32> = scene.device.submissions()[0]
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::Draw { vertices, .. } => Some(vertices.end / 3),
            _ => None,
        })
        .collect();
    assert_eq!(draws, vec![5, 3, 9, 1]);
}

#[test]
fn test_steady_state_makes_no_resource_calls() {
    let mut scene = Scene::new(RendererConfig::default());
    let item = scene.item(1, 0);
    for _ in 0..3 {
        scene.controller.render_frame(std::slice::from_ref(&item)).unwrap();
    }
    let settled = scene.device.calls();

    for _ in 0..5 {
        scene.controller.render_frame(std::slice::from_ref(&item)).unwrap();
    }
    let calls = scene.device.calls();
    assert_eq!(calls.total(), settled.total());
    assert_eq!(calls.submit, settled.submit + 5);
}

#[test]
fn test_in_flight_uniforms_are_never_overwritten() {
    for timeline in [GpuTimeline::Latency(1), GpuTimeline::Latency(2)] {
        let mut scene = Scene::new(RendererConfig::default());
        scene.device.set_timeline(timeline);
        for frame in 1..=12 {
            let report = scene.frame(frame, &[1, 2]);
            assert_eq!(report.recorded.len(), 2, "{timeline:?} frame {frame}");
        }
        assert!(scene.controller.wait_idle(Duration::from_secs(1)));

        assert!(scene.device.hazards().is_empty(), "{timeline:?}");
        let draws = scene.device.executed_draws();
        assert_eq!(draws.len(), 24);
        for draw in draws {
            let [frame, _, _, _] = draw.uniform(0, 0).unwrap().read::<[u32; 4]>().unwrap();
            assert_eq!(u64::from(frame), draw.submission, "{timeline:?}");
        }
    }
}

#[test]
fn test_bounded_wait_defers_when_the_gpu_is_stuck() {
    let mut scene = Scene::new(manual(ExhaustionPolicy::BoundedWait));
    scene.device.set_timeline(GpuTimeline::Manual);
    scene.frame(1, &[1]);
    scene.frame(2, &[1]);

    let report = scene.frame(3, &[1]);
    assert!(report.recorded.is_empty());
    assert_eq!(report.deferred(), 1);
    assert!(matches!(
        report.skipped[0].reason,
        CommandError::Exhausted { .. }
    ));
    assert_eq!(scene.controller.stats().deferred, 1);

    scene.device.retire_all();
    let report = scene.frame(4, &[1]);
    assert_eq!(report.recorded, vec![DrawItemId(1)]);
    assert!(scene.device.hazards().is_empty());
}

#[test]
fn test_grow_policy_adds_slots_up_to_the_limit() {
    let mut scene = Scene::new(manual(ExhaustionPolicy::Grow { max_slots: 3 }));
    scene.device.set_timeline(GpuTimeline::Manual);
    for frame in 1..=3 {
        assert_eq!(scene.frame(frame, &[1]).recorded.len(), 1);
    }
    assert_eq!(scene.device.live_buffers(), 3);

    let report = scene.frame(4, &[1]);
    assert_eq!(report.deferred(), 1);
    assert!(scene.device.hazards().is_empty());
}

#[test]
fn test_binding_mismatches_still_draw() {
    let mut scene = Scene::new(RendererConfig::default());
    let view = scene.device.create_texture_view("checker");
    let sampler = scene.device.create_sampler("linear");
    let item = scene
        .item(1, 1)
        .with_uniform(UniformBlockData::new("lights", vec![0; 16]))
        .with_texture(TextureBinding::new("transform", view, sampler))
        .with_texture(TextureBinding::new("albedo", view, sampler));

    let report = scene.controller.render_frame(&[item]).unwrap();
    assert_eq!(report.recorded, vec![DrawItemId(1)]);
    let reasons: Vec<MismatchReason> = report.mismatches.iter().map(|m| m.reason).collect();
    assert_eq!(reasons.len(), 2);
    assert!(reasons.contains(&MismatchReason::UnknownName));
    assert!(reasons.iter().any(|r| matches!(r, MismatchReason::KindMismatch { .. })));
    assert_eq!(scene.controller.stats().binding_mismatches, 2);

    let draw = &scene.device.executed_draws()[0];
    assert_eq!(draw.textures, vec![(1, 0, view, sampler)]);
}

#[test]
fn test_construction_failure_is_isolated_until_the_shader_is_fixed() {
    let mut scene = Scene::new(RendererConfig::default());
    let broken = scene.device.register_program("broken", ShaderInterface::default());
    scene.device.fail_program(broken, "syntax error");
    let mut bad = scene.item(2, 1);
    bad.pipeline = tessera_core::renderer::PipelineStateDescriptor::new(broken);
    let items = [scene.item(1, 1), bad];

    for _ in 0..2 {
        let report = scene.controller.render_frame(&items).unwrap();
        assert_eq!(report.recorded, vec![DrawItemId(1)]);
        assert!(report.was_skipped(DrawItemId(2)));
    }
    // The second frame does not retry the broken descriptor.
    assert_eq!(scene.device.calls().create_pipeline, 2);
    assert_eq!(scene.controller.cache().stats().failed, 1);

    scene.device.heal_program(broken);
    scene.controller.invalidate_shader(broken);
    let report = scene.controller.render_frame(&items).unwrap();
    assert_eq!(report.recorded, vec![DrawItemId(1), DrawItemId(2)]);
    assert!(scene.controller.command(DrawItemId(2)).unwrap().is_ready());
}

#[test]
fn test_shader_reload_rebuilds_live_pipelines() {
    let mut scene = Scene::new(RendererConfig::default());
    scene.frame(1, &[1, 2]);
    let before = scene.controller.command(DrawItemId(1)).unwrap().pipeline().unwrap().id();

    assert_eq!(scene.controller.invalidate_shader(scene.program), 1);
    scene.frame(2, &[1, 2]);

    let after = scene.controller.command(DrawItemId(1)).unwrap().pipeline().unwrap().id();
    assert_ne!(before, after);
    assert_eq!(scene.device.calls().create_pipeline, 2);
    assert!(scene.controller.wait_idle(Duration::from_secs(1)));
    assert_eq!(scene.device.live_pipelines(), 1);
    assert!(scene.device.hazards().is_empty());
}

#[test]
fn test_removed_item_is_released_after_its_frames_retire() {
    let mut scene = Scene::new(RendererConfig::default());
    scene.device.set_timeline(GpuTimeline::Manual);
    scene.frame(1, &[1]);

    let command = scene.controller.command(DrawItemId(1)).unwrap();
    let used = command
        .ring()
        .unwrap()
        .current(tessera_core::renderer::FrameSerial(1))
        .and_then(|slot| slot.uniform_buffer())
        .map(|buffer| GpuResource::Buffer(buffer.id()))
        .unwrap();

    assert!(scene.controller.remove_draw_item(DrawItemId(1)));
    assert!(!scene.controller.contains(DrawItemId(1)));
    scene.controller.poll();
    assert!(scene.device.is_alive(used));
    assert!(scene.controller.pending_releases() > 0);

    scene.device.retire_all();
    scene.controller.poll();
    assert!(!scene.device.is_alive(used));
    assert_eq!(scene.controller.pending_releases(), 0);
    assert_eq!(scene.device.live_buffers(), 0);
    assert_eq!(scene.device.live_descriptor_sets(), 0);
    assert_eq!(scene.device.live_pipelines(), 0);
    assert!(scene.device.hazards().is_empty());
}

#[test]
fn test_abandoned_frame_never_reaches_the_gpu() {
    let mut scene = Scene::new(RendererConfig::default());
    let completions = scene.controller.subscribe();
    let items = [scene.item(1, 1)];

    let mut frame = scene.controller.begin_frame();
    scene.controller.record(&mut frame, &items).unwrap();
    assert_eq!(frame.report().recorded.len(), 1);
    scene.controller.abandon(frame).unwrap();

    assert_eq!(scene.device.discarded_command_buffers(), 1);
    assert!(scene.device.submissions().is_empty());
    let completion = completions.try_recv().unwrap();
    assert_eq!(completion.status, CompletionStatus::Abandoned);

    let report = scene.frame(2, &[1]);
    assert_eq!(report.recorded.len(), 1);
    assert!(scene.device.hazards().is_empty());
}

#[test]
fn test_rejected_submission_fails_the_frame_only() {
    let mut scene = Scene::new(RendererConfig::default());
    let completions = scene.controller.subscribe();
    scene.device.reject_next_submission("device lost");
    let items = [scene.item(1, 1)];

    let err = scene.controller.render_frame(&items).unwrap_err();
    let frame = match err {
        FrameError::Submission { frame, .. } => frame,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(
        completions.try_recv().unwrap().status,
        CompletionStatus::SubmissionFailed
    );
    assert_eq!(completions.try_recv().ok().map(|c| c.frame), None);

    let report = scene.frame(2, &[1]);
    assert_eq!(report.recorded.len(), 1);
    assert!(report.frame > frame);
}

#[test]
fn test_subscribers_see_frames_retire_in_order() {
    let mut scene = Scene::new(RendererConfig::default());
    scene.device.set_timeline(GpuTimeline::Latency(1));
    let completions = scene.controller.subscribe();
    for frame in 1..=5 {
        scene.frame(frame, &[1]);
    }
    assert!(scene.controller.wait_idle(Duration::from_secs(1)));

    let retired: Vec<u64> = completions
        .try_iter()
        .inspect(|c| assert_eq!(c.status, CompletionStatus::Retired))
        .map(|c| c.frame.0)
        .collect();
    assert_eq!(retired, vec![1, 2, 3, 4, 5]);
    assert_eq!(scene.controller.tracker().watermark().0, 5);
}

#[test]
fn test_duplicate_item_is_drawn_once() {
    let mut scene = Scene::new(RendererConfig::default());
    let report = scene.frame(1, &[1, 2, 1]);
    assert_eq!(report.recorded, vec![DrawItemId(1), DrawItemId(2)]);
    assert!(matches!(report.skipped[0].reason, CommandError::Duplicate));
    assert_eq!(scene.controller.command_count(), 2);
}

#[test]
fn test_parallel_prepare_keeps_order_and_dedupe() {
    let mut scene = Scene::new(RendererConfig {
        parallel_prepare: true,
        prepare_workers: 4,
        ..RendererConfig::default()
    });
    let items: Vec<DrawItem> = (0..64u64)
        .map(|id| {
            let mut item = scene.item(id, 1);
            item.pipeline = item.pipeline.with_primitive(
                tessera_core::renderer::PrimitiveStateDescriptor {
                    cull_mode: match id % 3 {
                        0 => tessera_core::renderer::CullMode::None,
                        1 => tessera_core::renderer::CullMode::Front,
                        _ => tessera_core::renderer::CullMode::Back,
                    },
                    ..Default::default()
                },
            );
            item
        })
        .collect();

    let report = scene.controller.render_frame(&items).unwrap();
    let recorded: Vec<u64> = report.recorded.iter().map(|id| id.0).collect();
    assert_eq!(recorded, (0..64).collect::<Vec<_>>());
    assert_eq!(scene.device.calls().create_pipeline, 3);
    assert_eq!(scene.device.live_pipelines(), 3);
}

#[test]
fn test_drop_releases_every_resource() {
    let device = {
        let mut scene = Scene::new(RendererConfig::default());
        scene.device.set_timeline(GpuTimeline::Latency(2));
        for frame in 1..=4 {
            scene.frame(frame, &[1, 2, 3]);
        }
        assert!(scene.device.live_buffers() > 0);
        scene.device.clone()
    };
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_descriptor_sets(), 0);
    assert_eq!(device.live_pipelines(), 0);
    assert!(device.hazards().is_empty());
}

#[test]
fn test_removed_texture_is_unbound_from_reused_slots() {
    let mut scene = Scene::new(RendererConfig::default());
    scene.device.set_timeline(GpuTimeline::Latency(1));
    let view = scene.device.create_texture_view("checker");
    let sampler = scene.device.create_sampler("linear");
    for frame in 1..=4 {
        let mut item = scene.item(1, frame);
        if frame <= 2 {
            item = item.with_texture(TextureBinding::new("albedo", view, sampler));
        }
        scene.controller.render_frame(&[item]).unwrap();
    }
    assert!(scene.controller.wait_idle(Duration::from_secs(1)));

    assert!(scene.device.hazards().is_empty());
    let draws = scene.device.executed_draws();
    assert_eq!(draws.len(), 4);
    for draw in &draws[..2] {
        assert_eq!(draw.textures, vec![(1, 0, view, sampler)]);
    }
    for draw in &draws[2..] {
        assert!(draw.textures.is_empty(), "frame {}", draw.submission);
        let [frame, _, _, _] = draw.uniform(0, 0).unwrap().read::<[u32; 4]>().unwrap();
        assert_eq!(u64::from(frame), draw.submission);
    }
}

#[test]
fn test_removed_uniform_block_reads_zero() {
    let mut scene = Scene::new(RendererConfig::default());
    scene.frame(1, &[1]);
    scene.frame(2, &[1]);
    let mut item = scene.item(1, 3);
    item.uniforms.clear();
    scene.controller.render_frame(&[item]).unwrap();
    assert!(scene.controller.wait_idle(Duration::from_secs(1)));

    let draws = scene.device.executed_draws();
    assert_eq!(draws.len(), 3);
    assert_eq!(draws[2].uniform(0, 0).unwrap().bytes, vec![0; 16]);
    assert!(scene.device.hazards().is_empty());
}

#[test]
fn test_texture_swap_reaches_every_slot() {
    let mut scene = Scene::new(manual(ExhaustionPolicy::BoundedWait));
    scene.device.set_timeline(GpuTimeline::Manual);
    let first = scene.device.create_texture_view("first");
    let second = scene.device.create_texture_view("second");
    let sampler = scene.device.create_sampler("linear");
    let textured = |scene: &Scene, frame: u32, view| {
        scene
            .item(1, frame)
            .with_texture(TextureBinding::new("albedo", view, sampler))
    };

    let item = textured(&scene, 1, first);
    scene.controller.render_frame(&[item]).unwrap();
    // Frame 1 is still in flight when the texture changes.
    let item = textured(&scene, 2, second);
    assert_eq!(scene.controller.render_frame(&[item]).unwrap().recorded.len(), 1);
    scene.device.retire_all();
    let item = textured(&scene, 3, second);
    assert_eq!(scene.controller.render_frame(&[item]).unwrap().recorded.len(), 1);
    scene.device.retire_all();
    assert!(scene.controller.wait_idle(Duration::from_secs(1)));

    assert!(scene.device.hazards().is_empty());
    let views: Vec<_> = scene
        .device
        .executed_draws()
        .iter()
        .map(|draw| draw.textures.clone())
        .collect();
    assert_eq!(
        views,
        vec![
            vec![(1, 0, first, sampler)],
            vec![(1, 0, second, sampler)],
            vec![(1, 0, second, sampler)],
        ]
    );
}

#[test]
fn test_shader_reload_with_a_new_interface_resizes_uniforms() {
    let mut scene = Scene::new(RendererConfig::default());
    scene.device.set_timeline(GpuTimeline::Latency(1));
    let view = scene.device.create_texture_view("checker");
    let sampler = scene.device.create_sampler("linear");
    let item = scene
        .item(1, 1)
        .with_texture(TextureBinding::new("albedo", view, sampler));
    scene.controller.render_frame(&[item]).unwrap();

    scene.device.set_program_interface(
        scene.program,
        ShaderInterface::new(vec![
            InterfaceBinding::uniform("transform", 0, 0, 32),
            InterfaceBinding::texture("albedo", 1, 0),
        ]),
    );
    assert_eq!(scene.controller.invalidate_shader(scene.program), 1);

    for frame in 2..=4u32 {
        let mut item = scene
            .item(1, frame)
            .with_texture(TextureBinding::new("albedo", view, sampler));
        item.uniforms = vec![UniformBlockData::from_pod(
            "transform",
            &[frame, 1, 0, 0, 7, 7, 7, 7],
        )];
        let report = scene.controller.render_frame(&[item]).unwrap();
        assert_eq!(report.recorded, vec![DrawItemId(1)]);
        assert!(report.mismatches.is_empty());
    }
    assert!(scene.controller.wait_idle(Duration::from_secs(1)));

    assert!(scene.device.hazards().is_empty());
    let draws = scene.device.executed_draws();
    assert_eq!(draws.len(), 4);
    assert_eq!(draws[0].uniform(0, 0).unwrap().bytes.len(), 16);
    for draw in &draws[1..] {
        let uniform = draw.uniform(0, 0).unwrap();
        assert_eq!(uniform.bytes.len(), 32);
        let [frame, id, _, _, a, b, c, d] = uniform.read::<[u32; 8]>().unwrap();
        assert_eq!((u64::from(frame), id), (draw.submission, 1));
        assert_eq!([a, b, c, d], [7; 4]);
        assert_eq!(draw.textures, vec![(1, 0, view, sampler)]);
    }
}
