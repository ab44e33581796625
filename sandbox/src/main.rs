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

// Tessera Sandbox
// Renders an animated grid of quads on the headless backend.
//
// Usage: sandbox [renderer.ron]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tessera_core::renderer::{
    BlendStateDescriptor, InterfaceBinding, PipelineStateDescriptor, ShaderInterface,
    ShaderProgramId,
};
use tessera_infra::{GpuTimeline, HeadlessDevice};
use tessera_render::{
    CompletionStatus, Controller, DrawItem, DrawItemId, Geometry, RendererConfig, TextureBinding,
    UniformBlockData,
};

const FRAMES: u32 = 300;
const GRID: u64 = 8;
const RELOAD_FRAME: u32 = 150;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Transform {
    offset: [f32; 2],
    scale: f32,
    time: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Material {
    tint: [f32; 4],
}

struct SandboxScene {
    program: ShaderProgramId,
    items: Vec<DrawItem>,
}

impl SandboxScene {
    fn new(device: &HeadlessDevice) -> Self {
        let program = device.register_program(
            "sprite",
            ShaderInterface::new(vec![
                InterfaceBinding::uniform("transform", 0, 0, std::mem::size_of::<Transform>() as u64),
                InterfaceBinding::uniform("material", 0, 1, std::mem::size_of::<Material>() as u64),
                InterfaceBinding::texture("albedo", 1, 0),
            ]),
        );
        let view = device.create_texture_view("checker");
        let sampler = device.create_sampler("linear");

        let items = (0..GRID * GRID)
            .map(|i| {
                let mut pipeline = PipelineStateDescriptor::new(program);
                // Every other column is alpha blended: two pipelines for the grid.
                if (i % GRID) % 2 == 1 {
                    pipeline = pipeline.with_blend(Some(BlendStateDescriptor::ALPHA_BLENDING));
                }
                DrawItem::new(DrawItemId(i), format!("quad {i}"), pipeline, Geometry::procedural(6))
                    .with_uniform(UniformBlockData::from_pod(
                        "material",
                        &Material {
                            tint: [1.0, (i % GRID) as f32 / GRID as f32, 0.5, 1.0],
                        },
                    ))
                    .with_texture(TextureBinding::new("albedo", view, sampler))
            })
            .collect();

        log::info!("SandboxScene: {} draw items over {:?}", GRID * GRID, program);
        Self { program, items }
    }

    fn animate(&mut self, frame: u32) {
        let time = frame as f32 / 60.0;
        for item in &mut self.items {
            let i = item.id.0;
            let (x, y) = ((i % GRID) as f32, (i / GRID) as f32);
            item.set_uniform(UniformBlockData::from_pod(
                "transform",
                &Transform {
                    offset: [x / GRID as f32, y / GRID as f32 + (time + x).sin() * 0.05],
                    scale: 1.0 / GRID as f32,
                    time,
                },
            ));
        }
    }

    /// Every 50th frame the last row disappears for one frame.
    fn visible(&self, frame: u32) -> Vec<DrawItem> {
        let hidden_from = if frame % 50 == 0 { GRID * (GRID - 1) } else { GRID * GRID };
        self.items
            .iter()
            .filter(|item| item.id.0 < hidden_from)
            .cloned()
            .collect()
    }
}

fn load_config() -> Result<RendererConfig> {
    match std::env::args().nth(1) {
        Some(path) => RendererConfig::from_ron_file(&path)
            .with_context(|| format!("loading renderer config from {path}")),
        None => Ok(RendererConfig::default()),
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    let device = HeadlessDevice::new();
    device.set_timeline(GpuTimeline::Latency(config.frames_in_flight));

    let mut scene = SandboxScene::new(&device);
    let mut controller = Controller::new(Arc::new(device.clone()), config)?;
    let completions = controller.subscribe();

    for frame in 1..=FRAMES {
        scene.animate(frame);
        if frame == RELOAD_FRAME {
            let count = controller.invalidate_shader(scene.program);
            log::info!("Sandbox: hot reload of {:?} invalidated {count} pipelines", scene.program);
        }

        let report = controller.render_frame(&scene.visible(frame))?;
        for mismatch in &report.mismatches {
            log::warn!("Sandbox: {mismatch}");
        }

        if frame % 60 == 0 {
            let stats = controller.stats();
            log::info!(
                "Sandbox: frame {} | {} draws, {} deferred, {} in flight | cache {} hits / {} misses | prepare {:.3} ms, record {:.3} ms",
                stats.frame,
                stats.draw_calls,
                stats.deferred,
                stats.in_flight,
                stats.cache.hits,
                stats.cache.misses,
                stats.prepare_ms,
                stats.record_ms
            );
        }
    }

    if !controller.wait_idle(Duration::from_secs(1)) {
        log::warn!("Sandbox: GPU did not go idle");
    }
    let retired = completions
        .try_iter()
        .filter(|c| c.status == CompletionStatus::Retired)
        .count();
    let hazards = device.hazards();
    log::info!(
        "Sandbox: {} frames retired, {} draws executed, {} hazards",
        retired,
        device.executed_draws().len(),
        hazards.len()
    );
    for hazard in &hazards {
        log::error!("Sandbox: {hazard:?}");
    }
    Ok(())
}
