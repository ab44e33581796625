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

use std::io::Write;
use std::sync::Arc;

use tessera_core::renderer::DeviceLimits;
use tessera_infra::HeadlessDevice;
use tessera_render::{ConfigError, Controller, ExhaustionPolicy, RendererConfig};

#[test]
fn test_config_file_round_trip() {
    let config = RendererConfig {
        frames_in_flight: 3,
        exhaustion_policy: ExhaustionPolicy::Grow { max_slots: 5 },
        parallel_prepare: true,
        ..RendererConfig::default()
    };
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config.to_ron_string().unwrap().as_bytes())
        .unwrap();

    let loaded = RendererConfig::from_ron_file(file.path()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RendererConfig::from_ron_file(dir.path().join("renderer.ron")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_invalid_values_are_rejected() {
    assert!(matches!(
        RendererConfig::from_ron_str("(frames_in_flight: 0)"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        RendererConfig::from_ron_str("(uniform_alignment: 100)"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        RendererConfig::from_ron_str("(frames_in_flight: 4, exhaustion_policy: Grow(max_slots: 2))"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        RendererConfig::from_ron_str("(frames_in_flight: \"two\")"),
        Err(ConfigError::Parse(_))
    ));

    let device = Arc::new(HeadlessDevice::new());
    let config = RendererConfig {
        frames_in_flight: 0,
        ..RendererConfig::default()
    };
    assert!(Controller::new(device, config).is_err());
}

#[test]
fn test_device_alignment_wins_over_a_smaller_config() {
    let device = HeadlessDevice::with_limits(DeviceLimits {
        min_uniform_buffer_offset_alignment: 512,
        ..DeviceLimits::default()
    });
    let program = device.register_program(
        "two blocks",
        tessera_core::renderer::ShaderInterface::new(vec![
            tessera_core::renderer::InterfaceBinding::uniform("a", 0, 0, 16),
            tessera_core::renderer::InterfaceBinding::uniform("b", 0, 1, 16),
        ]),
    );
    let config = RendererConfig {
        uniform_alignment: 64,
        ..RendererConfig::default()
    };
    let mut controller = Controller::new(Arc::new(device.clone()), config).unwrap();
    let item = tessera_render::DrawItem::new(
        tessera_render::DrawItemId(1),
        "pair",
        tessera_core::renderer::PipelineStateDescriptor::new(program),
        tessera_render::Geometry::procedural(3),
    );
    controller.render_frame(&[item]).unwrap();

    let ring = controller
        .command(tessera_render::DrawItemId(1))
        .unwrap()
        .ring()
        .unwrap();
    assert_eq!(ring.layout().uniform_size, 1024);
}
