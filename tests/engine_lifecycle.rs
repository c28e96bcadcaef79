//! Lifecycle scenarios: the capability gate, fallback-target resizing and
//! binding, materials, the native command list, and teardown.

use drawstream::driver::{
    Driver, FramebufferHandle, TextureGpuHandle, EXT_BINDLESS_TEXTURE, EXT_COMMAND_LIST,
};
use drawstream::recording::RecordingDriver;
use drawstream::scene::LeafData;
use drawstream::{
    CapabilityError, Mesh, PrimitiveTopology, ProgramHandle, SceneNode, SceneTree, ShaderRegistry,
    TokenEngine,
};
use glam::{Mat4, Vec2, Vec3, Vec4};

fn registry() -> ShaderRegistry {
    let mut registry = ShaderRegistry::new();
    registry.register("unlit_colored_uniform", ProgramHandle(21));
    registry.register("simple_textured_object_uniform", ProgramHandle(23));
    registry
}

fn small_scene() -> SceneTree {
    let mut scene = SceneTree::new();
    scene.add(
        SceneNode::DashedStripe {
            data: LeafData::new(
                "unlit_colored",
                Mat4::IDENTITY,
                Mesh::new(
                    vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                    PrimitiveTopology::Triangles,
                ),
            ),
            color: Vec4::ONE,
        },
        None,
    );
    scene
}

#[test]
fn missing_extension_disables_the_engine_wholesale() {
    let mut driver = RecordingDriver::without_extension(EXT_COMMAND_LIST);

    match TokenEngine::new(&mut driver, 800, 600) {
        Err(CapabilityError::MissingExtensions(missing)) => {
            assert_eq!(missing, vec![EXT_COMMAND_LIST.to_owned()]);
        }
        Ok(_) => panic!("engine must not construct without the command-list extension"),
    }

    let mut driver = RecordingDriver::without_extension(EXT_BINDLESS_TEXTURE);
    assert!(TokenEngine::new(&mut driver, 800, 600).is_err());
}

#[test]
fn resizing_twice_to_the_same_dimensions_keeps_the_same_effect() {
    let mut driver = RecordingDriver::new();
    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();

    engine.resize(&mut driver, 1024, 768);
    engine.resize(&mut driver, 1024, 768);

    assert_eq!(engine.fallback().size(), (1024, 768));
    // Old attachments are gone; exactly one color + one depth/stencil
    // texture remain, at the final dimensions.
    assert_eq!(driver.live_textures(), 2);
    assert!(driver.textures_deleted_while_resident().is_empty());

    let (color, depth_stencil) = driver
        .framebuffer_attachments(engine.fallback().framebuffer())
        .unwrap();
    let color_record = driver.texture(color).unwrap();
    assert_eq!((color_record.width, color_record.height), (1024, 768));
    assert!(!color_record.deleted);
    assert!(!driver.texture(depth_stencil).unwrap().deleted);
}

#[test]
fn sample_count_change_is_detected_at_bind_time() {
    let mut driver = RecordingDriver::new();
    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();
    assert_eq!(engine.fallback().samples(), 8);

    // The window system halves the default framebuffer's sample count.
    driver.set_sample_count(4);
    engine.bind_for_capture(&mut driver);

    assert_eq!(engine.fallback().samples(), 4);
    assert_eq!(driver.live_textures(), 2);
    assert_eq!(
        driver.bound_draw_framebuffer(),
        engine.fallback().framebuffer()
    );
}

#[test]
fn capture_binds_the_fallback_and_blit_restores_the_original_target() {
    let mut driver = RecordingDriver::new();
    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();

    assert_eq!(driver.bound_draw_framebuffer(), FramebufferHandle::DEFAULT);
    engine.bind_for_capture(&mut driver);
    assert_eq!(
        driver.bound_draw_framebuffer(),
        engine.fallback().framebuffer()
    );

    engine.blit_to_target(&mut driver);
    assert_eq!(driver.bound_draw_framebuffer(), FramebufferHandle::DEFAULT);

    let blit = driver.blits().last().unwrap();
    assert_eq!(blit.src, engine.fallback().framebuffer());
    assert_eq!(blit.dst, FramebufferHandle::DEFAULT);
    assert_eq!((blit.width, blit.height), (800, 600));
}

#[test]
fn materials_become_resident_when_set() {
    let mut driver = RecordingDriver::new();
    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();

    engine.set_materials(
        &mut driver,
        [TextureGpuHandle(0x1111), TextureGpuHandle(0x2222)],
    );

    assert!(driver.is_texture_handle_resident(TextureGpuHandle(0x1111)));
    assert!(driver.is_texture_handle_resident(TextureGpuHandle(0x2222)));
    let mut scene = SceneTree::new();
    scene.add(
        SceneNode::Textured {
            data: LeafData::new(
                "simple_textured_object",
                Mat4::IDENTITY,
                Mesh::new(
                    vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                    PrimitiveTopology::Triangles,
                )
                .with_uvs(vec![Vec2::ZERO; 3]),
            ),
            alpha: 1.0,
        },
        None,
    );
    scene.upload_meshes(&mut driver);
    engine.compile(&mut driver, &scene, &registry());
    assert_eq!(engine.sequence().len(), 1);
}

#[test]
fn native_command_list_is_built_once_and_dropped_on_invalidate() {
    let mut driver = RecordingDriver::new();
    let registry = registry();
    let mut scene = small_scene();
    scene.upload_meshes(&mut driver);

    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();
    engine.compile(&mut driver, &scene, &registry);

    engine.call_command_list(&mut driver);
    engine.call_command_list(&mut driver);

    let list = engine.build_command_list(&mut driver).unwrap();
    let record = driver.command_list(list).unwrap();
    assert!(record.compiled);
    assert_eq!(record.calls, 2);
    assert_eq!(record.segment_count, 1);

    engine.invalidate(&mut driver);
    assert!(driver.command_list(list).unwrap().deleted);

    engine.compile(&mut driver, &scene, &registry);
    let rebuilt = engine.build_command_list(&mut driver).unwrap();
    assert_ne!(rebuilt, list);
}

#[test]
fn command_list_before_compile_is_refused() {
    let mut driver = RecordingDriver::new();
    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();

    assert!(engine.build_command_list(&mut driver).is_none());
    engine.call_command_list(&mut driver);
}

#[test]
fn finalize_releases_states_textures_and_buffers() {
    let mut driver = RecordingDriver::new();
    let registry = registry();
    let mut scene = small_scene();
    scene.upload_meshes(&mut driver);

    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();
    engine.compile(&mut driver, &scene, &registry);
    assert!(engine.stats().captured_states > 0);

    engine.finalize(&mut driver);

    assert_eq!(driver.live_state_count(), 0);
    assert_eq!(driver.deleted_state_batches(), 1);
    assert_eq!(driver.live_textures(), 0);
    assert!(driver.textures_deleted_while_resident().is_empty());
}

#[test]
fn replay_before_compile_submits_nothing() {
    let mut driver = RecordingDriver::new();
    let mut engine = TokenEngine::new(&mut driver, 800, 600).unwrap();

    engine.replay(&mut driver);
    assert!(driver.draws().is_empty());
}
