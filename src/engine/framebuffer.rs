use super::*;

use crate::driver::{AttachmentKind, FramebufferStatus, TextureId};

struct Attachment {
    texture: TextureId,
    handle: TextureGpuHandle,
}

/// The multisampled offscreen target token replay renders into.
///
/// Token replay cannot safely target a framebuffer whose identity was not
/// known at recording time, so every token draw goes into this private
/// target, which is blitted to the caller's framebuffer after the frame.
pub struct FallbackTarget {
    framebuffer: FramebufferHandle,
    /// Whatever was bound when capture began; the blit destination.
    original: FramebufferHandle,
    color: Option<Attachment>,
    depth_stencil: Option<Attachment>,
    size: (u32, u32),
    samples: u32,
}

impl FallbackTarget {
    pub(super) fn new(driver: &mut dyn Driver, width: u32, height: u32) -> Self {
        let mut target = Self {
            framebuffer: driver.create_framebuffer(),
            original: FramebufferHandle::DEFAULT,
            color: None,
            depth_stencil: None,
            size: (width, height),
            samples: 0,
        };
        target.resize(driver, width, height);
        target
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    fn release_attachments(&mut self, driver: &mut dyn Driver) {
        // Handles go non-resident before their textures are deleted; a
        // resident handle to a deleted texture is undefined.
        for attachment in [self.color.take(), self.depth_stencil.take()]
            .into_iter()
            .flatten()
        {
            driver.make_texture_handle_non_resident(attachment.handle);
            driver.delete_texture(attachment.texture);
        }
    }

    /// Recreates the offscreen targets at the given size and the
    /// currently detected sample count.
    pub fn resize(&mut self, driver: &mut dyn Driver, width: u32, height: u32) {
        self.release_attachments(driver);

        let samples = driver.current_sample_count();
        let color = driver.create_multisampled_texture(AttachmentKind::Color, width, height, samples);
        let depth_stencil = driver.create_multisampled_texture(
            AttachmentKind::DepthStencil,
            width,
            height,
            samples,
        );

        let status = driver.attach_framebuffer_targets(self.framebuffer, color, depth_stencil);
        if status == FramebufferStatus::Incomplete {
            warn!("fallback framebuffer incomplete at {width}x{height}, {samples} samples");
        }

        let color_handle = driver.texture_gpu_handle(color);
        let depth_stencil_handle = driver.texture_gpu_handle(depth_stencil);
        driver.make_texture_handle_resident(color_handle);
        driver.make_texture_handle_resident(depth_stencil_handle);

        self.color = Some(Attachment {
            texture: color,
            handle: color_handle,
        });
        self.depth_stencil = Some(Attachment {
            texture: depth_stencil,
            handle: depth_stencil_handle,
        });
        self.size = (width, height);
        self.samples = samples;
    }

    /// Remembers the currently bound framebuffer as the blit destination
    /// and binds the fallback target. If the live sample count no longer
    /// matches the attachments (the window system can change it), the
    /// target is recreated first.
    pub fn bind_for_capture(&mut self, driver: &mut dyn Driver) {
        self.original = driver.bound_draw_framebuffer();

        let live_samples = driver.current_sample_count();
        if live_samples != self.samples {
            self.resize(driver, self.size.0, self.size.1);
        }

        driver.bind_framebuffer(self.framebuffer);
    }

    /// Blits the fallback color buffer to the framebuffer that was bound
    /// before capture, and rebinds that framebuffer.
    pub fn blit_to_target(&mut self, driver: &mut dyn Driver) {
        driver.blit_framebuffer(self.framebuffer, self.original, self.size.0, self.size.1);
        driver.bind_framebuffer(self.original);
    }

    pub(super) fn finalize(mut self, driver: &mut dyn Driver) {
        self.release_attachments(driver);
        driver.delete_framebuffer(self.framebuffer);
    }
}
