use crate::core::{Core, Recording};
use crate::pipeline::Transforms;
use crate::renderer::{DrawCall, Viewport};
use crate::transform;
use anyhow::{bail, Context, Result};
use erupt::vk1_0 as vk;
use nalgebra::Matrix4;

impl Core {
    /// Wait for the next frame slot and start recording its command buffer
    pub fn begin_commands(&mut self) -> Result<usize> {
        let (frame_idx, _) = self.frame_sync.next_frame(&self.prelude.device)?;
        let command_buffer = self.command_buffers[frame_idx];
        unsafe {
            self.prelude
                .device
                .reset_command_buffer(command_buffer, None)
                .result()?;

            let begin_info = vk::CommandBufferBeginInfoBuilder::new()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.prelude
                .device
                .begin_command_buffer(command_buffer, &begin_info)
                .result()?;
        }

        self.recording = Some(Recording {
            frame_idx,
            command_buffer,
            pass: None,
        });
        Ok(frame_idx)
    }

    /// Whether the render pass has begun this frame
    pub fn pass_open(&self) -> bool {
        matches!(self.recording, Some(Recording { pass: Some(_), .. }))
    }

    /// Begin the render pass over swapchain image `image_index`
    pub fn begin_pass(&mut self, image_index: u32) -> Result<()> {
        let recording = self.recording.as_mut().context("Not recording a frame")?;
        if recording.pass.is_some() {
            bail!("Render pass already begun this frame");
        }

        let images = self
            .swapchain_images
            .as_mut()
            .context("No swapchain images to render to")?;
        let (_, frame) = self.frame_sync.current();
        images.next_image(&self.prelude, image_index, frame)?;
        let extent = images.extent;

        let begin_info = vk::RenderPassBeginInfoBuilder::new()
            .framebuffer(images.framebuffer(image_index))
            .render_pass(self.render_pass)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            });

        unsafe {
            self.prelude.device.cmd_begin_render_pass(
                recording.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        recording.pass = Some(extent);
        Ok(())
    }

    /// Clear color and depth over the whole framebuffer
    pub fn cmd_clear(&self, color: [f32; 4], depth: f32) -> Result<()> {
        let (command_buffer, extent) = self.open_pass()?;

        let attachments = [
            vk::ClearAttachmentBuilder::new()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .color_attachment(0)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                }),
            vk::ClearAttachmentBuilder::new()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                }),
        ];

        let rects = [vk::ClearRectBuilder::new()
            .rect(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .base_array_layer(0)
            .layer_count(1)];

        unsafe {
            self.prelude
                .device
                .cmd_clear_attachments(command_buffer, &attachments, &rects);
        }
        Ok(())
    }

    /// Draw the mesh once with the given transforms, into the given viewport
    pub fn cmd_draw(&self, call: &DrawCall) -> Result<()> {
        let (command_buffer, extent) = self.open_pass()?;
        let device = &self.prelude.device;

        let (offset, size) = vulkan_rect(&call.viewport, extent.height);
        let viewports = [vk::ViewportBuilder::new()
            .x(offset.x as f32)
            .y(offset.y as f32)
            .width(size.width as f32)
            .height(size.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)];

        let scissors = [vk::Rect2DBuilder::new()
            .offset(vk::Offset2D {
                x: offset.x.max(0),
                y: offset.y.max(0),
            })
            .extent(size)];

        let transforms = push_constants(call);

        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );
            device.cmd_set_viewport(command_buffer, 0, &viewports);
            device.cmd_set_scissor(command_buffer, 0, &scissors);
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.mesh.vertices.buffer], &[0]);
            device.cmd_bind_index_buffer(
                command_buffer,
                self.mesh.indices.buffer,
                0,
                vk::IndexType::UINT16,
            );
            device.cmd_push_constants(
                command_buffer,
                self.pipeline.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                std::mem::size_of::<Transforms>() as u32,
                bytemuck::bytes_of(&transforms).as_ptr() as _,
            );
            device.cmd_draw_indexed(command_buffer, self.mesh.n_indices, 1, 0, 0, 0);
        }
        Ok(())
    }

    /// Finish recording, closing the render pass if it was begun.
    /// Returns the frame slot and its command buffer.
    pub fn end_commands(&mut self) -> Result<(usize, vk::CommandBuffer)> {
        let recording = self.recording.take().context("Not recording a frame")?;
        unsafe {
            if recording.pass.is_some() {
                self.prelude
                    .device
                    .cmd_end_render_pass(recording.command_buffer);
            }
            self.prelude
                .device
                .end_command_buffer(recording.command_buffer)
                .result()?;
        }
        Ok((recording.frame_idx, recording.command_buffer))
    }

    /// Submit a finished command buffer, signalling the current frame's fence
    pub fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait_semaphores: &[vk::Semaphore],
        signal_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let (_, frame) = self.frame_sync.current();
        let command_buffers = [command_buffer];
        let wait_stages =
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let submit_info = vk::SubmitInfoBuilder::new()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signal_semaphores);
        unsafe {
            self.prelude
                .device
                .reset_fences(&[frame.in_flight_fence])
                .result()?;
            self.prelude
                .device
                .queue_submit(
                    self.prelude.queue,
                    &[submit_info],
                    Some(frame.in_flight_fence),
                )
                .result()?;
        }
        Ok(())
    }

    fn open_pass(&self) -> Result<(vk::CommandBuffer, vk::Extent2D)> {
        match &self.recording {
            Some(Recording {
                command_buffer,
                pass: Some(extent),
                ..
            }) => Ok((*command_buffer, *extent)),
            _ => bail!("No framebuffer bound"),
        }
    }
}

/// Flip a bottom-left origin viewport into Vulkan's top-left framebuffer coordinates
pub(crate) fn vulkan_rect(viewport: &Viewport, framebuffer_height: u32) -> (vk::Offset2D, vk::Extent2D) {
    let y = framebuffer_height as i32 - (viewport.y + viewport.height as i32);
    (
        vk::Offset2D { x: viewport.x, y },
        vk::Extent2D {
            width: viewport.width,
            height: viewport.height,
        },
    )
}

fn matrix_data(matrix: &Matrix4<f32>) -> [f32; 16] {
    let mut data = [0.0; 16];
    data.copy_from_slice(matrix.as_slice());
    data
}

/// Model, and the combined view-projection in Vulkan clip space
pub(crate) fn push_constants(call: &DrawCall) -> Transforms {
    let view_projection = transform::vulkan_clip() * call.projection * call.view;
    Transforms {
        model: matrix_data(&call.model),
        view_projection: matrix_data(&view_projection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_origin_moves_to_top_left() {
        let viewport = Viewport {
            x: 10,
            y: 20,
            width: 100,
            height: 50,
        };
        let (offset, extent) = vulkan_rect(&viewport, 200);
        assert_eq!((offset.x, offset.y), (10, 130));
        assert_eq!((extent.width, extent.height), (100, 50));
    }

    #[test]
    fn full_viewport_is_unchanged() {
        let viewport = Viewport {
            x: 0,
            y: 0,
            width: 300,
            height: 150,
        };
        let (offset, _) = vulkan_rect(&viewport, 150);
        assert_eq!((offset.x, offset.y), (0, 0));
    }

    #[test]
    fn push_constants_are_column_major() {
        let call = DrawCall {
            model: Matrix4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0)),
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            viewport: Viewport {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            },
        };
        let transforms = push_constants(&call);
        assert_eq!(&transforms.model[12..15], &[1.0, 2.0, 3.0]);
        // Identity camera only carries the clip correction
        assert_eq!(transforms.view_projection[5], -1.0);
        assert_eq!(transforms.view_projection[10], 0.5);
        assert_eq!(transforms.view_projection[14], 0.5);
    }
}
