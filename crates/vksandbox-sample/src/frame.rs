//! Per-swapchain-image frame state.

use crate::plan::{FrameCommand, PlannedSubmission, SemaphoreRole};
use anyhow::anyhow;
use ash::vk;
use vksandbox_gpu::Image;

/// Render targets of one frame slot, handed to the sample.
#[derive(Debug, Clone, Copy)]
pub struct FrameTargets {
    pub swapchain_image: vk::Image,
    /// View the sample renders into: the multisample target when
    /// multisampling is on, otherwise the swapchain image.
    pub color_view: vk::ImageView,
    pub depth_image: Option<vk::Image>,
    pub depth_view: Option<vk::ImageView>,
    pub multisample_image: Option<vk::Image>,
}

/// An image the framework created for a slot, with its single view.
pub(crate) struct OwnedTarget {
    pub image: Image,
    pub view: vk::ImageView,
}

/// Command buffers recorded once at initialization and replayed every frame.
pub(crate) struct SlotCommands {
    pub setup: vk::CommandBuffer,
    pub resolve: vk::CommandBuffer,
    /// Recorded on the present family; only with a separate present queue.
    pub transfer_from_present: Option<vk::CommandBuffer>,
    pub transfer_to_present: Option<vk::CommandBuffer>,
}

impl SlotCommands {
    pub fn get(&self, command: FrameCommand) -> Option<vk::CommandBuffer> {
        match command {
            FrameCommand::TransferFromPresent => self.transfer_from_present,
            FrameCommand::Setup => Some(self.setup),
            FrameCommand::Resolve => Some(self.resolve),
            FrameCommand::TransferToPresent => self.transfer_to_present,
            FrameCommand::AppRender => None,
        }
    }
}

pub(crate) struct SlotSync {
    pub ready_fence: vk::Fence,
    /// Semaphore of the acquisition that last returned this slot; null until
    /// the first frame.
    pub acquire: vk::Semaphore,
    pub present_ready: vk::Semaphore,
    pub transfer: Option<vk::Semaphore>,
}

impl SlotSync {
    pub fn get(&self, role: SemaphoreRole) -> Option<vk::Semaphore> {
        match role {
            SemaphoreRole::Acquire => Some(self.acquire),
            SemaphoreRole::Transfer => self.transfer,
            SemaphoreRole::PresentReady => Some(self.present_ready),
        }
    }
}

/// Handles of one framework submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotSubmission {
    pub cmd: vk::CommandBuffer,
    pub wait: Option<vk::Semaphore>,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Look up the command buffer, semaphores and fence a planned framework
/// step uses in one slot. Fails when the slot lacks any of them.
pub(crate) fn resolve_step(
    commands: &SlotCommands,
    sync: &SlotSync,
    step: &PlannedSubmission,
) -> anyhow::Result<SlotSubmission> {
    let cmd = commands
        .get(step.command)
        .ok_or_else(|| anyhow!("no {:?} command buffer", step.command))?;
    let semaphore = |role: Option<SemaphoreRole>| {
        role.map(|role| {
            sync.get(role)
                .ok_or_else(|| anyhow!("no {role:?} semaphore for {:?}", step.command))
        })
        .transpose()
    };
    Ok(SlotSubmission {
        cmd,
        wait: semaphore(step.wait)?,
        signal: semaphore(step.signal)?,
        fence: if step.signals_ready_fence {
            sync.ready_fence
        } else {
            vk::Fence::null()
        },
    })
}

/// Everything the framework keeps for one swapchain image, plus the sample's
/// payload.
pub struct FrameSlot<D> {
    pub(crate) targets: FrameTargets,
    pub(crate) depth: Option<OwnedTarget>,
    pub(crate) multisample: Option<OwnedTarget>,
    pub(crate) commands: SlotCommands,
    pub(crate) sync: SlotSync,
    pub(crate) data: D,
}

impl<D> FrameSlot<D> {
    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub(crate) fn context(&mut self) -> FrameContext<'_, D> {
        FrameContext {
            targets: self.targets,
            data: &mut self.data,
        }
    }
}

/// Borrow of one frame slot passed to [`crate::SampleApp::render`].
pub struct FrameContext<'a, D> {
    targets: FrameTargets,
    data: &'a mut D,
}

impl<D> FrameContext<'_, D> {
    pub fn data(&self) -> &D {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        self.data
    }

    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    pub fn color_view(&self) -> vk::ImageView {
        self.targets.color_view
    }

    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.targets.depth_view
    }

    pub fn swapchain_image(&self) -> vk::Image {
        self.targets.swapchain_image
    }

    pub fn depth_image(&self) -> Option<vk::Image> {
        self.targets.depth_image
    }

    pub fn multisample_image(&self) -> Option<vk::Image> {
        self.targets.multisample_image
    }

    /// Image the sample's color output lands in before any resolve.
    pub fn color_image(&self) -> vk::Image {
        self.targets
            .multisample_image
            .unwrap_or(self.targets.swapchain_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{QueueRole, SubmissionPlan};
    use ash::vk::Handle;

    fn targets(msaa: bool) -> FrameTargets {
        FrameTargets {
            swapchain_image: vk::Image::from_raw(1),
            color_view: vk::ImageView::from_raw(10),
            depth_image: None,
            depth_view: None,
            multisample_image: msaa.then_some(vk::Image::from_raw(2)),
        }
    }

    #[test]
    fn color_image_prefers_multisample_target() {
        let mut data = 0u32;
        let ctx = FrameContext {
            targets: targets(true),
            data: &mut data,
        };
        assert_eq!(ctx.color_image(), vk::Image::from_raw(2));

        let ctx = FrameContext {
            targets: targets(false),
            data: &mut data,
        };
        assert_eq!(ctx.color_image(), vk::Image::from_raw(1));
        assert_eq!(ctx.depth_view(), None);
    }

    #[test]
    fn frame_context_gives_mutable_payload() {
        let mut data = vec![1u32];
        let mut ctx = FrameContext {
            targets: targets(false),
            data: &mut data,
        };
        ctx.data_mut().push(2);
        assert_eq!(ctx.data(), &vec![1, 2]);
    }

    #[test]
    fn slot_lookups_follow_roles() {
        let commands = SlotCommands {
            setup: vk::CommandBuffer::from_raw(1),
            resolve: vk::CommandBuffer::from_raw(2),
            transfer_from_present: None,
            transfer_to_present: None,
        };
        assert_eq!(
            commands.get(FrameCommand::Resolve),
            Some(vk::CommandBuffer::from_raw(2))
        );
        assert_eq!(commands.get(FrameCommand::TransferToPresent), None);
        assert_eq!(commands.get(FrameCommand::AppRender), None);

        let sync = SlotSync {
            ready_fence: vk::Fence::null(),
            acquire: vk::Semaphore::from_raw(5),
            present_ready: vk::Semaphore::from_raw(6),
            transfer: None,
        };
        assert_eq!(sync.get(SemaphoreRole::Transfer), None);
        assert_eq!(
            sync.get(SemaphoreRole::PresentReady),
            Some(vk::Semaphore::from_raw(6))
        );
    }

    fn slot_handles(separate_present: bool) -> (SlotCommands, SlotSync) {
        let commands = SlotCommands {
            setup: vk::CommandBuffer::from_raw(1),
            resolve: vk::CommandBuffer::from_raw(2),
            transfer_from_present: separate_present.then(|| vk::CommandBuffer::from_raw(3)),
            transfer_to_present: separate_present.then(|| vk::CommandBuffer::from_raw(4)),
        };
        let sync = SlotSync {
            ready_fence: vk::Fence::from_raw(20),
            acquire: vk::Semaphore::from_raw(10),
            present_ready: vk::Semaphore::from_raw(11),
            transfer: separate_present.then(|| vk::Semaphore::from_raw(12)),
        };
        (commands, sync)
    }

    #[test]
    fn every_planned_step_resolves_in_its_slot() {
        for separate in [false, true] {
            let plan = SubmissionPlan::for_topology(separate);
            let (commands, sync) = slot_handles(separate);

            let mut fences = 0;
            for step in plan.steps() {
                if step.command == FrameCommand::AppRender {
                    assert_eq!(step.queue, QueueRole::Render);
                    assert!(step.wait.is_none() && step.signal.is_none());
                    continue;
                }
                let submission = resolve_step(&commands, &sync, step)
                    .unwrap_or_else(|e| panic!("separate={separate}: {e}"));
                assert_eq!(submission.wait.is_some(), step.wait.is_some());
                assert_eq!(submission.signal.is_some(), step.signal.is_some());
                if step.signals_ready_fence {
                    assert_eq!(submission.fence, sync.ready_fence);
                    fences += 1;
                } else {
                    assert_eq!(submission.fence, vk::Fence::null());
                }
            }
            assert_eq!(fences, 1);
            assert!(sync.get(plan.present_wait()).is_some());
        }
    }

    #[test]
    fn first_submission_waits_on_acquire_and_last_signals_present() {
        for separate in [false, true] {
            let plan = SubmissionPlan::for_topology(separate);
            let (commands, sync) = slot_handles(separate);
            let steps = plan.steps();

            let first = resolve_step(&commands, &sync, &steps[0]).unwrap();
            assert_eq!(first.wait, Some(sync.acquire));

            let last = resolve_step(&commands, &sync, &steps[steps.len() - 1]).unwrap();
            assert_eq!(last.signal, Some(sync.present_ready));
            assert_eq!(sync.get(plan.present_wait()), Some(sync.present_ready));
        }
    }

    #[test]
    fn transfer_semaphore_links_the_queue_hand_offs() {
        let plan = SubmissionPlan::for_topology(true);
        let (commands, sync) = slot_handles(true);
        let resolved: Vec<(FrameCommand, SlotSubmission)> = plan
            .steps()
            .iter()
            .filter(|step| step.command != FrameCommand::AppRender)
            .map(|step| (step.command, resolve_step(&commands, &sync, step).unwrap()))
            .collect();
        let find = |command| {
            resolved
                .iter()
                .find(|(c, _)| *c == command)
                .map(|(_, s)| *s)
                .unwrap()
        };

        let transfer = sync.transfer;
        assert_eq!(find(FrameCommand::TransferFromPresent).signal, transfer);
        assert_eq!(find(FrameCommand::Setup).wait, transfer);
        assert_eq!(find(FrameCommand::Resolve).signal, transfer);
        assert_eq!(find(FrameCommand::TransferToPresent).wait, transfer);
        assert_eq!(
            find(FrameCommand::TransferFromPresent).cmd,
            vk::CommandBuffer::from_raw(3)
        );
    }

    #[test]
    fn separate_present_plan_fails_on_shared_queue_slot() {
        let plan = SubmissionPlan::for_topology(true);
        let (commands, sync) = slot_handles(false);
        let err = resolve_step(&commands, &sync, &plan.steps()[0]).unwrap_err();
        assert!(err.to_string().contains("TransferFromPresent"));

        let (commands, _) = slot_handles(true);
        let err = resolve_step(&commands, &sync, &plan.steps()[1]).unwrap_err();
        assert!(err.to_string().contains("Transfer"));
    }
}
