//! Per-frame submission order.
//!
//! The order depends only on whether presentation happens on its own queue
//! family, so it is computed once and replayed by the driver every frame.

/// Queue a submission goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Render,
    Present,
}

/// Work submitted at one step of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    /// Ownership of the swapchain image from the present to the render family.
    TransferFromPresent,
    /// Layout transitions that make the render target writable.
    Setup,
    /// The sample's own submissions.
    AppRender,
    /// Multisample resolve and transition to `PRESENT_SRC_KHR`.
    Resolve,
    /// Ownership of the swapchain image back to the present family.
    TransferToPresent,
}

/// Semaphores a frame slot owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreRole {
    /// Signaled by image acquisition.
    Acquire,
    /// Hand-off between the render and present queues.
    Transfer,
    /// Waited on by presentation.
    PresentReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSubmission {
    pub queue: QueueRole,
    pub command: FrameCommand,
    /// Waited at `COLOR_ATTACHMENT_OUTPUT`.
    pub wait: Option<SemaphoreRole>,
    pub signal: Option<SemaphoreRole>,
    /// Signals the slot's ready fence.
    pub signals_ready_fence: bool,
}

impl PlannedSubmission {
    const fn new(queue: QueueRole, command: FrameCommand) -> Self {
        Self {
            queue,
            command,
            wait: None,
            signal: None,
            signals_ready_fence: false,
        }
    }

    const fn waits(mut self, semaphore: SemaphoreRole) -> Self {
        self.wait = Some(semaphore);
        self
    }

    const fn signals(mut self, semaphore: SemaphoreRole) -> Self {
        self.signal = Some(semaphore);
        self
    }

    const fn with_fence(mut self) -> Self {
        self.signals_ready_fence = true;
        self
    }
}

/// Ordered submissions for one frame, followed by a present that waits on
/// [`SemaphoreRole::PresentReady`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPlan {
    steps: Vec<PlannedSubmission>,
    separate_present: bool,
}

impl SubmissionPlan {
    pub fn for_topology(separate_present: bool) -> Self {
        use FrameCommand::*;
        use QueueRole::*;
        use SemaphoreRole::*;

        let steps = if separate_present {
            vec![
                PlannedSubmission::new(Present, TransferFromPresent)
                    .waits(Acquire)
                    .signals(Transfer),
                PlannedSubmission::new(Render, Setup).waits(Transfer),
                PlannedSubmission::new(Render, AppRender),
                PlannedSubmission::new(Render, Resolve)
                    .signals(Transfer)
                    .with_fence(),
                PlannedSubmission::new(Present, TransferToPresent)
                    .waits(Transfer)
                    .signals(PresentReady),
            ]
        } else {
            vec![
                PlannedSubmission::new(Render, Setup).waits(Acquire),
                PlannedSubmission::new(Render, AppRender),
                PlannedSubmission::new(Render, Resolve)
                    .signals(PresentReady)
                    .with_fence(),
            ]
        };

        Self {
            steps,
            separate_present,
        }
    }

    pub fn steps(&self) -> &[PlannedSubmission] {
        &self.steps
    }

    pub fn separate_present(&self) -> bool {
        self.separate_present
    }

    /// Semaphore the present operation waits on.
    pub fn present_wait(&self) -> SemaphoreRole {
        SemaphoreRole::PresentReady
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn commands(plan: &SubmissionPlan) -> Vec<FrameCommand> {
        plan.steps().iter().map(|s| s.command).collect()
    }

    /// Every wait has a pending signal and no semaphore is signaled twice
    /// without a wait in between.
    fn assert_semaphores_balanced(plan: &SubmissionPlan) {
        let mut pending: HashSet<SemaphoreRole> = HashSet::from([SemaphoreRole::Acquire]);
        for step in plan.steps() {
            if let Some(wait) = step.wait {
                assert!(pending.remove(&wait), "{:?} waits on unsignaled {wait:?}", step.command);
            }
            if let Some(signal) = step.signal {
                assert!(pending.insert(signal), "{:?} re-signals {signal:?}", step.command);
            }
        }
        assert!(pending.remove(&plan.present_wait()));
        assert!(pending.is_empty(), "left pending: {pending:?}");
    }

    #[test]
    fn same_queue_order() {
        let plan = SubmissionPlan::for_topology(false);
        assert_eq!(
            commands(&plan),
            vec![FrameCommand::Setup, FrameCommand::AppRender, FrameCommand::Resolve]
        );
        assert!(plan.steps().iter().all(|s| s.queue == QueueRole::Render));
        assert_eq!(plan.steps()[0].wait, Some(SemaphoreRole::Acquire));
        assert_eq!(plan.steps()[2].signal, Some(SemaphoreRole::PresentReady));
        assert_semaphores_balanced(&plan);
    }

    #[test]
    fn separate_present_wraps_frame_in_transfers() {
        let plan = SubmissionPlan::for_topology(true);
        assert_eq!(
            commands(&plan),
            vec![
                FrameCommand::TransferFromPresent,
                FrameCommand::Setup,
                FrameCommand::AppRender,
                FrameCommand::Resolve,
                FrameCommand::TransferToPresent,
            ]
        );

        let steps = plan.steps();
        assert_eq!(steps[0].queue, QueueRole::Present);
        assert_eq!(steps[0].wait, Some(SemaphoreRole::Acquire));
        assert_eq!(steps[1].wait, Some(SemaphoreRole::Transfer));
        assert_eq!(steps[3].signal, Some(SemaphoreRole::Transfer));
        assert_eq!(steps[4].queue, QueueRole::Present);
        assert_eq!(steps[4].signal, Some(SemaphoreRole::PresentReady));
        assert_semaphores_balanced(&plan);
    }

    #[test]
    fn exactly_one_fence_signal_on_render_queue() {
        for separate in [false, true] {
            let plan = SubmissionPlan::for_topology(separate);
            let fenced: Vec<_> = plan
                .steps()
                .iter()
                .filter(|s| s.signals_ready_fence)
                .collect();
            assert_eq!(fenced.len(), 1);
            assert_eq!(fenced[0].command, FrameCommand::Resolve);
            assert_eq!(fenced[0].queue, QueueRole::Render);
        }
    }
}
